use crate::dsn::DriverKind;
use std::fmt;
use std::time::Duration;

/// What kind of statement a connection ran, judged from its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// CREATE, ALTER and DROP.
    Schema,
    /// BEGIN, COMMIT, ROLLBACK and savepoints.
    Transaction,
    /// Catalogue lookups the connection labels `-- name(...)`.
    Introspection,
    Other,
}

impl QueryType {
    pub const ALL: [QueryType; 8] = [
        QueryType::Select,
        QueryType::Insert,
        QueryType::Update,
        QueryType::Delete,
        QueryType::Schema,
        QueryType::Transaction,
        QueryType::Introspection,
        QueryType::Other,
    ];

    pub fn from_sql(sql: &str) -> Self {
        if is_label(sql) {
            return QueryType::Introspection;
        }
        let Some(keyword) = leading_keyword(sql) else {
            return QueryType::Other;
        };
        match keyword.to_ascii_uppercase().as_str() {
            "SELECT" | "WITH" | "VALUES" | "PRAGMA" => QueryType::Select,
            "INSERT" | "REPLACE" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            "CREATE" | "ALTER" | "DROP" => QueryType::Schema,
            "BEGIN" | "START" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                QueryType::Transaction
            }
            _ => QueryType::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Select => "select",
            QueryType::Insert => "insert",
            QueryType::Update => "update",
            QueryType::Delete => "delete",
            QueryType::Schema => "schema",
            QueryType::Transaction => "transaction",
            QueryType::Introspection => "introspection",
            QueryType::Other => "other",
        }
    }

    /// Position in [`QueryType::ALL`].
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `-- table_columns(user)`: a single comment line naming a lookup.
fn is_label(sql: &str) -> bool {
    sql.strip_prefix("-- ")
        .is_some_and(|rest| !rest.contains('\n') && rest.ends_with(')'))
}

/// First word after comments and opening parentheses.
fn leading_keyword(sql: &str) -> Option<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n')?.1;
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/")?.1;
        } else if let Some(inner) = rest.strip_prefix('(') {
            rest = inner;
        } else {
            break;
        }
    }
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// What monitors learn about a statement before it runs.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Statement text as sent to the driver, `:pN` placeholders intact.
    pub sql: String,
    pub param_count: usize,
    pub query_type: QueryType,
    /// Name of the connection running the statement.
    pub connection: String,
    pub dialect: Option<DriverKind>,
}

impl QueryContext {
    pub fn new(sql: &str, param_count: usize) -> Self {
        Self {
            sql: sql.to_string(),
            param_count,
            query_type: QueryType::from_sql(sql),
            connection: String::new(),
            dialect: None,
        }
    }

    pub fn with_connection(mut self, name: impl Into<String>) -> Self {
        self.connection = name.into();
        self
    }

    pub fn with_dialect(mut self, dialect: DriverKind) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

/// Longest error message kept in a [`QueryResult::Error`].
const MAX_ERROR_LEN: usize = 512;

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Rows returned.
    Rows(usize),
    /// Rows changed by a mutation.
    Affected(u64),
    Error(String),
}

impl QueryResult {
    /// Error outcome; messages past 512 bytes are cut at a char boundary
    /// and marked with `...`.
    pub fn error(msg: impl Into<String>) -> Self {
        let mut msg = msg.into();
        if msg.len() > MAX_ERROR_LEN {
            let mut end = MAX_ERROR_LEN;
            while !msg.is_char_boundary(end) {
                end -= 1;
            }
            msg.truncate(end);
            msg.push_str("...");
        }
        Self::Error(msg)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(n) => write!(f, "{n} rows"),
            QueryResult::Affected(n) => write!(f, "{n} affected"),
            QueryResult::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Observer of every statement a [`Connection`](crate::Connection) runs.
///
/// Attach with [`Connection::add_monitor`](crate::Connection::add_monitor).
/// Hooks run inline on the executing task, so keep them cheap.
pub trait QueryMonitor: Send + Sync {
    fn on_query_start(&self, _ctx: &QueryContext) {}

    /// Runs after every statement, failed ones included.
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult);

    /// Runs in addition to `on_query_complete` when the statement took longer
    /// than [`ConnectOptions::slow_query_threshold`](crate::ConnectOptions::slow_query_threshold).
    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {}
}
