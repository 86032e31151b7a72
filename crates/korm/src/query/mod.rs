//! Fluent query builder.
//!
//! A [`Query`] accumulates clauses and renders one SELECT, INSERT, UPDATE,
//! DELETE or COUNT statement with `:pN` placeholders. Execution lives in
//! `fetch.rs`; rendering never touches a connection.
//!
//! ```ignore
//! let mut q = Query::from("user")
//!     .filter("company.name", "Acme")   // implicit LEFT JOIN company
//!     .filter("deleted_at", Value::Null) // IS NULL
//!     .order_by("name", Order::Asc)
//!     .limit(10);
//! let rows = q.fetch_all(&conn).await?;
//! ```

mod expr;
mod fetch;

#[cfg(test)]
mod tests;

pub use expr::{Conjunction, Expr, Op, ParamList};

use crate::dsn::DriverKind;
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::value::Value;
use expr::render_group;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinType {
    #[default]
    Left,
    Inner,
    Right,
    Cross,
}

impl JoinType {
    pub fn as_sql(self) -> &'static str {
        match self {
            JoinType::Left => "LEFT JOIN",
            JoinType::Inner => "INNER JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// One JOIN clause. `table` may carry an alias: `"company c"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub predicate: Option<String>,
    pub kind: JoinType,
}

impl Join {
    /// Table name and the name the rest of the query refers to it by.
    fn names(&self) -> (&str, &str) {
        let mut parts = self.table.split_whitespace().filter(|p| !p.eq_ignore_ascii_case("as"));
        let table = parts.next().unwrap_or("");
        let alias = parts.next().unwrap_or(table);
        (table, alias)
    }

    fn render(&self) -> String {
        match &self.predicate {
            Some(on) => format!("{} {} ON {on}", self.kind.as_sql(), self.table),
            None => format!("{} {}", self.kind.as_sql(), self.table),
        }
    }
}

/// Column/value pairs for INSERT and UPDATE.
pub type Values = Vec<(String, Value)>;

/// Collect `(column, value)` pairs from anything convertible.
pub fn values<K, V, I>(pairs: I) -> Values
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Mutable, single-owner statement builder.
///
/// Builder methods consume and return the query. Any of them drops the
/// cached result set; so does [`Query::reset`].
#[derive(Debug, Clone)]
pub struct Query {
    table: String,
    alias: Option<String>,
    fields: Vec<String>,
    joins: Vec<Join>,
    /// Tables referenced through dotted keys, in first-use order.
    implicit: Vec<String>,
    conditions: Vec<Expr>,
    /// Guards ANDed ahead of `conditions` regardless of the conjunction.
    scopes: Vec<Expr>,
    conjunction: Conjunction,
    order: Vec<(String, Order)>,
    group: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    cache: Option<Vec<Row>>,
}

impl Query {
    #[allow(clippy::should_implement_trait)]
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            fields: Vec::new(),
            joins: Vec::new(),
            implicit: Vec::new(),
            conditions: Vec::new(),
            scopes: Vec::new(),
            conjunction: Conjunction::And,
            order: Vec::new(),
            group: Vec::new(),
            limit: None,
            offset: None,
            cache: None,
        }
    }

    pub fn from_alias(table: impl Into<String>, alias: impl Into<String>) -> Self {
        let mut query = Self::from(table);
        query.alias = Some(alias.into());
        query
    }

    /// Alias the main table. Behaviour scopes written against the table name
    /// follow the alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self.touch()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Alias if set, otherwise the table name.
    pub fn main_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    fn touch(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Select these columns instead of `*`.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self.touch()
    }

    /// `key <inferred op> value`. See [`Op::infer`].
    pub fn filter(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.condition(Expr::infer(key, value))
    }

    pub fn filter_op(self, key: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        self.condition(Expr::compare(key, op, value))
    }

    /// Add literal SQL to the WHERE clause.
    ///
    /// The text is emitted unescaped. Never build it from user input; use
    /// [`Query::filter_template`] to bind values instead.
    pub fn filter_raw(self, sql: impl Into<String>) -> Self {
        self.condition(Expr::raw(sql))
    }

    /// SQL with `?` placeholders, each bound to the next value.
    pub fn filter_template<V: Into<Value>>(
        self,
        sql: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.condition(Expr::template(sql, values))
    }

    /// Add an arbitrary expression.
    pub fn filter_expr(self, expr: Expr) -> Self {
        self.condition(expr)
    }

    pub fn eq(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Eq, value)
    }

    pub fn ne(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Ne, value)
    }

    pub fn gt(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Gt, value)
    }

    pub fn gte(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Gte, value)
    }

    pub fn lt(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Lt, value)
    }

    pub fn lte(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Lte, value)
    }

    pub fn like(self, key: impl Into<String>, pattern: impl Into<Value>) -> Self {
        self.filter_op(key, Op::Like, pattern)
    }

    pub fn is_null(self, key: impl Into<String>) -> Self {
        self.condition(Expr::is_null(key))
    }

    pub fn is_not_null(self, key: impl Into<String>) -> Self {
        self.condition(Expr::is_not_null(key))
    }

    pub fn in_list<V: Into<Value>>(self, key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.condition(Expr::in_list(key, values))
    }

    /// Join every WHERE fragment with OR.
    pub fn any(mut self) -> Self {
        self.conjunction = Conjunction::Or;
        self.touch()
    }

    /// Join every WHERE fragment with AND (the default).
    pub fn all(mut self) -> Self {
        self.conjunction = Conjunction::And;
        self.touch()
    }

    /// A guard that is always ANDed, even under [`Query::any`].
    pub fn scope(mut self, expr: Expr) -> Self {
        if let Some(column) = expr.column() {
            self.note_dotted(column.to_string());
        }
        self.scopes.push(expr);
        self.touch()
    }

    pub fn join(mut self, table: impl Into<String>, predicate: Option<&str>, kind: JoinType) -> Self {
        let join = Join {
            table: table.into(),
            predicate: predicate.map(str::to_string),
            kind,
        };
        let (name, alias) = join.names();
        if !self.joins.iter().any(|j| j.names() == (name, alias)) {
            self.joins.push(join);
        }
        self.touch()
    }

    pub fn left_join(self, table: impl Into<String>, predicate: &str) -> Self {
        self.join(table, Some(predicate), JoinType::Left)
    }

    pub fn inner_join(self, table: impl Into<String>, predicate: &str) -> Self {
        self.join(table, Some(predicate), JoinType::Inner)
    }

    pub fn order_by(mut self, key: impl Into<String>, order: Order) -> Self {
        let key = key.into();
        self.note_dotted(key.clone());
        self.order.push((key, order));
        self.touch()
    }

    pub fn group_by(mut self, key: impl Into<String>) -> Self {
        self.group.push(key.into());
        self.touch()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self.touch()
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self.touch()
    }

    /// 1-based page of `per_page` rows. Page 0 is treated as page 1.
    pub fn page(self, page: u64, per_page: u64) -> Self {
        let offset = page.saturating_sub(1).saturating_mul(per_page);
        self.limit(per_page).offset(offset)
    }

    /// Drop everything except the table, alias and scopes, so the builder can
    /// be reused for an unrelated statement.
    pub fn reset(mut self) -> Self {
        self.fields.clear();
        self.joins.clear();
        self.implicit.clear();
        self.conditions.clear();
        self.conjunction = Conjunction::And;
        self.order.clear();
        self.group.clear();
        self.limit = None;
        self.offset = None;
        for column in self.scopes.iter().filter_map(Expr::column).map(str::to_string).collect::<Vec<_>>() {
            self.note_dotted(column);
        }
        self.touch()
    }

    fn condition(mut self, expr: Expr) -> Self {
        if let Some(column) = expr.column() {
            self.note_dotted(column.to_string());
        }
        self.conditions.push(expr);
        self.touch()
    }

    fn note_dotted(&mut self, key: String) {
        if let Some((table, _)) = key.split_once('.') {
            if !self.implicit.iter().any(|t| t == table) {
                self.implicit.push(table.to_string());
            }
        }
    }

    /// Explicit joins followed by the implicit ones dotted keys call for.
    ///
    /// A dotted key `t.f` joins `t` on `t.id = <main>.t_id` unless `t` is the
    /// main table or alias, or is already joined by name or alias.
    pub fn effective_joins(&self) -> Vec<Join> {
        let mut joins = self.joins.clone();
        let main = self.main_name();
        for table in &self.implicit {
            let known = table == main
                || table == &self.table
                || joins.iter().any(|j| {
                    let (name, alias) = j.names();
                    name == table || alias == table
                });
            if !known {
                joins.push(Join {
                    table: table.clone(),
                    predicate: Some(format!("{table}.id = {main}.{table}_id")),
                    kind: JoinType::Left,
                });
            }
        }
        joins
    }

    fn render_from(&self) -> String {
        let mut sql = match &self.alias {
            Some(alias) => format!("FROM {} AS {alias}", self.table),
            None => format!("FROM {}", self.table),
        };
        for join in self.effective_joins() {
            sql.push(' ');
            sql.push_str(&join.render());
        }
        sql
    }

    fn render_where(&self, params: &mut ParamList) -> String {
        let user = render_group(&self.conditions, self.conjunction, params);
        if self.scopes.is_empty() {
            return if user.is_empty() {
                user
            } else {
                format!(" WHERE {user}")
            };
        }
        let scopes: Vec<Expr> = match &self.alias {
            Some(alias) => self.scopes.iter().map(|e| e.requalify(&self.table, alias)).collect(),
            None => self.scopes.clone(),
        };
        let mut guards = vec![render_group(&scopes, Conjunction::And, params)];
        guards.retain(|s| !s.is_empty());
        if !user.is_empty() {
            let multi = self.conditions.iter().filter(|e| !e.is_empty()).count() > 1;
            guards.push(if multi && self.conjunction == Conjunction::Or {
                format!("({user})")
            } else {
                user
            });
        }
        if guards.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", guards.join(" AND "))
        }
    }

    fn render_select(&self, limit: Option<u64>, dialect: DriverKind) -> (String, ParamList) {
        let mut params = ParamList::new();
        let fields = if !self.fields.is_empty() {
            self.fields.join(", ")
        } else if self.effective_joins().is_empty() {
            "*".to_string()
        } else {
            // Keep joined columns from shadowing the main table's.
            format!("{}.*", self.main_name())
        };
        let mut sql = format!("SELECT {fields} {}", self.render_from());
        sql.push_str(&self.render_where(&mut params));
        if !self.group.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group.join(", "));
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(key, dir)| format!("{key} {}", dir.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        self.render_paging(&mut sql, limit, dialect);
        (sql, params)
    }

    fn render_paging(&self, sql: &mut String, limit: Option<u64>, dialect: DriverKind) {
        match (dialect, limit, self.offset) {
            (_, None, None) => {}
            (DriverKind::Mssql, limit, offset) => {
                if self.order.is_empty() {
                    sql.push_str(" ORDER BY (SELECT NULL)");
                }
                sql.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
                if let Some(limit) = limit {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
            }
            (_, Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {limit}"));
                if let Some(offset) = offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
            }
            // OFFSET alone: SQLite and MySQL insist on a LIMIT in front.
            (DriverKind::Sqlite, None, Some(offset)) => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {offset}"));
            }
            (DriverKind::Mysql, None, Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {offset}", u64::MAX));
            }
            (DriverKind::Postgres, None, Some(offset)) => {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }
    }

    /// The SELECT statement, in SQLite syntax.
    pub fn to_sql(&self) -> String {
        self.to_sql_for(DriverKind::Sqlite)
    }

    /// The SELECT statement for a specific dialect. Only paging differs.
    pub fn to_sql_for(&self, dialect: DriverKind) -> String {
        self.render_select(self.limit, dialect).0
    }

    /// Bound values of [`Query::to_sql`], in placeholder order.
    pub fn params(&self) -> Values {
        self.render_select(self.limit, DriverKind::Sqlite).1.into_vec()
    }

    pub(crate) fn select_with_limit(&self, limit: Option<u64>, dialect: DriverKind) -> (String, Values) {
        let (sql, params) = self.render_select(limit, dialect);
        (sql, params.into_vec())
    }

    /// `SELECT COUNT(*) AS count ...`, ignoring order, limit and offset.
    pub fn to_count_sql(&self) -> (String, Values) {
        let mut params = ParamList::new();
        let source = format!("{}{}", self.render_from(), self.render_where(&mut params));
        let sql = if self.group.is_empty() {
            format!("SELECT COUNT(*) AS count {source}")
        } else {
            let group = self.group.join(", ");
            format!("SELECT COUNT(*) AS count FROM (SELECT {group} {source} GROUP BY {group}) AS grouped")
        };
        (sql, params.into_vec())
    }

    pub fn to_insert_sql(&self, values: &[(String, Value)]) -> OrmResult<(String, Values)> {
        if values.is_empty() {
            return Err(OrmError::Other(format!(
                "insert into '{}' without values",
                self.table
            )));
        }
        let mut params = ParamList::new();
        let columns: Vec<&str> = values.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders: Vec<String> = values.iter().map(|(_, v)| params.push(v.clone())).collect();
        Ok((
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params.into_vec(),
        ))
    }

    /// `UPDATE ... SET ... WHERE ...`.
    ///
    /// Without conditions the statement matches nothing (`WHERE 1=0`); use
    /// `filter_raw("1=1")` to update every row on purpose.
    pub fn to_update_sql(&self, values: &[(String, Value)]) -> OrmResult<(String, Values)> {
        self.ensure_single_table("update")?;
        if values.is_empty() {
            return Err(OrmError::Other(format!(
                "update of '{}' without values",
                self.table
            )));
        }
        let mut params = ParamList::new();
        let sets: Vec<String> = values
            .iter()
            .map(|(c, v)| format!("{c} = {}", params.push(v.clone())))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        sql.push_str(&self.mutation_where(&mut params));
        Ok((sql, params.into_vec()))
    }

    /// `DELETE FROM ... WHERE ...`; without conditions it matches nothing.
    pub fn to_delete_sql(&self) -> OrmResult<(String, Values)> {
        self.ensure_single_table("delete")?;
        let mut params = ParamList::new();
        let mut sql = format!("DELETE FROM {}", self.table);
        sql.push_str(&self.mutation_where(&mut params));
        Ok((sql, params.into_vec()))
    }

    fn mutation_where(&self, params: &mut ParamList) -> String {
        let clause = self.render_where(params);
        if clause.is_empty() {
            " WHERE 1=0".to_string()
        } else {
            clause
        }
    }

    fn ensure_single_table(&self, action: &str) -> OrmResult<()> {
        if self.effective_joins().is_empty() && self.alias.is_none() {
            Ok(())
        } else {
            Err(OrmError::InvalidState {
                state: "joined or aliased query".to_string(),
                action: action.to_string(),
            })
        }
    }

    /// Rows from the last materialisation, if any.
    pub fn cached(&self) -> Option<&[Row]> {
        self.cache.as_deref()
    }
}

/// Iterates the materialised result set; empty unless the query was fetched.
impl IntoIterator for Query {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.cache.unwrap_or_default().into_iter()
    }
}

impl<'a> IntoIterator for &'a Query {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.cache.as_deref().unwrap_or(&[]).iter()
    }
}
