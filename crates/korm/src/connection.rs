//! Instrumented database connection.

use crate::context::{Clock, CurrentUser, SystemClock};
use crate::driver::{self, Driver, DriverError, Params};
use crate::dsn::{DriverKind, Dsn};
use crate::error::{OrmError, OrmResult};
use crate::monitor::{
    CompositeMonitor, QueryContext, QueryLog, QueryLogEntry, QueryMonitor, QueryResult,
    interpolate,
};
use crate::options::ConnectOptions;
use crate::quote;
use crate::row::Row;
use crate::schema::{self, TableDef};
use crate::value::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// A live database handle plus everything scoped to one unit of work:
/// query log, monitors, clock and current user.
///
/// `Connection` is `Send + Sync`; statements are still executed one at a time.
pub struct Connection {
    name: String,
    dsn: Dsn,
    driver: Box<dyn Driver>,
    options: ConnectOptions,
    log: QueryLog,
    monitors: CompositeMonitor,
    clock: Arc<dyn Clock>,
    user: Option<Arc<dyn CurrentUser>>,
    tx_depth: AtomicUsize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("dsn", &self.dsn.redacted())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Parse `dsn`, resolve its driver and connect.
    ///
    /// Fails with [`OrmError::Configuration`] for malformed DSNs and for
    /// drivers that are not compiled in.
    pub async fn create(
        dsn: &str,
        name: impl Into<String>,
        options: ConnectOptions,
    ) -> OrmResult<Self> {
        let dsn = Dsn::parse(dsn)?;
        let driver = driver::open(&dsn, &options).await?;
        let name = name.into();
        tracing::debug!(target: "korm.sql", connection = %name, dsn = %dsn.redacted(), "connected");
        Ok(Self::with_driver(driver, dsn, name, options))
    }

    /// [`Connection::create`] named `"default"` with default options.
    pub async fn open(dsn: &str) -> OrmResult<Self> {
        Self::create(dsn, "default", ConnectOptions::default()).await
    }

    /// A fresh in-memory SQLite database.
    #[cfg(feature = "sqlite")]
    pub async fn memory() -> OrmResult<Self> {
        Self::open(&Dsn::memory().to_string()).await
    }

    /// Wrap an already opened driver.
    pub fn with_driver(
        driver: Box<dyn Driver>,
        dsn: Dsn,
        name: impl Into<String>,
        options: ConnectOptions,
    ) -> Self {
        let log = QueryLog::new(if options.log_queries {
            options.max_log_entries
        } else {
            0
        });
        Self {
            name: name.into(),
            dsn,
            driver,
            options,
            log,
            monitors: CompositeMonitor::new(),
            clock: Arc::new(SystemClock),
            user: None,
            tx_depth: AtomicUsize::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_current_user(mut self, user: Arc<dyn CurrentUser>) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    pub fn add_monitor(&mut self, monitor: Arc<dyn QueryMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn set_current_user(&mut self, user: Option<Arc<dyn CurrentUser>>) {
        self.user = user;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Statements executed on this connection, values substituted.
    pub fn log(&self) -> &QueryLog {
        &self.log
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now(&self) -> chrono::NaiveDateTime {
        self.clock.now()
    }

    pub fn current_user(&self) -> Option<&dyn CurrentUser> {
        self.user.as_deref()
    }

    /// Render a value as an SQL literal. See [`quote::quote`].
    pub fn quote(&self, value: &Value) -> String {
        quote::quote(value)
    }

    /// Run a statement without parameters; returns affected rows.
    pub async fn exec(&self, sql: &str) -> OrmResult<u64> {
        self.execute(sql, &[]).await
    }

    /// Run a statement with `:pN` parameters; returns affected rows.
    pub async fn execute(&self, sql: &str, params: &Params) -> OrmResult<u64> {
        self.instrument(sql, params, self.driver.execute(sql, params), |n| {
            QueryResult::Affected(*n)
        })
        .await
    }

    /// Run a statement with `:pN` parameters; returns every row.
    pub async fn query(&self, sql: &str, params: &Params) -> OrmResult<Vec<Row>> {
        self.instrument(sql, params, self.driver.query(sql, params), |rows| {
            QueryResult::Rows(rows.len())
        })
        .await
    }

    /// Key generated by the most recent INSERT.
    pub async fn last_insert_id(&self) -> OrmResult<Option<i64>> {
        self.driver
            .last_insert_id()
            .await
            .map_err(|e| OrmError::query("last_insert_id", Vec::new(), e.message))
    }

    /// Run an INSERT and return `(affected, generated key)`.
    ///
    /// PostgreSQL has no session-wide insert id that is safe inside a failed
    /// transaction, so there the key column is read back with `RETURNING`.
    pub async fn insert(
        &self,
        sql: &str,
        params: &Params,
        key: Option<&str>,
    ) -> OrmResult<(u64, Option<i64>)> {
        match (self.driver_kind(), key) {
            (DriverKind::Postgres, Some(key)) => {
                let rows = self.query(&format!("{sql} RETURNING {key}"), params).await?;
                let id = match rows.first() {
                    Some(row) => row.try_get::<Option<i64>>(key)?,
                    None => None,
                };
                Ok((rows.len() as u64, id))
            }
            (_, Some(_)) => {
                let affected = self.execute(sql, params).await?;
                Ok((affected, self.last_insert_id().await?))
            }
            (_, None) => Ok((self.execute(sql, params).await?, None)),
        }
    }

    /// Column names of `table`; empty when it does not exist.
    pub async fn table_columns(&self, table: &str) -> OrmResult<Vec<String>> {
        schema::check_identifier("table", table)?;
        self.instrument(
            &format!("-- table_columns({table})"),
            &[],
            self.driver.table_columns(table),
            |cols| QueryResult::Rows(cols.len()),
        )
        .await
    }

    pub async fn table_exists(&self, table: &str) -> OrmResult<bool> {
        Ok(!self.table_columns(table).await?.is_empty())
    }

    pub async fn create_table(&self, def: &TableDef) -> OrmResult<()> {
        let sql = schema::create_table_sql(def, self.driver_kind())?;
        self.exec(&sql).await.map(drop)
    }

    /// Create `def`, or add the columns an existing table lacks.
    pub async fn alter_table(&self, def: &TableDef) -> OrmResult<()> {
        let existing = self.table_columns(&def.name).await?;
        if existing.is_empty() {
            return self.create_table(def).await;
        }
        for sql in schema::alter_table_sql(def, &existing, self.driver_kind())? {
            self.exec(&sql).await?;
        }
        Ok(())
    }

    pub async fn drop_table(&self, table: &str) -> OrmResult<()> {
        let sql = schema::drop_table_sql(table)?;
        self.exec(&sql).await.map(drop)
    }

    /// Create a view over a SELECT statement.
    ///
    /// The statement must be self-contained; views cannot carry bound parameters.
    pub async fn create_view(&self, name: &str, select_sql: &str) -> OrmResult<()> {
        let sql = schema::create_view_sql(name, select_sql, self.driver_kind())?;
        self.exec(&sql).await.map(drop)
    }

    pub async fn drop_view(&self, name: &str) -> OrmResult<()> {
        schema::check_identifier("view", name)?;
        self.exec(&format!("DROP VIEW IF EXISTS {name}")).await.map(drop)
    }

    /// Start a transaction, or a savepoint when one is already open.
    pub async fn begin(&self) -> OrmResult<()> {
        let depth = self.tx_depth.load(Ordering::SeqCst);
        let sql = match (depth, self.driver_kind()) {
            (0, DriverKind::Mssql) => "BEGIN TRANSACTION".to_string(),
            (0, _) => "BEGIN".to_string(),
            (n, DriverKind::Mssql) => format!("SAVE TRANSACTION korm_sp_{n}"),
            (n, _) => format!("SAVEPOINT korm_sp_{n}"),
        };
        self.exec(&sql).await?;
        self.tx_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn commit(&self) -> OrmResult<()> {
        let depth = self.open_depth("commit")?;
        let sql = match (depth, self.driver_kind()) {
            (1, _) => "COMMIT".to_string(),
            // SQL Server has no savepoint release; the outer COMMIT covers it.
            (_, DriverKind::Mssql) => {
                self.tx_depth.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            }
            (n, _) => format!("RELEASE SAVEPOINT korm_sp_{}", n - 1),
        };
        self.tx_depth.fetch_sub(1, Ordering::SeqCst);
        self.exec(&sql).await.map(drop)
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        let depth = self.open_depth("rollback")?;
        let sql = match (depth, self.driver_kind()) {
            (1, _) => "ROLLBACK".to_string(),
            (n, DriverKind::Mssql) => format!("ROLLBACK TRANSACTION korm_sp_{}", n - 1),
            (n, _) => format!("ROLLBACK TO SAVEPOINT korm_sp_{}", n - 1),
        };
        self.tx_depth.fetch_sub(1, Ordering::SeqCst);
        self.exec(&sql).await.map(drop)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_depth.load(Ordering::SeqCst) > 0
    }

    fn open_depth(&self, action: &str) -> OrmResult<usize> {
        match self.tx_depth.load(Ordering::SeqCst) {
            0 => Err(OrmError::InvalidState {
                state: "no transaction".to_string(),
                action: action.to_string(),
            }),
            n => Ok(n),
        }
    }

    async fn with_timeout<T, F>(&self, future: F) -> Result<Result<T, DriverError>, Duration>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        match self.options.query_timeout {
            Some(timeout) => {
                tokio::pin!(future);
                tokio::select! {
                    result = &mut future => Ok(result),
                    _ = tokio::time::sleep(timeout) => Err(timeout),
                }
            }
            None => Ok(future.await),
        }
    }

    async fn instrument<T, F>(
        &self,
        sql: &str,
        params: &Params,
        future: F,
        summarize: impl FnOnce(&T) -> QueryResult,
    ) -> OrmResult<T>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        let ctx = QueryContext::new(sql, params.len())
            .with_connection(self.name.as_str())
            .with_dialect(self.driver_kind());
        tracing::debug!(
            target: "korm.sql",
            connection = %self.name,
            query_type = ?ctx.query_type,
            param_count = ctx.param_count,
            sql = %sql,
            "executing"
        );
        self.monitors.on_query_start(&ctx);

        let start = Instant::now();
        let outcome = self.with_timeout(future).await;
        let elapsed = start.elapsed();

        let (result, query_result) = match outcome {
            Ok(Ok(value)) => {
                let summary = summarize(&value);
                (Ok(value), summary)
            }
            Ok(Err(e)) => {
                let display: Vec<String> = params.iter().map(|(_, v)| quote::quote(v)).collect();
                let summary = QueryResult::error(e.message.clone());
                (Err(OrmError::query(sql, display, e.message)), summary)
            }
            Err(timeout) => (
                Err(OrmError::Timeout(timeout)),
                QueryResult::error(format!("timeout after {timeout:?}")),
            ),
        };

        if let Err(e) = &result {
            tracing::error!(target: "korm.sql", connection = %self.name, sql = %sql, error = %e, "statement failed");
        }

        self.log.record(QueryLogEntry {
            sql: interpolate(sql, params),
            elapsed,
            result: query_result.clone(),
        });
        self.monitors.on_query_complete(&ctx, elapsed, &query_result);

        if let Some(threshold) = self.options.slow_query_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    target: "korm.sql",
                    connection = %self.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    sql = %sql,
                    "slow query"
                );
                self.monitors.on_slow_query(&ctx, elapsed);
            }
        }

        result
    }
}

/// Named connections for code that cannot thread a handle through.
///
/// The first registered connection becomes the default.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    default: RwLock<Option<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the connection's own name, replacing an older entry.
    pub fn register(&self, connection: Connection) -> Arc<Connection> {
        let name = connection.name().to_string();
        let connection = Arc::new(connection);
        if let Ok(mut map) = self.connections.write() {
            map.insert(name.clone(), connection.clone());
        }
        if let Ok(mut default) = self.default.write() {
            default.get_or_insert(name);
        }
        connection
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<Connection>> {
        self.connections
            .read()
            .ok()
            .and_then(|map| map.get(name).cloned())
            .ok_or_else(|| OrmError::configuration(format!("no connection named '{name}'")))
    }

    pub fn default_connection(&self) -> OrmResult<Arc<Connection>> {
        let name = self
            .default
            .read()
            .ok()
            .and_then(|d| d.clone())
            .ok_or_else(|| OrmError::configuration("no connection registered"))?;
        self.get(&name)
    }

    pub fn set_default(&self, name: &str) -> OrmResult<()> {
        self.get(name)?;
        if let Ok(mut default) = self.default.write() {
            *default = Some(name.to_string());
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.write().ok()?.remove(name);
        if let Ok(mut default) = self.default.write() {
            if default.as_deref() == Some(name) {
                *default = None;
            }
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// Runs the given block inside a transaction on a [`Connection`].
///
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// Nested use opens a savepoint. The block must evaluate to `korm::OrmResult<T>`.
///
/// # Example
///
/// ```ignore
/// korm::transaction!(conn, {
///     user.save(&conn).await?;
///     company.save(&conn).await?;
///     Ok(())
/// })?;
/// ```
#[macro_export]
macro_rules! transaction {
    ($conn:expr, $body:block) => {{
        let __korm_conn: &$crate::Connection = &$conn;
        __korm_conn.begin().await?;
        let __korm_tx_body_result = async { $body }.await;
        match __korm_tx_body_result {
            Ok(value) => {
                __korm_conn.commit().await?;
                Ok(value)
            }
            Err(error) => match __korm_conn.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::Other(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{ScriptedDriver, connection as scripted};
    use crate::monitor::{QueryType, StatsMonitor};

    #[tokio::test]
    async fn driver_errors_carry_sql_and_params() {
        let (driver, conn) = scripted(ConnectOptions::default());
        driver.push_error("no such table: nope");

        let params = vec![(":p0".to_string(), Value::Text("x".into()))];
        let err = conn
            .query("SELECT * FROM nope WHERE a = :p0", &params)
            .await
            .unwrap_err();
        match err {
            OrmError::Query { sql, params, message } => {
                assert_eq!(sql, "SELECT * FROM nope WHERE a = :p0");
                assert_eq!(params, ["'x'"]);
                assert_eq!(message, "no such table: nope");
            }
            other => panic!("unexpected {other:?}"),
        }
        let entry = conn.log().last().unwrap();
        assert_eq!(entry.sql, "SELECT * FROM nope WHERE a = 'x'");
        assert!(entry.result.is_error());
    }

    #[tokio::test]
    async fn monitors_see_every_statement() {
        let (_driver, conn) = scripted(ConnectOptions::default());
        let stats = Arc::new(StatsMonitor::new());
        let conn = conn.with_monitor(stats.clone());

        conn.query("SELECT 1", &[]).await.unwrap();
        conn.exec("DELETE FROM t").await.unwrap();

        let stats = stats.stats();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.count(QueryType::Select), 1);
        assert_eq!(stats.count(QueryType::Delete), 1);
        assert_eq!(conn.log().len(), 2);
    }

    #[tokio::test]
    async fn disabled_log_keeps_nothing() {
        let (_driver, conn) = scripted(ConnectOptions::default().disable_query_log());
        conn.exec("DELETE FROM t").await.unwrap();
        assert!(conn.log().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let driver = ScriptedDriver {
            delay: Some(Duration::from_millis(200)),
            ..ScriptedDriver::default()
        };
        let conn = Connection::with_driver(
            Box::new(driver),
            Dsn::memory(),
            "slow",
            ConnectOptions::default().with_query_timeout(Duration::from_millis(10)),
        );
        let err = conn.query("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn slow_queries_reach_monitors() {
        let driver = ScriptedDriver {
            delay: Some(Duration::from_millis(20)),
            ..ScriptedDriver::default()
        };
        let stats = Arc::new(StatsMonitor::new());
        let conn = Connection::with_driver(
            Box::new(driver),
            Dsn::memory(),
            "slow",
            ConnectOptions::default().with_slow_query_threshold(Duration::from_millis(1)),
        )
        .with_monitor(stats.clone());
        conn.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(stats.stats().slow_queries, 1);
    }

    #[tokio::test]
    async fn nested_transactions_use_savepoints() {
        let (driver, conn) = scripted(ConnectOptions::default());
        conn.begin().await.unwrap();
        conn.begin().await.unwrap();
        conn.rollback().await.unwrap();
        conn.commit().await.unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(
            driver.statements(),
            ["BEGIN", "SAVEPOINT korm_sp_1", "ROLLBACK TO SAVEPOINT korm_sp_1", "COMMIT"]
        );
        assert!(matches!(
            conn.commit().await,
            Err(OrmError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn transaction_macro_rolls_back_on_error() {
        let (driver, conn) = scripted(ConnectOptions::default());

        async fn run(conn: &Connection) -> OrmResult<()> {
            let result: OrmResult<()> = transaction!(conn, {
                conn.exec("DELETE FROM t").await?;
                Err(OrmError::Other("boom".into()))
            });
            result
        }

        assert!(run(&conn).await.is_err());
        assert_eq!(driver.statements(), ["BEGIN", "DELETE FROM t", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn unknown_drivers_are_configuration_errors() {
        let err = Connection::open("mssql://sa:pw@localhost/master").await.unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
        let err = Connection::open("bogus").await.unwrap_err();
        assert!(matches!(err, OrmError::Configuration(_)));
    }

    #[tokio::test]
    async fn registry_tracks_default() {
        let registry = ConnectionRegistry::new();
        let (_, a) = scripted(ConnectOptions::default());
        registry.register(a);
        assert_eq!(registry.default_connection().unwrap().name(), "test");
        assert!(registry.get("other").is_err());
        assert_eq!(registry.names(), ["test"]);
        assert!(registry.remove("test").is_some());
        assert!(registry.default_connection().is_err());
    }
}
