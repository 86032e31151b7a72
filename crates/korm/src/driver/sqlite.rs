//! Embedded SQLite driver backed by `rusqlite`.
//!
//! The handle is not `Sync`, so every call takes a mutex for the duration of
//! one statement. Statements run on tokio's blocking pool; when the caller
//! stops waiting (a query timeout drops the future) the running statement is
//! interrupted and a statement that has not started yet is skipped.

use super::{Driver, DriverError, DriverResult, Params};
use crate::dsn::{DriverKind, Dsn};
use crate::error::{OrmError, OrmResult};
use crate::options::ConnectOptions;
use crate::row::Row;
use crate::value::{TIMESTAMP_FORMAT, Value};
use async_trait::async_trait;
use rusqlite::InterruptHandle;
use rusqlite::types::{Value as SqlValue, ValueRef};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

pub struct SqliteDriver {
    conn: Arc<Mutex<rusqlite::Connection>>,
    interrupt: InterruptHandle,
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Interrupts or cancels its statement when dropped before it finished.
struct Abandon<'a> {
    state: Arc<AtomicU8>,
    interrupt: &'a InterruptHandle,
}

impl Drop for Abandon<'_> {
    fn drop(&mut self) {
        let cancelled = self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
        if cancelled == Err(RUNNING) {
            self.interrupt.interrupt();
        }
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        DriverError::new(err.to_string())
    }
}

impl SqliteDriver {
    pub fn open(dsn: &Dsn, options: &ConnectOptions) -> OrmResult<Self> {
        let conn = if dsn.is_memory() {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&dsn.database)
        }
        .map_err(|e| OrmError::configuration(format!("cannot open '{dsn}': {e}")))?;

        if let Some(timeout) = options.sqlite_busy_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| OrmError::configuration(format!("busy_timeout: {e}")))?;
        }

        let interrupt = conn.get_interrupt_handle();
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    /// Run `work` against the connection on the blocking pool.
    async fn run<T, F>(&self, work: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> DriverResult<T> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(QUEUED));
        let guard = Abandon {
            state: Arc::clone(&state),
            interrupt: &self.interrupt,
        };
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| DriverError::new("sqlite connection mutex poisoned"))?;
            if state
                .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(DriverError::new("statement cancelled before it started"));
            }
            let result = work(&conn);
            state.store(DONE, Ordering::Release);
            result
        });
        let joined = task.await;
        drop(guard);
        joined.map_err(|e| DriverError::new(format!("sqlite worker failed: {e}")))?
    }
}

fn to_sql_value(value: &Value) -> DriverResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(x) => SqlValue::Real(*x),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::List(_) => {
            return Err(DriverError::new(
                "list values must be expanded before binding",
            ));
        }
    })
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(x) => Value::Float(x),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn bind(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> DriverResult<()> {
    for (name, value) in params {
        let index = stmt
            .parameter_index(name)?
            .ok_or_else(|| DriverError::new(format!("statement has no parameter {name}")))?;
        stmt.raw_bind_parameter(index, to_sql_value(value)?)?;
    }
    Ok(())
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            bind(&mut stmt, &params)?;
            Ok(stmt.raw_execute()? as u64)
        })
        .await
    }

    async fn query(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            bind(&mut stmt, &params)?;

            let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut rows = stmt.raw_query();
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut columns = Vec::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    columns.push((name.clone(), from_value_ref(row.get_ref(index)?)));
                }
                out.push(Row::new(columns));
            }
            Ok(out)
        })
        .await
    }

    async fn last_insert_id(&self) -> DriverResult<Option<i64>> {
        self.run(|conn| {
            let id = conn.last_insert_rowid();
            Ok((id != 0).then_some(id))
        })
        .await
    }

    async fn table_columns(&self, table: &str) -> DriverResult<Vec<String>> {
        let table = table.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
            let names = stmt
                .query_map([table.as_str()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> SqliteDriver {
        SqliteDriver::open(&Dsn::memory(), &ConnectOptions::default()).unwrap()
    }

    #[tokio::test]
    async fn named_parameters_bind_by_name() {
        let db = driver();
        db.execute("CREATE TABLE t (a INTEGER, b TEXT)", &[]).await.unwrap();
        let params = vec![
            (":p1".to_string(), Value::Text("x".into())),
            (":p0".to_string(), Value::Int(7)),
        ];
        let n = db
            .execute("INSERT INTO t (a, b) VALUES (:p0, :p1)", &params)
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.last_insert_id().await.unwrap(), Some(1));

        let rows = db.query("SELECT a, b FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get("a"), Some(&Value::Int(7)));
        assert_eq!(rows[0].get("b"), Some(&Value::Text("x".into())));
    }

    #[tokio::test]
    async fn table_columns_in_order() {
        let db = driver();
        db.execute("CREATE TABLE t (id INTEGER, name TEXT, age INTEGER)", &[])
            .await
            .unwrap();
        assert_eq!(db.table_columns("t").await.unwrap(), ["id", "name", "age"]);
        assert!(db.table_columns("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_call_interrupts_the_statement() {
        let db = driver();
        let slow = "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 50000000) \
                    SELECT count(*) AS c FROM n";
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(20), db.query(slow, &[])).await;
        assert!(outcome.is_err());

        // The connection is free again once the interrupted statement unwinds.
        let rows = db.query("SELECT 1 AS one", &[]).await.unwrap();
        assert_eq!(rows[0].get("one"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn unknown_parameter_is_an_error() {
        let db = driver();
        let params = vec![(":p9".to_string(), Value::Int(1))];
        assert!(db.query("SELECT :p0", &params).await.is_err());
    }
}
