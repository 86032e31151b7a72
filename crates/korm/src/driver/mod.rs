//! Database drivers.
//!
//! A [`Driver`] executes one statement with named `:pN` parameters and
//! returns driver-neutral [`Row`]s. Instrumentation, logging and error
//! wrapping live one level up in [`Connection`](crate::Connection).

use crate::dsn::{Dsn, DriverKind};
use crate::error::{OrmError, OrmResult};
use crate::options::ConnectOptions;
use crate::row::Row;
use crate::value::Value;
use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Bound parameters in placeholder order: `(":p0", value)`, ...
pub type Params = [(String, Value)];

/// Failure reported by the underlying database library.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// The raw execute/query primitive a connection is built on.
#[async_trait]
pub trait Driver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64>;

    /// Run a statement and return every row it produces.
    async fn query(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>>;

    /// Key generated by the most recent INSERT on this handle.
    async fn last_insert_id(&self) -> DriverResult<Option<i64>>;

    /// Column names of an existing table, in declaration order.
    ///
    /// Empty when the table does not exist.
    async fn table_columns(&self, table: &str) -> DriverResult<Vec<String>>;
}

/// Open the driver named by `dsn`.
pub(crate) async fn open(dsn: &Dsn, options: &ConnectOptions) -> OrmResult<Box<dyn Driver>> {
    match dsn.driver {
        #[cfg(feature = "sqlite")]
        DriverKind::Sqlite => Ok(Box::new(sqlite::SqliteDriver::open(dsn, options)?)),
        #[cfg(feature = "postgres")]
        DriverKind::Postgres => Ok(Box::new(postgres::PostgresDriver::connect(dsn, options).await?)),
        other => {
            let _ = options;
            Err(OrmError::configuration(format!(
                "no driver available for '{other}' (enable the matching cargo feature)"
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted driver for unit tests that never touches a database.

    use super::*;
    use crate::Connection;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct ScriptedDriver {
        pub executed: Mutex<Vec<(String, Vec<(String, Value)>)>>,
        pub results: Mutex<VecDeque<DriverResult<Vec<Row>>>>,
        pub delay: Option<std::time::Duration>,
    }

    impl ScriptedDriver {
        pub fn push_rows(&self, rows: Vec<Row>) {
            self.results.lock().unwrap().push_back(Ok(rows));
        }

        pub fn push_error(&self, message: &str) {
            self.results
                .lock()
                .unwrap()
                .push_back(Err(DriverError::new(message)));
        }

        pub fn statements(&self) -> Vec<String> {
            self.executed
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }

        fn next(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>> {
            self.executed
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl Driver for ScriptedDriver {
        fn kind(&self) -> DriverKind {
            DriverKind::Sqlite
        }

        async fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.next(sql, params).map(|rows| rows.len() as u64)
        }

        async fn query(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.next(sql, params)
        }

        async fn last_insert_id(&self) -> DriverResult<Option<i64>> {
            Ok(None)
        }

        async fn table_columns(&self, _table: &str) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    /// Lets a test keep a handle on the driver it gave to a connection.
    #[async_trait]
    impl Driver for Arc<ScriptedDriver> {
        fn kind(&self) -> DriverKind {
            self.as_ref().kind()
        }

        async fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64> {
            self.as_ref().execute(sql, params).await
        }

        async fn query(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>> {
            self.as_ref().query(sql, params).await
        }

        async fn last_insert_id(&self) -> DriverResult<Option<i64>> {
            Ok(None)
        }

        async fn table_columns(&self, _table: &str) -> DriverResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    pub fn connection(options: ConnectOptions) -> (Arc<ScriptedDriver>, Connection) {
        let driver = Arc::new(ScriptedDriver::default());
        let conn = Connection::with_driver(
            Box::new(driver.clone()),
            Dsn::memory(),
            "test",
            options,
        );
        (driver, conn)
    }
}
