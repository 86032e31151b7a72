//! The one error type every korm operation returns.

use crate::validation::ValidationErrors;
use std::time::Duration;
use thiserror::Error;

/// Shorthand used across the crate.
pub type OrmResult<T> = Result<T, OrmError>;

/// Everything that can go wrong between a builder call and the driver.
///
/// Driver failures always arrive as [`OrmError::Query`] with the statement
/// attached; the other variants are raised by korm itself.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Unresolvable driver, malformed DSN or invalid option.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Schema problem detected before any DDL reaches the server.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The driver rejected a statement.
    ///
    /// `params` holds the display form of the bound values, in placeholder order.
    #[error("Query error: {message} (sql: {sql})")]
    Query {
        sql: String,
        params: Vec<String>,
        message: String,
    },

    /// `EntityExt::get` and friends found no row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A column value could not become the requested Rust type.
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// `Entity::validate` refused the record; nothing was written.
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// The statement outlived `ConnectOptions::query_timeout`.
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// An optimistic version guard matched no row.
    #[error("Stale record in '{table}': version {version} was changed concurrently")]
    StaleRecord { table: String, version: i64 },

    /// The current user lacks the permission bit for an action.
    #[error("Permission denied: cannot {action} in '{table}'")]
    PermissionDenied { table: String, action: String },

    /// A record lifecycle transition that is not allowed from its current state.
    #[error("Cannot {action} a record in state {state}")]
    InvalidState { state: String, action: String },

    /// Anything else, including errors raised inside a transaction body.
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Wrap a driver failure with the statement that caused it.
    pub fn query(sql: impl Into<String>, params: Vec<String>, message: impl Into<String>) -> Self {
        Self::Query {
            sql: sql.into(),
            params,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The driver rejected the statement.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Field-level violations carried by a validation error.
    ///
    /// Returns `None` for every other variant.
    pub fn errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationErrors> for OrmError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {err}"))
    }
}
