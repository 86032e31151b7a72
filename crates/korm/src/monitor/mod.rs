//! Query monitoring for SQL execution.
//!
//! Every statement a [`Connection`](crate::Connection) runs is timed, written
//! to its [`QueryLog`] and reported to the attached [`QueryMonitor`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use korm::monitor::{QueryContext, QueryMonitor, QueryResult, StatsMonitor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct PrintMonitor;
//!
//! impl QueryMonitor for PrintMonitor {
//!     fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult) {
//!         println!("[{:?}] {} - {}", duration, ctx.sql, result);
//!     }
//! }
//!
//! let stats = Arc::new(StatsMonitor::new());
//! conn.add_monitor(stats.clone());
//! conn.add_monitor(Arc::new(PrintMonitor));
//! ```

mod log;
mod monitors;
mod types;


pub use log::{QueryLog, QueryLogEntry, interpolate};
pub use monitors::{CompositeMonitor, QueryStats, StatsMonitor};
pub use types::{QueryContext, QueryMonitor, QueryResult, QueryType};
