//! # korm
//!
//! A small query builder and ActiveRecord-style mapper for SQLite and
//! PostgreSQL.
//!
//! ## Features
//!
//! - **Instrumented connections**: every statement is timed, logged with its
//!   bound values substituted and reported to [`QueryMonitor`]s
//! - **Fluent query builder**: operator inference, implicit joins, `:pN`
//!   parameters, cached result sets
//! - **Entities and records**: insert-or-update `save`, veto-able `remove`,
//!   convention-based relations with shallow cascade
//! - **Behaviours**: timestamps, soft delete, optimistic versioning,
//!   permissions, meta store, change log and type tables
//! - **Safe defaults**: UPDATE and DELETE without conditions match nothing
//!
//! ## Query builder
//!
//! ```ignore
//! use korm::{Connection, Order, Query};
//!
//! let conn = Connection::open("sqlite::memory:").await?;
//!
//! let rows = Query::from("user")
//!     .filter("company.name", "Acme%")
//!     .filter("deleted_at", None::<i64>)
//!     .order_by("name", Order::Asc)
//!     .limit(10)
//!     .fetch_all(&conn)
//!     .await?;
//!
//! let names: BTreeMap<i64, String> = Query::from("user")
//!     .fields(["id", "name"])
//!     .fetch_map(&conn)
//!     .await?;
//! ```
//!
//! ## Entities
//!
//! ```ignore
//! use korm::{BehaviorStack, Entity, EntityExt, FromRow, Record, SoftDelete, Timestamp};
//!
//! #[derive(Debug, Entity, FromRow)]
//! #[korm(table = "user", behaviors = user_behaviors, has_one(Company), many_to_many(Tag))]
//! struct User {
//!     id: i64,
//!     name: String,
//!     company_id: Option<i64>,
//! }
//!
//! fn user_behaviors() -> BehaviorStack {
//!     BehaviorStack::new().add(Timestamp).add(SoftDelete)
//! }
//!
//! User::create_table(&conn).await?;
//! let mut user = Record::new(User { id: 0, name: "ada".into(), company_id: None });
//! user.save(&conn).await?;
//! user.remove(&conn).await?; // soft-deleted
//! ```

extern crate self as korm;

pub mod behavior;
pub mod connection;
pub mod context;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod monitor;
pub mod options;
pub mod orm;
pub mod query;
pub mod quote;
pub mod registry;
pub mod row;
pub mod schema;
pub mod validation;
pub mod value;

pub use behavior::{
    Behavior, BehaviorStack, ChangeLog, HookContext, HookOutcome, MetaStore, Permissions,
    SoftDelete, Timestamp, TypeTable, Versioned, perm,
};
pub use validation::{ValidationCode, ValidationError, ValidationErrors};
pub use connection::{Connection, ConnectionRegistry};
pub use context::{Clock, CurrentUser, FixedClock, StaticUser, SystemClock};
pub use driver::{Driver, DriverError, DriverResult, Params};
pub use dsn::{DriverKind, Dsn};
pub use error::{OrmError, OrmResult};
pub use monitor::{
    CompositeMonitor, QueryContext, QueryLog, QueryLogEntry, QueryMonitor,
    QueryResult, QueryStats, QueryType, StatsMonitor,
};
pub use options::ConnectOptions;
pub use orm::{
    Entity, EntityExt, Record, RecordState, Relation, RelationKind, join_table, unknown_field,
};
pub use query::{Conjunction, Expr, Join, JoinType, Op, Order, Query, Values, values};
pub use quote::quote;
pub use registry::EntityRegistration;
pub use row::{FromRow, Row};
pub use schema::{FieldDef, FieldType, TableDef, guess_type};
pub use value::{FromValue, Value, decode};

#[cfg(feature = "derive")]
pub use korm_derive::{Entity, FromRow};

// Used by the derive macros.
pub use async_trait::async_trait;
pub use inventory;
