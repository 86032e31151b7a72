//! Entity mapping.
//!
//! An [`Entity`] describes one table: its name, fields, primary key,
//! relations and behaviours. [`Record`] wraps an entity value with the
//! bookkeeping needed to save and remove it; [`EntityExt`] adds the
//! table-level helpers (scoped queries, lookups and DDL).
//!
//! ```ignore
//! #[derive(Entity, FromRow)]
//! #[korm(table = "post", behaviors = post_behaviors, has_many(Comment))]
//! struct Post {
//!     id: i64,
//!     title: String,
//! }
//!
//! fn post_behaviors() -> BehaviorStack {
//!     BehaviorStack::new().add(Timestamp).add(SoftDelete)
//! }
//!
//! let mut post = Record::new(Post { id: 0, title: "hello".into() });
//! post.save(&conn).await?;
//! let live = Post::query().fetch_all_as::<Record<Post>>(&conn).await?;
//! ```

mod record;
mod relations;

#[cfg(test)]
mod tests;

pub use record::{Record, RecordState};
pub use relations::join_table;

use crate::behavior::BehaviorStack;
use crate::validation::ValidationErrors;
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::query::{Order, Query};
use crate::row::FromRow;
use crate::schema::{FieldType, TableDef};
use crate::value::Value;
use async_trait::async_trait;

/// How a relation is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `<other>_id` on this table points at `other.id`.
    HasOne,
    /// `<this>_id` on the other table points at `this.id`.
    HasMany,
    /// Rows of [`join_table`] link both tables.
    ManyToMany,
}

/// A declared relation to another entity's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub kind: RelationKind,
    pub table: &'static str,
}

/// Static description of a mapped table plus field access by name.
///
/// Usually derived with `#[derive(Entity)]`.
pub trait Entity: FromRow + Send + Sync + Sized + 'static {
    const TABLE: &'static str;

    /// Columns backed by struct fields, primary key included.
    fn fields() -> &'static [&'static str];

    fn primary_keys() -> &'static [&'static str] {
        &["id"]
    }

    /// Column types that override the name heuristic in [`EntityExt::table_def`].
    fn field_types() -> Vec<(&'static str, FieldType)> {
        Vec::new()
    }

    fn relations() -> &'static [Relation] {
        &[]
    }

    fn behaviors() -> BehaviorStack {
        BehaviorStack::new()
    }

    /// Current value of `field`, `None` for names that are not fields.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Assign `field`, decoding `value` into the field's type.
    fn set_value(&mut self, field: &str, value: Value) -> OrmResult<()>;

    /// Field-level checks run before every save.
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Error for a field name an entity does not have.
pub fn unknown_field(table: &str, field: &str) -> OrmError {
    OrmError::schema(format!("'{table}' has no field '{field}'"))
}

/// Table-level helpers available on every [`Entity`].
#[async_trait]
pub trait EntityExt: Entity {
    /// SELECT over the table with every behaviour scope applied.
    fn query() -> Query {
        Self::behaviors()
            .scopes(Self::TABLE)
            .into_iter()
            .fold(Query::from(Self::TABLE), Query::scope)
    }

    /// SELECT over the table ignoring behaviour scopes.
    fn unscoped() -> Query {
        Query::from(Self::TABLE)
    }

    /// Load by single primary key, honouring scopes.
    async fn find<K>(conn: &Connection, key: K) -> OrmResult<Option<Record<Self>>>
    where
        K: Into<Value> + Send,
    {
        let column = single_key::<Self>()?;
        Self::query()
            .eq(column, key)
            .fetch_one_as(conn)
            .await
    }

    /// [`EntityExt::find`], failing with [`OrmError::NotFound`].
    async fn get<K>(conn: &Connection, key: K) -> OrmResult<Record<Self>>
    where
        K: Into<Value> + Send,
    {
        let key = key.into();
        let shown = key.to_string();
        Self::find(conn, key)
            .await?
            .ok_or_else(|| OrmError::not_found(format!("{} {shown}", Self::TABLE)))
    }

    /// Every visible record, in primary-key order.
    async fn all(conn: &Connection) -> OrmResult<Vec<Record<Self>>> {
        let mut query = Self::primary_keys()
            .iter()
            .fold(Self::query(), |q, pk| q.order_by(*pk, Order::Asc));
        query.fetch_all_as(conn).await
    }

    /// Records matching `query`, which should select from this table.
    async fn fetch(conn: &Connection, mut query: Query) -> OrmResult<Vec<Record<Self>>> {
        query.fetch_all_as(conn).await
    }

    /// Main table definition: entity fields, then behaviour columns.
    fn table_def() -> TableDef {
        let mut def = Self::fields()
            .iter()
            .fold(TableDef::new(Self::TABLE), |def, field| def.field(*field));
        for (field, ty) in Self::field_types() {
            def = def.typed(field, ty);
        }
        for field in Self::behaviors().extra_fields() {
            def = def.push(field);
        }
        if Self::primary_keys() != ["id"] {
            def = def.primary_key(Self::primary_keys().iter().copied());
        }
        def
    }

    /// Tables owned by behaviours and many-to-many relations.
    fn auxiliary_tables() -> OrmResult<Vec<TableDef>> {
        let mut tables = Self::behaviors().auxiliary_tables(Self::TABLE);
        for relation in Self::relations() {
            if relation.kind == RelationKind::ManyToMany {
                tables.push(relations::join_table_def(Self::TABLE, relation.table)?);
            }
        }
        Ok(tables)
    }

    /// Create or extend the main table, then its auxiliary tables.
    async fn create_table(conn: &Connection) -> OrmResult<()> {
        let def = Self::table_def();
        let behaviors = Self::behaviors();
        behaviors.validate_schema(&def)?;
        let auxiliary = Self::auxiliary_tables()?;
        conn.alter_table(&def).await?;
        for table in &auxiliary {
            conn.create_table(table).await?;
        }
        tracing::debug!(
            target: "korm.orm",
            table = Self::TABLE,
            behaviors = ?behaviors.names(),
            auxiliary = auxiliary.len(),
            "table created"
        );
        Ok(())
    }

    /// Drop the auxiliary tables, then the main table.
    async fn drop_table(conn: &Connection) -> OrmResult<()> {
        for table in Self::auxiliary_tables()? {
            conn.drop_table(&table.name).await?;
        }
        conn.drop_table(Self::TABLE).await
    }
}

impl<E: Entity> EntityExt for E {}

pub(crate) fn single_key<E: Entity>() -> OrmResult<&'static str> {
    match E::primary_keys() {
        [key] => Ok(*key),
        keys => Err(OrmError::schema(format!(
            "'{}' has a composite primary key ({}); look it up with a query",
            E::TABLE,
            keys.join(", ")
        ))),
    }
}
