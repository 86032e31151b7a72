use super::{Behavior, HookContext};
use crate::connection::Connection;
use crate::error::OrmResult;
use crate::query::{Order, Query, values};
use crate::schema::{FieldType, TableDef};
use crate::value::{FromValue, Value, decode};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Free-form key/value pairs per record, kept in `<table>meta` (or
/// `<table>info`). Pairs go away when their record is hard-deleted.
#[derive(Debug, Clone, Copy)]
pub struct MetaStore {
    suffix: &'static str,
}

impl Default for MetaStore {
    fn default() -> Self {
        Self::meta()
    }
}

impl MetaStore {
    pub fn meta() -> Self {
        Self { suffix: "meta" }
    }

    pub fn info() -> Self {
        Self { suffix: "info" }
    }

    pub fn suffix(&self) -> &'static str {
        self.suffix
    }

    fn store(&self, table: &str) -> String {
        format!("{table}{}", self.suffix)
    }

    fn pair(&self, table: &str, record_id: i64, key: &str) -> Query {
        Query::from(self.store(table))
            .eq("record_id", record_id)
            .eq("meta_key", key)
    }

    pub async fn get(
        &self,
        conn: &Connection,
        table: &str,
        record_id: i64,
        key: &str,
    ) -> OrmResult<Option<Value>> {
        let row = self
            .pair(table, record_id, key)
            .fields(["meta_value"])
            .fetch_one(conn)
            .await?;
        Ok(row.and_then(|r| r.get("meta_value").cloned()))
    }

    /// [`MetaStore::get`] decoded into `T`.
    pub async fn get_as<T: FromValue>(
        &self,
        conn: &Connection,
        table: &str,
        record_id: i64,
        key: &str,
    ) -> OrmResult<Option<T>> {
        match self.get(conn, table, record_id, key).await? {
            Some(value) => decode::<Option<T>>(key, value),
            None => Ok(None),
        }
    }

    /// Insert or overwrite one pair. Values are stored as text.
    pub async fn set(
        &self,
        conn: &Connection,
        table: &str,
        record_id: i64,
        key: &str,
        value: impl Into<Value>,
    ) -> OrmResult<()> {
        let value = match value.into() {
            Value::Null => Value::Null,
            Value::Text(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        };
        let mut existing = self.pair(table, record_id, key);
        if existing.count_rows(conn).await? > 0 {
            existing
                .update(conn, values([("meta_value", value)]))
                .await?;
        } else {
            Query::from(self.store(table))
                .insert(
                    conn,
                    values([
                        ("record_id", Value::Int(record_id)),
                        ("meta_key", Value::from(key)),
                        ("meta_value", value),
                    ]),
                )
                .await?;
        }
        Ok(())
    }

    /// Every pair of a record.
    pub async fn all(
        &self,
        conn: &Connection,
        table: &str,
        record_id: i64,
    ) -> OrmResult<BTreeMap<String, Value>> {
        Query::from(self.store(table))
            .fields(["meta_key", "meta_value"])
            .eq("record_id", record_id)
            .order_by("meta_key", Order::Asc)
            .fetch_map(conn)
            .await
    }

    /// Remove one pair; returns whether it existed.
    pub async fn delete(
        &self,
        conn: &Connection,
        table: &str,
        record_id: i64,
        key: &str,
    ) -> OrmResult<bool> {
        Ok(self.pair(table, record_id, key).delete(conn).await? > 0)
    }

    async fn purge(&self, conn: &Connection, table: &str, record_id: i64) -> OrmResult<u64> {
        Query::from(self.store(table))
            .eq("record_id", record_id)
            .delete(conn)
            .await
    }
}

#[async_trait]
impl Behavior for MetaStore {
    fn name(&self) -> &'static str {
        "meta_store"
    }

    fn auxiliary_tables(&self, table: &str) -> Vec<TableDef> {
        vec![
            TableDef::new(self.store(table))
                .typed("id", FieldType::AutoKey)
                .typed("record_id", FieldType::Integer)
                .typed("meta_key", FieldType::Varchar(255))
                .typed("meta_value", FieldType::Text)
                .not_null("record_id")
                .not_null("meta_key"),
        ]
    }

    async fn on_post_remove(&self, ctx: &HookContext<'_>) -> OrmResult<()> {
        if let Some(id) = ctx.record_id() {
            let removed = self.purge(ctx.conn, ctx.table, id).await?;
            tracing::debug!(target: "korm.orm", table = ctx.table, record_id = id, removed, "meta purged");
        }
        Ok(())
    }
}
