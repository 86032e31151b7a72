use super::Behavior;
use crate::connection::Connection;
use crate::error::OrmResult;
use crate::query::{Order, Query, values};
use crate::schema::{FieldDef, FieldType, TableDef};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A `type_id` column whose values are named in `<table>type(id, name)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeTable;

impl TypeTable {
    pub const COLUMN: &'static str = "type_id";
    pub const SUFFIX: &'static str = "type";

    fn store(table: &str) -> String {
        format!("{table}{}", Self::SUFFIX)
    }

    /// Id of the type called `name`, registering it on first use.
    pub async fn define(conn: &Connection, table: &str, name: &str) -> OrmResult<i64> {
        let mut existing = Query::from(Self::store(table)).fields(["id"]).eq("name", name);
        if let Some(id) = existing.fetch_value::<i64>(conn).await? {
            return Ok(id);
        }
        let id = existing.insert(conn, values([("name", name)])).await?;
        match id {
            Some(id) => Ok(id),
            None => Ok(existing.fetch_value::<i64>(conn).await?.unwrap_or_default()),
        }
    }

    pub async fn name_of(conn: &Connection, table: &str, type_id: i64) -> OrmResult<Option<String>> {
        Query::from(Self::store(table))
            .fields(["name"])
            .eq("id", type_id)
            .fetch_value(conn)
            .await
    }

    /// Every registered type, by id.
    pub async fn types(conn: &Connection, table: &str) -> OrmResult<BTreeMap<i64, String>> {
        Query::from(Self::store(table))
            .fields(["id", "name"])
            .order_by("id", Order::Asc)
            .fetch_map(conn)
            .await
    }
}

#[async_trait]
impl Behavior for TypeTable {
    fn name(&self) -> &'static str {
        "type_table"
    }

    fn extra_fields(&self) -> Vec<FieldDef> {
        vec![FieldDef::new(Self::COLUMN, FieldType::Integer)]
    }

    fn auxiliary_tables(&self, table: &str) -> Vec<TableDef> {
        vec![
            TableDef::new(Self::store(table))
                .typed("id", FieldType::AutoKey)
                .typed("name", FieldType::Varchar(255))
                .not_null("name"),
        ]
    }
}
