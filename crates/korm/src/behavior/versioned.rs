use super::{Behavior, HookContext};
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::query::{Expr, Order, Query, values};
use crate::schema::{FieldDef, FieldType, TableDef};
use crate::value::{Value, decode};
use async_trait::async_trait;

/// Optimistic versioning with history.
///
/// Each update bumps `version` and only matches the row if nobody else bumped
/// it first; the row as it was before the update is kept as JSON in
/// `<table>version`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Versioned;

impl Versioned {
    pub const COLUMN: &'static str = "version";
    pub const SUFFIX: &'static str = "version";

    /// Stored snapshots of one record, oldest first.
    pub async fn history(
        conn: &Connection,
        table: &str,
        record_id: i64,
    ) -> OrmResult<Vec<(i64, serde_json::Value)>> {
        let mut query = Query::from(format!("{table}{}", Self::SUFFIX))
            .fields(["version", "data"])
            .eq("record_id", record_id)
            .order_by("version", Order::Asc);
        let mut history = Vec::new();
        for row in query.rows(conn).await? {
            let version: i64 = row.try_get("version")?;
            let data: String = row.try_get("data")?;
            history.push((version, serde_json::from_str(&data)?));
        }
        Ok(history)
    }
}

fn current_version(ctx: &HookContext<'_>) -> OrmResult<i64> {
    match ctx.original(Versioned::COLUMN) {
        Some(value) => Ok(decode::<Option<i64>>(Versioned::COLUMN, value.clone())?.unwrap_or(0)),
        None => Ok(0),
    }
}

#[async_trait]
impl Behavior for Versioned {
    fn name(&self) -> &'static str {
        "versioned"
    }

    fn extra_fields(&self) -> Vec<FieldDef> {
        vec![FieldDef::new(Self::COLUMN, FieldType::Integer)]
    }

    fn auxiliary_tables(&self, table: &str) -> Vec<TableDef> {
        vec![
            TableDef::new(format!("{table}{}", Self::SUFFIX))
                .typed("record_id", FieldType::Integer)
                .typed("version", FieldType::Integer)
                .typed("data", FieldType::Text)
                .typed("created_at", FieldType::DateTime)
                .not_null("record_id")
                .not_null("version")
                .primary_key(["record_id", "version"]),
        ]
    }

    fn validate_schema(&self, def: &TableDef) -> OrmResult<()> {
        if def.has_field("id") {
            Ok(())
        } else {
            Err(OrmError::schema(format!(
                "versioned table '{}' requires an 'id' field",
                def.name
            )))
        }
    }

    async fn on_pre_save(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        if ctx.is_new {
            ctx.set(Self::COLUMN, 1);
            return Ok(());
        }
        let current = current_version(ctx)?;
        ctx.set(Self::COLUMN, current + 1);
        ctx.guards.push(Expr::eq(Self::COLUMN, current));
        Ok(())
    }

    async fn on_post_save(&self, ctx: &HookContext<'_>) -> OrmResult<()> {
        if ctx.is_new {
            return Ok(());
        }
        let Some(record_id) = ctx.record_id() else {
            return Ok(());
        };
        let snapshot: serde_json::Map<String, serde_json::Value> = ctx
            .original
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let row = values([
            ("record_id", Value::Int(record_id)),
            ("version", Value::Int(current_version(ctx)?)),
            ("data", Value::Text(serde_json::Value::Object(snapshot).to_string())),
            ("created_at", Value::Timestamp(ctx.conn.now())),
        ]);
        let (sql, params) = Query::from(ctx.auxiliary(Self::SUFFIX)).to_insert_sql(&row)?;
        ctx.conn.execute(&sql, &params).await?;
        Ok(())
    }
}
