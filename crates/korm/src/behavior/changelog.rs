use super::{Behavior, HookContext};
use crate::connection::Connection;
use crate::error::OrmResult;
use crate::query::{Order, Query, values};
use crate::row::Row;
use crate::schema::{FieldType, TableDef};
use crate::value::Value;
use async_trait::async_trait;

/// Writes one `<table>log` row per changed field on every update.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    ignored: Vec<&'static str>,
}

impl Default for ChangeLog {
    fn default() -> Self {
        Self {
            ignored: vec!["updated_at", "version"],
        }
    }
}

impl ChangeLog {
    pub const SUFFIX: &'static str = "log";

    pub fn new() -> Self {
        Self::default()
    }

    /// Also skip `field` when logging.
    pub fn ignore(mut self, field: &'static str) -> Self {
        self.ignored.push(field);
        self
    }

    /// Logged changes of one record, oldest first.
    pub async fn history(conn: &Connection, table: &str, record_id: i64) -> OrmResult<Vec<Row>> {
        Query::from(format!("{table}{}", Self::SUFFIX))
            .eq("record_id", record_id)
            .order_by("id", Order::Asc)
            .fetch_all(conn)
            .await
    }
}

fn as_text(value: Option<&Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Null,
        Some(Value::Text(s)) => Value::Text(s.clone()),
        Some(other) => Value::Text(other.to_string()),
    }
}

#[async_trait]
impl Behavior for ChangeLog {
    fn name(&self) -> &'static str {
        "changelog"
    }

    fn auxiliary_tables(&self, table: &str) -> Vec<TableDef> {
        vec![
            TableDef::new(format!("{table}{}", Self::SUFFIX))
                .typed("id", FieldType::AutoKey)
                .typed("record_id", FieldType::Integer)
                .typed("field", FieldType::Varchar(64))
                .typed("old_value", FieldType::Text)
                .typed("new_value", FieldType::Text)
                .typed("changed_at", FieldType::DateTime)
                .typed("user_id", FieldType::Integer)
                .not_null("record_id")
                .not_null("field"),
        ]
    }

    async fn on_post_save(&self, ctx: &HookContext<'_>) -> OrmResult<()> {
        if ctx.is_new {
            return Ok(());
        }
        let Some(record_id) = ctx.record_id() else {
            return Ok(());
        };
        let table = ctx.auxiliary(Self::SUFFIX);
        let changed_at = Value::Timestamp(ctx.conn.now());
        let user_id = Value::from(ctx.conn.current_user().map(|u| u.user_id()));
        for field in ctx.changed_fields() {
            if self.ignored.contains(&field.as_str()) {
                continue;
            }
            let row = values([
                ("record_id", Value::Int(record_id)),
                ("old_value", as_text(ctx.original(&field))),
                ("new_value", as_text(ctx.get(&field))),
                ("field", Value::Text(field)),
                ("changed_at", changed_at.clone()),
                ("user_id", user_id.clone()),
            ]);
            let (sql, params) = Query::from(table.as_str()).to_insert_sql(&row)?;
            ctx.conn.execute(&sql, &params).await?;
        }
        Ok(())
    }
}
