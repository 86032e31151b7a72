use super::{Behavior, HookContext};
use crate::error::OrmResult;
use crate::schema::{FieldDef, FieldType};
use crate::value::Value;
use async_trait::async_trait;

/// Stamps `created_at` on insert and `updated_at` on every save, using the
/// connection's clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp;

#[async_trait]
impl Behavior for Timestamp {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn extra_fields(&self) -> Vec<FieldDef> {
        vec![
            FieldDef::new("created_at", FieldType::DateTime),
            FieldDef::new("updated_at", FieldType::DateTime),
        ]
    }

    async fn on_pre_save(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        let now = Value::Timestamp(ctx.conn.now());
        if ctx.is_new && ctx.get("created_at").is_none_or(Value::is_null) {
            ctx.set("created_at", now.clone());
        }
        ctx.set("updated_at", now);
        Ok(())
    }
}
