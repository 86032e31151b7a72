use super::{Behavior, HookContext, HookOutcome};
use crate::error::OrmResult;
use crate::query::Expr;
use crate::schema::{FieldDef, FieldType};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Marks rows deleted instead of deleting them.
///
/// `remove` stamps `deleted_at` and vetoes the DELETE; `restore` clears it.
/// Default queries only see rows where `deleted_at IS NULL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDelete;

impl SoftDelete {
    pub const COLUMN: &'static str = "deleted_at";
}

#[async_trait]
impl Behavior for SoftDelete {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    fn extra_fields(&self) -> Vec<FieldDef> {
        vec![FieldDef::new(Self::COLUMN, FieldType::DateTime)]
    }

    async fn on_pre_remove(&self, ctx: &mut HookContext<'_>) -> OrmResult<HookOutcome> {
        ctx.set(Self::COLUMN, Value::Timestamp(ctx.conn.now()));
        Ok(HookOutcome::Veto)
    }

    async fn on_restore(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        ctx.set(Self::COLUMN, Value::Null);
        Ok(())
    }

    fn is_removed(&self, values: &BTreeMap<String, Value>) -> bool {
        values.get(Self::COLUMN).is_some_and(|v| !v.is_null())
    }

    fn scope(&self, table: &str) -> Option<Expr> {
        Some(Expr::is_null(format!("{table}.{}", Self::COLUMN)))
    }
}
