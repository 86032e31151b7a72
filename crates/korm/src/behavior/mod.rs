//! Lifecycle behaviours.
//!
//! A behaviour adds columns, owns auxiliary tables and hooks into
//! save/remove/restore. An entity lists its behaviours in a [`BehaviorStack`];
//! hooks run in registration order and the first error stops the chain.
//!
//! Auxiliary tables are named `<table><suffix>` with the suffixes `version`,
//! `meta`, `info`, `log` and `type`.

mod changelog;
mod meta;
mod permissions;
mod soft_delete;
mod timestamp;
mod type_table;
mod versioned;

pub use changelog::ChangeLog;
pub use meta::MetaStore;
pub use permissions::{Permissions, perm};
pub use soft_delete::SoftDelete;
pub use timestamp::Timestamp;
pub use type_table::TypeTable;
pub use versioned::Versioned;

use crate::connection::Connection;
use crate::error::OrmResult;
use crate::query::Expr;
use crate::schema::{FieldDef, TableDef};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a pre-remove hook decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Let the next hook run, then delete the row.
    Continue,
    /// Keep the row. Later hooks still run and may fail the removal; if none
    /// does, no DELETE is issued and pending value changes are written with
    /// an UPDATE instead.
    Veto,
}

/// The record as seen by a hook.
///
/// `values` holds every column, entity fields and behaviour columns alike;
/// changes made here are written back to the record and to the database.
pub struct HookContext<'a> {
    pub conn: &'a Connection,
    pub table: &'static str,
    pub primary_keys: &'static [&'static str],
    pub values: BTreeMap<String, Value>,
    /// Values as last loaded from or written to the database.
    pub original: &'a BTreeMap<String, Value>,
    /// True while saving a record that has no row yet.
    pub is_new: bool,
    /// Extra conditions an UPDATE must match; zero affected rows then means
    /// the record went stale.
    pub guards: Vec<Expr>,
}

impl<'a> HookContext<'a> {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn original(&self, field: &str) -> Option<&Value> {
        self.original.get(field)
    }

    /// Integer `id` of the record, once it has one.
    pub fn record_id(&self) -> Option<i64> {
        self.values
            .get("id")
            .or_else(|| self.original.get("id"))
            .and_then(Value::as_i64)
            .filter(|id| *id != 0)
    }

    /// Fields whose value differs from the snapshot, in column order.
    pub fn changed_fields(&self) -> Vec<String> {
        self.values
            .iter()
            .filter(|(field, value)| self.original.get(*field) != Some(*value))
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Primary-key tuple as stored, for WHERE clauses.
    pub fn key(&self) -> Vec<(String, Value)> {
        self.primary_keys
            .iter()
            .map(|pk| {
                let value = self
                    .original
                    .get(*pk)
                    .or_else(|| self.values.get(*pk))
                    .cloned()
                    .unwrap_or_default();
                (pk.to_string(), value)
            })
            .collect()
    }

    pub(crate) fn auxiliary(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.table)
    }
}

/// One pluggable lifecycle behaviour.
///
/// Every method has a no-op default, so a behaviour implements only the
/// hooks it cares about.
#[async_trait]
pub trait Behavior: Send + Sync {
    fn name(&self) -> &'static str;

    /// Columns this behaviour adds to the entity's table.
    fn extra_fields(&self) -> Vec<FieldDef> {
        Vec::new()
    }

    /// Tables this behaviour owns, created and dropped with the entity's.
    fn auxiliary_tables(&self, _table: &str) -> Vec<TableDef> {
        Vec::new()
    }

    /// Reject table definitions this behaviour cannot work with.
    fn validate_schema(&self, _def: &TableDef) -> OrmResult<()> {
        Ok(())
    }

    async fn on_pre_save(&self, _ctx: &mut HookContext<'_>) -> OrmResult<()> {
        Ok(())
    }

    /// Runs after the INSERT or UPDATE went through.
    async fn on_post_save(&self, _ctx: &HookContext<'_>) -> OrmResult<()> {
        Ok(())
    }

    async fn on_pre_remove(&self, _ctx: &mut HookContext<'_>) -> OrmResult<HookOutcome> {
        Ok(HookOutcome::Continue)
    }

    /// Runs after the row was physically deleted.
    async fn on_post_remove(&self, _ctx: &HookContext<'_>) -> OrmResult<()> {
        Ok(())
    }

    async fn on_restore(&self, _ctx: &mut HookContext<'_>) -> OrmResult<()> {
        Ok(())
    }

    /// Whether a loaded row counts as removed (soft-deleted).
    fn is_removed(&self, _values: &BTreeMap<String, Value>) -> bool {
        false
    }

    /// Condition default queries on `table` must satisfy.
    fn scope(&self, _table: &str) -> Option<Expr> {
        None
    }
}

/// Ordered list of behaviours attached to one entity.
#[derive(Clone, Default)]
pub struct BehaviorStack {
    behaviors: Vec<Arc<dyn Behavior>>,
}

impl BehaviorStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a behaviour; hooks run in the order behaviours were added.
    #[allow(clippy::should_implement_trait)]
    pub fn add<B: Behavior + 'static>(mut self, behavior: B) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub fn push(&mut self, behavior: Arc<dyn Behavior>) {
        self.behaviors.push(behavior);
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Behavior>> {
        self.behaviors.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.behaviors.iter().map(|b| b.name()).collect()
    }

    pub fn extra_fields(&self) -> Vec<FieldDef> {
        self.behaviors.iter().flat_map(|b| b.extra_fields()).collect()
    }

    pub fn auxiliary_tables(&self, table: &str) -> Vec<TableDef> {
        self.behaviors
            .iter()
            .flat_map(|b| b.auxiliary_tables(table))
            .collect()
    }

    pub fn validate_schema(&self, def: &TableDef) -> OrmResult<()> {
        self.behaviors.iter().try_for_each(|b| b.validate_schema(def))
    }

    pub fn scopes(&self, table: &str) -> Vec<Expr> {
        self.behaviors.iter().filter_map(|b| b.scope(table)).collect()
    }

    pub fn is_removed(&self, values: &BTreeMap<String, Value>) -> bool {
        self.behaviors.iter().any(|b| b.is_removed(values))
    }

    pub async fn pre_save(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        for behavior in &self.behaviors {
            behavior.on_pre_save(ctx).await?;
        }
        Ok(())
    }

    pub async fn post_save(&self, ctx: &HookContext<'_>) -> OrmResult<()> {
        for behavior in &self.behaviors {
            behavior.on_post_save(ctx).await?;
        }
        Ok(())
    }

    /// Run every pre-remove hook; the removal is vetoed if any hook vetoed.
    ///
    /// A veto does not skip later hooks, so a permission check registered
    /// after `SoftDelete` still gets to refuse.
    pub async fn pre_remove(&self, ctx: &mut HookContext<'_>) -> OrmResult<HookOutcome> {
        let mut outcome = HookOutcome::Continue;
        for behavior in &self.behaviors {
            if behavior.on_pre_remove(ctx).await? == HookOutcome::Veto {
                tracing::debug!(target: "korm.orm", table = ctx.table, behavior = behavior.name(), "removal vetoed");
                outcome = HookOutcome::Veto;
            }
        }
        Ok(outcome)
    }

    pub async fn post_remove(&self, ctx: &HookContext<'_>) -> OrmResult<()> {
        for behavior in &self.behaviors {
            behavior.on_post_remove(ctx).await?;
        }
        Ok(())
    }

    pub async fn restore(&self, ctx: &mut HookContext<'_>) -> OrmResult<()> {
        for behavior in &self.behaviors {
            behavior.on_restore(ctx).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for BehaviorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
