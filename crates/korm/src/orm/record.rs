use super::Entity;
use super::relations::RelatedSlot;
use crate::behavior::{BehaviorStack, HookContext, HookOutcome};
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::query::{Expr, Query, Values};
use crate::row::{FromRow, Row};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Where a record stands relative to its row.
///
/// ```text
/// New --save--> Persisted --save--> Updated
/// Persisted/Updated/Restored --remove--> SoftDeleted (vetoed) | Deleted
/// SoftDeleted --restore--> Restored
/// ```
///
/// `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    New,
    Persisted,
    Updated,
    SoftDeleted,
    Deleted,
    Restored,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordState::New => "new",
            RecordState::Persisted => "persisted",
            RecordState::Updated => "updated",
            RecordState::SoftDeleted => "soft_deleted",
            RecordState::Deleted => "deleted",
            RecordState::Restored => "restored",
        }
    }

    /// Whether a row backs the record.
    pub fn is_stored(self) -> bool {
        !matches!(self, RecordState::New | RecordState::Deleted)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entity plus what it takes to persist it: the columns behaviours add,
/// the values last seen in the database, the lifecycle state and the cache of
/// related records.
///
/// Derefs to the entity, so fields read and write directly.
pub struct Record<E: Entity> {
    entity: E,
    /// Columns that are not entity fields: behaviour columns and extras.
    extra: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
    state: RecordState,
    pub(super) related: HashMap<String, Box<dyn RelatedSlot>>,
}

impl<E: Entity> Record<E> {
    /// Wrap a value that has no row yet.
    pub fn new(entity: E) -> Self {
        let extra = E::behaviors()
            .extra_fields()
            .into_iter()
            .filter(|f| !E::fields().contains(&f.name.as_str()))
            .map(|f| (f.name, Value::Null))
            .collect();
        Self {
            entity,
            extra,
            original: BTreeMap::new(),
            state: RecordState::New,
            related: HashMap::new(),
        }
    }

    /// A record for a loaded row.
    pub fn from_loaded(row: &Row) -> OrmResult<Self> {
        let entity = E::from_row(row)?;
        let extra = row
            .iter()
            .filter(|(column, _)| !E::fields().contains(column))
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        let mut record = Self {
            entity,
            extra,
            original: BTreeMap::new(),
            state: RecordState::Persisted,
            related: HashMap::new(),
        };
        record.original = record.values();
        if E::behaviors().is_removed(&record.original) {
            record.state = RecordState::SoftDeleted;
        }
        Ok(record)
    }

    pub fn entity(&self) -> &E {
        &self.entity
    }

    pub fn into_entity(self) -> E {
        self.entity
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Value of a field or behaviour column.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.entity
            .get_value(field)
            .or_else(|| self.extra.get(field).cloned())
    }

    /// Assign a field or behaviour column. Takes effect on the next save.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> OrmResult<()> {
        let value = value.into();
        if E::fields().contains(&field) {
            self.entity.set_value(field, value)
        } else {
            self.extra.insert(field.to_string(), value);
            Ok(())
        }
    }

    /// Every column, entity fields first.
    pub fn values(&self) -> BTreeMap<String, Value> {
        let mut values = self.extra.clone();
        for field in E::fields() {
            if let Some(value) = self.entity.get_value(field) {
                values.insert(field.to_string(), value);
            }
        }
        values
    }

    /// Values as last loaded or written.
    pub fn original(&self) -> &BTreeMap<String, Value> {
        &self.original
    }

    pub fn changed_fields(&self) -> Vec<String> {
        diff(&self.values(), &self.original)
            .into_iter()
            .map(|(field, _)| field)
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.state == RecordState::New || !self.changed_fields().is_empty()
    }

    /// Integer `id`, once the row exists.
    pub fn id(&self) -> Option<i64> {
        self.get("id")
            .and_then(|v| v.as_i64())
            .filter(|id| *id != 0)
    }

    fn apply(&mut self, values: BTreeMap<String, Value>) -> OrmResult<()> {
        for (field, value) in values {
            if self.get(&field).as_ref() != Some(&value) {
                self.set(&field, value)?;
            }
        }
        Ok(())
    }

    fn context<'a>(
        &'a self,
        conn: &'a Connection,
        values: BTreeMap<String, Value>,
        is_new: bool,
    ) -> HookContext<'a> {
        HookContext {
            conn,
            table: E::TABLE,
            primary_keys: E::primary_keys(),
            values,
            original: &self.original,
            is_new,
            guards: Vec::new(),
        }
    }

    fn invalid(&self, action: &str) -> OrmError {
        OrmError::InvalidState {
            state: self.state.to_string(),
            action: action.to_string(),
        }
    }

    /// Insert or update the row, then save cached related records.
    ///
    /// Related records are saved one by one after the parent; a failure
    /// part-way leaves the earlier saves in place.
    pub async fn save(&mut self, conn: &Connection) -> OrmResult<()> {
        self.save_row(conn).await?;
        let parent = (E::TABLE, self.id());
        let mut cascaded = 0;
        for slot in self.related.values_mut() {
            cascaded += slot.save_all(conn, parent).await?;
        }
        if cascaded > 0 {
            tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?parent.1, cascaded, "related records saved");
        }
        Ok(())
    }

    /// Insert or update this row only.
    pub(super) async fn save_row(&mut self, conn: &Connection) -> OrmResult<()> {
        if self.state == RecordState::Deleted {
            return Err(self.invalid("save"));
        }
        self.entity.validate()?;

        let behaviors = E::behaviors();
        let is_new = self.state == RecordState::New;
        let mut ctx = self.context(conn, self.values(), is_new);
        behaviors.pre_save(&mut ctx).await?;
        let key = ctx.key();
        let HookContext {
            mut values, guards, ..
        } = ctx;

        if is_new {
            self.insert_row(conn, &mut values).await?;
        } else {
            self.update_row(conn, &values, key, guards).await?;
        }
        self.apply(values)?;

        let ctx = self.context(conn, self.values(), is_new);
        behaviors.post_save(&ctx).await?;
        self.original = self.values();
        self.state = match self.state {
            RecordState::New => RecordState::Persisted,
            RecordState::SoftDeleted if behaviors.is_removed(&self.original) => RecordState::SoftDeleted,
            _ => RecordState::Updated,
        };
        Ok(())
    }

    async fn insert_row(&self, conn: &Connection, values: &mut BTreeMap<String, Value>) -> OrmResult<()> {
        let auto_key = match E::primary_keys() {
            [key] if values.get(*key).is_none_or(Value::is_unset_key) => Some(*key),
            _ => None,
        };
        let row: Values = values
            .iter()
            .filter(|(column, _)| Some(column.as_str()) != auto_key)
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let (sql, params) = Query::from(E::TABLE).to_insert_sql(&row)?;
        let (_, id) = conn.insert(&sql, &params, auto_key).await?;
        if let (Some(key), Some(id)) = (auto_key, id) {
            values.insert(key.to_string(), Value::Int(id));
        }
        tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?id, "inserted");
        Ok(())
    }

    async fn update_row(
        &self,
        conn: &Connection,
        values: &BTreeMap<String, Value>,
        key: Vec<(String, Value)>,
        guards: Vec<Expr>,
    ) -> OrmResult<()> {
        let changed = diff(values, &self.original);
        if changed.is_empty() {
            return Ok(());
        }
        let guarded = !guards.is_empty();
        let query = key
            .into_iter()
            .fold(Query::from(E::TABLE), |q, (column, value)| q.eq(column, value));
        let query = guards.into_iter().fold(query, Query::filter_expr);
        let (sql, params) = query.to_update_sql(&changed)?;
        let affected = conn.execute(&sql, &params).await?;
        if affected == 0 && guarded {
            return Err(OrmError::StaleRecord {
                table: E::TABLE.to_string(),
                version: self
                    .original
                    .get("version")
                    .and_then(Value::as_i64)
                    .unwrap_or_default(),
            });
        }
        tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?self.id(), columns = changed.len(), "updated");
        Ok(())
    }

    /// Delete the row, unless a pre-remove hook vetoes it.
    ///
    /// On a veto the hooks' value changes are written instead and the record
    /// becomes [`RecordState::SoftDeleted`]; otherwise it becomes
    /// [`RecordState::Deleted`] and can no longer be saved.
    pub async fn remove(&mut self, conn: &Connection) -> OrmResult<()> {
        if !matches!(
            self.state,
            RecordState::Persisted | RecordState::Updated | RecordState::Restored
        ) {
            return Err(self.invalid("remove"));
        }
        let behaviors = E::behaviors();
        let mut ctx = self.context(conn, self.values(), false);
        let outcome = behaviors.pre_remove(&mut ctx).await?;
        let key = ctx.key();
        let values = ctx.values;

        match outcome {
            HookOutcome::Veto => {
                self.write_changes(conn, &values, key).await?;
                self.apply(values)?;
                self.original = self.values();
                self.state = RecordState::SoftDeleted;
                tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?self.id(), "soft deleted");
            }
            HookOutcome::Continue => {
                let (sql, params) = key_query::<E>(key).to_delete_sql()?;
                conn.execute(&sql, &params).await?;
                let ctx = self.context(conn, self.values(), false);
                behaviors.post_remove(&ctx).await?;
                self.state = RecordState::Deleted;
                self.related.clear();
                tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?self.id(), "deleted");
            }
        }
        Ok(())
    }

    /// Undo a vetoed removal.
    pub async fn restore(&mut self, conn: &Connection) -> OrmResult<()> {
        if self.state != RecordState::SoftDeleted {
            return Err(self.invalid("restore"));
        }
        let behaviors = E::behaviors();
        let mut ctx = self.context(conn, self.values(), false);
        behaviors.restore(&mut ctx).await?;
        let key = ctx.key();
        let values = ctx.values;

        self.write_changes(conn, &values, key).await?;
        self.apply(values)?;
        self.original = self.values();
        self.state = RecordState::Restored;
        tracing::debug!(target: "korm.orm", table = E::TABLE, id = ?self.id(), "restored");
        Ok(())
    }

    async fn write_changes(
        &self,
        conn: &Connection,
        values: &BTreeMap<String, Value>,
        key: Vec<(String, Value)>,
    ) -> OrmResult<()> {
        let changed = diff(values, &self.original);
        if changed.is_empty() {
            return Ok(());
        }
        let (sql, params) = key_query::<E>(key).to_update_sql(&changed)?;
        conn.execute(&sql, &params).await?;
        Ok(())
    }
}

fn key_query<E: Entity>(key: Vec<(String, Value)>) -> Query {
    key.into_iter()
        .fold(Query::from(E::TABLE), |q, (column, value)| q.eq(column, value))
}

/// Columns of `values` that differ from `original`.
fn diff(values: &BTreeMap<String, Value>, original: &BTreeMap<String, Value>) -> Values {
    values
        .iter()
        .filter(|(column, value)| original.get(*column) != Some(*value))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect()
}

impl<E: Entity> Deref for Record<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.entity
    }
}

impl<E: Entity> DerefMut for Record<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.entity
    }
}

impl<E: Entity> FromRow for Record<E> {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Self::from_loaded(row)
    }
}

impl<E: Entity + fmt::Debug> fmt::Debug for Record<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity)
            .field("extra", &self.extra)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
