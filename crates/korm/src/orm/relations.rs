//! Convention-based relations.
//!
//! - has-one: `<other>_id` on this table references `other.id`;
//! - has-many: `<this>_id` on the other table references `this.id`;
//! - many-to-many: rows `(<a>_id, <b>_id)` in [`join_table`]`(a, b)`.
//!
//! Has-one and has-many results stay cached on the record and are saved
//! along with it.

use super::{Entity, EntityExt, Record};
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::query::{Order, Query, values};
use crate::schema::{FieldType, TableDef};
use crate::value::Value;
use async_trait::async_trait;
use std::any::Any;

/// Name of the table linking `a` and `b`: both names in alphabetical order,
/// concatenated.
pub fn join_table(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{b}")
    } else {
        format!("{b}{a}")
    }
}

pub(super) fn join_table_def(a: &str, b: &str) -> OrmResult<TableDef> {
    if a == b {
        return Err(OrmError::schema(format!(
            "many-to-many relation of '{a}' with itself needs distinct key columns"
        )));
    }
    let (first, second) = (format!("{a}_id"), format!("{b}_id"));
    Ok(TableDef::new(join_table(a, b))
        .typed(first.clone(), FieldType::Integer)
        .typed(second.clone(), FieldType::Integer)
        .not_null(&first)
        .not_null(&second)
        .primary_key([first, second]))
}

/// Cached related records of one relation.
#[async_trait]
pub(crate) trait RelatedSlot: Send + Sync {
    /// Save new or changed records; `parent` is the owning table and id.
    async fn save_all(&mut self, conn: &Connection, parent: (&'static str, Option<i64>)) -> OrmResult<usize>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct HasOneSlot<R: Entity>(Option<Record<R>>);

struct HasManySlot<R: Entity>(Vec<Record<R>>);

#[async_trait]
impl<R: Entity> RelatedSlot for HasOneSlot<R> {
    async fn save_all(&mut self, conn: &Connection, _parent: (&'static str, Option<i64>)) -> OrmResult<usize> {
        match &mut self.0 {
            Some(record) if record.is_dirty() => {
                record.save_row(conn).await?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[async_trait]
impl<R: Entity> RelatedSlot for HasManySlot<R> {
    async fn save_all(&mut self, conn: &Connection, parent: (&'static str, Option<i64>)) -> OrmResult<usize> {
        let (table, id) = parent;
        let foreign_key = format!("{table}_id");
        let mut saved = 0;
        for record in &mut self.0 {
            if let Some(id) = id {
                if record.get(&foreign_key).and_then(|v| v.as_i64()) != Some(id) {
                    record.set(&foreign_key, id)?;
                }
            }
            if record.is_dirty() {
                record.save_row(conn).await?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<E: Entity> Record<E> {
    /// The cached slot `name`, which must hold an `S`.
    ///
    /// Two entity types sharing a table share a slot name; reading one
    /// through the other is an error rather than a cache miss.
    fn slot<S: Any>(&mut self, name: &str) -> OrmResult<&mut S> {
        self.related
            .get_mut(name)
            .and_then(|slot| slot.as_any_mut().downcast_mut::<S>())
            .ok_or_else(|| OrmError::Other(format!("relation cache for '{name}' holds another type")))
    }

    fn require_id(&self, action: &str) -> OrmResult<i64> {
        self.id().ok_or_else(|| OrmError::InvalidState {
            state: self.state().to_string(),
            action: action.to_string(),
        })
    }

    /// The `R` this record points at through `<R::TABLE>_id`, loaded once.
    pub async fn has_one<R: Entity>(&mut self, conn: &Connection) -> OrmResult<Option<&mut Record<R>>> {
        let name = format!("one:{}", R::TABLE);
        if !self.related.contains_key(&name) {
            let foreign_key = format!("{}_id", R::TABLE);
            let target = self.get(&foreign_key).and_then(|v| v.as_i64());
            let loaded = match target {
                Some(id) => R::find(conn, id).await?,
                None => None,
            };
            self.related.insert(name.clone(), Box::new(HasOneSlot(loaded)));
        }
        Ok(self.slot::<HasOneSlot<R>>(&name)?.0.as_mut())
    }

    /// The `R`s pointing at this record through `<E::TABLE>_id`, loaded once.
    ///
    /// Records pushed onto the returned list are inserted on the next
    /// [`Record::save`], with their foreign key set to this record's id.
    pub async fn has_many<R: Entity>(&mut self, conn: &Connection) -> OrmResult<&mut Vec<Record<R>>> {
        let name = format!("many:{}", R::TABLE);
        if !self.related.contains_key(&name) {
            let loaded = match self.id() {
                Some(id) => {
                    let query = R::query()
                        .eq(format!("{}_id", E::TABLE), id)
                        .order_by("id", Order::Asc);
                    R::fetch(conn, query).await?
                }
                None => Vec::new(),
            };
            self.related.insert(name.clone(), Box::new(HasManySlot(loaded)));
        }
        Ok(&mut self.slot::<HasManySlot<R>>(&name)?.0)
    }

    /// Drop cached related records; the next access reloads them.
    pub fn forget_related(&mut self) {
        self.related.clear();
    }

    fn link(&self, other: &Record<impl Entity>, other_table: &str, action: &str) -> OrmResult<Query> {
        let table = join_table(E::TABLE, other_table);
        let mine = self.require_id(action)?;
        let theirs = other.require_id(action)?;
        Ok(Query::from(table)
            .eq(format!("{}_id", E::TABLE), mine)
            .eq(format!("{other_table}_id"), theirs))
    }

    /// Link `other` through the join table. Linking twice is a no-op;
    /// returns whether a row was added.
    pub async fn add_related<R: Entity>(&self, conn: &Connection, other: &Record<R>) -> OrmResult<bool> {
        let link = self.link(other, R::TABLE, "link")?;
        if link.count_rows(conn).await? > 0 {
            return Ok(false);
        }
        let row = values([
            (format!("{}_id", E::TABLE), Value::from(self.id())),
            (format!("{}_id", R::TABLE), Value::from(other.id())),
        ]);
        let (sql, params) = Query::from(link.table()).to_insert_sql(&row)?;
        conn.execute(&sql, &params).await?;
        Ok(true)
    }

    /// Every `R` linked to this record through the join table.
    pub async fn get_related<R: Entity>(&self, conn: &Connection) -> OrmResult<Vec<Record<R>>> {
        let Some(id) = self.id() else {
            return Ok(Vec::new());
        };
        let table = join_table(E::TABLE, R::TABLE);
        let query = R::query()
            .inner_join(table.as_str(), &format!("{table}.{}_id = {}.id", R::TABLE, R::TABLE))
            .eq(format!("{table}.{}_id", E::TABLE), id)
            .order_by(format!("{}.id", R::TABLE), Order::Asc);
        R::fetch(conn, query).await
    }

    /// Unlink `other`; returns whether a link existed.
    pub async fn remove_related<R: Entity>(&self, conn: &Connection, other: &Record<R>) -> OrmResult<bool> {
        let mut link = self.link(other, R::TABLE, "unlink")?;
        Ok(link.delete(conn).await? > 0)
    }
}
