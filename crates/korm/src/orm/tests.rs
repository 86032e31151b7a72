use super::*;
use crate::behavior::{SoftDelete, Versioned};
use crate::validation::ValidationErrors;
use crate::context::FixedClock;
use crate::driver::testing::connection;
use crate::options::ConnectOptions;
use crate::row::Row;
use crate::value::decode;
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
struct Plain {
    id: i64,
    title: String,
}

impl FromRow for Plain {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
        })
    }
}

impl Entity for Plain {
    const TABLE: &'static str = "plain";

    fn fields() -> &'static [&'static str] {
        &["id", "title"]
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "title" => Some(self.title.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> OrmResult<()> {
        match field {
            "id" => self.id = decode(field, value)?,
            "title" => self.title = decode(field, value)?,
            _ => return Err(unknown_field(Self::TABLE, field)),
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.title.is_empty() {
            errors.required("title");
        }
        errors.into_result()
    }
}

/// Same shape as `Plain`, soft-deleted and versioned.
#[derive(Debug, Clone, PartialEq)]
struct Doc {
    id: i64,
    body: String,
}

impl FromRow for Doc {
    fn from_row(row: &Row) -> OrmResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            body: row.try_get("body")?,
        })
    }
}

impl Entity for Doc {
    const TABLE: &'static str = "doc";

    fn fields() -> &'static [&'static str] {
        &["id", "body"]
    }

    fn field_types() -> Vec<(&'static str, FieldType)> {
        vec![("body", FieldType::Text)]
    }

    fn relations() -> &'static [Relation] {
        &[Relation {
            name: "tags",
            kind: RelationKind::ManyToMany,
            table: "tag",
        }]
    }

    fn behaviors() -> BehaviorStack {
        BehaviorStack::new().add(SoftDelete).add(Versioned)
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "body" => Some(self.body.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> OrmResult<()> {
        match field {
            "id" => self.id = decode(field, value)?,
            "body" => self.body = decode(field, value)?,
            _ => return Err(unknown_field(Self::TABLE, field)),
        }
        Ok(())
    }
}

fn loaded_doc(version: i64) -> Record<Doc> {
    let row = Row::new(vec![
        ("id".into(), Value::Int(1)),
        ("body".into(), Value::Text("first".into())),
        ("deleted_at".into(), Value::Null),
        ("version".into(), Value::Int(version)),
    ]);
    Record::from_loaded(&row).unwrap()
}

/// One affected row for the next statement.
fn affected() -> Vec<Row> {
    vec![Row::new(Vec::new())]
}

#[test]
fn join_table_sorts_names() {
    assert_eq!(join_table("user", "tag"), "taguser");
    assert_eq!(join_table("tag", "user"), "taguser");
}

#[test]
fn table_def_merges_types_and_behaviours() {
    let def = Doc::table_def();
    let names: Vec<&str> = def.field_names().collect();
    assert_eq!(names, ["id", "body", "deleted_at", "version"]);
    assert_eq!(def.fields[1].ty, FieldType::Text);
    assert_eq!(def.effective_primary_key(), ["id"]);

    let aux: Vec<String> = Doc::auxiliary_tables()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(aux, ["docversion", "doctag"]);
}

#[test]
fn default_query_is_scoped() {
    assert_eq!(
        Doc::query().to_sql(),
        "SELECT * FROM doc WHERE doc.deleted_at IS NULL"
    );
    assert_eq!(Doc::unscoped().to_sql(), "SELECT * FROM doc");
    assert_eq!(Plain::query().to_sql(), "SELECT * FROM plain");
}

#[tokio::test]
async fn save_inserts_then_updates_changed_columns() {
    let (driver, conn) = connection(ConnectOptions::default());
    let mut record = Record::new(Plain {
        id: 5,
        title: "a".into(),
    });
    assert!(record.is_dirty());

    record.save(&conn).await.unwrap();
    assert_eq!(record.state(), RecordState::Persisted);
    assert!(!record.is_dirty());

    record.title = "b".into();
    assert_eq!(record.changed_fields(), ["title"]);
    record.save(&conn).await.unwrap();
    assert_eq!(record.state(), RecordState::Updated);

    assert_eq!(
        driver.statements(),
        [
            "INSERT INTO plain (id, title) VALUES (:p0, :p1)",
            "UPDATE plain SET title = :p0 WHERE id = :p1",
        ]
    );
}

#[tokio::test]
async fn validation_failure_writes_nothing() {
    let (driver, conn) = connection(ConnectOptions::default());
    let mut record = Record::new(Plain {
        id: 0,
        title: String::new(),
    });
    let err = record.save(&conn).await.unwrap_err();
    let errors = err.errors().expect("validation errors");
    assert_eq!(errors.for_field("title").count(), 1);
    assert!(driver.statements().is_empty());
    assert_eq!(record.state(), RecordState::New);
}

#[tokio::test]
async fn hard_delete_is_terminal() {
    let (driver, conn) = connection(ConnectOptions::default());
    let row = Row::new(vec![
        ("id".into(), Value::Int(3)),
        ("title".into(), Value::Text("x".into())),
    ]);
    let mut record: Record<Plain> = Record::from_loaded(&row).unwrap();

    record.remove(&conn).await.unwrap();
    assert_eq!(record.state(), RecordState::Deleted);
    assert_eq!(driver.statements(), ["DELETE FROM plain WHERE id = :p0"]);

    assert!(matches!(
        record.save(&conn).await,
        Err(OrmError::InvalidState { .. })
    ));
    assert!(matches!(
        record.restore(&conn).await,
        Err(OrmError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn soft_delete_round_trip() {
    let (driver, conn) = connection(ConnectOptions::default());
    let noon = NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let conn = conn.with_clock(Arc::new(FixedClock::new(noon)));
    let mut doc = loaded_doc(1);

    doc.remove(&conn).await.unwrap();
    assert_eq!(doc.state(), RecordState::SoftDeleted);
    assert_eq!(doc.get("deleted_at"), Some(Value::Timestamp(noon)));
    assert!(matches!(
        doc.remove(&conn).await,
        Err(OrmError::InvalidState { .. })
    ));

    doc.restore(&conn).await.unwrap();
    assert_eq!(doc.state(), RecordState::Restored);
    assert_eq!(doc.get("deleted_at"), Some(Value::Null));

    assert_eq!(
        driver.statements(),
        [
            "UPDATE doc SET deleted_at = :p0 WHERE id = :p1",
            "UPDATE doc SET deleted_at = :p0 WHERE id = :p1",
        ]
    );
}

#[test]
fn loaded_soft_deleted_rows_start_soft_deleted() {
    let row = Row::new(vec![
        ("id".into(), Value::Int(1)),
        ("body".into(), Value::Text("gone".into())),
        ("deleted_at".into(), Value::Text("2024-01-02 12:00:00".into())),
        ("version".into(), Value::Int(1)),
    ]);
    let doc: Record<Doc> = Record::from_loaded(&row).unwrap();
    assert_eq!(doc.state(), RecordState::SoftDeleted);
}

#[tokio::test]
async fn versioned_update_is_guarded() {
    let (driver, conn) = connection(ConnectOptions::default());
    let mut doc = loaded_doc(2);
    doc.body = "second".into();

    let err = doc.save(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::StaleRecord { version: 2, .. }));
    assert_eq!(
        driver.statements(),
        ["UPDATE doc SET body = :p0, version = :p1 WHERE id = :p2 AND version = :p3"]
    );
    assert_eq!(doc.state(), RecordState::Persisted);
    assert_eq!(doc.get("version"), Some(Value::Int(2)));

    driver.push_rows(affected());
    doc.save(&conn).await.unwrap();
    assert_eq!(doc.get("version"), Some(Value::Int(3)));
    assert_eq!(doc.state(), RecordState::Updated);
    let statements = driver.statements();
    assert!(statements[2].starts_with("INSERT INTO docversion ("));
}

#[tokio::test]
async fn linking_requires_saved_records() {
    let (_, conn) = connection(ConnectOptions::default());
    let doc = Record::new(Doc {
        id: 0,
        body: "draft".into(),
    });
    let other = loaded_doc(1);
    assert!(matches!(
        doc.add_related(&conn, &other).await,
        Err(OrmError::InvalidState { .. })
    ));
    assert!(doc.get_related::<Doc>(&conn).await.unwrap().is_empty());
}
