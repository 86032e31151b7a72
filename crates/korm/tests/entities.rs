//! Derived entities end to end on in-memory SQLite.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use korm::{
    BehaviorStack, ChangeLog, Connection, Entity, EntityExt, FixedClock, FromRow, MetaStore,
    OrmError, Permissions, Query, Record, RecordState, SoftDelete, StaticUser, Timestamp,
    TypeTable, ValidationErrors, Value, Versioned, registry,
};
use std::sync::Arc;

#[derive(Debug, Entity, FromRow)]
#[korm(table = "company", has_many(User, name = "employees"))]
struct Company {
    id: i64,
    name: String,
}

/// A second view of the `company` table.
#[derive(Debug, Entity, FromRow)]
#[korm(table = "company")]
struct CompanyCard {
    id: i64,
    name: String,
}

#[derive(Debug, Entity, FromRow)]
#[korm(table = "user", has_one(Company), many_to_many(Tag))]
struct User {
    id: i64,
    name: String,
    company_id: Option<i64>,
}

#[derive(Debug, Entity, FromRow)]
#[korm(table = "tag", many_to_many(User))]
struct Tag {
    id: i64,
    label: String,
}

#[derive(Debug, Entity, FromRow)]
#[korm(table = "post", behaviors = post_behaviors, validate = check_post)]
struct Post {
    id: i64,
    title: String,
    body: String,
    #[korm(skip)]
    preview: Option<String>,
}

fn post_behaviors() -> BehaviorStack {
    BehaviorStack::new()
        .add(Timestamp)
        .add(SoftDelete)
        .add(Versioned)
        .add(ChangeLog::new())
}

fn check_post(post: &Post) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors
        .present("title", &post.title)
        .length("body", &post.body, 0..=2000);
    errors.into_result()
}

#[derive(Debug, Entity, FromRow)]
#[korm(table = "document", behaviors = document_behaviors)]
struct Document {
    id: i64,
    title: String,
}

fn document_behaviors() -> BehaviorStack {
    BehaviorStack::new()
        .add(Permissions::default())
        .add(MetaStore::meta())
        .add(TypeTable)
}

/// Soft delete registered ahead of the permission check.
#[derive(Debug, Entity, FromRow)]
#[korm(table = "note", behaviors = note_behaviors)]
struct Note {
    id: i64,
    body: String,
}

fn note_behaviors() -> BehaviorStack {
    BehaviorStack::new().add(SoftDelete).add(Permissions::default())
}

#[derive(Debug, Entity, FromRow)]
#[korm(table = "membership", primary_key(team_id, member_id))]
struct Membership {
    team_id: i64,
    member_id: i64,
    role: String,
}

fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

async fn clocked() -> (Arc<FixedClock>, Connection) {
    let clock = Arc::new(FixedClock::new(noon()));
    let conn = Connection::memory().await.unwrap().with_clock(clock.clone());
    (clock, conn)
}

fn user(name: &str, company_id: Option<i64>) -> Record<User> {
    Record::new(User {
        id: 0,
        name: name.into(),
        company_id,
    })
}

fn post(title: &str, body: &str) -> Record<Post> {
    Record::new(Post {
        id: 0,
        title: title.into(),
        body: body.into(),
        preview: None,
    })
}

#[tokio::test]
async fn user_and_company_round_trip() {
    let conn = Connection::memory().await.unwrap();
    Company::create_table(&conn).await.unwrap();
    User::create_table(&conn).await.unwrap();

    let mut acme = Record::new(Company {
        id: 0,
        name: "Acme".into(),
    });
    acme.save(&conn).await.unwrap();
    assert_eq!(acme.id(), Some(1));

    let mut ada = user("ada", acme.id());
    ada.save(&conn).await.unwrap();
    let mut loner = user("loner", None);
    loner.save(&conn).await.unwrap();

    let row = Query::from("user")
        .filter("id", ada.id())
        .fetch_one(&conn)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.try_get::<String>("name").unwrap(), "ada");

    let orphans = User::query()
        .filter("company_id", Value::Null)
        .fetch_all_as::<Record<User>>(&conn)
        .await
        .unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].name, "loner");

    let company = ada.company(&conn).await.unwrap().unwrap();
    assert_eq!(company.name, "Acme");
    assert!(loner.company(&conn).await.unwrap().is_none());

    // Same table, other type: the cached slot is not silently read as empty.
    let err = ada.has_one::<CompanyCard>(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::Other(_)), "{err}");
    ada.forget_related();
    let card = ada.has_one::<CompanyCard>(&conn).await.unwrap().unwrap();
    assert_eq!(card.name, "Acme");
}

#[tokio::test]
async fn has_many_cascades_new_children() {
    let conn = Connection::memory().await.unwrap();
    Company::create_table(&conn).await.unwrap();
    User::create_table(&conn).await.unwrap();

    let mut acme = Record::new(Company {
        id: 0,
        name: "Acme".into(),
    });
    acme.save(&conn).await.unwrap();
    user("ada", acme.id()).save(&conn).await.unwrap();

    {
        let employees = acme.employees(&conn).await.unwrap();
        assert_eq!(employees.len(), 1);
        employees.push(user("alan", None));
        employees[0].name = "ada lovelace".into();
    }
    acme.save(&conn).await.unwrap();

    let staff = User::query()
        .eq("company_id", acme.id())
        .order_by("id", korm::Order::Asc)
        .pluck::<String>(&conn, "name")
        .await
        .unwrap();
    assert_eq!(staff, ["ada lovelace", "alan"]);

    let employees = acme.employees(&conn).await.unwrap();
    assert!(employees.iter().all(|e| e.state() != RecordState::New));
}

#[tokio::test]
async fn many_to_many_links_without_duplicates() {
    let conn = Connection::memory().await.unwrap();
    User::create_table(&conn).await.unwrap();
    Tag::create_table(&conn).await.unwrap();
    assert!(conn.table_exists("taguser").await.unwrap());

    let mut ada = user("ada", None);
    ada.save(&conn).await.unwrap();
    let mut rust = Record::new(Tag {
        id: 0,
        label: "rust".into(),
    });
    rust.save(&conn).await.unwrap();
    let mut sql = Record::new(Tag {
        id: 0,
        label: "sql".into(),
    });
    sql.save(&conn).await.unwrap();

    assert!(ada.add_related(&conn, &rust).await.unwrap());
    assert!(!ada.add_related(&conn, &rust).await.unwrap());
    assert!(ada.add_related(&conn, &sql).await.unwrap());

    let labels: Vec<String> = ada
        .tags(&conn)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.into_entity().label)
        .collect();
    assert_eq!(labels, ["rust", "sql"]);

    let users = rust.users(&conn).await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name, "ada");

    assert!(ada.remove_related(&conn, &sql).await.unwrap());
    assert!(!ada.remove_related(&conn, &sql).await.unwrap());
    assert_eq!(ada.tags(&conn).await.unwrap().len(), 1);
}

#[tokio::test]
async fn linking_unsaved_records_is_rejected() {
    let conn = Connection::memory().await.unwrap();
    let ada = user("ada", None);
    let tag = Record::new(Tag {
        id: 0,
        label: "rust".into(),
    });
    let err = ada.add_related(&conn, &tag).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidState { .. }));
    assert!(ada.tags(&conn).await.unwrap().is_empty());
}

#[tokio::test]
async fn soft_delete_and_restore() {
    let (_, conn) = clocked().await;
    Post::create_table(&conn).await.unwrap();

    let mut hello = post("hello", "first");
    hello.save(&conn).await.unwrap();
    let id = hello.id().unwrap();
    assert_eq!(hello.state(), RecordState::Persisted);
    assert_eq!(hello.get("created_at"), Some(Value::Timestamp(noon())));

    hello.remove(&conn).await.unwrap();
    assert_eq!(hello.state(), RecordState::SoftDeleted);
    let row = Post::unscoped().eq("id", id).fetch_one(&conn).await.unwrap().unwrap();
    assert!(!row.get("deleted_at").unwrap().is_null());
    assert_eq!(Post::query().count_rows(&conn).await.unwrap(), 0);
    assert_eq!(Post::query().alias("p").count_rows(&conn).await.unwrap(), 0);
    assert!(Post::find(&conn, id).await.unwrap().is_none());

    let loaded: Record<Post> = Post::unscoped().eq("id", id).fetch_one_as(&conn).await.unwrap().unwrap();
    assert_eq!(loaded.state(), RecordState::SoftDeleted);

    let err = hello.remove(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidState { .. }));

    hello.restore(&conn).await.unwrap();
    assert_eq!(hello.state(), RecordState::Restored);
    assert_eq!(Post::query().count_rows(&conn).await.unwrap(), 1);
    let found = Post::get(&conn, id).await.unwrap();
    assert!(found.get("deleted_at").unwrap().is_null());
    assert!(found.preview.is_none());
}

#[tokio::test]
async fn versioned_updates_detect_conflicts() {
    let (clock, conn) = clocked().await;
    Post::create_table(&conn).await.unwrap();

    let mut mine = post("hello", "first");
    mine.save(&conn).await.unwrap();
    let id = mine.id().unwrap();
    assert_eq!(mine.get("version"), Some(Value::Int(1)));

    let mut theirs = Post::get(&conn, id).await.unwrap();

    clock.advance(TimeDelta::minutes(5));
    mine.body = "second".into();
    mine.save(&conn).await.unwrap();
    assert_eq!(mine.get("version"), Some(Value::Int(2)));
    assert_eq!(mine.state(), RecordState::Updated);

    theirs.title = "edited elsewhere".into();
    let err = theirs.save(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::StaleRecord { version: 1, .. }), "{err}");

    let history = Versioned::history(&conn, "post", id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].0, 1);
    assert_eq!(history[0].1["body"], "first");

    let stored = Post::get(&conn, id).await.unwrap();
    assert_eq!(stored.title, "hello");
    assert_eq!(stored.body, "second");
}

#[tokio::test]
async fn change_log_records_changed_fields() {
    let (clock, conn) = clocked().await;
    let conn = conn.with_current_user(Arc::new(StaticUser::new(9)));
    Post::create_table(&conn).await.unwrap();

    let mut hello = post("hello", "first");
    hello.save(&conn).await.unwrap();
    let id = hello.id().unwrap();
    assert!(ChangeLog::history(&conn, "post", id).await.unwrap().is_empty());

    clock.advance(TimeDelta::hours(1));
    hello.body = "second".into();
    hello.save(&conn).await.unwrap();

    let log = ChangeLog::history(&conn, "post", id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].try_get::<String>("field").unwrap(), "body");
    assert_eq!(log[0].try_get::<String>("old_value").unwrap(), "first");
    assert_eq!(log[0].try_get::<String>("new_value").unwrap(), "second");
    assert_eq!(log[0].try_get::<i64>("user_id").unwrap(), 9);
}

#[tokio::test]
async fn validation_failure_writes_nothing() {
    let (_, conn) = clocked().await;
    Post::create_table(&conn).await.unwrap();

    let mut blank = post("  ", "body");
    let err = blank.save(&conn).await.unwrap_err();
    let errors = err.errors().unwrap();
    assert_eq!(errors.for_field("title").count(), 1);
    assert_eq!(blank.state(), RecordState::New);
    assert_eq!(Post::unscoped().count_rows(&conn).await.unwrap(), 0);
}

#[tokio::test]
async fn permissions_guard_updates_and_removal() {
    let mut conn = Connection::memory().await.unwrap();
    Document::create_table(&conn).await.unwrap();
    let owner = Arc::new(StaticUser::new(1).with_group(10));
    conn.set_current_user(Some(owner.clone()));

    let mut doc = Record::new(Document {
        id: 0,
        title: "plan".into(),
    });
    doc.save(&conn).await.unwrap();
    assert_eq!(doc.get("owner_id"), Some(Value::Int(1)));
    assert_eq!(doc.get("group_id"), Some(Value::Int(10)));
    assert_eq!(doc.get("permissions"), Some(Value::Int(0o744)));

    conn.set_current_user(Some(Arc::new(StaticUser::new(2).with_group(10))));
    doc.title = "hijacked".into();
    let err = doc.save(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::PermissionDenied { ref action, .. } if action == "update"));
    let err = doc.remove(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::PermissionDenied { ref action, .. } if action == "delete"));

    conn.set_current_user(Some(owner));
    doc.save(&conn).await.unwrap();

    conn.set_current_user(Some(Arc::new(StaticUser::new(3).superuser())));
    doc.remove(&conn).await.unwrap();
    assert_eq!(doc.state(), RecordState::Deleted);
    assert_eq!(Document::query().count_rows(&conn).await.unwrap(), 0);
}

#[tokio::test]
async fn soft_delete_still_checks_permissions() {
    let mut conn = Connection::memory().await.unwrap();
    Note::create_table(&conn).await.unwrap();
    conn.set_current_user(Some(Arc::new(StaticUser::new(1).with_group(10))));

    let mut note = Record::new(Note {
        id: 0,
        body: "private".into(),
    });
    note.save(&conn).await.unwrap();

    conn.set_current_user(Some(Arc::new(StaticUser::new(2))));
    let err = note.remove(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::PermissionDenied { ref action, .. } if action == "delete"));
    assert_eq!(note.state(), RecordState::Persisted);
    assert_eq!(note.get("deleted_at"), Some(Value::Null));
    assert_eq!(Note::query().count_rows(&conn).await.unwrap(), 1);

    conn.set_current_user(Some(Arc::new(StaticUser::new(1))));
    note.remove(&conn).await.unwrap();
    assert_eq!(note.state(), RecordState::SoftDeleted);
    assert_eq!(Note::query().count_rows(&conn).await.unwrap(), 0);
}

#[tokio::test]
async fn meta_pairs_follow_their_record() {
    let conn = Connection::memory()
        .await
        .unwrap()
        .with_current_user(Arc::new(StaticUser::new(1)));
    Document::create_table(&conn).await.unwrap();
    let meta = MetaStore::meta();

    let mut doc = Record::new(Document {
        id: 0,
        title: "plan".into(),
    });
    doc.save(&conn).await.unwrap();
    let id = doc.id().unwrap();

    meta.set(&conn, "document", id, "color", "blue").await.unwrap();
    meta.set(&conn, "document", id, "pages", 3).await.unwrap();
    meta.set(&conn, "document", id, "color", "green").await.unwrap();

    assert_eq!(
        meta.get_as::<String>(&conn, "document", id, "color").await.unwrap(),
        Some("green".to_string())
    );
    assert_eq!(meta.get_as::<i64>(&conn, "document", id, "pages").await.unwrap(), Some(3));
    assert_eq!(meta.all(&conn, "document", id).await.unwrap().len(), 2);
    assert!(meta.delete(&conn, "document", id, "pages").await.unwrap());
    assert!(!meta.delete(&conn, "document", id, "pages").await.unwrap());

    doc.remove(&conn).await.unwrap();
    assert!(meta.all(&conn, "document", id).await.unwrap().is_empty());
}

#[tokio::test]
async fn type_table_names_types() {
    let conn = Connection::memory().await.unwrap();
    Document::create_table(&conn).await.unwrap();

    let memo = TypeTable::define(&conn, "document", "memo").await.unwrap();
    let report = TypeTable::define(&conn, "document", "report").await.unwrap();
    assert_eq!(TypeTable::define(&conn, "document", "memo").await.unwrap(), memo);
    assert_ne!(memo, report);

    let mut doc = Record::new(Document {
        id: 0,
        title: "plan".into(),
    });
    doc.set(TypeTable::COLUMN, memo).unwrap();
    doc.save(&conn).await.unwrap();

    let loaded = Document::get(&conn, doc.id().unwrap()).await.unwrap();
    let type_id = loaded.get(TypeTable::COLUMN).and_then(|v| v.as_i64()).unwrap();
    assert_eq!(
        TypeTable::name_of(&conn, "document", type_id).await.unwrap().as_deref(),
        Some("memo")
    );
    assert_eq!(TypeTable::types(&conn, "document").await.unwrap().len(), 2);
}

#[tokio::test]
async fn hard_delete_is_terminal() {
    let conn = Connection::memory().await.unwrap();
    User::create_table(&conn).await.unwrap();

    let mut ada = user("ada", None);
    let err = ada.remove(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidState { .. }));

    ada.save(&conn).await.unwrap();
    let err = ada.restore(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidState { .. }));

    ada.remove(&conn).await.unwrap();
    assert_eq!(ada.state(), RecordState::Deleted);
    assert_eq!(User::query().count_rows(&conn).await.unwrap(), 0);

    let err = ada.save(&conn).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidState { .. }));
}

#[tokio::test]
async fn composite_keys_update_by_tuple() {
    let conn = Connection::memory().await.unwrap();
    Membership::create_table(&conn).await.unwrap();

    for member_id in [1, 2] {
        let mut membership = Record::new(Membership {
            team_id: 7,
            member_id,
            role: "member".into(),
        });
        membership.save(&conn).await.unwrap();
    }

    let mut first: Record<Membership> = Membership::query()
        .eq("team_id", 7)
        .eq("member_id", 1)
        .fetch_one_as(&conn)
        .await
        .unwrap()
        .unwrap();
    first.role = "lead".into();
    first.save(&conn).await.unwrap();

    let roles: Vec<String> = Membership::all(&conn)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.into_entity().role)
        .collect();
    assert_eq!(roles, ["lead", "member"]);

    let err = Membership::find(&conn, 1).await.unwrap_err();
    assert!(matches!(err, OrmError::Schema(_)));
}

#[tokio::test]
async fn create_table_extends_existing_tables() {
    let conn = Connection::memory().await.unwrap();
    conn.exec("CREATE TABLE post (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT)")
        .await
        .unwrap();
    Post::create_table(&conn).await.unwrap();

    let columns = conn.table_columns("post").await.unwrap();
    for column in ["body", "created_at", "updated_at", "deleted_at", "version"] {
        assert!(columns.iter().any(|c| c == column), "missing {column}");
    }
    assert!(conn.table_exists("postversion").await.unwrap());
    assert!(conn.table_exists("postlog").await.unwrap());

    Post::drop_table(&conn).await.unwrap();
    assert!(!conn.table_exists("post").await.unwrap());
    assert!(!conn.table_exists("postlog").await.unwrap());
}

#[test]
fn derived_descriptions() {
    assert_eq!(Post::TABLE, "post");
    assert_eq!(Post::fields(), ["id", "title", "body"]);
    assert_eq!(Membership::primary_keys(), ["team_id", "member_id"]);
    assert_eq!(User::relations()[0].table, "company");
    assert_eq!(Company::relations()[0].name, "employees");

    let aux: Vec<String> = Post::auxiliary_tables()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(aux, ["postversion", "postlog"]);

    let mut post = post("t", "b");
    post.set("title", "renamed").unwrap();
    assert_eq!(post.title, "renamed");
    assert!(post.set("version", 4).is_ok());
    assert_eq!(post.get("version"), Some(Value::Int(4)));
}

#[test]
fn derived_entities_are_registered() {
    let post = registry::by_table("post").unwrap();
    assert_eq!(post.type_name, "Post");
    assert_eq!(post.fields, ["id", "title", "body"]);
    let tables: Vec<&str> = registry::entities().iter().map(|e| e.table).collect();
    for table in ["company", "document", "membership", "post", "tag", "user"] {
        assert!(tables.contains(&table), "{table} not registered");
    }
}
