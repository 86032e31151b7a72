use super::*;
use crate::driver::testing::connection;
use crate::options::ConnectOptions;
use std::collections::BTreeMap;

#[test]
fn select_basic() {
    assert_eq!(Query::from("user").to_sql(), "SELECT * FROM user");
    assert_eq!(
        Query::from_alias("user", "u").fields(["u.id", "u.name"]).to_sql(),
        "SELECT u.id, u.name FROM user AS u"
    );
}

#[test]
fn filter_infers_operator() {
    let q = Query::from("user")
        .filter("company_id", Value::Null)
        .filter("id", vec![1, 2, 3])
        .filter("name", "jo%")
        .filter("email", "a@b.c");
    assert_eq!(
        q.to_sql(),
        "SELECT * FROM user WHERE company_id IS NULL AND id IN (:p0, :p1, :p2) \
         AND name LIKE :p3 AND email = :p4"
    );
    let params = q.params();
    assert_eq!(params.len(), 5);
    assert_eq!(params[3], (":p3".to_string(), Value::Text("jo%".into())));
}

#[test]
fn none_filters_as_is_null() {
    let q = Query::from("user").filter("company_id", None::<i64>);
    assert_eq!(q.to_sql(), "SELECT * FROM user WHERE company_id IS NULL");
    assert!(q.params().is_empty());
}

#[test]
fn any_switches_the_whole_query_to_or() {
    let q = Query::from("user").eq("name", "a").eq("name", "b").any();
    assert_eq!(q.to_sql(), "SELECT * FROM user WHERE name = :p0 OR name = :p1");
}

#[test]
fn scopes_stay_anded_under_or() {
    let q = Query::from("post")
        .scope(Expr::is_null("deleted_at"))
        .eq("title", "a")
        .eq("title", "b")
        .any();
    assert_eq!(
        q.to_sql(),
        "SELECT * FROM post WHERE deleted_at IS NULL AND (title = :p0 OR title = :p1)"
    );
    assert_eq!(
        Query::from("post").scope(Expr::is_null("deleted_at")).to_sql(),
        "SELECT * FROM post WHERE deleted_at IS NULL"
    );
}

#[test]
fn dotted_keys_join_implicitly() {
    let q = Query::from("user")
        .filter("company.name", "Acme")
        .order_by("company.name", Order::Desc);
    assert_eq!(
        q.to_sql(),
        "SELECT user.* FROM user LEFT JOIN company ON company.id = user.company_id \
         WHERE company.name = :p0 ORDER BY company.name DESC"
    );
}

#[test]
fn implicit_join_uses_alias() {
    let q = Query::from_alias("user", "u").filter("company.name", "Acme");
    assert_eq!(
        q.to_sql(),
        "SELECT u.* FROM user AS u LEFT JOIN company ON company.id = u.company_id \
         WHERE company.name = :p0"
    );
}

#[test]
fn scopes_follow_the_main_alias() {
    let guard = Expr::is_null("post.deleted_at");
    let expected = "SELECT * FROM post AS p WHERE p.deleted_at IS NULL AND p.title = :p0";
    assert_eq!(
        Query::from_alias("post", "p").scope(guard.clone()).eq("p.title", "a").to_sql(),
        expected
    );
    assert_eq!(
        Query::from("post").scope(guard).alias("p").eq("p.title", "a").to_sql(),
        expected
    );
    let other = Query::from_alias("post", "p").scope(Expr::is_null("author.banned_at"));
    assert!(other.to_sql().contains("author.banned_at IS NULL"));
}

#[test]
fn explicit_join_suppresses_implicit_one() {
    let q = Query::from("user")
        .filter("company.name", "Acme")
        .inner_join("company", "company.id = user.employer_id");
    assert_eq!(
        q.to_sql(),
        "SELECT user.* FROM user INNER JOIN company ON company.id = user.employer_id \
         WHERE company.name = :p0"
    );

    let q = Query::from("user")
        .left_join("company c", "c.id = user.company_id")
        .filter("c.name", "Acme");
    assert_eq!(q.effective_joins().len(), 1);
}

#[test]
fn main_table_keys_do_not_join() {
    let q = Query::from("user").filter("user.id", 1);
    assert_eq!(q.to_sql(), "SELECT * FROM user WHERE user.id = :p0");
}

#[test]
fn duplicate_explicit_joins_are_dropped() {
    let q = Query::from("user")
        .left_join("company", "company.id = user.company_id")
        .left_join("company", "company.id = user.company_id");
    assert_eq!(q.effective_joins().len(), 1);
}

#[test]
fn raw_fragments_are_parenthesised_among_others() {
    let q = Query::from("user").filter_raw("a = 1 OR b = 2").eq("c", 3);
    assert_eq!(q.to_sql(), "SELECT * FROM user WHERE (a = 1 OR b = 2) AND c = :p0");
    let q = Query::from("user").filter_raw("a = 1");
    assert_eq!(q.to_sql(), "SELECT * FROM user WHERE a = 1");
}

#[test]
fn template_binds_values() {
    let q = Query::from("product").filter_template("price BETWEEN ? AND ?", [10, 20]);
    assert_eq!(q.to_sql(), "SELECT * FROM product WHERE price BETWEEN :p0 AND :p1");
}

#[test]
fn group_order_and_paging() {
    let q = Query::from("user")
        .fields(["company_id", "COUNT(*) AS n"])
        .group_by("company_id")
        .order_by("n", Order::Desc)
        .page(3, 20);
    assert_eq!(
        q.to_sql(),
        "SELECT company_id, COUNT(*) AS n FROM user GROUP BY company_id ORDER BY n DESC \
         LIMIT 20 OFFSET 40"
    );
}

#[test]
fn paging_per_dialect() {
    let q = Query::from("user").offset(5);
    assert_eq!(q.to_sql(), "SELECT * FROM user LIMIT -1 OFFSET 5");
    assert_eq!(q.to_sql_for(DriverKind::Postgres), "SELECT * FROM user OFFSET 5");
    let q = Query::from("user").limit(10).offset(5);
    assert_eq!(
        q.to_sql_for(DriverKind::Mssql),
        "SELECT * FROM user ORDER BY (SELECT NULL) OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY"
    );
}

#[test]
fn reset_keeps_table_and_scopes() {
    let q = Query::from("post")
        .scope(Expr::is_null("deleted_at"))
        .eq("id", 1)
        .limit(1)
        .any()
        .reset();
    assert_eq!(q.to_sql(), "SELECT * FROM post WHERE deleted_at IS NULL");
}

#[test]
fn mutation_statements() {
    let q = Query::from("user").eq("id", 7);
    let (sql, params) = q
        .to_insert_sql(&values([("name", Value::from("a")), ("company_id", Value::Null)]))
        .unwrap();
    assert_eq!(sql, "INSERT INTO user (name, company_id) VALUES (:p0, :p1)");
    assert_eq!(params[1].1, Value::Null);

    let (sql, params) = q.to_update_sql(&values([("name", "b")])).unwrap();
    assert_eq!(sql, "UPDATE user SET name = :p0 WHERE id = :p1");
    assert_eq!(params[1].1, Value::Int(7));

    let (sql, _) = q.to_delete_sql().unwrap();
    assert_eq!(sql, "DELETE FROM user WHERE id = :p0");
}

#[test]
fn unconditioned_mutations_match_nothing() {
    let q = Query::from("user");
    assert_eq!(q.to_delete_sql().unwrap().0, "DELETE FROM user WHERE 1=0");
    assert_eq!(
        q.to_update_sql(&values([("name", "x")])).unwrap().0,
        "UPDATE user SET name = :p0 WHERE 1=0"
    );
    assert!(q.to_insert_sql(&[]).is_err());
}

#[test]
fn joined_mutations_are_rejected() {
    let q = Query::from("user").filter("company.name", "x");
    assert!(matches!(
        q.to_delete_sql(),
        Err(OrmError::InvalidState { .. })
    ));
}

#[test]
fn count_sql() {
    let q = Query::from("user").eq("company_id", 1).order_by("name", Order::Asc).limit(5);
    assert_eq!(
        q.to_count_sql().0,
        "SELECT COUNT(*) AS count FROM user WHERE company_id = :p0"
    );
    let q = Query::from("user").group_by("company_id");
    assert_eq!(
        q.to_count_sql().0,
        "SELECT COUNT(*) AS count FROM (SELECT company_id FROM user GROUP BY company_id) AS grouped"
    );
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(c, v)| (c.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn fetch_all_is_cached() {
    let (driver, conn) = connection(ConnectOptions::default());
    driver.push_rows(vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])]);

    let mut q = Query::from("user");
    let first = q.fetch_all(&conn).await.unwrap();
    let second = q.fetch_all(&conn).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(q.count(&conn).await.unwrap(), 2);
    assert_eq!(driver.statements().len(), 1);

    let ids: Vec<i64> = (&q).into_iter().map(|r| r.try_get("id").unwrap()).collect();
    assert_eq!(ids, [1, 2]);

    // Any builder call drops the cache.
    let mut q = q.limit(1);
    assert!(q.cached().is_none());
    q.fetch_all(&conn).await.unwrap();
    assert_eq!(driver.statements().len(), 2);
}

#[tokio::test]
async fn fetch_one_applies_limit() {
    let (driver, conn) = connection(ConnectOptions::default());
    driver.push_rows(vec![row(&[("name", Value::from("ann"))])]);
    let one = Query::from("user").eq("id", 1).fetch_one(&conn).await.unwrap();
    assert_eq!(one.unwrap().try_get::<String>("name").unwrap(), "ann");
    assert_eq!(
        driver.statements(),
        ["SELECT * FROM user WHERE id = :p0 LIMIT 1"]
    );
    assert!(Query::from("user").fetch_one(&conn).await.unwrap().is_none());
}

#[tokio::test]
async fn fetch_only_one_requires_exactly_one() {
    let (driver, conn) = connection(ConnectOptions::default());
    let q = Query::from("user");

    driver.push_rows(vec![]);
    assert!(q.fetch_only_one(&conn).await.unwrap().is_none());

    driver.push_rows(vec![row(&[("id", Value::Int(1))])]);
    assert!(q.fetch_only_one(&conn).await.unwrap().is_some());

    driver.push_rows(vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])]);
    assert!(q.fetch_only_one(&conn).await.unwrap().is_none());
    assert_eq!(driver.statements()[2], "SELECT * FROM user LIMIT 2");

    driver.push_rows(vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])]);
    assert!(Query::from("user").limit(1).fetch_only_one(&conn).await.unwrap().is_none());
    assert_eq!(driver.statements()[3], "SELECT * FROM user LIMIT 2");
}

#[tokio::test]
async fn fetch_map_and_value() {
    let (driver, conn) = connection(ConnectOptions::default());
    driver.push_rows(vec![
        row(&[("id", Value::Int(1)), ("name", Value::from("a"))]),
        row(&[("id", Value::Int(2)), ("name", Value::from("b"))]),
    ]);
    let map: BTreeMap<i64, String> = Query::from("user")
        .fields(["id", "name"])
        .fetch_map(&conn)
        .await
        .unwrap();
    assert_eq!(map.get(&2).map(String::as_str), Some("b"));

    driver.push_rows(vec![row(&[("id", Value::Int(1))])]);
    let err = Query::from("user")
        .fetch_map::<i64, String>(&conn)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Decode { .. }));

    driver.push_rows(vec![row(&[("n", Value::Int(42))])]);
    let n: Option<i64> = Query::from("user")
        .fields(["COUNT(*) AS n"])
        .fetch_value(&conn)
        .await
        .unwrap();
    assert_eq!(n, Some(42));
}

#[tokio::test]
async fn mutations_invalidate_cache() {
    let (driver, conn) = connection(ConnectOptions::default());
    let mut q = Query::from("user").eq("id", 1);
    q.fetch_all(&conn).await.unwrap();
    q.update(&conn, values([("name", "x")])).await.unwrap();
    assert!(q.cached().is_none());
    assert_eq!(
        driver.statements()[1],
        "UPDATE user SET name = :p0 WHERE id = :p1"
    );
}
