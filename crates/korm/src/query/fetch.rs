//! Execution and result shaping.

use super::{Query, Values};
use crate::connection::Connection;
use crate::error::{OrmError, OrmResult};
use crate::row::{FromRow, Row};
use crate::value::{FromValue, Value, decode};
use std::collections::BTreeMap;

impl Query {
    /// Materialise the result set once; later calls reuse it.
    pub async fn rows(&mut self, conn: &Connection) -> OrmResult<&[Row]> {
        if self.cache.is_none() {
            let (sql, params) = self.select_with_limit(self.limit, conn.driver_kind());
            let rows = conn.query(&sql, &params).await?;
            self.cache = Some(rows);
        }
        Ok(self.cache.as_deref().unwrap_or(&[]))
    }

    /// Every row. Cached: a second call does not hit the database.
    pub async fn fetch_all(&mut self, conn: &Connection) -> OrmResult<Vec<Row>> {
        Ok(self.rows(conn).await?.to_vec())
    }

    /// Every row mapped into `T`.
    pub async fn fetch_all_as<T: FromRow>(&mut self, conn: &Connection) -> OrmResult<Vec<T>> {
        self.rows(conn).await?.iter().map(T::from_row).collect()
    }

    /// First row under `LIMIT 1`, or `None`.
    pub async fn fetch_one(&self, conn: &Connection) -> OrmResult<Option<Row>> {
        let (sql, params) = self.select_with_limit(Some(1), conn.driver_kind());
        Ok(conn.query(&sql, &params).await?.into_iter().next())
    }

    pub async fn fetch_one_as<T: FromRow>(&self, conn: &Connection) -> OrmResult<Option<T>> {
        self.fetch_one(conn).await?.as_ref().map(T::from_row).transpose()
    }

    /// The row when the result set has exactly one; `None` for zero or more.
    ///
    /// Unlike [`Query::fetch_one`] this is an assertion about the data: two
    /// matching rows yield `None`, not the first of them. The query's own
    /// limit is replaced by 2 so a second match is always seen.
    pub async fn fetch_only_one(&self, conn: &Connection) -> OrmResult<Option<Row>> {
        let (sql, params) = self.select_with_limit(Some(2), conn.driver_kind());
        let mut rows = conn.query(&sql, &params).await?;
        Ok(if rows.len() == 1 { rows.pop() } else { None })
    }

    /// Column 0 of row 0, or `None` without rows.
    pub async fn fetch_value<T: FromValue>(&self, conn: &Connection) -> OrmResult<Option<T>> {
        let Some(row) = self.fetch_one(conn).await? else {
            return Ok(None);
        };
        let (column, value) = row
            .iter()
            .next()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .ok_or_else(|| OrmError::decode("0", "row has no columns"))?;
        decode(&column, value).map(Some)
    }

    /// Key/value map from a two-column result. Later rows win on duplicate keys.
    pub async fn fetch_map<K, V>(&self, conn: &Connection) -> OrmResult<BTreeMap<K, V>>
    where
        K: FromValue + Ord,
        V: FromValue,
    {
        let (sql, params) = self.select_with_limit(self.limit, conn.driver_kind());
        let rows = conn.query(&sql, &params).await?;
        let mut map = BTreeMap::new();
        for row in rows {
            if row.len() != 2 {
                return Err(OrmError::decode(
                    "*",
                    format!("fetch_map needs exactly two columns, got {}", row.len()),
                ));
            }
            let mut pairs = row.into_iter();
            let (Some((kc, key)), Some((vc, value))) = (pairs.next(), pairs.next()) else {
                continue;
            };
            map.insert(decode::<K>(&kc, key)?, decode::<V>(&vc, value)?);
        }
        Ok(map)
    }

    /// Number of rows in the materialised result set.
    pub async fn count(&mut self, conn: &Connection) -> OrmResult<usize> {
        Ok(self.rows(conn).await?.len())
    }

    /// `SELECT COUNT(*)` without materialising anything.
    pub async fn count_rows(&self, conn: &Connection) -> OrmResult<i64> {
        let (sql, params) = self.to_count_sql();
        let rows = conn.query(&sql, &params).await?;
        match rows.first().and_then(|r| r.value_at(0)).cloned() {
            Some(value) => decode("count", value),
            None => Ok(0),
        }
    }

    /// INSERT one row into the query's table; returns the generated key if any.
    pub async fn insert(&mut self, conn: &Connection, values: Values) -> OrmResult<Option<i64>> {
        self.cache = None;
        let (sql, params) = self.to_insert_sql(&values)?;
        let key = if values.iter().any(|(c, _)| c == "id") {
            None
        } else {
            Some("id")
        };
        let (_, id) = conn.insert(&sql, &params, key).await?;
        Ok(id)
    }

    /// UPDATE the matching rows; returns the affected count.
    pub async fn update(&mut self, conn: &Connection, values: Values) -> OrmResult<u64> {
        self.cache = None;
        let (sql, params) = self.to_update_sql(&values)?;
        conn.execute(&sql, &params).await
    }

    /// DELETE the matching rows; returns the affected count.
    pub async fn delete(&mut self, conn: &Connection) -> OrmResult<u64> {
        self.cache = None;
        let (sql, params) = self.to_delete_sql()?;
        conn.execute(&sql, &params).await
    }

    /// Values of column `column` across the materialised rows.
    pub async fn pluck<T: FromValue>(&mut self, conn: &Connection, column: &str) -> OrmResult<Vec<T>> {
        self.rows(conn)
            .await?
            .iter()
            .map(|row| decode(column, row.get(column).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}
