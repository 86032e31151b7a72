//! PostgreSQL driver backed by `tokio-postgres`.
//!
//! Statements arrive with `:pN` placeholders and are rewritten to `$N` before
//! preparation. Bound values are converted to the parameter types the server
//! inferred, so `Value::Int` can feed an `int4` column and `Value::Text` a
//! `timestamp` column without explicit casts.

use super::{Driver, DriverError, DriverResult, Params};
use crate::dsn::{DriverKind, Dsn};
use crate::error::{OrmError, OrmResult};
use crate::options::ConnectOptions;
use crate::row::Row;
use crate::value::{FromValue, Value};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};

pub struct PostgresDriver {
    client: Client,
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => DriverError::new(format!("{}: {}", db.code().code(), db.message())),
            None => DriverError::new(err.to_string()),
        }
    }
}

impl PostgresDriver {
    pub async fn connect(dsn: &Dsn, options: &ConnectOptions) -> OrmResult<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(dsn.host.as_deref().unwrap_or("localhost"))
            .port(dsn.port.unwrap_or(5432))
            .dbname(&dsn.database);
        if let Some(user) = dsn.user.as_deref().filter(|u| !u.is_empty()) {
            config.user(user);
        }
        if let Some(password) = &dsn.password {
            config.password(password);
        }
        if let Some(timeout) = options.query_timeout {
            config.connect_timeout(timeout);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            OrmError::configuration(format!("cannot connect to '{}': {e}", dsn.redacted()))
        })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(target: "korm.sql", error = %e, "postgres connection closed");
            }
        });

        Ok(Self { client })
    }

    async fn prepare(
        &self,
        sql: &str,
        params: &Params,
    ) -> DriverResult<(tokio_postgres::Statement, Vec<Box<dyn ToSql + Sync + Send>>)> {
        let (rewritten, order) = rewrite_placeholders(sql);
        let stmt = self.client.prepare(&rewritten).await?;

        let mut bound = Vec::with_capacity(order.len());
        for (name, ty) in order.iter().zip(stmt.params()) {
            let value = params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
                .ok_or_else(|| DriverError::new(format!("no value bound for {name}")))?;
            bound.push(to_pg(value, ty)?);
        }
        Ok((stmt, bound))
    }
}

/// Rewrite `:pN` placeholders to `$k`, numbering names by first appearance.
///
/// Quoted strings, quoted identifiers and `::` casts are left alone.
pub(crate) fn rewrite_placeholders(sql: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(sql.len());
    let mut order: Vec<String> = Vec::new();
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            out.push(c);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1) == Some(&'p')
                && chars.get(i + 2).is_some_and(char::is_ascii_digit) =>
            {
                let start = i;
                i += 2;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let index = match order.iter().position(|n| *n == name) {
                    Some(pos) => pos + 1,
                    None => {
                        order.push(name);
                        order.len()
                    }
                };
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    (out, order)
}

fn mismatch(value: &Value, ty: &Type) -> DriverError {
    DriverError::new(format!(
        "cannot bind {} value to parameter of type {ty}",
        value.type_name()
    ))
}

fn to_pg(value: &Value, ty: &Type) -> DriverResult<Box<dyn ToSql + Sync + Send>> {
    fn convert<T: FromValue + ToSql + Sync + Send + 'static>(
        value: &Value,
        ty: &Type,
    ) -> DriverResult<Box<dyn ToSql + Sync + Send>> {
        let typed =
            Option::<T>::from_value(value.clone()).map_err(|_| mismatch(value, ty))?;
        Ok(Box::new(typed))
    }

    match *ty {
        Type::BOOL => convert::<bool>(value, ty),
        Type::INT2 => convert::<i16>(value, ty),
        Type::INT4 => convert::<i32>(value, ty),
        Type::INT8 => convert::<i64>(value, ty),
        Type::FLOAT4 => convert::<f32>(value, ty),
        Type::FLOAT8 => convert::<f64>(value, ty),
        Type::TIMESTAMP => convert::<NaiveDateTime>(value, ty),
        Type::TIMESTAMPTZ => convert::<DateTime<Utc>>(value, ty),
        Type::DATE => convert::<NaiveDate>(value, ty),
        Type::BYTEA => convert::<Vec<u8>>(value, ty),
        Type::NUMERIC => {
            let decimal = match value {
                Value::Null => None,
                Value::Int(n) => Some(Decimal::from(*n)),
                Value::Float(x) => Some(Decimal::from_f64(*x).ok_or_else(|| mismatch(value, ty))?),
                Value::Text(s) => Some(s.trim().parse::<Decimal>().map_err(|_| mismatch(value, ty))?),
                _ => return Err(mismatch(value, ty)),
            };
            Ok(Box::new(decimal))
        }
        Type::JSON | Type::JSONB => Ok(Box::new(match value {
            Value::Null => None,
            Value::Text(s) => Some(serde_json::from_str::<serde_json::Value>(s).unwrap_or_else(|_| value.to_json())),
            other => Some(other.to_json()),
        })),
        _ => match value {
            Value::Null => Ok(Box::new(None::<String>)),
            Value::List(_) => Err(mismatch(value, ty)),
            other => Ok(Box::new(other.to_string())),
        },
    }
}

fn decode_column(row: &tokio_postgres::Row, index: usize) -> DriverResult<Value> {
    let ty = row.columns()[index].type_().clone();
    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index)?.into(),
        Type::INT2 => row.try_get::<_, Option<i16>>(index)?.into(),
        Type::INT4 => row.try_get::<_, Option<i32>>(index)?.into(),
        Type::INT8 => row.try_get::<_, Option<i64>>(index)?.into(),
        Type::OID => row.try_get::<_, Option<u32>>(index)?.into(),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(index)?.into(),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index)?.into(),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(index)?
            .and_then(|d| d.to_f64())
            .into(),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(index)?.into()
        }
        Type::TIMESTAMP => row.try_get::<_, Option<NaiveDateTime>>(index)?.into(),
        Type::TIMESTAMPTZ => row.try_get::<_, Option<DateTime<Utc>>>(index)?.into(),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(index)?.into(),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(index)?
            .map_or(Value::Null, Value::Bytes),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(index)?
            .map(|json| json.to_string())
            .into(),
        other => {
            return Err(DriverError::new(format!(
                "unsupported column type {other} for '{}'",
                row.columns()[index].name()
            )));
        }
    };
    Ok(value)
}

fn refs(bound: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    bound
        .iter()
        .map(|b| &**b as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Driver for PostgresDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Postgres
    }

    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<u64> {
        let (stmt, bound) = self.prepare(sql, params).await?;
        Ok(self.client.execute(&stmt, &refs(&bound)).await?)
    }

    async fn query(&self, sql: &str, params: &Params) -> DriverResult<Vec<Row>> {
        let (stmt, bound) = self.prepare(sql, params).await?;
        let rows = self.client.query(&stmt, &refs(&bound)).await?;

        rows.iter()
            .map(|row| {
                let mut columns = Vec::with_capacity(row.len());
                for (index, column) in row.columns().iter().enumerate() {
                    columns.push((column.name().to_string(), decode_column(row, index)?));
                }
                Ok(Row::new(columns))
            })
            .collect()
    }

    async fn last_insert_id(&self) -> DriverResult<Option<i64>> {
        let row = self.client.query_one("SELECT lastval()", &[]).await?;
        Ok(row.try_get::<_, Option<i64>>(0)?)
    }

    async fn table_columns(&self, table: &str) -> DriverResult<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(DriverError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::rewrite_placeholders;

    #[test]
    fn rewrites_in_order_of_appearance() {
        let (sql, order) = rewrite_placeholders("SELECT * FROM t WHERE a = :p1 AND b = :p0 OR c = :p1");
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2 OR c = $1");
        assert_eq!(order, [":p1", ":p0"]);
    }

    #[test]
    fn leaves_literals_and_casts_alone() {
        let (sql, order) =
            rewrite_placeholders("SELECT ':p0', \"x:p1\", a::text FROM t WHERE b = :p2");
        assert_eq!(sql, "SELECT ':p0', \"x:p1\", a::text FROM t WHERE b = $1");
        assert_eq!(order, [":p2"]);
    }

    #[test]
    fn handles_doubled_quotes() {
        let (sql, _) = rewrite_placeholders("SELECT 'it''s :p0' WHERE a = :p1");
        assert_eq!(sql, "SELECT 'it''s :p0' WHERE a = $1");
    }
}
