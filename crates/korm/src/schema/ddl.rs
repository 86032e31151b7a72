use super::reserved::check_identifier;
use super::{FieldDef, FieldType, TableDef};
use crate::dsn::DriverKind;
use crate::error::{OrmError, OrmResult};

fn column_type(ty: &FieldType, dialect: DriverKind) -> String {
    use DriverKind::*;
    match (ty, dialect) {
        (FieldType::AutoKey, Sqlite) => "INTEGER".into(),
        (FieldType::AutoKey, Mysql) => "INT NOT NULL AUTO_INCREMENT".into(),
        (FieldType::AutoKey, Postgres) => "SERIAL".into(),
        (FieldType::AutoKey, Mssql) => "INT IDENTITY(1,1) NOT NULL".into(),
        (FieldType::Integer, Mysql | Mssql) => "INT".into(),
        (FieldType::Integer, _) => "INTEGER".into(),
        (FieldType::BigInt, _) => "BIGINT".into(),
        (FieldType::Boolean, Mysql) => "TINYINT(1)".into(),
        (FieldType::Boolean, Mssql) => "BIT".into(),
        (FieldType::Boolean, _) => "BOOLEAN".into(),
        (FieldType::Float, Sqlite) => "REAL".into(),
        (FieldType::Float, Mysql) => "DOUBLE".into(),
        (FieldType::Float, Postgres) => "DOUBLE PRECISION".into(),
        (FieldType::Float, Mssql) => "FLOAT".into(),
        (FieldType::Decimal(p, s), Postgres) => format!("NUMERIC({p},{s})"),
        (FieldType::Decimal(p, s), _) => format!("DECIMAL({p},{s})"),
        (FieldType::Varchar(n), Mssql) => format!("NVARCHAR({n})"),
        (FieldType::Varchar(n), _) => format!("VARCHAR({n})"),
        (FieldType::Text, Mssql) => "NVARCHAR(MAX)".into(),
        (FieldType::Text, _) => "TEXT".into(),
        (FieldType::Date, _) => "DATE".into(),
        (FieldType::DateTime, Postgres) => "TIMESTAMP".into(),
        (FieldType::DateTime, Mssql) => "DATETIME2".into(),
        (FieldType::DateTime, _) => "DATETIME".into(),
        (FieldType::Blob, Postgres) => "BYTEA".into(),
        (FieldType::Blob, Mssql) => "VARBINARY(MAX)".into(),
        (FieldType::Blob, _) => "BLOB".into(),
        (FieldType::Raw(sql), _) => sql.clone(),
    }
}

fn column_sql(field: &FieldDef, dialect: DriverKind, inline_key: bool) -> String {
    let mut sql = format!("{} {}", field.name, column_type(&field.ty, dialect));
    if inline_key {
        sql.push_str(" PRIMARY KEY AUTOINCREMENT");
    } else if field.not_null && field.ty != FieldType::AutoKey {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &field.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn validate(def: &TableDef) -> OrmResult<Vec<String>> {
    check_identifier("table", &def.name)?;
    if def.fields.is_empty() {
        return Err(OrmError::schema(format!("table '{}' has no fields", def.name)));
    }
    for field in &def.fields {
        check_identifier("column", &field.name)?;
    }
    let primary_key = def.effective_primary_key();
    for column in &primary_key {
        if !def.has_field(column) {
            return Err(OrmError::schema(format!(
                "primary key column '{column}' is not a field of '{}'",
                def.name
            )));
        }
    }
    for fk in &def.foreign_keys {
        if !def.has_field(&fk.column) {
            return Err(OrmError::schema(format!(
                "foreign key column '{}' is not a field of '{}'",
                fk.column, def.name
            )));
        }
        check_identifier("table", &fk.table)?;
        check_identifier("column", &fk.foreign_column)?;
    }
    Ok(primary_key)
}

/// `CREATE TABLE IF NOT EXISTS ...` for `def`.
///
/// Reserved or malformed names fail here with [`OrmError::Schema`], before
/// anything reaches the server.
pub fn create_table_sql(def: &TableDef, dialect: DriverKind) -> OrmResult<String> {
    let primary_key = validate(def)?;

    // SQLite only auto-increments an inline `INTEGER PRIMARY KEY`.
    let inline_key = dialect == DriverKind::Sqlite
        && primary_key.len() == 1
        && def
            .fields
            .iter()
            .any(|f| f.name == primary_key[0] && f.ty == FieldType::AutoKey);

    let mut parts: Vec<String> = def
        .fields
        .iter()
        .map(|f| column_sql(f, dialect, inline_key && f.name == primary_key[0]))
        .collect();

    if !primary_key.is_empty() && !inline_key {
        parts.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
    }
    for fk in &def.foreign_keys {
        parts.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
            fk.constraint_name(&def.name),
            fk.column,
            fk.table,
            fk.foreign_column
        ));
    }

    let body = parts.join(", ");
    Ok(match dialect {
        DriverKind::Mssql => format!(
            "IF OBJECT_ID(N'{0}', N'U') IS NULL CREATE TABLE {0} ({body})",
            def.name
        ),
        _ => format!("CREATE TABLE IF NOT EXISTS {} ({body})", def.name),
    })
}

pub fn drop_table_sql(table: &str) -> OrmResult<String> {
    check_identifier("table", table)?;
    Ok(format!("DROP TABLE IF EXISTS {table}"))
}

/// Statements adding every field of `def` missing from `existing`.
///
/// Additive only: columns absent from `def` are kept. One statement per
/// column, since SQLite cannot add several in one `ALTER TABLE`.
pub fn alter_table_sql(
    def: &TableDef,
    existing: &[String],
    dialect: DriverKind,
) -> OrmResult<Vec<String>> {
    validate(def)?;
    let add = if dialect == DriverKind::Mssql {
        "ADD"
    } else {
        "ADD COLUMN"
    };
    Ok(def
        .fields
        .iter()
        .filter(|f| !existing.iter().any(|e| e.eq_ignore_ascii_case(&f.name)))
        .map(|f| {
            let mut field = f.clone();
            // An auto key cannot be bolted onto an existing table.
            if field.ty == FieldType::AutoKey {
                field.ty = FieldType::Integer;
            }
            format!("ALTER TABLE {} {add} {}", def.name, column_sql(&field, dialect, false))
        })
        .collect())
}

pub fn create_view_sql(name: &str, select_sql: &str, dialect: DriverKind) -> OrmResult<String> {
    check_identifier("view", name)?;
    if select_sql.trim().is_empty() {
        return Err(OrmError::schema(format!("view '{name}' has an empty query")));
    }
    Ok(match dialect {
        DriverKind::Sqlite => format!("CREATE VIEW IF NOT EXISTS {name} AS {select_sql}"),
        DriverKind::Mssql => format!("CREATE OR ALTER VIEW {name} AS {select_sql}"),
        DriverKind::Mysql | DriverKind::Postgres => {
            format!("CREATE OR REPLACE VIEW {name} AS {select_sql}")
        }
    })
}
