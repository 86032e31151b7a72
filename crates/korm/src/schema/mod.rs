//! Table definitions and DDL generation.
//!
//! Columns can be typed explicitly or left to [`guess_type`], which derives a
//! column type from the field name:
//!
//! | name | type |
//! |---|---|
//! | `id` | auto-increment key |
//! | `*_id`, `*_count`, `*_num` | integer |
//! | `*_at`, `birthday` | datetime |
//! | `*_date` | date |
//! | `is_*`, `has_*` | boolean |
//! | `*_price` | decimal(10,2) |
//! | `description`, `content`, `body`, `text`, `data` | text |
//! | anything else | varchar(255) |
//!
//! Explicitly typed fields bypass the heuristic.

mod ddl;
mod reserved;

pub use ddl::{alter_table_sql, create_table_sql, create_view_sql, drop_table_sql};
pub use reserved::{RESERVED_WORDS, check_identifier, is_reserved};

/// Column type, rendered per dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// Auto-incrementing integer key.
    AutoKey,
    Integer,
    BigInt,
    Boolean,
    Float,
    /// `DECIMAL(precision, scale)`
    Decimal(u8, u8),
    Varchar(u16),
    Text,
    Date,
    DateTime,
    Blob,
    /// Literal SQL type, emitted as-is.
    Raw(String),
}

/// Derive a column type from a field name.
pub fn guess_type(name: &str) -> FieldType {
    let name = name.to_ascii_lowercase();
    if name == "id" {
        FieldType::AutoKey
    } else if name.ends_with("_id") || name.ends_with("_count") || name.ends_with("_num") {
        FieldType::Integer
    } else if name.ends_with("_at") || name == "birthday" {
        FieldType::DateTime
    } else if name.ends_with("_date") {
        FieldType::Date
    } else if name.starts_with("is_") || name.starts_with("has_") {
        FieldType::Boolean
    } else if name.ends_with("_price") || name == "price" {
        FieldType::Decimal(10, 2)
    } else if matches!(
        name.as_str(),
        "description" | "content" | "body" | "text" | "data"
    ) {
        FieldType::Text
    } else {
        FieldType::Varchar(255)
    }
}

/// One column of a [`TableDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub not_null: bool,
    /// Literal SQL default expression.
    pub default: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            not_null: false,
            default: None,
        }
    }

    /// A field typed by [`guess_type`].
    pub fn guessed(name: impl Into<String>) -> Self {
        let name = name.into();
        let ty = guess_type(&name);
        Self::new(name, ty)
    }
}

/// `FOREIGN KEY (column) REFERENCES table(foreign_column)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub table: String,
    pub foreign_column: String,
}

impl ForeignKey {
    /// Constraint name: `fk_<table>_<column>_<foreign_column>`.
    pub fn constraint_name(&self, owner: &str) -> String {
        format!("fk_{owner}_{}_{}", self.column, self.foreign_column)
    }
}

/// Description of one table.
///
/// ```ignore
/// let def = TableDef::new("user")
///     .fields(["id", "name", "company_id", "created_at"])
///     .typed("bio", FieldType::Text)
///     .foreign_key("company_id", "company", "id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    /// Defaults to `["id"]` when an `id` field exists.
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a field typed by the name heuristic. Duplicates are ignored.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.push(FieldDef::guessed(name))
    }

    /// Add several heuristically typed fields.
    pub fn fields<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |def, name| def.field(name))
    }

    /// Add an explicitly typed field, replacing a guessed one with the same name.
    pub fn typed(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.ty = ty,
            None => self.fields.push(FieldDef::new(name, ty)),
        }
        self
    }

    pub fn push(mut self, field: FieldDef) -> Self {
        if !self.has_field(&field.name) {
            self.fields.push(field);
        }
        self
    }

    pub fn not_null(mut self, name: &str) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.not_null = true;
        }
        self
    }

    pub fn default_value(mut self, name: &str, sql: impl Into<String>) -> Self {
        if let Some(field) = self.fields.iter_mut().find(|f| f.name == name) {
            field.default = Some(sql.into());
        }
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            table: table.into(),
            foreign_column: foreign_column.into(),
        });
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Explicit primary key, or `id` when present.
    pub fn effective_primary_key(&self) -> Vec<String> {
        if !self.primary_key.is_empty() {
            self.primary_key.clone()
        } else if self.has_field("id") {
            vec!["id".to_string()]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_types() {
        assert_eq!(guess_type("id"), FieldType::AutoKey);
        assert_eq!(guess_type("company_id"), FieldType::Integer);
        assert_eq!(guess_type("created_at"), FieldType::DateTime);
        assert_eq!(guess_type("birthday"), FieldType::DateTime);
        assert_eq!(guess_type("start_date"), FieldType::Date);
        assert_eq!(guess_type("is_active"), FieldType::Boolean);
        assert_eq!(guess_type("has_children"), FieldType::Boolean);
        assert_eq!(guess_type("unit_price"), FieldType::Decimal(10, 2));
        assert_eq!(guess_type("view_count"), FieldType::Integer);
        assert_eq!(guess_type("page_num"), FieldType::Integer);
        assert_eq!(guess_type("description"), FieldType::Text);
        assert_eq!(guess_type("body"), FieldType::Text);
        assert_eq!(guess_type("name"), FieldType::Varchar(255));
    }

    #[test]
    fn explicit_type_overrides_guess() {
        let def = TableDef::new("post")
            .fields(["id", "summary"])
            .typed("summary", FieldType::Text);
        assert_eq!(def.fields[1].ty, FieldType::Text);
        assert_eq!(def.fields.len(), 2);
    }

    #[test]
    fn duplicate_guessed_fields_are_ignored() {
        let def = TableDef::new("t").fields(["id", "name", "name"]);
        assert_eq!(def.fields.len(), 2);
    }

    #[test]
    fn default_primary_key_is_id() {
        assert_eq!(TableDef::new("t").field("id").effective_primary_key(), ["id"]);
        assert!(TableDef::new("t").field("name").effective_primary_key().is_empty());
        assert_eq!(
            TableDef::new("t")
                .fields(["a_id", "b_id"])
                .primary_key(["a_id", "b_id"])
                .effective_primary_key(),
            ["a_id", "b_id"]
        );
    }
}
