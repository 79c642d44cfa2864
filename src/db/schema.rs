//! Entity schema reconciliation.
//!
//! An [`Entity`] describes the table it maps to as a static list of
//! [`FieldDescriptor`]s. Reconciliation compares that description with the
//! live columns reported by `information_schema` and, depending on the
//! [`SchemaMode`], creates, alters or validates the table.
//!
//! # Architecture
//!
//! DDL planning is pure: [`plan_create`], [`plan_drop`], [`plan_update`] and
//! [`validate`] take the entity description and the live columns and return
//! statements or an error. The client executes the plan through its normal
//! statement path, so reconciliation DDL shows up in verbose logging like any
//! other statement.
//!
//! # Type comparison
//!
//! `UPDATE` compares each field's expected column type against the live
//! `COLUMN_TYPE` case-insensitively, as an exact string. Expected types use the
//! spelling MySQL 8 reports (`int`, `decimal(10,0)`, `char(1)`), not the DDL
//! spelling. Columns are never dropped.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the field that becomes the auto-increment primary key.
pub const PRIMARY_KEY_FIELD: &str = "id";

/// What [`crate::Client::reconcile_schema`] does for an entity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Drop the table if present, then create it fresh.
    Create,
    /// Create as above, then drop again.
    CreateAndDrop,
    /// Add missing columns and modify mistyped ones.
    Update,
    /// Check column count and names without touching the table.
    Validate,
    /// Do nothing.
    #[default]
    None,
}

impl FromStr for SchemaMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "create" => Ok(Self::Create),
            "create_and_drop" | "create_drop" => Ok(Self::CreateAndDrop),
            "update" => Ok(Self::Update),
            "validate" => Ok(Self::Validate),
            "none" => Ok(Self::None),
            other => Err(DbError::config(format!("Unknown schema mode: {other}"))),
        }
    }
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::CreateAndDrop => "create_and_drop",
            Self::Update => "update",
            Self::Validate => "validate",
            Self::None => "none",
        })
    }
}

/// Semantic type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    BigInt,
    SmallInt,
    TinyInt,
    Float,
    Double,
    Decimal,
    Bool,
    Text,
    Char,
    Date,
    DateTime,
    Timestamp,
    Time,
    Bytes,
    /// A type with no column mapping. Reconciling an entity with such a field
    /// fails with [`DbError::UnmappedFieldType`].
    Unmapped,
}

impl FieldKind {
    /// Column type used in DDL.
    pub fn sql_type(self) -> Option<&'static str> {
        Some(match self {
            Self::Int => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::SmallInt => "SMALLINT",
            Self::TinyInt => "TINYINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Bool => "BIT(1)",
            Self::Text => "VARCHAR(255)",
            Self::Char => "CHAR",
            Self::Date => "DATE",
            Self::DateTime => "DATETIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Time => "TIME",
            Self::Bytes => "LONGBLOB",
            Self::Unmapped => return None,
        })
    }

    /// Column type as reported by `information_schema.COLUMNS.COLUMN_TYPE`.
    pub fn reported_type(self) -> Option<&'static str> {
        Some(match self {
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::SmallInt => "smallint",
            Self::TinyInt => "tinyint",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal(10,0)",
            Self::Bool => "bit(1)",
            Self::Text => "varchar(255)",
            Self::Char => "char(1)",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Time => "time",
            Self::Bytes => "longblob",
            Self::Unmapped => return None,
        })
    }
}

/// One field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }

    pub fn is_primary_key(&self) -> bool {
        self.name == PRIMARY_KEY_FIELD
    }
}

/// A type that maps onto one table.
///
/// Usually implemented with [`impl_entity!`](crate::impl_entity).
pub trait Entity {
    /// Table name; the lower-cased type name by convention.
    fn table_name() -> String;

    /// Fields in declaration order.
    fn fields() -> &'static [FieldDescriptor];
}

/// A live column: name and declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    #[serde(rename = "COLUMN_NAME")]
    pub name: String,
    #[serde(rename = "COLUMN_TYPE")]
    pub sql_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// SQL queries for catalog introspection.
pub(crate) mod queries {
    pub const LIVE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;
}

const PRIMARY_KEY_DEFINITION: &str = "id INT UNSIGNED NOT NULL AUTO_INCREMENT";
const PRIMARY_KEY_REPORTED_TYPE: &str = "int unsigned";

fn ddl_type(table: &str, field: &FieldDescriptor) -> DbResult<&'static str> {
    field
        .kind
        .sql_type()
        .ok_or_else(|| DbError::unmapped_field_type(table, field.name))
}

/// Fail before any DDL runs if a non-key field has no type mapping.
fn check_mapped(table: &str, fields: &[FieldDescriptor]) -> DbResult<()> {
    for field in fields.iter().filter(|f| !f.is_primary_key()) {
        ddl_type(table, field)?;
    }
    Ok(())
}

fn column_definition(table: &str, field: &FieldDescriptor) -> DbResult<String> {
    Ok(format!("{} {} NOT NULL", field.name, ddl_type(table, field)?))
}

/// `CREATE TABLE` for the entity's fields.
pub fn plan_create(table: &str, fields: &[FieldDescriptor]) -> DbResult<String> {
    check_mapped(table, fields)?;

    let definitions = fields
        .iter()
        .map(|field| {
            if field.is_primary_key() {
                Ok(format!("{PRIMARY_KEY_DEFINITION},\n    PRIMARY KEY(id)"))
            } else {
                column_definition(table, field)
            }
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(format!(
        "CREATE TABLE {table} (\n    {}\n)",
        definitions.join(",\n    ")
    ))
}

pub fn plan_drop(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

/// `ALTER TABLE` adding missing fields and modifying mistyped ones, or `None`
/// when every field already matches.
pub fn plan_update(
    table: &str,
    fields: &[FieldDescriptor],
    live: &[ColumnDescriptor],
) -> DbResult<Option<String>> {
    check_mapped(table, fields)?;

    let mut clauses = Vec::new();
    for field in fields {
        let existing = live
            .iter()
            .find(|col| col.name.eq_ignore_ascii_case(field.name));

        let (expected, definition) = if field.is_primary_key() {
            (PRIMARY_KEY_REPORTED_TYPE, PRIMARY_KEY_DEFINITION.to_string())
        } else {
            // check_mapped guarantees a reported type
            let expected = field.kind.reported_type().unwrap_or_default();
            (expected, column_definition(table, field)?)
        };

        match existing {
            None if field.is_primary_key() => {
                clauses.push(format!("ADD COLUMN {definition} PRIMARY KEY"));
            }
            None => clauses.push(format!("ADD COLUMN {definition}")),
            Some(col) if !col.sql_type.eq_ignore_ascii_case(expected) => {
                clauses.push(format!("MODIFY {definition}"));
            }
            Some(_) => {}
        }
    }

    if clauses.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!("ALTER TABLE {table}\n{}", clauses.join(",\n"))))
}

/// Check that the live table has exactly the entity's fields, by name.
/// Types are not compared.
pub fn validate(table: &str, fields: &[FieldDescriptor], live: &[ColumnDescriptor]) -> DbResult<()> {
    if live.len() != fields.len() {
        return Err(DbError::schema_mismatch(
            table,
            format!(
                "entity has {} fields but table has {} columns",
                fields.len(),
                live.len()
            ),
        ));
    }

    for field in fields {
        if !live.iter().any(|col| col.name.eq_ignore_ascii_case(field.name)) {
            return Err(DbError::schema_mismatch(
                table,
                format!("field '{}' not found among table columns", field.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &[FieldDescriptor] = &[
        FieldDescriptor::new("id", FieldKind::BigInt),
        FieldDescriptor::new("title", FieldKind::Text),
        FieldDescriptor::new("body", FieldKind::Text),
        FieldDescriptor::new("createdDate", FieldKind::DateTime),
        FieldDescriptor::new("isBlind", FieldKind::Bool),
    ];

    fn live_article() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", "int unsigned"),
            ColumnDescriptor::new("title", "varchar(255)"),
            ColumnDescriptor::new("body", "varchar(255)"),
            ColumnDescriptor::new("createdDate", "datetime"),
            ColumnDescriptor::new("isBlind", "bit(1)"),
        ]
    }

    #[test]
    fn test_plan_create() {
        let sql = plan_create("article", ARTICLE).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE article (\n    \
             id INT UNSIGNED NOT NULL AUTO_INCREMENT,\n    \
             PRIMARY KEY(id),\n    \
             title VARCHAR(255) NOT NULL,\n    \
             body VARCHAR(255) NOT NULL,\n    \
             createdDate DATETIME NOT NULL,\n    \
             isBlind BIT(1) NOT NULL\n)"
        );
    }

    #[test]
    fn test_plan_drop() {
        assert_eq!(plan_drop("article"), "DROP TABLE IF EXISTS article");
    }

    #[test]
    fn test_unmapped_field_rejected_before_ddl() {
        let fields = &[
            FieldDescriptor::new("id", FieldKind::Int),
            FieldDescriptor::new("tags", FieldKind::Unmapped),
        ];
        let err = plan_create("post", fields).unwrap_err();
        assert!(matches!(err, DbError::UnmappedFieldType { ref field, .. } if field == "tags"));
        assert!(plan_update("post", fields, &[]).is_err());
    }

    #[test]
    fn test_plan_update_no_changes() {
        assert_eq!(plan_update("article", ARTICLE, &live_article()).unwrap(), None);
    }

    #[test]
    fn test_plan_update_type_compare_ignores_case() {
        let mut live = live_article();
        live[1].sql_type = "VARCHAR(255)".to_string();
        assert_eq!(plan_update("article", ARTICLE, &live).unwrap(), None);
    }

    #[test]
    fn test_plan_update_adds_one_missing_column() {
        let live: Vec<_> = live_article()
            .into_iter()
            .filter(|c| c.name != "isBlind")
            .collect();
        let sql = plan_update("article", ARTICLE, &live).unwrap().unwrap();
        assert_eq!(sql, "ALTER TABLE article\nADD COLUMN isBlind BIT(1) NOT NULL");
        assert_eq!(sql.matches("ADD COLUMN").count(), 1);
        assert!(!sql.contains("MODIFY"));
    }

    #[test]
    fn test_plan_update_modifies_mistyped_column() {
        let mut live = live_article();
        live[2].sql_type = "text".to_string();
        let sql = plan_update("article", ARTICLE, &live).unwrap().unwrap();
        assert_eq!(sql, "ALTER TABLE article\nMODIFY body VARCHAR(255) NOT NULL");
    }

    #[test]
    fn test_plan_update_keeps_extra_columns() {
        let mut live = live_article();
        live.push(ColumnDescriptor::new("legacy", "int"));
        assert_eq!(plan_update("article", ARTICLE, &live).unwrap(), None);
    }

    #[test]
    fn test_plan_update_primary_key() {
        let mut live = live_article();
        live[0].sql_type = "bigint".to_string();
        let sql = plan_update("article", ARTICLE, &live).unwrap().unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE article\nMODIFY id INT UNSIGNED NOT NULL AUTO_INCREMENT"
        );
    }

    #[test]
    fn test_validate() {
        assert!(validate("article", ARTICLE, &live_article()).is_ok());

        let short = &live_article()[..4];
        let err = validate("article", ARTICLE, short).unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch { .. }));

        let mut renamed = live_article();
        renamed[4].name = "blind".to_string();
        let err = validate("article", ARTICLE, &renamed).unwrap_err();
        assert!(err.to_string().contains("isBlind"));
    }

    #[test]
    fn test_validate_ignores_types() {
        let mut live = live_article();
        live[1].sql_type = "text".to_string();
        assert!(validate("article", ARTICLE, &live).is_ok());
    }

    #[test]
    fn test_schema_mode_parse() {
        assert_eq!("UPDATE".parse::<SchemaMode>().unwrap(), SchemaMode::Update);
        assert_eq!(
            "create-and-drop".parse::<SchemaMode>().unwrap(),
            SchemaMode::CreateAndDrop
        );
        assert_eq!(SchemaMode::CreateAndDrop.to_string(), "create_and_drop");
        assert!("bogus".parse::<SchemaMode>().is_err());
    }
}
