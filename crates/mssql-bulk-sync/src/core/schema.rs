//! Table shape snapshots read from the live schema.

use serde::{Deserialize, Serialize};

use super::identifier::TableName;
use super::value::SqlNullType;
use crate::error::{BulkSyncError, Result};

/// SQL Server's limit on columns per table.
pub const MAX_TABLE_COLUMNS: usize = 1024;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeColumn {
    /// Column name.
    pub name: String,

    /// Base type name (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Maximum length in characters for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric or fractional-seconds scale.
    pub scale: i32,

    pub is_nullable: bool,
    pub is_identity: bool,
    pub is_primary_key: bool,

    /// Computed columns cannot be written.
    pub is_computed: bool,
}

impl ShapeColumn {
    /// Convenience constructor for a plain nullable column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            is_primary_key: false,
            is_computed: false,
        }
    }

    /// Semantic type used to type NULLs and coerce values during load.
    pub fn semantic_type(&self) -> SqlNullType {
        match self.data_type.to_lowercase().as_str() {
            "bit" => SqlNullType::Bool,
            "tinyint" | "smallint" => SqlNullType::I16,
            "int" => SqlNullType::I32,
            "bigint" => SqlNullType::I64,
            "real" => SqlNullType::F32,
            "float" => SqlNullType::F64,
            "decimal" | "numeric" | "money" | "smallmoney" => SqlNullType::Decimal,
            "uniqueidentifier" => SqlNullType::Uuid,
            "binary" | "varbinary" | "image" => SqlNullType::Bytes,
            "geography" | "geometry" | "hierarchyid" => SqlNullType::Bytes,
            "date" => SqlNullType::Date,
            "time" => SqlNullType::Time,
            "datetime" | "datetime2" | "smalldatetime" => SqlNullType::DateTime,
            "datetimeoffset" => SqlNullType::DateTimeOffset,
            _ => SqlNullType::String,
        }
    }

    /// Whether the column can appear in an INSERT or UPDATE column list.
    pub fn is_writable(&self) -> bool {
        !self.is_computed && !matches!(self.data_type.to_lowercase().as_str(), "timestamp" | "rowversion")
    }

    /// The column's declared type, e.g. `nvarchar(50)` or `decimal(18, 2)`.
    pub fn declared_type(&self) -> String {
        format_mssql_type(&self.data_type, self.max_length, self.precision, self.scale)
    }

    /// The type used for this column in a staging table.
    ///
    /// Bulk load sends `datetime2(7)` for every timestamp and `smallint` for
    /// every small integer, so staging columns are widened to match; the
    /// server converts back when the reconcile statement writes the target.
    pub fn staging_type(&self) -> String {
        match self.data_type.to_lowercase().as_str() {
            "tinyint" => "smallint".to_string(),
            "datetime" | "smalldatetime" | "datetime2" => "datetime2(7)".to_string(),
            "time" => "time(7)".to_string(),
            "datetimeoffset" => "datetimeoffset(7)".to_string(),
            "money" => "decimal(19, 4)".to_string(),
            "smallmoney" => "decimal(10, 4)".to_string(),
            "timestamp" | "rowversion" => "binary(8)".to_string(),
            "geography" | "geometry" | "hierarchyid" => "varbinary(max)".to_string(),
            _ => self.declared_type(),
        }
    }
}

/// Immutable snapshot of a table's columns, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    pub table: TableName,
    pub columns: Vec<ShapeColumn>,
}

// TableName is serialized through its qualified form.
impl Serialize for TableName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.qualified())
    }
}

impl<'de> Deserialize<'de> for TableName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TableName::parse(&raw, "dbo").map_err(serde::de::Error::custom)
    }
}

impl TableShape {
    /// Build a shape, enforcing at most one identity column.
    pub fn new(table: TableName, columns: Vec<ShapeColumn>) -> Result<Self> {
        let identities = columns.iter().filter(|c| c.is_identity).count();
        if identities > 1 {
            return Err(BulkSyncError::Schema(format!(
                "Table {} reports {} identity columns",
                table, identities
            )));
        }
        if columns.is_empty() {
            return Err(BulkSyncError::Schema(format!("Table {} has no columns", table)));
        }
        Ok(Self { table, columns })
    }

    pub fn identity(&self) -> Option<&ShapeColumn> {
        self.columns.iter().find(|c| c.is_identity)
    }

    pub fn primary_key(&self) -> Vec<&ShapeColumn> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    pub fn has_pk(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Case-insensitive column lookup, matching SQL Server's default collation.
    pub fn column(&self, name: &str) -> Option<&ShapeColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Require a column, reporting unknown names as configuration errors.
    pub fn require_column(&self, name: &str) -> Result<&ShapeColumn> {
        self.column(name).ok_or_else(|| {
            BulkSyncError::Configuration(format!(
                "Column {:?} does not exist on {}",
                name, self.table
            ))
        })
    }
}

/// Render a SQL Server type declaration.
///
/// `max_length` is in characters (already halved for nchar/nvarchar).
pub fn format_mssql_type(data_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    let lower = data_type.to_lowercase();
    match lower.as_str() {
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("{}({}, {})", lower, precision, scale)
            } else {
                format!("{}(18, 0)", lower)
            }
        }
        "float" => {
            if precision > 0 && precision != 53 {
                format!("float({})", precision)
            } else {
                "float".to_string()
            }
        }
        "datetime2" | "time" | "datetimeoffset" => {
            if scale > 0 && scale != 7 {
                format!("{}({})", lower, scale)
            } else {
                lower
            }
        }
        "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
            if max_length == -1 {
                format!("{}(max)", lower)
            } else if max_length > 0 {
                format!("{}({})", lower, max_length)
            } else {
                format!("{}(1)", lower)
            }
        }
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> ShapeColumn {
        ShapeColumn {
            is_identity: true,
            is_primary_key: true,
            is_nullable: false,
            ..ShapeColumn::new(name, "int")
        }
    }

    #[test]
    fn test_format_mssql_type() {
        assert_eq!(format_mssql_type("int", 0, 10, 0), "int");
        assert_eq!(format_mssql_type("nvarchar", 50, 0, 0), "nvarchar(50)");
        assert_eq!(format_mssql_type("varchar", -1, 0, 0), "varchar(max)");
        assert_eq!(format_mssql_type("decimal", 0, 18, 2), "decimal(18, 2)");
        assert_eq!(format_mssql_type("DateTime2", 0, 0, 3), "datetime2(3)");
        assert_eq!(format_mssql_type("float", 0, 53, 0), "float");
    }

    #[test]
    fn test_staging_type_widening() {
        assert_eq!(ShapeColumn::new("a", "tinyint").staging_type(), "smallint");
        assert_eq!(ShapeColumn::new("a", "datetime").staging_type(), "datetime2(7)");
        let mut c = ShapeColumn::new("a", "datetimeoffset");
        c.scale = 2;
        assert_eq!(c.staging_type(), "datetimeoffset(7)");
        assert_eq!(ShapeColumn::new("a", "bigint").staging_type(), "bigint");
    }

    #[test]
    fn test_semantic_types() {
        assert_eq!(ShapeColumn::new("a", "bigint").semantic_type(), SqlNullType::I64);
        assert_eq!(ShapeColumn::new("a", "money").semantic_type(), SqlNullType::Decimal);
        assert_eq!(ShapeColumn::new("a", "nvarchar").semantic_type(), SqlNullType::String);
        assert_eq!(ShapeColumn::new("a", "smalldatetime").semantic_type(), SqlNullType::DateTime);
    }

    #[test]
    fn test_writable() {
        assert!(ShapeColumn::new("a", "int").is_writable());
        assert!(!ShapeColumn::new("a", "rowversion").is_writable());
        let mut c = ShapeColumn::new("a", "int");
        c.is_computed = true;
        assert!(!c.is_writable());
    }

    #[test]
    fn test_shape_rejects_two_identities() {
        let result = TableShape::new(
            TableName::new("dbo", "Orders"),
            vec![identity("Id"), identity("Id2")],
        );
        assert!(matches!(result, Err(BulkSyncError::Schema(_))));
    }

    #[test]
    fn test_shape_lookups() {
        let shape = TableShape::new(
            TableName::new("dbo", "Orders"),
            vec![identity("Id"), ShapeColumn::new("Price", "decimal")],
        )
        .unwrap();
        assert_eq!(shape.identity().map(|c| c.name.as_str()), Some("Id"));
        assert!(shape.has_pk());
        assert!(shape.column("price").is_some());
        assert!(shape.require_column("Missing").is_err());
    }
}
