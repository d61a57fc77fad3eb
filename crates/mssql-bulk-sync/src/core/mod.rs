//! Core types shared by every stage of a bulk operation.

pub mod identifier;
pub mod options;
pub mod record;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::{quote, validate_identifier, validate_predicate, TableName};
pub use options::{BulkOptions, ColumnMap, MappingWarning, MatchCondition, SyncResult};
pub use record::{Record, Row};
pub use schema::{format_mssql_type, ShapeColumn, TableShape, MAX_TABLE_COLUMNS};
pub use traits::SqlSession;
pub use value::{SqlNullType, SqlValue};
