//! The record abstraction the engine reads from and writes generated keys into.

use std::collections::HashMap;

use super::value::SqlValue;

/// A source record that can be bulk loaded.
///
/// Column lookups use the *source* column name: the target column name, or
/// the `source` side of a [`ColumnMap`](crate::ColumnMap) when an explicit
/// mapping is configured. Returning `None` writes a NULL typed after the
/// staging column.
///
/// ```rust
/// use mssql_bulk_sync::{Record, SqlValue};
///
/// struct Order {
///     id: i64,
///     price: rust_decimal::Decimal,
/// }
///
/// impl Record for Order {
///     fn value(&self, column: &str) -> Option<SqlValue<'_>> {
///         match column {
///             "Id" => Some(self.id.into()),
///             "Price" => Some(self.price.into()),
///             _ => None,
///         }
///     }
///
///     fn set_value(&mut self, column: &str, value: SqlValue<'static>) -> bool {
///         match (column, value.as_i64()) {
///             ("Id", Some(id)) => {
///                 self.id = id;
///                 true
///             }
///             _ => false,
///         }
///     }
/// }
/// ```
pub trait Record {
    /// Value of the named column for this record.
    fn value(&self, column: &str) -> Option<SqlValue<'_>>;

    /// Store a value produced by the database (a generated identity).
    ///
    /// Returns `false` when the record has no such field or cannot hold the
    /// value; the engine reports that as a mapping warning.
    fn set_value(&mut self, column: &str, value: SqlValue<'static>) -> bool;
}

/// A dynamic record keyed by column name (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, SqlValue<'static>>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<SqlValue<'static>>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<SqlValue<'static>>) {
        self.values.insert(column.to_lowercase(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue<'static>> {
        self.values.get(&column.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Record for Row {
    fn value(&self, column: &str) -> Option<SqlValue<'_>> {
        self.get(column).cloned()
    }

    fn set_value(&mut self, column: &str, value: SqlValue<'static>) -> bool {
        self.insert(column, value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new().with("ExternalId", "id-1".to_string()).with("Price", 3i32);
        assert_eq!(row.value("externalid"), Some(SqlValue::from("id-1".to_string())));
        assert_eq!(row.value("PRICE"), Some(SqlValue::I32(3)));
        assert_eq!(row.value("Missing"), None);
    }

    #[test]
    fn test_row_set_value_overwrites() {
        let mut row = Row::new().with("Id", 0i64);
        assert!(row.set_value("ID", SqlValue::I64(41)));
        assert_eq!(row.get("Id"), Some(&SqlValue::I64(41)));
        assert_eq!(row.len(), 1);
    }
}
