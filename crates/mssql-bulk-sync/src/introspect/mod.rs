//! Live schema introspection and table cloning.
//!
//! Shapes are always read from the catalog views of the target database,
//! never inferred from the records being written.

use tracing::debug;

use crate::core::identifier::{quote_unchecked, TableName};
use crate::core::schema::{ShapeColumn, TableShape, MAX_TABLE_COLUMNS};
use crate::core::traits::SqlSession;
use crate::core::value::SqlValue;
use crate::error::{BulkSyncError, Result};

/// Column query. n-types report byte lengths, halved here to characters.
/// Alias types report their base type; CLR types keep their own name.
const COLUMNS_QUERY: &str = r#"
    SELECT c.name,
           COALESCE(bt.name, t.name),
           CAST(CASE
                    WHEN COALESCE(bt.name, t.name) IN ('nchar', 'nvarchar') AND c.max_length > 0
                        THEN c.max_length / 2
                    ELSE c.max_length
                END AS INT),
           CAST(c.precision AS INT),
           CAST(c.scale AS INT),
           c.is_nullable,
           c.is_identity,
           c.is_computed,
           CAST(CASE WHEN pk.column_id IS NULL THEN 0 ELSE 1 END AS BIT)
    FROM sys.columns c
    JOIN sys.types t ON t.user_type_id = c.user_type_id
    LEFT JOIN sys.types bt ON bt.user_type_id = t.system_type_id
        AND t.is_user_defined = 1 AND t.is_assembly_type = 0
    LEFT JOIN (
        SELECT ic.object_id, ic.column_id
        FROM sys.index_columns ic
        JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id
        WHERE i.is_primary_key = 1
    ) pk ON pk.object_id = c.object_id AND pk.column_id = c.column_id
    WHERE c.object_id = OBJECT_ID(@P1, 'U')
    ORDER BY c.column_id"#;

const EXISTS_QUERY: &str =
    "SELECT CAST(CASE WHEN OBJECT_ID(@P1, 'U') IS NULL THEN 0 ELSE 1 END AS INT)";

/// Read the shape of `table` from the live schema.
///
/// A missing table and a failing catalog query are both schema errors.
pub async fn resolve_shape<S>(session: &mut S, table: &TableName) -> Result<TableShape>
where
    S: SqlSession + ?Sized,
{
    let rows = session
        .query(COLUMNS_QUERY, &[SqlValue::from(table.object_id_name())])
        .await
        .map_err(|e| BulkSyncError::Schema(format!("Failed to introspect {}: {}", table, e)))?;

    if rows.is_empty() {
        return Err(BulkSyncError::Schema(format!(
            "Table {} does not exist",
            table
        )));
    }

    let columns = rows
        .iter()
        .map(|row| parse_column(table, row))
        .collect::<Result<Vec<_>>>()?;

    debug!("Resolved {} with {} columns", table, columns.len());
    TableShape::new(table.clone(), columns)
}

/// Whether `table` exists. A failing query is an error, never `false`.
pub async fn table_exists<S>(session: &mut S, table: &TableName) -> Result<bool>
where
    S: SqlSession + ?Sized,
{
    let rows = session
        .query(EXISTS_QUERY, &[SqlValue::from(table.object_id_name())])
        .await?;
    let exists = rows
        .first()
        .and_then(|r| r.first())
        .and_then(SqlValue::as_i64)
        .unwrap_or(0);
    Ok(exists > 0)
}

/// `CREATE TABLE` for an empty copy of `shape` named `destination`.
///
/// Columns keep their order and nullability, with types normalized for bulk
/// load ([`ShapeColumn::staging_type`]). Identity and computed properties
/// are not carried over; an identity column is staged nullable since rows
/// bound for insert have no key yet. `extra_column` is appended as a nullable `INT`.
pub fn clone_definition(
    shape: &TableShape,
    destination: &TableName,
    extra_column: Option<&str>,
) -> Result<String> {
    let total = shape.columns.len() + usize::from(extra_column.is_some());
    if total > MAX_TABLE_COLUMNS {
        return Err(BulkSyncError::Schema(format!(
            "Staging copy of {} would have {} columns, over the limit of {}",
            shape.table, total, MAX_TABLE_COLUMNS
        )));
    }

    let mut col_defs: Vec<String> = shape
        .columns
        .iter()
        .map(|c| {
            let null_clause = if c.is_nullable || c.is_identity {
                "NULL"
            } else {
                "NOT NULL"
            };
            format!(
                "{} {} {}",
                quote_unchecked(&c.name),
                c.staging_type(),
                null_clause
            )
        })
        .collect();

    if let Some(extra) = extra_column {
        col_defs.push(format!("{} INT NULL", quote_unchecked(extra)));
    }

    Ok(format!(
        "CREATE TABLE {} (\n    {}\n)",
        destination.qualified(),
        col_defs.join(",\n    ")
    ))
}

fn parse_column(table: &TableName, row: &[SqlValue<'static>]) -> Result<ShapeColumn> {
    let text = |i: usize| -> Result<String> {
        row.get(i)
            .and_then(SqlValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed(table, i))
    };
    let int = |i: usize| -> Result<i32> {
        row.get(i)
            .and_then(SqlValue::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| malformed(table, i))
    };
    let flag = |i: usize| -> Result<bool> {
        match row.get(i) {
            Some(SqlValue::Bool(b)) => Ok(*b),
            Some(other) => other.as_i64().map(|v| v != 0).ok_or_else(|| malformed(table, i)),
            None => Err(malformed(table, i)),
        }
    };

    Ok(ShapeColumn {
        name: text(0)?,
        data_type: text(1)?,
        max_length: int(2)?,
        precision: int(3)?,
        scale: int(4)?,
        is_nullable: flag(5)?,
        is_identity: flag(6)?,
        is_computed: flag(7)?,
        is_primary_key: flag(8)?,
    })
}

fn malformed(table: &TableName, index: usize) -> BulkSyncError {
    BulkSyncError::Schema(format!(
        "Unexpected catalog value at position {} while introspecting {}",
        index, table
    ))
}
