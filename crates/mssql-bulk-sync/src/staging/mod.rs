//! Staging table lifecycle.
//!
//! A staging table holds the records of one bulk call so the reconcile
//! statement can treat them as a set. Transient staging tables are local
//! temporary tables (`#_bulk_...`), visible only to the creating session and
//! removed by the server when that session ends. Permanent ones live in the
//! target's schema and are kept for inspection.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use uuid::Uuid;

use crate::core::identifier::{TableName, MAX_TEMP_TABLE_NAME_LENGTH};
use crate::core::schema::{ShapeColumn, TableShape};
use crate::core::traits::SqlSession;
use crate::error::Result;
use crate::introspect::clone_definition;

/// Name of the correlation column carrying each record's 1-based position.
pub const CORRELATION_COLUMN: &str = "_bulk_row_id";

const STAGING_PREFIX: &str = "_bulk_";

/// Permanent table names follow the general identifier limit.
const MAX_PERMANENT_TABLE_NAME_LENGTH: usize = 128;

/// Process-wide staging sequence. Together with the random suffix this keeps
/// names unique across concurrent calls against the same target.
static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// A staged column: the target column it feeds and the record field it is
/// read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedColumn {
    pub column: ShapeColumn,
    /// Name passed to [`Record::value`](crate::Record::value).
    pub source: String,
}

impl StagedColumn {
    pub fn new(column: ShapeColumn, source: impl Into<String>) -> Self {
        Self {
            column,
            source: source.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.column.name
    }
}

/// A created staging table. Owned by exactly one bulk call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    pub name: TableName,
    /// Staged target columns, in table order. Excludes the correlation column.
    pub columns: Vec<StagedColumn>,
    /// Whether the trailing correlation column exists.
    pub has_correlation: bool,
    /// Kept after the call instead of dropped.
    pub permanent: bool,
}

impl StagingTable {
    /// Every column of the table in bulk-load order, correlation last.
    pub fn load_columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.iter().map(|c| c.name().to_string()).collect();
        if self.has_correlation {
            names.push(CORRELATION_COLUMN.to_string());
        }
        names
    }

    pub fn column(&self, name: &str) -> Option<&StagedColumn> {
        self.columns
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }
}

/// Generate a unique staging name for `target`.
///
/// Transient names are `#_bulk_<table>_<seq>_<rand>`; permanent ones are
/// `_bulk_<table>_<seq>_<rand>` in the target's schema. The table part is
/// shortened so the full name stays within the server's limit.
pub fn staging_name(target: &TableName, permanent: bool) -> TableName {
    let seq = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let rand = Uuid::new_v4().simple().to_string();
    let suffix = format!("_{}_{}", seq, &rand[..8]);

    let (prefix, limit) = if permanent {
        (STAGING_PREFIX.to_string(), MAX_PERMANENT_TABLE_NAME_LENGTH)
    } else {
        (format!("#{}", STAGING_PREFIX), MAX_TEMP_TABLE_NAME_LENGTH)
    };

    let budget = limit.saturating_sub(prefix.chars().count() + suffix.chars().count());
    let base: String = target.name.chars().take(budget).collect();
    let name = format!("{}{}{}", prefix, base, suffix);

    match (&target.schema, permanent) {
        (Some(schema), true) => TableName::new(schema.clone(), name),
        (None, true) => TableName::new("dbo", name),
        (_, false) => TableName::temp(name),
    }
}

/// Create the staging table holding `columns` for a call against `target`.
///
/// `permanent_name` overrides the generated name of a permanent table; an
/// existing table under that name is replaced.
pub async fn create<S>(
    session: &mut S,
    target: &TableName,
    columns: Vec<StagedColumn>,
    with_correlation: bool,
    permanent: bool,
    permanent_name: Option<&TableName>,
) -> Result<StagingTable>
where
    S: SqlSession + ?Sized,
{
    let name = match (permanent, permanent_name) {
        (true, Some(name)) => name.clone(),
        _ => staging_name(target, permanent),
    };

    let staged_shape = TableShape::new(
        name.clone(),
        columns.iter().map(|c| c.column.clone()).collect(),
    )?;
    let correlation = with_correlation.then_some(CORRELATION_COLUMN);
    let ddl = clone_definition(&staged_shape, &name, correlation)?;

    let sql = if permanent_name.is_some() && permanent {
        format!("{}; {}", drop_statement(&name), ddl)
    } else {
        ddl
    };
    session.batch(&sql).await?;
    debug!(
        "Created staging table {} ({} columns, permanent={})",
        name,
        columns.len(),
        permanent
    );

    Ok(StagingTable {
        name,
        columns,
        has_correlation: with_correlation,
        permanent,
    })
}

/// Drop a staging table. Dropping one that is already gone succeeds.
pub async fn drop<S>(session: &mut S, staging: &StagingTable) -> Result<()>
where
    S: SqlSession + ?Sized,
{
    session.batch(&drop_statement(&staging.name)).await?;
    debug!("Dropped staging table {}", staging.name);
    Ok(())
}

/// Idempotent drop for any table.
pub(crate) fn drop_statement(table: &TableName) -> String {
    format!(
        "IF OBJECT_ID(N'{}', 'U') IS NOT NULL DROP TABLE {}",
        table.object_id_literal(),
        table.qualified()
    )
}
