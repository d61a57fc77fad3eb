//! Per-operation options and results.

use serde::{Deserialize, Serialize};

/// Explicit source → target column mapping entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    /// Name the record is asked for via [`Record::value`](crate::Record::value).
    pub source: String,
    /// Target column name.
    pub target: String,
}

impl ColumnMap {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Equality list correlating staging rows to target rows.
///
/// Each pair is `(staging column, target column)`; both sides name target
/// columns because staging is cloned from the target. Compiled to
/// `t.[target] = s.[staging] AND ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCondition {
    pub pairs: Vec<(String, String)>,
}

impl MatchCondition {
    /// Match on same-named columns.
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pairs: columns
                .into_iter()
                .map(|c| {
                    let c = c.into();
                    (c.clone(), c)
                })
                .collect(),
        }
    }

    /// Add a pair whose staging and target columns differ.
    #[must_use]
    pub fn pair(mut self, staging: impl Into<String>, target: impl Into<String>) -> Self {
        self.pairs.push((staging.into(), target.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Options accepted by every bulk operation.
///
/// Nothing here is inferred: unset fields fall back only to the defaults
/// documented on each field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// Rows per bulk-transfer batch. `None` uses the engine default;
    /// `Some(0)` (or no engine default) loads everything in one batch.
    pub batch_size: Option<usize>,

    /// Write the records' identity values instead of letting the server
    /// generate them (`SET IDENTITY_INSERT ON`).
    pub keep_identity: bool,

    /// Copy generated identity values back into the records.
    /// `None` means on for insert and merge. Ignored with `keep_identity`.
    pub auto_map_output_identity: Option<bool>,

    /// Keep the staging table after the call for inspection. Its name is
    /// returned in [`SyncResult::staging_table`].
    pub use_permanent_table: bool,

    /// Stable name for the permanent staging table. Only used together with
    /// `use_permanent_table`; a unique name is generated otherwise.
    pub permanent_table_name: Option<String>,

    /// Target columns never written.
    pub ignore_columns: Vec<String>,

    /// Target columns written on insert but left alone on update
    /// (update and the merge update branch).
    pub ignore_columns_on_update: Vec<String>,

    /// Staging ↔ target correlation. Defaults to primary-key equality.
    pub match_condition: Option<MatchCondition>,

    /// Explicit source → target column list; only these columns are written.
    pub column_mapping: Option<Vec<ColumnMap>>,

    /// Extra condition for updating a matched row, referring to the target
    /// as `t` and the staging row as `s`, e.g. `s.[Version] > t.[Version]`.
    pub update_on_condition: Option<String>,

    /// Write to this table instead of the one passed to the operation.
    pub table_name: Option<String>,

    /// Wrap the call in one transaction. `None` uses the engine default.
    pub use_transaction: Option<bool>,
}

impl BulkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = Some(rows);
        self
    }

    #[must_use]
    pub fn keep_identity(mut self, keep: bool) -> Self {
        self.keep_identity = keep;
        self
    }

    #[must_use]
    pub fn auto_map_output_identity(mut self, enabled: bool) -> Self {
        self.auto_map_output_identity = Some(enabled);
        self
    }

    #[must_use]
    pub fn use_permanent_table(mut self, permanent: bool) -> Self {
        self.use_permanent_table = permanent;
        self
    }

    /// Use a stable name for the permanent staging table.
    #[must_use]
    pub fn permanent_table_name(mut self, table: impl Into<String>) -> Self {
        self.permanent_table_name = Some(table.into());
        self
    }

    #[must_use]
    pub fn ignore_column(mut self, column: impl Into<String>) -> Self {
        self.ignore_columns.push(column.into());
        self
    }

    #[must_use]
    pub fn ignore_column_on_update(mut self, column: impl Into<String>) -> Self {
        self.ignore_columns_on_update.push(column.into());
        self
    }

    #[must_use]
    pub fn match_on(mut self, condition: MatchCondition) -> Self {
        self.match_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn column_mapping(mut self, mapping: Vec<ColumnMap>) -> Self {
        self.column_mapping = Some(mapping);
        self
    }

    #[must_use]
    pub fn update_on_condition(mut self, predicate: impl Into<String>) -> Self {
        self.update_on_condition = Some(predicate.into());
        self
    }

    #[must_use]
    pub fn table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    #[must_use]
    pub fn use_transaction(mut self, enabled: bool) -> Self {
        self.use_transaction = Some(enabled);
        self
    }
}

/// Non-fatal report that generated keys did not line up with inserted rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingWarning {
    /// Rows the statement reported as inserted.
    pub expected: u64,
    /// Identity values actually written into records.
    pub mapped: u64,
    pub message: String,
}

/// Outcome of a bulk operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub rows_affected: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,

    /// Name of the staging table left in place by `use_permanent_table`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_table: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<MappingWarning>,
}

impl SyncResult {
    pub fn inserted(rows: u64) -> Self {
        Self {
            rows_affected: rows,
            rows_inserted: rows,
            ..Self::default()
        }
    }

    pub fn updated(rows: u64) -> Self {
        Self {
            rows_affected: rows,
            rows_updated: rows,
            ..Self::default()
        }
    }

    pub fn deleted(rows: u64) -> Self {
        Self {
            rows_affected: rows,
            rows_deleted: rows,
            ..Self::default()
        }
    }

    pub fn merged(inserted: u64, updated: u64) -> Self {
        Self {
            rows_affected: inserted + updated,
            rows_inserted: inserted,
            rows_updated: updated,
            ..Self::default()
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
