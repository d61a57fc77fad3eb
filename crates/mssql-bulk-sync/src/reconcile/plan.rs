//! Column and match resolution for one bulk call.
//!
//! Turns a [`TableShape`] and [`BulkOptions`] into the exact column lists
//! every later stage uses: what gets staged, what gets inserted, what gets
//! updated and how staging rows are matched to target rows.

use std::fmt;

use crate::core::identifier::{validate_predicate, TableName};
use crate::core::options::BulkOptions;
use crate::core::schema::{ShapeColumn, TableShape};
use crate::error::{BulkSyncError, Result};
use crate::staging::StagedColumn;

/// The four set-based statement shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Merge,
    Delete,
}

impl Operation {
    fn uses_match(self) -> bool {
        !matches!(self, Operation::Insert)
    }

    fn inserts(self) -> bool {
        matches!(self, Operation::Insert | Operation::Merge)
    }

    fn updates(self) -> bool {
        matches!(self, Operation::Update | Operation::Merge)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Merge => "merge",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Resolved plan for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub operation: Operation,
    pub target: TableName,
    /// Columns staged for the call, in table order.
    pub staged: Vec<StagedColumn>,
    /// Target columns written by the insert branch.
    pub insert_columns: Vec<String>,
    /// Target columns assigned by the update branch.
    pub update_columns: Vec<String>,
    /// `(staging column, target column)` equality pairs.
    pub match_pairs: Vec<(String, String)>,
    /// Extra predicate for the update branch.
    pub update_condition: Option<String>,
    /// Identity column name, if the target has one.
    pub identity: Option<String>,
    /// Record field the generated identity is written back to.
    pub identity_source: Option<String>,
    /// Explicit identity values are written (`IDENTITY_INSERT`).
    pub keep_identity: bool,
    /// Generated identities are captured and mapped back to records.
    pub map_identity: bool,
}

impl ReconcilePlan {
    /// Resolve the plan, failing with a configuration error on unknown
    /// columns, a missing match key or options that do not apply.
    pub fn resolve(shape: &TableShape, operation: Operation, options: &BulkOptions) -> Result<Self> {
        if options.update_on_condition.is_some() && !operation.updates() {
            return Err(BulkSyncError::Configuration(format!(
                "update_on_condition does not apply to bulk {}",
                operation
            )));
        }
        if let Some(condition) = &options.update_on_condition {
            validate_predicate(condition)?;
        }

        let sources = source_map(shape, options)?;

        let ignored = resolve_names(shape, &options.ignore_columns)?;
        let ignored_on_update = resolve_names(shape, &options.ignore_columns_on_update)?;

        let identity = shape.identity().map(|c| c.name.clone());
        let writable: Vec<&ShapeColumn> = shape
            .columns
            .iter()
            .filter(|c| c.is_writable())
            .filter(|c| !c.is_identity || options.keep_identity)
            .filter(|c| sources.iter().any(|(name, _)| name == &c.name))
            .filter(|c| !ignored.contains(&c.name))
            .collect();

        let match_pairs = if operation.uses_match() {
            resolve_match(shape, options)?
        } else {
            Vec::new()
        };
        let match_targets: Vec<&str> = match_pairs.iter().map(|(_, t)| t.as_str()).collect();
        let match_staged: Vec<&str> = match_pairs.iter().map(|(s, _)| s.as_str()).collect();

        let insert_columns: Vec<String> = if operation.inserts() {
            writable.iter().map(|c| c.name.clone()).collect()
        } else {
            Vec::new()
        };

        let update_columns: Vec<String> = if operation.updates() {
            writable
                .iter()
                .filter(|c| !c.is_identity)
                .filter(|c| !match_targets.contains(&c.name.as_str()))
                .filter(|c| !ignored_on_update.contains(&c.name))
                .map(|c| c.name.clone())
                .collect()
        } else {
            Vec::new()
        };

        if operation == Operation::Update && update_columns.is_empty() {
            return Err(BulkSyncError::Configuration(format!(
                "No columns left to update on {} after exclusions",
                shape.table
            )));
        }

        let staged: Vec<StagedColumn> = shape
            .columns
            .iter()
            .filter(|c| {
                let in_match = match_staged.contains(&c.name.as_str());
                let in_write = operation != Operation::Delete
                    && writable.iter().any(|w| w.name == c.name);
                in_match || in_write
            })
            .map(|c| StagedColumn::new(c.clone(), source_for(&sources, &c.name)))
            .collect();

        if staged.is_empty() {
            return Err(BulkSyncError::Configuration(format!(
                "No columns to stage for bulk {} on {}",
                operation, shape.table
            )));
        }

        let map_identity = operation.inserts()
            && identity.is_some()
            && !options.keep_identity
            && options.auto_map_output_identity.unwrap_or(true);
        let identity_source = identity.as_ref().map(|name| source_for(&sources, name));

        Ok(Self {
            operation,
            target: shape.table.clone(),
            staged,
            insert_columns,
            update_columns,
            match_pairs,
            update_condition: options.update_on_condition.clone(),
            keep_identity: options.keep_identity && identity.is_some(),
            identity,
            identity_source,
            map_identity,
        })
    }

    /// Whether the statement must report per-row output.
    pub fn needs_output(&self) -> bool {
        self.operation == Operation::Merge || self.map_identity || self.insert_columns.is_empty()
    }
}

/// `(target column, record field)` for every column the caller provides.
fn source_map(shape: &TableShape, options: &BulkOptions) -> Result<Vec<(String, String)>> {
    match &options.column_mapping {
        Some(mapping) => {
            if mapping.is_empty() {
                return Err(BulkSyncError::Configuration(
                    "column_mapping must not be empty".to_string(),
                ));
            }
            let mut sources: Vec<(String, String)> = Vec::with_capacity(mapping.len());
            for entry in mapping {
                let column = shape.require_column(&entry.target)?;
                if sources.iter().any(|(name, _)| name == &column.name) {
                    return Err(BulkSyncError::Configuration(format!(
                        "Column {:?} is mapped more than once",
                        column.name
                    )));
                }
                sources.push((column.name.clone(), entry.source.clone()));
            }
            Ok(sources)
        }
        None => Ok(shape
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.name.clone()))
            .collect()),
    }
}

fn source_for(sources: &[(String, String)], column: &str) -> String {
    sources
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, source)| source.clone())
        .unwrap_or_else(|| column.to_string())
}

/// Canonical (shape-cased) names for caller-supplied column names.
fn resolve_names(shape: &TableShape, names: &[String]) -> Result<Vec<String>> {
    names
        .iter()
        .map(|n| shape.require_column(n).map(|c| c.name.clone()))
        .collect()
}

/// Explicit match condition, else primary-key equality.
fn resolve_match(shape: &TableShape, options: &BulkOptions) -> Result<Vec<(String, String)>> {
    match &options.match_condition {
        Some(condition) if !condition.is_empty() => condition
            .pairs
            .iter()
            .map(|(staging, target)| {
                let s = shape.require_column(staging)?;
                let t = shape.require_column(target)?;
                Ok((s.name.clone(), t.name.clone()))
            })
            .collect(),
        _ if shape.has_pk() => Ok(shape
            .primary_key()
            .into_iter()
            .map(|c| (c.name.clone(), c.name.clone()))
            .collect()),
        _ => Err(BulkSyncError::Configuration(format!(
            "Table {} has no primary key; a match condition is required",
            shape.table
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::{ColumnMap, MatchCondition};
    use crate::testing::{events_shape, orders_shape, products_shape};

    fn staged_names(plan: &ReconcilePlan) -> Vec<&str> {
        plan.staged.iter().map(|c| c.name()).collect()
    }

    #[test]
    fn test_insert_skips_identity_and_generated_columns() {
        let plan = ReconcilePlan::resolve(&orders_shape(), Operation::Insert, &BulkOptions::new()).unwrap();
        assert_eq!(
            plan.insert_columns,
            vec!["Name", "Price", "Version", "ModifiedDateTime"]
        );
        assert_eq!(staged_names(&plan), vec!["Name", "Price", "Version", "ModifiedDateTime"]);
        assert!(plan.map_identity);
        assert!(plan.match_pairs.is_empty());
        assert_eq!(plan.identity_source.as_deref(), Some("Id"));
    }

    #[test]
    fn test_keep_identity_writes_identity_and_disables_mapping() {
        let opts = BulkOptions::new().keep_identity(true);
        let plan = ReconcilePlan::resolve(&orders_shape(), Operation::Insert, &opts).unwrap();
        assert_eq!(plan.insert_columns[0], "Id");
        assert!(plan.keep_identity);
        assert!(!plan.map_identity);
    }

    #[test]
    fn test_auto_map_opt_out() {
        let opts = BulkOptions::new().auto_map_output_identity(false);
        let plan = ReconcilePlan::resolve(&orders_shape(), Operation::Insert, &opts).unwrap();
        assert!(!plan.map_identity);
        assert!(!plan.needs_output());
    }

    #[test]
    fn test_update_stages_identity_key_but_never_assigns_it() {
        let plan = ReconcilePlan::resolve(&orders_shape(), Operation::Update, &BulkOptions::new()).unwrap();
        assert_eq!(plan.match_pairs, vec![("Id".to_string(), "Id".to_string())]);
        assert_eq!(staged_names(&plan)[0], "Id");
        assert_eq!(
            plan.update_columns,
            vec!["Name", "Price", "Version", "ModifiedDateTime"]
        );
        assert!(!plan.map_identity);
    }

    #[test]
    fn test_ignore_lists() {
        let opts = BulkOptions::new()
            .ignore_column("modifieddatetime")
            .ignore_column_on_update("Name");
        let plan = ReconcilePlan::resolve(&orders_shape(), Operation::Merge, &opts).unwrap();
        assert_eq!(plan.insert_columns, vec!["Name", "Price", "Version"]);
        assert_eq!(plan.update_columns, vec!["Price", "Version"]);
        assert!(!staged_names(&plan).contains(&"ModifiedDateTime"));
    }

    #[test]
    fn test_unknown_ignore_column_is_configuration_error() {
        let opts = BulkOptions::new().ignore_column("Nope");
        let err = ReconcilePlan::resolve(&orders_shape(), Operation::Insert, &opts).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_column_mapping_limits_written_columns() {
        let opts = BulkOptions::new().column_mapping(vec![
            ColumnMap::new("Sku", "Code"),
            ColumnMap::new("Qty", "Stock"),
        ]);
        let plan = ReconcilePlan::resolve(&products_shape(), Operation::Merge, &opts).unwrap();
        assert_eq!(plan.insert_columns, vec!["Code", "Stock"]);
        assert_eq!(plan.update_columns, vec!["Stock"]);
        let sources: Vec<&str> = plan.staged.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["Sku", "Qty"]);
    }

    #[test]
    fn test_column_mapping_rejects_unknown_and_duplicate_targets() {
        let unknown = BulkOptions::new().column_mapping(vec![ColumnMap::new("a", "Missing")]);
        assert!(ReconcilePlan::resolve(&products_shape(), Operation::Insert, &unknown).is_err());

        let dup = BulkOptions::new().column_mapping(vec![
            ColumnMap::new("a", "Code"),
            ColumnMap::new("b", "code"),
        ]);
        assert!(ReconcilePlan::resolve(&products_shape(), Operation::Insert, &dup).is_err());
    }

    #[test]
    fn test_no_pk_without_match_condition_fails() {
        let err = ReconcilePlan::resolve(&events_shape(), Operation::Delete, &BulkOptions::new())
            .unwrap_err();
        assert!(matches!(err, BulkSyncError::Configuration(ref m) if m.contains("primary key")));

        // Inserting into a heap needs no key
        assert!(ReconcilePlan::resolve(&events_shape(), Operation::Insert, &BulkOptions::new()).is_ok());
    }

    #[test]
    fn test_explicit_match_condition() {
        let opts = BulkOptions::new().match_on(MatchCondition::on(["kind"]));
        let plan = ReconcilePlan::resolve(&events_shape(), Operation::Delete, &opts).unwrap();
        assert_eq!(plan.match_pairs, vec![("Kind".to_string(), "Kind".to_string())]);
        assert_eq!(staged_names(&plan), vec!["Kind"]);
    }

    #[test]
    fn test_update_condition_only_for_update_and_merge() {
        let opts = BulkOptions::new().update_on_condition("s.[Version] > t.[Version]");
        assert!(ReconcilePlan::resolve(&orders_shape(), Operation::Merge, &opts).is_ok());
        assert!(ReconcilePlan::resolve(&orders_shape(), Operation::Insert, &opts).is_err());

        let bad = BulkOptions::new().update_on_condition("1=1; DROP TABLE x");
        assert!(ReconcilePlan::resolve(&orders_shape(), Operation::Update, &bad).is_err());
    }

    #[test]
    fn test_update_with_nothing_to_assign_fails() {
        let opts = BulkOptions::new().column_mapping(vec![ColumnMap::new("Code", "Code")]);
        let err = ReconcilePlan::resolve(&products_shape(), Operation::Update, &opts).unwrap_err();
        assert!(err.is_configuration());
    }
}
