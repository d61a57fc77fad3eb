//! Writing generated identity values back into the caller's records.

use std::collections::HashSet;

use tracing::warn;

use crate::core::options::MappingWarning;
use crate::core::record::Record;
use crate::core::value::SqlValue;

/// How many offending correlation ids a warning message lists.
const MAX_LISTED_IDS: usize = 5;

/// Write each generated identity into the record at `correlation_id - 1`.
///
/// `expected` is the insert count reported by the reconcile statement.
/// Problems never fail the call: a count mismatch, an unknown or repeated
/// correlation id, or a record that refuses the value each produce a
/// [`MappingWarning`]. Records without a captured identity (updated rows)
/// are left untouched.
pub fn map_back<R: Record>(
    records: &mut [R],
    column: &str,
    identities: Vec<(i64, SqlValue<'static>)>,
    expected: u64,
) -> Vec<MappingWarning> {
    let captured = identities.len() as u64;
    let mut seen = HashSet::with_capacity(identities.len());
    let mut unknown = Vec::new();
    let mut duplicate = Vec::new();
    let mut refused = Vec::new();
    let mut mapped = 0u64;

    for (correlation, identity) in identities {
        let index = match usize::try_from(correlation) {
            Ok(id) if id >= 1 && id <= records.len() => id - 1,
            _ => {
                unknown.push(correlation);
                continue;
            }
        };
        if !seen.insert(correlation) {
            duplicate.push(correlation);
            continue;
        }
        if records[index].set_value(column, identity) {
            mapped += 1;
        } else {
            refused.push(correlation);
        }
    }

    let mut warnings = Vec::new();
    if captured != expected {
        warnings.push(MappingWarning {
            expected,
            mapped,
            message: format!(
                "{} rows expected a generated key but {} were captured",
                expected, captured
            ),
        });
    }
    if !unknown.is_empty() {
        warnings.push(MappingWarning {
            expected,
            mapped,
            message: format!(
                "{} generated keys carry unknown correlation ids {}",
                unknown.len(),
                list_ids(&unknown)
            ),
        });
    }
    if !duplicate.is_empty() {
        warnings.push(MappingWarning {
            expected,
            mapped,
            message: format!(
                "{} correlation ids received more than one key {}",
                duplicate.len(),
                list_ids(&duplicate)
            ),
        });
    }
    if !refused.is_empty() {
        warnings.push(MappingWarning {
            expected,
            mapped,
            message: format!(
                "{} records refused a value for {:?} {}",
                refused.len(),
                column,
                list_ids(&refused)
            ),
        });
    }

    for warning in &warnings {
        warn!("Identity mapping: {}", warning.message);
    }
    warnings
}

fn list_ids(ids: &[i64]) -> String {
    let shown: Vec<String> = ids.iter().take(MAX_LISTED_IDS).map(i64::to_string).collect();
    if ids.len() > MAX_LISTED_IDS {
        format!("[{}, ...]", shown.join(", "))
    } else {
        format!("[{}]", shown.join(", "))
    }
}
