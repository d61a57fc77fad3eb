//! Set-based reconciliation of a staging table against its target.
//!
//! Each bulk call runs exactly one statement here, so its counts come from a
//! single unit of work and cannot race with a separate counting query.

pub mod plan;
pub mod sql;

pub use plan::{Operation, ReconcilePlan};

use tracing::debug;

use crate::core::traits::SqlSession;
use crate::core::value::SqlValue;
use crate::error::{BulkSyncError, Result};
use crate::staging::StagingTable;

/// Counts and captured identities of one reconcile statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// `(correlation id, generated identity)` per inserted row, when captured.
    pub identities: Vec<(i64, SqlValue<'static>)>,
}

/// Run the plan's statement against `staging`.
pub async fn reconcile<S>(
    session: &mut S,
    plan: &ReconcilePlan,
    staging: &StagingTable,
) -> Result<Reconciled>
where
    S: SqlSession + ?Sized,
{
    let target = plan.target.qualified();
    let failed = |e: BulkSyncError| BulkSyncError::reconcile(&target, e.to_string());

    match plan.operation {
        Operation::Insert if !plan.needs_output() => {
            let statement = sql::insert_sql(plan, &staging.name);
            debug!("Reconcile: {}", statement);
            let inserted = session.execute(&statement).await.map_err(failed)?;
            Ok(Reconciled {
                inserted,
                ..Reconciled::default()
            })
        }
        Operation::Insert | Operation::Merge => {
            let statement = if plan.operation == Operation::Insert {
                sql::insert_with_output_sql(plan, &staging.name)
            } else {
                sql::merge_sql(plan, &staging.name)
            };
            debug!("Reconcile: {}", statement);
            let rows = session.query(&statement, &[]).await.map_err(failed)?;
            collect_output(plan, rows)
        }
        Operation::Update => {
            let statement = sql::update_sql(plan, &staging.name);
            debug!("Reconcile: {}", statement);
            let updated = session.execute(&statement).await.map_err(failed)?;
            Ok(Reconciled {
                updated,
                ..Reconciled::default()
            })
        }
        Operation::Delete => {
            let statement = sql::delete_sql(plan, &staging.name);
            debug!("Reconcile: {}", statement);
            let deleted = session.execute(&statement).await.map_err(failed)?;
            Ok(Reconciled {
                deleted,
                ..Reconciled::default()
            })
        }
    }
}

/// Tally `$action` output rows, keeping identities of inserted rows.
fn collect_output(plan: &ReconcilePlan, rows: Vec<Vec<SqlValue<'static>>>) -> Result<Reconciled> {
    let mut result = Reconciled::default();

    for row in rows {
        let mut values = row.into_iter();
        let action = values.next();
        match action.as_ref().and_then(SqlValue::as_str) {
            Some("INSERT") => {
                result.inserted += 1;
                if plan.map_identity {
                    let correlation = values.next().and_then(|v| v.as_i64());
                    let identity = values.next();
                    if let (Some(correlation), Some(identity)) = (correlation, identity) {
                        result.identities.push((correlation, identity));
                    }
                }
            }
            Some("UPDATE") => result.updated += 1,
            Some("DELETE") => result.deleted += 1,
            _ => {
                return Err(BulkSyncError::reconcile(
                    plan.target.qualified(),
                    format!("unexpected OUTPUT row {:?}", action),
                ))
            }
        }
    }

    Ok(result)
}
