//! Batched bulk load of records into a staging table.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::record::Record;
use crate::core::schema::ShapeColumn;
use crate::core::traits::SqlSession;
use crate::core::value::SqlValue;
use crate::error::{BulkSyncError, Result};
use crate::staging::StagingTable;

/// Effective rows per batch. `None` and `Some(0)` mean one batch for all rows.
pub fn effective_batch_size(batch_size: Option<usize>, total: usize) -> usize {
    match batch_size {
        Some(n) if n > 0 => n,
        _ => total.max(1),
    }
}

/// Load `records` into `staging`, one bulk stream per batch.
///
/// Each batch is finalized before the next one starts. When the staging
/// table carries the correlation column, record `i` (0-based) is tagged with
/// `i + 1`. Values are coerced to the staging column's type; a missing field
/// loads as NULL.
///
/// The first failing batch aborts the load with [`BulkSyncError::Load`].
/// The cancellation token is checked before each batch.
pub async fn load<S, R>(
    session: &mut S,
    staging: &StagingTable,
    records: &[R],
    batch_size: Option<usize>,
    cancel: &CancellationToken,
) -> Result<u64>
where
    S: SqlSession + ?Sized,
    R: Record,
{
    if staging.has_correlation && i32::try_from(records.len()).is_err() {
        return Err(BulkSyncError::Configuration(format!(
            "{} records exceed the correlation id range",
            records.len()
        )));
    }

    let size = effective_batch_size(batch_size, records.len());
    let columns = staging.load_columns();
    let table = staging.name.qualified();
    let mut loaded = 0u64;

    for (batch_index, chunk) in records.chunks(size).enumerate() {
        if cancel.is_cancelled() {
            return Err(BulkSyncError::Cancelled);
        }

        let row_offset = batch_index * size;
        let rows: Vec<Vec<SqlValue<'static>>> = chunk
            .iter()
            .enumerate()
            .map(|(i, record)| staging_row(staging, record, row_offset + i))
            .collect();

        let sent = rows.len() as u64;
        let accepted = session
            .bulk_insert(&staging.name, &columns, rows)
            .await
            .map_err(|e| BulkSyncError::load(&table, batch_index, row_offset, e.to_string()))?;

        if accepted != sent {
            return Err(BulkSyncError::load(
                &table,
                batch_index,
                row_offset,
                format!("server accepted {} of {} rows", accepted, sent),
            ));
        }

        loaded += accepted;
        debug!(
            "Loaded batch {} into {}: {} rows ({} total)",
            batch_index, table, accepted, loaded
        );
    }

    Ok(loaded)
}

/// Build the staging row for the record at 0-based `position`.
fn staging_row<R: Record>(
    staging: &StagingTable,
    record: &R,
    position: usize,
) -> Vec<SqlValue<'static>> {
    let mut row = Vec::with_capacity(staging.columns.len() + 1);
    for staged in &staging.columns {
        let semantic = staged.column.semantic_type();
        let value = record
            .value(&staged.source)
            .map(SqlValue::into_owned)
            .unwrap_or(SqlValue::Null(semantic));
        row.push(fit_scale(value.coerce_to(semantic), &staged.column));
    }
    if staging.has_correlation {
        // Range checked in load()
        row.push(SqlValue::I32((position + 1) as i32));
    }
    row
}

/// Rescale decimals to the staging column's scale. The bulk stream encodes
/// a numeric with the destination column's scale, not its own.
fn fit_scale(value: SqlValue<'static>, column: &ShapeColumn) -> SqlValue<'static> {
    let scale = match column.data_type.to_lowercase().as_str() {
        "decimal" | "numeric" => u32::try_from(column.scale).unwrap_or(0),
        "money" | "smallmoney" => 4,
        _ => return value,
    };
    match value {
        SqlValue::Decimal(mut d) if d.scale() != scale => {
            d.rescale(scale);
            SqlValue::Decimal(d)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::TableName;
    use crate::core::record::Row;
    use crate::core::schema::ShapeColumn;
    use crate::core::value::SqlNullType;
    use crate::staging::StagedColumn;
    use crate::testing::ScriptedSession;

    fn staging(with_correlation: bool) -> StagingTable {
        let mut code = ShapeColumn::new("Code", "nvarchar");
        code.max_length = 20;
        StagingTable {
            name: TableName::temp("#_bulk_Products_1_abcd1234"),
            columns: vec![
                StagedColumn::new(code, "ProductCode"),
                StagedColumn::new(ShapeColumn::new("Stock", "bigint"), "Stock"),
            ],
            has_correlation: with_correlation,
            permanent: false,
        }
    }

    fn records(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                Row::new()
                    .with("ProductCode", format!("P{}", i))
                    .with("Stock", i as i32)
            })
            .collect()
    }

    #[test]
    fn test_effective_batch_size() {
        assert_eq!(effective_batch_size(None, 10), 10);
        assert_eq!(effective_batch_size(Some(0), 10), 10);
        assert_eq!(effective_batch_size(Some(3), 10), 3);
        assert_eq!(effective_batch_size(None, 0), 1);
    }

    #[tokio::test]
    async fn test_batches_and_correlation_ids() {
        let mut session = ScriptedSession::new();
        let loaded = load(&mut session, &staging(true), &records(7), Some(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(loaded, 7);

        let loads = session.bulk_loads();
        assert_eq!(loads.len(), 3);
        assert_eq!(loads[0].0, &["Code", "Stock", "_bulk_row_id"]);
        assert_eq!(
            loads.iter().map(|(_, rows)| rows.len()).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );

        let ids: Vec<i64> = loads
            .iter()
            .flat_map(|(_, rows)| rows.iter().map(|r| r[2].as_i64().unwrap()))
            .collect();
        assert_eq!(ids, (1..=7).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_values_read_by_source_and_coerced() {
        let mut session = ScriptedSession::new();
        let records = vec![Row::new().with("ProductCode", "A".to_string())];
        load(&mut session, &staging(false), &records, None, &CancellationToken::new())
            .await
            .unwrap();

        let (_, rows) = session.bulk_loads()[0];
        assert_eq!(rows[0][0], SqlValue::from("A".to_string()));
        // Missing field loads as a NULL typed after the column
        assert_eq!(rows[0][1], SqlValue::Null(SqlNullType::I64));
        assert_eq!(rows[0].len(), 2);

        let mut session = ScriptedSession::new();
        load(&mut session, &staging(false), &records_with_stock(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.bulk_loads()[0].1[0][1], SqlValue::I64(5));
    }

    fn records_with_stock() -> Vec<Row> {
        vec![Row::new().with("ProductCode", "B".to_string()).with("Stock", 5i32)]
    }

    #[test]
    fn test_decimals_follow_column_scale() {
        let mut price = ShapeColumn::new("Price", "decimal");
        price.precision = 18;
        price.scale = 2;
        let value = fit_scale(SqlValue::Decimal(rust_decimal::Decimal::new(12346, 3)), &price);
        assert_eq!(value, SqlValue::Decimal(rust_decimal::Decimal::new(1235, 2)));

        let money = ShapeColumn::new("Amount", "money");
        match fit_scale(SqlValue::Decimal(rust_decimal::Decimal::from(7)), &money) {
            SqlValue::Decimal(d) => assert_eq!(d.scale(), 4),
            other => panic!("unexpected value {:?}", other),
        }

        let text = ShapeColumn::new("Code", "nvarchar");
        assert_eq!(fit_scale(SqlValue::I32(1), &text), SqlValue::I32(1));
    }

    #[tokio::test]
    async fn test_single_batch_when_unset() {
        let mut session = ScriptedSession::new();
        load(&mut session, &staging(true), &records(2500), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.bulk_loads().len(), 1);
    }

    #[tokio::test]
    async fn test_round_trips_scale_with_batch_size() {
        let mut session = ScriptedSession::new();
        load(&mut session, &staging(false), &records(20_000), Some(1000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.bulk_loads().len(), 20);
    }

    #[tokio::test]
    async fn test_failed_batch_reports_index_and_offset() {
        let mut session = ScriptedSession::new();
        session.fail_bulk_at(2);
        let err = load(&mut session, &staging(true), &records(10), Some(4), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            BulkSyncError::Load {
                batch_index,
                row_offset,
                message,
                ..
            } => {
                assert_eq!(batch_index, 2);
                assert_eq!(row_offset, 8);
                assert!(message.contains("bulk stream reset"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(session.bulk_loads().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_batch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = ScriptedSession::new();
        let err = load(&mut session, &staging(false), &records(3), Some(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkSyncError::Cancelled));
        assert!(session.calls.is_empty());
    }
}
