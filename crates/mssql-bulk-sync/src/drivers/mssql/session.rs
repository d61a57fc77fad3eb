//! [`SqlSession`] over one pooled Tiberius connection.

use std::borrow::Cow;

use async_trait::async_trait;
use bb8::PooledConnection;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use tiberius::{ColumnData, FromSqlOwned, ToSql, TokenRow};
use tracing::debug;

use super::TiberiusConnectionManager;
use crate::core::identifier::{quote_unchecked, TableName};
use crate::core::traits::SqlSession;
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{BulkSyncError, Result};

/// Maximum string length (in bytes) for TDS bulk insert.
const BULK_INSERT_STRING_LIMIT: usize = 65535;

/// Parameters allowed in one RPC request.
const MAX_PARAMS_PER_STATEMENT: usize = 2100;

/// Rows per statement in the parameterized INSERT fallback.
const MAX_FALLBACK_ROWS: usize = 1000;

/// One SQL Server session, held for the duration of a bulk call.
pub struct MssqlSession<'a> {
    conn: PooledConnection<'a, TiberiusConnectionManager>,
}

impl<'a> MssqlSession<'a> {
    pub(crate) fn new(conn: PooledConnection<'a, TiberiusConnectionManager>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'a> SqlSession for MssqlSession<'a> {
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.conn.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let result = self.conn.client.execute(sql, &[]).await?;
        Ok(result.total())
    }

    fn set_pending(&mut self, pending: bool) {
        self.conn.pending = pending;
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
    ) -> Result<Vec<Vec<SqlValue<'static>>>> {
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();

        let rows = self
            .conn
            .client
            .query(sql, &refs)
            .await?
            .into_first_result()
            .await?;

        rows.into_iter()
            .map(|row| {
                row.into_iter()
                    .map(column_data_to_sql_value)
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    async fn bulk_insert(
        &mut self,
        table: &TableName,
        columns: &[String],
        rows: Vec<Vec<SqlValue<'static>>>,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let qualified = table.qualified();
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(BulkSyncError::Schema(format!(
                "Row for {} has {} values for {} columns",
                qualified,
                row.len(),
                columns.len()
            )));
        }

        // Partition by string size
        let (bulk_rows, oversized_rows): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|row| !row_has_oversized_strings(row));

        let mut total = 0u64;
        if !bulk_rows.is_empty() {
            let mut request = self.conn.client.bulk_insert(&qualified).await?;
            for row in &bulk_rows {
                let mut token_row = TokenRow::new();
                for value in row {
                    token_row.push(sql_value_to_column_data(value));
                }
                request.send(token_row).await?;
            }
            total += request.finalize().await?.total();
        }

        if !oversized_rows.is_empty() {
            debug!(
                "Falling back to INSERT for {} rows with oversized strings",
                oversized_rows.len()
            );
            total += self.insert_rows_fallback(&qualified, columns, &oversized_rows).await?;
        }

        Ok(total)
    }
}

impl MssqlSession<'_> {
    /// Multi-row parameterized INSERT for rows the bulk stream cannot carry.
    async fn insert_rows_fallback(
        &mut self,
        qualified_table: &str,
        cols: &[String],
        rows: &[Vec<SqlValue<'static>>],
    ) -> Result<u64> {
        let cols_per_row = cols.len();
        if cols_per_row == 0 {
            return Err(BulkSyncError::Schema(format!(
                "Cannot insert into {} with zero columns",
                qualified_table
            )));
        }

        let col_str = cols
            .iter()
            .map(|c| quote_unchecked(c))
            .collect::<Vec<_>>()
            .join(", ");
        let max_rows_per_batch = (MAX_PARAMS_PER_STATEMENT / cols_per_row).clamp(1, MAX_FALLBACK_ROWS);
        let mut total_inserted = 0u64;

        for batch in rows.chunks(max_rows_per_batch) {
            let mut param_idx = 1;
            let value_groups: Vec<String> = batch
                .iter()
                .map(|_| {
                    let placeholders: Vec<String> = (0..cols_per_row)
                        .map(|_| {
                            let p = format!("@P{}", param_idx);
                            param_idx += 1;
                            p
                        })
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();

            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                qualified_table,
                col_str,
                value_groups.join(", ")
            );

            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_sql_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            total_inserted += self.conn.client.execute(sql.as_str(), &param_refs).await?.total();
        }

        Ok(total_inserted)
    }
}

fn row_has_oversized_strings(row: &[SqlValue<'_>]) -> bool {
    row.iter().any(|value| match value {
        SqlValue::Text(s) => {
            let utf16_len: usize = s.chars().map(|c| c.len_utf16() * 2).sum();
            utf16_len > BULK_INSERT_STRING_LIMIT
        }
        _ => false,
    })
}

/// Days since 0001-01-01, the TDS date epoch.
fn tds_days(date: NaiveDate) -> Option<u32> {
    u32::try_from(date.num_days_from_ce() - 1).ok()
}

/// 100ns increments since midnight, the TDS `time(7)` encoding.
fn tds_time(time: NaiveTime) -> tiberius::time::Time {
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond());
    tiberius::time::Time::new(nanos / 100, 7)
}

fn tds_datetime2(dt: NaiveDateTime) -> Option<tiberius::time::DateTime2> {
    let days = tds_days(dt.date())?;
    Some(tiberius::time::DateTime2::new(
        tiberius::time::Date::new(days),
        tds_time(dt.time()),
    ))
}

fn sql_value_to_column_data(value: &SqlValue<'_>) -> ColumnData<'static> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => ColumnData::Bit(None),
            SqlNullType::I16 => ColumnData::I16(None),
            SqlNullType::I32 => ColumnData::I32(None),
            SqlNullType::I64 => ColumnData::I64(None),
            SqlNullType::F32 => ColumnData::F32(None),
            SqlNullType::F64 => ColumnData::F64(None),
            SqlNullType::String => ColumnData::String(None),
            SqlNullType::Bytes => ColumnData::Binary(None),
            SqlNullType::Uuid => ColumnData::Guid(None),
            SqlNullType::Decimal => ColumnData::Numeric(None),
            SqlNullType::DateTime => ColumnData::DateTime2(None),
            SqlNullType::DateTimeOffset => ColumnData::DateTimeOffset(None),
            SqlNullType::Date => ColumnData::Date(None),
            SqlNullType::Time => ColumnData::Time(None),
        },
        SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
        SqlValue::I16(i) => ColumnData::I16(Some(*i)),
        SqlValue::I32(i) => ColumnData::I32(Some(*i)),
        SqlValue::I64(i) => ColumnData::I64(Some(*i)),
        SqlValue::F32(f) => ColumnData::F32(f.is_finite().then_some(*f)),
        SqlValue::F64(f) => ColumnData::F64(f.is_finite().then_some(*f)),
        SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s.to_string()))),
        SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b.to_vec()))),
        SqlValue::Uuid(u) => ColumnData::Guid(Some(*u)),
        SqlValue::Decimal(d) => ColumnData::Numeric(Some(tiberius::numeric::Numeric::new_with_scale(
            d.mantissa(),
            d.scale() as u8,
        ))),
        SqlValue::DateTime(dt) => ColumnData::DateTime2(tds_datetime2(*dt)),
        SqlValue::DateTimeOffset(dto) => {
            let offset_minutes = (dto.offset().local_minus_utc() / 60) as i16;
            ColumnData::DateTimeOffset(
                tds_datetime2(dto.naive_utc())
                    .map(|dt2| tiberius::time::DateTimeOffset::new(dt2, offset_minutes)),
            )
        }
        SqlValue::Date(d) => ColumnData::Date(tds_days(*d).map(tiberius::time::Date::new)),
        SqlValue::Time(t) => ColumnData::Time(Some(tds_time(*t))),
    }
}

fn sql_value_to_sql_param(value: &SqlValue<'_>) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::I16 => Box::new(Option::<i16>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::Uuid => Box::new(Option::<uuid::Uuid>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
            SqlNullType::DateTimeOffset => Box::new(Option::<DateTime<FixedOffset>>::None),
            SqlNullType::Date => Box::new(Option::<NaiveDate>::None),
            SqlNullType::Time => Box::new(Option::<NaiveTime>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::DateTimeOffset(dto) => Box::new(*dto),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Time(t) => Box::new(*t),
    }
}

fn or_null<T>(
    value: Option<T>,
    map: impl FnOnce(T) -> SqlValue<'static>,
    null: SqlNullType,
) -> SqlValue<'static> {
    value.map(map).unwrap_or(SqlValue::Null(null))
}

/// Convert a result cell by its wire type.
fn column_data_to_sql_value(data: ColumnData<'static>) -> Result<SqlValue<'static>> {
    let value = match data {
        ColumnData::Bit(v) => or_null(v, SqlValue::Bool, SqlNullType::Bool),
        ColumnData::U8(v) => or_null(v, |v| SqlValue::I16(i16::from(v)), SqlNullType::I16),
        ColumnData::I16(v) => or_null(v, SqlValue::I16, SqlNullType::I16),
        ColumnData::I32(v) => or_null(v, SqlValue::I32, SqlNullType::I32),
        ColumnData::I64(v) => or_null(v, SqlValue::I64, SqlNullType::I64),
        ColumnData::F32(v) => or_null(v, SqlValue::F32, SqlNullType::F32),
        ColumnData::F64(v) => or_null(v, SqlValue::F64, SqlNullType::F64),
        ColumnData::Guid(v) => or_null(v, SqlValue::Uuid, SqlNullType::Uuid),
        ColumnData::String(v) => or_null(
            v,
            |s| SqlValue::Text(Cow::Owned(s.into_owned())),
            SqlNullType::String,
        ),
        ColumnData::Binary(v) => or_null(
            v,
            |b| SqlValue::Bytes(Cow::Owned(b.into_owned())),
            SqlNullType::Bytes,
        ),
        data @ ColumnData::Numeric(_) => {
            or_null(Decimal::from_sql_owned(data)?, SqlValue::Decimal, SqlNullType::Decimal)
        }
        data @ ColumnData::Date(_) => {
            or_null(NaiveDate::from_sql_owned(data)?, SqlValue::Date, SqlNullType::Date)
        }
        data @ ColumnData::Time(_) => {
            or_null(NaiveTime::from_sql_owned(data)?, SqlValue::Time, SqlNullType::Time)
        }
        data @ ColumnData::DateTimeOffset(_) => or_null(
            DateTime::<FixedOffset>::from_sql_owned(data)?,
            SqlValue::DateTimeOffset,
            SqlNullType::DateTimeOffset,
        ),
        data @ (ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_)) => {
            or_null(
                NaiveDateTime::from_sql_owned(data)?,
                SqlValue::DateTime,
                SqlNullType::DateTime,
            )
        }
        // xml
        data => or_null(
            String::from_sql_owned(data)?,
            |s| SqlValue::Text(Cow::Owned(s)),
            SqlNullType::String,
        ),
    };
    Ok(value)
}
