//! SQL value types exchanged between records, staging rows and query results.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Semantic type of a column, also used as the type hint for NULL values.
///
/// TDS bulk load encodes NULLs per column type, so a NULL must carry the
/// type of the column it is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlNullType {
    Bool,
    I16,
    I32,
    I64,
    F32,
    F64,
    String,
    Bytes,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
}

/// SQL value enum for type-safe row handling.
///
/// Uses `Cow` for string and byte data so records can lend their fields to
/// the loader without copying.
///
/// ```rust
/// use std::borrow::Cow;
/// use mssql_bulk_sync::SqlValue;
///
/// let borrowed: SqlValue<'_> = SqlValue::Text(Cow::Borrowed("hello"));
/// let owned: SqlValue<'static> = borrowed.into_owned();
/// assert_eq!(owned, SqlValue::from("hello".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    /// NULL with type hint for correct wire format encoding.
    Null(SqlNullType),
    Bool(bool),
    /// 16-bit signed integer (smallint, and tinyint in staging).
    I16(i16),
    /// 32-bit signed integer (int).
    I32(i32),
    /// 64-bit signed integer (bigint).
    I64(i64),
    F32(f32),
    F64(f64),
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
    Uuid(Uuid),
    Decimal(Decimal),
    /// Timestamp without timezone (datetime, datetime2, smalldatetime).
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl<'a> SqlValue<'a> {
    /// Convert to a fully owned value with `'static` lifetime.
    #[must_use]
    pub fn into_owned(self) -> SqlValue<'static> {
        match self {
            SqlValue::Null(t) => SqlValue::Null(t),
            SqlValue::Bool(v) => SqlValue::Bool(v),
            SqlValue::I16(v) => SqlValue::I16(v),
            SqlValue::I32(v) => SqlValue::I32(v),
            SqlValue::I64(v) => SqlValue::I64(v),
            SqlValue::F32(v) => SqlValue::F32(v),
            SqlValue::F64(v) => SqlValue::F64(v),
            SqlValue::Text(v) => SqlValue::Text(Cow::Owned(v.into_owned())),
            SqlValue::Bytes(v) => SqlValue::Bytes(Cow::Owned(v.into_owned())),
            SqlValue::Uuid(v) => SqlValue::Uuid(v),
            SqlValue::Decimal(v) => SqlValue::Decimal(v),
            SqlValue::DateTime(v) => SqlValue::DateTime(v),
            SqlValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(v),
            SqlValue::Date(v) => SqlValue::Date(v),
            SqlValue::Time(v) => SqlValue::Time(v),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Get the SqlNullType for this value.
    #[must_use]
    pub fn null_type(&self) -> SqlNullType {
        match self {
            SqlValue::Null(t) => *t,
            SqlValue::Bool(_) => SqlNullType::Bool,
            SqlValue::I16(_) => SqlNullType::I16,
            SqlValue::I32(_) => SqlNullType::I32,
            SqlValue::I64(_) => SqlNullType::I64,
            SqlValue::F32(_) => SqlNullType::F32,
            SqlValue::F64(_) => SqlNullType::F64,
            SqlValue::Text(_) => SqlNullType::String,
            SqlValue::Bytes(_) => SqlNullType::Bytes,
            SqlValue::Uuid(_) => SqlNullType::Uuid,
            SqlValue::Decimal(_) => SqlNullType::Decimal,
            SqlValue::DateTime(_) => SqlNullType::DateTime,
            SqlValue::DateTimeOffset(_) => SqlNullType::DateTimeOffset,
            SqlValue::Date(_) => SqlNullType::Date,
            SqlValue::Time(_) => SqlNullType::Time,
        }
    }

    /// Integer view of the value, used for identity and correlation columns.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(d) if d.fract().is_zero() => i64::try_from(*d).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce the value to the column's semantic type where that is lossless.
    ///
    /// Bulk load streams values with the staging column's wire type, so an
    /// `i32` field bound for a `bigint` column has to be widened first.
    /// Values that cannot be converted without loss are returned unchanged and
    /// left for the server to reject.
    #[must_use]
    pub fn coerce_to(self, target: SqlNullType) -> SqlValue<'a> {
        if self.null_type() == target {
            return self;
        }
        match (self, target) {
            (SqlValue::Null(_), t) => SqlValue::Null(t),
            (SqlValue::I16(v), SqlNullType::I32) => SqlValue::I32(i32::from(v)),
            (SqlValue::I16(v), SqlNullType::I64) => SqlValue::I64(i64::from(v)),
            (SqlValue::I32(v), SqlNullType::I64) => SqlValue::I64(i64::from(v)),
            (SqlValue::I32(v), SqlNullType::I16) => match i16::try_from(v) {
                Ok(n) => SqlValue::I16(n),
                Err(_) => SqlValue::I32(v),
            },
            (SqlValue::I64(v), SqlNullType::I32) => match i32::try_from(v) {
                Ok(n) => SqlValue::I32(n),
                Err(_) => SqlValue::I64(v),
            },
            (SqlValue::I64(v), SqlNullType::I16) => match i16::try_from(v) {
                Ok(n) => SqlValue::I16(n),
                Err(_) => SqlValue::I64(v),
            },
            (SqlValue::I16(v), SqlNullType::Decimal) => SqlValue::Decimal(Decimal::from(v)),
            (SqlValue::I32(v), SqlNullType::Decimal) => SqlValue::Decimal(Decimal::from(v)),
            (SqlValue::I64(v), SqlNullType::Decimal) => SqlValue::Decimal(Decimal::from(v)),
            (SqlValue::F32(v), SqlNullType::F64) => SqlValue::F64(f64::from(v)),
            (SqlValue::Date(d), SqlNullType::DateTime) => {
                SqlValue::DateTime(d.and_time(NaiveTime::MIN))
            }
            (SqlValue::DateTimeOffset(dto), SqlNullType::DateTime) => {
                SqlValue::DateTime(dto.naive_utc())
            }
            (SqlValue::Text(s), SqlNullType::Uuid) => match Uuid::parse_str(&s) {
                Ok(u) => SqlValue::Uuid(u),
                Err(_) => SqlValue::Text(s),
            },
            (value, _) => value,
        }
    }
}

impl<'a> SqlValue<'a> {
    #[must_use]
    pub fn text_borrowed(s: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(s))
    }

    #[must_use]
    pub fn text_owned(s: String) -> SqlValue<'static> {
        SqlValue::Text(Cow::Owned(s))
    }

    #[must_use]
    pub fn bytes_borrowed(b: &'a [u8]) -> Self {
        SqlValue::Bytes(Cow::Borrowed(b))
    }
}

impl From<bool> for SqlValue<'static> {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i16> for SqlValue<'static> {
    fn from(v: i16) -> Self {
        SqlValue::I16(v)
    }
}

impl From<i32> for SqlValue<'static> {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue<'static> {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<f32> for SqlValue<'static> {
    fn from(v: f32) -> Self {
        SqlValue::F32(v)
    }
}

impl From<f64> for SqlValue<'static> {
    fn from(v: f64) -> Self {
        SqlValue::F64(v)
    }
}

impl From<String> for SqlValue<'static> {
    fn from(v: String) -> Self {
        SqlValue::Text(Cow::Owned(v))
    }
}

impl<'a> From<&'a str> for SqlValue<'a> {
    fn from(v: &'a str) -> Self {
        SqlValue::Text(Cow::Borrowed(v))
    }
}

impl From<Vec<u8>> for SqlValue<'static> {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Cow::Owned(v))
    }
}

impl From<Uuid> for SqlValue<'static> {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Decimal> for SqlValue<'static> {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDateTime> for SqlValue<'static> {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue<'static> {
    fn from(v: DateTime<FixedOffset>) -> Self {
        SqlValue::DateTimeOffset(v)
    }
}

impl From<NaiveDate> for SqlValue<'static> {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveTime> for SqlValue<'static> {
    fn from(v: NaiveTime) -> Self {
        SqlValue::Time(v)
    }
}

impl<T> From<Option<T>> for SqlValue<'static>
where
    T: Into<SqlValue<'static>> + Default,
{
    /// `None` becomes a NULL typed after `T::default()`.
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null(T::default().into().null_type()),
        }
    }
}
