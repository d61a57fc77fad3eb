//! Scripted in-memory session for unit tests.

use std::io::ErrorKind;

use async_trait::async_trait;

use crate::core::identifier::TableName;
use crate::core::schema::{ShapeColumn, TableShape};
use crate::core::traits::SqlSession;
use crate::core::value::SqlValue;
use crate::error::{BulkSyncError, Result};

/// A call the engine made against the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Batch(String),
    Execute(String),
    Query(String, Vec<SqlValue<'static>>),
    BulkInsert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue<'static>>>,
    },
}

impl Call {
    pub fn sql(&self) -> &str {
        match self {
            Call::Batch(sql) | Call::Execute(sql) | Call::Query(sql, _) => sql,
            Call::BulkInsert { table, .. } => table,
        }
    }
}

/// Records every call and answers from a script.
///
/// Query and execute responses are one-shot and matched by substring, in
/// the order they were scripted. Unscripted queries return no rows and
/// unscripted executes report zero rows.
#[derive(Debug, Default)]
pub struct ScriptedSession {
    pub calls: Vec<Call>,
    responses: Vec<(String, Vec<Vec<SqlValue<'static>>>)>,
    counts: Vec<(String, u64)>,
    failures: Vec<(String, String)>,
    bulk_failure_at: Option<usize>,
    bulk_stall_at: Option<usize>,
    bulk_calls: usize,
    /// Last value passed to `set_pending`.
    pub pending: bool,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose introspection queries describe `shape`.
    pub fn with_table(shape: &TableShape) -> Self {
        let mut session = Self::new();
        session.on_query("sys.columns", shape_rows(shape));
        session
    }

    pub fn on_query(&mut self, pattern: &str, rows: Vec<Vec<SqlValue<'static>>>) -> &mut Self {
        self.responses.push((pattern.to_string(), rows));
        self
    }

    pub fn on_execute(&mut self, pattern: &str, count: u64) -> &mut Self {
        self.counts.push((pattern.to_string(), count));
        self
    }

    /// Fail every statement containing `pattern`.
    pub fn fail_on(&mut self, pattern: &str, message: &str) -> &mut Self {
        self.failures.push((pattern.to_string(), message.to_string()));
        self
    }

    /// Fail the `n`th bulk insert (0-based).
    pub fn fail_bulk_at(&mut self, n: usize) -> &mut Self {
        self.bulk_failure_at = Some(n);
        self
    }

    /// Never complete the `n`th bulk insert (0-based).
    pub fn stall_bulk_at(&mut self, n: usize) -> &mut Self {
        self.bulk_stall_at = Some(n);
        self
    }

    /// SQL text of every call, bulk inserts as `BULK <table>`.
    pub fn statements(&self) -> Vec<String> {
        self.calls
            .iter()
            .map(|c| match c {
                Call::BulkInsert { table, .. } => format!("BULK {}", table),
                other => other.sql().to_string(),
            })
            .collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.calls
            .iter()
            .any(|c| !matches!(c, Call::BulkInsert { .. }) && c.sql().contains(pattern))
    }

    /// Position of the first statement containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(pattern))
    }

    /// The `(columns, rows)` of every bulk insert, in order.
    pub fn bulk_loads(&self) -> Vec<(&[String], &[Vec<SqlValue<'static>>])> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::BulkInsert { columns, rows, .. } => Some((columns.as_slice(), rows.as_slice())),
                _ => None,
            })
            .collect()
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        match self.failures.iter().find(|(p, _)| sql.contains(p.as_str())) {
            Some((_, message)) => Err(BulkSyncError::Database(tiberius::error::Error::Io {
                kind: ErrorKind::Other,
                message: message.clone(),
            })),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlSession for ScriptedSession {
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.calls.push(Call::Batch(sql.to_string()));
        self.check_failure(sql)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.calls.push(Call::Execute(sql.to_string()));
        self.check_failure(sql)?;
        match self.counts.iter().position(|(p, _)| sql.contains(p.as_str())) {
            Some(i) => Ok(self.counts.remove(i).1),
            None => Ok(0),
        }
    }

    fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
    ) -> Result<Vec<Vec<SqlValue<'static>>>> {
        self.calls.push(Call::Query(
            sql.to_string(),
            params.iter().cloned().map(SqlValue::into_owned).collect(),
        ));
        self.check_failure(sql)?;
        match self.responses.iter().position(|(p, _)| sql.contains(p.as_str())) {
            Some(i) => Ok(self.responses.remove(i).1),
            None => Ok(Vec::new()),
        }
    }

    async fn bulk_insert(
        &mut self,
        table: &TableName,
        columns: &[String],
        rows: Vec<Vec<SqlValue<'static>>>,
    ) -> Result<u64> {
        let count = rows.len() as u64;
        self.calls.push(Call::BulkInsert {
            table: table.qualified(),
            columns: columns.to_vec(),
            rows,
        });
        let index = self.bulk_calls;
        self.bulk_calls += 1;
        if self.bulk_stall_at == Some(index) {
            std::future::pending::<()>().await;
        }
        if self.bulk_failure_at == Some(index) {
            return Err(BulkSyncError::Database(tiberius::error::Error::Io {
                kind: ErrorKind::ConnectionReset,
                message: "bulk stream reset".to_string(),
            }));
        }
        Ok(count)
    }
}

/// Rows in the layout of the column introspection query.
pub fn shape_rows(shape: &TableShape) -> Vec<Vec<SqlValue<'static>>> {
    shape
        .columns
        .iter()
        .map(|c| {
            vec![
                SqlValue::from(c.name.clone()),
                SqlValue::from(c.data_type.clone()),
                SqlValue::I32(c.max_length),
                SqlValue::I32(c.precision),
                SqlValue::I32(c.scale),
                SqlValue::Bool(c.is_nullable),
                SqlValue::Bool(c.is_identity),
                SqlValue::Bool(c.is_computed),
                SqlValue::Bool(c.is_primary_key),
            ]
        })
        .collect()
}

/// `dbo.Orders`: identity key, a computed column and a rowversion.
pub fn orders_shape() -> TableShape {
    let mut name = ShapeColumn::new("Name", "nvarchar");
    name.max_length = 50;
    let mut price = ShapeColumn::new("Price", "decimal");
    price.precision = 18;
    price.scale = 2;
    let mut total = ShapeColumn::new("Total", "decimal");
    total.precision = 19;
    total.scale = 2;
    total.is_computed = true;
    TableShape::new(
        TableName::new("dbo", "Orders"),
        vec![
            ShapeColumn {
                is_identity: true,
                is_primary_key: true,
                is_nullable: false,
                ..ShapeColumn::new("Id", "int")
            },
            name,
            price,
            ShapeColumn::new("Version", "int"),
            ShapeColumn::new("ModifiedDateTime", "datetime"),
            total,
            ShapeColumn {
                is_nullable: false,
                ..ShapeColumn::new("RowVer", "rowversion")
            },
        ],
    )
    .expect("orders shape")
}

/// `dbo.Products`: natural string key, no identity.
pub fn products_shape() -> TableShape {
    let mut code = ShapeColumn::new("Code", "nvarchar");
    code.max_length = 20;
    code.is_primary_key = true;
    code.is_nullable = false;
    let mut title = ShapeColumn::new("Title", "nvarchar");
    title.max_length = -1;
    TableShape::new(
        TableName::new("dbo", "Products"),
        vec![code, title, ShapeColumn::new("Stock", "tinyint")],
    )
    .expect("products shape")
}

/// `dbo.Events`: heap without a primary key.
pub fn events_shape() -> TableShape {
    TableShape::new(
        TableName::new("dbo", "Events"),
        vec![
            ShapeColumn::new("Kind", "varchar"),
            ShapeColumn::new("At", "datetime2"),
        ],
    )
    .expect("events shape")
}
