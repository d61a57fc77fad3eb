//! The SQL execution surface the engine drives.
//!
//! [`SqlSession`] is the only seam between the engine and a database
//! connection. It is implemented for SQL Server by
//! [`MssqlSession`](crate::drivers::mssql::MssqlSession); tests use an
//! in-memory scripted session.

use async_trait::async_trait;

use crate::error::Result;

use super::identifier::TableName;
use super::value::SqlValue;

/// One database session.
///
/// All calls of a bulk operation go through the same session, so session
/// scoped objects (local temporary tables, open transactions) stay visible
/// from one call to the next.
#[async_trait]
pub trait SqlSession: Send {
    /// Run a statement batch directly in the session scope.
    ///
    /// Objects created here (temporary tables, `BEGIN TRANSACTION`) outlive
    /// the call. No row count is reported.
    async fn batch(&mut self, sql: &str) -> Result<()>;

    /// Execute a DML statement and return the total rows affected.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and return the rows of its first result set.
    ///
    /// Parameters bind to `@P1`, `@P2`, ... in order.
    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
    ) -> Result<Vec<Vec<SqlValue<'static>>>>;

    /// Stream rows into `table` over the native bulk-load channel.
    ///
    /// Each row holds one value per entry of `columns`, in table column
    /// order. The stream is finalized before returning; the returned count
    /// is the number of rows the server accepted.
    async fn bulk_insert(
        &mut self,
        table: &TableName,
        columns: &[String],
        rows: Vec<Vec<SqlValue<'static>>>,
    ) -> Result<u64>;

    /// Flag the session as holding uncommitted bulk work: an open
    /// transaction or a live temporary staging table.
    ///
    /// The flag is raised before the first write of a call and cleared once
    /// the call has committed or cleaned up. A session released while
    /// flagged, because the call future was dropped or a record panicked,
    /// must not be reused.
    fn set_pending(&mut self, pending: bool) {
        let _ = pending;
    }

    async fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION").await
    }

    /// Roll back the open transaction, if the server has not already done so.
    async fn rollback(&mut self) -> Result<()> {
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}
