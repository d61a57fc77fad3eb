//! # mssql-bulk-sync
//!
//! Bulk data synchronization for Microsoft SQL Server tables.
//!
//! Records are streamed into a staging table over the TDS bulk-load channel
//! and reconciled against the target with one set-based statement:
//!
//! - **Bulk insert** with generated identities mapped back into the records
//! - **Bulk update** matched on the primary key or a custom condition
//! - **Bulk merge** (upsert) reporting inserted and updated counts
//! - **Bulk delete** by staged keys, or directly by predicate
//!
//! Each call runs in one transaction on one session; a failure rolls back
//! and drops the staging table.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_bulk_sync::{BulkOptions, BulkSync, Config, MssqlPool, Row};
//!
//! #[tokio::main]
//! async fn main() -> mssql_bulk_sync::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let pool = MssqlPool::connect(&config.target).await?;
//!     let engine = BulkSync::from_config(&config);
//!
//!     let mut rows = vec![
//!         Row::new().with("Name", "first"),
//!         Row::new().with("Name", "second"),
//!     ];
//!     let mut session = pool.session().await?;
//!     let result = engine
//!         .bulk_insert(&mut session, "dbo.Orders", &mut rows, BulkOptions::new())
//!         .await?;
//!     println!("Inserted {} rows; first id {:?}", result.rows_inserted, rows[0].get("Id"));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod identity;
pub mod introspect;
pub mod loader;
pub mod orchestrator;
pub mod reconcile;
pub mod staging;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{BulkSettings, Config, TargetConfig};
pub use crate::core::{
    BulkOptions, ColumnMap, MappingWarning, MatchCondition, Record, Row, SqlNullType, SqlSession,
    SqlValue, SyncResult, TableName, TableShape,
};
pub use drivers::{MssqlPool, MssqlSession};
pub use error::{BulkSyncError, Result};
pub use orchestrator::{BulkSync, Phase};
pub use reconcile::Operation;
