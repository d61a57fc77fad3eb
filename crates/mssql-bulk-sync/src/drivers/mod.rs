//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server over TDS (tiberius), pooled with bb8

pub mod mssql;

pub use mssql::{MssqlPool, MssqlSession};
