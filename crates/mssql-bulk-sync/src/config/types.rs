//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target SQL Server connection.
    pub target: TargetConfig,

    /// Engine-wide defaults for bulk operations.
    #[serde(default)]
    pub bulk: BulkSettings,
}

/// Target database (SQL Server) connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never written back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema for unqualified table names (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt the connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust the server certificate without validation (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 8).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Defaults applied to every bulk operation unless its options override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSettings {
    /// Rows per bulk-transfer batch. Unset loads each call in a single batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Wrap each call in a transaction (default: true).
    #[serde(default = "default_true")]
    pub use_transaction: bool,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            use_transaction: true,
        }
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_true() -> bool {
    true
}
