//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{BulkSyncError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.target.host.is_empty() {
        return Err(BulkSyncError::Configuration("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(BulkSyncError::Configuration(
            "target.database is required".into(),
        ));
    }
    if config.target.user.is_empty() {
        return Err(BulkSyncError::Configuration("target.user is required".into()));
    }
    if config.target.port == 0 {
        return Err(BulkSyncError::Configuration(
            "target.port must be non-zero".into(),
        ));
    }
    if config.target.pool_size == 0 {
        return Err(BulkSyncError::Configuration(
            "target.pool_size must be at least 1".into(),
        ));
    }
    validate_identifier(&config.target.schema).map_err(|e| {
        BulkSyncError::Configuration(format!("target.schema is invalid: {}", e))
    })?;

    Ok(())
}
