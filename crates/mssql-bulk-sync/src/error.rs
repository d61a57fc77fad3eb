//! Error types for bulk synchronization operations.

use thiserror::Error;

/// Main error type for bulk operations.
#[derive(Error, Debug)]
pub enum BulkSyncError {
    /// Table or column resolution failed. Raised before anything is written.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid or conflicting options (missing match condition, unknown columns, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bulk transfer batch failed while loading the staging table.
    #[error("Bulk load into {table} failed at batch {batch_index} (row offset {row_offset}): {message}")]
    Load {
        table: String,
        batch_index: usize,
        row_offset: usize,
        message: String,
    },

    /// The set-based statement against the target failed (constraint violation, etc.)
    #[error("Reconcile against {table} failed: {message}")]
    Reconcile { table: String, message: String },

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The operation was cancelled through the engine's cancellation token.
    #[error("Bulk operation cancelled")]
    Cancelled,

    /// The operation failed and the compensating cleanup failed as well.
    ///
    /// The display text is the primary error; the cleanup failure is secondary.
    #[error("{primary} (cleanup also failed: {cleanup})")]
    CleanupFailed {
        primary: Box<BulkSyncError>,
        cleanup: String,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BulkSyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        BulkSyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Load error for the given batch.
    pub fn load(
        table: impl Into<String>,
        batch_index: usize,
        row_offset: usize,
        message: impl Into<String>,
    ) -> Self {
        BulkSyncError::Load {
            table: table.into(),
            batch_index,
            row_offset,
            message: message.into(),
        }
    }

    /// Create a Reconcile error
    pub fn reconcile(table: impl Into<String>, message: impl Into<String>) -> Self {
        BulkSyncError::Reconcile {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Attach a cleanup failure to this error, keeping it as the primary cause.
    pub fn with_cleanup_failure(self, cleanup: impl Into<String>) -> Self {
        BulkSyncError::CleanupFailed {
            primary: Box::new(self),
            cleanup: cleanup.into(),
        }
    }

    /// The error that caused the operation to fail, unwrapping cleanup failures.
    pub fn primary(&self) -> &BulkSyncError {
        match self {
            BulkSyncError::CleanupFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Whether the error was caught before any database I/O was attempted.
    pub fn is_configuration(&self) -> bool {
        matches!(self.primary(), BulkSyncError::Configuration(_))
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for bulk operations.
pub type Result<T> = std::result::Result<T, BulkSyncError>;
