//! Error types for pgseq.

use thiserror::Error;

/// The main error type for pgseq operations.
#[derive(Debug, Error)]
pub enum SeqError {
    /// The configuration file could not be read or understood.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A connection name that is not present in the configuration.
    #[error("Database connection '{0}' not found")]
    UnknownConnection(String),

    /// A schema that is not configured on the given connection.
    #[error("Schema '{schema}' not found on {connection}")]
    UnknownSchema { schema: String, connection: String },

    /// A cluster name that is not present in the configuration.
    #[error("Cluster '{0}' isn't defined")]
    UnknownCluster(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Catalog or migration query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The migration-state engine refused or failed an operation.
    #[error("Migration engine error: {0}")]
    Engine(String),

    /// `up`/`down` found nothing to apply.
    #[error("No change")]
    NoChange,

    /// The applied version is marked dirty and no repair was requested.
    #[error("Schema is dirty at version {version}; rerun with --repair to force it back one step")]
    Dirty { version: u64 },

    /// A version is not part of the on-disk migration sequence.
    #[error("Version {version} not found in migration files")]
    VersionNotFound { version: u64 },

    /// Stepping a destination forward went past the target version.
    #[error("Destination overshot version {target} (now at {actual})")]
    Overshoot { target: u64, actual: u64 },

    /// A step count that can't be applied.
    #[error("Invalid step: {0}")]
    InvalidStep(i64),

    /// A generation run stopped after file writes failed.
    #[error("Generation stopped after {written} file(s) written: {}", failures.join("; "))]
    Generation {
        written: usize,
        failures: Vec<String>,
    },

    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeqError {
    /// Create an unknown-schema error.
    pub fn unknown_schema(schema: impl Into<String>, connection: impl Into<String>) -> Self {
        Self::UnknownSchema {
            schema: schema.into(),
            connection: connection.into(),
        }
    }

    /// Wrap a sqlx error raised by a catalog or bookkeeping query.
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for pgseq operations.
pub type SeqResult<T> = Result<T, SeqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SeqError::unknown_schema("billing", "replica");
        assert_eq!(err.to_string(), "Schema 'billing' not found on replica");
    }

    #[test]
    fn test_generation_error_lists_failures() {
        let err = SeqError::Generation {
            written: 4,
            failures: vec!["a.up.sql: denied".into(), "b.up.sql: full".into()],
        };
        assert_eq!(
            err.to_string(),
            "Generation stopped after 4 file(s) written: a.up.sql: denied; b.up.sql: full"
        );
    }
}
