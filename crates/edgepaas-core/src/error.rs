// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for edgepaas-core.
//!
//! Boot aborts on [`Error::Timeout`] when no candidate remains, on
//! [`Error::UnsupportedScheme`] and on [`Error::MigrationMismatch`].
//! Per-attempt failures are absorbed by the prober; alert channel failures
//! never leave the dispatcher.

use thiserror::Error;

use crate::probe::ProbeTimeout;
use crate::resolve::CandidateStage;

/// Readiness errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A probe spent its whole attempt budget without connecting.
    #[error(transparent)]
    Timeout(#[from] ProbeTimeout),

    /// A connection URL uses a scheme this service cannot handle.
    #[error("Unsupported database URL scheme for {url}: {reason}")]
    UnsupportedScheme {
        /// The offending URL with credentials redacted.
        url: String,
        /// Why the scheme was rejected.
        reason: String,
    },

    /// Applied migration revision differs from the shipped head revision.
    #[error(
        "Migration mismatch: current={}, head={}",
        .current.as_deref().unwrap_or("None"),
        .head.as_deref().unwrap_or("None")
    )]
    MigrationMismatch {
        /// Revision recorded in the database, if any.
        current: Option<String>,
        /// Latest revision shipped with the application, if any.
        head: Option<String>,
    },

    /// Migrations were requested against a target that must never be migrated.
    #[error("Refusing to apply migrations to the {origin} target")]
    MigrationsUnauthorized {
        /// Which candidate produced the target.
        origin: CandidateStage,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration scripts could not be read or applied.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable code for logs and probe bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Timeout(_) => "TIMEOUT_EXHAUSTED",
            Self::UnsupportedScheme { .. } => "UNSUPPORTED_SCHEME",
            Self::MigrationMismatch { .. } => "MIGRATION_MISMATCH",
            Self::MigrationsUnauthorized { .. } => "MIGRATIONS_UNAUTHORIZED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migrate(_) => "MIGRATE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type using the edgepaas-core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_display_with_null_current() {
        let err = Error::MigrationMismatch {
            current: None,
            head: Some("abc123".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Migration mismatch: current=None, head=abc123"
        );
        assert_eq!(err.error_code(), "MIGRATION_MISMATCH");
    }

    #[test]
    fn test_unsupported_scheme_display() {
        let err = Error::UnsupportedScheme {
            url: "mysql://db/app".to_string(),
            reason: "unknown scheme".to_string(),
        };
        assert!(err.to_string().contains("mysql://db/app"));
        assert_eq!(err.error_code(), "UNSUPPORTED_SCHEME");
    }
}
