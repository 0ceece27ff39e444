// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration consistency checks for the resolved database.
//!
//! The head revision is the highest version among the shipped scripts in
//! the migration directory (sqlx naming, `<version>_<description>.sql`).
//! The current revision is the highest successfully applied version recorded
//! in `_sqlx_migrations`. Both are read fresh on every check.
//!
//! The check is strict equality. A database that was never migrated
//! (current revision `None`) is a mismatch as soon as any script ships.
//!
//! # Example
//!
//! ```ignore
//! use edgepaas_core::migrations::{MigrationChecker, SqlxRevisionStore};
//!
//! let checker = MigrationChecker::new("migrations", Arc::new(SqlxRevisionStore::default()));
//! checker.check(outcome.target()).await?.into_result()?;
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::resolve::ResolutionOutcome;
use crate::target::ConnectionTarget;

/// Snapshot of applied vs shipped revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationState {
    /// Latest revision applied to the database.
    pub current: Option<String>,
    /// Latest revision shipped with the application.
    pub head: Option<String>,
}

impl MigrationState {
    /// Compare the two revisions.
    pub fn verdict(self) -> MigrationCheck {
        if self.current == self.head {
            MigrationCheck::Consistent {
                revision: self.current,
            }
        } else {
            MigrationCheck::Mismatch {
                current: self.current,
                head: self.head,
            }
        }
    }
}

/// Result of a consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationCheck {
    /// Applied revision equals head.
    Consistent {
        /// The shared revision, `None` when no scripts ship and none are applied.
        revision: Option<String>,
    },
    /// The target is the embedded fallback, which is not migration-managed.
    Skipped,
    /// Applied revision differs from head.
    Mismatch {
        /// Applied revision.
        current: Option<String>,
        /// Head revision.
        head: Option<String>,
    },
}

impl MigrationCheck {
    /// Whether the check passed or was validly skipped.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }

    /// Turn a mismatch into [`Error::MigrationMismatch`].
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Mismatch { current, head } => Err(Error::MigrationMismatch { current, head }),
            other => Ok(other),
        }
    }
}

/// Reads the applied revision from a database.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Latest applied revision, or `None` if the database was never migrated.
    async fn current_revision(&self, target: &ConnectionTarget) -> Result<Option<String>>;
}

/// [`RevisionStore`] reading sqlx's `_sqlx_migrations` table over a fresh connection.
#[derive(Debug, Clone)]
pub struct SqlxRevisionStore {
    connect_timeout: Duration,
}

impl SqlxRevisionStore {
    /// Create a store that gives up connecting after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SqlxRevisionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RevisionStore for SqlxRevisionStore {
    async fn current_revision(&self, target: &ConnectionTarget) -> Result<Option<String>> {
        if target.is_embedded() {
            return Ok(None);
        }

        let mut conn = connect_relational(target, self.connect_timeout).await?;

        let tracked: bool =
            sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
                .fetch_one(&mut conn)
                .await?;

        let version: Option<i64> = if tracked {
            sqlx::query_scalar(
                "SELECT version FROM _sqlx_migrations WHERE success ORDER BY version DESC LIMIT 1",
            )
            .fetch_optional(&mut conn)
            .await?
        } else {
            None
        };

        conn.close().await?;
        Ok(version.map(|v| v.to_string()))
    }
}

/// Compares and applies the shipped migration scripts.
#[derive(Clone)]
pub struct MigrationChecker {
    scripts_dir: PathBuf,
    store: Arc<dyn RevisionStore>,
    connect_timeout: Duration,
}

impl MigrationChecker {
    /// Create a checker over `scripts_dir`.
    pub fn new(scripts_dir: impl Into<PathBuf>, store: Arc<dyn RevisionStore>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            store,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Connect timeout used by [`apply`](Self::apply).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Directory holding the shipped scripts.
    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Highest up-migration version in the scripts directory.
    pub async fn head_revision(&self) -> Result<Option<String>> {
        let migrator = Migrator::new(self.scripts_dir.clone()).await?;
        Ok(migrator
            .iter()
            .filter(|m| !m.migration_type.is_down_migration())
            .map(|m| m.version)
            .max()
            .map(|v| v.to_string()))
    }

    /// Read a fresh snapshot for `target`.
    pub async fn snapshot(&self, target: &ConnectionTarget) -> Result<MigrationState> {
        let head = self.head_revision().await?;
        let current = self.store.current_revision(target).await?;
        Ok(MigrationState { current, head })
    }

    /// Check `target` against the shipped scripts.
    ///
    /// Embedded fallback targets are skipped without touching the database.
    pub async fn check(&self, target: &ConnectionTarget) -> Result<MigrationCheck> {
        if target.is_embedded() {
            debug!(url = %target.redacted(), "Skipping migration check for embedded fallback");
            return Ok(MigrationCheck::Skipped);
        }

        let state = self.snapshot(target).await?;
        let verdict = state.verdict();
        match &verdict {
            MigrationCheck::Consistent { revision } => {
                debug!(revision = revision.as_deref().unwrap_or("None"), "Migrations consistent");
            }
            MigrationCheck::Mismatch { current, head } => {
                error!(
                    current = current.as_deref().unwrap_or("None"),
                    head = head.as_deref().unwrap_or("None"),
                    "Migration mismatch"
                );
            }
            MigrationCheck::Skipped => {}
        }
        Ok(verdict)
    }

    /// Apply pending scripts to the winning target.
    ///
    /// Refuses with [`Error::MigrationsUnauthorized`] unless the outcome
    /// authorizes migrations. Already-applied versions are skipped.
    pub async fn apply(&self, outcome: &ResolutionOutcome) -> Result<()> {
        if !outcome.migrations_authorized() || outcome.target().is_embedded() {
            return Err(Error::MigrationsUnauthorized {
                origin: outcome.origin(),
            });
        }

        let migrator = Migrator::new(self.scripts_dir.clone()).await?;
        info!(
            url = %outcome.target().redacted(),
            scripts = migrator.iter().count(),
            dir = %self.scripts_dir.display(),
            "Applying migrations"
        );

        let mut conn = connect_relational(outcome.target(), self.connect_timeout).await?;
        migrator.run(&mut conn).await?;
        conn.close().await?;

        info!("Migrations applied");
        Ok(())
    }
}

async fn connect_relational(target: &ConnectionTarget, timeout: Duration) -> Result<PgConnection> {
    let options = PgConnectOptions::from_str(&target.driver_url())?;
    match tokio::time::timeout(timeout, options.connect()).await {
        Ok(conn) => Ok(conn?),
        Err(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connecting to {} timed out after {:?}", target.redacted(), timeout),
        ))),
    }
}
