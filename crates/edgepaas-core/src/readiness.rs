// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boot sequence and live/ready probe verdicts.
//!
//! [`BootSequence`] runs once per process: resolve a backend, prepare it,
//! verify migrations. Its [`BootReport`] is handed to the web layer, which
//! answers probes through [`liveness`] and [`ReadinessProbe`].
//!
//! ```text
//!   Pending ──run()──▶ Passed ──▶ serve probes
//!      │
//!      └── fatal error ──▶ Failed ──▶ alert, exit non-zero
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let config = edgepaas_core::Config::from_env()?;
//! let mut boot = BootSequence::from_config(&config);
//! let report = boot.run().await?;
//! let probe = ReadinessProbe::new(Arc::new(report.outcome), connector, checker);
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::alert::AlertDispatcher;
use crate::config::{Config, DatabaseConfig};
use crate::error::Result;
use crate::migrations::{MigrationCheck, MigrationChecker, SqlxRevisionStore};
use crate::probe::{self, Connector, ProbePolicy, SqlxConnector};
use crate::resolve::{ResolutionMode, ResolutionOutcome, ResolutionPolicy};
use crate::storage::{self, StoragePool};

/// Icon for passing probes.
pub const ICON_OK: &str = "✅";
/// Icon for failing probes.
pub const ICON_FAIL: &str = "❌";

/// Process startup state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootState {
    /// Boot has not finished.
    Pending,
    /// Boot succeeded; probes may be served.
    Passed,
    /// Boot hit a fatal error.
    Failed,
}

/// Per-request probe status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeStatus {
    /// Process is running.
    Alive,
    /// Dependencies are healthy.
    Ready,
    /// A dependency check failed.
    NotReady,
}

/// Body of a probe response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeVerdict {
    /// Probe status.
    pub status: ProbeStatus,
    /// Severity icon.
    pub icon: &'static str,
    /// Human-readable detail; the underlying error text when not ready.
    pub message: String,
}

impl ProbeVerdict {
    fn ready() -> Self {
        Self {
            status: ProbeStatus::Ready,
            icon: ICON_OK,
            message: "Database and migrations are healthy".to_string(),
        }
    }

    fn not_ready(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::NotReady,
            icon: ICON_FAIL,
            message: message.into(),
        }
    }

    /// Whether the probe should answer with a success status code.
    pub fn is_ok(&self) -> bool {
        self.status != ProbeStatus::NotReady
    }
}

/// Liveness verdict. Performs no dependency checks.
pub fn liveness() -> ProbeVerdict {
    ProbeVerdict {
        status: ProbeStatus::Alive,
        icon: ICON_OK,
        message: "App process is running".to_string(),
    }
}

/// Everything the web layer needs after a successful boot.
#[derive(Debug, Clone)]
pub struct BootReport {
    /// The winning backend.
    pub outcome: ResolutionOutcome,
    /// Boot-time migration check result.
    pub migrations: MigrationCheck,
    /// Pool for the storage-access layer.
    pub storage: StoragePool,
}

/// Where the resolution policy comes from.
enum PolicySource {
    Built(ResolutionPolicy),
    /// Validated inside [`BootSequence::run`], so a bad URL fails like any other boot error.
    Deferred(DatabaseConfig),
}

impl PolicySource {
    fn mode(&self) -> ResolutionMode {
        match self {
            Self::Built(policy) => policy.mode(),
            Self::Deferred(config) => config.mode,
        }
    }
}

/// One-shot startup verification.
pub struct BootSequence {
    policy: PolicySource,
    checker: MigrationChecker,
    alerts: AlertDispatcher,
    connector: Arc<dyn Connector>,
    apply_migrations: bool,
    state: BootState,
}

impl std::fmt::Debug for BootSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootSequence")
            .field("mode", &self.policy.mode())
            .field("scripts_dir", &self.checker.scripts_dir())
            .field("apply_migrations", &self.apply_migrations)
            .field("state", &self.state)
            .finish()
    }
}

impl BootSequence {
    /// Create a boot sequence probing through sqlx with default timeouts.
    pub fn new(policy: ResolutionPolicy, checker: MigrationChecker, alerts: AlertDispatcher) -> Self {
        Self {
            policy: PolicySource::Built(policy),
            checker,
            alerts,
            connector: Arc::new(SqlxConnector::default()),
            apply_migrations: false,
            state: BootState::Pending,
        }
    }

    /// Build from loaded configuration.
    ///
    /// Connection URLs are validated when the sequence runs.
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.database.connect_timeout;
        let checker = MigrationChecker::new(
            config.migrations.scripts_dir.clone(),
            Arc::new(SqlxRevisionStore::new(timeout)),
        )
        .with_connect_timeout(timeout);
        let alerts = AlertDispatcher::from_config(&config.alerts);

        Self {
            policy: PolicySource::Deferred(config.database.clone()),
            checker,
            alerts,
            connector: Arc::new(SqlxConnector::new(timeout)),
            apply_migrations: config.migrations.apply,
            state: BootState::Pending,
        }
    }

    /// Replace the connector used for probing.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Apply pending migrations before checking, when authorized.
    ///
    /// Default: `false`
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Current state.
    pub fn state(&self) -> BootState {
        self.state
    }

    /// Connector shared with the readiness probe.
    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    /// Migration checker shared with the readiness probe.
    pub fn checker(&self) -> MigrationChecker {
        self.checker.clone()
    }

    /// Alert dispatcher shared with the web layer.
    pub fn alerts(&self) -> AlertDispatcher {
        self.alerts.clone()
    }

    /// Run the boot sequence.
    ///
    /// On a fatal error an unsuppressed alert is dispatched, the state moves
    /// to [`BootState::Failed`] and the error is returned for the caller to
    /// turn into a non-zero exit.
    pub async fn run(&mut self) -> Result<BootReport> {
        info!(mode = %self.policy.mode(), "Starting boot verification");

        match self.execute().await {
            Ok(report) => {
                self.state = BootState::Passed;
                info!(
                    origin = %report.outcome.origin(),
                    url = %report.outcome.target().redacted(),
                    degraded = report.outcome.is_degraded(),
                    "Boot verification passed"
                );
                Ok(report)
            }
            Err(e) => {
                self.state = BootState::Failed;
                error!(error = %e, code = e.error_code(), "Boot verification failed");
                self.alerts
                    .dispatch(&format!("Startup verification failed: {}", e), false)
                    .await;
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<BootReport> {
        let deferred;
        let policy = match &self.policy {
            PolicySource::Built(policy) => policy,
            PolicySource::Deferred(config) => {
                deferred = ResolutionPolicy::from_config(config)?;
                &deferred
            }
        };
        let outcome = policy.resolve(self.connector.as_ref()).await?;

        if outcome.is_degraded() {
            self.alerts
                .dispatch(
                    &format!(
                        "Primary database unreachable after {} attempts, using embedded fallback {}",
                        outcome.attempts(),
                        outcome.target().redacted()
                    ),
                    true,
                )
                .await;
        }

        let storage = StoragePool::connect(&outcome).await?;
        if let StoragePool::Sqlite(pool) = &storage {
            storage::bootstrap_fallback(pool).await?;
        }

        if self.apply_migrations && outcome.migrations_authorized() {
            self.checker.apply(&outcome).await?;
        }

        let migrations = self.checker.check(outcome.target()).await?.into_result()?;

        Ok(BootReport {
            outcome,
            migrations,
            storage,
        })
    }
}

/// Per-request readiness check against the boot-time outcome.
#[derive(Clone)]
pub struct ReadinessProbe {
    outcome: Arc<ResolutionOutcome>,
    connector: Arc<dyn Connector>,
    checker: MigrationChecker,
}

impl ReadinessProbe {
    /// Create a probe for `outcome`.
    pub fn new(
        outcome: Arc<ResolutionOutcome>,
        connector: Arc<dyn Connector>,
        checker: MigrationChecker,
    ) -> Self {
        Self {
            outcome,
            connector,
            checker,
        }
    }

    /// The boot-time outcome this probe checks.
    pub fn outcome(&self) -> &ResolutionOutcome {
        &self.outcome
    }

    /// One connection attempt, then the migration check unless the target
    /// is the embedded fallback.
    pub async fn readiness(&self) -> ProbeVerdict {
        match self.check().await {
            Ok(()) => ProbeVerdict::ready(),
            Err(e) => {
                warn!(error = %e, "Readiness check failed");
                ProbeVerdict::not_ready(e.to_string())
            }
        }
    }

    async fn check(&self) -> Result<()> {
        let target = self.outcome.target();
        probe::probe(self.connector.as_ref(), target, ProbePolicy::once()).await?;
        self.checker.check(target).await?.into_result()?;
        Ok(())
    }
}
