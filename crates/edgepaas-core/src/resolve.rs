// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend resolution across an ordered candidate list.
//!
//! Candidates are probed strictly in order and the first one to connect wins.
//! The embedded fallback is never probed; it wins only when every relational
//! candidate is exhausted under [`ResolutionMode::PrimaryWithFallback`], and
//! that is reported as degraded mode rather than a failure.
//!
//! Candidate order for `primary-with-fallback`:
//!
//! ```text
//! primary + sslmode=require      budget: primary_switch_after
//!   │ exhausted
//!   ▼
//! primary without sslmode        budget: insecure_max_attempts   (ssl_downgrade = after-exhaustion)
//!   │ exhausted
//!   ▼
//! secondary/test database        budget: secondary_max_attempts  (if configured)
//!   │ exhausted
//!   ▼
//! embedded fallback              not probed, migrations unauthorized
//! ```
//!
//! With `ssl_downgrade = interleaved` the first two stages collapse into one:
//! each round tries the secure URL, then the insecure URL, then sleeps.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::probe::{self, Connector, ProbePolicy, ProbeTimeout};
use crate::target::{BackendKind, ConnectionTarget};

/// Escalation strategy selecting how candidates are used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// Skip probing; the embedded fallback wins.
    FallbackOnly,
    /// Only the primary may win; exhaustion is fatal.
    PrimaryOnly,
    /// Escalate through primary variants and secondary, then fall back.
    PrimaryWithFallback,
}

impl FromStr for ResolutionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback-only" | "sqlite_only" => Ok(Self::FallbackOnly),
            "primary-only" | "postgres_only" => Ok(Self::PrimaryOnly),
            "primary-with-fallback" | "try_postgres" => Ok(Self::PrimaryWithFallback),
            other => Err(format!("unknown resolution mode '{}'", other)),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FallbackOnly => write!(f, "fallback-only"),
            Self::PrimaryOnly => write!(f, "primary-only"),
            Self::PrimaryWithFallback => write!(f, "primary-with-fallback"),
        }
    }
}

/// When the primary is retried with the security parameter dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslDowngrade {
    /// Never retry the primary without `sslmode`.
    Never,
    /// After all secure attempts are spent, probe the insecure URL with its own budget.
    AfterExhaustion,
    /// Alternate secure and insecure attempts within each round.
    Interleaved,
}

impl FromStr for SslDowngrade {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "strict" => Ok(Self::Never),
            "after-exhaustion" => Ok(Self::AfterExhaustion),
            "interleaved" => Ok(Self::Interleaved),
            other => Err(format!("unknown ssl downgrade policy '{}'", other)),
        }
    }
}

/// Which entry of the candidate list produced the winning target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateStage {
    /// Primary URL with `sslmode=require`.
    PrimarySecure,
    /// Primary URL without `sslmode`.
    PrimaryInsecure,
    /// Secondary/test URL.
    Secondary,
    /// Embedded fallback URL.
    Fallback,
}

impl fmt::Display for CandidateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimarySecure => write!(f, "primary-secure"),
            Self::PrimaryInsecure => write!(f, "primary-insecure"),
            Self::Secondary => write!(f, "secondary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// A probed entry of the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Position in the escalation order.
    pub stage: CandidateStage,
    /// URL to probe.
    pub target: ConnectionTarget,
    /// Attempt budget for this candidate.
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
enum Step {
    Probe(Candidate),
    Interleave {
        secure: Candidate,
        insecure: Candidate,
    },
}

/// The result of one resolution run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionOutcome {
    target: ConnectionTarget,
    origin: CandidateStage,
    migrations_authorized: bool,
    degraded: bool,
    attempts: u32,
    elapsed: Duration,
}

impl ResolutionOutcome {
    /// Create an outcome. Migration authorization follows the target's backend kind.
    pub fn new(target: ConnectionTarget, origin: CandidateStage) -> Self {
        Self {
            migrations_authorized: target.kind().is_migratable(),
            target,
            origin,
            degraded: false,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn with_stats(mut self, attempts: u32, elapsed: Duration) -> Self {
        self.attempts = attempts;
        self.elapsed = elapsed;
        self
    }

    fn into_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// The winning target.
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// Which candidate won.
    pub fn origin(&self) -> CandidateStage {
        self.origin
    }

    /// Whether schema migrations may be applied to the winning target.
    pub fn migrations_authorized(&self) -> bool {
        self.migrations_authorized
    }

    /// Whether the fallback won because every relational candidate failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Connection attempts made across all candidates.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time spent resolving.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Configured escalation policy.
#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    mode: ResolutionMode,
    steps: Vec<Step>,
    fallback: ConnectionTarget,
    interval: Duration,
}

impl ResolutionPolicy {
    /// Build the candidate list from configuration.
    ///
    /// Every configured URL is classified up front; an unsupported scheme
    /// aborts before any probing happens.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let fallback =
            ConnectionTarget::new(config.fallback_url.clone(), BackendKind::FallbackEmbedded)?;

        let primary = match (&config.primary_url, config.mode) {
            (_, ResolutionMode::FallbackOnly) => None,
            (Some(url), _) => Some(ConnectionTarget::new(
                url.clone(),
                BackendKind::PrimaryRelational,
            )?),
            (None, _) => {
                return Err(Error::Config(crate::config::ConfigError::Missing(
                    "EDGEPAAS_DATABASE_URL",
                )));
            }
        };

        let secondary = match (&config.secondary_url, config.mode) {
            (Some(url), ResolutionMode::PrimaryWithFallback) => Some(ConnectionTarget::new(
                url.clone(),
                BackendKind::SecondaryRelational,
            )?),
            _ => None,
        };

        let mut steps = Vec::new();
        if let Some(primary) = primary {
            let secure = Candidate {
                stage: CandidateStage::PrimarySecure,
                target: primary.with_security(),
                max_attempts: config.max_attempts,
            };

            if config.mode == ResolutionMode::PrimaryOnly {
                steps.push(Step::Probe(secure));
            } else {
                let secure = Candidate {
                    max_attempts: config.primary_switch_after,
                    ..secure
                };
                let insecure = Candidate {
                    stage: CandidateStage::PrimaryInsecure,
                    target: primary.without_security(),
                    max_attempts: config.insecure_max_attempts,
                };
                match config.ssl_downgrade {
                    SslDowngrade::Never => steps.push(Step::Probe(secure)),
                    SslDowngrade::AfterExhaustion => {
                        steps.push(Step::Probe(secure));
                        steps.push(Step::Probe(insecure));
                    }
                    SslDowngrade::Interleaved => {
                        steps.push(Step::Interleave { secure, insecure });
                    }
                }
            }
        }

        if let Some(target) = secondary {
            steps.push(Step::Probe(Candidate {
                stage: CandidateStage::Secondary,
                target,
                max_attempts: config.secondary_max_attempts,
            }));
        }

        Ok(Self {
            mode: config.mode,
            steps,
            fallback,
            interval: config.retry_interval,
        })
    }

    /// The configured mode.
    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// Probed candidates in escalation order.
    pub fn candidates(&self) -> Vec<&Candidate> {
        self.steps
            .iter()
            .flat_map(|step| match step {
                Step::Probe(c) => vec![c],
                Step::Interleave { secure, insecure } => vec![secure, insecure],
            })
            .collect()
    }

    /// The embedded fallback target.
    pub fn fallback(&self) -> &ConnectionTarget {
        &self.fallback
    }

    /// Run the escalation and pick exactly one winner.
    pub async fn resolve(&self, connector: &dyn Connector) -> Result<ResolutionOutcome> {
        let start = Instant::now();

        info!(
            mode = %self.mode,
            candidates = self.steps.len(),
            fallback = %self.fallback.redacted(),
            "Resolving database backend"
        );

        if self.mode == ResolutionMode::FallbackOnly {
            info!(fallback = %self.fallback.redacted(), "Fallback-only mode, skipping probes");
            return Ok(ResolutionOutcome::new(
                self.fallback.clone(),
                CandidateStage::Fallback,
            ));
        }

        let mut attempts = 0;
        let mut last_timeout = None;

        for step in &self.steps {
            match self.run_step(step, connector).await {
                Ok((candidate, used)) => {
                    attempts += used;
                    let outcome = ResolutionOutcome::new(candidate.target.clone(), candidate.stage)
                        .with_stats(attempts, start.elapsed());
                    info!(
                        origin = %outcome.origin(),
                        url = %outcome.target().redacted(),
                        attempts,
                        migrations_authorized = outcome.migrations_authorized(),
                        "Database backend resolved"
                    );
                    return Ok(outcome);
                }
                Err(timeout) => {
                    attempts += timeout.attempts;
                    warn!(error = %timeout, "Candidate exhausted, escalating");
                    last_timeout = Some(timeout);
                }
            }
        }

        if self.mode == ResolutionMode::PrimaryOnly {
            let timeout = last_timeout.unwrap_or_else(|| ProbeTimeout {
                target: String::from("primary"),
                attempts: 0,
                elapsed: start.elapsed(),
                last_error: "no primary candidate configured".to_string(),
            });
            return Err(Error::Timeout(timeout));
        }

        warn!(
            fallback = %self.fallback.redacted(),
            attempts,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "All relational candidates unreachable, running in degraded mode on embedded fallback"
        );
        Ok(
            ResolutionOutcome::new(self.fallback.clone(), CandidateStage::Fallback)
                .with_stats(attempts, start.elapsed())
                .into_degraded(),
        )
    }

    async fn run_step<'a>(
        &self,
        step: &'a Step,
        connector: &dyn Connector,
    ) -> std::result::Result<(&'a Candidate, u32), ProbeTimeout> {
        match step {
            Step::Probe(candidate) => {
                info!(
                    stage = %candidate.stage,
                    url = %candidate.target.redacted(),
                    max_attempts = candidate.max_attempts,
                    "Probing candidate"
                );
                let policy = ProbePolicy::new(candidate.max_attempts, self.interval);
                probe::probe(connector, &candidate.target, policy)
                    .await
                    .map(|success| (candidate, success.attempts))
            }
            Step::Interleave { secure, insecure } => {
                self.run_interleaved(secure, insecure, connector).await
            }
        }
    }

    async fn run_interleaved<'a>(
        &self,
        secure: &'a Candidate,
        insecure: &'a Candidate,
        connector: &dyn Connector,
    ) -> std::result::Result<(&'a Candidate, u32), ProbeTimeout> {
        let rounds = secure.max_attempts.max(1);
        let start = Instant::now();
        let mut attempts = 0;
        let mut last_error = String::new();

        info!(
            url = %secure.target.redacted(),
            rounds,
            "Probing primary with interleaved security downgrade"
        );

        for round in 1..=rounds {
            for candidate in [secure, insecure] {
                attempts += 1;
                match probe::attempt_connect(connector, &candidate.target, round, rounds, start)
                    .await
                {
                    Ok(()) => return Ok((candidate, attempts)),
                    Err(e) => last_error = e.0,
                }
            }
            if round < rounds {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(ProbeTimeout {
            target: secure.target.redacted(),
            attempts,
            elapsed: start.elapsed(),
            last_error,
        })
    }
}
