// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection probing with a fixed backoff.
//!
//! A probe opens a connection and closes it immediately; no query is run.
//! Every failure (DNS, refused, auth, TLS, timeout) counts as "not ready yet".
//! Sleeping uses `tokio::time`, so tests drive the clock with a paused runtime.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::target::ConnectionTarget;

/// A single failed connection attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ConnectError(pub String);

impl From<sqlx::Error> for ConnectError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.to_string())
    }
}

/// Opens and immediately closes a connection to a target.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempt one connection.
    async fn connect(&self, target: &ConnectionTarget) -> Result<(), ConnectError>;
}

/// [`Connector`] backed by sqlx drivers.
#[derive(Debug, Clone)]
pub struct SqlxConnector {
    connect_timeout: Duration,
}

impl SqlxConnector {
    /// Create a connector that gives up on a single attempt after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SqlxConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<(), ConnectError> {
        let attempt = async {
            if target.is_embedded() {
                let conn = SqliteConnectOptions::from_str(&target.driver_url())?
                    .connect()
                    .await?;
                conn.close().await?;
            } else {
                let conn = PgConnectOptions::from_str(&target.driver_url())?
                    .connect()
                    .await?;
                conn.close().await?;
            }
            Ok::<(), sqlx::Error>(())
        };

        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(result) => result.map_err(ConnectError::from),
            Err(_) => Err(ConnectError(format!(
                "connection attempt timed out after {:?}",
                self.connect_timeout
            ))),
        }
    }
}

/// Attempt budget for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    /// Maximum number of connection attempts.
    pub max_attempts: u32,
    /// Sleep between attempts (never after the last).
    pub interval: Duration,
}

impl ProbePolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// A single attempt with no backoff.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }
}

/// A probe that connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSuccess {
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Time since the probe started.
    pub elapsed: Duration,
}

/// A probe that spent its whole budget.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{target} unreachable after {attempts} attempts ({elapsed:.2?}): {last_error}")]
pub struct ProbeTimeout {
    /// Redacted URL of the target.
    pub target: String,
    /// Attempts made.
    pub attempts: u32,
    /// Total time spent, sleeps included.
    pub elapsed: Duration,
    /// Message from the final attempt.
    pub last_error: String,
}

/// Probe `target` until it connects or `policy.max_attempts` is spent.
///
/// A zero budget is treated as a single attempt.
pub async fn probe(
    connector: &dyn Connector,
    target: &ConnectionTarget,
    policy: ProbePolicy,
) -> Result<ProbeSuccess, ProbeTimeout> {
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match attempt_connect(connector, target, attempt, max_attempts, start).await {
            Ok(()) => {
                return Ok(ProbeSuccess {
                    attempts: attempt,
                    elapsed: start.elapsed(),
                });
            }
            Err(e) => last_error = e.0,
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(ProbeTimeout {
        target: target.redacted(),
        attempts: max_attempts,
        elapsed: start.elapsed(),
        last_error,
    })
}

/// One logged connection attempt, shared by [`probe`] and the interleaved
/// resolution step.
pub(crate) async fn attempt_connect(
    connector: &dyn Connector,
    target: &ConnectionTarget,
    attempt: u32,
    max_attempts: u32,
    start: Instant,
) -> Result<(), ConnectError> {
    match connector.connect(target).await {
        Ok(()) => {
            info!(
                url = %target.redacted(),
                attempt,
                max_attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Database ready"
            );
            Ok(())
        }
        Err(e) => {
            warn!(
                url = %target.redacted(),
                attempt,
                max_attempts,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %e,
                "Database not ready"
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::BackendKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until `succeed_on` attempts have been made.
    struct CountingConnector {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    impl CountingConnector {
        fn new(succeed_on: Option<u32>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
            }
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, _target: &ConnectionTarget) -> Result<(), ConnectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on {
                Some(n) if call >= n => Ok(()),
                _ => Err(ConnectError("connection refused".to_string())),
            }
        }
    }

    fn primary() -> ConnectionTarget {
        ConnectionTarget::new("postgres://db/app", BackendKind::PrimaryRelational).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_succeeds_first_attempt_without_sleeping() {
        let connector = CountingConnector::new(Some(1));
        let success = probe(&connector, &primary(), ProbePolicy::new(5, Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(success.attempts, 1);
        assert!(success.elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_until_success() {
        let connector = CountingConnector::new(Some(3));
        let success = probe(&connector, &primary(), ProbePolicy::new(5, Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(success.attempts, 3);
        assert!(success.elapsed >= Duration::from_secs(6));
        assert!(success.elapsed < Duration::from_secs(7));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_exhaustion_does_not_sleep_after_last_attempt() {
        let connector = CountingConnector::new(None);
        let err = probe(&connector, &primary(), ProbePolicy::new(4, Duration::from_secs(2)))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        // Three sleeps between four attempts.
        assert!(err.elapsed >= Duration::from_secs(6));
        assert!(err.elapsed < Duration::from_secs(8));
        assert_eq!(err.last_error, "connection refused");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_means_one_attempt() {
        let connector = CountingConnector::new(None);
        let err = probe(&connector, &primary(), ProbePolicy::new(0, Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sqlx_connector_unreachable_postgres_fails() {
        let connector = SqlxConnector::new(Duration::from_secs(2));
        let target =
            ConnectionTarget::new("postgres://u:p@127.0.0.1:1/app", BackendKind::PrimaryRelational)
                .unwrap();
        assert!(connector.connect(&target).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlx_connector_embedded_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.db");
        std::fs::File::create(&path).unwrap();

        let connector = SqlxConnector::default();
        let target = ConnectionTarget::new(
            format!("sqlite://{}", path.display()),
            BackendKind::FallbackEmbedded,
        )
        .unwrap();
        connector.connect(&target).await.unwrap();
    }

    #[test]
    fn test_timeout_display_is_redacted() {
        let target = ConnectionTarget::new(
            "postgres://u:secret@db/app",
            BackendKind::PrimaryRelational,
        )
        .unwrap();
        let err = ProbeTimeout {
            target: target.redacted(),
            attempts: 5,
            elapsed: Duration::from_secs(12),
            last_error: "refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 5 attempts"));
        assert!(!msg.contains("secret"));
    }
}
