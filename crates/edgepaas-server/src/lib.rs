// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! edgepaas Server - boot verification and HTTP health probes
//!
//! The binary runs [`BootSequence`](edgepaas_core::readiness::BootSequence)
//! to completion before binding the listener, so no request is accepted
//! until a backend has been resolved and verified. The resulting
//! [`AppState`] is passed explicitly to every handler.
//!
//! # Endpoints
//!
//! | Path | Success | Failure |
//! |------|---------|---------|
//! | `GET /health` | 200 | - |
//! | `GET /health/live` | 200 | - |
//! | `GET /health/ready` | 200 | 503 `{status, icon, message}` |
//! | `GET /health/system` | 200 | 503 + `[SYSTEM ALERT]` dispatch |

#![deny(missing_docs)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use tracing::info;

use edgepaas_core::alert::AlertDispatcher;
use edgepaas_core::readiness::{BootReport, BootSequence, ReadinessProbe};
use edgepaas_core::storage::StoragePool;

/// Server configuration.
pub mod config;

/// Health probe handlers.
pub mod health;

/// Host resource sampling.
pub mod system;

use system::{SysinfoSampler, SystemSampler, SystemThresholds};

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    /// Readiness probe bound to the boot-time outcome.
    pub readiness: ReadinessProbe,
    /// Alert routing for runtime failures.
    pub alerts: AlertDispatcher,
    /// Host usage source.
    pub sampler: Arc<dyn SystemSampler>,
    /// System probe limits.
    pub thresholds: Arc<SystemThresholds>,
    /// Pool for the storage-access layer.
    pub storage: StoragePool,
}

impl AppState {
    /// Assemble state from a finished boot sequence.
    pub fn from_boot(boot: &BootSequence, report: BootReport, thresholds: SystemThresholds) -> Self {
        let readiness = ReadinessProbe::new(
            Arc::new(report.outcome),
            boot.connector(),
            boot.checker(),
        );
        Self {
            readiness,
            alerts: boot.alerts(),
            sampler: Arc::new(SysinfoSampler),
            thresholds: Arc::new(thresholds),
            storage: report.storage,
        }
    }

    /// Replace the host usage source.
    pub fn with_sampler(mut self, sampler: Arc<dyn SystemSampler>) -> Self {
        self.sampler = sampler;
        self
    }
}

/// Build the router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/health/system", get(health::system))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
