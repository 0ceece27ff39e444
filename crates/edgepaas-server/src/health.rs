// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health probe handlers.
//!
//! - `/health/live`: process is up, no dependency checks
//! - `/health/ready`: one connection attempt plus the migration check
//! - `/health/system`: CPU, memory and disk against thresholds

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use edgepaas_core::readiness::{self, ProbeVerdict};

use crate::AppState;
use crate::system::{self, SystemReport};

/// Legacy service health.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "edgepaas" }))
}

/// Liveness probe. Always 200.
pub async fn live() -> Json<ProbeVerdict> {
    debug!("Liveness check OK");
    Json(readiness::liveness())
}

/// Readiness probe. 200 when ready, 503 with the failure message otherwise.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ProbeVerdict>) {
    let verdict = state.readiness.readiness().await;
    if verdict.is_ok() {
        debug!("Readiness check OK");
        (StatusCode::OK, Json(verdict))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(verdict))
    }
}

/// System probe. Breaches answer 503 and raise an unsuppressed alert.
pub async fn system(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let sample = match state.sampler.sample(&state.thresholds.disk_path).await {
        Ok(sample) => sample,
        Err(e) => {
            error!(error = %e, "System sampling failed");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "message": format!("System sampling failed: {}", e),
                })),
            );
        }
    };

    let report = system::evaluate(sample, &state.thresholds);
    if report.is_healthy() {
        info!(
            cpu_percent = report.cpu_percent,
            memory_percent = report.memory_percent,
            disk_percent = report.disk_percent,
            "System health OK"
        );
        return (StatusCode::OK, Json(report_json(&report)));
    }

    error!(breaches = %report.message, "System health breached");
    state
        .alerts
        .dispatch(&format!("[SYSTEM ALERT] {}", report.message), false)
        .await;
    (StatusCode::SERVICE_UNAVAILABLE, Json(report_json(&report)))
}

fn report_json(report: &SystemReport) -> Value {
    serde_json::to_value(report).unwrap_or_else(|_| json!({ "status": report.status }))
}
