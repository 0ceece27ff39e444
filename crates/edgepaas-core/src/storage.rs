// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection pools for the resolved backend.
//!
//! The storage layer receives a [`StoragePool`] built from the boot-time
//! [`ResolutionOutcome`]; there is no process-global connection URL.

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{PgPool, SqlitePool};
use tracing::info;

use crate::error::Result;
use crate::resolve::ResolutionOutcome;

/// Idempotent schema for the embedded fallback.
const FALLBACK_SCHEMA: &str = include_str!("../schema/fallback.sql");

/// A pool connected to the winning backend.
#[derive(Debug, Clone)]
pub enum StoragePool {
    /// Primary or secondary relational store.
    Postgres(PgPool),
    /// Embedded fallback store.
    Sqlite(SqlitePool),
}

impl StoragePool {
    /// Open a pool for the outcome's target.
    ///
    /// Embedded files are created if missing, parent directories included.
    /// Relational pools connect on first use.
    pub async fn connect(outcome: &ResolutionOutcome) -> Result<Self> {
        let target = outcome.target();

        if target.is_embedded() {
            let options =
                SqliteConnectOptions::from_str(&target.driver_url())?.create_if_missing(true);

            // Create parent directories if needed
            if let Some(parent) = options.get_filename().parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;
            info!(url = %target.redacted(), "Opened embedded fallback pool");
            Ok(Self::Sqlite(pool))
        } else {
            // Lazy: connectivity is owned by the prober and the readiness probe.
            let options = PgConnectOptions::from_str(&target.driver_url())?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect_lazy_with(options);
            info!(url = %target.redacted(), origin = %outcome.origin(), "Created relational pool");
            Ok(Self::Postgres(pool))
        }
    }

    /// Whether the pool points at the embedded fallback.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Sqlite(_))
    }

    /// Close every connection in the pool.
    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Create the application tables on the embedded fallback.
///
/// Safe to run on every boot. Writes no migration history.
pub async fn bootstrap_fallback(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(FALLBACK_SCHEMA).execute(pool).await?;
    info!("Embedded fallback schema ready");
    Ok(())
}
