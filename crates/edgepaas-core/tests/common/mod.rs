// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fakes for edgepaas-core integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use edgepaas_core::config::DatabaseConfig;
use edgepaas_core::migrations::RevisionStore;
use edgepaas_core::probe::{ConnectError, Connector};
use edgepaas_core::resolve::{ResolutionMode, SslDowngrade};
use edgepaas_core::target::ConnectionTarget;

/// Connects only to the listed URLs and records every attempt.
pub struct ScriptedConnector {
    reachable: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new(reachable: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            reachable: reachable.iter().map(|s| s.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<(), ConnectError> {
        self.calls.lock().unwrap().push(target.url().to_string());
        if target.is_embedded() || self.reachable.contains(target.url()) {
            Ok(())
        } else {
            Err(ConnectError("connection refused".to_string()))
        }
    }
}

/// Always reports the same applied revision.
pub struct FixedStore(pub Option<String>);

#[async_trait]
impl RevisionStore for FixedStore {
    async fn current_revision(
        &self,
        _target: &ConnectionTarget,
    ) -> edgepaas_core::Result<Option<String>> {
        Ok(self.0.clone())
    }
}

pub const PRIMARY: &str = "postgres://weather:pw@primary:5432/weather";
pub const PRIMARY_SECURE: &str = "postgres://weather:pw@primary:5432/weather?sslmode=require";

/// Resolution settings with no sleeping between attempts.
pub fn database_config(mode: ResolutionMode, fallback_url: String) -> DatabaseConfig {
    DatabaseConfig {
        mode,
        primary_url: Some(PRIMARY.to_string()),
        secondary_url: None,
        fallback_url,
        retry_interval: Duration::ZERO,
        max_attempts: 3,
        primary_switch_after: 3,
        insecure_max_attempts: 3,
        secondary_max_attempts: 3,
        ssl_downgrade: SslDowngrade::Never,
        connect_timeout: Duration::from_secs(1),
    }
}

/// The workspace's shipped migration scripts.
pub fn shipped_migrations() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../migrations")
}
