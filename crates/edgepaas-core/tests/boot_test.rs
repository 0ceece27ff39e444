// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boot sequence scenarios with scripted connectivity.

mod common;

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use edgepaas_core::Error;
use edgepaas_core::alert::AlertDispatcher;
use edgepaas_core::config::{AlertConfig, Config, MigrationConfig};
use edgepaas_core::migrations::{MigrationCheck, MigrationChecker};
use edgepaas_core::readiness::{BootSequence, BootState};
use edgepaas_core::resolve::{CandidateStage, ResolutionMode, ResolutionPolicy};
use edgepaas_core::storage::StoragePool;

use common::{FixedStore, PRIMARY_SECURE, ScriptedConnector};

async fn webhook_server(expected: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(expected)
        .mount(&server)
        .await;
    server
}

fn alerts_for(server: &MockServer) -> AlertDispatcher {
    AlertDispatcher::from_config(&AlertConfig {
        webhook_url: Some(format!("{}/hook", server.uri())),
        email: None,
        timeout: Duration::from_secs(5),
    })
}

fn boot(
    mode: ResolutionMode,
    fallback_url: String,
    revision: Option<&str>,
    connector: Arc<ScriptedConnector>,
    alerts: AlertDispatcher,
) -> BootSequence {
    let policy =
        ResolutionPolicy::from_config(&common::database_config(mode, fallback_url)).unwrap();
    let checker = MigrationChecker::new(
        common::shipped_migrations(),
        Arc::new(FixedStore(revision.map(String::from))),
    );
    BootSequence::new(policy, checker, alerts).with_connector(connector)
}

#[tokio::test]
async fn test_unreachable_primary_degrades_to_fallback_without_external_alert() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_url = format!("embedded://{}", dir.path().join("fallback.db").display());
    let webhook = webhook_server(0).await;
    let connector = ScriptedConnector::new(&[]);

    let mut sequence = boot(
        ResolutionMode::PrimaryWithFallback,
        fallback_url.clone(),
        None,
        connector.clone(),
        alerts_for(&webhook),
    );
    let report = sequence.run().await.unwrap();

    assert_eq!(sequence.state(), BootState::Passed);
    assert_eq!(report.outcome.origin(), CandidateStage::Fallback);
    assert_eq!(report.outcome.target().url(), fallback_url);
    assert!(!report.outcome.migrations_authorized());
    assert!(report.outcome.is_degraded());
    assert_eq!(report.migrations, MigrationCheck::Skipped);
    assert_eq!(connector.calls().len(), 3);

    let StoragePool::Sqlite(pool) = &report.storage else {
        panic!("expected embedded pool");
    };
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('weatherusers', 'preferences') ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .unwrap();
    assert_eq!(tables, vec!["preferences", "weatherusers"]);
    report.storage.close().await;
}

#[tokio::test]
async fn test_primary_only_exhaustion_fails_boot_and_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_url = format!("sqlite://{}", dir.path().join("fallback.db").display());
    let webhook = webhook_server(1).await;
    let connector = ScriptedConnector::new(&[]);

    let mut sequence = boot(
        ResolutionMode::PrimaryOnly,
        fallback_url,
        None,
        connector.clone(),
        alerts_for(&webhook),
    );
    let err = sequence.run().await.unwrap_err();

    assert!(matches!(err, Error::Timeout(ref t) if t.attempts == 3));
    assert_eq!(sequence.state(), BootState::Failed);
    assert_eq!(connector.calls(), vec![PRIMARY_SECURE; 3]);
    assert!(!dir.path().join("fallback.db").exists());
}

#[tokio::test]
async fn test_migration_mismatch_fails_boot() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_url = format!("sqlite://{}", dir.path().join("fallback.db").display());
    let webhook = webhook_server(1).await;

    let mut sequence = boot(
        ResolutionMode::PrimaryWithFallback,
        fallback_url,
        None,
        ScriptedConnector::new(&[PRIMARY_SECURE]),
        alerts_for(&webhook),
    );
    let err = sequence.run().await.unwrap_err();

    match err {
        Error::MigrationMismatch { current, head } => {
            assert_eq!(current, None);
            assert_eq!(head.as_deref(), Some("20250101000001"));
        }
        other => panic!("expected migration mismatch, got {other:?}"),
    }
    assert_eq!(sequence.state(), BootState::Failed);
}

#[tokio::test]
async fn test_primary_at_head_passes() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_url = format!("sqlite://{}", dir.path().join("fallback.db").display());
    let webhook = webhook_server(0).await;

    let mut sequence = boot(
        ResolutionMode::PrimaryWithFallback,
        fallback_url,
        Some("20250101000001"),
        ScriptedConnector::new(&[PRIMARY_SECURE]),
        alerts_for(&webhook),
    );
    let report = sequence.run().await.unwrap();

    assert_eq!(sequence.state(), BootState::Passed);
    assert_eq!(report.outcome.origin(), CandidateStage::PrimarySecure);
    assert!(report.outcome.migrations_authorized());
    assert!(!report.outcome.is_degraded());
    assert_eq!(
        report.migrations,
        MigrationCheck::Consistent {
            revision: Some("20250101000001".to_string())
        }
    );
    assert!(!report.storage.is_embedded());
}

#[tokio::test]
async fn test_fallback_only_boot_never_probes() {
    let dir = tempfile::tempdir().unwrap();
    let fallback_url = format!("sqlite://{}", dir.path().join("fallback.db").display());
    let webhook = webhook_server(0).await;
    let connector = ScriptedConnector::new(&[PRIMARY_SECURE]);

    let mut sequence = boot(
        ResolutionMode::FallbackOnly,
        fallback_url,
        None,
        connector.clone(),
        alerts_for(&webhook),
    );
    let report = sequence.run().await.unwrap();

    assert_eq!(report.outcome.origin(), CandidateStage::Fallback);
    assert!(!report.outcome.is_degraded());
    assert!(connector.calls().is_empty());
    report.storage.close().await;
}

#[tokio::test]
async fn test_unsupported_primary_scheme_fails_boot_and_alerts() {
    let dir = tempfile::tempdir().unwrap();
    let webhook = webhook_server(1).await;

    let mut database = common::database_config(
        ResolutionMode::PrimaryWithFallback,
        format!("sqlite://{}", dir.path().join("fallback.db").display()),
    );
    database.primary_url = Some("mysql://db/app".to_string());
    let config = Config {
        database,
        migrations: MigrationConfig {
            scripts_dir: common::shipped_migrations(),
            apply: false,
        },
        alerts: AlertConfig {
            webhook_url: Some(format!("{}/hook", webhook.uri())),
            email: None,
            timeout: Duration::from_secs(5),
        },
    };

    let mut sequence = BootSequence::from_config(&config);
    assert_eq!(sequence.state(), BootState::Pending);

    let err = sequence.run().await.unwrap_err();

    assert!(matches!(err, Error::UnsupportedScheme { .. }));
    assert_eq!(sequence.state(), BootState::Failed);
    assert!(!dir.path().join("fallback.db").exists());
}
