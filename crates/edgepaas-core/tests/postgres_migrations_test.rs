// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Migration apply/check against a real PostgreSQL.
//!
//! Skipped unless `TEST_DATABASE_URL` points at a disposable database.

mod common;

use std::sync::Arc;

use edgepaas_core::migrations::{MigrationCheck, MigrationChecker, SqlxRevisionStore};
use edgepaas_core::probe::{Connector, SqlxConnector};
use edgepaas_core::resolve::{CandidateStage, ResolutionOutcome};
use edgepaas_core::target::{BackendKind, ConnectionTarget};

fn test_target() -> Option<ConnectionTarget> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    ConnectionTarget::new(url, BackendKind::SecondaryRelational).ok()
}

#[tokio::test]
async fn test_apply_then_check_is_consistent() {
    let Some(target) = test_target() else {
        eprintln!("Skipping: TEST_DATABASE_URL not set");
        return;
    };

    SqlxConnector::default().connect(&target).await.unwrap();

    let checker = MigrationChecker::new(
        common::shipped_migrations(),
        Arc::new(SqlxRevisionStore::default()),
    );
    let outcome = ResolutionOutcome::new(target.clone(), CandidateStage::Secondary);

    checker.apply(&outcome).await.unwrap();
    // Applying twice is a no-op.
    checker.apply(&outcome).await.unwrap();

    let check = checker.check(&target).await.unwrap();
    assert_eq!(
        check,
        MigrationCheck::Consistent {
            revision: Some("20250101000001".to_string())
        }
    );
}
