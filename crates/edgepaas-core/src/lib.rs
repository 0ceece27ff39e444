// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! edgepaas Core - Database Readiness Orchestration
//!
//! This crate decides, at process boot, which database backend the
//! application runs against and whether it is safe to start serving traffic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Normalizer  │──▶│ Retry Prober │──▶│ Resolution Policy  │
//! │  (target)    │   │  (probe)     │   │  (resolve)         │
//! └──────────────┘   └──────────────┘   └─────────┬──────────┘
//!                                                 │ ResolutionOutcome
//!                                                 ▼
//!                    ┌──────────────────┐   ┌────────────────────┐
//!                    │ Migration Check  │──▶│ Readiness          │
//!                    │  (migrations)    │   │  (readiness)       │
//!                    └──────────────────┘   └─────────┬──────────┘
//!                                                     │ failure paths
//!                                                     ▼
//!                                           ┌────────────────────┐
//!                                           │ Alert Dispatcher   │
//!                                           │  (alert)           │
//!                                           └────────────────────┘
//! ```
//!
//! # Resolution Modes
//!
//! | Mode | Legacy name | Behavior |
//! |------|-------------|----------|
//! | `fallback-only` | `sqlite_only` | No probing, embedded fallback wins |
//! | `primary-only` | `postgres_only` | Primary must answer, otherwise boot fails |
//! | `primary-with-fallback` | `try_postgres` | Primary variants, then secondary, then fallback |
//!
//! Schema migrations are only ever authorized against the primary or
//! secondary relational store. The embedded fallback is bootstrapped with
//! an idempotent schema script and is never migrated.
//!
//! # Modules
//!
//! - [`alert`]: Webhook/email alert dispatch with suppression
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error taxonomy for boot and readiness
//! - [`migrations`]: Migration consistency checking and application
//! - [`probe`]: Connection attempts with fixed backoff
//! - [`readiness`]: Boot sequence and live/ready probes
//! - [`resolve`]: Candidate ordering and backend resolution
//! - [`storage`]: Connection pools for the resolved backend
//! - [`target`]: Connection URL classification and security parameter handling

#![deny(missing_docs)]

/// Alert delivery through webhook and email channels.
pub mod alert;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for readiness operations.
pub mod error;

/// Migration history consistency checks.
pub mod migrations;

/// Single-target connection probing with retries.
pub mod probe;

/// Boot sequence and HTTP probe verdicts.
pub mod readiness;

/// Backend resolution across ordered candidates.
pub mod resolve;

/// Storage connection factory.
pub mod storage;

/// Connection targets and URL normalization.
pub mod target;

pub use config::Config;
pub use error::{Error, Result};
