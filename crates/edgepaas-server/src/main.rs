// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! edgepaas-server - database readiness gate and health probe server
//!
//! Usage:
//!   edgepaas-server [serve]     # boot, then serve HTTP until Ctrl-C
//!   edgepaas-server verify      # boot once, exit 0/1
//!   edgepaas-server ssl-check   # probe the primary with and without sslmode

use std::process::ExitCode;

use tracing::{error, info, warn};

use edgepaas_core::Config;
use edgepaas_core::config::ConfigError;
use edgepaas_core::probe::{self, ProbePolicy, SqlxConnector};
use edgepaas_core::readiness::BootSequence;
use edgepaas_core::target::{BackendKind, ConnectionTarget};
use edgepaas_server::AppState;
use edgepaas_server::config::{LogFormat, ServerConfig};

fn print_usage() {
    eprintln!(
        r#"Usage: edgepaas-server [command]

Resolve a database backend, verify migrations and serve health probes.

COMMANDS:
    serve           Boot, then serve HTTP until Ctrl-C (default)
    verify          Run the boot sequence once and exit 0 on success
    ssl-check       Probe the primary database with and without sslmode=require

ENVIRONMENT:
    EDGEPAAS_DATABASE_URL       Primary database URL
    EDGEPAAS_FALLBACK_URL       Embedded fallback URL (default: sqlite://.data/fallback.db)
    EDGEPAAS_DB_MODE            fallback-only | primary-only | primary-with-fallback
    EDGEPAAS_HOST, EDGEPAAS_PORT  HTTP bind (default: 0.0.0.0:8000)
    RUST_LOG                    Log filter (default: edgepaas_server=info,edgepaas_core=info)
    EDGEPAAS_LOG_FORMAT         text | json
"#
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Verify,
    SslCheck,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    let cmd = match args.get(1).map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("verify") => Command::Verify,
        Some("ssl-check") => Command::SslCheck,
        Some("help" | "--help" | "-h") => {
            print_usage();
            std::process::exit(0);
        }
        Some(other) => return Err(format!("Unknown command: {}", other)),
    };

    if let Some(extra) = args.get(2) {
        return Err(format!("Unexpected argument: {}", extra));
    }
    Ok(cmd)
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "edgepaas_server=info,edgepaas_core=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let dotenv = dotenvy::dotenv();

    let server_config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(server_config.log_format);

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::FAILURE;
        }
    };

    let result = match cmd {
        Command::Serve => serve(&config, server_config).await,
        Command::Verify => verify(&config).await,
        Command::SslCheck => ssl_check(&config).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: &Config, server_config: ServerConfig) -> anyhow::Result<bool> {
    let mut boot = BootSequence::from_config(config);
    let report = match boot.run().await {
        Ok(report) => report,
        Err(_) => return Ok(false),
    };

    let storage = report.storage.clone();
    let state = AppState::from_boot(&boot, report, server_config.system);

    edgepaas_server::serve(server_config.bind_addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    })
    .await?;

    storage.close().await;
    info!("Server stopped");
    Ok(true)
}

async fn verify(config: &Config) -> anyhow::Result<bool> {
    let mut boot = BootSequence::from_config(config);
    match boot.run().await {
        Ok(report) => {
            println!(
                "✅ {} ({}), migrations: {:?}",
                report.outcome.target().redacted(),
                report.outcome.origin(),
                report.migrations
            );
            report.storage.close().await;
            Ok(true)
        }
        Err(e) => {
            println!("❌ {}", e);
            Ok(false)
        }
    }
}

async fn ssl_check(config: &Config) -> anyhow::Result<bool> {
    let url = config
        .database
        .primary_url
        .as_deref()
        .ok_or(ConfigError::Missing("EDGEPAAS_DATABASE_URL"))?;
    let target = ConnectionTarget::new(url, BackendKind::PrimaryRelational)?;
    let connector = SqlxConnector::new(config.database.connect_timeout);

    let mut any_connected = false;
    for (label, candidate) in [
        ("sslmode=require", target.with_security()),
        ("no sslmode", target.without_security()),
    ] {
        match probe::probe(&connector, &candidate, ProbePolicy::once()).await {
            Ok(success) => {
                any_connected = true;
                println!(
                    "✅ {}: connected to {} in {:.2?}",
                    label,
                    candidate.redacted(),
                    success.elapsed
                );
            }
            Err(e) => println!("❌ {}: {}", label, e.last_error),
        }
    }
    Ok(any_connected)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Helper to create args vector from string slice
    fn args(a: &[&str]) -> Vec<String> {
        a.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_defaults_to_serve() {
        assert_eq!(
            parse_args_from_vec(&args(&["edgepaas-server"])).unwrap(),
            Command::Serve
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_args_from_vec(&args(&["edgepaas-server", "serve"])).unwrap(),
            Command::Serve
        );
        assert_eq!(
            parse_args_from_vec(&args(&["edgepaas-server", "verify"])).unwrap(),
            Command::Verify
        );
        assert_eq!(
            parse_args_from_vec(&args(&["edgepaas-server", "ssl-check"])).unwrap(),
            Command::SslCheck
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = parse_args_from_vec(&args(&["edgepaas-server", "migrate"])).unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[test]
    fn test_parse_rejects_extra_arguments() {
        let err = parse_args_from_vec(&args(&["edgepaas-server", "verify", "--now"])).unwrap_err();
        assert!(err.contains("--now"));
    }
}
