// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server configuration loading from environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub use edgepaas_core::config::ConfigError;

use crate::system::SystemThresholds;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the probe surface binds to.
    pub bind_addr: SocketAddr,
    /// Limits for `/health/system`.
    pub system: SystemThresholds,
    /// Subscriber output format.
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `EDGEPAAS_HOST`: bind host (default: 0.0.0.0)
    /// - `EDGEPAAS_PORT`: bind port (default: 8000)
    /// - `SYS_CPU_THRESHOLD`, `SYS_MEM_THRESHOLD`, `SYS_DISK_THRESHOLD`:
    ///   percent limits (default: 85, 90, 90)
    /// - `SYS_DISK_PATH`: monitored path (default: /tmp)
    /// - `EDGEPAAS_LOG_FORMAT`: `text` or `json` (default: text)
    pub fn from_env() -> Result<Self, ConfigError> {
        let host: IpAddr = std::env::var("EDGEPAAS_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("EDGEPAAS_HOST", "must be an IP address"))?;

        let port: u16 = std::env::var("EDGEPAAS_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("EDGEPAAS_PORT", "must be a valid port number"))?;

        let system = SystemThresholds {
            cpu_percent: percent_var("SYS_CPU_THRESHOLD", 85.0)?,
            memory_percent: percent_var("SYS_MEM_THRESHOLD", 90.0)?,
            disk_percent: percent_var("SYS_DISK_THRESHOLD", 90.0)?,
            disk_path: std::env::var("SYS_DISK_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp")),
        };

        let log_format = match std::env::var("EDGEPAAS_LOG_FORMAT")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "" | "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            _ => {
                return Err(ConfigError::Invalid(
                    "EDGEPAAS_LOG_FORMAT",
                    "must be text or json",
                ));
            }
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            system,
            log_format,
        })
    }
}

fn percent_var(name: &'static str, default: f32) -> Result<f32, ConfigError> {
    let value: f32 = match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(name, "must be a number between 0 and 100"))?,
        Err(_) => default,
    };
    if !(0.0..=100.0).contains(&value) {
        return Err(ConfigError::Invalid(
            name,
            "must be a number between 0 and 100",
        ));
    }
    Ok(value)
}
