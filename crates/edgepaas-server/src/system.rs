// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host resource sampling for `/health/system`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, System};

/// Usage limits in percent. A sample strictly above a limit is a breach.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemThresholds {
    /// CPU limit.
    pub cpu_percent: f32,
    /// Memory limit.
    pub memory_percent: f32,
    /// Disk limit.
    pub disk_percent: f32,
    /// Path whose filesystem is monitored.
    pub disk_path: PathBuf,
}

impl Default for SystemThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 85.0,
            memory_percent: 90.0,
            disk_percent: 90.0,
            disk_path: PathBuf::from("/tmp"),
        }
    }
}

/// One reading of host usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSample {
    /// Global CPU usage.
    pub cpu_percent: f32,
    /// Used memory over total memory.
    pub memory_percent: f32,
    /// Used space on the monitored filesystem.
    pub disk_percent: f32,
}

/// Body of the `/health/system` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemReport {
    /// `healthy` or `unhealthy`.
    pub status: &'static str,
    /// CPU reading.
    pub cpu_percent: f32,
    /// Memory reading.
    pub memory_percent: f32,
    /// Disk reading.
    pub disk_percent: f32,
    /// Breaches joined with ` | `, or `System OK ✅`.
    pub message: String,
    #[serde(skip)]
    breaches: Vec<String>,
}

impl SystemReport {
    /// Whether any threshold was breached.
    pub fn is_healthy(&self) -> bool {
        self.breaches.is_empty()
    }

    /// Individual breach descriptions.
    pub fn breaches(&self) -> &[String] {
        &self.breaches
    }
}

/// Compare a sample with the thresholds.
pub fn evaluate(sample: SystemSample, thresholds: &SystemThresholds) -> SystemReport {
    let mut breaches = Vec::new();

    if sample.cpu_percent > thresholds.cpu_percent {
        breaches.push(format!(
            "High CPU usage: {:.1}% (>{}%)",
            sample.cpu_percent, thresholds.cpu_percent
        ));
    }
    if sample.memory_percent > thresholds.memory_percent {
        breaches.push(format!(
            "High Memory usage: {:.1}% (>{}%)",
            sample.memory_percent, thresholds.memory_percent
        ));
    }
    if sample.disk_percent > thresholds.disk_percent {
        breaches.push(format!(
            "High Disk usage ({}): {:.1}% (>{}%)",
            thresholds.disk_path.display(),
            sample.disk_percent,
            thresholds.disk_percent
        ));
    }

    let (status, message) = if breaches.is_empty() {
        ("healthy", "System OK ✅".to_string())
    } else {
        ("unhealthy", breaches.join(" | "))
    };

    SystemReport {
        status,
        cpu_percent: sample.cpu_percent,
        memory_percent: sample.memory_percent,
        disk_percent: sample.disk_percent,
        message,
        breaches,
    }
}

/// Source of host usage readings.
#[async_trait]
pub trait SystemSampler: Send + Sync {
    /// Take one reading for the filesystem holding `disk_path`.
    async fn sample(&self, disk_path: &Path) -> std::io::Result<SystemSample>;
}

/// [`SystemSampler`] backed by sysinfo.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoSampler;

#[async_trait]
impl SystemSampler for SysinfoSampler {
    async fn sample(&self, disk_path: &Path) -> std::io::Result<SystemSample> {
        let disk_path = disk_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_host(&disk_path))
            .await
            .map_err(std::io::Error::other)
    }
}

fn read_host(disk_path: &Path) -> SystemSample {
    let mut sys = System::new();
    // CPU usage is a delta between two refreshes.
    sys.refresh_cpu_usage();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let memory_percent = percent(sys.used_memory(), sys.total_memory());

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disks
        .list()
        .iter()
        .filter(|disk| disk_path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| {
            percent(
                disk.total_space().saturating_sub(disk.available_space()),
                disk.total_space(),
            )
        })
        .unwrap_or(0.0);

    SystemSample {
        cpu_percent: sys.global_cpu_usage(),
        memory_percent,
        disk_percent,
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f32, memory: f32, disk: f32) -> SystemSample {
        SystemSample {
            cpu_percent: cpu,
            memory_percent: memory,
            disk_percent: disk,
        }
    }

    #[test]
    fn test_evaluate_healthy() {
        let report = evaluate(sample(10.0, 40.0, 50.0), &SystemThresholds::default());
        assert!(report.is_healthy());
        assert_eq!(report.status, "healthy");
        assert_eq!(report.message, "System OK ✅");
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let report = evaluate(sample(85.0, 90.0, 90.0), &SystemThresholds::default());
        assert!(report.is_healthy());
    }

    #[test]
    fn test_evaluate_reports_every_breach() {
        let report = evaluate(sample(97.3, 95.0, 99.0), &SystemThresholds::default());

        assert_eq!(report.status, "unhealthy");
        assert_eq!(report.breaches().len(), 3);
        assert_eq!(
            report.message,
            "High CPU usage: 97.3% (>85%) | High Memory usage: 95.0% (>90%) | High Disk usage (/tmp): 99.0% (>90%)"
        );
    }

    #[test]
    fn test_percent_handles_empty_total() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn test_report_serialization_hides_breach_list() {
        let report = evaluate(sample(99.0, 10.0, 10.0), &SystemThresholds::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert!(json.get("breaches").is_none());
    }

    #[tokio::test]
    async fn test_sysinfo_sampler_reads_plausible_values() {
        let sample = SysinfoSampler.sample(Path::new("/")).await.unwrap();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!((0.0..=100.0).contains(&sample.disk_percent));
    }
}
