//! `/actuator/info`: application, runtime, system and uptime details

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const APPLICATION_NAME: &str = "weaver";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub pid: u32,
    pub available_processors: usize,
    pub debug_build: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub os_family: String,
    pub arch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UptimeInfo {
    pub milliseconds: u64,
    pub seconds: u64,
    pub formatted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoReport {
    pub application: ApplicationInfo,
    pub runtime: RuntimeInfo,
    pub system: SystemInfo,
    pub uptime: UptimeInfo,
}

/// Collects the info report; uptime counts from construction
pub struct InfoContributor {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl InfoContributor {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn report(&self) -> InfoReport {
        let uptime = self.started.elapsed();
        InfoReport {
            application: ApplicationInfo {
                name: APPLICATION_NAME.to_string(),
                description: env!("CARGO_PKG_DESCRIPTION").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                start_time: self.started_at,
            },
            runtime: RuntimeInfo {
                pid: std::process::id(),
                available_processors: std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
                debug_build: cfg!(debug_assertions),
            },
            system: SystemInfo {
                os: std::env::consts::OS.to_string(),
                os_family: std::env::consts::FAMILY.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
            uptime: UptimeInfo {
                milliseconds: uptime.as_millis() as u64,
                seconds: uptime.as_secs(),
                formatted: format_uptime(uptime),
            },
        }
    }
}

impl Default for InfoContributor {
    fn default() -> Self {
        Self::new()
    }
}

/// `1d 2h 3m 4s`, dropping leading zero units
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let (days, hours, minutes, seconds) = (
        total / 86_400,
        (total / 3_600) % 24,
        (total / 60) % 60,
        total % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(Duration::from_secs(7)), "7s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }

    #[test]
    fn report_describes_this_build() {
        let report = InfoContributor::new().report();
        assert_eq!(report.application.name, "weaver");
        assert_eq!(report.application.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(report.system.os, std::env::consts::OS);
        assert!(report.runtime.available_processors >= 1);
        assert_eq!(report.uptime.seconds, report.uptime.milliseconds / 1_000);
    }
}
