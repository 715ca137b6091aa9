//! Application configuration.
//!
//! Values are layered with `figment`: built-in defaults, then the TOML file,
//! then `JOBDROP_*` environment variables, then command line overrides.

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "jobdrop.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub bind_address: IpAddr,
    pub http_port: u16,
    pub archive_directory: PathBuf,
    pub retention_days: u64,
    pub job_timeout_secs: u64,
    pub verbose: bool,
    pub json_logs: bool,
    #[serde(default)]
    pub jobs: BTreeMap<String, JobConfig>,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// A job entry as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Defaults to the executable's parent directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    pub output_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub channel: NotificationChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannelType {
    #[default]
    None,
    Slack,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8000,
            archive_directory: PathBuf::from("archives"),
            retention_days: 7,
            job_timeout_secs: 300,
            verbose: false,
            json_logs: false,
            jobs: BTreeMap::new(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` (if it exists), the environment and
    /// optional command line overrides.
    pub fn new<T: Serialize>(path: &Path, overrides: Option<&T>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("JOBDROP_").split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_timeout_secs == 0 {
            bail!("job_timeout_secs must be greater than zero");
        }

        for name in self.jobs.keys() {
            if !is_valid_job_name(name) {
                bail!("Invalid job name {:?}: must be non-empty and contain no path separators", name);
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

fn is_valid_job_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..") && name != "."
}
