//! cloudburst.toml configuration parser.
//!
//! Every section is optional and falls back to the defaults below, so a
//! minimal file only needs the cloud project:
//!
//! ```toml
//! [instance]
//! project = "my-project"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{format_duration, serde_str};
use crate::types::Metric;

/// Upper bound on any configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub metrics: MetricsConfig,
    pub thresholds: ThresholdsConfig,
    pub controller: ControllerConfig,
    pub instance: InstanceConfig,
    pub readiness: ReadinessConfig,
    pub access_rule: AccessRuleConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsBackend {
    /// Prometheus HTTP query API.
    Prometheus,
    /// JSON document on local disk, written by the workload.
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub backend: MetricsBackend,
    /// Base URL of the Prometheus server.
    pub url: String,
    /// Path of the metrics document for the `file` backend.
    pub path: Option<PathBuf>,
    #[serde(with = "serde_str")]
    pub timeout: Duration,
    pub cpu_query: String,
    pub memory_query: String,
    pub disk_query: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            backend: MetricsBackend::Prometheus,
            url: "http://localhost:9090".to_string(),
            path: None,
            timeout: Duration::from_secs(5),
            cpu_query: r#"100 - (avg by(instance) (rate(node_cpu_seconds_total{mode="idle"}[1m])) * 100)"#
                .to_string(),
            memory_query: "100 * (1 - node_memory_MemAvailable_bytes / node_memory_MemTotal_bytes)"
                .to_string(),
            disk_query: r#"100 - node_filesystem_avail_bytes{mountpoint="/"} / node_filesystem_size_bytes{mountpoint="/"} * 100"#
                .to_string(),
        }
    }
}

/// Percent limits per metric.
///
/// A metric left out of a `[thresholds]` section is not tracked. Without
/// the section all three are tracked at 75 %.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
    /// How long a breach must hold before scaling up.
    #[serde(default = "default_sustain", with = "serde_str")]
    pub sustain: Duration,
}

fn default_sustain() -> Duration {
    Duration::from_secs(10)
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu: Some(75.0),
            memory: Some(75.0),
            disk: Some(75.0),
            sustain: default_sustain(),
        }
    }
}

impl ThresholdsConfig {
    /// The limit for `metric`, or `None` when it is not tracked.
    pub fn limit(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cpu => self.cpu,
            Metric::Memory => self.memory,
            Metric::Disk => self.disk,
        }
    }

    /// Metrics with a configured limit.
    pub fn tracked(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.limit(*m).is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    #[serde(with = "serde_str")]
    pub poll_interval: Duration,
    #[serde(with = "serde_str")]
    pub cooldown: Duration,
    /// Delete attempts when cleaning up after a failed scale-up.
    pub cleanup_attempts: u32,
    /// Pause between cleanup attempts.
    #[serde(with = "serde_str")]
    pub cleanup_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(300),
            cleanup_attempts: 2,
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Well-known instance name; also used to find a leftover instance
    /// after a restart.
    pub name: String,
    pub project: String,
    pub zone: String,
    pub machine_type: String,
    pub image_family: String,
    pub image_project: String,
    pub network: String,
    pub tags: Vec<String>,
    /// Script passed to the instance as its startup payload.
    pub startup_script: Option<PathBuf>,
    /// Upper bound on any single provisioning-backend call.
    #[serde(with = "serde_str")]
    pub command_timeout: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: "cloudburst-vm".to_string(),
            project: String::new(),
            zone: "us-central1-a".to_string(),
            machine_type: "e2-medium".to_string(),
            image_family: "ubuntu-2204-lts".to_string(),
            image_project: "ubuntu-os-cloud".to_string(),
            network: "default".to_string(),
            tags: vec!["http-server".to_string(), "https-server".to_string()],
            startup_script: None,
            command_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Port the workload listens on.
    pub port: u16,
    /// Health endpoint path.
    pub path: String,
    pub attempts: u32,
    #[serde(with = "serde_str")]
    pub interval: Duration,
    /// Per-request timeout of a single health check.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
    /// Describe attempts while waiting for an external address.
    pub address_attempts: u32,
    #[serde(with = "serde_str")]
    pub address_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            path: "/api/metrics".to_string(),
            attempts: 20,
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            address_attempts: 12,
            address_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessRuleConfig {
    pub enabled: bool,
    /// Rule name is `{prefix}{instance name}`.
    pub prefix: String,
    pub target_tag: String,
}

impl Default for AccessRuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "allow-cloudburst-".to_string(),
            target_tag: "http-server".to_string(),
        }
    }
}

impl AccessRuleConfig {
    /// Name of the rule created for `instance`, if rules are enabled.
    pub fn rule_name(&self, instance: &str) -> Option<String> {
        self.enabled.then(|| format!("{}{}", self.prefix, instance))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Local directory shipped to the instance. When unset the image or
    /// startup script is expected to bring the workload up on its own.
    pub artifact: Option<PathBuf>,
    pub remote_user: String,
    pub remote_dir: String,
    /// Run on the instance after upload, from inside `remote_dir`.
    pub start_command: String,
    /// Upload attempts while remote shell access comes up.
    pub upload_attempts: u32,
    #[serde(with = "serde_str")]
    pub upload_interval: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            artifact: None,
            remote_user: "ubuntu".to_string(),
            remote_dir: "app".to_string(),
            start_command: "sudo pip3 install -r requirements.txt && nohup gunicorn -b 0.0.0.0:5000 app:app > app.log 2>&1 &"
                .to_string(),
            upload_attempts: 6,
            upload_interval: Duration::from_secs(10),
        }
    }
}

impl BurstConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn durations(&self) -> [(&'static str, Duration); 10] {
        [
            ("metrics.timeout", self.metrics.timeout),
            ("thresholds.sustain", self.thresholds.sustain),
            ("controller.poll_interval", self.controller.poll_interval),
            ("controller.cooldown", self.controller.cooldown),
            ("controller.cleanup_interval", self.controller.cleanup_interval),
            ("instance.command_timeout", self.instance.command_timeout),
            ("readiness.interval", self.readiness.interval),
            ("readiness.timeout", self.readiness.timeout),
            ("readiness.address_interval", self.readiness.address_interval),
            ("deploy.upload_interval", self.deploy.upload_interval),
        ]
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let tracked = self.thresholds.tracked();
        if tracked.is_empty() {
            return invalid("[thresholds] must set at least one of cpu, memory, disk".into());
        }
        for metric in tracked {
            let limit = self.thresholds.limit(metric).unwrap_or_default();
            if !(limit > 0.0 && limit <= 100.0) {
                return invalid(format!("thresholds.{metric} must be in (0, 100], got {limit}"));
            }
        }
        for (name, value) in self.durations() {
            if value > MAX_DURATION {
                return invalid(format!(
                    "{name} must be at most {}, got {}s",
                    format_duration(MAX_DURATION),
                    value.as_secs()
                ));
            }
        }
        if self.controller.poll_interval.is_zero() {
            return invalid("controller.poll_interval must be greater than zero".into());
        }
        if self.controller.cooldown.is_zero() {
            return invalid("controller.cooldown must be greater than zero".into());
        }
        if self.controller.cleanup_attempts == 0 {
            return invalid("controller.cleanup_attempts must be at least 1".into());
        }
        if self.readiness.attempts == 0 || self.readiness.address_attempts == 0 {
            return invalid("readiness attempt counts must be at least 1".into());
        }
        if self.deploy.artifact.is_some() && self.deploy.upload_attempts == 0 {
            return invalid("deploy.upload_attempts must be at least 1".into());
        }
        if self.instance.command_timeout.is_zero() {
            return invalid("instance.command_timeout must be greater than zero".into());
        }
        if self.instance.name.trim().is_empty() {
            return invalid("instance.name must not be empty".into());
        }
        if self.metrics.backend == MetricsBackend::File && self.metrics.path.is_none() {
            return invalid("metrics.path is required for the file backend".into());
        }
        Ok(())
    }
}
