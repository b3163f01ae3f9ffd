//! Domain types shared by the metrics source, provisioner, and controller.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ── Metrics ────────────────────────────────────────────────────────

/// Utilization of the local workload at one point in time.
///
/// Produced fresh by each poll and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Monotonic time the sample was taken.
    pub observed_at: Instant,
}

impl MetricsSnapshot {
    /// Build a snapshot stamped with the current time.
    pub fn now(cpu_percent: f64, memory_percent: f64, disk_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            disk_percent,
            observed_at: Instant::now(),
        }
    }

    /// Value of a single tracked metric.
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu_percent,
            Metric::Memory => self.memory_percent,
            Metric::Disk => self.disk_percent,
        }
    }
}

/// A utilization metric the controller can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cpu, Metric::Memory, Metric::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Scaling state ──────────────────────────────────────────────────

/// Lifecycle of the single remote instance, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingState {
    /// No remote instance; breach evaluation may start provisioning.
    Idle,
    /// A remote instance is being created and brought up.
    Provisioning,
    /// The remote instance is serving the workload.
    Scaled,
    /// The remote instance is being torn down.
    Deprovisioning,
}

impl ScalingState {
    /// Whether moving from `self` to `next` follows the state machine.
    ///
    /// Transitions are strictly sequential: nothing skips Provisioning
    /// on the way up or Deprovisioning on the way down.
    pub fn can_transition_to(self, next: ScalingState) -> bool {
        use ScalingState::*;
        matches!(
            (self, next),
            (Idle, Provisioning)
                | (Provisioning, Scaled)
                | (Provisioning, Idle)
                | (Scaled, Deprovisioning)
                | (Deprovisioning, Idle)
        )
    }

    /// Whether an instance handle may exist in this state.
    pub fn holds_instance(self) -> bool {
        !matches!(self, ScalingState::Idle)
    }
}

impl fmt::Display for ScalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalingState::Idle => "idle",
            ScalingState::Provisioning => "provisioning",
            ScalingState::Scaled => "scaled",
            ScalingState::Deprovisioning => "deprovisioning",
        };
        f.write_str(s)
    }
}

// ── Instance ───────────────────────────────────────────────────────

/// The remote instance currently managed by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub name: String,
    /// External IP or hostname, once the backend has assigned one.
    pub external_address: Option<String>,
    /// Unix timestamp (seconds) when the create request was issued.
    pub created_at: u64,
    /// True once the workload answered its health check.
    pub ready: bool,
    /// Network-access rule created for this instance, if any.
    pub access_rule: Option<String>,
}

impl InstanceHandle {
    /// A handle for an instance whose create request was just accepted.
    pub fn created(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external_address: None,
            created_at: epoch_secs(),
            ready: false,
            access_rule: None,
        }
    }
}

/// Seconds since the Unix epoch, saturating to zero on clock skew.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_transitions_only() {
        use ScalingState::*;
        assert!(Idle.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Scaled));
        assert!(Provisioning.can_transition_to(Idle));
        assert!(Scaled.can_transition_to(Deprovisioning));
        assert!(Deprovisioning.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Scaled));
        assert!(!Idle.can_transition_to(Deprovisioning));
        assert!(!Scaled.can_transition_to(Idle));
        assert!(!Provisioning.can_transition_to(Provisioning));
        assert!(!Deprovisioning.can_transition_to(Scaled));
    }

    #[test]
    fn only_idle_is_instance_free() {
        assert!(!ScalingState::Idle.holds_instance());
        assert!(ScalingState::Provisioning.holds_instance());
        assert!(ScalingState::Scaled.holds_instance());
        assert!(ScalingState::Deprovisioning.holds_instance());
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(ScalingState::Deprovisioning.to_string(), "deprovisioning");
        let parsed: Metric = toml::Value::String("memory".into()).try_into().unwrap();
        assert_eq!(parsed, Metric::Memory);
    }

    #[test]
    fn snapshot_value_by_metric() {
        let snap = MetricsSnapshot::now(10.0, 20.0, 30.0);
        assert_eq!(snap.value(Metric::Cpu), 10.0);
        assert_eq!(snap.value(Metric::Memory), 20.0);
        assert_eq!(snap.value(Metric::Disk), 30.0);
    }

    #[test]
    fn created_handle_is_not_ready() {
        let handle = InstanceHandle::created("burst-vm");
        assert_eq!(handle.name, "burst-vm");
        assert!(!handle.ready);
        assert!(handle.external_address.is_none());
        assert!(handle.created_at > 0);
    }
}
