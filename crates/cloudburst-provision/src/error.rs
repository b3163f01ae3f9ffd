//! Provisioning error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use cloudburst_core::InstanceHandle;
use cloudburst_health::ReadinessTimeout;

/// Errors from a single provisioning-backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected backend output: {0}")]
    Malformed(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("backend rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

/// The provisioning step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Address,
    Deploy,
    Readiness,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Create => "create",
            Stage::Address => "address",
            Stage::Deploy => "deploy",
            Stage::Readiness => "readiness",
        };
        f.write_str(s)
    }
}

/// A scale-up attempt that did not produce a usable instance.
///
/// Every variant past `Create` carries the handle of the instance that
/// was created, so the caller can delete it.
#[derive(Debug, Error)]
pub enum ProvisioningFailure {
    #[error("create-instance {name} failed: {source}")]
    Create {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("instance {} got no external address after {attempts} describe attempts", instance.name)]
    Address {
        instance: InstanceHandle,
        attempts: u32,
    },

    #[error("deploying to instance {} failed: {source}", instance.name)]
    Deploy {
        instance: InstanceHandle,
        #[source]
        source: BackendError,
    },

    #[error("instance {} never became ready: {source}", instance.name)]
    ReadinessTimeout {
        instance: InstanceHandle,
        #[source]
        source: ReadinessTimeout,
    },
}

impl ProvisioningFailure {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Create { .. } => Stage::Create,
            Self::Address { .. } => Stage::Address,
            Self::Deploy { .. } => Stage::Deploy,
            Self::ReadinessTimeout { .. } => Stage::Readiness,
        }
    }

    /// The partially provisioned instance that must be cleaned up, if any.
    pub fn partial_instance(&self) -> Option<&InstanceHandle> {
        match self {
            Self::Create { .. } => None,
            Self::Address { instance, .. }
            | Self::Deploy { instance, .. }
            | Self::ReadinessTimeout { instance, .. } => Some(instance),
        }
    }
}

/// The instance could not be deleted; it is presumed orphaned.
#[derive(Debug, Error)]
#[error("failed to delete instance {instance}: {source}")]
pub struct DeprovisionFailure {
    pub instance: String,
    #[source]
    pub source: BackendError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_failure_has_nothing_to_clean_up() {
        let failure = ProvisioningFailure::Create {
            name: "vm".into(),
            source: BackendError::Malformed("boom".into()),
        };
        assert_eq!(failure.stage(), Stage::Create);
        assert!(failure.partial_instance().is_none());
    }

    #[test]
    fn later_failures_carry_the_instance() {
        let instance = InstanceHandle::created("vm");
        let failure = ProvisioningFailure::ReadinessTimeout {
            instance: instance.clone(),
            source: ReadinessTimeout {
                address: "1.2.3.4:5000".into(),
                path: "/".into(),
                attempts: 3,
            },
        };
        assert_eq!(failure.stage(), Stage::Readiness);
        assert_eq!(failure.partial_instance(), Some(&instance));
        assert!(failure.to_string().contains("never became ready"));
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Address.to_string(), "address");
        assert_eq!(Stage::Readiness.to_string(), "readiness");
    }
}
