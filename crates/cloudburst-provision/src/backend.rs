//! The provisioning-backend capability interface.

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cloudburst_core::config::InstanceConfig;

use crate::error::BackendError;

/// Everything the backend needs to create the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub name: String,
    pub machine_type: String,
    pub image_family: String,
    pub image_project: String,
    pub network: String,
    pub tags: Vec<String>,
    /// Script run by the instance on first boot.
    pub startup_script: Option<PathBuf>,
}

impl InstanceSpec {
    pub fn from_config(config: &InstanceConfig) -> Self {
        Self {
            name: config.name.clone(),
            machine_type: config.machine_type.clone(),
            image_family: config.image_family.clone(),
            image_project: config.image_project.clone(),
            network: config.network.clone(),
            tags: config.tags.clone(),
            startup_script: config.startup_script.clone(),
        }
    }
}

/// What the backend currently knows about an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub name: String,
    /// Backend lifecycle status, e.g. `RUNNING` or `STAGING`.
    pub status: String,
    pub external_address: Option<String>,
}

impl InstanceDescription {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// Inbound TCP access to the workload port on tagged instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub name: String,
    pub port: u16,
    pub target_tag: String,
}

/// Primitive operations offered by a cloud provider.
///
/// Every call is bounded by a timeout inside the implementation; an
/// exceeded timeout surfaces as [`BackendError::Timeout`].
pub trait ProvisioningBackend: Send + Sync {
    fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// `Ok(None)` when no instance with that name exists.
    fn describe_instance(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<InstanceDescription>, BackendError>> + Send;

    /// [`BackendError::NotFound`] when the instance is already gone.
    fn delete_instance(&self, name: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn create_access_rule(
        &self,
        rule: &AccessRule,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_access_rule(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Archive `local_dir` and unpack it into `remote_dir` on the instance.
    fn upload_artifact(
        &self,
        instance: &str,
        local_dir: &Path,
        remote_dir: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Run a shell command on the instance.
    fn run_remote(
        &self,
        instance: &str,
        command: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
