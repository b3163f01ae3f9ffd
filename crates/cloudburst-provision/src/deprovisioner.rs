//! Deprovisioner — tears down the instance and its access rule.

use std::sync::Arc;

use tracing::{info, warn};

use cloudburst_core::InstanceHandle;

use crate::backend::ProvisioningBackend;
use crate::error::{BackendError, DeprovisionFailure};

pub struct Deprovisioner<B> {
    backend: Arc<B>,
}

impl<B: ProvisioningBackend> Deprovisioner<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Delete the instance, then its access rule.
    ///
    /// An instance the backend no longer knows counts as deleted. The rule
    /// is only touched once the instance is gone, and failing to delete it
    /// is logged without failing the call.
    pub async fn deprovision(&self, instance: &InstanceHandle) -> Result<(), DeprovisionFailure> {
        info!(instance = %instance.name, "deleting instance");

        match self.backend.delete_instance(&instance.name).await {
            Ok(()) => info!(instance = %instance.name, "instance deleted"),
            Err(BackendError::NotFound(_)) => {
                info!(instance = %instance.name, "instance already gone")
            }
            Err(source) => {
                return Err(DeprovisionFailure {
                    instance: instance.name.clone(),
                    source,
                });
            }
        }

        if let Some(rule) = &instance.access_rule {
            match self.backend.delete_access_rule(rule).await {
                Ok(()) | Err(BackendError::NotFound(_)) => {
                    info!(instance = %instance.name, %rule, "access rule deleted")
                }
                Err(e) => warn!(
                    instance = %instance.name,
                    %rule,
                    error = %e,
                    "failed to delete access rule"
                ),
            }
        }

        Ok(())
    }
}
