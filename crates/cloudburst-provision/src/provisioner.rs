//! Provisioner — brings one remote instance from nothing to serving.
//!
//! Steps run strictly in order, each with its own failure point:
//!
//! 1. create the instance
//! 2. poll describe until an external address is assigned
//! 3. open the workload port (best effort)
//! 4. ship and start the artifact, when one is configured
//! 5. poll the workload's health endpoint until it answers 200
//!
//! Nothing is cleaned up here. A failure past step 1 returns the partial
//! [`InstanceHandle`] and the caller decides how to delete it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cloudburst_core::{BurstConfig, InstanceHandle};
use cloudburst_health::{HealthProbe, ReadinessPolicy, wait_until_ready};

use crate::backend::{AccessRule, InstanceSpec, ProvisioningBackend};
use crate::error::{BackendError, ProvisioningFailure};

/// Artifact shipping, present only when the image lacks the workload.
#[derive(Debug, Clone)]
struct DeployPlan {
    artifact: PathBuf,
    remote_dir: String,
    start_command: String,
    upload_attempts: u32,
    upload_interval: Duration,
}

pub struct Provisioner<B, P> {
    backend: Arc<B>,
    probe: P,
    spec: InstanceSpec,
    address_attempts: u32,
    address_interval: Duration,
    port: u16,
    health_path: String,
    readiness: ReadinessPolicy,
    access_rule: Option<(String, String)>,
    deploy: Option<DeployPlan>,
}

impl<B: ProvisioningBackend, P: HealthProbe> Provisioner<B, P> {
    pub fn new(backend: Arc<B>, probe: P, config: &BurstConfig) -> Self {
        let access_rule = config.access_rule.enabled.then(|| {
            (
                config.access_rule.prefix.clone(),
                config.access_rule.target_tag.clone(),
            )
        });
        let deploy = config.deploy.artifact.as_ref().map(|artifact| DeployPlan {
            artifact: artifact.clone(),
            remote_dir: config.deploy.remote_dir.clone(),
            start_command: config.deploy.start_command.clone(),
            upload_attempts: config.deploy.upload_attempts,
            upload_interval: config.deploy.upload_interval,
        });

        Self {
            backend,
            probe,
            spec: InstanceSpec::from_config(&config.instance),
            address_attempts: config.readiness.address_attempts,
            address_interval: config.readiness.address_interval,
            port: config.readiness.port,
            health_path: config.readiness.path.clone(),
            readiness: ReadinessPolicy {
                attempts: config.readiness.attempts,
                interval: config.readiness.interval,
            },
            access_rule,
            deploy,
        }
    }

    /// Name of the instance this provisioner creates.
    pub fn instance_name(&self) -> &str {
        &self.spec.name
    }

    /// Run every provisioning step and return a ready instance.
    pub async fn provision(&self) -> Result<InstanceHandle, ProvisioningFailure> {
        let name = self.spec.name.clone();
        info!(
            instance = %name,
            machine_type = %self.spec.machine_type,
            image = %self.spec.image_family,
            "creating instance"
        );

        self.backend
            .create_instance(&self.spec)
            .await
            .map_err(|source| ProvisioningFailure::Create {
                name: name.clone(),
                source,
            })?;
        let mut instance = InstanceHandle::created(&name);

        let Some(address) = self.wait_for_address(&name).await else {
            return Err(ProvisioningFailure::Address {
                instance,
                attempts: self.address_attempts,
            });
        };
        info!(instance = %name, %address, "instance has external address");
        instance.external_address = Some(address.clone());

        instance.access_rule = self.open_access(&name).await;

        if let Some(plan) = &self.deploy
            && let Err(source) = self.deploy(&name, plan).await
        {
            return Err(ProvisioningFailure::Deploy { instance, source });
        }

        let target = format!("{address}:{}", self.port);
        if let Err(source) =
            wait_until_ready(&self.probe, &target, &self.health_path, self.readiness).await
        {
            return Err(ProvisioningFailure::ReadinessTimeout { instance, source });
        }

        instance.ready = true;
        info!(instance = %name, %target, "instance provisioned");
        Ok(instance)
    }

    /// Poll describe until an address shows up. Describe errors count as
    /// attempts.
    async fn wait_for_address(&self, name: &str) -> Option<String> {
        for attempt in 1..=self.address_attempts {
            match self.backend.describe_instance(name).await {
                Ok(Some(desc)) => {
                    if let Some(address) = desc.external_address {
                        return Some(address);
                    }
                    debug!(instance = %name, attempt, status = %desc.status, "no address yet");
                }
                Ok(None) => debug!(instance = %name, attempt, "instance not visible yet"),
                Err(e) => warn!(instance = %name, attempt, error = %e, "describe failed"),
            }

            if attempt < self.address_attempts {
                tokio::time::sleep(self.address_interval).await;
            }
        }
        None
    }

    /// Create the access rule; failure leaves the instance usable.
    async fn open_access(&self, name: &str) -> Option<String> {
        let (prefix, target_tag) = self.access_rule.as_ref()?;
        let rule = AccessRule {
            name: format!("{prefix}{name}"),
            port: self.port,
            target_tag: target_tag.clone(),
        };

        match self.backend.create_access_rule(&rule).await {
            Ok(()) => {
                info!(instance = %name, rule = %rule.name, port = rule.port, "access rule created");
                Some(rule.name)
            }
            Err(e) => {
                warn!(
                    instance = %name,
                    rule = %rule.name,
                    error = %e,
                    "failed to create access rule, continuing"
                );
                None
            }
        }
    }

    async fn deploy(&self, name: &str, plan: &DeployPlan) -> Result<(), BackendError> {
        info!(instance = %name, artifact = %plan.artifact.display(), "deploying workload");

        let mut attempt = 1;
        loop {
            match self
                .backend
                .upload_artifact(name, &plan.artifact, &plan.remote_dir)
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < plan.upload_attempts => {
                    debug!(instance = %name, attempt, error = %e, "upload failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(plan.upload_interval).await;
                }
                Err(e) => return Err(e),
            }
        }

        let command = format!("cd {} && {}", plan.remote_dir, plan.start_command);
        self.backend.run_remote(name, &command).await?;
        info!(instance = %name, "workload started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::memory::{BackendCall, InMemoryBackend};
    use cloudburst_health::ProbeResult;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Healthy from the `ready_at`-th probe on; never if zero.
    struct CountingProbe {
        ready_at: u32,
        probes: AtomicU32,
    }

    impl CountingProbe {
        fn ready_at(n: u32) -> Self {
            Self {
                ready_at: n,
                probes: AtomicU32::new(0),
            }
        }

        fn never() -> Self {
            Self::ready_at(0)
        }
    }

    impl HealthProbe for CountingProbe {
        async fn probe(&self, _address: &str, _path: &str) -> ProbeResult {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.ready_at != 0 && n >= self.ready_at {
                ProbeResult::Healthy
            } else {
                ProbeResult::Unhealthy
            }
        }
    }

    fn config() -> BurstConfig {
        let mut config = BurstConfig::default();
        config.instance.name = "burst-vm".to_string();
        config.readiness.attempts = 3;
        config.readiness.interval = Duration::from_secs(5);
        config.readiness.address_attempts = 4;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn provisions_ready_instance() {
        let backend = InMemoryBackend::new().with_address_after(2);
        let provisioner =
            Provisioner::new(Arc::new(backend.clone()), CountingProbe::ready_at(2), &config());

        let handle = provisioner.provision().await.unwrap();
        assert_eq!(handle.name, "burst-vm");
        assert_eq!(handle.external_address.as_deref(), Some("203.0.113.10"));
        assert!(handle.ready);
        assert_eq!(handle.access_rule.as_deref(), Some("allow-cloudburst-burst-vm"));
        assert!(backend.rule_exists("allow-cloudburst-burst-vm"));
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::DescribeInstance(_))),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_has_no_instance() {
        let backend = InMemoryBackend::new().fail_create();
        let provisioner = Provisioner::new(Arc::new(backend), CountingProbe::ready_at(1), &config());

        let failure = provisioner.provision().await.unwrap_err();
        assert_eq!(failure.stage(), Stage::Create);
        assert!(failure.partial_instance().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn address_exhaustion_returns_partial_instance() {
        let backend = InMemoryBackend::new().never_assign_address();
        let provisioner =
            Provisioner::new(Arc::new(backend.clone()), CountingProbe::ready_at(1), &config());

        let failure = provisioner.provision().await.unwrap_err();
        assert_eq!(failure.stage(), Stage::Address);
        assert_eq!(failure.partial_instance().map(|i| i.name.as_str()), Some("burst-vm"));
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::DescribeInstance(_))),
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_after_bounded_probes() {
        let backend = InMemoryBackend::new();
        let probe = CountingProbe::never();
        let provisioner = Provisioner::new(Arc::new(backend), probe, &config());

        let failure = provisioner.provision().await.unwrap_err();
        assert!(matches!(failure, ProvisioningFailure::ReadinessTimeout { .. }));
        assert_eq!(failure.stage(), Stage::Readiness);
        let partial = failure.partial_instance().unwrap();
        assert!(!partial.ready);
        assert_eq!(partial.access_rule.as_deref(), Some("allow-cloudburst-burst-vm"));
        assert_eq!(provisioner.probe.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn access_rule_failure_is_not_fatal() {
        let backend = InMemoryBackend::new().fail_access_rule_create();
        let provisioner = Provisioner::new(Arc::new(backend), CountingProbe::ready_at(1), &config());

        let handle = provisioner.provision().await.unwrap();
        assert!(handle.ready);
        assert!(handle.access_rule.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn access_rule_disabled_skips_creation() {
        let mut config = config();
        config.access_rule.enabled = false;
        let backend = InMemoryBackend::new();
        let provisioner =
            Provisioner::new(Arc::new(backend.clone()), CountingProbe::ready_at(1), &config);

        provisioner.provision().await.unwrap();
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::CreateAccessRule(_))),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deploys_artifact_with_upload_retries() {
        let mut config = config();
        config.deploy.artifact = Some(PathBuf::from("/srv/todo-app"));
        config.deploy.upload_attempts = 3;
        let backend = InMemoryBackend::new().fail_uploads(2);
        let provisioner =
            Provisioner::new(Arc::new(backend.clone()), CountingProbe::ready_at(1), &config);

        let handle = provisioner.provision().await.unwrap();
        assert!(handle.ready);
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::UploadArtifact(_))),
            3
        );
        let started = backend.calls().into_iter().any(|c| {
            matches!(c, BackendCall::RunRemote(ref name, ref cmd)
                if name == "burst-vm" && cmd.starts_with("cd app && "))
        });
        assert!(started);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_failure_returns_partial_instance() {
        let mut config = config();
        config.deploy.artifact = Some(PathBuf::from("/srv/todo-app"));
        let backend = InMemoryBackend::new().fail_run_remote();
        let probe = CountingProbe::ready_at(1);
        let provisioner = Provisioner::new(Arc::new(backend), probe, &config);

        let failure = provisioner.provision().await.unwrap_err();
        assert_eq!(failure.stage(), Stage::Deploy);
        assert!(failure.partial_instance().is_some());
        // Readiness is never polled after a failed deploy.
        assert_eq!(provisioner.probe.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn no_deploy_without_artifact() {
        let backend = InMemoryBackend::new();
        let provisioner =
            Provisioner::new(Arc::new(backend.clone()), CountingProbe::ready_at(1), &config());

        provisioner.provision().await.unwrap();
        assert_eq!(
            backend.count(|c| matches!(c, BackendCall::UploadArtifact(_) | BackendCall::RunRemote(..))),
            0
        );
    }
}
