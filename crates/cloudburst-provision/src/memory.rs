//! In-memory provisioning backend.
//!
//! Keeps instances and access rules in a map, records every call, and can
//! be scripted to fail specific operations. Clones share state, so a test
//! can hand one clone to the controller and inspect another.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::backend::{AccessRule, InstanceDescription, InstanceSpec, ProvisioningBackend};
use crate::error::BackendError;

/// One recorded backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateInstance(String),
    DescribeInstance(String),
    DeleteInstance(String),
    CreateAccessRule(String),
    DeleteAccessRule(String),
    UploadArtifact(String),
    RunRemote(String, String),
}

/// Operations to reject.
#[derive(Debug, Clone, Default)]
struct Failures {
    create: bool,
    delete: bool,
    create_rule: bool,
    delete_rule: bool,
    /// Uploads rejected before the first one succeeds.
    uploads: u32,
    run_remote: bool,
}

#[derive(Debug)]
struct FakeInstance {
    describes: u32,
}

#[derive(Debug)]
struct Inner {
    instances: HashMap<String, FakeInstance>,
    rules: HashSet<String>,
    calls: Vec<BackendCall>,
    failures: Failures,
    address: String,
    /// Describes needed before an address shows up; `None` never assigns.
    address_after: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                instances: HashMap::new(),
                rules: HashSet::new(),
                calls: Vec::new(),
                failures: Failures::default(),
                address: "203.0.113.10".to_string(),
                address_after: Some(1),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// External address handed to every instance.
    pub fn with_address(self, address: impl Into<String>) -> Self {
        self.lock().address = address.into();
        self
    }

    /// The address appears on the `n`-th describe call.
    pub fn with_address_after(self, n: u32) -> Self {
        self.lock().address_after = Some(n.max(1));
        self
    }

    pub fn never_assign_address(self) -> Self {
        self.lock().address_after = None;
        self
    }

    /// Pretend an instance already exists, e.g. left over from a restart.
    pub fn with_existing_instance(self, name: impl Into<String>) -> Self {
        self.lock()
            .instances
            .insert(name.into(), FakeInstance { describes: u32::MAX });
        self
    }

    pub fn fail_create(self) -> Self {
        self.lock().failures.create = true;
        self
    }

    pub fn fail_delete(self) -> Self {
        self.lock().failures.delete = true;
        self
    }

    pub fn fail_access_rule_create(self) -> Self {
        self.lock().failures.create_rule = true;
        self
    }

    pub fn fail_access_rule_delete(self) -> Self {
        self.lock().failures.delete_rule = true;
        self
    }

    /// Reject the first `n` uploads, as while SSH is still coming up.
    pub fn fail_uploads(self, n: u32) -> Self {
        self.lock().failures.uploads = n;
        self
    }

    pub fn fail_run_remote(self) -> Self {
        self.lock().failures.run_remote = true;
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn instance_exists(&self, name: &str) -> bool {
        self.lock().instances.contains_key(name)
    }

    pub fn rule_exists(&self, name: &str) -> bool {
        self.lock().rules.contains(name)
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }
}

fn rejected(operation: &str) -> BackendError {
    BackendError::Rejected {
        operation: operation.to_string(),
        reason: "scripted failure".to_string(),
    }
}

impl ProvisioningBackend for InMemoryBackend {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::CreateInstance(spec.name.clone()));
        if inner.failures.create {
            return Err(rejected("create-instance"));
        }
        if inner.instances.contains_key(&spec.name) {
            return Err(BackendError::Rejected {
                operation: "create-instance".to_string(),
                reason: format!("instance {} already exists", spec.name),
            });
        }
        inner
            .instances
            .insert(spec.name.clone(), FakeInstance { describes: 0 });
        debug!(instance = %spec.name, "in-memory instance created");
        Ok(())
    }

    async fn describe_instance(
        &self,
        name: &str,
    ) -> Result<Option<InstanceDescription>, BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DescribeInstance(name.to_string()));
        let address = inner.address.clone();
        let address_after = inner.address_after;

        let Some(instance) = inner.instances.get_mut(name) else {
            return Ok(None);
        };
        instance.describes = instance.describes.saturating_add(1);
        let assigned = address_after.is_some_and(|n| instance.describes >= n);

        Ok(Some(InstanceDescription {
            name: name.to_string(),
            status: if assigned { "RUNNING" } else { "STAGING" }.to_string(),
            external_address: assigned.then_some(address),
        }))
    }

    async fn delete_instance(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DeleteInstance(name.to_string()));
        if inner.failures.delete {
            return Err(rejected("delete-instance"));
        }
        match inner.instances.remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(format!("instance {name}"))),
        }
    }

    async fn create_access_rule(&self, rule: &AccessRule) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::CreateAccessRule(rule.name.clone()));
        if inner.failures.create_rule {
            return Err(rejected("create-access-rule"));
        }
        inner.rules.insert(rule.name.clone());
        Ok(())
    }

    async fn delete_access_rule(&self, name: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DeleteAccessRule(name.to_string()));
        if inner.failures.delete_rule {
            return Err(rejected("delete-access-rule"));
        }
        if inner.rules.remove(name) {
            Ok(())
        } else {
            Err(BackendError::NotFound(format!("rule {name}")))
        }
    }

    async fn upload_artifact(
        &self,
        instance: &str,
        _local_dir: &Path,
        _remote_dir: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::UploadArtifact(instance.to_string()));
        if inner.failures.uploads > 0 {
            inner.failures.uploads -= 1;
            return Err(rejected("upload-artifact"));
        }
        if !inner.instances.contains_key(instance) {
            return Err(BackendError::NotFound(format!("instance {instance}")));
        }
        Ok(())
    }

    async fn run_remote(&self, instance: &str, command: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner
            .calls
            .push(BackendCall::RunRemote(instance.to_string(), command.to_string()));
        if inner.failures.run_remote {
            return Err(rejected("run-remote"));
        }
        Ok(())
    }
}
