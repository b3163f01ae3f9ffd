//! Google Compute Engine backend via the `gcloud` CLI.
//!
//! Each operation is one `gcloud compute ...` subprocess, killed if it
//! outlives the configured command timeout. Artifact upload archives the
//! directory with `tar`, copies it with `gcloud compute scp`, and unpacks
//! it over `gcloud compute ssh`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use cloudburst_core::config::{DeployConfig, InstanceConfig};

use crate::backend::{AccessRule, InstanceDescription, InstanceSpec, ProvisioningBackend};
use crate::error::BackendError;

const ARCHIVE_NAME: &str = "cloudburst-artifact.tar.gz";

/// Drives Compute Engine through the `gcloud` binary.
#[derive(Debug, Clone)]
pub struct GcloudBackend {
    binary: String,
    project: String,
    zone: String,
    remote_user: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeOutput {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessConfig {
    #[serde(default, rename = "natIP")]
    nat_ip: Option<String>,
}

impl GcloudBackend {
    pub fn new(instance: &InstanceConfig, deploy: &DeployConfig) -> Self {
        Self {
            binary: "gcloud".to_string(),
            project: instance.project.clone(),
            zone: instance.zone.clone(),
            remote_user: deploy.remote_user.clone(),
            timeout: instance.command_timeout,
        }
    }

    /// Use a different `gcloud` executable (e.g. an absolute path).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn project_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.project.is_empty() {
            args.push("--project".to_string());
            args.push(self.project.clone());
        }
        args
    }

    fn zonal_args(&self) -> Vec<String> {
        let mut args = self.project_args();
        args.push("--zone".to_string());
        args.push(self.zone.clone());
        args
    }

    fn create_args(&self, spec: &InstanceSpec) -> Vec<String> {
        let mut args: Vec<String> = ["compute", "instances", "create", spec.name.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.zonal_args());
        args.extend([
            "--machine-type".to_string(),
            spec.machine_type.clone(),
            "--image-family".to_string(),
            spec.image_family.clone(),
            "--image-project".to_string(),
            spec.image_project.clone(),
            "--network".to_string(),
            spec.network.clone(),
        ]);
        if !spec.tags.is_empty() {
            args.push("--tags".to_string());
            args.push(spec.tags.join(","));
        }
        if let Some(script) = &spec.startup_script {
            args.push("--metadata-from-file".to_string());
            args.push(format!("startup-script={}", script.display()));
        }
        args
    }

    fn describe_args(&self, name: &str) -> Vec<String> {
        let mut args: Vec<String> = ["compute", "instances", "describe", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.zonal_args());
        args.push("--format".to_string());
        args.push("json".to_string());
        args
    }

    fn delete_args(&self, name: &str) -> Vec<String> {
        let mut args: Vec<String> = ["compute", "instances", "delete", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.zonal_args());
        args.push("--quiet".to_string());
        args
    }

    fn create_rule_args(&self, rule: &AccessRule) -> Vec<String> {
        let mut args: Vec<String> = ["compute", "firewall-rules", "create", rule.name.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.project_args());
        args.extend([
            "--allow".to_string(),
            format!("tcp:{}", rule.port),
            "--target-tags".to_string(),
            rule.target_tag.clone(),
            "--description".to_string(),
            "cloudburst workload access".to_string(),
        ]);
        args
    }

    fn delete_rule_args(&self, name: &str) -> Vec<String> {
        let mut args: Vec<String> = ["compute", "firewall-rules", "delete", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.project_args());
        args.push("--quiet".to_string());
        args
    }

    fn ssh_target(&self, instance: &str) -> String {
        format!("{}@{}", self.remote_user, instance)
    }

    fn ssh_args(&self, instance: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "compute".to_string(),
            "ssh".to_string(),
            self.ssh_target(instance),
        ];
        args.extend(self.zonal_args());
        args.push("--command".to_string());
        args.push(command.to_string());
        args
    }

    async fn gcloud(&self, args: Vec<String>) -> Result<String, BackendError> {
        run_command(&self.binary, &args, self.timeout).await
    }
}

/// Run a subprocess to completion within `timeout`, returning stdout.
async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, BackendError> {
    let command = format!("{program} {}", args.join(" "));
    debug!(%command, "running");

    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(BackendError::Spawn { command, source }),
        Err(_) => return Err(BackendError::Timeout { command, timeout }),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(BackendError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_not_found(err: &BackendError) -> bool {
    matches!(err, BackendError::CommandFailed { stderr, .. }
        if stderr.contains("was not found") || stderr.contains("notFound"))
}

/// Parse `gcloud compute instances describe --format json` output.
fn parse_describe(json: &str) -> Result<InstanceDescription, BackendError> {
    let out: DescribeOutput = serde_json::from_str(json)
        .map_err(|e| BackendError::Malformed(format!("instance description: {e}")))?;

    let external_address = out
        .network_interfaces
        .iter()
        .flat_map(|nic| nic.access_configs.iter())
        .find_map(|ac| ac.nat_ip.clone())
        .filter(|ip| !ip.is_empty());

    Ok(InstanceDescription {
        name: out.name,
        status: out.status,
        external_address,
    })
}

impl ProvisioningBackend for GcloudBackend {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), BackendError> {
        self.gcloud(self.create_args(spec)).await.map(drop)
    }

    async fn describe_instance(
        &self,
        name: &str,
    ) -> Result<Option<InstanceDescription>, BackendError> {
        match self.gcloud(self.describe_args(name)).await {
            Ok(stdout) => parse_describe(&stdout).map(Some),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_instance(&self, name: &str) -> Result<(), BackendError> {
        match self.gcloud(self.delete_args(name)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(BackendError::NotFound(format!("instance {name}"))),
            Err(e) => Err(e),
        }
    }

    async fn create_access_rule(&self, rule: &AccessRule) -> Result<(), BackendError> {
        self.gcloud(self.create_rule_args(rule)).await.map(drop)
    }

    async fn delete_access_rule(&self, name: &str) -> Result<(), BackendError> {
        match self.gcloud(self.delete_rule_args(name)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(BackendError::NotFound(format!("rule {name}"))),
            Err(e) => Err(e),
        }
    }

    async fn upload_artifact(
        &self,
        instance: &str,
        local_dir: &Path,
        remote_dir: &str,
    ) -> Result<(), BackendError> {
        let staging = tempfile::tempdir().map_err(|source| BackendError::Spawn {
            command: "mktemp".to_string(),
            source,
        })?;
        let archive = staging.path().join(ARCHIVE_NAME);

        let tar_args = vec![
            "-czf".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            local_dir.display().to_string(),
            ".".to_string(),
        ];
        run_command("tar", &tar_args, self.timeout).await?;

        let mut scp_args = vec![
            "compute".to_string(),
            "scp".to_string(),
            archive.display().to_string(),
            format!("{}:~", self.ssh_target(instance)),
        ];
        scp_args.extend(self.zonal_args());
        self.gcloud(scp_args).await?;

        let unpack = format!(
            "mkdir -p {remote_dir} && tar -xzf {ARCHIVE_NAME} -C {remote_dir} && rm -f {ARCHIVE_NAME}"
        );
        self.gcloud(self.ssh_args(instance, &unpack)).await.map(drop)
    }

    async fn run_remote(&self, instance: &str, command: &str) -> Result<(), BackendError> {
        self.gcloud(self.ssh_args(instance, command)).await.map(drop)
    }
}
