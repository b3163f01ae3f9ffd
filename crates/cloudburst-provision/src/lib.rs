//! cloudburst-provision — bringing the remote instance up and down.
//!
//! # Architecture
//!
//! ```text
//! ProvisioningBackend (capability trait)
//!   ├── GcloudBackend   → `gcloud compute ...` subprocesses
//!   └── InMemoryBackend → scripted fake for tests and --dry-run
//!
//! Provisioner::provision()
//!   create → address poll → access rule → deploy → readiness poll
//!
//! Deprovisioner::deprovision()
//!   delete instance → delete access rule
//! ```
//!
//! A failed provision reports which stage broke and, when an instance
//! was already created, hands back its [`InstanceHandle`] so the caller
//! can clean it up.
//!
//! [`InstanceHandle`]: cloudburst_core::InstanceHandle

pub mod backend;
pub mod deprovisioner;
pub mod error;
pub mod gcloud;
pub mod memory;
pub mod provisioner;

pub use backend::{AccessRule, InstanceDescription, InstanceSpec, ProvisioningBackend};
pub use deprovisioner::Deprovisioner;
pub use error::{BackendError, DeprovisionFailure, ProvisioningFailure, Stage};
pub use gcloud::GcloudBackend;
pub use memory::{BackendCall, InMemoryBackend};
pub use provisioner::Provisioner;
