//! cloudburst-core — types and configuration shared by every cloudburst crate.
//!
//! The controller's vocabulary lives here: [`MetricsSnapshot`] flowing out
//! of a metrics source, [`ScalingState`] owned by the controller, and the
//! [`InstanceHandle`] describing the one remote instance it may manage.
//! [`BurstConfig`] is the parsed `cloudburst.toml`.

pub mod config;
pub mod duration;
pub mod types;

pub use config::{BurstConfig, ConfigError};
pub use duration::parse_duration;
pub use types::*;
