//! cloudburst-health — is the workload up on the remote instance yet?
//!
//! Provides a single-shot HTTP probe and the bounded readiness poll the
//! provisioner runs after an instance gets its address.
//!
//! # Architecture
//!
//! ```text
//! wait_until_ready(probe, target, policy)
//!   ├── HealthProbe::probe() → ProbeResult   (HttpProbe in production)
//!   ├── sleep(policy.interval) between attempts
//!   └── ReadinessTimeout after policy.attempts misses
//! ```
//!
//! Only an HTTP 200 counts as ready. Any other status, a refused
//! connection, or a timed-out request is a miss.

pub mod checker;
pub mod readiness;

pub use checker::{HealthProbe, HttpProbe, ProbeResult, http_probe};
pub use readiness::{ReadinessPolicy, ReadinessTimeout, wait_until_ready};
