//! cloudburst-autoscale — metrics-driven burst scaling.
//!
//! Samples local utilization, and when it stays over threshold for the
//! sustain period, provisions one remote instance. After the cooldown the
//! instance is deleted again.
//!
//! # State machine
//!
//! ```text
//!          breach && cooled down
//!   Idle ─────────────────────────▶ Provisioning
//!    ▲  ◀──────── failure ──────────────┘ │
//!    │                                    │ ready
//!    │                                    ▼
//!   Deprovisioning ◀── cooldown over ── Scaled
//! ```
//!
//! Every transition into or out of `Scaled`, and every failed scale-up,
//! pushes the cooldown deadline to `now + cooldown`.

pub mod breach;
pub mod controller;

pub use breach::{BreachDetector, BreachSignal, BreachWindow};
pub use controller::{ScalingController, TickOutcome};
