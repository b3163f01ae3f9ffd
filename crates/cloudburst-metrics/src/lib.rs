//! cloudburst-metrics — utilization sampling for the scaling controller.
//!
//! A [`MetricsSource`] turns whatever backend is configured into a
//! normalized [`MetricsSnapshot`](cloudburst_core::MetricsSnapshot) of
//! CPU, memory, and disk percentages.
//!
//! # Architecture
//!
//! ```text
//! ConfiguredSource (from cloudburst.toml)
//!   ├── PrometheusSource → GET /api/v1/query, one query per metric
//!   └── FileSource       → JSON document written by the workload
//! ```
//!
//! Every failure is a [`MetricsError`]; the controller treats all of them
//! as "no data this cycle" and keeps its state.

pub mod file;
pub mod prometheus;
pub mod source;

pub use file::FileSource;
pub use prometheus::PrometheusSource;
pub use source::{ConfiguredSource, MetricsError, MetricsSource};
