//! The `MetricsSource` contract and config-driven dispatch.

use std::future::Future;
use std::path::PathBuf;

use thiserror::Error;

use cloudburst_core::MetricsSnapshot;
use cloudburst_core::config::{MetricsBackend, MetricsConfig};

use crate::file::FileSource;
use crate::prometheus::PrometheusSource;

/// Why a sample could not be taken. Every variant means "metrics
/// unavailable" to the controller.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Transport failure, including the per-request timeout.
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("query {query:?} failed: {message}")]
    QueryFailed { query: String, message: String },

    #[error("query {query:?} returned no series")]
    NoData { query: String },

    #[error("malformed metrics data: {0}")]
    Malformed(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces a fresh utilization snapshot on demand.
pub trait MetricsSource: Send + Sync {
    /// Take one sample. Performs a bounded network or disk read and has
    /// no other side effects.
    fn sample(&self) -> impl Future<Output = Result<MetricsSnapshot, MetricsError>> + Send;
}

/// The metrics source selected by `[metrics] backend`.
pub enum ConfiguredSource {
    Prometheus(PrometheusSource),
    File(FileSource),
}

impl ConfiguredSource {
    pub fn from_config(config: &MetricsConfig) -> Result<Self, MetricsError> {
        match config.backend {
            MetricsBackend::Prometheus => Ok(Self::Prometheus(PrometheusSource::new(config)?)),
            MetricsBackend::File => {
                let path = config.path.clone().ok_or_else(|| {
                    MetricsError::Malformed("file backend configured without a path".to_string())
                })?;
                Ok(Self::File(FileSource::new(path)))
            }
        }
    }
}

impl MetricsSource for ConfiguredSource {
    async fn sample(&self) -> Result<MetricsSnapshot, MetricsError> {
        match self {
            Self::Prometheus(source) => source.sample().await,
            Self::File(source) => source.sample().await,
        }
    }
}
