//! Metrics read from a JSON file the workload keeps up to date.
//!
//! The document is `{"cpu": 12.5, "memory": 40.0, "disk": 61.2}`; missing
//! keys read as zero.

use std::path::PathBuf;

use serde::Deserialize;

use cloudburst_core::MetricsSnapshot;

use crate::source::{MetricsError, MetricsSource};

pub struct FileSource {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricsDocument {
    cpu: f64,
    memory: f64,
    disk: f64,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MetricsSource for FileSource {
    async fn sample(&self) -> Result<MetricsSnapshot, MetricsError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| MetricsError::Io {
                path: self.path.clone(),
                source,
            })?;

        let doc: MetricsDocument = serde_json::from_str(&content)
            .map_err(|e| MetricsError::Malformed(format!("{}: {e}", self.path.display())))?;

        Ok(MetricsSnapshot::now(doc.cpu, doc.memory, doc.disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_metrics_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_metrics.json");
        std::fs::write(&path, r#"{"cpu": 88.0, "memory": 41.5, "disk": 12.0}"#).unwrap();

        let snap = FileSource::new(&path).sample().await.unwrap();
        assert_eq!(snap.cpu_percent, 88.0);
        assert_eq!(snap.memory_percent, 41.5);
        assert_eq!(snap.disk_percent, 12.0);
    }

    #[tokio::test]
    async fn missing_keys_read_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_metrics.json");
        std::fs::write(&path, r#"{"cpu": 50}"#).unwrap();

        let snap = FileSource::new(&path).sample().await.unwrap();
        assert_eq!(snap.cpu_percent, 50.0);
        assert_eq!(snap.memory_percent, 0.0);
        assert_eq!(snap.disk_percent, 0.0);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.json"));
        assert!(matches!(source.sample().await, Err(MetricsError::Io { .. })));
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_metrics.json");
        std::fs::write(&path, "cpu=90").unwrap();

        let source = FileSource::new(&path);
        assert!(matches!(source.sample().await, Err(MetricsError::Malformed(_))));
    }
}
