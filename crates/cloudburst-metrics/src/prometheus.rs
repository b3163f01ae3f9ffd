//! Prometheus HTTP query source.
//!
//! Issues one instant query per metric against `/api/v1/query` and reads
//! the vector result. When a query returns several series (one per scrape
//! target) their values are averaged.

use serde::Deserialize;
use tracing::debug;

use cloudburst_core::MetricsSnapshot;
use cloudburst_core::config::MetricsConfig;

use crate::source::{MetricsError, MetricsSource};

/// Queries a Prometheus server for CPU, memory, and disk utilization.
pub struct PrometheusSource {
    client: reqwest::Client,
    base_url: String,
    cpu_query: String,
    memory_query: String,
    disk_query: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    /// `[unix_ts, "value"]`
    value: (f64, String),
}

impl PrometheusSource {
    /// Build a source whose every request is bounded by `config.timeout`.
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent("cloudburst/0.1")
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            cpu_query: config.cpu_query.clone(),
            memory_query: config.memory_query.clone(),
            disk_query: config.disk_query.clone(),
        })
    }

    /// Run a single instant query and return its scalar value.
    pub async fn query(&self, query: &str) -> Result<f64, MetricsError> {
        let response = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", query)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(MetricsError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        let value = parse_query_response(query, &body)?;
        debug!(query, value, "prometheus query");
        Ok(value)
    }
}

impl MetricsSource for PrometheusSource {
    async fn sample(&self) -> Result<MetricsSnapshot, MetricsError> {
        let cpu = self.query(&self.cpu_query).await?;
        let memory = self.query(&self.memory_query).await?;
        let disk = self.query(&self.disk_query).await?;
        Ok(MetricsSnapshot::now(cpu, memory, disk))
    }
}

/// Extract the value of an instant-vector query response.
fn parse_query_response(query: &str, body: &str) -> Result<f64, MetricsError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::Malformed(format!("query {query:?}: {e}")))?;

    if response.status != "success" {
        return Err(MetricsError::QueryFailed {
            query: query.to_string(),
            message: response.error.unwrap_or(response.status),
        });
    }

    let series = response.data.map(|d| d.result).unwrap_or_default();
    if series.is_empty() {
        return Err(MetricsError::NoData {
            query: query.to_string(),
        });
    }

    let mut sum = 0.0;
    for s in &series {
        let value: f64 = s.value.1.parse().map_err(|_| {
            MetricsError::Malformed(format!("query {query:?}: non-numeric value {:?}", s.value.1))
        })?;
        if !value.is_finite() {
            return Err(MetricsError::Malformed(format!(
                "query {query:?}: non-finite value {value}"
            )));
        }
        sum += value;
    }

    Ok(sum / series.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const Q: &str = "up";

    #[test]
    fn parse_single_series() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1700000000.1,"42.5"]}]}}"#;
        assert_eq!(parse_query_response(Q, body).unwrap(), 42.5);
    }

    #[test]
    fn parse_averages_multiple_series() {
        let body = r#"{"status":"success","data":{"result":[
            {"metric":{"instance":"a"},"value":[1.0,"80"]},
            {"metric":{"instance":"b"},"value":[1.0,"60"]}
        ]}}"#;
        assert_eq!(parse_query_response(Q, body).unwrap(), 70.0);
    }

    #[test]
    fn parse_empty_result_is_no_data() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert!(matches!(
            parse_query_response(Q, body),
            Err(MetricsError::NoData { .. })
        ));
    }

    #[test]
    fn parse_error_status() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        match parse_query_response(Q, body) {
            Err(MetricsError::QueryFailed { message, .. }) => assert_eq!(message, "parse error"),
            other => panic!("expected QueryFailed, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_garbage_and_nan() {
        assert!(matches!(
            parse_query_response(Q, "<html>"),
            Err(MetricsError::Malformed(_))
        ));
        let nan = r#"{"status":"success","data":{"result":[{"value":[1.0,"NaN"]}]}}"#;
        assert!(matches!(
            parse_query_response(Q, nan),
            Err(MetricsError::Malformed(_))
        ));
        let text = r#"{"status":"success","data":{"result":[{"value":[1.0,"high"]}]}}"#;
        assert!(matches!(
            parse_query_response(Q, text),
            Err(MetricsError::Malformed(_))
        ));
    }

    /// Serve `body` with `status` to every connection.
    async fn stub_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    fn config_for(url: String) -> MetricsConfig {
        MetricsConfig {
            url,
            timeout: Duration::from_secs(2),
            ..MetricsConfig::default()
        }
    }

    #[tokio::test]
    async fn sample_reads_all_three_metrics() {
        let url = stub_server(
            "200 OK",
            r#"{"status":"success","data":{"result":[{"value":[1.0,"91.5"]}]}}"#,
        )
        .await;
        let source = PrometheusSource::new(&config_for(url)).unwrap();

        let snap = source.sample().await.unwrap();
        assert_eq!(snap.cpu_percent, 91.5);
        assert_eq!(snap.memory_percent, 91.5);
        assert_eq!(snap.disk_percent, 91.5);
    }

    #[tokio::test]
    async fn non_2xx_is_status_error() {
        let url = stub_server("503 Service Unavailable", "down").await;
        let source = PrometheusSource::new(&config_for(url)).unwrap();

        match source.sample().await {
            Err(MetricsError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "down");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_http_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = PrometheusSource::new(&config_for(format!("http://{addr}"))).unwrap();
        assert!(matches!(source.sample().await, Err(MetricsError::Http(_))));
    }
}
