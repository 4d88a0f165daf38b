//! Lightweight reachability check against the configured bucket.

use crate::types::S3Settings;
use crate::validation::{is_valid_bucket_name, is_valid_region};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub bucket: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub tested_at: DateTime<Utc>,
}

impl ConnectionReport {
    fn new(s3: &S3Settings) -> Self {
        Self {
            success: false,
            reason: None,
            bucket: s3.bucket_name.clone(),
            region: s3.region.clone(),
            url: None,
            status: None,
            elapsed_ms: 0,
            tested_at: Utc::now(),
        }
    }

    fn failed(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.reason = Some(reason.into());
        self
    }
}

/// URL probed for `s3`: path style under a custom endpoint, virtual-hosted
/// style on AWS otherwise.
pub fn bucket_url(s3: &S3Settings) -> String {
    if s3.endpoint.is_empty() {
        format!("https://{}.s3.{}.amazonaws.com/", s3.bucket_name, s3.region)
    } else {
        format!("{}/{}/", s3.endpoint.trim_end_matches('/'), s3.bucket_name)
    }
}

/// Reasons the probe must not be attempted at all.
fn preflight(s3: &S3Settings) -> Option<String> {
    if s3.bucket_name.is_empty() {
        return Some("bucket name is empty".to_string());
    }
    if !is_valid_bucket_name(&s3.bucket_name) {
        return Some(format!("bucket name '{}' is malformed", s3.bucket_name));
    }
    if !is_valid_region(&s3.region) {
        return Some(format!("region '{}' is not a known AWS region", s3.region));
    }
    if !s3.has_credentials() {
        return Some("AWS credentials are missing".to_string());
    }
    None
}

/// Issue a `HEAD` against the bucket.
///
/// Never errors: every failure, including a timeout, is reported as
/// `success = false` with a reason.
pub async fn test_connection(s3: &S3Settings, timeout: Duration) -> ConnectionReport {
    let report = ConnectionReport::new(s3);
    if let Some(reason) = preflight(s3) {
        tracing::debug!(reason = %reason, "Skipping S3 connection test");
        return report.failed(reason);
    }

    let url = bucket_url(s3);
    let mut report = ConnectionReport {
        url: Some(url.clone()),
        ..report
    };

    let client = match Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(!s3.verify_ssl)
        .build()
    {
        Ok(client) => client,
        Err(e) => return report.failed(format!("failed to build HTTP client: {e}")),
    };

    let started = Instant::now();
    let result = client.head(&url).send().await;
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(response) => {
            let status = response.status();
            report.status = Some(status.as_u16());
            match status {
                // 403 means the bucket exists and answered an unsigned request.
                StatusCode::OK | StatusCode::FORBIDDEN => {
                    report.success = true;
                    tracing::info!(url = %url, status = %status, "S3 bucket reachable");
                    report
                }
                StatusCode::NOT_FOUND => report.failed("bucket not found"),
                other => report.failed(format!("unexpected HTTP status {other}")),
            }
        }
        Err(e) if e.is_timeout() => {
            tracing::warn!(url = %url, ?timeout, "S3 connection test timed out");
            report.failed(format!("timed out after {}ms", timeout.as_millis()))
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "S3 connection test failed");
            report.failed(format!("request failed: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings(endpoint: &str) -> S3Settings {
        S3Settings {
            bucket_name: "tour-bucket".to_string(),
            region: "us-east-1".to_string(),
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            endpoint: endpoint.to_string(),
            enabled: true,
            ..S3Settings::default()
        }
    }

    /// Answer every connection with `status_line`, or hang when `None`.
    async fn serve(status_line: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    match status_line {
                        Some(line) => {
                            let response =
                                format!("HTTP/1.1 {line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                            let _ = socket.write_all(response.as_bytes()).await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn bucket_url_styles() {
        assert_eq!(
            bucket_url(&settings("")),
            "https://tour-bucket.s3.us-east-1.amazonaws.com/"
        );
        assert_eq!(
            bucket_url(&settings("http://minio:9000/")),
            "http://minio:9000/tour-bucket/"
        );
    }

    #[tokio::test]
    async fn empty_bucket_fails_fast() {
        let s3 = S3Settings::default();
        let report = test_connection(&s3, Duration::from_millis(10)).await;
        assert!(!report.success);
        assert_eq!(report.reason.as_deref(), Some("bucket name is empty"));
        assert!(report.url.is_none());
    }

    #[tokio::test]
    async fn malformed_bucket_fails_fast() {
        let s3 = S3Settings {
            bucket_name: "Invalid..Bucket".to_string(),
            ..settings("")
        };
        let report = test_connection(&s3, Duration::from_millis(10)).await;
        assert!(!report.success);
        assert!(report.reason.unwrap().contains("malformed"));
        assert!(report.status.is_none());
    }

    #[tokio::test]
    async fn missing_credentials_fail_fast() {
        let s3 = S3Settings {
            secret_key: String::new(),
            ..settings("")
        };
        let report = test_connection(&s3, Duration::from_millis(10)).await;
        assert!(!report.success);
        assert!(report.reason.unwrap().contains("credentials"));
    }

    #[tokio::test]
    async fn forbidden_means_reachable() {
        let endpoint = serve(Some("403 Forbidden")).await;
        let report = test_connection(&settings(&endpoint), Duration::from_secs(5)).await;
        assert!(report.success, "{:?}", report.reason);
        assert_eq!(report.status, Some(403));
    }

    #[tokio::test]
    async fn not_found_reports_missing_bucket() {
        let endpoint = serve(Some("404 Not Found")).await;
        let report = test_connection(&settings(&endpoint), Duration::from_secs(5)).await;
        assert!(!report.success);
        assert_eq!(report.status, Some(404));
        assert_eq!(report.reason.as_deref(), Some("bucket not found"));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let endpoint = serve(None).await;
        let report = test_connection(&settings(&endpoint), Duration::from_millis(200)).await;
        assert!(!report.success);
        assert!(report.reason.unwrap().contains("timed out"));
    }
}
