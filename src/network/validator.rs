//! Single connection attempt against a Core
//!
//! A validator answers once per call and never retries; retry policy lives
//! in the supervisor.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Success,
    NetworkError(String),
    Timeout(String),
    /// The endpoint answered but is not a Core. Retrying cannot help.
    InvalidCore(String),
}

impl ConnectionOutcome {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::Timeout(_))
    }
}

#[async_trait]
pub trait ConnectionValidator: Send + Sync {
    async fn validate_connection(&self, host: &str, port: u16) -> ConnectionOutcome;
}

/// Subset of the Core's `/display_version` document
#[derive(Debug, Deserialize)]
struct CoreInfo {
    core_id: Option<String>,
    display_name: Option<String>,
    display_version: Option<String>,
}

/// Validates a Core by fetching its HTTP info document
pub struct HttpCoreValidator {
    http: Client,
}

impl Default for HttpCoreValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPT_TIMEOUT)
    }
}

impl HttpCoreValidator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ConnectionValidator for HttpCoreValidator {
    async fn validate_connection(&self, host: &str, port: u16) -> ConnectionOutcome {
        let url = format!("http://{}/display_version", authority(host, port));

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ConnectionOutcome::Timeout(format!("{}:{} did not respond in time", host, port))
            }
            Err(e) => return ConnectionOutcome::NetworkError(format!("{}:{} unreachable: {}", host, port, e)),
        };

        if !response.status().is_success() {
            return ConnectionOutcome::InvalidCore(format!(
                "{}:{} answered HTTP {}",
                host,
                port,
                response.status()
            ));
        }

        match response.json::<CoreInfo>().await {
            Ok(CoreInfo {
                core_id: Some(core_id),
                display_name,
                display_version,
            }) if !core_id.trim().is_empty() => {
                tracing::debug!(
                    "Found Core {} ({:?} {:?}) at {}:{}",
                    core_id,
                    display_name,
                    display_version,
                    host,
                    port
                );
                ConnectionOutcome::Success
            }
            Ok(_) => ConnectionOutcome::InvalidCore(format!("{}:{} is not a Roon Core", host, port)),
            Err(e) if e.is_timeout() => {
                ConnectionOutcome::Timeout(format!("{}:{} did not respond in time", host, port))
            }
            Err(e) => ConnectionOutcome::InvalidCore(format!("{}:{} sent an unexpected reply: {}", host, port, e)),
        }
    }
}

/// `host:port`, bracketing IPv6 literals
fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
