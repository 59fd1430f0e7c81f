//! HTTP client for pushing metrics to a server.

use super::compress::gzip;
use super::encrypt::Encryptor;
use super::signing::{sign, HEADER_SIGNATURE};
use super::subnet::{outbound_ip, HEADER_REAL_IP};
use crate::config::AgentConfig;
use crate::error::{PulseError, Result};
use crate::types::Metrics;
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Outbound delivery of metric DTOs. One call is one attempt; retries belong to the caller.
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// POST a single DTO to `/update/`.
    async fn send_metric(&self, metric: &Metrics) -> Result<()>;

    /// POST an array of DTOs to `/updates/`.
    async fn send_batch(&self, metrics: &[Metrics]) -> Result<()>;
}

/// `reqwest`-backed client.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    encryptor: Option<Encryptor>,
    /// Sent as `X-Real-IP` on every request.
    real_ip: Option<IpAddr>,
}

impl HttpClient {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PulseError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        let encryptor = config.crypto_key.as_deref().map(Encryptor::from_pem_file).transpose()?;
        let base_url = config.server_url();
        let real_ip = outbound_ip(&base_url);
        if real_ip.is_none() {
            warn!(url = %base_url, "Could not determine local address, X-Real-IP not sent");
        }

        Ok(Self {
            client,
            base_url,
            secret_key: config.secret().map(str::to_string),
            encryptor,
            real_ip,
        })
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip");
        if let Some(ip) = self.real_ip {
            request = request.header(HEADER_REAL_IP, ip.to_string());
        }
        if let Some(key) = &self.secret_key {
            request = request.header(HEADER_SIGNATURE, sign(&body, key)?);
        }

        let response = request.body(gzip(&body)?).send().await?;
        let status = response.status();
        debug!(%url, %status, "Metrics posted");
        if status != StatusCode::OK {
            return Err(PulseError::Rejected { status: status.as_u16() });
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsClient for HttpClient {
    async fn send_metric(&self, metric: &Metrics) -> Result<()> {
        let mut body = serde_json::to_vec(metric)?;
        if let Some(encryptor) = &self.encryptor {
            body = encryptor.encrypt(&body)?;
        }
        self.post("/update/", body).await
    }

    async fn send_batch(&self, metrics: &[Metrics]) -> Result<()> {
        let body = serde_json::to_vec(metrics)?;
        self.post("/updates/", body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_client_from_config() {
        let config = AgentConfig {
            address: "127.0.0.1:9".to_string(),
            secret_key: Some(String::new()),
            ..Default::default()
        };
        let client = HttpClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:9");
        assert!(client.secret_key.is_none());
        assert!(client.encryptor.is_none());
        assert_eq!(client.real_ip, Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[test]
    fn test_client_requires_readable_key() {
        let config = AgentConfig {
            crypto_key: Some(PathBuf::from("/nonexistent/key.pem")),
            ..Default::default()
        };
        assert!(HttpClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let config = AgentConfig { address: "127.0.0.1:9".to_string(), ..Default::default() };
        let client = HttpClient::new(&config).unwrap();
        let err = client.send_metric(&Metrics::counter("PollCount", 1)).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
