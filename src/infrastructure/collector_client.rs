// HTTP client for the collector's ingest endpoint
use crate::infrastructure::config::CollectorConfig;
use anyhow::Context;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("collector returned HTTP {status}")]
    Http { status: u16, body: String },
    #[error("collector not reachable: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("{0}")]
    Send(String),
}

/// Collector acknowledgement; `id` is whatever identifier it assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestAck {
    pub id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: reqwest::Client,
    url: String,
}

impl CollectorClient {
    pub fn new(config: &CollectorConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .no_proxy()
            .build()
            .context("Failed to build collector HTTP client")?;

        Ok(Self {
            client,
            url: config.data_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one payload. Only HTTP 200 counts as delivered.
    pub async fn post_reading<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<IngestAck, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| DeliveryError::Send(format!("invalid collector response: {e}")))?;

        let id = match body.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(other) => Some(other.to_string()),
        };
        Ok(IngestAck { id })
    }
}

fn classify(error: reqwest::Error) -> DeliveryError {
    if error.is_connect() {
        DeliveryError::Connect(error)
    } else if error.is_timeout() {
        DeliveryError::Send(format!("request timed out: {error}"))
    } else {
        DeliveryError::Send(error.to_string())
    }
}
