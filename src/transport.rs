//! Transport for the one physical call made per batch

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::SubrequestConfig;
use crate::error::TransportError;

/// Body of the one POST made per batch
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub data: Value,
}

impl TransportRequest {
    pub fn post(data: Value) -> Self {
        Self { data }
    }
}

/// Performs a request and yields the decoded JSON response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, uri: &str, request: TransportRequest) -> Result<Value, TransportError>;
}

/// reqwest-backed transport with an optional static bearer token
pub struct HttpTransport {
    client: Client,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &SubrequestConfig) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            bearer_token: config.bearer_token.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, uri: &str, request: TransportRequest) -> Result<Value, TransportError> {
        let mut builder = self
            .client
            .post(uri)
            .json(&request.data)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        debug!(uri, "sending subrequests");
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}
