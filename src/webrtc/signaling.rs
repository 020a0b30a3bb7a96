//! HTTP signaling
//!
//! The publisher is the offering side. Once every track is registered the
//! peer connection creates an offer, waits for ICE gathering to complete and
//! POSTs it to the backend in one request:
//!
//! ```text
//! POST <address>/publish
//! {"stream": "<name>", "stream_ids": ["sid-audio-<name>", "sid-video-<name>"], "sdp": "<offer>"}
//!
//! 200 OK
//! {"sdp": "<answer>"}
//! ```

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::config::WebRtcConfig;
use super::peer::WebRtcConnection;
use super::transport::{SessionBootstrap, TransportConnection};
use crate::error::{AppError, Result};

/// Timeout of one signaling request
const SIGNALING_TIMEOUT: Duration = Duration::from_secs(10);

/// SDP Offer from the publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpOffer {
    /// SDP content
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// SDP Answer from the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpAnswer {
    /// SDP content
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// Publish request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Stream name
    pub stream: String,
    /// Sub-stream (media grouping) IDs
    pub stream_ids: Vec<String>,
    /// Complete offer, ICE candidates included
    pub sdp: String,
}

/// Connection state notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Offer/answer exchange used by [`WebRtcConnection::negotiate`]
#[async_trait]
pub trait OfferExchange: Send + Sync {
    async fn exchange(&self, offer: SdpOffer) -> Result<SdpAnswer>;
}

/// Exchange that POSTs the offer as JSON to the publish endpoint
pub struct HttpOfferExchange {
    client: reqwest::Client,
    endpoint: Url,
    stream: String,
    stream_ids: Vec<String>,
}

impl HttpOfferExchange {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        stream: impl Into<String>,
        stream_ids: Vec<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            stream: stream.into(),
            stream_ids,
        }
    }
}

#[async_trait]
impl OfferExchange for HttpOfferExchange {
    async fn exchange(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        let request = PublishRequest {
            stream: self.stream.clone(),
            stream_ids: self.stream_ids.clone(),
            sdp: offer.sdp,
        };

        debug!("POST {} ({} byte offer)", self.endpoint, request.sdp.len());

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Bootstrap(format!("Publish request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::Bootstrap(format!("Publish rejected: {}", e)))?;

        let answer: SdpAnswer = response
            .json()
            .await
            .map_err(|e| AppError::Bootstrap(format!("Invalid publish answer: {}", e)))?;

        if answer.sdp.trim().is_empty() {
            return Err(AppError::Bootstrap("Publish answer carries no SDP".to_string()));
        }

        Ok(answer)
    }
}

/// Signaling session: the validated publish endpoint
#[derive(Debug, Clone)]
pub struct SignalingSession {
    pub endpoint: Url,
}

/// HTTP signaling backed [`SessionBootstrap`] creating WebRTC connections
pub struct HttpSignalingBootstrap {
    client: reqwest::Client,
    config: WebRtcConfig,
}

impl HttpSignalingBootstrap {
    pub fn new(config: WebRtcConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SIGNALING_TIMEOUT)
            .build()
            .map_err(|e| AppError::Bootstrap(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

/// Resolve the publish endpoint below a base address
pub fn publish_endpoint(address: &str) -> Result<Url> {
    let endpoint = format!("{}/publish", address.trim().trim_end_matches('/'));
    let url = Url::parse(&endpoint)
        .map_err(|e| AppError::Bootstrap(format!("Invalid address '{}': {}", address, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(AppError::Bootstrap(format!(
            "Unsupported scheme '{}' in address '{}'",
            scheme, address
        ))),
    }
}

#[async_trait]
impl SessionBootstrap for HttpSignalingBootstrap {
    type Session = SignalingSession;

    async fn connect(&self, address: &str) -> Result<SignalingSession> {
        let endpoint = publish_endpoint(address)?;
        info!("Signaling endpoint: {}", endpoint);
        Ok(SignalingSession { endpoint })
    }

    async fn publish(
        &self,
        session: &SignalingSession,
        stream_name: &str,
        stream_ids: &[String],
    ) -> Result<Arc<dyn TransportConnection>> {
        let exchange = HttpOfferExchange::new(
            self.client.clone(),
            session.endpoint.clone(),
            stream_name,
            stream_ids.to_vec(),
        );

        let connection_id = uuid::Uuid::new_v4().to_string();
        let connection =
            WebRtcConnection::new(&self.config, connection_id, Arc::new(exchange)).await?;

        Ok(Arc::new(connection))
    }
}
