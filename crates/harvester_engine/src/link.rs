use std::time::Duration;

use harvester_core::HarvestEnvelope;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;

use crate::{TransportError, TransportFailure};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Pause between failed handshakes.
    pub reconnect_delay_ms: u64,
    /// Probe period while connected; a failed probe drops the connection.
    pub heartbeat_interval_ms: u64,
}

impl TransportSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 10_000,
            reconnect_delay_ms: 1_000,
            heartbeat_interval_ms: 25_000,
        }
    }
}

/// The wire underneath a [`crate::Transport`].
///
/// `open` performs the handshake and doubles as the heartbeat probe; `emit`
/// delivers one event. Neither keeps connection state: that lives in the
/// transport.
#[async_trait::async_trait]
pub trait Link: Send + Sync {
    async fn open(&self) -> Result<(), TransportError>;

    async fn emit(&self, event_name: &str, envelope: &HarvestEnvelope) -> Result<(), TransportError>;
}

/// Talks to the collector over HTTP: `GET {host}/health` to probe and
/// `POST {host}/events/{event}` with a JSON envelope to deliver.
#[derive(Debug, Clone)]
pub struct HttpLink {
    base: Url,
    client: reqwest::Client,
}

impl HttpLink {
    pub fn new(host: &str, settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut base = Url::parse(host)
            .map_err(|err| TransportError::new(TransportFailure::InvalidHost, err.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|err| TransportError::new(TransportFailure::Network, err.to_string()))?;

        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|err| TransportError::new(TransportFailure::InvalidHost, err.to_string()))
    }
}

#[async_trait::async_trait]
impl Link for HttpLink {
    async fn open(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.endpoint("health")?)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response.status())
    }

    async fn emit(&self, event_name: &str, envelope: &HarvestEnvelope) -> Result<(), TransportError> {
        let body = serde_json::to_vec(envelope)
            .map_err(|err| TransportError::new(TransportFailure::Encode, err.to_string()))?;
        let response = self
            .client
            .post(self.endpoint(&format!("events/{event_name}"))?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::new(
            TransportFailure::HttpStatus(status.as_u16()),
            status.to_string(),
        ))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(TransportFailure::Timeout, err.to_string());
    }
    TransportError::new(TransportFailure::Network, err.to_string())
}
