//! Session establishment.
//!
//! [`SignalingClient::establish`] runs the handshake in order:
//!
//! 1. fetch an ephemeral credential from the token service
//! 2. create the transport and bind a remote audio sink
//! 3. acquire the microphone and attach it as an outbound track
//! 4. create the event channel (before the offer, so it is negotiated)
//! 5. create the offer, exchange it for the remote answer, apply the answer
//!
//! Everything acquired before a failure is handed back in
//! [`EstablishFailure::leftovers`] so the caller can release it.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use zeroize::Zeroize;

use super::base::{SessionError, SessionResult};
use super::config::{RealtimeConfig, RealtimeModel};
use super::teardown::SessionResources;
use super::transport::{
    AudioCapture, ChannelEvent, EventChannel, RemoteAudioSink, TransportError, TransportFactory,
};

// =============================================================================
// Credential
// =============================================================================

/// Short-lived bearer credential for the negotiation request.
///
/// Wiped from memory on drop and never printed.
pub struct EphemeralCredential(String);

impl EphemeralCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for EphemeralCredential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EphemeralCredential(<redacted>)")
    }
}

/// Pull the credential out of a token response: `client_secret.value` or a bare `client_secret`.
pub fn extract_client_secret(body: &Value) -> Option<EphemeralCredential> {
    let secret = body.get("client_secret")?;
    let value = secret
        .get("value")
        .and_then(Value::as_str)
        .or_else(|| secret.as_str())?;
    if value.is_empty() {
        return None;
    }
    Some(EphemeralCredential::new(value))
}

// =============================================================================
// Signaling Service
// =============================================================================

/// The two remote calls of the handshake.
#[async_trait]
pub trait SignalingService: Send + Sync {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential>;

    /// Send the local offer SDP and return the remote answer SDP.
    async fn exchange_description(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
    ) -> SessionResult<String>;
}

/// HTTP implementation: `GET <base>/token` and `POST <base>/realtime?model=`.
#[derive(Debug, Clone)]
pub struct HttpSignaling {
    http: reqwest::Client,
    api_base_url: String,
    model: RealtimeModel,
}

impl HttpSignaling {
    pub fn new(api_base_url: &str, model: RealtimeModel, timeout: Duration) -> SessionResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::InvalidConfiguration(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    pub fn from_config(config: &RealtimeConfig) -> SessionResult<Self> {
        Self::new(&config.api_base_url, config.model, config.http_timeout)
    }
}

#[async_trait]
impl SignalingService for HttpSignaling {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential> {
        let url = format!("{}/token", self.api_base_url);
        debug!(%url, "Fetching ephemeral token");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), error = %body, "Token fetch failed");
            return Err(SessionError::Credential(format!(
                "failed to fetch token: {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SessionError::Credential(format!("invalid token response: {e}")))?;
        let credential = extract_client_secret(&body).ok_or_else(|| {
            SessionError::Credential("invalid token format received from server".to_string())
        })?;
        info!("Ephemeral token received");
        Ok(credential)
    }

    async fn exchange_description(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
    ) -> SessionResult<String> {
        let url = format!("{}/realtime", self.api_base_url);
        debug!(%url, model = %self.model, "Sending offer");

        let response = self
            .http
            .post(&url)
            .query(&[("model", self.model.as_str())])
            .header(AUTHORIZATION, format!("Bearer {}", credential.expose()))
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SessionError::Transport(format!("SDP exchange request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Transport(format!("failed to read SDP answer: {e}")))?;
        if !status.is_success() {
            error!(status = status.as_u16(), error = %body, "SDP exchange failed");
            return Err(SessionError::Negotiation {
                status: status.as_u16(),
                body,
            });
        }
        debug!(answer_len = body.len(), "Received SDP answer");
        Ok(body)
    }
}

// =============================================================================
// Establishment
// =============================================================================

/// A fully negotiated session.
pub struct Established {
    pub resources: SessionResources,
    pub channel: Arc<dyn EventChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// A failed handshake and whatever it had acquired.
pub struct EstablishFailure {
    pub error: SessionError,
    pub leftovers: SessionResources,
}

impl std::fmt::Debug for EstablishFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishFailure")
            .field("error", &self.error)
            .field("leftovers", &self.leftovers)
            .finish()
    }
}

/// Runs the handshake against a [`SignalingService`] and the host's media stack.
pub struct SignalingClient {
    service: Arc<dyn SignalingService>,
    transports: Arc<dyn TransportFactory>,
    capture: Arc<dyn AudioCapture>,
    data_channel_label: String,
    audio_output: Option<mpsc::Sender<Bytes>>,
}

impl SignalingClient {
    pub fn new(
        service: Arc<dyn SignalingService>,
        transports: Arc<dyn TransportFactory>,
        capture: Arc<dyn AudioCapture>,
        data_channel_label: impl Into<String>,
    ) -> Self {
        Self {
            service,
            transports,
            capture,
            data_channel_label: data_channel_label.into(),
            audio_output: None,
        }
    }

    /// Forward remote audio frames of every session to `output`.
    pub fn with_audio_output(mut self, output: mpsc::Sender<Bytes>) -> Self {
        self.audio_output = Some(output);
        self
    }

    pub async fn establish(&self) -> Result<Established, EstablishFailure> {
        info!("Starting realtime session handshake");
        let mut resources = SessionResources::default();
        match self.negotiate(&mut resources).await {
            Ok((channel, events)) => {
                info!(label = channel.label(), "Session negotiated");
                Ok(Established {
                    resources,
                    channel,
                    events,
                })
            }
            Err(error) => {
                error!(error = %error, "Session handshake failed");
                Err(EstablishFailure {
                    error,
                    leftovers: resources,
                })
            }
        }
    }

    async fn negotiate(
        &self,
        resources: &mut SessionResources,
    ) -> SessionResult<(Arc<dyn EventChannel>, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let credential = self.service.fetch_credential().await?;

        let transport = self.transports.create().await.map_err(transport_error)?;
        let sink = match &self.audio_output {
            Some(output) => RemoteAudioSink::with_output(output.clone()),
            None => RemoteAudioSink::new(),
        };
        transport.attach_remote_audio(sink.clone());
        resources.sink = Some(sink);
        let transport = resources.transport.insert(transport);

        debug!("Requesting microphone access");
        let track = self
            .capture
            .acquire()
            .await
            .map_err(|e| SessionError::MediaAccess(e.to_string()))?;
        resources.local_audio = Some(track.clone());
        transport.add_local_audio(track).await.map_err(transport_error)?;

        let opened = transport
            .open_event_channel(&self.data_channel_label)
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))?;
        resources.channel = Some(opened.channel.clone());

        let offer = transport.create_offer().await.map_err(transport_error)?;
        let answer = self.service.exchange_description(&offer, &credential).await?;
        transport.apply_answer(answer).await.map_err(transport_error)?;

        Ok((opened.channel, opened.events))
    }
}

fn transport_error(err: TransportError) -> SessionError {
    match err {
        TransportError::MediaDenied(msg) => SessionError::MediaAccess(msg),
        TransportError::Channel(msg) => SessionError::Channel(msg),
        TransportError::ChannelNotOpen => SessionError::Channel("channel not open".to_string()),
        other => SessionError::Transport(other.to_string()),
    }
}
