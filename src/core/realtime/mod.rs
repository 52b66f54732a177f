//! Realtime voice session engine.
//!
//! A session is a peer connection to a cloud speech-to-speech model: local
//! microphone audio goes up, the model's voice comes back, and an ordered
//! data channel (`oai-events`) carries JSON events both ways.
//!
//! # Architecture
//!
//! - [`RealtimeSession`] is a cheap handle to one actor task that owns all session state
//! - [`SignalingClient`] runs the handshake (ephemeral credential, offer, answer)
//! - [`EventDispatcher`] routes inbound events to the [`ResponseStreamer`] and the tool router
//! - [`SessionTimers`] drive the periodic buffer clear and the session duration limit
//! - [`TeardownCoordinator`] releases resources in a fixed order
//!
//! Media and signaling sit behind traits ([`TransportFactory`], [`AudioCapture`],
//! [`SignalingService`]) so hosts bring their own stack. The `webrtc` feature
//! provides a webrtc-rs implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use aime_realtime::core::realtime::{RealtimeConfig, RealtimeSession, SessionDeps};
//! use aime_realtime::core::tools::ToolBackends;
//!
//! let config = RealtimeConfig::default();
//! let tools = ToolBackends::new(&config.api_base_url, "http://localhost:8081", config.tool_timeout)?;
//! let session = RealtimeSession::spawn(config, tools, SessionDeps::new(transports, capture))?;
//!
//! session.start().await?;
//! session.send_text("What club from 150 into the wind?").await?;
//! ```

mod base;
mod config;
mod dispatcher;
mod lifecycle;
mod messages;
mod outbound;
mod session;
mod signaling;
mod streamer;
mod teardown;
mod timers;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use base::{ConnectionState, EventLogCallback, SessionError, SessionResult};
pub use config::{
    DEFAULT_API_BASE_URL, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_INSTRUCTIONS, DEFAULT_TEMPERATURE,
    RealtimeConfig, RealtimeModel, RealtimeVoice,
};
pub use dispatcher::{DispatchContext, EventDispatcher};
pub use lifecycle::ConnectionLifecycle;
pub use messages::{
    ClientEvent, ContentPart, ConversationItem, EventDirection, FunctionCallItem, InboundEvent,
    LoggedEvent, OutboundEvent, ServerEvent, SessionConfig, ToolDef, local_timestamp,
};
pub use outbound::Outbound;
pub use session::{RealtimeSession, ResponseDisplay, SessionDeps};
pub use signaling::{
    EphemeralCredential, EstablishFailure, Established, HttpSignaling, SignalingClient,
    SignalingService, extract_client_secret,
};
pub use streamer::{ResponseStreamer, StreamingConfig, StreamingState};
pub use teardown::{SessionResources, TeardownCoordinator, TeardownReport};
pub use timers::{SessionTimers, TimerConfig, TimerFired, sleep_until_opt};
pub use transport::{
    AudioCapture, ChannelEvent, EventChannel, LocalAudioTrack, MediaTransport, OpenedChannel,
    RemoteAudioSink, RemoteTrackInfo, TransportError, TransportFactory, TransportResult,
};
