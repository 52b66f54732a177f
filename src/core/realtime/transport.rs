//! Transport seams between the session engine and the host media stack.
//!
//! The engine never talks to a peer connection directly. It drives these
//! traits, which the host implements (the `webrtc` feature ships one), and
//! tests replace with in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The capture device refused access or is unavailable
    #[error("Media access denied: {0}")]
    MediaDenied(String),

    /// Peer connection creation or configuration failed
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// A session description could not be produced or applied
    #[error("Invalid session description: {0}")]
    SessionDescription(String),

    /// The event channel rejected an operation
    #[error("Channel error: {0}")]
    Channel(String),

    /// The event channel is not in the open state
    #[error("Channel not open")]
    ChannelNotOpen,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Event Channel
// =============================================================================

/// Lifecycle and message notifications from an event channel.
///
/// Delivered in order on the receiver returned by
/// [`MediaTransport::open_event_channel`]. Peer-connection failures are
/// reported here as [`ChannelEvent::Error`] too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

/// Bidirectional, ordered text channel carried by the media transport.
pub trait EventChannel: Send + Sync {
    /// Channel label negotiated with the remote side.
    fn label(&self) -> &str;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Queue a text frame for delivery. Frames are delivered in call order.
    fn send_text(&self, text: String) -> TransportResult<()>;

    /// Close the channel. Safe to call more than once.
    fn close(&self);
}

/// An event channel together with its notification stream.
pub struct OpenedChannel {
    pub channel: Arc<dyn EventChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

// =============================================================================
// Local Audio
// =============================================================================

/// A live local audio track obtained from the capture device.
pub trait LocalAudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Stop capturing. Safe to call more than once.
    fn stop(&self);

    fn is_live(&self) -> bool;

    /// Access to the concrete type, used by transports to recover their own track type.
    fn as_any(&self) -> &dyn Any;
}

/// Source of local audio tracks (the microphone on a real host).
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn acquire(&self) -> TransportResult<Arc<dyn LocalAudioTrack>>;
}

// =============================================================================
// Media Transport
// =============================================================================

/// A single peer connection to the remote model.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Attach a local audio track as an outbound sender.
    async fn add_local_audio(&self, track: Arc<dyn LocalAudioTrack>) -> TransportResult<()>;

    /// Create the ordered event channel. Must be called before [`create_offer`](Self::create_offer).
    async fn open_event_channel(&self, label: &str) -> TransportResult<OpenedChannel>;

    /// Create an offer receiving remote audio (no video), apply it locally and return its SDP.
    async fn create_offer(&self) -> TransportResult<String>;

    /// Apply the remote answer SDP.
    async fn apply_answer(&self, sdp: String) -> TransportResult<()>;

    /// Route inbound remote audio into `sink`.
    fn attach_remote_audio(&self, sink: RemoteAudioSink);

    /// Stop every outbound sender's track.
    async fn stop_outbound_tracks(&self);

    /// Close the peer connection. Safe to call more than once.
    async fn close(&self);
}

/// Creates one transport per handshake.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> TransportResult<Box<dyn MediaTransport>>;
}

// =============================================================================
// Remote Audio Sink
// =============================================================================

/// Description of the remote track bound to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub codec: String,
}

#[derive(Default)]
struct SinkState {
    track: Option<RemoteTrackInfo>,
    output: Option<mpsc::Sender<Bytes>>,
    detached: bool,
    frames: u64,
}

/// Playback target for the remote model's audio.
///
/// Transports push encoded frames here; the host may subscribe an output
/// channel. Once detached, pushes are refused so reader tasks wind down.
#[derive(Clone, Default)]
pub struct RemoteAudioSink {
    inner: Arc<Mutex<SinkState>>,
}

impl RemoteAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink forwarding frames to `output`.
    pub fn with_output(output: mpsc::Sender<Bytes>) -> Self {
        let sink = Self::default();
        sink.inner.lock().output = Some(output);
        sink
    }

    /// Bind the first remote audio track. Returns false if the sink was detached.
    pub fn attach(&self, track: RemoteTrackInfo) -> bool {
        let mut state = self.inner.lock();
        if state.detached {
            return false;
        }
        tracing::info!(track_id = %track.id, codec = %track.codec, "Remote audio track attached");
        state.track = Some(track);
        true
    }

    /// Deliver one frame. Returns false once the sink is detached.
    pub fn push(&self, frame: Bytes) -> bool {
        let mut state = self.inner.lock();
        if state.detached {
            return false;
        }
        state.frames += 1;
        if let Some(output) = &state.output {
            // A full output drops the frame rather than stalling the media reader
            let _ = output.try_send(frame);
        }
        true
    }

    pub fn attached_track(&self) -> Option<RemoteTrackInfo> {
        self.inner.lock().track.clone()
    }

    pub fn frames_received(&self) -> u64 {
        self.inner.lock().frames
    }

    /// Drop the bound track and output. Idempotent.
    pub fn detach(&self) {
        let mut state = self.inner.lock();
        state.detached = true;
        state.track = None;
        state.output = None;
    }

    pub fn is_detached(&self) -> bool {
        self.inner.lock().detached
    }
}

impl std::fmt::Debug for RemoteAudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RemoteAudioSink")
            .field("track", &state.track)
            .field("detached", &state.detached)
            .field("frames", &state.frames)
            .finish()
    }
}
