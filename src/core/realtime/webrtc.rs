//! Peer-connection transport built on webrtc-rs.
//!
//! - [`WebRtcTransportFactory`] creates one `RTCPeerConnection` per handshake
//! - [`StaticSampleCapture`] provides an Opus track the host feeds with frames
//!
//! Data channel callbacks and peer-connection failures are funnelled into the
//! session's [`ChannelEvent`] stream. Remote audio RTP payloads are pushed into
//! the session's [`RemoteAudioSink`].

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::transport::{
    AudioCapture, ChannelEvent, EventChannel, LocalAudioTrack, MediaTransport, OpenedChannel,
    RemoteAudioSink, RemoteTrackInfo, TransportError, TransportFactory, TransportResult,
};

/// Default STUN server used when none are configured.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

fn peer_error(e: webrtc::Error) -> TransportError {
    TransportError::PeerConnection(e.to_string())
}

// =============================================================================
// Factory
// =============================================================================

/// Creates webrtc-rs peer connections with Opus and the default interceptors.
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self::new(vec![DEFAULT_ICE_SERVER.to_string()])
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self) -> TransportResult<Box<dyn MediaTransport>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_error)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(peer_error)?);
        Ok(Box::new(WebRtcTransport::new(pc)))
    }
}

// =============================================================================
// Transport
// =============================================================================

/// One peer connection to the remote model.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl WebRtcTransport {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(state = %state, "Peer connection state changed");
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected
            ) {
                let _ = state_tx.send(ChannelEvent::Error(format!("peer connection {state}")));
            }
            Box::pin(async {})
        }));

        pc.on_ice_connection_state_change(Box::new(|state| {
            debug!(ice_state = %state, "ICE connection state changed");
            Box::pin(async {})
        }));

        Self {
            pc,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    async fn read_remote_audio(track: Arc<TrackRemote>, sink: RemoteAudioSink) {
        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    if !sink.push(packet.payload) {
                        debug!("Remote audio sink detached");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Remote audio track ended");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn add_local_audio(&self, track: Arc<dyn LocalAudioTrack>) -> TransportResult<()> {
        let local = track
            .as_any()
            .downcast_ref::<WebRtcLocalAudio>()
            .ok_or_else(|| TransportError::PeerConnection("unsupported local audio track".to_string()))?;

        let sender = self
            .pc
            .add_track(local.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(peer_error)?;

        // RTCP has to be drained for the interceptors to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn open_event_channel(&self, label: &str) -> TransportResult<OpenedChannel> {
        let events = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| TransportError::Channel("event channel already opened".to_string()))?;

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        let tx = self.events_tx.clone();
        dc.on_open(Box::new(move || {
            let _ = tx.send(ChannelEvent::Open);
            Box::pin(async {})
        }));

        let tx = self.events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = tx.send(ChannelEvent::Message(text));
                }
                Err(e) => warn!(error = %e, "Dropping non-UTF-8 data channel frame"),
            }
            Box::pin(async {})
        }));

        let tx = self.events_tx.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let _ = tx.send(ChannelEvent::Error(err.to_string()));
            Box::pin(async {})
        }));

        let tx = self.events_tx.clone();
        dc.on_close(Box::new(move || {
            let _ = tx.send(ChannelEvent::Close);
            Box::pin(async {})
        }));

        let channel = Arc::new(WebRtcEventChannel::new(dc, self.events_tx.clone()));
        Ok(OpenedChannel { channel, events })
    }

    async fn create_offer(&self) -> TransportResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::SessionDescription(e.to_string()))?;

        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| TransportError::SessionDescription(e.to_string()))?;
        let _ = gathered.recv().await;

        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| TransportError::SessionDescription("no local description".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> TransportResult<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| TransportError::SessionDescription(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::SessionDescription(e.to_string()))
    }

    fn attach_remote_audio(&self, sink: RemoteAudioSink) {
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = sink.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                let info = RemoteTrackInfo {
                    id: track.id(),
                    codec: track.codec().capability.mime_type,
                };
                if sink.attach(info) {
                    tokio::spawn(WebRtcTransport::read_remote_audio(track, sink));
                }
            })
        }));
    }

    async fn stop_outbound_tracks(&self) {
        for sender in self.pc.get_senders().await {
            if let Err(e) = sender.stop().await {
                debug!(error = %e, "Failed to stop sender");
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error closing peer connection");
        }
    }
}

// =============================================================================
// Event Channel
// =============================================================================

/// Ordered data channel. Sends are queued to a writer task so callers stay synchronous.
pub struct WebRtcEventChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
    writer: mpsc::UnboundedSender<String>,
}

impl WebRtcEventChannel {
    fn new(dc: Arc<RTCDataChannel>, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        let (writer, mut queue) = mpsc::unbounded_channel::<String>();
        let writer_dc = dc.clone();
        tokio::spawn(async move {
            while let Some(text) = queue.recv().await {
                if let Err(e) = writer_dc.send_text(text).await {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
        });
        Self {
            label: dc.label().to_string(),
            dc,
            writer,
        }
    }
}

impl EventChannel for WebRtcEventChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    fn send_text(&self, text: String) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::ChannelNotOpen);
        }
        self.writer
            .send(text)
            .map_err(|_| TransportError::Channel("writer stopped".to_string()))
    }

    fn close(&self) {
        let dc = self.dc.clone();
        tokio::spawn(async move {
            if let Err(e) = dc.close().await {
                debug!(error = %e, "Error closing data channel");
            }
        });
    }
}

// =============================================================================
// Local Audio
// =============================================================================

/// Opus track fed by the host with encoded frames.
pub struct WebRtcLocalAudio {
    track: Arc<TrackLocalStaticSample>,
    live: AtomicBool,
}

impl WebRtcLocalAudio {
    fn new() -> Self {
        let track = TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "aime-local".to_owned(),
        );
        Self {
            track: Arc::new(track),
            live: AtomicBool::new(true),
        }
    }

    fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Write one encoded Opus frame of `duration`.
    pub async fn write_opus_frame(&self, data: Bytes, duration: Duration) -> TransportResult<()> {
        if !self.is_live() {
            return Err(TransportError::MediaDenied("track stopped".to_string()));
        }
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(peer_error)
    }
}

impl LocalAudioTrack for WebRtcLocalAudio {
    fn id(&self) -> &str {
        self.track.id()
    }

    fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out [`WebRtcLocalAudio`] tracks and remembers the latest one so the
/// host can feed it.
#[derive(Default)]
pub struct StaticSampleCapture {
    current: Mutex<Option<Arc<WebRtcLocalAudio>>>,
}

impl StaticSampleCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently acquired track, if it is still live.
    pub fn current_track(&self) -> Option<Arc<WebRtcLocalAudio>> {
        self.current.lock().clone().filter(|track| track.is_live())
    }
}

#[async_trait]
impl AudioCapture for StaticSampleCapture {
    async fn acquire(&self) -> TransportResult<Arc<dyn LocalAudioTrack>> {
        let track = Arc::new(WebRtcLocalAudio::new());
        *self.current.lock() = Some(track.clone());
        Ok(track)
    }
}
