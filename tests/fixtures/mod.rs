//! Test Fixtures Module
//!
//! In-memory stand-ins for the host media stack and the signaling service,
//! plus helpers for driving a [`RealtimeSession`] from integration tests:
//! - `FakeTransportFactory` / `TransportProbe`: peer connections whose event
//!   channel the test can inspect and feed
//! - `FakeCapture`: microphone that can be told to deny access
//! - `FakeSignaling`: token and SDP exchange without HTTP

// Not every test file uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

use aime_realtime::core::realtime::{
    AudioCapture, ChannelEvent, ConnectionState, EphemeralCredential, EventChannel,
    EventLogCallback, LocalAudioTrack, MediaTransport, OpenedChannel, RealtimeConfig, RealtimeSession,
    RemoteAudioSink, SessionDeps, SessionError, SessionResult, SignalingService, TransportError,
    TransportFactory, TransportResult,
};
use aime_realtime::core::tools::ToolBackends;

/// Address nothing listens on.
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

// =============================================================================
// Event Channel
// =============================================================================

pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EventChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::ChannelNotOpen);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Test-side view of one fake peer connection.
pub struct TransportProbe {
    auto_open: bool,
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    sink: Mutex<Option<RemoteAudioSink>>,
    local_tracks: AtomicUsize,
    tracks_stopped: AtomicBool,
    closed: AtomicBool,
}

impl TransportProbe {
    fn new(auto_open: bool) -> Self {
        Self {
            auto_open,
            events: Mutex::new(None),
            channel: Mutex::new(None),
            sink: Mutex::new(None),
            local_tracks: AtomicUsize::new(0),
            tracks_stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a channel event to the session.
    pub fn push(&self, event: ChannelEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Deliver a server event as a text frame.
    pub fn server_event(&self, event: Value) {
        self.push(ChannelEvent::Message(event.to_string()));
    }

    /// Deliver a raw text frame.
    pub fn raw_frame(&self, frame: &str) {
        self.push(ChannelEvent::Message(frame.to_string()));
    }

    /// Open the channel and notify the session.
    pub fn open(&self) {
        if let Some(channel) = self.channel() {
            channel.set_open(true);
        }
        self.push(ChannelEvent::Open);
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }

    /// Every event the session sent, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.channel()
            .map(|channel| {
                channel
                    .sent
                    .lock()
                    .iter()
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count_sent(&self, event_type: &str) -> usize {
        self.sent_types().iter().filter(|t| *t == event_type).count()
    }

    pub fn sink(&self) -> Option<RemoteAudioSink> {
        self.sink.lock().clone()
    }

    pub fn local_tracks(&self) -> usize {
        self.local_tracks.load(Ordering::SeqCst)
    }

    pub fn tracks_stopped(&self) -> bool {
        self.tracks_stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    probe: Arc<TransportProbe>,
}

#[async_trait]
impl MediaTransport for FakeTransport {
    async fn add_local_audio(&self, _track: Arc<dyn LocalAudioTrack>) -> TransportResult<()> {
        self.probe.local_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_event_channel(&self, label: &str) -> TransportResult<OpenedChannel> {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(FakeChannel::new(label));
        *self.probe.events.lock() = Some(tx);
        *self.probe.channel.lock() = Some(channel.clone());
        Ok(OpenedChannel {
            channel,
            events: rx,
        })
    }

    async fn create_offer(&self) -> TransportResult<String> {
        Ok("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=fake-offer\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: String) -> TransportResult<()> {
        if sdp.is_empty() {
            return Err(TransportError::SessionDescription("empty answer".to_string()));
        }
        if self.probe.auto_open {
            self.probe.open();
        }
        Ok(())
    }

    fn attach_remote_audio(&self, sink: RemoteAudioSink) {
        *self.probe.sink.lock() = Some(sink);
    }

    async fn stop_outbound_tracks(&self) {
        self.probe.tracks_stopped.store(true, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

/// Creates fake transports and keeps a probe for each.
pub struct FakeTransportFactory {
    auto_open: bool,
    probes: Mutex<Vec<Arc<TransportProbe>>>,
}

impl FakeTransportFactory {
    /// Transports whose channel opens as soon as the answer is applied.
    pub fn new() -> Self {
        Self {
            auto_open: true,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Transports whose channel only opens when the test calls [`TransportProbe::open`].
    pub fn manual() -> Self {
        Self {
            auto_open: false,
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.probes.lock().len()
    }

    pub fn latest(&self) -> Arc<TransportProbe> {
        self.probes
            .lock()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    pub fn probe(&self, index: usize) -> Arc<TransportProbe> {
        self.probes.lock()[index].clone()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(&self) -> TransportResult<Box<dyn MediaTransport>> {
        let probe = Arc::new(TransportProbe::new(self.auto_open));
        self.probes.lock().push(probe.clone());
        Ok(Box::new(FakeTransport { probe }))
    }
}

// =============================================================================
// Capture
// =============================================================================

pub struct FakeTrack {
    id: String,
    live: AtomicBool,
}

impl LocalAudioTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FakeCapture {
    deny: AtomicBool,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            deny: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn denying() -> Self {
        let capture = Self::new();
        capture.deny.store(true, Ordering::SeqCst);
        capture
    }

    pub fn acquired(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.lock().iter().filter(|t| t.is_live()).count()
    }
}

#[async_trait]
impl AudioCapture for FakeCapture {
    async fn acquire(&self) -> TransportResult<Arc<dyn LocalAudioTrack>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(TransportError::MediaDenied("Permission denied".to_string()));
        }
        let mut tracks = self.tracks.lock();
        let track = Arc::new(FakeTrack {
            id: format!("mic-{}", tracks.len()),
            live: AtomicBool::new(true),
        });
        tracks.push(track.clone());
        Ok(track)
    }
}

// =============================================================================
// Signaling
// =============================================================================

pub struct FakeSignaling {
    credential_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
    exchange_error: Mutex<Option<SessionError>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeSignaling {
    pub fn new() -> Self {
        Self {
            credential_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            exchange_error: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    /// Fail every SDP exchange with `error`.
    pub fn failing_with(error: SessionError) -> Self {
        let signaling = Self::new();
        *signaling.exchange_error.lock() = Some(error);
        signaling
    }

    /// Hold every credential request until the returned notify is signalled.
    pub fn gated(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(notify.clone());
        notify
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingService for FakeSignaling {
    async fn fetch_credential(&self) -> SessionResult<EphemeralCredential> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(EphemeralCredential::new("ek_test"))
    }

    async fn exchange_description(
        &self,
        offer_sdp: &str,
        credential: &EphemeralCredential,
    ) -> SessionResult<String> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(credential.expose(), "ek_test");
        assert!(offer_sdp.starts_with("v=0"));
        if let Some(error) = self.exchange_error.lock().clone() {
            return Err(error);
        }
        Ok("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=fake-answer\r\n".to_string())
    }
}

// =============================================================================
// Session Harness
// =============================================================================

pub struct Harness {
    pub session: RealtimeSession,
    pub transports: Arc<FakeTransportFactory>,
    pub capture: Arc<FakeCapture>,
    pub signaling: Arc<FakeSignaling>,
}

impl Harness {
    pub fn probe(&self) -> Arc<TransportProbe> {
        self.transports.latest()
    }

    /// Start and wait until the session is connected.
    pub async fn connect(&self) -> Arc<TransportProbe> {
        assert!(self.session.start().await.unwrap());
        wait_for_status(&self.session, ConnectionState::Connected).await;
        self.probe()
    }
}

pub struct HarnessBuilder {
    config: RealtimeConfig,
    transports: FakeTransportFactory,
    capture: FakeCapture,
    signaling: FakeSignaling,
    event_log: Option<EventLogCallback>,
    audio_output: Option<mpsc::Sender<Bytes>>,
    api_base_url: String,
    solver_base_url: String,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: RealtimeConfig::default(),
            transports: FakeTransportFactory::new(),
            capture: FakeCapture::new(),
            signaling: FakeSignaling::new(),
            event_log: None,
            audio_output: None,
            api_base_url: UNREACHABLE.to_string(),
            solver_base_url: UNREACHABLE.to_string(),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut RealtimeConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn transports(mut self, transports: FakeTransportFactory) -> Self {
        self.transports = transports;
        self
    }

    pub fn capture(mut self, capture: FakeCapture) -> Self {
        self.capture = capture;
        self
    }

    pub fn signaling(mut self, signaling: FakeSignaling) -> Self {
        self.signaling = signaling;
        self
    }

    pub fn event_log(mut self, event_log: EventLogCallback) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn audio_output(mut self, output: mpsc::Sender<Bytes>) -> Self {
        self.audio_output = Some(output);
        self
    }

    /// Base URLs of the weather service and the putt solver.
    pub fn backends(mut self, api_base_url: &str, solver_base_url: &str) -> Self {
        self.api_base_url = api_base_url.to_string();
        self.solver_base_url = solver_base_url.to_string();
        self
    }

    pub fn spawn(self) -> Harness {
        let transports = Arc::new(self.transports);
        let capture = Arc::new(self.capture);
        let signaling = Arc::new(self.signaling);
        let tools = ToolBackends::new(
            &self.api_base_url,
            &self.solver_base_url,
            Duration::from_secs(2),
        )
        .unwrap();
        let mut deps =
            SessionDeps::new(transports.clone(), capture.clone()).with_signaling(signaling.clone());
        if let Some(event_log) = self.event_log {
            deps = deps.with_event_log(event_log);
        }
        if let Some(output) = self.audio_output {
            deps = deps.with_audio_output(output);
        }
        let session = RealtimeSession::spawn(self.config, tools, deps).unwrap();
        Harness {
            session,
            transports,
            capture,
            signaling,
        }
    }
}

// =============================================================================
// Waiting
// =============================================================================

/// Poll `condition` until it holds, panicking after a few seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_status(session: &RealtimeSession, state: ConnectionState) {
    let mut status = session.subscribe_status();
    let reached = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == state)).await;
    assert!(
        matches!(reached, Ok(Ok(_))),
        "timed out waiting for status {state}, current {}",
        session.status()
    );
}
