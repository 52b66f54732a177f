//! The realtime session actor and its handle.
//!
//! One task per session owns every piece of mutable state: lifecycle,
//! dispatcher, streamer, timers, outbound channel and transport resources.
//! Everything that can happen to a session arrives on that task as a message
//! or a deadline:
//!
//! - commands from [`RealtimeSession`] handles
//! - handshake results from the establish task
//! - channel events from the transport
//! - tool outcomes from the router
//! - reveal ticks, the response grace period, session timers, the pending restart
//!
//! Handshakes and tool calls run on their own tasks and report back tagged
//! with the session generation, so results from a stopped session are
//! recognised and discarded.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::base::{ConnectionState, EventLogCallback, SessionError, SessionResult};
use super::config::RealtimeConfig;
use super::dispatcher::{DispatchContext, EventDispatcher};
use super::lifecycle::ConnectionLifecycle;
use super::messages::{ClientEvent, ConversationItem, SessionConfig};
use super::outbound::Outbound;
use super::signaling::{EstablishFailure, Established, HttpSignaling, SignalingClient, SignalingService};
use super::streamer::ResponseStreamer;
use super::teardown::{SessionResources, TeardownCoordinator};
use super::timers::{SessionTimers, TimerFired, sleep_until_opt};
use super::transport::{AudioCapture, ChannelEvent, TransportFactory};
use crate::core::tools::{
    ToolBackends, ToolCallRouter, ToolOutcome, clear_input_buffer, emit_outcome, tool_definitions,
};

const COMMAND_BUFFER: usize = 32;

// =============================================================================
// Public types
// =============================================================================

/// Host-provided collaborators of a session.
pub struct SessionDeps {
    pub transports: Arc<dyn TransportFactory>,
    pub capture: Arc<dyn AudioCapture>,
    /// Defaults to [`HttpSignaling`] built from the session config
    pub signaling: Option<Arc<dyn SignalingService>>,
    pub event_log: Option<EventLogCallback>,
    /// Receives the remote model's encoded audio frames
    pub audio_output: Option<mpsc::Sender<Bytes>>,
}

impl SessionDeps {
    pub fn new(transports: Arc<dyn TransportFactory>, capture: Arc<dyn AudioCapture>) -> Self {
        Self {
            transports,
            capture,
            signaling: None,
            event_log: None,
            audio_output: None,
        }
    }

    pub fn with_signaling(mut self, signaling: Arc<dyn SignalingService>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    pub fn with_event_log(mut self, event_log: EventLogCallback) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn with_audio_output(mut self, output: mpsc::Sender<Bytes>) -> Self {
        self.audio_output = Some(output);
        self
    }
}

/// What the host should render for the current response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDisplay {
    /// Revealed prefix of the response text
    pub text: String,
    pub revealed_len: usize,
    pub full_len: usize,
    /// A reveal is in progress
    pub streaming: bool,
    /// The response bubble is shown
    pub visible: bool,
    /// The model is producing a response
    pub responding: bool,
}

enum Command {
    Start(oneshot::Sender<bool>),
    Stop(oneshot::Sender<()>),
    SendText {
        text: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Interrupt(oneshot::Sender<bool>),
    ClearAudioBuffer(oneshot::Sender<bool>),
    Shutdown(oneshot::Sender<()>),
}

struct EstablishResult {
    generation: u64,
    result: Result<Established, EstablishFailure>,
}

// =============================================================================
// Handle
// =============================================================================

/// Handle to a running session task.
///
/// Cheap to clone. The task tears the session down and exits when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct RealtimeSession {
    id: String,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<ConnectionState>,
    last_error: watch::Receiver<Option<SessionError>>,
    display: watch::Receiver<ResponseDisplay>,
    remote_session: watch::Receiver<Option<String>>,
}

impl RealtimeSession {
    /// Spawn the session task. Must be called inside a tokio runtime.
    pub fn spawn(config: RealtimeConfig, tools: ToolBackends, deps: SessionDeps) -> SessionResult<Self> {
        config.validate()?;

        let service: Arc<dyn SignalingService> = match deps.signaling {
            Some(service) => service,
            None => Arc::new(HttpSignaling::from_config(&config)?),
        };
        let mut client = SignalingClient::new(
            service,
            deps.transports,
            deps.capture,
            config.data_channel_label.clone(),
        );
        if let Some(output) = deps.audio_output {
            client = client.with_audio_output(output);
        }
        let signaling = Arc::new(client);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (established_tx, established_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(ResponseDisplay::default());
        let (remote_session_tx, remote_session_rx) = watch::channel(None);

        let lifecycle = ConnectionLifecycle::new();
        let status = lifecycle.subscribe();
        let last_error = lifecycle.subscribe_error();
        let id = uuid::Uuid::new_v4().to_string();

        let actor = SessionActor {
            session_update: config.session_config(tool_definitions()),
            signaling,
            lifecycle,
            dispatcher: EventDispatcher::new(config.timers.response_grace),
            streamer: ResponseStreamer::new(config.streaming.clone()),
            router: ToolCallRouter::new(tools, config.tool_timeout, outcomes_tx),
            timers: SessionTimers::new(config.timers.clone()),
            outbound: Outbound::new(deps.event_log),
            resources: SessionResources::default(),
            channel_events: None,
            generation: 0,
            restart_at: None,
            established_tx,
            display_tx,
            remote_session_tx,
            config,
        };

        let span = info_span!("realtime_session", session_id = %id);
        tokio::spawn(
            actor
                .run(commands_rx, established_rx, outcomes_rx)
                .instrument(span),
        );

        Ok(Self {
            id,
            commands: commands_tx,
            status,
            last_error,
            display: display_rx,
            remote_session: remote_session_rx,
        })
    }

    /// Local identifier of this session, used in log spans.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Begin establishing a session. Returns false, without a second
    /// handshake, if one is already connecting or connected.
    pub async fn start(&self) -> SessionResult<bool> {
        self.request(Command::Start).await
    }

    /// Tear the session down. Safe to call in any state.
    pub async fn stop(&self) -> SessionResult<()> {
        self.request(Command::Stop).await
    }

    /// Send a typed user message and ask for a response.
    pub async fn send_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await?
    }

    /// Cut the current response short. Returns whether a cancellation was sent.
    pub async fn interrupt(&self) -> SessionResult<bool> {
        self.request(Command::Interrupt).await
    }

    /// Ask the model to drop buffered input audio. Returns whether the request was sent.
    pub async fn clear_audio_buffer(&self) -> SessionResult<bool> {
        self.request(Command::ClearAudioBuffer).await
    }

    /// Stop the session and end the task.
    pub async fn shutdown(&self) -> SessionResult<()> {
        self.request(Command::Shutdown).await
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// The failure behind the current `error` status, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<SessionError>> {
        self.last_error.clone()
    }

    pub fn display(&self) -> ResponseDisplay {
        self.display.borrow().clone()
    }

    pub fn subscribe_display(&self) -> watch::Receiver<ResponseDisplay> {
        self.display.clone()
    }

    /// Session id reported by the remote model in `session.created`.
    pub fn remote_session_id(&self) -> Option<String> {
        self.remote_session.borrow().clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SessionResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Internal("session task has ended".to_string()))?;
        rx.await
            .map_err(|_| SessionError::Internal("session task dropped the request".to_string()))
    }
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

struct SessionActor {
    config: RealtimeConfig,
    session_update: SessionConfig,
    signaling: Arc<SignalingClient>,
    lifecycle: ConnectionLifecycle,
    dispatcher: EventDispatcher,
    streamer: ResponseStreamer,
    router: ToolCallRouter,
    timers: SessionTimers,
    outbound: Outbound,
    resources: SessionResources,
    channel_events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
    /// Bumped on every start and stop
    generation: u64,
    restart_at: Option<Instant>,
    established_tx: mpsc::UnboundedSender<EstablishResult>,
    display_tx: watch::Sender<ResponseDisplay>,
    remote_session_tx: watch::Sender<Option<String>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut established: mpsc::UnboundedReceiver<EstablishResult>,
        mut outcomes: mpsc::UnboundedReceiver<ToolOutcome>,
    ) {
        info!("Session task started");
        loop {
            let reveal_at = self.streamer.next_tick_at();
            let grace_at = self.dispatcher.grace_deadline();
            let timer = self.timers.next_deadline();
            let timer_at = timer.map(|(at, _)| at);
            let restart_at = self.restart_at;

            tokio::select! {
                biased;

                Some(done) = established.recv() => self.on_established(done).await,

                event = recv_opt(&mut self.channel_events) => match event {
                    Some(event) => self.on_channel_event(event).await,
                    None => {
                        self.channel_events = None;
                        self.on_channel_event(ChannelEvent::Close).await;
                    }
                },

                Some(outcome) = outcomes.recv() => self.on_tool_outcome(outcome),

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await {
                            break;
                        }
                    }
                    None => {
                        debug!("All session handles dropped");
                        self.end_session(true).await;
                        break;
                    }
                },

                _ = sleep_until_opt(reveal_at) => {
                    self.streamer.tick(Instant::now());
                }

                _ = sleep_until_opt(grace_at) => self.dispatcher.on_grace_elapsed(),

                _ = sleep_until_opt(timer_at) => {
                    if let Some((_, which)) = timer {
                        self.on_timer(which).await;
                    }
                }

                _ = sleep_until_opt(restart_at) => {
                    info!("Restarting session after duration limit");
                    self.begin_start();
                }
            }

            self.publish();
        }
        self.publish();
        info!("Session task finished");
    }

    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Start(reply) => {
                let started = self.begin_start();
                let _ = reply.send(started);
            }
            Command::Stop(reply) => {
                if self.restart_at.take().is_some() {
                    info!("Pending restart cancelled");
                }
                self.end_session(true).await;
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => {
                let result = self.send_text(text).await;
                let _ = reply.send(result);
            }
            Command::Interrupt(reply) => {
                let cancelled = self
                    .streamer
                    .interrupt(self.dispatcher.is_responding(), &self.outbound);
                self.dispatcher.interrupted();
                let _ = reply.send(cancelled);
            }
            Command::ClearAudioBuffer(reply) => {
                let _ = reply.send(clear_input_buffer(&self.outbound));
            }
            Command::Shutdown(reply) => {
                self.restart_at = None;
                self.end_session(true).await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn begin_start(&mut self) -> bool {
        if self.restart_at.take().is_some() {
            debug!("Starting now instead of waiting for the pending restart");
        }
        if !self.lifecycle.begin_connecting() {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let signaling = self.signaling.clone();
        let tx = self.established_tx.clone();
        info!(generation, "Starting realtime session");
        tokio::spawn(
            async move {
                let result = signaling.establish().await;
                let _ = tx.send(EstablishResult { generation, result });
            }
            .in_current_span(),
        );
        true
    }

    async fn on_established(&mut self, done: EstablishResult) {
        let current =
            done.generation == self.generation && self.lifecycle.state() == ConnectionState::Connecting;

        match done.result {
            Ok(established) if current => {
                self.resources = established.resources;
                self.outbound.attach(established.channel);
                self.channel_events = Some(established.events);
                info!("Handshake complete, waiting for the data channel");
            }
            Ok(established) => {
                warn!(generation = done.generation, "Discarding a session established after stop");
                let mut leftovers = established.resources;
                TeardownCoordinator::new(&mut leftovers).release().await;
            }
            Err(failure) => {
                let mut leftovers = failure.leftovers;
                if current {
                    if !self.lifecycle.mark_error(&failure.error) {
                        self.lifecycle.mark_disconnected();
                    }
                } else {
                    debug!(error = %failure.error, "Ignoring a failed handshake from a stopped session");
                }
                TeardownCoordinator::new(&mut leftovers).release().await;
            }
        }
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Open => {
                if !self.lifecycle.mark_connected() {
                    return;
                }
                info!("Data channel opened");
                self.timers.arm(Instant::now());
                self.dispatcher.reset();
                self.streamer.reset();
                let update = ClientEvent::SessionUpdate {
                    session: self.session_update.clone(),
                };
                match self.outbound.emit(update) {
                    Ok(_) => info!("Session configuration sent"),
                    Err(e) => error!(error = %e, "Error during session initialization"),
                }
            }
            ChannelEvent::Message(raw) => {
                let mut ctx = DispatchContext {
                    streamer: &mut self.streamer,
                    outbound: &self.outbound,
                    router: &self.router,
                    generation: self.generation,
                    now: Instant::now(),
                };
                self.dispatcher.handle_message(&raw, &mut ctx);
            }
            ChannelEvent::Error(message) => {
                error!(error = %message, "Data channel error");
                if self.lifecycle.mark_error(&SessionError::Channel(message)) {
                    self.end_session(false).await;
                }
            }
            ChannelEvent::Close => {
                info!("Data channel closed");
                if self.lifecycle.state().is_active() {
                    self.end_session(true).await;
                }
            }
        }
    }

    fn on_tool_outcome(&mut self, outcome: ToolOutcome) {
        if outcome.generation != self.generation
            || self.lifecycle.state() != ConnectionState::Connected
        {
            warn!(
                tool = %outcome.tool,
                call_id = %outcome.call_id,
                "Discarding tool result from an ended session"
            );
            return;
        }
        if let Err(e) = emit_outcome(&self.outbound, &outcome) {
            error!(tool = %outcome.tool, error = %e, "Failed to send tool result");
        }
    }

    async fn on_timer(&mut self, which: TimerFired) {
        self.timers.fired(which, Instant::now());
        match which {
            TimerFired::BufferClear => {
                info!("Performing periodic audio buffer clear");
                clear_input_buffer(&self.outbound);
            }
            TimerFired::SessionDuration => {
                info!(
                    max_secs = self.config.timers.max_session_duration.as_secs(),
                    "Session duration limit reached, refreshing session"
                );
                self.end_session(true).await;
                self.restart_at = Some(Instant::now() + self.config.timers.restart_delay);
            }
        }
    }

    async fn send_text(&mut self, text: String) -> SessionResult<()> {
        if !self.outbound.is_open() {
            error!("Cannot send message - connection not established");
            if self.lifecycle.state() == ConnectionState::Connected
                && self
                    .lifecycle
                    .mark_error(&SessionError::Channel("event channel closed".to_string()))
            {
                self.end_session(false).await;
            }
            return Err(SessionError::NotConnected);
        }
        info!(len = text.chars().count(), "Sending text message");
        self.outbound.emit(ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        })?;
        self.outbound.emit(ClientEvent::ResponseCreate)?;
        Ok(())
    }

    /// Release everything. `reset_status` reports `disconnected`; otherwise
    /// the current status (normally `error`) is kept.
    async fn end_session(&mut self, reset_status: bool) {
        self.generation += 1;
        self.channel_events = None;

        let coordinator = TeardownCoordinator::new(&mut self.resources)
            .with_timers(&mut self.timers)
            .with_outbound(&mut self.outbound);
        if reset_status {
            coordinator.stop(&mut self.lifecycle).await;
        } else {
            coordinator.release().await;
        }

        self.streamer.reset();
        self.dispatcher.reset();
    }

    fn publish(&self) {
        let next = ResponseDisplay {
            text: self.streamer.revealed_text().to_string(),
            revealed_len: self.streamer.state().revealed_len,
            full_len: self.streamer.full_len(),
            streaming: self.streamer.is_active(),
            visible: self.dispatcher.is_visible(),
            responding: self.dispatcher.is_responding(),
        };
        self.display_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        let remote = self.dispatcher.remote_session_id().map(str::to_string);
        self.remote_session_tx.send_if_modified(|current| {
            if *current == remote {
                return false;
            }
            *current = remote;
            true
        });
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
