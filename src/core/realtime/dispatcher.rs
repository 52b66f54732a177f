//! Inbound event routing.
//!
//! Every text frame from the event channel goes through
//! [`EventDispatcher::handle_message`], strictly in arrival order. Frames
//! that do not parse are logged and dropped; nothing here can end the
//! session.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::messages::{InboundEvent, ServerEvent};
use super::outbound::Outbound;
use super::streamer::ResponseStreamer;
use crate::core::tools::{ToolCallRouter, ToolInvocation, clear_input_buffer};

/// What the dispatcher needs from the session for one event.
pub struct DispatchContext<'a> {
    pub streamer: &'a mut ResponseStreamer,
    pub outbound: &'a Outbound,
    pub router: &'a ToolCallRouter,
    /// Session generation tools are tagged with
    pub generation: u64,
    pub now: Instant,
}

/// Tracks response progress and display visibility across events.
#[derive(Debug)]
pub struct EventDispatcher {
    /// Text accumulated from deltas for the current response
    accumulated: String,
    responding: bool,
    visible: bool,
    grace: Duration,
    grace_deadline: Option<Instant>,
    remote_session_id: Option<String>,
}

impl EventDispatcher {
    pub fn new(grace: Duration) -> Self {
        Self {
            accumulated: String::new(),
            responding: false,
            visible: false,
            grace,
            grace_deadline: None,
            remote_session_id: None,
        }
    }

    /// Whether the model is currently producing a response.
    pub fn is_responding(&self) -> bool {
        self.responding
    }

    /// Whether the response display should be shown.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn remote_session_id(&self) -> Option<&str> {
        self.remote_session_id.as_deref()
    }

    /// When the post-response grace period ends, if one is running.
    pub fn grace_deadline(&self) -> Option<Instant> {
        self.grace_deadline
    }

    /// The grace period after `response.done` elapsed.
    pub fn on_grace_elapsed(&mut self) {
        if self.grace_deadline.take().is_some() {
            debug!("Response grace period elapsed");
            self.responding = false;
        }
    }

    /// Hide the display after an interruption.
    pub fn hide(&mut self) {
        self.visible = false;
        self.accumulated.clear();
    }

    /// The current response was cut short locally. A later interrupt has
    /// nothing left to cancel.
    pub fn interrupted(&mut self) {
        self.responding = false;
        self.grace_deadline = None;
        self.hide();
    }

    /// Forget all per-session state.
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.responding = false;
        self.visible = false;
        self.grace_deadline = None;
        self.remote_session_id = None;
    }

    /// Parse and handle one raw frame.
    pub fn handle_message(&mut self, raw: &str, ctx: &mut DispatchContext<'_>) {
        let mut event = match InboundEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse server event: {} - {}", e, truncate(raw, 200));
                return;
            }
        };
        event.ensure_timestamp();

        match event.event_type.as_str() {
            t if t.starts_with("response.") => debug!(event_type = t, "Response event"),
            t if t.starts_with("conversation.") => info!(event_type = t, "Conversation event"),
            t => debug!(event_type = t, "Server event"),
        }

        if let Ok(payload) = serde_json::to_value(&event) {
            let timestamp = event.timestamp.as_deref().unwrap_or_default();
            ctx.outbound.log_inbound(&event.event_type, timestamp, payload);
        }

        self.handle_event(ServerEvent::classify(&event), ctx);
    }

    /// Handle one classified event.
    pub fn handle_event(&mut self, event: ServerEvent, ctx: &mut DispatchContext<'_>) {
        match event {
            ServerEvent::SessionCreated { session_id } => {
                info!(remote_session_id = ?session_id, "Remote session created");
                self.remote_session_id = session_id;
            }
            ServerEvent::Error {
                error_type,
                message,
            } => {
                error!(%error_type, %message, "Server reported an error");
            }
            ServerEvent::ResponseCreated => {
                self.accumulated.clear();
                ctx.streamer.reset();
                self.start_responding();
            }
            ServerEvent::ResponseGenerating | ServerEvent::OutputAudioStarted => {
                self.start_responding();
            }
            ServerEvent::Delta(delta) => {
                self.start_responding();
                self.accumulated.push_str(&delta);
                ctx.streamer.reveal(&self.accumulated, ctx.now);
            }
            ServerEvent::Complete(text) => {
                self.start_responding();
                self.reveal_complete(text, ctx);
            }
            ServerEvent::ResponseDone {
                text,
                function_calls,
            } => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    self.reveal_complete(text, ctx);
                }
                for call in function_calls {
                    ctx.router.dispatch(
                        ToolInvocation {
                            name: call.name,
                            arguments: call.arguments,
                            call_id: call.call_id,
                        },
                        ctx.generation,
                    );
                }
                clear_input_buffer(ctx.outbound);
                self.grace_deadline = Some(ctx.now + self.grace);
            }
            ServerEvent::ResponseError | ServerEvent::OutputAudioStopped => {
                info!("Model stopped responding");
                self.responding = false;
                self.grace_deadline = None;
            }
            ServerEvent::SpeechStarted => {
                info!("User speech detected, interrupting response");
                ctx.streamer.interrupt(self.responding, ctx.outbound);
                self.interrupted();
            }
            ServerEvent::SpeechStopped => {
                clear_input_buffer(ctx.outbound);
            }
            ServerEvent::ResponseCancelled => {
                ctx.streamer.reset();
                self.hide();
            }
            ServerEvent::Other => {}
        }
    }

    fn start_responding(&mut self) {
        self.responding = true;
        self.visible = true;
        self.grace_deadline = None;
    }

    fn reveal_complete(&mut self, text: String, ctx: &mut DispatchContext<'_>) {
        self.visible = true;
        ctx.streamer.reveal(&text, ctx.now);
        self.accumulated = text;
    }
}

fn truncate(raw: &str, max_chars: usize) -> &str {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}
