//! Outbound event path.
//!
//! Every event the session sends goes through [`Outbound::send`]: it checks
//! the channel is open, stamps an `event_id`, transmits, and then publishes a
//! locally timestamped copy to the event log.

use std::sync::Arc;
use tracing::{debug, warn};

use super::base::{EventLogCallback, SessionError, SessionResult};
use super::messages::{ClientEvent, EventDirection, LoggedEvent, OutboundEvent, local_timestamp};
use super::transport::EventChannel;

/// Sender half of the event channel, owned by the session.
pub struct Outbound {
    channel: Option<Arc<dyn EventChannel>>,
    event_log: Option<EventLogCallback>,
}

impl Outbound {
    pub fn new(event_log: Option<EventLogCallback>) -> Self {
        Self {
            channel: None,
            event_log,
        }
    }

    pub fn attach(&mut self, channel: Arc<dyn EventChannel>) {
        self.channel = Some(channel);
    }

    /// Forget the current channel, returning it so the caller can close it.
    pub fn detach(&mut self) -> Option<Arc<dyn EventChannel>> {
        self.channel.take()
    }

    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// Send a client event. Returns the `event_id` it went out with.
    pub fn send(&self, event: impl Into<OutboundEvent>) -> SessionResult<String> {
        let mut event = event.into();
        let Some(channel) = self.channel.as_ref().filter(|c| c.is_open()) else {
            warn!(event_type = event.event.event_type(), "Cannot send event - channel not open");
            return Err(SessionError::NotConnected);
        };

        let event_id = event.stamp();
        let payload = serde_json::to_value(&event)
            .map_err(|e| SessionError::Internal(format!("failed to encode event: {e}")))?;
        channel
            .send_text(payload.to_string())
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        debug!(event_type = event.event.event_type(), event_id = %event_id, "Sent client event");
        if let Some(log) = &self.event_log {
            log(LoggedEvent {
                direction: EventDirection::Outbound,
                event_type: event.event.event_type().to_string(),
                timestamp: local_timestamp(),
                payload,
            });
        }
        Ok(event_id)
    }

    /// Shorthand for sending an unstamped client event.
    pub fn emit(&self, event: ClientEvent) -> SessionResult<String> {
        self.send(OutboundEvent::new(event))
    }

    /// Publish an inbound event to the event log.
    pub fn log_inbound(&self, event_type: &str, timestamp: &str, payload: serde_json::Value) {
        if let Some(log) = &self.event_log {
            log(LoggedEvent {
                direction: EventDirection::Inbound,
                event_type: event_type.to_string(),
                timestamp: timestamp.to_string(),
                payload,
            });
        }
    }
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("attached", &self.channel.is_some())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::testing::RecordingChannel;
    use parking_lot::Mutex;

    #[test]
    fn test_send_requires_open_channel() {
        let outbound = Outbound::new(None);
        assert_eq!(
            outbound.emit(ClientEvent::ResponseCreate),
            Err(SessionError::NotConnected)
        );

        let mut outbound = Outbound::new(None);
        let channel = RecordingChannel::new();
        channel.set_open(false);
        outbound.attach(channel.clone());
        assert_eq!(
            outbound.emit(ClientEvent::ResponseCreate),
            Err(SessionError::NotConnected)
        );
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_send_stamps_and_logs() {
        let logged = Arc::new(Mutex::new(Vec::new()));
        let sink = logged.clone();
        let log: EventLogCallback = Arc::new(move |event| sink.lock().push(event));

        let mut outbound = Outbound::new(Some(log));
        let channel = RecordingChannel::new();
        outbound.attach(channel.clone());

        let id = outbound.emit(ClientEvent::InputAudioBufferClear).unwrap();
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "input_audio_buffer.clear");
        assert_eq!(sent[0]["event_id"], id.as_str());
        assert!(sent[0].get("timestamp").is_none());

        let logged = logged.lock();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].direction, EventDirection::Outbound);
        assert_eq!(logged[0].event_type, "input_audio_buffer.clear");
        assert!(!logged[0].timestamp.is_empty());
    }

    #[test]
    fn test_caller_event_id_is_kept() {
        let mut outbound = Outbound::new(None);
        let channel = RecordingChannel::new();
        outbound.attach(channel.clone());

        let id = outbound
            .send(OutboundEvent::new(ClientEvent::ResponseCancel).with_event_id("cancel-1"))
            .unwrap();
        assert_eq!(id, "cancel-1");
        assert_eq!(channel.sent()[0]["event_id"], "cancel-1");
    }

    #[test]
    fn test_detach() {
        let mut outbound = Outbound::new(None);
        outbound.attach(RecordingChannel::new());
        assert!(outbound.is_open());
        assert!(outbound.detach().is_some());
        assert!(!outbound.is_open());
        assert!(outbound.detach().is_none());
    }
}
