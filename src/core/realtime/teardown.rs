//! Ordered release of a session's resources.

use std::sync::Arc;
use tracing::{debug, info};

use super::lifecycle::ConnectionLifecycle;
use super::outbound::Outbound;
use super::timers::SessionTimers;
use super::transport::{EventChannel, LocalAudioTrack, MediaTransport, RemoteAudioSink};
use crate::core::tools::clear_input_buffer;

/// Resources acquired while establishing a session.
///
/// Every field is optional so a partially established session can be
/// released with the same code as a complete one.
#[derive(Default)]
pub struct SessionResources {
    pub local_audio: Option<Arc<dyn LocalAudioTrack>>,
    pub transport: Option<Box<dyn MediaTransport>>,
    pub channel: Option<Arc<dyn EventChannel>>,
    pub sink: Option<RemoteAudioSink>,
}

impl SessionResources {
    pub fn is_empty(&self) -> bool {
        self.local_audio.is_none()
            && self.transport.is_none()
            && self.channel.is_none()
            && self.sink.is_none()
    }
}

impl std::fmt::Debug for SessionResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResources")
            .field("local_audio", &self.local_audio.as_ref().map(|t| t.id().to_string()))
            .field("transport", &self.transport.is_some())
            .field("channel", &self.channel.as_ref().map(|c| c.label().to_string()))
            .field("sink", &self.sink)
            .finish()
    }
}

/// What a teardown pass actually released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub buffer_cleared: bool,
    pub channel_closed: bool,
    pub local_audio_stopped: bool,
    pub transport_closed: bool,
    pub sink_detached: bool,
}

/// Releases everything a session holds, in a fixed order.
///
/// 1. disarm timers
/// 2. clear the remote input buffer (best effort, only if the channel is open)
/// 3. close the event channel
/// 4. stop local capture
/// 5. stop outbound senders
/// 6. close the transport
/// 7. detach the remote audio sink
/// 8. report `disconnected` (skipped by [`release`](Self::release))
///
/// Each step acts on whatever is present, so running it twice is harmless.
pub struct TeardownCoordinator<'a> {
    timers: Option<&'a mut SessionTimers>,
    outbound: Option<&'a mut Outbound>,
    resources: &'a mut SessionResources,
}

impl<'a> TeardownCoordinator<'a> {
    pub fn new(resources: &'a mut SessionResources) -> Self {
        Self {
            timers: None,
            outbound: None,
            resources,
        }
    }

    pub fn with_timers(mut self, timers: &'a mut SessionTimers) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn with_outbound(mut self, outbound: &'a mut Outbound) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Release everything and report `disconnected`.
    pub async fn stop(self, lifecycle: &mut ConnectionLifecycle) -> TeardownReport {
        let report = self.release().await;
        lifecycle.mark_disconnected();
        info!(?report, "Session stopped");
        report
    }

    /// Release everything without touching the connection status.
    pub async fn release(self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let Self {
            timers,
            outbound,
            resources,
        } = self;

        if let Some(timers) = timers {
            timers.disarm();
        }

        let mut channel = resources.channel.take();
        if let Some(outbound) = outbound {
            if outbound.is_open() {
                report.buffer_cleared = clear_input_buffer(outbound);
            }
            if let Some(attached) = outbound.detach() {
                channel.get_or_insert(attached);
            }
        }
        if let Some(channel) = channel {
            debug!(label = channel.label(), "Closing event channel");
            channel.close();
            report.channel_closed = true;
        }

        if let Some(track) = resources.local_audio.take() {
            debug!(track_id = track.id(), "Stopping local audio");
            track.stop();
            report.local_audio_stopped = true;
        }

        if let Some(transport) = resources.transport.take() {
            transport.stop_outbound_tracks().await;
            transport.close().await;
            report.transport_closed = true;
        }

        if let Some(sink) = resources.sink.take() {
            sink.detach();
            report.sink_detached = true;
        }

        report
    }
}
