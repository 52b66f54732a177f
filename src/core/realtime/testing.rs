//! In-memory channel used by unit tests.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::outbound::Outbound;
use super::transport::{EventChannel, TransportError, TransportResult};

pub(crate) struct RecordingChannel {
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    pub(crate) fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl EventChannel for RecordingChannel {
    fn label(&self) -> &str {
        "oai-events"
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
        self.set_open(false);
    }
}

pub(crate) fn open_outbound() -> (Outbound, Arc<RecordingChannel>) {
    let channel = RecordingChannel::new();
    let mut outbound = Outbound::new(None);
    outbound.attach(channel.clone());
    (outbound, channel)
}
