//! Human-paced reveal of response text.
//!
//! The model's text arrives in bursts (deltas) or all at once (done events).
//! [`ResponseStreamer`] reveals it a character or two at a time on a tick
//! whose period grows with the text length, so the display reads like
//! someone typing. Ticks are driven by the session task through
//! [`ResponseStreamer::next_tick_at`] and [`ResponseStreamer::tick`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::messages::ClientEvent;
use super::outbound::Outbound;

/// Pacing parameters for the reveal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Characters shown immediately when a new response starts
    pub initial_chars: usize,
    /// Shortest tick period
    pub min_tick_ms: u64,
    /// Longest tick period
    pub max_tick_ms: u64,
    /// One extra millisecond of period per this many characters
    pub chars_per_extra_ms: usize,
    /// Chance that a tick reveals two characters instead of one
    pub double_step_probability: f64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            initial_chars: 3,
            min_tick_ms: 60,
            max_tick_ms: 100,
            chars_per_extra_ms: 15,
            double_step_probability: 0.1,
        }
    }
}

impl StreamingConfig {
    /// Tick period for a text of `len` characters.
    pub fn tick_period(&self, len: usize) -> Duration {
        let extra = (len / self.chars_per_extra_ms.max(1)) as u64;
        let ms = (self.min_tick_ms + extra).clamp(self.min_tick_ms, self.max_tick_ms.max(self.min_tick_ms));
        Duration::from_millis(ms)
    }
}

/// What is being revealed and how far the reveal has got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingState {
    pub full_text: String,
    /// Revealed prefix length in characters
    pub revealed_len: usize,
    pub active: bool,
}

/// Sole owner of [`StreamingState`] for a session.
#[derive(Debug)]
pub struct ResponseStreamer {
    config: StreamingConfig,
    state: StreamingState,
    full_len: usize,
    period: Duration,
    next_tick: Option<Instant>,
    rng: StdRng,
}

impl ResponseStreamer {
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic pacing, for tests.
    pub fn with_seed(config: StreamingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: StreamingConfig, rng: StdRng) -> Self {
        let period = config.tick_period(0);
        Self {
            config,
            state: StreamingState::default(),
            full_len: 0,
            period,
            next_tick: None,
            rng,
        }
    }

    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Length of the full text in characters.
    pub fn full_len(&self) -> usize {
        self.full_len
    }

    /// The currently revealed prefix.
    pub fn revealed_text(&self) -> &str {
        let text = &self.state.full_text;
        match text.char_indices().nth(self.state.revealed_len) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    /// When the next tick is due, if a reveal is running.
    pub fn next_tick_at(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Start or continue revealing `full_text`.
    ///
    /// Text extending the revealed prefix continues from where the reveal is.
    /// Anything else replaces it as a new response and shows the first few
    /// characters at once. Returns whether the text was a continuation.
    pub fn reveal(&mut self, full_text: &str, now: Instant) -> bool {
        let prefix = self.revealed_text();
        let is_continuation = !prefix.is_empty() && full_text.starts_with(prefix);

        self.next_tick = None;
        self.full_len = full_text.chars().count();
        self.state.full_text = full_text.to_string();
        if !is_continuation {
            self.state.revealed_len = self.config.initial_chars.min(self.full_len);
        }
        self.period = self.config.tick_period(self.full_len);

        debug!(
            full_len = self.full_len,
            revealed_len = self.state.revealed_len,
            is_continuation,
            period_ms = self.period.as_millis() as u64,
            "Revealing response text"
        );

        if self.state.revealed_len >= self.full_len {
            self.state.active = false;
        } else {
            self.state.active = true;
            self.next_tick = Some(now + self.period);
        }
        is_continuation
    }

    /// Advance the reveal by one step. Returns whether the revealed prefix grew.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.state.active {
            self.next_tick = None;
            return false;
        }

        let step = if self.rng.random_bool(self.config.double_step_probability.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        self.state.revealed_len = (self.state.revealed_len + step).min(self.full_len);

        if self.state.revealed_len >= self.full_len {
            self.state.active = false;
            self.next_tick = None;
        } else {
            self.next_tick = Some(now + self.period);
        }
        true
    }

    /// Stop the reveal, clear the display and cancel the remote response if
    /// one is in progress. Returns whether a cancellation was sent.
    pub fn interrupt(&mut self, responding: bool, outbound: &Outbound) -> bool {
        let in_progress = responding || self.state.active;
        self.reset();

        if !in_progress {
            debug!("Interrupt with no response in progress");
            return false;
        }

        match outbound.emit(ClientEvent::ResponseCancel) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Failed to send response.cancel");
                false
            }
        }
    }

    /// Forget the current response entirely.
    pub fn reset(&mut self) {
        self.next_tick = None;
        self.state = StreamingState::default();
        self.full_len = 0;
    }
}
