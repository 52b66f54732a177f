//! Session-scoped timers.
//!
//! Two deadlines run while a session is connected: the maximum session
//! duration (one shot, triggers stop and a delayed restart) and the periodic
//! input-buffer clear. Both are plain deadlines polled by the session task,
//! so they disappear the moment they are disarmed.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Timer durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Upper bound on a single connected session
    pub max_session_duration: Duration,
    /// Period of the input-buffer clear
    pub buffer_clear_interval: Duration,
    /// Delay between a duration-limit stop and the automatic restart
    pub restart_delay: Duration,
    /// Delay after `response.done` before the responding flag drops
    pub response_grace: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_session_duration: Duration::from_secs(30 * 60),
            buffer_clear_interval: Duration::from_secs(3 * 60),
            restart_delay: Duration::from_millis(1000),
            response_grace: Duration::from_millis(1000),
        }
    }
}

/// Which session timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFired {
    SessionDuration,
    BufferClear,
}

/// Deadlines armed while the session is connected.
#[derive(Debug)]
pub struct SessionTimers {
    config: TimerConfig,
    duration_deadline: Option<Instant>,
    buffer_clear_deadline: Option<Instant>,
}

impl SessionTimers {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            duration_deadline: None,
            buffer_clear_deadline: None,
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Arm both timers. Called on entering `connected`.
    pub fn arm(&mut self, now: Instant) {
        self.duration_deadline = Some(now + self.config.max_session_duration);
        self.buffer_clear_deadline = Some(now + self.config.buffer_clear_interval);
        debug!(
            max_duration_secs = self.config.max_session_duration.as_secs(),
            buffer_clear_secs = self.config.buffer_clear_interval.as_secs(),
            "Session timers armed"
        );
    }

    /// Disarm both timers. Idempotent.
    pub fn disarm(&mut self) {
        if self.is_armed() {
            debug!("Session timers disarmed");
        }
        self.duration_deadline = None;
        self.buffer_clear_deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.duration_deadline.is_some() || self.buffer_clear_deadline.is_some()
    }

    /// The earliest pending deadline and which timer it belongs to.
    pub fn next_deadline(&self) -> Option<(Instant, TimerFired)> {
        let duration = self
            .duration_deadline
            .map(|at| (at, TimerFired::SessionDuration));
        let clear = self
            .buffer_clear_deadline
            .map(|at| (at, TimerFired::BufferClear));
        match (duration, clear) {
            (Some(d), Some(c)) => Some(if d.0 <= c.0 { d } else { c }),
            (d, c) => d.or(c),
        }
    }

    /// Record that `which` fired at `now`. The duration timer is single-shot;
    /// the buffer clear reschedules itself.
    pub fn fired(&mut self, which: TimerFired, now: Instant) {
        match which {
            TimerFired::SessionDuration => self.duration_deadline = None,
            TimerFired::BufferClear => {
                if self.buffer_clear_deadline.is_some() {
                    self.buffer_clear_deadline = Some(now + self.config.buffer_clear_interval);
                }
            }
        }
    }
}

/// Sleep until `deadline`, or forever if there is none.
pub async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
