//! Heartbeat
//!
//! Ping/pong liveness tracking for the feed transport. The connection loop
//! calls [`Heartbeat::tick`] on a timer and [`Heartbeat::record_activity`]
//! on every inbound frame; a ping that goes unanswered past the timeout
//! turns a silent half-open socket into a transport error.

use std::time::Duration;

use tokio::time::Instant;

/// Default interval between pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for any inbound frame after a ping.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings. Zero disables the heartbeat.
    pub ping_interval: Duration,
    /// Time allowed without inbound traffic after a ping.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Heartbeat that never pings.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            ping_interval: Duration::ZERO,
            pong_timeout: Duration::ZERO,
        }
    }

    /// Check if pings are enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !self.ping_interval.is_zero()
    }
}

/// What the loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing to do.
    Idle,
    /// Send a ping frame.
    SendPing,
    /// No traffic since the last ping within the deadline.
    TimedOut,
}

/// Liveness state for one transport.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    last_activity: Instant,
    ping_sent_at: Option<Instant>,
}

impl Heartbeat {
    /// Start tracking a fresh transport.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_activity: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Any inbound frame proves the peer is alive.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.ping_sent_at = None;
    }

    /// Check if a ping is outstanding.
    #[must_use]
    pub const fn awaiting_pong(&self) -> bool {
        self.ping_sent_at.is_some()
    }

    /// Advance the heartbeat at `now`.
    #[must_use]
    pub fn tick(&mut self, now: Instant) -> HeartbeatAction {
        if !self.config.is_enabled() {
            return HeartbeatAction::Idle;
        }

        if let Some(sent_at) = self.ping_sent_at {
            if now.saturating_duration_since(sent_at) >= self.config.pong_timeout {
                return HeartbeatAction::TimedOut;
            }
            return HeartbeatAction::Idle;
        }

        if now.saturating_duration_since(self.last_activity) >= self.config.ping_interval {
            self.ping_sent_at = Some(now);
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }

    /// How often the loop should call [`Heartbeat::tick`].
    ///
    /// Returns `None` when the heartbeat is disabled.
    #[must_use]
    pub fn check_period(&self) -> Option<Duration> {
        if !self.config.is_enabled() {
            return None;
        }
        let finest = if self.config.pong_timeout.is_zero() {
            self.config.ping_interval
        } else {
            self.config.ping_interval.min(self.config.pong_timeout)
        };
        Some((finest / 2).max(Duration::from_millis(10)))
    }
}
