//! Connection Keepalive
//!
//! One heartbeat task runs per live connection. It asks the read loop to
//! send a protocol-level ping every `ping_interval`, and declares the
//! connection dead when no frame of any kind (data, ping or pong) has been
//! seen for `read_timeout`. Every received frame pushes the deadline out.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Keepalive timing. Zero values are replaced by the defaults when the
/// heartbeat runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub read_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            read_timeout: Duration::from_secs(300),
        }
    }
}

impl HeartbeatConfig {
    /// This config with zero durations replaced by the defaults.
    #[must_use]
    pub fn or_defaults(self) -> Self {
        let defaults = Self::default();
        Self {
            ping_interval: if self.ping_interval.is_zero() {
                defaults.ping_interval
            } else {
                self.ping_interval
            },
            read_timeout: if self.read_timeout.is_zero() {
                defaults.read_timeout
            } else {
                self.read_timeout
            },
        }
    }
}

/// Requests from the heartbeat task to the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// Nothing was received within the read timeout.
    Timeout {
        /// How long the connection had been silent.
        idle: Duration,
    },
}

/// Last-activity clock shared by the read loop and the heartbeat task.
#[derive(Debug)]
pub struct ActivityClock {
    last_frame: RwLock<Instant>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// Start the clock now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_frame: RwLock::new(Instant::now()),
        }
    }

    /// Record that a frame arrived.
    pub fn touch(&self) {
        *self.last_frame.write() = Instant::now();
    }

    /// Time since the last frame.
    #[must_use]
    pub fn idle(&self) -> Duration {
        self.last_frame.read().elapsed()
    }

    /// When the connection expires if nothing else arrives.
    #[must_use]
    pub fn deadline(&self, read_timeout: Duration) -> Instant {
        *self.last_frame.read() + read_timeout
    }
}

/// Per-connection keepalive task.
pub struct Heartbeat {
    config: HeartbeatConfig,
    clock: Arc<ActivityClock>,
    events: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl Heartbeat {
    /// Create a heartbeat. Nothing runs until [`Heartbeat::run`] is spawned.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        clock: Arc<ActivityClock>,
        events: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            clock,
            events,
            cancel,
        }
    }

    /// Run until cancelled, the read loop goes away, or the read deadline passes.
    pub async fn run(mut self) {
        self.config = self.config.or_defaults();
        let mut pings = tokio::time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        pings.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let deadline = self.clock.deadline(self.config.read_timeout);

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat cancelled");
                    return;
                }
                _ = pings.tick() => {
                    if self.events.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Read loop gone, stopping heartbeat");
                        return;
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    let idle = self.clock.idle();
                    if idle >= self.config.read_timeout {
                        tracing::warn!(
                            idle_secs = idle.as_secs(),
                            timeout_secs = self.config.read_timeout.as_secs(),
                            "Read deadline exceeded"
                        );
                        let _ = self.events.send(HeartbeatEvent::Timeout { idle }).await;
                        return;
                    }
                    // A frame arrived while sleeping; loop with the new deadline.
                }
            }
        }
    }
}
