//! Stream Status
//!
//! Lock-light view of one subscription's supervisor, shared with the
//! stream handle and the health endpoint. The supervisor is the only writer.
//!
//! The resume cursor only moves forward, and never past
//! [`MAX_CURSOR_LEAD`] ahead of the local clock: a single event stamped
//! far in the future would otherwise pin every later reconnect there.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::subscription::Cursor;

/// How far ahead of the local clock an event's timestamp may be and still
/// advance the resume cursor.
pub const MAX_CURSOR_LEAD: Duration = Duration::from_secs(300);

/// Supervisor state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, not yet started.
    Idle,
    /// Dialing and handshaking.
    Connecting,
    /// Handshake done, reading frames.
    Streaming,
    /// Connection lost; about to back off.
    Disconnected,
    /// Waiting before the next attempt.
    Backoff,
    /// Stopped for good.
    Cancelled,
}

impl ConnectionState {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Disconnected => "disconnected",
            Self::Backoff => "backoff",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared supervisor status.
#[derive(Debug)]
pub struct StreamStatus {
    state: RwLock<ConnectionState>,
    endpoint: RwLock<Option<String>>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    next_retry: RwLock<Option<Duration>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    decode_errors: AtomicU64,
    classify_errors: AtomicU64,
    last_cursor: AtomicI64,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamStatus {
    /// Fresh status in the `Idle` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Idle),
            endpoint: RwLock::new(None),
            connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            next_retry: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            classify_errors: AtomicU64::new(0),
            last_cursor: AtomicI64::new(-1),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub(crate) fn mark_connecting(&self, endpoint: &str) {
        *self.endpoint.write() = Some(endpoint.to_string());
        *self.next_retry.write() = None;
        self.set_state(ConnectionState::Connecting);
    }

    pub(crate) fn mark_connected(&self) {
        *self.connected_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.set_state(ConnectionState::Streaming);
    }

    pub(crate) fn mark_disconnected(&self, error: String) {
        *self.connected_at.write() = None;
        *self.last_error.write() = Some(error);
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn mark_backoff(&self, attempt: u32, delay: Duration) {
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
        *self.next_retry.write() = Some(delay);
        self.set_state(ConnectionState::Backoff);
    }

    pub(crate) fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, cursor: i64) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
        self.advance_cursor(cursor);
    }

    pub(crate) fn record_dropped(&self, cursor: i64) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        self.advance_cursor(cursor);
    }

    pub(crate) fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_classify_error(&self, cursor: i64) {
        self.classify_errors.fetch_add(1, Ordering::Relaxed);
        self.advance_cursor(cursor);
    }

    fn advance_cursor(&self, cursor: i64) {
        let lead = i64::try_from(MAX_CURSOR_LEAD.as_micros()).unwrap_or(i64::MAX);
        let horizon = Cursor::from_datetime(Utc::now())
            .as_micros()
            .saturating_add(lead);
        if cursor > horizon {
            tracing::warn!(cursor, horizon, "Event timestamp ahead of local clock, cursor not advanced");
            return;
        }
        self.last_cursor.fetch_max(cursor, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether a connection is streaming.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Endpoint of the current or most recent attempt.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.read().clone()
    }

    /// Consecutive failed attempts; zero while streaming.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Frames received across all connections.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Events handed to the delivery queue.
    #[must_use]
    pub fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    /// Events dropped on a full delivery queue.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Time marker of the newest processed event, used to resume after a reconnect.
    #[must_use]
    pub fn last_cursor(&self) -> Option<Cursor> {
        Cursor::from_micros(self.last_cursor.load(Ordering::Relaxed)).ok()
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            endpoint: self.endpoint(),
            connected_at: *self.connected_at.read(),
            last_error: self.last_error.read().clone(),
            next_retry_ms: self
                .next_retry
                .read()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            reconnect_attempts: self.reconnect_attempts(),
            frames_received: self.frames_received(),
            events_delivered: self.events_delivered(),
            events_dropped: self.events_dropped(),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            classify_errors: self.classify_errors.load(Ordering::Relaxed),
            last_cursor: self.last_cursor().map(Cursor::as_micros),
        }
    }
}

/// Serializable copy of [`StreamStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Supervisor state.
    pub state: ConnectionState,
    /// Current or most recent endpoint.
    pub endpoint: Option<String>,
    /// When the live connection was established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Last transport error, cleared on reconnect.
    pub last_error: Option<String>,
    /// Pending backoff delay.
    pub next_retry_ms: Option<u64>,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
    /// Frames received.
    pub frames_received: u64,
    /// Events delivered.
    pub events_delivered: u64,
    /// Events dropped.
    pub events_dropped: u64,
    /// Undecodable frames.
    pub decode_errors: u64,
    /// Unclassifiable envelopes.
    pub classify_errors: u64,
    /// Newest processed time marker.
    pub last_cursor: Option<i64>,
}
