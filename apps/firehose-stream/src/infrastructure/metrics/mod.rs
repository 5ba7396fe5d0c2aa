//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Frames received, events delivered and dropped by kind
//! - **Errors**: Decode and classification failures, transport errors
//! - **Connections**: Live connection gauge and reconnect attempts
//! - **Latency**: Per-message decode-to-enqueue time
//!
//! Recording functions are no-ops until [`init_metrics`] installs the
//! recorder, so library users who never call it pay nothing.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::event::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the existing handle.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "firehose_frames_received_total",
        "Total frames received from Jetstream"
    );
    describe_counter!(
        "firehose_events_delivered_total",
        "Total classified events accepted by the delivery queue"
    );
    describe_counter!(
        "firehose_events_dropped_total",
        "Total classified events dropped because the delivery queue was full"
    );

    describe_counter!(
        "firehose_decode_errors_total",
        "Total frames that could not be decoded"
    );
    describe_counter!(
        "firehose_classify_errors_total",
        "Total envelopes that could not be classified"
    );
    describe_counter!(
        "firehose_transport_errors_total",
        "Total connect and read failures by stage"
    );
    describe_counter!(
        "firehose_reconnects_total",
        "Total reconnection attempts"
    );

    describe_gauge!(
        "firehose_connected",
        "1 while a Jetstream connection is streaming"
    );

    describe_histogram!(
        "firehose_message_processing_seconds",
        "Time from frame receipt to delivery queue hand-off"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Where a transport error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStage {
    /// During connect or handshake.
    Connect,
    /// While streaming.
    Read,
}

impl TransportStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Read => "read",
        }
    }
}

/// Record a frame received from the wire.
pub fn record_frame_received() {
    counter!("firehose_frames_received_total").increment(1);
}

/// Record an event accepted by the delivery queue.
pub fn record_event_delivered(kind: EventKind) {
    counter!("firehose_events_delivered_total", "kind" => kind.as_str()).increment(1);
}

/// Record an event dropped on a full delivery queue.
pub fn record_event_dropped(kind: EventKind) {
    counter!("firehose_events_dropped_total", "kind" => kind.as_str()).increment(1);
}

/// Record a decode failure.
pub fn record_decode_error() {
    counter!("firehose_decode_errors_total").increment(1);
}

/// Record a classification failure.
pub fn record_classify_error(collection: &str) {
    counter!(
        "firehose_classify_errors_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Record a connect or read failure.
pub fn record_transport_error(stage: TransportStage) {
    counter!("firehose_transport_errors_total", "stage" => stage.as_str()).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("firehose_reconnects_total").increment(1);
}

/// Flag whether a connection is streaming.
pub fn set_connected(connected: bool) {
    gauge!("firehose_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record frame-to-queue processing time.
pub fn record_processing_duration(duration: Duration) {
    histogram!("firehose_message_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_stage_as_str() {
        assert_eq!(TransportStage::Connect.as_str(), "connect");
        assert_eq!(TransportStage::Read.as_str(), "read");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_event_delivered(EventKind::ContentCreated);
        record_event_dropped(EventKind::Unrecognized);
        record_processing_duration(Duration::from_millis(1));
        set_connected(true);
    }
}
