//! Bounded Delivery Channels
//!
//! Two independent bounded queues sit between the supervisor's read loop
//! and the outside world:
//!
//! - The **delivery queue** carries classified [`DomainEvent`]s to the
//!   stream's consumer in receipt order.
//! - The **error sink** carries [`StreamError`]s for observability only;
//!   nothing reads it back into the supervisor.
//!
//! # Overflow Policy
//!
//! Both queues drop the *newest* item when full. An offer never waits, so a
//! slow or absent consumer can never stall the network read loop, and the
//! queue length never exceeds its capacity. Items already queued are kept;
//! the item being offered is discarded and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::event::DomainEvent;
use crate::domain::session::SessionError;
use crate::infrastructure::jetstream::classifier::ClassifyError;
use crate::infrastructure::jetstream::codec::DecodeError;
use crate::infrastructure::jetstream::supervisor::TransportError;

// =============================================================================
// Stream Errors
// =============================================================================

/// An operational failure reported on the error sink.
///
/// Variants distinguish where in the pipeline the failure happened so a
/// consumer can tell "could not connect" from "disconnected mid-stream"
/// from "could not decode a message".
#[derive(Debug, Error)]
pub enum StreamError {
    /// A connection attempt failed before streaming started.
    #[error("could not connect to {endpoint} (attempt {attempt}): {source}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Consecutive failed attempts including this one.
        attempt: u32,
        /// Transport failure.
        source: TransportError,
    },

    /// An established connection was lost.
    #[error("disconnected from {endpoint}: {source}")]
    Disconnected {
        /// Endpoint that was streaming.
        endpoint: String,
        /// Transport failure.
        source: TransportError,
    },

    /// A wire message was not a well-formed envelope.
    #[error("could not decode message: {0}")]
    Decode(#[from] DecodeError),

    /// A well-formed envelope could not be classified.
    #[error("could not classify {kind} event from {did}: {source}")]
    Classify {
        /// Originating identity.
        did: String,
        /// Top-level kind, with collection for commits.
        kind: String,
        /// Classification failure.
        source: ClassifyError,
    },

    /// Scheduled or manual credential renewal failed.
    #[error("session renewal failed: {0}")]
    Renewal(#[from] SessionError),
}

impl StreamError {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnected { .. } => "disconnected",
            Self::Decode(_) => "decode",
            Self::Classify { .. } => "classify",
            Self::Renewal(_) => "renewal",
        }
    }
}

// =============================================================================
// Drop-newest Sender
// =============================================================================

/// Outcome of offering an item to a bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The item was queued.
    Accepted,
    /// The queue was full; the item was discarded.
    Dropped,
    /// The receiving side is gone; the item was discarded.
    Closed,
}

/// Non-blocking sender with a drop-newest-on-full policy.
#[derive(Debug)]
pub struct DropNewestSender<T> {
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for DropNewestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> DropNewestSender<T> {
    /// Offer an item without waiting.
    pub fn offer(&self, item: T) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Items discarded because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a bounded drop-newest queue. Capacity is clamped to at least one.
#[must_use]
pub fn bounded<T>(capacity: usize) -> (DropNewestSender<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        DropNewestSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

// =============================================================================
// Delivery Queue
// =============================================================================

/// Producer side of a stream's delivery queue, owned by the read loop.
pub type DeliveryQueue = DropNewestSender<DomainEvent>;

/// Create a delivery queue and its receiving end.
#[must_use]
pub fn delivery_queue(capacity: usize) -> (DeliveryQueue, mpsc::Receiver<DomainEvent>) {
    bounded(capacity)
}

// =============================================================================
// Error Sink
// =============================================================================

/// Default capacity of the error sink.
pub const DEFAULT_ERROR_BUFFER_SIZE: usize = 100;

/// Producer side of the background error queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: DropNewestSender<StreamError>,
}

impl ErrorSink {
    /// Report an error without waiting. Dropped if the sink is full or unread.
    pub fn report(&self, error: StreamError) {
        let category = error.category();
        match self.tx.offer(error) {
            Offer::Accepted | Offer::Closed => {}
            Offer::Dropped => {
                tracing::debug!(category, "Error sink full, dropping error");
            }
        }
    }

    /// Errors discarded because the sink was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.tx.dropped()
    }
}

/// Receiving side of the error sink.
///
/// The stream ends only once every [`ErrorSink`] clone has been dropped.
#[derive(Debug)]
pub struct ErrorStream {
    rx: mpsc::Receiver<StreamError>,
}

impl ErrorStream {
    /// Wait for the next reported error.
    pub async fn recv(&mut self) -> Option<StreamError> {
        self.rx.recv().await
    }

    /// Take a reported error if one is queued.
    pub fn try_recv(&mut self) -> Option<StreamError> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a `futures::Stream`.
    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<StreamError> {
        ReceiverStream::new(self.rx)
    }
}

/// Create an error sink and its receiving end.
#[must_use]
pub fn error_sink(capacity: usize) -> (ErrorSink, ErrorStream) {
    let (tx, rx) = bounded(capacity);
    (ErrorSink { tx }, ErrorStream { rx })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn offer_accepts_until_full_then_drops_newest() {
        let (tx, mut rx) = bounded::<u32>(2);

        assert_eq!(tx.offer(1), Offer::Accepted);
        assert_eq!(tx.offer(2), Offer::Accepted);
        assert_eq!(tx.offer(3), Offer::Dropped);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.len(), 2);

        // Oldest items survive, the newest was discarded.
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn offer_reports_closed_receiver() {
        let (tx, rx) = bounded::<u32>(2);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.offer(1), Offer::Closed);
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn zero_capacity_clamped() {
        let (tx, _rx) = bounded::<u32>(0);
        assert_eq!(tx.capacity(), 1);
    }

    #[test]
    fn error_sink_survives_missing_reader() {
        let (sink, stream) = error_sink(1);
        drop(stream);
        sink.report(StreamError::Renewal(SessionError::NoSession));
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn error_sink_drops_when_full() {
        let (sink, mut stream) = error_sink(1);
        sink.report(StreamError::Renewal(SessionError::NoSession));
        sink.report(StreamError::Renewal(SessionError::Timeout(
            std::time::Duration::from_secs(1),
        )));
        assert_eq!(sink.dropped(), 1);

        let first = stream.try_recv().unwrap();
        assert!(matches!(first, StreamError::Renewal(SessionError::NoSession)));
        assert!(stream.try_recv().is_none());
    }

    proptest! {
        #[test]
        fn queue_never_exceeds_capacity(capacity in 1usize..64, offers in 0usize..256) {
            let (tx, _rx) = bounded::<usize>(capacity);
            for i in 0..offers {
                let _ = tx.offer(i);
                prop_assert!(tx.len() <= capacity);
            }
            let accepted = offers.min(capacity);
            prop_assert_eq!(tx.len(), accepted);
            prop_assert_eq!(tx.dropped(), (offers - accepted) as u64);
        }
    }
}
