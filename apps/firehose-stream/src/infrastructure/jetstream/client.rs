//! Firehose Client
//!
//! Entry point for callers: validates a [`SubscriptionRequest`], spawns a
//! [`Supervisor`] for it, and hands back an [`EventStream`]. All streams
//! started from one client share its error sink and its root cancellation
//! token, which also governs a credential renewal scheduler started through
//! [`FirehoseClient::start_session_renewal`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use super::classifier::EventClassifier;
use super::endpoint::EndpointPool;
use super::status::StreamStatus;
use super::supervisor::{Supervisor, SupervisorConfig};
use crate::application::ports::{RecordConverter, SessionProvider};
use crate::application::services::{RenewalConfig, RenewalScheduler, SessionStore};
use crate::domain::event::DomainEvent;
use crate::domain::session::{Session, SessionError};
use crate::domain::subscription::{SubscriptionError, SubscriptionRequest};
use crate::infrastructure::atproto::AtprotoConverter;
use crate::infrastructure::delivery::{
    DEFAULT_ERROR_BUFFER_SIZE, ErrorSink, ErrorStream, delivery_queue, error_sink,
};

// =============================================================================
// Configuration
// =============================================================================

/// Client-wide settings shared by every stream it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Candidate endpoints; empty selects the public Jetstream instances.
    pub endpoints: Vec<String>,
    /// Connection supervision settings.
    pub supervisor: SupervisorConfig,
    /// Error sink capacity.
    pub error_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            supervisor: SupervisorConfig::default(),
            error_buffer_size: DEFAULT_ERROR_BUFFER_SIZE,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Starts firehose subscriptions and owns their shared error sink.
pub struct FirehoseClient {
    config: ClientConfig,
    converter: Arc<dyn RecordConverter>,
    errors: ErrorSink,
    error_stream: Mutex<Option<ErrorStream>>,
    cancel: CancellationToken,
}

impl FirehoseClient {
    /// Create a client using `converter` for post records.
    #[must_use]
    pub fn new(config: ClientConfig, converter: Arc<dyn RecordConverter>) -> Self {
        let (errors, error_stream) = error_sink(config.error_buffer_size);
        Self {
            config,
            converter,
            errors,
            error_stream: Mutex::new(Some(error_stream)),
            cancel: CancellationToken::new(),
        }
    }

    /// Client with default settings and the standard record converter.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ClientConfig::default(), Arc::new(AtprotoConverter::default()))
    }

    /// Start streaming events for `request`.
    ///
    /// The returned stream ends when it is dropped, when
    /// [`FirehoseClient::shutdown`] is called, or when
    /// [`EventStream::close`] is called. Must be called from within a Tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns `SubscriptionError` if the request is structurally invalid.
    pub fn stream_events(&self, request: SubscriptionRequest) -> Result<EventStream, SubscriptionError> {
        let subscription = request.into_subscription()?;
        let (queue, rx) = delivery_queue(subscription.buffer_size());
        let status = Arc::new(StreamStatus::new());
        let cancel = self.cancel.child_token();
        let id = Uuid::new_v4();

        info!(
            stream_id = %id,
            collections = subscription.collections().len(),
            authors = subscription.authors().len(),
            buffer = subscription.buffer_size(),
            "Starting firehose stream"
        );

        let supervisor = Supervisor::new(
            subscription,
            self.config.supervisor.clone(),
            EndpointPool::new(self.config.endpoints.clone()),
            EventClassifier::new(Arc::clone(&self.converter)),
            queue,
            self.errors.clone(),
            Arc::clone(&status),
            cancel.clone(),
        );
        tokio::spawn(
            supervisor
                .run()
                .instrument(info_span!("firehose_stream", stream_id = %id)),
        );

        Ok(EventStream {
            id,
            rx,
            status,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        })
    }

    /// Take the error stream. Only the first call returns it.
    ///
    /// Errors are dropped silently when nobody reads them.
    pub fn take_errors(&self) -> Option<ErrorStream> {
        self.error_stream.lock().take()
    }

    /// Handle for reporting into this client's error sink.
    #[must_use]
    pub fn error_sink(&self) -> ErrorSink {
        self.errors.clone()
    }

    /// Install `session` and keep it renewed ahead of expiry.
    ///
    /// Renewal failures are reported on this client's error sink. The
    /// scheduler stops with [`FirehoseClient::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if `session` is already too close to expiry.
    pub fn start_session_renewal(
        &self,
        provider: Arc<dyn SessionProvider>,
        session: Session,
        config: RenewalConfig,
    ) -> Result<Arc<RenewalScheduler>, SessionError> {
        let scheduler = RenewalScheduler::new(
            provider,
            Arc::new(SessionStore::new()),
            self.errors.clone(),
            config,
            self.cancel.child_token(),
        );
        scheduler.start(session)?;
        Ok(scheduler)
    }

    /// Stop every stream and scheduler started from this client.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether [`FirehoseClient::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for FirehoseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirehoseClient")
            .field("config", &self.config)
            .field("shut_down", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Event Stream
// =============================================================================

/// Consumer end of the delivery queue.
///
/// Yields events in receipt order and returns `None` once the stream has
/// stopped. Dropping it stops the supervisor.
#[derive(Debug)]
pub struct EventStream {
    id: Uuid,
    rx: mpsc::Receiver<DomainEvent>,
    status: Arc<StreamStatus>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl EventStream {
    /// Identifier carried by this stream's log span.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Receive the next event.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }

    /// Receive an event if one is queued.
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        self.rx.try_recv().ok()
    }

    /// Live connection status of this stream.
    #[must_use]
    pub fn status(&self) -> Arc<StreamStatus> {
        Arc::clone(&self.status)
    }

    /// Events waiting in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop the stream. Already queued events can still be received.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Stream for EventStream {
    type Item = DomainEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use futures_util::StreamExt;

    use super::*;
    use crate::application::ports::MockSessionProvider;
    use crate::infrastructure::delivery::StreamError;
    use crate::infrastructure::jetstream::status::ConnectionState;

    fn unreachable_client() -> FirehoseClient {
        FirehoseClient::new(
            ClientConfig {
                endpoints: vec!["ws://127.0.0.1:1/subscribe".to_string()],
                ..ClientConfig::default()
            },
            Arc::new(AtprotoConverter::default()),
        )
    }

    #[tokio::test]
    async fn invalid_request_fails_synchronously() {
        let client = unreachable_client();
        let err = client
            .stream_events(SubscriptionRequest::new().with_cursor(-1))
            .unwrap_err();
        assert_eq!(err, SubscriptionError::NegativeCursor(-1));
    }

    #[tokio::test]
    async fn errors_can_be_taken_once() {
        let client = unreachable_client();
        assert!(client.take_errors().is_some());
        assert!(client.take_errors().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_stream() {
        let client = unreachable_client();
        let mut errors = client.take_errors().unwrap();
        let mut stream = client.stream_events(SubscriptionRequest::new()).unwrap();

        assert!(matches!(errors.recv().await, Some(StreamError::Connect { .. })));

        client.shutdown();
        assert!(stream.next().await.is_none());
        assert!(client.is_shut_down());
        assert_eq!(stream.status().state(), ConnectionState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_only_that_stream() {
        let client = unreachable_client();
        let mut first = client.stream_events(SubscriptionRequest::new()).unwrap();
        let second = client.stream_events(SubscriptionRequest::new()).unwrap();

        first.close();
        assert!(first.recv().await.is_none());
        assert!(!client.is_shut_down());
        assert_ne!(first.id(), second.id());
        assert_ne!(second.status().state(), ConnectionState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_is_cancelled_by_shutdown() {
        let client = unreachable_client();
        let mut provider = MockSessionProvider::new();
        provider.expect_refresh().never();

        let session = Session::new(
            "access",
            "refresh",
            "did:plc:abc",
            "alice.test",
            Utc::now() + chrono::Duration::hours(2),
        );
        let scheduler = client
            .start_session_renewal(Arc::new(provider), session, RenewalConfig::default())
            .unwrap();
        assert!(scheduler.is_scheduled());

        client.shutdown();
        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        assert!(scheduler.store().current().is_some());
    }
}
