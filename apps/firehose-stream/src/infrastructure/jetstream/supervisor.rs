//! Connection Supervisor
//!
//! Owns one logical subscription for its whole life:
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Disconnected -> Backoff -> Connecting ...
//!            |                                         |
//!            +-------------- cancel -------------------+--> Cancelled
//! ```
//!
//! Each attempt picks an endpoint, builds the target URL (resuming from the
//! newest event seen so far), and runs the read loop until the connection
//! fails. Failures are reported on the error sink and followed by an
//! exponential backoff wait; the supervisor never gives up on its own.
//! Cancellation is checked before connecting, during the handshake, inside
//! the read loop, and during backoff.
//!
//! Per frame the read loop decodes, classifies and offers the event to the
//! delivery queue without ever waiting on the consumer. Decode and
//! classification failures are reported and skipped. The connection stays up.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classifier::EventClassifier;
use super::codec::JsonCodec;
use super::endpoint::{EndpointPool, connection_target, options_update};
use super::heartbeat::{ActivityClock, Heartbeat, HeartbeatConfig, HeartbeatEvent};
use super::reconnect::{Backoff, BackoffConfig};
use super::status::{ConnectionState, StreamStatus};
use crate::domain::envelope::Envelope;
use crate::domain::subscription::{Cursor, Subscription};
use crate::infrastructure::delivery::{DeliveryQueue, ErrorSink, Offer, StreamError};
use crate::infrastructure::metrics::{self, TransportStage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Connect, handshake, read and keepalive failures. Always retried.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connect plus upgrade did not finish in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Nothing was received within the read deadline.
    #[error("no frames received for {0:?}")]
    ReadTimeout(Duration),

    /// The server sent a close frame.
    #[error("server closed the connection (code {code:?}): {reason}")]
    Closed {
        /// Close code, if one was sent.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },

    /// The stream ended without a close frame.
    #[error("connection ended unexpectedly")]
    StreamEnded,
}

impl TransportError {
    fn from_close(frame: Option<&CloseFrame>) -> Self {
        frame.map_or(
            Self::Closed {
                code: None,
                reason: String::new(),
            },
            |frame| Self::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.to_string(),
            },
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Reconnection backoff.
    pub backoff: BackoffConfig,
    /// Keepalive and read deadline.
    pub heartbeat: HeartbeatConfig,
    /// Bound on connect plus WebSocket upgrade.
    pub handshake_timeout: Duration,
    /// Bound on the best-effort close handshake.
    pub close_timeout: Duration,
    /// Reconnect with the newest seen time marker as the cursor.
    pub resume_from_last_event: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
            resume_from_last_event: true,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// How one connection ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    ConsumerGone,
    Failed(TransportError),
}

/// Outcome of handing one frame to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    ConsumerGone,
}

/// Long-lived task driving one subscription.
pub struct Supervisor {
    subscription: Subscription,
    config: SupervisorConfig,
    endpoints: EndpointPool,
    codec: JsonCodec,
    classifier: EventClassifier,
    queue: DeliveryQueue,
    errors: ErrorSink,
    status: Arc<StreamStatus>,
    cancel: CancellationToken,
}

impl Supervisor {
    /// Assemble a supervisor. Nothing connects until [`Supervisor::run`].
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        subscription: Subscription,
        config: SupervisorConfig,
        endpoints: EndpointPool,
        classifier: EventClassifier,
        queue: DeliveryQueue,
        errors: ErrorSink,
        status: Arc<StreamStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            config,
            endpoints,
            codec: JsonCodec::new(),
            classifier,
            queue,
            errors,
            status,
            cancel,
        }
    }

    /// Connect, stream and reconnect until cancelled or the consumer goes away.
    ///
    /// The delivery queue closes when this returns.
    pub async fn run(self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let endpoint = self.endpoints.pick().to_string();
            let cursor = self.resume_cursor();
            let target = connection_target(&endpoint, &self.subscription, cursor);

            self.status.mark_connecting(&endpoint);
            info!(
                endpoint = %endpoint,
                cursor = ?cursor.map(Cursor::as_micros),
                "Connecting to Jetstream"
            );

            let failure = match self.connect(&target).await {
                Ok(None) => break,
                Err(error) => {
                    let attempt = backoff.failures().saturating_add(1);
                    warn!(endpoint = %endpoint, attempt, error = %error, "Jetstream connection failed");
                    metrics::record_transport_error(TransportStage::Connect);
                    let message = error.to_string();
                    self.errors.report(StreamError::Connect {
                        endpoint: endpoint.clone(),
                        attempt,
                        source: error,
                    });
                    message
                }
                Ok(Some(ws)) => {
                    backoff.reset();
                    self.status.mark_connected();
                    metrics::set_connected(true);
                    info!(endpoint = %endpoint, "Connected to Jetstream");

                    let end = self.stream(ws).await;
                    metrics::set_connected(false);

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::ConsumerGone => {
                            info!("Event consumer dropped, stopping stream");
                            break;
                        }
                        SessionEnd::Failed(error) => {
                            warn!(endpoint = %endpoint, error = %error, "Jetstream connection lost");
                            metrics::record_transport_error(TransportStage::Read);
                            let message = error.to_string();
                            self.errors.report(StreamError::Disconnected {
                                endpoint: endpoint.clone(),
                                source: error,
                            });
                            message
                        }
                    }
                }
            };

            self.status.mark_disconnected(failure);

            let Some(delay) = backoff.next_delay() else {
                warn!(attempts = backoff.failures(), "Reconnect attempts exhausted");
                break;
            };
            let attempt = backoff.failures();
            self.status.mark_backoff(attempt, delay);
            metrics::record_reconnect();
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to Jetstream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.status.set_state(ConnectionState::Cancelled);
        info!(
            delivered = self.status.events_delivered(),
            dropped = self.status.events_dropped(),
            "Jetstream supervisor stopped"
        );
    }

    fn resume_cursor(&self) -> Option<Cursor> {
        if self.config.resume_from_last_event {
            self.status.last_cursor()
        } else {
            None
        }
    }

    /// Dial and upgrade. `Ok(None)` means cancelled.
    async fn connect(&self, target: &str) -> Result<Option<WsStream>, TransportError> {
        let timeout = self.config.handshake_timeout;

        tokio::select! {
            () = self.cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(target)) => {
                let (ws, _response) = result.map_err(|_| TransportError::HandshakeTimeout(timeout))??;
                Ok(Some(ws))
            }
        }
    }

    /// Run the read loop on one live connection.
    async fn stream(&self, ws: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws.split();

        if self.subscription.require_hello() {
            let hello = options_update(&self.subscription).to_string();
            if let Err(end) = send_or_cancel(&mut write, Message::Text(hello.into()), &self.cancel).await {
                return end;
            }
        }

        let clock = Arc::new(ActivityClock::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            Heartbeat::new(
                self.config.heartbeat,
                Arc::clone(&clock),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );
        let mut heartbeat_alive = true;

        let end = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break SessionEnd::Cancelled,
                event = heartbeat_rx.recv(), if heartbeat_alive => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        if let Err(end) = send_or_cancel(&mut write, Message::Ping(Vec::new().into()), &self.cancel).await {
                            break end;
                        }
                    }
                    Some(HeartbeatEvent::Timeout { .. }) => {
                        break SessionEnd::Failed(TransportError::ReadTimeout(
                            self.config.heartbeat.read_timeout,
                        ));
                    }
                    None => heartbeat_alive = false,
                },
                frame = read.next() => {
                    let message = match frame {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => break SessionEnd::Failed(e.into()),
                        None => break SessionEnd::Failed(TransportError::StreamEnded),
                    };
                    clock.touch();

                    let flow = match message {
                        Message::Text(text) => self.handle_frame(text.as_bytes()),
                        Message::Binary(bytes) => self.handle_frame(&bytes),
                        Message::Ping(data) => {
                            if let Err(end) = send_or_cancel(&mut write, Message::Pong(data), &self.cancel).await {
                                break end;
                            }
                            Flow::Continue
                        }
                        Message::Close(frame) => {
                            info!(frame = ?frame, "Server sent close frame");
                            break SessionEnd::Failed(TransportError::from_close(frame.as_ref()));
                        }
                        Message::Pong(_) | Message::Frame(_) => Flow::Continue,
                    };

                    if flow == Flow::ConsumerGone {
                        break SessionEnd::ConsumerGone;
                    }
                }
            }
        };

        // Best effort; the socket is dropped either way.
        if let Ok(Err(e)) = tokio::time::timeout(self.config.close_timeout, write.close()).await {
            debug!(error = %e, "Close handshake failed");
        }

        end
    }

    /// Decode, classify and enqueue one frame.
    fn handle_frame(&self, frame: &[u8]) -> Flow {
        let started = Instant::now();
        self.status.record_frame();
        metrics::record_frame_received();

        let envelope = match self.codec.decode(frame) {
            Ok(envelope) => Arc::new(envelope),
            Err(error) => {
                debug!(error = %error, len = frame.len(), "Dropping undecodable frame");
                self.status.record_decode_error();
                metrics::record_decode_error();
                self.errors.report(StreamError::Decode(error));
                return Flow::Continue;
            }
        };
        let cursor = envelope.time_us;

        let event = match self.classifier.classify_shared(Arc::clone(&envelope)) {
            Ok(event) => event,
            Err(error) => {
                let kind = describe(&envelope);
                debug!(did = %envelope.did, kind = %kind, error = %error, "Dropping unclassifiable event");
                self.status.record_classify_error(cursor);
                metrics::record_classify_error(&kind);
                self.errors.report(StreamError::Classify {
                    did: envelope.did.clone(),
                    kind,
                    source: error,
                });
                return Flow::Continue;
            }
        };

        let kind = event.kind();
        let flow = match self.queue.offer(event) {
            Offer::Accepted => {
                self.status.record_delivered(cursor);
                metrics::record_event_delivered(kind);
                Flow::Continue
            }
            Offer::Dropped => {
                debug!(kind = %kind, cursor, "Delivery queue full, dropping event");
                self.status.record_dropped(cursor);
                metrics::record_event_dropped(kind);
                Flow::Continue
            }
            Offer::Closed => Flow::ConsumerGone,
        };

        metrics::record_processing_duration(started.elapsed());
        flow
    }
}

/// Write one frame, giving up as soon as `cancel` fires.
async fn send_or_cancel<S>(
    write: &mut S,
    message: Message,
    cancel: &CancellationToken,
) -> Result<(), SessionEnd>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    tokio::select! {
        () = cancel.cancelled() => Err(SessionEnd::Cancelled),
        result = write.send(message) => result.map_err(|e| SessionEnd::Failed(e.into())),
    }
}

/// `kind` or `kind/collection` label for error context.
fn describe(envelope: &Envelope) -> String {
    envelope.commit.as_ref().map_or_else(
        || envelope.kind.clone(),
        |commit| format!("{}/{}", envelope.kind, commit.collection),
    )
}
