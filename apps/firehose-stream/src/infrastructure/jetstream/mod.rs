//! Jetstream Client
//!
//! WebSocket client for the Bluesky Jetstream firehose.
//!
//! - `codec`: frame to [`Envelope`](crate::domain::envelope::Envelope)
//! - `classifier`: envelope to [`DomainEvent`](crate::domain::event::DomainEvent)
//! - `endpoint`: endpoint selection and connection URL
//! - `reconnect`: exponential backoff
//! - `heartbeat`: keepalive pings and read deadline
//! - `status`: observable connection state
//! - `supervisor`: connect, read, reconnect loop
//! - `client`: public entry point

pub mod classifier;
pub mod client;
pub mod codec;
pub mod endpoint;
pub mod heartbeat;
pub mod reconnect;
pub mod status;
pub mod supervisor;

pub use classifier::{ClassifyError, EventClassifier};
pub use client::{ClientConfig, EventStream, FirehoseClient};
pub use codec::{DecodeError, JsonCodec};
pub use endpoint::{DEFAULT_ENDPOINTS, EndpointPool};
pub use heartbeat::HeartbeatConfig;
pub use reconnect::{Backoff, BackoffConfig};
pub use status::{ConnectionState, StatusSnapshot, StreamStatus};
pub use supervisor::{Supervisor, SupervisorConfig, TransportError};
