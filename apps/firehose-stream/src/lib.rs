#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Firehose Stream - Jetstream Event Ingestion
//!
//! Maintains a supervised WebSocket subscription to the Bluesky Jetstream
//! firehose, classifies every wire message into a typed [`DomainEvent`],
//! and hands events to a consumer through a bounded drop-newest queue.
//! Operational failures go to a separate error sink so they never stall
//! event delivery.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Wire envelope, domain events, subscriptions, sessions
//!   - `envelope`: Generic decoded wire message
//!   - `event`: Domain events and their sub-events
//!   - `post`: Rich post model
//!   - `subscription`: Subscription request and cursor
//!   - `session`: Authenticated session
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Record conversion and session refresh interfaces
//!   - `services`: Credential renewal scheduling
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `jetstream`: Codec, classifier, connection supervisor, client
//!   - `delivery`: Delivery queue and error sink
//!   - `atproto`: Record conversion, token helpers and the XRPC session provider
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  +-------------+    +------------+    +----------------+
//! Jetstream WS --->|   Codec     |--->| Classifier |--->| Delivery Queue |---> consumer
//!                  +-------------+    +------------+    +----------------+
//!                         |                 |
//!                         +--------+--------+
//!                                  v
//!                            Error Sink -------------------------------> observer
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::envelope::Envelope;
pub use domain::event::{DomainEvent, EventKind, EventPayload};
pub use domain::post::FeedPost;
pub use domain::session::{Session, SessionError};
pub use domain::subscription::{Cursor, Subscription, SubscriptionError, SubscriptionRequest};

// Ports and services
pub use application::ports::{ConversionError, RecordConverter, SessionProvider};
pub use application::services::{RenewalConfig, RenewalScheduler, SessionStore};

// Client
pub use infrastructure::jetstream::{
    ClientConfig, ConnectionState, EventStream, FirehoseClient, StatusSnapshot, StreamStatus,
};

// Delivery and errors
pub use infrastructure::delivery::{ErrorSink, ErrorStream, StreamError};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FirehoseConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
