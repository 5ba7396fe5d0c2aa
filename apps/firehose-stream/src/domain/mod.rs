//! Domain Layer - Core firehose types and business rules.
//!
//! This layer contains the typed vocabulary of the pipeline: the generic
//! wire envelope, the closed set of recognized collections, the domain
//! events delivered to consumers, and the subscription and session values
//! that configure a stream. Nothing here performs I/O.

/// Recognized record collections and their wire identifiers.
pub mod collection;

/// Generic decoded wire envelope.
pub mod envelope;

/// Domain events delivered to consumers.
pub mod event;

/// Rich post representation produced by record conversion.
pub mod post;

/// Authenticated session credentials.
pub mod session;

/// Subscription request configuration.
pub mod subscription;
