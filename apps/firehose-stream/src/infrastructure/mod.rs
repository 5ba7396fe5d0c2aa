//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// AT Protocol record conversion and token helpers.
pub mod atproto;

/// Configuration loading.
pub mod config;

/// Delivery queue and background error sink.
pub mod delivery;

/// Health check HTTP endpoint.
pub mod health;

/// Jetstream WebSocket client.
pub mod jetstream;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
