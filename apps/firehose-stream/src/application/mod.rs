//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the pipeline interacts with external collaborators.

/// Port interfaces for external collaborators (record conversion, session API).
pub mod ports;

/// Application services (credential renewal).
pub mod services;
