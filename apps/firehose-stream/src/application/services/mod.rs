//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `RenewalScheduler`: Keeps the shared session fresh ahead of expiry

pub mod renewal;

pub use renewal::{RenewalConfig, RenewalScheduler, SessionStore};
