//! Configuration Module
//!
//! Environment-driven configuration for the firehose service.

mod settings;

pub use settings::{
    AuthSettings, ConfigError, FirehoseConfig, ServerSettings, StreamSettings, SubscriptionSettings,
};
