//! AT Protocol Adapters
//!
//! Lexicon record shapes for the `app.bsky.*` collections the classifier
//! understands, the post converter behind the `RecordConverter` port, and
//! the XRPC session provider behind the `SessionProvider` port.

pub mod convert;
pub(crate) mod records;
pub mod token;
pub mod xrpc;

pub use convert::{AtprotoConverter, DEFAULT_BLOB_HOST};
pub use token::{session_from_tokens, token_expiry};
pub use xrpc::{DEFAULT_SERVICE, XrpcSessionProvider};
