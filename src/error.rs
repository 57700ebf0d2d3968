//! Error taxonomy for NetCloud operations.
//!
//! Every public operation reports one of these instead of aborting.
//! Inbound data that fails decoding or MAC verification is untrustworthy
//! and surfaces as `Network`, with one exception: a verified negative
//! outcome from the server is `Fail` (or `Unauthorized` for the
//! handshake), because only then can the result byte be believed.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetCloudError {
    /// Transport failure, short transfer, or inbound bytes that cannot be
    /// trusted (malformed packet, unverifiable MAC).
    #[error("network failure: {0}")]
    Network(String),

    /// The server verifiably rejected the login.
    #[error("login rejected by server")]
    Unauthorized,

    /// Operation-level negative outcome: file absent, write refused, or a
    /// result payload that failed authentication.
    #[error("operation failed")]
    Fail,

    /// A file operation was attempted outside of a logged-in session. The
    /// transport is never touched in this case.
    #[error("not connected")]
    NotConnected,

    /// A requested or declared length does not fit the caller's buffer.
    /// Detected before any payload byte is read from the wire.
    #[error("{declared} bytes exceed buffer capacity of {capacity}")]
    Capacity { declared: usize, capacity: usize },

    /// The one-time HMAC known-answer self-test failed.
    #[error("crypto self-test failed")]
    SelfTest,
}

impl From<io::Error> for NetCloudError {
    fn from(e: io::Error) -> Self {
        NetCloudError::Network(e.to_string())
    }
}
