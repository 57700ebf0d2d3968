//! NetCloud: an authenticated client/server remote file storage protocol.
//!
//! Binary packets over TCP. A challenge-response handshake derives a
//! per-session HMAC-SHA256 key which signs every message after the
//! bootstrap; the server stores files in a per-(user, application)
//! sandbox.

pub mod auth;
pub mod cli;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod secrets;
pub mod server;
pub mod session;
pub mod storage;
pub mod transport;

pub use error::NetCloudError;
