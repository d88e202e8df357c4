//! Error taxonomy for the ESL protocol engine (spec.md §7).

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong talking to a FreeSWITCH ESL peer.
#[derive(Debug, Error)]
pub enum Error {
    /// Command text contained `\r` or `\n`. Never touches the socket.
    #[error("invalid command (contains CR/LF): {0:?}")]
    InvalidCommand(String),

    /// Framing-layer failure while reading MIME headers.
    #[error("could not read MIME headers: {0}")]
    CouldNotReadMimeHeaders(#[source] std::io::Error),

    /// `Content-Length` header present but not a valid non-negative integer.
    #[error("invalid Content-Length: {0}")]
    InvalidContentLength(#[source] std::num::ParseIntError),

    /// Failed to read the declared `Content-Length` body bytes.
    #[error("could not read body: {0}")]
    CouldNotReadBody(#[source] std::io::Error),

    /// `Content-Type` did not match any class in the closed set (spec.md §3).
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    /// A frame was expected to carry `Content-Type: auth/request` but didn't.
    #[error("expected auth/request content type")]
    UnexpectedAuthHeader,

    /// FreeSWITCH rejected the `auth <password>` exchange.
    #[error("could not authenticate against FreeSWITCH with the provided password")]
    InvalidPassword,

    /// A context deadline elapsed while waiting for a reply or background job.
    #[error("operation timed out")]
    Timeout,

    /// A send or receive raced with connection close.
    #[error("connection closed")]
    ConnClosed,

    /// All response channels have been torn down (receiver loop is shutting down).
    #[error("no response channels (connection is shutting down)")]
    ResponseChannelsClosed,

    /// Declared-but-unsupported path, e.g. XML events.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
