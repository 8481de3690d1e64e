//! Defines the custom `Error` and `Result` types for the session server.

use crate::types::ErrorData;

/// The primary error type for the session server.
///
/// Domain handlers return it through [`Result`]; the session transport turns it
/// into a JSON-RPC error object, and the request router turns the
/// transport-level variants into HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O failure, typically while binding or serving the listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON body or payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A handler produced a fully-formed JSON-RPC error that should be
    /// forwarded to the client unchanged.
    #[error("JSON-RPC error (code {}): {}", .0.code, .0.message)]
    JsonRpc(ErrorData),

    /// The arguments supplied to a tool, resource or prompt were rejected.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The session's transport was closed (terminated, evicted or reaped)
    /// before the message could be handled.
    #[error("Session is closed")]
    SessionClosed,

    /// The server configuration is not usable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An unexpected failure while processing a message.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A general-purpose error for miscellaneous issues.
    #[error("An internal error occurred: {0}")]
    Other(String),
}

/// A specialized `Result` type for the session server.
pub type Result<T> = std::result::Result<T, Error>;

impl From<ErrorData> for Error {
    fn from(err: ErrorData) -> Self {
        Error::JsonRpc(err)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
