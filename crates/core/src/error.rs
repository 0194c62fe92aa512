//! Error types for the game server library.

/// Wire-level status code carried in `Status` responses.
pub type StatusCode = i32;

/// Request handled successfully.
pub const STATUS_OK: StatusCode = 0;
/// Unrecoverable server-side fault (including contained panics).
pub const STATUS_INTERNAL_SERVER_ERROR: StatusCode = 1;
/// Malformed, invalid, or unauthenticated request.
pub const STATUS_BAD_REQUEST: StatusCode = 2;
/// Domain codes start at 1000.
pub const STATUS_INVALID_PASSWORD: StatusCode = 1000;

/// Errors that can occur in the game server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Framing**: [`FrameTooLarge`](Self::FrameTooLarge),
///   [`NegativeFrameLength`](Self::NegativeFrameLength) — terminal for the
///   owning connection.
/// - **Codec**: [`Encode`](Self::Encode), [`Decode`](Self::Decode).
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Server**: [`AlreadyStarted`](Self::AlreadyStarted),
///   [`Closed`](Self::Closed), [`ManagerClosed`](Self::ManagerClosed).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame length prefix exceeds the configured maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: i64, max: usize },

    /// Frame length prefix was negative.
    #[error("negative frame length {0}")]
    NegativeFrameLength(i32),

    /// Failed to serialize a message body.
    #[error("message encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to parse a message body.
    #[error("message decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// [`Server::serve`](crate::server::Server::serve) was called twice.
    #[error("server already started")]
    AlreadyStarted,

    /// [`Server::serve`](crate::server::Server::serve) was called after close.
    #[error("server closed")]
    Closed,

    /// The session manager refused a new session after shutdown began.
    #[error("session manager closed")]
    ManagerClosed,

    /// Not every session could be terminated before the drain deadline.
    #[error("terminated {closed} of {total} sessions before the deadline")]
    Drain { closed: usize, total: usize },

    /// Invalid configuration value (bad log level, unbindable endpoint, ...).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to parse the YAML configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// A handler-level failure that surfaces on the wire as a `Status` response.
///
/// Infrastructure errors ([`Error`]) never reach the wire; anything a client
/// sees is a `StatusError` folded into the response message, with the request
/// type discriminator preserved for correlation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StatusError {
    pub code: StatusCode,
    pub message: String,
}

impl StatusError {
    pub fn internal(message: impl Into<String>) -> Self {
        StatusError { code: STATUS_INTERNAL_SERVER_ERROR, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        StatusError { code: STATUS_BAD_REQUEST, message: message.into() }
    }

    pub fn invalid_password() -> Self {
        StatusError { code: STATUS_INVALID_PASSWORD, message: "invalid password".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_codes() {
        assert_eq!(StatusError::bad_request("x").code, STATUS_BAD_REQUEST);
        assert_eq!(StatusError::internal("x").code, STATUS_INTERNAL_SERVER_ERROR);
        let e = StatusError::invalid_password();
        assert_eq!(e.code, 1000);
        assert_eq!(e.to_string(), "invalid password");
    }
}
