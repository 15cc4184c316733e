//! Error types for the frame codec, connection pipeline, and server configuration.

use thiserror::Error;

/// Faults raised while decoding the fixed frame header or body from a byte stream.
///
/// These are hot-path errors: they are produced per-frame and are never boxed.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    /// The two-byte fixed marker at the start of a frame did not match.
    #[error("fixed header mismatch")]
    FixedHeaderMismatch,

    /// `bodyLength` in the header exceeded the configured maximum.
    #[error("body length {length} exceeds max {max}")]
    BodyLengthExceeded { length: u32, max: u32 },
}

/// Fatal faults that terminate a connection's pipeline.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Underlying socket I/O failed.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame failed to decode.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// No bytes were read from the peer within the idle timeout.
    #[error("read timed out after {0:?} of inactivity")]
    ReadTimeout(std::time::Duration),

    /// The peer closed the connection cleanly.
    #[error("connection closed by peer")]
    Eof,
}

/// Faults raised while constructing a [`crate::server::Server`] or [`crate::client::Client`].
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    /// Neither a body handler nor a frame handler was configured.
    #[error("no handler configured: one of handle()/handle_frame() is required")]
    MissingHandler,

    /// Both a body handler and a frame handler were configured.
    #[error("conflicting handlers: only one of handle()/handle_frame() may be set")]
    ConflictingHandlers,

    /// `processors` was configured as zero.
    #[error("processors must be at least 1")]
    ZeroProcessors,
}
