//! Error types for the streaming client core.

use std::fmt;
use std::net::SocketAddr;

/// Errors that can occur in the streaming client core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Data plane**: [`MalformedPacket`](Self::MalformedPacket),
///   [`MissingFragment`](Self::MissingFragment). Fatal to one packet or one
///   reassembly, never to the receive loop.
/// - **Frame source**: [`CorruptFrameLength`](Self::CorruptFrameLength),
///   [`FrameTooLarge`](Self::FrameTooLarge). The damaged frame is skipped.
/// - **Control plane**: [`UnparsableReply`](Self::UnparsableReply). The reply
///   is dropped without a state change.
/// - **Channel setup**: [`Bind`](Self::Bind), [`Connect`](Self::Connect).
///   Surfaced to the caller; nothing here retries.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram too short for its fixed header or its flagged fragmentation header.
    #[error("malformed packet ({len} bytes): {reason}")]
    MalformedPacket { len: usize, reason: &'static str },

    /// A header field is out of range for its bit width.
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u32 },

    /// Length prefix in a length-prefixed frame stream was not a sane length.
    #[error("corrupt frame length prefix: {0:?}")]
    CorruptFrameLength(String),

    /// Marker-delimited frame exceeded the scan cap before an end marker was seen.
    #[error("frame too large: scanned {scanned} bytes without an end-of-image marker")]
    FrameTooLarge { scanned: usize },

    /// A fragment index was absent when concatenating a reassembly group.
    #[error("fragment group {group} is missing index {index}")]
    MissingFragment { group: u16, index: u8 },

    /// Control-channel reply could not be parsed.
    #[error("unparsable reply: {kind}")]
    UnparsableReply { kind: ParseErrorKind },

    /// Control-channel request could not be parsed.
    #[error("unparsable request: {kind}")]
    UnparsableRequest { kind: ParseErrorKind },

    /// Could not bind the data-channel receive socket.
    #[error("failed to bind RTP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Could not connect the control channel.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The control channel has already been closed.
    #[error("control channel not connected")]
    NotConnected,
}

/// Specific kind of control-message parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty.
    EmptyMessage,
    /// Request line did not have the `METHOD resource RTSP/1.0` shape.
    InvalidRequestLine,
    /// Method is not one of SETUP, PLAY, PAUSE, TEARDOWN.
    UnknownMethod,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// Status line had no integer status code in token 1.
    InvalidStatusLine,
    /// No CSeq header and no positional line 1.
    MissingCSeq,
    /// CSeq value was not an integer.
    InvalidCSeq,
    /// Session value was present but not an integer.
    InvalidSession,
    /// A successful SETUP reply carried no session id.
    MissingSession,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::MissingCSeq => write!(f, "missing CSeq"),
            Self::InvalidCSeq => write!(f, "non-integer CSeq"),
            Self::InvalidSession => write!(f, "non-integer Session"),
            Self::MissingSession => write!(f, "SETUP reply without Session"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
