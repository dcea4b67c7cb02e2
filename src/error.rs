//! Error types
//!
//! This module defines the crate-wide error type together with the
//! RST_STREAM status codes of every supported dialect.

use crate::protocol::Dialect;
use std::fmt;

/// Stream identifier (31-bit, reserved bit masked off on the wire)
pub type StreamId = u32;

/// Multiplexing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from the transport driver
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared length inconsistent with the frame type or limits
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Structurally invalid frame or invalid state transition
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Truncated buffer during decode
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Frame addressed to an unknown or destroyed stream
    #[error("Invalid stream: {0}")]
    InvalidStream(StreamId),

    /// Transport closed underneath live streams
    #[error("socket hang up")]
    Hangup,

    /// Header block could not be (de)compressed
    #[error("Compression error: {0}")]
    Compression(String),

    /// First control frame carried a version we do not speak
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Peer reset the stream with a non-cancel status
    #[error("Stream {id} reset by peer: {code}")]
    Reset { id: StreamId, code: RstCode },

    /// Stream was above the peer's GOAWAY watermark
    #[error("Stream refused: {0}")]
    Refused(StreamId),

    /// Window arithmetic overflowed
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Connection was force-destroyed by the idle timer
    #[error("Timeout")]
    Timeout,
}

impl Error {
    /// RST status to send when this error is attributed to a single stream
    pub fn rst_code(&self) -> RstCode {
        match self {
            Error::FrameSize(_) => RstCode::FrameTooLarge,
            Error::InvalidStream(_) => RstCode::InvalidStream,
            Error::Refused(_) => RstCode::RefusedStream,
            Error::FlowControl(_) => RstCode::FlowControlError,
            Error::UnsupportedVersion(_) => RstCode::UnsupportedVersion,
            _ => RstCode::ProtocolError,
        }
    }
}

/// Decode failure with the stream context needed to scope it
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct ParseError {
    /// Stream the failing frame was addressed to, if it could be read
    pub stream_id: Option<StreamId>,
    /// Underlying error
    pub error: Error,
}

impl ParseError {
    /// Error that poisons the whole connection
    pub fn connection(error: Error) -> Self {
        ParseError {
            stream_id: None,
            error,
        }
    }

    /// Error scoped to one stream
    pub fn stream(id: StreamId, error: Error) -> Self {
        ParseError {
            stream_id: Some(id),
            error,
        }
    }

    /// Whether the connection can keep parsing after this error
    pub fn is_stream_scoped(&self) -> bool {
        self.stream_id.is_some()
    }
}

impl From<Error> for ParseError {
    fn from(error: Error) -> Self {
        ParseError::connection(error)
    }
}

/// RST_STREAM status codes, independent of the wire dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RstCode {
    /// Graceful (HTTP/2 NO_ERROR)
    NoError,
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    /// Peer-initiated cancellation, closes silently
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
    CompressionError,
    /// Code not known to this implementation
    Other(u32),
}

impl RstCode {
    /// Numeric status for the given dialect
    pub fn to_wire(self, dialect: Dialect) -> u32 {
        match dialect {
            Dialect::Spdy => match self {
                RstCode::NoError => 0,
                RstCode::ProtocolError => 1,
                RstCode::InvalidStream => 2,
                RstCode::RefusedStream => 3,
                RstCode::UnsupportedVersion => 4,
                RstCode::Cancel => 5,
                RstCode::InternalError => 6,
                RstCode::FlowControlError => 7,
                RstCode::StreamInUse => 8,
                RstCode::StreamAlreadyClosed => 9,
                RstCode::InvalidCredentials => 10,
                RstCode::FrameTooLarge => 11,
                RstCode::CompressionError => 1,
                RstCode::Other(code) => code,
            },
            Dialect::Http2 => match self {
                RstCode::NoError => 0x0,
                RstCode::ProtocolError => 0x1,
                RstCode::InternalError => 0x2,
                RstCode::FlowControlError => 0x3,
                RstCode::InvalidStream | RstCode::StreamAlreadyClosed => 0x5,
                RstCode::FrameTooLarge => 0x6,
                RstCode::RefusedStream => 0x7,
                RstCode::Cancel => 0x8,
                RstCode::CompressionError => 0x9,
                RstCode::UnsupportedVersion
                | RstCode::StreamInUse
                | RstCode::InvalidCredentials => 0x1,
                RstCode::Other(code) => code,
            },
        }
    }

    /// Parse a numeric status received in the given dialect
    pub fn from_wire(dialect: Dialect, code: u32) -> Self {
        match dialect {
            Dialect::Spdy => match code {
                0 => RstCode::NoError,
                1 => RstCode::ProtocolError,
                2 => RstCode::InvalidStream,
                3 => RstCode::RefusedStream,
                4 => RstCode::UnsupportedVersion,
                5 => RstCode::Cancel,
                6 => RstCode::InternalError,
                7 => RstCode::FlowControlError,
                8 => RstCode::StreamInUse,
                9 => RstCode::StreamAlreadyClosed,
                10 => RstCode::InvalidCredentials,
                11 => RstCode::FrameTooLarge,
                other => RstCode::Other(other),
            },
            Dialect::Http2 => match code {
                0x0 => RstCode::NoError,
                0x1 => RstCode::ProtocolError,
                0x2 => RstCode::InternalError,
                0x3 => RstCode::FlowControlError,
                0x5 => RstCode::StreamAlreadyClosed,
                0x6 => RstCode::FrameTooLarge,
                0x7 => RstCode::RefusedStream,
                0x8 => RstCode::Cancel,
                0x9 => RstCode::CompressionError,
                other => RstCode::Other(other),
            },
        }
    }

    /// Get code name
    pub fn name(&self) -> &'static str {
        match self {
            RstCode::NoError => "NO_ERROR",
            RstCode::ProtocolError => "PROTOCOL_ERROR",
            RstCode::InvalidStream => "INVALID_STREAM",
            RstCode::RefusedStream => "REFUSED_STREAM",
            RstCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RstCode::Cancel => "CANCEL",
            RstCode::InternalError => "INTERNAL_ERROR",
            RstCode::FlowControlError => "FLOW_CONTROL_ERROR",
            RstCode::StreamInUse => "STREAM_IN_USE",
            RstCode::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
            RstCode::InvalidCredentials => "INVALID_CREDENTIALS",
            RstCode::FrameTooLarge => "FRAME_TOO_LARGE",
            RstCode::CompressionError => "COMPRESSION_ERROR",
            RstCode::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for RstCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RstCode::Other(code) => write!(f, "UNKNOWN (0x{:x})", code),
            _ => f.write_str(self.name()),
        }
    }
}

/// GOAWAY status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoawayCode {
    Ok,
    ProtocolError,
    InternalError,
}

impl GoawayCode {
    /// Numeric status for the given dialect
    pub fn to_wire(self, dialect: Dialect) -> u32 {
        match (self, dialect) {
            (GoawayCode::Ok, _) => 0,
            (GoawayCode::ProtocolError, _) => 1,
            (GoawayCode::InternalError, Dialect::Spdy) => 11,
            (GoawayCode::InternalError, Dialect::Http2) => 2,
        }
    }
}

/// Result type for multiplexing operations
pub type Result<T> = std::result::Result<T, Error>;
