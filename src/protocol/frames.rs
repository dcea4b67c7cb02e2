//! Frame types shared by every dialect
//!
//! A decoded [`Frame`] is a transient value: the parser produces it, the
//! connection applies it, and nothing keeps it afterwards.

use super::settings::Settings;
use crate::error::StreamId;
use crate::headers::Headers;
use bytes::Bytes;

/// Frame flags byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Set a flag when `cond` holds
    pub fn with(mut self, flag: u8, cond: bool) -> Self {
        if cond {
            self.0 |= flag;
        }
        self
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// SPDY FLAG_FIN / HTTP/2 END_STREAM (0x1)
    pub const FIN: u8 = 0x1;

    /// HTTP/2 ACK flag (0x1) - SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// SPDY FLAG_UNIDIRECTIONAL (0x2) - pushed SYN_STREAM
    pub const UNIDIRECTIONAL: u8 = 0x2;

    /// SPDY/2 DATA FLAG_COMPRESS (0x2), never accepted
    pub const COMPRESSED: u8 = 0x2;

    /// HTTP/2 END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// HTTP/2 PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// HTTP/2 PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    pub fn is_fin(&self) -> bool {
        self.is_set(Self::FIN)
    }

    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Decoded fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Control frame (always true for non-DATA HTTP/2 frames)
    pub control: bool,
    /// Version field of SPDY control frames, 4 for HTTP/2
    pub version: u16,
    /// Raw type code in the dialect's numbering
    pub frame_type: u16,
    pub flags: FrameFlags,
    /// Declared body length
    pub length: usize,
    /// Stream id (0 for SPDY control frames, whose id lives in the body)
    pub stream_id: StreamId,
}

/// How a HEADERS-carrying frame relates to its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersKind {
    /// Opens a stream (SYN_STREAM)
    Request,
    /// First response headers (SYN_REPLY)
    Reply,
    /// Additional headers; for HTTP/2 the connection resolves the role
    Headers,
}

/// DATA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub fin: bool,
}

/// HTTP/2 priority block (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub stream_dependency: StreamId,
    pub exclusive: bool,
    pub weight: u8,
}

/// Stream-creation, reply or trailer headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub kind: HeadersKind,
    /// Priority bucket, 0 is most urgent
    pub priority: u8,
    /// HTTP/2 dependency information when the PRIORITY flag was set
    pub dependency: Option<PrioritySpec>,
    pub fin: bool,
    /// `:path`, when the block carries one
    pub path: Option<String>,
    pub headers: Headers,
}

/// Push announcement (SPDY SYN_STREAM with associated id, HTTP/2 PUSH_PROMISE)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    /// Parent stream
    pub stream_id: StreamId,
    pub promised_id: StreamId,
    pub priority: u8,
    pub fin: bool,
    pub path: Option<String>,
    pub headers: Headers,
}

/// RST_STREAM frame carrying the raw wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub code: u32,
}

/// SETTINGS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PING frame
///
/// SPDY carries a 4-byte id, HTTP/2 an 8-byte opaque value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingFrame {
    pub opaque: Bytes,
    pub ack: bool,
}

/// GOAWAY frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    pub last_stream_id: StreamId,
    pub code: u32,
    pub debug_data: Bytes,
}

/// WINDOW_UPDATE frame (stream 0 addresses the connection window)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub delta: u32,
}

/// HTTP/2 PRIORITY frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    pub stream_id: StreamId,
    pub priority: PrioritySpec,
}

/// Decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    PushPromise(PushPromiseFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    Noop,
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Priority(PriorityFrame),
    /// Forwarded client address
    XForwarded(String),
    /// Unrecognized type, ignored by the connection
    Unknown(u16),
}

impl Frame {
    /// Stream the frame is addressed to, if any
    pub fn stream_id(&self) -> Option<StreamId> {
        match self {
            Frame::Data(f) => Some(f.stream_id),
            Frame::Headers(f) => Some(f.stream_id),
            Frame::PushPromise(f) => Some(f.promised_id),
            Frame::RstStream(f) => Some(f.stream_id),
            Frame::WindowUpdate(f) if f.stream_id != 0 => Some(f.stream_id),
            Frame::Priority(f) => Some(f.stream_id),
            _ => None,
        }
    }

    /// FIN / END_STREAM flag
    pub fn is_fin(&self) -> bool {
        match self {
            Frame::Data(f) => f.fin,
            Frame::Headers(f) => f.fin,
            Frame::PushPromise(f) => f.fin,
            _ => false,
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data(_) => "DATA",
            Frame::Headers(_) => "HEADERS",
            Frame::PushPromise(_) => "PUSH_PROMISE",
            Frame::RstStream(_) => "RST_STREAM",
            Frame::Settings(_) => "SETTINGS",
            Frame::Noop => "NOOP",
            Frame::Ping(_) => "PING",
            Frame::Goaway(_) => "GOAWAY",
            Frame::WindowUpdate(_) => "WINDOW_UPDATE",
            Frame::Priority(_) => "PRIORITY",
            Frame::XForwarded(_) => "X_FORWARDED",
            Frame::Unknown(_) => "UNKNOWN",
        }
    }
}
