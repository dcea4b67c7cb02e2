//! Wire protocol dialects
//!
//! Two framing families share one conceptual model:
//!
//! - SPDY (versions 2, 3 and 3.1): 8-byte frame header, control frames
//!   flagged by the high bit, header blocks compressed with a preset
//!   zlib dictionary.
//! - HTTP/2: a connection preface followed by 9-byte frame headers,
//!   header blocks compressed with HPACK.
//!
//! The [`framer::Framer`] encodes logical frames and the
//! [`framer::FrameDecoder`] decodes them; both dispatch to the
//! [`spdy`] or [`http2`] module depending on the negotiated [`Version`].

pub mod compression;
pub mod dictionary;
pub mod framer;
pub mod frames;
pub mod http2;
pub(crate) mod reader;
pub mod settings;
pub mod spdy;

pub use compression::{CompressionPool, HeaderCompressor, HeaderDecompressor, HeaderPair};
pub use framer::{FrameDecoder, Framer, PushHead, RequestHead, ResponseHead};
pub use frames::{Frame, FrameHeader, HeadersKind};
pub use settings::{Settings, SettingsBuilder};

use std::fmt;

/// HTTP/2 connection preface sent by the client
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// SPDY frame header size
pub const SPDY_HEADER_SIZE: usize = 8;

/// HTTP/2 frame header size
pub const HTTP2_HEADER_SIZE: usize = 9;

/// Default SPDY/3 stream window (64 KiB)
pub const DEFAULT_SPDY_WINDOW: u32 = 64 * 1024;

/// Default HTTP/2 stream window (RFC 7540 Section 6.9.2)
pub const DEFAULT_HTTP2_WINDOW: u32 = 65535;

/// Default maximum frame size (RFC 7540 Section 4.2)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Largest SPDY frame body (24-bit length)
pub const MAX_SPDY_FRAME_SIZE: u32 = 0x00ff_ffff;

/// Maximum stream ID (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Connection-level stream ID
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Lowest-precedence priority bucket
pub const MAX_PRIORITY: u8 = 7;

/// Priority assigned when the caller does not choose one
pub const DEFAULT_PRIORITY: u8 = 3;

/// Framing family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Spdy,
    Http2,
}

impl Dialect {
    /// Fixed frame header size
    pub fn header_size(self) -> usize {
        match self {
            Dialect::Spdy => SPDY_HEADER_SIZE,
            Dialect::Http2 => HTTP2_HEADER_SIZE,
        }
    }

    /// Stream window assumed before the peer's SETTINGS arrive
    pub fn default_window(self) -> u32 {
        match self {
            Dialect::Spdy => DEFAULT_SPDY_WINDOW,
            Dialect::Http2 => DEFAULT_HTTP2_WINDOW,
        }
    }
}

/// Negotiated protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Spdy2,
    Spdy3,
    Spdy31,
    Http2,
}

impl Version {
    pub fn dialect(self) -> Dialect {
        match self {
            Version::Http2 => Dialect::Http2,
            _ => Dialect::Spdy,
        }
    }

    /// Version number carried in SPDY control frame headers
    pub fn wire(self) -> u16 {
        match self {
            Version::Spdy2 => 2,
            Version::Spdy3 | Version::Spdy31 => 3,
            Version::Http2 => 4,
        }
    }

    /// Version announced by the first SPDY control frame
    pub fn from_spdy_wire(version: u16) -> Option<Self> {
        match version {
            2 => Some(Version::Spdy2),
            3 => Some(Version::Spdy3),
            _ => None,
        }
    }

    /// Per-stream window-based flow control
    pub fn has_flow_control(self) -> bool {
        !matches!(self, Version::Spdy2)
    }

    /// Connection-level (stream 0) window
    pub fn has_session_window(self) -> bool {
        matches!(self, Version::Spdy31 | Version::Http2)
    }

    /// Number of priority levels the wire can express
    pub fn priority_levels(self) -> u8 {
        match self {
            Version::Spdy2 => 4,
            _ => 8,
        }
    }

    /// Protocol-selection string
    pub fn alpn(self) -> &'static str {
        match self {
            Version::Spdy2 => "spdy/2",
            Version::Spdy3 => "spdy/3",
            Version::Spdy31 => "spdy/3.1",
            Version::Http2 => "h2",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpn())
    }
}

/// Dialect plus version, as told by the out-of-band negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub dialect: Dialect,
    /// `None` until the first SPDY control frame reveals it
    pub version: Option<Version>,
}

impl Protocol {
    /// Known version
    pub fn new(version: Version) -> Self {
        Protocol {
            dialect: version.dialect(),
            version: Some(version),
        }
    }

    /// SPDY with the version learned from the wire
    pub fn spdy_negotiated() -> Self {
        Protocol {
            dialect: Dialect::Spdy,
            version: None,
        }
    }

    /// Map an ALPN/NPN protocol string
    pub fn from_alpn(name: &str) -> Option<Self> {
        let version = match name {
            "h2" | "h2-14" | "h2-16" => Version::Http2,
            "spdy/3.1" => Version::Spdy31,
            "spdy/3" => Version::Spdy3,
            "spdy/2" => Version::Spdy2,
            "spdy" => return Some(Protocol::spdy_negotiated()),
            _ => return None,
        };
        Some(Protocol::new(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preface() {
        assert_eq!(CONNECTION_PREFACE.len(), 24);
        assert_eq!(&CONNECTION_PREFACE[0..3], b"PRI");
    }

    #[test]
    fn test_from_alpn() {
        assert_eq!(Protocol::from_alpn("h2"), Some(Protocol::new(Version::Http2)));
        assert_eq!(
            Protocol::from_alpn("spdy/3.1").and_then(|p| p.version),
            Some(Version::Spdy31)
        );
        assert_eq!(Protocol::from_alpn("spdy").map(|p| p.version), Some(None));
        assert_eq!(Protocol::from_alpn("http/1.1"), None);
    }

    #[test]
    fn test_version_capabilities() {
        assert!(!Version::Spdy2.has_flow_control());
        assert!(Version::Spdy3.has_flow_control());
        assert!(!Version::Spdy3.has_session_window());
        assert!(Version::Spdy31.has_session_window());
        assert_eq!(Version::Spdy31.wire(), 3);
        assert_eq!(Version::from_spdy_wire(3), Some(Version::Spdy3));
        assert_eq!(Version::from_spdy_wire(4), None);
        assert_eq!(Version::Spdy2.priority_levels(), 4);
    }
}
