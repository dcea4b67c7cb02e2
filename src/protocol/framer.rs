//! Dialect-neutral frame construction and decoding
//!
//! [`Framer`] owns the outbound header compressor and turns logical
//! operations (open a stream, reply, push, send data) into wire bytes for
//! the negotiated version. [`FrameDecoder`] owns the inbound decompressor
//! and turns frame bodies back into [`Frame`] values.

use super::compression::{HeaderCompressor, HeaderDecompressor};
use super::frames::{Frame, FrameFlags, FrameHeader, PrioritySpec};
use super::http2::{self, Http2Decoder};
use super::settings::Settings;
use super::{spdy, Dialect, Version, DEFAULT_MAX_FRAME_SIZE, MAX_SPDY_FRAME_SIZE};
use crate::error::{ParseError, Result, RstCode, StreamId};
use crate::headers::Headers;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::trace;

/// Memoized control frames kept per framer
const CACHE_CAPACITY: usize = 64;

/// Stream-opening request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub id: StreamId,
    pub priority: u8,
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    /// Defaults to `https`
    pub scheme: Option<String>,
    pub headers: Headers,
    /// No body follows
    pub fin: bool,
}

/// Response headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub id: StreamId,
    pub status: u16,
    /// SPDY reason phrase; the standard phrase when absent
    pub reason: Option<String>,
    pub headers: Headers,
    pub fin: bool,
}

/// Server push announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushHead {
    /// Promised stream
    pub id: StreamId,
    /// Stream the push is associated with
    pub parent: StreamId,
    pub priority: u8,
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub scheme: Option<String>,
    pub status: u16,
    pub headers: Headers,
}

/// Standard reason phrase for a status code
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Settings(Settings),
    Rst { id: StreamId, code: RstCode },
}

/// Outbound frame builder for one connection
pub struct Framer {
    version: Version,
    compressor: Box<dyn HeaderCompressor>,
    /// Peer's SETTINGS_MAX_FRAME_SIZE (HTTP/2 only)
    max_frame_size: usize,
    cache: HashMap<CacheKey, Bytes>,
}

impl std::fmt::Debug for Framer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framer")
            .field("version", &self.version)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

impl Framer {
    pub fn new(version: Version, compressor: Box<dyn HeaderCompressor>) -> Self {
        let max_frame_size = match version.dialect() {
            Dialect::Spdy => MAX_SPDY_FRAME_SIZE as usize,
            Dialect::Http2 => DEFAULT_MAX_FRAME_SIZE as usize,
        };
        Framer {
            version,
            compressor,
            max_frame_size,
            cache: HashMap::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Switch SPDY/3 to SPDY/3.1 once the peer uses the session window
    pub fn upgrade(&mut self, version: Version) {
        if self.version.dialect() == version.dialect() {
            self.version = version;
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, size: usize) {
        if self.version.dialect() == Dialect::Http2 {
            self.max_frame_size = size;
        }
    }

    /// Hand the compressor back for pooling
    pub fn into_compressor(self) -> Box<dyn HeaderCompressor> {
        self.compressor
    }

    fn cached(&mut self, key: CacheKey, build: impl FnOnce(Version) -> Bytes) -> Bytes {
        if let Some(frame) = self.cache.get(&key) {
            return frame.clone();
        }
        if self.cache.len() >= CACHE_CAPACITY {
            self.cache.clear();
        }
        let frame = build(self.version);
        self.cache.insert(key, frame.clone());
        frame
    }

    fn request_pairs(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
        scheme: Option<&str>,
        status: Option<u16>,
        headers: &Headers,
    ) -> Vec<(String, String)> {
        let scheme = scheme.unwrap_or("https");
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(headers.len() + 6);
        let mut push = |name: &str, value: &str| pairs.push((name.to_string(), value.to_string()));

        match self.version {
            Version::Spdy2 => {
                push("method", method);
                push("url", path);
                push("version", "HTTP/1.1");
                if let Some(host) = host {
                    push("host", host);
                }
                push("scheme", scheme);
                if let Some(status) = status {
                    push("status", &spdy_status(status, None));
                }
            }
            Version::Spdy3 | Version::Spdy31 => {
                push(":method", method);
                push(":path", path);
                push(":version", "HTTP/1.1");
                if let Some(host) = host {
                    push(":host", host);
                }
                push(":scheme", scheme);
                if let Some(status) = status {
                    push(":status", &spdy_status(status, None));
                }
            }
            Version::Http2 => {
                push(":method", method);
                push(":path", path);
                push(":scheme", scheme);
                if let Some(host) = host {
                    push(":authority", host);
                }
            }
        }

        pairs.extend(headers.to_block_pairs());
        pairs
    }

    fn response_pairs(&self, status: u16, reason: Option<&str>, headers: &Headers) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(headers.len() + 2);
        match self.version {
            Version::Spdy2 => {
                pairs.push(("status".into(), spdy_status(status, reason)));
                pairs.push(("version".into(), "HTTP/1.1".into()));
            }
            Version::Spdy3 | Version::Spdy31 => {
                pairs.push((":status".into(), spdy_status(status, reason)));
                pairs.push((":version".into(), "HTTP/1.1".into()));
            }
            Version::Http2 => pairs.push((":status".into(), status.to_string())),
        }
        pairs.extend(headers.to_block_pairs());
        pairs
    }

    /// Stream-opening frame (SYN_STREAM or HEADERS)
    pub fn request_frame(&mut self, head: &RequestHead) -> Result<Bytes> {
        let pairs = self.request_pairs(
            &head.method,
            &head.path,
            head.host.as_deref(),
            head.scheme.as_deref(),
            None,
            &head.headers,
        );
        trace!(id = head.id, method = %head.method, path = %head.path, "request frame");

        match self.version.dialect() {
            Dialect::Spdy => {
                let flags = FrameFlags::empty().with(FrameFlags::FIN, head.fin).as_u8();
                spdy::syn_stream(
                    self.version,
                    self.compressor.as_mut(),
                    head.id,
                    0,
                    head.priority,
                    flags,
                    &pairs,
                )
            }
            Dialect::Http2 => {
                let priority = PrioritySpec {
                    stream_dependency: 0,
                    exclusive: false,
                    weight: http2::priority_to_weight(head.priority),
                };
                http2::headers(
                    self.compressor.as_mut(),
                    head.id,
                    &pairs,
                    head.fin,
                    Some(priority),
                    self.max_frame_size,
                )
            }
        }
    }

    /// Response frame (SYN_REPLY or HEADERS)
    pub fn response_frame(&mut self, head: &ResponseHead) -> Result<Bytes> {
        let pairs = self.response_pairs(head.status, head.reason.as_deref(), &head.headers);
        trace!(id = head.id, status = head.status, "response frame");

        match self.version.dialect() {
            Dialect::Spdy => {
                let flags = FrameFlags::empty().with(FrameFlags::FIN, head.fin).as_u8();
                spdy::syn_reply(self.version, self.compressor.as_mut(), head.id, flags, &pairs)
            }
            Dialect::Http2 => http2::headers(
                self.compressor.as_mut(),
                head.id,
                &pairs,
                head.fin,
                None,
                self.max_frame_size,
            ),
        }
    }

    /// Frames announcing a push
    ///
    /// SPDY sends one unidirectional SYN_STREAM associated with the
    /// parent. HTTP/2 sends PUSH_PROMISE on the parent followed by the
    /// response HEADERS on the promised stream.
    pub fn push_frame(&mut self, head: &PushHead) -> Result<Vec<Bytes>> {
        trace!(id = head.id, parent = head.parent, path = %head.path, "push frame");

        match self.version.dialect() {
            Dialect::Spdy => {
                let pairs = self.request_pairs(
                    &head.method,
                    &head.path,
                    head.host.as_deref(),
                    head.scheme.as_deref(),
                    Some(head.status),
                    &head.headers,
                );
                let frame = spdy::syn_stream(
                    self.version,
                    self.compressor.as_mut(),
                    head.id,
                    head.parent,
                    head.priority,
                    FrameFlags::UNIDIRECTIONAL,
                    &pairs,
                )?;
                Ok(vec![frame])
            }
            Dialect::Http2 => {
                let request = self.request_pairs(
                    &head.method,
                    &head.path,
                    head.host.as_deref(),
                    head.scheme.as_deref(),
                    None,
                    &Headers::new(),
                );
                let promise = http2::push_promise(
                    self.compressor.as_mut(),
                    head.parent,
                    head.id,
                    &request,
                    self.max_frame_size,
                )?;
                let response = self.response_pairs(head.status, None, &head.headers);
                let headers = http2::headers(
                    self.compressor.as_mut(),
                    head.id,
                    &response,
                    false,
                    None,
                    self.max_frame_size,
                )?;
                Ok(vec![promise, headers])
            }
        }
    }

    /// Additional headers or trailers
    pub fn headers_frame(&mut self, id: StreamId, headers: &Headers, fin: bool) -> Result<Bytes> {
        let pairs = headers.to_block_pairs();
        match self.version.dialect() {
            Dialect::Spdy => {
                let flags = FrameFlags::empty().with(FrameFlags::FIN, fin).as_u8();
                spdy::headers(self.version, self.compressor.as_mut(), id, flags, &pairs)
            }
            Dialect::Http2 => http2::headers(
                self.compressor.as_mut(),
                id,
                &pairs,
                fin,
                None,
                self.max_frame_size,
            ),
        }
    }

    /// DATA frame; callers keep `data` within [`Framer::max_frame_size`]
    pub fn data_frame(&self, id: StreamId, data: &[u8], fin: bool) -> Result<Bytes> {
        match self.version.dialect() {
            Dialect::Spdy => spdy::data(id, data, fin),
            Dialect::Http2 => Ok(http2::data(id, data, fin)),
        }
    }

    pub fn rst_frame(&mut self, id: StreamId, code: RstCode) -> Bytes {
        let dialect = self.version.dialect();
        self.cached(CacheKey::Rst { id, code }, |version| {
            let wire = code.to_wire(dialect);
            match dialect {
                Dialect::Spdy => spdy::rst(version, id, wire),
                Dialect::Http2 => http2::rst(id, wire),
            }
        })
    }

    pub fn settings_frame(&mut self, settings: &Settings) -> Bytes {
        self.cached(CacheKey::Settings(settings.clone()), |version| {
            match version.dialect() {
                Dialect::Spdy => spdy::settings(version, settings),
                Dialect::Http2 => http2::settings(settings),
            }
        })
    }

    /// HTTP/2 SETTINGS acknowledgement, `None` for SPDY
    pub fn settings_ack_frame(&self) -> Option<Bytes> {
        match self.version.dialect() {
            Dialect::Spdy => None,
            Dialect::Http2 => Some(http2::settings_ack()),
        }
    }

    /// PING; SPDY has no ack flag, acknowledgement is by echoing the id
    pub fn ping_frame(&self, opaque: &[u8], ack: bool) -> Bytes {
        match self.version.dialect() {
            Dialect::Spdy => spdy::ping(self.version, opaque),
            Dialect::Http2 => http2::ping(opaque, ack),
        }
    }

    pub fn goaway_frame(&self, last_stream_id: StreamId, code: u32) -> Bytes {
        match self.version.dialect() {
            Dialect::Spdy => spdy::goaway(self.version, last_stream_id, code),
            Dialect::Http2 => http2::goaway(last_stream_id, code, &[]),
        }
    }

    pub fn window_update_frame(&self, id: StreamId, delta: u32) -> Bytes {
        match self.version.dialect() {
            Dialect::Spdy => spdy::window_update(self.version, id, delta),
            Dialect::Http2 => http2::window_update(id, delta),
        }
    }

    pub fn x_forwarded_frame(&self, host: &str) -> Result<Bytes> {
        match self.version.dialect() {
            Dialect::Spdy => spdy::x_forwarded(self.version, host),
            Dialect::Http2 => Ok(http2::x_forwarded(host)),
        }
    }
}

fn spdy_status(status: u16, reason: Option<&str>) -> String {
    format!("{} {}", status, reason.unwrap_or_else(|| reason_phrase(status)))
}

/// Inbound frame decoder for one connection
pub struct FrameDecoder {
    version: Version,
    is_server: bool,
    decompressor: Box<dyn HeaderDecompressor>,
    http2: Http2Decoder,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("version", &self.version)
            .field("is_server", &self.is_server)
            .finish_non_exhaustive()
    }
}

impl FrameDecoder {
    pub fn new(version: Version, is_server: bool, decompressor: Box<dyn HeaderDecompressor>) -> Self {
        FrameDecoder {
            version,
            is_server,
            decompressor,
            http2: Http2Decoder::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn upgrade(&mut self, version: Version) {
        if self.version.dialect() == version.dialect() {
            self.version = version;
        }
    }

    /// Hand the decompressor back for pooling
    pub fn into_decompressor(self) -> Box<dyn HeaderDecompressor> {
        self.decompressor
    }

    /// Decode one body; `Ok(None)` while an HTTP/2 header block is open
    pub fn decode(
        &mut self,
        header: &FrameHeader,
        body: Bytes,
    ) -> std::result::Result<Option<Frame>, ParseError> {
        match self.version.dialect() {
            Dialect::Spdy => spdy::decode_body(
                self.version,
                self.is_server,
                self.decompressor.as_mut(),
                header,
                body,
            )
            .map(Some),
            Dialect::Http2 => self
                .http2
                .decode_body(self.decompressor.as_mut(), header, body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compression::HeaderPair;
    use crate::protocol::frames::HeadersKind;
    use crate::protocol::SPDY_HEADER_SIZE;

    fn framer_pair(version: Version) -> (Framer, FrameDecoder) {
        let pair = HeaderPair::new(version, true);
        (
            Framer::new(version, pair.compressor),
            FrameDecoder::new(version, true, pair.decompressor),
        )
    }

    fn decode_spdy(decoder: &mut FrameDecoder, wire: &Bytes) -> Frame {
        let header = spdy::decode_header(wire).unwrap();
        decoder
            .decode(&header, wire.slice(SPDY_HEADER_SIZE..))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_spdy3_reply_carries_reason() {
        let (mut framer, mut decoder) = framer_pair(Version::Spdy3);
        let wire = framer
            .response_frame(&ResponseHead {
                id: 1,
                status: 200,
                reason: None,
                headers: Headers::from([("ohai", "yes")]),
                fin: false,
            })
            .unwrap();

        match decode_spdy(&mut decoder, &wire) {
            Frame::Headers(f) => {
                assert_eq!(f.kind, HeadersKind::Reply);
                assert_eq!(f.headers.get(":status"), Some("200 OK"));
                assert_eq!(f.headers.get("ohai"), Some("yes"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_spdy_push_is_unidirectional_syn_stream() {
        let (mut framer, mut decoder) = framer_pair(Version::Spdy3);
        let frames = framer
            .push_frame(&PushHead {
                id: 2,
                parent: 1,
                priority: 7,
                method: "GET".into(),
                path: "/style.css".into(),
                host: Some("localhost".into()),
                scheme: None,
                status: 200,
                headers: Headers::new(),
            })
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][4], FrameFlags::UNIDIRECTIONAL);

        match decode_spdy(&mut decoder, &frames[0]) {
            Frame::PushPromise(f) => {
                assert_eq!(f.stream_id, 1);
                assert_eq!(f.promised_id, 2);
                assert_eq!(f.priority, 7);
                assert_eq!(f.headers.get(":scheme"), Some("https"));
                assert_eq!(f.headers.get(":status"), Some("200 OK"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_settings_and_rst_are_memoized() {
        let (mut framer, _) = framer_pair(Version::Spdy3);
        let mut settings = Settings::new();
        settings.max_concurrent_streams = Some(100);

        let a = framer.settings_frame(&settings);
        let b = framer.settings_frame(&settings);
        assert_eq!(a.as_ptr(), b.as_ptr());

        let a = framer.rst_frame(1, RstCode::Cancel);
        let b = framer.rst_frame(1, RstCode::Cancel);
        assert_eq!(a, b);
        assert_eq!(&a[12..16], &[0, 0, 0, 5]);
    }

    #[test]
    fn test_cache_is_bounded() {
        let (mut framer, _) = framer_pair(Version::Http2);
        for id in 0..(CACHE_CAPACITY as u32 * 2) {
            framer.rst_frame(id * 2 + 1, RstCode::Cancel);
        }
        assert!(framer.cache.len() <= CACHE_CAPACITY);
    }

    #[test]
    fn test_connection_headers_are_stripped() {
        let (mut framer, mut decoder) = framer_pair(Version::Spdy3);
        let wire = framer
            .headers_frame(
                1,
                &Headers::from([("Connection", "keep-alive"), ("X-Trailer", "1")]),
                true,
            )
            .unwrap();
        match decode_spdy(&mut decoder, &wire) {
            Frame::Headers(f) => {
                assert!(f.fin);
                assert!(!f.headers.contains("connection"));
                assert_eq!(f.headers.get("x-trailer"), Some("1"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_http2_push_sends_promise_then_headers() {
        let (mut framer, _) = framer_pair(Version::Http2);
        let frames = framer
            .push_frame(&PushHead {
                id: 2,
                parent: 1,
                priority: 3,
                method: "GET".into(),
                path: "/a".into(),
                host: None,
                scheme: None,
                status: 200,
                headers: Headers::new(),
            })
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][3], http2::PUSH_PROMISE);
        assert_eq!(&frames[0][5..9], &[0, 0, 0, 1]);
        assert_eq!(frames[1][3], http2::HEADERS);
        assert_eq!(&frames[1][5..9], &[0, 0, 0, 2]);
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(299), "Unknown");
    }
}
