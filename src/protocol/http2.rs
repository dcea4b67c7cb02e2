//! HTTP/2 frame encoding and decoding
//!
//! Every frame starts with a 9-byte header: 24-bit length, 8-bit type,
//! 8-bit flags and a 31-bit stream id. Header blocks larger than the
//! peer's maximum frame size are split into HEADERS/PUSH_PROMISE followed
//! by CONTINUATION frames; the decoder reassembles them.

use super::compression::{HeaderCompressor, HeaderDecompressor};
use super::frames::*;
use super::reader::{tail, Reader};
use super::settings::{Settings, SettingsParameter};
use super::{Dialect, Version, DEFAULT_PRIORITY, HTTP2_HEADER_SIZE};
use crate::error::{Error, ParseError, Result, StreamId};
use crate::headers::Headers;
use bytes::{BufMut, Bytes, BytesMut};

pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const PRIORITY: u8 = 0x2;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PUSH_PROMISE: u8 = 0x5;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;
pub const X_FORWARDED: u8 = 0xde;

/// Largest compressed header block accepted across CONTINUATION frames
pub const MAX_HEADER_LIST_SIZE: usize = 64 * 1024;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Encode a frame header
pub fn encode_header(
    frame_type: u8,
    flags: FrameFlags,
    stream_id: StreamId,
    length: usize,
) -> [u8; HTTP2_HEADER_SIZE] {
    let mut header = [0u8; HTTP2_HEADER_SIZE];

    header[0] = ((length >> 16) & 0xff) as u8;
    header[1] = ((length >> 8) & 0xff) as u8;
    header[2] = (length & 0xff) as u8;
    header[3] = frame_type;
    header[4] = flags.as_u8();
    header[5..9].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());

    header
}

/// Decode a frame header
pub fn decode_header(buf: &[u8]) -> Result<FrameHeader> {
    let mut r = Reader::new(buf, "frame header");
    let len = r.take(3)?;
    let length = ((len[0] as usize) << 16) | ((len[1] as usize) << 8) | len[2] as usize;
    let frame_type = r.u8()?;
    let flags = FrameFlags::from_u8(r.u8()?);
    let stream_id = r.u31()?;

    Ok(FrameHeader {
        control: frame_type != DATA,
        version: Version::Http2.wire(),
        frame_type: frame_type as u16,
        flags,
        length,
        stream_id,
    })
}

fn frame(frame_type: u8, flags: FrameFlags, stream_id: StreamId, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HTTP2_HEADER_SIZE + payload.len());
    buf.put_slice(&encode_header(frame_type, flags, stream_id, payload.len()));
    buf.put_slice(payload);
    buf.freeze()
}

/// HEADERS priority bucket for a dependency weight
pub fn weight_to_priority(weight: u8) -> u8 {
    7 - weight / 32
}

/// Dependency weight placing a stream in the given bucket
pub fn priority_to_weight(priority: u8) -> u8 {
    (7 - priority.min(7)) * 32 + 16
}

/// DATA frame
pub fn data(stream_id: StreamId, payload: &[u8], fin: bool) -> Bytes {
    let flags = FrameFlags::empty().with(FrameFlags::FIN, fin);
    frame(DATA, flags, stream_id, payload)
}

/// Header block frame followed by as many CONTINUATION frames as needed
fn header_block(
    frame_type: u8,
    mut flags: FrameFlags,
    stream_id: StreamId,
    prefix: &[u8],
    block: &[u8],
    max_frame_size: usize,
) -> Bytes {
    let first = max_frame_size.saturating_sub(prefix.len()).min(block.len());
    let (head, mut rest) = block.split_at(first);

    let mut buf = BytesMut::with_capacity(
        HTTP2_HEADER_SIZE * (2 + block.len() / max_frame_size.max(1)) + prefix.len() + block.len(),
    );
    flags = flags.with(FrameFlags::END_HEADERS, rest.is_empty());
    buf.put_slice(&encode_header(frame_type, flags, stream_id, prefix.len() + head.len()));
    buf.put_slice(prefix);
    buf.put_slice(head);

    while !rest.is_empty() {
        let n = rest.len().min(max_frame_size);
        let (chunk, remaining) = rest.split_at(n);
        rest = remaining;
        let flags = FrameFlags::empty().with(FrameFlags::END_HEADERS, rest.is_empty());
        buf.put_slice(&encode_header(CONTINUATION, flags, stream_id, chunk.len()));
        buf.put_slice(chunk);
    }

    buf.freeze()
}

/// HEADERS frame, with a priority block when `priority` is given
pub fn headers(
    compressor: &mut dyn HeaderCompressor,
    stream_id: StreamId,
    pairs: &[(String, String)],
    fin: bool,
    priority: Option<PrioritySpec>,
    max_frame_size: usize,
) -> Result<Bytes> {
    let block = compressor.compress(pairs)?;

    let mut flags = FrameFlags::empty().with(FrameFlags::FIN, fin);
    let mut prefix = [0u8; 5];
    let prefix: &[u8] = match priority {
        Some(spec) => {
            flags.set(FrameFlags::PRIORITY);
            let mut dep = spec.stream_dependency & STREAM_ID_MASK;
            if spec.exclusive {
                dep |= 0x8000_0000;
            }
            prefix[..4].copy_from_slice(&dep.to_be_bytes());
            prefix[4] = spec.weight;
            &prefix
        }
        None => &[],
    };

    Ok(header_block(HEADERS, flags, stream_id, prefix, &block, max_frame_size))
}

/// PUSH_PROMISE frame on the parent stream
pub fn push_promise(
    compressor: &mut dyn HeaderCompressor,
    parent: StreamId,
    promised_id: StreamId,
    pairs: &[(String, String)],
    max_frame_size: usize,
) -> Result<Bytes> {
    let block = compressor.compress(pairs)?;
    let prefix = (promised_id & STREAM_ID_MASK).to_be_bytes();
    Ok(header_block(
        PUSH_PROMISE,
        FrameFlags::empty(),
        parent,
        &prefix,
        &block,
        max_frame_size,
    ))
}

/// RST_STREAM frame
pub fn rst(stream_id: StreamId, code: u32) -> Bytes {
    frame(RST_STREAM, FrameFlags::empty(), stream_id, &code.to_be_bytes())
}

/// SETTINGS frame; parameters HTTP/2 cannot express are dropped
pub fn settings(settings: &Settings) -> Bytes {
    let entries = settings.wire_entries(Dialect::Http2);
    let mut payload = BytesMut::with_capacity(entries.len() * 6);
    for (id, value) in entries {
        payload.put_u16(id as u16);
        payload.put_u32(value);
    }
    frame(SETTINGS, FrameFlags::empty(), 0, &payload)
}

/// SETTINGS acknowledgement
pub fn settings_ack() -> Bytes {
    frame(SETTINGS, FrameFlags::from_u8(FrameFlags::ACK), 0, &[])
}

/// PING frame; `opaque` is right-aligned into the 8-byte payload
pub fn ping(opaque: &[u8], ack: bool) -> Bytes {
    let mut payload = [0u8; 8];
    let n = opaque.len().min(8);
    payload[8 - n..].copy_from_slice(&opaque[opaque.len() - n..]);
    frame(PING, FrameFlags::empty().with(FrameFlags::ACK, ack), 0, &payload)
}

/// GOAWAY frame
pub fn goaway(last_stream_id: StreamId, code: u32, debug_data: &[u8]) -> Bytes {
    let mut payload = BytesMut::with_capacity(8 + debug_data.len());
    payload.put_u32(last_stream_id & STREAM_ID_MASK);
    payload.put_u32(code);
    payload.put_slice(debug_data);
    frame(GOAWAY, FrameFlags::empty(), 0, &payload)
}

/// WINDOW_UPDATE frame
pub fn window_update(stream_id: StreamId, delta: u32) -> Bytes {
    frame(
        WINDOW_UPDATE,
        FrameFlags::empty(),
        stream_id,
        &(delta & STREAM_ID_MASK).to_be_bytes(),
    )
}

/// PRIORITY frame
pub fn priority(stream_id: StreamId, spec: PrioritySpec) -> Bytes {
    let mut dep = spec.stream_dependency & STREAM_ID_MASK;
    if spec.exclusive {
        dep |= 0x8000_0000;
    }
    let mut payload = [0u8; 5];
    payload[..4].copy_from_slice(&dep.to_be_bytes());
    payload[4] = spec.weight;
    frame(PRIORITY, FrameFlags::empty(), stream_id, &payload)
}

/// X_FORWARDED frame
pub fn x_forwarded(host: &str) -> Bytes {
    frame(X_FORWARDED, FrameFlags::empty(), 0, host.as_bytes())
}

fn connection_error(error: Error) -> ParseError {
    ParseError::connection(error)
}

fn protocol(msg: &str) -> ParseError {
    connection_error(Error::Protocol(msg.to_string()))
}

fn frame_size(msg: &str) -> ParseError {
    connection_error(Error::FrameSize(msg.to_string()))
}

/// Strip the PADDED prefix and trailer
fn unpad(header: &FrameHeader, body: Bytes) -> std::result::Result<Bytes, ParseError> {
    if !header.flags.is_padded() {
        return Ok(body);
    }
    if body.is_empty() {
        return Err(frame_size("not enough space for padding"));
    }
    let pad = body[0] as usize;
    if pad > body.len() - 1 {
        return Err(protocol("invalid padding size"));
    }
    Ok(body.slice(1..body.len() - pad))
}

/// Header block awaiting its CONTINUATION frames
#[derive(Debug)]
struct PendingBlock {
    frame: Frame,
    block: BytesMut,
}

/// Stateful HTTP/2 body decoder
///
/// The only state is the header block under assembly: between a HEADERS
/// (or PUSH_PROMISE) without END_HEADERS and the CONTINUATION carrying
/// it, no other frame may arrive.
#[derive(Debug, Default)]
pub struct Http2Decoder {
    pending: Option<PendingBlock>,
}

impl Http2Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a header block is waiting for CONTINUATION frames
    pub fn is_assembling(&self) -> bool {
        self.pending.is_some()
    }

    /// Decode a frame body
    ///
    /// Returns `Ok(None)` for HEADERS and CONTINUATION frames that do not
    /// complete their header block yet.
    pub fn decode_body(
        &mut self,
        decompressor: &mut dyn HeaderDecompressor,
        header: &FrameHeader,
        body: Bytes,
    ) -> std::result::Result<Option<Frame>, ParseError> {
        let frame_type = header.frame_type as u8;
        let id = header.stream_id;

        if let Some(pending) = &self.pending {
            let expected = pending_stream(&pending.frame);
            if frame_type != CONTINUATION || id != expected {
                return Err(protocol("expected CONTINUATION"));
            }
        }

        match frame_type {
            DATA => {
                if id == 0 {
                    return Err(protocol("invalid stream id for DATA"));
                }
                let data = unpad(header, body)?;
                Ok(Some(Frame::Data(DataFrame {
                    stream_id: id,
                    data,
                    fin: header.flags.is_fin(),
                })))
            }
            HEADERS => {
                if id == 0 {
                    return Err(protocol("invalid stream id for HEADERS"));
                }
                let data = unpad(header, body)?;
                let mut r = Reader::new(&data, "HEADERS");
                let dependency = if header.flags.is_priority() {
                    let dep = r.u32().map_err(|_| frame_size("not enough data for HEADERS"))?;
                    let weight = r.u8()?;
                    Some(PrioritySpec {
                        stream_dependency: dep & STREAM_ID_MASK,
                        exclusive: dep & 0x8000_0000 != 0,
                        weight,
                    })
                } else {
                    None
                };
                let frame = Frame::Headers(HeadersFrame {
                    stream_id: id,
                    kind: HeadersKind::Headers,
                    priority: dependency.map_or(DEFAULT_PRIORITY, |d| weight_to_priority(d.weight)),
                    dependency,
                    fin: header.flags.is_fin(),
                    path: None,
                    headers: Headers::new(),
                });
                let block = tail(&data, r.position());
                self.start_block(decompressor, header, frame, &block)
            }
            PUSH_PROMISE => {
                if id == 0 {
                    return Err(protocol("invalid stream id for PUSH_PROMISE"));
                }
                let data = unpad(header, body)?;
                let mut r = Reader::new(&data, "PUSH_PROMISE");
                let promised_id = r
                    .u31()
                    .map_err(|_| frame_size("PUSH_PROMISE length less than 4"))?;
                let frame = Frame::PushPromise(PushPromiseFrame {
                    stream_id: id,
                    promised_id,
                    priority: DEFAULT_PRIORITY,
                    fin: false,
                    path: None,
                    headers: Headers::new(),
                });
                let block = tail(&data, r.position());
                self.start_block(decompressor, header, frame, &block)
            }
            CONTINUATION => match self.pending.take() {
                Some(mut pending) => {
                    pending.block.extend_from_slice(&body);
                    if pending.block.len() > MAX_HEADER_LIST_SIZE {
                        return Err(protocol("compressed header list is too large"));
                    }
                    if header.flags.is_end_headers() {
                        Ok(Some(finish_block(decompressor, pending)?))
                    } else {
                        self.pending = Some(pending);
                        Ok(None)
                    }
                }
                None => Err(protocol("no matching stream for continuation")),
            },
            RST_STREAM => {
                if body.len() != 4 {
                    return Err(frame_size("RST_STREAM length not 4"));
                }
                if id == 0 {
                    return Err(protocol("invalid stream id for RST_STREAM"));
                }
                let mut r = Reader::new(&body, "RST_STREAM");
                Ok(Some(Frame::RstStream(RstStreamFrame {
                    stream_id: id,
                    code: r.u32()?,
                })))
            }
            SETTINGS => {
                if id != 0 {
                    return Err(protocol("invalid stream id for SETTINGS"));
                }
                if header.flags.is_ack() {
                    if !body.is_empty() {
                        return Err(frame_size("SETTINGS with ACK and non-zero length"));
                    }
                    return Ok(Some(Frame::Settings(SettingsFrame::ack())));
                }
                if body.len() % 6 != 0 {
                    return Err(frame_size("SETTINGS length not multiple of 6"));
                }
                let mut r = Reader::new(&body, "SETTINGS");
                let mut settings = Settings::new();
                while r.remaining() > 0 {
                    let param = r.u16()? as u32;
                    let value = r.u32()?;
                    if let Some(param) = SettingsParameter::from_id(Dialect::Http2, param) {
                        settings.set(param, value);
                    }
                }
                settings.validate()?;
                Ok(Some(Frame::Settings(SettingsFrame::new(settings))))
            }
            PING => {
                if body.len() != 8 {
                    return Err(frame_size("PING length != 8"));
                }
                if id != 0 {
                    return Err(protocol("invalid stream id for PING"));
                }
                Ok(Some(Frame::Ping(PingFrame {
                    opaque: body,
                    ack: header.flags.is_ack(),
                })))
            }
            GOAWAY => {
                if body.len() < 8 {
                    return Err(frame_size("GOAWAY length < 8"));
                }
                if id != 0 {
                    return Err(protocol("invalid stream id for GOAWAY"));
                }
                let mut r = Reader::new(&body, "GOAWAY");
                let last_stream_id = r.u31()?;
                let code = r.u32()?;
                Ok(Some(Frame::Goaway(GoawayFrame {
                    last_stream_id,
                    code,
                    debug_data: tail(&body, r.position()),
                })))
            }
            WINDOW_UPDATE => {
                if body.len() != 4 {
                    return Err(frame_size("WINDOW_UPDATE length != 4"));
                }
                let mut r = Reader::new(&body, "WINDOW_UPDATE");
                let delta = r.u31()?;
                if delta == 0 {
                    let error = Error::Protocol("WINDOW_UPDATE with zero delta".into());
                    return Err(if id == 0 {
                        connection_error(error)
                    } else {
                        ParseError::stream(id, error)
                    });
                }
                Ok(Some(Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: id,
                    delta,
                })))
            }
            PRIORITY => {
                if id == 0 {
                    return Err(protocol("invalid stream id for PRIORITY"));
                }
                if body.len() != 5 {
                    return Err(ParseError::stream(
                        id,
                        Error::FrameSize("PRIORITY length != 5".into()),
                    ));
                }
                let mut r = Reader::new(&body, "PRIORITY");
                let dep = r.u32()?;
                let weight = r.u8()?;
                Ok(Some(Frame::Priority(PriorityFrame {
                    stream_id: id,
                    priority: PrioritySpec {
                        stream_dependency: dep & STREAM_ID_MASK,
                        exclusive: dep & 0x8000_0000 != 0,
                        weight,
                    },
                })))
            }
            X_FORWARDED => Ok(Some(Frame::XForwarded(
                String::from_utf8_lossy(&body).into_owned(),
            ))),
            other => Ok(Some(Frame::Unknown(other as u16))),
        }
    }

    fn start_block(
        &mut self,
        decompressor: &mut dyn HeaderDecompressor,
        header: &FrameHeader,
        frame: Frame,
        block: &[u8],
    ) -> std::result::Result<Option<Frame>, ParseError> {
        if block.len() > MAX_HEADER_LIST_SIZE {
            return Err(protocol("compressed header list is too large"));
        }
        let pending = PendingBlock {
            frame,
            block: BytesMut::from(block),
        };
        if header.flags.is_end_headers() {
            Ok(Some(finish_block(decompressor, pending)?))
        } else {
            self.pending = Some(pending);
            Ok(None)
        }
    }
}

fn pending_stream(frame: &Frame) -> StreamId {
    match frame {
        Frame::Headers(f) => f.stream_id,
        Frame::PushPromise(f) => f.stream_id,
        _ => 0,
    }
}

/// Decompress an assembled block and attach it to its frame
///
/// A block that fails to decompress leaves the HPACK context out of sync
/// with the peer, so the error is connection-wide.
fn finish_block(
    decompressor: &mut dyn HeaderDecompressor,
    pending: PendingBlock,
) -> std::result::Result<Frame, ParseError> {
    let pairs = decompressor.decompress(&pending.block)?;
    let headers: Headers = pairs
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect();
    let path = headers.get(":path").map(str::to_string);

    Ok(match pending.frame {
        Frame::Headers(mut f) => {
            f.path = path;
            f.headers = headers;
            Frame::Headers(f)
        }
        Frame::PushPromise(mut f) => {
            f.path = path;
            f.headers = headers;
            Frame::PushPromise(f)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compression::HeaderPair;
    use crate::protocol::DEFAULT_MAX_FRAME_SIZE;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    /// Decode every frame in `wire`, skipping incomplete header blocks
    fn decode_all(pair: &mut HeaderPair, wire: &Bytes) -> Vec<Frame> {
        let mut decoder = Http2Decoder::new();
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < wire.len() {
            let header = decode_header(&wire[pos..]).unwrap();
            let start = pos + HTTP2_HEADER_SIZE;
            let body = wire.slice(start..start + header.length);
            pos = start + header.length;
            if let Some(frame) = decoder
                .decode_body(pair.decompressor.as_mut(), &header, body)
                .unwrap()
            {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::FIN | FrameFlags::END_HEADERS);
        let header = encode_header(HEADERS, flags, 42, 1234);
        let decoded = decode_header(&header).unwrap();

        assert_eq!(decoded.frame_type, HEADERS as u16);
        assert_eq!(decoded.flags, flags);
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.length, 1234);
        assert!(decoded.control);
    }

    #[test]
    fn test_encode_data_frame() {
        let encoded = data(1, b"Hello", true);

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], DATA);
        assert_eq!(encoded[4], FrameFlags::FIN);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_padded_data_is_stripped() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let mut payload = vec![3u8];
        payload.extend_from_slice(b"Hi");
        payload.extend_from_slice(&[0, 0, 0]);
        let wire = frame(DATA, FrameFlags::from_u8(FrameFlags::PADDED), 1, &payload);

        let frames = decode_all(&mut pair, &wire);
        assert_eq!(
            frames,
            vec![Frame::Data(DataFrame {
                stream_id: 1,
                data: Bytes::from_static(b"Hi"),
                fin: false,
            })]
        );
    }

    #[test]
    fn test_invalid_padding() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let mut decoder = Http2Decoder::new();
        let wire = frame(DATA, FrameFlags::from_u8(FrameFlags::PADDED), 1, &[9, 1]);
        let header = decode_header(&wire).unwrap();
        let err = decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap_err();
        assert!(!err.is_stream_scoped());
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = crate::protocol::SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = super::settings(&settings);
        assert_eq!(encoded[3], SETTINGS);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
        assert_eq!(encoded[0..3], [0, 0, 18]);

        let ack = settings_ack();
        assert_eq!(ack[0..3], [0, 0, 0]);
        assert_eq!(ack[4], FrameFlags::ACK);
    }

    #[test]
    fn test_settings_length_must_be_multiple_of_six() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let mut decoder = Http2Decoder::new();
        let wire = frame(SETTINGS, FrameFlags::empty(), 0, &[0, 3, 0, 0, 0]);
        let header = decode_header(&wire).unwrap();
        let err = decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap_err();
        assert!(matches!(err.error, Error::FrameSize(_)));
    }

    #[test]
    fn test_ping_padding_and_ack() {
        let encoded = ping(&[1, 2, 3, 4], true);
        assert_eq!(encoded[0..3], [0, 0, 8]);
        assert_eq!(encoded[4], FrameFlags::ACK);
        assert_eq!(&encoded[9..17], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_window_update() {
        let encoded = window_update(42, 1000);
        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], WINDOW_UPDATE);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);
        let increment = u32::from_be_bytes([encoded[9], encoded[10], encoded[11], encoded[12]]);
        assert_eq!(increment, 1000);
    }

    #[test]
    fn test_zero_window_update_is_protocol_error() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let mut decoder = Http2Decoder::new();

        let wire = frame(WINDOW_UPDATE, FrameFlags::empty(), 3, &[0, 0, 0, 0]);
        let header = decode_header(&wire).unwrap();
        let err = decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap_err();
        assert_eq!(err.stream_id, Some(3));

        let wire = frame(WINDOW_UPDATE, FrameFlags::empty(), 0, &[0, 0, 0, 0]);
        let header = decode_header(&wire).unwrap();
        let err = decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap_err();
        assert!(!err.is_stream_scoped());
    }

    #[test]
    fn test_headers_with_priority() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let spec = PrioritySpec {
            stream_dependency: 0,
            exclusive: false,
            weight: priority_to_weight(2),
        };
        let wire = headers(
            pair.compressor.as_mut(),
            1,
            &pairs(&[(":method", "GET"), (":path", "/"), ("a", "b")]),
            true,
            Some(spec),
            DEFAULT_MAX_FRAME_SIZE as usize,
        )
        .unwrap();

        match decode_all(&mut pair, &wire).pop() {
            Some(Frame::Headers(f)) => {
                assert_eq!(f.priority, 2);
                assert_eq!(f.dependency, Some(spec));
                assert!(f.fin);
                assert_eq!(f.path.as_deref(), Some("/"));
                assert_eq!(f.headers.get("a"), Some("b"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_large_block_uses_continuation() {
        let mut pair = HeaderPair::new(Version::Http2, false);
        let big = "v".repeat(40_000);
        let wire = headers(
            pair.compressor.as_mut(),
            5,
            &pairs(&[(":status", "200"), ("x-big", &big)]),
            false,
            None,
            DEFAULT_MAX_FRAME_SIZE as usize,
        )
        .unwrap();

        let first = decode_header(&wire).unwrap();
        assert_eq!(first.length, DEFAULT_MAX_FRAME_SIZE as usize);
        assert!(!first.flags.is_end_headers());

        let frames = decode_all(&mut pair, &wire);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Headers(f) => assert_eq!(f.headers.get("x-big"), Some(big.as_str())),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_frame_during_continuation() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let mut decoder = Http2Decoder::new();

        let block = pair
            .compressor
            .compress(&pairs(&[(":status", "200")]))
            .unwrap();
        let wire = frame(HEADERS, FrameFlags::empty(), 1, &block);
        let header = decode_header(&wire).unwrap();
        assert!(decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap()
            .is_none());
        assert!(decoder.is_assembling());

        let wire = ping(&[0; 8], false);
        let header = decode_header(&wire).unwrap();
        let err = decoder
            .decode_body(pair.decompressor.as_mut(), &header, wire.slice(9..))
            .unwrap_err();
        assert!(!err.is_stream_scoped());
    }

    #[test]
    fn test_push_promise() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let wire = push_promise(
            pair.compressor.as_mut(),
            1,
            2,
            &pairs(&[(":method", "GET"), (":path", "/style.css")]),
            DEFAULT_MAX_FRAME_SIZE as usize,
        )
        .unwrap();

        match decode_all(&mut pair, &wire).pop() {
            Some(Frame::PushPromise(f)) => {
                assert_eq!(f.stream_id, 1);
                assert_eq!(f.promised_id, 2);
                assert_eq!(f.path.as_deref(), Some("/style.css"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_goaway_debug_data() {
        let mut pair = HeaderPair::new(Version::Http2, true);
        let wire = goaway(7, 1, b"bye");
        match decode_all(&mut pair, &wire).pop() {
            Some(Frame::Goaway(f)) => {
                assert_eq!(f.last_stream_id, 7);
                assert_eq!(f.code, 1);
                assert_eq!(&f.debug_data[..], b"bye");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_weight_buckets() {
        assert_eq!(weight_to_priority(255), 0);
        assert_eq!(weight_to_priority(0), 7);
        for p in 0..=7 {
            assert_eq!(weight_to_priority(priority_to_weight(p)), p);
        }
    }
}
