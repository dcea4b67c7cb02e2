//! SPDY v2 / v3 / v3.1 wire codec
//!
//! Control frame header:
//!
//! ```text
//! +----------------------------------+
//! |C| Version(15bits) | Type(16bits) |
//! +----------------------------------+
//! | Flags (8)  |  Length (24 bits)   |
//! +----------------------------------+
//! ```
//!
//! Data frames replace version and type with a 31-bit stream id.

use super::compression::{HeaderCompressor, HeaderDecompressor};
use super::frames::*;
use super::reader::{tail, Reader};
use super::settings::{Settings, SettingsParameter};
use super::{Dialect, Version, MAX_SPDY_FRAME_SIZE, SPDY_HEADER_SIZE};
use crate::error::{Error, ParseError, Result, StreamId};
use crate::headers::Headers;
use bytes::{BufMut, Bytes, BytesMut};

pub const SYN_STREAM: u16 = 0x1;
pub const SYN_REPLY: u16 = 0x2;
pub const RST_STREAM: u16 = 0x3;
pub const SETTINGS: u16 = 0x4;
pub const NOOP: u16 = 0x5;
pub const PING: u16 = 0x6;
pub const GOAWAY: u16 = 0x7;
pub const HEADERS: u16 = 0x8;
pub const WINDOW_UPDATE: u16 = 0x9;
pub const X_FORWARDED: u16 = 0xf000;

/// SETTINGS entry flag asking the peer to persist the value
pub const FLAG_SETTINGS_PERSIST_VALUE: u32 = 0x1;
/// SETTINGS entry flag marking a value the peer persisted earlier
pub const FLAG_SETTINGS_PERSISTED: u32 = 0x2;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Pseudo-header names that SPDY/2 sends without the leading colon
const V2_INTERNAL_HEADERS: [&str; 6] = ["method", "version", "url", "host", "scheme", "status"];

fn length_width(version: Version) -> usize {
    if version == Version::Spdy2 {
        2
    } else {
        4
    }
}

fn put_length(buf: &mut BytesMut, version: Version, len: usize) -> Result<()> {
    if version == Version::Spdy2 {
        let len = u16::try_from(len)
            .map_err(|_| Error::FrameSize(format!("header field of {} bytes", len)))?;
        buf.put_u16(len);
    } else {
        let len = u32::try_from(len)
            .map_err(|_| Error::FrameSize(format!("header field of {} bytes", len)))?;
        buf.put_u32(len);
    }
    Ok(())
}

/// Serialize a name/value block (before compression)
///
/// Repeated names are folded into one entry with NUL-separated values.
pub fn encode_name_values(version: Version, pairs: &[(String, String)]) -> Result<BytesMut> {
    let mut folded: Vec<(&str, String)> = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        match folded.iter_mut().find(|(n, _)| *n == name.as_str()) {
            Some((_, joined)) => {
                joined.push('\0');
                joined.push_str(value);
            }
            None => folded.push((name.as_str(), value.clone())),
        }
    }

    let width = length_width(version);
    let size = width
        + folded
            .iter()
            .map(|(n, v)| 2 * width + n.len() + v.len())
            .sum::<usize>();

    let mut block = BytesMut::with_capacity(size);
    put_length(&mut block, version, folded.len())?;
    for (name, value) in &folded {
        put_length(&mut block, version, name.len())?;
        block.put_slice(name.as_bytes());
        put_length(&mut block, version, value.len())?;
        block.put_slice(value.as_bytes());
    }
    Ok(block)
}

/// Parse a decompressed name/value block
pub fn decode_name_values(version: Version, raw: &[u8]) -> Result<Vec<(String, String)>> {
    let mut r = Reader::new(raw, "name/value block");
    let read_len = |r: &mut Reader<'_>| -> Result<usize> {
        if version == Version::Spdy2 {
            Ok(r.u16()? as usize)
        } else {
            Ok(r.u32()? as usize)
        }
    };
    let read_str = |r: &mut Reader<'_>| -> Result<String> {
        let len = read_len(r)?;
        let bytes = r.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("header block is not UTF-8".into()))
    };

    let count = read_len(&mut r)?;
    let mut pairs = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = read_str(&mut r)?;
        let value = read_str(&mut r)?;
        for part in value.split('\0') {
            pairs.push((name.clone(), part.to_string()));
        }
    }
    Ok(pairs)
}

/// Map decoded names onto the colon-prefixed HTTP/2 vocabulary
fn canonical_headers(version: Version, pairs: Vec<(String, String)>) -> Headers {
    pairs
        .into_iter()
        .filter_map(|(mut name, value)| {
            if version == Version::Spdy2 && V2_INTERNAL_HEADERS.contains(&name.as_str()) {
                name = if name == "url" {
                    ":path".to_string()
                } else {
                    format!(":{}", name)
                };
            }
            if name == ":host" {
                name = ":authority".to_string();
            }
            if name == ":version" {
                return None;
            }
            Some((name, value))
        })
        .collect()
}

fn begin_control(version: Version, frame_type: u16, flags: u8, capacity: usize) -> BytesMut {
    let mut buf = BytesMut::with_capacity(SPDY_HEADER_SIZE + capacity);
    buf.put_u16(0x8000 | version.wire());
    buf.put_u16(frame_type);
    buf.put_u8(flags);
    buf.put_slice(&[0, 0, 0]);
    buf
}

fn finish(mut buf: BytesMut) -> Result<Bytes> {
    let len = buf.len() - SPDY_HEADER_SIZE;
    if len > MAX_SPDY_FRAME_SIZE as usize {
        return Err(Error::FrameSize(format!("frame body of {} bytes", len)));
    }
    buf[5] = (len >> 16) as u8;
    buf[6] = (len >> 8) as u8;
    buf[7] = len as u8;
    Ok(buf.freeze())
}

/// Fixed-size frames never exceed the length field
fn finish_small(buf: BytesMut) -> Bytes {
    let len = buf.len() - SPDY_HEADER_SIZE;
    let mut buf = buf;
    buf[5] = (len >> 16) as u8;
    buf[6] = (len >> 8) as u8;
    buf[7] = len as u8;
    buf.freeze()
}

/// SYN_STREAM, carrying a push when `associated` is non-zero
#[allow(clippy::too_many_arguments)]
pub fn syn_stream(
    version: Version,
    compressor: &mut dyn HeaderCompressor,
    id: StreamId,
    associated: StreamId,
    priority: u8,
    flags: u8,
    pairs: &[(String, String)],
) -> Result<Bytes> {
    let block = compressor.compress(pairs)?;
    let mut buf = begin_control(version, SYN_STREAM, flags, 10 + block.len());
    buf.put_u32(id & STREAM_ID_MASK);
    buf.put_u32(associated & STREAM_ID_MASK);
    buf.put_u8(encode_priority(version, priority));
    // Credential slot
    buf.put_u8(0);
    buf.put_slice(&block);
    finish(buf)
}

/// SYN_REPLY
pub fn syn_reply(
    version: Version,
    compressor: &mut dyn HeaderCompressor,
    id: StreamId,
    flags: u8,
    pairs: &[(String, String)],
) -> Result<Bytes> {
    headers_like(version, compressor, SYN_REPLY, id, flags, pairs)
}

/// HEADERS
pub fn headers(
    version: Version,
    compressor: &mut dyn HeaderCompressor,
    id: StreamId,
    flags: u8,
    pairs: &[(String, String)],
) -> Result<Bytes> {
    headers_like(version, compressor, HEADERS, id, flags, pairs)
}

fn headers_like(
    version: Version,
    compressor: &mut dyn HeaderCompressor,
    frame_type: u16,
    id: StreamId,
    flags: u8,
    pairs: &[(String, String)],
) -> Result<Bytes> {
    let block = compressor.compress(pairs)?;
    let mut buf = begin_control(version, frame_type, flags, 6 + block.len());
    buf.put_u32(id & STREAM_ID_MASK);
    if version == Version::Spdy2 {
        // Unused
        buf.put_u16(0);
    }
    buf.put_slice(&block);
    finish(buf)
}

/// Priority byte: top 2 bits on SPDY/2, top 3 bits afterwards
pub fn encode_priority(version: Version, priority: u8) -> u8 {
    match version {
        Version::Spdy2 => priority.min(3) << 6,
        _ => priority.min(7) << 5,
    }
}

pub fn decode_priority(version: Version, byte: u8) -> u8 {
    match version {
        Version::Spdy2 => byte >> 6,
        _ => byte >> 5,
    }
}

/// DATA frame
pub fn data(id: StreamId, payload: &[u8], fin: bool) -> Result<Bytes> {
    if payload.len() > MAX_SPDY_FRAME_SIZE as usize {
        return Err(Error::FrameSize(format!("DATA of {} bytes", payload.len())));
    }
    let mut buf = BytesMut::with_capacity(SPDY_HEADER_SIZE + payload.len());
    buf.put_u32(id & STREAM_ID_MASK);
    buf.put_u8(if fin { FrameFlags::FIN } else { 0 });
    let len = payload.len();
    buf.put_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// RST_STREAM
pub fn rst(version: Version, id: StreamId, code: u32) -> Bytes {
    let mut buf = begin_control(version, RST_STREAM, 0, 8);
    buf.put_u32(id & STREAM_ID_MASK);
    buf.put_u32(code);
    finish_small(buf)
}

/// SETTINGS; parameters SPDY cannot express are dropped
pub fn settings(version: Version, settings: &Settings) -> Bytes {
    let mut entries = settings.wire_entries(Dialect::Spdy);
    if version == Version::Spdy2 {
        entries.retain(|(id, _)| *id != 7);
    }

    let mut buf = begin_control(version, SETTINGS, 0, 4 + 8 * entries.len());
    buf.put_u32(entries.len() as u32);
    for (id, value) in entries {
        let key = (FLAG_SETTINGS_PERSIST_VALUE << 24) | id;
        if version == Version::Spdy2 {
            buf.put_u32_le(key);
        } else {
            buf.put_u32(key);
        }
        buf.put_u32(value & STREAM_ID_MASK);
    }
    finish_small(buf)
}

/// NOOP (SPDY/2)
pub fn noop(version: Version) -> Bytes {
    finish_small(begin_control(version, NOOP, 0, 0))
}

/// PING carrying the last four bytes of `opaque`
pub fn ping(version: Version, opaque: &[u8]) -> Bytes {
    let mut id = [0u8; 4];
    let n = opaque.len().min(4);
    id[4 - n..].copy_from_slice(&opaque[opaque.len() - n..]);

    let mut buf = begin_control(version, PING, 0, 4);
    buf.put_slice(&id);
    finish_small(buf)
}

/// GOAWAY
pub fn goaway(version: Version, last_stream_id: StreamId, code: u32) -> Bytes {
    let mut buf = begin_control(version, GOAWAY, 0, 8);
    buf.put_u32(last_stream_id & STREAM_ID_MASK);
    buf.put_u32(code);
    finish_small(buf)
}

/// WINDOW_UPDATE
pub fn window_update(version: Version, id: StreamId, delta: u32) -> Bytes {
    let mut buf = begin_control(version, WINDOW_UPDATE, 0, 8);
    buf.put_u32(id & STREAM_ID_MASK);
    buf.put_u32(delta & STREAM_ID_MASK);
    finish_small(buf)
}

/// X_FORWARDED
pub fn x_forwarded(version: Version, host: &str) -> Result<Bytes> {
    let mut buf = begin_control(version, X_FORWARDED, 0, 4 + host.len());
    buf.put_u32(host.len() as u32);
    buf.put_slice(host.as_bytes());
    finish(buf)
}

/// Decode the fixed 8-byte header
pub fn decode_header(buf: &[u8]) -> Result<FrameHeader> {
    let mut r = Reader::new(buf, "frame header");
    let first = r.u32()?;
    let flags = FrameFlags::from_u8(r.u8()?);
    let len = r.take(3)?;
    let length = ((len[0] as usize) << 16) | ((len[1] as usize) << 8) | len[2] as usize;

    let control = first & 0x8000_0000 != 0;
    if control {
        Ok(FrameHeader {
            control,
            version: ((first >> 16) & 0x7fff) as u16,
            frame_type: (first & 0xffff) as u16,
            flags,
            length,
            stream_id: 0,
        })
    } else {
        Ok(FrameHeader {
            control,
            version: 0,
            frame_type: 0,
            flags,
            length,
            stream_id: first & STREAM_ID_MASK,
        })
    }
}

/// Decode a frame body
///
/// `is_server` decides which PING ids are acknowledgements of our own
/// pings: servers issue even ids, clients odd ones.
pub fn decode_body(
    version: Version,
    is_server: bool,
    decompressor: &mut dyn HeaderDecompressor,
    header: &FrameHeader,
    body: Bytes,
) -> std::result::Result<Frame, ParseError> {
    if !header.control {
        if header.flags.is_set(FrameFlags::COMPRESSED) {
            return Err(ParseError::stream(
                header.stream_id,
                Error::Protocol("compressed DATA frames are not supported".into()),
            ));
        }
        return Ok(Frame::Data(DataFrame {
            stream_id: header.stream_id,
            data: body,
            fin: header.flags.is_fin(),
        }));
    }

    let fin = header.flags.is_fin();
    match header.frame_type {
        SYN_STREAM => decode_syn_stream(version, decompressor, fin, &body),
        SYN_REPLY | HEADERS => {
            let kind = if header.frame_type == SYN_REPLY {
                HeadersKind::Reply
            } else {
                HeadersKind::Headers
            };
            let mut r = Reader::new(&body, "SYN_REPLY/HEADERS");
            let id = r.u31()?;
            if version == Version::Spdy2 {
                r.skip(2)?;
            }
            let block = r.rest();
            let headers = canonical_headers(version, decompressor.decompress(block)?);
            Ok(Frame::Headers(HeadersFrame {
                stream_id: id,
                kind,
                priority: 0,
                dependency: None,
                fin,
                path: headers.get(":path").map(str::to_string),
                headers,
            }))
        }
        RST_STREAM => {
            let mut r = Reader::new(&body, "RST_STREAM");
            Ok(Frame::RstStream(RstStreamFrame {
                stream_id: r.u31()?,
                code: r.u32()?,
            }))
        }
        SETTINGS => decode_settings(version, &body).map_err(ParseError::from),
        NOOP => Ok(Frame::Noop),
        PING => {
            let mut r = Reader::new(&body, "PING");
            let id = r.u32()?;
            let ours = if is_server { id % 2 == 0 } else { id % 2 == 1 };
            Ok(Frame::Ping(PingFrame {
                opaque: body.clone(),
                ack: ours,
            }))
        }
        GOAWAY => {
            let mut r = Reader::new(&body, "GOAWAY");
            let last_stream_id = r.u31()?;
            // SPDY/2 GOAWAY may omit the status
            let code = if version == Version::Spdy2 && !r.has(4) {
                0
            } else {
                r.u32()?
            };
            Ok(Frame::Goaway(GoawayFrame {
                last_stream_id,
                code,
                debug_data: Bytes::new(),
            }))
        }
        WINDOW_UPDATE => {
            let mut r = Reader::new(&body, "WINDOW_UPDATE");
            Ok(Frame::WindowUpdate(WindowUpdateFrame {
                stream_id: r.u31()?,
                delta: r.u31()?,
            }))
        }
        X_FORWARDED => {
            let mut r = Reader::new(&body, "X_FORWARDED");
            let len = r.u32()? as usize;
            let host = r.take(len)?;
            Ok(Frame::XForwarded(String::from_utf8_lossy(host).into_owned()))
        }
        other => Ok(Frame::Unknown(other)),
    }
}

fn decode_syn_stream(
    version: Version,
    decompressor: &mut dyn HeaderDecompressor,
    fin: bool,
    body: &Bytes,
) -> std::result::Result<Frame, ParseError> {
    let mut r = Reader::new(body, "SYN_STREAM");
    let id = r.u31()?;
    let associated = r.u31()?;
    let priority = decode_priority(version, r.u8()?);
    // Credential slot
    r.skip(1)?;

    let block = tail(body, r.position());
    let headers = canonical_headers(version, decompressor.decompress(&block)?);

    if !headers.contains(":method") || !headers.contains(":path") {
        return Err(ParseError::stream(
            id,
            Error::Protocol("missing `:method` and/or `:path` header".into()),
        ));
    }

    let path = headers.get(":path").map(str::to_string);
    if associated != 0 {
        return Ok(Frame::PushPromise(PushPromiseFrame {
            stream_id: associated,
            promised_id: id,
            priority,
            fin,
            path,
            headers,
        }));
    }

    Ok(Frame::Headers(HeadersFrame {
        stream_id: id,
        kind: HeadersKind::Request,
        priority,
        dependency: None,
        fin,
        path,
        headers,
    }))
}

fn decode_settings(version: Version, body: &[u8]) -> Result<Frame> {
    let mut r = Reader::new(body, "SETTINGS");
    let count = r.u32()? as usize;
    if !r.has(count.saturating_mul(8)) {
        return Err(Error::FrameSize(format!(
            "SETTINGS declares {} entries in {} bytes",
            count,
            r.remaining()
        )));
    }

    let mut settings = Settings::new();
    for _ in 0..count {
        let key = if version == Version::Spdy2 {
            r.u32_le()?
        } else {
            r.u32()?
        };
        let value = r.u32()?;
        let flags = key >> 24;
        let id = key & 0x00ff_ffff;

        if flags & FLAG_SETTINGS_PERSISTED != 0 {
            continue;
        }
        if let Some(param) = SettingsParameter::from_id(Dialect::Spdy, id) {
            settings.set(param, value);
        }
    }

    Ok(Frame::Settings(SettingsFrame::new(settings)))
}
