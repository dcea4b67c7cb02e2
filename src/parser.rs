//! Incremental frame parser
//!
//! Bytes arrive in arbitrary chunks through [`Parser::feed`]. The parser
//! waits for a full frame header, then for the full body, and hands each
//! complete frame to the [`FrameDecoder`] for the negotiated version.
//!
//! For SPDY connections negotiated without a version the first control
//! frame header reveals it. Until the connection installs a decoder for
//! that version, [`Parser::next_frame`] stalls with `Ok(None)`.

use crate::error::{Error, ParseError};
use crate::protocol::{
    http2, spdy, Dialect, Frame, FrameDecoder, FrameHeader, Protocol, Version,
    CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE,
};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Received chunks not yet consumed
#[derive(Debug, Default)]
pub(crate) struct BufferQueue {
    chunks: VecDeque<Bytes>,
    size: usize,
}

impl BufferQueue {
    pub fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.size += chunk.len();
            self.chunks.push_back(chunk);
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    /// Remove exactly `n` bytes; zero-copy when one chunk covers them
    pub fn take(&mut self, n: usize) -> Bytes {
        debug_assert!(n <= self.size);
        self.size -= n;

        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= n {
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut front) = self.chunks.pop_front() else {
                break;
            };
            let wanted = n - out.len();
            if front.len() > wanted {
                out.extend_from_slice(&front.split_to(wanted));
                self.chunks.push_front(front);
            } else {
                out.extend_from_slice(front.chunk());
            }
        }
        out.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preface,
    FrameHead,
    FrameBody(FrameHeader),
}

/// Frame parser for one connection
#[derive(Debug)]
pub struct Parser {
    dialect: Dialect,
    is_server: bool,
    version: Option<Version>,
    state: State,
    buffer: BufferQueue,
    decoder: Option<FrameDecoder>,
    /// Largest HTTP/2 body we accept (our SETTINGS_MAX_FRAME_SIZE)
    max_frame_size: usize,
    poisoned: bool,
}

impl Parser {
    pub fn new(protocol: Protocol, is_server: bool) -> Self {
        // Only the server side of HTTP/2 receives the preface
        let state = if protocol.dialect == Dialect::Http2 && is_server {
            State::Preface
        } else {
            State::FrameHead
        };
        Parser {
            dialect: protocol.dialect,
            is_server,
            version: protocol.version,
            state,
            buffer: BufferQueue::default(),
            decoder: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
            poisoned: false,
        }
    }

    /// Version, once known
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Whether the version is known but no decoder is installed yet
    pub fn needs_decoder(&self) -> bool {
        self.version.is_some() && self.decoder.is_none()
    }

    pub fn set_decoder(&mut self, decoder: FrameDecoder) {
        self.decoder = Some(decoder);
    }

    pub fn take_decoder(&mut self) -> Option<FrameDecoder> {
        self.decoder.take()
    }

    /// SPDY/3 to SPDY/3.1
    pub fn upgrade(&mut self, version: Version) {
        self.version = Some(version);
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.upgrade(version);
        }
    }

    /// Whether a fatal error stopped the parser
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Bytes buffered but not yet parsed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn feed(&mut self, data: Bytes) {
        if !self.poisoned {
            self.buffer.push(data);
        }
    }

    fn fatal(&mut self, error: Error) -> ParseError {
        self.poisoned = true;
        ParseError::connection(error)
    }

    /// Next complete frame
    ///
    /// `Ok(None)` means more input (or a decoder) is needed. A stream
    /// scoped error leaves the parser usable; any other error poisons it.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        loop {
            if self.poisoned {
                return Ok(None);
            }

            match self.state {
                State::Preface => {
                    if self.buffer.len() < CONNECTION_PREFACE.len() {
                        return Ok(None);
                    }
                    let preface = self.buffer.take(CONNECTION_PREFACE.len());
                    if preface != CONNECTION_PREFACE {
                        return Err(self.fatal(Error::Protocol("invalid preface".into())));
                    }
                    trace!("preface received");
                    self.state = State::FrameHead;
                }
                State::FrameHead => {
                    let size = self.dialect.header_size();
                    if self.buffer.len() < size {
                        return Ok(None);
                    }
                    let raw = self.buffer.take(size);
                    let header = match self.decode_header(&raw) {
                        Ok(header) => header,
                        Err(e) => return Err(self.fatal(e)),
                    };
                    trace!(
                        frame_type = header.frame_type,
                        length = header.length,
                        stream_id = header.stream_id,
                        "frame head"
                    );
                    self.state = State::FrameBody(header);
                }
                State::FrameBody(header) => {
                    if self.decoder.is_none() || self.buffer.len() < header.length {
                        return Ok(None);
                    }
                    let body = self.buffer.take(header.length);
                    self.state = State::FrameHead;

                    let Some(decoder) = self.decoder.as_mut() else {
                        return Ok(None);
                    };
                    match decoder.decode(&header, body) {
                        Ok(Some(frame)) => return Ok(Some(frame)),
                        Ok(None) => continue,
                        Err(e) if e.is_stream_scoped() => return Err(e),
                        Err(e) => {
                            self.poisoned = true;
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn decode_header(&mut self, raw: &[u8]) -> Result<FrameHeader, Error> {
        match self.dialect {
            Dialect::Spdy => {
                let header = spdy::decode_header(raw)?;
                if header.control {
                    match self.version {
                        None => {
                            let version = Version::from_spdy_wire(header.version)
                                .ok_or(Error::UnsupportedVersion(header.version))?;
                            debug!(%version, "SPDY version detected");
                            self.version = Some(version);
                        }
                        Some(version) if version.wire() != header.version => {
                            debug!(
                                expected = version.wire(),
                                got = header.version,
                                "SPDY version mismatch"
                            );
                            return Err(Error::UnsupportedVersion(header.version));
                        }
                        Some(_) => {}
                    }
                }
                Ok(header)
            }
            Dialect::Http2 => {
                let header = http2::decode_header(raw)?;
                if header.length > self.max_frame_size {
                    return Err(Error::FrameSize(format!(
                        "frame of {} bytes exceeds {}",
                        header.length, self.max_frame_size
                    )));
                }
                Ok(header)
            }
        }
    }
}
