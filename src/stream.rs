//! Stream state
//!
//! A stream is one logical exchange on a connection. It is created by a
//! stream-opening frame in either direction and owned by the
//! [`Connection`](crate::Connection), which routes frames to it and
//! destroys it once both directions are closed or it is reset.
//!
//! Each side closes independently: `closed_by_us` once our FIN (or
//! trailers) has been framed, `closed_by_them` once the peer's FIN
//! arrived. Writes that do not fit the send window wait in the send
//! buffer and are framed, in call order, as WINDOW_UPDATEs come in.

use crate::error::{Error, Result, RstCode, StreamId};
use crate::headers::Headers;
use crate::protocol::Framer;
use crate::scheduler::Scheduler;
use crate::window::{Side, Window};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::trace;

/// Queued outbound item
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Data { data: Bytes, fin: bool },
    /// Trailing headers; always end the stream
    Trailers(Headers),
}

/// Everything a stream needs to frame and queue its writes
pub(crate) struct Outbound<'a> {
    pub framer: &'a mut Framer,
    pub scheduler: &'a mut Scheduler,
    /// Connection send window, when the version has one
    pub connection: Option<&'a mut Side>,
    /// Largest DATA payload per frame
    pub max_chunk: usize,
}

/// One multiplexed stream
#[derive(Debug)]
pub struct Stream {
    id: StreamId,
    priority: u8,
    /// Opened by this side
    outgoing: bool,
    is_push: bool,
    parent: Option<StreamId>,
    children: Vec<StreamId>,

    pub(crate) method: Option<String>,
    pub(crate) path: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) headers: Headers,
    pub(crate) status: Option<u16>,
    pub(crate) reason: Option<String>,

    /// `None` for SPDY/2, which has no flow control
    pub(crate) window: Option<Window>,
    send_buffer: VecDeque<Outgoing>,

    pub(crate) closed_by_us: bool,
    pub(crate) closed_by_them: bool,
    /// `end()` or trailers queued, though maybe not framed yet
    pub(crate) end_requested: bool,
    pub(crate) headers_sent: bool,
    pub(crate) response_received: bool,
    /// Peer reset the stream or never saw it; we owe no RST
    pub(crate) peer_reset: bool,
    /// Code for the RST sent on destroy
    pub(crate) rst_code: Option<RstCode>,
    pub(crate) end_emitted: bool,
}

impl Stream {
    pub(crate) fn new(id: StreamId, priority: u8, outgoing: bool, window: Option<Window>) -> Self {
        Stream {
            id,
            priority,
            outgoing,
            is_push: false,
            parent: None,
            children: Vec::new(),
            method: None,
            path: None,
            host: None,
            headers: Headers::new(),
            status: None,
            reason: None,
            window,
            send_buffer: VecDeque::new(),
            closed_by_us: false,
            closed_by_them: false,
            end_requested: false,
            headers_sent: false,
            response_received: false,
            peer_reset: false,
            rst_code: None,
            end_emitted: false,
        }
    }

    /// Turn into a push stream associated with `parent`
    pub(crate) fn with_parent(mut self, parent: StreamId) -> Self {
        self.is_push = true;
        self.parent = Some(parent);
        self
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    /// Whether this side opened the stream
    pub fn is_outgoing(&self) -> bool {
        self.outgoing
    }

    pub fn is_push(&self) -> bool {
        self.is_push
    }

    /// Associated stream of a push
    pub fn parent(&self) -> Option<StreamId> {
        self.parent
    }

    /// Live pushes associated with this stream
    pub fn children(&self) -> &[StreamId] {
        &self.children
    }

    pub(crate) fn add_child(&mut self, id: StreamId) {
        self.children.push(id);
    }

    pub(crate) fn remove_child(&mut self, id: StreamId) {
        self.children.retain(|&child| child != id);
    }

    pub(crate) fn take_children(&mut self) -> Vec<StreamId> {
        std::mem::take(&mut self.children)
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Request headers for incoming streams, response headers otherwise
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// SPDY reason phrase of the response
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_closed_by_us(&self) -> bool {
        self.closed_by_us
    }

    pub fn is_closed_by_them(&self) -> bool {
        self.closed_by_them
    }

    /// Remaining send window, if the version has flow control
    pub fn send_window(&self) -> Option<i64> {
        self.window.as_ref().map(|w| w.send.current())
    }

    /// Remaining receive window, if the version has flow control
    pub fn recv_window(&self) -> Option<i64> {
        self.window.as_ref().map(|w| w.recv.current())
    }

    /// Payload bytes waiting for window
    pub fn buffered(&self) -> usize {
        self.send_buffer
            .iter()
            .map(|item| match item {
                Outgoing::Data { data, .. } => data.len(),
                Outgoing::Trailers(_) => 0,
            })
            .sum()
    }

    /// Whether a reply from the peer is still due: our requests and the
    /// peer's pushes get one
    pub(crate) fn expects_response(&self) -> bool {
        self.outgoing != self.is_push && !self.response_received
    }

    /// Both sides closed and nothing left to frame
    pub(crate) fn is_finished(&self) -> bool {
        self.closed_by_us && self.closed_by_them && self.send_buffer.is_empty()
    }

    pub(crate) fn queue(&mut self, item: Outgoing) {
        self.send_buffer.push_back(item);
    }

    /// Drop unsent writes, as after a reset
    pub(crate) fn clear_buffer(&mut self) {
        self.send_buffer.clear();
    }

    /// Account for `len` received payload bytes
    ///
    /// Returns the WINDOW_UPDATE delta to send once the receive window
    /// drained to its low-water mark.
    pub(crate) fn receive_data(&mut self, len: usize) -> Result<Option<u32>> {
        if self.closed_by_them {
            return Err(Error::Protocol(format!(
                "DATA on stream {} after it was half-closed",
                self.id
            )));
        }
        let Some(window) = self.window.as_mut() else {
            return Ok(None);
        };
        if !window.recv.has(len) {
            return Err(Error::FlowControl(format!(
                "{} bytes exceed receive window of stream {}",
                len, self.id
            )));
        }
        window.recv.consume(len);
        Ok(window.recv.restore())
    }

    /// Peer granted `delta` more bytes
    pub(crate) fn update_send_window(&mut self, delta: u32) -> Result<()> {
        match self.window.as_mut() {
            Some(window) => window.send.update(delta as i64),
            None => Ok(()),
        }
    }

    /// Peer changed its initial window size
    pub(crate) fn update_initial_window(&mut self, size: u32) -> Result<()> {
        match self.window.as_mut() {
            Some(window) => window.send.update_max(size),
            None => Ok(()),
        }
    }

    /// Frame as much of the send buffer as the windows allow
    ///
    /// Returns `true` when the buffer is empty afterwards.
    pub(crate) fn drain(&mut self, out: &mut Outbound<'_>) -> Result<bool> {
        while let Some(front) = self.send_buffer.front_mut() {
            match front {
                Outgoing::Trailers(headers) => {
                    let frame = out.framer.headers_frame(self.id, headers, true)?;
                    // Trailers follow our earlier DATA
                    out.scheduler.promote(self.id);
                    out.scheduler.schedule_sync(vec![frame]);
                    self.send_buffer.pop_front();
                    self.closed_by_us = true;
                }
                Outgoing::Data { data, fin } => {
                    let fin = *fin;
                    if data.is_empty() && !fin {
                        self.send_buffer.pop_front();
                        continue;
                    }

                    let mut allowed = data.len().min(out.max_chunk);
                    if let Some(window) = self.window.as_ref() {
                        allowed = allowed.min(window.send.available());
                    }
                    if let Some(connection) = out.connection.as_deref() {
                        allowed = allowed.min(connection.available());
                    }
                    if allowed == 0 && !data.is_empty() {
                        trace!(stream_id = self.id, pending = data.len(), "send window exhausted");
                        return Ok(false);
                    }

                    let chunk = data.split_to(allowed);
                    let last = data.is_empty();
                    let frame = out.framer.data_frame(self.id, &chunk, fin && last)?;
                    if let Some(window) = self.window.as_mut() {
                        window.send.consume(chunk.len());
                    }
                    if let Some(connection) = out.connection.as_deref_mut() {
                        connection.consume(chunk.len());
                    }
                    out.scheduler.schedule(self.id, self.priority, vec![frame]);

                    if last {
                        self.send_buffer.pop_front();
                        if fin {
                            self.closed_by_us = true;
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::compression::HeaderPair;
    use crate::protocol::frames::{DataFrame, Frame};
    use crate::protocol::{FrameDecoder, Version};
    use crate::parser::Parser;
    use crate::protocol::Protocol;

    fn framer(version: Version) -> Framer {
        Framer::new(version, HeaderPair::new(version, true).compressor)
    }

    fn decode(version: Version, out: Vec<Bytes>) -> Vec<Frame> {
        let mut parser = Parser::new(Protocol::new(version), false);
        parser.set_decoder(FrameDecoder::new(
            version,
            false,
            HeaderPair::new(version, true).decompressor,
        ));
        for chunk in out {
            parser.feed(chunk);
        }
        let mut frames = Vec::new();
        while let Some(frame) = parser.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn data_frames(frames: &[Frame]) -> Vec<(usize, bool)> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Data(DataFrame { data, fin, .. }) => Some((data.len(), *fin)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_drain_slices_to_max_chunk() {
        let mut framer = framer(Version::Spdy2);
        let mut scheduler = Scheduler::new();
        let mut stream = Stream::new(1, 3, true, None);

        stream.queue(Outgoing::Data {
            data: Bytes::from(vec![b'x'; 25]),
            fin: true,
        });
        let mut out = Outbound {
            framer: &mut framer,
            scheduler: &mut scheduler,
            connection: None,
            max_chunk: 10,
        };
        assert!(stream.drain(&mut out).unwrap());
        assert!(stream.is_closed_by_us());

        let frames = decode(Version::Spdy2, scheduler.take_all());
        assert_eq!(data_frames(&frames), vec![(10, false), (10, false), (5, true)]);
    }

    #[test]
    fn test_drain_blocks_on_window_and_resumes() {
        let mut framer = framer(Version::Spdy3);
        let mut scheduler = Scheduler::new();
        let mut stream = Stream::new(1, 0, true, Some(Window::new(100, 100)));

        stream.queue(Outgoing::Data {
            data: Bytes::from(vec![0u8; 150]),
            fin: false,
        });
        stream.queue(Outgoing::Data {
            data: Bytes::new(),
            fin: true,
        });

        {
            let mut out = Outbound {
                framer: &mut framer,
                scheduler: &mut scheduler,
                connection: None,
                max_chunk: 1024,
            };
            assert!(!stream.drain(&mut out).unwrap());
        }
        assert_eq!(stream.send_window(), Some(0));
        assert_eq!(stream.buffered(), 50);
        assert!(!stream.is_closed_by_us());

        stream.update_send_window(100).unwrap();
        let mut out = Outbound {
            framer: &mut framer,
            scheduler: &mut scheduler,
            connection: None,
            max_chunk: 1024,
        };
        assert!(stream.drain(&mut out).unwrap());
        assert!(stream.is_closed_by_us());
        assert_eq!(stream.send_window(), Some(50));

        let frames = decode(Version::Spdy3, scheduler.take_all());
        assert_eq!(data_frames(&frames), vec![(100, false), (50, false), (0, true)]);
    }

    #[test]
    fn test_connection_window_limits_send() {
        let mut framer = framer(Version::Spdy31);
        let mut scheduler = Scheduler::new();
        let mut connection = Side::new(30, 0);
        let mut stream = Stream::new(1, 0, true, Some(Window::new(100, 100)));

        stream.queue(Outgoing::Data {
            data: Bytes::from(vec![0u8; 50]),
            fin: true,
        });
        let mut out = Outbound {
            framer: &mut framer,
            scheduler: &mut scheduler,
            connection: Some(&mut connection),
            max_chunk: 1024,
        };
        assert!(!stream.drain(&mut out).unwrap());
        assert_eq!(connection.current(), 0);
        assert_eq!(stream.send_window(), Some(70));
    }

    #[test]
    fn test_receive_data_restores_once() {
        let mut stream = Stream::new(1, 0, false, Some(Window::new(8192, 8192)));
        assert_eq!(stream.receive_data(4000).unwrap(), None);
        assert_eq!(stream.receive_data(192).unwrap(), Some(4192));
        assert_eq!(stream.recv_window(), Some(8192));

        assert!(stream.receive_data(9000).is_err());

        stream.closed_by_them = true;
        let err = stream.receive_data(1).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_trailers_follow_data() {
        let mut framer = framer(Version::Spdy3);
        let mut scheduler = Scheduler::new();
        let mut stream = Stream::new(1, 0, true, Some(Window::new(4, 100)));

        stream.queue(Outgoing::Data {
            data: Bytes::from_static(b"abcdef"),
            fin: false,
        });
        stream.queue(Outgoing::Trailers(Headers::from([("x-checksum", "1")])));
        let mut out = Outbound {
            framer: &mut framer,
            scheduler: &mut scheduler,
            connection: None,
            max_chunk: 1024,
        };
        assert!(!stream.drain(&mut out).unwrap());
        assert!(!stream.is_closed_by_us());

        stream.update_send_window(10).unwrap();
        let mut out = Outbound {
            framer: &mut framer,
            scheduler: &mut scheduler,
            connection: None,
            max_chunk: 1024,
        };
        assert!(stream.drain(&mut out).unwrap());
        assert!(stream.is_closed_by_us());

        let frames = decode(Version::Spdy3, scheduler.take_all());
        assert_eq!(frames.len(), 3);
        match &frames[2] {
            Frame::Headers(h) => {
                assert!(h.fin);
                assert_eq!(h.headers.get("x-checksum"), Some("1"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_expects_response() {
        let request = Stream::new(1, 0, true, None);
        assert!(request.expects_response());

        let incoming = Stream::new(1, 0, false, None);
        assert!(!incoming.expects_response());

        let pushed = Stream::new(2, 0, false, None).with_parent(1);
        assert!(pushed.expects_response());
        assert_eq!(pushed.parent(), Some(1));
    }
}
