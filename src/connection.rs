//! Connection dispatcher
//!
//! A [`Connection`] is the sans-IO core of one multiplexed transport. The
//! driver feeds it received bytes with [`Connection::receive`], collects
//! outbound bytes with [`Connection::tick`] (or
//! [`Connection::take_output`]), and drains [`Event`]s with
//! [`Connection::poll_event`].
//!
//! Decoded frames are routed here: stream-opening frames create streams
//! (subject to parity, push, GOAWAY and concurrency checks), stream frames
//! go to the addressed stream, and SETTINGS, PING, GOAWAY and session
//! WINDOW_UPDATE frames are handled at the connection level.
//!
//! Control frames pass through a [`WriteLock`] that stays held while a
//! SPDY version is being negotiated, so anything requested before the
//! first control frame arrives goes out in request order afterwards.

use crate::config::ConnectionConfig;
use crate::error::{Error, GoawayCode, ParseError, RstCode, StreamId};
use crate::headers::Headers;
use crate::lock::WriteLock;
use crate::parser::Parser;
use crate::protocol::frames::{
    DataFrame, GoawayFrame, HeadersFrame, PingFrame, PushPromiseFrame, RstStreamFrame,
    SettingsFrame, WindowUpdateFrame,
};
use crate::protocol::{
    CompressionPool, Dialect, Frame, FrameDecoder, Framer, HeaderPair, HeadersKind, PushHead,
    RequestHead, ResponseHead, Settings, Version, CONNECTION_PREFACE, DEFAULT_PRIORITY,
    MAX_PRIORITY, MAX_STREAM_ID,
};
use crate::scheduler::{Scheduler, Sink};
use crate::stream::{Outbound, Outgoing, Stream};
use crate::window::{Side, Window};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Identifier of a locally issued PING
pub type PingId = u32;

/// Stream opened by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingStream {
    pub id: StreamId,
    pub method: String,
    pub path: String,
    /// `:authority` (`host` on SPDY)
    pub host: Option<String>,
    pub scheme: Option<String>,
    /// Regular headers; pseudo-headers are split out above
    pub headers: Headers,
    pub priority: u8,
    pub version: Version,
}

/// Response to one of our requests or to a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: StreamId,
    pub status: u16,
    /// SPDY reason phrase
    pub reason: Option<String>,
    pub headers: Headers,
}

/// Notification for the application
#[derive(Debug)]
pub enum Event {
    /// Peer opened a stream
    Stream(IncomingStream),
    /// Peer announced a push associated with `parent`
    Push {
        id: StreamId,
        parent: StreamId,
        path: String,
        headers: Headers,
    },
    /// Response headers arrived
    Response(Response),
    /// Additional headers on an open stream
    Trailers { id: StreamId, headers: Headers },
    Data { id: StreamId, data: Bytes },
    /// Peer finished sending on the stream
    End { id: StreamId },
    /// Stream failed; always followed by `StreamClosed`
    StreamError { id: StreamId, error: Error },
    StreamClosed { id: StreamId },
    /// Peer pinged us; the echo is already queued
    Ping { opaque: Bytes },
    /// One of our pings came back
    PingAck(PingId),
    Settings(Settings),
    GoAway { last_stream_id: StreamId, code: u32 },
    /// Fatal connection error, reported once
    Error(Error),
    /// Transport gone; every stream has been destroyed
    Closed,
}

/// Options for an outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
    pub scheme: Option<String>,
    pub headers: Headers,
    pub priority: u8,
    /// No request body follows
    pub end_stream: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            method: "GET".to_string(),
            path: "/".to_string(),
            host: None,
            scheme: None,
            headers: Headers::new(),
            priority: DEFAULT_PRIORITY,
            end_stream: false,
        }
    }
}

impl RequestOptions {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        RequestOptions {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    /// Send the request without a body
    pub fn end_stream(mut self) -> Self {
        self.end_stream = true;
        self
    }
}

/// Control frame waiting for the write lock
#[derive(Debug, Clone, PartialEq, Eq)]
enum ControlJob {
    Settings(Settings),
    SettingsAck,
    Ping { opaque: Bytes, ack: bool },
    Goaway { last_stream_id: StreamId, code: GoawayCode },
    WindowUpdate { id: StreamId, delta: u32 },
    Rst { id: StreamId, code: RstCode },
    XForwarded(String),
}

/// One multiplexed connection
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    pool: Arc<CompressionPool>,
    version: Option<Version>,
    /// Version the pooled header pair was checked out for
    pair_version: Option<Version>,
    parser: Parser,
    framer: Option<Framer>,
    scheduler: Scheduler,
    lock: WriteLock<ControlJob>,

    streams: BTreeMap<StreamId, Stream>,
    next_stream_id: StreamId,
    last_peer_id: StreamId,
    /// Live peer-initiated streams
    incoming: u32,
    /// Live push streams
    pushes: u32,

    next_ping_id: u32,
    pings: HashMap<Bytes, PingId>,

    /// Our GOAWAY watermark on peer streams
    goaway_sent: Option<StreamId>,
    /// Peer's GOAWAY watermark on our streams
    goaway_received: Option<StreamId>,

    /// Session window (SPDY/3.1, HTTP/2)
    window: Option<Window>,
    peer_initial_window: u32,
    peer_max_streams: Option<u32>,
    x_forwarded: Option<String>,

    events: VecDeque<Event>,
    failed: bool,
    closed: bool,
}

impl Connection {
    /// Create a connection; if the version is known the initial SETTINGS
    /// are queued right away
    pub fn new(config: ConnectionConfig, pool: Arc<CompressionPool>) -> Self {
        let protocol = config.protocol;
        let first_id = if config.is_server { 2 } else { 1 };
        let lock = match protocol.version {
            Some(_) => WriteLock::new(),
            None => WriteLock::held(),
        };

        let mut connection = Connection {
            parser: Parser::new(protocol, config.is_server),
            peer_initial_window: protocol.dialect.default_window(),
            config,
            pool,
            version: None,
            pair_version: None,
            framer: None,
            scheduler: Scheduler::new(),
            lock,
            streams: BTreeMap::new(),
            next_stream_id: first_id,
            last_peer_id: 0,
            incoming: 0,
            pushes: 0,
            next_ping_id: first_id,
            pings: HashMap::new(),
            goaway_sent: None,
            goaway_received: None,
            window: None,
            peer_max_streams: None,
            x_forwarded: None,
            events: VecDeque::new(),
            failed: false,
            closed: false,
        };
        if let Some(version) = protocol.version {
            connection.on_version(version);
        }
        connection
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn dialect(&self) -> Dialect {
        self.config.protocol.dialect
    }

    pub fn is_server(&self) -> bool {
        self.config.is_server
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Closed, timed out or failed
    pub fn is_closed(&self) -> bool {
        self.closed || self.failed
    }

    /// Live peer-initiated streams
    pub fn stream_count(&self) -> u32 {
        self.incoming
    }

    /// Live push streams
    pub fn push_count(&self) -> u32 {
        self.pushes
    }

    /// All live streams
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Host reported by an X_FORWARDED frame
    pub fn forwarded_for(&self) -> Option<&str> {
        self.x_forwarded.as_deref()
    }

    /// Peer's GOAWAY watermark, once received
    pub fn goaway_received(&self) -> Option<StreamId> {
        self.goaway_received
    }

    pub fn stream_info(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    /// Handle for acting on a live stream
    pub fn stream(&mut self, id: StreamId) -> Option<StreamHandle<'_>> {
        if self.streams.contains_key(&id) {
            Some(StreamHandle {
                connection: self,
                id,
            })
        } else {
            None
        }
    }

    /// Next pending event
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Whether a tick would write something
    pub fn wants_write(&self) -> bool {
        self.scheduler.needs_tick()
    }

    /// Bytes queued for the transport
    pub fn queued_bytes(&self) -> usize {
        self.scheduler.queued_bytes()
    }

    /// Flush queued frames into `sink`; `true` when everything was taken
    pub fn tick(&mut self, sink: &mut dyn Sink) -> bool {
        self.scheduler.tick(sink)
    }

    /// The sink accepts data again after refusing some
    pub fn on_drain(&mut self) {
        self.scheduler.on_drain();
    }

    /// Everything queued, in wire order
    pub fn take_output(&mut self) -> Vec<Bytes> {
        self.scheduler.take_all()
    }

    /// Feed bytes received from the transport
    pub fn receive(&mut self, data: impl Into<Bytes>) {
        if self.is_closed() {
            return;
        }
        self.parser.feed(data.into());
        self.process();
    }

    fn process(&mut self) {
        while !self.is_closed() {
            match self.parser.next_frame() {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => match self.parser.version() {
                    Some(version) if self.version.is_none() => self.on_version(version),
                    _ => break,
                },
                Err(err) => self.on_parse_error(err),
            }
        }
    }

    fn has_session_window(&self) -> bool {
        self.version.is_some_and(Version::has_session_window)
    }

    fn on_version(&mut self, version: Version) {
        debug!(%version, is_server = self.config.is_server, "version negotiated");
        let pair = self.pool.get(version);
        self.version = Some(version);
        self.pair_version = Some(version);
        self.framer = Some(Framer::new(version, pair.compressor));
        self.parser.set_decoder(FrameDecoder::new(
            version,
            self.config.is_server,
            pair.decompressor,
        ));

        if version == Version::Http2 && !self.config.is_server {
            self.scheduler
                .schedule_sync(vec![Bytes::from_static(CONNECTION_PREFACE)]);
        }

        let mut settings = Settings::new();
        settings.max_concurrent_streams = Some(self.config.max_streams);
        if version.has_flow_control() {
            settings.initial_window_size = Some(self.config.stream_window(version));
        }
        if version == Version::Http2 && !self.config.is_server && !self.config.enable_push {
            settings.enable_push = Some(0);
        }
        self.run_control(ControlJob::Settings(settings));

        if version.has_session_window() {
            self.open_session_window();
        }

        let mut next = self.lock.release();
        while let Some(job) = next {
            self.run_control(job);
            next = self.lock.release();
        }
    }

    /// SPDY/3 to SPDY/3.1
    fn upgrade(&mut self, version: Version) {
        debug!(%version, "upgrading session");
        self.version = Some(version);
        if let Some(framer) = self.framer.as_mut() {
            framer.upgrade(version);
        }
        self.parser.upgrade(version);
        if self.window.is_none() {
            self.open_session_window();
        }
    }

    /// Session receive window starts at the protocol default; raise it
    /// to the configured size
    fn open_session_window(&mut self) {
        let default = self.dialect().default_window();
        let size = self.config.window_size;
        let mut recv = Side::new(size, size / 2);
        recv.set_current(default);
        let mut window = Window {
            send: Side::new(default, 0),
            recv,
        };
        let delta = window.recv.restore();
        self.window = Some(window);
        if let Some(delta) = delta {
            self.run_control(ControlJob::WindowUpdate { id: 0, delta });
        }
    }

    /// Queue a control frame behind the write lock
    fn control(&mut self, job: ControlJob) {
        let Some(job) = self.lock.acquire(job) else {
            trace!(waiting = self.lock.waiting(), "control frame deferred");
            return;
        };
        self.run_control(job);
        let mut next = self.lock.release();
        while let Some(job) = next {
            self.run_control(job);
            next = self.lock.release();
        }
    }

    fn run_control(&mut self, job: ControlJob) {
        let Some(framer) = self.framer.as_mut() else {
            debug!(?job, "control frame dropped without a version");
            return;
        };
        let dialect = framer.version().dialect();
        let frame = match job {
            ControlJob::Settings(settings) => framer.settings_frame(&settings),
            ControlJob::SettingsAck => match framer.settings_ack_frame() {
                Some(frame) => frame,
                None => return,
            },
            ControlJob::Ping { opaque, ack } => framer.ping_frame(&opaque, ack),
            ControlJob::Goaway {
                last_stream_id,
                code,
            } => framer.goaway_frame(last_stream_id, code.to_wire(dialect)),
            ControlJob::WindowUpdate { id, delta } => framer.window_update_frame(id, delta),
            ControlJob::Rst { id, code } => {
                debug!(stream_id = id, %code, "RST_STREAM sent");
                framer.rst_frame(id, code)
            }
            ControlJob::XForwarded(host) => match framer.x_forwarded_frame(&host) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(%error, "X_FORWARDED not sent");
                    return;
                }
            },
        };
        self.scheduler.schedule_sync(vec![frame]);
    }

    fn on_parse_error(&mut self, err: ParseError) {
        match err.stream_id {
            Some(id) if id != 0 => {
                warn!(stream_id = id, error = %err.error, "stream error");
                let code = err.error.rst_code();
                if self.streams.contains_key(&id) {
                    self.destroy_stream(id, Some(code), Some(err.error));
                } else {
                    self.control(ControlJob::Rst { id, code });
                }
            }
            _ => self.fail(err.error),
        }
    }

    /// Fatal error: GOAWAY(PROTOCOL_ERROR), one error event, stop parsing
    fn fail(&mut self, error: Error) {
        if self.failed {
            return;
        }
        warn!(%error, "connection failed");
        self.run_control(ControlJob::Goaway {
            last_stream_id: self.last_peer_id,
            code: GoawayCode::ProtocolError,
        });
        self.failed = true;
        self.pings.clear();
        self.events.push_back(Event::Error(error));
    }

    fn handle_frame(&mut self, frame: Frame) {
        trace!(frame = frame.name(), stream_id = ?frame.stream_id(), "frame received");
        match frame {
            Frame::Headers(f) => self.on_headers(f),
            Frame::PushPromise(f) => self.on_push(f),
            Frame::Data(f) => self.on_data(f),
            Frame::RstStream(f) => self.on_rst(f),
            Frame::Settings(f) => self.on_settings(f),
            Frame::Ping(f) => self.on_ping(f),
            Frame::Goaway(f) => self.on_goaway(f),
            Frame::WindowUpdate(f) => self.on_window_update(f),
            Frame::Priority(f) => {
                if let Some(stream) = self.streams.get_mut(&f.stream_id) {
                    stream.set_priority(crate::protocol::http2::weight_to_priority(
                        f.priority.weight,
                    ));
                }
            }
            Frame::XForwarded(host) => {
                debug!(%host, "X_FORWARDED");
                self.x_forwarded = Some(host);
            }
            Frame::Noop => trace!("NOOP"),
            Frame::Unknown(frame_type) => debug!(frame_type, "ignoring unknown frame"),
        }
    }

    fn on_headers(&mut self, f: HeadersFrame) {
        match f.kind {
            HeadersKind::Request => self.on_request(f),
            HeadersKind::Reply => self.on_reply(f),
            HeadersKind::Headers if self.dialect() == Dialect::Http2 => {
                let (known, expects_response) = match self.streams.get(&f.stream_id) {
                    Some(stream) => (true, stream.expects_response()),
                    None => (false, false),
                };
                if !known {
                    self.on_request(f);
                } else if expects_response {
                    self.on_reply(f);
                } else {
                    self.on_trailers(f);
                }
            }
            HeadersKind::Headers => self.on_trailers(f),
        }
    }

    /// RST code for a peer stream that may not be opened, if any
    fn check_incoming(&self, id: StreamId, parent: Option<StreamId>) -> Option<RstCode> {
        if self.goaway_sent.is_some_and(|last| id > last) {
            return Some(RstCode::RefusedStream);
        }
        let peer_parity = if self.config.is_server { 1 } else { 0 };
        let is_push = parent.is_some();
        if id == 0
            || id % 2 != peer_parity
            || is_push == self.config.is_server
            || (is_push && !self.config.enable_push)
        {
            return Some(RstCode::ProtocolError);
        }
        if let Some(parent) = parent {
            if !self.streams.contains_key(&parent) {
                return Some(RstCode::InvalidStream);
            }
        }
        if self.incoming >= self.config.max_streams {
            return Some(RstCode::RefusedStream);
        }
        if id <= self.last_peer_id {
            return Some(RstCode::ProtocolError);
        }
        None
    }

    fn refuse(&mut self, id: StreamId, code: RstCode) {
        debug!(stream_id = id, %code, "stream refused");
        self.control(ControlJob::Rst { id, code });
    }

    fn new_window(&self, version: Version) -> Option<Window> {
        version.has_flow_control().then(|| {
            Window::new(self.peer_initial_window, self.config.stream_window(version))
        })
    }

    fn on_request(&mut self, f: HeadersFrame) {
        let id = f.stream_id;
        let Some(version) = self.version else {
            return;
        };
        if let Some(code) = self.check_incoming(id, None) {
            self.refuse(id, code);
            return;
        }

        let mut headers = f.headers;
        let (Some(method), Some(path)) = (headers.take(":method"), headers.take(":path")) else {
            self.last_peer_id = id;
            self.refuse(id, RstCode::ProtocolError);
            return;
        };
        let host = headers.take(":authority");
        let scheme = headers.take(":scheme");
        let headers: Headers = headers.regular().collect();
        let priority = f.priority.min(MAX_PRIORITY);

        let mut stream = Stream::new(id, priority, false, self.new_window(version));
        stream.method = Some(method.clone());
        stream.path = Some(path.clone());
        stream.host = host.clone();
        stream.headers = headers.clone();
        self.streams.insert(id, stream);
        self.last_peer_id = id;
        self.incoming += 1;

        debug!(stream_id = id, %method, %path, "stream opened");
        self.events.push_back(Event::Stream(IncomingStream {
            id,
            method,
            path,
            host,
            scheme,
            headers,
            priority,
            version,
        }));

        if f.fin {
            self.on_fin(id);
        }
    }

    fn on_push(&mut self, f: PushPromiseFrame) {
        let id = f.promised_id;
        let parent = f.stream_id;
        let Some(version) = self.version else {
            return;
        };
        if let Some(code) = self.check_incoming(id, Some(parent)) {
            self.refuse(id, code);
            return;
        }

        let mut headers = f.headers;
        let method = headers.take(":method");
        let path = headers.take(":path").unwrap_or_default();
        let host = headers.take(":authority");
        let status = headers.take(":status").and_then(|s| parse_status(&s));
        let headers: Headers = headers.regular().collect();

        let mut stream =
            Stream::new(id, f.priority.min(MAX_PRIORITY), false, self.new_window(version))
                .with_parent(parent);
        // Pushes are unidirectional
        stream.closed_by_us = true;
        stream.method = method;
        stream.path = Some(path.clone());
        stream.host = host;
        if let Some((code, reason)) = &status {
            stream.response_received = true;
            stream.status = Some(*code);
            stream.reason = reason.clone();
        }
        self.streams.insert(id, stream);
        if let Some(parent_stream) = self.streams.get_mut(&parent) {
            parent_stream.add_child(id);
        }
        self.last_peer_id = id;
        self.incoming += 1;
        self.pushes += 1;

        debug!(stream_id = id, parent, %path, "push received");
        self.events.push_back(Event::Push {
            id,
            parent,
            path,
            headers: headers.clone(),
        });
        if let Some((status, reason)) = status {
            self.events.push_back(Event::Response(Response {
                id,
                status,
                reason,
                headers,
            }));
        }

        if f.fin {
            self.on_fin(id);
        }
    }

    fn on_reply(&mut self, f: HeadersFrame) {
        let id = f.stream_id;
        let expects_response = match self.streams.get(&id) {
            Some(stream) => stream.expects_response(),
            None => {
                self.refuse(id, RstCode::InvalidStream);
                return;
            }
        };
        if !expects_response {
            let error = Error::Protocol(format!("unexpected reply on stream {}", id));
            self.destroy_stream(id, Some(RstCode::ProtocolError), Some(error));
            return;
        }

        let mut headers = f.headers;
        let Some((status, reason)) = headers.take(":status").and_then(|s| parse_status(&s)) else {
            let error = Error::Protocol(format!("reply on stream {} without status", id));
            self.destroy_stream(id, Some(RstCode::ProtocolError), Some(error));
            return;
        };
        let headers: Headers = headers.regular().collect();

        if let Some(stream) = self.streams.get_mut(&id) {
            stream.response_received = true;
            stream.status = Some(status);
            stream.reason = reason.clone();
            stream.headers = headers.clone();
        }
        trace!(stream_id = id, status, "response received");
        self.events.push_back(Event::Response(Response {
            id,
            status,
            reason,
            headers,
        }));

        if f.fin {
            self.on_fin(id);
        }
    }

    fn on_trailers(&mut self, f: HeadersFrame) {
        let id = f.stream_id;
        let closed_by_them = match self.streams.get(&id) {
            Some(stream) => stream.closed_by_them,
            None => {
                self.refuse(id, RstCode::InvalidStream);
                return;
            }
        };
        if closed_by_them {
            let error = Error::Protocol(format!("HEADERS on stream {} after FIN", id));
            self.destroy_stream(id, Some(RstCode::ProtocolError), Some(error));
            return;
        }

        self.events.push_back(Event::Trailers {
            id,
            headers: f.headers,
        });
        if f.fin {
            self.on_fin(id);
        }
    }

    fn on_data(&mut self, f: DataFrame) {
        let id = f.stream_id;
        let len = f.data.len();
        if id == 0 {
            self.fail(Error::Protocol("DATA on stream 0".to_string()));
            return;
        }
        // The peer charges every DATA frame to the session window, even
        // one racing our RST
        if !self.receive_session_data(len) {
            return;
        }

        let Some(stream) = self.streams.get_mut(&id) else {
            self.refuse(id, RstCode::InvalidStream);
            return;
        };
        let restore = match stream.receive_data(len) {
            Ok(restore) => restore,
            Err(error) => {
                let code = error.rst_code();
                self.destroy_stream(id, Some(code), Some(error));
                return;
            }
        };
        if let Some(delta) = restore {
            self.control(ControlJob::WindowUpdate { id, delta });
        }

        if !f.data.is_empty() {
            self.events.push_back(Event::Data { id, data: f.data });
        }
        if f.fin {
            self.on_fin(id);
        }
    }

    /// Charge `len` received bytes to the session window; `false` when
    /// the peer overran it and the connection failed
    fn receive_session_data(&mut self, len: usize) -> bool {
        if !self.has_session_window() {
            return true;
        }
        let Some(window) = self.window.as_mut() else {
            return true;
        };
        if !window.recv.has(len) {
            self.fail(Error::FlowControl(format!(
                "{} bytes exceed the connection receive window",
                len
            )));
            return false;
        }
        window.recv.consume(len);
        if let Some(delta) = window.recv.restore() {
            self.control(ControlJob::WindowUpdate { id: 0, delta });
        }
        true
    }

    /// Peer half-closed the stream
    fn on_fin(&mut self, id: StreamId) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if stream.closed_by_them {
            let error = Error::Protocol(format!("second FIN on stream {}", id));
            self.destroy_stream(id, Some(RstCode::ProtocolError), Some(error));
            return;
        }
        stream.closed_by_them = true;
        stream.end_emitted = true;
        self.events.push_back(Event::End { id });
        self.maybe_finalize(id);
    }

    fn maybe_finalize(&mut self, id: StreamId) {
        if self.streams.get(&id).is_some_and(Stream::is_finished) {
            self.destroy_stream(id, None, None);
        }
    }

    fn on_rst(&mut self, f: RstStreamFrame) {
        let id = f.stream_id;
        let code = RstCode::from_wire(self.dialect(), f.code);
        let Some(stream) = self.streams.get_mut(&id) else {
            trace!(stream_id = id, %code, "RST_STREAM for unknown stream ignored");
            return;
        };
        debug!(stream_id = id, %code, "RST_STREAM received");
        stream.closed_by_us = true;
        stream.closed_by_them = true;
        stream.peer_reset = true;
        stream.clear_buffer();

        for child in stream.take_children() {
            self.destroy_stream(child, Some(RstCode::Cancel), None);
        }

        let error = match code {
            RstCode::Cancel | RstCode::NoError => None,
            RstCode::RefusedStream => Some(Error::Refused(id)),
            code => Some(Error::Reset { id, code }),
        };
        self.destroy_stream(id, None, error);
    }

    fn on_settings(&mut self, f: SettingsFrame) {
        if f.ack {
            trace!("SETTINGS acknowledged");
            return;
        }
        let settings = f.settings;
        debug!(?settings, "SETTINGS received");
        if let Err(error) = settings.validate() {
            self.fail(error);
            return;
        }

        if let Some(max) = settings.max_concurrent_streams {
            self.peer_max_streams = Some(max);
        }
        if let Some(size) = settings.max_frame_size {
            if let Some(framer) = self.framer.as_mut() {
                framer.set_max_frame_size(size as usize);
            }
        }
        if self.dialect() == Dialect::Http2 {
            self.control(ControlJob::SettingsAck);
        }

        let flow_control = self.version.is_some_and(Version::has_flow_control);
        if let (Some(size), true) = (settings.initial_window_size, flow_control) {
            self.peer_initial_window = size;
            let ids: Vec<StreamId> = self.streams.keys().copied().collect();
            for id in ids {
                let result = self
                    .streams
                    .get_mut(&id)
                    .map(|stream| stream.update_initial_window(size));
                if let Some(Err(error)) = result {
                    self.destroy_stream(id, Some(RstCode::FlowControlError), Some(error));
                }
            }
            self.drain_all();
        }

        self.events.push_back(Event::Settings(settings));
    }

    fn on_ping(&mut self, f: PingFrame) {
        if !f.ack {
            trace!("PING received");
            self.control(ControlJob::Ping {
                opaque: f.opaque.clone(),
                ack: true,
            });
            self.events.push_back(Event::Ping { opaque: f.opaque });
        } else if let Some(id) = self.pings.remove(&f.opaque) {
            trace!(ping_id = id, "PING acknowledged");
            self.events.push_back(Event::PingAck(id));
        }
    }

    fn on_goaway(&mut self, f: GoawayFrame) {
        debug!(last_stream_id = f.last_stream_id, code = f.code, "GOAWAY received");
        self.goaway_received = Some(f.last_stream_id);

        let refused: Vec<StreamId> = self
            .streams
            .values()
            .filter(|s| s.is_outgoing() && s.id() > f.last_stream_id)
            .map(Stream::id)
            .collect();
        for id in refused {
            if let Some(stream) = self.streams.get_mut(&id) {
                stream.peer_reset = true;
            }
            self.destroy_stream(id, None, Some(Error::Refused(id)));
        }

        self.events.push_back(Event::GoAway {
            last_stream_id: f.last_stream_id,
            code: f.code,
        });
    }

    fn on_window_update(&mut self, f: WindowUpdateFrame) {
        if f.stream_id == 0 {
            if self.version == Some(Version::Spdy3) && self.config.auto_spdy31 {
                self.upgrade(Version::Spdy31);
            }
            if !self.has_session_window() {
                trace!("session WINDOW_UPDATE ignored");
                return;
            }
            let result = match self.window.as_mut() {
                Some(window) => window.send.update(f.delta as i64),
                None => Ok(()),
            };
            match result {
                Ok(()) => self.drain_all(),
                Err(error) => self.fail(error),
            }
            return;
        }

        let id = f.stream_id;
        let Some(stream) = self.streams.get_mut(&id) else {
            trace!(stream_id = id, "WINDOW_UPDATE for unknown stream ignored");
            return;
        };
        match stream.update_send_window(f.delta) {
            Ok(()) => self.drain_stream(id),
            Err(error) => self.destroy_stream(id, Some(RstCode::FlowControlError), Some(error)),
        }
    }

    /// Frame whatever the windows now allow for one stream
    fn drain_stream(&mut self, id: StreamId) {
        let session = self.has_session_window();
        let Some(framer) = self.framer.as_mut() else {
            return;
        };
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        let max_chunk = self.config.max_chunk.min(framer.max_frame_size()).max(1);
        let connection = match self.window.as_mut() {
            Some(window) if session => Some(&mut window.send),
            _ => None,
        };
        let mut out = Outbound {
            framer,
            scheduler: &mut self.scheduler,
            connection,
            max_chunk,
        };
        match stream.drain(&mut out) {
            Ok(_) => self.maybe_finalize(id),
            Err(error) => {
                warn!(stream_id = id, %error, "framing failed");
                self.destroy_stream(id, Some(RstCode::InternalError), Some(error));
            }
        }
    }

    fn drain_all(&mut self) {
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            self.drain_stream(id);
        }
    }

    /// Remove a stream, sending an RST unless it closed cleanly on our
    /// side or the peer already reset it
    fn destroy_stream(&mut self, id: StreamId, rst: Option<RstCode>, error: Option<Error>) {
        let Some(mut stream) = self.streams.remove(&id) else {
            return;
        };
        if rst.is_some() {
            stream.rst_code = rst;
        }

        let alive = !self.closed && !self.failed;
        if alive && !stream.peer_reset && (stream.rst_code.is_some() || !stream.closed_by_us) {
            let code = stream.rst_code.unwrap_or(RstCode::InternalError);
            self.control(ControlJob::Rst { id, code });
        }

        if !stream.is_outgoing() {
            self.incoming = self.incoming.saturating_sub(1);
        }
        if stream.is_push() {
            self.pushes = self.pushes.saturating_sub(1);
        }
        if let Some(parent) = stream.parent() {
            if let Some(parent) = self.streams.get_mut(&parent) {
                parent.remove_child(id);
            }
        }

        debug!(stream_id = id, error = ?error, "stream destroyed");
        if !stream.end_emitted {
            self.events.push_back(Event::End { id });
        }
        if let Some(error) = error {
            self.events.push_back(Event::StreamError { id, error });
        }
        self.events.push_back(Event::StreamClosed { id });
    }

    /// Open an outbound request stream
    ///
    /// Returns `None` without touching the wire when the stream may not
    /// be opened: server role, unknown version, after GOAWAY, or at the
    /// peer's concurrency limit.
    pub fn request(&mut self, options: RequestOptions) -> Option<StreamId> {
        if self.config.is_server || self.is_closed() || self.goaway_received.is_some() {
            return None;
        }
        let version = self.version?;
        if let Some(max) = self.peer_max_streams {
            let open = self
                .streams
                .values()
                .filter(|s| s.is_outgoing() && !s.is_push())
                .count();
            if open >= max as usize {
                debug!(max, "request refused by peer stream limit");
                return None;
            }
        }
        let id = self.next_stream_id;
        if id > MAX_STREAM_ID {
            return None;
        }

        let priority = options.priority.min(MAX_PRIORITY);
        let head = RequestHead {
            id,
            priority,
            method: options.method.clone(),
            path: options.path.clone(),
            host: options.host.clone(),
            scheme: options.scheme,
            headers: options.headers,
            fin: options.end_stream,
        };
        let window = self.new_window(version);
        let framer = self.framer.as_mut()?;
        let frame = match framer.request_frame(&head) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "request not sent");
                return None;
            }
        };
        self.next_stream_id += 2;
        self.scheduler.schedule_sync(vec![frame]);

        let mut stream = Stream::new(id, priority, true, window);
        stream.method = Some(options.method);
        stream.path = Some(options.path);
        stream.host = options.host;
        stream.headers_sent = true;
        if options.end_stream {
            stream.closed_by_us = true;
            stream.end_requested = true;
        }
        self.streams.insert(id, stream);
        debug!(stream_id = id, "request opened");
        Some(id)
    }

    /// Issue a PING; the matching [`Event::PingAck`] carries the same id
    pub fn ping(&mut self) -> PingId {
        let id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(2);
        let opaque = match self.dialect() {
            Dialect::Spdy => Bytes::copy_from_slice(&id.to_be_bytes()),
            Dialect::Http2 => {
                let mut payload = [0u8; 8];
                payload[4..].copy_from_slice(&id.to_be_bytes());
                Bytes::copy_from_slice(&payload)
            }
        };
        self.pings.insert(opaque.clone(), id);
        self.control(ControlJob::Ping { opaque, ack: false });
        id
    }

    /// Graceful shutdown: no peer streams above the current one are
    /// accepted from now on
    pub fn goaway(&mut self) {
        let last_stream_id = self.last_peer_id;
        debug!(last_stream_id, "GOAWAY sent");
        self.goaway_sent = Some(last_stream_id);
        self.control(ControlJob::Goaway {
            last_stream_id,
            code: GoawayCode::Ok,
        });
    }

    /// Tell the peer which client this connection forwards
    pub fn send_forwarded_for(&mut self, host: impl Into<String>) {
        self.control(ControlJob::XForwarded(host.into()));
    }

    /// The transport closed underneath us
    pub fn close_transport(&mut self) {
        self.shutdown(|| Error::Hangup);
    }

    /// The idle timer fired
    pub fn on_timeout(&mut self) {
        self.shutdown(|| Error::Timeout);
    }

    fn shutdown(&mut self, error: fn() -> Error) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pings.clear();
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        debug!(streams = ids.len(), "connection closed");
        for id in ids {
            self.destroy_stream(id, None, Some(error()));
        }
        self.release_pair();
        self.events.push_back(Event::Closed);
    }

    /// Hand the header contexts back to the pool
    fn release_pair(&mut self) {
        let (Some(framer), Some(decoder), Some(version)) =
            (self.framer.take(), self.parser.take_decoder(), self.pair_version)
        else {
            return;
        };
        self.pool.put(HeaderPair {
            version,
            compressor: framer.into_compressor(),
            decompressor: decoder.into_decompressor(),
        });
    }

    fn writable(&self, id: StreamId) -> bool {
        if self.is_closed() || self.framer.is_none() {
            return false;
        }
        let Some(stream) = self.streams.get(&id) else {
            return false;
        };
        if stream.closed_by_us || stream.end_requested {
            return false;
        }
        !(stream.is_outgoing() && self.goaway_received.is_some_and(|last| id > last))
    }

    fn needs_response(&self, id: StreamId) -> bool {
        self.streams
            .get(&id)
            .is_some_and(|s| !s.is_outgoing() && !s.headers_sent)
    }

    fn respond_stream(&mut self, id: StreamId, status: u16, headers: Headers, fin: bool) -> bool {
        if !self.writable(id) || !self.needs_response(id) {
            return false;
        }
        let Some(framer) = self.framer.as_mut() else {
            return false;
        };
        let Some(stream) = self.streams.get_mut(&id) else {
            return false;
        };
        let head = ResponseHead {
            id,
            status,
            reason: None,
            headers,
            fin,
        };
        match framer.response_frame(&head) {
            Ok(frame) => {
                self.scheduler.schedule_sync(vec![frame]);
                stream.headers_sent = true;
                if fin {
                    stream.closed_by_us = true;
                    stream.end_requested = true;
                }
            }
            Err(error) => {
                self.destroy_stream(id, Some(RstCode::InternalError), Some(error));
                return false;
            }
        }
        if fin {
            self.maybe_finalize(id);
        }
        true
    }

    fn write_stream(&mut self, id: StreamId, data: Bytes) -> bool {
        if !self.writable(id) {
            return false;
        }
        if self.needs_response(id) && !self.respond_stream(id, 200, Headers::new(), false) {
            return false;
        }
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.queue(Outgoing::Data { data, fin: false });
        }
        self.drain_stream(id);
        self.streams.get(&id).is_some_and(|s| s.buffered() == 0)
    }

    fn end_stream(&mut self, id: StreamId, data: Bytes) {
        if !self.writable(id) {
            return;
        }
        if self.needs_response(id) {
            if data.is_empty() {
                self.respond_stream(id, 200, Headers::new(), true);
                return;
            }
            if !self.respond_stream(id, 200, Headers::new(), false) {
                return;
            }
        }
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.end_requested = true;
            stream.queue(Outgoing::Data { data, fin: true });
        }
        self.drain_stream(id);
    }

    fn trailers_stream(&mut self, id: StreamId, headers: Headers) -> bool {
        if !self.writable(id) {
            return false;
        }
        if self.needs_response(id) && !self.respond_stream(id, 200, Headers::new(), false) {
            return false;
        }
        if let Some(stream) = self.streams.get_mut(&id) {
            stream.end_requested = true;
            stream.queue(Outgoing::Trailers(headers));
        }
        self.drain_stream(id);
        true
    }

    fn push_stream(&mut self, parent: StreamId, path: String, headers: Headers) -> Option<StreamId> {
        if !self.config.is_server
            || !self.config.enable_push
            || self.goaway_received.is_some()
            || !self.writable(parent)
        {
            return None;
        }
        let version = self.version?;
        let parent_stream = self.streams.get(&parent)?;
        if parent_stream.is_outgoing() {
            return None;
        }
        let priority = parent_stream.priority();
        let host = parent_stream.host.clone();
        let id = self.next_stream_id;
        if id > MAX_STREAM_ID {
            return None;
        }

        let head = PushHead {
            id,
            parent,
            priority,
            method: "GET".to_string(),
            path: path.clone(),
            host: host.clone(),
            scheme: None,
            status: 200,
            headers: headers.clone(),
        };
        let window = self.new_window(version);
        let framer = self.framer.as_mut()?;
        let frames = match framer.push_frame(&head) {
            Ok(frames) => frames,
            Err(error) => {
                warn!(%error, "push not sent");
                return None;
            }
        };
        self.next_stream_id += 2;
        self.scheduler.schedule_sync(frames);

        let mut stream = Stream::new(id, priority, true, window).with_parent(parent);
        stream.method = Some(head.method);
        stream.path = Some(path);
        stream.host = host;
        stream.headers = headers;
        stream.status = Some(200);
        stream.headers_sent = true;
        // The peer never sends on a push
        stream.closed_by_them = true;
        stream.end_emitted = true;
        self.streams.insert(id, stream);
        if let Some(parent_stream) = self.streams.get_mut(&parent) {
            parent_stream.add_child(id);
        }
        self.pushes += 1;
        debug!(stream_id = id, parent, "push opened");
        Some(id)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release_pair();
    }
}

/// `"200 OK"` or `"200"`
fn parse_status(value: &str) -> Option<(u16, Option<String>)> {
    let (code, reason) = match value.split_once(' ') {
        Some((code, reason)) => (code, Some(reason.trim().to_string())),
        None => (value, None),
    };
    let code = code.trim().parse().ok()?;
    Some((code, reason.filter(|r| !r.is_empty())))
}

/// Mutable access to one stream of a connection
#[derive(Debug)]
pub struct StreamHandle<'a> {
    connection: &'a mut Connection,
    id: StreamId,
}

impl StreamHandle<'_> {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn info(&self) -> Option<&Stream> {
        self.connection.stream_info(self.id)
    }

    /// Queue body data
    ///
    /// Returns `false` when the data could not be framed entirely because
    /// the send window is exhausted, or when the stream no longer accepts
    /// writes (the data is then dropped).
    pub fn write(&mut self, data: impl Into<Bytes>) -> bool {
        self.connection.write_stream(self.id, data.into())
    }

    /// Finish our side of the stream
    pub fn end(&mut self) {
        self.connection.end_stream(self.id, Bytes::new());
    }

    /// Write a last chunk and finish our side
    pub fn end_with(&mut self, data: impl Into<Bytes>) {
        self.connection.end_stream(self.id, data.into());
    }

    /// Send response headers on a peer-initiated stream
    pub fn respond(&mut self, status: u16, headers: Headers) -> bool {
        self.connection.respond_stream(self.id, status, headers, false)
    }

    /// Announce a push associated with this stream
    pub fn push(&mut self, path: impl Into<String>, headers: Headers) -> Option<StreamId> {
        self.connection.push_stream(self.id, path.into(), headers)
    }

    /// Queue trailing headers after any buffered data; ends our side
    pub fn send_trailers(&mut self, headers: Headers) -> bool {
        self.connection.trailers_stream(self.id, headers)
    }

    /// Cancel the stream (RST CANCEL)
    pub fn abort(self) {
        self.connection
            .destroy_stream(self.id, Some(RstCode::Cancel), None);
    }

    /// Tear the stream down; unfinished streams are reset
    pub fn destroy(self) {
        self.connection.destroy_stream(self.id, None, None);
    }
}
