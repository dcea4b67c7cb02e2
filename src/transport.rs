//! Blocking transport driver
//!
//! [`Session`] couples a [`Connection`] with any `Read + Write` byte
//! stream: it flushes the scheduler into the transport, reads whatever
//! the peer sent, and hands out [`Event`]s one at a time. Plain TCP is
//! the common case; [`Session::connect`] and [`Session::from_tcp_stream`]
//! set that up with a read timeout that maps to [`Connection::on_timeout`].

use crate::connection::{Connection, Event};
use crate::error::{Error, Result};
use crate::scheduler::Sink;
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Bytes collected per write before the scheduler is paused
pub const HIGH_WATER_MARK: usize = 64 * 1024;

const READ_BUFFER: usize = 16 * 1024;

/// Default idle timeout for TCP sessions
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Collects scheduled chunks into one write, pushing back at the mark
#[derive(Debug)]
struct IoSink {
    buf: BytesMut,
    high_water: usize,
}

impl IoSink {
    fn new(high_water: usize) -> Self {
        IoSink {
            buf: BytesMut::new(),
            high_water,
        }
    }
}

impl Sink for IoSink {
    fn push(&mut self, chunk: Bytes) -> bool {
        self.buf.extend_from_slice(&chunk);
        self.buf.len() < self.high_water
    }
}

/// A connection driven over a blocking transport
#[derive(Debug)]
pub struct Session<T: Read + Write> {
    connection: Connection,
    transport: T,
    high_water: usize,
}

impl<T: Read + Write> Session<T> {
    pub fn new(connection: Connection, transport: T) -> Self {
        Session {
            connection,
            transport,
            high_water: HIGH_WATER_MARK,
        }
    }

    /// Bytes written per transport write before yielding to the scheduler
    pub fn set_high_water_mark(&mut self, size: usize) {
        self.high_water = size.max(1);
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write everything the scheduler holds
    pub fn flush(&mut self) -> Result<()> {
        loop {
            let mut sink = IoSink::new(self.high_water);
            let done = self.connection.tick(&mut sink);
            if !sink.buf.is_empty() {
                trace!(bytes = sink.buf.len(), "writing");
                if let Err(e) = self.transport.write_all(&sink.buf) {
                    self.connection.close_transport();
                    return Err(Error::Io(e));
                }
            }
            if done {
                break;
            }
            self.connection.on_drain();
        }
        self.transport.flush()?;
        Ok(())
    }

    /// Read once from the transport and feed the connection
    ///
    /// Returns the number of bytes read; 0 means the peer closed.
    pub fn read_once(&mut self) -> Result<usize> {
        let mut buf = vec![0u8; READ_BUFFER];
        match self.transport.read(&mut buf) {
            Ok(0) => {
                debug!("transport closed by peer");
                self.connection.close_transport();
                Ok(0)
            }
            Ok(n) => {
                buf.truncate(n);
                self.connection.receive(buf);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                debug!("transport idle timeout");
                self.connection.on_timeout();
                Ok(0)
            }
            Err(e) => {
                self.connection.close_transport();
                Err(Error::Io(e))
            }
        }
    }

    /// Next event, flushing and reading as needed
    ///
    /// Returns `None` once the connection is closed and every event has
    /// been handed out.
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            if let Some(event) = self.connection.poll_event() {
                return Ok(Some(event));
            }
            if self.connection.is_closed() {
                return Ok(None);
            }
            self.flush()?;
            self.read_once()?;
        }
    }

    /// Flush, then give back the connection and transport
    pub fn into_parts(mut self) -> Result<(Connection, T)> {
        self.flush()?;
        Ok((self.connection, self.transport))
    }
}

impl Session<TcpStream> {
    /// Drive a connection over an established TCP stream
    pub fn from_tcp_stream(connection: Connection, stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
        Ok(Session::new(connection, stream))
    }

    /// Connect to `addr` and drive `connection` over it
    pub fn connect<A: ToSocketAddrs>(addr: A, connection: Connection) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_tcp_stream(connection, stream)
    }

    /// Idle timeout; `None` waits forever
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.transport.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Close the socket and the connection
    pub fn shutdown(&mut self) -> Result<()> {
        self.flush()?;
        self.connection.close_transport();
        self.transport.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}
