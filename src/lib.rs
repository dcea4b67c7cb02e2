//! spdy-mux - SPDY and HTTP/2 stream multiplexing
//!
//! This crate implements the transport layer shared by SPDY (versions 2,
//! 3 and 3.1) and HTTP/2: framing and header compression for each wire
//! dialect, an incremental parser, per-stream and per-connection flow
//! control, a priority scheduler for outbound frames, and the connection
//! state machine that ties them together.
//!
//! The core is sans-IO. A [`Connection`] consumes received bytes and
//! produces outbound bytes and [`Event`]s; [`Session`] drives one over a
//! blocking transport such as a `TcpStream`.
//!
//! ```no_run
//! use spdy_mux::{CompressionPool, ConnectionBuilder, Event, Session, Version};
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(CompressionPool::default());
//! let listener = TcpListener::bind("127.0.0.1:3000")?;
//! let (socket, _) = listener.accept()?;
//! let connection = ConnectionBuilder::new()
//!     .server()
//!     .version(Version::Spdy3)
//!     .build(pool);
//! let mut session = Session::from_tcp_stream(connection, socket)?;
//!
//! while let Some(event) = session.next_event()? {
//!     if let Event::Stream(request) = event {
//!         if let Some(mut stream) = session.connection_mut().stream(request.id) {
//!             stream.end_with("hello");
//!         }
//!     }
//! }
//! # Ok::<(), spdy_mux::Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod lock;
pub mod parser;
pub mod protocol;
pub mod scheduler;
pub mod stream;
pub mod transport;
pub mod window;

pub use config::{ConnectionBuilder, ConnectionConfig};
pub use connection::{
    Connection, Event, IncomingStream, PingId, RequestOptions, Response, StreamHandle,
};
pub use error::{Error, GoawayCode, ParseError, Result, RstCode, StreamId};
pub use headers::Headers;
pub use protocol::{CompressionPool, Dialect, Protocol, Settings, Version};
pub use scheduler::{Scheduler, Sink};
pub use stream::Stream;
pub use transport::Session;
