//! Connection configuration
//!
//! [`ConnectionConfig`] holds the per-connection options;
//! [`ConnectionBuilder`] is the fluent way to fill one in and turn it into
//! a [`Connection`].

use crate::connection::Connection;
use crate::protocol::{CompressionPool, Protocol, Version};
use std::sync::Arc;

/// Default limit on concurrently open peer-initiated streams
pub const DEFAULT_MAX_STREAMS: u32 = 100;

/// Default connection receive window (1 MiB)
pub const DEFAULT_WINDOW_SIZE: u32 = 1 << 20;

/// Default DATA slicing unit (8 KiB)
pub const DEFAULT_MAX_CHUNK: usize = 8 * 1024;

/// Options for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server role: accepts requests, initiates pushes, uses even ids
    pub is_server: bool,
    /// Negotiated dialect and, if already known, version
    pub protocol: Protocol,
    /// Peer-initiated streams allowed at once; more are refused
    pub max_streams: u32,
    /// Connection-level receive window (SPDY/3.1, HTTP/2)
    pub window_size: u32,
    /// Stream receive window we advertise; the dialect default when `None`
    pub stream_window_size: Option<u32>,
    /// Largest DATA payload per frame
    pub max_chunk: usize,
    /// Accept and send server pushes
    pub enable_push: bool,
    /// Switch SPDY/3 to 3.1 when the peer uses the session window
    pub auto_spdy31: bool,
    /// Compress SPDY header blocks (stored blocks when off)
    pub header_compression: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            is_server: true,
            protocol: Protocol::new(Version::Spdy3),
            max_streams: DEFAULT_MAX_STREAMS,
            window_size: DEFAULT_WINDOW_SIZE,
            stream_window_size: None,
            max_chunk: DEFAULT_MAX_CHUNK,
            enable_push: true,
            auto_spdy31: false,
            header_compression: true,
        }
    }
}

impl ConnectionConfig {
    /// Stream receive window for `version`
    pub fn stream_window(&self, version: Version) -> u32 {
        self.stream_window_size
            .unwrap_or_else(|| version.dialect().default_window())
    }
}

/// Connection builder
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    /// Create a new builder with default options (server, SPDY/3)
    pub fn new() -> Self {
        ConnectionBuilder::default()
    }

    /// Server role
    pub fn server(mut self) -> Self {
        self.config.is_server = true;
        self
    }

    /// Client role
    pub fn client(mut self) -> Self {
        self.config.is_server = false;
        self
    }

    /// Set the negotiated protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Shorthand for a known version
    pub fn version(self, version: Version) -> Self {
        self.protocol(Protocol::new(version))
    }

    /// Set max concurrent peer streams
    pub fn max_streams(mut self, max: u32) -> Self {
        self.config.max_streams = max;
        self
    }

    /// Set connection receive window
    pub fn window_size(mut self, size: u32) -> Self {
        self.config.window_size = size;
        self
    }

    /// Set the stream receive window advertised in SETTINGS
    pub fn stream_window_size(mut self, size: u32) -> Self {
        self.config.stream_window_size = Some(size);
        self
    }

    /// Set DATA slicing unit
    pub fn max_chunk(mut self, size: usize) -> Self {
        self.config.max_chunk = size.max(1);
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.config.enable_push = enable;
        self
    }

    /// Set SPDY/3.1 auto-upgrade
    pub fn auto_spdy31(mut self, enable: bool) -> Self {
        self.config.auto_spdy31 = enable;
        self
    }

    /// Set SPDY header compression
    pub fn header_compression(mut self, enable: bool) -> Self {
        self.config.header_compression = enable;
        self
    }

    /// Finished configuration
    pub fn config(self) -> ConnectionConfig {
        self.config
    }

    /// Build the connection, checking header contexts out of `pool`
    pub fn build(self, pool: Arc<CompressionPool>) -> Connection {
        Connection::new(self.config, pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Dialect;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert!(config.is_server);
        assert_eq!(config.max_streams, 100);
        assert_eq!(config.window_size, 1 << 20);
        assert_eq!(config.max_chunk, 8192);
        assert!(config.enable_push);
        assert_eq!(config.stream_window(Version::Spdy3), 64 * 1024);
        assert_eq!(config.stream_window(Version::Http2), 65535);
    }

    #[test]
    fn test_builder() {
        let config = ConnectionBuilder::new()
            .client()
            .protocol(Protocol::spdy_negotiated())
            .max_streams(10)
            .stream_window_size(8192)
            .max_chunk(0)
            .enable_push(false)
            .auto_spdy31(true)
            .config();

        assert!(!config.is_server);
        assert_eq!(config.protocol.dialect, Dialect::Spdy);
        assert_eq!(config.protocol.version, None);
        assert_eq!(config.max_streams, 10);
        assert_eq!(config.stream_window(Version::Spdy3), 8192);
        assert_eq!(config.max_chunk, 1);
        assert!(!config.enable_push);
        assert!(config.auto_spdy31);
    }
}
