//! Header compression contexts and their pool
//!
//! A connection checks out one [`HeaderPair`] when its version is known
//! and hands it back when it closes. SPDY pairs are zlib streams primed
//! with a preset dictionary; they are reset and reused. HPACK pairs carry
//! per-connection dynamic tables and are never reused.

use super::{dictionary, spdy, Version};
use crate::error::{Error, Result};
use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

/// zlib window used for SPDY header blocks
const SPDY_WINDOW_BITS: u8 = 11;

/// Largest decompressed header block accepted
pub const MAX_HEADER_BLOCK: usize = 1024 * 1024;

const MAX_ITERATIONS: usize = 10_000;

/// Compressing half of a header context
pub trait HeaderCompressor: Send {
    /// Serialize and compress an ordered list of name/value pairs
    fn compress(&mut self, pairs: &[(String, String)]) -> Result<Bytes>;

    /// Forget all state, as if freshly created
    fn reset(&mut self);
}

/// Decompressing half of a header context
pub trait HeaderDecompressor: Send {
    /// Decompress and deserialize a header block
    fn decompress(&mut self, block: &[u8]) -> Result<Vec<(String, String)>>;

    /// Forget all state, as if freshly created
    fn reset(&mut self);
}

/// Compressor/decompressor pair owned by one connection
pub struct HeaderPair {
    pub version: Version,
    pub compressor: Box<dyn HeaderCompressor>,
    pub decompressor: Box<dyn HeaderDecompressor>,
}

impl HeaderPair {
    /// Fresh pair for a version
    pub fn new(version: Version, header_compression: bool) -> Self {
        match dictionary::for_version(version) {
            Some(dict) => HeaderPair {
                version,
                compressor: Box::new(ZlibCompressor::new(version, dict, header_compression)),
                decompressor: Box::new(ZlibDecompressor::new(version, dict)),
            },
            None => HeaderPair {
                version,
                compressor: Box::new(HpackCompressor::new()),
                decompressor: Box::new(HpackDecompressor::new()),
            },
        }
    }
}

impl std::fmt::Debug for HeaderPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderPair")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// SPDY name/value block deflater
pub struct ZlibCompressor {
    version: Version,
    compress: Compress,
    dictionary: &'static [u8],
    primed: bool,
}

impl ZlibCompressor {
    pub fn new(version: Version, dictionary: &'static [u8], header_compression: bool) -> Self {
        let level = if header_compression {
            Compression::default()
        } else {
            Compression::none()
        };
        ZlibCompressor {
            version,
            compress: Compress::new_with_window_bits(level, true, SPDY_WINDOW_BITS),
            dictionary,
            primed: false,
        }
    }

    fn deflate(&mut self, input: &[u8]) -> Result<Bytes> {
        if !self.primed {
            self.compress
                .set_dictionary(self.dictionary)
                .map_err(|e| Error::Compression(format!("deflate dictionary: {}", e)))?;
            self.primed = true;
        }

        let mut output = Vec::with_capacity(input.len() + 64);
        let mut consumed = 0usize;

        for _ in 0..MAX_ITERATIONS {
            if output.len() == output.capacity() {
                output.reserve(256);
            }

            let before_in = self.compress.total_in();
            self.compress
                .compress_vec(&input[consumed..], &mut output, FlushCompress::Sync)
                .map_err(|e| Error::Compression(format!("deflate error: {}", e)))?;
            consumed += (self.compress.total_in() - before_in) as usize;

            // Sync flush is complete once zlib stops filling the buffer
            if consumed >= input.len() && output.len() < output.capacity() {
                return Ok(Bytes::from(output));
            }
        }

        Err(Error::Compression("deflate took too many iterations".into()))
    }
}

impl HeaderCompressor for ZlibCompressor {
    fn compress(&mut self, pairs: &[(String, String)]) -> Result<Bytes> {
        let block = spdy::encode_name_values(self.version, pairs)?;
        self.deflate(&block)
    }

    fn reset(&mut self) {
        self.compress.reset();
        self.primed = false;
    }
}

/// SPDY name/value block inflater
pub struct ZlibDecompressor {
    version: Version,
    decompress: Decompress,
    dictionary: &'static [u8],
}

impl ZlibDecompressor {
    pub fn new(version: Version, dictionary: &'static [u8]) -> Self {
        ZlibDecompressor {
            version,
            decompress: Decompress::new(true),
            dictionary,
        }
    }

    fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(std::cmp::max(256, input.len() * 4));
        let mut consumed = 0usize;

        for _ in 0..MAX_ITERATIONS {
            if output.len() == output.capacity() {
                if output.len() >= MAX_HEADER_BLOCK {
                    return Err(Error::Compression(format!(
                        "header block exceeds {} bytes",
                        MAX_HEADER_BLOCK
                    )));
                }
                output.reserve(output.capacity());
            }

            let before_in = self.decompress.total_in();
            let before_out = output.len();
            let result =
                self.decompress
                    .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Sync);
            consumed += (self.decompress.total_in() - before_in) as usize;

            match result {
                Ok(_) => {}
                Err(e) if e.needs_dictionary().is_some() => {
                    self.decompress
                        .set_dictionary(self.dictionary)
                        .map_err(|e| Error::Compression(format!("inflate dictionary: {}", e)))?;
                    continue;
                }
                Err(e) => return Err(Error::Compression(format!("inflate error: {}", e))),
            }

            if consumed >= input.len() && output.len() < output.capacity() {
                return Ok(output);
            }
            if consumed >= input.len() && output.len() == before_out {
                return Ok(output);
            }
        }

        Err(Error::Compression("inflate took too many iterations".into()))
    }
}

impl HeaderDecompressor for ZlibDecompressor {
    fn decompress(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let raw = self.inflate(block)?;
        spdy::decode_name_values(self.version, &raw)
    }

    fn reset(&mut self) {
        self.decompress.reset(true);
    }
}

/// HPACK encoder (RFC 7541)
pub struct HpackCompressor {
    encoder: hpack::Encoder<'static>,
}

impl HpackCompressor {
    pub fn new() -> Self {
        HpackCompressor {
            encoder: hpack::Encoder::new(),
        }
    }
}

impl Default for HpackCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderCompressor for HpackCompressor {
    fn compress(&mut self, pairs: &[(String, String)]) -> Result<Bytes> {
        let header_tuples: Vec<(&[u8], &[u8])> = pairs
            .iter()
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()))
            .collect();
        Ok(Bytes::from(self.encoder.encode(header_tuples)))
    }

    fn reset(&mut self) {
        self.encoder = hpack::Encoder::new();
    }
}

/// HPACK decoder (RFC 7541)
pub struct HpackDecompressor {
    decoder: hpack::Decoder<'static>,
}

impl HpackDecompressor {
    pub fn new() -> Self {
        HpackDecompressor {
            decoder: hpack::Decoder::new(),
        }
    }
}

impl Default for HpackDecompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderDecompressor for HpackDecompressor {
    fn decompress(&mut self, block: &[u8]) -> Result<Vec<(String, String)>> {
        let decoded = self
            .decoder
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        decoded
            .into_iter()
            .map(|(name, value)| {
                let name = String::from_utf8(name)
                    .map_err(|_| Error::Compression("header name is not UTF-8".into()))?;
                let value = String::from_utf8(value)
                    .map_err(|_| Error::Compression("header value is not UTF-8".into()))?;
                Ok((name, value))
            })
            .collect()
    }

    fn reset(&mut self) {
        self.decoder = hpack::Decoder::new();
    }
}

/// Pool of header contexts shared by every connection of a server
///
/// Checkout and checkin take the internal lock, so a pool behind an
/// `Arc` can serve connections on any thread.
#[derive(Debug)]
pub struct CompressionPool {
    header_compression: bool,
    idle: Mutex<HashMap<Version, Vec<HeaderPair>>>,
}

impl CompressionPool {
    /// `header_compression` false emits stored (level 0) SPDY blocks
    pub fn new(header_compression: bool) -> Self {
        CompressionPool {
            header_compression,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Check out a pair for `version`
    pub fn get(&self, version: Version) -> HeaderPair {
        if version != Version::Http2 {
            if let Some(pair) = self.idle.lock().get_mut(&version).and_then(Vec::pop) {
                trace!(%version, "reusing pooled header pair");
                return pair;
            }
        }
        HeaderPair::new(version, self.header_compression)
    }

    /// Return a pair; SPDY pairs are reset for the next connection
    pub fn put(&self, mut pair: HeaderPair) {
        if pair.version == Version::Http2 {
            return;
        }
        pair.compressor.reset();
        pair.decompressor.reset();
        self.idle.lock().entry(pair.version).or_default().push(pair);
    }

    /// Number of idle pairs for a version
    pub fn idle(&self, version: Version) -> usize {
        self.idle.lock().get(&version).map_or(0, Vec::len)
    }
}

impl Default for CompressionPool {
    fn default() -> Self {
        CompressionPool::new(true)
    }
}
