//! Bounds-checked big-endian reads over a frame body

use crate::error::{Error, Result};
use bytes::Bytes;

/// Cursor over a frame body; every read fails with `OutOfBounds`
/// instead of panicking when the body is truncated.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    /// `what` names the frame in error messages
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Reader { buf, pos: 0, what }
    }

    fn oob(&self, wanted: usize) -> Error {
        Error::OutOfBounds(format!(
            "{}: need {} bytes at offset {}, have {}",
            self.what,
            wanted,
            self.pos,
            self.remaining()
        ))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn has(&self, n: usize) -> bool {
        self.remaining() >= n
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if !self.has(n) {
            return Err(self.oob(n));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// 31-bit value with the reserved bit masked off
    pub fn u31(&mut self) -> Result<u32> {
        Ok(self.u32()? & 0x7fff_ffff)
    }

    /// Everything not yet read
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Zero-copy slice of `body` from `start` to its end
pub(crate) fn tail(body: &Bytes, start: usize) -> Bytes {
    body.slice(start.min(body.len())..)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_and_oob() {
        let data = [0x80, 0x00, 0x00, 0x05, 0x01, 0x02];
        let mut r = Reader::new(&data, "TEST");
        assert_eq!(r.u31().unwrap(), 5);
        assert_eq!(r.u8().unwrap(), 1);
        assert!(!r.has(2));
        let err = r.u16().unwrap_err();
        assert!(matches!(err, Error::OutOfBounds(_)));
    }

    #[test]
    fn test_little_endian() {
        let data = [0x04, 0x00, 0x00, 0x01];
        let mut r = Reader::new(&data, "TEST");
        assert_eq!(r.u32_le().unwrap(), 0x0100_0004);
    }
}
