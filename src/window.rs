//! Window-based flow control
//!
//! Every stream (and, for SPDY/3.1 and HTTP/2, the connection itself) has
//! two independent windows. The send side counts how much we may still
//! transmit before the peer's next WINDOW_UPDATE. The receive side counts
//! how much the peer may still send; once it falls to the low-water mark
//! we restore it to its maximum with one WINDOW_UPDATE.

use crate::error::{Error, Result};
use crate::protocol::MAX_STREAM_ID;

/// One direction of a flow control window
///
/// `current` may go negative when the peer lowers the initial window size
/// below what is already in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Side {
    current: i64,
    max: i64,
    low_water_mark: i64,
}

impl Side {
    pub fn new(size: u32, low_water_mark: u32) -> Self {
        Side {
            current: size as i64,
            max: size as i64,
            low_water_mark: low_water_mark as i64,
        }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    /// Start below the maximum, as the connection window does until our
    /// first WINDOW_UPDATE raises it
    pub fn set_current(&mut self, current: u32) {
        self.current = current as i64;
    }

    pub fn set_low_water_mark(&mut self, lwm: u32) {
        self.low_water_mark = lwm as i64;
    }

    /// Adjust by `delta`; fails if the window would exceed 2^31-1
    pub fn update(&mut self, delta: i64) -> Result<()> {
        let next = self.current + delta;
        if next > MAX_STREAM_ID as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                next
            )));
        }
        self.current = next;
        Ok(())
    }

    /// Account for `amount` bytes sent or received
    pub fn consume(&mut self, amount: usize) {
        self.current -= amount as i64;
    }

    /// New maximum from SETTINGS; the current value moves by the same delta
    pub fn update_max(&mut self, max: u32) -> Result<()> {
        let delta = max as i64 - self.max;
        self.max = max as i64;
        self.update(delta)
    }

    /// Distance to the maximum
    pub fn delta(&self) -> u32 {
        (self.max - self.current).clamp(0, MAX_STREAM_ID as i64) as u32
    }

    pub fn is_draining(&self) -> bool {
        self.current <= self.low_water_mark
    }

    pub fn is_empty(&self) -> bool {
        self.current <= 0
    }

    /// Whether `size` bytes fit
    pub fn has(&self, size: usize) -> bool {
        self.current >= size as i64
    }

    /// Bytes that may be sent right now
    pub fn available(&self) -> usize {
        self.current.max(0) as usize
    }

    /// If draining, refill to the maximum and return the WINDOW_UPDATE
    /// delta to send
    pub fn restore(&mut self) -> Option<u32> {
        if !self.is_draining() {
            return None;
        }
        let delta = self.delta();
        if delta == 0 {
            return None;
        }
        self.current = self.max;
        Some(delta)
    }
}

/// Send and receive windows of one stream or connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub send: Side,
    pub recv: Side,
}

impl Window {
    /// Receive low-water mark is half the receive window
    pub fn new(send: u32, recv: u32) -> Self {
        Window {
            send: Side::new(send, 0),
            recv: Side::new(recv, recv / 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_and_has() {
        let mut side = Side::new(100, 0);
        assert!(side.has(100));
        side.consume(60);
        assert_eq!(side.current(), 40);
        assert!(!side.has(50));
        assert_eq!(side.available(), 40);
    }

    #[test]
    fn test_update_overflow() {
        let mut side = Side::new(0x7fff_ffff, 0);
        assert!(side.update(1).is_err());
        assert_eq!(side.current(), 0x7fff_ffff);
    }

    #[test]
    fn test_update_max_shifts_current() {
        let mut side = Side::new(100, 0);
        side.consume(50);

        side.update_max(200).unwrap();
        assert_eq!(side.max(), 200);
        assert_eq!(side.current(), 150);

        // Lowering below what is in flight goes negative
        side.update_max(20).unwrap();
        assert_eq!(side.current(), -30);
        assert!(side.is_empty());
        assert_eq!(side.available(), 0);
    }

    #[test]
    fn test_restore_is_level_triggered() {
        let mut window = Window::new(100, 100);
        window.recv.consume(40);
        assert_eq!(window.recv.restore(), None);

        window.recv.consume(20);
        assert!(window.recv.is_draining());
        assert_eq!(window.recv.restore(), Some(60));
        assert_eq!(window.recv.current(), 100);

        window.recv.consume(100);
        assert_eq!(window.recv.restore(), Some(100));
    }

    #[test]
    fn test_connection_window_starts_low() {
        let mut side = Side::new(1 << 20, 1 << 19);
        side.set_current(65535);
        assert!(side.is_draining());
        assert_eq!(side.restore(), Some((1 << 20) - 65535));
    }
}
