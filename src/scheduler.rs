//! Outbound frame scheduler
//!
//! Frames are queued in batches. Control frames go to a synchronous queue
//! that is always flushed first; stream frames go to one of eight priority
//! buckets (0 is the most urgent). Within a bucket streams take turns: each
//! pass emits one batch from the head item and requeues it at the back, so
//! a large body on one stream does not starve its neighbours.
//!
//! Header blocks share one compression context per connection, so frames
//! carrying them are queued synchronously as well: the peer must inflate
//! them in the order they were compressed.
//!
//! The scheduler never writes by itself. The connection driver calls
//! [`Scheduler::tick`] with a [`Sink`] whenever [`Scheduler::needs_tick`]
//! reports pending work; several writes made before the next tick are
//! flushed together.

use crate::error::StreamId;
use crate::protocol::MAX_PRIORITY;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::trace;

/// Destination for scheduled bytes
pub trait Sink {
    /// Accept a chunk; `false` asks the scheduler to stop until
    /// [`Scheduler::on_drain`] is called.
    fn push(&mut self, chunk: Bytes) -> bool;
}

impl Sink for Vec<Bytes> {
    fn push(&mut self, chunk: Bytes) -> bool {
        Vec::push(self, chunk);
        true
    }
}

impl Sink for BytesMut {
    fn push(&mut self, chunk: Bytes) -> bool {
        self.extend_from_slice(&chunk);
        true
    }
}

#[derive(Debug)]
struct Item {
    stream: StreamId,
    batches: VecDeque<Vec<Bytes>>,
}

/// Priority queue of outbound batches
#[derive(Debug)]
pub struct Scheduler {
    sync: VecDeque<Vec<Bytes>>,
    buckets: Vec<VecDeque<Item>>,
    /// Rest of a batch the sink stopped in the middle of
    partial: VecDeque<Bytes>,
    queued_bytes: usize,
    tick_scheduled: bool,
    blocked: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            sync: VecDeque::new(),
            buckets: Vec::new(),
            partial: VecDeque::new(),
            queued_bytes: 0,
            tick_scheduled: false,
            blocked: false,
        }
    }

    fn batch_size(batch: &[Bytes]) -> usize {
        batch.iter().map(Bytes::len).sum()
    }

    /// Queue a batch ahead of every stream frame
    pub fn schedule_sync(&mut self, batch: Vec<Bytes>) {
        if batch.is_empty() {
            return;
        }
        self.queued_bytes += Self::batch_size(&batch);
        self.sync.push_back(batch);
        self.tick_scheduled = true;
    }

    /// Queue a batch for `stream` in the given priority bucket
    ///
    /// Consecutive batches of the same stream share one queue item.
    pub fn schedule(&mut self, stream: StreamId, priority: u8, batch: Vec<Bytes>) {
        if batch.is_empty() {
            return;
        }
        let priority = priority.min(MAX_PRIORITY) as usize;
        if self.buckets.len() <= priority {
            self.buckets.resize_with(priority + 1, VecDeque::new);
        }

        self.queued_bytes += Self::batch_size(&batch);
        let bucket = &mut self.buckets[priority];
        match bucket.back_mut() {
            Some(item) if item.stream == stream => item.batches.push_back(batch),
            _ => bucket.push_back(Item {
                stream,
                batches: VecDeque::from([batch]),
            }),
        }
        self.tick_scheduled = true;
    }

    /// Move every queued batch of `stream` to the synchronous queue,
    /// keeping their order
    pub fn promote(&mut self, stream: StreamId) {
        for bucket in self.buckets.iter_mut() {
            let (mine, rest): (VecDeque<Item>, VecDeque<Item>) =
                bucket.drain(..).partition(|item| item.stream == stream);
            *bucket = rest;
            for item in mine {
                self.sync.extend(item.batches);
            }
        }
    }

    /// Whether a tick would write something
    pub fn needs_tick(&self) -> bool {
        self.tick_scheduled && !self.blocked && !self.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.queued_bytes == 0 && self.partial.is_empty()
    }

    /// Bytes waiting to be written
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// The sink can take more data again
    pub fn on_drain(&mut self) {
        self.blocked = false;
        self.tick_scheduled = true;
    }

    /// Emit chunks until the sink refuses; returns `false` if it did
    fn emit(&mut self, sink: &mut dyn Sink, batch: Vec<Bytes>) -> bool {
        let mut chunks = batch.into_iter();
        while let Some(chunk) = chunks.next() {
            self.queued_bytes -= chunk.len();
            if !sink.push(chunk) {
                self.partial.extend(chunks);
                self.blocked = true;
                return false;
            }
        }
        true
    }

    /// Write everything queued, or until the sink applies backpressure
    ///
    /// Returns `true` when the queue was drained.
    pub fn tick(&mut self, sink: &mut dyn Sink) -> bool {
        self.tick_scheduled = false;
        self.blocked = false;

        if !self.partial.is_empty() {
            let partial: Vec<Bytes> = self.partial.drain(..).collect();
            if !self.emit(sink, partial) {
                return false;
            }
        }

        while let Some(batch) = self.sync.pop_front() {
            if !self.emit(sink, batch) {
                return false;
            }
        }

        for priority in 0..self.buckets.len() {
            while let Some(mut item) = self.buckets[priority].pop_front() {
                let Some(batch) = item.batches.pop_front() else {
                    continue;
                };
                if !item.batches.is_empty() {
                    let bucket = &mut self.buckets[priority];
                    // A later item of the same stream takes the remainder
                    // first, so one stream's batches never reorder
                    match bucket.iter_mut().find(|other| other.stream == item.stream) {
                        Some(later) => {
                            while let Some(rest) = item.batches.pop_back() {
                                later.batches.push_front(rest);
                            }
                        }
                        None => bucket.push_back(item),
                    }
                }
                if !self.emit(sink, batch) {
                    trace!(priority, "sink applied backpressure");
                    return false;
                }
            }
        }

        true
    }

    /// Drain everything into a vector
    pub fn take_all(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        self.tick(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(out: &[Bytes]) -> String {
        out.iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    fn batch(s: &'static str) -> Vec<Bytes> {
        vec![Bytes::from_static(s.as_bytes())]
    }

    /// Sink that accepts a fixed number of chunks before refusing
    struct Limited {
        out: Vec<Bytes>,
        budget: usize,
    }

    impl Sink for Limited {
        fn push(&mut self, chunk: Bytes) -> bool {
            self.out.push(chunk);
            self.budget = self.budget.saturating_sub(1);
            self.budget > 0
        }
    }

    #[test]
    fn test_round_robin_within_priority() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(0, 0, batch("hello "));
        scheduler.schedule(1, 0, batch("world!"));
        scheduler.schedule(1, 0, batch("world"));
        scheduler.schedule(0, 0, batch(" hello "));
        scheduler.schedule(2, 0, batch("someone's "));

        assert!(scheduler.needs_tick());
        let out = scheduler.take_all();
        assert_eq!(text(&out), "hello world! hello someone's world");
        assert!(scheduler.is_empty());
        assert!(!scheduler.needs_tick());
    }

    #[test]
    fn test_priority_order_and_sync_first() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, 5, batch("low "));
        scheduler.schedule(3, 0, batch("high "));
        scheduler.schedule_sync(batch("ctl "));
        scheduler.schedule(5, 2, batch("mid "));

        assert_eq!(text(&scheduler.take_all()), "ctl high mid low ");
    }

    #[test]
    fn test_backpressure_resumes_partial_batch() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, 0, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        scheduler.schedule(3, 0, batch("c"));

        let mut sink = Limited {
            out: Vec::new(),
            budget: 1,
        };
        assert!(!scheduler.tick(&mut sink));
        assert_eq!(text(&sink.out), "a");
        assert!(scheduler.is_blocked());
        assert!(!scheduler.needs_tick());

        // Writes while blocked are queued
        scheduler.schedule_sync(batch("s"));

        scheduler.on_drain();
        assert!(scheduler.needs_tick());
        let out = scheduler.take_all();
        assert_eq!(text(&out), "bsc");
        assert_eq!(scheduler.queued_bytes(), 0);
    }

    #[test]
    fn test_stream_order_kept_across_items() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, 0, batch("a"));
        scheduler.schedule(1, 0, batch("b"));
        scheduler.schedule(3, 0, batch("c"));
        scheduler.schedule(1, 0, batch("d"));

        assert_eq!(text(&scheduler.take_all()), "acbd");
    }

    #[test]
    fn test_promote_moves_stream_ahead_in_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, 0, batch("x"));
        scheduler.schedule(3, 4, batch("a"));
        scheduler.schedule(1, 0, batch("y"));
        scheduler.schedule(3, 4, batch("b"));
        scheduler.schedule_sync(batch("s"));

        scheduler.promote(3);
        scheduler.schedule_sync(batch("t"));

        assert_eq!(scheduler.queued_bytes(), 6);
        assert_eq!(text(&scheduler.take_all()), "sabtxy");
    }

    #[test]
    fn test_priority_clamped() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule(1, 200, batch("x"));
        assert_eq!(scheduler.buckets.len(), MAX_PRIORITY as usize + 1);
        assert_eq!(text(&scheduler.take_all()), "x");
    }
}
