//! Write-serialization lock
//!
//! A lock with a FIFO wait queue of pending jobs. [`WriteLock::acquire`]
//! hands the job straight back when the lock is free; otherwise the job
//! waits. [`WriteLock::release`] passes ownership to the next waiting job
//! or frees the lock. The lock never fails, it only defers.
//!
//! The connection holds it while the SPDY version is unknown, so control
//! frames requested before negotiation are written in request order once
//! the version arrives.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct WriteLock<T> {
    locked: bool,
    queue: VecDeque<T>,
}

impl<T> Default for WriteLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WriteLock<T> {
    pub fn new() -> Self {
        WriteLock {
            locked: false,
            queue: VecDeque::new(),
        }
    }

    /// Lock created in the held state
    pub fn held() -> Self {
        WriteLock {
            locked: true,
            queue: VecDeque::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Jobs waiting for the lock
    pub fn waiting(&self) -> usize {
        self.queue.len()
    }

    /// Take the lock for `job`
    ///
    /// Returns the job if it may run now; the caller runs it and then
    /// calls [`WriteLock::release`]. Otherwise the job is queued.
    #[must_use]
    pub fn acquire(&mut self, job: T) -> Option<T> {
        if self.locked {
            self.queue.push_back(job);
            None
        } else {
            self.locked = true;
            Some(job)
        }
    }

    /// Give up the lock
    ///
    /// Returns the next waiting job, which now owns the lock.
    #[must_use]
    pub fn release(&mut self) -> Option<T> {
        match self.queue.pop_front() {
            Some(job) => Some(job),
            None => {
                self.locked = false;
                None
            }
        }
    }
}
