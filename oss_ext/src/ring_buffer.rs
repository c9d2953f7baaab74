// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Single-producer/single-consumer byte ring.
//!
//! Deliberately poll-and-sleep under one `Mutex`, not a lock-free/atomic
//! design: there is no condition variable, only polling under a mutex, with
//! a condvar upgrade left as a *future*, test-gated change rather than
//! something to do now. The index-math (modulo wraparound copies, one byte
//! sacrificed to disambiguate full/empty) follows the `debasishg-ringmpsc-rs`
//! crate's `ring.rs`, adapted from its lock-free atomics to a single mutex.

use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

/// `READ_UNIT_SIZE` (1 MiB): the producer's per-iteration fetch granularity.
pub const READ_UNIT_SIZE: usize = 1024 * 1024;
/// `INITIAL_BUF_LEN` = 16 x `READ_UNIT_SIZE`.
pub const INITIAL_BUF_LEN: usize = 16 * READ_UNIT_SIZE;
/// Sleep between polls when the ring has no work/space for the caller.
pub const SPIN_SLEEP_MSEC: u64 = 10;

struct Inner {
    data: Vec<u8>,
    /// Index of the oldest unread byte; only the consumer advances this.
    begin: usize,
    /// Index one past the newest written byte; only the producer advances
    /// this.
    end: usize,
    size: usize,
    eof: bool,
    err_slot: Option<String>,
}

impl Inner {
    fn readable(&self) -> usize {
        (self.end + self.size - self.begin) % self.size
    }

    /// One byte is always sacrificed to disambiguate "full" from "empty".
    fn free(&self) -> usize {
        self.size - self.readable() - 1
    }

    /// The largest single contiguous span available to the producer
    /// starting at `end`, without wrapping.
    fn free_contiguous(&self) -> usize {
        let tail = if self.end >= self.begin {
            self.size - self.end
        } else {
            self.begin - self.end - 1
        };
        tail.min(self.free())
    }
}

/// The SPSC byte ring shared between one producer and one consumer, usually
/// behind an `Arc` so each side can hold its own handle.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    /// Signaled whenever `{begin, end, eof, err_slot}` changes, so a future
    /// condvar-based rewrite can be swapped in without changing the public
    /// poll-and-sleep-compatible API. Not currently relied upon for
    /// correctness: callers still poll-and-sleep.
    changed: Condvar,
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUF_LEN)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: vec![0; cap],
                begin: 0,
                end: 0,
                size: cap,
                eof: false,
                err_slot: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Record a fatal error and terminate future reads/writes. Idempotent:
    /// the first recorded message wins.
    pub fn set_error(&self, message: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.err_slot.is_none() {
            inner.err_slot = Some(message);
        }
        self.changed.notify_all();
    }

    pub fn set_eof(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.eof = true;
        self.changed.notify_all();
    }

    /// Producer side: try to reserve up to `READ_UNIT_SIZE` contiguous free
    /// bytes. Returns `None` (caller should sleep `SPIN_SLEEP_MSEC` and
    /// retry) if the contiguous span is smaller than `READ_UNIT_SIZE`.
    /// On `Some(n)`, the caller must fill `n` bytes via [`Self::producer_slice`]
    /// then call [`Self::commit_write`] with the number actually written.
    pub fn reserve_write_span(&self) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        let span = inner.free_contiguous();
        if span < READ_UNIT_SIZE.min(inner.size.saturating_sub(1)) {
            None
        } else {
            Some(span)
        }
    }

    /// Run `f` with mutable access to the contiguous producer-side region
    /// reserved by [`Self::reserve_write_span`], then advance `end` by the
    /// number of bytes `f` reports having written. `f` must not write more
    /// than `max_len`.
    pub fn write_with<E>(
        &self,
        max_len: usize,
        f: impl FnOnce(&mut [u8]) -> Result<usize, E>,
    ) -> Result<usize, E> {
        let mut inner = self.inner.lock().unwrap();
        let end = inner.end;
        let size = inner.size;
        let n = f(&mut inner.data[end..end + max_len])?;
        assert!(n <= max_len, "producer wrote past its reserved span");
        inner.end = (end + n) % size;
        self.changed.notify_all();
        Ok(n)
    }

    /// Grow the backing store so a single consumer read of `n` bytes can
    /// always be satisfied without starving the producer (`size < 4n`
    /// triggers growth).
    fn maybe_grow(&self, inner: &mut Inner, n: usize) {
        if inner.size >= 4 * n {
            return;
        }
        let target = (4 * n).div_ceil(READ_UNIT_SIZE) * READ_UNIT_SIZE;
        let mut new_data = vec![0u8; target];
        let live = inner.readable();
        if inner.begin <= inner.end || live == 0 {
            new_data[..live].copy_from_slice(&inner.data[inner.begin..inner.begin + live]);
        } else {
            let tail = inner.size - inner.begin;
            new_data[..tail].copy_from_slice(&inner.data[inner.begin..]);
            new_data[tail..live].copy_from_slice(&inner.data[..inner.end]);
        }
        inner.data = new_data;
        inner.size = target;
        inner.begin = 0;
        inner.end = live;
    }

    /// Consumer side: copy up to `dst.len()` bytes, blocking (poll-sleep)
    /// until the request is satisfied or EOF. Surfaces a recorded error if
    /// one is present. Returns the number of bytes copied (`< dst.len()`
    /// only at true EOF).
    pub fn read(&self, dst: &mut [u8]) -> Result<usize, String> {
        {
            let mut inner = self.inner.lock().unwrap();
            self.maybe_grow(&mut inner, dst.len());
        }

        let mut copied = 0;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(err) = &inner.err_slot {
                    return Err(err.clone());
                }
                while copied < dst.len() {
                    let readable = inner.readable();
                    if readable == 0 {
                        break;
                    }
                    let begin = inner.begin;
                    let want = (dst.len() - copied).min(readable);
                    let contiguous = (inner.size - begin).min(want);
                    dst[copied..copied + contiguous]
                        .copy_from_slice(&inner.data[begin..begin + contiguous]);
                    copied += contiguous;
                    inner.begin = (begin + contiguous) % inner.size;
                }
                if copied == dst.len() || (inner.eof && inner.begin == inner.end) {
                    return Ok(copied);
                }
            }
            std::thread::sleep(Duration::from_millis(SPIN_SLEEP_MSEC));
        }
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
