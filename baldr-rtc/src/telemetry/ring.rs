/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-capacity overwrite-on-full ring of telemetry frames.
//!
//! Single producer (RTC loop), single consumer (telemetry writer).
//!
//! * `publish` holds the slot lock only for one slot move.  When the ring is
//!   full the oldest unread frame is overwritten and `dropped` is bumped:
//!   loop cadence outranks telemetry completeness.
//! * `drain` holds the lock only while moving at most `max_n` frames out.
//! * Crossing the fill threshold wakes the registered consumer thread with
//!   [`Thread::unpark`], which never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread::Thread;

use super::TelemetryFrame;

#[derive(Debug)]
struct Slots {
    frames: Vec<Option<TelemetryFrame>>,
    /// Index of the oldest unread frame.
    head: usize,
    len: usize,
}

/// Counters exposed through `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingStats {
    pub capacity: usize,
    pub buffered: usize,
    pub published: u64,
    pub dropped: u64,
}

#[derive(Debug)]
pub struct TelemetryRing {
    slots: Mutex<Slots>,
    capacity: usize,
    fill_threshold: usize,
    published: AtomicU64,
    dropped: AtomicU64,
    consumer: OnceLock<Thread>,
}

impl TelemetryRing {
    /// Ring holding `capacity` frames (at least one) that wakes its consumer
    /// once `fill_threshold` frames are buffered.
    pub fn new(capacity: usize, fill_threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(Slots {
                frames: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
            }),
            capacity,
            fill_threshold: fill_threshold.clamp(1, capacity),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            consumer: OnceLock::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers the thread to unpark on fill.  Only the first registration
    /// takes effect.
    pub fn register_consumer(&self, thread: Thread) {
        let _ = self.consumer.set(thread);
    }

    /// Appends `frame`, overwriting the oldest unread frame when full.
    /// Returns `true` if a frame was overwritten.
    pub fn publish(&self, frame: TelemetryFrame) -> bool {
        let (overwrote, buffered) = {
            let mut s = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if s.len == self.capacity {
                let head = s.head;
                s.frames[head] = Some(frame);
                s.head = (head + 1) % self.capacity;
                (true, s.len)
            } else {
                let tail = (s.head + s.len) % self.capacity;
                s.frames[tail] = Some(frame);
                s.len += 1;
                (false, s.len)
            }
        };

        self.published.fetch_add(1, Ordering::Relaxed);
        if overwrote {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if buffered >= self.fill_threshold {
            if let Some(consumer) = self.consumer.get() {
                consumer.unpark();
            }
        }
        overwrote
    }

    /// Removes and returns up to `max_n` frames, oldest first.
    pub fn drain(&self, max_n: usize) -> Vec<TelemetryFrame> {
        let mut s = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max_n.min(s.len);
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let head = s.head;
            if let Some(frame) = s.frames[head].take() {
                out.push(frame);
            }
            s.head = (head + 1) % self.capacity;
            s.len -= 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames lost to overwrite since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            buffered: self.len(),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
