/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Telemetry writer thread.
//!
//! Wakes every flush period (or early, when the ring crosses its fill
//! threshold), drains the ring in batches and appends each frame to the sink.
//!
//! # Failure policy
//!
//! | Situation | Behaviour |
//! |---|---|
//! | `append` fails | retry with exponential backoff (capped at [`MAX_BACKOFF`]), up to `max_write_attempts` |
//! | all attempts fail | frame dropped, `storage_dropped += 1`, writer enters *degraded* mode |
//! | degraded | one attempt per frame (no backoff) until an append succeeds |
//! | `flush` fails | logged and counted; frames stay buffered in the sink |
//! | stop requested | no further retries; each remaining frame gets one attempt |
//!
//! Nothing here can reach the RTC loop: the only shared object is the ring,
//! and the writer only ever drains it.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{TelemetryFrame, TelemetryRing, TelemetrySink};
use crate::config::TelemetryConfig;

/// Longest single sleep between two append attempts.
pub const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Delay before retry number `attempt` (1-based): `base · 2^(attempt-1)`,
/// capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
}

// ── Settings / stats ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub flush_period: Duration,
    pub drain_batch: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl WriterSettings {
    pub fn from_config(cfg: &TelemetryConfig) -> Self {
        Self {
            flush_period: cfg.flush_period(),
            drain_batch: cfg.drain_batch.max(1),
            max_attempts: cfg.max_write_attempts.max(1),
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Live writer counters, readable from any thread.
#[derive(Debug, Default)]
pub struct WriterStats {
    written: AtomicU64,
    storage_dropped: AtomicU64,
    write_failures: AtomicU64,
    degraded: AtomicBool,
}

/// Point-in-time copy of [`WriterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterReport {
    pub written: u64,
    /// Frames given up on after exhausting their write attempts.
    pub storage_dropped: u64,
    /// Failed `append`/`flush` calls, retries included.
    pub write_failures: u64,
    pub degraded: bool,
}

impl WriterStats {
    pub fn snapshot(&self) -> WriterReport {
        WriterReport {
            written: self.written.load(Ordering::Relaxed),
            storage_dropped: self.storage_dropped.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct TelemetryWriter {
    ring: Arc<TelemetryRing>,
    sink: Box<dyn TelemetrySink>,
    settings: WriterSettings,
    stats: Arc<WriterStats>,
    stop: Arc<AtomicBool>,
    degraded: bool,
}

impl TelemetryWriter {
    pub fn new(
        ring: Arc<TelemetryRing>,
        sink: Box<dyn TelemetrySink>,
        settings: WriterSettings,
    ) -> Self {
        Self {
            ring,
            sink,
            settings,
            stats: Arc::new(WriterStats::default()),
            stop: Arc::new(AtomicBool::new(false)),
            degraded: false,
        }
    }

    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Drains everything currently buffered and flushes the sink.  Returns
    /// the number of frames taken from the ring.
    pub fn drain_once(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let batch = self.ring.drain(self.settings.drain_batch);
            if batch.is_empty() {
                break;
            }
            handled += batch.len();
            for frame in &batch {
                self.persist(frame);
            }
        }
        if handled > 0 {
            if let Err(e) = self.sink.flush() {
                self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "telemetry flush failed");
            }
        }
        handled
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn persist(&mut self, frame: &TelemetryFrame) {
        let attempts = if self.degraded || self.stopping() {
            1
        } else {
            self.settings.max_attempts
        };

        for attempt in 1..=attempts {
            match self.sink.append(frame) {
                Ok(()) => {
                    self.stats.written.fetch_add(1, Ordering::Relaxed);
                    if self.degraded {
                        self.degraded = false;
                        self.stats.degraded.store(false, Ordering::Relaxed);
                        info!(tick = frame.tick, "telemetry storage recovered");
                    }
                    return;
                }
                Err(e) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    if attempt < attempts && !self.stopping() {
                        let backoff = backoff_delay(self.settings.retry_backoff, attempt);
                        warn!(
                            tick = frame.tick,
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "telemetry append failed, retrying"
                        );
                        thread::sleep(backoff);
                    } else {
                        debug!(tick = frame.tick, error = %e, "telemetry frame dropped");
                        self.stats.storage_dropped.fetch_add(1, Ordering::Relaxed);
                        if !self.degraded {
                            self.degraded = true;
                            self.stats.degraded.store(true, Ordering::Relaxed);
                            error!(
                                attempts,
                                error = %e,
                                "telemetry storage failing – dropping frames until it recovers"
                            );
                        }
                        return;
                    }
                }
            }
        }
    }

    /// Starts the writer on its own thread.
    pub fn spawn(mut self) -> io::Result<WriterHandle> {
        let stop = Arc::clone(&self.stop);
        let stats = self.stats();
        let thread_stop = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("telemetry-writer".to_string())
            .spawn(move || {
                self.ring.register_consumer(thread::current());
                info!(
                    flush_ms = self.settings.flush_period.as_millis() as u64,
                    batch = self.settings.drain_batch,
                    "telemetry writer started"
                );
                loop {
                    // Read the flag before draining so the last pass sees
                    // everything published before stop was requested.
                    let stopping = thread_stop.load(Ordering::Acquire);
                    self.drain_once();
                    if stopping {
                        break;
                    }
                    thread::park_timeout(self.settings.flush_period);
                }
                if let Err(e) = self.sink.flush() {
                    warn!(error = %e, "final telemetry flush failed");
                }
                let report = self.stats.snapshot();
                info!(
                    written = report.written,
                    storage_dropped = report.storage_dropped,
                    "telemetry writer stopped"
                );
                report
            })?;

        Ok(WriterHandle {
            thread,
            stop,
            stats,
        })
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Owner-side handle of a running writer thread.
pub struct WriterHandle {
    thread: JoinHandle<WriterReport>,
    stop: Arc<AtomicBool>,
    stats: Arc<WriterStats>,
}

impl WriterHandle {
    pub fn stats(&self) -> &Arc<WriterStats> {
        &self.stats
    }

    /// Asks the writer to drain what is left and exit, then joins it.
    pub fn stop(self) -> WriterReport {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        match self.thread.join() {
            Ok(report) => report,
            Err(_) => {
                error!("telemetry writer thread panicked");
                self.stats.snapshot()
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
