/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared beam state – the single source of truth for run mode.
//!
//! One [`BeamState`] exists per process.  It is shared as `Arc<BeamState>`
//! by the RTC loop, the telemetry writer's owner and the commander.
//!
//! # Concurrency contract
//!
//! | Field | Writers | Readers | Mechanism |
//! |---|---|---|---|
//! | mode + generation | commander, RTC loop (fault only), beam process | all | one `AtomicU64`, CAS per transition |
//! | setpoints | RTC loop | commander (`status`) | `RwLock<Vec<f64>>` |
//! | last fault | RTC loop | commander | `Mutex<Option<String>>` |
//! | element servo states | commander | commander | `Mutex<BTreeMap>` |
//!
//! The packed word stores the generation in the upper 56 bits and the
//! [`RunMode`] tag in the low 8 bits, so a single load always yields a
//! consistent `(mode, generation)` pair.

pub mod mode;

pub use mode::{RunMode, Transition};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::BeamConfig;

const MODE_BITS: u32 = 8;
const MODE_MASK: u64 = (1 << MODE_BITS) - 1;

fn pack(mode: RunMode, generation: u64) -> u64 {
    (generation << MODE_BITS) | mode as u64
}

fn unpack(word: u64) -> ModeSnapshot {
    ModeSnapshot {
        // The low byte is only ever written through `pack`.
        mode: RunMode::from_tag((word & MODE_MASK) as u8).unwrap_or(RunMode::Stopped),
        generation: word >> MODE_BITS,
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// A consistent `(mode, generation)` pair read in one atomic load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeSnapshot {
    pub mode: RunMode,
    pub generation: u64,
}

/// Position of one hardware control element as last commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServoState {
    Open,
    Closed,
}

// ── BeamState ─────────────────────────────────────────────────────────────────

/// Process-wide controller state for one beam.
#[derive(Debug)]
pub struct BeamState {
    config: Arc<BeamConfig>,
    word: AtomicU64,
    setpoints: RwLock<Vec<f64>>,
    last_fault: Mutex<Option<String>>,
    elements: Mutex<BTreeMap<String, ServoState>>,
    /// Ticks executed by the RTC loop (including paused ones).
    ticks: AtomicU64,
    epoch: Instant,
    /// Paired with `mode_changed`; guards nothing but the wait itself.
    wait_lock: Mutex<()>,
    mode_changed: Condvar,
}

impl BeamState {
    /// Creates the state in `INITIALIZING` with zeroed setpoints sized to
    /// `rtc.n_actuators` and every configured element open.
    pub fn new(config: Arc<BeamConfig>) -> Self {
        let setpoints = vec![0.0; config.rtc.n_actuators];
        let elements = config
            .io
            .elements
            .iter()
            .map(|e| (e.clone(), ServoState::Open))
            .collect();
        Self {
            config,
            word: AtomicU64::new(pack(RunMode::Initializing, 0)),
            setpoints: RwLock::new(setpoints),
            last_fault: Mutex::new(None),
            elements: Mutex::new(elements),
            ticks: AtomicU64::new(0),
            epoch: Instant::now(),
            wait_lock: Mutex::new(()),
            mode_changed: Condvar::new(),
        }
    }

    pub fn config(&self) -> &Arc<BeamConfig> {
        &self.config
    }

    pub fn beam(&self) -> u8 {
        self.config.beam
    }

    // ── Mode ──────────────────────────────────────────────────────────────────

    /// Current mode and generation.
    pub fn snapshot(&self) -> ModeSnapshot {
        unpack(self.word.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> RunMode {
        self.snapshot().mode
    }

    /// `INITIALIZING → RUNNING`.  Called once by the beam process after all
    /// threads are up.
    pub fn start(&self) -> Transition {
        self.transition(RunMode::Running, |from| match from {
            RunMode::Initializing => Some(true),
            RunMode::Running => Some(false),
            _ => None,
        })
    }

    /// `RUNNING → PAUSED`; no change if already paused.
    pub fn pause(&self) -> Transition {
        self.transition(RunMode::Paused, |from| match from {
            RunMode::Running => Some(true),
            RunMode::Paused => Some(false),
            _ => None,
        })
    }

    /// `PAUSED → RUNNING`; no change if already running.
    pub fn resume(&self) -> Transition {
        self.transition(RunMode::Running, |from| match from {
            RunMode::Paused => Some(true),
            RunMode::Running => Some(false),
            _ => None,
        })
    }

    /// Any non-terminal mode → `STOPPING`.  Idempotent: a second request, or
    /// one arriving after the process stopped, is reported as unchanged.
    pub fn request_stop(&self) -> Transition {
        self.transition(RunMode::Stopping, |from| match from {
            RunMode::Initializing | RunMode::Running | RunMode::Paused => Some(true),
            RunMode::Stopping | RunMode::Stopped => Some(false),
        })
    }

    /// Fault escalation from the RTC loop: records `reason` and moves to
    /// `STOPPING`.  The reason is only kept if this call performed the
    /// transition, so at most one fault is ever recorded.
    pub fn fault(&self, reason: impl Into<String>) -> Transition {
        let reason = reason.into();
        // Hold the fault slot across the transition so `status` never shows
        // STOPPING-by-fault without its reason.
        let mut slot = self.last_fault.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = self.transition(RunMode::Stopping, |from| match from {
            RunMode::Initializing | RunMode::Running | RunMode::Paused => Some(true),
            RunMode::Stopping | RunMode::Stopped => Some(false),
        });
        if outcome.changed() {
            warn!(beam = self.beam(), reason = %reason, "RTC fault – stopping");
            *slot = Some(reason);
        }
        outcome
    }

    /// `STOPPING → STOPPED`.  Called by the beam process once every thread has
    /// exited.
    pub fn mark_stopped(&self) -> Transition {
        self.transition(RunMode::Stopped, |from| match from {
            RunMode::Stopping => Some(true),
            RunMode::Stopped => Some(false),
            _ => None,
        })
    }

    /// Applies one transition as a single CAS on the packed word.
    ///
    /// `rule(from)` returns `Some(true)` to move to `to`, `Some(false)` for a
    /// no-op and `None` when `to` is not reachable from `from`.
    fn transition(&self, to: RunMode, rule: impl Fn(RunMode) -> Option<bool>) -> Transition {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            let from = unpack(current);
            match rule(from.mode) {
                None => {
                    return Transition::Rejected {
                        current: from.mode,
                        requested: to,
                    }
                }
                Some(false) => return Transition::Unchanged { mode: from.mode },
                Some(true) => {
                    let next = pack(to, from.generation + 1);
                    match self.word.compare_exchange_weak(
                        current,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            info!(
                                beam = self.beam(),
                                from = %from.mode,
                                to = %to,
                                generation = from.generation + 1,
                                "mode transition"
                            );
                            self.notify_waiters();
                            return Transition::Applied {
                                from: from.mode,
                                to,
                                generation: from.generation + 1,
                            };
                        }
                        Err(actual) => current = actual,
                    }
                }
            }
        }
    }

    fn notify_waiters(&self) {
        // Taking the lock orders this notify after any waiter's predicate
        // check, so a wake-up cannot be lost.
        let _guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.mode_changed.notify_all();
    }

    /// Blocks until `pred(mode)` holds or `timeout` elapses.  Returns the last
    /// observed snapshot either way.
    pub fn wait_until(
        &self,
        pred: impl Fn(RunMode) -> bool,
        timeout: Option<Duration>,
    ) -> ModeSnapshot {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.wait_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let snap = self.snapshot();
            if pred(snap.mode) {
                return snap;
            }
            guard = match deadline {
                None => self
                    .mode_changed
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return snap;
                    }
                    self.mode_changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    // ── Setpoints ─────────────────────────────────────────────────────────────

    /// Publishes the setpoints just applied to hardware.  Only the RTC loop
    /// calls this, and only from a RUNNING tick.
    pub fn store_setpoints(&self, values: &[f64]) {
        let mut sp = self.setpoints.write().unwrap_or_else(PoisonError::into_inner);
        sp.clear();
        sp.extend_from_slice(values);
    }

    /// Copy of the active setpoints.
    pub fn setpoints(&self) -> Vec<f64> {
        self.setpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ── Fault / elements / ticks ──────────────────────────────────────────────

    pub fn last_fault(&self) -> Option<String> {
        self.last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_element(&self, element: &str, state: ServoState) {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(element.to_string(), state);
    }

    pub fn elements(&self) -> BTreeMap<String, ServoState> {
        self.elements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Monotonic nanoseconds since this state was created.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn state() -> Arc<BeamState> {
        let mut cfg = BeamConfig::default();
        cfg.rtc.n_actuators = 4;
        Arc::new(BeamState::new(Arc::new(cfg)))
    }

    #[test]
    fn starts_initializing_with_generation_zero() {
        let s = state();
        assert_eq!(
            s.snapshot(),
            ModeSnapshot {
                mode: RunMode::Initializing,
                generation: 0
            }
        );
        assert_eq!(s.setpoints(), vec![0.0; 4]);
        assert_eq!(s.elements().len(), 2);
        assert!(s.last_fault().is_none());
    }

    #[test]
    fn pause_resume_cycle_bumps_generation() {
        let s = state();
        assert!(s.start().changed());
        assert_eq!(
            s.pause(),
            Transition::Applied {
                from: RunMode::Running,
                to: RunMode::Paused,
                generation: 2
            }
        );
        assert_eq!(s.pause(), Transition::Unchanged { mode: RunMode::Paused });
        assert!(s.resume().changed());
        assert_eq!(s.resume(), Transition::Unchanged { mode: RunMode::Running });
        assert_eq!(s.snapshot().generation, 3);
    }

    #[test]
    fn pause_before_start_is_rejected() {
        let s = state();
        assert_eq!(
            s.pause(),
            Transition::Rejected {
                current: RunMode::Initializing,
                requested: RunMode::Paused
            }
        );
        assert_eq!(s.snapshot().generation, 0);
    }

    #[test]
    fn stop_is_idempotent_and_terminal() {
        let s = state();
        s.start();
        assert!(s.request_stop().changed());
        assert!(!s.request_stop().changed());
        assert!(!s.resume().changed());
        assert!(s.mark_stopped().changed());
        assert!(!s.request_stop().changed());
        assert_eq!(s.mode(), RunMode::Stopped);
        assert!(!s.start().changed());
    }

    #[test]
    fn fault_records_reason_once() {
        let s = state();
        s.start();
        assert!(s.fault("sensor timeout x10").changed());
        assert!(!s.fault("second fault").changed());
        assert_eq!(s.last_fault().as_deref(), Some("sensor timeout x10"));
        assert_eq!(s.mode(), RunMode::Stopping);
    }

    #[test]
    fn stop_after_fault_keeps_fault_reason() {
        let s = state();
        s.start();
        s.fault("boom");
        assert!(!s.request_stop().changed());
        assert_eq!(s.last_fault().as_deref(), Some("boom"));
    }

    #[test]
    fn concurrent_pause_resume_settles_on_last_valid_transition() {
        let s = state();
        s.start();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = Arc::clone(&s);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            s.pause();
                        } else {
                            s.resume();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // Generation counts exactly the applied transitions, so it is odd
        // (start + pairs) iff the last applied transition was a resume.
        let snap = s.snapshot();
        match snap.mode {
            RunMode::Running => assert_eq!(snap.generation % 2, 1),
            RunMode::Paused => assert_eq!(snap.generation % 2, 0),
            other => panic!("unexpected mode {other}"),
        }

        s.pause();
        s.resume();
        s.pause();
        assert_eq!(s.mode(), RunMode::Paused);
    }

    #[test]
    fn wait_until_wakes_on_transition() {
        let s = state();
        s.start();
        let waiter = {
            let s = Arc::clone(&s);
            thread::spawn(move || s.wait_until(RunMode::is_stopping_or_stopped, None))
        };
        thread::sleep(Duration::from_millis(20));
        s.request_stop();
        let snap = waiter.join().unwrap();
        assert_eq!(snap.mode, RunMode::Stopping);
    }

    #[test]
    fn wait_until_times_out() {
        let s = state();
        let snap = s.wait_until(
            RunMode::is_stopping_or_stopped,
            Some(Duration::from_millis(10)),
        );
        assert_eq!(snap.mode, RunMode::Initializing);
    }

    #[test]
    fn setpoints_round_trip() {
        let s = state();
        s.store_setpoints(&[0.1, 0.2]);
        assert_eq!(s.setpoints(), vec![0.1, 0.2]);
    }
}
