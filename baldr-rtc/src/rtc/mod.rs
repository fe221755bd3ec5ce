/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-rate real-time control loop.
//!
//! The loop owns the algorithm and a private copy of the active setpoints.
//! At every tick boundary it reads the run mode once and acts on it:
//!
//! | Mode | Tick |
//! |---|---|
//! | `INITIALIZING` | idle, no frame |
//! | `RUNNING` | sensor → algorithm → actuators → state → frame |
//! | `PAUSED` | `PAUSED` frame only; the algorithm is reset on resume |
//! | `STOPPING` / `STOPPED` | exit |
//!
//! A failed collaborator call marks that tick's frame and the loop carries
//! on.  A panicking algorithm counts as an algorithm failure.  `fault_threshold` consecutive failures record a fault on the beam
//! state (one transition to `STOPPING`), publish a final `FAULT` frame and
//! end the thread.
//!
//! Scheduling sleeps until the next deadline.  A tick that ends past its
//! deadline counts as an overrun and the schedule restarts from "now"
//! instead of running catch-up ticks back to back.

use std::any::Any;
use std::io;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmError, ControlAlgorithm, Diagnostics};
use crate::hardware::{Hardware, HardwareError};
use crate::state::{BeamState, ModeSnapshot, RunMode};
use crate::telemetry::{FrameStatus, TelemetryFrame, TelemetryRing};

// ── Tick failures ─────────────────────────────────────────────────────────────

/// Why a RUNNING tick did not complete.
#[derive(Debug, Error)]
enum TickFailure {
    #[error("sensor read failed: {0}")]
    Sensor(HardwareError),

    #[error("algorithm step failed: {0}")]
    Algorithm(AlgorithmError),

    #[error("actuator write failed: {0}")]
    Actuator(HardwareError),
}

impl TickFailure {
    fn status(&self) -> FrameStatus {
        match self {
            TickFailure::Sensor(HardwareError::Timeout { .. }) => FrameStatus::Timeout,
            TickFailure::Sensor(_) => FrameStatus::SensorError,
            TickFailure::Algorithm(_) => FrameStatus::AlgorithmError,
            TickFailure::Actuator(_) => FrameStatus::ActuatorError,
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Summary returned by the loop thread when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopReport {
    /// Ticks that published a frame (RUNNING and PAUSED).
    pub ticks: u64,
    pub overruns: u64,
    /// The loop ended because of its own fault escalation.
    pub faulted: bool,
}

// ── Loop ──────────────────────────────────────────────────────────────────────

pub struct RtcLoop {
    state: Arc<BeamState>,
    hardware: Arc<dyn Hardware>,
    algorithm: Box<dyn ControlAlgorithm>,
    ring: Arc<TelemetryRing>,
    period: Duration,
    fault_threshold: u32,
    setpoints: Vec<f64>,
    consecutive_failures: u32,
    was_paused: bool,
    report: LoopReport,
}

impl RtcLoop {
    pub fn new(
        state: Arc<BeamState>,
        hardware: Arc<dyn Hardware>,
        algorithm: Box<dyn ControlAlgorithm>,
        ring: Arc<TelemetryRing>,
    ) -> Self {
        let rtc = &state.config().rtc;
        let period = rtc.tick_period();
        let fault_threshold = rtc.fault_threshold.max(1);
        let setpoints = state.setpoints();
        Self {
            state,
            hardware,
            algorithm,
            ring,
            period,
            fault_threshold,
            setpoints,
            consecutive_failures: 0,
            was_paused: false,
            report: LoopReport::default(),
        }
    }

    /// Runs the loop on a dedicated `rtc-loop` thread.
    pub fn spawn(self) -> io::Result<JoinHandle<LoopReport>> {
        thread::Builder::new()
            .name("rtc-loop".to_string())
            .spawn(move || self.run())
    }

    /// Ticks at the configured rate until the mode leaves the live states.
    pub fn run(mut self) -> LoopReport {
        info!(
            beam = self.state.beam(),
            rate_hz = self.state.config().rtc.loop_rate_hz,
            algorithm = self.algorithm.name(),
            fault_threshold = self.fault_threshold,
            "RTC loop started"
        );

        let mut next_tick = Instant::now();
        while self.tick().is_continue() {
            next_tick += self.period;
            let now = Instant::now();
            if now < next_tick {
                thread::sleep(next_tick - now);
            } else {
                self.report.overruns += 1;
                debug!(
                    late_us = (now - next_tick).as_micros() as u64,
                    "RTC tick overrun"
                );
                next_tick = now;
            }
        }

        info!(
            beam = self.state.beam(),
            ticks = self.report.ticks,
            overruns = self.report.overruns,
            faulted = self.report.faulted,
            "RTC loop exited"
        );
        self.report
    }

    /// Executes one tick.  `Break` means the loop must exit.
    pub fn tick(&mut self) -> ControlFlow<()> {
        let snap = self.state.snapshot();
        match snap.mode {
            RunMode::Stopping | RunMode::Stopped => ControlFlow::Break(()),
            RunMode::Initializing => ControlFlow::Continue(()),
            RunMode::Paused => {
                self.was_paused = true;
                let tick = self.state.record_tick();
                self.report.ticks += 1;
                self.ring.publish(TelemetryFrame::paused(
                    tick,
                    self.state.elapsed_ns(),
                    snap.generation,
                ));
                ControlFlow::Continue(())
            }
            RunMode::Running => {
                if self.was_paused {
                    self.was_paused = false;
                    self.algorithm.reset();
                    debug!(generation = snap.generation, "algorithm reset after pause");
                }
                self.running_tick(snap)
            }
        }
    }

    fn running_tick(&mut self, snap: ModeSnapshot) -> ControlFlow<()> {
        let tick = self.state.record_tick();
        self.report.ticks += 1;
        let mut frame = TelemetryFrame {
            tick,
            timestamp_ns: self.state.elapsed_ns(),
            mode: snap.mode,
            generation: snap.generation,
            sensor: None,
            setpoints: Vec::new(),
            status: FrameStatus::Ok,
            diagnostics: Diagnostics::default(),
            message: None,
        };

        match self.step(&mut frame) {
            Ok(()) => {
                self.consecutive_failures = 0;
                if frame.diagnostics.saturated {
                    frame.status = FrameStatus::Saturated;
                }
            }
            Err(failure) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!(tick, error = %failure, "RTC tick failed");
                } else {
                    debug!(
                        tick,
                        consecutive = self.consecutive_failures,
                        error = %failure,
                        "RTC tick failed"
                    );
                }
                frame.status = failure.status();
                frame.message = Some(failure.to_string());
            }
        }
        frame.setpoints = self.setpoints.clone();

        if self.consecutive_failures >= self.fault_threshold {
            let reason = format!(
                "{} consecutive failed ticks; last: {}",
                self.consecutive_failures,
                frame.message.as_deref().unwrap_or("unknown")
            );
            error!(beam = self.state.beam(), tick, reason = %reason, "RTC fault threshold reached");
            if self.state.fault(reason.clone()).changed() {
                frame.status = FrameStatus::Fault;
                frame.message = Some(reason);
                self.report.faulted = true;
            } else {
                debug!(tick, "stop already requested, fault not recorded");
            }
            self.ring.publish(frame);
            return ControlFlow::Break(());
        }

        self.ring.publish(frame);
        ControlFlow::Continue(())
    }

    /// Sensor → algorithm → actuators.  The beam state only sees setpoints
    /// the hardware accepted.
    fn step(&mut self, frame: &mut TelemetryFrame) -> Result<(), TickFailure> {
        let sample = Arc::new(self.hardware.read_sensor().map_err(TickFailure::Sensor)?);
        frame.sensor = Some(Arc::clone(&sample));

        let algorithm = &mut self.algorithm;
        let current = &self.setpoints;
        let config = self.state.config();
        let out = panic::catch_unwind(AssertUnwindSafe(|| {
            algorithm.step(&sample, current, config)
        }))
        .unwrap_or_else(|payload| {
            Err(AlgorithmError::Panicked {
                message: panic_message(payload.as_ref()),
            })
        })
        .map_err(TickFailure::Algorithm)?;
        frame.diagnostics = out.diagnostics;

        self.hardware
            .apply_setpoints(&out.setpoints)
            .map_err(TickFailure::Actuator)?;
        self.setpoints = out.setpoints;
        self.state.store_setpoints(&self.setpoints);
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
