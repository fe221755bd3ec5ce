/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Hardware capability interface (sensor read, actuator write, control
//! elements).
//!
//! Real drivers (camera shared memory, DM channels) live outside this crate
//! and implement [`Hardware`].  Two in-tree implementations exist:
//!
//! * [`NullHardware`] – zero frames, accepts every command.  Lets the full
//!   process run on a workstation without devices.
//! * [`fake::FakeHardware`] – scripted failures for exercising fault paths.
//!
//! Every method takes `&self`: one instance is shared as
//! `Arc<dyn Hardware>` between the RTC loop (sensor/actuator) and the
//! commander (element macros), so implementations use interior mutability.

pub mod fake;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{bail, Result};
use thiserror::Error;
use tracing::debug;

use crate::config::IoConfig;

// ── Sensor sample ─────────────────────────────────────────────────────────────

/// One camera frame.  Shared (`Arc`) between the algorithm step and the
/// telemetry frame recorded for that tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub frame_id: u64,
    /// Monotonic acquisition time in nanoseconds, backend-defined origin.
    pub timestamp_ns: u64,
    pub rows: usize,
    pub cols: usize,
    /// Row-major pixel values, `rows * cols` long.
    pub pixels: Vec<f32>,
}

impl SensorSample {
    pub fn zeros(frame_id: u64, timestamp_ns: u64, rows: usize, cols: usize) -> Self {
        Self {
            frame_id,
            timestamp_ns,
            rows,
            cols,
            pixels: vec![0.0; rows * cols],
        }
    }

    /// Mean pixel value (total flux per pixel).
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / self.pixels.len() as f64
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure reported by a hardware backend for a single call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HardwareError {
    /// The device did not answer within its bounded latency.
    #[error("hardware timeout after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// The device answered with an error.
    #[error("device error: {0}")]
    Device(String),

    /// Setpoint vector length does not match the actuator count.
    #[error("expected {expected} actuator values, got {got}")]
    WrongLength { expected: usize, got: usize },

    /// `open`/`close` named an element the backend does not expose.
    #[error("unknown control element '{0}'")]
    UnknownElement(String),
}

// ── Capability trait ──────────────────────────────────────────────────────────

/// Everything the core needs from the beam's devices.
///
/// Implementations must bound the worst-case latency of `read_sensor` and
/// `apply_setpoints`; the RTC loop calls them on every tick.
pub trait Hardware: Send + Sync {
    /// Acquire the next sensor frame.
    fn read_sensor(&self) -> Result<SensorSample, HardwareError>;

    /// Send a full actuator command vector.
    fn apply_setpoints(&self, setpoints: &[f64]) -> Result<(), HardwareError>;

    /// Names of the control elements the `open`/`close` macros act on.
    fn elements(&self) -> Vec<String>;

    fn open(&self, element: &str) -> Result<(), HardwareError>;

    fn close(&self, element: &str) -> Result<(), HardwareError>;

    /// Best-effort release of device handles at process shutdown.
    fn shutdown(&self) {}
}

// ── Null backend ──────────────────────────────────────────────────────────────

/// In-process stand-in: zero frames of a fixed shape, records the last
/// actuator command.
#[derive(Debug)]
pub struct NullHardware {
    rows: usize,
    cols: usize,
    n_actuators: usize,
    elements: BTreeSet<String>,
    frame_id: AtomicU64,
    epoch: Instant,
    last_command: Mutex<Vec<f64>>,
}

impl NullHardware {
    pub fn new(io: &IoConfig, n_actuators: usize) -> Self {
        Self {
            rows: io.sensor_shape[0],
            cols: io.sensor_shape[1],
            n_actuators,
            elements: io.elements.iter().cloned().collect(),
            frame_id: AtomicU64::new(0),
            epoch: Instant::now(),
            last_command: Mutex::new(vec![0.0; n_actuators]),
        }
    }

    /// Last command vector accepted by [`apply_setpoints`](Hardware::apply_setpoints).
    pub fn last_command(&self) -> Vec<f64> {
        self.last_command
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_element(&self, element: &str) -> Result<(), HardwareError> {
        if self.elements.contains(element) {
            Ok(())
        } else {
            Err(HardwareError::UnknownElement(element.to_string()))
        }
    }
}

impl Hardware for NullHardware {
    fn read_sensor(&self) -> Result<SensorSample, HardwareError> {
        let id = self.frame_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SensorSample::zeros(
            id,
            self.epoch.elapsed().as_nanos() as u64,
            self.rows,
            self.cols,
        ))
    }

    fn apply_setpoints(&self, setpoints: &[f64]) -> Result<(), HardwareError> {
        if setpoints.len() != self.n_actuators {
            return Err(HardwareError::WrongLength {
                expected: self.n_actuators,
                got: setpoints.len(),
            });
        }
        let mut last = self
            .last_command
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.clear();
        last.extend_from_slice(setpoints);
        Ok(())
    }

    fn elements(&self) -> Vec<String> {
        self.elements.iter().cloned().collect()
    }

    fn open(&self, element: &str) -> Result<(), HardwareError> {
        self.check_element(element)?;
        debug!(element, "null hardware: open");
        Ok(())
    }

    fn close(&self, element: &str) -> Result<(), HardwareError> {
        self.check_element(element)?;
        debug!(element, "null hardware: close");
        Ok(())
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Builds the backend named by `io.mode`.
///
/// # Errors
/// Device backends (`shm`, `zmq`, `simulation`) are provided by driver crates
/// and are rejected here.
pub fn make_hardware(io: &IoConfig, n_actuators: usize) -> Result<Arc<dyn Hardware>> {
    match io.mode.trim().to_ascii_lowercase().as_str() {
        "null" | "" => Ok(Arc::new(NullHardware::new(io, n_actuators))),
        other => bail!("io.mode '{other}' has no driver in this build (available: null)"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
