/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Control-algorithm interface.
//!
//! The RTC loop calls [`ControlAlgorithm::step`] once per RUNNING tick with
//! the new sensor sample, the setpoints currently applied to hardware and the
//! beam configuration.  A step either returns new setpoints plus diagnostics
//! or an [`AlgorithmError`]; it never panics into the loop.
//!
//! The reference controllers in [`controllers`] work on a simple error
//! signal (see [`error_signal`]).  Production reconstructors (interaction
//! matrices, modal projection) plug in through the same trait.

pub mod controllers;

pub use controllers::{HoldAlgorithm, LeakyIntegrator, Pid};

use thiserror::Error;

use crate::config::{BeamConfig, ControllerKind};
use crate::hardware::SensorSample;

// ── Output types ──────────────────────────────────────────────────────────────

/// Per-step diagnostics carried into telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Diagnostics {
    /// At least one actuator command hit the output clamp.
    pub saturated: bool,
    /// RMS of the error signal fed to the controller.
    pub residual_rms: f64,
    /// Mean sensor flux for this frame.
    pub flux: f64,
}

/// Result of one successful algorithm step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub setpoints: Vec<f64>,
    pub diagnostics: Diagnostics,
}

/// Failure of a single algorithm step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlgorithmError {
    #[error("setpoint vector has {got} entries, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("sensor frame is empty")]
    EmptyFrame,

    #[error("non-finite command for actuator {index}")]
    NonFinite { index: usize },

    /// The control law panicked; the loop caught it and carried on.
    #[error("algorithm panicked: {message}")]
    Panicked { message: String },
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// A pluggable control law.
///
/// `step` takes `&mut self` so stateful controllers (PID history) can keep
/// their memory between ticks; stateless ones derive everything from the
/// arguments.
pub trait ControlAlgorithm: Send {
    fn name(&self) -> &'static str;

    fn step(
        &mut self,
        sample: &SensorSample,
        current: &[f64],
        config: &BeamConfig,
    ) -> Result<StepOutput, AlgorithmError>;

    /// Clears internal memory.  The loop calls this when it leaves PAUSED.
    fn reset(&mut self) {}
}

/// Builds the controller selected by `rtc.controller.kind`.
pub fn build_algorithm(config: &BeamConfig) -> Box<dyn ControlAlgorithm> {
    let c = &config.rtc.controller;
    match c.kind {
        ControllerKind::None => Box::new(HoldAlgorithm),
        ControllerKind::Leaky => Box::new(LeakyIntegrator::new(c.gain, c.leak, c.limit)),
        ControllerKind::Pid => Box::new(Pid::new(
            c.kp,
            c.ki,
            c.kd,
            config.rtc.tick_period().as_secs_f64(),
            c.limit,
        )),
    }
}

// ── Error signal ──────────────────────────────────────────────────────────────

/// Reduces a sensor frame to `n` values by block-averaging consecutive pixels
/// and subtracting the frame mean.
///
/// Pixel `p` of `P` falls in block `p * n / P`; when `P < n` blocks reuse the
/// nearest pixel so every actuator gets a value.
pub fn error_signal(sample: &SensorSample, n: usize) -> Result<Vec<f64>, AlgorithmError> {
    let pixels = &sample.pixels;
    if pixels.is_empty() {
        return Err(AlgorithmError::EmptyFrame);
    }
    let mean = sample.mean();
    let p = pixels.len();
    let signal = (0..n)
        .map(|i| {
            let start = (i * p / n).min(p - 1);
            let end = ((i + 1) * p / n).clamp(start + 1, p);
            let block = &pixels[start..end];
            let avg = block.iter().map(|&v| f64::from(v)).sum::<f64>() / block.len() as f64;
            avg - mean
        })
        .collect();
    Ok(signal)
}

pub(crate) fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pixels: Vec<f32>) -> SensorSample {
        SensorSample {
            frame_id: 1,
            timestamp_ns: 0,
            rows: 1,
            cols: pixels.len(),
            pixels,
        }
    }

    #[test]
    fn error_signal_block_averages_and_removes_mean() {
        let s = sample(vec![1.0, 1.0, 3.0, 3.0]);
        assert_eq!(error_signal(&s, 2).unwrap(), vec![-1.0, 1.0]);
    }

    #[test]
    fn error_signal_handles_more_actuators_than_pixels() {
        let s = sample(vec![0.0, 2.0]);
        let e = error_signal(&s, 4).unwrap();
        assert_eq!(e.len(), 4);
        assert_eq!(e, vec![-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn error_signal_rejects_empty_frame() {
        let s = sample(vec![]);
        assert_eq!(error_signal(&s, 3), Err(AlgorithmError::EmptyFrame));
    }

    #[test]
    fn build_algorithm_follows_config() {
        let mut cfg = BeamConfig::default();
        assert_eq!(build_algorithm(&cfg).name(), "leaky");
        cfg.rtc.controller.kind = ControllerKind::Pid;
        assert_eq!(build_algorithm(&cfg).name(), "pid");
        cfg.rtc.controller.kind = ControllerKind::None;
        assert_eq!(build_algorithm(&cfg).name(), "none");
    }

    #[test]
    fn rms_of_known_vector() {
        assert_eq!(rms(&[3.0, -3.0]), 3.0);
        assert_eq!(rms(&[]), 0.0);
    }
}
