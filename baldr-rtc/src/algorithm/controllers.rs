/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Reference control laws.
//!
//! All three clamp their output to `[-limit, limit]` and flag saturation in
//! [`Diagnostics`] when the clamp engages.

use super::{error_signal, rms, AlgorithmError, ControlAlgorithm, Diagnostics, StepOutput};
use crate::config::BeamConfig;
use crate::hardware::SensorSample;

fn check_len(current: &[f64], expected: usize) -> Result<(), AlgorithmError> {
    if current.len() == expected {
        Ok(())
    } else {
        Err(AlgorithmError::DimensionMismatch {
            expected,
            got: current.len(),
        })
    }
}

/// Clamps in place; returns `true` if any value was limited.  A negative or
/// NaN `limit` clamps to zero.
fn clamp_all(values: &mut [f64], limit: f64) -> Result<bool, AlgorithmError> {
    let limit = limit.max(0.0);
    let mut saturated = false;
    for (index, v) in values.iter_mut().enumerate() {
        if !v.is_finite() {
            return Err(AlgorithmError::NonFinite { index });
        }
        if v.abs() > limit {
            *v = v.clamp(-limit, limit);
            saturated = true;
        }
    }
    Ok(saturated)
}

// ── Hold ──────────────────────────────────────────────────────────────────────

/// Open loop: re-applies the current setpoints unchanged.
#[derive(Debug, Default)]
pub struct HoldAlgorithm;

impl ControlAlgorithm for HoldAlgorithm {
    fn name(&self) -> &'static str {
        "none"
    }

    fn step(
        &mut self,
        sample: &SensorSample,
        current: &[f64],
        config: &BeamConfig,
    ) -> Result<StepOutput, AlgorithmError> {
        check_len(current, config.rtc.n_actuators)?;
        Ok(StepOutput {
            setpoints: current.to_vec(),
            diagnostics: Diagnostics {
                flux: sample.mean(),
                ..Diagnostics::default()
            },
        })
    }
}

// ── Leaky integrator ──────────────────────────────────────────────────────────

/// `u ← clamp(leak·u + gain·e)`.
///
/// Stateless: the integrator state *is* the setpoint vector the loop passes
/// in, so a step is a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct LeakyIntegrator {
    gain: f64,
    leak: f64,
    limit: f64,
}

impl LeakyIntegrator {
    pub fn new(gain: f64, leak: f64, limit: f64) -> Self {
        Self { gain, leak, limit }
    }
}

impl ControlAlgorithm for LeakyIntegrator {
    fn name(&self) -> &'static str {
        "leaky"
    }

    fn step(
        &mut self,
        sample: &SensorSample,
        current: &[f64],
        config: &BeamConfig,
    ) -> Result<StepOutput, AlgorithmError> {
        check_len(current, config.rtc.n_actuators)?;
        let e = error_signal(sample, current.len())?;
        let mut u: Vec<f64> = current
            .iter()
            .zip(&e)
            .map(|(u, e)| self.leak * u + self.gain * e)
            .collect();
        let saturated = clamp_all(&mut u, self.limit)?;
        Ok(StepOutput {
            setpoints: u,
            diagnostics: Diagnostics {
                saturated,
                residual_rms: rms(&e),
                flux: sample.mean(),
            },
        })
    }
}

// ── PID ───────────────────────────────────────────────────────────────────────

/// Per-actuator PID on the error signal:
/// `u = kp·e + ki·∫e dt + kd·de/dt`.
///
/// Keeps integral and previous-error history; [`reset`](ControlAlgorithm::reset)
/// clears both.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    dt: f64,
    limit: f64,
    integral: Vec<f64>,
    prev_error: Vec<f64>,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64, dt: f64, limit: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            dt,
            limit,
            integral: Vec::new(),
            prev_error: Vec::new(),
        }
    }
}

impl ControlAlgorithm for Pid {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn step(
        &mut self,
        sample: &SensorSample,
        current: &[f64],
        config: &BeamConfig,
    ) -> Result<StepOutput, AlgorithmError> {
        check_len(current, config.rtc.n_actuators)?;
        let e = error_signal(sample, current.len())?;
        if self.integral.len() != e.len() {
            self.integral = vec![0.0; e.len()];
            self.prev_error = vec![0.0; e.len()];
        }

        let mut u = Vec::with_capacity(e.len());
        for (i, &err) in e.iter().enumerate() {
            self.integral[i] += err * self.dt;
            let derivative = (err - self.prev_error[i]) / self.dt;
            self.prev_error[i] = err;
            u.push(self.kp * err + self.ki * self.integral[i] + self.kd * derivative);
        }
        let saturated = clamp_all(&mut u, self.limit)?;

        Ok(StepOutput {
            setpoints: u,
            diagnostics: Diagnostics {
                saturated,
                residual_rms: rms(&e),
                flux: sample.mean(),
            },
        })
    }

    fn reset(&mut self) {
        self.integral.iter_mut().for_each(|v| *v = 0.0);
        self.prev_error.iter_mut().for_each(|v| *v = 0.0);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
