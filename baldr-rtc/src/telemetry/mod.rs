/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Telemetry capture pipeline.
//!
//! ```text
//! RTC loop ──publish()──► TelemetryRing ──drain()──► TelemetryWriter ──append()──► TelemetrySink
//!  (producer, never waits)   fixed capacity           own thread, retries          JSON lines / discard
//! ```
//!
//! [`TelemetryFrame`]s move by value through the ring, so each one is
//! consumed exactly once.

pub mod ring;
pub mod sink;
pub mod writer;

pub use ring::TelemetryRing;
pub use sink::{DiscardSink, JsonLinesSink, SinkError, TelemetrySink};
pub use writer::{TelemetryWriter, WriterHandle, WriterReport, WriterSettings, WriterStats};

use std::sync::Arc;

use serde::Serialize;

use crate::algorithm::Diagnostics;
use crate::hardware::SensorSample;
use crate::state::RunMode;

// ── Frame status ──────────────────────────────────────────────────────────────

/// Outcome flag of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameStatus {
    Ok,
    /// Loop ticked in PAUSED; no algorithm step.
    Paused,
    /// Step succeeded but at least one command was clamped.
    Saturated,
    /// Sensor read exceeded its latency bound.
    Timeout,
    SensorError,
    AlgorithmError,
    ActuatorError,
    /// Final frame before the fault transition to STOPPING.
    Fault,
}

impl FrameStatus {
    /// `true` for statuses that count towards the fault threshold.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            FrameStatus::Timeout
                | FrameStatus::SensorError
                | FrameStatus::AlgorithmError
                | FrameStatus::ActuatorError
                | FrameStatus::Fault
        )
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One control-loop iteration's record.  Immutable once published.
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    /// Loop tick counter (paused ticks included).
    pub tick: u64,
    /// Monotonic nanoseconds since the beam state was created.
    pub timestamp_ns: u64,
    pub mode: RunMode,
    /// Mode generation observed at the start of the tick.
    pub generation: u64,
    /// Sample the step consumed; `None` for paused or failed-read ticks.
    pub sensor: Option<Arc<SensorSample>>,
    /// Setpoints in force after this tick.
    pub setpoints: Vec<f64>,
    pub status: FrameStatus,
    pub diagnostics: Diagnostics,
    /// Error text for failed ticks.
    pub message: Option<String>,
}

impl TelemetryFrame {
    /// Lightweight frame for a paused tick.
    pub fn paused(tick: u64, timestamp_ns: u64, generation: u64) -> Self {
        Self {
            tick,
            timestamp_ns,
            mode: RunMode::Paused,
            generation,
            sensor: None,
            setpoints: Vec::new(),
            status: FrameStatus::Paused,
            diagnostics: Diagnostics::default(),
            message: None,
        }
    }

    /// Serializable view written by the storage sinks.  The sensor frame is
    /// summarised, not dumped.
    pub fn record(&self) -> FrameRecord<'_> {
        FrameRecord {
            tick: self.tick,
            t_ns: self.timestamp_ns,
            mode: self.mode,
            generation: self.generation,
            status: self.status,
            sensor_frame_id: self.sensor.as_ref().map(|s| s.frame_id),
            flux: self.diagnostics.flux,
            residual_rms: self.diagnostics.residual_rms,
            setpoints: &self.setpoints,
            message: self.message.as_deref(),
        }
    }
}

/// JSON shape of one stored telemetry frame.
#[derive(Debug, Serialize)]
pub struct FrameRecord<'a> {
    pub tick: u64,
    pub t_ns: u64,
    pub mode: RunMode,
    pub generation: u64,
    pub status: FrameStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_frame_id: Option<u64>,
    pub flux: f64,
    pub residual_rms: f64,
    pub setpoints: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
