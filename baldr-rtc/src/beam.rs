/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Beam process: wires the shared state, the three threads and the
//! collaborators together, and tears them down in order.
//!
//! ```text
//! start()                                   shutdown()
//!   validate config                           mode → STOPPING
//!   BeamState (INITIALIZING)                  join rtc-loop (bounded)
//!   TelemetryRing                             stop telemetry-writer (drains)
//!   bind commander endpoint                   stop commander, unbind
//!   spawn telemetry-writer                    hardware.shutdown()
//!   spawn rtc-loop                            mode → STOPPED
//!   spawn commander
//!   mode → RUNNING
//! ```
//!
//! A loop that misses its join deadline is detached.  Its hardware stays
//! live in that case: `hardware.shutdown()` is skipped and the report says
//! so.
//!
//! The endpoint is bound before any thread starts, so a bad endpoint fails
//! start-up cleanly.  A failure after that point tears down whatever was
//! already running.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::algorithm::ControlAlgorithm;
use crate::commander::{CommandServer, Dispatcher, ServerHandle};
use crate::config::BeamConfig;
use crate::hardware::Hardware;
use crate::rtc::{LoopReport, RtcLoop};
use crate::state::{BeamState, ModeSnapshot, RunMode};
use crate::telemetry::ring::RingStats;
use crate::telemetry::{
    TelemetryRing, TelemetrySink, TelemetryWriter, WriterHandle, WriterReport, WriterSettings,
};

/// Ticks the RTC loop gets to notice STOPPING before it is detached.
const RTC_JOIN_TICKS: u32 = 3;

/// Lower bound on the RTC join wait, for fast loop rates.
const RTC_JOIN_FLOOR: Duration = Duration::from_millis(250);

/// Why the RTC loop produced no report at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RtcJoinFailure {
    /// Still running when the grace period ran out.
    Detached,
    Panicked,
}

/// Everything the core needs from outside.
pub struct Collaborators {
    pub hardware: Arc<dyn Hardware>,
    pub algorithm: Box<dyn ControlAlgorithm>,
    pub sink: Box<dyn TelemetrySink>,
    /// Let the commander turn Ctrl-C into `stop_baldr`.
    pub stop_on_ctrl_c: bool,
}

/// Outcome of [`BeamProcess::shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// `None` when the loop did not exit within its grace period.
    pub rtc: Option<LoopReport>,
    pub telemetry: WriterReport,
    pub ring: RingStats,
    pub last_fault: Option<String>,
    /// `false` when the loop was detached and the hardware left running.
    pub hardware_released: bool,
}

impl ShutdownReport {
    /// Stopped on request, with every thread joined.
    pub fn is_clean(&self) -> bool {
        self.rtc.is_some() && self.last_fault.is_none() && self.hardware_released
    }
}

pub struct BeamProcess {
    state: Arc<BeamState>,
    hardware: Arc<dyn Hardware>,
    ring: Arc<TelemetryRing>,
    addr: SocketAddr,
    rtc: Option<JoinHandle<LoopReport>>,
    writer: Option<WriterHandle>,
    server: Option<ServerHandle>,
    report: Option<ShutdownReport>,
}

impl BeamProcess {
    /// Builds and starts every component, leaving the beam RUNNING.
    ///
    /// # Errors
    /// Invalid configuration, an endpoint that cannot be bound, or a thread
    /// that cannot be spawned.
    pub fn start(config: BeamConfig, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let config = Arc::new(config);
        let beam = config.beam;

        let state = Arc::new(BeamState::new(Arc::clone(&config)));
        let ring = Arc::new(TelemetryRing::new(
            config.telemetry.capacity,
            config.telemetry.fill_threshold(),
        ));
        let writer = TelemetryWriter::new(
            Arc::clone(&ring),
            parts.sink,
            WriterSettings::from_config(&config.telemetry),
        );

        let dispatcher = Dispatcher::new(
            Arc::clone(&state),
            Arc::clone(&parts.hardware),
            Arc::clone(&ring),
            writer.stats(),
        );
        let server = CommandServer::bind(&endpoint, dispatcher, config.commander.max_sessions)?
            .stop_on_ctrl_c(parts.stop_on_ctrl_c);
        let addr = server.local_addr().context("Cannot read commander address")?;

        // From here on, dropping `process` on an error path shuts down
        // whatever has been started.
        let mut process = Self {
            state: Arc::clone(&state),
            hardware: Arc::clone(&parts.hardware),
            ring: Arc::clone(&ring),
            addr,
            rtc: None,
            writer: None,
            server: None,
            report: None,
        };

        process.writer = Some(writer.spawn().context("Cannot spawn telemetry writer")?);
        process.rtc = Some(
            RtcLoop::new(Arc::clone(&state), parts.hardware, parts.algorithm, ring)
                .spawn()
                .context("Cannot spawn RTC loop")?,
        );
        process.server = Some(server.spawn().context("Cannot spawn commander")?);

        state.start();
        info!(
            beam,
            endpoint = %addr,
            rate_hz = config.rtc.loop_rate_hz,
            capacity = config.telemetry.capacity,
            "beam process running"
        );
        Ok(process)
    }

    pub fn state(&self) -> &Arc<BeamState> {
        &self.state
    }

    /// Address the commander actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Blocks until a stop was requested (command, fault or signal).
    pub fn wait_for_stop_request(&self, timeout: Option<Duration>) -> ModeSnapshot {
        self.state
            .wait_until(RunMode::is_stopping_or_stopped, timeout)
    }

    /// Waits for a stop request, then shuts down.
    pub fn run_until_stopped(mut self) -> ShutdownReport {
        self.wait_for_stop_request(None);
        self.shutdown()
    }

    /// Ordered teardown.  Runs once; later calls return the first report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let beam = self.state.beam();
        self.state.request_stop();
        info!(beam, "beam process shutting down");

        let joined = self.rtc.take().map(|handle| self.join_rtc(handle));
        let detached = matches!(joined, Some(Err(RtcJoinFailure::Detached)));
        let rtc = joined.and_then(Result::ok);

        let telemetry = match self.writer.take() {
            Some(writer) => writer.stop(),
            None => WriterReport::default(),
        };

        if let Some(server) = self.server.take() {
            server.shutdown();
        }

        let hardware_released = if detached {
            warn!(beam, "RTC loop still running, leaving hardware open");
            false
        } else {
            self.hardware.shutdown();
            true
        };
        self.state.mark_stopped();

        let report = ShutdownReport {
            rtc,
            telemetry,
            ring: self.ring.stats(),
            last_fault: self.state.last_fault(),
            hardware_released,
        };
        info!(
            beam,
            ticks = report.rtc.map(|r| r.ticks),
            written = report.telemetry.written,
            ring_dropped = report.ring.dropped,
            storage_dropped = report.telemetry.storage_dropped,
            fault = report.last_fault.as_deref().unwrap_or("none"),
            "beam process stopped"
        );
        self.report = Some(report.clone());
        report
    }

    fn join_rtc(&self, handle: JoinHandle<LoopReport>) -> Result<LoopReport, RtcJoinFailure> {
        let grace = (self.state.config().rtc.tick_period() * RTC_JOIN_TICKS).max(RTC_JOIN_FLOOR);
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "RTC loop did not exit in time, detaching"
                );
                return Err(RtcJoinFailure::Detached);
            }
            thread::sleep(Duration::from_millis(1));
        }
        handle.join().map_err(|_| {
            error!("RTC loop thread panicked");
            RtcJoinFailure::Panicked
        })
    }
}

impl Drop for BeamProcess {
    fn drop(&mut self) {
        if self.report.is_none() {
            self.shutdown();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
