/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Command execution against the shared beam state and hardware.
//!
//! Runs on the commander side only.  Nothing here touches the RTC loop
//! directly: lifecycle commands are transitions on [`BeamState`], which the
//! loop observes at its next tick boundary.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::protocol::decode_line;
use super::{Command, CommandResult, Request};
use crate::config::BeamConfig;
use crate::hardware::Hardware;
use crate::state::{BeamState, ServoState, Transition};
use crate::telemetry::{TelemetryRing, WriterStats};

pub struct Dispatcher {
    state: Arc<BeamState>,
    hardware: Arc<dyn Hardware>,
    ring: Arc<TelemetryRing>,
    writer: Arc<WriterStats>,
}

impl Dispatcher {
    pub fn new(
        state: Arc<BeamState>,
        hardware: Arc<dyn Hardware>,
        ring: Arc<TelemetryRing>,
        writer: Arc<WriterStats>,
    ) -> Self {
        Self {
            state,
            hardware,
            ring,
            writer,
        }
    }

    pub fn state(&self) -> &Arc<BeamState> {
        &self.state
    }

    /// Decodes one raw request line and executes it.  Always yields exactly
    /// one reply.
    pub fn handle_line(&self, bytes: &[u8]) -> CommandResult {
        match decode_line(bytes) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                debug!(error = %e, "rejected request");
                CommandResult::failure(e.to_string())
            }
        }
    }

    pub fn dispatch(&self, request: impl Into<Request>) -> CommandResult {
        let Request { command, args } = request.into();
        match command {
            Command::Status => self.status(),
            Command::CloseAll => self.servo(self.hardware.elements(), ServoState::Closed),
            Command::OpenAll => self.servo(self.hardware.elements(), ServoState::Open),
            Command::CloseLo => self.servo(vec!["LO".to_string()], ServoState::Closed),
            Command::OpenLo => self.servo(vec!["LO".to_string()], ServoState::Open),
            Command::CloseHo => self.servo(vec!["HO".to_string()], ServoState::Closed),
            Command::OpenHo => self.servo(vec!["HO".to_string()], ServoState::Open),
            Command::PauseRtc => self.lifecycle(command, self.state.pause()),
            Command::ResumeRtc => self.lifecycle(command, self.state.resume()),
            Command::StopBaldr | Command::Exit => {
                self.lifecycle(command, self.state.request_stop())
            }
            Command::ReadConfig => match args.first().and_then(Value::as_str) {
                Some(path) => self.read_config(Path::new(path)),
                None => CommandResult::failure("readBDRConfig expects a file path string"),
            },
        }
    }

    // ── Query ─────────────────────────────────────────────────────────────────

    fn status(&self) -> CommandResult {
        let snap = self.state.snapshot();
        let cfg = self.state.config();
        let ring = self.ring.stats();
        let writer = self.writer.snapshot();

        let data = json!({
            "beam": cfg.beam,
            "mode": snap.mode,
            "generation": snap.generation,
            "ticks": self.state.ticks(),
            "elements": self.state.elements(),
            "telemetry": {
                "capacity": ring.capacity,
                "buffered": ring.buffered,
                "published": ring.published,
                "ring_dropped": ring.dropped,
                "written": writer.written,
                "storage_dropped": writer.storage_dropped,
                "write_failures": writer.write_failures,
                "degraded": writer.degraded,
            },
            "last_fault": self.state.last_fault(),
            "frequency": cfg.rtc.loop_rate_hz,
            "controller": cfg.rtc.controller.kind.as_str(),
            "phasemask": cfg.phasemask,
            "config_file": cfg
                .source
                .as_ref()
                .map_or_else(|| "default".to_string(), |p| p.display().to_string()),
            "n_setpoints": self.state.setpoints().len(),
        });
        CommandResult::success_with(format!("beam {} {}", cfg.beam, snap.mode), data)
    }

    // ── Hardware macros ───────────────────────────────────────────────────────

    fn servo(&self, elements: Vec<String>, target: ServoState) -> CommandResult {
        let verb = match target {
            ServoState::Open => "open",
            ServoState::Closed => "close",
        };

        let mut outcome = BTreeMap::new();
        let mut failures = Vec::new();
        for element in &elements {
            let result = match target {
                ServoState::Open => self.hardware.open(element),
                ServoState::Closed => self.hardware.close(element),
            };
            match result {
                Ok(()) => {
                    self.state.set_element(element, target);
                    outcome.insert(element.clone(), json!(target));
                }
                Err(e) => {
                    warn!(element = %element, error = %e, "{verb} failed");
                    failures.push(format!("{element}: {e}"));
                    outcome.insert(element.clone(), Value::String(e.to_string()));
                }
            }
        }

        let data = json!({ "elements": outcome });
        if failures.is_empty() {
            info!(elements = ?elements, "{verb} applied");
            CommandResult::success_with(format!("{verb} {}", elements.join(", ")), data)
        } else {
            CommandResult {
                ok: false,
                message: format!("{verb} failed for {}", failures.join("; ")),
                data: Some(data),
            }
        }
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    /// Loads and validates `path` for this beam.  The running configuration is
    /// immutable, so a valid file only takes effect on the next start.
    fn read_config(&self, path: &Path) -> CommandResult {
        let candidate = BeamConfig::load_from_file(path).and_then(|mut cfg| {
            cfg.beam = self.state.beam();
            cfg.validate()?;
            Ok(cfg)
        });
        match candidate {
            Ok(cfg) => {
                info!(path = %path.display(), "configuration file validated");
                CommandResult::success_with(
                    "configuration valid; restart the beam to apply it",
                    json!({
                        "config_file": path.display().to_string(),
                        "frequency": cfg.rtc.loop_rate_hz,
                        "controller": cfg.rtc.controller.kind.as_str(),
                        "n_actuators": cfg.rtc.n_actuators,
                        "applied": false,
                    }),
                )
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "configuration file rejected");
                CommandResult::failure(format!("{e:#}"))
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Transition requests always succeed; `changed` tells the client whether
    /// the mode actually moved.
    fn lifecycle(&self, command: Command, outcome: Transition) -> CommandResult {
        if !outcome.changed() {
            debug!(command = %command, outcome = %outcome.describe(), "transition not applied");
        }
        CommandResult::success_with(
            outcome.describe(),
            json!({
                "changed": outcome.changed(),
                "mode": outcome.mode(),
                "generation": self.state.snapshot().generation,
            }),
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
