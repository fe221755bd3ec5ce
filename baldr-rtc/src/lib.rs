/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Baldr – per-beam adaptive-optics real-time controller
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/       – YAML beam configuration, defaults, validation
//! ├── state/        – BeamState: run mode + generation, setpoints, fault
//! ├── hardware/     – Hardware trait, null backend, scriptable fake
//! ├── algorithm/    – ControlAlgorithm trait + reference controllers
//! ├── telemetry/    – frame type, ring buffer, writer thread, sinks
//! ├── rtc/          – fixed-rate control loop thread
//! ├── commander/    – TCP request/reply server, protocol, dispatch
//! └── beam.rs       – composition root: start-up and ordered shutdown
//! ```

pub mod algorithm;
pub mod beam;
pub mod commander;
pub mod config;
pub mod hardware;
pub mod rtc;
pub mod state;
pub mod telemetry;
