/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Run mode and transition outcome types.
//!
//! ```text
//!                ┌──────────┐ pauseRTC  ┌────────┐
//! INITIALIZING ─►│ RUNNING  │──────────►│ PAUSED │
//!       │        │          │◄──────────│        │
//!       │        └────┬─────┘ resumeRTC └───┬────┘
//!       │             │ stop_baldr / fault  │
//!       └─────────────┴──────────┬──────────┘
//!                                ▼
//!                           STOPPING ──► STOPPED
//! ```

use std::fmt;

use serde::Serialize;

/// Controller run mode.  The discriminant is the tag stored in the packed
/// state word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum RunMode {
    Initializing = 0,
    Running = 1,
    Paused = 2,
    Stopping = 3,
    Stopped = 4,
}

impl RunMode {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(RunMode::Initializing),
            1 => Some(RunMode::Running),
            2 => Some(RunMode::Paused),
            3 => Some(RunMode::Stopping),
            4 => Some(RunMode::Stopped),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Initializing => "INITIALIZING",
            RunMode::Running => "RUNNING",
            RunMode::Paused => "PAUSED",
            RunMode::Stopping => "STOPPING",
            RunMode::Stopped => "STOPPED",
        }
    }

    pub fn is_stopping_or_stopped(self) -> bool {
        matches!(self, RunMode::Stopping | RunMode::Stopped)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a transition request on [`BeamState`](super::BeamState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The mode changed and the generation was bumped.
    Applied {
        from: RunMode,
        to: RunMode,
        generation: u64,
    },
    /// The requested mode was already in force.
    Unchanged { mode: RunMode },
    /// The requested mode is not reachable from the current one.
    Rejected { current: RunMode, requested: RunMode },
}

impl Transition {
    pub fn changed(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// Mode in force after the request.
    pub fn mode(&self) -> RunMode {
        match *self {
            Transition::Applied { to, .. } => to,
            Transition::Unchanged { mode } => mode,
            Transition::Rejected { current, .. } => current,
        }
    }

    /// Operator-facing description used in commander replies.
    pub fn describe(&self) -> String {
        match self {
            Transition::Applied { from, to, generation } => {
                format!("{from} -> {to} (generation {generation})")
            }
            Transition::Unchanged { mode } => format!("already {mode}, no change"),
            Transition::Rejected { current, requested } => {
                format!("cannot enter {requested} from {current}, no change")
            }
        }
    }
}
