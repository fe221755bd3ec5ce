/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The closed command set and the reply type.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Command ───────────────────────────────────────────────────────────────────

/// Every request the commander understands.  Wire names are case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Status,
    CloseAll,
    OpenAll,
    CloseLo,
    OpenLo,
    CloseHo,
    OpenHo,
    PauseRtc,
    ResumeRtc,
    StopBaldr,
    /// Alias of `stop_baldr` kept for older clients.
    Exit,
    /// Parses and validates a configuration file without applying it.
    ReadConfig,
}

/// Dispatch category of a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Query,
    HardwareMacro,
    Lifecycle,
    Configuration,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::Status,
        Command::CloseAll,
        Command::OpenAll,
        Command::CloseLo,
        Command::OpenLo,
        Command::CloseHo,
        Command::OpenHo,
        Command::PauseRtc,
        Command::ResumeRtc,
        Command::StopBaldr,
        Command::Exit,
        Command::ReadConfig,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::CloseAll => "close_all",
            Command::OpenAll => "open_all",
            Command::CloseLo => "close_baldr_LO",
            Command::OpenLo => "open_baldr_LO",
            Command::CloseHo => "close_baldr_HO",
            Command::OpenHo => "open_baldr_HO",
            Command::PauseRtc => "pauseRTC",
            Command::ResumeRtc => "resumeRTC",
            Command::StopBaldr => "stop_baldr",
            Command::Exit => "exit",
            Command::ReadConfig => "readBDRConfig",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn category(self) -> Category {
        match self {
            Command::Status => Category::Query,
            Command::CloseAll
            | Command::OpenAll
            | Command::CloseLo
            | Command::OpenLo
            | Command::CloseHo
            | Command::OpenHo => Category::HardwareMacro,
            Command::PauseRtc | Command::ResumeRtc | Command::StopBaldr | Command::Exit => {
                Category::Lifecycle
            }
            Command::ReadConfig => Category::Configuration,
        }
    }

    /// Number of positional arguments the command requires.
    pub fn arity(self) -> usize {
        match self {
            Command::ReadConfig => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// A decoded request: the command and its positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub args: Vec<Value>,
}

impl From<Command> for Request {
    fn from(command: Command) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// One reply line: `{"ok": bool, "message": str, "data": any?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }

    /// Serialized reply without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"message":"reply could not be encoded"}"#.to_string()
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_round_trip() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_name(cmd.name()), Some(cmd));
        }
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_eq!(Command::from_name("pauseRTC"), Some(Command::PauseRtc));
        assert_eq!(Command::from_name("pausertc"), None);
        assert_eq!(Command::from_name("close_baldr_lo"), None);
    }

    #[test]
    fn categories() {
        assert_eq!(Command::Status.category(), Category::Query);
        assert_eq!(Command::OpenHo.category(), Category::HardwareMacro);
        assert_eq!(Command::StopBaldr.category(), Category::Lifecycle);
        assert_eq!(Command::Exit.category(), Category::Lifecycle);
        assert_eq!(Command::ReadConfig.category(), Category::Configuration);
    }

    #[test]
    fn only_read_config_takes_an_argument() {
        for cmd in Command::ALL {
            let expected = usize::from(cmd == Command::ReadConfig);
            assert_eq!(cmd.arity(), expected, "{cmd}");
        }
        assert_eq!(Command::from_name("readBDRConfig"), Some(Command::ReadConfig));
        assert_eq!(Command::from_name("exit"), Some(Command::Exit));
    }

    #[test]
    fn reply_line_omits_missing_data() {
        let line = CommandResult::failure("nope").to_line();
        assert_eq!(line, r#"{"ok":false,"message":"nope"}"#);

        let line = CommandResult::success_with("fine", json!({"n": 1})).to_line();
        let back: CommandResult = serde_json::from_str(&line).unwrap();
        assert!(back.ok);
        assert_eq!(back.data, Some(json!({"n": 1})));
    }
}
