/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Request line decoding.
//!
//! Accepted forms (one per line, trailing `\r\n` ignored):
//!
//! | Form | Example |
//! |---|---|
//! | bare name | `status` |
//! | name + JSON value | `pauseRTC 1` → args `[1]` (`null` means none) |
//! | name + JSON array | `pauseRTC [1, "a"]` → args `[1, "a"]` |
//! | name + comma list | `pauseRTC 1, "a"` → args `[1, "a"]` |
//! | structured | `{"command": "status", "args": []}` |
//!
//! The argument count must match [`Command::arity`]; only `readBDRConfig`
//! takes one (the file path).

use serde::Deserialize;
use serde_json::Value;

use super::{Command, ProtocolError, Request};

/// Longest accepted request line, newline excluded.
pub const MAX_REQUEST_BYTES: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredRequest {
    command: String,
    #[serde(default)]
    args: Value,
}

/// Decodes one raw line as received from the socket.
pub fn decode_line(bytes: &[u8]) -> Result<Request, ProtocolError> {
    let bytes = trim_line_ending(bytes);
    if bytes.len() > MAX_REQUEST_BYTES {
        return Err(ProtocolError::TooLong {
            max: MAX_REQUEST_BYTES,
        });
    }
    let line = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
    parse_request(line)
}

/// Parses a request line into a command, validating its argument count.
pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if line.starts_with('{') {
        return parse_structured(line);
    }
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let command = resolve(name)?;
    let args = parse_args(rest.trim())?;
    check_arity(command, args)
}

fn parse_structured(line: &str) -> Result<Request, ProtocolError> {
    let req: StructuredRequest =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let name = req.command.trim();
    if name.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let command = resolve(name)?;
    let args = match req.args {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };
    check_arity(command, args)
}

fn resolve(name: &str) -> Result<Command, ProtocolError> {
    Command::from_name(name).ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
}

fn check_arity(command: Command, args: Vec<Value>) -> Result<Request, ProtocolError> {
    if args.len() == command.arity() {
        Ok(Request { command, args })
    } else {
        Err(ProtocolError::WrongArity {
            command: command.name(),
            expected: command.arity(),
            got: args.len(),
        })
    }
}

/// `rest` is a JSON value, a JSON array, or a comma-separated list of JSON
/// values.
fn parse_args(rest: &str) -> Result<Vec<Value>, ProtocolError> {
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(value) = serde_json::from_str::<Value>(rest) {
        return Ok(match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => vec![other],
        });
    }
    serde_json::from_str::<Vec<Value>>(&format!("[{rest}]"))
        .map_err(|e| ProtocolError::Malformed(format!("arguments: {e}")))
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn command(line: &str) -> Result<Command, ProtocolError> {
        parse_request(line).map(|r| r.command)
    }

    fn wrong_arity(command: &'static str, expected: usize, got: usize) -> ProtocolError {
        ProtocolError::WrongArity {
            command,
            expected,
            got,
        }
    }

    #[test]
    fn bare_names() {
        assert_eq!(command("status"), Ok(Command::Status));
        assert_eq!(command("  pauseRTC  "), Ok(Command::PauseRtc));
        assert_eq!(command("close_baldr_HO"), Ok(Command::CloseHo));
        assert_eq!(command("exit"), Ok(Command::Exit));
    }

    #[test]
    fn empty_arguments_are_allowed() {
        assert_eq!(command("status []"), Ok(Command::Status));
        assert_eq!(command("status null"), Ok(Command::Status));
    }

    #[test]
    fn structured_form() {
        assert_eq!(
            command(r#"{"command": "resumeRTC", "args": []}"#),
            Ok(Command::ResumeRtc)
        );
        assert_eq!(command(r#"{"command": "stop_baldr"}"#), Ok(Command::StopBaldr));
        assert!(matches!(
            command(r#"{"command": "status", "extra": 1}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(
            command(r#"{"command": "status", "args": [1]}"#),
            Err(wrong_arity("status", 0, 1))
        );
    }

    #[test]
    fn argument_forms_are_counted() {
        assert_eq!(command("pauseRTC 1"), Err(wrong_arity("pauseRTC", 0, 1)));
        assert_eq!(command(r#"pauseRTC [1, "a"]"#), Err(wrong_arity("pauseRTC", 0, 2)));
        assert_eq!(
            command(r#"pauseRTC 1, "a", true"#),
            Err(wrong_arity("pauseRTC", 0, 3))
        );
        assert_eq!(command(r#"pauseRTC {"x": 1}"#), Err(wrong_arity("pauseRTC", 0, 1)));
    }

    #[test]
    fn read_config_takes_one_path() {
        let req = parse_request(r#"readBDRConfig "./baldr_beam2.yaml""#).unwrap();
        assert_eq!(req.command, Command::ReadConfig);
        assert_eq!(req.args, vec![Value::from("./baldr_beam2.yaml")]);

        let req = parse_request(r#"{"command": "readBDRConfig", "args": ["/etc/b.yaml"]}"#).unwrap();
        assert_eq!(req.args, vec![Value::from("/etc/b.yaml")]);

        assert_eq!(command("readBDRConfig"), Err(wrong_arity("readBDRConfig", 1, 0)));
        assert_eq!(
            command(r#"readBDRConfig "a", "b""#),
            Err(wrong_arity("readBDRConfig", 1, 2))
        );
    }

    #[test]
    fn unparsable_arguments() {
        assert!(matches!(
            command("pauseRTC not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(command(""), Err(ProtocolError::Empty));
        assert_eq!(command("   "), Err(ProtocolError::Empty));
        assert_eq!(
            command("STATUS"),
            Err(ProtocolError::UnknownCommand("STATUS".to_string()))
        );
        assert_eq!(
            command("reboot now"),
            Err(ProtocolError::UnknownCommand("reboot".to_string()))
        );
    }

    #[test]
    fn raw_line_checks() {
        assert_eq!(
            decode_line(b"status\r\n").map(|r| r.command),
            Ok(Command::Status)
        );
        assert_eq!(decode_line(b"\xff\xfe\n"), Err(ProtocolError::NotUtf8));
        let long = vec![b'a'; MAX_REQUEST_BYTES + 1];
        assert_eq!(
            decode_line(&long),
            Err(ProtocolError::TooLong {
                max: MAX_REQUEST_BYTES
            })
        );
    }
}
