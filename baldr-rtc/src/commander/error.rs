/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Request decoding errors.
//!
//! Every variant becomes a failure reply on the same session; none of them
//! closes the connection.

use thiserror::Error;

/// Why a request line could not be turned into a [`Request`](super::command::Request).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("request is not valid UTF-8")]
    NotUtf8,

    #[error("request exceeds {max} bytes")]
    TooLong { max: usize },

    /// Arguments or structured body did not parse as JSON.
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("command '{0}' not found")]
    UnknownCommand(String),

    #[error("command '{command}' takes {expected} argument(s) (got {got})")]
    WrongArity {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}
