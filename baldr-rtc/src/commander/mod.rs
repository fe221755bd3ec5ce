/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Remote control of one beam over a line-delimited TCP protocol.
//!
//! ```text
//!  client ──"pauseRTC\n"──► server (commander thread, tokio current-thread)
//!                              │ decode_line → Request
//!                              ▼
//!                          Dispatcher ──► BeamState / Hardware
//!                              │
//!  client ◄──{"ok":true,…}\n───┘
//! ```
//!
//! | Command | Category | Effect |
//! |---|---|---|
//! | `status` | query | mode, counters, element states |
//! | `close_all` / `open_all` | hardware macro | every element the hardware exposes |
//! | `close_baldr_LO` / `open_baldr_LO` | hardware macro | `LO` only |
//! | `close_baldr_HO` / `open_baldr_HO` | hardware macro | `HO` only |
//! | `pauseRTC` / `resumeRTC` | lifecycle | `RUNNING ⇄ PAUSED` |
//! | `stop_baldr` / `exit` | lifecycle | → `STOPPING`, process shuts down |
//! | `readBDRConfig <path>` | configuration | parse + validate a file; applied on restart |

pub mod command;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;

pub use command::{Category, Command, CommandResult, Request};
pub use dispatch::Dispatcher;
pub use error::ProtocolError;
pub use server::{CommandServer, ServerHandle};
