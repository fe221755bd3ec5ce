/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Sends one request line to a Baldr commander and prints the reply.
//!
//! ```text
//! commander-client --beam 2 status
//! commander-client --socket tcp://127.0.0.1:3001 pauseRTC
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error};

use baldr_rtc::commander::CommandResult;
use baldr_rtc::config::{CommanderConfig, BEAM_RANGE};

#[derive(Debug, Parser)]
#[command(
    name = "commander-client",
    about = "Send one command to a Baldr beam commander",
    long_about = None,
)]
struct Cli {
    /// Commander endpoint, e.g. tcp://127.0.0.1:3001.  Overrides --beam.
    #[arg(long)]
    socket: Option<String>,

    /// Beam whose default endpoint (127.0.0.1:3000 + beam) is used.
    #[arg(long, default_value_t = 1)]
    beam: u8,

    /// Seconds to wait for the reply.
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,

    /// Command line, e.g. `status` or `pauseRTC`.
    #[arg(required = true, num_args = 1..)]
    message: Vec<String>,
}

impl Cli {
    fn endpoint(&self) -> Result<String> {
        if !BEAM_RANGE.contains(&self.beam) {
            bail!("--beam must be in {}..={}", BEAM_RANGE.start(), BEAM_RANGE.end());
        }
        let commander = CommanderConfig {
            socket: self.socket.clone(),
            ..CommanderConfig::default()
        };
        commander.endpoint(self.beam)
    }

    fn reply_timeout(&self) -> Result<Duration> {
        match Duration::try_from_secs_f64(self.timeout) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => bail!("--timeout must be a positive number of seconds (got {})", self.timeout),
        }
    }
}

async fn request(endpoint: &str, message: &str, timeout: Duration) -> Result<String> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(endpoint))
        .await
        .with_context(|| format!("Timed out connecting to {endpoint}"))?
        .with_context(|| format!("Cannot connect to {endpoint}"))?;
    let (read_half, mut write_half) = stream.into_split();

    debug!(endpoint, message, "sending request");
    write_half.write_all(message.as_bytes()).await?;
    write_half.write_all(b"\n").await?;

    let mut reply = String::new();
    let n = tokio::time::timeout(timeout, BufReader::new(read_half).read_line(&mut reply))
        .await
        .context("Timed out waiting for reply")??;
    if n == 0 {
        bail!("Connection closed without a reply");
    }
    Ok(reply)
}

/// Pretty-prints JSON replies; anything else is printed as received.
fn render(reply: &str) -> (bool, String) {
    match serde_json::from_str::<serde_json::Value>(reply) {
        Ok(value) => {
            let ok = serde_json::from_value::<CommandResult>(value.clone())
                .map(|r| r.ok)
                .unwrap_or(false);
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| reply.to_string());
            (ok, text)
        }
        Err(_) => (false, reply.trim_end().to_string()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let message = cli.message.join(" ");

    let result = async {
        let endpoint = cli.endpoint()?;
        let timeout = cli.reply_timeout()?;
        request(&endpoint, message.trim(), timeout).await
    }
    .await;

    match result {
        Ok(reply) => {
            let (ok, text) = render(&reply);
            println!("{text}");
            if ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_from_beam_or_socket() {
        let cli = Cli::try_parse_from(["commander-client", "--beam", "3", "status"]).unwrap();
        assert_eq!(cli.endpoint().unwrap(), "127.0.0.1:3003");

        let cli = Cli::try_parse_from([
            "commander-client",
            "--socket",
            "tcp://10.0.0.2:4000",
            "status",
        ])
        .unwrap();
        assert_eq!(cli.endpoint().unwrap(), "10.0.0.2:4000");

        let cli = Cli::try_parse_from(["commander-client", "--beam", "9", "status"]).unwrap();
        assert!(cli.endpoint().is_err());
    }

    #[test]
    fn timeout_must_be_positive_and_finite() {
        let cli = Cli::try_parse_from(["commander-client", "--timeout", "0.5", "status"]).unwrap();
        assert_eq!(cli.reply_timeout().unwrap(), Duration::from_millis(500));

        for bad in ["-1", "0", "inf", "NaN", "1e300"] {
            let flag = format!("--timeout={bad}");
            let cli = Cli::try_parse_from(["commander-client", flag.as_str(), "status"]).unwrap();
            assert!(cli.reply_timeout().is_err(), "{bad}");
        }
    }

    #[test]
    fn message_words_are_joined() {
        let cli = Cli::try_parse_from(["commander-client", "pauseRTC", "[1,", "2]"]).unwrap();
        assert_eq!(cli.message.join(" "), "pauseRTC [1, 2]");
    }

    #[test]
    fn render_reports_reply_status() {
        let (ok, text) = render(r#"{"ok":true,"message":"fine"}"#);
        assert!(ok);
        assert!(text.contains("\"message\": \"fine\""));

        let (ok, text) = render("not json\n");
        assert!(!ok);
        assert_eq!(text, "not json");
    }

    #[tokio::test]
    async fn request_round_trip_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, mut w) = stream.into_split();
            let mut line = String::new();
            BufReader::new(r).read_line(&mut line).await.unwrap();
            assert_eq!(line, "status\n");
            w.write_all(b"{\"ok\":true,\"message\":\"RUNNING\"}\n")
                .await
                .unwrap();
        });

        let reply = request(&addr, "status", Duration::from_secs(5)).await.unwrap();
        assert!(render(&reply).0);
        server.await.unwrap();
    }
}
