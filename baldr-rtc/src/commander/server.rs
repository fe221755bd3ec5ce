/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! TCP front end of the commander.
//!
//! The listener is bound synchronously in [`CommandServer::bind`] so that an
//! unusable endpoint fails process start-up before any thread exists.  The
//! accept loop then runs on a current-thread tokio runtime owned by the
//! `commander` OS thread; each session is a task on that runtime and each
//! request executes on the blocking pool, so hardware macros never stall
//! other sessions' I/O.
//!
//! Session policy: at most `max_sessions` concurrent clients (`0` means no
//! limit).  A client over the limit receives one failure reply and is
//! disconnected.  Protocol errors never close a session.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::protocol::MAX_REQUEST_BYTES;
use super::{CommandResult, Dispatcher, ProtocolError};

// ── Server ────────────────────────────────────────────────────────────────────

pub struct CommandServer {
    listener: std::net::TcpListener,
    dispatcher: Arc<Dispatcher>,
    max_sessions: usize,
    stop_on_ctrl_c: bool,
}

impl CommandServer {
    /// Binds `endpoint` (`host:port`; port `0` picks a free one).
    pub fn bind(endpoint: &str, dispatcher: Dispatcher, max_sessions: usize) -> Result<Self> {
        let listener = std::net::TcpListener::bind(endpoint)
            .with_context(|| format!("Cannot bind commander endpoint {endpoint}"))?;
        listener
            .set_nonblocking(true)
            .context("Cannot make commander socket non-blocking")?;
        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
            max_sessions,
            stop_on_ctrl_c: false,
        })
    }

    /// Turns Ctrl-C into a stop request on the beam state.
    pub fn stop_on_ctrl_c(mut self, enabled: bool) -> Self {
        self.stop_on_ctrl_c = enabled;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the `commander` thread.
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let thread = thread::Builder::new()
            .name("commander".to_string())
            .spawn(move || runtime.block_on(self.serve(shutdown_rx)))?;

        Ok(ServerHandle {
            addr,
            shutdown: shutdown_tx,
            thread,
        })
    }

    async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let listener = match TcpListener::from_std(self.listener) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "commander listener could not be registered");
                return;
            }
        };
        let addr = listener.local_addr().ok();
        info!(
            addr = ?addr,
            max_sessions = self.max_sessions,
            "commander listening"
        );

        if self.stop_on_ctrl_c {
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, stopping beam");
                    dispatcher.state().request_stop();
                }
            });
        }

        let active = Arc::new(AtomicUsize::new(0));
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        match SessionSlot::acquire(&active, self.max_sessions) {
                            Some(slot) => {
                                let dispatcher = Arc::clone(&self.dispatcher);
                                let shutdown = shutdown.clone();
                                tokio::spawn(session(stream, peer, dispatcher, slot, shutdown));
                            }
                            None => {
                                warn!(%peer, limit = self.max_sessions, "session limit reached, rejecting client");
                                tokio::spawn(reject(stream, self.max_sessions));
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
        info!(addr = ?addr, "commander stopped");
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Owner-side handle of the `commander` thread.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    thread: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting, closes every session, unbinds and joins the thread.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if self.thread.join().is_err() {
            error!("commander thread panicked");
        }
    }
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Occupies one session slot until dropped.
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(active)))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Reads one `\n`-terminated line of at most `max` bytes (newline excluded)
/// into `buf`.  An oversized line is consumed up to its newline and reported
/// as [`LineRead::TooLong`].
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max as u64 + 1;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() <= max {
        return Ok(LineRead::Line);
    }

    let mut scratch = Vec::new();
    loop {
        scratch.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut scratch).await?;
        if n == 0 || scratch.ends_with(b"\n") {
            return Ok(LineRead::TooLong);
        }
    }
}

async fn session(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    _slot: SessionSlot,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%peer, "commander session opened");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            r = read_line_bounded(&mut reader, &mut buf, MAX_REQUEST_BYTES) => r,
        };

        let reply = match read {
            Ok(LineRead::Eof) => break,
            Ok(LineRead::TooLong) => CommandResult::failure(
                ProtocolError::TooLong {
                    max: MAX_REQUEST_BYTES,
                }
                .to_string(),
            ),
            Ok(LineRead::Line) => {
                let line = std::mem::take(&mut buf);
                let dispatcher = Arc::clone(&dispatcher);
                match tokio::task::spawn_blocking(move || dispatcher.handle_line(&line)).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!(%peer, error = %e, "command handler panicked");
                        CommandResult::failure("internal error while executing command")
                    }
                }
            }
            Err(e) => {
                debug!(%peer, error = %e, "session read failed");
                break;
            }
        };

        debug!(%peer, ok = reply.ok, message = %reply.message, "reply");
        let mut line = reply.to_line();
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            debug!(%peer, error = %e, "session write failed");
            break;
        }
    }
    info!(%peer, "commander session closed");
}

async fn reject(mut stream: TcpStream, limit: usize) {
    let mut line =
        CommandResult::failure(format!("session limit reached ({limit}); try again later"))
            .to_line();
    line.push('\n');
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BeamConfig;
    use crate::hardware::fake::FakeHardware;
    use crate::state::{BeamState, RunMode};
    use crate::telemetry::{TelemetryRing, WriterStats};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    fn server(max_sessions: usize) -> (Arc<BeamState>, ServerHandle) {
        let state = Arc::new(BeamState::new(Arc::new(BeamConfig::default())));
        let dispatcher = Dispatcher::new(
            Arc::clone(&state),
            Arc::new(FakeHardware::new(2, 2, &["LO", "HO"])),
            Arc::new(TelemetryRing::new(8, 4)),
            Arc::new(WriterStats::default()),
        );
        let handle = CommandServer::bind("127.0.0.1:0", dispatcher, max_sessions)
            .unwrap()
            .spawn()
            .unwrap();
        (state, handle)
    }

    struct Client {
        reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let (r, w) = TcpStream::connect(addr).await.unwrap().into_split();
            Self {
                reader: BufReader::new(r),
                writer: w,
            }
        }

        async fn send_raw(&mut self, bytes: &[u8]) -> CommandResult {
            self.writer.write_all(bytes).await.unwrap();
            self.recv().await
        }

        async fn send(&mut self, line: &str) -> CommandResult {
            self.send_raw(format!("{line}\n").as_bytes()).await
        }

        async fn recv(&mut self) -> CommandResult {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            serde_json::from_str(&line).unwrap()
        }
    }

    #[tokio::test]
    async fn session_survives_protocol_errors() {
        let (state, handle) = server(1);
        state.start();
        let mut c = Client::connect(handle.local_addr()).await;

        assert!(!c.send("nonsense").await.ok);
        assert!(!c.send("").await.ok);
        assert!(!c.send("status 1, 2").await.ok);
        assert!(!c.send_raw(b"\xff\xfe\n").await.ok);
        let long = "x".repeat(MAX_REQUEST_BYTES + 10);
        let reply = c.send(&long).await;
        assert!(!reply.ok);
        assert!(reply.message.contains("exceeds"));

        let reply = c.send("status").await;
        assert!(reply.ok);
        assert_eq!(reply.data.unwrap()["mode"], "RUNNING");

        tokio::task::spawn_blocking(move || handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lifecycle_commands_change_mode() {
        let (state, handle) = server(1);
        state.start();
        let mut c = Client::connect(handle.local_addr()).await;

        assert!(c.send("pauseRTC").await.ok);
        assert_eq!(state.mode(), RunMode::Paused);
        assert!(c.send(r#"{"command": "resumeRTC"}"#).await.ok);
        assert_eq!(state.mode(), RunMode::Running);
        assert!(c.send("stop_baldr").await.ok);
        let again = c.send("stop_baldr").await;
        assert!(again.ok);
        assert_eq!(again.data.unwrap()["changed"], false);
        assert_eq!(state.mode(), RunMode::Stopping);

        tokio::task::spawn_blocking(move || handle.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extra_sessions_are_rejected() {
        let (_state, handle) = server(1);
        let mut first = Client::connect(handle.local_addr()).await;
        assert!(first.send("status").await.ok);

        let mut second = Client::connect(handle.local_addr()).await;
        let reply = second.recv().await;
        assert!(!reply.ok);
        assert!(reply.message.contains("session limit"));

        // The first session is unaffected, and its slot frees on disconnect.
        assert!(first.send("status").await.ok);
        drop(first);
        let mut third = loop {
            let mut c = Client::connect(handle.local_addr()).await;
            let mut pushed = String::new();
            let wait = std::time::Duration::from_millis(50);
            match tokio::time::timeout(wait, c.reader.read_line(&mut pushed)).await {
                // Nothing pushed at us: the session was accepted.
                Err(_) => break c,
                Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        assert!(third.send("status").await.ok);

        tokio::task::spawn_blocking(move || handle.shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn shutdown_unbinds_endpoint() {
        let (_state, handle) = server(0);
        let addr = handle.local_addr();
        handle.shutdown();
        assert!(std::net::TcpListener::bind(addr).is_ok());
    }

    #[test]
    fn bind_conflict_is_an_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let state = Arc::new(BeamState::new(Arc::new(BeamConfig::default())));
        let dispatcher = Dispatcher::new(
            state,
            Arc::new(FakeHardware::new(1, 1, &[])),
            Arc::new(TelemetryRing::new(1, 1)),
            Arc::new(WriterStats::default()),
        );
        assert!(CommandServer::bind(&addr, dispatcher, 1).is_err());
    }
}
