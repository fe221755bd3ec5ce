/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Storage collaborators for drained telemetry.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use super::TelemetryFrame;

/// Failure to persist one frame.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telemetry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("telemetry encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Storage rejected the frame for a backend-specific reason.
    #[error("telemetry storage unavailable: {0}")]
    Unavailable(String),
}

/// Append-only sink accepting one frame at a time.
pub trait TelemetrySink: Send {
    fn append(&mut self, frame: &TelemetryFrame) -> Result<(), SinkError>;

    /// Pushes buffered data to storage.  Called after each drain pass and at
    /// shutdown.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

// ── Discard ───────────────────────────────────────────────────────────────────

/// Accepts and forgets every frame.  Used when `telemetry.enabled` is false.
#[derive(Debug, Default)]
pub struct DiscardSink {
    pub discarded: u64,
}

impl TelemetrySink for DiscardSink {
    fn append(&mut self, _frame: &TelemetryFrame) -> Result<(), SinkError> {
        self.discarded += 1;
        Ok(())
    }
}

// ── JSON lines ────────────────────────────────────────────────────────────────

/// Writes one JSON object per line into chunk files
/// `<dir>/beam<N>_telem_<chunk:05>.jsonl`, rotating every `chunk` duration.
///
/// The first chunk file is opened lazily on the first append, so a beam that
/// never produces telemetry leaves no empty files behind.
#[derive(Debug)]
pub struct JsonLinesSink {
    dir: PathBuf,
    beam: u8,
    chunk: Duration,
    next_index: u32,
    current: Option<Chunk>,
}

#[derive(Debug)]
struct Chunk {
    path: PathBuf,
    out: BufWriter<File>,
    opened: Instant,
    frames: u64,
}

impl JsonLinesSink {
    /// Creates `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>, beam: u8, chunk: Duration) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), beam, chunk_s = chunk.as_secs_f64(), "telemetry sink ready");
        Ok(Self {
            dir,
            beam,
            chunk,
            next_index: 0,
            current: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir
            .join(format!("beam{}_telem_{:05}.jsonl", self.beam, index))
    }

    fn current_chunk(&mut self) -> Result<&mut Chunk, SinkError> {
        let expired = self
            .current
            .as_ref()
            .map_or(true, |c| c.opened.elapsed() >= self.chunk);
        if expired {
            if let Some(mut old) = self.current.take() {
                old.out.flush()?;
                debug!(path = %old.path.display(), frames = old.frames, "telemetry chunk closed");
            }
            let path = self.chunk_path(self.next_index);
            let file = File::create(&path)?;
            self.next_index += 1;
            self.current = Some(Chunk {
                path,
                out: BufWriter::new(file),
                opened: Instant::now(),
                frames: 0,
            });
        }
        self.current
            .as_mut()
            .ok_or_else(|| SinkError::Unavailable("no open chunk".to_string()))
    }
}

impl TelemetrySink for JsonLinesSink {
    fn append(&mut self, frame: &TelemetryFrame) -> Result<(), SinkError> {
        let line = serde_json::to_string(&frame.record())?;
        let chunk = self.current_chunk()?;
        chunk.out.write_all(line.as_bytes())?;
        chunk.out.write_all(b"\n")?;
        chunk.frames += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(chunk) = self.current.as_mut() {
            chunk.out.flush()?;
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(tick: u64) -> TelemetryFrame {
        TelemetryFrame::paused(tick, tick, 1)
    }

    fn jsonl_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "jsonl"))
            .collect();
        files.sort();
        files
    }

    #[test]
    fn writes_one_line_per_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(tmp.path(), 2, Duration::from_secs(60)).unwrap();
        for t in 1..=3 {
            sink.append(&frame(t)).unwrap();
        }
        sink.flush().unwrap();

        let files = jsonl_files(tmp.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("beam2_telem_00000.jsonl"));
        let content = fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["tick"], 1);
        assert_eq!(first["status"], "PAUSED");
    }

    #[test]
    fn rotates_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(tmp.path(), 1, Duration::from_millis(10)).unwrap();
        sink.append(&frame(1)).unwrap();
        thread::sleep(Duration::from_millis(25));
        sink.append(&frame(2)).unwrap();
        sink.flush().unwrap();
        assert_eq!(jsonl_files(tmp.path()).len(), 2);
    }

    #[test]
    fn no_file_until_first_append() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/beam1");
        let sink = JsonLinesSink::new(&dir, 1, Duration::from_secs(1)).unwrap();
        assert!(sink.dir().is_dir());
        assert!(jsonl_files(&dir).is_empty());
    }

    #[test]
    fn discard_counts() {
        let mut sink = DiscardSink::default();
        sink.append(&frame(1)).unwrap();
        sink.append(&frame(2)).unwrap();
        assert_eq!(sink.discarded, 2);
    }
}
