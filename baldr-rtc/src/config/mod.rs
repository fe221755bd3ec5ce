//! Beam configuration loading and validation.
//!
//! One [`BeamConfig`] is loaded before the beam process starts its threads
//! and is shared read-only (`Arc<BeamConfig>`) from then on.  Nothing mutates
//! it while the loop runs; a new configuration means a new process.
//!
//! The expected YAML structure is:
//! ```yaml
//! beam: 1
//! phasemask: H1
//! commander:
//!   host: 127.0.0.1
//!   base_port: 3000
//!   max_sessions: 1
//! rtc:
//!   loop_rate_hz: 1000.0
//!   fault_threshold: 10
//!   n_actuators: 140
//!   controller:
//!     kind: leaky
//!     gain: 0.1
//!     leak: 0.99
//! telemetry:
//!   capacity: 2000
//!   dir: ./telem/beam1
//!   flush_hz: 1.0
//!   chunk_seconds: 2.0
//! io:
//!   mode: "null"
//!   sensor_shape: [32, 32]
//!   elements: [LO, HO]
//! ```
//!
//! Every field is optional; absent values fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Host the commander binds to when none is configured.
pub const DEFAULT_COMMANDER_HOST: &str = "127.0.0.1";

/// Commander port for beam `n` is `DEFAULT_BASE_PORT + n`.
pub const DEFAULT_BASE_PORT: u16 = 3000;

/// Valid beam numbers when the process is started from the CLI.
pub const BEAM_RANGE: std::ops::RangeInclusive<u8> = 1..=4;

/// Accepted `rtc.loop_rate_hz` and `telemetry.flush_hz` values.
pub const RATE_RANGE_HZ: std::ops::RangeInclusive<f64> = 0.01..=100_000.0;

/// Longest accepted `telemetry.chunk_seconds` (one day).
pub const MAX_CHUNK_SECONDS: f64 = 86_400.0;

/// Upper bounds on the telemetry write retry policy.
pub const MAX_WRITE_ATTEMPTS: u32 = 10;
pub const MAX_RETRY_BACKOFF_MS: u64 = 1_000;

/// Period for `hz`, saturating at the slowest accepted rate.
fn period_from_hz(hz: f64) -> Duration {
    let longest = Duration::from_secs_f64(1.0 / RATE_RANGE_HZ.start());
    Duration::try_from_secs_f64(1.0 / hz)
        .unwrap_or(longest)
        .min(longest)
}

// ── Sections ──────────────────────────────────────────────────────────────────

/// Commander (remote control) endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommanderConfig {
    pub host: String,
    pub base_port: u16,
    /// Full `host:port` override.  When set, `host`/`base_port` are ignored.
    pub socket: Option<String>,
    /// Concurrent client sessions accepted.  `0` means unlimited.
    pub max_sessions: usize,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_COMMANDER_HOST.to_string(),
            base_port: DEFAULT_BASE_PORT,
            socket: None,
            max_sessions: 1,
        }
    }
}

impl CommanderConfig {
    /// Address the commander binds to: `<host>:<base_port + beam>` unless an
    /// explicit socket override is configured.
    pub fn endpoint(&self, beam: u8) -> Result<String> {
        if let Some(socket) = &self.socket {
            return Ok(socket.trim_start_matches("tcp://").to_string());
        }
        let port = self
            .base_port
            .checked_add(u16::from(beam))
            .with_context(|| format!("base_port {} + beam {} overflows", self.base_port, beam))?;
        Ok(format!("{}:{}", self.host, port))
    }
}

/// Which reference controller the RTC loop drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Keep the current setpoints (open loop).
    None,
    #[default]
    Leaky,
    Pid,
}

impl ControllerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::None => "none",
            ControllerKind::Leaky => "leaky",
            ControllerKind::Pid => "pid",
        }
    }
}

/// Gains for the reference controllers.  Scalars apply to every actuator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub kind: ControllerKind,
    /// Leaky integrator gain.
    pub gain: f64,
    /// Leaky integrator leak factor, typically just below 1.
    pub leak: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Symmetric output clamp; commands are limited to `[-limit, limit]`.
    pub limit: f64,
}

impl ControllerConfig {
    fn validate(&self) -> Result<()> {
        let gains = [
            ("gain", self.gain),
            ("leak", self.leak),
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
        ];
        for (name, value) in gains {
            if !value.is_finite() {
                bail!("rtc.controller.{name} must be finite (got {value})");
            }
        }
        if !(self.limit.is_finite() && self.limit >= 0.0) {
            bail!("rtc.controller.limit must be finite and >= 0 (got {})", self.limit);
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::Leaky,
            gain: 0.1,
            leak: 0.99,
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            limit: 0.5,
        }
    }
}

/// Control loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    pub loop_rate_hz: f64,
    /// Consecutive failed ticks before the loop faults to STOPPING.
    pub fault_threshold: u32,
    pub n_actuators: usize,
    pub controller: ControllerConfig,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            loop_rate_hz: 1000.0,
            fault_threshold: 10,
            n_actuators: 140,
            controller: ControllerConfig::default(),
        }
    }
}

impl RtcConfig {
    /// Duration of one tick.
    pub fn tick_period(&self) -> Duration {
        period_from_hz(self.loop_rate_hz)
    }
}

/// Telemetry capture and storage settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// When `false` frames are still drained but discarded.
    pub enabled: bool,
    /// Ring buffer capacity in frames.
    pub capacity: usize,
    pub dir: PathBuf,
    pub flush_hz: f64,
    /// Length of one JSON-lines chunk file.
    pub chunk_seconds: f64,
    /// Ring fill fraction that wakes the writer early.
    pub fill_fraction: f64,
    /// Upper bound on frames taken per drain call.
    pub drain_batch: usize,
    pub max_write_attempts: u32,
    /// Initial retry backoff; doubles per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 2000,
            dir: PathBuf::from("./telem"),
            flush_hz: 1.0,
            chunk_seconds: 2.0,
            fill_fraction: 0.5,
            drain_batch: 512,
            max_write_attempts: 3,
            retry_backoff_ms: 5,
        }
    }
}

impl TelemetryConfig {
    pub fn flush_period(&self) -> Duration {
        period_from_hz(self.flush_hz)
    }

    pub fn chunk_duration(&self) -> Duration {
        let longest = Duration::from_secs_f64(MAX_CHUNK_SECONDS);
        Duration::try_from_secs_f64(self.chunk_seconds)
            .unwrap_or(longest)
            .min(longest)
    }

    /// Ring occupancy (in frames) that triggers an early writer wake-up.
    pub fn fill_threshold(&self) -> usize {
        ((self.capacity as f64 * self.fill_fraction).ceil() as usize).clamp(1, self.capacity.max(1))
    }
}

/// Hardware backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Backend name.  Only `"null"` is built in.
    pub mode: String,
    /// Sensor frame shape `[rows, cols]`.
    pub sensor_shape: [usize; 2],
    /// Control elements exposed to the `open_*` / `close_*` commands.
    pub elements: Vec<String>,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            mode: "null".to_string(),
            sensor_shape: [32, 32],
            elements: vec!["LO".to_string(), "HO".to_string()],
        }
    }
}

// ── BeamConfig ────────────────────────────────────────────────────────────────

/// Immutable configuration snapshot for one beam process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    pub beam: u8,
    pub phasemask: String,
    pub commander: CommanderConfig,
    pub rtc: RtcConfig,
    pub telemetry: TelemetryConfig,
    pub io: IoConfig,
    /// Path the configuration was read from (not part of the YAML).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam: 1,
            phasemask: "H1".to_string(),
            commander: CommanderConfig::default(),
            rtc: RtcConfig::default(),
            telemetry: TelemetryConfig::default(),
            io: IoConfig::default(),
            source: None,
        }
    }
}

impl BeamConfig {
    /// Default configuration for `beam`, with the telemetry directory set to
    /// `./telem/beam<N>`.
    pub fn for_beam(beam: u8) -> Self {
        let mut cfg = Self {
            beam,
            ..Self::default()
        };
        cfg.telemetry.dir = PathBuf::from(format!("./telem/beam{beam}"));
        cfg
    }

    /// Parses `path` into a configuration.  The caller validates it after
    /// applying any command-line overrides.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is structurally
    /// invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading beam configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let mut cfg: BeamConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;
        cfg.source = Some(path.to_path_buf());

        debug!(
            beam = cfg.beam,
            loop_rate_hz = cfg.rtc.loop_rate_hz,
            capacity = cfg.telemetry.capacity,
            controller = cfg.rtc.controller.kind.as_str(),
            "configuration parsed"
        );
        Ok(cfg)
    }

    /// Address the commander binds to.
    pub fn endpoint(&self) -> Result<String> {
        self.commander.endpoint(self.beam)
    }

    /// Checks every invariant the threads rely on.
    pub fn validate(&self) -> Result<()> {
        if !RATE_RANGE_HZ.contains(&self.rtc.loop_rate_hz) {
            bail!(
                "rtc.loop_rate_hz must be in {}..={} (got {})",
                RATE_RANGE_HZ.start(),
                RATE_RANGE_HZ.end(),
                self.rtc.loop_rate_hz
            );
        }
        if self.rtc.fault_threshold == 0 {
            bail!("rtc.fault_threshold must be >= 1");
        }
        self.rtc.controller.validate()?;
        if self.telemetry.capacity == 0 {
            bail!("telemetry.capacity must be >= 1");
        }
        if !RATE_RANGE_HZ.contains(&self.telemetry.flush_hz) {
            bail!(
                "telemetry.flush_hz must be in {}..={} (got {})",
                RATE_RANGE_HZ.start(),
                RATE_RANGE_HZ.end(),
                self.telemetry.flush_hz
            );
        }
        if !(self.telemetry.chunk_seconds > 0.0 && self.telemetry.chunk_seconds <= MAX_CHUNK_SECONDS)
        {
            bail!(
                "telemetry.chunk_seconds must be in (0, {MAX_CHUNK_SECONDS}] (got {})",
                self.telemetry.chunk_seconds
            );
        }
        if !(self.telemetry.fill_fraction > 0.0 && self.telemetry.fill_fraction <= 1.0) {
            bail!(
                "telemetry.fill_fraction must be in (0, 1] (got {})",
                self.telemetry.fill_fraction
            );
        }
        if self.telemetry.drain_batch == 0 {
            bail!("telemetry.drain_batch must be >= 1");
        }
        if !(1..=MAX_WRITE_ATTEMPTS).contains(&self.telemetry.max_write_attempts) {
            bail!(
                "telemetry.max_write_attempts must be in 1..={MAX_WRITE_ATTEMPTS} (got {})",
                self.telemetry.max_write_attempts
            );
        }
        if self.telemetry.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            bail!(
                "telemetry.retry_backoff_ms must be <= {MAX_RETRY_BACKOFF_MS} (got {})",
                self.telemetry.retry_backoff_ms
            );
        }
        if self.io.sensor_shape[0] == 0 || self.io.sensor_shape[1] == 0 {
            bail!("io.sensor_shape must be non-empty (got {:?})", self.io.sensor_shape);
        }
        self.endpoint()?;
        Ok(())
    }

    /// Like [`validate`](Self::validate), and additionally requires the beam
    /// number to be one of the four telescope beams.
    pub fn validate_for_cli(&self) -> Result<()> {
        if !BEAM_RANGE.contains(&self.beam) {
            bail!(
                "beam must be in {}..={} (got {})",
                BEAM_RANGE.start(),
                BEAM_RANGE.end(),
                self.beam
            );
        }
        self.validate()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
