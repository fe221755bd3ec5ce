/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use baldr_rtc::algorithm::build_algorithm;
use baldr_rtc::beam::{BeamProcess, Collaborators, ShutdownReport};
use baldr_rtc::config::BeamConfig;
use baldr_rtc::hardware::make_hardware;
use baldr_rtc::telemetry::{DiscardSink, JsonLinesSink, TelemetrySink};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Baldr RTC server (one instance per beam).
///
/// Example:
///   baldr-rtc --beam 2 --config baldr_beam2.yaml --telem-dir /data/telem/beam2
#[derive(Debug, Parser)]
#[command(
    name = "baldr-rtc",
    about = "Baldr per-beam real-time controller",
    long_about = None,
)]
struct Cli {
    /// Beam / telescope index.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    beam: u8,

    /// Commander endpoint override, e.g. tcp://127.0.0.1:3001.
    #[arg(long)]
    socket: Option<String>,

    /// Path to the YAML beam configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Telemetry output directory (default ./telem/beam<N>).
    #[arg(long = "telem-dir")]
    telem_dir: Option<PathBuf>,

    /// Telemetry ring capacity in frames.
    #[arg(long = "telem-capacity")]
    telem_capacity: Option<usize>,

    /// Telemetry flush rate (Hz).
    #[arg(long = "flush-hz")]
    flush_hz: Option<f64>,

    /// Telemetry chunk file duration (seconds).
    #[arg(long = "chunk-seconds")]
    chunk_seconds: Option<f64>,

    /// Control loop rate (Hz).
    #[arg(long = "loop-rate")]
    loop_rate: Option<f64>,
}

impl Cli {
    /// File (or defaults) first, then command-line overrides.
    fn beam_config(&self) -> Result<BeamConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let mut cfg = BeamConfig::load_from_file(path)?;
                cfg.beam = self.beam;
                cfg
            }
            None => {
                warn!("No configuration file provided, using default beam settings");
                BeamConfig::for_beam(self.beam)
            }
        };

        if let Some(socket) = &self.socket {
            cfg.commander.socket = Some(socket.clone());
        }
        if let Some(dir) = &self.telem_dir {
            cfg.telemetry.dir = dir.clone();
        }
        if let Some(capacity) = self.telem_capacity {
            cfg.telemetry.capacity = capacity;
        }
        if let Some(hz) = self.flush_hz {
            cfg.telemetry.flush_hz = hz;
        }
        if let Some(secs) = self.chunk_seconds {
            cfg.telemetry.chunk_seconds = secs;
        }
        if let Some(rate) = self.loop_rate {
            cfg.rtc.loop_rate_hz = rate;
        }

        cfg.validate_for_cli().context("Invalid beam configuration")?;
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn run(cli: &Cli) -> Result<ShutdownReport> {
    let config = cli.beam_config()?;

    let hardware = make_hardware(&config.io, config.rtc.n_actuators)?;
    let algorithm = build_algorithm(&config);
    let sink: Box<dyn TelemetrySink> = if config.telemetry.enabled {
        Box::new(
            JsonLinesSink::new(
                &config.telemetry.dir,
                config.beam,
                config.telemetry.chunk_duration(),
            )
            .with_context(|| {
                format!(
                    "Cannot prepare telemetry directory {}",
                    config.telemetry.dir.display()
                )
            })?,
        )
    } else {
        warn!("Telemetry storage disabled, frames will be discarded");
        Box::new(DiscardSink::default())
    };

    let endpoint = config.endpoint()?;
    info!(
        beam = config.beam,
        endpoint = %endpoint,
        controller = algorithm.name(),
        io = %config.io.mode,
        telem_dir = %config.telemetry.dir.display(),
        "Configuration"
    );

    let process = BeamProcess::start(
        config,
        Collaborators {
            hardware,
            algorithm,
            sink,
            stop_on_ctrl_c: true,
        },
    )?;
    Ok(process.run_until_stopped())
}

fn main() -> ExitCode {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Baldr RTC starting up (beam {})...", cli.beam);

    match run(&cli) {
        Ok(report) if report.last_fault.is_some() => {
            error!(
                fault = report.last_fault.as_deref().unwrap_or_default(),
                "Beam stopped on fault"
            );
            ExitCode::from(2)
        }
        Ok(report) => {
            if report.rtc.is_none() {
                warn!("RTC loop was detached during shutdown");
            }
            info!("Baldr RTC stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Baldr RTC failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_over_defaults() {
        let cli = Cli::try_parse_from([
            "baldr-rtc",
            "--beam",
            "3",
            "--socket",
            "tcp://127.0.0.1:4003",
            "--telem-capacity",
            "10",
            "--loop-rate",
            "100",
        ])
        .unwrap();
        let cfg = cli.beam_config().unwrap();
        assert_eq!(cfg.beam, 3);
        assert_eq!(cfg.endpoint().unwrap(), "127.0.0.1:4003");
        assert_eq!(cfg.telemetry.capacity, 10);
        assert_eq!(cfg.rtc.loop_rate_hz, 100.0);
        assert_eq!(cfg.telemetry.dir, PathBuf::from("./telem/beam3"));
    }

    #[test]
    fn beam_outside_range_is_rejected() {
        assert!(Cli::try_parse_from(["baldr-rtc", "--beam", "5"]).is_err());
        assert!(Cli::try_parse_from(["baldr-rtc"]).is_err());
    }

    #[test]
    fn invalid_override_fails_validation() {
        let cli = Cli::try_parse_from(["baldr-rtc", "--beam", "1", "--telem-capacity", "0"])
            .unwrap();
        assert!(cli.beam_config().is_err());
    }
}
