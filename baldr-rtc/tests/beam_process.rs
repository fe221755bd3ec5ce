/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-to-end: a real beam process driven over its commander socket.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use baldr_rtc::algorithm::HoldAlgorithm;
use baldr_rtc::beam::{BeamProcess, Collaborators};
use baldr_rtc::commander::CommandResult;
use baldr_rtc::config::BeamConfig;
use baldr_rtc::hardware::fake::FakeHardware;
use baldr_rtc::state::RunMode;
use baldr_rtc::telemetry::JsonLinesSink;

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }

    fn send(&mut self, line: &str) -> CommandResult {
        self.writer.write_all(line.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.recv()
    }

    fn recv(&mut self) -> CommandResult {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn mode(&mut self) -> String {
        let reply = self.send("status");
        assert!(reply.ok, "{}", reply.message);
        reply.data.unwrap()["mode"].as_str().unwrap().to_string()
    }
}

fn config(capacity: usize, rate_hz: f64) -> BeamConfig {
    let mut cfg = BeamConfig::for_beam(1);
    cfg.commander.socket = Some("127.0.0.1:0".to_string());
    cfg.rtc.loop_rate_hz = rate_hz;
    cfg.rtc.n_actuators = 8;
    cfg.telemetry.capacity = capacity;
    cfg.telemetry.flush_hz = 5.0;
    cfg
}

fn start(cfg: BeamConfig, dir: &std::path::Path) -> (BeamProcess, Arc<FakeHardware>) {
    let hw = Arc::new(FakeHardware::new(4, 4, &["LO", "HO"]));
    let sink = JsonLinesSink::new(dir, cfg.beam, Duration::from_secs(60)).unwrap();
    let process = BeamProcess::start(
        cfg,
        Collaborators {
            hardware: hw.clone(),
            algorithm: Box::new(HoldAlgorithm),
            sink: Box::new(sink),
            stop_on_ctrl_c: false,
        },
    )
    .unwrap();
    (process, hw)
}

fn stored_records(dir: &std::path::Path) -> Vec<Value> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    files
        .iter()
        .flat_map(|p| {
            std::fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str::<Value>(l).unwrap())
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn pause_resume_stop_over_tcp() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut process, hw) = start(config(10, 100.0), tmp.path());
    let mut client = Client::connect(process.local_addr());

    assert_eq!(client.mode(), "RUNNING");

    let reply = client.send("pauseRTC");
    assert!(reply.ok);
    assert_eq!(reply.data.unwrap()["changed"], true);
    // Two ticks at 100 Hz.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(client.mode(), "PAUSED");
    let reads_while_paused = hw.reads();
    thread::sleep(Duration::from_millis(50));
    assert!(hw.reads() <= reads_while_paused + 1);

    let reply = client.send("resumeRTC");
    assert!(reply.ok);
    assert_eq!(client.mode(), "RUNNING");

    // Garbage does not end the session.
    assert!(!client.send("selfdestruct").ok);
    assert!(!client.send("pauseRTC now please").ok);
    assert_eq!(client.mode(), "RUNNING");

    let first = client.send("stop_baldr");
    let second = client.send("stop_baldr");
    assert!(first.ok && second.ok);
    assert_eq!(first.data.unwrap()["changed"], true);
    assert_eq!(second.data.unwrap()["changed"], false);

    let snap = process.wait_for_stop_request(Some(Duration::from_secs(1)));
    assert_eq!(snap.mode, RunMode::Stopping);

    let addr = process.local_addr();
    let began = Instant::now();
    let report = process.shutdown();
    assert!(began.elapsed() < Duration::from_secs(2));
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(process.state().mode(), RunMode::Stopped);
    assert_eq!(hw.shutdowns(), 1);

    // The open session is closed without another reply, and the endpoint is
    // released.
    let mut line = String::new();
    match client.reader.read_line(&mut line) {
        Ok(0) | Err(_) => {}
        Ok(_) => panic!("reply after shutdown: {line:?}"),
    }
    assert!(TcpStream::connect(addr).is_err());

    // Every published frame was either written or overwritten in the ring.
    assert_eq!(
        report.ring.published,
        report.telemetry.written + report.ring.dropped
    );

    let records = stored_records(tmp.path());
    assert_eq!(records.len() as u64, report.telemetry.written);
    assert!(records.iter().any(|r| r["status"] == "PAUSED"));
    let ticks: Vec<u64> = records.iter().map(|r| r["tick"].as_u64().unwrap()).collect();
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn small_ring_overflows_under_slow_drain() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(10, 500.0);
    cfg.telemetry.flush_hz = 1.0;
    cfg.telemetry.fill_fraction = 1.0;
    let (mut process, _hw) = start(cfg, tmp.path());

    // Ring wakes the writer at 10 frames; keep the loop busy well past that.
    thread::sleep(Duration::from_millis(200));
    let mut client = Client::connect(process.local_addr());
    let status = client.send("status").data.unwrap();
    assert_eq!(status["telemetry"]["capacity"], 10);

    let report = process.shutdown();
    assert_eq!(
        report.ring.published,
        report.telemetry.written + report.ring.dropped
    );
    assert!(report.rtc.unwrap().ticks >= 10);
}

#[test]
fn second_session_is_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut process, _hw) = start(config(10, 100.0), tmp.path());

    let mut first = Client::connect(process.local_addr());
    assert!(first.send("status").ok);

    let mut second = Client::connect(process.local_addr());
    let refused = second.recv();
    assert!(!refused.ok);
    assert!(refused.message.contains("session limit"));

    assert!(first.send("status").ok);
    process.shutdown();
}

#[test]
fn macros_update_status() {
    let tmp = tempfile::tempdir().unwrap();
    let (mut process, hw) = start(config(10, 100.0), tmp.path());
    let mut client = Client::connect(process.local_addr());

    assert!(client.send("close_all").ok);
    assert_eq!(hw.element_position("LO"), Some("close"));
    assert!(client.send("open_baldr_LO").ok);

    let status = client.send("status").data.unwrap();
    assert_eq!(status["elements"]["LO"], "OPEN");
    assert_eq!(status["elements"]["HO"], "CLOSED");

    hw.break_element("HO");
    let reply = client.send("open_baldr_HO");
    assert!(!reply.ok);
    assert!(client.send("status").ok);

    process.shutdown();
}

#[test]
fn sensor_faults_stop_the_process() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(10, 200.0);
    cfg.rtc.fault_threshold = 5;
    let (process, hw) = start(cfg, tmp.path());
    hw.fail_next_reads(u64::MAX);

    let snap = process.wait_for_stop_request(Some(Duration::from_secs(5)));
    assert_eq!(snap.mode, RunMode::Stopping);
    let mut client = Client::connect(process.local_addr());
    let status = client.send("status").data.unwrap();
    assert!(status["last_fault"]
        .as_str()
        .unwrap()
        .contains("5 consecutive failed ticks"));
    drop(client);

    let report = process.run_until_stopped();
    assert!(report.rtc.unwrap().faulted);

    let records = stored_records(tmp.path());
    let faults = records.iter().filter(|r| r["status"] == "FAULT").count();
    assert_eq!(faults, 1);
    assert_eq!(records.last().unwrap()["status"], "FAULT");
}
