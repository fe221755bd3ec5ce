/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scriptable hardware double for exercising fault handling without devices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use super::{Hardware, HardwareError, SensorSample};

#[derive(Debug, Default)]
struct Script {
    /// Remaining sensor reads that fail with a timeout.
    sensor_failures: u64,
    /// Remaining actuator writes that fail with a device error.
    actuator_failures: u64,
    /// Elements whose open/close always fails.
    broken_elements: BTreeSet<String>,
}

/// Test double with a failure script and call log.
///
/// Pixel values equal the frame id so tests can correlate telemetry frames
/// with sensor reads.
#[derive(Debug)]
pub struct FakeHardware {
    rows: usize,
    cols: usize,
    elements: Vec<String>,
    script: Mutex<Script>,
    reads: AtomicU64,
    writes: AtomicU64,
    /// Element → last successful operation.
    element_log: Mutex<BTreeMap<String, &'static str>>,
    shutdowns: AtomicU64,
    read_latency_us: AtomicU64,
}

impl FakeHardware {
    pub fn new(rows: usize, cols: usize, elements: &[&str]) -> Self {
        Self {
            rows,
            cols,
            elements: elements.iter().map(|e| e.to_string()).collect(),
            script: Mutex::new(Script::default()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            element_log: Mutex::new(BTreeMap::new()),
            shutdowns: AtomicU64::new(0),
            read_latency_us: AtomicU64::new(0),
        }
    }

    /// Every sensor read blocks for `latency` before returning.
    pub fn set_read_latency(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.read_latency_us.store(us, Ordering::SeqCst);
    }

    /// The next `n` sensor reads fail with [`HardwareError::Timeout`].
    pub fn fail_next_reads(&self, n: u64) {
        self.script().sensor_failures = n;
    }

    /// The next `n` actuator writes fail with [`HardwareError::Device`].
    pub fn fail_next_writes(&self, n: u64) {
        self.script().actuator_failures = n;
    }

    /// `open`/`close` on `element` fail from now on.
    pub fn break_element(&self, element: &str) {
        self.script().broken_elements.insert(element.to_string());
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> u64 {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Last successful element operation (`"open"` / `"close"`).
    pub fn element_position(&self, element: &str) -> Option<&'static str> {
        self.element_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(element)
            .copied()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn element_op(&self, element: &str, op: &'static str) -> Result<(), HardwareError> {
        if !self.elements.iter().any(|e| e == element) {
            return Err(HardwareError::UnknownElement(element.to_string()));
        }
        if self.script().broken_elements.contains(element) {
            return Err(HardwareError::Device(format!("{element} stuck")));
        }
        self.element_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(element.to_string(), op);
        Ok(())
    }
}

impl Hardware for FakeHardware {
    fn read_sensor(&self) -> Result<SensorSample, HardwareError> {
        let id = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = self.read_latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            thread::sleep(Duration::from_micros(latency));
        }
        {
            let mut script = self.script();
            if script.sensor_failures > 0 {
                script.sensor_failures -= 1;
                return Err(HardwareError::Timeout { after_ms: 1 });
            }
        }
        let mut sample = SensorSample::zeros(id, id, self.rows, self.cols);
        sample.pixels.iter_mut().for_each(|p| *p = id as f32);
        Ok(sample)
    }

    fn apply_setpoints(&self, _setpoints: &[f64]) -> Result<(), HardwareError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script();
        if script.actuator_failures > 0 {
            script.actuator_failures -= 1;
            return Err(HardwareError::Device("DM channel busy".to_string()));
        }
        Ok(())
    }

    fn elements(&self) -> Vec<String> {
        self.elements.clone()
    }

    fn open(&self, element: &str) -> Result<(), HardwareError> {
        self.element_op(element, "open")
    }

    fn close(&self, element: &str) -> Result<(), HardwareError> {
        self.element_op(element, "close")
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
