// src/logging.rs
//
// Logging and per-step telemetry sinks.
// - init_tracing: installs the tracing subscriber used by the binary
// - StepSink:  trait used by the rollout driver for each applied command
// - NoopSink:  discards all records
// - JsonlSink: writes one JSON object per line for offline analysis

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::rl::policy::PolicyOutput;
use crate::sim::VehicleId;

/// Install a stderr `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise verbosity 0/1/2+ maps to
/// info/debug/trace for this crate and warn for dependencies.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,ditto=info",
        1 => "warn,ditto=debug",
        _ => "warn,ditto=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// One applied policy command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub vehicle: VehicleId,
    pub acc_index: usize,
    pub steer_index: usize,
    pub acceleration: f32,
    pub steering: f32,
}

impl StepRecord {
    pub fn new(step: usize, vehicle: VehicleId, out: &PolicyOutput) -> Self {
        Self {
            step,
            vehicle,
            acc_index: out.acc_index,
            steer_index: out.steer_index,
            acceleration: out.acceleration,
            steering: out.steering,
        }
    }
}

/// Abstract sink for per-step telemetry.
pub trait StepSink {
    fn log_step(&mut self, record: &StepRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink that discards all records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StepSink for NoopSink {
    fn log_step(&mut self, _record: &StepRecord) -> io::Result<()> {
        Ok(())
    }
}

/// JSONL file sink.
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl JsonlSink<BufWriter<File>> {
    /// Create a new sink writing to `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn from_writer(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StepSink for JsonlSink<W> {
    fn log_step(&mut self, record: &StepRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{}", line)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
