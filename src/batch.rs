// src/batch.rs
//
// Batch dataset generation over a directory of scenario files.
//
// Each scenario is processed to completion (load -> expert replay -> write)
// before the next one starts, and always yields a ScenarioOutcome; a bad
// file is reported, never fatal. The run ends with a versioned
// metadata.json next to the episode archives.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::episode::{episode_path, EpisodeWriter, MANIFEST_FILE_NAME};
use crate::rl::dataset::{DatasetGenerator, DatasetOutcome};
use crate::sim::{SimulationLoader, VehicleId};

/// Current metadata format version.
/// Increment when changing the metadata schema.
pub const DATASET_VERSION: u32 = 1;

/// Metadata file written into every output directory.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Scenario file extension.
pub const SCENARIO_EXTENSION: &str = "json";

/// What happened to one scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Written {
        path: PathBuf,
        frames: usize,
        vehicle: VehicleId,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
    },
}

impl ScenarioOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, ScenarioOutcome::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario file name.
    pub scenario: String,
    pub outcome: ScenarioOutcome,
}

/// Metadata for a generated dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Metadata format version.
    pub dataset_version: u32,
    /// Crate version that produced the dataset.
    pub generator_version: String,
    /// Full configuration used for generation.
    pub config: Config,
    /// Number of joint action indices (largest index + 1).
    pub num_actions: usize,
    pub num_scenarios: usize,
    pub num_written: usize,
    pub num_skipped: usize,
    pub num_failed: usize,
    /// Total frames across written episodes.
    pub num_frames: usize,
    /// Generation timestamp (seconds since the Unix epoch).
    pub generated_at: String,
    pub scenarios: Vec<ScenarioReport>,
}

/// Counts returned by `BatchRunner::run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub frames: usize,
    pub reports: Vec<ScenarioReport>,
}

impl BatchSummary {
    fn record(&mut self, report: ScenarioReport) {
        match &report.outcome {
            ScenarioOutcome::Written { frames, .. } => {
                self.written += 1;
                self.frames += frames;
            }
            ScenarioOutcome::Skipped { .. } => self.skipped += 1,
            ScenarioOutcome::Failed { .. } => self.failed += 1,
        }
        self.reports.push(report);
    }

    pub fn total(&self) -> usize {
        self.reports.len()
    }
}

/// Scenario files under `input`, sorted by name.
///
/// A file path is returned as-is; a directory is listed non-recursively for
/// `*.json`, excluding the `valid_files.json` manifest.
pub fn scenario_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        if is_manifest(input) {
            return Ok(Vec::new());
        }
        return Ok(vec![input.to_path_buf()]);
    }
    let entries =
        fs::read_dir(input).with_context(|| format!("listing scenarios in {}", input.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("listing scenarios in {}", input.display()))?
            .path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SCENARIO_EXTENSION)
        {
            continue;
        }
        if is_manifest(&path) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn is_manifest(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE_NAME)
}

/// Runs dataset generation over many scenario files.
pub struct BatchRunner<L: SimulationLoader> {
    loader: L,
    generator: DatasetGenerator,
    writer: EpisodeWriter,
}

impl<L: SimulationLoader> BatchRunner<L> {
    pub fn new(loader: L, config: Config) -> Self {
        Self {
            loader,
            generator: DatasetGenerator::new(config),
            writer: EpisodeWriter::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.generator.config()
    }

    /// Process one scenario file into `output_dir`.
    pub fn process_file(&self, path: &Path, output_dir: &Path) -> ScenarioOutcome {
        let mut sim = match self.loader.load(path, &self.config().scenario) {
            Ok(sim) => sim,
            Err(e) => {
                return ScenarioOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        match self.generator.generate(&mut sim) {
            DatasetOutcome::Skipped(reason) => ScenarioOutcome::Skipped {
                reason: reason.as_str().to_string(),
            },
            DatasetOutcome::Episode { vehicle, record } => {
                let out = episode_path(output_dir, path);
                match self.writer.write(&record, &out) {
                    Ok(()) => ScenarioOutcome::Written {
                        path: out,
                        frames: record.len(),
                        vehicle,
                    },
                    Err(e) => ScenarioOutcome::Failed {
                        reason: format!("writing {}: {}", out.display(), e),
                    },
                }
            }
        }
    }

    /// Process every scenario under `input` and write `metadata.json`.
    pub fn run(&self, input: &Path, output_dir: &Path) -> Result<BatchSummary> {
        let files = scenario_files(input)?;
        fs::create_dir_all(output_dir)
            .with_context(|| format!("creating output directory {}", output_dir.display()))?;
        info!(
            scenarios = files.len(),
            input = %input.display(),
            output = %output_dir.display(),
            "starting dataset generation"
        );

        let mut summary = BatchSummary::default();
        for (i, path) in files.iter().enumerate() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let outcome = self.process_file(path, output_dir);
            match &outcome {
                ScenarioOutcome::Written { frames, vehicle, .. } => info!(
                    "[{}/{}] {}: wrote {} frames (vehicle {})",
                    i + 1,
                    files.len(),
                    name,
                    frames,
                    vehicle
                ),
                ScenarioOutcome::Skipped { reason } => {
                    warn!("[{}/{}] {}: skipped: {}", i + 1, files.len(), name, reason)
                }
                ScenarioOutcome::Failed { reason } => {
                    warn!("[{}/{}] {}: failed: {}", i + 1, files.len(), name, reason)
                }
            }
            summary.record(ScenarioReport {
                scenario: name,
                outcome,
            });
        }

        let metadata = self.metadata(&summary);
        let metadata_path = output_dir.join(METADATA_FILE_NAME);
        let json = serde_json::to_string_pretty(&metadata).context("serializing dataset metadata")?;
        fs::write(&metadata_path, json)
            .with_context(|| format!("writing {}", metadata_path.display()))?;

        info!(
            written = summary.written,
            skipped = summary.skipped,
            failed = summary.failed,
            frames = summary.frames,
            "dataset generation finished"
        );
        Ok(summary)
    }

    fn metadata(&self, summary: &BatchSummary) -> DatasetMetadata {
        DatasetMetadata {
            dataset_version: DATASET_VERSION,
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
            config: self.config().clone(),
            num_actions: self.generator.discretizer().max_index() + 1,
            num_scenarios: summary.total(),
            num_written: summary.written,
            num_skipped: summary.skipped,
            num_failed: summary.failed,
            num_frames: summary.frames,
            generated_at: unix_timestamp(),
            scenarios: summary.reports.clone(),
        }
    }
}

fn unix_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}", secs)
}
