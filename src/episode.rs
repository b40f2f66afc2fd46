// src/episode.rs
//
// Episode records and their on-disk archive.
//
// An episode is the serialized unit of training data for one scenario run:
//   images  : N x H x W x C  u8
//   actions : N              i64  (joint discretized action index)
//   resets  : N              bool (true only on the last entry)
//
// Archives are NumPy .npz files so the training side can np.load() them
// directly. Records are validated before writing; a partial or ragged record
// is an error, never a silently truncated file. Archives are written to a
// sibling `.tmp` file and renamed into place, so a reader never sees a
// half-written archive under the final name.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array4};
use ndarray_npy::{NpzWriter, WriteNpzError};
use serde::{Deserialize, Serialize};

use crate::sim::{Frame, VehicleId};

/// Reserved manifest file found next to scenario files. Never a scenario.
pub const MANIFEST_FILE_NAME: &str = "valid_files.json";

/// Archive extension.
pub const EPISODE_EXTENSION: &str = "npz";

#[derive(Debug)]
pub enum EpisodeError {
    Empty,
    LengthMismatch {
        images: usize,
        actions: usize,
        resets: usize,
    },
    MissingFinalReset,
    FrameShape {
        index: usize,
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    Io(std::io::Error),
    Npz(WriteNpzError),
}

impl fmt::Display for EpisodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeError::Empty => write!(f, "episode has no frames"),
            EpisodeError::LengthMismatch {
                images,
                actions,
                resets,
            } => write!(
                f,
                "episode sequences differ in length: images={} actions={} resets={}",
                images, actions, resets
            ),
            EpisodeError::MissingFinalReset => write!(f, "last reset flag is not set"),
            EpisodeError::FrameShape {
                index,
                expected,
                got,
            } => write!(
                f,
                "frame {} has shape {:?}, expected {:?}",
                index, got, expected
            ),
            EpisodeError::Io(e) => write!(f, "episode io error: {}", e),
            EpisodeError::Npz(e) => write!(f, "episode npz error: {}", e),
        }
    }
}

impl std::error::Error for EpisodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EpisodeError::Io(e) => Some(e),
            EpisodeError::Npz(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EpisodeError {
    fn from(e: std::io::Error) -> Self {
        EpisodeError::Io(e)
    }
}

impl From<WriteNpzError> for EpisodeError {
    fn from(e: WriteNpzError) -> Self {
        EpisodeError::Npz(e)
    }
}

/// One scenario's frames, discretized actions and episode-boundary flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeRecord {
    pub images: Vec<Frame>,
    pub actions: Vec<i64>,
    pub resets: Vec<bool>,
}

impl EpisodeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Append one (frame, action) pair; the reset flag is fixed up by `finish`.
    pub fn push(&mut self, frame: Frame, action: usize) {
        self.images.push(frame);
        self.actions.push(action as i64);
        self.resets.push(false);
    }

    /// Mark the last entry as the episode boundary.
    pub fn finish(&mut self) {
        for r in self.resets.iter_mut() {
            *r = false;
        }
        if let Some(last) = self.resets.last_mut() {
            *last = true;
        }
    }

    /// Common frame shape, after checking every invariant.
    pub fn validate(&self) -> Result<(usize, usize, usize), EpisodeError> {
        let (n_img, n_act, n_res) = (self.images.len(), self.actions.len(), self.resets.len());
        if n_img != n_act || n_img != n_res {
            return Err(EpisodeError::LengthMismatch {
                images: n_img,
                actions: n_act,
                resets: n_res,
            });
        }
        let first = self.images.first().ok_or(EpisodeError::Empty)?;
        if self.resets.last() != Some(&true) {
            return Err(EpisodeError::MissingFinalReset);
        }
        let expected = first.dim();
        validate_frames(&self.images, expected)?;
        Ok(expected)
    }
}

fn validate_frames(
    frames: &[Frame],
    expected: (usize, usize, usize),
) -> Result<(), EpisodeError> {
    match frames.iter().position(|f| f.dim() != expected) {
        Some(index) => Err(EpisodeError::FrameShape {
            index,
            expected,
            got: frames[index].dim(),
        }),
        None => Ok(()),
    }
}

/// Stack frames into one N x H x W x C array.
fn stack_frames(frames: &[Frame], shape: (usize, usize, usize)) -> Result<Array4<u8>, EpisodeError> {
    let (h, w, c) = shape;
    let mut flat = Vec::with_capacity(frames.len() * h * w * c);
    for frame in frames {
        flat.extend(frame.iter().copied());
    }
    Array4::from_shape_vec((frames.len(), h, w, c), flat).map_err(|e| {
        EpisodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

/// Applied commands from a policy rollout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepCommands {
    pub step: usize,
    pub acceleration: Vec<f32>,
    pub steering: Vec<f32>,
}

/// Frames and commands from one closed-loop rollout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutRecord {
    /// Controlled vehicles, in the column order of the command arrays.
    pub vehicles: Vec<VehicleId>,
    /// Initial frame followed by one frame per step.
    pub frames: Vec<Frame>,
    pub commands: Vec<StepCommands>,
}

/// Output path for a scenario: `<output_dir>/<scenario name>.npz`.
pub fn episode_path(output_dir: &Path, scenario_file: &Path) -> PathBuf {
    let name = scenario_file
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("episode"));
    output_dir.join(name.with_extension(EPISODE_EXTENSION))
}

/// Writes episode archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpisodeWriter;

impl EpisodeWriter {
    pub fn new() -> Self {
        Self
    }

    /// Validate and write `record` to `path`, replacing any existing file.
    pub fn write(&self, record: &EpisodeRecord, path: &Path) -> Result<(), EpisodeError> {
        let shape = record.validate()?;
        let images = stack_frames(&record.images, shape)?;
        let actions = Array1::from_vec(record.actions.clone());
        let resets = Array1::from_vec(record.resets.clone());

        write_atomic(path, |npz| {
            npz.add_array("images", &images)?;
            npz.add_array("actions", &actions)?;
            npz.add_array("resets", &resets)?;
            Ok(())
        })
    }

    /// Write a rollout: `images`, `acceleration` / `steering` (steps x vehicles)
    /// and `vehicle_ids`.
    pub fn write_rollout(&self, record: &RolloutRecord, path: &Path) -> Result<(), EpisodeError> {
        let first = record.frames.first().ok_or(EpisodeError::Empty)?;
        let shape = first.dim();
        validate_frames(&record.frames, shape)?;
        let images = stack_frames(&record.frames, shape)?;

        let n_veh = record.vehicles.len();
        if let Some(bad) = record
            .commands
            .iter()
            .find(|c| c.acceleration.len() != n_veh || c.steering.len() != n_veh)
        {
            return Err(EpisodeError::LengthMismatch {
                images: record.frames.len(),
                actions: bad.acceleration.len(),
                resets: n_veh,
            });
        }
        let acceleration = command_matrix(&record.commands, n_veh, |c| &c.acceleration)?;
        let steering = command_matrix(&record.commands, n_veh, |c| &c.steering)?;
        let ids = Array1::from_vec(record.vehicles.iter().map(|v| v.0 as i64).collect());

        write_atomic(path, |npz| {
            npz.add_array("images", &images)?;
            npz.add_array("acceleration", &acceleration)?;
            npz.add_array("steering", &steering)?;
            npz.add_array("vehicle_ids", &ids)?;
            Ok(())
        })
    }
}

/// Steps x vehicles matrix of one command axis.
fn command_matrix(
    commands: &[StepCommands],
    n_veh: usize,
    pick: impl Fn(&StepCommands) -> &Vec<f32>,
) -> Result<Array2<f32>, EpisodeError> {
    let flat: Vec<f32> = commands.iter().flat_map(|c| pick(c).iter().copied()).collect();
    Array2::from_shape_vec((commands.len(), n_veh), flat)
        .map_err(|e| EpisodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

type ArchiveWriter = NpzWriter<BufWriter<File>>;

/// `<path>.tmp`, next to the final archive.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "episode".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Fill an archive at the temp path, then rename it over `path`.
/// On any error the temp file is removed and `path` is left untouched.
fn write_atomic(
    path: &Path,
    fill: impl FnOnce(&mut ArchiveWriter) -> Result<(), EpisodeError>,
) -> Result<(), EpisodeError> {
    let tmp = temp_path(path);
    let result = create_file(&tmp).and_then(|file| {
        let mut npz = NpzWriter::new(file);
        fill(&mut npz)?;
        npz.finish()?.flush()?;
        fs::rename(&tmp, path)?;
        Ok(())
    });
    if result.is_err() && tmp.is_file() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn create_file(path: &Path) -> Result<BufWriter<File>, EpisodeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_npy::NpzReader;

    fn frame(v: u8) -> Frame {
        Array3::from_elem((2, 3, 1), v)
    }

    #[test]
    fn test_finish_marks_only_last() {
        let mut rec = EpisodeRecord::new();
        rec.push(frame(0), 1);
        rec.push(frame(1), 2);
        rec.push(frame(2), 3);
        rec.finish();
        assert_eq!(rec.resets, vec![false, false, true]);
        assert_eq!(rec.validate().unwrap(), (2, 3, 1));
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let rec = EpisodeRecord::new();
        assert!(matches!(rec.validate(), Err(EpisodeError::Empty)));

        let mut rec = EpisodeRecord::new();
        rec.push(frame(0), 1);
        assert!(matches!(rec.validate(), Err(EpisodeError::MissingFinalReset)));

        let mut rec = EpisodeRecord::new();
        rec.push(frame(0), 1);
        rec.finish();
        rec.actions.push(4);
        assert!(matches!(
            rec.validate(),
            Err(EpisodeError::LengthMismatch { .. })
        ));

        let mut rec = EpisodeRecord::new();
        rec.push(frame(0), 1);
        rec.push(Array3::zeros((3, 3, 1)), 1);
        rec.finish();
        assert!(matches!(
            rec.validate(),
            Err(EpisodeError::FrameShape { index: 1, .. })
        ));
    }

    #[test]
    fn test_episode_path_swaps_extension() {
        let p = episode_path(Path::new("/out"), Path::new("/data/tfrecord-00003_109.json"));
        assert_eq!(p, PathBuf::from("/out/tfrecord-00003_109.npz"));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/ep.npz");
        let mut rec = EpisodeRecord::new();
        rec.push(frame(7), 5);
        rec.push(frame(9), 11);
        rec.finish();
        EpisodeWriter::new().write(&rec, &path).unwrap();

        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        let images: Array4<u8> = npz.by_name("images").unwrap();
        let actions: Array1<i64> = npz.by_name("actions").unwrap();
        let resets: Array1<bool> = npz.by_name("resets").unwrap();
        assert_eq!(images.dim(), (2, 2, 3, 1));
        assert_eq!(images[[1, 0, 0, 0]], 9);
        assert_eq!(actions.to_vec(), vec![5, 11]);
        assert_eq!(resets.to_vec(), vec![false, true]);
    }

    #[test]
    fn test_write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.npz");
        fs::write(&path, b"stale").unwrap();
        let mut rec = EpisodeRecord::new();
        rec.push(frame(1), 0);
        rec.finish();
        EpisodeWriter::new().write(&rec, &path).unwrap();
        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        let actions: Array1<i64> = npz.by_name("actions").unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_invalid_record_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.npz");
        let mut rec = EpisodeRecord::new();
        rec.push(frame(1), 0);
        assert!(EpisodeWriter::new().write(&rec, &path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.npz");
        let mut rec = EpisodeRecord::new();
        rec.push(frame(3), 2);
        rec.finish();
        EpisodeWriter::new().write(&rec, &path).unwrap();
        assert!(path.is_file());
        assert!(!dir.path().join("ep.npz.tmp").exists());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ep.npz")]);
    }

    #[test]
    fn test_failed_write_keeps_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ep.npz");
        fs::write(&path, b"previous").unwrap();
        // A directory squatting on the temp name makes the write fail.
        fs::create_dir(dir.path().join("ep.npz.tmp")).unwrap();
        let mut rec = EpisodeRecord::new();
        rec.push(frame(1), 0);
        rec.finish();
        assert!(matches!(
            EpisodeWriter::new().write(&rec, &path),
            Err(EpisodeError::Io(_))
        ));
        assert_eq!(fs::read(&path).unwrap(), b"previous");
    }

    #[test]
    fn test_write_rollout_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.npz");
        let rec = RolloutRecord {
            vehicles: vec![VehicleId(4), VehicleId(8)],
            frames: vec![frame(0), frame(1), frame(2)],
            commands: vec![
                StepCommands {
                    step: 1,
                    acceleration: vec![1.0, 2.0],
                    steering: vec![0.1, 0.2],
                },
                StepCommands {
                    step: 2,
                    acceleration: vec![3.0, 4.0],
                    steering: vec![0.3, 0.4],
                },
            ],
        };
        EpisodeWriter::new().write_rollout(&rec, &path).unwrap();
        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        let acc: Array2<f32> = npz.by_name("acceleration").unwrap();
        let ids: Array1<i64> = npz.by_name("vehicle_ids").unwrap();
        let images: Array4<u8> = npz.by_name("images").unwrap();
        assert_eq!(acc.dim(), (2, 2));
        assert_eq!(acc[[1, 0]], 3.0);
        assert_eq!(ids.to_vec(), vec![4, 8]);
        assert_eq!(images.dim().0, 3);
    }
}
