// src/rl/policy.rs
//
// Policy trait and implementations for closed-loop rollouts.
//
// A policy maps a stacked observation to one bucket index per action axis
// (acceleration, steering); the index is looked up in a fixed action grid to
// get the continuous command applied to the vehicle.
//
// - Policy: interface used by PolicyRollout
// - ActionGrid: evenly spaced values per axis (linspace)
// - BehavioralCloningPolicy: MLP loaded from JSON weights
//     input filter (x - mean) / (std + eps) -> [Linear, tanh]* -> one Linear head per axis,
//     argmax per head (first maximum wins)
// - NeutralPolicy: always picks the grid value closest to zero

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Version string of the BC policy implementation.
pub const BC_POLICY_VERSION: &str = "bc-mlp-v1";

/// Version string of the neutral policy.
pub const NEUTRAL_POLICY_VERSION: &str = "neutral-v1";

/// Epsilon added to the std in the input filter.
pub const FILTER_EPS: f32 = 1e-5;

/// Default grid sizes (acceleration, steering).
pub const DEFAULT_ACTION_DISCRETIZATIONS: [usize; 2] = [15, 43];

/// Default grid bounds (acceleration, steering).
pub const DEFAULT_ACTION_BOUNDS: [(f32, f32); 2] = [(-6.0, 6.0), (-0.7, 0.7)];

/// Evenly spaced action values over [min, max], endpoints included.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionGrid {
    values: Vec<f32>,
}

impl ActionGrid {
    pub fn linspace(min: f32, max: f32, count: usize) -> Self {
        let values = match count {
            0 => Vec::new(),
            1 => vec![min],
            n => {
                let step = (max - min) / (n - 1) as f32;
                (0..n).map(|i| min + step * i as f32).collect()
            }
        };
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Index of the value closest to `target` (first on ties).
    pub fn nearest_index(&self, target: f32) -> usize {
        self.values
            .iter()
            .enumerate()
            .fold((0, f32::INFINITY), |(best, best_d), (i, v)| {
                let d = (v - target).abs();
                if d < best_d {
                    (i, d)
                } else {
                    (best, best_d)
                }
            })
            .0
    }
}

/// Grids for (acceleration, steering).
pub fn default_action_grids() -> [ActionGrid; 2] {
    grids_from(&DEFAULT_ACTION_BOUNDS, &DEFAULT_ACTION_DISCRETIZATIONS)
}

fn grids_from(bounds: &[(f32, f32); 2], counts: &[usize; 2]) -> [ActionGrid; 2] {
    [
        ActionGrid::linspace(bounds[0].0, bounds[0].1, counts[0]),
        ActionGrid::linspace(bounds[1].0, bounds[1].1, counts[1]),
    ]
}

/// Policy decision for one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutput {
    pub acceleration: f32,
    pub steering: f32,
    pub acc_index: usize,
    pub steer_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    InputDimension { expected: usize, got: usize },
    InvalidWeights { message: String },
    Io { path: String, source: String },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::InputDimension { expected, got } => {
                write!(f, "policy expects {} inputs, got {}", expected, got)
            }
            PolicyError::InvalidWeights { message } => write!(f, "invalid policy weights: {}", message),
            PolicyError::Io { path, source } => {
                write!(f, "failed to read policy weights '{}': {}", path, source)
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Trait for rollout policies.
///
/// `act` is a pure function: the same stacked state gives the same output.
pub trait Policy: Send + Sync {
    /// Unique version string for this policy implementation.
    fn version(&self) -> &str;

    /// Optional policy ID (e.g., weights file name).
    fn policy_id(&self) -> Option<&str> {
        None
    }

    /// Expected stacked-state length.
    fn num_inputs(&self) -> usize;

    fn act(&self, state: &[f32]) -> Result<PolicyOutput, PolicyError>;
}

/// Dense layer, `weight[out][in]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearWeights {
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearWeights {
    fn in_dim(&self) -> usize {
        self.weight.first().map(Vec::len).unwrap_or(0)
    }

    fn out_dim(&self) -> usize {
        self.weight.len()
    }

    fn check(&self, name: &str, in_dim: usize) -> Result<(), PolicyError> {
        let invalid = |message: String| PolicyError::InvalidWeights { message };
        if self.weight.is_empty() {
            return Err(invalid(format!("{name}: no output rows")));
        }
        if let Some(row) = self.weight.iter().position(|r| r.len() != in_dim) {
            return Err(invalid(format!(
                "{name}: row {row} has {} inputs, expected {in_dim}",
                self.weight[row].len()
            )));
        }
        if self.bias.len() != self.out_dim() {
            return Err(invalid(format!(
                "{name}: bias has {} entries, expected {}",
                self.bias.len(),
                self.out_dim()
            )));
        }
        Ok(())
    }

    fn forward(&self, x: &[f32]) -> Vec<f32> {
        self.weight
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect()
    }
}

/// Running mean/std snapshot of the input filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterWeights {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

fn default_bounds() -> [(f32, f32); 2] {
    DEFAULT_ACTION_BOUNDS
}

fn default_discretizations() -> [usize; 2] {
    DEFAULT_ACTION_DISCRETIZATIONS
}

/// Serialized BC model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BcWeights {
    pub num_inputs: usize,
    #[serde(default)]
    pub filter: Option<FilterWeights>,
    #[serde(default)]
    pub hidden: Vec<LinearWeights>,
    /// One head per action axis: acceleration, steering.
    pub heads: Vec<LinearWeights>,
    #[serde(default = "default_bounds")]
    pub action_bounds: [(f32, f32); 2],
    #[serde(default = "default_discretizations")]
    pub action_discretizations: [usize; 2],
}

/// Behavioural-cloning MLP policy.
#[derive(Debug, Clone)]
pub struct BehavioralCloningPolicy {
    weights: BcWeights,
    grids: [ActionGrid; 2],
    policy_id: Option<String>,
}

impl BehavioralCloningPolicy {
    /// Validate shapes and build the action grids.
    pub fn new(weights: BcWeights) -> Result<Self, PolicyError> {
        let invalid = |message: String| PolicyError::InvalidWeights { message };
        if weights.num_inputs == 0 {
            return Err(invalid("num_inputs must be positive".to_string()));
        }
        if let Some(filter) = &weights.filter {
            if filter.mean.len() != weights.num_inputs || filter.std.len() != weights.num_inputs {
                return Err(invalid(format!(
                    "filter has {}/{} entries, expected {}",
                    filter.mean.len(),
                    filter.std.len(),
                    weights.num_inputs
                )));
            }
        }
        let mut dim = weights.num_inputs;
        for (i, layer) in weights.hidden.iter().enumerate() {
            layer.check(&format!("hidden[{i}]"), dim)?;
            dim = layer.out_dim();
        }
        if weights.heads.len() != 2 {
            return Err(invalid(format!(
                "expected 2 heads (acceleration, steering), got {}",
                weights.heads.len()
            )));
        }
        for (i, head) in weights.heads.iter().enumerate() {
            head.check(&format!("heads[{i}]"), dim)?;
            if head.out_dim() != weights.action_discretizations[i] {
                return Err(invalid(format!(
                    "heads[{i}] has {} outputs, grid has {}",
                    head.out_dim(),
                    weights.action_discretizations[i]
                )));
            }
        }
        let grids = grids_from(&weights.action_bounds, &weights.action_discretizations);
        Ok(Self {
            weights,
            grids,
            policy_id: None,
        })
    }

    /// Load JSON weights; the file name becomes the policy ID.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|e| PolicyError::Io {
            path: display.clone(),
            source: e.to_string(),
        })?;
        let weights: BcWeights =
            serde_json::from_str(&raw).map_err(|e| PolicyError::InvalidWeights {
                message: format!("{display}: {e}"),
            })?;
        let mut policy = Self::new(weights)?;
        policy.policy_id = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Ok(policy)
    }

    pub fn grids(&self) -> &[ActionGrid; 2] {
        &self.grids
    }

    /// Head logits for a state (acceleration, steering).
    pub fn logits(&self, state: &[f32]) -> Result<[Vec<f32>; 2], PolicyError> {
        if state.len() != self.weights.num_inputs {
            return Err(PolicyError::InputDimension {
                expected: self.weights.num_inputs,
                got: state.len(),
            });
        }
        let mut x: Vec<f32> = match &self.weights.filter {
            Some(f) => state
                .iter()
                .zip(f.mean.iter().zip(&f.std))
                .map(|(v, (m, s))| (v - m) / (s + FILTER_EPS))
                .collect(),
            None => state.to_vec(),
        };
        for layer in &self.weights.hidden {
            x = layer.forward(&x).into_iter().map(f32::tanh).collect();
        }
        Ok([
            self.weights.heads[0].forward(&x),
            self.weights.heads[1].forward(&x),
        ])
    }
}

/// Index of the first maximum.
fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_v), (i, &v)| {
            if v > best_v {
                (i, v)
            } else {
                (best, best_v)
            }
        })
        .0
}

impl Policy for BehavioralCloningPolicy {
    fn version(&self) -> &str {
        BC_POLICY_VERSION
    }

    fn policy_id(&self) -> Option<&str> {
        self.policy_id.as_deref()
    }

    fn num_inputs(&self) -> usize {
        self.weights.num_inputs
    }

    fn act(&self, state: &[f32]) -> Result<PolicyOutput, PolicyError> {
        let [acc_logits, steer_logits] = self.logits(state)?;
        let acc_index = argmax(&acc_logits);
        let steer_index = argmax(&steer_logits);
        Ok(PolicyOutput {
            acceleration: self.grids[0].get(acc_index).unwrap_or(0.0),
            steering: self.grids[1].get(steer_index).unwrap_or(0.0),
            acc_index,
            steer_index,
        })
    }
}

/// Picks the grid values closest to zero on both axes.
#[derive(Debug, Clone)]
pub struct NeutralPolicy {
    num_inputs: usize,
    grids: [ActionGrid; 2],
}

impl NeutralPolicy {
    pub fn new(num_inputs: usize) -> Self {
        Self {
            num_inputs,
            grids: default_action_grids(),
        }
    }
}

impl Policy for NeutralPolicy {
    fn version(&self) -> &str {
        NEUTRAL_POLICY_VERSION
    }

    fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    fn act(&self, state: &[f32]) -> Result<PolicyOutput, PolicyError> {
        if state.len() != self.num_inputs {
            return Err(PolicyError::InputDimension {
                expected: self.num_inputs,
                got: state.len(),
            });
        }
        let acc_index = self.grids[0].nearest_index(0.0);
        let steer_index = self.grids[1].nearest_index(0.0);
        Ok(PolicyOutput {
            acceleration: self.grids[0].get(acc_index).unwrap_or(0.0),
            steering: self.grids[1].get(steer_index).unwrap_or(0.0),
            acc_index,
            steer_index,
        })
    }
}
