// src/rl/observation.rs
//
// Per-timestep observation vectors and the per-vehicle history stack.
//
// - construct_state: ego_state ++ cone-limited visible state, straight from
//   the engine
// - StateStack: one fixed-length window of the H most recent observations
//   per vehicle, most recent first, zero-filled until H pushes have happened
//
// A StateStack is owned by a single rollout and reset at the start of it;
// buffers never leak across scenarios.

use std::collections::HashMap;
use std::fmt;

use crate::sim::{Scenario, VehicleId};

/// Ego features followed by the visible-state block for `vehicle`.
pub fn construct_state<S: Scenario + ?Sized>(
    scenario: &S,
    vehicle: VehicleId,
    view_dist: f32,
    view_angle: f32,
) -> Vec<f32> {
    let mut state = scenario.ego_state(vehicle);
    state.extend(scenario.flattened_visible_state(vehicle, view_dist, view_angle));
    state
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Pushed observation length differs from the buffer's slice length.
    DimensionMismatch {
        vehicle: VehicleId,
        expected: usize,
        got: usize,
    },
    /// Zero-length observations cannot be stacked.
    EmptyObservation { vehicle: VehicleId },
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::DimensionMismatch {
                vehicle,
                expected,
                got,
            } => write!(
                f,
                "observation for vehicle {} has length {}, stack expects {}",
                vehicle, got, expected
            ),
            StackError::EmptyObservation { vehicle } => {
                write!(f, "empty observation for vehicle {}", vehicle)
            }
        }
    }
}

impl std::error::Error for StackError {}

#[derive(Debug, Clone)]
struct StackBuffer {
    obs_len: usize,
    data: Vec<f32>,
}

/// History windows keyed by vehicle.
#[derive(Debug, Clone)]
pub struct StateStack {
    history: usize,
    buffers: HashMap<VehicleId, StackBuffer>,
}

impl StateStack {
    pub fn new(history: usize) -> Self {
        Self {
            history,
            buffers: HashMap::new(),
        }
    }

    pub fn history(&self) -> usize {
        self.history
    }

    /// Number of vehicles with a live buffer.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Drop every buffer.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }

    /// Current window for a vehicle, if one was created.
    pub fn get(&self, vehicle: VehicleId) -> Option<&[f32]> {
        self.buffers.get(&vehicle).map(|b| b.data.as_slice())
    }

    /// Shift the vehicle's window by one observation and write `obs` into
    /// the leading slice. The first push fixes the observation length; later
    /// pushes with another length are rejected and leave the buffer intact.
    pub fn push(&mut self, vehicle: VehicleId, obs: &[f32]) -> Result<&[f32], StackError> {
        if obs.is_empty() {
            return Err(StackError::EmptyObservation { vehicle });
        }
        let history = self.history;
        let buf = self.buffers.entry(vehicle).or_insert_with(|| StackBuffer {
            obs_len: obs.len(),
            data: vec![0.0; history * obs.len()],
        });
        if buf.obs_len != obs.len() {
            return Err(StackError::DimensionMismatch {
                vehicle,
                expected: buf.obs_len,
                got: obs.len(),
            });
        }
        if !buf.data.is_empty() {
            buf.data.rotate_right(buf.obs_len);
            buf.data[..buf.obs_len].copy_from_slice(obs);
        }
        Ok(&buf.data)
    }
}
