// src/sim/mod.rs
//
// Seam to the traffic-simulation engine.
//
// The engine (scenario loading, stepping, rendering, state flattening) is an
// external collaborator. Drivers in `rl` only talk to it through these traits:
// - SimulationLoader: builds a Simulation from a scenario file + ScenarioConfig
// - Simulation: owns the scenario snapshot and advances time
// - Scenario: read-only queries plus per-vehicle control flags / commands
//
// `trace` provides a JSON log-playback engine implementing all three.

pub mod render;
pub mod trace;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ScenarioConfig;

pub use render::Frame;

/// Stable identifier of a vehicle inside one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logged ground-truth control command for one (vehicle, timestep).
///
/// Either axis may be NaN when the source log is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpertAction {
    pub acceleration: f32,
    pub steering: f32,
}

impl ExpertAction {
    pub fn new(acceleration: f32, steering: f32) -> Self {
        Self {
            acceleration,
            steering,
        }
    }

    /// True when both axes are defined.
    pub fn is_valid(&self) -> bool {
        !self.acceleration.is_nan() && !self.steering.is_nan()
    }
}

/// Full top-down render request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub width: usize,
    pub height: usize,
    /// World-space padding around the scene bounding box.
    pub padding: f32,
    pub draw_target_positions: bool,
}

/// Vehicle-centred, angle- and distance-limited render request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeSpec {
    pub width: usize,
    pub height: usize,
    /// Full cone aperture in radians.
    pub view_angle: f32,
    pub view_dist: f32,
    /// Head rotation relative to the vehicle heading, radians.
    pub head_angle: f32,
    pub padding: f32,
}

/// One scenario snapshot, as exposed by the engine.
pub trait Scenario {
    /// All vehicles, in engine order.
    fn vehicles(&self) -> Vec<VehicleId>;

    /// Vehicles whose logged trajectory moves (subset of `vehicles`).
    fn moved_vehicles(&self) -> Vec<VehicleId>;

    /// Expert action `t` steps after the configured start time, if recorded.
    fn expert_action(&self, vehicle: VehicleId, t: usize) -> Option<ExpertAction>;

    fn expert_control(&self, vehicle: VehicleId) -> bool;

    fn set_expert_control(&mut self, vehicle: VehicleId, expert: bool);

    /// Command used on the next step when the vehicle is not expert-controlled.
    fn set_command(&mut self, vehicle: VehicleId, acceleration: f32, steering: f32);

    fn image(&self, spec: &ImageSpec) -> Frame;

    fn cone_image(&self, vehicle: VehicleId, spec: &ConeSpec) -> Frame;

    fn ego_state(&self, vehicle: VehicleId) -> Vec<f32>;

    fn flattened_visible_state(
        &self,
        vehicle: VehicleId,
        view_dist: f32,
        view_angle: f32,
    ) -> Vec<f32>;
}

/// A running simulation. The driver is its only writer.
pub trait Simulation {
    type Scenario: Scenario;

    /// Advance simulated time by `dt` seconds.
    fn step(&mut self, dt: f32);

    fn scenario(&self) -> &Self::Scenario;

    fn scenario_mut(&mut self) -> &mut Self::Scenario;
}

/// Builds simulations from scenario files.
pub trait SimulationLoader {
    type Sim: Simulation;

    fn load(&self, path: &Path, config: &ScenarioConfig) -> Result<Self::Sim, SimError>;
}

/// Errors raised while loading a scenario.
#[derive(Debug, Clone)]
pub enum SimError {
    IoError { path: String, source: String },
    ParseError { path: String, source: String },
    InvalidScenario { path: String, message: String },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::IoError { path, source } => {
                write!(f, "Failed to read scenario file '{}': {}", path, source)
            }
            SimError::ParseError { path, source } => {
                write!(f, "Failed to parse scenario '{}': {}", path, source)
            }
            SimError::InvalidScenario { path, message } => {
                write!(f, "Invalid scenario '{}': {}", path, message)
            }
        }
    }
}

impl std::error::Error for SimError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expert_action_validity() {
        assert!(ExpertAction::new(1.0, 0.1).is_valid());
        assert!(!ExpertAction::new(f32::NAN, 0.1).is_valid());
        assert!(!ExpertAction::new(1.0, f32::NAN).is_valid());
    }

    #[test]
    fn test_sim_error_display() {
        let err = SimError::ParseError {
            path: "a.json".to_string(),
            source: "eof".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to parse scenario 'a.json': eof");
    }
}
