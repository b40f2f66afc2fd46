// src/rl/mod.rs
//
// Imitation-learning drivers on top of the simulation seam.
//
// Key components:
// - ActionDiscretizer: continuous (acc, steer) -> joint bucket index
// - select: first vehicle with a complete expert trajectory
// - StateStack: per-vehicle observation history for policy input
// - DatasetGenerator: expert replay -> EpisodeRecord
// - PolicyRollout: closed-loop control of moved vehicles by a Policy
// - Policy: trait plus the MLP behaviour-cloning implementation

pub mod dataset;
pub mod discretize;
pub mod observation;
pub mod policy;
pub mod rollout;
pub mod select;

// Re-exports for convenience
pub use dataset::{candidate_vehicles, render_frame, DatasetGenerator, DatasetOutcome, SkipReason};
pub use discretize::{ActionDiscretizer, DiscreteAction};
pub use observation::{construct_state, StackError, StateStack};
pub use policy::{
    ActionGrid, BcWeights, BehavioralCloningPolicy, NeutralPolicy, Policy, PolicyError,
    PolicyOutput, BC_POLICY_VERSION,
};
pub use rollout::{PolicyRollout, RolloutError};
pub use select::{has_full_trajectory, select_full_trajectory_vehicle};
