// src/rl/select.rs
//
// Full-timestep vehicle selection.
//
// A vehicle qualifies when the log holds a defined (non-NaN) expert action
// for it at every timestep of the horizon. Candidates are tested in the order
// given and the first qualifying one wins.

use crate::sim::{Scenario, VehicleId};

/// True when `vehicle` has a valid expert action at every t in 0..horizon.
pub fn has_full_trajectory<S: Scenario + ?Sized>(
    scenario: &S,
    vehicle: VehicleId,
    horizon: usize,
) -> bool {
    (0..horizon).all(|t| {
        scenario
            .expert_action(vehicle, t)
            .is_some_and(|a| a.is_valid())
    })
}

/// First candidate with a full expert trajectory, or None.
pub fn select_full_trajectory_vehicle<S: Scenario + ?Sized>(
    scenario: &S,
    candidates: &[VehicleId],
    horizon: usize,
) -> Option<VehicleId> {
    candidates
        .iter()
        .copied()
        .find(|&v| has_full_trajectory(scenario, v, horizon))
}
