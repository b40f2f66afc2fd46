// src/rl/dataset.rs
//
// Expert-replay dataset generation for behaviour cloning.
//
// One scenario yields one episode:
// - every vehicle replays its log (expert control)
// - one vehicle with a complete expert trajectory is chosen
// - per timestep: observation frame, discretized expert action at that step
// - the last entry carries the episode-boundary reset flag
//
// Frame t is rendered before step t is applied, so actions[t] is the expert
// action taken from the state shown in images[t].

use tracing::{debug, info, warn};

use super::discretize::ActionDiscretizer;
use super::select::select_full_trajectory_vehicle;
use crate::config::{Config, RenderConfig, ViewMode};
use crate::episode::EpisodeRecord;
use crate::sim::render::to_grayscale;
use crate::sim::{ConeSpec, Frame, ImageSpec, Scenario, Simulation, VehicleId};

/// Why a scenario produced no episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No candidate has a defined expert action at every step of the horizon.
    NoFullTrajectoryVehicle,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoFullTrajectoryVehicle => "no vehicle with a full expert trajectory",
        }
    }
}

/// Result of running dataset generation on one scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetOutcome {
    Episode {
        vehicle: VehicleId,
        record: EpisodeRecord,
    },
    Skipped(SkipReason),
}

/// Render the observation frame for `vehicle` according to `render`.
///
/// Full mode ignores `vehicle`; cone mode centres on it.
pub fn render_frame<S: Scenario + ?Sized>(
    scenario: &S,
    vehicle: VehicleId,
    render: &RenderConfig,
    draw_target_positions: bool,
) -> Frame {
    let frame = match render.view_mode {
        ViewMode::Full => scenario.image(&ImageSpec {
            width: render.img_width,
            height: render.img_height,
            padding: render.padding,
            draw_target_positions,
        }),
        ViewMode::Cone => scenario.cone_image(
            vehicle,
            &ConeSpec {
                width: render.img_width,
                height: render.img_height,
                view_angle: render.cone_view_angle,
                view_dist: render.cone_view_dist,
                head_angle: render.cone_head_angle,
                padding: render.padding,
            },
        ),
    };
    if render.grayscale {
        to_grayscale(&frame)
    } else {
        frame
    }
}

/// Moved vehicles first, then every other vehicle, without duplicates.
pub fn candidate_vehicles<S: Scenario + ?Sized>(scenario: &S) -> Vec<VehicleId> {
    let mut candidates = scenario.moved_vehicles();
    for v in scenario.vehicles() {
        if !candidates.contains(&v) {
            candidates.push(v);
        }
    }
    candidates
}

/// Builds one episode per scenario from logged expert actions.
#[derive(Debug, Clone)]
pub struct DatasetGenerator {
    config: Config,
    discretizer: ActionDiscretizer,
}

impl DatasetGenerator {
    pub fn new(config: Config) -> Self {
        let discretizer = ActionDiscretizer::new(&config.discretization);
        Self {
            config,
            discretizer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn discretizer(&self) -> &ActionDiscretizer {
        &self.discretizer
    }

    /// Drive `sim` for one episode. The simulation is advanced `horizon`
    /// times when an episode is produced and left untouched otherwise.
    pub fn generate<Sim: Simulation>(&self, sim: &mut Sim) -> DatasetOutcome {
        let horizon = self.config.episode.horizon;
        let dt = self.config.episode.dt;

        let scenario = sim.scenario_mut();
        for v in scenario.vehicles() {
            scenario.set_expert_control(v, true);
        }

        let candidates = candidate_vehicles(sim.scenario());
        let Some(vehicle) = select_full_trajectory_vehicle(sim.scenario(), &candidates, horizon)
        else {
            warn!(
                candidates = candidates.len(),
                horizon, "no vehicle with a full expert trajectory"
            );
            return DatasetOutcome::Skipped(SkipReason::NoFullTrajectoryVehicle);
        };
        info!(
            vehicle = %vehicle,
            horizon,
            view = self.config.render.view_mode.as_str(),
            "generating episode"
        );

        let mut record = EpisodeRecord::new();
        for t in 0..horizon {
            let frame = render_frame(
                sim.scenario(),
                vehicle,
                &self.config.render,
                self.config.render.draw_target_positions,
            );
            // Selection guarantees a defined action at every t.
            let (acc, steer) = sim
                .scenario()
                .expert_action(vehicle, t)
                .map(|a| (a.acceleration, a.steering))
                .unwrap_or((f32::NAN, f32::NAN));
            let action = self.discretizer.discretize(acc, steer);
            debug!(
                t,
                acc,
                steer,
                index = action.index,
                "expert action discretized"
            );
            record.push(frame, action.index);
            sim.step(dt);
        }
        record.finish();

        DatasetOutcome::Episode { vehicle, record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use crate::sim::trace::tests::straight_vehicle;
    use crate::sim::trace::{TraceFile, TraceObject, TraceSimulation};

    fn small_config(horizon: usize) -> Config {
        let mut cfg = Config::default();
        cfg.episode.horizon = horizon;
        cfg.render.img_width = 16;
        cfg.render.img_height = 12;
        cfg.render.padding = 2.0;
        cfg
    }

    fn sim_with(objects: Vec<TraceObject>) -> TraceSimulation {
        let trace = TraceFile {
            dt: 0.1,
            objects,
            road_points: vec![],
            traffic_lights: vec![],
            stop_signs: vec![],
        };
        TraceSimulation::from_trace(trace, &ScenarioConfig::default()).unwrap()
    }

    #[test]
    fn test_episode_invariants() {
        let mut sim = sim_with(vec![straight_vehicle(1, 0.0, 10, 5.0)]);
        let gen = DatasetGenerator::new(small_config(8));
        let DatasetOutcome::Episode { vehicle, record } = gen.generate(&mut sim) else {
            panic!("expected an episode");
        };
        assert_eq!(vehicle, VehicleId(1));
        assert_eq!(record.len(), 8);
        assert_eq!(record.actions.len(), 8);
        assert_eq!(record.resets.len(), 8);
        assert_eq!(record.resets.iter().filter(|r| **r).count(), 1);
        assert_eq!(record.resets.last(), Some(&true));
        assert_eq!(record.images[0].dim(), (12, 16, 3));
        assert_eq!(sim.scenario().timestep(), 8);
        record.validate().unwrap();
    }

    #[test]
    fn test_zero_action_indices() {
        let mut sim = sim_with(vec![straight_vehicle(1, 0.0, 10, 5.0)]);
        let gen = DatasetGenerator::new(small_config(4));
        let DatasetOutcome::Episode { record, .. } = gen.generate(&mut sim) else {
            panic!("expected an episode");
        };
        // acc 0 -> bucket 6, steer 0 -> bucket 7.
        assert!(record.actions.iter().all(|a| *a == 6 * 14 + 7));
    }

    #[test]
    fn test_logged_actions_become_joint_indices() {
        let mut v = straight_vehicle(1, 0.0, 10, 5.0);
        v.expert_actions[0] = Some([Some(2.0), Some(-0.3)]);
        v.expert_actions[1] = Some([Some(-6.0), Some(0.6)]);
        let mut sim = sim_with(vec![v]);
        let gen = DatasetGenerator::new(small_config(3));
        let DatasetOutcome::Episode { record, .. } = gen.generate(&mut sim) else {
            panic!("expected an episode");
        };
        assert_eq!(record.actions, vec![8 * 14 + 4, 13, 91]);
    }

    #[test]
    fn test_prefers_moved_vehicle() {
        let mut parked = straight_vehicle(1, 0.0, 10, 0.0);
        parked.moved = Some(false);
        let mover = straight_vehicle(2, 4.0, 10, 5.0);
        let mut sim = sim_with(vec![parked, mover]);
        let gen = DatasetGenerator::new(small_config(5));
        assert!(matches!(
            gen.generate(&mut sim),
            DatasetOutcome::Episode {
                vehicle: VehicleId(2),
                ..
            }
        ));
    }

    #[test]
    fn test_falls_back_to_unmoved_vehicle() {
        let mut parked = straight_vehicle(1, 0.0, 10, 0.0);
        parked.moved = Some(false);
        let mut mover = straight_vehicle(2, 4.0, 10, 5.0);
        mover.expert_actions[2] = None;
        let mut sim = sim_with(vec![parked, mover]);
        let gen = DatasetGenerator::new(small_config(5));
        assert!(matches!(
            gen.generate(&mut sim),
            DatasetOutcome::Episode {
                vehicle: VehicleId(1),
                ..
            }
        ));
    }

    #[test]
    fn test_skipped_without_qualifying_vehicle() {
        let mut a = straight_vehicle(1, 0.0, 10, 5.0);
        a.expert_actions[5] = Some([Some(0.0), None]);
        let mut sim = sim_with(vec![a]);
        let gen = DatasetGenerator::new(small_config(10));
        assert_eq!(
            gen.generate(&mut sim),
            DatasetOutcome::Skipped(SkipReason::NoFullTrajectoryVehicle)
        );
        assert_eq!(sim.scenario().timestep(), 0);
    }

    #[test]
    fn test_cone_grayscale_frames() {
        let mut sim = sim_with(vec![straight_vehicle(1, 0.0, 10, 5.0)]);
        let mut cfg = small_config(3);
        cfg.render.view_mode = ViewMode::Cone;
        cfg.render.grayscale = true;
        let gen = DatasetGenerator::new(cfg);
        let DatasetOutcome::Episode { record, .. } = gen.generate(&mut sim) else {
            panic!("expected an episode");
        };
        assert!(record.images.iter().all(|f| f.dim() == (12, 16, 1)));
    }

    #[test]
    fn test_candidates_deduplicated() {
        let sim = sim_with(vec![
            straight_vehicle(1, 0.0, 10, 5.0),
            straight_vehicle(2, 4.0, 10, 5.0),
        ]);
        assert_eq!(
            candidate_vehicles(sim.scenario()),
            vec![VehicleId(1), VehicleId(2)]
        );
    }
}
