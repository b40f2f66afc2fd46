// src/rl/rollout.rs
//
// Closed-loop policy rollout.
//
// The moved vehicles of a scenario are released from expert control and
// driven by a Policy fed with stacked observation history; every other
// object keeps replaying its log. Frame 0 is the initial scene, frame t the
// scene after step t, so a rollout of horizon H holds H + 1 frames.

use std::fmt;
use std::io;

use tracing::{debug, info, warn};

use super::dataset::render_frame;
use super::observation::{construct_state, StackError, StateStack};
use super::policy::{Policy, PolicyError};
use crate::config::Config;
use crate::episode::{RolloutRecord, StepCommands};
use crate::logging::{StepRecord, StepSink};
use crate::sim::{Scenario, Simulation, VehicleId};

#[derive(Debug)]
pub enum RolloutError {
    /// Stacked observation length does not match the policy input size.
    InputDimension { expected: usize, got: usize },
    Stack(StackError),
    Policy(PolicyError),
    Sink(io::Error),
}

impl fmt::Display for RolloutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutError::InputDimension { expected, got } => write!(
                f,
                "stacked observation has length {}, policy expects {}",
                got, expected
            ),
            RolloutError::Stack(e) => write!(f, "observation stack: {}", e),
            RolloutError::Policy(e) => write!(f, "policy: {}", e),
            RolloutError::Sink(e) => write!(f, "step sink: {}", e),
        }
    }
}

impl std::error::Error for RolloutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RolloutError::Stack(e) => Some(e),
            RolloutError::Policy(e) => Some(e),
            RolloutError::Sink(e) => Some(e),
            RolloutError::InputDimension { .. } => None,
        }
    }
}

impl From<StackError> for RolloutError {
    fn from(e: StackError) -> Self {
        RolloutError::Stack(e)
    }
}

impl From<PolicyError> for RolloutError {
    fn from(e: PolicyError) -> Self {
        RolloutError::Policy(e)
    }
}

impl From<io::Error> for RolloutError {
    fn from(e: io::Error) -> Self {
        RolloutError::Sink(e)
    }
}

/// Drives policy-controlled vehicles through one scenario at a time.
///
/// The observation stack is owned here and reset on every `run`, so history
/// never carries over between scenarios.
pub struct PolicyRollout<P: Policy> {
    config: Config,
    policy: P,
    stack: StateStack,
}

impl<P: Policy> PolicyRollout<P> {
    pub fn new(config: Config, policy: P) -> Self {
        let stack = StateStack::new(config.rollout.history);
        Self {
            config,
            policy,
            stack,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn stack(&self) -> &StateStack {
        &self.stack
    }

    pub fn run<Sim: Simulation>(
        &mut self,
        sim: &mut Sim,
        sink: &mut dyn StepSink,
    ) -> Result<RolloutRecord, RolloutError> {
        let horizon = self.config.episode.horizon;
        let dt = self.config.episode.dt;
        let rollout = self.config.rollout.clone();

        self.stack.reset();

        let scenario = sim.scenario_mut();
        let all = scenario.vehicles();
        for &v in &all {
            scenario.set_expert_control(v, true);
        }
        let controlled = scenario.moved_vehicles();
        for &v in &controlled {
            scenario.set_expert_control(v, false);
        }
        if controlled.is_empty() {
            warn!("no moved vehicles; rollout replays the log only");
        }
        info!(
            controlled = controlled.len(),
            horizon,
            policy = self.policy.version(),
            "starting rollout"
        );

        let focus = controlled
            .first()
            .or(all.first())
            .copied()
            .unwrap_or(VehicleId(0));
        let mut frames = Vec::with_capacity(horizon + 1);
        frames.push(render_frame(
            sim.scenario(),
            focus,
            &self.config.render,
            rollout.draw_target_positions,
        ));

        let mut commands = Vec::with_capacity(horizon);
        for t in 1..=horizon {
            let mut step = StepCommands {
                step: t,
                acceleration: Vec::with_capacity(controlled.len()),
                steering: Vec::with_capacity(controlled.len()),
            };
            for &v in &controlled {
                let obs = construct_state(sim.scenario(), v, rollout.view_dist, rollout.view_angle);
                let stacked = self.stack.push(v, &obs)?;
                if stacked.len() != self.policy.num_inputs() {
                    return Err(RolloutError::InputDimension {
                        expected: self.policy.num_inputs(),
                        got: stacked.len(),
                    });
                }
                let out = self.policy.act(stacked)?;
                debug!(
                    t,
                    vehicle = %v,
                    acc = out.acceleration,
                    steer = out.steering,
                    "policy command"
                );
                sim.scenario_mut()
                    .set_command(v, out.acceleration, out.steering);
                sink.log_step(&StepRecord::new(t, v, &out))?;
                step.acceleration.push(out.acceleration);
                step.steering.push(out.steering);
            }
            commands.push(step);
            sim.step(dt);
            frames.push(render_frame(
                sim.scenario(),
                focus,
                &self.config.render,
                rollout.draw_target_positions,
            ));
        }
        sink.flush()?;

        Ok(RolloutRecord {
            vehicles: controlled,
            frames,
            commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{JsonlSink, NoopSink};
    use crate::rl::policy::NeutralPolicy;
    use crate::sim::trace::tests::straight_vehicle;
    use crate::sim::trace::{TraceFile, TraceSimulation, EGO_FEATURES, OBJECT_FEATURES, POINT_FEATURES};

    fn setup(horizon: usize) -> (Config, TraceSimulation, usize) {
        let mut cfg = Config::for_rollout();
        cfg.episode.horizon = horizon;
        cfg.render.img_width = 8;
        cfg.render.img_height = 8;
        let mut parked = straight_vehicle(2, 6.0, 10, 0.0);
        parked.moved = Some(false);
        let trace = TraceFile {
            dt: 0.1,
            objects: vec![straight_vehicle(1, 0.0, 10, 5.0), parked],
            road_points: vec![],
            traffic_lights: vec![],
            stop_signs: vec![],
        };
        let sim = TraceSimulation::from_trace(trace, &cfg.scenario).unwrap();
        let s = &cfg.scenario;
        let obs_len = EGO_FEATURES
            + s.max_visible_objects * OBJECT_FEATURES
            + (s.max_visible_road_points + s.max_visible_traffic_lights + s.max_visible_stop_signs)
                * POINT_FEATURES;
        (cfg, sim, obs_len)
    }

    #[test]
    fn test_frame_count_and_control_flags() {
        let (cfg, mut sim, obs_len) = setup(4);
        let policy = NeutralPolicy::new(cfg.rollout.history * obs_len);
        let mut rollout = PolicyRollout::new(cfg, policy);
        let record = rollout.run(&mut sim, &mut NoopSink).unwrap();

        assert_eq!(record.frames.len(), 5);
        assert_eq!(record.commands.len(), 4);
        assert_eq!(record.vehicles, vec![VehicleId(1)]);
        assert!(!sim.scenario().expert_control(VehicleId(1)));
        assert!(sim.scenario().expert_control(VehicleId(2)));
        assert_eq!(
            rollout.stack().get(VehicleId(1)).map(|b| b.len()),
            Some(5 * obs_len)
        );
    }

    #[test]
    fn test_neutral_commands_applied() {
        let (cfg, mut sim, obs_len) = setup(3);
        let policy = NeutralPolicy::new(cfg.rollout.history * obs_len);
        let mut rollout = PolicyRollout::new(cfg, policy);
        let record = rollout.run(&mut sim, &mut NoopSink).unwrap();
        for (i, step) in record.commands.iter().enumerate() {
            assert_eq!(step.step, i + 1);
            assert_eq!(step.acceleration.len(), 1);
            assert!(step.acceleration[0].abs() < 1e-5);
            assert!(step.steering[0].abs() < 1e-5);
        }
        let last = &record.commands[2];
        assert_eq!(
            sim.scenario().command(VehicleId(1)),
            Some((last.acceleration[0], last.steering[0]))
        );
    }

    #[test]
    fn test_policy_input_mismatch_is_error() {
        let (cfg, mut sim, obs_len) = setup(2);
        let policy = NeutralPolicy::new(obs_len);
        let mut rollout = PolicyRollout::new(cfg, policy);
        let err = rollout.run(&mut sim, &mut NoopSink).unwrap_err();
        assert!(matches!(err, RolloutError::InputDimension { .. }));
    }

    #[test]
    fn test_sink_receives_every_command() {
        let (cfg, mut sim, obs_len) = setup(3);
        let policy = NeutralPolicy::new(cfg.rollout.history * obs_len);
        let mut rollout = PolicyRollout::new(cfg, policy);
        let mut sink = JsonlSink::from_writer(Vec::new());
        rollout.run(&mut sim, &mut sink).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_stack_reset_between_runs() {
        let (cfg, mut sim, obs_len) = setup(2);
        let policy = NeutralPolicy::new(cfg.rollout.history * obs_len);
        let mut rollout = PolicyRollout::new(cfg.clone(), policy);
        rollout.run(&mut sim, &mut NoopSink).unwrap();

        let (_, mut fresh, _) = setup(2);
        rollout.run(&mut fresh, &mut NoopSink).unwrap();
        let buf = rollout.stack().get(VehicleId(1)).unwrap();
        // Two pushes since the reset: the three oldest slices are still zero.
        assert!(buf[2 * obs_len..].iter().all(|x| *x == 0.0));
        assert_eq!(rollout.stack().len(), 1);
    }
}
