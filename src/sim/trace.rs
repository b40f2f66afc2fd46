// src/sim/trace.rs
//
// Trace playback engine.
//
// Loads a JSON scenario trace (logged per-timestep object states plus the
// expert action recorded at each timestep) and exposes it through the
// Simulation / Scenario traits:
// - expert-controlled objects replay their logged state on every step
// - vehicles released from expert control integrate a kinematic bicycle
//   model from the commanded (acceleration, steering)
// - ego / visible state vectors are fixed-length, zero-padded, nearest-first
// - images are top-down rasters (full scene or vehicle-centred cone)
//
// Trace format:
// {
//   "dt": 0.1,
//   "objects": [{
//       "id": 3, "kind": "vehicle", "length": 4.5, "width": 2.0,
//       "moved": true,                       // optional, inferred if absent
//       "goal": {"x": 10.0, "y": 0.0},       // optional
//       "states": [{"x": 0.0, "y": 0.0, "heading": 0.0, "speed": 5.0}, ...],
//       "expert_actions": [[0.5, 0.0], null, [0.1, null], ...]
//   }],
//   "road_points": [{"x": 0.0, "y": 1.0, "edge": true}],
//   "traffic_lights": [{"x": 5.0, "y": 5.0}],
//   "stop_signs": [{"x": 8.0, "y": -2.0}]
// }
//
// A null expert action means "not recorded"; a null axis inside a pair is
// loaded as NaN.

use std::collections::HashSet;
use std::f32::consts::{FRAC_PI_2, PI};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::render::{self, Canvas, Frame, Viewport};
use super::{
    ConeSpec, ExpertAction, ImageSpec, Scenario, SimError, Simulation, SimulationLoader, VehicleId,
};
use crate::config::ScenarioConfig;

/// Displacement (m) above which an object counts as "moved" when the trace
/// does not say.
pub const MOVED_THRESHOLD_M: f32 = 0.5;

/// Features per visible object: distance, relative angle, speed, relative heading.
pub const OBJECT_FEATURES: usize = 4;
/// Features per visible point (road point, traffic light, stop sign).
pub const POINT_FEATURES: usize = 2;
/// Ego features: speed, length, width, goal distance, goal angle.
pub const EGO_FEATURES: usize = 5;

fn default_dt() -> f32 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Vehicle,
    Pedestrian,
    Cyclist,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadPoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub edge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoggedState {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub speed: f32,
}

/// Logged expert action cell: `None` when absent, NaN axes allowed.
pub type LoggedAction = Option<[Option<f32>; 2]>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceObject {
    pub id: u32,
    #[serde(default)]
    pub kind: ObjectKind,
    pub length: f32,
    pub width: f32,
    #[serde(default)]
    pub moved: Option<bool>,
    #[serde(default)]
    pub goal: Option<Point>,
    pub states: Vec<LoggedState>,
    #[serde(default)]
    pub expert_actions: Vec<LoggedAction>,
}

impl TraceObject {
    /// Logged state at `t`, holding the last one past the end of the log.
    fn logged(&self, t: usize) -> LoggedState {
        self.states[t.min(self.states.len() - 1)]
    }

    fn has_moved(&self) -> bool {
        if let Some(moved) = self.moved {
            return moved;
        }
        let first = self.states[0];
        self.states.iter().any(|s| {
            let (dx, dy) = (s.x - first.x, s.y - first.y);
            (dx * dx + dy * dy).sqrt() > MOVED_THRESHOLD_M
        })
    }
}

/// Parsed scenario trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFile {
    #[serde(default = "default_dt")]
    pub dt: f32,
    pub objects: Vec<TraceObject>,
    #[serde(default)]
    pub road_points: Vec<RoadPoint>,
    #[serde(default)]
    pub traffic_lights: Vec<Point>,
    #[serde(default)]
    pub stop_signs: Vec<Point>,
}

impl TraceFile {
    pub fn from_json(raw: &str, path: &str) -> Result<Self, SimError> {
        serde_json::from_str(raw).map_err(|e| SimError::ParseError {
            path: path.to_string(),
            source: e.to_string(),
        })
    }

    fn validate(&self, path: &str, config: &ScenarioConfig) -> Result<(), SimError> {
        let invalid = |message: String| SimError::InvalidScenario {
            path: path.to_string(),
            message,
        };
        if self.objects.is_empty() {
            return Err(invalid("trace has no objects".to_string()));
        }
        let mut seen = HashSet::new();
        let mut longest = 0;
        for obj in &self.objects {
            if !seen.insert(obj.id) {
                return Err(invalid(format!("duplicate object id {}", obj.id)));
            }
            if obj.states.is_empty() {
                return Err(invalid(format!("object {} has no logged states", obj.id)));
            }
            if !(obj.length > 0.0 && obj.width > 0.0) {
                return Err(invalid(format!("object {} has non-positive size", obj.id)));
            }
            longest = longest.max(obj.states.len());
        }
        if config.start_time >= longest {
            return Err(invalid(format!(
                "start_time {} is past the end of the log ({} timesteps)",
                config.start_time, longest
            )));
        }
        Ok(())
    }
}

/// Mutable per-object simulation state.
#[derive(Debug, Clone)]
struct LiveObject {
    state: LoggedState,
    expert_control: bool,
    acceleration: f32,
    steering: f32,
}

/// Scenario snapshot backed by a trace.
#[derive(Debug, Clone)]
pub struct TraceScenario {
    trace: TraceFile,
    config: ScenarioConfig,
    /// Current absolute timestep.
    t: usize,
    live: Vec<LiveObject>,
    /// Scene bounds over the whole log, fixed so full renders share framing.
    bounds: ((f32, f32), (f32, f32)),
}

impl TraceScenario {
    fn new(trace: TraceFile, config: ScenarioConfig) -> Self {
        let t = config.start_time;
        let live = trace
            .objects
            .iter()
            .map(|obj| LiveObject {
                state: obj.logged(t),
                expert_control: true,
                acceleration: 0.0,
                steering: 0.0,
            })
            .collect();
        let bounds = scene_bounds(&trace);
        Self {
            trace,
            config,
            t,
            live,
            bounds,
        }
    }

    /// Current absolute timestep.
    pub fn timestep(&self) -> usize {
        self.t
    }

    /// Current (x, y, heading, speed) of an object.
    pub fn state(&self, vehicle: VehicleId) -> Option<LoggedState> {
        self.index_of(vehicle).map(|i| self.live[i].state)
    }

    /// Last command set on a vehicle.
    pub fn command(&self, vehicle: VehicleId) -> Option<(f32, f32)> {
        self.index_of(vehicle)
            .map(|i| (self.live[i].acceleration, self.live[i].steering))
    }

    fn index_of(&self, vehicle: VehicleId) -> Option<usize> {
        self.trace.objects.iter().position(|o| o.id == vehicle.0)
    }

    fn is_visible_kind(&self, kind: ObjectKind) -> bool {
        kind == ObjectKind::Vehicle || self.config.allow_non_vehicles
    }

    fn advance(&mut self, dt: f32) {
        let next = self.t + 1;
        for (obj, live) in self.trace.objects.iter().zip(self.live.iter_mut()) {
            if live.expert_control || obj.kind != ObjectKind::Vehicle {
                live.state = obj.logged(next);
            } else {
                live.state = bicycle_step(live.state, obj.length, live.acceleration, live.steering, dt);
            }
        }
        self.t = next;
    }

    fn draw_scene(&self, canvas: &mut Canvas, view: &Viewport, draw_targets: bool) {
        for p in &self.trace.road_points {
            canvas.dot(view, p.x, p.y, 0, render::ROAD);
        }
        for p in &self.trace.stop_signs {
            canvas.dot(view, p.x, p.y, 1, render::STOP_SIGN);
        }
        for p in &self.trace.traffic_lights {
            canvas.dot(view, p.x, p.y, 1, render::TRAFFIC_LIGHT);
        }
        for (obj, live) in self.trace.objects.iter().zip(&self.live) {
            if !self.is_visible_kind(obj.kind) {
                continue;
            }
            let color = match (obj.kind, live.expert_control) {
                (ObjectKind::Vehicle, true) => render::EXPERT_VEHICLE,
                (ObjectKind::Vehicle, false) => render::CONTROLLED_VEHICLE,
                _ => render::NON_VEHICLE,
            };
            canvas.oriented_rect(
                view,
                (live.state.x, live.state.y),
                live.state.heading,
                obj.length,
                obj.width,
                color,
            );
            if draw_targets && obj.kind == ObjectKind::Vehicle {
                if let Some(goal) = obj.goal {
                    canvas.dot(view, goal.x, goal.y, 1, render::GOAL);
                }
            }
        }
    }
}

impl Scenario for TraceScenario {
    fn vehicles(&self) -> Vec<VehicleId> {
        self.trace
            .objects
            .iter()
            .filter(|o| o.kind == ObjectKind::Vehicle)
            .map(|o| VehicleId(o.id))
            .collect()
    }

    fn moved_vehicles(&self) -> Vec<VehicleId> {
        self.trace
            .objects
            .iter()
            .filter(|o| o.kind == ObjectKind::Vehicle && o.has_moved())
            .map(|o| VehicleId(o.id))
            .collect()
    }

    fn expert_action(&self, vehicle: VehicleId, t: usize) -> Option<ExpertAction> {
        let obj = &self.trace.objects[self.index_of(vehicle)?];
        let [acc, steer] = (*obj.expert_actions.get(self.config.start_time + t)?)?;
        Some(ExpertAction::new(
            acc.unwrap_or(f32::NAN),
            steer.unwrap_or(f32::NAN),
        ))
    }

    fn expert_control(&self, vehicle: VehicleId) -> bool {
        self.index_of(vehicle)
            .map(|i| self.live[i].expert_control)
            .unwrap_or(false)
    }

    fn set_expert_control(&mut self, vehicle: VehicleId, expert: bool) {
        if let Some(i) = self.index_of(vehicle) {
            self.live[i].expert_control = expert;
        }
    }

    fn set_command(&mut self, vehicle: VehicleId, acceleration: f32, steering: f32) {
        if let Some(i) = self.index_of(vehicle) {
            self.live[i].acceleration = acceleration;
            self.live[i].steering = steering;
        }
    }

    fn image(&self, spec: &ImageSpec) -> Frame {
        let (min, max) = self.bounds;
        let view = Viewport::fit(min, max, spec.padding, spec.width, spec.height);
        let mut canvas = Canvas::new(spec.width, spec.height);
        self.draw_scene(&mut canvas, &view, spec.draw_target_positions);
        canvas.into_frame()
    }

    fn cone_image(&self, vehicle: VehicleId, spec: &ConeSpec) -> Frame {
        let mut canvas = Canvas::new(spec.width, spec.height);
        let Some(ego) = self.state(vehicle) else {
            return canvas.into_frame();
        };
        let look = ego.heading + spec.head_angle;
        let radius = (spec.view_dist + spec.padding).max(1e-3);
        let view = Viewport {
            center_x: ego.x,
            center_y: ego.y,
            scale: spec.width.min(spec.height) as f32 / 2.0 / radius,
            // Looking direction points up in the frame.
            rotation: look - FRAC_PI_2,
            width: spec.width,
            height: spec.height,
        };
        self.draw_scene(&mut canvas, &view, false);
        let (view_dist, half_angle) = (spec.view_dist, spec.view_angle / 2.0);
        canvas.mask(&view, |wx, wy| {
            let (dx, dy) = (wx - ego.x, wy - ego.y);
            let dist = (dx * dx + dy * dy).sqrt();
            dist < 1e-3 || (dist <= view_dist && wrap_angle(dy.atan2(dx) - look).abs() <= half_angle)
        });
        canvas.into_frame()
    }

    fn ego_state(&self, vehicle: VehicleId) -> Vec<f32> {
        let Some(i) = self.index_of(vehicle) else {
            return vec![0.0; EGO_FEATURES];
        };
        let obj = &self.trace.objects[i];
        let s = self.live[i].state;
        let (goal_dist, goal_angle) = match obj.goal {
            Some(g) => relative(&s, g.x, g.y),
            None => (0.0, 0.0),
        };
        vec![s.speed, obj.length, obj.width, goal_dist, goal_angle]
    }

    fn flattened_visible_state(
        &self,
        vehicle: VehicleId,
        view_dist: f32,
        view_angle: f32,
    ) -> Vec<f32> {
        let cfg = &self.config;
        let mut out = Vec::with_capacity(
            cfg.max_visible_objects * OBJECT_FEATURES
                + (cfg.max_visible_road_points
                    + cfg.max_visible_traffic_lights
                    + cfg.max_visible_stop_signs)
                    * POINT_FEATURES,
        );
        let ego_idx = self.index_of(vehicle);
        let ego = ego_idx.map(|i| self.live[i].state);
        let in_view = |x: f32, y: f32| -> Option<(f32, f32)> {
            let (dist, angle) = relative(&ego?, x, y);
            (dist <= view_dist && angle.abs() <= view_angle / 2.0).then_some((dist, angle))
        };

        // Objects: [distance, relative angle, speed, relative heading].
        let mut objects: Vec<[f32; OBJECT_FEATURES]> = Vec::new();
        for (i, (obj, live)) in self.trace.objects.iter().zip(&self.live).enumerate() {
            if Some(i) == ego_idx || !self.is_visible_kind(obj.kind) {
                continue;
            }
            if let (Some((dist, angle)), Some(e)) = (in_view(live.state.x, live.state.y), ego) {
                objects.push([dist, angle, live.state.speed, wrap_angle(live.state.heading - e.heading)]);
            }
        }
        push_nearest(&mut out, objects, cfg.max_visible_objects);

        // Road points: subsampled, optionally edges first, then nearest first.
        let mut roads: Vec<(bool, [f32; POINT_FEATURES])> = self
            .trace
            .road_points
            .iter()
            .step_by(cfg.sample_every_n.max(1))
            .filter_map(|p| in_view(p.x, p.y).map(|(d, a)| (p.edge, [d, a])))
            .collect();
        roads.sort_by(|a, b| a.1[0].total_cmp(&b.1[0]));
        if cfg.road_edge_first {
            // Stable: distance order survives inside each group.
            roads.sort_by_key(|(edge, _)| !*edge);
        }
        let roads: Vec<[f32; POINT_FEATURES]> = roads.into_iter().map(|(_, f)| f).collect();
        push_padded(&mut out, &roads, cfg.max_visible_road_points);

        let lights: Vec<[f32; POINT_FEATURES]> = self
            .trace
            .traffic_lights
            .iter()
            .filter_map(|p| in_view(p.x, p.y).map(|(d, a)| [d, a]))
            .collect();
        push_nearest(&mut out, lights, cfg.max_visible_traffic_lights);

        let signs: Vec<[f32; POINT_FEATURES]> = self
            .trace
            .stop_signs
            .iter()
            .filter_map(|p| in_view(p.x, p.y).map(|(d, a)| [d, a]))
            .collect();
        push_nearest(&mut out, signs, cfg.max_visible_stop_signs);

        out
    }
}

/// Simulation over a trace.
#[derive(Debug, Clone)]
pub struct TraceSimulation {
    scenario: TraceScenario,
}

impl TraceSimulation {
    /// Build from an in-memory trace.
    pub fn from_trace(trace: TraceFile, config: &ScenarioConfig) -> Result<Self, SimError> {
        trace.validate("<memory>", config)?;
        Ok(Self {
            scenario: TraceScenario::new(trace, config.clone()),
        })
    }
}

impl Simulation for TraceSimulation {
    type Scenario = TraceScenario;

    fn step(&mut self, dt: f32) {
        self.scenario.advance(dt);
        debug!(t = self.scenario.t, "trace step");
    }

    fn scenario(&self) -> &TraceScenario {
        &self.scenario
    }

    fn scenario_mut(&mut self) -> &mut TraceScenario {
        &mut self.scenario
    }
}

/// Loads `TraceSimulation`s from JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceLoader;

impl SimulationLoader for TraceLoader {
    type Sim = TraceSimulation;

    fn load(&self, path: &Path, config: &ScenarioConfig) -> Result<TraceSimulation, SimError> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|e| SimError::IoError {
            path: display.clone(),
            source: e.to_string(),
        })?;
        let trace = TraceFile::from_json(&raw, &display)?;
        trace.validate(&display, config)?;
        Ok(TraceSimulation {
            scenario: TraceScenario::new(trace, config.clone()),
        })
    }
}

/// Kinematic bicycle update with the rear axle one vehicle length behind.
fn bicycle_step(s: LoggedState, length: f32, acc: f32, steer: f32, dt: f32) -> LoggedState {
    let wheelbase = length.max(0.1);
    let (sin_h, cos_h) = s.heading.sin_cos();
    LoggedState {
        x: s.x + s.speed * cos_h * dt,
        y: s.y + s.speed * sin_h * dt,
        heading: wrap_angle(s.heading + s.speed * steer.tan() / wheelbase * dt),
        speed: s.speed + acc * dt,
    }
}

/// (distance, angle relative to heading) from `ego` to a world point.
fn relative(ego: &LoggedState, x: f32, y: f32) -> (f32, f32) {
    let (dx, dy) = (x - ego.x, y - ego.y);
    let dist = (dx * dx + dy * dy).sqrt();
    let angle = if dist > 0.0 {
        wrap_angle(dy.atan2(dx) - ego.heading)
    } else {
        0.0
    };
    (dist, angle)
}

/// Wrap into [-pi, pi].
fn wrap_angle(a: f32) -> f32 {
    let mut a = (a + PI) % (2.0 * PI);
    if a < 0.0 {
        a += 2.0 * PI;
    }
    a - PI
}

fn push_nearest<const N: usize>(out: &mut Vec<f32>, mut items: Vec<[f32; N]>, max: usize) {
    items.sort_by(|a, b| a[0].total_cmp(&b[0]));
    push_padded(out, &items, max);
}

fn push_padded<const N: usize>(out: &mut Vec<f32>, items: &[[f32; N]], max: usize) {
    for item in items.iter().take(max) {
        out.extend_from_slice(item);
    }
    let filled = items.len().min(max);
    out.extend(std::iter::repeat(0.0).take((max - filled) * N));
}

fn scene_bounds(trace: &TraceFile) -> ((f32, f32), (f32, f32)) {
    let mut min = (f32::INFINITY, f32::INFINITY);
    let mut max = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    let mut include = |x: f32, y: f32| {
        min = (min.0.min(x), min.1.min(y));
        max = (max.0.max(x), max.1.max(y));
    };
    for obj in &trace.objects {
        for s in &obj.states {
            include(s.x, s.y);
        }
        if let Some(g) = obj.goal {
            include(g.x, g.y);
        }
    }
    for p in &trace.road_points {
        include(p.x, p.y);
    }
    for p in trace.traffic_lights.iter().chain(&trace.stop_signs) {
        include(p.x, p.y);
    }
    (min, max)
}
