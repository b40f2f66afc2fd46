// src/config.rs
//
// Central configuration for dataset generation and policy rollouts.
//
// Layering (lowest to highest precedence):
//   1. Config::default()      - stock constants
//   2. Config::load(path)     - JSON file, every section optional
//   3. apply_env_overrides()  - DITTO_* environment variables
//   4. CLI flags              - applied by main.rs
//
// Config::validate() must pass before any driver is built.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Engine-side scenario construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// First logged timestep exposed by the simulation.
    pub start_time: usize,
    /// Whether cyclists and pedestrians are part of the scene.
    pub allow_non_vehicles: bool,
    pub max_visible_road_points: usize,
    pub max_visible_objects: usize,
    pub max_visible_traffic_lights: usize,
    pub max_visible_stop_signs: usize,
    /// Keep every n-th road point when building the visible state.
    pub sample_every_n: usize,
    /// Order road-edge points before other road points.
    pub road_edge_first: bool,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            start_time: 0,
            allow_non_vehicles: true,
            max_visible_road_points: 10,
            max_visible_objects: 10,
            max_visible_traffic_lights: 10,
            max_visible_stop_signs: 10,
            sample_every_n: 1,
            road_edge_first: false,
        }
    }
}

/// Linear binning of the (acceleration, steering) action space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscretizationConfig {
    /// Acceleration range (m/s^2), binned at integer resolution.
    pub acc_range: (f64, f64),
    pub acc_buckets: usize,
    /// Steering range (rad).
    pub steering_range: (f64, f64),
    pub steering_buckets: usize,
}

impl Default for DiscretizationConfig {
    fn default() -> Self {
        Self {
            acc_range: (-6.0, 6.0),
            acc_buckets: 12,
            steering_range: (-0.7, 0.7),
            steering_buckets: 14,
        }
    }
}

/// Which render is stored as the observation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Full top-down render of the scene.
    #[default]
    Full,
    /// Vehicle-centred cone view.
    Cone,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Full => "full",
            ViewMode::Cone => "cone",
        }
    }

    /// Parse a view mode name (case-insensitive). Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<ViewMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "topdown" | "top-down" | "f" => Some(ViewMode::Full),
            "cone" | "ego" | "c" => Some(ViewMode::Cone),
            _ => None,
        }
    }
}

/// Render parameters shared by both drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub view_mode: ViewMode,
    pub img_width: usize,
    pub img_height: usize,
    pub padding: f32,
    pub draw_target_positions: bool,
    /// Reduce frames to a single luma channel.
    pub grayscale: bool,
    /// Cone aperture for cone renders (radians).
    pub cone_view_angle: f32,
    pub cone_view_dist: f32,
    pub cone_head_angle: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::Full,
            img_width: 2000,
            img_height: 2000,
            padding: 50.0,
            draw_target_positions: false,
            grayscale: false,
            cone_view_angle: std::f32::consts::FRAC_PI_2,
            cone_view_dist: 80.0,
            cone_head_angle: 0.0,
        }
    }
}

/// Per-episode stepping parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Number of simulator steps per episode.
    pub horizon: usize,
    /// Seconds per step.
    pub dt: f32,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            horizon: 90,
            dt: 0.1,
        }
    }
}

/// Policy rollout parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Number of stacked observations fed to the policy.
    pub history: usize,
    pub view_dist: f32,
    /// Observation cone aperture (radians).
    pub view_angle: f32,
    /// Draw goal markers in rollout frames.
    pub draw_target_positions: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            history: 5,
            view_dist: 80.0,
            view_angle: std::f32::consts::PI,
            draw_target_positions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config schema version, recorded in dataset metadata.
    pub version: String,
    pub scenario: ScenarioConfig,
    pub discretization: DiscretizationConfig,
    pub render: RenderConfig,
    pub episode: EpisodeConfig,
    pub rollout: RolloutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "ditto-cfg-v1".to_string(),
            scenario: ScenarioConfig::default(),
            discretization: DiscretizationConfig::default(),
            render: RenderConfig::default(),
            episode: EpisodeConfig::default(),
            rollout: RolloutConfig::default(),
        }
    }
}

impl Config {
    /// Scenario settings used by the rollout script: no non-vehicles, dense
    /// road points.
    pub fn for_rollout() -> Self {
        let mut cfg = Config::default();
        cfg.scenario = ScenarioConfig {
            start_time: 0,
            allow_non_vehicles: false,
            max_visible_road_points: 500,
            sample_every_n: 1,
            road_edge_first: false,
            ..ScenarioConfig::default()
        };
        cfg
    }

    /// Load a JSON config file on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// Apply environment overrides:
    ///
    ///   - DITTO_HORIZON    (usize, steps)
    ///   - DITTO_DT         (f32, seconds)
    ///   - DITTO_VIEW_MODE  (full | cone)
    ///   - DITTO_GRAYSCALE  (bool: 1/0/true/false)
    ///   - DITTO_IMG_SIZE   (usize, square frame side in pixels)
    ///   - DITTO_HISTORY    (usize, stacked observations)
    ///
    /// Any variable that fails to parse is ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        use std::env;

        if let Ok(raw) = env::var("DITTO_HORIZON") {
            match raw.parse::<usize>() {
                Ok(v) => {
                    self.episode.horizon = v;
                    info!("[config] DITTO_HORIZON = {v} (overrode default)");
                }
                Err(_) => warn!(
                    "[config] could not parse DITTO_HORIZON = {:?}; using {}",
                    raw, self.episode.horizon
                ),
            }
        }

        if let Ok(raw) = env::var("DITTO_DT") {
            match raw.parse::<f32>() {
                Ok(v) => {
                    self.episode.dt = v;
                    info!("[config] DITTO_DT = {v} (overrode default)");
                }
                Err(_) => warn!(
                    "[config] could not parse DITTO_DT = {:?}; using {}",
                    raw, self.episode.dt
                ),
            }
        }

        if let Ok(raw) = env::var("DITTO_VIEW_MODE") {
            match ViewMode::parse(&raw) {
                Some(v) => {
                    self.render.view_mode = v;
                    info!("[config] DITTO_VIEW_MODE = {} (overrode default)", v.as_str());
                }
                None => warn!(
                    "[config] invalid DITTO_VIEW_MODE = {:?}; using {}",
                    raw,
                    self.render.view_mode.as_str()
                ),
            }
        }

        if let Ok(raw) = env::var("DITTO_GRAYSCALE") {
            match parse_bool(&raw) {
                Some(v) => {
                    self.render.grayscale = v;
                    info!("[config] DITTO_GRAYSCALE = {v} (overrode default)");
                }
                None => warn!(
                    "[config] could not parse DITTO_GRAYSCALE = {:?}; using {}",
                    raw, self.render.grayscale
                ),
            }
        }

        if let Ok(raw) = env::var("DITTO_IMG_SIZE") {
            match raw.parse::<usize>() {
                Ok(v) => {
                    self.render.img_width = v;
                    self.render.img_height = v;
                    info!("[config] DITTO_IMG_SIZE = {v} (overrode default)");
                }
                Err(_) => warn!(
                    "[config] could not parse DITTO_IMG_SIZE = {:?}; using {}x{}",
                    raw, self.render.img_width, self.render.img_height
                ),
            }
        }

        if let Ok(raw) = env::var("DITTO_HISTORY") {
            match raw.parse::<usize>() {
                Ok(v) => {
                    self.rollout.history = v;
                    info!("[config] DITTO_HISTORY = {v} (overrode default)");
                }
                Err(_) => warn!(
                    "[config] could not parse DITTO_HISTORY = {:?}; using {}",
                    raw, self.rollout.history
                ),
            }
        }
    }

    /// Reject configurations the drivers cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.discretization;
        if d.acc_buckets == 0 || d.steering_buckets == 0 {
            bail!("discretization buckets must be positive");
        }
        if d.acc_range.0 >= d.acc_range.1 {
            bail!("acc_range min must be below max: {:?}", d.acc_range);
        }
        if d.steering_range.0 >= d.steering_range.1 {
            bail!("steering_range min must be below max: {:?}", d.steering_range);
        }
        if self.episode.horizon == 0 {
            bail!("episode horizon must be positive");
        }
        if !(self.episode.dt > 0.0) {
            bail!("episode dt must be positive, got {}", self.episode.dt);
        }
        if self.rollout.history == 0 {
            bail!("rollout history must be positive");
        }
        if self.render.img_width == 0 || self.render.img_height == 0 {
            bail!("render size must be positive");
        }
        if self.scenario.sample_every_n == 0 {
            bail!("sample_every_n must be positive");
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
