// src/rl/discretize.rs
//
// Continuous (acceleration, steering) -> joint bucket index.
//
// Each axis is binned independently:
//   acc_index   = clamp(round(acc) - acc_min, 0, acc_buckets)
//   steer_index = clamp(floor((round(steer, 1) - steer_min) / width), 0, steering_buckets)
//   index       = acc_index * steering_buckets + steer_index
//
// The upper clamp is the bucket *count*, not count - 1; see `max_index`
// for the resulting range.
//
// Rounding is half-to-even. NaN maps to the lower bound. Binning runs in
// f64: inputs rounded to a tenth sit exactly on steering bucket edges, and
// f32 error moves some of them into the neighbouring bucket.

use serde::{Deserialize, Serialize};

use crate::config::DiscretizationConfig;

/// Per-axis and joint bucket indices for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteAction {
    pub acc_index: usize,
    pub steer_index: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDiscretizer {
    acc_min: f64,
    acc_buckets: usize,
    steer_min: f64,
    steer_width: f64,
    steering_buckets: usize,
}

impl ActionDiscretizer {
    pub fn new(cfg: &DiscretizationConfig) -> Self {
        let (steer_min, steer_max) = cfg.steering_range;
        Self {
            acc_min: cfg.acc_range.0,
            acc_buckets: cfg.acc_buckets,
            steer_min,
            steer_width: (steer_max - steer_min) / cfg.steering_buckets.max(1) as f64,
            steering_buckets: cfg.steering_buckets,
        }
    }

    pub fn acc_buckets(&self) -> usize {
        self.acc_buckets
    }

    pub fn steering_buckets(&self) -> usize {
        self.steering_buckets
    }

    /// Largest index `discretize` can return (inclusive).
    pub fn max_index(&self) -> usize {
        self.acc_buckets * self.steering_buckets + self.steering_buckets
    }

    /// Acceleration bucket, clamped to [0, acc_buckets].
    pub fn acc_index(&self, acc: f32) -> usize {
        let raw = f64::from(acc).round_ties_even() - self.acc_min;
        clamp_index(raw, self.acc_buckets)
    }

    /// Steering bucket, clamped to [0, steering_buckets].
    pub fn steer_index(&self, steer: f32) -> usize {
        let rounded = round_to_tenth(f64::from(steer));
        let raw = ((rounded - self.steer_min) / self.steer_width).floor();
        clamp_index(raw, self.steering_buckets)
    }

    /// Joint bucket index. Never fails.
    pub fn discretize(&self, acc: f32, steer: f32) -> DiscreteAction {
        let acc_index = self.acc_index(acc);
        let steer_index = self.steer_index(steer);
        DiscreteAction {
            acc_index,
            steer_index,
            index: acc_index * self.steering_buckets + steer_index,
        }
    }
}

fn round_to_tenth(v: f64) -> f64 {
    (v * 10.0).round_ties_even() / 10.0
}

fn clamp_index(raw: f64, upper: usize) -> usize {
    if raw.is_nan() || raw <= 0.0 {
        0
    } else {
        (raw as usize).min(upper)
    }
}
