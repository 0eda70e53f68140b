//! Interpolation curves for gradual sparsity.
//!
//! With `t = (x - x_min) / (x_max - x_min)` clamped to `[0, 1]`:
//!
//! - `linear`: `t`
//! - `cubic`: `1 - (1 - t)^3`, most of the change happens early
//! - `inverse_cubic`: `t^3`, most of the change happens late
//!
//! # References
//! - Zhu, M., & Gupta, S. (2017). To prune, or not to prune: exploring the
//!   efficacy of pruning for model compression. arXiv:1710.01878.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of the curve between the start and end values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationFn {
    #[default]
    Linear,
    Cubic,
    InverseCubic,
}

impl InterpolationFn {
    /// Map progress in `[0, 1]` onto the curve.
    pub fn curve(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            InterpolationFn::Linear => t,
            InterpolationFn::Cubic => 1.0 - (1.0 - t).powi(3),
            InterpolationFn::InverseCubic => t.powi(3),
        }
    }
}

impl fmt::Display for InterpolationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterpolationFn::Linear => "linear",
            InterpolationFn::Cubic => "cubic",
            InterpolationFn::InverseCubic => "inverse_cubic",
        };
        f.write_str(name)
    }
}

/// Value at `x` moving from `y_min` at `x_min` to `y_max` at `x_max`.
///
/// Clamps outside the range. When `x_min == x_max` the end value wins.
pub fn interpolate(x: f64, x_min: f64, x_max: f64, y_min: f64, y_max: f64, func: InterpolationFn) -> f64 {
    if x >= x_max {
        return y_max;
    }
    if x <= x_min {
        return y_min;
    }
    let t = (x - x_min) / (x_max - x_min);
    y_min + func.curve(t) * (y_max - y_min)
}
