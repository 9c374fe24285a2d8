// Percent-of-range Cartesian requests
//
// A request of 0..100 on an axis maps linearly onto that axis' configured
// bounds. Values outside 0..100 extrapolate; callers clamp if they need to.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn at_percent(&self, percent: f64) -> f64 {
        self.min + (self.max - self.min) * percent / 100.0
    }
}

/// Reachable box for percent requests (meters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    pub x: AxisRange,
    pub y: AxisRange,
    pub z: AxisRange,
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            x: AxisRange::new(0.0, 0.3491386428374851),
            y: AxisRange::new(-0.3, 0.3),
            z: AxisRange::new(0.1, 0.26922206196312054),
        }
    }
}

impl WorkspaceBounds {
    pub fn axis(&self, axis: Axis) -> AxisRange {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn percent_to_cartesian(&self, axis: Axis, percent: f64) -> f64 {
        self.axis(axis).at_percent(percent)
    }

    /// Map an (x, y, z) percent triple to meters
    pub fn percent_to_point(&self, percent: [f64; 3]) -> [f64; 3] {
        [
            self.percent_to_cartesian(Axis::X, percent[0]),
            self.percent_to_cartesian(Axis::Y, percent[1]),
            self.percent_to_cartesian(Axis::Z, percent[2]),
        ]
    }
}
