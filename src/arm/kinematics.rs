// Closed-form inverse kinematics for the WidowX-200
//
// Base yaw comes straight from the target bearing. The shoulder/elbow pair is
// solved as a planar 2-link chain reaching the wrist center, which sits one
// tool offset back from the tip along the requested pitch.

use serde::{Deserialize, Serialize};

use super::joints::{Joint, JointTarget};

/// Arm geometry (meters)
pub const UPPER_ARM_LENGTH: f64 = 0.2; // shoulder to elbow
pub const FOREARM_LENGTH: f64 = 0.2; // elbow to wrist center
pub const TOOL_OFFSET: f64 = 0.05; // wrist center to end-effector tip

/// Cartesian end-effector request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IkTarget {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

impl IkTarget {
    pub fn new(x: f64, y: f64, z: f64, pitch_deg: f64, roll_deg: f64) -> Self {
        Self {
            x,
            y,
            z,
            pitch_deg,
            roll_deg,
        }
    }
}

/// Whether the wrist center had to be moved to make the target reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reach {
    Reachable,
    /// Beyond full extension, pulled in along the same ray
    ClampedOuter,
    /// Inside the minimum fold radius, pushed out along the same ray
    ClampedInner,
}

/// Joint angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IkSolution {
    pub waist: f64,
    pub shoulder: f64,
    pub elbow: f64,
    pub wrist_angle: f64,
    pub wrist_rotate: f64,
    pub reach: Reach,
    /// Wrist center actually solved for: (radial distance, height)
    pub wrist_center: (f64, f64),
}

impl IkSolution {
    pub fn is_clamped(&self) -> bool {
        self.reach != Reach::Reachable
    }

    pub fn joint_targets(&self) -> [JointTarget; 5] {
        [
            JointTarget::new(Joint::Waist, self.waist),
            JointTarget::new(Joint::Shoulder, self.shoulder),
            JointTarget::new(Joint::Elbow, self.elbow),
            JointTarget::new(Joint::WristAngle, self.wrist_angle),
            JointTarget::new(Joint::WristRotate, self.wrist_rotate),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IkSolver {
    pub upper_arm: f64,
    pub forearm: f64,
    pub tool_offset: f64,
}

impl Default for IkSolver {
    fn default() -> Self {
        Self {
            upper_arm: UPPER_ARM_LENGTH,
            forearm: FOREARM_LENGTH,
            tool_offset: TOOL_OFFSET,
        }
    }
}

impl IkSolver {
    pub fn validate(&self) -> Result<(), String> {
        let links_ok = [self.upper_arm, self.forearm]
            .iter()
            .all(|l| l.is_finite() && *l > 0.0);
        let offset_ok = self.tool_offset.is_finite() && self.tool_offset >= 0.0;
        if !(links_ok && offset_ok) {
            return Err(format!("invalid arm geometry {:?}", self));
        }
        Ok(())
    }

    /// Solve for the elbow-down configuration. Never fails: unreachable
    /// targets are moved onto the reachable boundary and flagged in `reach`.
    pub fn solve(&self, target: &IkTarget) -> IkSolution {
        let (l1, l2) = (self.upper_arm, self.forearm);
        let pitch = target.pitch_deg.to_radians();
        let roll = target.roll_deg.to_radians();

        let q1 = target.y.atan2(target.x);
        let r = target.x.hypot(target.y);

        let mut wrist_r = r - self.tool_offset * pitch.cos();
        let mut wrist_z = target.z - self.tool_offset * pitch.sin();
        let d = wrist_r.hypot(wrist_z);

        let max_d = l1 + l2;
        let min_d = (l1 - l2).abs();

        let reach = if d > max_d {
            let ratio = max_d / d;
            wrist_r *= ratio;
            wrist_z *= ratio;
            Reach::ClampedOuter
        } else if d < min_d {
            // A wrist center at the shoulder has no direction to push along
            if d > 0.0 {
                let ratio = min_d / d;
                wrist_r *= ratio;
                wrist_z *= ratio;
            }
            Reach::ClampedInner
        } else {
            Reach::Reachable
        };

        let cos_q3 = ((wrist_r.powi(2) + wrist_z.powi(2) - l1.powi(2) - l2.powi(2))
            / (2.0 * l1 * l2))
            .clamp(-1.0, 1.0);
        let q3 = cos_q3.acos();

        let q2 = wrist_z.atan2(wrist_r) - (l2 * q3.sin()).atan2(l1 + l2 * q3.cos());
        let q4 = pitch - (q2 + q3);
        let q5 = roll;

        IkSolution {
            waist: q1.to_degrees(),
            shoulder: q2.to_degrees(),
            elbow: q3.to_degrees(),
            wrist_angle: q4.to_degrees(),
            wrist_rotate: q5.to_degrees(),
            reach,
            wrist_center: (wrist_r, wrist_z),
        }
    }
}
