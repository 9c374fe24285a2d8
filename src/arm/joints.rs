// Joint table for the WidowX-200 arm
//
// Every servo works in a raw position domain of [0, 4095] which maps onto
// [-180, 180] degrees. Mirrored joints drive two servos to complementary raw
// positions (second = 4095 - first) so the linkage stays in sync.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Raw position limits, shared by every servo on the bus
pub const RAW_MIN: u32 = 0;
pub const RAW_MAX: u32 = 4095;

const DEGREES_PER_TURN: f64 = 360.0;
const HALF_TURN: f64 = 180.0;

/// Logical joints of the arm (plus the camera mount on the same bus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    Waist,
    Shoulder,
    Elbow,
    WristAngle,
    WristRotate,
    Gripper,
    CameraPan,
    CameraTilt,
}

impl Joint {
    /// The five joints solved by IK and moved by `zero`
    pub const ARM: [Joint; 5] = [
        Joint::Waist,
        Joint::Shoulder,
        Joint::Elbow,
        Joint::WristAngle,
        Joint::WristRotate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Joint::Waist => "waist",
            Joint::Shoulder => "shoulder",
            Joint::Elbow => "elbow",
            Joint::WristAngle => "wrist_angle",
            Joint::WristRotate => "wrist_rotate",
            Joint::Gripper => "gripper",
            Joint::CameraPan => "camera_pan",
            Joint::CameraTilt => "camera_tilt",
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown joint name: {0}")]
pub struct UnknownJoint(pub String);

impl FromStr for Joint {
    type Err = UnknownJoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "waist" => Ok(Joint::Waist),
            "shoulder" => Ok(Joint::Shoulder),
            "elbow" => Ok(Joint::Elbow),
            "wrist_angle" => Ok(Joint::WristAngle),
            "wrist_rotate" => Ok(Joint::WristRotate),
            "gripper" => Ok(Joint::Gripper),
            "camera_pan" => Ok(Joint::CameraPan),
            "camera_tilt" => Ok(Joint::CameraTilt),
            _ => Err(UnknownJoint(s.to_string())),
        }
    }
}

/// Which servo(s) realize a joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServoMapping {
    Single(u8),
    /// (primary, follower); follower is driven to the complementary position
    Mirrored(u8, u8),
}

impl ServoMapping {
    /// Servo whose position is reported for the joint
    pub fn primary(self) -> u8 {
        match self {
            ServoMapping::Single(id) | ServoMapping::Mirrored(id, _) => id,
        }
    }

    pub fn ids(self) -> Vec<u8> {
        match self {
            ServoMapping::Single(id) => vec![id],
            ServoMapping::Mirrored(a, b) => vec![a, b],
        }
    }
}

/// What to do with a request outside a joint's degree range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Report the violation and leave the servos alone
    #[default]
    RejectOutOfRange,
    /// Move to the nearest bound and log a warning
    ClampToRange,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Joint {joint} position {degrees}° out of range ({min}° to {max}°)")]
pub struct RangeError {
    pub joint: Joint,
    pub degrees: f64,
    pub min: f64,
    pub max: f64,
}

impl RangePolicy {
    /// Returns the angle to command and whether it was clamped
    pub fn apply(self, spec: &JointSpec, degrees: f64) -> Result<(f64, bool), RangeError> {
        if spec.contains(degrees) {
            return Ok((degrees, false));
        }

        let (min, max) = spec.degree_range;
        let error = RangeError {
            joint: spec.joint,
            degrees,
            min,
            max,
        };

        match self {
            RangePolicy::ClampToRange if degrees.is_finite() => {
                let clamped = spec.clamp(degrees);
                warn!("{}, clamping to {}°", error, clamped);
                Ok((clamped, true))
            }
            _ => Err(error),
        }
    }
}

/// Static description of one joint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub joint: Joint,
    pub servos: ServoMapping,
    /// [min, max] in degrees, a subrange of the servo's [-180, 180] travel
    pub degree_range: (f64, f64),
}

impl JointSpec {
    pub fn new(joint: Joint, servos: ServoMapping, degree_range: (f64, f64)) -> Self {
        Self {
            joint,
            servos,
            degree_range,
        }
    }

    pub fn contains(&self, degrees: f64) -> bool {
        let (min, max) = self.degree_range;
        (min..=max).contains(&degrees)
    }

    pub fn clamp(&self, degrees: f64) -> f64 {
        let (min, max) = self.degree_range;
        degrees.clamp(min, max)
    }

    /// Raw goal position for every servo of the joint, primary first
    pub fn resolve_targets(&self, degrees: f64) -> Vec<(u8, u32)> {
        let raw = degrees_to_raw(degrees);
        match self.servos {
            ServoMapping::Single(id) => vec![(id, raw)],
            ServoMapping::Mirrored(a, b) => vec![(a, raw), (b, mirror_raw(raw))],
        }
    }
}

/// A joint paired with an absolute angle in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointTarget {
    pub joint: Joint,
    pub degrees: f64,
}

impl JointTarget {
    pub fn new(joint: Joint, degrees: f64) -> Self {
        Self { joint, degrees }
    }
}

/// The set of joints on one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointModel {
    specs: Vec<JointSpec>,
}

impl JointModel {
    pub fn new(specs: Vec<JointSpec>) -> Self {
        Self { specs }
    }

    /// Published WidowX-200 joint table
    pub fn widowx200() -> Self {
        use ServoMapping::{Mirrored, Single};

        Self::new(vec![
            JointSpec::new(Joint::Waist, Single(1), (-100.0, 100.0)),
            JointSpec::new(Joint::Shoulder, Mirrored(2, 3), (-108.0, 113.0)),
            JointSpec::new(Joint::Elbow, Single(4), (-90.0, 90.0)),
            JointSpec::new(Joint::WristAngle, Single(5), (-100.0, 123.0)),
            JointSpec::new(Joint::WristRotate, Single(6), (-180.0, 180.0)),
            // Gripper limits are in millimetres of finger travel
            JointSpec::new(Joint::Gripper, Single(7), (-40.0, 55.0)),
            JointSpec::new(Joint::CameraPan, Single(8), (-90.0, 90.0)),
            JointSpec::new(Joint::CameraTilt, Single(9), (-90.0, 45.0)),
        ])
    }

    pub fn spec(&self, joint: Joint) -> Option<&JointSpec> {
        self.specs.iter().find(|spec| spec.joint == joint)
    }

    pub fn specs(&self) -> &[JointSpec] {
        &self.specs
    }

    /// All servo ids in table order
    pub fn servo_ids(&self) -> Vec<u8> {
        self.specs.iter().flat_map(|spec| spec.servos.ids()).collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        let mut seen_joints = Vec::new();
        let mut seen_ids = Vec::new();

        for spec in &self.specs {
            if seen_joints.contains(&spec.joint) {
                return Err(format!("joint {} listed twice", spec.joint));
            }
            seen_joints.push(spec.joint);

            let (min, max) = spec.degree_range;
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(format!("joint {} has an empty range", spec.joint));
            }
            if min < -HALF_TURN || max > HALF_TURN {
                return Err(format!(
                    "joint {} range [{}, {}] exceeds servo travel",
                    spec.joint, min, max
                ));
            }

            for id in spec.servos.ids() {
                if seen_ids.contains(&id) {
                    return Err(format!("servo {} mapped more than once", id));
                }
                seen_ids.push(id);
            }
        }
        Ok(())
    }
}

impl Default for JointModel {
    fn default() -> Self {
        Self::widowx200()
    }
}

/// Convert degrees in [-180, 180] to a raw servo position
pub fn degrees_to_raw(degrees: f64) -> u32 {
    let raw = ((degrees + HALF_TURN) * RAW_MAX as f64 / DEGREES_PER_TURN).round();
    raw.clamp(RAW_MIN as f64, RAW_MAX as f64) as u32
}

/// Convert a raw servo position to degrees
pub fn raw_to_degrees(raw: u32) -> f64 {
    raw as f64 * DEGREES_PER_TURN / RAW_MAX as f64 - HALF_TURN
}

/// Complementary position for the follower of a mirrored pair
pub fn mirror_raw(raw: u32) -> u32 {
    RAW_MAX - raw.min(RAW_MAX)
}
