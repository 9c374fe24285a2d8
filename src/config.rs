// Serial ports, timings, joint tables and the loadable runtime configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arm::joints::{Joint, JointModel, JointTarget, RangePolicy};
use crate::arm::kinematics::IkSolver;
use crate::arm::workspace::WorkspaceBounds;

// Kobuki base serial link
pub const BASE_PORT: &str = "/dev/kobuki";
pub const BASE_BAUDRATE: u32 = 115_200;

// Time the base needs after the port opens before it accepts commands
pub const BASE_SETTLE: Duration = Duration::from_secs(2);

// WidowX-200 arm serial link
pub const ARM_PORT: &str = "/dev/ttyUSB1";
pub const ARM_BAUDRATE: u32 = 1_000_000;

// Monitor loop frequency
pub const LOOP_HZ: u64 = 50;

// Feedback watchdog: base is considered silent after this long
pub const FEEDBACK_TIMEOUT: Duration = Duration::from_millis(500);

// How often the monitor asks the base for a status frame
pub const STATUS_PERIOD: Duration = Duration::from_secs(1);

// Arm motion defaults
pub const DEFAULT_SPEED: u32 = 100;
pub const ARRIVAL_TOLERANCE: u32 = 10;
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const ARRIVAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const TUCK_SETTLE: Duration = Duration::from_millis(500);

// Shoulder follower servo, left limp when torque is enabled at startup
pub const LIMP_SERVOS: [u8; 1] = [3];

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration for both devices and the monitor loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub base: BaseConfig,
    pub arm: ArmConfig,
    pub monitor: MonitorConfig,
}

impl RuntimeConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: RuntimeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.arm.validate()?;
        if self.monitor.loop_hz == 0 || self.monitor.loop_hz > 1000 {
            return Err(ConfigError::Invalid(format!(
                "monitor.loop_hz must be in 1..=1000, got {}",
                self.monitor.loop_hz
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfig {
    pub port: String,
    pub baudrate: u32,
    pub settle_ms: u64,
}

impl BaseConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            port: BASE_PORT.to_string(),
            baudrate: BASE_BAUDRATE,
            settle_ms: BASE_SETTLE.as_millis() as u64,
        }
    }
}

/// Arm configuration. Built once at startup and handed to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmConfig {
    pub port: String,
    pub baudrate: u32,
    pub joints: JointModel,
    pub range_policy: RangePolicy,
    pub default_speed: u32,
    /// Servos that keep torque off when the arm is enabled
    pub limp_servos: Vec<u8>,
    pub arrival_tolerance: u32,
    pub poll_interval_ms: u64,
    pub arrival_timeout_ms: u64,
    /// Absolute joint angles applied in order after zeroing. Physical calibration.
    pub tuck_pose: Vec<JointTarget>,
    pub tuck_settle_ms: u64,
    pub workspace: WorkspaceBounds,
    pub geometry: IkSolver,
}

impl ArmConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn arrival_timeout(&self) -> Duration {
        Duration::from_millis(self.arrival_timeout_ms)
    }

    pub fn tuck_settle(&self) -> Duration {
        Duration::from_millis(self.tuck_settle_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.joints.validate().map_err(ConfigError::Invalid)?;

        for step in &self.tuck_pose {
            if self.joints.spec(step.joint).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "tuck pose uses unconfigured joint {}",
                    step.joint
                )));
            }
        }

        for joint in Joint::ARM {
            if self.joints.spec(joint).is_none() {
                return Err(ConfigError::Invalid(format!("joint {} is missing", joint)));
            }
        }

        self.geometry.validate().map_err(ConfigError::Invalid)?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "arm.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ArmConfig {
    fn default() -> Self {
        Self {
            port: ARM_PORT.to_string(),
            baudrate: ARM_BAUDRATE,
            joints: JointModel::widowx200(),
            range_policy: RangePolicy::default(),
            default_speed: DEFAULT_SPEED,
            limp_servos: LIMP_SERVOS.to_vec(),
            arrival_tolerance: ARRIVAL_TOLERANCE,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            arrival_timeout_ms: ARRIVAL_TIMEOUT.as_millis() as u64,
            tuck_pose: vec![
                JointTarget::new(Joint::Shoulder, -105.0),
                JointTarget::new(Joint::Elbow, 88.0),
                JointTarget::new(Joint::WristAngle, 110.0),
            ],
            tuck_settle_ms: TUCK_SETTLE.as_millis() as u64,
            workspace: WorkspaceBounds::default(),
            geometry: IkSolver::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub loop_hz: u64,
    pub feedback_timeout_ms: u64,
    pub status_period_ms: u64,
    /// Send a stop when a bumper, cliff, wheel-drop or overcurrent flag rises
    pub stop_on_hazard: bool,
}

impl MonitorConfig {
    pub fn feedback_timeout(&self) -> Duration {
        Duration::from_millis(self.feedback_timeout_ms)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_period_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            loop_hz: LOOP_HZ,
            feedback_timeout_ms: FEEDBACK_TIMEOUT.as_millis() as u64,
            status_period_ms: STATUS_PERIOD.as_millis() as u64,
            stop_on_hazard: true,
        }
    }
}
