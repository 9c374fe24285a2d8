// Joint-space motion controller for the WidowX-200 arm
//
// Turns joint-angle requests into goal-velocity / goal-position register
// writes, applying the configured range policy. Cartesian requests go through
// the workspace mapper and IK solver first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::bus::{BusError, MotorBus, Register, TORQUE_OFF, TORQUE_ON};
use super::joints::{Joint, JointSpec, JointTarget, RangeError, degrees_to_raw, raw_to_degrees};
use super::kinematics::{IkSolution, IkTarget};
use crate::config::ArmConfig;

/// Goal velocity register limit
pub const MAX_SPEED: u32 = 1023;

/// Cooperative cancellation for blocking waits and multi-step motions
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A register write that failed on one servo
#[derive(Debug, thiserror::Error)]
#[error("servo {id}: {source}")]
pub struct ServoFault {
    pub id: u8,
    #[source]
    pub source: BusError,
}

#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error(transparent)]
    OutOfRange(#[from] RangeError),

    #[error("Joint {0} is not configured")]
    UnknownJoint(Joint),

    #[error("Register write failed on {} servo(s): {}", .failures.len(), describe(.failures))]
    Servo { failures: Vec<ServoFault> },

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Servo {id} did not reach {target} (last read {last}) before timeout")]
    MotionTimeout { id: u8, target: u32, last: u32 },

    #[error("Wait for servo {id} was cancelled")]
    Cancelled { id: u8 },

    #[error("Motion cancelled before step {step}")]
    Interrupted { step: usize },
}

fn describe(failures: &[ServoFault]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A validated single-joint move, ready to be written to the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCommand {
    pub joint: Joint,
    pub target_degrees: f64,
    pub speed: u32,
    /// The range policy moved the target onto a bound
    pub clamped: bool,
}

/// Joint angles captured from the arm
pub type Pose = Vec<JointTarget>;

/// Pose file contents: a single pose from `arm read`, or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PoseFile {
    One(Pose),
    Many(Vec<Pose>),
}

/// Parse one pose or a list of poses
pub fn parse_poses(text: &str) -> Result<Vec<Pose>, serde_json::Error> {
    Ok(match serde_json::from_str(text)? {
        PoseFile::One(pose) => vec![pose],
        PoseFile::Many(poses) => poses,
    })
}

/// Goal velocity for one cycle of a linear ramp from `start` to `end`
fn ramp_speed(start: u32, end: u32, cycle: u32, cycles: u32) -> u32 {
    if cycles <= 1 {
        return start;
    }
    let (start, end) = (i64::from(start), i64::from(end));
    let speed = start + (end - start) * i64::from(cycle) / i64::from(cycles - 1);
    speed.clamp(0, i64::from(MAX_SPEED)) as u32
}

/// High-level controller for the WidowX-200 arm
pub struct ArmController<B: MotorBus> {
    bus: B,
    config: ArmConfig,
}

impl<B: MotorBus> ArmController<B> {
    pub fn new(bus: B, config: ArmConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &ArmConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn spec(&self, joint: Joint) -> Result<&JointSpec, ArmError> {
        self.config
            .joints
            .spec(joint)
            .ok_or(ArmError::UnknownJoint(joint))
    }

    /// Enable torque on every servo except the configured limp ones
    pub fn enable_torque(&mut self) -> Result<(), ArmError> {
        let mut failures = Vec::new();
        for id in self.config.joints.servo_ids() {
            let value = if self.config.limp_servos.contains(&id) {
                TORQUE_OFF
            } else {
                TORQUE_ON
            };
            if let Err(source) = self.bus.write_u8(id, Register::TorqueEnable, value) {
                failures.push(ServoFault { id, source });
            }
        }
        into_result(failures)?;
        info!("Arm joints are enabled");
        Ok(())
    }

    /// Disable torque on every servo (arm goes limp)
    pub fn disable_torque(&mut self) -> Result<(), ArmError> {
        info!("Disabling torque on all servos");
        let mut failures = Vec::new();
        for id in self.config.joints.servo_ids() {
            if let Err(source) = self.bus.write_u8(id, Register::TorqueEnable, TORQUE_OFF) {
                failures.push(ServoFault { id, source });
            }
        }
        into_result(failures)
    }

    /// Set the goal velocity of every servo. Later moves overwrite it.
    pub fn set_all_speed(&mut self, speed: u32) -> Result<(), ArmError> {
        let speed = speed.min(MAX_SPEED);
        let mut failures = Vec::new();
        for id in self.config.joints.servo_ids() {
            if let Err(source) = self.bus.write_u32(id, Register::GoalVelocity, speed) {
                failures.push(ServoFault { id, source });
            }
        }
        into_result(failures)
    }

    /// Validate a joint request against the range policy without touching the bus
    pub fn plan_move(&self, joint: Joint, degrees: f64, speed: u32) -> Result<MoveCommand, ArmError> {
        let spec = self.spec(joint)?;
        let (target_degrees, clamped) = self.config.range_policy.apply(spec, degrees)?;

        Ok(MoveCommand {
            joint,
            target_degrees,
            speed: speed.min(MAX_SPEED),
            clamped,
        })
    }

    /// Write a planned move. Every servo of the joint is attempted even if a
    /// sibling fails; velocity always goes out before position.
    pub fn execute(&mut self, command: &MoveCommand) -> Result<(), ArmError> {
        let targets = self.spec(command.joint)?.resolve_targets(command.target_degrees);
        let mut failures = Vec::new();

        for (id, raw) in targets {
            let written = self
                .bus
                .write_u32(id, Register::GoalVelocity, command.speed)
                .and_then(|_| self.bus.write_u32(id, Register::GoalPosition, raw));
            if let Err(source) = written {
                warn!("Servo {} rejected move of {}: {}", id, command.joint, source);
                failures.push(ServoFault { id, source });
            }
        }

        debug!(
            "Joint {} moving to {}° at speed {}",
            command.joint, command.target_degrees, command.speed
        );
        into_result(failures)
    }

    /// Move one joint to an absolute angle
    pub fn move_joint(&mut self, joint: Joint, degrees: f64, speed: u32) -> Result<MoveCommand, ArmError> {
        let command = self.plan_move(joint, degrees, speed)?;
        self.execute(&command)?;
        Ok(command)
    }

    /// Current angle of a joint, read from its primary servo
    pub fn read_joint_position(&mut self, joint: Joint) -> Result<f64, ArmError> {
        let id = self.spec(joint)?.servos.primary();
        let raw = self.bus.read_u32(id, Register::PresentPosition)?;
        Ok(raw_to_degrees(raw))
    }

    /// Block until a servo is within `tolerance` of `target_raw`
    pub fn wait_for_arrival(
        &mut self,
        id: u8,
        target_raw: u32,
        tolerance: u32,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), ArmError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(ArmError::Cancelled { id });
            }

            let current = self.bus.read_u32(id, Register::PresentPosition)?;
            if current.abs_diff(target_raw) <= tolerance {
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(ArmError::MotionTimeout {
                    id,
                    target: target_raw,
                    last: current,
                });
            }
            sleep(self.config.poll_interval());
        }
    }

    /// Move a joint and wait for its primary servo to arrive
    pub fn move_joint_and_wait(
        &mut self,
        joint: Joint,
        degrees: f64,
        speed: u32,
        cancel: &CancelToken,
    ) -> Result<MoveCommand, ArmError> {
        let command = self.move_joint(joint, degrees, speed)?;
        let id = self.spec(joint)?.servos.primary();
        self.wait_for_arrival(
            id,
            degrees_to_raw(command.target_degrees),
            self.config.arrival_tolerance,
            self.config.arrival_timeout(),
            cancel,
        )?;
        Ok(command)
    }

    fn plan_pose(&self, pose: &[JointTarget], speed: u32) -> Result<Vec<MoveCommand>, ArmError> {
        pose.iter()
            .map(|target| self.plan_move(target.joint, target.degrees, speed))
            .collect()
    }

    /// Plan every target first so a rejected angle leaves the arm untouched,
    /// then write them all, collecting per-servo failures.
    pub fn apply_pose(&mut self, pose: &[JointTarget], speed: u32) -> Result<(), ArmError> {
        let commands = self.plan_pose(pose, speed)?;
        self.execute_all(&commands)
    }

    fn execute_all(&mut self, commands: &[MoveCommand]) -> Result<(), ArmError> {
        let mut failures = Vec::new();
        for command in commands {
            match self.execute(command) {
                Ok(()) => {}
                Err(ArmError::Servo { failures: mut more }) => failures.append(&mut more),
                Err(e) => return Err(e),
            }
        }
        into_result(failures)
    }

    /// Read every configured joint
    pub fn capture_pose(&mut self) -> Result<Pose, ArmError> {
        let joints: Vec<Joint> = self.config.joints.specs().iter().map(|s| s.joint).collect();
        let mut pose = Vec::with_capacity(joints.len());
        for joint in joints {
            pose.push(JointTarget::new(joint, self.read_joint_position(joint)?));
        }
        Ok(pose)
    }

    /// Waist, shoulder, elbow and both wrist joints to 0°
    pub fn zero(&mut self, speed: u32) -> Result<(), ArmError> {
        info!("Zeroing arm");
        let pose = Joint::ARM.map(|joint| JointTarget::new(joint, 0.0));
        self.apply_pose(&pose, speed)
    }

    /// Apply poses one after another, pausing `step_delay` between them.
    ///
    /// Every pose is planned before the first write, so a rejected angle
    /// anywhere in the list leaves the arm untouched. `cancel` is checked
    /// before each step.
    pub fn run_sequence(
        &mut self,
        poses: &[Pose],
        step_delay: Duration,
        speed: u32,
        cancel: &CancelToken,
    ) -> Result<(), ArmError> {
        let steps = poses
            .iter()
            .map(|pose| self.plan_pose(pose, speed))
            .collect::<Result<Vec<_>, _>>()?;

        for (step, commands) in steps.iter().enumerate() {
            if step > 0 {
                sleep(step_delay);
            }
            if cancel.is_cancelled() {
                warn!("Sequence cancelled at step {} of {}", step, steps.len());
                return Err(ArmError::Interrupted { step });
            }
            debug!("Sequence step {} of {}", step + 1, steps.len());
            self.execute_all(commands)?;
        }
        Ok(())
    }

    /// Zero, then fold the arm into its stowed pose one joint at a time
    pub fn tuck(&mut self, speed: u32, cancel: &CancelToken) -> Result<(), ArmError> {
        info!("Tucking arm");
        let zero: Pose = Joint::ARM.map(|joint| JointTarget::new(joint, 0.0)).to_vec();
        let steps: Vec<Pose> = std::iter::once(zero)
            .chain(self.config.tuck_pose.iter().map(|step| vec![*step]))
            .collect();
        let settle = self.config.tuck_settle();
        self.run_sequence(&steps, settle, speed, cancel)
    }

    /// Swing a joint between two angles `cycles` times, waiting for arrival at
    /// each end. Speed ramps linearly from `start_speed` on the first cycle to
    /// `end_speed` on the last.
    #[allow(clippy::too_many_arguments)]
    pub fn cycle_joint(
        &mut self,
        joint: Joint,
        min_deg: f64,
        max_deg: f64,
        start_speed: u32,
        end_speed: u32,
        cycles: u32,
        cancel: &CancelToken,
    ) -> Result<(), ArmError> {
        // Both ends must pass the range policy before anything moves
        let low = self.plan_move(joint, min_deg, start_speed)?.target_degrees;
        let high = self.plan_move(joint, max_deg, start_speed)?.target_degrees;
        info!(
            "Cycling {} between {}° and {}° for {} cycles",
            joint, low, high, cycles
        );

        for cycle in 0..cycles {
            let speed = ramp_speed(start_speed, end_speed, cycle, cycles);
            debug!("Cycle {} of {} at speed {}", cycle + 1, cycles, speed);
            self.move_joint_and_wait(joint, low, speed, cancel)?;
            self.move_joint_and_wait(joint, high, speed, cancel)?;
        }
        Ok(())
    }

    /// Open/close the gripper, clamping to its travel regardless of policy
    pub fn gripper(&mut self, position_mm: f64, speed: u32) -> Result<MoveCommand, ArmError> {
        let spec = self.spec(Joint::Gripper)?;
        let clamped = spec.clamp(position_mm);
        if clamped != position_mm {
            warn!("Gripper position {} clamped to {}", position_mm, clamped);
        }
        self.move_joint(Joint::Gripper, clamped, speed)
    }

    /// Solve IK for a Cartesian target and move the five arm joints
    pub fn move_arm(&mut self, target: &IkTarget, speed: u32) -> Result<IkSolution, ArmError> {
        let solution = self.config.geometry.solve(target);
        if solution.is_clamped() {
            warn!(
                "Target ({:.3}, {:.3}, {:.3}) out of reach ({:?}), using nearest point",
                target.x, target.y, target.z, solution.reach
            );
        }
        debug!("IK solution: {:?}", solution);

        self.apply_pose(&solution.joint_targets(), speed)?;
        Ok(solution)
    }

    /// Like `move_arm`, with x/y/z given as 0..100 percent of the workspace
    pub fn move_arm_percent(
        &mut self,
        percent: [f64; 3],
        pitch_deg: f64,
        roll_deg: f64,
        speed: u32,
    ) -> Result<IkSolution, ArmError> {
        let [x, y, z] = self.config.workspace.percent_to_point(percent);
        self.move_arm(&IkTarget::new(x, y, z, pitch_deg, roll_deg), speed)
    }
}

fn into_result(failures: Vec<ServoFault>) -> Result<(), ArmError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ArmError::Servo { failures })
    }
}
