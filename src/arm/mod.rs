// WidowX-200 arm
//
// Provides:
// - Joint table and degree <-> raw position conversion
// - Dynamixel Protocol 2.0 serial bus
// - Closed-form inverse kinematics and percent workspace mapping
// - High-level arm controller

pub mod bus;
mod controller;
pub mod dynamixel;
pub mod joints;
pub mod kinematics;
pub mod workspace;

pub use bus::{BusError, MotorBus, Register};
pub use controller::{ArmController, ArmError, CancelToken, MAX_SPEED, MoveCommand, Pose, ServoFault, parse_poses};
pub use dynamixel::DynamixelBus;
pub use joints::{Joint, JointModel, JointSpec, JointTarget, RangePolicy, ServoMapping};
pub use kinematics::{IkSolution, IkSolver, IkTarget, Reach};
pub use workspace::{Axis, AxisRange, WorkspaceBounds};
