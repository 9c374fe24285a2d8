// Register-level access to the arm's servo bus
//
// The arm controller only needs torque, goal velocity, goal position and
// present position. Anything that can read and write those registers by
// servo id can drive the arm.

/// Control table addresses (Dynamixel X-series, Protocol 2.0)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    TorqueEnable = 64,     // 1 byte: 0=off, 1=on
    GoalVelocity = 112,    // 4 bytes
    GoalPosition = 116,    // 4 bytes
    PresentPosition = 132, // 4 bytes, read-only
}

impl Register {
    pub fn address(self) -> u16 {
        self as u16
    }

    /// Register width in bytes
    pub fn width(self) -> u16 {
        match self {
            Register::TorqueEnable => 1,
            Register::GoalVelocity | Register::GoalPosition | Register::PresentPosition => 4,
        }
    }
}

pub const TORQUE_ON: u8 = 1;
pub const TORQUE_OFF: u8 = 0;

/// Error types for servo bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from servo {id}: {reason}")]
    InvalidResponse { id: u8, reason: String },

    #[error("Checksum mismatch for servo {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Servo {id} returned error status: 0x{status:02X}")]
    ServoStatus { id: u8, status: u8 },

    #[error("Timeout waiting for response from servo {id}")]
    Timeout { id: u8 },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Register read/write capability for one exclusive servo bus.
///
/// Calls are request/response with no request ids, so implementations take
/// `&mut self` and must never be shared between concurrent writers.
pub trait MotorBus {
    fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()>;

    fn write_u32(&mut self, id: u8, register: Register, value: u32) -> Result<()>;

    fn read_u32(&mut self, id: u8, register: Register) -> Result<u32>;
}
