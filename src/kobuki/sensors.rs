// Kobuki feedback payloads
//
// The base answers with two payload shapes that carry no type tag:
// - 4 bytes: motion echo, [linear_mm_s: i16 LE, angular_mrad_s: i16 LE]
// - 17+ bytes: basic sensor data (layout below)
//
// They are told apart by length only, which is what the firmware expects.

use serde::Serialize;

/// Basic sensor payload size
pub const SENSOR_PAYLOAD_LEN: usize = 17;

/// Motion echo payload size
pub const MOTION_ECHO_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor payload too short: {len} bytes, need {}", SENSOR_PAYLOAD_LEN)]
    Truncated { len: usize },
}

bitflags::bitflags! {
    /// Bumper contacts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Bumper: u8 {
        const RIGHT   = 1 << 0;
        const CENTRAL = 1 << 1;
        const LEFT    = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Wheels off the ground
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct WheelDrop: u8 {
        const RIGHT = 1 << 0;
        const LEFT  = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Cliff sensors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Cliff: u8 {
        const RIGHT   = 1 << 0;
        const CENTRAL = 1 << 1;
        const LEFT    = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Buttons on the base
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Buttons: u8 {
        const B0 = 1 << 0;
        const B1 = 1 << 1;
        const B2 = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Wheel motor overcurrent
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Overcurrent: u8 {
        const LEFT  = 1 << 0;
        const RIGHT = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerState {
    Discharging,
    DockingCharged,
    DockingCharging,
    AdapterCharged,
    AdapterCharging,
    Unknown(u8),
}

impl From<u8> for ChargerState {
    fn from(raw: u8) -> Self {
        match raw {
            0 => ChargerState::Discharging,
            2 => ChargerState::DockingCharged,
            6 => ChargerState::DockingCharging,
            18 => ChargerState::AdapterCharged,
            22 => ChargerState::AdapterCharging,
            other => ChargerState::Unknown(other),
        }
    }
}

/// One basic sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub feedback_id: u8,
    pub data_length: u8,
    /// Firmware clock, ms
    pub timestamp: u16,
    pub bumper: Bumper,
    pub wheel_drop: WheelDrop,
    pub cliff: Cliff,
    pub left_encoder: u16,
    pub right_encoder: u16,
    pub left_pwm: i8,
    pub right_pwm: i8,
    pub buttons: Buttons,
    pub charger: ChargerState,
    /// 0.1 V units
    pub battery: u8,
    pub overcurrent: Overcurrent,
}

impl SensorSnapshot {
    pub fn decode(payload: &[u8]) -> Result<Self, SensorError> {
        if payload.len() < SENSOR_PAYLOAD_LEN {
            return Err(SensorError::Truncated { len: payload.len() });
        }
        let p = payload;

        Ok(Self {
            feedback_id: p[0],
            data_length: p[1],
            timestamp: u16::from_le_bytes([p[2], p[3]]),
            bumper: Bumper::from_bits_retain(p[4]),
            wheel_drop: WheelDrop::from_bits_retain(p[5]),
            cliff: Cliff::from_bits_retain(p[6]),
            left_encoder: u16::from_le_bytes([p[7], p[8]]),
            right_encoder: u16::from_le_bytes([p[9], p[10]]),
            left_pwm: p[11] as i8,
            right_pwm: p[12] as i8,
            buttons: Buttons::from_bits_retain(p[13]),
            charger: ChargerState::from(p[14]),
            battery: p[15],
            overcurrent: Overcurrent::from_bits_retain(p[16]),
        })
    }

    pub fn battery_volts(&self) -> f32 {
        self.battery as f32 / 10.0
    }

    /// Non-zero PWM on either wheel
    pub fn motors_powered(&self) -> bool {
        self.left_pwm != 0 || self.right_pwm != 0
    }

    pub fn hazards(&self) -> Hazards {
        Hazards {
            bumper: self.bumper,
            wheel_drop: self.wheel_drop,
            cliff: self.cliff,
            overcurrent: self.overcurrent,
        }
    }
}

/// Conditions under which the base should not keep driving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Hazards {
    pub bumper: Bumper,
    pub wheel_drop: WheelDrop,
    pub cliff: Cliff,
    pub overcurrent: Overcurrent,
}

impl Default for Hazards {
    fn default() -> Self {
        Self {
            bumper: Bumper::empty(),
            wheel_drop: WheelDrop::empty(),
            cliff: Cliff::empty(),
            overcurrent: Overcurrent::empty(),
        }
    }
}

/// Lower-cased names of the set flags
fn names<F: bitflags::Flags>(flags: F) -> Vec<String> {
    flags
        .iter_names()
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect()
}

impl Hazards {
    pub fn any(&self) -> bool {
        !(self.bumper.is_empty()
            && self.wheel_drop.is_empty()
            && self.cliff.is_empty()
            && self.overcurrent.is_empty())
    }

    /// e.g. "bumper: left; cliff: central"
    pub fn describe(&self) -> String {
        [
            ("bumper", names(self.bumper)),
            ("wheel drop", names(self.wheel_drop)),
            ("cliff", names(self.cliff)),
            ("overcurrent", names(self.overcurrent)),
        ]
        .into_iter()
        .filter(|(_, set)| !set.is_empty())
        .map(|(name, set)| format!("{}: {}", name, set.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
    }
}

/// A decoded feedback payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    /// Velocity the base reports it is executing
    MotionEcho { linear_mps: f64, angular_radps: f64 },
    Sensors(SensorSnapshot),
    Unrecognized { len: usize },
}

impl Feedback {
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload.len() {
            MOTION_ECHO_LEN => Feedback::MotionEcho {
                linear_mps: i16::from_le_bytes([payload[0], payload[1]]) as f64 / 1000.0,
                angular_radps: i16::from_le_bytes([payload[2], payload[3]]) as f64 / 1000.0,
            },
            len if len >= SENSOR_PAYLOAD_LEN => match SensorSnapshot::decode(payload) {
                Ok(snapshot) => Feedback::Sensors(snapshot),
                Err(_) => Feedback::Unrecognized { len },
            },
            len => Feedback::Unrecognized { len },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor_payload() -> [u8; 17] {
        [
            0x01, 0x0F, // feedback id, data length
            0x34, 0x12, // timestamp 0x1234
            0x04, // bumper: left
            0x00, // wheel drop
            0x02, // cliff: central
            0xE8, 0x03, // left encoder 1000
            0xD0, 0x07, // right encoder 2000
            0xF6, // left pwm -10
            0x0A, // right pwm 10
            0x01, // button 0
            0x06, // docking charging
            0xA0, // 16.0 V
            0x02, // overcurrent right
        ]
    }

    #[test]
    fn test_decode_sensor_snapshot() {
        let snapshot = SensorSnapshot::decode(&sensor_payload()).unwrap();

        assert_eq!(snapshot.feedback_id, 1);
        assert_eq!(snapshot.timestamp, 0x1234);
        assert_eq!(snapshot.bumper, Bumper::LEFT);
        assert_eq!(snapshot.cliff, Cliff::CENTRAL);
        assert_eq!(snapshot.left_encoder, 1000);
        assert_eq!(snapshot.right_encoder, 2000);
        assert_eq!(snapshot.left_pwm, -10);
        assert_eq!(snapshot.right_pwm, 10);
        assert_eq!(snapshot.buttons, Buttons::B0);
        assert_eq!(snapshot.charger, ChargerState::DockingCharging);
        assert_eq!(snapshot.battery_volts(), 16.0);
        assert_eq!(snapshot.overcurrent, Overcurrent::RIGHT);
        assert!(snapshot.motors_powered());
    }

    #[test]
    fn test_short_payload_is_truncated() {
        assert_eq!(
            SensorSnapshot::decode(&sensor_payload()[..16]),
            Err(SensorError::Truncated { len: 16 })
        );
    }

    #[test]
    fn test_charger_states() {
        assert_eq!(ChargerState::from(0), ChargerState::Discharging);
        assert_eq!(ChargerState::from(2), ChargerState::DockingCharged);
        assert_eq!(ChargerState::from(18), ChargerState::AdapterCharged);
        assert_eq!(ChargerState::from(22), ChargerState::AdapterCharging);
        assert_eq!(ChargerState::from(7), ChargerState::Unknown(7));
    }

    #[test]
    fn test_hazards() {
        let snapshot = SensorSnapshot::decode(&sensor_payload()).unwrap();
        let hazards = snapshot.hazards();
        assert!(hazards.any());
        assert_eq!(
            hazards.describe(),
            "bumper: left; cliff: central; overcurrent: right"
        );
        assert!(!Hazards::default().any());
    }

    #[test]
    fn test_unnamed_bits_are_kept_but_not_named() {
        let mut payload = sensor_payload();
        payload[4] = 0x81; // right plus an undocumented bit
        payload[6] = 0;
        payload[16] = 0;
        let hazards = SensorSnapshot::decode(&payload).unwrap().hazards();

        assert_eq!(hazards.bumper.bits(), 0x81);
        assert!(hazards.any());
        assert_eq!(hazards.describe(), "bumper: right");
    }

    #[test]
    fn test_sensor_flags_serialize_through_bitflags() {
        let snapshot = SensorSnapshot::decode(&sensor_payload()).unwrap();
        let json = serde_json::to_value(Feedback::Sensors(snapshot)).unwrap();
        assert_eq!(json["kind"], "sensors");
        assert_eq!(json["bumper"], "LEFT");
        assert_eq!(json["wheel_drop"], "");
    }

    #[test]
    fn test_feedback_dispatch_by_length() {
        // 0.25 m/s, -0.5 rad/s
        let echo = Feedback::from_payload(&[0xFA, 0x00, 0x0C, 0xFE]);
        assert_eq!(
            echo,
            Feedback::MotionEcho {
                linear_mps: 0.25,
                angular_radps: -0.5
            }
        );

        assert!(matches!(
            Feedback::from_payload(&sensor_payload()),
            Feedback::Sensors(_)
        ));

        let mut long = sensor_payload().to_vec();
        long.extend_from_slice(&[0xFF; 8]);
        assert!(matches!(Feedback::from_payload(&long), Feedback::Sensors(_)));

        assert_eq!(
            Feedback::from_payload(&[0; 9]),
            Feedback::Unrecognized { len: 9 }
        );
    }

    #[test]
    fn test_feedback_json_is_tagged() {
        let json = serde_json::to_value(Feedback::from_payload(&[0xE8, 0x03, 0, 0])).unwrap();
        assert_eq!(json["kind"], "motion_echo");
        assert_eq!(json["linear_mps"], 1.0);
    }
}
