// Dynamixel Protocol 2.0 serial implementation
//
// Instruction packet: [0xFF, 0xFF, 0xFD, 0x00, ID, Len_L, Len_H, Instruction, Params..., CRC_L, CRC_H]
// Status packet:      [0xFF, 0xFF, 0xFD, 0x00, ID, Len_L, Len_H, 0x55, Error, Params..., CRC_L, CRC_H]
//
// Length counts instruction (+ error) + params + CRC. CRC-16 (poly 0x8005)
// covers everything from the header up to the CRC. Any 0xFF 0xFF 0xFD run
// inside instruction/params is followed by a stuffing 0xFD.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use super::bus::{BusError, MotorBus, Register, Result};

/// Default serial configuration for the WidowX servos
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Packet header bytes
const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// Instruction byte of every status packet
const STATUS: u8 = 0x55;

/// Bit 7 of the error byte flags a hardware alert, the rest is the error number
const ALERT_BIT: u8 = 0x80;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
}

/// Dynamixel bus - handles serial communication with the servos
pub struct DynamixelBus<P = Box<dyn SerialPort>> {
    port: P,
}

impl DynamixelBus {
    /// Open a new connection to the servo bus
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl<P: Read + Write> DynamixelBus<P> {
    /// Wrap an already opened port
    pub fn from_port(port: P) -> Self {
        Self { port }
    }

    /// CRC-16 as used by Protocol 2.0 (poly 0x8005, init 0, no reflection)
    fn crc16(data: &[u8]) -> u16 {
        data.iter().fold(0u16, |mut crc, &byte| {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x8005
                } else {
                    crc << 1
                };
            }
            crc
        })
    }

    /// Insert a 0xFD after every 0xFF 0xFF 0xFD run
    fn stuff(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 2);
        for &byte in body {
            out.push(byte);
            if out.ends_with(&[0xFF, 0xFF, 0xFD]) {
                out.push(0xFD);
            }
        }
        out
    }

    /// Drop the 0xFD that follows every 0xFF 0xFF 0xFD run
    fn unstuff(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len());
        for &byte in body {
            if byte == 0xFD && out.ends_with(&[0xFF, 0xFF, 0xFD]) {
                continue;
            }
            out.push(byte);
        }
        out
    }

    /// Build a packet with header, length and CRC
    fn build_packet(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(params.len() + 1);
        body.push(instruction as u8);
        body.extend_from_slice(params);
        let body = Self::stuff(&body);

        let length = (body.len() + 2) as u16; // body + CRC
        let mut packet = Vec::with_capacity(HEADER.len() + 3 + body.len() + 2);

        packet.extend_from_slice(&HEADER);
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.extend_from_slice(&body);

        let crc = Self::crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());

        packet
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], expected_id: u8) -> Result<()> {
        self.port.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                BusError::Timeout { id: expected_id }
            } else {
                BusError::Io(e)
            }
        })
    }

    /// Read a status packet and return its (unstuffed) parameters
    fn read_response(&mut self, expected_id: u8) -> Result<Vec<u8>> {
        let mut head = [0u8; 7];
        self.read_exact(&mut head, expected_id)?;

        if head[..4] != HEADER {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("Invalid header: {:02X?}", &head[..4]),
            });
        }

        let id = head[4];
        if id != expected_id {
            return Err(BusError::InvalidResponse {
                id: expected_id,
                reason: format!("ID mismatch: expected {}, got {}", expected_id, id),
            });
        }

        let length = u16::from_le_bytes([head[5], head[6]]) as usize;
        if length < 4 {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Status length {} too short", length),
            });
        }

        // Instruction + error + params + CRC
        let mut remaining = vec![0u8; length];
        self.read_exact(&mut remaining, id)?;

        let (body, crc_bytes) = remaining.split_at(length - 2);
        let mut crc_data = head.to_vec();
        crc_data.extend_from_slice(body);
        let expected_crc = Self::crc16(&crc_data);
        let received_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);

        if expected_crc != received_crc {
            return Err(BusError::ChecksumMismatch { id });
        }

        if body[0] != STATUS {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!("Expected status instruction, got 0x{:02X}", body[0]),
            });
        }

        let error = body[1];
        if error & ALERT_BIT != 0 {
            warn!("Servo {} reports a hardware alert", id);
        }
        if error & !ALERT_BIT != 0 {
            return Err(BusError::ServoStatus { id, status: error });
        }

        Ok(Self::unstuff(&body[2..]))
    }

    /// Ping a servo to check if it's connected
    pub fn ping(&mut self, id: u8) -> Result<bool> {
        let packet = Self::build_packet(id, Instruction::Ping, &[]);
        self.send_packet(&packet)?;

        match self.read_response(id) {
            Ok(_) => Ok(true),
            Err(BusError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write raw little-endian bytes starting at a register
    fn write_bytes(&mut self, id: u8, register: Register, data: &[u8]) -> Result<()> {
        let mut params = register.address().to_le_bytes().to_vec();
        params.extend_from_slice(data);
        let packet = Self::build_packet(id, Instruction::Write, &params);
        self.send_packet(&packet)?;

        let _ = self.read_response(id)?;
        Ok(())
    }

    /// Read `register.width()` bytes starting at a register
    fn read_bytes(&mut self, id: u8, register: Register) -> Result<Vec<u8>> {
        let address = register.address().to_le_bytes();
        let width = register.width().to_le_bytes();
        let params = [address[0], address[1], width[0], width[1]];
        let packet = Self::build_packet(id, Instruction::Read, &params);
        self.send_packet(&packet)?;

        let response = self.read_response(id)?;
        if response.len() < register.width() as usize {
            return Err(BusError::InvalidResponse {
                id,
                reason: format!(
                    "Expected {} bytes, got {}",
                    register.width(),
                    response.len()
                ),
            });
        }
        Ok(response)
    }
}

impl<P: Read + Write> MotorBus for DynamixelBus<P> {
    fn write_u8(&mut self, id: u8, register: Register, value: u8) -> Result<()> {
        debug!(
            "Write u8 to servo {}: reg={:?}, value={}",
            id, register, value
        );
        self.write_bytes(id, register, &[value])
    }

    fn write_u32(&mut self, id: u8, register: Register, value: u32) -> Result<()> {
        debug!(
            "Write u32 to servo {}: reg={:?}, value={}",
            id, register, value
        );
        self.write_bytes(id, register, &value.to_le_bytes())
    }

    fn read_u32(&mut self, id: u8, register: Register) -> Result<u32> {
        let bytes = self.read_bytes(id, register)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Serial port stand-in: replays canned bytes, records what is written
    struct FakePort {
        rx: Cursor<Vec<u8>>,
        tx: Vec<u8>,
    }

    impl FakePort {
        fn replying(bytes: Vec<u8>) -> Self {
            Self {
                rx: Cursor::new(bytes),
                tx: Vec::new(),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.rx.read(buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(std::io::ErrorKind::TimedOut.into());
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    type Bus = DynamixelBus<FakePort>;

    /// Status packet as a servo would send it
    fn status_packet(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let length = (params.len() + 4) as u16;
        let mut packet = HEADER.to_vec();
        packet.push(id);
        packet.extend_from_slice(&length.to_le_bytes());
        packet.push(STATUS);
        packet.push(error);
        packet.extend_from_slice(params);
        let crc = Bus::crc16(&packet);
        packet.extend_from_slice(&crc.to_le_bytes());
        packet
    }

    #[test]
    fn test_ping_packet_matches_reference() {
        let packet = Bus::build_packet(1, Instruction::Ping, &[]);
        assert_eq!(
            packet,
            vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn test_goal_position_write_matches_reference() {
        // Write 512 to Goal Position (116) on servo 1
        let packet = Bus::build_packet(1, Instruction::Write, &[0x74, 0x00, 0x00, 0x02, 0x00, 0x00]);
        assert_eq!(
            packet,
            vec![
                0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x09, 0x00, 0x03, 0x74, 0x00, 0x00, 0x02, 0x00,
                0x00, 0xCA, 0x89
            ]
        );
    }

    #[test]
    fn test_byte_stuffing() {
        let stuffed = Bus::stuff(&[0x03, 0xFF, 0xFF, 0xFD, 0x10]);
        assert_eq!(stuffed, vec![0x03, 0xFF, 0xFF, 0xFD, 0xFD, 0x10]);
        assert_eq!(Bus::unstuff(&stuffed), vec![0x03, 0xFF, 0xFF, 0xFD, 0x10]);
    }

    #[test]
    fn test_write_u32_sends_packet_and_reads_status() {
        let mut bus = Bus::from_port(FakePort::replying(status_packet(4, 0, &[])));
        bus.write_u32(4, Register::GoalPosition, 2048).unwrap();

        let sent = &bus.port.tx;
        assert_eq!(sent[4], 4); // ID
        assert_eq!(sent[7], Instruction::Write as u8);
        assert_eq!(&sent[8..10], &116u16.to_le_bytes());
        assert_eq!(&sent[10..14], &2048u32.to_le_bytes());
    }

    #[test]
    fn test_read_u32_present_position() {
        let reply = status_packet(5, 0, &3000u32.to_le_bytes());
        let mut bus = Bus::from_port(FakePort::replying(reply));

        assert_eq!(bus.read_u32(5, Register::PresentPosition).unwrap(), 3000);
        // Read request: address 132, length 4
        assert_eq!(&bus.port.tx[8..12], &[132, 0, 4, 0]);
    }

    #[test]
    fn test_corrupted_status_is_rejected() {
        let mut reply = status_packet(5, 0, &3000u32.to_le_bytes());
        reply[9] ^= 0x01;
        let mut bus = Bus::from_port(FakePort::replying(reply));

        assert!(matches!(
            bus.read_u32(5, Register::PresentPosition),
            Err(BusError::ChecksumMismatch { id: 5 })
        ));
    }

    #[test]
    fn test_servo_error_status() {
        let mut bus = Bus::from_port(FakePort::replying(status_packet(2, 0x07, &[])));
        assert!(matches!(
            bus.write_u8(2, Register::TorqueEnable, 1),
            Err(BusError::ServoStatus { id: 2, status: 0x07 })
        ));
    }

    #[test]
    fn test_alert_bit_alone_is_not_an_error() {
        let mut bus = Bus::from_port(FakePort::replying(status_packet(2, ALERT_BIT, &[])));
        assert!(bus.write_u8(2, Register::TorqueEnable, 1).is_ok());
    }

    #[test]
    fn test_ping_timeout_reports_absent_servo() {
        let mut bus = Bus::from_port(FakePort::replying(Vec::new()));
        assert!(!bus.ping(9).unwrap());
    }

    #[test]
    fn test_mismatched_id_is_rejected() {
        let mut bus = Bus::from_port(FakePort::replying(status_packet(6, 0, &[])));
        assert!(matches!(
            bus.write_u8(1, Register::TorqueEnable, 1),
            Err(BusError::InvalidResponse { id: 1, .. })
        ));
    }
}
