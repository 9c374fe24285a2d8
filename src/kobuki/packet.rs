// Kobuki serial framing
//
// Frame: [0xAA, 0x55, Length, Payload..., Checksum]
//
// The checksum is the XOR of length and payload, so XOR over everything from
// the length byte through the checksum is zero. Feedback frames carry
// `Length` payload bytes (3 + length + 1 bytes in total).

/// Frame header bytes
pub const HEADER: [u8; 2] = [0xAA, 0x55];

/// Command ids
pub const CMD_MOVE: u8 = 0x01;
pub const CMD_STATUS: u8 = 0x10;

/// Fixed frames the base firmware expects byte for byte. Sent verbatim; they
/// do not follow the XOR rule.
pub const MOTOR_ENABLE_FRAME: [u8; 5] = [0xAA, 0x55, 0x02, 0x03, 0xFA];
pub const RESET_FRAME: [u8; 5] = [0xAA, 0x55, 0x02, 0x0B, 0xF2];
pub const BUTTON_FRAME: [u8; 5] = [0xAA, 0x55, 0x02, 0x01, 0xFE];

/// Minimum decodable size: header(2) + length(1) + checksum(1)
const MIN_FRAME: usize = 4;

/// Longest payload the base sends: the 17-byte sensor block plus room for
/// optional sub-payloads. A larger length byte means the header was noise.
pub const MAX_PAYLOAD_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame does not start with 0xAA 0x55")]
    BadHeader,

    #[error("Frame checksum mismatch")]
    ChecksumMismatch,

    #[error("Frame is incomplete")]
    Incomplete,

    #[error("Frame length {length} exceeds {}", MAX_PAYLOAD_LEN)]
    Oversized { length: u8 },
}

/// XOR of all bytes
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Velocity command: speed in mm/s, turn in deg/s (both little-endian)
pub fn encode_move(speed: i16, turn: i16) -> [u8; 9] {
    let [s_lo, s_hi] = speed.to_le_bytes();
    let [t_lo, t_hi] = turn.to_le_bytes();
    let mut frame = [0xAA, 0x55, 0x06, CMD_MOVE, s_lo, s_hi, t_lo, t_hi, 0];
    frame[8] = checksum(&frame[2..8]);
    frame
}

/// Ask the base for a sensor frame
pub fn encode_status_request() -> [u8; 5] {
    let mut frame = [0xAA, 0x55, 0x03, CMD_STATUS, 0];
    frame[4] = checksum(&frame[2..4]);
    frame
}

/// A checksum-validated frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub length: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Speed and turn of a move command frame
    pub fn as_move(&self) -> Option<(i16, i16)> {
        match self.payload.as_slice() {
            [CMD_MOVE, s_lo, s_hi, t_lo, t_hi] => Some((
                i16::from_le_bytes([*s_lo, *s_hi]),
                i16::from_le_bytes([*t_lo, *t_hi]),
            )),
            _ => None,
        }
    }
}

/// Decode one complete frame. `buf` must hold exactly one frame.
pub fn decode(buf: &[u8]) -> Result<Packet, FrameError> {
    if buf.len() < MIN_FRAME {
        return Err(FrameError::Incomplete);
    }
    if buf[..2] != HEADER {
        return Err(FrameError::BadHeader);
    }
    if checksum(&buf[2..]) != 0 {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(Packet {
        length: buf[2],
        payload: buf[3..buf.len() - 1].to_vec(),
    })
}

/// Reassembles frames from arbitrary read chunks
#[derive(Debug, Default)]
pub struct FrameScanner {
    buf: Vec<u8>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next frame in the buffer, `None` until one is complete.
    /// A corrupt or oversized frame is reported once and scanning resumes
    /// after its header.
    pub fn next_frame(&mut self) -> Option<Result<Packet, FrameError>> {
        match self.buf.windows(2).position(|w| w == HEADER) {
            Some(start) => {
                self.buf.drain(..start);
            }
            None => {
                // Keep a trailing 0xAA, it may be the first half of a header
                let keep = usize::from(self.buf.last() == Some(&HEADER[0]));
                let drop = self.buf.len() - keep;
                self.buf.drain(..drop);
                return None;
            }
        }

        let length = *self.buf.get(2)?;
        if length as usize > MAX_PAYLOAD_LEN {
            self.buf.drain(..HEADER.len());
            return Some(Err(FrameError::Oversized { length }));
        }

        let frame_len = 3 + length as usize + 1;
        if self.buf.len() < frame_len {
            return None;
        }

        let result = decode(&self.buf[..frame_len]);
        let consumed = if result.is_ok() { frame_len } else { HEADER.len() };
        self.buf.drain(..consumed);
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feedback-style frame: length counts the payload bytes
    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
        out.push(checksum(&out[2..]));
        out
    }

    #[test]
    fn test_encode_move_bytes() {
        assert_eq!(
            encode_move(200, 0),
            [0xAA, 0x55, 0x06, 0x01, 0xC8, 0x00, 0x00, 0x00, 0xCF]
        );
        let frame = encode_move(-100, 45);
        assert_eq!(&frame[4..8], &[0x9C, 0xFF, 0x2D, 0x00]);
        assert_eq!(checksum(&frame[2..]), 0);
    }

    #[test]
    fn test_encode_status_request_bytes() {
        assert_eq!(encode_status_request(), [0xAA, 0x55, 0x03, 0x10, 0x13]);
    }

    #[test]
    fn test_decode_move_frame() {
        let packet = decode(&encode_move(-300, 90)).unwrap();
        assert_eq!(packet.length, 6);
        assert_eq!(packet.payload.len(), 5);
        assert_eq!(packet.as_move(), Some((-300, 90)));

        let status = decode(&encode_status_request()).unwrap();
        assert_eq!(status.payload, vec![CMD_STATUS]);
        assert_eq!(status.as_move(), None);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[0xAA, 0x55, 0x00]), Err(FrameError::Incomplete));
        assert_eq!(
            decode(&[0xAB, 0x55, 0x01, 0x05, 0x04]),
            Err(FrameError::BadHeader)
        );

        let mut corrupt = encode_move(200, 0);
        corrupt[5] ^= 0x01;
        assert_eq!(decode(&corrupt), Err(FrameError::ChecksumMismatch));
    }

    #[test]
    fn test_move_frames_across_speed_range() {
        let speeds = (i16::MIN..=i16::MAX)
            .step_by(257)
            .chain([i16::MIN, -1, 0, 1, i16::MAX]);
        let turns = [i16::MIN, -1, 0, 1, i16::MAX];

        for speed in speeds {
            for turn in turns {
                let frame = encode_move(speed, turn);
                let packet = decode(&frame).unwrap();
                assert_eq!(packet.as_move(), Some((speed, turn)));

                // Any single bit error after the header breaks the checksum
                for byte in 2..frame.len() {
                    for bit in 0..8 {
                        let mut corrupt = frame;
                        corrupt[byte] ^= 1 << bit;
                        assert_eq!(
                            decode(&corrupt),
                            Err(FrameError::ChecksumMismatch),
                            "speed {} turn {} byte {} bit {}",
                            speed,
                            turn,
                            byte,
                            bit
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_scanner_skips_leading_noise() {
        let mut scanner = FrameScanner::new();
        let mut bytes = vec![0x00, 0x13, 0x55, 0xAA];
        bytes.extend(frame(&[1, 2, 3, 4]));
        scanner.push(&bytes);

        let packet = scanner.next_frame().unwrap().unwrap();
        assert_eq!(packet.payload, vec![1, 2, 3, 4]);
        assert!(scanner.next_frame().is_none());
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_scanner_waits_for_split_frame() {
        let bytes = frame(&[9, 8, 7, 6, 5, 4]);
        let mut scanner = FrameScanner::new();

        for (i, byte) in bytes.iter().enumerate() {
            scanner.push(&[*byte]);
            let next = scanner.next_frame();
            if i + 1 < bytes.len() {
                assert!(next.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(next.unwrap().unwrap().payload, vec![9, 8, 7, 6, 5, 4]);
            }
        }
    }

    #[test]
    fn test_scanner_recovers_after_corrupt_frame() {
        let mut bad = frame(&[1, 2, 3, 4]);
        bad[4] ^= 0xFF;
        let good = frame(&[0x10, 0x20, 0x30, 0x40]);

        let mut scanner = FrameScanner::new();
        scanner.push(&bad);
        scanner.push(&good);

        assert_eq!(
            scanner.next_frame(),
            Some(Err(FrameError::ChecksumMismatch))
        );
        let packet = scanner.next_frame().unwrap().unwrap();
        assert_eq!(packet.payload, vec![0x10, 0x20, 0x30, 0x40]);
    }

    #[test]
    fn test_scanner_rejects_oversized_length() {
        let mut scanner = FrameScanner::new();
        scanner.push(&[0xAA, 0x55, 0xFF]);
        scanner.push(&frame(&[1, 2, 3, 4]));

        assert_eq!(
            scanner.next_frame(),
            Some(Err(FrameError::Oversized { length: 0xFF }))
        );
        assert_eq!(scanner.next_frame().unwrap().unwrap().payload, vec![1, 2, 3, 4]);
        assert_eq!(scanner.buffered(), 0);
    }

    #[test]
    fn test_scanner_accepts_longest_payload() {
        let payload = vec![0x11; MAX_PAYLOAD_LEN];
        let mut scanner = FrameScanner::new();
        scanner.push(&frame(&payload));
        assert_eq!(scanner.next_frame().unwrap().unwrap().payload, payload);
    }

    #[test]
    fn test_scanner_drops_noise_keeps_half_header() {
        let mut scanner = FrameScanner::new();
        scanner.push(&[0x01, 0x02, 0x03, 0xAA]);
        assert!(scanner.next_frame().is_none());
        assert_eq!(scanner.buffered(), 1);

        let rest = &frame(&[7, 7, 7, 7])[1..];
        scanner.push(rest);
        assert_eq!(scanner.next_frame().unwrap().unwrap().payload, vec![7, 7, 7, 7]);
    }
}
