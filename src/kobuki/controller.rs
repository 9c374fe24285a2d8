// Kobuki base commands and feedback reader
//
// The serial port is split in two: `BaseController` owns the only writer and
// `BaseReader` owns the read side. Writes are fire-and-forget; the base never
// acknowledges a command.

use std::io::{ErrorKind, Read, Write};
use std::thread::sleep;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::packet::{
    BUTTON_FRAME, FrameScanner, MOTOR_ENABLE_FRAME, RESET_FRAME, encode_move, encode_status_request,
};
use super::sensors::Feedback;
use crate::config::BaseConfig;

/// Serial read timeout; a quiet line returns an empty poll after this long
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause between reset and motor enable when unlocking
pub const UNLOCK_PAUSE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BaseError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the base port, wait for it to settle and split it into writer and reader
pub fn open(
    config: &BaseConfig,
) -> Result<(BaseController<Box<dyn SerialPort>>, BaseReader<Box<dyn SerialPort>>), BaseError> {
    info!("Opening Kobuki base on {} at {} baud", config.port, config.baudrate);
    let port = serialport::new(&config.port, config.baudrate)
        .timeout(READ_TIMEOUT)
        .open()?;
    let reader = port.try_clone()?;

    sleep(config.settle());
    info!("Connected to Kobuki base");

    Ok((BaseController::new(port), BaseReader::new(reader)))
}

/// Command side of the base link
pub struct BaseController<W: Write> {
    writer: W,
}

impl<W: Write> BaseController<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), BaseError> {
        debug!("Sending frame: {:02X?}", frame);
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Drive at `speed` mm/s while turning at `turn` deg/s
    pub fn drive(&mut self, speed: i16, turn: i16) -> Result<(), BaseError> {
        debug!("Drive: speed={} mm/s, turn={} deg/s", speed, turn);
        self.send(&encode_move(speed, turn))
    }

    pub fn stop(&mut self) -> Result<(), BaseError> {
        self.drive(0, 0)
    }

    pub fn enable_motors(&mut self) -> Result<(), BaseError> {
        info!("Enabling base motors");
        self.send(&MOTOR_ENABLE_FRAME)
    }

    pub fn reset(&mut self) -> Result<(), BaseError> {
        info!("Resetting base");
        self.send(&RESET_FRAME)
    }

    pub fn request_status(&mut self) -> Result<(), BaseError> {
        self.send(&encode_status_request())
    }

    /// Pretend button B0 was pressed
    pub fn simulate_button_press(&mut self) -> Result<(), BaseError> {
        info!("Simulating B0 button press");
        self.send(&BUTTON_FRAME)
    }

    /// Reset, then re-enable the motors once the base has rebooted
    pub fn unlock(&mut self) -> Result<(), BaseError> {
        self.reset()?;
        sleep(UNLOCK_PAUSE);
        self.enable_motors()
    }

    /// Drive for a fixed time, then stop
    pub fn drive_for(&mut self, speed: i16, turn: i16, duration: Duration) -> Result<(), BaseError> {
        self.drive(speed, turn)?;
        sleep(duration);
        self.stop()
    }
}

impl<W: Write> Drop for BaseController<W> {
    fn drop(&mut self) {
        // Never leave the base driving
        if let Err(e) = self.stop() {
            warn!("Failed to stop base on drop: {}", e);
        }
    }
}

/// Feedback side of the base link
pub struct BaseReader<R: Read> {
    port: R,
    scanner: FrameScanner,
}

impl<R: Read> BaseReader<R> {
    pub fn new(port: R) -> Self {
        Self {
            port,
            scanner: FrameScanner::new(),
        }
    }

    /// Read whatever is available and return the feedback it completes.
    /// Corrupt frames are dropped.
    pub fn poll(&mut self) -> Result<Vec<Feedback>, BaseError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.port.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        self.scanner.push(&chunk[..n]);

        let mut feedback = Vec::new();
        while let Some(frame) = self.scanner.next_frame() {
            match frame {
                Ok(packet) => feedback.push(Feedback::from_payload(&packet.payload)),
                Err(e) => debug!("Dropping frame: {}", e),
            }
        }
        Ok(feedback)
    }
}
