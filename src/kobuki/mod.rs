// Kobuki mobile base
//
// Provides:
// - Serial framing (XOR checksum, frame reassembly)
// - Sensor / motion-echo feedback decoding
// - Command writer and feedback reader

mod controller;
pub mod packet;
pub mod sensors;

pub use controller::{BaseController, BaseError, BaseReader, READ_TIMEOUT, UNLOCK_PAUSE, open};
pub use packet::{FrameError, FrameScanner, Packet, decode, encode_move, encode_status_request};
pub use sensors::{ChargerState, Feedback, Hazards, SensorError, SensorSnapshot};
