//! Serial framing for the sensor bridge stream
//!
//! The bridge sketch prints free-form ASCII status text, then a single tab
//! byte, then the raw image plane, then a little more text. This module
//! splits that stream apart:
//! - `frame`: echo debug text until the payload marker arrives
//! - `payload`: read the fixed-size image plane with a per-byte timeout
//! - `trailer`: best-effort drain of whatever the device prints afterwards
//!
//! `gt5x` holds the packet codec for talking to the sensor directly.

pub mod channel;
pub mod frame;
pub mod gt5x;
pub mod payload;
pub mod trailer;

pub use frame::{FrameReader, FRAME_MARKER};
pub use gt5x::{DeviceInfo, Nack, SensorError, SensorLink};
pub use payload::PayloadReceiver;
pub use trailer::{drain_trailer, DRAIN_LIMIT, DRAIN_WINDOW};
