//! Trailing text after the payload
//!
//! The bridge usually prints a short status line once the image has been
//! sent. Reading it is best effort: read errors and non-ASCII bytes are
//! dropped silently. Both the byte count and the wall-clock time spent are
//! bounded, so a device that keeps trickling bytes cannot stall the capture.

use log::debug;
use std::io::Read;
use std::time::{Duration, Instant};

use super::channel::{read_one, ByteRead};

/// Upper bound on trailing bytes read after a capture
pub const DRAIN_LIMIT: usize = 100;

/// Upper bound on time spent reading trailing bytes
pub const DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Read up to `limit` bytes within `window`, stopping at the first empty
/// read or error
pub fn drain_trailer<R: Read + ?Sized>(channel: &mut R, limit: usize, window: Duration) -> String {
    let mut text = String::new();
    let deadline = Instant::now() + window;

    for _ in 0..limit {
        if Instant::now() >= deadline {
            debug!("Trailer window elapsed after {} bytes", text.len());
            break;
        }

        match read_one(&mut *channel) {
            Ok(ByteRead::Byte(b)) if b.is_ascii() => text.push(b as char),
            Ok(ByteRead::Byte(_)) => {}
            Ok(_) | Err(_) => break,
        }
    }

    text
}
