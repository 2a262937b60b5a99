//! Single-byte reads over a timeout-bounded byte channel
//!
//! Any `Read` implementation can act as the channel. A serial port reports
//! an elapsed read timeout as `ErrorKind::TimedOut`; in-memory streams
//! report exhaustion as a zero-length read. Both mean "nothing arrived".

use std::io::{self, ErrorKind, Read};

/// Result of asking the channel for one byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRead {
    /// A byte arrived within the timeout window
    Byte(u8),
    /// The timeout elapsed with nothing received
    TimedOut,
    /// The channel reported end of stream
    Closed,
}

/// Read exactly zero or one byte from the channel
pub fn read_one<R: Read + ?Sized>(channel: &mut R) -> io::Result<ByteRead> {
    let mut byte = [0u8; 1];

    loop {
        match channel.read(&mut byte) {
            Ok(0) => return Ok(ByteRead::Closed),
            Ok(_) => return Ok(ByteRead::Byte(byte[0])),
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return Ok(ByteRead::TimedOut)
            }
            Err(e) => return Err(e),
        }
    }
}
