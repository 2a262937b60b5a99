//! Payload marker detection
//!
//! Everything the bridge prints before the marker is diagnostic text and is
//! passed straight through to the operator's terminal.

use log::debug;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::channel::{read_one, ByteRead};
use crate::capture::error::{AcquisitionError, Result};

/// Byte that separates debug text from the binary image plane
pub const FRAME_MARKER: u8 = b'\t';

/// Scans the channel for the payload marker, echoing debug text
pub struct FrameReader<'a, R: ?Sized> {
    channel: &'a mut R,
    running: Option<Arc<AtomicBool>>,
}

impl<'a, R: Read + ?Sized> FrameReader<'a, R> {
    pub fn new(channel: &'a mut R) -> Self {
        Self {
            channel,
            running: None,
        }
    }

    /// Abort the wait once `running` is cleared
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Block until the marker arrives.
    ///
    /// Debug bytes are written to `echo` one at a time as they arrive.
    /// Returns how many debug bytes preceded the marker.
    pub fn wait_for_marker<W: Write + ?Sized>(&mut self, echo: &mut W) -> Result<usize> {
        let mut debug_bytes = 0usize;

        loop {
            if let Some(ref running) = self.running {
                if !running.load(Ordering::SeqCst) {
                    return Err(AcquisitionError::Interrupted);
                }
            }

            match read_one(&mut *self.channel)? {
                ByteRead::Byte(FRAME_MARKER) => {
                    debug!("Payload marker after {} debug bytes", debug_bytes);
                    return Ok(debug_bytes);
                }
                ByteRead::Byte(b) if b.is_ascii() => {
                    echo.write_all(&[b])?;
                    echo.flush()?;
                    debug_bytes += 1;
                }
                ByteRead::Byte(b) => return Err(AcquisitionError::Decode(b)),
                ByteRead::TimedOut => continue,
                ByteRead::Closed => return Err(AcquisitionError::ChannelClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::error::FailureKind;
    use crate::protocol::channel::tests::ScriptedChannel;
    use std::io::Cursor;

    #[test]
    fn test_echoes_debug_text_until_marker() {
        let mut channel = Cursor::new(b"Found fingerprint sensor!\r\n\tPAYLOAD".to_vec());
        let mut echo = Vec::new();

        let count = FrameReader::new(&mut channel)
            .wait_for_marker(&mut echo)
            .unwrap();

        assert_eq!(echo, b"Found fingerprint sensor!\r\n");
        assert_eq!(count, echo.len());
        // The marker is consumed, the payload is not
        assert_eq!(channel.position() as usize, echo.len() + 1);
    }

    #[test]
    fn test_marker_first() {
        let mut channel = Cursor::new(vec![FRAME_MARKER, 1, 2]);
        let mut echo = Vec::new();
        let count = FrameReader::new(&mut channel)
            .wait_for_marker(&mut echo)
            .unwrap();
        assert_eq!(count, 0);
        assert!(echo.is_empty());
    }

    #[test]
    fn test_keeps_polling_through_timeouts() {
        let mut channel = ScriptedChannel::new([None, Some(b'o'), None, None, Some(b'k'), Some(b'\t')]);
        let mut echo = Vec::new();
        FrameReader::new(&mut channel)
            .wait_for_marker(&mut echo)
            .unwrap();
        assert_eq!(echo, b"ok");
    }

    #[test]
    fn test_closed_before_marker() {
        let mut channel = Cursor::new(b"boot ok".to_vec());
        let mut echo = Vec::new();
        let err = FrameReader::new(&mut channel)
            .wait_for_marker(&mut echo)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::ChannelClosed));
        assert_eq!(echo, b"boot ok");
    }

    #[test]
    fn test_non_ascii_debug_byte_is_a_fault() {
        let mut channel = Cursor::new(vec![b'a', 0xC3, b'\t']);
        let mut echo = Vec::new();
        let err = FrameReader::new(&mut channel)
            .wait_for_marker(&mut echo)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Decode(0xC3)));
        assert_eq!(err.kind(), FailureKind::GenericFault);
    }

    #[test]
    fn test_cleared_running_flag_interrupts() {
        let running = Arc::new(AtomicBool::new(false));
        let mut channel = Cursor::new(b"x\t".to_vec());
        let mut echo = Vec::new();
        let err = FrameReader::new(&mut channel)
            .with_running_flag(running)
            .wait_for_marker(&mut echo)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::Interrupted));
    }
}
