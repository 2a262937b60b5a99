//! Fixed-size image plane reception
//!
//! Each byte gets its own read timeout. The first empty read aborts the
//! whole plane; nothing received so far is kept.

use log::{debug, warn};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::channel::{read_one, ByteRead};
use crate::capture::error::{AcquisitionError, Result};
use crate::image::RawPayload;

/// Reads a `width * height` sample plane from the channel
pub struct PayloadReceiver<'a, R: ?Sized> {
    channel: &'a mut R,
    running: Option<Arc<AtomicBool>>,
}

impl<'a, R: Read + ?Sized> PayloadReceiver<'a, R> {
    pub fn new(channel: &'a mut R) -> Self {
        Self {
            channel,
            running: None,
        }
    }

    /// Abort reception once `running` is cleared
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Receive exactly `width * height` bytes in arrival order
    pub fn receive(&mut self, width: usize, height: usize) -> Result<RawPayload> {
        let expected = width * height;
        let mut samples = Vec::with_capacity(expected);

        while samples.len() < expected {
            if let Some(ref running) = self.running {
                if !running.load(Ordering::SeqCst) {
                    return Err(AcquisitionError::Interrupted);
                }
            }

            match read_one(&mut *self.channel)? {
                ByteRead::Byte(b) => samples.push(b),
                empty => {
                    warn!(
                        "No payload byte within timeout ({:?}) after {} of {} bytes",
                        empty,
                        samples.len(),
                        expected
                    );
                    return Err(AcquisitionError::Timeout {
                        received: samples.len(),
                        expected,
                    });
                }
            }
        }

        debug!("Received {} payload bytes", expected);
        Ok(RawPayload::new(width, height, samples)?)
    }
}
