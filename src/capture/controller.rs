//! Acquisition state machine
//!
//! One `run` call is one capture attempt:
//!
//! ```text
//! Idle -> PortOpening -> AwaitingMarker -> ReceivingPayload
//!      -> Assembling -> Encoding -> Done
//! ```
//!
//! Any step may end in `Failed`. The output file and the serial channel are
//! owned by the `acquire` frame, so both are closed on every exit path.

use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::error::{AcquisitionError, Result};
use crate::image::{upscale, BitmapEncoder, Canvas, ImageGeometry, BACKGROUND};
use crate::protocol::{drain_trailer, FrameReader, PayloadReceiver, DRAIN_LIMIT, DRAIN_WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    PortOpening,
    AwaitingMarker,
    ReceivingPayload,
    Assembling,
    Encoding,
    Done,
    Failed,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "idle"),
            AcquisitionState::PortOpening => write!(f, "opening port"),
            AcquisitionState::AwaitingMarker => write!(f, "awaiting payload marker"),
            AcquisitionState::ReceivingPayload => write!(f, "receiving payload"),
            AcquisitionState::Assembling => write!(f, "assembling image"),
            AcquisitionState::Encoding => write!(f, "encoding bitmap"),
            AcquisitionState::Done => write!(f, "done"),
            AcquisitionState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a successful capture
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Where the bitmap was written
    pub path: PathBuf,
    /// Debug characters echoed before the payload marker
    pub debug_bytes: usize,
    /// Text the device sent after the payload
    pub trailer: String,
    /// Size of the written file
    pub file_len: usize,
}

/// Runs captures one at a time; each `run` starts fresh from `Idle`
pub struct AcquisitionController {
    geometry: ImageGeometry,
    background: u8,
    drain_limit: usize,
    drain_window: Duration,
    running: Arc<AtomicBool>,
    state: AcquisitionState,
}

impl AcquisitionController {
    pub fn new(geometry: ImageGeometry) -> Self {
        Self {
            geometry,
            background: BACKGROUND,
            drain_limit: DRAIN_LIMIT,
            drain_window: DRAIN_WINDOW,
            running: Arc::new(AtomicBool::new(true)),
            state: AcquisitionState::Idle,
        }
    }

    /// Set the fill value for canvas pixels outside the upscaled plane
    pub fn with_background(mut self, background: u8) -> Self {
        self.background = background;
        self
    }

    /// Set how many trailing bytes are read after the payload
    pub fn with_drain_limit(mut self, drain_limit: usize) -> Self {
        self.drain_limit = drain_limit;
        self
    }

    /// Set how long trailing bytes are read after the payload
    pub fn with_drain_window(mut self, drain_window: Duration) -> Self {
        self.drain_window = drain_window;
        self
    }

    /// Share a flag that aborts the capture when cleared (Ctrl+C)
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Perform one capture.
    ///
    /// `open` connects to the device; its failure is reported as
    /// `InvalidPortSettings`. Debug text from the device is echoed to
    /// `console` as it arrives.
    pub fn run<C, F, W>(&mut self, open: F, output: &Path, console: &mut W) -> Result<CaptureReport>
    where
        C: Read,
        F: FnOnce() -> anyhow::Result<C>,
        W: Write + ?Sized,
    {
        self.state = AcquisitionState::Idle;

        match self.acquire(open, output, console) {
            Ok(report) => {
                self.transition(AcquisitionState::Done);
                Ok(report)
            }
            Err(e) => {
                warn!("Acquisition failed while {}: {}", self.state, e);
                self.transition(AcquisitionState::Failed);
                Err(e)
            }
        }
    }

    fn acquire<C, F, W>(&mut self, open: F, output: &Path, console: &mut W) -> Result<CaptureReport>
    where
        C: Read,
        F: FnOnce() -> anyhow::Result<C>,
        W: Write + ?Sized,
    {
        let geometry = self.geometry;
        geometry.validate()?;

        let encoder = BitmapEncoder {
            width: geometry.target_width,
            height: geometry.target_height,
            depth: geometry.depth,
            color_table: true,
        };
        let file_len = encoder.file_len()?;

        // Header and palette do not depend on the image, write them first
        let mut file = BufWriter::new(File::create(output)?);
        encoder.write_prelude(&mut file)?;

        self.transition(AcquisitionState::PortOpening);
        let mut channel = open().map_err(|e| AcquisitionError::InvalidPortSettings(format!("{:#}", e)))?;

        self.transition(AcquisitionState::AwaitingMarker);
        let debug_bytes = FrameReader::new(&mut channel)
            .with_running_flag(Arc::clone(&self.running))
            .wait_for_marker(console)?;

        self.transition(AcquisitionState::ReceivingPayload);
        debug!("Expecting {} payload bytes", geometry.payload_len());
        let payload = PayloadReceiver::new(&mut channel)
            .with_running_flag(Arc::clone(&self.running))
            .receive(geometry.source_width, geometry.source_height)?;

        self.transition(AcquisitionState::Assembling);
        let mut canvas = Canvas::filled(geometry.target_width, geometry.target_height, self.background);
        upscale(&payload, &mut canvas)?;

        self.transition(AcquisitionState::Encoding);
        encoder.write_body(&mut file, &canvas)?;
        file.flush()?;
        drop(file);
        info!("Image saved as {}", output.display());

        let trailer = drain_trailer(&mut channel, self.drain_limit, self.drain_window);
        drop(channel);

        Ok(CaptureReport {
            path: output.to_path_buf(),
            debug_bytes,
            trailer,
            file_len,
        })
    }

    fn transition(&mut self, next: AcquisitionState) {
        debug!("Acquisition: {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::error::FailureKind;
    use crate::image::bitmap::read_bitmap;
    use crate::image::BitmapInfo;
    use crate::protocol::channel::tests::ScriptedChannel;
    use std::io::{self, Cursor};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    /// Wraps a channel and records when it is dropped
    struct TrackedChannel<R> {
        inner: R,
        closed: Arc<AtomicBool>,
    }

    impl<R: Read> Read for TrackedChannel<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl<R> Drop for TrackedChannel<R> {
        fn drop(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn tracked<R: Read>(inner: R) -> (TrackedChannel<R>, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (
            TrackedChannel {
                inner,
                closed: Arc::clone(&closed),
            },
            closed,
        )
    }

    fn device_stream(payload: &[u8], trailer: &[u8]) -> Cursor<Vec<u8>> {
        let mut stream = b"boot ok\t".to_vec();
        stream.extend_from_slice(payload);
        stream.extend_from_slice(trailer);
        Cursor::new(stream)
    }

    #[test]
    fn test_end_to_end_uniform_capture() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("uniform.bmp");
        let (channel, closed) = tracked(device_stream(&[10u8; 19200], b"Done.\r\n"));
        let mut console = Vec::new();

        let mut controller = AcquisitionController::new(ImageGeometry::GT5X);
        let report = controller
            .run(move || Ok(channel), &output, &mut console)
            .unwrap();

        assert_eq!(controller.state(), AcquisitionState::Done);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(console, b"boot ok");
        assert_eq!(report.debug_bytes, 7);
        assert_eq!(report.trailer, "Done.\r\n");

        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), 54 + 1024 + 320 * 240);
        assert_eq!(report.file_len, bytes.len());

        let info = BitmapInfo::parse(&bytes).unwrap();
        assert_eq!(info.file_size as usize, bytes.len());
        assert_eq!(info.pixel_offset, 1078);
        assert_eq!(info.header_size, 40);
        assert_eq!(info.width, 320);
        assert_eq!(info.height, -240);
        assert_eq!(info.planes, 1);
        assert_eq!(info.depth, 8);
        assert_eq!(info.image_size, 76800);
        assert!(bytes[1078..].iter().all(|&b| b == 10));
    }

    #[test]
    fn test_capture_round_trips_through_reader() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("gradient.bmp");
        let payload: Vec<u8> = (0..19200u32).map(|i| (i % 251) as u8).collect();
        let channel = device_stream(&payload, b"");
        let mut console = Vec::new();

        AcquisitionController::new(ImageGeometry::GT5X)
            .run(move || Ok(channel), &output, &mut console)
            .unwrap();

        let decoded = read_bitmap(&std::fs::read(&output).unwrap()).unwrap();
        for row in 0..240 {
            for col in 0..320 {
                let source = payload[(row / 2) * 160 + col / 2];
                assert_eq!(decoded.pixels[row * 320 + col], source);
            }
        }
    }

    #[test]
    fn test_background_fills_uncovered_area() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("small.bmp");
        let geometry = ImageGeometry {
            source_width: 1,
            source_height: 1,
            target_width: 4,
            target_height: 3,
            depth: 8,
        };
        let channel = Cursor::new(b"\t\x05".to_vec());
        let mut console = Vec::new();

        AcquisitionController::new(geometry)
            .run(move || Ok(channel), &output, &mut console)
            .unwrap();

        let decoded = read_bitmap(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(
            decoded.pixels,
            vec![5, 5, BACKGROUND, BACKGROUND, 5, 5, BACKGROUND, BACKGROUND, BACKGROUND, BACKGROUND, BACKGROUND, BACKGROUND]
        );
    }

    #[test]
    fn test_open_failure_is_invalid_port_settings() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("noport.bmp");
        let mut console = Vec::new();
        let mut controller = AcquisitionController::new(ImageGeometry::GT5X);

        let err = controller
            .run(
                || -> anyhow::Result<Cursor<Vec<u8>>> { Err(anyhow::anyhow!("No such file or directory")) },
                &output,
                &mut console,
            )
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::InvalidPortSettings);
        assert_eq!(controller.state(), AcquisitionState::Failed);
        // Header and palette were already flushed out when the file closed
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 1078);
    }

    #[test]
    fn test_stalled_payload_fails_with_timeout() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("stall.bmp");
        let mut steps: Vec<Option<u8>> = b"waiting\t".iter().map(|&b| Some(b)).collect();
        steps.extend(std::iter::repeat(Some(10)).take(19199));
        steps.push(None);
        let (channel, closed) = tracked(ScriptedChannel::new(steps));
        let mut console = Vec::new();

        let mut controller = AcquisitionController::new(ImageGeometry::GT5X);
        let err = controller
            .run(move || Ok(channel), &output, &mut console)
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Timeout);
        assert_eq!(controller.state(), AcquisitionState::Failed);
        assert!(closed.load(Ordering::SeqCst));
        // Partial payload never reaches the file
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 1078);
    }

    #[test]
    fn test_closed_channel_is_generic_fault() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("closed.bmp");
        let (channel, closed) = tracked(Cursor::new(b"Found fingerprint sensor!".to_vec()));
        let mut console = Vec::new();

        let err = AcquisitionController::new(ImageGeometry::GT5X)
            .run(move || Ok(channel), &output, &mut console)
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::ChannelClosed));
        assert_eq!(err.kind(), FailureKind::GenericFault);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cleared_running_flag_aborts() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("interrupted.bmp");
        let (channel, closed) = tracked(device_stream(&[0u8; 19200], b""));
        let running = Arc::new(AtomicBool::new(false));
        let mut console = Vec::new();

        let err = AcquisitionController::new(ImageGeometry::GT5X)
            .with_running_flag(running)
            .run(move || Ok(channel), &output, &mut console)
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::Interrupted));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_bad_geometry_fails_before_io() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("never.bmp");
        let geometry = ImageGeometry {
            target_width: 160,
            ..ImageGeometry::GT5X
        };
        let mut console = Vec::new();
        let mut opened = false;

        let err = AcquisitionController::new(geometry)
            .run(
                || {
                    opened = true;
                    Ok(Cursor::new(Vec::new()))
                },
                &output,
                &mut console,
            )
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::Geometry(_)));
        assert!(!opened);
        assert!(!output.exists());
    }

    #[test]
    fn test_controller_is_reusable() {
        let dir = tempdir().unwrap();
        let mut controller = AcquisitionController::new(ImageGeometry::GT5X);
        let mut console = Vec::new();

        let first = dir.path().join("first.bmp");
        controller
            .run(|| Ok(Cursor::new(b"\t".to_vec())), &first, &mut console)
            .unwrap_err();
        assert_eq!(controller.state(), AcquisitionState::Failed);

        let second = dir.path().join("second.bmp");
        let channel = device_stream(&[7u8; 19200], b"");
        controller.run(move || Ok(channel), &second, &mut console).unwrap();
        assert_eq!(controller.state(), AcquisitionState::Done);

        let a = std::fs::read(&second).unwrap();
        let channel = device_stream(&[7u8; 19200], b"");
        controller.run(move || Ok(channel), &first, &mut console).unwrap();
        assert_eq!(a, std::fs::read(&first).unwrap());
    }

    #[test]
    fn test_zero_drain_window_skips_trailer() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("quiet.bmp");
        let channel = device_stream(&[3u8; 19200], b"Done.\r\n");
        let mut console = Vec::new();

        let report = AcquisitionController::new(ImageGeometry::GT5X)
            .with_drain_window(Duration::ZERO)
            .run(move || Ok(channel), &output, &mut console)
            .unwrap();

        assert_eq!(report.trailer, "");
        assert_eq!(report.file_len, 54 + 1024 + 320 * 240);
    }
}
