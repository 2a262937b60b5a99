//! Acquisition failure types

use std::io;
use thiserror::Error;

use crate::image::{BitmapError, GeometryError};

/// Coarse failure classes reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The serial channel could not be opened
    InvalidPortSettings,
    /// A payload byte did not arrive within the read timeout
    Timeout,
    /// Anything else during receive, assemble or encode
    GenericFault,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::InvalidPortSettings => write!(f, "invalid port settings"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::GenericFault => write!(f, "fault"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("Failed to open serial channel: {0}")]
    InvalidPortSettings(String),

    #[error("Payload stalled after {received} of {expected} bytes")]
    Timeout { received: usize, expected: usize },

    #[error("Serial channel closed before the payload marker")]
    ChannelClosed,

    #[error("Non-ASCII byte 0x{0:02x} in debug output")]
    Decode(u8),

    #[error("Acquisition interrupted")]
    Interrupted,

    #[error("Invalid image geometry: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Bitmap encoding failed: {0}")]
    Bitmap(#[from] BitmapError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AcquisitionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AcquisitionError::InvalidPortSettings(_) => FailureKind::InvalidPortSettings,
            AcquisitionError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::GenericFault,
        }
    }
}

pub type Result<T> = std::result::Result<T, AcquisitionError>;
