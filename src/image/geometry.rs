//! Source and target image dimensions

use thiserror::Error;

/// Fill value for canvas positions not covered by the upscaled payload
pub const BACKGROUND: u8 = 66;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("source plane is empty ({width}x{height})")]
    EmptySource { width: usize, height: usize },

    #[error("target {target_width}x{target_height} cannot hold a 2x upscale of {source_width}x{source_height}")]
    TargetTooSmall {
        source_width: usize,
        source_height: usize,
        target_width: usize,
        target_height: usize,
    },

    #[error("payload holds {actual} samples, a {width}x{height} plane needs {expected}")]
    PayloadLength {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported bit depth {0} (only 8-bit indexed output is written)")]
    UnsupportedDepth(u16),
}

/// Dimensions of one acquisition: the sensor plane and the saved image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub source_width: usize,
    pub source_height: usize,
    pub target_width: usize,
    pub target_height: usize,
    pub depth: u16,
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self::GT5X
    }
}

impl ImageGeometry {
    /// GT-5x raw capture: 160x120 plane saved as 320x240 8-bit grayscale
    pub const GT5X: Self = Self {
        source_width: 160,
        source_height: 120,
        target_width: 320,
        target_height: 240,
        depth: 8,
    };

    /// Number of payload bytes the device sends
    pub fn payload_len(&self) -> usize {
        self.source_width * self.source_height
    }

    /// Number of samples in the saved image
    pub fn canvas_len(&self) -> usize {
        self.target_width * self.target_height
    }

    /// Check the configuration before any I/O happens
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.source_width == 0 || self.source_height == 0 {
            return Err(GeometryError::EmptySource {
                width: self.source_width,
                height: self.source_height,
            });
        }

        if self.target_width < 2 * self.source_width || self.target_height < 2 * self.source_height {
            return Err(GeometryError::TargetTooSmall {
                source_width: self.source_width,
                source_height: self.source_height,
                target_width: self.target_width,
                target_height: self.target_height,
            });
        }

        if self.depth != 8 {
            return Err(GeometryError::UnsupportedDepth(self.depth));
        }

        Ok(())
    }
}
