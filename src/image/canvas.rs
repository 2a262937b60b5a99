//! Sample buffers and nearest-neighbour upscaling

use super::geometry::GeometryError;

/// Low-resolution plane exactly as received from the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    width: usize,
    height: usize,
    samples: Vec<u8>,
}

impl RawPayload {
    /// Wrap a row-major sample buffer; `samples.len()` must equal `width * height`
    pub fn new(width: usize, height: usize, samples: Vec<u8>) -> Result<Self, GeometryError> {
        let expected = width.checked_mul(height);
        if expected != Some(samples.len()) {
            return Err(GeometryError::PayloadLength {
                width,
                height,
                expected: expected.unwrap_or(usize::MAX),
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.samples[row * self.width + col]
    }
}

/// Full-resolution output image, one byte per pixel, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    /// Create a canvas with every pixel set to `background`
    pub fn filled(width: usize, height: usize, background: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![background; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.pixels[row * self.width + col]
    }

    fn set(&mut self, row: usize, col: usize, value: u8) {
        self.pixels[row * self.width + col] = value;
    }

    /// Iterate over pixel rows, top row first
    pub fn rows(&self) -> std::slice::ChunksExact<'_, u8> {
        self.pixels.chunks_exact(self.width)
    }
}

/// Replicate each payload sample into a 2x2 block of the canvas.
///
/// Sample (r, c) lands on (2r, 2c), (2r, 2c+1), (2r+1, 2c) and (2r+1, 2c+1).
/// Canvas pixels outside the doubled region keep their fill value.
pub fn upscale(payload: &RawPayload, canvas: &mut Canvas) -> Result<(), GeometryError> {
    if canvas.width < 2 * payload.width || canvas.height < 2 * payload.height {
        return Err(GeometryError::TargetTooSmall {
            source_width: payload.width,
            source_height: payload.height,
            target_width: canvas.width,
            target_height: canvas.height,
        });
    }

    for row in 0..payload.height {
        for col in 0..payload.width {
            let value = payload.get(row, col);
            canvas.set(2 * row, 2 * col, value);
            canvas.set(2 * row, 2 * col + 1, value);
            canvas.set(2 * row + 1, 2 * col, value);
            canvas.set(2 * row + 1, 2 * col + 1, value);
        }
    }

    Ok(())
}
