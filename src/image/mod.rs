//! Image reconstruction and bitmap encoding
//!
//! Provides utilities for turning the raw sensor plane into a file:
//! - `geometry`: source/target dimensions and their validation
//! - `canvas`: sample buffers and 2x block-replication upscaling
//! - `bitmap`: indexed-colour BMP writer and reader

pub mod bitmap;
pub mod canvas;
pub mod geometry;

pub use bitmap::{BitmapEncoder, BitmapError, BitmapInfo};
pub use canvas::{upscale, Canvas, RawPayload};
pub use geometry::{GeometryError, ImageGeometry, BACKGROUND};
