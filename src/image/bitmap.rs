//! Indexed-colour BMP encoding and decoding
//!
//! Output layout: 54-byte file + info header, optional grayscale palette,
//! then pixel rows padded to a 4-byte stride. The stored height is negative
//! so row 0 of the canvas is the top row of the picture.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use std::io::{self, Write};
use thiserror::Error;

use super::canvas::Canvas;

/// "BM" file signature
pub const SIGNATURE: [u8; 2] = *b"BM";

/// File header (14) + BITMAPINFOHEADER (40)
pub const HEADER_LEN: usize = 54;

/// Size of the info header as stored in the file
const INFO_HEADER_LEN: u32 = 40;

#[derive(Error, Debug)]
pub enum BitmapError {
    #[error("not a bitmap (signature {0:02x?})")]
    BadSignature([u8; 2]),

    #[error("bitmap truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("unsupported bit depth {0}")]
    UnsupportedDepth(u16),

    #[error("canvas is {width}x{height}, encoder expects {expected_width}x{expected_height}")]
    SizeMismatch {
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },

    #[error("bitmap dimensions {width}x{height} are empty or too large")]
    InvalidDimensions { width: u64, height: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Bytes per pixel row, padded to a 4-byte boundary.
///
/// `None` when `depth * width` does not fit in 32 bits.
pub fn byte_width(width: u32, depth: u16) -> Option<u32> {
    u32::from(depth)
        .checked_mul(width)
        .map(|bits| bits.div_ceil(32) * 4)
}

/// Size in bytes of the colour table, if one is written
pub fn palette_len(depth: u16, color_table: bool) -> u32 {
    if color_table && depth <= 8 {
        (1u32 << depth) * 4
    } else {
        0
    }
}

/// Pixel data offset and image size for the given dimensions
fn layout(width: u32, height: u32, depth: u16, color_table: bool) -> Result<(u32, u32), BitmapError> {
    if color_table && depth > 8 {
        return Err(BitmapError::UnsupportedDepth(depth));
    }

    let invalid = BitmapError::InvalidDimensions {
        width: u64::from(width),
        height: u64::from(height),
    };
    // Both fields are stored as i32
    if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err(invalid);
    }

    let offset = HEADER_LEN as u32 + palette_len(depth, color_table);
    let image_size = byte_width(width, depth)
        .and_then(|stride| stride.checked_mul(height))
        .filter(|size| size.checked_add(offset).is_some())
        .ok_or(invalid)?;

    Ok((offset, image_size))
}

/// Convert canvas dimensions to the 32-bit header range
fn header_dimensions(width: usize, height: usize) -> Result<(u32, u32), BitmapError> {
    match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) => Ok((w, h)),
        _ => Err(BitmapError::InvalidDimensions {
            width: width as u64,
            height: height as u64,
        }),
    }
}

/// Build the 54-byte file and info header.
///
/// All multi-byte fields are little-endian; reserved, compression and
/// colour-count fields stay zero. Fails for empty images and for sizes the
/// 32-bit header fields cannot describe.
pub fn assemble_header(
    width: u32,
    height: u32,
    depth: u16,
    color_table: bool,
) -> Result<[u8; HEADER_LEN], BitmapError> {
    let (offset, image_size) = layout(width, height, depth, color_table)?;
    let mut header = [0u8; HEADER_LEN];

    header[0..2].copy_from_slice(&SIGNATURE);
    LittleEndian::write_u32(&mut header[2..6], offset + image_size);
    LittleEndian::write_u32(&mut header[10..14], offset);
    LittleEndian::write_u32(&mut header[14..18], INFO_HEADER_LEN);
    LittleEndian::write_i32(&mut header[18..22], width as i32);
    // Negative height: rows are stored top-down
    LittleEndian::write_i32(&mut header[22..26], -(height as i32));
    LittleEndian::write_u16(&mut header[26..28], 1);
    LittleEndian::write_u16(&mut header[28..30], depth);
    LittleEndian::write_u32(&mut header[34..38], image_size);
    LittleEndian::write_u32(&mut header[38..42], 1);
    LittleEndian::write_u32(&mut header[42..46], 1);

    Ok(header)
}

/// Write the identity grayscale ramp: entry i is (i, i, i, 0)
pub fn write_palette<W: Write + ?Sized>(out: &mut W, depth: u16) -> Result<(), BitmapError> {
    if depth > 8 {
        return Err(BitmapError::UnsupportedDepth(depth));
    }

    let entries = 1usize << depth;
    let mut palette = Vec::with_capacity(entries * 4);
    for i in 0..entries {
        let level = i as u8;
        palette.extend_from_slice(&[level, level, level, 0]);
    }

    out.write_all(&palette)?;
    Ok(())
}

/// Write canvas rows top-down, one byte per pixel, zero-padded to the stride
pub fn write_pixels<W: Write + ?Sized>(
    out: &mut W,
    canvas: &Canvas,
    depth: u16,
) -> Result<(), BitmapError> {
    if depth != 8 {
        return Err(BitmapError::UnsupportedDepth(depth));
    }

    if canvas.width() == 0 || canvas.height() == 0 {
        return Err(BitmapError::InvalidDimensions {
            width: canvas.width() as u64,
            height: canvas.height() as u64,
        });
    }

    let (width, _) = header_dimensions(canvas.width(), canvas.height())?;
    let stride = byte_width(width, depth).ok_or(BitmapError::InvalidDimensions {
        width: canvas.width() as u64,
        height: canvas.height() as u64,
    })? as usize;
    let padding = vec![0u8; stride - canvas.width()];

    for row in canvas.rows() {
        out.write_all(row)?;
        out.write_all(&padding)?;
    }

    Ok(())
}

/// Serializes a canvas as a complete bitmap file
#[derive(Debug, Clone, Copy)]
pub struct BitmapEncoder {
    pub width: usize,
    pub height: usize,
    pub depth: u16,
    pub color_table: bool,
}

impl BitmapEncoder {
    /// 8-bit grayscale with palette
    pub fn grayscale(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            depth: 8,
            color_table: true,
        }
    }

    pub fn header(&self) -> Result<[u8; HEADER_LEN], BitmapError> {
        let (width, height) = header_dimensions(self.width, self.height)?;
        assemble_header(width, height, self.depth, self.color_table)
    }

    /// Total encoded size in bytes
    pub fn file_len(&self) -> Result<usize, BitmapError> {
        let (width, height) = header_dimensions(self.width, self.height)?;
        let (offset, image_size) = layout(width, height, self.depth, self.color_table)?;
        Ok(offset as usize + image_size as usize)
    }

    /// Header and palette; everything that does not depend on pixel data
    pub fn write_prelude<W: Write + ?Sized>(&self, out: &mut W) -> Result<(), BitmapError> {
        out.write_all(&self.header()?)?;
        if self.color_table {
            write_palette(out, self.depth)?;
        }
        Ok(())
    }

    /// Pixel rows for `canvas`, which must match the encoder dimensions
    pub fn write_body<W: Write + ?Sized>(&self, out: &mut W, canvas: &Canvas) -> Result<(), BitmapError> {
        if canvas.width() != self.width || canvas.height() != self.height {
            return Err(BitmapError::SizeMismatch {
                width: canvas.width(),
                height: canvas.height(),
                expected_width: self.width,
                expected_height: self.height,
            });
        }
        write_pixels(out, canvas, self.depth)
    }

    pub fn encode<W: Write + ?Sized>(&self, out: &mut W, canvas: &Canvas) -> Result<(), BitmapError> {
        self.write_prelude(out)?;
        self.write_body(out, canvas)?;
        debug!("Encoded {}x{} {}-bit bitmap", self.width, self.height, self.depth);
        Ok(())
    }

    pub fn encode_to_vec(&self, canvas: &Canvas) -> Result<Vec<u8>, BitmapError> {
        let mut buffer = Vec::with_capacity(self.file_len()?);
        self.encode(&mut buffer, canvas)?;
        Ok(buffer)
    }
}

/// Header fields read back from a bitmap file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapInfo {
    pub file_size: u32,
    pub pixel_offset: u32,
    pub header_size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub depth: u16,
    pub compression: u32,
    pub image_size: u32,
    pub x_resolution: u32,
    pub y_resolution: u32,
}

impl BitmapInfo {
    /// Parse the 54-byte header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, BitmapError> {
        if bytes.len() < HEADER_LEN {
            return Err(BitmapError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }

        if bytes[0..2] != SIGNATURE {
            return Err(BitmapError::BadSignature([bytes[0], bytes[1]]));
        }

        Ok(Self {
            file_size: LittleEndian::read_u32(&bytes[2..6]),
            pixel_offset: LittleEndian::read_u32(&bytes[10..14]),
            header_size: LittleEndian::read_u32(&bytes[14..18]),
            width: LittleEndian::read_i32(&bytes[18..22]),
            height: LittleEndian::read_i32(&bytes[22..26]),
            planes: LittleEndian::read_u16(&bytes[26..28]),
            depth: LittleEndian::read_u16(&bytes[28..30]),
            compression: LittleEndian::read_u32(&bytes[30..34]),
            image_size: LittleEndian::read_u32(&bytes[34..38]),
            x_resolution: LittleEndian::read_u32(&bytes[38..42]),
            y_resolution: LittleEndian::read_u32(&bytes[42..46]),
        })
    }

    /// Rows are stored top row first
    pub fn is_top_down(&self) -> bool {
        self.height < 0
    }

    pub fn pixel_width(&self) -> usize {
        self.width.unsigned_abs() as usize
    }

    pub fn pixel_height(&self) -> usize {
        self.height.unsigned_abs() as usize
    }

    /// Padded row length; fails when the declared width overflows it
    pub fn stride(&self) -> Result<usize, BitmapError> {
        byte_width(self.width.unsigned_abs(), self.depth)
            .map(|stride| stride as usize)
            .ok_or(BitmapError::InvalidDimensions {
                width: u64::from(self.width.unsigned_abs()),
                height: u64::from(self.height.unsigned_abs()),
            })
    }

    /// Bytes of pixel data the declared dimensions need
    pub fn expected_image_len(&self) -> Result<u64, BitmapError> {
        Ok(self.stride()? as u64 * u64::from(self.height.unsigned_abs()))
    }

    /// Number of palette entries between the header and the pixel data
    pub fn palette_entries(&self) -> usize {
        (self.pixel_offset as usize).saturating_sub(HEADER_LEN) / 4
    }

    /// Describe inconsistencies between header fields and the actual file length
    pub fn issues(&self, actual_len: usize) -> Vec<String> {
        let mut issues = Vec::new();

        if self.header_size != INFO_HEADER_LEN {
            issues.push(format!("info header size is {}, expected {}", self.header_size, INFO_HEADER_LEN));
        }
        if self.planes != 1 {
            issues.push(format!("plane count is {}, expected 1", self.planes));
        }
        if self.compression != 0 {
            issues.push(format!("compression type {} is not uncompressed", self.compression));
        }
        if self.width == 0 || self.height == 0 {
            issues.push(format!("image has no pixels ({}x{})", self.width, self.height));
        }
        match self.expected_image_len() {
            Ok(expected) if u64::from(self.image_size) != expected => issues.push(format!(
                "image size field is {}, rows need {}",
                self.image_size, expected
            )),
            Ok(_) => {}
            Err(e) => issues.push(e.to_string()),
        }
        if u64::from(self.file_size) != u64::from(self.pixel_offset) + u64::from(self.image_size) {
            issues.push(format!(
                "file size field {} != offset {} + image size {}",
                self.file_size, self.pixel_offset, self.image_size
            ));
        }
        if u64::from(self.file_size) != actual_len as u64 {
            issues.push(format!(
                "file size field is {}, file is {} bytes",
                self.file_size, actual_len
            ));
        }

        issues
    }
}

/// A decoded 8-bit bitmap with rows normalized to top-down order
#[derive(Debug, Clone)]
pub struct DecodedBitmap {
    pub info: BitmapInfo,
    pub palette: Vec<[u8; 4]>,
    pub pixels: Vec<u8>,
}

/// Decode an 8-bit indexed bitmap
pub fn read_bitmap(bytes: &[u8]) -> Result<DecodedBitmap, BitmapError> {
    let info = BitmapInfo::parse(bytes)?;
    if info.depth != 8 {
        return Err(BitmapError::UnsupportedDepth(info.depth));
    }

    let width = info.pixel_width();
    let height = info.pixel_height();
    let invalid = || BitmapError::InvalidDimensions {
        width: width as u64,
        height: height as u64,
    };
    if width == 0 || height == 0 {
        return Err(invalid());
    }

    let stride = info.stride()?;
    let offset = info.pixel_offset as usize;
    let needed = stride
        .checked_mul(height)
        .and_then(|len| len.checked_add(offset))
        .ok_or_else(invalid)?;
    if bytes.len() < needed {
        return Err(BitmapError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }

    let palette = bytes[HEADER_LEN..HEADER_LEN + info.palette_entries() * 4]
        .chunks_exact(4)
        .map(|e| [e[0], e[1], e[2], e[3]])
        .collect();

    let mut rows: Vec<&[u8]> = bytes[offset..needed]
        .chunks_exact(stride)
        .map(|row| &row[..width])
        .collect();
    if !info.is_top_down() {
        rows.reverse();
    }

    Ok(DecodedBitmap {
        info,
        palette,
        pixels: rows.concat(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::canvas::{upscale, RawPayload};
    use crate::image::geometry::BACKGROUND;

    #[test]
    fn test_gt5x_header_fields() {
        let header = assemble_header(320, 240, 8, true).unwrap();

        assert_eq!(header.len(), HEADER_LEN);
        assert_eq!(&header[0..2], b"BM");
        assert_eq!(LittleEndian::read_u32(&header[2..6]), 54 + 1024 + 76800);
        assert_eq!(LittleEndian::read_u32(&header[6..10]), 0);
        assert_eq!(LittleEndian::read_u32(&header[10..14]), 1078);
        assert_eq!(LittleEndian::read_u32(&header[14..18]), 40);
        assert_eq!(LittleEndian::read_i32(&header[18..22]), 320);
        assert_eq!(LittleEndian::read_i32(&header[22..26]), -240);
        assert_eq!(LittleEndian::read_u16(&header[26..28]), 1);
        assert_eq!(LittleEndian::read_u16(&header[28..30]), 8);
        assert_eq!(LittleEndian::read_u32(&header[30..34]), 0);
        assert_eq!(LittleEndian::read_u32(&header[34..38]), 76800);
        assert_eq!(LittleEndian::read_u32(&header[38..42]), 1);
        assert_eq!(LittleEndian::read_u32(&header[42..46]), 1);
        assert!(header[46..54].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_sizes_are_consistent() {
        for depth in [1u16, 4, 8, 16, 24, 32] {
            for width in [1u32, 3, 7, 160, 321] {
                for height in [1u32, 2, 240] {
                    for color_table in [false, true] {
                        if color_table && depth > 8 {
                            continue;
                        }
                        let info = BitmapInfo::parse(&assemble_header(width, height, depth, color_table).unwrap()).unwrap();
                        assert_eq!(info.file_size, info.pixel_offset + info.image_size);
                        assert_eq!(info.pixel_offset, 54 + palette_len(depth, color_table));
                        assert_eq!(info.image_size, byte_width(width, depth).unwrap() * height);
                        assert_eq!(info.image_size % 4, 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_byte_width_padding() {
        assert_eq!(byte_width(320, 8), Some(320));
        assert_eq!(byte_width(321, 8), Some(324));
        assert_eq!(byte_width(1, 1), Some(4));
        assert_eq!(byte_width(33, 1), Some(8));
        assert_eq!(byte_width(3, 24), Some(12));
    }

    #[test]
    fn test_palette_is_identity_ramp() {
        let mut palette = Vec::new();
        write_palette(&mut palette, 8).unwrap();

        assert_eq!(palette.len(), 1024);
        for (i, entry) in palette.chunks_exact(4).enumerate() {
            let level = i as u8;
            assert_eq!(entry, &[level, level, level, 0]);
        }
    }

    #[test]
    fn test_rows_are_padded_to_stride() {
        let canvas = Canvas::filled(3, 2, 9);
        let mut out = Vec::new();
        write_pixels(&mut out, &canvas, 8).unwrap();
        assert_eq!(out, vec![9, 9, 9, 0, 9, 9, 9, 0]);
    }

    #[test]
    fn test_encoding_is_idempotent() {
        let payload = RawPayload::new(2, 2, vec![1, 2, 3, 4]).unwrap();
        let mut canvas = Canvas::filled(5, 4, BACKGROUND);
        upscale(&payload, &mut canvas).unwrap();

        let encoder = BitmapEncoder::grayscale(5, 4);
        let first = encoder.encode_to_vec(&canvas).unwrap();
        let second = encoder.encode_to_vec(&canvas).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), encoder.file_len().unwrap());
    }

    #[test]
    fn test_round_trip_yields_upscaled_canvas() {
        let payload = RawPayload::new(3, 2, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let mut canvas = Canvas::filled(7, 4, BACKGROUND);
        upscale(&payload, &mut canvas).unwrap();

        let bytes = BitmapEncoder::grayscale(7, 4).encode_to_vec(&canvas).unwrap();
        let decoded = read_bitmap(&bytes).unwrap();

        assert!(decoded.info.is_top_down());
        assert_eq!(decoded.palette.len(), 256);
        assert_eq!(decoded.pixels, canvas.pixels());
        assert_ne!(decoded.pixels, payload.samples());
        assert!(decoded.info.issues(bytes.len()).is_empty());
    }

    #[test]
    fn test_reader_flips_bottom_up_rows() {
        let mut bytes = assemble_header(2, 2, 8, false).unwrap().to_vec();
        LittleEndian::write_i32(&mut bytes[22..26], 2);
        bytes.extend_from_slice(&[3, 4, 0, 0, 1, 2, 0, 0]);

        let decoded = read_bitmap(&bytes).unwrap();
        assert_eq!(decoded.pixels, vec![1, 2, 3, 4]);
        assert!(decoded.palette.is_empty());
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let canvas = Canvas::filled(4, 4, 0);
        let err = BitmapEncoder::grayscale(320, 240).encode_to_vec(&canvas).unwrap_err();
        assert!(matches!(
            err,
            BitmapError::SizeMismatch { width: 4, height: 4, expected_width: 320, expected_height: 240 }
        ));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            BitmapInfo::parse(b"GIF89a"),
            Err(BitmapError::Truncated { needed: 54, actual: 6 })
        ));
        let mut bytes = assemble_header(1, 1, 8, true).unwrap().to_vec();
        bytes[0] = b'X';
        assert!(matches!(BitmapInfo::parse(&bytes), Err(BitmapError::BadSignature(_))));
    }

    #[test]
    fn test_issues_report_truncated_file() {
        let header = assemble_header(320, 240, 8, true).unwrap();
        let info = BitmapInfo::parse(&header).unwrap();
        let issues = info.issues(header.len() + 1024);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("file is 1078 bytes"));
    }

    #[test]
    fn test_oversized_width_is_reported_not_panicking() {
        assert_eq!(byte_width(0x4000_0000, 8), None);

        let mut bytes = assemble_header(1, 1, 8, false).unwrap().to_vec();
        LittleEndian::write_i32(&mut bytes[18..22], 0x4000_0000);
        LittleEndian::write_u32(&mut bytes[2..6], u32::MAX);
        LittleEndian::write_u32(&mut bytes[10..14], u32::MAX);
        LittleEndian::write_u32(&mut bytes[34..38], u32::MAX);

        let info = BitmapInfo::parse(&bytes).unwrap();
        assert!(matches!(info.stride(), Err(BitmapError::InvalidDimensions { .. })));
        assert!(matches!(read_bitmap(&bytes), Err(BitmapError::InvalidDimensions { .. })));

        let issues = info.issues(bytes.len());
        assert!(issues.iter().any(|i| i.contains("too large")));
        assert!(issues.iter().any(|i| i.contains("!= offset")));
    }

    #[test]
    fn test_zero_width_file_is_rejected() {
        let mut bytes = assemble_header(4, 4, 8, false).unwrap().to_vec();
        LittleEndian::write_i32(&mut bytes[18..22], 0);
        bytes.extend_from_slice(&[0; 16]);

        assert!(matches!(
            read_bitmap(&bytes),
            Err(BitmapError::InvalidDimensions { width: 0, height: 4 })
        ));
        let issues = BitmapInfo::parse(&bytes).unwrap().issues(bytes.len());
        assert!(issues.iter().any(|i| i.contains("no pixels")));
    }

    #[test]
    fn test_empty_canvas_is_not_encoded() {
        let canvas = Canvas::filled(0, 3, 0);
        let mut out = Vec::new();
        assert!(matches!(
            write_pixels(&mut out, &canvas, 8),
            Err(BitmapError::InvalidDimensions { width: 0, height: 3 })
        ));
        assert!(BitmapEncoder::grayscale(0, 3).encode_to_vec(&canvas).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_header_rejects_unrepresentable_sizes() {
        assert!(matches!(
            assemble_header(0x4000_0000, 1, 8, true),
            Err(BitmapError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            assemble_header(65536, 65536, 8, false),
            Err(BitmapError::InvalidDimensions { .. })
        ));
        assert!(matches!(assemble_header(4, 4, 16, true), Err(BitmapError::UnsupportedDepth(16))));
        assert!(BitmapEncoder::grayscale(usize::MAX, 1).file_len().is_err());
    }
}
