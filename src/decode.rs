use std::fmt;
use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, instrument};

/// Maximum compressed image size (20MB) - first line of defense
pub const MAX_COMPRESSED_SIZE: usize = 20 * 1024 * 1024;

/// Maximum decompressed pixel count (100 megapixels) - prevents decompression bombs
pub const MAX_PIXELS: u64 = 100_000_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("image data is empty")]
    Empty,

    #[error("compressed image too large: {size} bytes (max: {max})")]
    CompressedTooLarge { size: usize, max: usize },

    #[error("unsupported image format: {detected}, expected JPEG")]
    UnsupportedFormat { detected: String },

    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("decompressed image too large: {width}x{height} pixels (max: {max} pixels)")]
    PixelCountTooLarge { width: u32, height: u32, max: u64 },

    #[error("image decode failed: {message}")]
    Malformed { message: String },
}

/// A fully decoded image in RGBA interleaved order, 4 bytes per pixel
/// regardless of the source channel count.
///
/// Invariant: `pixels.len() == width * height * 4`.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Number of bytes the pixel buffer must hold for these dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

// Pixel data is not useful in logs; print the geometry instead.
impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}

/// Decodes a JPEG byte buffer into an RGBA pixel buffer.
///
/// Both baseline and progressive JPEG are supported. Malformed or truncated
/// input fails with a diagnostic; no partial output is ever returned.
///
/// # Errors
///
/// Returns [`DecodeError`] if the input is empty, oversized, not a JPEG, or
/// fails to decode.
#[instrument(skip(data), fields(data_len = data.len()))]
pub fn decode_jpeg(data: &[u8]) -> Result<DecodedImage, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    if data.len() > MAX_COMPRESSED_SIZE {
        return Err(DecodeError::CompressedTooLarge {
            size: data.len(),
            max: MAX_COMPRESSED_SIZE,
        });
    }

    let format = image::guess_format(data).map_err(|e| DecodeError::Malformed {
        message: e.to_string(),
    })?;
    if format != ImageFormat::Jpeg {
        return Err(DecodeError::UnsupportedFormat {
            detected: format!("{format:?}"),
        });
    }

    // Validate dimensions from the header BEFORE the full decode, so a
    // decompression bomb never gets to allocate.
    let (width, height) = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(|e| DecodeError::Malformed {
            message: e.to_string(),
        })?;

    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidDimensions { width, height });
    }

    let pixel_count = u64::from(width) * u64::from(height);
    if pixel_count > MAX_PIXELS {
        return Err(DecodeError::PixelCountTooLarge {
            width,
            height,
            max: MAX_PIXELS,
        });
    }

    let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg).map_err(|e| {
        DecodeError::Malformed {
            message: e.to_string(),
        }
    })?;

    let rgba = decoded.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    let pixels = rgba.into_raw();

    debug!(width, height, pixel_bytes = pixels.len(), "image decoded");

    Ok(DecodedImage {
        width,
        height,
        pixels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE_JPEG: &[u8] = include_bytes!("../tests/fixtures/tiny.jpg");
    const PROGRESSIVE_JPEG: &[u8] = include_bytes!("../tests/fixtures/progressive.jpg");

    #[test]
    fn test_decode_baseline_jpeg() {
        let decoded = decode_jpeg(BASELINE_JPEG).unwrap();
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.height, 2);
        assert_eq!(decoded.pixels.len(), decoded.expected_len());
    }

    #[test]
    fn test_decode_progressive_jpeg() {
        let decoded = decode_jpeg(PROGRESSIVE_JPEG).unwrap();
        assert_eq!(decoded.width, 493);
        assert_eq!(decoded.height, 58);
        assert_eq!(decoded.pixels.len(), decoded.expected_len());
    }

    #[test]
    fn test_decode_output_is_rgba() {
        let decoded = decode_jpeg(BASELINE_JPEG).unwrap();
        // 4 bytes per pixel, alpha fully opaque for a JPEG source.
        assert_eq!(decoded.pixels.len() % 4, 0);
        assert!(decoded.pixels.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_decode_empty_input() {
        assert_eq!(decode_jpeg(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_oversized_input() {
        let oversized = vec![0u8; MAX_COMPRESSED_SIZE + 1];
        assert!(matches!(
            decode_jpeg(&oversized),
            Err(DecodeError::CompressedTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_png() {
        let png_header = [
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
        ];
        assert!(matches!(
            decode_jpeg(&png_header),
            Err(DecodeError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_jpeg() {
        // Cut the stream in the middle of the entropy-coded data.
        let truncated = &BASELINE_JPEG[..BASELINE_JPEG.len() / 2];
        assert!(decode_jpeg(truncated).is_err());
    }

    #[test]
    fn test_decode_garbage_with_jpeg_magic() {
        let mut garbage = vec![0xFF, 0xD8, 0xFF, 0xE0];
        garbage.extend_from_slice(&[0x00; 64]);
        assert!(decode_jpeg(&garbage).is_err());
    }
}
