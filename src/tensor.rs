use std::fmt;

use ndarray::Array3;
use thiserror::Error;

use crate::decode::DecodedImage;

pub const CHANNELS_IN: usize = 4;
pub const CHANNELS_OUT: usize = 3;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PackError {
    /// The decoder/packer contract was broken. This is a programming error,
    /// not a condition to retry.
    #[error(
        "pixel buffer length {actual} violates width*height*4 = {expected} \
         for {width}x{height} image"
    )]
    InvariantViolation {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Model-ready input: `[height, width, 3]`, values 0-255, alpha stripped.
///
/// The shape is carried by the underlying array so the inference stage can
/// validate it. Consumed at most once per classification.
#[derive(Clone, PartialEq, Eq)]
pub struct InputTensor {
    data: Array3<u8>,
}

impl InputTensor {
    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    /// Row-major RGB bytes, exactly `width * height * 3` of them.
    pub fn as_bytes(&self) -> &[u8] {
        self.data
            .as_slice()
            .expect("tensor is constructed in standard layout")
    }
}

impl fmt::Debug for InputTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputTensor")
            .field("shape", &self.shape())
            .finish()
    }
}

/// Packs a decoded RGBA image into the `[height, width, 3]` tensor the
/// classifier consumes.
///
/// Pixels are visited in row-major order; for each pixel the first three
/// bytes (R, G, B) are copied and the fourth (alpha) is skipped - dropped,
/// not blended or premultiplied.
///
/// # Errors
///
/// Returns [`PackError::InvariantViolation`] if the pixel buffer length does
/// not match `width * height * 4`.
pub fn pack(image: &DecodedImage) -> Result<InputTensor, PackError> {
    let width = image.width as usize;
    let height = image.height as usize;
    let expected = width * height * CHANNELS_IN;

    if image.pixels.len() != expected {
        return Err(PackError::InvariantViolation {
            width: image.width,
            height: image.height,
            expected,
            actual: image.pixels.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width * height * CHANNELS_OUT);
    for pixel in image.pixels.chunks_exact(CHANNELS_IN) {
        rgb.extend_from_slice(&pixel[..CHANNELS_OUT]);
    }

    let data = Array3::from_shape_vec((height, width, CHANNELS_OUT), rgb).map_err(|_| {
        PackError::InvariantViolation {
            width: image.width,
            height: image.height,
            expected,
            actual: image.pixels.len(),
        }
    })?;

    Ok(InputTensor { data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rgba_image(width: u32, height: u32, pixels: Vec<u8>) -> DecodedImage {
        DecodedImage {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn test_pack_known_4x2_buffer() {
        // 4x2 RGBA with recognizable bytes: pixel n is [4n, 4n+1, 4n+2, 4n+3].
        let pixels: Vec<u8> = (0..4 * 2 * 4).map(|i| i as u8).collect();
        let tensor = pack(&rgba_image(4, 2, pixels)).unwrap();

        assert_eq!(tensor.shape(), [2, 4, 3]);
        let expected: Vec<u8> = (0..8u8)
            .flat_map(|n| [4 * n, 4 * n + 1, 4 * n + 2])
            .collect();
        assert_eq!(tensor.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_pack_drops_alpha_only() {
        let pixels = vec![
            10, 20, 30, 255, //
            40, 50, 60, 0, //
        ];
        let tensor = pack(&rgba_image(2, 1, pixels)).unwrap();
        assert_eq!(tensor.as_bytes(), &[10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_pack_indexing_matches_row_major() {
        let pixels: Vec<u8> = (0..3 * 2 * 4).map(|i| i as u8).collect();
        let tensor = pack(&rgba_image(3, 2, pixels)).unwrap();

        // Pixel at row 1, column 2 is the 6th pixel (index 5).
        assert_eq!(tensor.data()[[1, 2, 0]], 20);
        assert_eq!(tensor.data()[[1, 2, 1]], 21);
        assert_eq!(tensor.data()[[1, 2, 2]], 22);
    }

    #[test]
    fn test_pack_length_mismatch_is_invariant_violation() {
        let result = pack(&rgba_image(2, 2, vec![0u8; 15]));
        assert!(matches!(
            result,
            Err(PackError::InvariantViolation {
                expected: 16,
                actual: 15,
                ..
            })
        ));
    }

    #[test]
    fn test_pack_empty_image_fails() {
        let result = pack(&rgba_image(1, 1, Vec::new()));
        assert!(matches!(result, Err(PackError::InvariantViolation { .. })));
    }

    proptest! {
        #[test]
        fn prop_pack_output_length(width in 1u32..32, height in 1u32..32) {
            let len = (width * height * 4) as usize;
            let pixels: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let tensor = pack(&rgba_image(width, height, pixels)).unwrap();

            prop_assert_eq!(
                tensor.as_bytes().len(),
                (width * height * 3) as usize
            );
            prop_assert_eq!(tensor.shape(), [height as usize, width as usize, 3]);
        }

        #[test]
        fn prop_pack_preserves_rgb_per_pixel(
            width in 1u32..16,
            height in 1u32..16,
            seed in any::<u8>(),
        ) {
            let len = (width * height * 4) as usize;
            let pixels: Vec<u8> = (0..len)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
                .collect();
            let tensor = pack(&rgba_image(width, height, pixels.clone())).unwrap();

            let out = tensor.as_bytes();
            for n in 0..(width * height) as usize {
                prop_assert_eq!(out[n * 3], pixels[n * 4]);
                prop_assert_eq!(out[n * 3 + 1], pixels[n * 4 + 1]);
                prop_assert_eq!(out[n * 3 + 2], pixels[n * 4 + 2]);
            }
        }

        #[test]
        fn prop_pack_deterministic(width in 1u32..8, height in 1u32..8) {
            let len = (width * height * 4) as usize;
            let pixels: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
            let a = pack(&rgba_image(width, height, pixels.clone())).unwrap();
            let b = pack(&rgba_image(width, height, pixels)).unwrap();
            prop_assert_eq!(a.as_bytes(), b.as_bytes());
        }
    }
}
