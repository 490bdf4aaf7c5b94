//! Source raster decoding and lossless result encoding.
//!
//! Accepts whatever the `image` crate can decode (PNG, JPEG, BMP, WebP)
//! and always emits PNG so the highlight survives without artifacts.

use image::ImageEncoder;

use crate::types::{Dimensions, PipelineError, RgbaImage};

/// Decode raw image bytes into an RGBA raster.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the format is unrecognized
/// or the data is corrupt.
pub fn decode_source(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}

/// Wrap an already-decoded RGBA buffer (e.g. pixels read back from a
/// canvas) as a raster.
///
/// # Errors
///
/// Returns [`PipelineError::BufferSize`] if `pixels` does not hold
/// exactly `width * height * 4` bytes.
pub fn source_from_rgba(
    dimensions: Dimensions,
    pixels: Vec<u8>,
) -> Result<RgbaImage, PipelineError> {
    let len = pixels.len();
    if len != dimensions.pixel_count() * 4 {
        return Err(PipelineError::BufferSize { dimensions, len });
    }
    RgbaImage::from_raw(dimensions.width, dimensions.height, pixels)
        .ok_or(PipelineError::BufferSize { dimensions, len })
}

/// Encode an RGBA raster as PNG bytes.
///
/// # Errors
///
/// Returns [`PipelineError::Encode`] if the PNG encoder fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let mut png_bytes = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(png_bytes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode_source(&[]), Err(PipelineError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_return_image_decode_error() {
        assert!(matches!(
            decode_source(&[0xFF, 0xFE, 0x00, 0x01]),
            Err(PipelineError::ImageDecode(_))
        ));
    }

    #[test]
    fn png_survives_encode_then_decode() {
        let img = RgbaImage::from_fn(7, 5, |x, y| {
            image::Rgba([u8::try_from(x * 30).unwrap(), u8::try_from(y * 40).unwrap(), 9, 200])
        });
        let png = encode_png(&img).unwrap();
        let back = decode_source(&png).unwrap();
        assert_eq!(back.dimensions(), (7, 5));
        assert_eq!(back.as_raw(), img.as_raw());
    }

    #[test]
    fn rgba_buffer_must_match_dimensions() {
        let d = Dimensions::new(2, 2);
        assert!(source_from_rgba(d, vec![0; 16]).is_ok());
        assert!(matches!(
            source_from_rgba(d, vec![0; 15]),
            Err(PipelineError::BufferSize { len: 15, .. })
        ));
        assert!(matches!(
            source_from_rgba(d, vec![0; 20]),
            Err(PipelineError::BufferSize { len: 20, .. })
        ));
    }
}
