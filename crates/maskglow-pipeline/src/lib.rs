//! maskglow-pipeline: mask decoding and overlay compositing (sans-IO).
//!
//! Turns opaque per-pixel segmentation masks from a detection service
//! into a highlighted copy of the source image:
//! transport decode -> normalize -> union -> fill + glow border -> PNG.
//!
//! This crate has **no I/O or timer dependencies**. It operates on
//! in-memory byte slices and returns structured data. Debouncing and
//! stale-result handling live in `maskglow-session`.

pub mod cache;
pub mod composite;
pub mod detection;
pub mod diagnostics;
pub mod mask;
pub mod normalize;
pub mod pipeline;
pub mod raster;
pub mod transport;
pub mod types;

pub use cache::{ResultCache, SourceKey};
pub use composite::{CompositeRequest, HighlightStyle, Overlay};
pub use detection::{AnalyzeResponse, ClothingInstance, DetectionResponse};
pub use mask::NormalizedMask;
pub use normalize::Normalized;
pub use pipeline::{
    HighlightOutcome, HighlightReport, HighlightStatus, InstanceMasks, MaskIssue, Prepared,
};
pub use types::{
    CompositeResult, DecodedMask, Dimensions, EncodedMask, InstanceId, MaskError, MaskPayload,
    PipelineError, RgbaImage, Selection,
};

/// Highlight `selection` on the image in `image_bytes`.
///
/// # Pipeline steps
///
/// 1. Decode the source image (PNG, JPEG, BMP, WebP)
/// 2. Resolve the selection to instance masks
/// 3. Transport-decode and normalize each mask
/// 4. Composite the union (or the placeholder) over the source
/// 5. Encode the result as PNG
///
/// Bad masks do not fail the call: they are left out and listed on
/// the returned report.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is unrecognized.
/// Returns [`PipelineError::Encode`] if the output cannot be encoded.
pub fn highlight(
    image_bytes: &[u8],
    masks: &InstanceMasks,
    selection: &Selection,
    style: &HighlightStyle,
) -> Result<HighlightOutcome, PipelineError> {
    let prepared = pipeline::prepare(image_bytes, masks, selection)?;
    pipeline::render(prepared, style)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source_png() -> Vec<u8> {
        raster::encode_png(&RgbaImage::from_pixel(12, 12, image::Rgba([50, 50, 50, 255]))).unwrap()
    }

    #[test]
    fn none_selection_returns_reencoded_source() {
        let png = source_png();
        let out = highlight(&png, &InstanceMasks::new(), &Selection::None, &HighlightStyle::NEON)
            .unwrap();
        assert_eq!(out.result.dimensions, Dimensions::new(12, 12));
        assert_eq!(out.report.status, HighlightStatus::Clean);
        let back = raster::decode_source(&out.result.png).unwrap();
        assert_eq!(back, raster::decode_source(&png).unwrap());
    }

    #[test]
    fn empty_image_is_an_error() {
        assert!(matches!(
            highlight(&[], &InstanceMasks::new(), &Selection::All, &HighlightStyle::NEON),
            Err(PipelineError::EmptyInput)
        ));
    }
}
