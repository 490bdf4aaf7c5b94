//! Overlay compositing: burn a translucent fill and a glowing border
//! into the source raster.
//!
//! Rendering is a pure function over an owned [`RgbaImage`]. The
//! highlighted region and its boundary are computed first as plain
//! pixel sets, then two passes write into the buffer:
//!
//! 1. **Fill**: every region pixel is blended toward the fill color.
//! 2. **Border**: an outer glow (wide stroke plus a blurred shadow in
//!    the fill color) followed by an inner rim (narrow stroke plus a
//!    tight shadow). The rim is painted last at full border opacity.
//!
//! Strokes are centered on boundary pixel centers. A pixel is covered
//! by a stroke of width `w` when its distance to the nearest boundary
//! pixel is strictly less than `w / 2`. All paint is clipped to the
//! region, so pixels outside it keep their source bytes.

use image::{GrayImage, Luma, Rgba};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use serde::{Deserialize, Serialize};

use crate::mask::NormalizedMask;
use crate::raster;
use crate::types::{CompositeResult, Dimensions, PipelineError, RgbaImage};

/// Visual constants for the highlight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightStyle {
    /// Region fill color (RGB).
    pub fill_color: [u8; 3],
    /// Opacity of the fill pass.
    pub fill_opacity: f32,
    /// Border stroke color (RGB).
    pub border_color: [u8; 3],
    /// Opacity of the inner rim stroke.
    pub border_opacity: f32,
    /// Outer glow stroke width in pixels.
    pub glow_width: f32,
    /// Opacity of the outer glow stroke and its shadow.
    pub glow_opacity: f32,
    /// Gaussian sigma of the outer glow shadow.
    pub glow_blur: f32,
    /// Inner rim stroke width in pixels.
    pub rim_width: f32,
    /// Gaussian sigma of the inner rim shadow.
    pub rim_blur: f32,
    /// Opacity of the inner rim shadow.
    pub rim_shadow_opacity: f32,
}

impl HighlightStyle {
    /// The neon-green look used by the clothing selector.
    pub const NEON: Self = Self {
        fill_color: [0, 255, 136],
        fill_opacity: 0.28,
        border_color: [57, 255, 20],
        border_opacity: 1.0,
        glow_width: 10.0,
        glow_opacity: 0.35,
        glow_blur: 4.0,
        rim_width: 2.0,
        rim_blur: 1.5,
        rim_shadow_opacity: 0.6,
    };
}

impl Default for HighlightStyle {
    fn default() -> Self {
        Self::NEON
    }
}

/// What to draw over the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Overlay {
    /// Nothing; the source is re-encoded unchanged.
    Passthrough,
    /// Highlight the union of these masks.
    Region(Vec<NormalizedMask>),
    /// Every selected mask lacked signal: draw the centered placeholder.
    Placeholder,
}

/// Input to [`composite`].
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    /// Source raster. Consumed; the output is painted into it.
    pub source: RgbaImage,
    /// Overlay to apply.
    pub overlay: Overlay,
}

/// Counts describing what a paint call touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaintStats {
    /// Pixels inside the highlighted region.
    pub highlighted_pixels: usize,
    /// Region pixels on its boundary.
    pub boundary_pixels: usize,
    /// Whether the region was the diagnostic placeholder.
    pub placeholder: bool,
}

/// Apply the overlay and encode the result as PNG.
///
/// # Errors
///
/// Returns [`PipelineError::MaskDimensions`] if a mask does not match
/// the source, or [`PipelineError::Encode`] if PNG encoding fails.
pub fn composite(
    request: CompositeRequest,
    style: &HighlightStyle,
) -> Result<CompositeResult, PipelineError> {
    let (image, _) = apply_overlay(request, style)?;
    let png = raster::encode_png(&image)?;
    Ok(CompositeResult {
        png,
        dimensions: Dimensions::of(&image),
    })
}

/// Apply the overlay, returning the painted raster.
///
/// # Errors
///
/// Returns [`PipelineError::MaskDimensions`] if a mask does not match
/// the source.
pub fn apply_overlay(
    request: CompositeRequest,
    style: &HighlightStyle,
) -> Result<(RgbaImage, PaintStats), PipelineError> {
    let CompositeRequest {
        mut source,
        overlay,
    } = request;
    let dimensions = Dimensions::of(&source);

    let (region, placeholder) = match overlay {
        Overlay::Passthrough => return Ok((source, PaintStats::default())),
        Overlay::Region(masks) => (NormalizedMask::union(dimensions, &masks)?, false),
        Overlay::Placeholder => (NormalizedMask::centered_placeholder(dimensions), true),
    };

    let stats = paint(&mut source, &region, style);
    Ok((
        source,
        PaintStats {
            placeholder,
            ..stats
        },
    ))
}

/// Burn the highlight for `region` into `image`.
///
/// `region` must have the image's dimensions.
pub fn paint(image: &mut RgbaImage, region: &NormalizedMask, style: &HighlightStyle) -> PaintStats {
    let highlighted_pixels = region.count();
    if highlighted_pixels == 0 {
        return PaintStats::default();
    }
    let boundary = region.boundary();

    fill_pass(image, region, style);
    border_pass(image, region, &boundary, style);

    PaintStats {
        highlighted_pixels,
        boundary_pixels: boundary.count(),
        placeholder: false,
    }
}

fn fill_pass(image: &mut RgbaImage, region: &NormalizedMask, style: &HighlightStyle) {
    for (x, y, px) in image.enumerate_pixels_mut() {
        if region.contains(x, y) {
            blend(px, style.fill_color, style.fill_opacity);
        }
    }
}

fn border_pass(
    image: &mut RgbaImage,
    region: &NormalizedMask,
    boundary: &NormalizedMask,
    style: &HighlightStyle,
) {
    let Dimensions { width, height } = region.dimensions();
    let seeds = GrayImage::from_fn(width, height, |x, y| {
        Luma([if boundary.contains(x, y) { 255 } else { 0 }])
    });
    let dist_sq = euclidean_squared_distance_transform(&seeds);

    // Outer glow.
    let glow = stroke(&dist_sq, style.glow_width);
    let glow_shadow = soften(&glow, style.glow_blur);
    for (x, y, px) in image.enumerate_pixels_mut() {
        if region.contains(x, y) {
            blend(px, style.fill_color, style.glow_opacity * coverage(&glow_shadow, x, y));
            blend(px, style.border_color, style.glow_opacity * coverage(&glow, x, y));
        }
    }

    // Inner rim.
    let rim = stroke(&dist_sq, style.rim_width);
    let rim_shadow = soften(&rim, style.rim_blur);
    for (x, y, px) in image.enumerate_pixels_mut() {
        if region.contains(x, y) {
            blend(
                px,
                style.border_color,
                style.rim_shadow_opacity * coverage(&rim_shadow, x, y),
            );
            blend(px, style.border_color, style.border_opacity * coverage(&rim, x, y));
        }
    }
}

/// Pixels within half a stroke width of the boundary.
fn stroke(dist_sq: &image::ImageBuffer<Luma<f64>, Vec<f64>>, width: f32) -> GrayImage {
    let half_sq = f64::from(width / 2.0).powi(2);
    GrayImage::from_fn(dist_sq.width(), dist_sq.height(), |x, y| {
        Luma([if dist_sq.get_pixel(x, y).0[0] < half_sq {
            255
        } else {
            0
        }])
    })
}

/// Gaussian-soften a stroke layer. Non-positive sigma leaves it as is,
/// since `imageproc` panics on `sigma <= 0.0`.
fn soften(layer: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return layer.clone();
    }
    imageproc::filter::gaussian_blur_f32(layer, sigma)
}

fn coverage(layer: &GrayImage, x: u32, y: u32) -> f32 {
    f32::from(layer.get_pixel(x, y).0[0]) / 255.0
}

/// Source-over blend of an opaque color at `alpha` onto `px`.
fn blend(px: &mut Rgba<u8>, color: [u8; 3], alpha: f32) {
    let a = alpha.clamp(0.0, 1.0);
    if a <= 0.0 {
        return;
    }
    for (c, &src) in color.iter().enumerate() {
        px.0[c] = mix(px.0[c], src, a);
    }
    px.0[3] = mix(px.0[3], 255, a);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mix(dst: u8, src: u8, a: f32) -> u8 {
    f32::from(src)
        .mul_add(a, f32::from(dst) * (1.0 - a))
        .round()
        .clamp(0.0, 255.0) as u8
}
