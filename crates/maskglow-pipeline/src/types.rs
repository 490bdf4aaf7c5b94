//! Shared types for the maskglow highlight pipeline.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hold decoded source
/// rasters without depending on `image` directly.
pub use image::RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create a new dimensions value.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of pixels (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Row-major index of the pixel at `(x, y)`.
    #[must_use]
    pub const fn index(self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Dimensions of a decoded raster.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identifier of one detected instance (e.g. `"shirt"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create an instance identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A transport-encoded mask payload exactly as the detection service
/// delivered it: Base64 text, optionally wrapping a gzip stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedMask(String);

impl EncodedMask {
    /// Wrap a payload string.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// The raw payload text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One instance's mask as it arrives in a detection response.
///
/// Current service versions send an [`EncodedMask`]; some older ones
/// inline the per-pixel samples as a JSON number array, which is the
/// only way fractional intensities reach the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskPayload {
    /// Base64 (optionally gzip-compressed) byte samples.
    Encoded(EncodedMask),
    /// Inline intensity samples, row-major.
    Samples(Vec<f32>),
}

impl From<EncodedMask> for MaskPayload {
    fn from(encoded: EncodedMask) -> Self {
        Self::Encoded(encoded)
    }
}

/// Per-pixel intensity samples recovered from a mask payload.
///
/// The value range depends on the upstream encoder version and is not
/// assumed here: `{0, 1}`, `[0, 255]` and `[0.0, 1.0]` all occur.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMask {
    /// Unsigned byte samples (the transport decoder's output).
    Bytes(Vec<u8>),
    /// Fractional samples from inline numeric payloads.
    Fractional(Vec<f32>),
}

impl Default for DecodedMask {
    fn default() -> Self {
        Self::Bytes(Vec::new())
    }
}

impl DecodedMask {
    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(s) => s.len(),
            Self::Fractional(s) => s.len(),
        }
    }

    /// `true` when decoding gave up and produced no samples at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if at least one sample is strictly positive.
    #[must_use]
    pub fn has_signal(&self) -> bool {
        match self {
            Self::Bytes(s) => s.iter().any(|&v| v > 0),
            Self::Fractional(s) => s.iter().any(|&v| v > 0.0),
        }
    }

    /// Sample at `index` widened to `f32`.
    #[must_use]
    pub fn sample(&self, index: usize) -> f32 {
        match self {
            Self::Bytes(s) => s.get(index).copied().map_or(0.0, f32::from),
            Self::Fractional(s) => s.get(index).copied().unwrap_or(0.0),
        }
    }
}

/// Which detected instances to highlight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Nothing highlighted; the source passes through.
    #[default]
    None,
    /// A single instance.
    Instance(InstanceId),
    /// The union of every instance in the response.
    All,
}

impl Selection {
    /// Stable identifier for this selection: the instance id, `"all"`
    /// or `"none"`.
    #[must_use]
    pub fn key(&self) -> Cow<'_, str> {
        match self {
            Self::None => Cow::Borrowed("none"),
            Self::All => Cow::Borrowed("all"),
            Self::Instance(id) => Cow::Borrowed(id.as_str()),
        }
    }

    /// Parse a selection key as produced by [`Selection::key`].
    ///
    /// `"all_items"` is accepted as an alias for `"all"`; an empty key
    /// means no selection.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        match key.trim() {
            "" | "none" => Self::None,
            "all" | "all_items" => Self::All,
            other => Self::Instance(InstanceId::new(other)),
        }
    }

    /// Returns `true` for [`Selection::None`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Encoded output image: the source with highlights burned in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeResult {
    /// Lossless PNG bytes.
    pub png: Vec<u8>,
    /// Always equal to the source image dimensions.
    pub dimensions: Dimensions,
}

/// Per-mask failures. A rejected mask is excluded from compositing;
/// the rest of the request carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MaskError {
    /// Decoded sample count does not match the source pixel count.
    #[error("mask has {actual} samples but the image has {expected} pixels")]
    DimensionMismatch {
        /// `width * height` of the source image.
        expected: usize,
        /// Number of decoded samples.
        actual: usize,
    },

    /// The selection names an instance with no mask in the response.
    #[error("no mask for instance {0:?}")]
    UnknownInstance(InstanceId),
}

/// Errors that abort a whole highlight request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the source image.
    #[error("failed to decode source image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The source image bytes were empty.
    #[error("source image data is empty")]
    EmptyInput,

    /// A raw RGBA buffer does not hold `width * height * 4` bytes.
    #[error("RGBA buffer of {len} bytes does not fit {dimensions}")]
    BufferSize {
        /// Claimed raster dimensions.
        dimensions: Dimensions,
        /// Actual buffer length.
        len: usize,
    },

    /// A normalized mask was built for a different raster size.
    #[error("mask is {mask} but the source image is {source_dims}")]
    MaskDimensions {
        /// Dimensions of the offending mask.
        mask: Dimensions,
        /// Dimensions of the source image.
        source_dims: Dimensions,
    },

    /// PNG encoding of the result failed.
    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_pixel_count_and_index() {
        let d = Dimensions::new(4, 3);
        assert_eq!(d.pixel_count(), 12);
        assert_eq!(d.index(0, 0), 0);
        assert_eq!(d.index(3, 0), 3);
        assert_eq!(d.index(1, 2), 9);
        assert_eq!(d.to_string(), "4x3");
    }

    #[test]
    fn selection_keys_are_stable() {
        assert_eq!(Selection::None.key(), "none");
        assert_eq!(Selection::All.key(), "all");
        assert_eq!(Selection::Instance("shirt".into()).key(), "shirt");
    }

    #[test]
    fn selection_from_key_accepts_aliases() {
        assert_eq!(Selection::from_key("all_items"), Selection::All);
        assert_eq!(Selection::from_key(""), Selection::None);
        assert_eq!(
            Selection::from_key(" pants "),
            Selection::Instance(InstanceId::new("pants"))
        );
    }

    #[test]
    fn decoded_mask_default_is_empty() {
        let m = DecodedMask::default();
        assert!(m.is_empty());
        assert!(!m.has_signal());
    }

    #[test]
    fn decoded_mask_sample_widens() {
        let m = DecodedMask::Bytes(vec![0, 200]);
        assert!((m.sample(1) - 200.0).abs() < f32::EPSILON);
        assert!(m.sample(5).abs() < f32::EPSILON);
    }

    #[test]
    fn mask_error_display() {
        let err = MaskError::DimensionMismatch {
            expected: 100,
            actual: 99,
        };
        assert_eq!(
            err.to_string(),
            "mask has 99 samples but the image has 100 pixels"
        );
    }

    #[test]
    fn pipeline_error_display() {
        assert_eq!(
            PipelineError::EmptyInput.to_string(),
            "source image data is empty"
        );
    }
}
