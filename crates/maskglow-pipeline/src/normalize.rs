//! Mask normalization: intensity samples to inside/outside flags.
//!
//! The upstream encoder's value range is undocumented, so the decision
//! threshold is inferred from the largest sample:
//!
//! | `max` sample        | threshold         |
//! |---------------------|-------------------|
//! | `0`                 | no signal         |
//! | `(0, 0.5)`          | `max / 2`         |
//! | `[0.5, 1]`          | `0.5`             |
//! | `> 1`               | `128`             |
//!
//! A pixel is inside when its sample is strictly greater than the
//! threshold.

use crate::mask::NormalizedMask;
use crate::types::{DecodedMask, Dimensions, MaskError};

/// Threshold for `{0, 1}` and fractional encodings.
pub const UNIT_THRESHOLD: f32 = 0.5;

/// Threshold for byte (`0..=255`) encodings.
pub const BYTE_THRESHOLD: f32 = 128.0;

/// Outcome of normalizing one mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// A usable inside/outside field.
    Mask(NormalizedMask),
    /// The payload carried no signal (all zero, or undecodable).
    ///
    /// Callers render the diagnostic placeholder instead of an
    /// invisible highlight.
    NoSignal,
}

/// Largest sample, found by a single linear scan. `NaN` and negative
/// samples never raise the maximum.
#[must_use]
pub fn max_sample(decoded: &DecodedMask) -> f32 {
    let mut max = 0.0_f32;
    match decoded {
        DecodedMask::Bytes(samples) => {
            let mut max_byte = 0_u8;
            for &s in samples {
                if s > max_byte {
                    max_byte = s;
                }
            }
            max = f32::from(max_byte);
        }
        DecodedMask::Fractional(samples) => {
            for &s in samples {
                if s > max {
                    max = s;
                }
            }
        }
    }
    max
}

/// Decision threshold for a mask whose largest sample is `max`.
///
/// Returns `None` when `max` is zero (no signal).
#[must_use]
pub fn threshold_for(max: f32) -> Option<f32> {
    if max <= 0.0 {
        None
    } else if max < UNIT_THRESHOLD {
        Some(max / 2.0)
    } else if max <= 1.0 {
        Some(UNIT_THRESHOLD)
    } else {
        Some(BYTE_THRESHOLD)
    }
}

/// Normalize decoded samples against the source image dimensions.
///
/// An empty `decoded` (the transport decoder gave up) is treated like
/// an all-zero mask.
///
/// # Errors
///
/// Returns [`MaskError::DimensionMismatch`] if a non-empty mask does
/// not hold exactly `width * height` samples.
pub fn normalize(decoded: &DecodedMask, dimensions: Dimensions) -> Result<Normalized, MaskError> {
    if decoded.is_empty() {
        return Ok(Normalized::NoSignal);
    }

    let expected = dimensions.pixel_count();
    if decoded.len() != expected {
        return Err(MaskError::DimensionMismatch {
            expected,
            actual: decoded.len(),
        });
    }

    let Some(threshold) = threshold_for(max_sample(decoded)) else {
        return Ok(Normalized::NoSignal);
    };

    let inside = match decoded {
        DecodedMask::Bytes(samples) => samples
            .iter()
            .map(|&s| f32::from(s) > threshold)
            .collect(),
        DecodedMask::Fractional(samples) => samples.iter().map(|&s| s > threshold).collect(),
    };
    let mask = NormalizedMask::from_flags(dimensions, inside)?;
    Ok(Normalized::Mask(mask))
}
