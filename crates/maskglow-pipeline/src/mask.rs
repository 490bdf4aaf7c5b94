//! Boolean pixel fields: normalized masks, unions, and boundaries.
//!
//! A [`NormalizedMask`] is the inside/outside flag for every pixel of
//! the source image, stored row-major. The compositor never looks at
//! individual instance masks; it works on the union of the selection
//! and on that union's boundary, so adjacent instances do not draw a
//! seam between themselves.

use crate::types::{Dimensions, MaskError, PipelineError};

/// Inside/outside flags for every pixel of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMask {
    dimensions: Dimensions,
    inside: Vec<bool>,
}

impl NormalizedMask {
    /// Wrap row-major flags.
    ///
    /// # Errors
    ///
    /// Returns [`MaskError::DimensionMismatch`] if `inside` does not hold
    /// exactly `width * height` flags.
    pub fn from_flags(dimensions: Dimensions, inside: Vec<bool>) -> Result<Self, MaskError> {
        let expected = dimensions.pixel_count();
        if inside.len() != expected {
            return Err(MaskError::DimensionMismatch {
                expected,
                actual: inside.len(),
            });
        }
        Ok(Self { dimensions, inside })
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    #[must_use]
    pub fn from_fn(dimensions: Dimensions, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut inside = Vec::with_capacity(dimensions.pixel_count());
        for y in 0..dimensions.height {
            for x in 0..dimensions.width {
                inside.push(f(x, y));
            }
        }
        Self { dimensions, inside }
    }

    /// A mask with no pixel inside.
    #[must_use]
    pub fn empty(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            inside: vec![false; dimensions.pixel_count()],
        }
    }

    /// The diagnostic placeholder: a `width/4 × height/4` rectangle
    /// centered in the image (at least one pixel each way).
    #[must_use]
    pub fn centered_placeholder(dimensions: Dimensions) -> Self {
        let rw = (dimensions.width / 4).max(1).min(dimensions.width);
        let rh = (dimensions.height / 4).max(1).min(dimensions.height);
        let x0 = (dimensions.width - rw) / 2;
        let y0 = (dimensions.height - rh) / 2;
        Self::from_fn(dimensions, |x, y| {
            (x0..x0 + rw).contains(&x) && (y0..y0 + rh).contains(&y)
        })
    }

    /// Dimensions of the image this mask covers.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Row-major flags.
    #[must_use]
    pub fn flags(&self) -> &[bool] {
        &self.inside
    }

    /// Whether the pixel at `(x, y)` is inside. Out-of-bounds is outside.
    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.dimensions.width
            && y < self.dimensions.height
            && self.inside[self.dimensions.index(x, y)]
    }

    /// Number of inside pixels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inside.iter().filter(|&&v| v).count()
    }

    /// `true` if no pixel is inside.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        !self.inside.iter().any(|&v| v)
    }

    /// Pixel-wise OR of `masks`, all of which must be `dimensions`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MaskDimensions`] for the first mask whose
    /// dimensions differ.
    pub fn union<'a>(
        dimensions: Dimensions,
        masks: impl IntoIterator<Item = &'a Self>,
    ) -> Result<Self, PipelineError> {
        let mut acc = Self::empty(dimensions);
        for mask in masks {
            if mask.dimensions != dimensions {
                return Err(PipelineError::MaskDimensions {
                    mask: mask.dimensions,
                    source_dims: dimensions,
                });
            }
            for (a, &b) in acc.inside.iter_mut().zip(&mask.inside) {
                *a |= b;
            }
        }
        Ok(acc)
    }

    /// Boundary pixels: inside pixels on the image edge or with at
    /// least one 4-neighbour outside.
    #[must_use]
    pub fn boundary(&self) -> Self {
        let Dimensions { width, height } = self.dimensions;
        Self::from_fn(self.dimensions, |x, y| {
            if !self.inside[self.dimensions.index(x, y)] {
                return false;
            }
            if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
                return true;
            }
            !(self.contains(x - 1, y)
                && self.contains(x + 1, y)
                && self.contains(x, y - 1)
                && self.contains(x, y + 1))
        })
    }
}
