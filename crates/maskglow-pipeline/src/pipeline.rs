//! Highlight orchestration: source image + instance masks + selection
//! in, composited PNG and a status report out.
//!
//! The work is split into [`prepare`] (decode the source, resolve the
//! selection, decode and normalize masks) and [`render`] (composite and
//! encode) so a cooperative caller can yield between the two halves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::composite::{self, CompositeRequest, HighlightStyle, Overlay};
use crate::normalize::{self, Normalized};
use crate::raster;
use crate::transport;
use crate::types::{
    CompositeResult, DecodedMask, Dimensions, InstanceId, MaskError, MaskPayload, PipelineError,
    RgbaImage, Selection,
};

/// Mask payloads keyed by instance, as delivered with one image.
pub type InstanceMasks = BTreeMap<InstanceId, MaskPayload>;

/// Coarse outcome of a highlight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightStatus {
    /// Every selected mask decoded and rendered as real output.
    Clean,
    /// No selected mask carried signal; the diagnostic placeholder was
    /// drawn instead of a detection result.
    Fallback,
    /// At least one selected mask was rejected or covered no pixels.
    Degraded,
}

/// Why one instance did not contribute a real highlight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskIssue {
    /// The mask decoded to no signal.
    NoSignal(InstanceId),
    /// The mask had signal, but no sample reached the threshold, so it
    /// covers no pixels.
    Blank(InstanceId),
    /// The mask could not be used at all.
    Rejected {
        /// Offending instance.
        instance: InstanceId,
        /// What was wrong with it.
        error: MaskError,
    },
}

/// What happened while producing a [`HighlightOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightReport {
    /// The selection that was rendered.
    pub selection: Selection,
    /// Overall status.
    pub status: HighlightStatus,
    /// `true` if the output contains the diagnostic placeholder.
    pub placeholder: bool,
    /// Per-instance problems, in instance order.
    pub issues: Vec<MaskIssue>,
    /// Pixels covered by the highlight (placeholder included).
    pub highlighted_pixels: usize,
}

impl HighlightReport {
    fn new(selection: Selection) -> Self {
        Self {
            selection,
            status: HighlightStatus::Clean,
            placeholder: false,
            issues: Vec::new(),
            highlighted_pixels: 0,
        }
    }
}

/// A composited image plus the report describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightOutcome {
    /// Encoded output image.
    pub result: CompositeResult,
    /// How it was produced.
    pub report: HighlightReport,
}

/// The first half of a highlight: everything up to compositing.
#[derive(Debug, Clone)]
pub struct Prepared {
    /// Decoded source raster.
    pub source: RgbaImage,
    /// What the compositor will draw.
    pub overlay: Overlay,
    /// Report so far; `render` fills in pixel counts.
    pub report: HighlightReport,
}

/// Recover per-pixel samples from one payload.
#[must_use]
pub fn decode_payload(payload: &MaskPayload) -> DecodedMask {
    match payload {
        MaskPayload::Encoded(encoded) => transport::decode(encoded),
        MaskPayload::Samples(samples) => DecodedMask::Fractional(samples.clone()),
    }
}

/// Decode and normalize one payload against the source dimensions.
///
/// # Errors
///
/// Returns [`MaskError::DimensionMismatch`] if the decoded sample count
/// does not match `dimensions`.
pub fn normalize_payload(
    payload: &MaskPayload,
    dimensions: Dimensions,
) -> Result<Normalized, MaskError> {
    normalize::normalize(&decode_payload(payload), dimensions)
}

/// Instances named by `selection`, in map order.
///
/// An instance selection that is absent from `masks` is reported as an
/// issue rather than resolved.
fn selected<'a>(
    masks: &'a InstanceMasks,
    selection: &Selection,
    report: &mut HighlightReport,
) -> Vec<(&'a InstanceId, &'a MaskPayload)> {
    match selection {
        Selection::None => Vec::new(),
        Selection::All => masks.iter().collect(),
        Selection::Instance(id) => masks.get_key_value(id).map_or_else(
            || {
                report.issues.push(MaskIssue::Rejected {
                    instance: id.clone(),
                    error: MaskError::UnknownInstance(id.clone()),
                });
                Vec::new()
            },
            |entry| vec![entry],
        ),
    }
}

/// Decide what to draw for `selection`.
///
/// `normalize_one` turns a payload into a [`Normalized`] mask; callers
/// with a mask cache can serve it from there, so every returned mask is
/// checked against `dimensions` again. Rejected, silent and blank masks
/// are recorded on the returned report.
pub fn resolve_overlay<F>(
    dimensions: Dimensions,
    masks: &InstanceMasks,
    selection: &Selection,
    mut normalize_one: F,
) -> (Overlay, HighlightReport)
where
    F: FnMut(&InstanceId, &MaskPayload) -> Result<Normalized, MaskError>,
{
    let mut report = HighlightReport::new(selection.clone());
    let mut region = Vec::new();
    let mut silent = 0_usize;

    for (id, payload) in selected(masks, selection, &mut report) {
        match normalize_one(id, payload) {
            Ok(Normalized::Mask(mask)) if mask.dimensions() != dimensions => {
                let error = MaskError::DimensionMismatch {
                    expected: dimensions.pixel_count(),
                    actual: mask.dimensions().pixel_count(),
                };
                log::warn!("mask for {id} rejected: {error}");
                report.issues.push(MaskIssue::Rejected {
                    instance: id.clone(),
                    error,
                });
            }
            Ok(Normalized::Mask(mask)) if mask.is_blank() => {
                log::warn!("mask for {id} has signal but covers no pixels");
                report.issues.push(MaskIssue::Blank(id.clone()));
            }
            Ok(Normalized::Mask(mask)) => region.push(mask),
            Ok(Normalized::NoSignal) => {
                log::warn!("mask for {id} carries no signal");
                silent += 1;
                report.issues.push(MaskIssue::NoSignal(id.clone()));
            }
            Err(error) => {
                log::warn!("mask for {id} rejected: {error}");
                report.issues.push(MaskIssue::Rejected {
                    instance: id.clone(),
                    error,
                });
            }
        }
    }

    let overlay = if !region.is_empty() {
        Overlay::Region(region)
    } else if silent > 0 {
        report.placeholder = true;
        Overlay::Placeholder
    } else {
        Overlay::Passthrough
    };

    let degraded = report
        .issues
        .iter()
        .any(|issue| matches!(issue, MaskIssue::Rejected { .. } | MaskIssue::Blank(_)));
    report.status = if degraded {
        HighlightStatus::Degraded
    } else if report.placeholder {
        HighlightStatus::Fallback
    } else {
        HighlightStatus::Clean
    };

    (overlay, report)
}

/// Decode the source and resolve the selection into an overlay.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] or
/// [`PipelineError::ImageDecode`] if the source image cannot be
/// decoded. Problems with individual masks are not errors; they are
/// recorded on the report.
pub fn prepare(
    image_bytes: &[u8],
    masks: &InstanceMasks,
    selection: &Selection,
) -> Result<Prepared, PipelineError> {
    let source = raster::decode_source(image_bytes)?;
    Ok(prepare_decoded(source, masks, selection, normalize_payload))
}

/// [`prepare`] for an already-decoded source, with a caller-supplied
/// mask normalizer.
pub fn prepare_decoded<F>(
    source: RgbaImage,
    masks: &InstanceMasks,
    selection: &Selection,
    mut normalize_one: F,
) -> Prepared
where
    F: FnMut(&MaskPayload, Dimensions) -> Result<Normalized, MaskError>,
{
    let dimensions = Dimensions::of(&source);
    let (overlay, report) = resolve_overlay(dimensions, masks, selection, |_, payload| {
        normalize_one(payload, dimensions)
    });
    Prepared {
        source,
        overlay,
        report,
    }
}

/// Composite and encode a prepared request.
///
/// If compositing fails the unmodified source is encoded instead and
/// the report is marked [`HighlightStatus::Degraded`].
///
/// # Errors
///
/// Returns [`PipelineError::Encode`] if even the unmodified source
/// cannot be encoded.
pub fn render(
    prepared: Prepared,
    style: &HighlightStyle,
) -> Result<HighlightOutcome, PipelineError> {
    let Prepared {
        source,
        overlay,
        mut report,
    } = prepared;
    let dimensions = Dimensions::of(&source);

    let request = CompositeRequest {
        source: source.clone(),
        overlay,
    };
    let painted = match composite::apply_overlay(request, style) {
        Ok((painted, stats)) => {
            report.highlighted_pixels = stats.highlighted_pixels;
            painted
        }
        Err(e) => {
            log::warn!("compositing failed, passing source through: {e}");
            report.status = HighlightStatus::Degraded;
            report.placeholder = false;
            report.highlighted_pixels = 0;
            source
        }
    };

    let png = raster::encode_png(&painted)?;
    Ok(HighlightOutcome {
        result: CompositeResult { png, dimensions },
        report,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mask::NormalizedMask;

    fn samples(d: Dimensions, f: impl Fn(u32, u32) -> bool) -> MaskPayload {
        let mut v = Vec::with_capacity(d.pixel_count());
        for y in 0..d.height {
            for x in 0..d.width {
                v.push(if f(x, y) { 1.0 } else { 0.0 });
            }
        }
        MaskPayload::Samples(v)
    }

    fn masks(entries: Vec<(&str, MaskPayload)>) -> InstanceMasks {
        entries
            .into_iter()
            .map(|(id, p)| (InstanceId::new(id), p))
            .collect()
    }

    fn resolve(d: Dimensions, m: &InstanceMasks, s: &Selection) -> (Overlay, HighlightReport) {
        resolve_overlay(d, m, s, |_, p| normalize_payload(p, d))
    }

    #[test]
    fn no_selection_is_passthrough() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![("shirt", samples(d, |_, _| true))]);
        let (overlay, report) = resolve(d, &m, &Selection::None);
        assert_eq!(overlay, Overlay::Passthrough);
        assert_eq!(report.status, HighlightStatus::Clean);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn single_instance_resolves_its_mask() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![
            ("shirt", samples(d, |x, _| x < 2)),
            ("pants", samples(d, |x, _| x >= 2)),
        ]);
        let (overlay, report) = resolve(d, &m, &Selection::Instance("shirt".into()));
        let Overlay::Region(region) = overlay else {
            unreachable!("expected a region");
        };
        assert_eq!(region, vec![NormalizedMask::from_fn(d, |x, _| x < 2)]);
        assert_eq!(report.status, HighlightStatus::Clean);
    }

    #[test]
    fn all_selects_every_instance() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![
            ("shirt", samples(d, |x, _| x < 2)),
            ("pants", samples(d, |x, _| x >= 2)),
        ]);
        let (overlay, _) = resolve(d, &m, &Selection::All);
        assert!(matches!(overlay, Overlay::Region(ref r) if r.len() == 2));
    }

    #[test]
    fn unknown_instance_is_degraded_passthrough() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![("shirt", samples(d, |_, _| true))]);
        let (overlay, report) = resolve(d, &m, &Selection::Instance("hat".into()));
        assert_eq!(overlay, Overlay::Passthrough);
        assert_eq!(report.status, HighlightStatus::Degraded);
        assert_eq!(
            report.issues,
            vec![MaskIssue::Rejected {
                instance: "hat".into(),
                error: MaskError::UnknownInstance("hat".into()),
            }]
        );
    }

    #[test]
    fn all_silent_masks_fall_back_to_placeholder() {
        let d = Dimensions::new(8, 8);
        let m = masks(vec![
            ("shirt", samples(d, |_, _| false)),
            ("pants", MaskPayload::Encoded(crate::EncodedMask::new("%%%"))),
        ]);
        let (overlay, report) = resolve(d, &m, &Selection::All);
        assert_eq!(overlay, Overlay::Placeholder);
        assert_eq!(report.status, HighlightStatus::Fallback);
        assert!(report.placeholder);
        assert_eq!(report.issues.len(), 2);
    }

    #[test]
    fn silent_mask_beside_real_mask_draws_only_real_one() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![
            ("shirt", samples(d, |x, _| x < 2)),
            ("pants", samples(d, |_, _| false)),
        ]);
        let (overlay, report) = resolve(d, &m, &Selection::All);
        assert!(matches!(overlay, Overlay::Region(ref r) if r.len() == 1));
        assert!(!report.placeholder);
        assert_eq!(report.status, HighlightStatus::Clean);
        assert_eq!(report.issues, vec![MaskIssue::NoSignal("pants".into())]);
    }

    #[test]
    fn mismatched_mask_is_excluded_and_reported() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![
            ("shirt", samples(d, |x, _| x < 2)),
            ("pants", MaskPayload::Samples(vec![1.0; 15])),
        ]);
        let (overlay, report) = resolve(d, &m, &Selection::All);
        assert!(matches!(overlay, Overlay::Region(ref r) if r.len() == 1));
        assert_eq!(report.status, HighlightStatus::Degraded);
        assert_eq!(
            report.issues,
            vec![MaskIssue::Rejected {
                instance: "pants".into(),
                error: MaskError::DimensionMismatch {
                    expected: 16,
                    actual: 15
                },
            }]
        );
    }

    #[test]
    fn faint_byte_mask_is_reported_blank() {
        let d = Dimensions::new(4, 4);
        let faint = vec![100.0; d.pixel_count()];
        let m = masks(vec![
            ("shirt", samples(d, |x, _| x < 2)),
            ("pants", MaskPayload::Samples(faint)),
        ]);
        let (overlay, report) = resolve(d, &m, &Selection::All);
        assert!(matches!(overlay, Overlay::Region(ref r) if r.len() == 1));
        assert_eq!(report.status, HighlightStatus::Degraded);
        assert_eq!(report.issues, vec![MaskIssue::Blank("pants".into())]);

        let (overlay, report) = resolve(d, &m, &Selection::Instance("pants".into()));
        assert_eq!(overlay, Overlay::Passthrough);
        assert!(!report.placeholder);
        assert_eq!(report.status, HighlightStatus::Degraded);
    }

    #[test]
    fn cached_mask_of_wrong_size_is_rejected() {
        let d = Dimensions::new(4, 4);
        let m = masks(vec![("shirt", samples(d, |_, _| true))]);
        let stale = NormalizedMask::from_fn(Dimensions::new(2, 2), |_, _| true);
        let (overlay, report) = resolve_overlay(d, &m, &Selection::All, |_, _| {
            Ok(Normalized::Mask(stale.clone()))
        });
        assert_eq!(overlay, Overlay::Passthrough);
        assert_eq!(report.status, HighlightStatus::Degraded);
        assert_eq!(
            report.issues,
            vec![MaskIssue::Rejected {
                instance: "shirt".into(),
                error: MaskError::DimensionMismatch {
                    expected: 16,
                    actual: 4
                },
            }]
        );
    }

    #[test]
    fn render_falls_back_to_source_on_bad_overlay() {
        let source = RgbaImage::from_pixel(3, 3, image::Rgba([9, 9, 9, 255]));
        let prepared = Prepared {
            source: source.clone(),
            overlay: Overlay::Region(vec![NormalizedMask::empty(Dimensions::new(2, 2))]),
            report: HighlightReport::new(Selection::All),
        };
        let outcome = render(prepared, &HighlightStyle::NEON).unwrap();
        assert_eq!(outcome.report.status, HighlightStatus::Degraded);
        assert_eq!(outcome.result.png, raster::encode_png(&source).unwrap());
    }

    #[test]
    fn prepare_rejects_undecodable_source() {
        let m = InstanceMasks::new();
        assert!(matches!(
            prepare(&[], &m, &Selection::All),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(
            prepare(b"not an image", &m, &Selection::All),
            Err(PipelineError::ImageDecode(_))
        ));
    }
}
