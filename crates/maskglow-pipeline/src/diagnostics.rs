//! Highlight diagnostics: timing and counts for each stage.
//!
//! Timing goes through the [`Clock`] trait so this crate stays free of
//! platform time sources; the bench binary supplies a
//! `std::time::Instant` clock.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::composite::{self, CompositeRequest, HighlightStyle};
use crate::pipeline::{self, HighlightOutcome, HighlightReport, HighlightStatus, InstanceMasks};
use crate::raster;
use crate::types::{CompositeResult, Dimensions, PipelineError, Selection};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single highlight run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightDiagnostics {
    /// Stage 1: source image decoding.
    pub source_decode: StageDiagnostics,
    /// Stage 2: mask decoding, normalization and selection.
    pub mask_decode: StageDiagnostics,
    /// Stage 3: fill and border passes.
    pub composite: StageDiagnostics,
    /// Stage 4: PNG encoding.
    pub encode: StageDiagnostics,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Outcome summary.
    pub summary: HighlightSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Source decoding.
    SourceDecode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded width in pixels.
        width: u32,
        /// Decoded height in pixels.
        height: u32,
    },
    /// Mask resolution.
    MaskDecode {
        /// Masks available in the response.
        available: usize,
        /// Masks that contribute to the region.
        used: usize,
        /// Masks that were silent or rejected.
        issues: usize,
    },
    /// Compositing.
    Composite {
        /// Pixels inside the highlighted region.
        highlighted_pixels: usize,
        /// Region pixels on its boundary.
        boundary_pixels: usize,
        /// Whether the placeholder was drawn.
        placeholder: bool,
    },
    /// PNG encoding.
    Encode {
        /// Encoded output size.
        output_bytes: usize,
    },
}

/// High-level summary of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightSummary {
    /// Rendered selection key.
    pub selection: String,
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Final status.
    pub status: HighlightStatus,
}

/// Run [`crate::highlight`] while timing every stage.
///
/// Unlike [`pipeline::render`], a compositing failure is returned as an
/// error here so benchmarks never report a passthrough as a success.
///
/// # Errors
///
/// Same as [`pipeline::prepare`], plus
/// [`PipelineError::MaskDimensions`] and [`PipelineError::Encode`].
pub fn highlight_with_diagnostics<C: Clock>(
    image_bytes: &[u8],
    masks: &InstanceMasks,
    selection: &Selection,
    style: &HighlightStyle,
    clock: &C,
) -> Result<(HighlightOutcome, HighlightDiagnostics), PipelineError> {
    let total_start = clock.now();

    let start = clock.now();
    let source = raster::decode_source(image_bytes)?;
    let dimensions = Dimensions::of(&source);
    let source_decode = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::SourceDecode {
            input_bytes: image_bytes.len(),
            width: dimensions.width,
            height: dimensions.height,
        },
    };

    let start = clock.now();
    let prepared = pipeline::prepare_decoded(source, masks, selection, pipeline::normalize_payload);
    let used = match &prepared.overlay {
        composite::Overlay::Region(region) => region.len(),
        _ => 0,
    };
    let mask_decode = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::MaskDecode {
            available: masks.len(),
            used,
            issues: prepared.report.issues.len(),
        },
    };

    let start = clock.now();
    let mut report: HighlightReport = prepared.report;
    let (painted, stats) = composite::apply_overlay(
        CompositeRequest {
            source: prepared.source,
            overlay: prepared.overlay,
        },
        style,
    )?;
    report.highlighted_pixels = stats.highlighted_pixels;
    let composite = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Composite {
            highlighted_pixels: stats.highlighted_pixels,
            boundary_pixels: stats.boundary_pixels,
            placeholder: stats.placeholder,
        },
    };

    let start = clock.now();
    let png = raster::encode_png(&painted)?;
    let encode = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Encode {
            output_bytes: png.len(),
        },
    };

    let summary = HighlightSummary {
        selection: selection.key().into_owned(),
        image_width: dimensions.width,
        image_height: dimensions.height,
        status: report.status,
    };
    let diagnostics = HighlightDiagnostics {
        source_decode,
        mask_decode,
        composite,
        encode,
        total_duration: clock.elapsed(&total_start),
        summary,
    };
    let outcome = HighlightOutcome {
        result: CompositeResult { png, dimensions },
        report,
    };
    Ok((outcome, diagnostics))
}

impl HighlightDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Highlight Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{}  |  Selection: {}  |  Status: {:?}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.selection,
            self.summary.status,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }

    /// Stages in execution order with display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 4] {
        [
            ("Source Decode", &self.source_decode),
            ("Mask Decode", &self.mask_decode),
            ("Composite", &self.composite),
            ("Encode", &self.encode),
        ]
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::SourceDecode {
            input_bytes,
            width,
            height,
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::MaskDecode {
            available,
            used,
            issues,
        } => format!("{used}/{available} masks used, {issues} issues"),
        StageMetrics::Composite {
            highlighted_pixels,
            boundary_pixels,
            placeholder,
        } => {
            let tag = if *placeholder { " (placeholder)" } else { "" };
            format!("{highlighted_pixels} px filled, {boundary_pixels} px rim{tag}")
        }
        StageMetrics::Encode { output_bytes } => format!("{output_bytes} bytes PNG"),
    }
}
