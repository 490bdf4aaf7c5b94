//! Detection and analysis service responses.
//!
//! Fields are optional and lenient because the service omits or
//! reshapes them across versions. Accessors apply the defaults the
//! display layer expects.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::InstanceMasks;
use crate::types::{Dimensions, InstanceId, MaskPayload};

/// Confidence assumed for instances that do not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Errors from interpreting a detection response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    /// The response lists no clothing instances.
    #[error("no clothing detected in the image")]
    NoClothing,
}

/// Axis-aligned bounding box in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl BoundingBox {
    /// Box assumed for instances that do not report one.
    pub const DEFAULT: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 100.0,
        height: 100.0,
    };
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One detected clothing item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClothingInstance {
    /// Type label, also the key of its mask (e.g. `"shirt"`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Share of the image covered, in percent.
    #[serde(default, deserialize_with = "lenient_number")]
    pub area_percentage: Option<f64>,
    /// Approximate covered pixel count.
    #[serde(default)]
    pub area_pixels: Option<u64>,
    /// Bounding box, if reported.
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// Detector confidence in `[0, 1]`, if reported.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ClothingInstance {
    /// Display label; `clothing_{index}` when the type is missing.
    #[must_use]
    pub fn label(&self, index: usize) -> String {
        match self.kind.as_deref() {
            Some(kind) if !kind.is_empty() => kind.to_owned(),
            _ => format!("clothing_{index}"),
        }
    }

    /// Confidence, or [`DEFAULT_CONFIDENCE`].
    #[must_use]
    pub fn confidence_or_default(&self) -> f64 {
        self.confidence.unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// Bounding box, or [`BoundingBox::DEFAULT`].
    #[must_use]
    pub fn bbox_or_default(&self) -> BoundingBox {
        self.bbox.unwrap_or_default()
    }
}

/// Per-instance mask payloads and the raster size they describe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationData {
    /// Mask payload per instance type.
    #[serde(default)]
    pub masks: BTreeMap<String, MaskPayload>,
    /// Mask width in pixels.
    #[serde(default)]
    pub width: Option<u32>,
    /// Mask height in pixels.
    #[serde(default)]
    pub height: Option<u32>,
}

/// Response of the clothing detection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    /// Detected items in service order.
    #[serde(default)]
    pub clothing_instances: Vec<ClothingInstance>,
    /// Segmentation masks, if the service produced them.
    #[serde(default)]
    pub segmentation_data: Option<SegmentationData>,
    /// Server-side processing time in seconds.
    #[serde(default)]
    pub processing_time: Option<f64>,
}

impl DetectionResponse {
    /// Fail if nothing was detected.
    ///
    /// # Errors
    ///
    /// Returns [`DetectionError::NoClothing`] when
    /// `clothing_instances` is empty.
    pub fn ensure_detected(&self) -> Result<(), DetectionError> {
        if self.clothing_instances.is_empty() {
            return Err(DetectionError::NoClothing);
        }
        Ok(())
    }

    /// Mask payloads keyed by instance id, ready for the pipeline.
    #[must_use]
    pub fn instance_masks(&self) -> InstanceMasks {
        self.segmentation_data
            .iter()
            .flat_map(|seg| &seg.masks)
            .map(|(id, payload)| (InstanceId::new(id.as_str()), payload.clone()))
            .collect()
    }

    /// Declared mask raster size, when both sides are present.
    #[must_use]
    pub fn mask_dimensions(&self) -> Option<Dimensions> {
        let seg = self.segmentation_data.as_ref()?;
        Some(Dimensions::new(seg.width?, seg.height?))
    }

    /// Summed area of every instance, rounded to one decimal; shown on
    /// the "all items" entry.
    #[must_use]
    pub fn total_area_percentage(&self) -> f64 {
        let sum: f64 = self
            .clothing_instances
            .iter()
            .filter_map(|i| i.area_percentage)
            .sum();
        (sum * 10.0).round() / 10.0
    }
}

/// Response of the colour analysis endpoint. Carried as data only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Dominant color as a CSS color string.
    #[serde(default)]
    pub dominant_color: Option<String>,
    /// Background-removed image, Base64 or data URL.
    #[serde(default, alias = "background_removed_image")]
    pub background_removed: Option<String>,
}

/// Accept a number, a numeric string, or `null`.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::types::EncodedMask;

    #[test]
    fn parses_full_response() {
        let json = r#"{
            "clothing_instances": [
                {"type": "shirt", "area_percentage": 31.26, "area_pixels": 3126,
                 "bbox": {"x": 10, "y": 12, "width": 80, "height": 40}, "confidence": 0.91},
                {"type": "pants", "area_percentage": "18.3"}
            ],
            "segmentation_data": {
                "masks": {"shirt": "H4sIAAAAAAAA", "pants": [0, 0.5, 1]},
                "width": 100, "height": 100
            },
            "processing_time": 1.25
        }"#;
        let resp: DetectionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.clothing_instances.len(), 2);
        assert_eq!(resp.clothing_instances[1].area_percentage, Some(18.3));
        assert_eq!(resp.mask_dimensions(), Some(Dimensions::new(100, 100)));
        assert_eq!(resp.total_area_percentage(), 49.6);

        let masks = resp.instance_masks();
        assert_eq!(
            masks.get(&InstanceId::new("shirt")),
            Some(&MaskPayload::Encoded(EncodedMask::new("H4sIAAAAAAAA")))
        );
        assert_eq!(
            masks.get(&InstanceId::new("pants")),
            Some(&MaskPayload::Samples(vec![0.0, 0.5, 1.0]))
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let resp: DetectionResponse =
            serde_json::from_str(r#"{"clothing_instances": [{}]}"#).unwrap();
        let inst = &resp.clothing_instances[0];
        assert_eq!(inst.label(3), "clothing_3");
        assert_eq!(inst.confidence_or_default(), DEFAULT_CONFIDENCE);
        assert_eq!(inst.bbox_or_default(), BoundingBox::DEFAULT);
        assert!(resp.instance_masks().is_empty());
        assert_eq!(resp.mask_dimensions(), None);
    }

    #[test]
    fn empty_detection_is_an_error() {
        let resp = DetectionResponse::default();
        assert_eq!(resp.ensure_detected(), Err(DetectionError::NoClothing));
    }

    #[test]
    fn unparseable_area_is_ignored() {
        let inst: ClothingInstance =
            serde_json::from_str(r#"{"type": "hat", "area_percentage": "n/a"}"#).unwrap();
        assert_eq!(inst.area_percentage, None);
    }

    #[test]
    fn analyze_accepts_legacy_field_name() {
        let resp: AnalyzeResponse = serde_json::from_str(
            r##"{"dominant_color": "#aabbcc", "background_removed_image": "data:image/png;base64,AA=="}"##,
        )
        .unwrap();
        assert_eq!(resp.dominant_color.as_deref(), Some("#aabbcc"));
        assert!(resp.background_removed.is_some());
    }
}
