use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// Axis-aligned bounding box in pixel coordinates, canonical corner-pair
/// form: `x1 <= x2` and `y1 <= y2` always hold after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Builds a box from the center+size convention used by hosted
    /// detection services.
    pub fn from_center_size(x: f32, y: f32, width: f32, height: f32) -> Self {
        let half_w = width.abs() / 2.0;
        let half_h = height.abs() / 2.0;
        Self::from_corners(x - half_w, y - half_h, x + half_w, y + half_h)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Length of the shorter side, used by the minimum-size filter.
    pub fn shorter_side(&self) -> f32 {
        self.width().min(self.height())
    }
}

/// One detected object in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Raw prediction object as returned by the hosted detection service:
/// center+size coordinates, optional class label and numeric class id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrediction {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub class_id: Option<i64>,
}

/// Lifecycle status of an image record.
///
/// Statuses are attempt-scoped, not image-scoped: a reprocess request moves
/// any terminal status back through `Processing`, so `MlFailed` and
/// `MlUnavailable` are terminal only for the attempt that produced them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Processing,
    Completed,
    MlFailed,
    MlUnavailable,
}

/// Terminal status of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Aggregated detection results for one processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub total_detections: usize,
    pub average_confidence: f32,
    pub waste_types: HashMap<String, u32>,
    pub detections: Vec<Detection>,
    pub model_used: String,
    pub summary: String,
}

impl AnalysisResult {
    /// Placeholder analysis for uploads where the caller skipped detection.
    pub fn skipped() -> Self {
        Self::placeholder("none", "Processing skipped by user request")
    }

    /// Placeholder analysis for attempts where no detection provider was
    /// available.
    pub fn unavailable() -> Self {
        Self::placeholder("none", "Detection unavailable; image stored without analysis")
    }

    fn placeholder(model_used: &str, summary: &str) -> Self {
        Self {
            total_detections: 0,
            average_confidence: 0.0,
            waste_types: HashMap::new(),
            detections: Vec::new(),
            model_used: model_used.to_string(),
            summary: summary.to_string(),
        }
    }
}

/// Result of one pipeline run for one image, independent of how many times
/// the image has been (re)processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub image_id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which detection provider a processing attempt should use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderKind {
    Hosted,
    Local,
}

/// Effective detection parameters for one processing attempt. A snapshot of
/// this is persisted with every attempt so callers can audit which
/// parameters produced which result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub confidence_threshold: f32,
    pub min_detection_size: u32,
    pub max_detections: usize,
    pub provider: ProviderKind,
    pub fallback_to_local: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.1,
            min_detection_size: 20,
            max_detections: 50,
            provider: ProviderKind::Hosted,
            fallback_to_local: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn center_size_canonicalization_orders_corners() {
        let bbox = BoundingBox::from_center_size(100.0, 50.0, 40.0, 20.0);
        assert!(bbox.x1 <= bbox.x2);
        assert!(bbox.y1 <= bbox.y2);
        assert_eq!(bbox.x1, 80.0);
        assert_eq!(bbox.x2, 120.0);
        assert_eq!(bbox.y1, 40.0);
        assert_eq!(bbox.y2, 60.0);
    }

    #[test]
    fn negative_size_still_yields_non_negative_extent() {
        let bbox = BoundingBox::from_center_size(10.0, 10.0, -8.0, -4.0);
        assert!(bbox.width() >= 0.0);
        assert!(bbox.height() >= 0.0);
        assert_eq!(bbox.width(), 8.0);
        assert_eq!(bbox.height(), 4.0);
    }

    #[test]
    fn swapped_corners_are_reordered() {
        let bbox = BoundingBox::from_corners(30.0, 40.0, 10.0, 20.0);
        assert_eq!(bbox.x1, 10.0);
        assert_eq!(bbox.y1, 20.0);
        assert_eq!(bbox.x2, 30.0);
        assert_eq!(bbox.y2, 40.0);
    }

    #[test]
    fn status_serializes_to_snake_case() {
        let json = serde_json::to_string(&ImageStatus::MlFailed).unwrap();
        assert_eq!(json, "\"ml_failed\"");
        assert_eq!(ImageStatus::MlUnavailable.to_string(), "ml_unavailable");
        assert_eq!(
            ImageStatus::from_str("ml_unavailable").unwrap(),
            ImageStatus::MlUnavailable
        );
    }

    #[test]
    fn provider_kind_round_trips_through_strings() {
        assert_eq!(ProviderKind::from_str("local").unwrap(), ProviderKind::Local);
        assert_eq!(ProviderKind::Hosted.to_string(), "hosted");
    }

    #[test]
    fn model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.confidence_threshold, 0.1);
        assert_eq!(config.min_detection_size, 20);
        assert_eq!(config.max_detections, 50);
        assert_eq!(config.provider, ProviderKind::Hosted);
        assert!(!config.fallback_to_local);
    }

    #[test]
    fn raw_prediction_parses_with_missing_class() {
        let raw: RawPrediction = serde_json::from_str(
            r#"{"x": 10.0, "y": 20.0, "width": 4.0, "height": 6.0, "confidence": 0.42}"#,
        )
        .unwrap();
        assert!(raw.class.is_none());
        assert!(raw.class_id.is_none());
        assert_eq!(raw.confidence, 0.42);
    }
}
