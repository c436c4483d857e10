use shared::{AnalysisResult, BoundingBox, Detection, RawPrediction};
use std::collections::HashMap;

/// Converts provider-native center/size predictions into canonical
/// corner-form detections. Predictions without a class label fall back to
/// the numeric class id, then to "unknown".
pub fn canonicalize(predictions: Vec<RawPrediction>) -> Vec<Detection> {
    predictions
        .into_iter()
        .map(|prediction| {
            let class = match (prediction.class, prediction.class_id) {
                (Some(class), _) if !class.is_empty() => class,
                (_, Some(class_id)) => format!("class_{}", class_id),
                _ => "unknown".to_string(),
            };
            Detection {
                class,
                confidence: prediction.confidence,
                bbox: BoundingBox::from_center_size(
                    prediction.x,
                    prediction.y,
                    prediction.width,
                    prediction.height,
                ),
            }
        })
        .collect()
}

/// Summarizes a finished detection pass. The average confidence of an empty
/// detection set is 0, not NaN.
pub fn summarize(detections: &[Detection], model_used: &str) -> AnalysisResult {
    let total_detections = detections.len();
    let mut waste_types: HashMap<String, u32> = HashMap::new();
    let mut confidence_sum = 0.0f32;

    for detection in detections {
        *waste_types.entry(detection.class.clone()).or_insert(0) += 1;
        confidence_sum += detection.confidence;
    }

    let average_confidence = if total_detections > 0 {
        confidence_sum / total_detections as f32
    } else {
        0.0
    };

    let summary = if total_detections == 0 {
        "No waste objects detected".to_string()
    } else {
        format!(
            "Detected {} waste object(s) across {} categor{}",
            total_detections,
            waste_types.len(),
            if waste_types.len() == 1 { "y" } else { "ies" }
        )
    };

    AnalysisResult {
        total_detections,
        average_confidence,
        waste_types,
        detections: detections.to_vec(),
        model_used: model_used.to_string(),
        summary,
    }
}
