use shared::{Detection, ModelConfig};

/// Applies the post-detection filters in order: confidence threshold, then
/// minimum box size (shorter side, pixels), then the detection cap. Running
/// the same filter twice with the same config is a no-op.
pub fn apply(detections: Vec<Detection>, config: &ModelConfig) -> Vec<Detection> {
    let min_side = config.min_detection_size as f32;
    let mut filtered: Vec<Detection> = detections
        .into_iter()
        .filter(|detection| detection.confidence >= config.confidence_threshold)
        .filter(|detection| detection.bbox.shorter_side() >= min_side)
        .collect();
    filtered.truncate(config.max_detections);
    filtered
}
