use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{AnalysisResult, ImageStatus, ModelConfig};
use uuid::Uuid;

/// One uploaded image and the state of its most recent processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: String,
    pub user_uid: Uuid,
    pub image_url: String,
    pub storage_key: String,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelConfig>,
}

impl ImageRecord {
    pub fn new(
        user_uid: Uuid,
        image_url: String,
        storage_key: String,
        location: String,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            image_id: Uuid::new_v4().to_string(),
            user_uid,
            image_url,
            storage_key,
            location,
            latitude,
            longitude,
            uploaded_at: now,
            updated_at: now,
            status: ImageStatus::Pending,
            processed_image_url: None,
            processed_storage_key: None,
            analysis_results: None,
            error_message: None,
            model_config: None,
        }
    }

    pub fn apply(&mut self, patch: ImageRecordPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(value) = patch.processed_image_url {
            self.processed_image_url = value;
        }
        if let Some(value) = patch.processed_storage_key {
            self.processed_storage_key = value;
        }
        if let Some(value) = patch.analysis_results {
            self.analysis_results = value;
        }
        if let Some(value) = patch.error_message {
            self.error_message = value;
        }
        if let Some(config) = patch.model_config {
            self.model_config = Some(config);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for an image record. The outer `Option` decides whether a
/// field is touched at all; the inner `Option` distinguishes setting a value
/// from clearing the stored one.
#[derive(Debug, Clone, Default)]
pub struct ImageRecordPatch {
    pub status: Option<ImageStatus>,
    pub processed_image_url: Option<Option<String>>,
    pub processed_storage_key: Option<Option<String>>,
    pub analysis_results: Option<Option<AnalysisResult>>,
    pub error_message: Option<Option<String>>,
    pub model_config: Option<ModelConfig>,
}

impl ImageRecordPatch {
    pub fn status(status: ImageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}
