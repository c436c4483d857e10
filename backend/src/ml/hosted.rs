use super::normalize;
use super::provider::{DetectionProvider, ImageSource, ProviderError};
use crate::config::DetectorConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use shared::{Detection, ModelConfig, ProviderKind, RawPrediction};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter for a hosted inference endpoint (Roboflow-style API). Requests
/// are `POST {api_url}/{model_id}?api_key=..&confidence=..` with the image
/// passed either as an `image` URL parameter or as a base64 body.
#[derive(Clone)]
pub struct HostedDetector {
    http_client: HttpClient,
    api_url: String,
    api_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct HostedResponse {
    #[serde(default)]
    predictions: Vec<RawPrediction>,
    #[serde(default)]
    error: Option<Value>,
}

impl HostedDetector {
    /// Returns `None` when the endpoint is not fully configured, which
    /// disables hosted detection rather than failing requests later.
    pub fn from_config(config: &DetectorConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        let model_id = config.model_id.clone()?;
        let http_client = match HttpClient::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                log::error!("Failed to build HTTP client for hosted detection: {}", e);
                return None;
            }
        };
        Some(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            model_id,
        })
    }

    fn parse_response(body: &str) -> Result<Vec<RawPrediction>, ProviderError> {
        let response: HostedResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if let Some(error) = response.error {
            let detail = match error {
                Value::String(message) => message,
                other => other.to_string(),
            };
            return Err(ProviderError::Service(detail));
        }
        Ok(response.predictions)
    }
}

#[async_trait]
impl DetectionProvider for HostedDetector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Hosted
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn detect(
        &self,
        source: &ImageSource,
        config: &ModelConfig,
    ) -> Result<Vec<Detection>, ProviderError> {
        let url = format!("{}/{}", self.api_url, self.model_id);
        let confidence = config.confidence_threshold.to_string();
        let mut request = self
            .http_client
            .post(&url)
            .query(&[("api_key", self.api_key.as_str()), ("confidence", confidence.as_str())]);

        request = match source {
            ImageSource::Url(image_url) => request.query(&[("image", image_url.as_str())]),
            ImageSource::Bytes(bytes) => request
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(BASE64.encode(bytes)),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let detail = response.text().await?;
            return Err(ProviderError::Api { status, detail });
        }

        let body = response.text().await?;
        let predictions = Self::parse_response(&body)?;
        log::debug!(
            "Hosted model {} returned {} raw prediction(s)",
            self.model_id,
            predictions.len()
        );
        Ok(normalize::canonicalize(predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prediction_payload() {
        let body = r#"{
            "predictions": [
                {"x": 50.0, "y": 40.0, "width": 20.0, "height": 10.0,
                 "confidence": 0.83, "class": "plastic", "class_id": 2}
            ]
        }"#;
        let predictions = HostedDetector::parse_response(body).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].class.as_deref(), Some("plastic"));
        assert!((predictions[0].confidence - 0.83).abs() < 1e-6);
    }

    #[test]
    fn missing_predictions_key_means_no_detections() {
        let predictions = HostedDetector::parse_response("{}").unwrap();
        assert!(predictions.is_empty());
    }

    #[test]
    fn error_payload_becomes_service_error() {
        let err = HostedDetector::parse_response(r#"{"error": "invalid api key"}"#).unwrap_err();
        match err {
            ProviderError::Service(detail) => assert_eq!(detail, "invalid api key"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn structured_error_payload_is_stringified() {
        let err =
            HostedDetector::parse_response(r#"{"error": {"message": "quota exceeded"}}"#).unwrap_err();
        match err {
            ProviderError::Service(detail) => assert!(detail.contains("quota exceeded")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let err = HostedDetector::parse_response("not json").unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }
}
