use super::filters;
use super::normalize;
use super::overlay::{self, OverlayStyle};
use super::provider::{DetectionProvider, ImageSource, ProviderError};
use crate::db::models::{ImageRecord, ImageRecordPatch};
use crate::db::ImageRepository;
use crate::storage::{ObjectStorage, UploadedImage};
use shared::{
    AnalysisResult, Detection, ImageStatus, ModelConfig, OutcomeStatus, ProcessingOutcome,
    ProviderKind,
};
use std::io::Cursor;
use std::sync::Arc;

const PROCESSED_FOLDER: &str = "processed";

/// A single processing request. `config` is the effective model config for
/// this attempt (defaults merged with any per-request overrides).
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub skip_ml: bool,
    pub config: ModelConfig,
}

struct AttemptSuccess {
    analysis: AnalysisResult,
    processed: Option<UploadedImage>,
}

struct AttemptFailure {
    error: String,
    analysis: Option<AnalysisResult>,
}

/// Drives one image through detection, overlay rendering and persistence.
///
/// `process` is infallible by design: every failure mode collapses into a
/// `ProcessingOutcome` and a terminal record status, so callers never have
/// to distinguish transport errors from pipeline errors.
pub struct ProcessingOrchestrator {
    repository: Arc<dyn ImageRepository>,
    storage: Arc<dyn ObjectStorage>,
    hosted: Option<Arc<dyn DetectionProvider>>,
    local: Option<Arc<dyn DetectionProvider>>,
    overlay_style: OverlayStyle,
}

impl ProcessingOrchestrator {
    pub fn new(
        repository: Arc<dyn ImageRepository>,
        storage: Arc<dyn ObjectStorage>,
        hosted: Option<Arc<dyn DetectionProvider>>,
        local: Option<Arc<dyn DetectionProvider>>,
    ) -> Self {
        Self {
            repository,
            storage,
            hosted,
            local,
            overlay_style: OverlayStyle::with_system_font(),
        }
    }

    pub fn provider_available(&self, kind: ProviderKind) -> bool {
        self.provider_for(kind).is_some()
    }

    fn provider_for(&self, kind: ProviderKind) -> Option<&Arc<dyn DetectionProvider>> {
        match kind {
            ProviderKind::Hosted => self.hosted.as_ref(),
            ProviderKind::Local => self.local.as_ref(),
        }
    }

    /// Runs one full processing attempt for `image_id`, leaving the record
    /// in a terminal status (`completed`, `ml_failed` or `ml_unavailable`).
    pub async fn process(&self, image_id: &str, request: ProcessRequest) -> ProcessingOutcome {
        let config = request.config;

        let record = match self.repository.get(image_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                log::error!("Processing requested for unknown image {}", image_id);
                return Self::not_found_outcome(image_id);
            }
            Err(e) => {
                log::error!("Failed to load image {} for processing: {}", image_id, e);
                return ProcessingOutcome {
                    image_id: image_id.to_string(),
                    status: OutcomeStatus::Failed,
                    processed_image_url: None,
                    analysis: None,
                    error: Some(e.to_string()),
                };
            }
        };

        self.mark(image_id, ImageStatus::Processing).await;

        if request.skip_ml {
            log::info!("Detection skipped for image {} by user request", image_id);
            return self
                .finish(
                    &record,
                    ImageStatus::Completed,
                    Some(AnalysisResult::skipped()),
                    None,
                    None,
                    &config,
                )
                .await;
        }

        if self.provider_for(config.provider).is_none() {
            log::warn!(
                "No {} detection provider configured; storing image {} without analysis",
                config.provider,
                image_id
            );
            return self
                .finish(
                    &record,
                    ImageStatus::MlUnavailable,
                    Some(AnalysisResult::unavailable()),
                    None,
                    None,
                    &config,
                )
                .await;
        }

        match self.run_attempt(&record, &config).await {
            Ok(attempt) => {
                self.finish(
                    &record,
                    ImageStatus::Completed,
                    Some(attempt.analysis),
                    attempt.processed,
                    None,
                    &config,
                )
                .await
            }
            Err(failure) => {
                log::error!(
                    "Processing attempt for image {} failed: {}",
                    image_id,
                    failure.error
                );
                self.finish(
                    &record,
                    ImageStatus::MlFailed,
                    failure.analysis,
                    None,
                    Some(failure.error),
                    &config,
                )
                .await
            }
        }
    }

    async fn run_attempt(
        &self,
        record: &ImageRecord,
        config: &ModelConfig,
    ) -> Result<AttemptSuccess, AttemptFailure> {
        // Source bytes feed both local inference and overlay rendering.
        // Losing them degrades the overlay, not the whole attempt.
        let source_bytes = match self.storage.fetch(&record.storage_key).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!(
                    "Could not fetch stored bytes for image {} ({}); overlay will be skipped",
                    record.image_id,
                    e
                );
                None
            }
        };

        let (detections, model_used) = self
            .detect_with_fallback(record, config, source_bytes.as_deref())
            .await
            .map_err(|e| AttemptFailure {
                error: e.to_string(),
                analysis: None,
            })?;

        let filtered = filters::apply(detections, config);
        let analysis = normalize::summarize(&filtered, &model_used);
        log::info!(
            "Image {}: {} detection(s) after filtering (model {})",
            record.image_id,
            filtered.len(),
            model_used
        );

        if filtered.is_empty() {
            return Ok(AttemptSuccess {
                analysis,
                processed: None,
            });
        }

        let Some(bytes) = source_bytes else {
            return Ok(AttemptSuccess {
                analysis,
                processed: None,
            });
        };

        match self.render_overlay(&record.image_id, &bytes, &filtered, config) {
            Some(jpeg) => match self.storage.upload(&jpeg, PROCESSED_FOLDER, "image/jpeg").await {
                Ok(uploaded) => Ok(AttemptSuccess {
                    analysis,
                    processed: Some(uploaded),
                }),
                Err(e) => Err(AttemptFailure {
                    error: format!("failed to store processed image: {}", e),
                    analysis: Some(analysis),
                }),
            },
            None => Ok(AttemptSuccess {
                analysis,
                processed: None,
            }),
        }
    }

    async fn detect_with_fallback(
        &self,
        record: &ImageRecord,
        config: &ModelConfig,
        source_bytes: Option<&[u8]>,
    ) -> Result<(Vec<Detection>, String), ProviderError> {
        match self
            .detect_with(config.provider, record, config, source_bytes)
            .await
        {
            Ok(result) => Ok(result),
            Err(primary_error) => {
                let fallback_possible = config.provider == ProviderKind::Hosted
                    && config.fallback_to_local
                    && self.provider_for(ProviderKind::Local).is_some();
                if !fallback_possible {
                    return Err(primary_error);
                }
                log::warn!(
                    "Hosted detection failed for image {} ({}); falling back to local model",
                    record.image_id,
                    primary_error
                );
                self.detect_with(ProviderKind::Local, record, config, source_bytes)
                    .await
            }
        }
    }

    async fn detect_with(
        &self,
        kind: ProviderKind,
        record: &ImageRecord,
        config: &ModelConfig,
        source_bytes: Option<&[u8]>,
    ) -> Result<(Vec<Detection>, String), ProviderError> {
        let Some(provider) = self.provider_for(kind) else {
            return Err(ProviderError::Service(format!(
                "{} provider not available",
                kind
            )));
        };

        let source = match kind {
            ProviderKind::Hosted => ImageSource::Url(record.image_url.clone()),
            ProviderKind::Local => {
                let Some(bytes) = source_bytes else {
                    return Err(ProviderError::Service(
                        "stored image bytes unavailable for local inference".to_string(),
                    ));
                };
                ImageSource::Bytes(bytes.to_vec())
            }
        };

        let detections = provider.detect(&source, config).await?;
        Ok((detections, provider.model_id().to_string()))
    }

    /// Renders the detection overlay and encodes it as JPEG. Rendering
    /// problems are not attempt failures; the record falls back to the
    /// source image URL instead.
    fn render_overlay(
        &self,
        image_id: &str,
        source_bytes: &[u8],
        detections: &[Detection],
        config: &ModelConfig,
    ) -> Option<Vec<u8>> {
        let img = match image::load_from_memory(source_bytes) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Could not decode source image {} for overlay: {}", image_id, e);
                return None;
            }
        };

        let rendered = overlay::render(&img, detections, config.confidence_threshold, &self.overlay_style);
        let mut buffer = Vec::new();
        if let Err(e) = rendered.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Jpeg) {
            log::warn!("Could not encode overlay for image {}: {}", image_id, e);
            return None;
        }
        Some(buffer)
    }

    /// Persists the attempt outcome and shapes the returned summary. A
    /// completed attempt with no processed upload reports the original
    /// image URL so clients always have something to display.
    async fn finish(
        &self,
        record: &ImageRecord,
        status: ImageStatus,
        analysis: Option<AnalysisResult>,
        processed: Option<UploadedImage>,
        error: Option<String>,
        config: &ModelConfig,
    ) -> ProcessingOutcome {
        let processed_url = match (&status, &processed) {
            (_, Some(uploaded)) => Some(uploaded.url.clone()),
            (ImageStatus::Completed, None) => Some(record.image_url.clone()),
            _ => None,
        };
        let processed_key = processed.as_ref().map(|uploaded| uploaded.key.clone());

        let patch = ImageRecordPatch {
            status: Some(status),
            processed_image_url: Some(processed_url.clone()),
            processed_storage_key: Some(processed_key),
            analysis_results: Some(analysis.clone()),
            error_message: Some(error.clone()),
            model_config: Some(*config),
        };
        if let Err(e) = self.repository.update(&record.image_id, patch).await {
            log::error!(
                "Failed to persist processing outcome for image {}: {}",
                record.image_id,
                e
            );
        }

        let outcome_status = if status == ImageStatus::MlFailed {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Completed
        };

        ProcessingOutcome {
            image_id: record.image_id.clone(),
            status: outcome_status,
            processed_image_url: processed_url,
            analysis,
            error,
        }
    }

    async fn mark(&self, image_id: &str, status: ImageStatus) {
        if let Err(e) = self.repository.set_status(image_id, status).await {
            log::warn!("Failed to set image {} status to {}: {}", image_id, status, e);
        }
    }

    fn not_found_outcome(image_id: &str) -> ProcessingOutcome {
        ProcessingOutcome {
            image_id: image_id.to_string(),
            status: OutcomeStatus::Failed,
            processed_image_url: None,
            analysis: None,
            error: Some(format!("image record not found: {}", image_id)),
        }
    }
}
