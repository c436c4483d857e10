use async_trait::async_trait;
use shared::{Detection, ModelConfig, ProviderKind};
use thiserror::Error;

/// Input handed to a detection provider. Hosted providers can work from a
/// public URL; the local model always needs the raw bytes.
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("detection API returned status {status}: {detail}")]
    Api { status: u16, detail: String },
    #[error("detection service error: {0}")]
    Service(String),
    #[error("invalid provider response: {0}")]
    Decode(String),
    #[error("image decoding failed: {0}")]
    Image(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("unsupported image source: {0}")]
    UnsupportedSource(&'static str),
}

/// A single detection backend. Implementations return detections in
/// canonical corner form; confidence filtering below `config` thresholds
/// may happen on either side of the wire, so callers must not rely on it
/// and should re-apply their own filters.
#[async_trait]
pub trait DetectionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Identifier recorded in analysis results as `model_used`.
    fn model_id(&self) -> &str;

    async fn detect(
        &self,
        source: &ImageSource,
        config: &ModelConfig,
    ) -> Result<Vec<Detection>, ProviderError>;
}
