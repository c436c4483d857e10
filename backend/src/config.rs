use serde::Deserialize;
use shared::{ModelConfig, ProviderKind};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub base_url: String,
    pub jwt_secret: String,
    pub detector: DetectorConfig,
    pub storage: StorageConfig,
    pub repository: RepositoryConfig,
    pub ml: MlConfig,
    pub local_model: LocalModelConfig,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryBackend {
    DynamoDb,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub aws_region: String,
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub backend: RepositoryBackend,
    pub images_table: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MlConfig {
    pub defaults: ModelConfig,
    pub async_processing: bool,
    pub processing_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct LocalModelConfig {
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
}

impl AppConfig {
    /// Builds the configuration from environment variables. Never panics:
    /// unset or invalid values fall back to defaults with a warning, and
    /// cloud backends degrade to their in-memory counterparts.
    pub fn from_env() -> Self {
        let port = parse_env("PORT", 8081u16);
        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port));
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            log::warn!("JWT_SECRET not set; using an insecure development secret");
            "binsight-dev-secret".to_string()
        });

        let detector = DetectorConfig {
            api_url: env::var("DETECTOR_API_URL")
                .unwrap_or_else(|_| "https://serverless.roboflow.com".to_string()),
            api_key: non_empty(env::var("DETECTOR_API_KEY").ok()),
            model_id: non_empty(env::var("DETECTOR_MODEL_ID").ok())
                .or_else(|| Some("garbage-det-t1lur/1".to_string())),
        };

        let s3_bucket = non_empty(env::var("S3_BUCKET_NAME").ok());
        let storage = StorageConfig {
            backend: storage_backend(env::var("STORAGE_BACKEND").ok().as_deref(), &s3_bucket),
            s3_bucket,
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        };

        let images_table = non_empty(env::var("DYNAMODB_IMAGES_TABLE").ok());
        let repository = RepositoryConfig {
            backend: repository_backend(env::var("STORE_BACKEND").ok().as_deref(), &images_table),
            images_table,
        };

        let base_defaults = ModelConfig::default();
        let defaults = ModelConfig {
            confidence_threshold: parse_env(
                "ML_CONFIDENCE_THRESHOLD",
                base_defaults.confidence_threshold,
            )
            .clamp(0.0, 1.0),
            min_detection_size: parse_env("ML_MIN_DETECTION_SIZE", base_defaults.min_detection_size),
            max_detections: parse_env("ML_MAX_DETECTIONS", base_defaults.max_detections),
            provider: env::var("ML_PROVIDER")
                .ok()
                .and_then(|raw| match ProviderKind::from_str(&raw) {
                    Ok(kind) => Some(kind),
                    Err(_) => {
                        log::warn!("Unknown ML_PROVIDER '{}'; using hosted", raw);
                        None
                    }
                })
                .unwrap_or(base_defaults.provider),
            fallback_to_local: parse_env("ML_FALLBACK_TO_LOCAL", base_defaults.fallback_to_local),
        };

        let ml = MlConfig {
            defaults,
            async_processing: parse_env("ML_ASYNC_PROCESSING", false),
            processing_timeout_secs: parse_env("ML_PROCESSING_TIMEOUT_SECS", 120u64),
        };

        let local_model = LocalModelConfig {
            model_path: non_empty(env::var("LOCAL_MODEL_PATH").ok()).map(PathBuf::from),
            labels_path: non_empty(env::var("LOCAL_MODEL_LABELS").ok()).map(PathBuf::from),
        };

        Self {
            port,
            base_url,
            jwt_secret,
            detector,
            storage,
            repository,
            ml,
            local_model,
        }
    }
}

fn storage_backend(raw: Option<&str>, s3_bucket: &Option<String>) -> StorageBackend {
    match raw {
        Some("s3") => {
            if s3_bucket.is_some() {
                StorageBackend::S3
            } else {
                log::warn!("STORAGE_BACKEND=s3 but S3_BUCKET_NAME is not set; using memory");
                StorageBackend::Memory
            }
        }
        Some("memory") => StorageBackend::Memory,
        Some(other) => {
            log::warn!("Unknown STORAGE_BACKEND '{}'; using memory", other);
            StorageBackend::Memory
        }
        None if s3_bucket.is_some() => StorageBackend::S3,
        None => StorageBackend::Memory,
    }
}

fn repository_backend(raw: Option<&str>, images_table: &Option<String>) -> RepositoryBackend {
    match raw {
        Some("dynamodb") => {
            if images_table.is_some() {
                RepositoryBackend::DynamoDb
            } else {
                log::warn!("STORE_BACKEND=dynamodb but DYNAMODB_IMAGES_TABLE is not set; using memory");
                RepositoryBackend::Memory
            }
        }
        Some("memory") => RepositoryBackend::Memory,
        Some(other) => {
            log::warn!("Unknown STORE_BACKEND '{}'; using memory", other);
            RepositoryBackend::Memory
        }
        None if images_table.is_some() => RepositoryBackend::DynamoDb,
        None => RepositoryBackend::Memory,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Invalid value for {} ('{}'): {}; using default", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Per-request overrides for the model configuration, used by both the
/// reprocess endpoint and the admin config endpoint. Absent fields keep
/// their current values.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct MlConfigUpdate {
    pub confidence_threshold: Option<f32>,
    pub min_detection_size: Option<u32>,
    pub max_detections: Option<usize>,
    pub provider: Option<ProviderKind>,
    pub fallback_to_local: Option<bool>,
}

pub fn merge_model_config(base: ModelConfig, update: &MlConfigUpdate) -> ModelConfig {
    let mut config = base;
    if let Some(value) = update.confidence_threshold {
        config.confidence_threshold = value.clamp(0.0, 1.0);
    }
    if let Some(value) = update.min_detection_size {
        config.min_detection_size = value;
    }
    if let Some(value) = update.max_detections {
        config.max_detections = value;
    }
    if let Some(value) = update.provider {
        config.provider = value;
    }
    if let Some(value) = update.fallback_to_local {
        config.fallback_to_local = value;
    }
    config
}

/// Mutable ML defaults, adjustable at runtime through the admin API.
pub struct MlSettings {
    defaults: RwLock<ModelConfig>,
}

impl MlSettings {
    pub fn new(defaults: ModelConfig) -> Self {
        Self {
            defaults: RwLock::new(defaults),
        }
    }

    pub async fn current(&self) -> ModelConfig {
        *self.defaults.read().await
    }

    pub async fn apply(&self, update: &MlConfigUpdate) -> ModelConfig {
        let mut defaults = self.defaults.write().await;
        *defaults = merge_model_config(*defaults, update);
        *defaults
    }
}
