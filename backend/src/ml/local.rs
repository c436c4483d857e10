use super::filters;
use super::provider::{DetectionProvider, ImageSource, ProviderError};
use crate::config::LocalModelConfig;
use async_trait::async_trait;
use shared::{BoundingBox, Detection, ModelConfig, ProviderKind};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};

const INPUT_SIZE: i64 = 640;

/// On-process TorchScript detector. The module is loaded lazily on first use
/// so a configured-but-broken model file degrades that attempt instead of
/// failing startup.
pub struct LocalDetector {
    module: Arc<Mutex<Option<CModule>>>,
    model_path: PathBuf,
    model_name: String,
    labels: Vec<String>,
}

impl LocalDetector {
    /// Returns `None` when no model path is configured or the file is
    /// missing, which disables local detection.
    pub fn from_config(config: &LocalModelConfig) -> Option<Self> {
        let model_path = config.model_path.clone()?;
        if !model_path.exists() {
            log::warn!(
                "Local model weights not found at {}; local detection disabled",
                model_path.display()
            );
            return None;
        }

        let model_name = model_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "local-model".to_string());
        let labels = config
            .labels_path
            .as_deref()
            .map(load_labels)
            .unwrap_or_default();

        Some(Self {
            module: Arc::new(Mutex::new(None)),
            model_path,
            model_name,
            labels,
        })
    }

    fn with_module<T>(
        &self,
        f: impl FnOnce(&CModule) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut guard = self
            .module
            .lock()
            .map_err(|_| ProviderError::Model("model lock poisoned".to_string()))?;

        if guard.is_none() {
            let device = Device::cuda_if_available();
            let module = CModule::load_on_device(&self.model_path, device)
                .map_err(|e| ProviderError::Model(e.to_string()))?;
            log::info!(
                "Loaded TorchScript model {} on {:?}",
                self.model_path.display(),
                device
            );
            *guard = Some(module);
        }

        match guard.as_ref() {
            Some(module) => f(module),
            None => Err(ProviderError::Model("model failed to initialize".to_string())),
        }
    }

    fn class_label(&self, class_id: i64) -> String {
        self.labels
            .get(class_id.max(0) as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    /// Runs one inference pass. The model is expected to emit `[N, 6]` rows
    /// of `[x1, y1, x2, y2, confidence, class_id]` in input-resolution
    /// coordinates; boxes are scaled back to the source resolution.
    fn run_inference(
        &self,
        image_bytes: &[u8],
        config: &ModelConfig,
    ) -> Result<Vec<Detection>, ProviderError> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| ProviderError::Image(e.to_string()))?;
        let (source_w, source_h) = (img.width() as f32, img.height() as f32);
        let resized = img
            .resize_exact(
                INPUT_SIZE as u32,
                INPUT_SIZE as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_rgb8();

        let input = Tensor::from_slice(resized.as_raw())
            .view([INPUT_SIZE, INPUT_SIZE, 3])
            .permute([2, 0, 1])
            .unsqueeze(0)
            .to_kind(Kind::Float)
            / 255.0;

        let mut output = self.with_module(|module| {
            module
                .forward_ts(&[&input])
                .map_err(|e| ProviderError::Model(e.to_string()))
        })?;

        let dims = output.size();
        let rows = match dims.as_slice() {
            [rows, 6] => *rows,
            [1, rows, 6] => {
                output = output.squeeze_dim(0);
                *rows
            }
            other => {
                return Err(ProviderError::Decode(format!(
                    "unexpected model output shape {:?}",
                    other
                )))
            }
        };

        let flat_tensor = output.to_kind(Kind::Float).contiguous().view([-1]);
        let numel = (rows * 6) as usize;
        let mut flat = vec![0.0f32; numel];
        flat_tensor.copy_data(&mut flat, numel);

        let scale_x = source_w / INPUT_SIZE as f32;
        let scale_y = source_h / INPUT_SIZE as f32;
        let mut detections: Vec<Detection> = flat
            .chunks_exact(6)
            .map(|row| Detection {
                class: self.class_label(row[5] as i64),
                confidence: row[4],
                bbox: BoundingBox::from_corners(
                    row[0] * scale_x,
                    row[1] * scale_y,
                    row[2] * scale_x,
                    row[3] * scale_y,
                ),
            })
            .collect();

        // Highest-confidence detections survive the cap.
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        Ok(filters::apply(detections, config))
    }
}

#[async_trait]
impl DetectionProvider for LocalDetector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }

    async fn detect(
        &self,
        source: &ImageSource,
        config: &ModelConfig,
    ) -> Result<Vec<Detection>, ProviderError> {
        let ImageSource::Bytes(bytes) = source else {
            return Err(ProviderError::UnsupportedSource(
                "local model requires image bytes",
            ));
        };
        self.run_inference(bytes, config)
    }
}

fn load_labels(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            log::warn!("Could not read labels file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}
