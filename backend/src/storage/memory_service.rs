use super::{
    calculate_image_hash, extract_file_extension, generate_object_key, image_dimensions,
    validate_image_size, ObjectStorage, StorageError, UploadedImage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process blob store for development and tests. Objects are served back
/// through the `/media/{key}` route, so URLs stay working without S3.
#[derive(Clone)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new(base_url: String) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        data: &[u8],
        folder: &str,
        content_type: &str,
    ) -> Result<UploadedImage, StorageError> {
        validate_image_size(data)?;
        let extension = extract_file_extension(content_type)?;
        let (width, height) = image_dimensions(data)?;
        let key = generate_object_key(folder, &calculate_image_hash(data), extension);

        let mut objects = self.objects.write().await;
        objects.insert(key.clone(), data.to_vec());

        Ok(UploadedImage {
            url: format!("{}/media/{}", self.base_url, key),
            key,
            width,
            height,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
