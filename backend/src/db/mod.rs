pub mod dynamodb_repository;
pub mod memory_repository;
pub mod models;

use async_trait::async_trait;
use models::{ImageRecord, ImageRecordPatch};
use shared::ImageStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

/// Persistence boundary for image records. Updates are atomic per image id:
/// a patch is applied in one backend operation, never as a read-modify-write
/// visible to concurrent callers.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    async fn insert(&self, record: &ImageRecord) -> Result<(), RepositoryError>;

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    /// Records owned by one user, newest upload first.
    async fn list_by_owner(&self, user_uid: Uuid) -> Result<Vec<ImageRecord>, RepositoryError>;

    /// All records, newest upload first.
    async fn list_all(&self) -> Result<Vec<ImageRecord>, RepositoryError>;

    /// Applies `patch` and returns the updated record. `NotFound` when the
    /// image id does not exist.
    async fn update(
        &self,
        image_id: &str,
        patch: ImageRecordPatch,
    ) -> Result<ImageRecord, RepositoryError>;

    /// Deletes the record, returning it when it existed.
    async fn remove(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError>;

    async fn set_status(&self, image_id: &str, status: ImageStatus) -> Result<(), RepositoryError> {
        self.update(image_id, ImageRecordPatch::status(status))
            .await
            .map(|_| ())
    }

    fn backend_name(&self) -> &'static str;
}
