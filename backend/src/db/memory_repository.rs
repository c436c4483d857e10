use super::models::{ImageRecord, ImageRecordPatch};
use super::{ImageRepository, RepositoryError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process repository for development and tests. A single write-lock
/// acquisition per update keeps the read-modify-write atomic per image id.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    records: Arc<RwLock<HashMap<String, ImageRecord>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn insert(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert(record.image_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(image_id).cloned())
    }

    async fn list_by_owner(&self, user_uid: Uuid) -> Result<Vec<ImageRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut owned: Vec<ImageRecord> = records
            .values()
            .filter(|record| record.user_uid == user_uid)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(owned)
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, RepositoryError> {
        let records = self.records.read().await;
        let mut all: Vec<ImageRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(all)
    }

    async fn update(
        &self,
        image_id: &str,
        patch: ImageRecordPatch,
    ) -> Result<ImageRecord, RepositoryError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(image_id).ok_or(RepositoryError::NotFound)?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn remove(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        let mut records = self.records.write().await;
        Ok(records.remove(image_id))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ImageStatus;

    fn record_for(user: u128) -> ImageRecord {
        ImageRecord::new(
            Uuid::from_u128(user),
            "http://localhost/media/images/a.png".to_string(),
            "images/a.png".to_string(),
            "park".to_string(),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let repo = MemoryRepository::new();
        let record = record_for(1);
        repo.insert(&record).await.unwrap();

        let loaded = repo.get(&record.image_id).await.unwrap().unwrap();
        assert_eq!(loaded.image_id, record.image_id);
        assert_eq!(loaded.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let repo = MemoryRepository::new();
        let err = repo
            .update("missing", ImageRecordPatch::status(ImageStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn update_returns_patched_record() {
        let repo = MemoryRepository::new();
        let record = record_for(1);
        repo.insert(&record).await.unwrap();

        let updated = repo
            .update(
                &record.image_id,
                ImageRecordPatch {
                    status: Some(ImageStatus::MlFailed),
                    error_message: Some(Some("provider down".to_string())),
                    ..ImageRecordPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, ImageStatus::MlFailed);
        assert_eq!(updated.error_message.as_deref(), Some("provider down"));
    }

    #[tokio::test]
    async fn list_by_owner_filters_other_users() {
        let repo = MemoryRepository::new();
        repo.insert(&record_for(1)).await.unwrap();
        repo.insert(&record_for(1)).await.unwrap();
        repo.insert(&record_for(2)).await.unwrap();

        let owned = repo.list_by_owner(Uuid::from_u128(1)).await.unwrap();
        assert_eq!(owned.len(), 2);
        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn remove_returns_the_removed_record() {
        let repo = MemoryRepository::new();
        let record = record_for(1);
        repo.insert(&record).await.unwrap();

        let removed = repo.remove(&record.image_id).await.unwrap();
        assert!(removed.is_some());
        assert!(repo.get(&record.image_id).await.unwrap().is_none());
        assert!(repo.remove(&record.image_id).await.unwrap().is_none());
    }
}
