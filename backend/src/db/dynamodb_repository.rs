use super::models::{ImageRecord, ImageRecordPatch};
use super::{ImageRepository, RepositoryError};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use shared::ImageStatus;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// DynamoDB-backed image repository. The table is keyed by `image_id`;
/// analysis and model-config payloads are stored as JSON strings.
#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    images_table: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, images_table: String) -> Self {
        Self {
            client,
            images_table,
        }
    }

    fn key_for(image_id: &str) -> HashMap<String, AttributeValue> {
        let mut key = HashMap::new();
        key.insert(
            "image_id".to_string(),
            AttributeValue::S(image_id.to_string()),
        );
        key
    }

    fn record_to_item(
        record: &ImageRecord,
    ) -> Result<HashMap<String, AttributeValue>, RepositoryError> {
        let mut item = HashMap::new();
        item.insert(
            "image_id".to_string(),
            AttributeValue::S(record.image_id.clone()),
        );
        item.insert(
            "user_uid".to_string(),
            AttributeValue::S(record.user_uid.to_string()),
        );
        item.insert(
            "image_url".to_string(),
            AttributeValue::S(record.image_url.clone()),
        );
        item.insert(
            "storage_key".to_string(),
            AttributeValue::S(record.storage_key.clone()),
        );
        item.insert(
            "location".to_string(),
            AttributeValue::S(record.location.clone()),
        );
        item.insert(
            "uploaded_at".to_string(),
            AttributeValue::S(record.uploaded_at.to_rfc3339()),
        );
        item.insert(
            "updated_at".to_string(),
            AttributeValue::S(record.updated_at.to_rfc3339()),
        );
        item.insert(
            "status".to_string(),
            AttributeValue::S(record.status.to_string()),
        );

        if let Some(latitude) = record.latitude {
            item.insert(
                "latitude".to_string(),
                AttributeValue::N(latitude.to_string()),
            );
        }
        if let Some(longitude) = record.longitude {
            item.insert(
                "longitude".to_string(),
                AttributeValue::N(longitude.to_string()),
            );
        }
        if let Some(url) = &record.processed_image_url {
            item.insert(
                "processed_image_url".to_string(),
                AttributeValue::S(url.clone()),
            );
        }
        if let Some(key) = &record.processed_storage_key {
            item.insert(
                "processed_storage_key".to_string(),
                AttributeValue::S(key.clone()),
            );
        }
        if let Some(analysis) = &record.analysis_results {
            item.insert(
                "analysis_results".to_string(),
                AttributeValue::S(serde_json::to_string(analysis)?),
            );
        }
        if let Some(message) = &record.error_message {
            item.insert(
                "error_message".to_string(),
                AttributeValue::S(message.clone()),
            );
        }
        if let Some(config) = &record.model_config {
            item.insert(
                "model_config".to_string(),
                AttributeValue::S(serde_json::to_string(config)?),
            );
        }

        Ok(item)
    }

    fn parse_record_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<ImageRecord, RepositoryError> {
        let image_id = item
            .get("image_id")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid image_id".to_string()))?
            .clone();

        let user_uid = item
            .get("user_uid")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid user_uid".to_string()))?;

        let image_url = item
            .get("image_url")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid image_url".to_string()))?
            .clone();

        let storage_key = item
            .get("storage_key")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid storage_key".to_string()))?
            .clone();

        let location = item
            .get("location")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid location".to_string()))?
            .clone();

        let uploaded_at = item
            .get("uploaded_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidData("Invalid uploaded_at".to_string()))?;

        let updated_at = item
            .get("updated_at")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(uploaded_at);

        let status = item
            .get("status")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| ImageStatus::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid status".to_string()))?;

        let latitude = item
            .get("latitude")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<f64>().ok());

        let longitude = item
            .get("longitude")
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<f64>().ok());

        let processed_image_url = item
            .get("processed_image_url")
            .and_then(|v| v.as_s().ok())
            .cloned();

        let processed_storage_key = item
            .get("processed_storage_key")
            .and_then(|v| v.as_s().ok())
            .cloned();

        let analysis_results = item
            .get("analysis_results")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| serde_json::from_str(s).ok());

        let error_message = item
            .get("error_message")
            .and_then(|v| v.as_s().ok())
            .cloned();

        let model_config = item
            .get("model_config")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| serde_json::from_str(s).ok());

        Ok(ImageRecord {
            image_id,
            user_uid,
            image_url,
            storage_key,
            location,
            latitude,
            longitude,
            uploaded_at,
            updated_at,
            status,
            processed_image_url,
            processed_storage_key,
            analysis_results,
            error_message,
            model_config,
        })
    }

    fn sort_newest_first(mut records: Vec<ImageRecord>) -> Vec<ImageRecord> {
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        records
    }
}

#[async_trait]
impl ImageRepository for DynamoDbRepository {
    async fn insert(&self, record: &ImageRecord) -> Result<(), RepositoryError> {
        let item = Self::record_to_item(record)?;
        self.client
            .put_item()
            .table_name(&self.images_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        log::debug!("Stored image record {}", record.image_id);
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.images_table)
            .set_key(Some(Self::key_for(image_id)))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            Ok(Some(self.parse_record_from_item(item)?))
        } else {
            Ok(None)
        }
    }

    async fn list_by_owner(&self, user_uid: Uuid) -> Result<Vec<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.images_table)
            .filter_expression("user_uid = :user_uid")
            .expression_attribute_values(":user_uid", AttributeValue::S(user_uid.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut records = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                records.push(self.parse_record_from_item(item)?);
            }
        }
        Ok(Self::sort_newest_first(records))
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.images_table)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut records = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                records.push(self.parse_record_from_item(item)?);
            }
        }
        Ok(Self::sort_newest_first(records))
    }

    async fn update(
        &self,
        image_id: &str,
        patch: ImageRecordPatch,
    ) -> Result<ImageRecord, RepositoryError> {
        let mut update_expression_parts: Vec<String> = Vec::new();
        let mut remove_parts: Vec<String> = Vec::new();
        let mut expression_attribute_names = HashMap::new();
        let mut expression_attribute_values = HashMap::new();

        if let Some(status) = patch.status {
            // "status" is a DynamoDB reserved word.
            update_expression_parts.push("#status = :status".to_string());
            expression_attribute_names.insert("#status".to_string(), "status".to_string());
            expression_attribute_values
                .insert(":status".to_string(), AttributeValue::S(status.to_string()));
        }

        match patch.processed_image_url {
            Some(Some(url)) => {
                update_expression_parts.push("processed_image_url = :processed_image_url".to_string());
                expression_attribute_values
                    .insert(":processed_image_url".to_string(), AttributeValue::S(url));
            }
            Some(None) => remove_parts.push("processed_image_url".to_string()),
            None => {}
        }

        match patch.processed_storage_key {
            Some(Some(key)) => {
                update_expression_parts
                    .push("processed_storage_key = :processed_storage_key".to_string());
                expression_attribute_values
                    .insert(":processed_storage_key".to_string(), AttributeValue::S(key));
            }
            Some(None) => remove_parts.push("processed_storage_key".to_string()),
            None => {}
        }

        match patch.analysis_results {
            Some(Some(analysis)) => {
                update_expression_parts.push("analysis_results = :analysis_results".to_string());
                expression_attribute_values.insert(
                    ":analysis_results".to_string(),
                    AttributeValue::S(serde_json::to_string(&analysis)?),
                );
            }
            Some(None) => remove_parts.push("analysis_results".to_string()),
            None => {}
        }

        match patch.error_message {
            Some(Some(message)) => {
                update_expression_parts.push("error_message = :error_message".to_string());
                expression_attribute_values
                    .insert(":error_message".to_string(), AttributeValue::S(message));
            }
            Some(None) => remove_parts.push("error_message".to_string()),
            None => {}
        }

        if let Some(config) = patch.model_config {
            update_expression_parts.push("model_config = :model_config".to_string());
            expression_attribute_values.insert(
                ":model_config".to_string(),
                AttributeValue::S(serde_json::to_string(&config)?),
            );
        }

        update_expression_parts.push("updated_at = :updated_at".to_string());
        expression_attribute_values.insert(
            ":updated_at".to_string(),
            AttributeValue::S(Utc::now().to_rfc3339()),
        );

        let mut update_expression = format!("SET {}", update_expression_parts.join(", "));
        if !remove_parts.is_empty() {
            update_expression.push_str(" REMOVE ");
            update_expression.push_str(&remove_parts.join(", "));
        }

        log::debug!("Update expression for {}: {}", image_id, update_expression);

        let mut update_request = self
            .client
            .update_item()
            .table_name(&self.images_table)
            .set_key(Some(Self::key_for(image_id)))
            .update_expression(update_expression)
            .condition_expression("attribute_exists(image_id)")
            .set_expression_attribute_values(Some(expression_attribute_values))
            .return_values(ReturnValue::AllNew);

        if !expression_attribute_names.is_empty() {
            update_request =
                update_request.set_expression_attribute_names(Some(expression_attribute_names));
        }

        match update_request.send().await {
            Ok(response) => {
                let attributes = response.attributes.ok_or_else(|| {
                    RepositoryError::InvalidData("Update returned no attributes".to_string())
                })?;
                self.parse_record_from_item(attributes)
            }
            Err(e) => {
                let condition_failed = e
                    .as_service_error()
                    .map(|err| err.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if condition_failed {
                    return Err(RepositoryError::NotFound);
                }
                log::error!("DynamoDB update_item failed for image {}: {:?}", image_id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn remove(&self, image_id: &str) -> Result<Option<ImageRecord>, RepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.images_table)
            .set_key(Some(Self::key_for(image_id)))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.attributes {
            Ok(Some(self.parse_record_from_item(item)?))
        } else {
            Ok(None)
        }
    }

    fn backend_name(&self) -> &'static str {
        "dynamodb"
    }
}
