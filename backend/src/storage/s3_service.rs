use super::{
    calculate_image_hash, extract_file_extension, generate_object_key, image_dimensions,
    validate_image_size, ObjectStorage, StorageError, UploadedImage,
};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

/// S3-backed image storage. Objects are served via the bucket's public
/// virtual-hosted URL, matching how processed images are linked in records.
#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    region: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String, region: String) -> Self {
        Self {
            client,
            bucket_name,
            region,
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket_name, self.region, key
        )
    }
}

#[async_trait]
impl ObjectStorage for S3Service {
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

        let body = ByteStream::from(data.to_vec());
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        log::debug!("Uploaded {} bytes to s3://{}/{}", data.len(), self.bucket_name, key);
        Ok(UploadedImage {
            url: self.public_url(&key),
            key,
            width,
            height,
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|err| err.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(e.to_string())
                }
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
