pub mod memory_service;
pub mod s3_service;

use async_trait::async_trait;
use image::ImageReader;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use thiserror::Error;

const MAX_IMAGE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("Invalid file format")]
    InvalidFormat,
    #[error("File too large")]
    FileTooLarge,
    #[error("object not found: {0}")]
    NotFound(String),
}

/// Result of a successful upload, including the public URL clients use to
/// display the image.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub url: String,
    pub key: String,
    pub width: u32,
    pub height: u32,
}

/// Blob storage for source and processed images. Keys are content-addressed
/// (`{folder}/{sha256}.{ext}`), so re-uploading identical bytes is a no-op
/// overwrite.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        data: &[u8],
        folder: &str,
        content_type: &str,
    ) -> Result<UploadedImage, StorageError>;

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn backend_name(&self) -> &'static str;
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

pub fn generate_object_key(folder: &str, image_hash: &str, file_extension: &str) -> String {
    format!(
        "{}/{}.{}",
        folder.trim_matches('/'),
        image_hash,
        file_extension
    )
}

pub fn extract_file_extension(mime_type: &str) -> Result<&'static str, StorageError> {
    match mime_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        _ => Err(StorageError::InvalidFormat),
    }
}

pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

pub fn validate_image_size(image_data: &[u8]) -> Result<(), StorageError> {
    if image_data.len() > MAX_IMAGE_SIZE {
        return Err(StorageError::FileTooLarge);
    }
    Ok(())
}

/// Reads the pixel dimensions from the image header; doubles as a format
/// sanity check before bytes hit the backend.
pub(crate) fn image_dimensions(data: &[u8]) -> Result<(u32, u32), StorageError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|_| StorageError::InvalidFormat)?
        .into_dimensions()
        .map_err(|_| StorageError::InvalidFormat)
}
