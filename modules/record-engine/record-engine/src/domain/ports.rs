use std::time::Duration;

use async_trait::async_trait;
use record_engine_sdk::PresignedUrl;

use super::error::DomainError;

/// Object storage holding the payloads referenced by object-store fields.
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    /// # Errors
    /// [`DomainError::Internal`] when the URL cannot be produced.
    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError>;

    /// # Errors
    /// [`DomainError::Internal`] when the URL cannot be produced.
    async fn presigned_download_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError>;
}
