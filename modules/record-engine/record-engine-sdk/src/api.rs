//! Public API trait for the record engine.

use async_trait::async_trait;
use recordkit_db::Condition;
use recordkit_security::SecurityContext;
use serde_json::Value;

use crate::errors::RecordEngineError;
use crate::models::{PresignedUrl, Record, SearchQuery, TransitionRequest, WriteOptions};

/// Governed access to the collections of a record engine.
///
/// Every call is evaluated against the caller's [`SecurityContext`]: rows
/// outside the caller's row filter behave as if they did not exist, and
/// returned records carry only system fields and fields the caller may write.
///
/// ```ignore
/// let created = engine
///     .create(&ctx, "articles", json!({"title": "Hello"}), WriteOptions::default())
///     .await?;
/// let published = engine
///     .transition(&ctx, "articles", &created["id"].to_string(), TransitionRequest::new("publish"))
///     .await?;
/// ```
#[async_trait]
pub trait RecordEngineClient: Send + Sync {
    /// Names of the collections this engine serves.
    fn collections(&self) -> Vec<String>;

    /// Fetch one record by identifier (its `name` when the model declares one,
    /// otherwise its numeric id).
    ///
    /// # Errors
    /// `NotFound` when the record does not exist or is hidden from the caller.
    async fn get(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
    ) -> Result<Record, RecordEngineError>;

    /// # Errors
    /// `Validation` for an unknown sort field or direction.
    async fn search(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        query: SearchQuery,
    ) -> Result<Vec<Record>, RecordEngineError>;

    /// # Errors
    /// `Validation` when the filter names an undeclared field.
    async fn count(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        filter: Condition,
    ) -> Result<u64, RecordEngineError>;

    /// # Errors
    /// - `Validation` for a rejected payload or a protected field
    /// - `Conflict` on a unique constraint
    /// - `Forbidden` when the stored record is outside the caller's row filter
    async fn create(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, RecordEngineError>;

    /// # Errors
    /// As [`create`](Self::create), plus `NotFound` for a missing or hidden record.
    async fn update(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, RecordEngineError>;

    /// # Errors
    /// `NotFound` for a missing or hidden record.
    async fn delete(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
    ) -> Result<(), RecordEngineError>;

    /// # Errors
    /// - `StateMachine` when the trigger is not valid from the current state
    /// - `Conflict` when the state changed concurrently
    async fn transition(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        request: TransitionRequest,
    ) -> Result<Record, RecordEngineError>;

    /// # Errors
    /// `Validation` when `field` is not an object-store field or is not writable.
    async fn presigned_upload_url(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, RecordEngineError>;

    /// # Errors
    /// `NotFound` when no object has been stored for the field.
    async fn presigned_download_url(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, RecordEngineError>;
}
