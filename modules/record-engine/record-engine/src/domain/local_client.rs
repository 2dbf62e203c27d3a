//! Local (in-process) client for the record engine.

use async_trait::async_trait;
use record_engine_sdk::{
    PresignedUrl, Record, RecordEngineClient, RecordEngineError, SearchQuery, TransitionRequest,
    WriteOptions,
};
use recordkit_db::Condition;
use recordkit_security::SecurityContext;
use serde_json::Value;

use super::collection::Collection;
use super::error::DomainError;
use crate::module::RecordEngine;

/// Local client over a [`RecordEngine`]. Permissions are always enforced.
#[derive(Clone, Debug)]
pub struct RecordEngineLocalClient {
    engine: RecordEngine,
}

impl RecordEngineLocalClient {
    #[must_use]
    pub fn new(engine: RecordEngine) -> Self {
        Self { engine }
    }

    fn collection(&self, op: &str, name: &str) -> Result<Collection, RecordEngineError> {
        self.engine
            .collection(name)
            .map_err(|e| log_and_convert(op, name, e))
    }
}

fn log_and_convert(op: &str, collection: &str, e: DomainError) -> RecordEngineError {
    tracing::error!(operation = op, collection, error = ?e, "record engine call failed");
    e.into()
}

#[async_trait]
impl RecordEngineClient for RecordEngineLocalClient {
    fn collections(&self) -> Vec<String> {
        self.engine.collections()
    }

    async fn get(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
    ) -> Result<Record, RecordEngineError> {
        self.collection("get", collection)?
            .get(ctx, identifier)
            .await
            .map_err(|e| log_and_convert("get", collection, e))
    }

    async fn search(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        query: SearchQuery,
    ) -> Result<Vec<Record>, RecordEngineError> {
        self.collection("search", collection)?
            .search(ctx, query)
            .await
            .map_err(|e| log_and_convert("search", collection, e))
    }

    async fn count(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        filter: Condition,
    ) -> Result<u64, RecordEngineError> {
        self.collection("count", collection)?
            .count(ctx, filter)
            .await
            .map_err(|e| log_and_convert("count", collection, e))
    }

    async fn create(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, RecordEngineError> {
        self.collection("create", collection)?
            .create(ctx, payload, options)
            .await
            .map_err(|e| log_and_convert("create", collection, e))
    }

    async fn update(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, RecordEngineError> {
        self.collection("update", collection)?
            .update(ctx, identifier, payload, options)
            .await
            .map_err(|e| log_and_convert("update", collection, e))
    }

    async fn delete(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
    ) -> Result<(), RecordEngineError> {
        self.collection("delete", collection)?
            .delete(ctx, identifier)
            .await
            .map_err(|e| log_and_convert("delete", collection, e))
    }

    async fn transition(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        request: TransitionRequest,
    ) -> Result<Record, RecordEngineError> {
        self.collection("transition", collection)?
            .transition(ctx, identifier, request)
            .await
            .map_err(|e| log_and_convert("transition", collection, e))
    }

    async fn presigned_upload_url(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, RecordEngineError> {
        self.collection("presigned_upload_url", collection)?
            .presigned_upload_url(ctx, identifier, field)
            .await
            .map_err(|e| log_and_convert("presigned_upload_url", collection, e))
    }

    async fn presigned_download_url(
        &self,
        ctx: &SecurityContext,
        collection: &str,
        identifier: &str,
        field: &str,
    ) -> Result<PresignedUrl, RecordEngineError> {
        self.collection("presigned_download_url", collection)?
            .presigned_download_url(ctx, identifier, field)
            .await
            .map_err(|e| log_and_convert("presigned_download_url", collection, e))
    }
}
