#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end flow through the local client: validators, codecs, enums,
//! encrypted and restricted fields, object-store uploads.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use record_engine::domain::plugins::{PluginRegistry, field_validator_fn};
use record_engine::domain::ports::ObjectStorePort;
use record_engine::{DomainError, EngineConfig, RecordEngine, RecordEngineLocalClient};
use record_engine_sdk::{
    Condition, ErrorKind, PresignedUrl, RecordEngineClient, SearchQuery, SecurityContext,
    WriteOptions,
};
use serde_json::json;
use time::OffsetDateTime;

const YAML: &str = r"
databases:
  - name: main
objectStores:
  - name: files
    endpointUrl: http://localhost:9000
    accessKey: minio
    secretKey: minio-secret
    presignTtlSecs: 60
encryptionKeys:
  - name: vault
    key: 5f4dcc3b5aa765d61d8327deb882cf995f4dcc3b5aa765d61d8327deb882cf99
models:
  - name: mymodel
    storageType: { name: mymodel, database: main }
    fields:
      - name: title
        dataType: { type: string, size: 64 }
        required: true
        validators: [title-prefix]
      - name: encodedString
        dataType: { type: string }
        inputTransformers: [hex.encode]
        outputTransformers: [hex.decode]
      - name: selectionField
        dataType:
          type: enum
          enum:
            - { value: option1, label: Option 1 }
            - { value: option2, label: Option 2 }
      - name: fileUpload
        dataType: { type: string }
      - name: ssn
        dataType: { type: string }
      - name: privateNote
        dataType: { type: text }
        encryption: { cipher: vault }
    objectStore:
      fileUpload: { objectStore: files, bucket: mybucket }
    permissionFilters:
      - identities: ['*']
        restrictedFields: [ssn]
";

/// Records every URL request instead of signing.
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<(String, String, String, Duration)>>,
}

impl RecordingStore {
    fn grant(&self, method: &str, bucket: &str, key: &str, ttl: Duration) -> PresignedUrl {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_owned(), bucket.to_owned(), key.to_owned(), ttl));
        PresignedUrl {
            url: format!("memory://{bucket}/{key}"),
            method: method.to_owned(),
            key: key.to_owned(),
            expires_at: OffsetDateTime::now_utc(),
        }
    }
}

#[async_trait]
impl ObjectStorePort for RecordingStore {
    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError> {
        Ok(self.grant("PUT", bucket, key, ttl))
    }

    async fn presigned_download_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError> {
        Ok(self.grant("GET", bucket, key, ttl))
    }
}

async fn client(store: Arc<RecordingStore>) -> RecordEngineLocalClient {
    let plugins = PluginRegistry::builder()
        .include_registered()
        .field_validator(
            "title-prefix",
            field_validator_fn(|field, value, _| match value.as_str() {
                Some(s) if s.starts_with("prefix") => Ok(()),
                _ => Err(DomainError::validation(field, "Invalid title")),
            }),
        )
        .build()
        .unwrap();
    let engine = RecordEngine::builder(EngineConfig::from_yaml_str(YAML).unwrap())
        .plugins(plugins)
        .object_store("files", store)
        .build()
        .await
        .unwrap();
    RecordEngineLocalClient::new(engine)
}

fn caller() -> SecurityContext {
    SecurityContext::builder().email("dev@example.com").build()
}

#[tokio::test]
async fn full_record_lifecycle() {
    let store = Arc::new(RecordingStore::default());
    let client = client(Arc::clone(&store)).await;
    let ctx = caller();
    assert_eq!(client.collections(), vec!["mymodel".to_owned()]);

    let created = client
        .create(
            &ctx,
            "mymodel",
            json!({"title": "prefix 1111", "encodedString": "hello world", "selectionField": "option1"}),
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created["encodedString"], "hello world");
    let id = created["id"].to_string();

    // stored encoded, rendered decoded
    let stored = client
        .search(
            &ctx,
            "mymodel",
            SearchQuery::default().filter(Condition::eq("encodedString", hex::encode("hello world"))),
        )
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["encodedString"], "hello world");

    let err = client
        .create(&ctx, "mymodel", json!({"title": "aaa"}), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.detail(), "Invalid title");

    let err = client
        .create(
            &ctx,
            "mymodel",
            json!({"title": "prefix 123", "fileUpload": "hooo"}),
            WriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Field fileUpload is protected");

    let upload = client
        .presigned_upload_url(&ctx, "mymodel", &id, "fileUpload")
        .await
        .unwrap();
    assert!(upload.key.starts_with(&format!("mymodel/{id}/fileUpload/")));
    let download = client
        .presigned_download_url(&ctx, "mymodel", &id, "fileUpload")
        .await
        .unwrap();
    assert_eq!(download.key, upload.key);
    {
        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "PUT");
        assert_eq!(calls[0].1, "mybucket");
        assert_eq!(calls[0].3, Duration::from_secs(60));
        assert_eq!(calls[1].0, "GET");
    }

    let refreshed = client.get(&ctx, "mymodel", &id).await.unwrap();
    assert_eq!(refreshed["encodedString"], "hello world");
    assert_eq!(refreshed["fileUpload"], json!(upload.key));

    let err = client
        .update(&ctx, "mymodel", &id, json!({"title": "boo"}), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Invalid title");

    let err = client
        .update(&ctx, "mymodel", &id, json!({"selectionField": "boo"}), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.detail().contains("'option1' or 'option2'"), "{err}");

    let updated = client
        .update(&ctx, "mymodel", &id, json!({"selectionField": "option2"}), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(updated["selectionField"], "option2");
    assert_eq!(updated["encodedString"], "hello world");
    assert_eq!(updated["title"], "prefix 1111");

    client.delete(&ctx, "mymodel", &id).await.unwrap();
    let err = client.get(&ctx, "mymodel", &id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn restricted_field_is_neither_written_nor_returned() {
    let client = client(Arc::new(RecordingStore::default())).await;
    let ctx = caller();

    let err = client
        .create(
            &ctx,
            "mymodel",
            json!({"title": "prefix a", "ssn": "123-45-6789"}),
            WriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Field ssn is protected");

    let created = client
        .create(&ctx, "mymodel", json!({"title": "prefix b"}), WriteOptions::default())
        .await
        .unwrap();
    assert!(!created.contains_key("ssn"));

    let err = client
        .search(&ctx, "mymodel", SearchQuery::default().order_by("ssn", "asc"))
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Invalid sort field 'ssn'");
}

#[tokio::test]
async fn encrypted_field_is_sealed_at_rest() {
    let client = client(Arc::new(RecordingStore::default())).await;
    let ctx = caller();

    let created = client
        .create(
            &ctx,
            "mymodel",
            json!({"title": "prefix e", "privateNote": "meet at noon"}),
            WriteOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(created["privateNote"], "meet at noon");
    let id = created["id"].to_string();

    // the stored value is ciphertext, so the plaintext matches nothing
    let hits = client
        .search(
            &ctx,
            "mymodel",
            SearchQuery::default().filter(Condition::eq("privateNote", "meet at noon")),
        )
        .await
        .unwrap();
    assert!(hits.is_empty());

    let updated = client
        .update(&ctx, "mymodel", &id, json!({"title": "prefix f"}), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(updated["privateNote"], "meet at noon");

    let updated = client
        .update(&ctx, "mymodel", &id, json!({"privateNote": "moved to one"}), WriteOptions::default())
        .await
        .unwrap();
    assert_eq!(updated["privateNote"], "moved to one");
    assert_eq!(client.get(&ctx, "mymodel", &id).await.unwrap()["privateNote"], "moved to one");
}

#[tokio::test]
async fn unknown_collection_and_payload_shape() {
    let client = client(Arc::new(RecordingStore::default())).await;
    let ctx = caller();

    let err = client.get(&ctx, "nope", "1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = client
        .create(&ctx, "mymodel", json!(["not", "an", "object"]), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Input should be a valid dictionary");

    let err = client
        .create(
            &ctx,
            "mymodel",
            json!({"title": "prefix c", "color": "red"}),
            WriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Extra inputs are not permitted");

    let err = client
        .create(&ctx, "mymodel", json!({}), WriteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.detail(), "Field required");
}
