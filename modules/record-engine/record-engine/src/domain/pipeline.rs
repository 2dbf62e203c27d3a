//! Payload and output transformation for one model.
//!
//! Inbound payloads go through [`Pipeline::prepare`]:
//!
//! 1. screening (system fields, workflow field, unknown fields, defaults)
//! 2. type and required checks, field validators, model validators
//! 3. field input transformers
//! 4. create or update data transformers
//! 5. the field guard, when the call is enforced
//! 6. initial workflow state on create
//! 7. encryption of cipher fields
//! 8. creator/editor and timestamps
//!
//! The guard sees plaintext, so a protected encrypted field still accepts its
//! declared default. Stored rows go out through [`Pipeline::render`], which
//! shows only read-write fields and opens sealed values.

use record_engine_sdk::{Record, WriteOptions};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::error::DomainError;
use super::model::{
    CREATOR, DATE_CREATED, DATE_MODIFIED, EDITOR, ModelDescriptor, expected_one_of,
    is_system_field,
};
use super::permissions::FieldPermissions;
use super::plugins::HookContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

pub struct Pipeline<'a> {
    model: &'a ModelDescriptor,
    hook: HookContext<'a>,
    perms: &'a FieldPermissions,
    enforce: bool,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        model: &'a ModelDescriptor,
        hook: HookContext<'a>,
        perms: &'a FieldPermissions,
        enforce: bool,
    ) -> Self {
        Self {
            model,
            hook,
            perms,
            enforce,
        }
    }

    /// Turn a caller payload into a storage-ready row.
    ///
    /// # Errors
    /// [`DomainError::Validation`] from any step, or whatever a validator or
    /// transformer plugin returns.
    pub async fn prepare(
        &self,
        mode: WriteMode,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, DomainError> {
        let record = self.screen(mode, payload, options)?;
        self.validate(mode, &record).await?;
        let record = self.transform_fields(record).await?;
        let mut record = self.transform_data(mode, record).await?;
        self.drop_unmanaged(&mut record);

        if self.enforce {
            self.guard(&record, options)?;
        }

        if mode == WriteMode::Create
            && !options.modify_workflow_status
            && let Some(sm) = &self.model.state_machine
        {
            record.insert(
                sm.field().to_owned(),
                Value::String(sm.initial_state().to_owned()),
            );
        }

        let mut record = self.seal(record)?;
        self.stamp(mode, &mut record)?;
        tracing::debug!(model = %self.model.name, ?mode, fields = record.len(), "payload prepared");
        Ok(record)
    }

    /// Encrypt cipher fields that do not hold a sealed value yet.
    ///
    /// # Errors
    /// [`DomainError::Internal`] when a cipher fails.
    pub fn seal(&self, mut record: Record) -> Result<Record, DomainError> {
        for field in &self.model.fields {
            let Some(cipher) = &field.cipher else { continue };
            if let Some(Value::String(s)) = record.get(&field.name)
                && !cipher.is_sealed(s)
            {
                let sealed = cipher.encrypt(s)?;
                record.insert(field.name.clone(), Value::String(sealed));
            }
        }
        Ok(record)
    }

    /// Turn a stored row into what the caller may see: system fields and the
    /// fields the caller may write. Read-only and restricted fields are left out.
    ///
    /// # Errors
    /// Errors from decryption or output transformer plugins.
    pub async fn render(&self, row: Record) -> Result<Record, DomainError> {
        let mut out: Record = row
            .into_iter()
            .filter(|(k, _)| is_system_field(k) || self.perms.is_writable(k))
            .collect();

        for field in &self.model.fields {
            let Some(cipher) = &field.cipher else { continue };
            if let Some(Value::String(s)) = out.get(&field.name)
                && cipher.is_sealed(s)
            {
                let plain = cipher.decrypt(s)?;
                out.insert(field.name.clone(), Value::String(plain));
            }
        }

        for field in &self.model.fields {
            for t in &field.output_transformers {
                let Some(value) = out.get(&field.name).cloned() else {
                    break;
                };
                let next = t.transform(&self.hook, value, &out).await?;
                out.insert(field.name.clone(), next);
            }
        }

        for t in &self.model.transform_output {
            out = t.transform(&self.hook, out).await?;
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------

    fn screen(
        &self,
        mode: WriteMode,
        payload: Value,
        options: WriteOptions,
    ) -> Result<Record, DomainError> {
        let Value::Object(mut record) = payload else {
            return Err(DomainError::validation(
                "payload",
                "Input should be a valid dictionary",
            ));
        };

        record.retain(|k, _| !is_system_field(k));

        if let Some(wf) = self.model.workflow_field()
            && !options.modify_workflow_status
            && let Some(value) = record.get(wf)
        {
            if is_blank(value) {
                record.remove(wf);
            } else {
                return Err(DomainError::protected(wf));
            }
        }

        if let Some(unknown) = record.keys().find(|k| self.model.field(k).is_none()) {
            return Err(DomainError::validation(
                unknown.as_str(),
                "Extra inputs are not permitted",
            ));
        }

        if mode == WriteMode::Create {
            for field in &self.model.fields {
                if let Some(default) = &field.default
                    && !record.contains_key(&field.name)
                {
                    record.insert(field.name.clone(), default.clone());
                }
            }
        }
        Ok(record)
    }

    async fn validate(&self, mode: WriteMode, record: &Record) -> Result<(), DomainError> {
        for field in &self.model.fields {
            let value = match record.get(&field.name) {
                None if mode == WriteMode::Update => continue,
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(DomainError::validation(&field.name, "Field required"));
                    }
                    continue;
                }
                Some(v) => v,
            };

            field.field_type.check(&field.name, value)?;

            if let Some(sm) = &self.model.state_machine
                && sm.field() == field.name
                && !value.as_str().is_some_and(|s| sm.is_state(s))
            {
                let states = sm.states().iter().map(|s| &s.value);
                return Err(DomainError::validation(
                    &field.name,
                    format!("Input should be {}", expected_one_of(states)),
                ));
            }

            for v in &field.validators {
                v.validate(&self.hook, &field.name, value, record).await?;
            }
        }

        for v in &self.model.validators {
            v.validate(&self.hook, record).await?;
        }
        Ok(())
    }

    async fn transform_fields(&self, mut record: Record) -> Result<Record, DomainError> {
        for field in &self.model.fields {
            for t in &field.input_transformers {
                let Some(value) = record.get(&field.name).cloned() else {
                    break;
                };
                let next = t.transform(&self.hook, value, &record).await?;
                record.insert(field.name.clone(), next);
            }
        }
        Ok(record)
    }

    async fn transform_data(&self, mode: WriteMode, mut record: Record) -> Result<Record, DomainError> {
        let transformers = match mode {
            WriteMode::Create => &self.model.transform_create,
            WriteMode::Update => &self.model.transform_update,
        };
        for t in transformers {
            tracing::debug!(transformer = %t.name, "applying data transformer");
            record = t.transform(&self.hook, record).await?;
        }
        Ok(record)
    }

    /// Data transformers may only produce declared fields.
    fn drop_unmanaged(&self, record: &mut Record) {
        record.retain(|k, _| {
            let keep = !is_system_field(k) && self.model.field(k).is_some();
            if !keep {
                tracing::debug!(field = %k, "dropping undeclared field");
            }
            keep
        });
    }

    fn guard(&self, record: &Record, options: WriteOptions) -> Result<(), DomainError> {
        let wf = self.model.workflow_field();
        for (name, value) in record {
            let Some(field) = self.model.field(name) else {
                return Err(DomainError::protected(name));
            };
            let is_workflow = wf == Some(name.as_str());

            if is_workflow {
                if !options.modify_workflow_status && !field.is_default_value(value) {
                    return Err(DomainError::protected(name));
                }
                // the capability covers the field permission
                continue;
            }
            if self.model.is_object_store_field(name)
                && !options.modify_object_store_fields
                && !field.is_default_value(value)
            {
                return Err(DomainError::protected(name));
            }
            if !self.perms.is_writable(name) && !field.is_default_value(value) {
                return Err(DomainError::protected(name));
            }
        }
        Ok(())
    }

    fn stamp(&self, mode: WriteMode, record: &mut Record) -> Result<(), DomainError> {
        let now = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| DomainError::internal(format!("timestamp formatting failed: {e}")))?;
        let who = self
            .hook
            .security
            .principal()
            .map_or(Value::Null, |p| Value::String(p.to_owned()));
        match mode {
            WriteMode::Create => {
                record.insert(CREATOR.to_owned(), who);
                record.insert(DATE_CREATED.to_owned(), Value::String(now.clone()));
                record.insert(DATE_MODIFIED.to_owned(), Value::String(now));
            }
            WriteMode::Update => {
                record.insert(EDITOR.to_owned(), who);
                record.insert(DATE_MODIFIED.to_owned(), Value::String(now));
            }
        }
        Ok(())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::permissions::{FieldPermission, resolve_field_permissions};
    use crate::domain::plugins::{
        PluginRegistry, data_transformer_fn, field_transformer_fn, field_validator_fn,
    };
    use crate::infra::{AesGcmCipher, EncryptionKey};
    use secrecy::SecretString;
    use recordkit_security::SecurityContext;
    use serde_json::json;

    const YAML: &str = r"
models:
  - name: person
    storageType: { name: people, database: main }
    fields:
      - name: name
        dataType: { type: string, size: 20 }
        required: true
        validators: [no-bob]
      - name: ssn
        dataType: { type: string }
        encryption: { cipher: records }
      - name: pin
        dataType: { type: string }
        default: '0000'
        encryption: { cipher: records }
      - name: nickname
        dataType: { type: string }
        inputTransformers: [upper]
      - name: level
        dataType: { type: integer }
        default: 1
      - name: avatar
        dataType: { type: string }
    objectStore:
      avatar: { objectStore: files, bucket: avatars }
    transformCreateData: [tag]
    permissionFilters:
      - identities: ['*']
        readOnlyFields: [level, pin]
    stateMachine:
      states:
        - { value: new, label: New }
        - { value: active, label: Active }
      transitions:
        - { trigger: activate, label: Activate, source: new, dest: active }
";

    fn model() -> ModelDescriptor {
        let cfg = EngineConfig::from_yaml_str(YAML).unwrap();
        let key = EncryptionKey::from_hex("records", &SecretString::from("2a".repeat(32))).unwrap();
        let plugins = PluginRegistry::builder()
            .include_registered()
            .cipher("records", AesGcmCipher::new(&key))
            .field_validator(
                "no-bob",
                field_validator_fn(|field, value, _| {
                    if value == "bob" {
                        Err(DomainError::validation(field, "Invalid name"))
                    } else {
                        Ok(())
                    }
                }),
            )
            .field_transformer(
                "upper",
                field_transformer_fn(|v| {
                    Ok(v.as_str().map_or(v.clone(), |s| Value::String(s.to_uppercase())))
                }),
            )
            .data_transformer(
                "tag",
                data_transformer_fn(|mut r| {
                    r.insert("nickname".to_owned(), r.get("nickname").cloned().unwrap_or(json!("anon")));
                    r.insert("bogus".to_owned(), json!(1));
                    Ok(r)
                }),
            )
            .build()
            .unwrap();
        let stores: BTreeSet<String> = ["files".to_owned()].into();
        crate::domain::model::ModelDescriptor::compile(&cfg.models[0], &plugins, &stores).unwrap()
    }

    fn perms(model: &ModelDescriptor, who: &SecurityContext) -> FieldPermissions {
        resolve_field_permissions(
            who.identities(),
            &model.rules,
            model.default_permission,
            model.all_field_names(),
        )
    }

    fn message(err: DomainError) -> String {
        match err {
            DomainError::Validation { message, .. } => message,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_runs_every_step() {
        let model = model();
        let sec = SecurityContext::builder().email("ann@example.com").build();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);

        let row = p
            .prepare(
                WriteMode::Create,
                json!({"id": 9, "name": "ann", "ssn": "12", "creator": "mallory"}),
                WriteOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(row["name"], json!("ann"));
        let ssn = row["ssn"].as_str().unwrap();
        assert!(ssn.starts_with("aes256gcm:"), "{ssn}");
        assert_eq!(model.field("ssn").unwrap().cipher.as_ref().unwrap().decrypt(ssn).unwrap(), "12");
        assert_eq!(row["level"], json!(1));
        assert_eq!(row["nickname"], json!("anon"));
        assert_eq!(row["workflowStatus"], json!("new"));
        assert_eq!(row["creator"], json!("ann@example.com"));
        assert_eq!(row["dateCreated"], row["dateModified"]);
        assert!(!row.contains_key("id"));
        assert!(!row.contains_key("bogus"));
    }

    #[tokio::test]
    async fn validation_messages() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);
        let create = |v| p.prepare(WriteMode::Create, v, WriteOptions::default());

        assert_eq!(message(create(json!({})).await.unwrap_err()), "Field required");
        assert_eq!(message(create(json!({"name": "bob"})).await.unwrap_err()), "Invalid name");
        assert_eq!(
            message(create(json!({"name": "x", "age": 3})).await.unwrap_err()),
            "Extra inputs are not permitted"
        );
        assert_eq!(
            message(create(json!({"name": "x", "level": "high"})).await.unwrap_err()),
            "Input should be a valid integer"
        );
        assert_eq!(
            message(create(json!([1, 2])).await.unwrap_err()),
            "Input should be a valid dictionary"
        );
    }

    #[tokio::test]
    async fn guard_rejects_protected_fields() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);

        let err = p
            .prepare(WriteMode::Create, json!({"name": "x", "level": 5}), WriteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(message(err), "Field level is protected");

        // the declared default is not a change
        assert!(
            p.prepare(WriteMode::Create, json!({"name": "x", "level": 1}), WriteOptions::default())
                .await
                .is_ok()
        );

        let err = p
            .prepare(WriteMode::Create, json!({"name": "x", "avatar": "k"}), WriteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(message(err), "Field avatar is protected");
        let opts = WriteOptions::default().with_object_store_fields();
        assert!(p.prepare(WriteMode::Create, json!({"name": "x", "avatar": "k"}), opts).await.is_ok());

        let err = p
            .prepare(
                WriteMode::Update,
                json!({"workflowStatus": "active"}),
                WriteOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(message(err), "Field workflowStatus is protected");
    }

    #[tokio::test]
    async fn workflow_capability_is_validated() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);
        let opts = WriteOptions::default().with_workflow_status();

        let row = p
            .prepare(WriteMode::Update, json!({"workflowStatus": "active"}), opts)
            .await
            .unwrap();
        assert_eq!(row["workflowStatus"], json!("active"));
        assert!(row.contains_key("editor"));
        assert!(!row.contains_key("dateCreated"));

        let err = p
            .prepare(WriteMode::Update, json!({"workflowStatus": "gone"}), opts)
            .await
            .unwrap_err();
        assert_eq!(message(err), "Input should be 'new' or 'active'");

        let row = p
            .prepare(WriteMode::Create, json!({"name": "x", "workflowStatus": ""}), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(row["workflowStatus"], json!("new"));
    }

    #[tokio::test]
    async fn bypass_skips_the_guard_only() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = FieldPermissions::all_read_write(model.all_field_names());
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, false);

        let row = p
            .prepare(WriteMode::Create, json!({"name": "x", "level": 5}), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(row["level"], json!(5));
        assert_eq!(row["creator"], Value::Null);
        assert!(p.prepare(WriteMode::Create, json!({}), WriteOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn update_allows_partial_payloads() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);

        let row = p
            .prepare(WriteMode::Update, json!({"nickname": "al"}), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(row["nickname"], json!("AL"));
        assert!(!row.contains_key("name"));
        assert!(!row.contains_key("workflowStatus"));

        let err = p
            .prepare(WriteMode::Update, json!({"name": null}), WriteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(message(err), "Field required");
    }

    #[tokio::test]
    async fn guard_compares_plaintext_of_encrypted_fields() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);

        // pin is read-only and encrypted; its default must still pass the guard
        let row = p
            .prepare(WriteMode::Create, json!({"name": "x"}), WriteOptions::default())
            .await
            .unwrap();
        let pin = row["pin"].as_str().unwrap();
        assert_ne!(pin, "0000");
        assert_eq!(model.field("pin").unwrap().cipher.as_ref().unwrap().decrypt(pin).unwrap(), "0000");

        let err = p
            .prepare(WriteMode::Create, json!({"name": "x", "pin": "1234"}), WriteOptions::default())
            .await
            .unwrap_err();
        assert_eq!(message(err), "Field pin is protected");
    }

    #[tokio::test]
    async fn render_shows_writable_fields_and_opens_sealed_values() {
        let model = model();
        let sec = SecurityContext::anonymous();
        let mut perms = perms(&model, &sec);
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);
        let stored = p
            .seal(
                json!({"id": 1, "name": "ann", "ssn": "12", "level": 1})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .unwrap();
        assert_ne!(stored["ssn"], json!("12"));
        assert_eq!(p.seal(stored.clone()).unwrap(), stored, "sealed values are not sealed twice");

        let out = p.render(stored.clone()).await.unwrap();
        assert_eq!(out["id"], json!(1));
        assert_eq!(out["ssn"], json!("12"));
        assert!(!out.contains_key("level"), "read-only fields are not rendered");

        // the encrypted field is visible, and rendering again changes nothing
        let again = p.render(out.clone()).await.unwrap();
        assert_eq!(again, out);

        let rules = vec![crate::domain::permissions::PermissionRule::new(["*"]).restricted(["ssn"])];
        perms = resolve_field_permissions(
            sec.identities(),
            &rules,
            FieldPermission::ReadWrite,
            model.all_field_names(),
        );
        let p = Pipeline::new(&model, HookContext { model: "person", security: &sec }, &perms, true);
        let out = p.render(stored).await.unwrap();
        assert!(!out.contains_key("ssn"));
        assert_eq!(out["level"], json!(1));
    }
}
