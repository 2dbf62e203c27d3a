//! Named, statically registered extension points.
//!
//! Models refer to validators, transformers, hooks and ciphers by name. The
//! names are resolved against a [`PluginRegistry`] when models are compiled,
//! so a typo fails at startup rather than on the first request.
//!
//! Crates can contribute plugins without touching application wiring:
//!
//! ```ignore
//! inventory::submit! {
//!     PluginRegistration {
//!         name: "audit",
//!         register: |b| b.lifecycle_hook("audit.log", AuditLog),
//!     }
//! }
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use record_engine_sdk::Record;
use recordkit_security::SecurityContext;
use serde_json::Value;

use super::error::{ConfigError, DomainError};

/// What a plugin knows about the call it runs in.
#[derive(Clone, Copy, Debug)]
pub struct HookContext<'a> {
    pub model: &'a str,
    pub security: &'a SecurityContext,
}

#[async_trait]
pub trait FieldValidator: Send + Sync {
    /// # Errors
    /// A [`DomainError::Validation`] naming `field` when the value is rejected.
    async fn validate(
        &self,
        ctx: &HookContext<'_>,
        field: &str,
        value: &Value,
        record: &Record,
    ) -> Result<(), DomainError>;
}

#[async_trait]
pub trait ModelValidator: Send + Sync {
    /// # Errors
    /// A [`DomainError::Validation`] when the record is rejected.
    async fn validate(&self, ctx: &HookContext<'_>, record: &Record) -> Result<(), DomainError>;
}

/// Per-field value transformer, used both on input and on output.
#[async_trait]
pub trait FieldTransformer: Send + Sync {
    /// # Errors
    /// Any error aborts the operation unchanged.
    async fn transform(
        &self,
        ctx: &HookContext<'_>,
        value: Value,
        record: &Record,
    ) -> Result<Value, DomainError>;
}

/// Whole-record transformer (create, update and output data hooks).
#[async_trait]
pub trait DataTransformer: Send + Sync {
    /// # Errors
    /// Any error aborts the operation unchanged.
    async fn transform(&self, ctx: &HookContext<'_>, record: Record) -> Result<Record, DomainError>;
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// # Errors
    /// Before-hooks abort the operation; after-hook errors are reported to
    /// the caller while the committed change stands.
    async fn run(&self, ctx: &HookContext<'_>, record: &Record) -> Result<(), DomainError>;
}

/// Enter or exit hook of a workflow transition. May change `record`.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    /// # Errors
    /// Any error aborts the transition before anything is persisted.
    async fn run(
        &self,
        ctx: &HookContext<'_>,
        record: &mut Record,
        payload: &Record,
    ) -> Result<(), DomainError>;
}

/// Symmetric encryption of string field values at rest.
pub trait FieldCipher: Send + Sync {
    /// # Errors
    /// [`DomainError::Internal`] when the value cannot be encrypted.
    fn encrypt(&self, plaintext: &str) -> Result<String, DomainError>;

    /// # Errors
    /// [`DomainError::Internal`] when the stored value is not a valid ciphertext.
    fn decrypt(&self, ciphertext: &str) -> Result<String, DomainError>;

    /// Whether `value` already is output of [`encrypt`](Self::encrypt).
    fn is_sealed(&self, value: &str) -> bool;
}

/// A resolved plugin handle. Debug output shows only the name.
pub struct Named<T: ?Sized> {
    pub name: String,
    pub plugin: Arc<T>,
}

impl<T: ?Sized> Clone for Named<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            plugin: Arc::clone(&self.plugin),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Named<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl<T: ?Sized> std::ops::Deref for Named<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.plugin
    }
}

// ============================================================================
// Closure adapters
// ============================================================================

struct FnFieldValidator<F>(F);

#[async_trait]
impl<F> FieldValidator for FnFieldValidator<F>
where
    F: Fn(&str, &Value, &Record) -> Result<(), DomainError> + Send + Sync,
{
    async fn validate(
        &self,
        _ctx: &HookContext<'_>,
        field: &str,
        value: &Value,
        record: &Record,
    ) -> Result<(), DomainError> {
        (self.0)(field, value, record)
    }
}

/// Synchronous field validator from a closure.
pub fn field_validator_fn<F>(f: F) -> impl FieldValidator
where
    F: Fn(&str, &Value, &Record) -> Result<(), DomainError> + Send + Sync,
{
    FnFieldValidator(f)
}

struct FnModelValidator<F>(F);

#[async_trait]
impl<F> ModelValidator for FnModelValidator<F>
where
    F: Fn(&Record) -> Result<(), DomainError> + Send + Sync,
{
    async fn validate(&self, _ctx: &HookContext<'_>, record: &Record) -> Result<(), DomainError> {
        (self.0)(record)
    }
}

pub fn model_validator_fn<F>(f: F) -> impl ModelValidator
where
    F: Fn(&Record) -> Result<(), DomainError> + Send + Sync,
{
    FnModelValidator(f)
}

struct FnFieldTransformer<F>(F);

#[async_trait]
impl<F> FieldTransformer for FnFieldTransformer<F>
where
    F: Fn(Value) -> Result<Value, DomainError> + Send + Sync,
{
    async fn transform(
        &self,
        _ctx: &HookContext<'_>,
        value: Value,
        _record: &Record,
    ) -> Result<Value, DomainError> {
        (self.0)(value)
    }
}

/// Field transformer that only looks at the value.
pub fn field_transformer_fn<F>(f: F) -> impl FieldTransformer
where
    F: Fn(Value) -> Result<Value, DomainError> + Send + Sync,
{
    FnFieldTransformer(f)
}

struct FnDataTransformer<F>(F);

#[async_trait]
impl<F> DataTransformer for FnDataTransformer<F>
where
    F: Fn(Record) -> Result<Record, DomainError> + Send + Sync,
{
    async fn transform(&self, _ctx: &HookContext<'_>, record: Record) -> Result<Record, DomainError> {
        (self.0)(record)
    }
}

pub fn data_transformer_fn<F>(f: F) -> impl DataTransformer
where
    F: Fn(Record) -> Result<Record, DomainError> + Send + Sync,
{
    FnDataTransformer(f)
}

struct FnLifecycleHook<F>(F);

#[async_trait]
impl<F> LifecycleHook for FnLifecycleHook<F>
where
    F: Fn(&Record) -> Result<(), DomainError> + Send + Sync,
{
    async fn run(&self, _ctx: &HookContext<'_>, record: &Record) -> Result<(), DomainError> {
        (self.0)(record)
    }
}

pub fn lifecycle_hook_fn<F>(f: F) -> impl LifecycleHook
where
    F: Fn(&Record) -> Result<(), DomainError> + Send + Sync,
{
    FnLifecycleHook(f)
}

struct FnTransitionHook<F>(F);

#[async_trait]
impl<F> TransitionHook for FnTransitionHook<F>
where
    F: Fn(&mut Record, &Record) -> Result<(), DomainError> + Send + Sync,
{
    async fn run(
        &self,
        _ctx: &HookContext<'_>,
        record: &mut Record,
        payload: &Record,
    ) -> Result<(), DomainError> {
        (self.0)(record, payload)
    }
}

pub fn transition_hook_fn<F>(f: F) -> impl TransitionHook
where
    F: Fn(&mut Record, &Record) -> Result<(), DomainError> + Send + Sync,
{
    FnTransitionHook(f)
}

// ============================================================================
// Registry
// ============================================================================

/// Static plugin contribution collected with `inventory`.
pub struct PluginRegistration {
    pub name: &'static str,
    pub register: fn(PluginRegistryBuilder) -> PluginRegistryBuilder,
}

inventory::collect!(PluginRegistration);

type Table<T> = HashMap<String, Arc<T>>;

#[derive(Default)]
pub struct PluginRegistry {
    field_validators: Table<dyn FieldValidator>,
    model_validators: Table<dyn ModelValidator>,
    field_transformers: Table<dyn FieldTransformer>,
    data_transformers: Table<dyn DataTransformer>,
    lifecycle_hooks: Table<dyn LifecycleHook>,
    transition_hooks: Table<dyn TransitionHook>,
    ciphers: Table<dyn FieldCipher>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T: ?Sized>(t: &Table<T>) -> Vec<&str> {
            let mut v: Vec<&str> = t.keys().map(String::as_str).collect();
            v.sort_unstable();
            v
        }
        f.debug_struct("PluginRegistry")
            .field("field_validators", &names(&self.field_validators))
            .field("model_validators", &names(&self.model_validators))
            .field("field_transformers", &names(&self.field_transformers))
            .field("data_transformers", &names(&self.data_transformers))
            .field("lifecycle_hooks", &names(&self.lifecycle_hooks))
            .field("transition_hooks", &names(&self.transition_hooks))
            .field("ciphers", &names(&self.ciphers))
            .finish()
    }
}

fn lookup<T: ?Sized>(
    table: &Table<T>,
    kind: &'static str,
    name: &str,
) -> Result<Named<T>, ConfigError> {
    table
        .get(name)
        .map(|plugin| Named {
            name: name.to_owned(),
            plugin: Arc::clone(plugin),
        })
        .ok_or_else(|| ConfigError::UnknownPlugin {
            kind,
            name: name.to_owned(),
        })
}

impl PluginRegistry {
    #[must_use]
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no field validator has this name.
    pub fn field_validator(&self, name: &str) -> Result<Named<dyn FieldValidator>, ConfigError> {
        lookup(&self.field_validators, "field validator", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no model validator has this name.
    pub fn model_validator(&self, name: &str) -> Result<Named<dyn ModelValidator>, ConfigError> {
        lookup(&self.model_validators, "model validator", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no field transformer has this name.
    pub fn field_transformer(
        &self,
        name: &str,
    ) -> Result<Named<dyn FieldTransformer>, ConfigError> {
        lookup(&self.field_transformers, "field transformer", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no data transformer has this name.
    pub fn data_transformer(&self, name: &str) -> Result<Named<dyn DataTransformer>, ConfigError> {
        lookup(&self.data_transformers, "data transformer", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no lifecycle hook has this name.
    pub fn lifecycle_hook(&self, name: &str) -> Result<Named<dyn LifecycleHook>, ConfigError> {
        lookup(&self.lifecycle_hooks, "lifecycle hook", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no transition hook has this name.
    pub fn transition_hook(&self, name: &str) -> Result<Named<dyn TransitionHook>, ConfigError> {
        lookup(&self.transition_hooks, "transition hook", name)
    }

    /// # Errors
    /// [`ConfigError::UnknownPlugin`] when no cipher has this name.
    pub fn cipher(&self, name: &str) -> Result<Named<dyn FieldCipher>, ConfigError> {
        lookup(&self.ciphers, "cipher", name)
    }

    /// Add a cipher to a built registry, e.g. one keyed from configuration.
    ///
    /// # Errors
    /// [`ConfigError::Duplicate`] when a cipher with this name exists.
    pub fn insert_cipher(
        &mut self,
        name: impl Into<String>,
        cipher: Arc<dyn FieldCipher>,
    ) -> Result<(), ConfigError> {
        let name = name.into();
        if self.ciphers.contains_key(&name) {
            return Err(ConfigError::Duplicate {
                kind: "cipher",
                name,
            });
        }
        self.ciphers.insert(name, cipher);
        Ok(())
    }
}

/// Collects plugins; duplicate names are reported by [`build`](Self::build).
#[derive(Default)]
pub struct PluginRegistryBuilder {
    registry: PluginRegistry,
    duplicates: Vec<(&'static str, String)>,
}

impl PluginRegistryBuilder {
    fn add<T: ?Sized>(
        table: &mut Table<T>,
        duplicates: &mut Vec<(&'static str, String)>,
        kind: &'static str,
        name: String,
        plugin: Arc<T>,
    ) {
        if table.insert(name.clone(), plugin).is_some() {
            duplicates.push((kind, name));
        }
    }

    #[must_use]
    pub fn field_validator(
        mut self,
        name: impl Into<String>,
        plugin: impl FieldValidator + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.field_validators,
            &mut self.duplicates,
            "field validator",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn model_validator(
        mut self,
        name: impl Into<String>,
        plugin: impl ModelValidator + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.model_validators,
            &mut self.duplicates,
            "model validator",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn field_transformer(
        mut self,
        name: impl Into<String>,
        plugin: impl FieldTransformer + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.field_transformers,
            &mut self.duplicates,
            "field transformer",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn data_transformer(
        mut self,
        name: impl Into<String>,
        plugin: impl DataTransformer + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.data_transformers,
            &mut self.duplicates,
            "data transformer",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn lifecycle_hook(
        mut self,
        name: impl Into<String>,
        plugin: impl LifecycleHook + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.lifecycle_hooks,
            &mut self.duplicates,
            "lifecycle hook",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn transition_hook(
        mut self,
        name: impl Into<String>,
        plugin: impl TransitionHook + 'static,
    ) -> Self {
        Self::add(
            &mut self.registry.transition_hooks,
            &mut self.duplicates,
            "transition hook",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    #[must_use]
    pub fn cipher(mut self, name: impl Into<String>, plugin: impl FieldCipher + 'static) -> Self {
        Self::add(
            &mut self.registry.ciphers,
            &mut self.duplicates,
            "cipher",
            name.into(),
            Arc::new(plugin),
        );
        self
    }

    /// Apply every [`PluginRegistration`] linked into the binary.
    #[must_use]
    pub fn include_registered(self) -> Self {
        inventory::iter::<PluginRegistration>
            .into_iter()
            .fold(self, |builder, registration| {
                tracing::debug!(plugin = registration.name, "applying plugin registration");
                (registration.register)(builder)
            })
    }

    /// # Errors
    /// [`ConfigError::Duplicate`] when a name was registered twice for the same kind.
    pub fn build(self) -> Result<PluginRegistry, ConfigError> {
        if let Some((kind, name)) = self.duplicates.into_iter().next() {
            return Err(ConfigError::Duplicate { kind, name });
        }
        Ok(self.registry)
    }
}

// ============================================================================
// Built-in plugins
// ============================================================================

fn decode_hex_text(s: &str) -> Result<String, DomainError> {
    let bytes = hex::decode(s).map_err(|e| DomainError::internal(format!("invalid hex: {e}")))?;
    String::from_utf8(bytes).map_err(|e| DomainError::internal(format!("invalid utf-8: {e}")))
}

/// `hex.encode`: hex-encodes string values for opaque transport of free text.
fn hex_encode_value(value: Value) -> Result<Value, DomainError> {
    Ok(match value {
        Value::String(s) => Value::String(hex::encode(s)),
        other => other,
    })
}

/// `hex.decode`: the inverse of `hex.encode`.
fn hex_decode_value(value: Value) -> Result<Value, DomainError> {
    match value {
        Value::String(s) => decode_hex_text(&s).map(Value::String),
        other => Ok(other),
    }
}

fn register_hex(b: PluginRegistryBuilder) -> PluginRegistryBuilder {
    b.field_transformer("hex.encode", field_transformer_fn(hex_encode_value))
        .field_transformer("hex.decode", field_transformer_fn(hex_decode_value))
}

inventory::submit! {
    PluginRegistration {
        name: "builtin.hex",
        register: register_hex,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_names_are_reported_with_their_kind() {
        let registry = PluginRegistry::builder().build().unwrap();
        let err = registry.lifecycle_hook("missing").unwrap_err();
        assert_eq!(err.to_string(), "unknown lifecycle hook plugin 'missing'");
    }

    #[test]
    fn duplicate_names_fail_the_build() {
        let result = PluginRegistry::builder()
            .lifecycle_hook("audit", lifecycle_hook_fn(|_| Ok(())))
            .lifecycle_hook("audit", lifecycle_hook_fn(|_| Ok(())))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::Duplicate { kind: "lifecycle hook", .. })
        ));
    }

    #[test]
    fn same_name_in_different_kinds_is_fine() {
        let registry = PluginRegistry::builder()
            .lifecycle_hook("x", lifecycle_hook_fn(|_| Ok(())))
            .model_validator("x", model_validator_fn(|_| Ok(())))
            .build()
            .unwrap();
        assert_eq!(registry.lifecycle_hook("x").unwrap().name, "x");
    }

    #[test]
    fn builtin_registrations_are_collected() {
        let registry = PluginRegistry::builder().include_registered().build().unwrap();
        assert!(registry.field_transformer("hex.encode").is_ok());
        assert!(registry.field_transformer("hex.decode").is_ok());
        assert!(registry.cipher("hex").is_err(), "hex is a transformer, not a cipher");
    }

    struct Reversed;

    impl FieldCipher for Reversed {
        fn encrypt(&self, plaintext: &str) -> Result<String, DomainError> {
            Ok(format!("~{}", plaintext.chars().rev().collect::<String>()))
        }

        fn decrypt(&self, ciphertext: &str) -> Result<String, DomainError> {
            Ok(ciphertext.trim_start_matches('~').chars().rev().collect())
        }

        fn is_sealed(&self, value: &str) -> bool {
            value.starts_with('~')
        }
    }

    #[test]
    fn configured_ciphers_cannot_shadow_registered_ones() {
        let mut registry = PluginRegistry::builder().cipher("records", Reversed).build().unwrap();
        let err = registry.insert_cipher("records", Arc::new(Reversed)).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { kind: "cipher", .. }));

        registry.insert_cipher("archive", Arc::new(Reversed)).unwrap();
        let archive = registry.cipher("archive").unwrap();
        assert_eq!(archive.encrypt("abc").unwrap(), "~cba");
    }

    #[test]
    fn hex_decode_rejects_garbage() {
        assert_eq!(decode_hex_text("736563726574").unwrap(), "secret");
        assert!(decode_hex_text("zz").is_err());
        assert!(decode_hex_text("ff").is_err());
    }

    #[tokio::test]
    async fn hex_transformers_leave_non_strings_alone() {
        let registry = PluginRegistry::builder().include_registered().build().unwrap();
        let ctx_sec = SecurityContext::anonymous();
        let ctx = HookContext {
            model: "m",
            security: &ctx_sec,
        };
        let enc = registry.field_transformer("hex.encode").unwrap();
        let out = enc.transform(&ctx, json!(7), &Record::new()).await.unwrap();
        assert_eq!(out, json!(7));
        let out = enc.transform(&ctx, json!("ab"), &Record::new()).await.unwrap();
        assert_eq!(out, json!("6162"));
    }
}
