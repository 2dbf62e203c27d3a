//! Engine configuration.
//!
//! Top-level keys are snake_case so that `RECORDKIT_`-prefixed environment
//! variables (nested with `__`) override file values. Model specifications
//! keep their camelCase spelling and accept snake_case aliases.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use recordkit_security::ScopeValue;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::error::ConfigError;
use crate::domain::permissions::FieldPermission;

/// Prefix of environment variables that override configuration values.
pub const ENV_PREFIX: &str = "RECORDKIT_";

/// Default field bound to a state machine.
pub const DEFAULT_WORKFLOW_FIELD: &str = "workflowStatus";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub databases: Vec<DatabaseConfig>,
    #[serde(alias = "objectStores")]
    pub object_stores: Vec<ObjectStoreConfig>,
    /// AES-256-GCM keys, each registered as a cipher under its name.
    #[serde(alias = "encryptionKeys")]
    pub encryption_keys: Vec<EncryptionKeyConfig>,
    /// Inline model specifications.
    pub models: Vec<ModelSpec>,
    /// Directory of `*.yaml` model files, relative to the working directory.
    #[serde(alias = "modelDirectory")]
    pub model_directory: Option<PathBuf>,
    /// Page size used when a search does not ask for one.
    #[serde(alias = "defaultPageSize")]
    pub default_page_size: u64,
    /// Upper bound for any requested page size.
    #[serde(alias = "maxPageSize")]
    pub max_page_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            databases: Vec::new(),
            object_stores: Vec::new(),
            encryption_keys: Vec::new(),
            models: Vec::new(),
            model_directory: None,
            default_page_size: 25,
            max_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file, then apply environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] when the file is unreadable or invalid.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(cfg)
    }

    /// Load from a YAML document, then apply environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] when the document is invalid.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg = Figment::new()
            .merge(Yaml::string(yaml))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(cfg)
    }

    /// Inline models followed by the models found in `model_directory`,
    /// the latter in file name order.
    ///
    /// # Errors
    /// Returns [`ConfigError::ModelDirectory`] for an unreadable directory and
    /// [`ConfigError::Load`] for an invalid model file.
    pub fn model_specs(&self) -> Result<Vec<ModelSpec>, ConfigError> {
        let mut specs = self.models.clone();
        if let Some(dir) = &self.model_directory {
            specs.extend(load_model_directory(dir)?);
        }
        Ok(specs)
    }
}

/// Read every `*.yaml` file of `dir` as a [`ModelSpec`].
///
/// # Errors
/// See [`EngineConfig::model_specs`].
pub fn load_model_directory(dir: &Path) -> Result<Vec<ModelSpec>, ConfigError> {
    let dir_err = |message: String| ConfigError::ModelDirectory {
        path: dir.display().to_string(),
        message,
    };
    if !dir.is_dir() {
        return Err(dir_err("not a directory".to_owned()));
    }
    let pattern = dir.join("*.yaml");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| dir_err("path is not valid UTF-8".to_owned()))?;

    let mut paths: Vec<PathBuf> = glob::glob(pattern)
        .map_err(|e| dir_err(e.to_string()))?
        .collect::<Result<_, _>>()
        .map_err(|e| dir_err(e.to_string()))?;
    paths.sort();

    paths
        .iter()
        .map(|p| {
            tracing::debug!(path = %p.display(), "loading model file");
            Figment::from(Yaml::file(p))
                .extract::<ModelSpec>()
                .map_err(ConfigError::from)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Memory,
    /// Backend supplied programmatically through the application builder.
    External,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: DatabaseKind,
    /// Create or upgrade model tables at startup.
    #[serde(default = "default_true", alias = "autoInitialize")]
    pub auto_initialize: bool,
}

fn default_true() -> bool {
    true
}

fn default_presign_ttl_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectStoreConfig {
    pub name: String,
    #[serde(alias = "endpointUrl")]
    pub endpoint_url: String,
    #[serde(default, alias = "accessKey")]
    pub access_key: Option<String>,
    /// Name of an environment variable holding the access key.
    #[serde(default, alias = "accessKeyEnv")]
    pub access_key_env: Option<String>,
    #[serde(default, alias = "secretKey", deserialize_with = "deserialize_secret")]
    pub secret_key: Option<SecretString>,
    /// Name of an environment variable holding the secret key.
    #[serde(default, alias = "secretKeyEnv")]
    pub secret_key_env: Option<String>,
    #[serde(default = "default_presign_ttl_secs", alias = "presignTtlSecs")]
    pub presign_ttl_secs: u64,
}

impl ObjectStoreConfig {
    /// Resolve the credential pair. Exactly one of the literal and `_env`
    /// variants must be given for each key.
    ///
    /// # Errors
    /// Returns [`ConfigError::ObjectStore`] for a missing, ambiguous or unset key.
    pub fn credentials(&self) -> Result<(String, SecretString), ConfigError> {
        let access = pick(&self.name, "access_key", self.access_key.clone(), self.access_key_env.as_deref())?;
        let secret = match (&self.secret_key, self.secret_key_env.as_deref()) {
            (Some(s), None) => s.clone(),
            (None, Some(var)) => SecretString::from(read_env(&self.name, var)?),
            _ => {
                return Err(ConfigError::ObjectStore {
                    store: self.name.clone(),
                    message: "either secret_key or secret_key_env is required".to_owned(),
                });
            }
        };
        Ok((access, secret))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionKeyConfig {
    pub name: String,
    /// 64 hex digits.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub key: Option<SecretString>,
    /// Name of an environment variable holding the key.
    #[serde(default, alias = "keyEnv")]
    pub key_env: Option<String>,
}

impl EncryptionKeyConfig {
    /// # Errors
    /// Returns [`ConfigError::Encryption`] unless exactly one of `key` and
    /// `key_env` is given and resolvable.
    pub fn secret(&self) -> Result<SecretString, ConfigError> {
        let err = |message: String| ConfigError::Encryption {
            key: self.name.clone(),
            message,
        };
        match (&self.key, self.key_env.as_deref()) {
            (Some(key), None) => Ok(key.clone()),
            (None, Some(var)) => std::env::var(var)
                .map(SecretString::from)
                .map_err(|_| err(format!("environment variable {var} is not set"))),
            _ => Err(err("either key or key_env is required".to_owned())),
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn pick(
    store: &str,
    key: &str,
    literal: Option<String>,
    env: Option<&str>,
) -> Result<String, ConfigError> {
    match (literal, env) {
        (Some(v), None) => Ok(v),
        (None, Some(var)) => read_env(store, var),
        _ => Err(ConfigError::ObjectStore {
            store: store.to_owned(),
            message: format!("either {key} or {key}_env is required"),
        }),
    }
}

fn read_env(store: &str, var: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::ObjectStore {
        store: store.to_owned(),
        message: format!("environment variable {var} is not set"),
    })
}

// ---------------------------------------------------------------------------
// Model specifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,
    #[serde(alias = "storage_type")]
    pub storage_type: StorageTypeSpec,
    /// Declared fields in declaration order.
    pub fields: Vec<FieldSpec>,
    /// Fields holding object-store keys, with their store and bucket.
    #[serde(default, alias = "object_store")]
    pub object_store: BTreeMap<String, FieldObjectStoreSpec>,
    #[serde(default, alias = "default_field_permission")]
    pub default_field_permission: FieldPermission,
    #[serde(default, alias = "state_machine")]
    pub state_machine: Option<StateMachineSpec>,
    #[serde(default, alias = "permission_filters")]
    pub permission_filters: Vec<PermissionFilterSpec>,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default, alias = "transform_create_data")]
    pub transform_create_data: Vec<String>,
    #[serde(default, alias = "transform_update_data")]
    pub transform_update_data: Vec<String>,
    #[serde(default, alias = "transform_output_data")]
    pub transform_output_data: Vec<String>,
    #[serde(default, alias = "before_create")]
    pub before_create: Vec<String>,
    #[serde(default, alias = "after_create")]
    pub after_create: Vec<String>,
    #[serde(default, alias = "before_update")]
    pub before_update: Vec<String>,
    #[serde(default, alias = "after_update")]
    pub after_update: Vec<String>,
    #[serde(default, alias = "before_delete")]
    pub before_delete: Vec<String>,
    #[serde(default, alias = "after_delete")]
    pub after_delete: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageTypeSpec {
    /// Table name.
    pub name: String,
    /// Name of a configured database.
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(alias = "data_type")]
    pub data_type: FieldTypeSpec,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub relation: Option<RelationSpec>,
    #[serde(default)]
    pub validators: Vec<String>,
    #[serde(default, alias = "input_transformers")]
    pub input_transformers: Vec<String>,
    #[serde(default, alias = "output_transformers")]
    pub output_transformers: Vec<String>,
    #[serde(default)]
    pub encryption: Option<EncryptionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldTypeSpec {
    #[serde(rename = "type")]
    pub kind: String,
    /// Maximum length for `string` fields.
    #[serde(default)]
    pub size: Option<u32>,
    /// Options for `enum` fields.
    #[serde(default, rename = "enum")]
    pub options: Option<Vec<EnumOptionSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumOptionSpec {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSpec {
    pub model: String,
    pub field: String,
    #[serde(default = "default_true")]
    pub constraint: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionSpec {
    /// Name of a registered cipher plugin.
    pub cipher: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldObjectStoreSpec {
    #[serde(alias = "object_store")]
    pub object_store: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StateMachineSpec {
    #[serde(default = "default_workflow_field")]
    pub field: String,
    /// State new records start in. Defaults to the first listed state.
    #[serde(default, alias = "initial_state")]
    pub initial_state: Option<String>,
    pub states: Vec<StateSpec>,
    pub transitions: Vec<TransitionSpec>,
}

fn default_workflow_field() -> String {
    DEFAULT_WORKFLOW_FIELD.to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceSpec {
    One(String),
    Many(Vec<String>),
}

impl SourceSpec {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransitionSpec {
    pub trigger: String,
    pub label: String,
    pub source: SourceSpec,
    pub dest: String,
    #[serde(default, alias = "on_enter")]
    pub on_enter: Option<String>,
    #[serde(default, alias = "on_exit")]
    pub on_exit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionFilterSpec {
    pub identities: Vec<String>,
    /// Row filter applied when this rule matches (AND of its entries).
    #[serde(default, alias = "where_filter")]
    pub where_filter: Option<Vec<RowFilterSpec>>,
    #[serde(default, alias = "default_field_permission")]
    pub default_field_permission: FieldPermission,
    #[serde(default, alias = "read_write_fields")]
    pub read_write_fields: Vec<String>,
    #[serde(default, alias = "read_only_fields")]
    pub read_only_fields: Vec<String>,
    #[serde(default, alias = "restricted_fields")]
    pub restricted_fields: Vec<String>,
}

/// One row filter entry: `field = eq` or `field in [in]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RowFilterSpec {
    pub field: String,
    #[serde(default)]
    pub eq: Option<ScopeValue>,
    #[serde(default, rename = "in")]
    pub any_of: Option<Vec<ScopeValue>>,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const YAML: &str = r"
default_page_size: 10
databases:
  - name: main
objectStores:
  - name: files
    endpoint_url: http://localhost:9000
    access_key: minio
    secret_key: minio-secret
models:
  - name: article
    storageType: { name: articles, database: main }
    fields:
      - name: title
        title: Title
        dataType: { type: string, size: 200 }
        required: true
      - name: body
        title: Body
        data_type: { type: text }
    permission_filters:
      - identities: ['*']
        whereFilter:
          - { field: creator, eq: alice }
        restrictedFields: [body]
    stateMachine:
      states:
        - { value: draft, label: Draft }
        - { value: published, label: Published }
      transitions:
        - { trigger: publish, label: Publish, source: draft, dest: published }
";

    #[test]
    fn parses_yaml_with_both_spellings() {
        let cfg = EngineConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.default_page_size, 10);
        assert_eq!(cfg.max_page_size, 100);
        assert_eq!(cfg.databases[0].kind, DatabaseKind::Memory);
        assert!(cfg.databases[0].auto_initialize);

        let model = &cfg.models[0];
        assert_eq!(model.storage_type.name, "articles");
        assert_eq!(model.fields[1].data_type.kind, "text");
        let rule = &model.permission_filters[0];
        assert_eq!(rule.restricted_fields, vec!["body"]);
        assert_eq!(rule.default_field_permission, FieldPermission::ReadWrite);
        let filter = rule.where_filter.as_ref().unwrap();
        assert_eq!(filter[0].eq, Some(ScopeValue::from("alice")));

        let sm = model.state_machine.as_ref().unwrap();
        assert_eq!(sm.field, DEFAULT_WORKFLOW_FIELD);
        assert_eq!(sm.transitions[0].source.clone().into_vec(), vec!["draft"]);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EngineConfig::from_yaml_str("databses: []").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn encryption_keys_need_one_source() {
        let cfg = EngineConfig::from_yaml_str(
            "encryptionKeys:\n  - { name: records, key: abcd }\n  - { name: archive }\n  - { name: vault, keyEnv: RECORDKIT_TEST_UNSET_KEY }\n",
        )
        .unwrap();
        assert_eq!(cfg.encryption_keys.len(), 3);
        assert!(cfg.encryption_keys[0].secret().is_ok());
        assert!(format!("{:?}", cfg.encryption_keys[0]).contains("REDACTED"));

        let err = cfg.encryption_keys[1].secret().unwrap_err();
        assert_eq!(err.to_string(), "encryption key 'archive': either key or key_env is required");
        let err = cfg.encryption_keys[2].secret().unwrap_err();
        assert_eq!(
            err.to_string(),
            "encryption key 'vault': environment variable RECORDKIT_TEST_UNSET_KEY is not set"
        );
    }

    #[test]
    fn credentials_require_exactly_one_source() {
        let cfg = EngineConfig::from_yaml_str(YAML).unwrap();
        let (access, _) = cfg.object_stores[0].credentials().unwrap();
        assert_eq!(access, "minio");

        let mut store = cfg.object_stores[0].clone();
        store.access_key_env = Some("RECORDKIT_TEST_UNUSED".to_owned());
        assert!(matches!(
            store.credentials(),
            Err(ConfigError::ObjectStore { .. })
        ));
    }
}
