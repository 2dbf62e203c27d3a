//! Compiled model descriptors.
//!
//! A [`ModelDescriptor`] is built once from a [`ModelSpec`] and never changes
//! afterwards. All plugin names are resolved during compilation.

use std::collections::{BTreeMap, BTreeSet};

use recordkit_db::{PRIMARY_KEY, TableSpec};
use recordkit_security::{ScopeConstraint, ScopeFilter};
use serde_json::Value;

use super::error::{ConfigError, DomainError};
use super::permissions::{FieldPermission, PermissionRule};
use super::plugins::{
    DataTransformer, FieldCipher, FieldTransformer, FieldValidator, LifecycleHook, ModelValidator,
    Named, PluginRegistry,
};
use super::state_machine::{State, StateMachine, Transition};
use crate::config::{FieldSpec, FieldTypeSpec, ModelSpec, PermissionFilterSpec, StateMachineSpec};

pub const DATE_CREATED: &str = "dateCreated";
pub const DATE_MODIFIED: &str = "dateModified";
pub const CREATOR: &str = "creator";
pub const EDITOR: &str = "editor";

/// Engine-managed fields present on every record.
pub const SYSTEM_FIELDS: [&str; 5] = [PRIMARY_KEY, DATE_CREATED, DATE_MODIFIED, CREATOR, EDITOR];

/// Field that, when declared, addresses records instead of the numeric id.
pub const NAME_FIELD: &str = "name";

#[must_use]
pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumOption {
    pub value: String,
    pub label: String,
}

/// Semantic field type with its validation rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    String { max_length: Option<u32> },
    Text,
    Integer,
    Boolean,
    Enum { options: Vec<EnumOption> },
}

impl FieldType {
    fn parse(spec: &FieldTypeSpec) -> Result<Self, String> {
        match spec.kind.as_str() {
            "string" => Ok(Self::String {
                max_length: spec.size,
            }),
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "boolean" => Ok(Self::Boolean),
            "enum" => {
                let options: Vec<EnumOption> = spec
                    .options
                    .iter()
                    .flatten()
                    .map(|o| EnumOption {
                        value: o.value.clone(),
                        label: o.label.clone(),
                    })
                    .collect();
                if options.is_empty() {
                    return Err("enum type declares no options".to_owned());
                }
                Ok(Self::Enum { options })
            }
            other => Err(format!("unknown field type '{other}'")),
        }
    }

    #[must_use]
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String { .. } | Self::Text | Self::Enum { .. })
    }

    /// Check a non-null value against this type.
    ///
    /// # Errors
    /// [`DomainError::Validation`] naming `field`.
    pub fn check(&self, field: &str, value: &Value) -> Result<(), DomainError> {
        match (self, value) {
            (Self::String { max_length }, Value::String(s)) => match max_length {
                Some(max) if s.chars().count() > *max as usize => Err(DomainError::validation(
                    field,
                    format!("String should have at most {max} characters"),
                )),
                _ => Ok(()),
            },
            (Self::Text, Value::String(_)) => Ok(()),
            (Self::String { .. } | Self::Text, _) => {
                Err(DomainError::validation(field, "Input should be a valid string"))
            }
            (Self::Integer, Value::Number(n)) if n.is_i64() => Ok(()),
            (Self::Integer, _) => Err(DomainError::validation(
                field,
                "Input should be a valid integer",
            )),
            (Self::Boolean, Value::Bool(_)) => Ok(()),
            (Self::Boolean, _) => Err(DomainError::validation(
                field,
                "Input should be a valid boolean",
            )),
            (Self::Enum { options }, Value::String(s)) if options.iter().any(|o| o.value == *s) => {
                Ok(())
            }
            (Self::Enum { options }, _) => Err(DomainError::validation(
                field,
                format!("Input should be {}", expected_one_of(options.iter().map(|o| &o.value))),
            )),
        }
    }
}

/// `'a'`, `'a' or 'b'`, `'a', 'b' or 'c'`.
pub(crate) fn expected_one_of<'a>(values: impl Iterator<Item = &'a String>) -> String {
    let quoted: Vec<String> = values.map(|v| format!("'{v}'")).collect();
    match quoted.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub model: String,
    pub field: String,
    /// Reject writes whose value has no matching target row.
    pub constraint: bool,
}

#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub title: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub indexed: bool,
    pub default: Option<Value>,
    pub relation: Option<Relation>,
    pub validators: Vec<Named<dyn FieldValidator>>,
    pub input_transformers: Vec<Named<dyn FieldTransformer>>,
    pub output_transformers: Vec<Named<dyn FieldTransformer>>,
    pub cipher: Option<Named<dyn FieldCipher>>,
}

impl FieldDescriptor {
    fn plain(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_owned(),
            title: name.to_owned(),
            field_type,
            required: false,
            unique: false,
            indexed: false,
            default: None,
            relation: None,
            validators: Vec::new(),
            input_transformers: Vec::new(),
            output_transformers: Vec::new(),
            cipher: None,
        }
    }

    /// Whether `value` counts as "not set" for protection checks: null, an
    /// empty string or the declared default.
    #[must_use]
    pub fn is_default_value(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(s) if s.is_empty() => true,
            v => self.default.as_ref() == Some(v),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectStoreField {
    pub store: String,
    pub bucket: String,
}

#[derive(Clone, Debug, Default)]
pub struct LifecycleHooks {
    pub before_create: Vec<Named<dyn LifecycleHook>>,
    pub after_create: Vec<Named<dyn LifecycleHook>>,
    pub before_update: Vec<Named<dyn LifecycleHook>>,
    pub after_update: Vec<Named<dyn LifecycleHook>>,
    pub before_delete: Vec<Named<dyn LifecycleHook>>,
    pub after_delete: Vec<Named<dyn LifecycleHook>>,
}

#[derive(Clone, Debug)]
pub struct ModelDescriptor {
    pub name: String,
    /// Configured database the table lives in.
    pub database: String,
    pub table: TableSpec,
    pub fields: Vec<FieldDescriptor>,
    pub object_store: BTreeMap<String, ObjectStoreField>,
    pub default_permission: FieldPermission,
    pub rules: Vec<PermissionRule>,
    pub state_machine: Option<StateMachine>,
    pub validators: Vec<Named<dyn ModelValidator>>,
    pub transform_create: Vec<Named<dyn DataTransformer>>,
    pub transform_update: Vec<Named<dyn DataTransformer>>,
    pub transform_output: Vec<Named<dyn DataTransformer>>,
    pub hooks: LifecycleHooks,
}

impl ModelDescriptor {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared or system field.
    #[must_use]
    pub fn is_known_field(&self, name: &str) -> bool {
        is_system_field(name) || self.field(name).is_some()
    }

    /// System fields followed by declared fields.
    pub fn all_field_names(&self) -> impl Iterator<Item = &str> {
        SYSTEM_FIELDS
            .iter()
            .copied()
            .chain(self.fields.iter().map(|f| f.name.as_str()))
    }

    #[must_use]
    pub fn workflow_field(&self) -> Option<&str> {
        self.state_machine.as_ref().map(StateMachine::field)
    }

    #[must_use]
    pub fn is_object_store_field(&self, name: &str) -> bool {
        self.object_store.contains_key(name)
    }

    /// Records are addressed by `name` when the model declares it.
    #[must_use]
    pub fn addressed_by_name(&self) -> bool {
        self.field(NAME_FIELD).is_some()
    }

    /// Compile `spec`. Relations are checked later against the full model set.
    ///
    /// # Errors
    /// [`ConfigError::Model`] for an invalid definition and
    /// [`ConfigError::UnknownPlugin`] for an unresolvable plugin name.
    pub fn compile(
        spec: &ModelSpec,
        plugins: &PluginRegistry,
        object_stores: &BTreeSet<String>,
    ) -> Result<Self, ConfigError> {
        let name = spec.name.as_str();
        let err = |msg: String| ConfigError::model(name, msg);

        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(spec.fields.len() + 1);
        for f in &spec.fields {
            if is_system_field(&f.name) {
                return Err(err(format!("field '{}' is managed by the engine", f.name)));
            }
            if fields.iter().any(|d| d.name == f.name) {
                return Err(err(format!("duplicate field '{}'", f.name)));
            }
            fields.push(compile_field(f, plugins).map_err(|e| match e {
                FieldError::Invalid(msg) => err(format!("field '{}': {msg}", f.name)),
                FieldError::Config(c) => c,
            })?);
        }

        let state_machine = spec
            .state_machine
            .as_ref()
            .map(|sm| compile_state_machine(sm, plugins))
            .transpose()?
            .map(|sm| sm.map_err(err))
            .transpose()?;

        if let Some(sm) = &state_machine {
            match fields.iter().find(|f| f.name == sm.field()) {
                None => fields.push(FieldDescriptor::plain(
                    sm.field(),
                    FieldType::String { max_length: None },
                )),
                Some(f) if f.field_type.is_textual() => {}
                Some(_) => {
                    return Err(err(format!(
                        "workflow field '{}' must be a string field",
                        sm.field()
                    )));
                }
            }
        }

        if let Some(f) = fields.iter_mut().find(|f| f.name == NAME_FIELD) {
            f.unique = true;
        }

        let known = |f: &str| is_system_field(f) || fields.iter().any(|d| d.name == f);

        let mut object_store = BTreeMap::new();
        for (field, os) in &spec.object_store {
            let Some(fd) = fields.iter().find(|d| d.name == *field) else {
                return Err(err(format!("object store field '{field}' is not declared")));
            };
            if !matches!(fd.field_type, FieldType::String { .. }) {
                return Err(err(format!("object store field '{field}' must be a string field")));
            }
            if !object_stores.contains(&os.object_store) {
                return Err(err(format!(
                    "object store field '{field}' uses unknown object store '{}'",
                    os.object_store
                )));
            }
            object_store.insert(
                field.clone(),
                ObjectStoreField {
                    store: os.object_store.clone(),
                    bucket: os.bucket.clone(),
                },
            );
        }

        let rules = spec
            .permission_filters
            .iter()
            .map(compile_rule)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;
        for rule in &rules {
            if let Some(bad) = rule.referenced_fields().find(|f| !known(f)) {
                return Err(err(format!("permission rule refers to undeclared field '{bad}'")));
            }
        }

        let mut table = TableSpec::new(&spec.storage_type.name);
        for f in SYSTEM_FIELDS.iter().skip(1) {
            table = table.column(*f);
        }
        for f in &fields {
            table = table.column(&f.name);
            if f.unique {
                table = table.unique(&f.name);
            }
            if f.indexed {
                table = table.indexed(&f.name);
            }
        }

        let transformers =
            |names: &[String]| -> Result<Vec<Named<dyn DataTransformer>>, ConfigError> {
                names.iter().map(|n| plugins.data_transformer(n)).collect()
            };
        let hooks = |names: &[String]| -> Result<Vec<Named<dyn LifecycleHook>>, ConfigError> {
            names.iter().map(|n| plugins.lifecycle_hook(n)).collect()
        };

        Ok(Self {
            name: spec.name.clone(),
            database: spec.storage_type.database.clone(),
            table,
            fields,
            object_store,
            default_permission: spec.default_field_permission,
            rules,
            state_machine,
            validators: spec
                .validators
                .iter()
                .map(|n| plugins.model_validator(n))
                .collect::<Result<_, _>>()?,
            transform_create: transformers(&spec.transform_create_data)?,
            transform_update: transformers(&spec.transform_update_data)?,
            transform_output: transformers(&spec.transform_output_data)?,
            hooks: LifecycleHooks {
                before_create: hooks(&spec.before_create)?,
                after_create: hooks(&spec.after_create)?,
                before_update: hooks(&spec.before_update)?,
                after_update: hooks(&spec.after_update)?,
                before_delete: hooks(&spec.before_delete)?,
                after_delete: hooks(&spec.after_delete)?,
            },
        })
    }
}

enum FieldError {
    Invalid(String),
    Config(ConfigError),
}

impl From<ConfigError> for FieldError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

fn compile_field(spec: &FieldSpec, plugins: &PluginRegistry) -> Result<FieldDescriptor, FieldError> {
    let field_type = FieldType::parse(&spec.data_type).map_err(FieldError::Invalid)?;
    if let Some(default) = &spec.default
        && !default.is_null()
    {
        field_type
            .check(&spec.name, default)
            .map_err(|e| FieldError::Invalid(format!("invalid default: {e}")))?;
    }
    let cipher = match &spec.encryption {
        Some(enc) if !matches!(field_type, FieldType::String { .. } | FieldType::Text) => {
            return Err(FieldError::Invalid(format!(
                "encryption with '{}' needs a string or text field",
                enc.cipher
            )));
        }
        Some(enc) => Some(plugins.cipher(&enc.cipher)?),
        None => None,
    };

    Ok(FieldDescriptor {
        name: spec.name.clone(),
        title: spec.title.clone().unwrap_or_else(|| spec.name.clone()),
        field_type,
        required: spec.required,
        unique: spec.unique,
        indexed: spec.indexed,
        default: spec.default.clone(),
        relation: spec.relation.as_ref().map(|r| Relation {
            model: r.model.clone(),
            field: r.field.clone(),
            constraint: r.constraint,
        }),
        validators: spec
            .validators
            .iter()
            .map(|n| plugins.field_validator(n))
            .collect::<Result<_, _>>()?,
        input_transformers: spec
            .input_transformers
            .iter()
            .map(|n| plugins.field_transformer(n))
            .collect::<Result<_, _>>()?,
        output_transformers: spec
            .output_transformers
            .iter()
            .map(|n| plugins.field_transformer(n))
            .collect::<Result<_, _>>()?,
        cipher,
    })
}

/// Outer error: unknown hook names. Inner error: invalid machine definition.
fn compile_state_machine(
    spec: &StateMachineSpec,
    plugins: &PluginRegistry,
) -> Result<Result<StateMachine, String>, ConfigError> {
    let mut states: Vec<State> = spec
        .states
        .iter()
        .map(|s| State {
            value: s.value.clone(),
            label: s.label.clone(),
        })
        .collect();
    if let Some(initial) = &spec.initial_state {
        let Some(pos) = states.iter().position(|s| s.value == *initial) else {
            return Ok(Err(format!("initial state '{initial}' is not declared")));
        };
        let first = states.remove(pos);
        states.insert(0, first);
    }

    let mut transitions = Vec::with_capacity(spec.transitions.len());
    for t in &spec.transitions {
        transitions.push(Transition {
            trigger: t.trigger.clone(),
            label: t.label.clone(),
            sources: t.source.clone().into_vec(),
            dest: t.dest.clone(),
            on_exit: t
                .on_exit
                .as_deref()
                .map(|n| plugins.transition_hook(n))
                .transpose()?,
            on_enter: t
                .on_enter
                .as_deref()
                .map(|n| plugins.transition_hook(n))
                .transpose()?,
        });
    }
    Ok(StateMachine::new(&spec.field, states, transitions))
}

fn compile_rule(spec: &PermissionFilterSpec) -> Result<PermissionRule, String> {
    let row_filter = spec
        .where_filter
        .as_ref()
        .filter(|entries| !entries.is_empty())
        .map(|entries| {
            entries
                .iter()
                .map(|e| match (&e.eq, &e.any_of) {
                    (Some(v), None) => Ok(ScopeFilter::eq(&e.field, v.clone())),
                    (None, Some(vs)) => Ok(ScopeFilter::r#in(&e.field, vs.clone())),
                    _ => Err(format!(
                        "row filter on '{}' needs exactly one of 'eq' or 'in'",
                        e.field
                    )),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ScopeConstraint::new)
        })
        .transpose()?;

    Ok(PermissionRule {
        identities: spec.identities.clone(),
        row_filter,
        default_permission: spec.default_field_permission,
        read_write: spec.read_write_fields.clone(),
        read_only: spec.read_only_fields.clone(),
        restricted: spec.restricted_fields.clone(),
    })
}
