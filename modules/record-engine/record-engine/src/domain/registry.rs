use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use super::error::ConfigError;
use super::model::{ModelDescriptor, is_system_field};
use super::plugins::PluginRegistry;
use crate::config::ModelSpec;

/// Immutable set of compiled models, keyed by name.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<ModelDescriptor>>,
}

impl ModelRegistry {
    /// Compile every spec and check the references between models.
    ///
    /// # Errors
    /// - [`ConfigError::Duplicate`] for a repeated model or table name
    /// - [`ConfigError::Model`] for an invalid model or a broken relation
    /// - [`ConfigError::Database`] for a model stored in an unknown database
    /// - [`ConfigError::UnknownPlugin`] for an unresolvable plugin name
    pub fn compile(
        specs: &[ModelSpec],
        plugins: &PluginRegistry,
        databases: &BTreeSet<String>,
        object_stores: &BTreeSet<String>,
    ) -> Result<Self, ConfigError> {
        let mut models = BTreeMap::new();
        let mut tables = BTreeSet::new();
        for spec in specs {
            let model = ModelDescriptor::compile(spec, plugins, object_stores)?;
            if !databases.contains(&model.database) {
                return Err(ConfigError::Database {
                    database: model.database.clone(),
                    message: format!("used by model '{}' but not configured", model.name),
                });
            }
            if !tables.insert((model.database.clone(), model.table.name.clone())) {
                return Err(ConfigError::Duplicate {
                    kind: "table",
                    name: model.table.name.clone(),
                });
            }
            if models.contains_key(&model.name) {
                return Err(ConfigError::Duplicate {
                    kind: "model",
                    name: model.name,
                });
            }
            tracing::debug!(model = %model.name, fields = model.fields.len(), "model compiled");
            models.insert(model.name.clone(), Arc::new(model));
        }

        let registry = Self { models };
        registry.check_relations()?;
        Ok(registry)
    }

    fn check_relations(&self) -> Result<(), ConfigError> {
        for model in self.models.values() {
            for field in &model.fields {
                let Some(rel) = &field.relation else { continue };
                let err = |msg: String| ConfigError::model(&model.name, format!("field '{}': {msg}", field.name));

                let Some(target) = self.models.get(&rel.model) else {
                    return Err(err(format!("relation to unknown model '{}'", rel.model)));
                };
                if !is_system_field(&rel.field) && target.field(&rel.field).is_none() {
                    return Err(err(format!(
                        "relation to unknown field '{}.{}'",
                        rel.model, rel.field
                    )));
                }
                if rel.constraint && target.database != model.database {
                    return Err(err(format!(
                        "constrained relation to '{}' crosses databases",
                        rel.model
                    )));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ModelDescriptor>> {
        self.models.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.models.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn compile(yaml: &str) -> Result<ModelRegistry, ConfigError> {
        let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
        let plugins = PluginRegistry::builder().build().unwrap();
        let dbs: BTreeSet<String> = cfg.databases.iter().map(|d| d.name.clone()).collect();
        ModelRegistry::compile(&cfg.models, &plugins, &dbs, &BTreeSet::new())
    }

    const TWO: &str = r"
databases:
  - name: main
  - name: other
models:
  - name: author
    storageType: { name: authors, database: main }
    fields:
      - name: name
        dataType: { type: string }
  - name: book
    storageType: { name: books, database: main }
    fields:
      - name: author
        dataType: { type: string }
        relation: { model: author, field: name }
";

    #[test]
    fn resolves_relations() {
        let registry = compile(TWO).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["author", "book"]);
        let book = registry.get("book").unwrap();
        assert_eq!(book.field("author").unwrap().relation.as_ref().unwrap().model, "author");
        assert!(registry.get("author").unwrap().addressed_by_name());
    }

    #[test]
    fn rejects_relation_to_unknown_model() {
        let yaml = TWO.replace("model: author, field", "model: writer, field");
        assert!(compile(&yaml).unwrap_err().to_string().contains("writer"));
    }

    #[test]
    fn rejects_constrained_relation_across_databases() {
        let yaml = TWO.replace("{ name: books, database: main }", "{ name: books, database: other }");
        assert!(compile(&yaml).unwrap_err().to_string().contains("crosses databases"));

        let yaml = yaml.replace("field: name }", "field: name, constraint: false }");
        assert!(compile(&yaml).is_ok());
    }

    #[test]
    fn rejects_unknown_database_and_duplicates() {
        let yaml = TWO.replace("database: main }\n    fields:\n      - name: author", "database: nope }\n    fields:\n      - name: author");
        assert!(matches!(compile(&yaml), Err(ConfigError::Database { .. })));

        let yaml = TWO.replace("name: book\n", "name: author\n");
        assert!(matches!(
            compile(&yaml),
            Err(ConfigError::Duplicate { kind: "model", .. })
        ));
    }
}
