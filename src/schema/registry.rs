//! Registry of schema descriptors and their validators

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{LixError, LixResult};

use super::types::{DefaultValue, PropertyDef, PropertyKind, SchemaDescriptor};
use super::validator::{DescriptorValidator, SchemaValidator};

pub const KEY_VALUE_SCHEMA_KEY: &str = "lix_key_value";
pub const ACCOUNT_SCHEMA_KEY: &str = "lix_account";
pub const FILE_SCHEMA_KEY: &str = "lix_file_descriptor";
pub const THREAD_SCHEMA_KEY: &str = "lix_thread";

/// View names owned by the engine; schemas may not claim them
pub const SYSTEM_VIEW_NAMES: &[&str] = &[
    "state",
    "state_all",
    "active_version",
    "change",
    "change_set",
    "change_set_element",
    "commit",
    "commit_edge",
    "version",
];

/// Which flavor of an entity view a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewScope {
    /// `<view>`: rows of the active version
    Active,
    /// `<view>_all`: rows of every version, with `lixcol_version_id`
    All,
}

#[derive(Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, SchemaDescriptor>,
    views: BTreeMap<String, String>,
    validators: BTreeMap<String, Arc<dyn SchemaValidator>>,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self {
            schemas: BTreeMap::new(),
            views: BTreeMap::new(),
            validators: BTreeMap::new(),
        }
    }

    /// Registry holding the engine's own schemas
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for schema in builtin_schemas() {
            // Covered by test_builtins_registered.
            let _ = registry.register(schema);
        }
        registry
    }

    /// Add or replace a schema; its view names must not collide
    pub fn register(&mut self, schema: SchemaDescriptor) -> LixResult<()> {
        schema.check()?;
        for name in [schema.view_name.clone(), schema.all_view_name()] {
            let lower = name.to_ascii_lowercase();
            if SYSTEM_VIEW_NAMES.contains(&lower.as_str()) || lower.starts_with("lix_internal_") {
                return Err(LixError::InvalidInput(format!(
                    "view name '{}' is reserved",
                    name
                )));
            }
            if let Some(owner) = self.views.get(&lower) {
                if owner != &schema.key {
                    return Err(LixError::InvalidInput(format!(
                        "view name '{}' is already used by schema '{}'",
                        name, owner
                    )));
                }
            }
        }

        if let Some(previous) = self.schemas.get(&schema.key) {
            self.views.remove(&previous.view_name.to_ascii_lowercase());
            self.views
                .remove(&previous.all_view_name().to_ascii_lowercase());
        }
        self.views
            .insert(schema.view_name.to_ascii_lowercase(), schema.key.clone());
        self.views
            .insert(schema.all_view_name().to_ascii_lowercase(), schema.key.clone());
        self.schemas.insert(schema.key.clone(), schema);
        Ok(())
    }

    /// Replace the validator used for one schema key
    pub fn set_validator(&mut self, schema_key: impl Into<String>, validator: Arc<dyn SchemaValidator>) {
        self.validators.insert(schema_key.into(), validator);
    }

    pub fn get(&self, schema_key: &str) -> Option<&SchemaDescriptor> {
        self.schemas.get(schema_key)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.schemas.values()
    }

    /// Resolve a view name (case-insensitive) to its schema and scope
    pub fn by_view_name(&self, name: &str) -> Option<(&SchemaDescriptor, ViewScope)> {
        let lower = name.to_ascii_lowercase();
        let key = self.views.get(&lower)?;
        let schema = self.schemas.get(key)?;
        let scope = if schema.view_name.eq_ignore_ascii_case(&lower) {
            ViewScope::Active
        } else {
            ViewScope::All
        };
        Some((schema, scope))
    }

    /// Validate content for a schema; unregistered schemas are not checked
    pub fn validate(&self, schema_key: &str, content: &Value) -> LixResult<()> {
        let Some(schema) = self.schemas.get(schema_key) else {
            return Ok(());
        };
        match self.validators.get(schema_key) {
            Some(validator) => validator.validate(schema, content),
            None => DescriptorValidator.validate(schema, content),
        }
    }
}

fn builtin_schemas() -> Vec<SchemaDescriptor> {
    vec![
        SchemaDescriptor::new(KEY_VALUE_SCHEMA_KEY, "key_value")
            .property(PropertyDef::new("key", PropertyKind::String).required())
            .property(PropertyDef::new("value", PropertyKind::Json))
            .primary_key(["key"]),
        SchemaDescriptor::new(ACCOUNT_SCHEMA_KEY, "account")
            .property(
                PropertyDef::new("id", PropertyKind::String)
                    .required()
                    .with_default(DefaultValue::Uuid),
            )
            .property(PropertyDef::new("name", PropertyKind::String).required())
            .primary_key(["id"]),
        SchemaDescriptor::new(FILE_SCHEMA_KEY, "file")
            .property(
                PropertyDef::new("id", PropertyKind::String)
                    .required()
                    .with_default(DefaultValue::Uuid),
            )
            .property(PropertyDef::new("path", PropertyKind::FilePath).required())
            .property(PropertyDef::new("data", PropertyKind::Bytes))
            .property(PropertyDef::new("metadata", PropertyKind::Json))
            .primary_key(["id"]),
        SchemaDescriptor::new(THREAD_SCHEMA_KEY, "thread")
            .property(
                PropertyDef::new("id", PropertyKind::String)
                    .required()
                    .with_default(DefaultValue::Uuid),
            )
            .property(PropertyDef::new("metadata", PropertyKind::Json))
            .primary_key(["id"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        let registry = SchemaRegistry::with_builtins();
        for key in [
            KEY_VALUE_SCHEMA_KEY,
            ACCOUNT_SCHEMA_KEY,
            FILE_SCHEMA_KEY,
            THREAD_SCHEMA_KEY,
        ] {
            assert!(registry.get(key).is_some(), "missing builtin {}", key);
        }
    }

    #[test]
    fn test_view_lookup_scopes() {
        let registry = SchemaRegistry::with_builtins();
        let (schema, scope) = registry.by_view_name("key_value").unwrap();
        assert_eq!(schema.key, KEY_VALUE_SCHEMA_KEY);
        assert_eq!(scope, ViewScope::Active);

        let (_, scope) = registry.by_view_name("KEY_VALUE_ALL").unwrap();
        assert_eq!(scope, ViewScope::All);
        assert!(registry.by_view_name("nope").is_none());
    }

    #[test]
    fn test_reserved_view_names_rejected() {
        let mut registry = SchemaRegistry::with_builtins();
        let schema = SchemaDescriptor::new("x", "commit")
            .property(PropertyDef::new("id", PropertyKind::String))
            .primary_key(["id"]);
        assert!(registry.register(schema).is_err());
    }

    #[test]
    fn test_view_collision_rejected() {
        let mut registry = SchemaRegistry::with_builtins();
        let schema = SchemaDescriptor::new("other", "account")
            .property(PropertyDef::new("id", PropertyKind::String))
            .primary_key(["id"]);
        assert!(registry.register(schema).is_err());
    }

    struct RejectAll;

    impl SchemaValidator for RejectAll {
        fn validate(&self, schema: &SchemaDescriptor, _content: &Value) -> LixResult<()> {
            Err(LixError::validation(&schema.key, "rejected"))
        }
    }

    #[test]
    fn test_custom_validator_replaces_descriptor_checks() {
        let mut registry = SchemaRegistry::with_builtins();
        let content = json!({"key": "a", "value": 1});
        registry.validate(KEY_VALUE_SCHEMA_KEY, &content).unwrap();

        registry.set_validator(KEY_VALUE_SCHEMA_KEY, Arc::new(RejectAll));
        assert!(registry.validate(KEY_VALUE_SCHEMA_KEY, &content).is_err());
    }

    #[test]
    fn test_unregistered_schema_not_validated() {
        let registry = SchemaRegistry::with_builtins();
        registry
            .validate("plugin_line", &json!("anything"))
            .unwrap();
    }
}
