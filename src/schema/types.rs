//! Schema descriptors
//!
//! A descriptor names a schema key, the view it is exposed through, its
//! primary key properties and the typed properties of its snapshot content.
//! Entity ids are derived from the primary key values joined with `~`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{LixError, LixResult};

/// Plugin key for entities owned by the engine itself
pub const OWN_ENTITY_PLUGIN_KEY: &str = "lix_own_entity";

/// File id for entities that do not belong to a user file
pub const LIX_FILE_ID: &str = "lix";

/// Separator between primary key values in composite entity ids
pub const ENTITY_ID_SEPARATOR: &str = "~";

/// Property value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Any JSON value
    Json,
    /// Absolute, slash-separated file path
    FilePath,
    /// Raw bytes, stored hex encoded in the snapshot
    Bytes,
}

impl PropertyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::String => "string",
            PropertyKind::Integer => "integer",
            PropertyKind::Number => "number",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Json => "json",
            PropertyKind::FilePath => "file_path",
            PropertyKind::Bytes => "bytes",
        }
    }
}

/// Value generated for a property the writer left out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultValue {
    Uuid,
    Timestamp,
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<DefaultValue>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_plugin_key() -> String {
    OWN_ENTITY_PLUGIN_KEY.to_string()
}

/// Describes one entity schema and the views exposing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub key: String,
    #[serde(default = "default_schema_version")]
    pub version: String,
    /// Name of the active-version view; `<view_name>_all` spans versions
    pub view_name: String,
    pub primary_key: Vec<String>,
    pub properties: Vec<PropertyDef>,
    /// Fixed file id for entities of this schema, `lix` when unset
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default = "default_plugin_key")]
    pub plugin_key: String,
}

impl SchemaDescriptor {
    pub fn new(key: impl Into<String>, view_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: default_schema_version(),
            view_name: view_name.into(),
            primary_key: Vec::new(),
            properties: Vec::new(),
            file_id: None,
            plugin_key: default_plugin_key(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }

    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn all_view_name(&self) -> String {
        format!("{}_all", self.view_name)
    }

    pub fn default_file_id(&self) -> &str {
        self.file_id.as_deref().unwrap_or(LIX_FILE_ID)
    }

    /// Entity id from primary key values
    pub fn entity_id(&self, content: &Map<String, Value>) -> LixResult<String> {
        let mut parts = Vec::with_capacity(self.primary_key.len());
        for column in &self.primary_key {
            let part = match content.get(column) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::Bool(b)) => b.to_string(),
                Some(Value::Null) | None => {
                    return Err(LixError::validation(
                        &self.key,
                        format!("primary key property '{}' is missing", column),
                    ))
                }
                Some(other) => {
                    return Err(LixError::validation(
                        &self.key,
                        format!(
                            "primary key property '{}' must be a scalar, got {}",
                            column, other
                        ),
                    ))
                }
            };
            parts.push(part);
        }
        Ok(parts.join(ENTITY_ID_SEPARATOR))
    }

    /// Structural checks run at registration
    pub fn check(&self) -> LixResult<()> {
        let valid_name = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !s.starts_with(|c: char| c.is_ascii_digit())
        };
        if self.key.is_empty() {
            return Err(LixError::InvalidInput("schema key is empty".to_string()));
        }
        if !valid_name(&self.view_name) {
            return Err(LixError::InvalidInput(format!(
                "view name '{}' must be an identifier",
                self.view_name
            )));
        }
        if self.primary_key.is_empty() {
            return Err(LixError::InvalidInput(format!(
                "schema '{}' declares no primary key",
                self.key
            )));
        }
        for property in &self.properties {
            if !valid_name(&property.name) || property.name.starts_with("lixcol_") {
                return Err(LixError::InvalidInput(format!(
                    "property name '{}' of schema '{}' is not allowed",
                    property.name, self.key
                )));
            }
        }
        for column in &self.primary_key {
            if self.get_property(column).is_none() {
                return Err(LixError::InvalidInput(format!(
                    "primary key '{}' of schema '{}' is not a declared property",
                    column, self.key
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair_schema() -> SchemaDescriptor {
        SchemaDescriptor::new("pair", "pair")
            .property(PropertyDef::new("a", PropertyKind::String).required())
            .property(PropertyDef::new("b", PropertyKind::Integer).required())
            .primary_key(["a", "b"])
    }

    #[test]
    fn test_composite_entity_id() {
        let content = json!({"a": "x", "b": 7});
        let id = pair_schema().entity_id(content.as_object().unwrap()).unwrap();
        assert_eq!(id, "x~7");
    }

    #[test]
    fn test_entity_id_requires_primary_key_values() {
        let content = json!({"a": "x"});
        let err = pair_schema().entity_id(content.as_object().unwrap()).unwrap_err();
        assert_eq!(err.code(), "LIX_SCHEMA_VALIDATION");
    }

    #[test]
    fn test_check_rejects_undeclared_primary_key() {
        let schema = SchemaDescriptor::new("s", "s")
            .property(PropertyDef::new("a", PropertyKind::String))
            .primary_key(["id"]);
        assert!(schema.check().is_err());
        assert!(pair_schema().check().is_ok());
    }

    #[test]
    fn test_descriptor_from_json() {
        let schema: SchemaDescriptor = serde_json::from_value(json!({
            "key": "todo",
            "view_name": "todo",
            "primary_key": ["id"],
            "properties": [
                {"name": "id", "type": "string", "default": {"kind": "uuid"}},
                {"name": "done", "type": "boolean", "default": {"kind": "literal", "value": false}}
            ]
        }))
        .unwrap();
        assert_eq!(schema.version, "1.0");
        assert_eq!(schema.plugin_key, OWN_ENTITY_PLUGIN_KEY);
        assert_eq!(schema.get_property("id").unwrap().default, Some(DefaultValue::Uuid));
        assert_eq!(schema.all_view_name(), "todo_all");
    }
}
