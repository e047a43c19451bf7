//! Snapshot content validation
//!
//! Validation runs before anything is written. The [`SchemaValidator`] trait
//! is the seam for external validators; [`DescriptorValidator`] checks content
//! against the descriptor's declared properties:
//! - content is a JSON object
//! - required properties are present and non-null
//! - no undeclared properties
//! - property values match their declared type
//! - file paths start with `/`

use serde_json::Value;

use crate::errors::{LixError, LixResult};

use super::types::{PropertyKind, SchemaDescriptor};

/// Validates snapshot content for one schema
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema: &SchemaDescriptor, content: &Value) -> LixResult<()>;
}

/// Checks content against the descriptor's properties
#[derive(Debug, Default, Clone, Copy)]
pub struct DescriptorValidator;

impl SchemaValidator for DescriptorValidator {
    fn validate(&self, schema: &SchemaDescriptor, content: &Value) -> LixResult<()> {
        let object = content.as_object().ok_or_else(|| {
            LixError::validation(&schema.key, "snapshot content must be a JSON object")
        })?;

        for property in &schema.properties {
            match object.get(&property.name) {
                None | Some(Value::Null) if property.required => {
                    return Err(LixError::validation(
                        &schema.key,
                        format!("required property '{}' is missing", property.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) => check_kind(schema, &property.name, property.kind, value)?,
            }
        }

        if let Some(extra) = object.keys().find(|k| schema.get_property(k).is_none()) {
            return Err(LixError::validation(
                &schema.key,
                format!("property '{}' is not declared", extra),
            ));
        }
        Ok(())
    }
}

fn check_kind(
    schema: &SchemaDescriptor,
    name: &str,
    kind: PropertyKind,
    value: &Value,
) -> LixResult<()> {
    let matches = match kind {
        PropertyKind::String | PropertyKind::Bytes => value.is_string(),
        PropertyKind::Integer => value.is_i64() || value.is_u64(),
        PropertyKind::Number => value.is_number(),
        PropertyKind::Boolean => value.is_boolean(),
        PropertyKind::Json => true,
        PropertyKind::FilePath => {
            let path = value.as_str().ok_or_else(|| {
                LixError::validation(&schema.key, format!("property '{}' must be a string", name))
            })?;
            if !path.starts_with('/') {
                return Err(LixError::InvalidFilePath(path.to_string()));
            }
            true
        }
    };
    if matches {
        Ok(())
    } else {
        Err(LixError::validation(
            &schema.key,
            format!(
                "property '{}' must be of type {}, got {}",
                name,
                kind.type_name(),
                value
            ),
        ))
    }
}
