//! Engine configuration
//!
//! All fields are optional; `LixConfig::default()` opens a plain,
//! non-deterministic instance with the built-in schemas.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deterministic::DeterministicConfig;
use crate::errors::{LixError, LixResult};
use crate::observability::Severity;
use crate::schema::SchemaDescriptor;

/// Options applied when a `Lix` is opened
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LixConfig {
    /// Id of a new instance; generated when unset. Ignored when opening a blob.
    #[serde(default)]
    pub lix_id: Option<String>,

    /// Deterministic mode of a new instance. Blobs keep their persisted mode.
    #[serde(default)]
    pub deterministic: Option<DeterministicConfig>,

    /// Key values written into the global version of a new instance
    #[serde(default)]
    pub key_values: BTreeMap<String, Value>,

    /// Schemas registered on top of the built-in ones
    #[serde(default)]
    pub schemas: Vec<SchemaDescriptor>,

    /// Process-wide minimum log severity ("TRACE" through "FATAL")
    #[serde(default)]
    pub log_level: Option<String>,
}

impl LixConfig {
    /// Deterministic instance with the given seed
    pub fn deterministic(seed: u64) -> Self {
        Self {
            deterministic: Some(DeterministicConfig::enabled(seed)),
            ..Self::default()
        }
    }

    pub fn with_key_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.key_values.insert(key.into(), value);
        self
    }

    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> LixResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            LixError::io(format!("failed to read config {}", path.display()), e)
        })?;
        let config: LixConfig = serde_json::from_str(&content)
            .map_err(|e| LixError::InvalidInput(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LixResult<()> {
        if let Some(level) = &self.log_level {
            level.parse::<Severity>().map_err(|_| {
                LixError::InvalidInput(format!("invalid log_level: '{}'", level))
            })?;
        }
        if let Some(id) = &self.lix_id {
            if id.trim().is_empty() {
                return Err(LixError::InvalidInput("lix_id is empty".to_string()));
            }
        }
        for schema in &self.schemas {
            schema.check()?;
        }
        Ok(())
    }

    pub(crate) fn severity(&self) -> Option<Severity> {
        self.log_level.as_deref().and_then(|level| level.parse().ok())
    }
}
