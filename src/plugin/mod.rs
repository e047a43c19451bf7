//! File plugins
//!
//! A plugin turns the bytes of a file into entity changes. The engine picks
//! the first registered plugin whose `matches` accepts the file path and
//! falls back to [`FallbackPlugin`], which tracks the file as an opaque blob.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::LixResult;

pub const FALLBACK_PLUGIN_KEY: &str = "lix_unknown_file_fallback_plugin";

/// One entity-level change detected in a file
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChange {
    pub entity_id: String,
    pub schema_key: String,
    pub schema_version: String,
    /// `None` removes the entity
    pub snapshot_content: Option<Value>,
}

pub trait Plugin: Send + Sync {
    fn key(&self) -> &str;

    fn matches(&self, path: &str) -> bool;

    /// Entity changes turning `before` into `after`
    fn detect_changes(&self, before: Option<&[u8]>, after: &[u8]) -> LixResult<Vec<DetectedChange>>;
}

/// Accepts every file and detects no entities
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackPlugin;

impl Plugin for FallbackPlugin {
    fn key(&self) -> &str {
        FALLBACK_PLUGIN_KEY
    }

    fn matches(&self, _path: &str) -> bool {
        true
    }

    fn detect_changes(&self, _before: Option<&[u8]>, _after: &[u8]) -> LixResult<Vec<DetectedChange>> {
        Ok(Vec::new())
    }
}

#[derive(Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    fallback: Arc<dyn Plugin>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            fallback: Arc::new(FallbackPlugin),
        }
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&str> = self.plugins.iter().map(|p| p.key()).collect();
        f.debug_struct("PluginRegistry").field("plugins", &keys).finish()
    }
}

impl PluginRegistry {
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.retain(|p| p.key() != plugin.key());
        self.plugins.push(plugin);
    }

    pub fn plugin_for_path(&self, path: &str) -> Arc<dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.matches(path))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Plugin>> {
        if key == self.fallback.key() {
            return Some(Arc::clone(&self.fallback));
        }
        self.plugins.iter().find(|p| p.key() == key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CsvPlugin;

    impl Plugin for CsvPlugin {
        fn key(&self) -> &str {
            "csv"
        }

        fn matches(&self, path: &str) -> bool {
            path.ends_with(".csv")
        }

        fn detect_changes(&self, _before: Option<&[u8]>, _after: &[u8]) -> LixResult<Vec<DetectedChange>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_fallback_for_unknown_paths() {
        let mut registry = PluginRegistry::default();
        registry.register(Arc::new(CsvPlugin));

        assert_eq!(registry.plugin_for_path("/data.csv").key(), "csv");
        assert_eq!(registry.plugin_for_path("/notes.md").key(), FALLBACK_PLUGIN_KEY);
    }

    #[test]
    fn test_lookup_by_key() {
        let mut registry = PluginRegistry::default();
        registry.register(Arc::new(CsvPlugin));
        registry.register(Arc::new(CsvPlugin));
        assert!(registry.get("csv").is_some());
        assert!(registry.get(FALLBACK_PLUGIN_KEY).is_some());
        assert!(registry.get("md").is_none());
    }

    #[test]
    fn test_fallback_detects_nothing() {
        let changes = FallbackPlugin.detect_changes(None, b"hello").unwrap();
        assert!(changes.is_empty());
    }
}
