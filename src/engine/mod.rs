//! The `Lix` handle
//!
//! One `Lix` owns one in-memory SQLite database plus everything derived from
//! it: the deterministic sequence, the cache staleness flag, the registered
//! schemas and plugins, the active version and the metrics counters. Every
//! operation takes the handle explicitly; there is no process-wide state
//! apart from the log level.

mod config;
mod files;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::change::{write_change, ChangeInput};
use crate::commit::{commit_version, create_empty_commit, Commit};
use crate::deterministic::{Deterministic, DeterministicConfig};
use crate::envelope;
use crate::errors::{LixError, LixResult};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry};
use crate::plugin::{Plugin, PluginRegistry};
use crate::schema::{SchemaDescriptor, SchemaRegistry, SchemaValidator, KEY_VALUE_SCHEMA_KEY};
use crate::sql;
use crate::state::{self, ResolvedEntity, StateCache};
use crate::storage::{Backend, QueryResult, SqlValue};
use crate::version::{
    self, create_version, insert_version, list_versions, load_active_version_id,
    rebuild_ancestry, store_active_version_id, CreateVersionOptions, InheritsFrom, Version,
    GLOBAL_VERSION_ID, MAIN_VERSION_ID,
};

pub use config::LixConfig;
pub(crate) use files::sync_file_entities;

const LIX_ID_META_KEY: &str = "lix_id";

/// An open change-control instance
pub struct Lix {
    pub(crate) backend: Backend,
    pub(crate) deterministic: Deterministic,
    pub(crate) cache: StateCache,
    pub(crate) schemas: SchemaRegistry,
    pub(crate) plugins: PluginRegistry,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) lix_id: String,
    pub(crate) active_version_id: String,
}

impl std::fmt::Debug for Lix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lix")
            .field("lix_id", &self.lix_id)
            .field("active_version_id", &self.active_version_id)
            .field("deterministic", &self.deterministic.config())
            .field("cache_stale", &self.cache.is_stale())
            .finish()
    }
}

impl Lix {
    /// Create a fresh instance: `global` and `main` versions, `main` active
    pub fn open(config: LixConfig) -> LixResult<Self> {
        config.validate()?;
        apply_log_level(&config);

        let backend = Backend::open_in_memory()?;
        let deterministic = Deterministic::new(config.deterministic.unwrap_or_default());
        let mut lix = Self::with_backend(backend, deterministic, StateCache::default(), &config)?;
        lix.initialize(&config)?;

        log_event_with_fields(Event::LixOpened, &[("lix_id", &lix.lix_id)]);
        Ok(lix)
    }

    /// Open an instance exported with [`Lix::to_blob`]
    ///
    /// The persisted deterministic mode and sequence continue where they
    /// left off. The cache is rebuilt on first read.
    pub fn open_from_blob(blob: &[u8], config: LixConfig) -> LixResult<Self> {
        Self::load_blob(blob, config).map_err(|source| LixError::OpenFailed {
            source: Box::new(source),
        })
    }

    fn load_blob(blob: &[u8], config: LixConfig) -> LixResult<Self> {
        config.validate()?;
        apply_log_level(&config);

        let (backend, settings) = envelope::import(blob)?;
        let deterministic = Deterministic::load(&backend)?;
        let cache = StateCache::load(&backend)?;
        let mut lix = Self::with_backend(backend, deterministic, cache, &config)?;

        let stored_id = lix
            .backend
            .get_meta(LIX_ID_META_KEY)?
            .ok_or_else(|| LixError::CorruptState("lix id is missing".to_string()))?;
        if stored_id != settings.lix_id {
            return Err(LixError::CorruptState(format!(
                "envelope lix id '{}' doesn't match database lix id '{}'",
                settings.lix_id, stored_id
            )));
        }
        lix.lix_id = stored_id;
        lix.active_version_id = load_active_version_id(&lix.backend)?
            .ok_or_else(|| LixError::CorruptState("active version is missing".to_string()))?;
        state::mark_stale(&mut lix)?;

        log_event_with_fields(Event::LixImported, &[("lix_id", &lix.lix_id)]);
        Ok(lix)
    }

    fn with_backend(
        backend: Backend,
        deterministic: Deterministic,
        cache: StateCache,
        config: &LixConfig,
    ) -> LixResult<Self> {
        let mut schemas = SchemaRegistry::with_builtins();
        for schema in &config.schemas {
            schemas.register(schema.clone())?;
        }
        Ok(Self {
            backend,
            deterministic,
            cache,
            schemas,
            plugins: PluginRegistry::default(),
            metrics: Arc::new(MetricsRegistry::new()),
            lix_id: String::new(),
            active_version_id: GLOBAL_VERSION_ID.to_string(),
        })
    }

    fn initialize(&mut self, config: &LixConfig) -> LixResult<()> {
        self.transaction(|lix| {
            lix.deterministic.persist_config(&lix.backend)?;

            let root = create_empty_commit(lix, &[])?;
            let working = create_empty_commit(lix, std::slice::from_ref(&root.id))?;
            insert_version(
                &lix.backend,
                &Version {
                    id: GLOBAL_VERSION_ID.to_string(),
                    name: GLOBAL_VERSION_ID.to_string(),
                    commit_id: root.id,
                    working_commit_id: working.id,
                    inherits_from_version_id: None,
                    hidden: false,
                },
            )?;
            rebuild_ancestry(&lix.backend)?;

            let main = create_version(
                lix,
                CreateVersionOptions::with_id(MAIN_VERSION_ID)
                    .name(MAIN_VERSION_ID)
                    .from(GLOBAL_VERSION_ID)
                    .inherits_from(InheritsFrom::Default),
            )?;
            store_active_version_id(&lix.backend, &main.id)?;
            lix.active_version_id = main.id;

            let lix_id = match &config.lix_id {
                Some(id) => id.clone(),
                None => lix.deterministic.uuid(),
            };
            lix.backend.set_meta(LIX_ID_META_KEY, &lix_id)?;
            lix.lix_id = lix_id;

            for (key, value) in &config.key_values {
                write_change(
                    lix,
                    Some(GLOBAL_VERSION_ID),
                    ChangeInput::new(key, KEY_VALUE_SCHEMA_KEY, json!({"key": key, "value": value})),
                )?;
            }
            Ok(())
        })
    }

    /// Export the whole instance as one blob
    pub fn to_blob(&mut self) -> LixResult<Vec<u8>> {
        let blob = envelope::export(&self.backend, &self.lix_id)?;
        log_event_with_fields(
            Event::LixExported,
            &[("bytes", &blob.len().to_string()), ("lix_id", &self.lix_id)],
        );
        Ok(blob)
    }

    pub fn close(self) {
        log_event_with_fields(Event::LixClosed, &[("lix_id", &self.lix_id)]);
    }

    /// Execute SQL against the virtual views and physical tables
    ///
    /// `sql` may hold several `;`-separated statements; the result of the
    /// last one is returned.
    pub fn execute(&mut self, sql: &str, params: &[SqlValue]) -> LixResult<QueryResult> {
        sql::execute(self, sql, params)
    }

    /// Run `f` inside a transaction, joining one that is already open
    ///
    /// On error the transaction is rolled back and the in-memory mirrors
    /// (deterministic sequence, cache flag, active version) are reloaded.
    pub fn transaction<T, F>(&mut self, f: F) -> LixResult<T>
    where
        F: FnOnce(&mut Lix) -> LixResult<T>,
    {
        if self.backend.in_transaction() {
            let value = f(self)?;
            self.deterministic.flush(&self.backend)?;
            return Ok(value);
        }

        self.backend.begin()?;
        let result = f(self).and_then(|value| {
            self.deterministic.flush(&self.backend)?;
            self.backend.commit()?;
            Ok(value)
        });
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if self.backend.in_transaction() {
                    self.backend.rollback()?;
                }
                self.reload_mirrors()?;
                Err(err)
            }
        }
    }

    /// Run `f` inside a savepoint that is always rolled back
    ///
    /// Nothing `f` writes survives, cache refreshes included; the mirrors
    /// are reloaded afterwards.
    pub fn rolled_back<T, F>(&mut self, f: F) -> LixResult<T>
    where
        F: FnOnce(&mut Lix) -> LixResult<T>,
    {
        self.backend.execute_batch("SAVEPOINT lix_rolled_back")?;
        let result = f(self);
        self.backend
            .execute_batch("ROLLBACK TO lix_rolled_back; RELEASE lix_rolled_back")?;
        self.reload_mirrors()?;
        result
    }

    /// Re-read everything kept in memory from the database
    pub(crate) fn reload_mirrors(&mut self) -> LixResult<()> {
        self.deterministic.restore(&self.backend)?;
        self.cache = StateCache::load(&self.backend)?;
        if let Some(active) = load_active_version_id(&self.backend)? {
            self.active_version_id = active;
        }
        Ok(())
    }

    /// Id from the instance's generator, deterministic when enabled
    pub fn uuid(&mut self) -> LixResult<String> {
        self.transaction(|lix| Ok(lix.deterministic.uuid()))
    }

    pub fn timestamp(&mut self) -> LixResult<String> {
        self.transaction(|lix| Ok(lix.deterministic.timestamp()))
    }

    pub fn random(&mut self) -> LixResult<f64> {
        self.transaction(|lix| Ok(lix.deterministic.random()))
    }

    pub fn lix_id(&self) -> &str {
        &self.lix_id
    }

    pub fn active_version_id(&self) -> &str {
        &self.active_version_id
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn deterministic_config(&self) -> DeterministicConfig {
        self.deterministic.config()
    }

    pub fn cache_is_stale(&self) -> bool {
        self.cache.is_stale()
    }

    /// Raw database access for inspection
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn register_schema(&mut self, schema: SchemaDescriptor) -> LixResult<()> {
        self.schemas.register(schema)
    }

    pub fn set_validator(&mut self, schema_key: impl Into<String>, validator: Arc<dyn SchemaValidator>) {
        self.schemas.set_validator(schema_key, validator);
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.register(plugin);
    }

    /// Write one change into the active version
    pub fn write(&mut self, input: ChangeInput) -> LixResult<crate::change::Change> {
        write_change(self, None, input)
    }

    /// Resolve an entity in the active version
    pub fn get(&mut self, entity_id: &str, schema_key: &str, file_id: &str) -> LixResult<Option<ResolvedEntity>> {
        let version_id = self.active_version_id.clone();
        state::resolve(self, entity_id, schema_key, file_id, &version_id)
    }

    /// Seal the active version's working commit
    pub fn commit(&mut self) -> LixResult<Commit> {
        let version_id = self.active_version_id.clone();
        commit_version(self, &version_id)
    }

    pub fn versions(&self) -> LixResult<Vec<Version>> {
        list_versions(&self.backend)
    }

    pub fn active_version(&self) -> LixResult<Version> {
        version::get_version(&self.backend, &self.active_version_id)?
            .ok_or_else(|| LixError::not_found("version", &self.active_version_id))
    }

    /// Value of a key in the `key_value` schema of the active version
    pub fn key_value(&mut self, key: &str) -> LixResult<Option<Value>> {
        Ok(self
            .get(key, KEY_VALUE_SCHEMA_KEY, crate::schema::LIX_FILE_ID)?
            .and_then(|entity| entity.snapshot_content.get("value").cloned()))
    }

    /// Force a full cache rebuild on the next read
    pub fn mark_cache_stale(&mut self) -> LixResult<()> {
        state::mark_stale(self)
    }
}

fn apply_log_level(config: &LixConfig) {
    if let Some(severity) = config.severity() {
        Logger::set_min_severity(severity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_creates_global_and_main() {
        let lix = Lix::open(LixConfig::default()).unwrap();
        let ids: Vec<String> = lix.versions().unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["global".to_string(), "main".to_string()]);
        assert_eq!(lix.active_version_id(), "main");
        assert!(!lix.lix_id().is_empty());
    }

    #[test]
    fn test_main_inherits_from_global() {
        let lix = Lix::open(LixConfig::default()).unwrap();
        let main = lix.active_version().unwrap();
        assert_eq!(main.inherits_from_version_id.as_deref(), Some("global"));
    }

    #[test]
    fn test_initial_key_values_visible_from_main() {
        let mut lix =
            Lix::open(LixConfig::default().with_key_value("theme", json!("dark"))).unwrap();
        assert_eq!(lix.key_value("theme").unwrap(), Some(json!("dark")));
    }

    #[test]
    fn test_failed_transaction_restores_sequence() {
        let mut lix = Lix::open(LixConfig::deterministic(0)).unwrap();
        let before = lix.deterministic.sequence();
        let result: LixResult<()> = lix.transaction(|lix| {
            lix.deterministic.uuid();
            Err(LixError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(lix.deterministic.sequence(), before);
        assert!(!lix.backend.in_transaction());
    }

    #[test]
    fn test_nested_transaction_joins_outer() {
        let mut lix = Lix::open(LixConfig::default()).unwrap();
        lix.transaction(|lix| {
            assert!(lix.backend.in_transaction());
            lix.transaction(|inner| {
                assert!(inner.backend.in_transaction());
                Ok(())
            })
        })
        .unwrap();
        assert!(!lix.backend.in_transaction());
    }

    #[test]
    fn test_configured_lix_id() {
        let lix = Lix::open(LixConfig {
            lix_id: Some("fixed".to_string()),
            ..LixConfig::default()
        })
        .unwrap();
        assert_eq!(lix.lix_id(), "fixed");
    }
}
