//! # Sync Server
//!
//! Hosts any number of instances keyed by lix id. Each request locks the
//! instance map for its whole duration; engine work inside a request runs in
//! one transaction, so a failed request leaves the instance untouched. A push
//! whose blob can't be written to the data dir is undone as well.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{Lix, LixConfig};
use crate::errors::LixError;
use crate::observability::{log_event_with_fields, Event, Logger};

use super::bundle::{apply_bundle, export_bundle};
use super::config::ServerConfig;
use super::errors::{SyncError, SyncResult};
use super::protocol::{
    decode_blob, encode_blob, ensure_read_only, query_params, GetRequest, GetResponse,
    NewRequest, NewResponse, PullRequest, PullResponse, PushRequest, PushResponse, QueryRequest,
    QueryResponse,
};
use super::routes::lsp_routes;

const BLOB_EXTENSION: &str = "lix";

// ==================
// Shared State
// ==================

/// Instances hosted by one server
pub struct ServerState {
    instances: Mutex<BTreeMap<String, Lix>>,
    data_dir: Option<PathBuf>,
}

impl ServerState {
    /// Server holding its instances in memory only
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(BTreeMap::new()),
            data_dir: None,
        }
    }

    /// Server persisting instances under `config.data_dir`, loading the
    /// blobs already stored there
    pub fn open(config: &ServerConfig) -> SyncResult<Self> {
        let mut instances = BTreeMap::new();
        if let Some(dir) = &config.data_dir {
            fs::create_dir_all(dir).map_err(|e| {
                LixError::io(format!("failed to create data dir {}", dir.display()), e)
            })?;
            for path in blob_paths(dir)? {
                let blob = fs::read(&path).map_err(|e| {
                    LixError::io(format!("failed to read {}", path.display()), e)
                })?;
                let lix = Lix::open_from_blob(&blob, LixConfig::default())?;
                instances.insert(lix.lix_id().to_string(), lix);
            }
        }
        Ok(Self {
            instances: Mutex::new(instances),
            data_dir: config.data_dir.clone(),
        })
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, BTreeMap<String, Lix>>> {
        self.instances
            .lock()
            .map_err(|_| SyncError::Internal("instance lock poisoned".to_string()))
    }

    pub fn lix_ids(&self) -> SyncResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    /// Run `f` against one hosted instance
    pub fn with_lix<T, F>(&self, lix_id: &str, f: F) -> SyncResult<T>
    where
        F: FnOnce(&mut Lix) -> SyncResult<T>,
    {
        let mut instances = self.lock()?;
        let lix = instances
            .get_mut(lix_id)
            .ok_or_else(|| SyncError::LixNotFound(lix_id.to_string()))?;
        f(lix)
    }

    /// Host the instance carried by the request's blob
    pub fn create(&self, request: NewRequest) -> SyncResult<NewResponse> {
        let blob = decode_blob(&request.blob)?;
        let mut lix = Lix::open_from_blob(&blob, LixConfig::default())?;
        let lix_id = lix.lix_id().to_string();

        let mut instances = self.lock()?;
        if instances.contains_key(&lix_id) {
            return Err(SyncError::LixExists(lix_id));
        }
        self.persist(&mut lix)?;
        instances.insert(lix_id.clone(), lix);
        Ok(NewResponse { lix_id })
    }

    pub fn get(&self, request: GetRequest) -> SyncResult<GetResponse> {
        self.with_lix(&request.lix_id, |lix| {
            Ok(GetResponse {
                blob: encode_blob(&lix.to_blob()?),
            })
        })
    }

    pub fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.with_lix(&request.lix_id, |lix| {
            // Persisting can't join the bundle's transaction, so a failed
            // write puts back the image taken before applying.
            let before = match self.data_dir {
                Some(_) => Some(lix.to_blob()?),
                None => None,
            };
            let report = apply_bundle(lix, &request.bundle)?;
            if report.commits_applied > 0 || !request.bundle.versions.is_empty() {
                if let Err(err) = self.persist(lix) {
                    if let Some(blob) = before {
                        *lix = Lix::open_from_blob(&blob, LixConfig::default())?;
                    }
                    Logger::error(
                        "SYNC_PUSH_REVERTED",
                        &[("error", &err.to_string()), ("lix_id", &request.lix_id)],
                    );
                    return Err(err);
                }
            }
            lix.metrics.increment_sync_pushes();
            log_event_with_fields(
                Event::SyncPushApplied,
                &[
                    ("commits", &report.commits_applied.to_string()),
                    ("lix_id", &request.lix_id),
                ],
            );
            Ok(PushResponse { report })
        })
    }

    pub fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.with_lix(&request.lix_id, |lix| {
            let known = request.since_commit_ids.unwrap_or_default();
            let bundle = export_bundle(lix, &known)?;
            lix.metrics.increment_sync_pulls();
            log_event_with_fields(
                Event::SyncPullServed,
                &[
                    ("commits", &bundle.commits.len().to_string()),
                    ("lix_id", &request.lix_id),
                ],
            );
            Ok(PullResponse { bundle })
        })
    }

    /// Run a read-only query
    ///
    /// Mutations are rejected before anything runs, and whatever the query
    /// touches is rolled back afterwards.
    pub fn query(&self, request: QueryRequest) -> SyncResult<QueryResponse> {
        let params = query_params(&request.params);
        ensure_read_only(&request.sql, &params)?;
        self.with_lix(&request.lix_id, |lix| {
            let result = lix.rolled_back(|lix| lix.execute(&request.sql, &params))?;
            Ok(QueryResponse {
                rows: result.to_json_rows(),
                columns: result.columns,
            })
        })
    }

    /// Write the instance's blob into the data dir, if there is one
    fn persist(&self, lix: &mut Lix) -> SyncResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let lix_id = lix.lix_id().to_string();
        if lix_id.is_empty()
            || !lix_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SyncError::InvalidRequest(format!(
                "lix id '{}' can't be used as a file name",
                lix_id
            )));
        }

        let blob = lix.to_blob()?;
        let path = dir.join(format!("{}.{}", lix_id, BLOB_EXTENSION));
        let tmp = dir.join(format!("{}.{}.tmp", lix_id, BLOB_EXTENSION));
        fs::write(&tmp, &blob)
            .map_err(|e| LixError::io(format!("failed to write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| LixError::io(format!("failed to replace {}", path.display()), e))?;
        Ok(())
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

fn blob_paths(dir: &Path) -> SyncResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| LixError::io(format!("failed to list {}", dir.display()), e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| LixError::io(format!("failed to list {}", dir.display()), e))?
            .path();
        if path.extension().is_some_and(|ext| ext == BLOB_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

// ==================
// Server
// ==================

/// HTTP server for the `/lsp/*` routes
pub struct LspServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl LspServer {
    pub fn new(config: ServerConfig) -> SyncResult<Self> {
        config.validate()?;
        let state = Arc::new(ServerState::open(&config)?);
        Ok(Self { config, state })
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Router with CORS and request tracing applied
    pub fn router(&self) -> Router {
        let cors = if self.config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        lsp_routes(self.state())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address '{}': {}", self.config.socket_addr(), e),
            )
        })?;

        let router = self.router();
        let listener = TcpListener::bind(addr).await?;
        Logger::info(
            Event::ServerListening.as_str(),
            &[
                ("addr", &addr.to_string()),
                ("instances", &self.state.lix_ids().map(|ids| ids.len()).unwrap_or(0).to_string()),
            ],
        );
        axum::serve(listener, router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::bundle::Bundle;
    use tempfile::TempDir;

    fn blob_of(lix: &mut Lix) -> String {
        encode_blob(&lix.to_blob().unwrap())
    }

    fn hosted() -> (ServerState, String) {
        let state = ServerState::new();
        let mut lix = Lix::open(LixConfig::default().with_key_value("greeting", "hi".into())).unwrap();
        let response = state.create(NewRequest { blob: blob_of(&mut lix) }).unwrap();
        assert_eq!(response.lix_id, lix.lix_id());
        (state, response.lix_id)
    }

    #[test]
    fn test_create_twice_conflicts() {
        let state = ServerState::new();
        let mut lix = Lix::open(LixConfig::default()).unwrap();
        let blob = blob_of(&mut lix);
        state.create(NewRequest { blob: blob.clone() }).unwrap();
        let err = state.create(NewRequest { blob }).unwrap_err();
        assert_eq!(err.code(), "ALREADY_EXISTS");
    }

    #[test]
    fn test_unknown_lix_id() {
        let state = ServerState::new();
        let err = state
            .pull(PullRequest {
                lix_id: "missing".into(),
                since_commit_ids: None,
            })
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_query_reads_and_rejects_mutations() {
        let (state, lix_id) = hosted();
        let response = state
            .query(QueryRequest {
                lix_id: lix_id.clone(),
                sql: "SELECT key, value FROM key_value_all WHERE key = ?".into(),
                params: vec!["greeting".into()],
            })
            .unwrap();
        assert_eq!(response.columns, vec!["key", "value"]);
        assert!(!response.rows.is_empty());

        let err = state
            .query(QueryRequest {
                lix_id,
                sql: "DELETE FROM key_value".into(),
                params: vec![],
            })
            .unwrap_err();
        assert_eq!(err.code(), "MUTATION_QUERY_NOT_ALLOWED");
    }

    #[test]
    fn test_empty_push_reports_versions() {
        let (state, lix_id) = hosted();
        let response = state
            .push(PushRequest {
                lix_id,
                bundle: Bundle::default(),
            })
            .unwrap();
        assert_eq!(response.report.commits_applied, 0);
        assert!(response.report.versions.is_empty());
    }

    #[test]
    fn test_instances_survive_restart() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };

        let mut lix = Lix::open(LixConfig::default()).unwrap();
        let state = ServerState::open(&config).unwrap();
        let lix_id = state.create(NewRequest { blob: blob_of(&mut lix) }).unwrap().lix_id;
        drop(state);

        let reopened = ServerState::open(&config).unwrap();
        assert_eq!(reopened.lix_ids().unwrap(), vec![lix_id]);
    }

    #[test]
    fn test_push_is_undone_when_persisting_fails() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        let config = ServerConfig {
            data_dir: Some(data_dir.clone()),
            ..ServerConfig::default()
        };
        let state = ServerState::open(&config).unwrap();

        let mut lix = Lix::open(LixConfig::default()).unwrap();
        let blob = lix.to_blob().unwrap();
        let lix_id = state.create(NewRequest { blob: encode_blob(&blob) }).unwrap().lix_id;

        let mut client = Lix::open_from_blob(&blob, LixConfig::default()).unwrap();
        client
            .execute("INSERT INTO key_value (key, value) VALUES ('pushed', 'yes')", &[])
            .unwrap();
        client.commit().unwrap();
        let bundle = export_bundle(&client, &[]).unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        std::fs::write(&data_dir, b"not a directory").unwrap();

        assert!(state
            .push(PushRequest {
                lix_id: lix_id.clone(),
                bundle,
            })
            .is_err());
        let response = state
            .query(QueryRequest {
                lix_id,
                sql: "SELECT value FROM key_value_all WHERE key = 'pushed'".into(),
                params: vec![],
            })
            .unwrap();
        assert!(response.rows.is_empty());
    }

    #[test]
    fn test_query_changes_nothing() {
        let (state, lix_id) = hosted();
        let count = |state: &ServerState| {
            state
                .query(QueryRequest {
                    lix_id: lix_id.clone(),
                    sql: "SELECT count(*) AS n FROM lix_internal_change".into(),
                    params: vec![],
                })
                .unwrap()
                .rows
        };
        let before = count(&state);

        let err = state
            .query(QueryRequest {
                lix_id: lix_id.clone(),
                sql: "WITH x AS (SELECT 1) DELETE FROM lix_internal_change".into(),
                params: vec![],
            })
            .unwrap_err();
        assert_eq!(err.code(), "MUTATION_QUERY_NOT_ALLOWED");
        assert_eq!(count(&state), before);

        state
            .query(QueryRequest {
                lix_id: lix_id.clone(),
                sql: "SELECT count(*) AS n FROM state_all".into(),
                params: vec![],
            })
            .unwrap();
        let stale = state.with_lix(&lix_id, |lix| Ok(lix.cache_is_stale())).unwrap();
        assert!(stale);
    }
}
