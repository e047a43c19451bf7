//! Sync Protocol Tests
//!
//! Drives the `/lsp/*` router over HTTP requests, the way a remote client
//! would, and checks that instances converge and failed pushes change
//! nothing on the server.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tower::ServiceExt;

use lix::sync::{
    export_bundle, lsp_routes, ErrorBody, GetRequest, GetResponse, NewRequest, NewResponse,
    PullRequest, PullResponse, PushRequest, PushResponse, QueryRequest, QueryResponse,
    ServerState, SyncClient, SyncError, SyncResult, Transport, VersionStatus, GET_ROUTE,
    NEW_ROUTE, PULL_ROUTE, PUSH_ROUTE, QUERY_ROUTE,
};
use lix::{Lix, LixConfig};

// =============================================================================
// Test Utilities
// =============================================================================

/// Transport sending every request through the axum router
struct RouterTransport {
    router: Router,
    runtime: tokio::runtime::Runtime,
}

impl RouterTransport {
    fn new(state: Arc<ServerState>) -> Self {
        Self {
            router: lsp_routes(state),
            runtime: tokio::runtime::Runtime::new().unwrap(),
        }
    }

    fn post<Req: Serialize, Resp: DeserializeOwned>(&self, route: &str, body: &Req) -> SyncResult<Resp> {
        let (status, bytes) = self.raw(route, serde_json::to_vec(body).unwrap());
        if status == StatusCode::OK {
            Ok(serde_json::from_slice(&bytes).unwrap())
        } else {
            let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
            Err(SyncError::from_body(body))
        }
    }

    fn raw(&self, route: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("POST")
            .uri(route)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.runtime.block_on(async {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, bytes.to_vec())
        })
    }

    fn query(&self, lix_id: &str, sql: &str) -> Vec<Value> {
        let response: QueryResponse = self
            .post(
                QUERY_ROUTE,
                &QueryRequest {
                    lix_id: lix_id.to_string(),
                    sql: sql.to_string(),
                    params: vec![],
                },
            )
            .unwrap();
        response.rows
    }
}

impl Transport for RouterTransport {
    fn create(&self, request: NewRequest) -> SyncResult<NewResponse> {
        self.post(NEW_ROUTE, &request)
    }

    fn get(&self, request: GetRequest) -> SyncResult<GetResponse> {
        self.post(GET_ROUTE, &request)
    }

    fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.post(PUSH_ROUTE, &request)
    }

    fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.post(PULL_ROUTE, &request)
    }
}

fn set(lix: &mut Lix, key: &str, value: &str) {
    let params = [value.to_string().into(), key.to_string().into()];
    let existing = lix
        .execute("SELECT key FROM key_value WHERE key = ?", &params[1..])
        .unwrap();
    let sql = if existing.is_empty() {
        "INSERT INTO key_value (value, key) VALUES (?, ?)"
    } else {
        "UPDATE key_value SET value = ? WHERE key = ?"
    };
    lix.execute(sql, &params).unwrap();
    lix.commit().unwrap();
}

fn setup() -> (SyncClient<RouterTransport>, Lix, Lix, String) {
    let client = SyncClient::new(RouterTransport::new(Arc::new(ServerState::new())));
    let mut alice = Lix::open(LixConfig::default()).unwrap();
    let lix_id = client.publish(&mut alice).unwrap();
    let bob = client.fetch(&lix_id).unwrap();
    (client, alice, bob, lix_id)
}

const HISTORY: &str = "SELECT id FROM \"commit\" ORDER BY id";
const TIPS: &str = "SELECT id, commit_id FROM version ORDER BY id";

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_clients_converge_over_http() {
    let (client, mut alice, mut bob, lix_id) = setup();

    set(&mut alice, "title", "draft");
    client.sync(&mut alice).unwrap();
    client.sync(&mut bob).unwrap();
    assert_eq!(bob.key_value("title").unwrap(), Some(json!("draft")));

    set(&mut bob, "title", "final");
    client.sync(&mut bob).unwrap();
    client.sync(&mut alice).unwrap();
    assert_eq!(alice.key_value("title").unwrap(), Some(json!("final")));

    let remote = client.transport().query(&lix_id, TIPS);
    let local = alice.execute(TIPS, &[]).unwrap().to_json_rows();
    let remote_tips: Vec<&Value> = remote.iter().map(|row| &row["commit_id"]).collect();
    let local_tips: Vec<&Value> = local.iter().map(|row| &row["commit_id"]).collect();
    assert_eq!(remote_tips, local_tips);
}

#[test]
fn test_pull_after_converging_is_empty() {
    let (client, mut alice, mut bob, _) = setup();
    set(&mut alice, "k", "v");
    client.push(&mut alice).unwrap();
    client.pull(&mut bob).unwrap();

    let again = client.pull(&mut bob).unwrap();
    assert_eq!(again.commits_applied, 0);
    assert!(again
        .versions
        .iter()
        .all(|v| v.status == VersionStatus::UpToDate));
}

#[test]
fn test_uncommitted_changes_stay_local() {
    let (client, mut alice, mut bob, _) = setup();
    alice
        .execute("INSERT INTO key_value (key, value) VALUES ('wip', 'yes')", &[])
        .unwrap();
    client.push(&mut alice).unwrap();
    client.pull(&mut bob).unwrap();
    assert_eq!(bob.key_value("wip").unwrap(), None);
    assert_eq!(alice.key_value("wip").unwrap(), Some(json!("yes")));
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_push_with_unknown_parent_changes_nothing() {
    let (client, mut alice, _, lix_id) = setup();
    set(&mut alice, "a", "1");
    let first = alice.active_version().unwrap().commit_id;
    set(&mut alice, "a", "2");

    let history = client.transport().query(&lix_id, HISTORY);
    let tips = client.transport().query(&lix_id, TIPS);

    let bundle = export_bundle(&alice, &[first]).unwrap();
    assert_eq!(bundle.commits.len(), 1);
    let err = client
        .transport()
        .push(PushRequest {
            lix_id: lix_id.clone(),
            bundle,
        })
        .unwrap_err();
    assert_eq!(err.code(), "LIX_UNKNOWN_PARENT_COMMIT");

    assert_eq!(client.transport().query(&lix_id, HISTORY), history);
    assert_eq!(client.transport().query(&lix_id, TIPS), tips);
}

#[test]
fn test_error_statuses() {
    let transport = RouterTransport::new(Arc::new(ServerState::new()));

    let (status, body) = transport.raw(GET_ROUTE, br#"{"lix_id": "nobody"}"#.to_vec());
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: ErrorBody = serde_json::from_slice(&body).unwrap();
    assert_eq!(body.code, "NOT_FOUND");

    let (status, _) = transport.raw(NEW_ROUTE, br#"{"blob": "not base64!"}"#.to_vec());
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = transport.raw(PUSH_ROUTE, b"{".to_vec());
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[test]
fn test_query_route_rejects_mutations_before_running() {
    let (client, _, _, lix_id) = setup();
    let before = client.transport().query(&lix_id, "SELECT count(*) AS n FROM version");

    for sql in [
        "INSERT INTO version (id) VALUES ('sneaky')",
        "SELECT 1; DELETE FROM key_value",
        "  update key_value SET value = 'x'",
        "WITH x AS (SELECT 1) DELETE FROM lix_internal_change",
        "WITH x AS (SELECT 1) DELETE FROM version WHERE id <> 'global'",
    ] {
        let err = client
            .transport()
            .post::<_, QueryResponse>(
                QUERY_ROUTE,
                &QueryRequest {
                    lix_id: lix_id.clone(),
                    sql: sql.to_string(),
                    params: vec![],
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "MUTATION_QUERY_NOT_ALLOWED", "{sql}");
    }

    assert_eq!(
        client.transport().query(&lix_id, "SELECT count(*) AS n FROM version"),
        before
    );
    assert_ne!(
        client.transport().query(&lix_id, "SELECT count(*) AS n FROM lix_internal_change"),
        vec![json!({"n": 0})]
    );
}
