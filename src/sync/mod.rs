//! # Sync Protocol
//!
//! Replicates history between instances that share a lix id. The unit of
//! exchange is a [`Bundle`] of sealed commits with their change sets,
//! changes and snapshots plus the sender's version heads.
//!
//! - `pull`: the server sends what is reachable from its versions and not
//!   already an ancestor of the client's heads
//! - `push`: the server applies the client's bundle in one transaction;
//!   versions fast-forward when they can and are reported as diverged when
//!   they can't
//!
//! The server side is an axum router over [`ServerState`]; clients talk to it
//! through a [`Transport`].

mod bundle;
mod client;
mod config;
mod errors;
mod protocol;
mod routes;
mod server;

pub use bundle::{
    apply_bundle, export_bundle, Bundle, BundleCommit, BundleSnapshot, SyncReport, VersionHead,
    VersionReport, VersionStatus,
};
pub use client::{InProcessTransport, SyncClient, Transport};
pub use config::ServerConfig;
pub use errors::{ErrorBody, SyncError, SyncResult};
pub use protocol::{
    decode_blob, encode_blob, ensure_read_only, GetRequest, GetResponse, NewRequest, NewResponse,
    PullRequest, PullResponse, PushRequest, PushResponse, QueryRequest, QueryResponse,
    GET_ROUTE, NEW_ROUTE, PULL_ROUTE, PUSH_ROUTE, QUERY_ROUTE,
};
pub use routes::{lsp_routes, HealthResponse};
pub use server::{LspServer, ServerState};
