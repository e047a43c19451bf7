//! Client side of the sync protocol
//!
//! [`SyncClient`] drives push and pull for one local instance over a
//! [`Transport`]. The commit ids last seen on the server are remembered in
//! the instance's meta table, so a push only carries what the server can't
//! have yet.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::engine::{Lix, LixConfig};
use crate::errors::{LixError, LixResult};
use crate::version::list_versions;

use super::bundle::{apply_bundle, export_bundle, SyncReport};
use super::errors::{ErrorBody, SyncError, SyncResult};
use super::protocol::{
    decode_blob, encode_blob, GetRequest, GetResponse, NewRequest, NewResponse, PullRequest, PullResponse,
    PushRequest, PushResponse,
};
use super::server::ServerState;

const REMOTE_HEADS_META_KEY: &str = "sync_remote_heads";

/// How requests reach a sync server
pub trait Transport {
    fn create(&self, request: NewRequest) -> SyncResult<NewResponse>;
    fn get(&self, request: GetRequest) -> SyncResult<GetResponse>;
    fn push(&self, request: PushRequest) -> SyncResult<PushResponse>;
    fn pull(&self, request: PullRequest) -> SyncResult<PullResponse>;
}

/// Transport calling a [`ServerState`] in the same process
///
/// Requests and responses still pass through JSON, and server errors come
/// back as [`SyncError::Remote`], the way they would over HTTP.
#[derive(Clone)]
pub struct InProcessTransport {
    state: Arc<ServerState>,
}

impl InProcessTransport {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    fn call<Req, Resp, F>(&self, request: Req, handle: F) -> SyncResult<Resp>
    where
        Req: Serialize + DeserializeOwned,
        Resp: Serialize + DeserializeOwned,
        F: FnOnce(&ServerState, Req) -> SyncResult<Resp>,
    {
        let request = round_trip(&request)?;
        match handle(&self.state, request) {
            Ok(response) => round_trip(&response),
            Err(err) => Err(SyncError::from_body(ErrorBody::from(&err))),
        }
    }
}

fn round_trip<T: Serialize + DeserializeOwned>(value: &T) -> SyncResult<T> {
    let wire = serde_json::to_vec(value).map_err(LixError::from)?;
    Ok(serde_json::from_slice(&wire).map_err(LixError::from)?)
}

impl Transport for InProcessTransport {
    fn create(&self, request: NewRequest) -> SyncResult<NewResponse> {
        self.call(request, ServerState::create)
    }

    fn get(&self, request: GetRequest) -> SyncResult<GetResponse> {
        self.call(request, ServerState::get)
    }

    fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        self.call(request, ServerState::push)
    }

    fn pull(&self, request: PullRequest) -> SyncResult<PullResponse> {
        self.call(request, ServerState::pull)
    }
}

/// Push/pull driver for local instances
pub struct SyncClient<T: Transport> {
    transport: T,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Host `lix` on the server under its own lix id
    pub fn publish(&self, lix: &mut Lix) -> SyncResult<String> {
        let blob = encode_blob(&lix.to_blob()?);
        let response = self.transport.create(NewRequest { blob })?;
        let tips = local_tips(lix)?;
        remember_remote_heads(lix, tips)?;
        Ok(response.lix_id)
    }

    /// Open a local copy of a hosted instance
    pub fn fetch(&self, lix_id: &str) -> SyncResult<Lix> {
        let response = self.transport.get(GetRequest {
            lix_id: lix_id.to_string(),
        })?;
        let mut lix = Lix::open_from_blob(&decode_blob(&response.blob)?, LixConfig::default())?;
        let tips = local_tips(&lix)?;
        remember_remote_heads(&mut lix, tips)?;
        Ok(lix)
    }

    /// Send every local commit the server isn't known to have
    pub fn push(&self, lix: &mut Lix) -> SyncResult<SyncReport> {
        let known: Vec<String> = remote_heads(lix)?.into_iter().collect();
        let bundle = export_bundle(lix, &known)?;
        let response = self.transport.push(PushRequest {
            lix_id: lix.lix_id().to_string(),
            bundle,
        })?;
        let heads = response.report.versions.iter().map(|v| v.commit_id.clone());
        remember_remote_heads(lix, heads)?;
        Ok(response.report)
    }

    /// Fetch and apply the server's commits the local instance lacks
    pub fn pull(&self, lix: &mut Lix) -> SyncResult<SyncReport> {
        let response = self.transport.pull(PullRequest {
            lix_id: lix.lix_id().to_string(),
            since_commit_ids: Some(local_tips(lix)?),
        })?;
        let report = apply_bundle(lix, &response.bundle)?;
        let heads = response.bundle.versions.iter().map(|v| v.commit_id.clone());
        remember_remote_heads(lix, heads)?;
        Ok(report)
    }

    /// Pull, then push; returns both reports
    pub fn sync(&self, lix: &mut Lix) -> SyncResult<(SyncReport, SyncReport)> {
        let pulled = self.pull(lix)?;
        let pushed = self.push(lix)?;
        Ok((pulled, pushed))
    }
}

fn local_tips(lix: &Lix) -> LixResult<Vec<String>> {
    Ok(list_versions(&lix.backend)?
        .into_iter()
        .map(|version| version.commit_id)
        .collect())
}

fn remote_heads(lix: &Lix) -> LixResult<BTreeSet<String>> {
    match lix.backend.get_meta(REMOTE_HEADS_META_KEY)? {
        Some(text) => serde_json::from_str(&text).map_err(|e| {
            LixError::CorruptState(format!("unreadable {}: {}", REMOTE_HEADS_META_KEY, e))
        }),
        None => Ok(BTreeSet::new()),
    }
}

/// Commits are immutable, so the set only grows
fn remember_remote_heads<I>(lix: &mut Lix, heads: I) -> LixResult<()>
where
    I: IntoIterator<Item = String>,
{
    let mut known = remote_heads(lix)?;
    known.extend(heads);
    let text = serde_json::to_string(&known)?;
    lix.backend.set_meta(REMOTE_HEADS_META_KEY, &text)
}
