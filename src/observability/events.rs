//! Lifecycle events emitted by the engine and the sync server

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Instance lifecycle
    LixOpened,
    LixImported,
    LixExported,
    LixClosed,

    // History
    CommitCreated,
    VersionCreated,
    VersionSwitched,
    VersionDeleted,

    // Cache
    CachePopulationBegin,
    CachePopulationComplete,
    CacheMarkedStale,
    /// Change log could not be replayed (FATAL)
    CachePopulationFailed,

    // Queries
    QueryExecuted,
    QueryRejected,

    // Sync
    SyncPushApplied,
    SyncPullServed,
    SyncVersionDiverged,
    ServerListening,
    ServerRequestFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::LixOpened => "LIX_OPENED",
            Event::LixImported => "LIX_IMPORTED",
            Event::LixExported => "LIX_EXPORTED",
            Event::LixClosed => "LIX_CLOSED",
            Event::CommitCreated => "COMMIT_CREATED",
            Event::VersionCreated => "VERSION_CREATED",
            Event::VersionSwitched => "VERSION_SWITCHED",
            Event::VersionDeleted => "VERSION_DELETED",
            Event::CachePopulationBegin => "CACHE_POPULATION_BEGIN",
            Event::CachePopulationComplete => "CACHE_POPULATION_COMPLETE",
            Event::CacheMarkedStale => "CACHE_MARKED_STALE",
            Event::CachePopulationFailed => "CACHE_POPULATION_FAILED",
            Event::QueryExecuted => "QUERY_EXECUTED",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::SyncPushApplied => "SYNC_PUSH_APPLIED",
            Event::SyncPullServed => "SYNC_PULL_SERVED",
            Event::SyncVersionDiverged => "SYNC_VERSION_DIVERGED",
            Event::ServerListening => "LSP_SERVER_LISTENING",
            Event::ServerRequestFailed => "LSP_REQUEST_FAILED",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::CachePopulationFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
