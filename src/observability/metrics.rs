//! Per-instance counters
//!
//! Counters only, monotonic, reset when the instance is opened.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters of one `Lix` instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    changes_written: AtomicU64,
    snapshots_written: AtomicU64,
    commits_created: AtomicU64,
    versions_created: AtomicU64,
    /// Full rebuilds of every cache table
    cache_populations: AtomicU64,
    /// Single-version fills after branching
    cache_version_populations: AtomicU64,
    cache_invalidations: AtomicU64,
    queries_executed: AtomicU64,
    queries_rejected: AtomicU64,
    sync_pushes: AtomicU64,
    sync_pulls: AtomicU64,
}

macro_rules! counter {
    ($increment:ident, $get:ident, $field:ident) => {
        pub fn $increment(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_changes_written, changes_written, changes_written);
    counter!(increment_snapshots_written, snapshots_written, snapshots_written);
    counter!(increment_commits_created, commits_created, commits_created);
    counter!(increment_versions_created, versions_created, versions_created);
    counter!(increment_cache_populations, cache_populations, cache_populations);
    counter!(
        increment_cache_version_populations,
        cache_version_populations,
        cache_version_populations
    );
    counter!(increment_cache_invalidations, cache_invalidations, cache_invalidations);
    counter!(increment_queries_executed, queries_executed, queries_executed);
    counter!(increment_queries_rejected, queries_rejected, queries_rejected);
    counter!(increment_sync_pushes, sync_pushes, sync_pushes);
    counter!(increment_sync_pulls, sync_pulls, sync_pulls);

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            changes_written: self.changes_written(),
            snapshots_written: self.snapshots_written(),
            commits_created: self.commits_created(),
            versions_created: self.versions_created(),
            cache_populations: self.cache_populations(),
            cache_version_populations: self.cache_version_populations(),
            cache_invalidations: self.cache_invalidations(),
            queries_executed: self.queries_executed(),
            queries_rejected: self.queries_rejected(),
            sync_pushes: self.sync_pushes(),
            sync_pulls: self.sync_pulls(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub changes_written: u64,
    pub snapshots_written: u64,
    pub commits_created: u64,
    pub versions_created: u64,
    pub cache_populations: u64,
    pub cache_version_populations: u64,
    pub cache_invalidations: u64,
    pub queries_executed: u64,
    pub queries_rejected: u64,
    pub sync_pushes: u64,
    pub sync_pulls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.changes_written, 0);
        assert_eq!(snapshot.cache_populations, 0);
        assert_eq!(snapshot.sync_pulls, 0);
    }

    #[test]
    fn test_increment_counters() {
        let registry = MetricsRegistry::new();
        registry.increment_changes_written();
        registry.increment_changes_written();
        registry.increment_cache_populations();
        registry.increment_queries_rejected();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.changes_written, 2);
        assert_eq!(snapshot.cache_populations, 1);
        assert_eq!(snapshot.queries_rejected, 1);
        assert_eq!(snapshot.queries_executed, 0);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_commits_created();
        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["commits_created"], 1);
        assert_eq!(parsed["sync_pushes"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_queries_executed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.queries_executed(), 800);
    }
}
