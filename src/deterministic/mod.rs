//! Deterministic mode
//!
//! When enabled, ids, timestamps and random numbers are derived from one
//! monotonically increasing sequence number instead of the OS. Two instances
//! opened with the same settings and fed the same operations produce
//! byte-identical databases.
//!
//! The sequence is held in memory and flushed to the meta table inside the
//! transaction that consumed it. Rolling that transaction back restores the
//! last flushed value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

const MODE_KEY: &str = "deterministic_mode";
const SEQUENCE_KEY: &str = "deterministic_sequence";

/// Deterministic mode settings, persisted with the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeterministicConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub seed: u64,
}

impl DeterministicConfig {
    pub fn enabled(seed: u64) -> Self {
        Self {
            enabled: true,
            seed,
        }
    }
}

/// Source of ids, timestamps and random numbers for one instance
#[derive(Debug, Clone)]
pub struct Deterministic {
    config: DeterministicConfig,
    next: u64,
    persisted: u64,
}

impl Deterministic {
    pub fn new(config: DeterministicConfig) -> Self {
        Self {
            config,
            next: 0,
            persisted: 0,
        }
    }

    /// Read settings and sequence from the meta table; absent settings mean disabled
    pub fn load(backend: &Backend) -> LixResult<Self> {
        let config = match backend.get_meta(MODE_KEY)? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => DeterministicConfig::default(),
        };
        let sequence = match backend.get_meta(SEQUENCE_KEY)? {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                LixError::CorruptState(format!("deterministic sequence '{}' is not a number", raw))
            })?,
            None => 0,
        };
        Ok(Self {
            config,
            next: sequence,
            persisted: sequence,
        })
    }

    pub fn config(&self) -> DeterministicConfig {
        self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Next unused sequence number
    pub fn sequence(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    pub fn uuid(&mut self) -> String {
        if !self.is_enabled() {
            return Uuid::new_v4().to_string();
        }
        let seq = self.advance();
        format!("01920000-0000-7000-8000-{:012x}", seq & 0xffff_ffff_ffff)
    }

    /// RFC 3339 timestamp with millisecond precision
    pub fn timestamp(&mut self) -> String {
        if !self.is_enabled() {
            return Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        }
        let seq = self.advance();
        let millis = i64::try_from(seq).unwrap_or(i64::MAX);
        DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Uniform number in `[0, 1)`
    pub fn random(&mut self) -> f64 {
        if !self.is_enabled() {
            return rand::random::<f64>();
        }
        let seq = self.advance();
        let mut hasher = Sha256::new();
        hasher.update(self.config.seed.to_be_bytes());
        hasher.update(seq.to_be_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        // 53 significant bits fill an f64 mantissa exactly.
        (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Write settings and sequence to the meta table
    pub fn persist_config(&mut self, backend: &Backend) -> LixResult<()> {
        backend.set_meta(MODE_KEY, &serde_json::to_string(&self.config)?)?;
        self.flush(backend)
    }

    /// Flush the sequence if it moved; call inside the owning transaction
    pub fn flush(&mut self, backend: &Backend) -> LixResult<()> {
        if !self.is_enabled() || self.next == self.persisted {
            return Ok(());
        }
        backend.set_meta(SEQUENCE_KEY, &self.next.to_string())?;
        self.persisted = self.next;
        Ok(())
    }

    /// Forget sequence numbers consumed by a rolled back transaction
    pub fn restore(&mut self, backend: &Backend) -> LixResult<()> {
        let reloaded = Self::load(backend)?;
        self.next = reloaded.next;
        self.persisted = reloaded.persisted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_uuid_format() {
        let mut det = Deterministic::new(DeterministicConfig::enabled(0));
        assert_eq!(det.uuid(), "01920000-0000-7000-8000-000000000000");
        assert_eq!(det.uuid(), "01920000-0000-7000-8000-000000000001");
        assert_eq!(det.sequence(), 2);
    }

    #[test]
    fn test_deterministic_uuid_past_32_bits() {
        let mut det = Deterministic {
            config: DeterministicConfig::enabled(0),
            next: (1 << 32) + 5,
            persisted: 0,
        };
        let id = det.uuid();
        assert_eq!(id, "01920000-0000-7000-8000-000100000005");
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_deterministic_timestamp_shares_counter() {
        let mut det = Deterministic::new(DeterministicConfig::enabled(0));
        det.uuid();
        assert_eq!(det.timestamp(), "1970-01-01T00:00:00.001Z");
        assert_eq!(det.uuid(), "01920000-0000-7000-8000-000000000002");
    }

    #[test]
    fn test_deterministic_random_is_reproducible() {
        let mut a = Deterministic::new(DeterministicConfig::enabled(42));
        let mut b = Deterministic::new(DeterministicConfig::enabled(42));
        let mut c = Deterministic::new(DeterministicConfig::enabled(7));
        let xs: Vec<f64> = (0..5).map(|_| a.random()).collect();
        let ys: Vec<f64> = (0..5).map(|_| b.random()).collect();
        let zs: Vec<f64> = (0..5).map(|_| c.random()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
        assert!(xs.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn test_disabled_mode_produces_distinct_v4_ids() {
        let mut det = Deterministic::new(DeterministicConfig::default());
        let a = det.uuid();
        let b = det.uuid();
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 4);
        assert_eq!(det.sequence(), 0);
    }

    #[test]
    fn test_flush_and_restore() {
        let backend = Backend::open_in_memory().unwrap();
        let mut det = Deterministic::new(DeterministicConfig::enabled(1));
        det.persist_config(&backend).unwrap();

        det.uuid();
        det.uuid();
        det.flush(&backend).unwrap();
        assert_eq!(backend.get_meta(SEQUENCE_KEY).unwrap().as_deref(), Some("2"));

        det.uuid();
        det.restore(&backend).unwrap();
        assert_eq!(det.sequence(), 2);

        let loaded = Deterministic::load(&backend).unwrap();
        assert!(loaded.is_enabled());
        assert_eq!(loaded.sequence(), 2);
    }
}
