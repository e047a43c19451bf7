//! Envelope metadata entry
//!
//! Stored as the `settings` entry of the archive:
//! - format_version: always 1
//! - lix_id: id of the exported instance
//! - db_checksum: CRC32 of the `db` entry, `crc32:<8 hex digits>`

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::errors::{LixError, LixResult};

pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeSettings {
    pub format_version: u8,
    pub lix_id: String,
    pub db_checksum: String,
}

impl EnvelopeSettings {
    pub fn new(lix_id: &str, db: &[u8]) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            lix_id: lix_id.to_string(),
            db_checksum: db_checksum(db),
        }
    }

    pub fn to_json(&self) -> LixResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> LixResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| LixError::CorruptState(format!("invalid envelope settings: {}", e)))
    }

    /// Check the format version and the checksum of the `db` entry
    pub fn verify(&self, db: &[u8]) -> LixResult<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(LixError::Unsupported(format!(
                "envelope format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        let actual = db_checksum(db);
        if actual != self.db_checksum {
            return Err(LixError::CorruptState(format!(
                "db checksum mismatch: settings say {}, content is {}",
                self.db_checksum, actual
            )));
        }
        Ok(())
    }
}

fn db_checksum(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    format!("crc32:{:08x}", hasher.finalize())
}
