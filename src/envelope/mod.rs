//! Blob export and import
//!
//! A blob is a tar archive holding two entries: `db`, a SQLite image written
//! with `VACUUM INTO`, and `settings`, a small JSON document carrying the
//! lix id and a checksum of `db`. Import verifies the checksum before the
//! image is loaded into a fresh in-memory database.

mod archive;
mod settings;

use std::fs;

use crate::errors::{LixError, LixResult};
use crate::storage::Backend;

pub use archive::{pack, unpack};
pub use settings::{EnvelopeSettings, FORMAT_VERSION};

pub const DB_ENTRY: &str = "db";
pub const SETTINGS_ENTRY: &str = "settings";

/// Serialize a database into an envelope blob
pub fn export(backend: &Backend, lix_id: &str) -> LixResult<Vec<u8>> {
    if backend.in_transaction() {
        return Err(LixError::InvalidInput(
            "can't export while a transaction is open".to_string(),
        ));
    }
    let dir = tempfile::tempdir().map_err(|e| LixError::io("failed to create temp dir", e))?;
    let path = dir.path().join("lix.sqlite");
    backend.vacuum_into(&path)?;
    let db = fs::read(&path)
        .map_err(|e| LixError::io(format!("failed to read {}", path.display()), e))?;

    let settings = EnvelopeSettings::new(lix_id, &db).to_json()?;
    pack(&[(DB_ENTRY, db.as_slice()), (SETTINGS_ENTRY, settings.as_slice())])
}

/// Load a database out of an envelope blob
pub fn import(blob: &[u8]) -> LixResult<(Backend, EnvelopeSettings)> {
    let entries = unpack(blob)?;
    let settings = entries
        .get(SETTINGS_ENTRY)
        .ok_or_else(|| LixError::CorruptState("envelope has no settings entry".to_string()))
        .and_then(|bytes| EnvelopeSettings::from_json(bytes))?;
    let db = entries
        .get(DB_ENTRY)
        .ok_or_else(|| LixError::CorruptState("envelope has no db entry".to_string()))?;
    settings.verify(db)?;

    let dir = tempfile::tempdir().map_err(|e| LixError::io("failed to create temp dir", e))?;
    let path = dir.path().join("lix.sqlite");
    fs::write(&path, db)
        .map_err(|e| LixError::io(format!("failed to write {}", path.display()), e))?;
    let backend = Backend::restore_from_file(&path)?;
    Ok((backend, settings))
}
