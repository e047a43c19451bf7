//! In-memory tar archive of named entries
//!
//! Entries are written in the order given; reading returns them sorted by
//! name. Only regular files are accepted.

use std::collections::BTreeMap;
use std::io::{self, Read};

use tar::{Archive, Builder, EntryType, Header};

use crate::errors::{LixError, LixResult};

/// Pack `(name, bytes)` entries into a tar archive
pub fn pack(entries: &[(&str, &[u8])]) -> LixResult<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *data)
            .map_err(|e| LixError::io(format!("failed to add '{}' to envelope", name), e))?;
    }
    builder
        .into_inner()
        .map_err(|e| LixError::io("failed to finish envelope", e))
}

/// Read every regular entry of a tar archive
pub fn unpack(blob: &[u8]) -> LixResult<BTreeMap<String, Vec<u8>>> {
    let mut archive = Archive::new(blob);
    let mut entries = BTreeMap::new();
    let iter = archive.entries().map_err(corrupt)?;
    for entry in iter {
        let mut entry = entry.map_err(corrupt)?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = entry
            .path()
            .map_err(corrupt)?
            .to_string_lossy()
            .trim_start_matches('/')
            .to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(corrupt)?;
        entries.insert(name, data);
    }
    Ok(entries)
}

fn corrupt(e: io::Error) -> LixError {
    LixError::CorruptState(format!("envelope is not a readable archive: {}", e))
}
