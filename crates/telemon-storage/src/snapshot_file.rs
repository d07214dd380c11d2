use crate::error::Result;
use std::io::{ErrorKind, Write};
use std::path::Path;
use telemon_common::types::Snapshot;

/// Reads a snapshot file. A missing or empty file is `Ok(None)`.
pub fn load(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Replaces the snapshot file with the given snapshot.
///
/// The JSON is written to a uniquely named sibling temp file and renamed
/// over the target, so a crash mid-write leaves the previous snapshot intact
/// and concurrent saves never share a temp file.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
