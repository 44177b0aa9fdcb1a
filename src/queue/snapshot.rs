//! Whole-file JSON snapshots
//!
//! Writes go to a sibling temp file which is fsynced and renamed over the
//! target, so a reader never observes a half-written snapshot.

use super::QueueError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Outcome of reading a snapshot at startup
#[derive(Debug)]
pub enum Loaded<T> {
    Missing,
    Found(T),
    /// The file existed but could not be parsed; it was moved to `moved_to`
    Corrupt { moved_to: PathBuf, reason: String },
}

/// Atomically replace `path` with the JSON encoding of `value`
pub fn write<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), QueueError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| QueueError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| QueueError::io(dir, source))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| QueueError::io(dir, source))?;
    tmp.write_all(&bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|source| QueueError::io(path, source))?;
    tmp.persist(path)
        .map_err(|e| QueueError::io(path, e.error))?;
    Ok(())
}

/// Read a snapshot, moving an unparsable file aside
///
/// Any I/O failure other than "not found" is returned as an error.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<Loaded<T>, QueueError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(source) => return Err(QueueError::io(path, source)),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Loaded::Found(value)),
        Err(e) => {
            let moved_to = corrupt_path(path);
            fs::rename(path, &moved_to).map_err(|source| QueueError::io(path, source))?;
            Ok(Loaded::Corrupt {
                moved_to,
                reason: e.to_string(),
            })
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp_millis();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!("{}.corrupt-{}", name, stamp))
}
