//! Source key to destination id table

use super::ResolveError;
use crate::queue::snapshot::{self, Loaded};
use crate::record::RecordKey;
use crate::shutdown::Flushable;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Destination ids of migrated records, keyed by `author:timestamp`
///
/// Entries are only ever added. When backed by a file the table survives
/// restarts, so replies enqueued in one run can be addressed in the next.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<RecordKey, String>>,
}

impl ReferenceTable {
    /// A table that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the table at `path`, empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let entries = match snapshot::read::<BTreeMap<RecordKey, String>>(&path)? {
            Loaded::Found(entries) => entries,
            Loaded::Missing => BTreeMap::new(),
            Loaded::Corrupt { moved_to, reason } => {
                return Err(ResolveError::CorruptReferences {
                    path: moved_to.display().to_string(),
                    reason,
                }
                .into())
            }
        };

        tracing::info!(path = %path.display(), entries = entries.len(), "Loaded reference table");
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the destination id of `key`; an existing entry is kept
    pub fn insert(&self, key: RecordKey, destination_id: impl Into<String>) {
        let destination_id = destination_id.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key) {
            Some(existing) if *existing != destination_id => {
                tracing::warn!(
                    key = %key,
                    existing = %existing,
                    ignored = %destination_id,
                    "Record already has a destination id"
                );
            }
            Some(_) => {}
            None => {
                entries.insert(key, destination_id);
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Flushable for ReferenceTable {
    fn name(&self) -> &str {
        "references"
    }

    fn close(&self) {}

    fn flush(&self) -> crate::Result<()> {
        if let Some(ref path) = self.path {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            snapshot::write(path, &*entries)?;
        }
        Ok(())
    }
}
