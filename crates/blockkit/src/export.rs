//! Export directory reader

use crate::{Channel, Error, Message, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Index file listing every public channel in the export
const CHANNELS_FILE: &str = "channels.json";

/// Read-only view over an unpacked export directory
#[derive(Debug, Clone)]
pub struct Export {
    root: PathBuf,
}

impl Export {
    /// Open an export rooted at `root`
    ///
    /// Fails if the directory or its `channels.json` index is missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotFound(root));
        }
        if !root.join(CHANNELS_FILE).is_file() {
            return Err(Error::InvalidExport(format!(
                "{} has no {}",
                root.display(),
                CHANNELS_FILE
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All channels listed in the index
    pub fn channels(&self) -> Result<Vec<Channel>> {
        read_json(&self.root.join(CHANNELS_FILE))
    }

    /// Every message of a channel, in day-file order
    ///
    /// A channel listed in the index without a directory has no messages.
    pub fn messages(&self, channel: &Channel) -> Result<Vec<Message>> {
        let dir = self.root.join(&channel.name);
        if !dir.is_dir() {
            tracing::debug!(channel = %channel.name, "Channel has no message directory");
            return Ok(Vec::new());
        }

        let mut day_files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        day_files.sort();

        let mut messages = Vec::new();
        for path in day_files {
            let mut day: Vec<Message> = read_json(&path)?;
            messages.append(&mut day);
        }

        tracing::debug!(
            channel = %channel.name,
            messages = messages.len(),
            "Read channel messages"
        );
        Ok(messages)
    }

    /// Messages of a channel that carry migratable content
    pub fn migratable_messages(&self, channel: &Channel) -> Result<Vec<Message>> {
        let mut messages = self.messages(channel)?;
        messages.retain(Message::is_migratable);
        Ok(messages)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_export(dir: &Path) {
        fs::write(
            dir.join("channels.json"),
            r#"[{"id": "C1", "name": "general", "is_general": true},
                {"id": "C2", "name": "random"}]"#,
        )
        .unwrap();

        let general = dir.join("general");
        fs::create_dir(&general).unwrap();
        fs::write(
            general.join("2024-01-02.json"),
            r#"[{"type": "message", "user": "U1", "ts": "1704153600.000200", "text": "second day"}]"#,
        )
        .unwrap();
        fs::write(
            general.join("2024-01-01.json"),
            r#"[
                {"type": "message", "user": "U1", "ts": "1704067200.000100", "text": "first"},
                {"type": "message", "subtype": "channel_join", "user": "U2", "ts": "1704067201.000100", "text": "joined"}
            ]"#,
        )
        .unwrap();
        fs::write(general.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn test_open_missing_export() {
        let result = Export::open("/definitely/not/here");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_open_without_index() {
        let dir = TempDir::new().unwrap();
        let result = Export::open(dir.path());
        assert!(matches!(result, Err(Error::InvalidExport(_))));
    }

    #[test]
    fn test_read_channels_and_messages() {
        let dir = TempDir::new().unwrap();
        write_export(dir.path());

        let export = Export::open(dir.path()).unwrap();
        let channels = export.channels().unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels[0].is_general);

        let all = export.messages(&channels[0]).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text, "first");
        assert_eq!(all[2].text, "second day");

        let migratable = export.migratable_messages(&channels[0]).unwrap();
        assert_eq!(migratable.len(), 2);

        // No directory for "random"
        assert!(export.messages(&channels[1]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("channels.json"), "[{").unwrap();
        let export = Export::open(dir.path()).unwrap();
        match export.channels() {
            Err(Error::Parse { path, .. }) => assert!(path.ends_with("channels.json")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
