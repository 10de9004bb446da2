//! Conversation sources.
//!
//! The transcript watchers proper (Cursor / Claude Code discovery and
//! parsing) are external collaborators; this module ships the boundary
//! implementation used by `serve`: a directory of already-normalized
//! conversation JSON files.

use std::path::PathBuf;

use async_trait::async_trait;
use walkdir::WalkDir;

use sm_core::{Conversation, ConversationSource, SmError, SmResult};

/// Polls a directory of normalized `Conversation` JSON files (`*.json`,
/// top level only unless `recursive` is set). Files that fail to parse are
/// skipped with a warning so a single malformed transcript cannot stall the
/// watch tick.
pub struct DirectorySource {
    path: PathBuf,
    recursive: bool,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
        }
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

#[async_trait]
impl ConversationSource for DirectorySource {
    async fn poll(&self) -> SmResult<Vec<Conversation>> {
        if !self.path.is_dir() {
            return Err(SmError::Storage(format!(
                "not a directory: {}",
                self.path.display()
            )));
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&self.path).max_depth(max_depth);

        let mut conversations = Vec::new();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match std::fs::read(path) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "unreadable conversation file");
                    continue;
                }
            };
            match serde_json::from_slice::<Conversation>(&raw) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "skipping malformed conversation");
                }
            }
        }

        // Stable order keeps push batching deterministic.
        conversations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sm_core::{Client, Message};

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            client: Client::Cursor,
            project: "demo".into(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            messages: vec![Message::text("user", "hi")],
        }
    }

    #[tokio::test]
    async fn polls_valid_files_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            serde_json::to_vec(&conversation("sess-1")).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("b.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("c.txt"), b"ignored").unwrap();

        let source = DirectorySource::new(dir.path());
        let polled = source.poll().await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, "sess-1");
    }

    #[tokio::test]
    async fn subdirectories_need_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            nested.join("deep.json"),
            serde_json::to_vec(&conversation("deep")).unwrap(),
        )
        .unwrap();

        let flat = DirectorySource::new(dir.path());
        assert!(flat.poll().await.unwrap().is_empty());

        let recursive = DirectorySource::new(dir.path()).with_recursive(true);
        let polled = recursive.poll().await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].id, "deep");
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let source = DirectorySource::new("/nonexistent/sharme-test");
        assert!(source.poll().await.is_err());
    }
}
