//! Filesystem long-term memory backend.
//!
//! One JSON file per memory id under a namespaced directory. Saves go
//! through a temp file and an atomic rename so concurrent writers and
//! crashes never leave a torn blob. Blobs carry a version tag; a blob
//! that cannot be parsed is logged and treated as absent so the
//! conversation starts fresh.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ra_domain::error::Result;
use ra_domain::Message;

use crate::backend::MemoryBackend;

const BLOB_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredConversation {
    #[serde(default = "default_version")]
    version: u32,
    messages: Vec<Message>,
}

fn default_version() -> u32 {
    BLOB_VERSION
}

/// Long-term memory persisted as one file per conversation.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create the backend, creating the namespace directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_id(id)))
    }
}

/// Restrict ids to a safe filename charset; anything else becomes `_`.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl MemoryBackend for FileBackend {
    async fn load(&self, id: &str) -> Result<Option<Vec<Message>>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<StoredConversation>(&raw) {
            Ok(stored) if stored.version == BLOB_VERSION => Ok(Some(stored.messages)),
            Ok(stored) => {
                tracing::warn!(
                    memory_id = %id,
                    version = stored.version,
                    "unsupported memory blob version, starting fresh"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(
                    memory_id = %id,
                    path = %path.display(),
                    error = %e,
                    "unreadable memory blob, starting fresh"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, id: &str, messages: &[Message]) -> Result<()> {
        let path = self.path_for(id);
        let blob = StoredConversation {
            version: BLOB_VERSION,
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&blob)?;

        // Write-then-rename keeps readers from ever seeing a partial file.
        let tmp = tmp_path(&path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ra_domain::ToolCallRequest;

    fn sample_conversation() -> Vec<Message> {
        vec![
            Message::user("compute"),
            Message::assistant_with_calls(
                "",
                vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "add".into(),
                    arguments: r#"{"a":2,"b":3}"#.into(),
                }],
            ),
            Message::tool("c1", "5"),
            Message::assistant("the answer is 5"),
        ]
    }

    #[tokio::test]
    async fn save_load_round_trip_preserves_messages() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        let conversation = sample_conversation();
        backend.save("conv-1", &conversation).await.unwrap();
        let loaded = backend.load("conv-1").await.unwrap().unwrap();
        assert_eq!(loaded, conversation);
    }

    #[tokio::test]
    async fn missing_id_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        assert!(backend.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_blob_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(backend.load("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_version_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("future.json"),
            r#"{"version": 99, "messages": []}"#,
        )
        .unwrap();
        assert!(backend.load("future").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.save("conv", &sample_conversation()).await.unwrap();
        backend.delete("conv").await.unwrap();
        backend.delete("conv").await.unwrap();
        assert!(backend.load("conv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.save("zeta", &[]).await.unwrap();
        backend.save("alpha", &[]).await.unwrap();
        assert_eq!(backend.list().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn hostile_ids_are_sanitized_into_the_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.save("../escape", &[]).await.unwrap();
        // The blob landed inside the namespace directory.
        let ids = backend.list().await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(backend.load("../escape").await.unwrap().is_some());
    }
}
