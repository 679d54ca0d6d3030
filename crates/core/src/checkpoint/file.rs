use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{CheckpointError, Checkpointer};
use crate::thread::Message;

/// The on-disk shape of one thread.
#[derive(Serialize, Deserialize)]
struct ThreadDocument {
    thread_id: String,
    /// Incremented on every save.
    version: u64,
    messages: Vec<Message>,
}

/// A checkpointer that stores each thread as a JSON document named
/// `<thread_id>.json` under a base directory.
///
/// Documents are replaced atomically: the new content is written to a
/// temporary file in the same directory and then renamed over the old one,
/// so a crash never leaves a half-written thread behind.
pub struct FileCheckpointer {
    base_path: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileCheckpointer {
    /// Creates a checkpointer rooted at `base_path`. The directory is
    /// created on the first save.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    fn thread_path(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(format!("{thread_id}.json")))
    }

    async fn load_document(
        &self,
        path: &Path,
    ) -> Result<Option<ThreadDocument>, CheckpointError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn write_atomically(
        &self,
        path: &Path,
        thread_id: &str,
        content: &[u8],
    ) -> Result<(), CheckpointError> {
        let tmp_path = self.base_path.join(format!(
            ".{thread_id}.{}.{}.tmp",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));

        let write_result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(err) = write_result {
            fs::remove_file(&tmp_path).await.ok();
            return Err(err.into());
        }
        Ok(())
    }
}

/// Rejects ids that are unsafe as a file name: empty ids, path separators,
/// `..` and control characters.
fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointError> {
    if thread_id.is_empty() {
        return Err(CheckpointError::InvalidThreadId(
            "thread id cannot be empty".to_owned(),
        ));
    }
    if thread_id.contains(['/', '\\'])
        || thread_id.contains("..")
        || thread_id.chars().any(char::is_control)
    {
        return Err(CheckpointError::InvalidThreadId(format!(
            "{thread_id:?} contains invalid characters"
        )));
    }
    Ok(())
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), CheckpointError> {
        let path = self.thread_path(thread_id)?;
        fs::create_dir_all(&self.base_path).await?;

        let version = self
            .load_document(&path)
            .await?
            .map_or(0, |doc| doc.version.saturating_add(1));
        let doc = ThreadDocument {
            thread_id: thread_id.to_owned(),
            version,
            messages: messages.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&doc)?;
        self.write_atomically(&path, thread_id, &content).await?;
        trace!("saved thread {thread_id} (version {version})");
        Ok(())
    }

    async fn load(
        &self,
        thread_id: &str,
    ) -> Result<Option<Vec<Message>>, CheckpointError> {
        let path = self.thread_path(thread_id)?;
        Ok(self.load_document(&path).await?.map(|doc| doc.messages))
    }
}

#[cfg(test)]
mod tests {
    use parley_model::{AssistantMessage, ToolCallRequest, ToolCallResult};
    use serde_json::{Value, json};
    use tempfile::TempDir;

    use super::*;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::user("What's the weather in Paris?"),
            Message::Assistant(AssistantMessage {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "c1".to_owned(),
                    name: "search".to_owned(),
                    arguments: json!({ "query": "weather Paris" }),
                }],
            }),
            Message::Tool(ToolCallResult {
                id: "c1".to_owned(),
                content: "sunny".to_owned(),
                is_error: false,
            }),
            Message::assistant("It's sunny."),
        ]
    }

    #[tokio::test]
    async fn test_save_load_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path().join("threads"));
        assert!(checkpointer.load("1").await.unwrap().is_none());

        let messages = sample_messages();
        checkpointer.save("1", &messages).await.unwrap();

        // A fresh instance, as after a restart.
        let checkpointer = FileCheckpointer::new(temp_dir.path().join("threads"));
        assert_eq!(checkpointer.load("1").await.unwrap().unwrap(), messages);
    }

    #[tokio::test]
    async fn test_document_layout() {
        let temp_dir = TempDir::new().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path());

        let messages = sample_messages();
        checkpointer.save("chat", &messages[..1]).await.unwrap();
        checkpointer.save("chat", &messages).await.unwrap();

        let content =
            std::fs::read_to_string(temp_dir.path().join("chat.json")).unwrap();
        let doc: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(doc["thread_id"], "chat");
        assert_eq!(doc["version"], 1);
        assert_eq!(doc["messages"].as_array().unwrap().len(), 4);

        // No temporary files are left behind.
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_thread_ids() {
        let temp_dir = TempDir::new().unwrap();
        let checkpointer = FileCheckpointer::new(temp_dir.path());

        for id in ["", "../escape", "a/b", "a\\b", "bad\nid"] {
            let err = checkpointer.save(id, &[]).await.unwrap_err();
            assert!(
                matches!(err, CheckpointError::InvalidThreadId(_)),
                "{id:?} should be rejected"
            );
            assert!(checkpointer.load(id).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_corrupted_document() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("1.json"), "{ not json").unwrap();

        let checkpointer = FileCheckpointer::new(temp_dir.path());
        let err = checkpointer.load("1").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Serialization(_)));
    }
}
