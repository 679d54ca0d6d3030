//! Durable storage of conversation threads.

mod file;
mod memory;

use async_trait::async_trait;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;

use crate::thread::Message;

/// Errors raised by a [`Checkpointer`].
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The thread id cannot be used by this checkpointer.
    #[error("invalid thread id: {0}")]
    InvalidThreadId(String),
    /// The underlying storage failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored thread could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists the messages of each thread, so that a conversation can be
/// resumed later, possibly by another process.
///
/// Implementations only need to store and return whole message lists. The
/// append-only discipline and per-thread serialization are enforced by
/// [`MessageStore`](crate::MessageStore), which is the only writer.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Replaces the stored messages of `thread_id`.
    async fn save(
        &self,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), CheckpointError>;

    /// Loads the messages of `thread_id`, or `None` if the thread has never
    /// been saved.
    async fn load(
        &self,
        thread_id: &str,
    ) -> Result<Option<Vec<Message>>, CheckpointError>;
}
