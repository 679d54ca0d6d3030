use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CheckpointError, Checkpointer};
use crate::thread::Message;

/// A checkpointer that keeps threads in process memory. Threads are lost
/// when the process exits.
#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, Vec<Message>>>,
}

impl MemoryCheckpointer {
    /// Creates an empty in-memory checkpointer.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(
        &self,
        thread_id: &str,
        messages: &[Message],
    ) -> Result<(), CheckpointError> {
        let mut threads = self.threads.write().await;
        threads.insert(thread_id.to_owned(), messages.to_vec());
        Ok(())
    }

    async fn load(
        &self,
        thread_id: &str,
    ) -> Result<Option<Vec<Message>>, CheckpointError> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned())
    }
}
