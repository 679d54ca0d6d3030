use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::checkpoint::{CheckpointError, Checkpointer};
use crate::thread::{Message, Thread};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// The append-only log of every thread, backed by a [`Checkpointer`].
///
/// Writers of the same thread are serialized: at most one [`ThreadGuard`]
/// per thread id exists at a time, and [`MessageStore::append`] waits for
/// it. Different threads never wait for each other.
///
/// Cloning the store is cheap, clones share the checkpointer and the locks.
#[derive(Clone)]
pub struct MessageStore {
    checkpointer: Arc<dyn Checkpointer>,
    locks: LockMap,
}

impl MessageStore {
    /// Creates a store persisting through `checkpointer`.
    pub fn new(checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            checkpointer,
            locks: Default::default(),
        }
    }

    /// Loads a thread. A thread that was never written is returned empty.
    pub async fn load(&self, thread_id: &str) -> Result<Thread, CheckpointError> {
        let messages = self.checkpointer.load(thread_id).await?;
        Ok(Thread::with_messages(thread_id, messages.unwrap_or_default()))
    }

    /// Appends one message to a thread and persists it.
    pub async fn append(
        &self,
        thread_id: &str,
        message: Message,
    ) -> Result<(), CheckpointError> {
        self.lock(thread_id).await?.append(message).await
    }

    /// Takes the writer slot of a thread, waiting for the current holder to
    /// release it, and loads the thread's current messages.
    pub async fn lock(
        &self,
        thread_id: &str,
    ) -> Result<ThreadGuard, CheckpointError> {
        let permit = self.thread_lock(thread_id).lock_owned().await;
        let mut guard = ThreadGuard {
            thread: Thread::with_messages(thread_id, vec![]),
            checkpointer: Arc::clone(&self.checkpointer),
            locks: Arc::clone(&self.locks),
            permit: Some(permit),
        };
        guard.thread = self.load(thread_id).await?;
        Ok(guard)
    }

    fn thread_lock(&self, thread_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(thread_id.to_owned()).or_default())
    }
}

/// Exclusive write access to one thread, together with a working copy of
/// its messages.
///
/// The working copy never runs ahead of the checkpointer: a message becomes
/// visible through [`ThreadGuard::thread`] only after it has been saved.
pub struct ThreadGuard {
    thread: Thread,
    checkpointer: Arc<dyn Checkpointer>,
    locks: LockMap,
    permit: Option<OwnedMutexGuard<()>>,
}

impl ThreadGuard {
    /// Returns the working copy of the thread.
    #[inline]
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Persists `message` at the end of the thread.
    ///
    /// On failure the thread is left as it was before the call.
    pub async fn append(&mut self, message: Message) -> Result<(), CheckpointError> {
        let messages = [self.thread.messages(), std::slice::from_ref(&message)].concat();
        self.checkpointer
            .save(self.thread.thread_id(), &messages)
            .await?;
        self.thread.push(message);
        Ok(())
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        drop(self.permit.take());

        // The lock entry goes away once nobody holds or waits for it.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let thread_id = self.thread.thread_id();
        if locks
            .get(thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(thread_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint::MemoryCheckpointer;

    #[tokio::test]
    async fn test_append_only_order() {
        let store = MessageStore::new(Arc::new(MemoryCheckpointer::new()));
        assert!(store.load("1").await.unwrap().is_empty());

        let expected: Vec<_> =
            (0..5).map(|i| Message::user(format!("msg-{i}"))).collect();
        for (idx, msg) in expected.iter().enumerate() {
            store.append("1", msg.clone()).await.unwrap();
            let thread = store.load("1").await.unwrap();
            assert_eq!(thread.len(), idx + 1);
            // Earlier messages are never altered.
            assert_eq!(thread.messages(), &expected[..=idx]);
        }
        assert_eq!(store.load("1").await.unwrap().thread_id(), "1");
        assert!(store.load("2").await.unwrap().is_empty());
    }

    /// Counts concurrent `save` calls per process, sleeping inside each one
    /// to widen the race window.
    #[derive(Default)]
    struct SlowCheckpointer {
        inner: MemoryCheckpointer,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl Checkpointer for SlowCheckpointer {
        async fn save(
            &self,
            thread_id: &str,
            messages: &[Message],
        ) -> Result<(), CheckpointError> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            let result = self.inner.save(thread_id, messages).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn load(
            &self,
            thread_id: &str,
        ) -> Result<Option<Vec<Message>>, CheckpointError> {
            self.inner.load(thread_id).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_serialize() {
        let checkpointer = Arc::new(SlowCheckpointer::default());
        let store = MessageStore::new(checkpointer.clone());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.append("shared", Message::user(format!("{i}"))).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // No append was lost to a read-modify-write race.
        let thread = store.load("shared").await.unwrap();
        assert_eq!(thread.len(), 16);
        assert!(!checkpointer.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_guard_blocks_other_writers() {
        let store = MessageStore::new(Arc::new(MemoryCheckpointer::new()));
        let mut guard = store.lock("1").await.unwrap();
        guard.append(Message::user("first")).await.unwrap();

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.append("1", Message::user("second")).await }
        });
        // Other threads are not blocked.
        store.append("2", Message::user("elsewhere")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        guard.append(Message::assistant("reply")).await.unwrap();
        drop(guard);
        pending.await.unwrap().unwrap();

        let contents: Vec<_> = store
            .load("1")
            .await
            .unwrap()
            .messages()
            .iter()
            .map(|msg| msg.content().to_owned())
            .collect();
        assert_eq!(contents, ["first", "reply", "second"]);
    }

    fn lock_count(store: &MessageStore) -> usize {
        store.locks.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_idle_locks_are_released() {
        let store = MessageStore::new(Arc::new(MemoryCheckpointer::new()));
        for i in 0..8 {
            store
                .append(&format!("thread-{i}"), Message::user("hi"))
                .await
                .unwrap();
        }
        assert_eq!(lock_count(&store), 0);

        let guard = store.lock("1").await.unwrap();
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.append("1", Message::user("queued")).await }
        });
        tokio::task::yield_now().await;
        // The waiting writer keeps the entry alive.
        drop(guard);
        assert_eq!(lock_count(&store), 1);

        pending.await.unwrap().unwrap();
        assert_eq!(lock_count(&store), 0);
        assert_eq!(store.load("1").await.unwrap().len(), 1);
    }

    struct BrokenCheckpointer;

    #[async_trait]
    impl Checkpointer for BrokenCheckpointer {
        async fn save(
            &self,
            _thread_id: &str,
            _messages: &[Message],
        ) -> Result<(), CheckpointError> {
            Err(CheckpointError::Io(std::io::Error::other("disk full")))
        }

        async fn load(
            &self,
            _thread_id: &str,
        ) -> Result<Option<Vec<Message>>, CheckpointError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_failed_save_leaves_working_copy() {
        let store = MessageStore::new(Arc::new(BrokenCheckpointer));
        let mut guard = store.lock("1").await.unwrap();
        assert!(guard.append(Message::user("lost")).await.is_err());
        assert!(guard.thread().is_empty());
    }
}
