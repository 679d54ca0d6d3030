//! Conversation threads.

pub use parley_model::{ModelMessage as Message, Role};

/// A named conversation: the messages of a thread in the order they were
/// appended.
///
/// The order is meaningful, it is the order the history is replayed to the
/// model. Messages can only be appended, never reordered or removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Thread {
    thread_id: String,
    messages: Vec<Message>,
}

impl Thread {
    pub(crate) fn with_messages(thread_id: &str, messages: Vec<Message>) -> Self {
        Self {
            thread_id: thread_id.to_owned(),
            messages,
        }
    }

    /// Returns the id of this thread.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns the messages, oldest first.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the most recent message.
    #[inline]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing has been said in this thread yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}
