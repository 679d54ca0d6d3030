use std::sync::Arc;
use std::time::Duration;

use parley_core::tool::Tool;
use parley_core::{
    Agent, AgentBuilder, CheckpointError, Checkpointer, Message, Thread,
    TurnError, TurnOutcome,
};
use parley_model::ModelProvider;

/// The thread a session talks in when none is chosen.
pub const DEFAULT_THREAD_ID: &str = "1";

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    thread_id: String,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            agent_builder: AgentBuilder::with_model_provider(provider),
            thread_id: DEFAULT_THREAD_ID.to_owned(),
        }
    }

    /// Sets the thread this session continues.
    #[inline]
    pub fn with_thread_id<S: Into<String>>(mut self, thread_id: S) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Sets where the thread is persisted.
    #[inline]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.agent_builder = self.agent_builder.with_checkpointer(checkpointer);
        self
    }

    /// Sets the system prompt for the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.agent_builder = self.agent_builder.with_system_prompt(prompt);
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.agent_builder = self.agent_builder.with_tool(tool);
        self
    }

    /// Sets how many tool rounds one message may trigger.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.agent_builder = self.agent_builder.with_max_rounds(max_rounds);
        self
    }

    /// Sets the time limits of model calls and tool calls.
    #[inline]
    pub fn with_timeouts(mut self, model: Duration, tool: Duration) -> Self {
        self.agent_builder = self
            .agent_builder
            .with_model_timeout(model)
            .with_tool_timeout(Some(tool));
        self
    }

    /// Attaches a callback invoked with every message persisted in the
    /// session's thread, as soon as it is persisted.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self
            .agent_builder
            .on_message(move |_thread_id, msg| on_message(msg));
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        Session {
            agent: self.agent_builder.build(),
            thread_id: self.thread_id,
        }
    }
}

/// A chat session: one conversation thread and the agent answering in it.
pub struct Session {
    agent: Agent,
    thread_id: String,
}

impl Session {
    /// Returns the id of the session's thread.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Sends a message and waits for the final answer.
    #[inline]
    pub async fn send_message(&self, message: &str) -> Result<TurnOutcome, TurnError> {
        self.agent.run_turn(&self.thread_id, message).await
    }

    /// Finishes a turn that was interrupted, in this process or an earlier
    /// one. Returns `None` when the thread has nothing left to answer.
    #[inline]
    pub async fn resume(&self) -> Result<Option<TurnOutcome>, TurnError> {
        self.agent.resume_turn(&self.thread_id).await
    }

    /// Returns the persisted messages of the session's thread.
    #[inline]
    pub async fn history(&self) -> Result<Thread, CheckpointError> {
        self.agent.history(&self.thread_id).await
    }
}
