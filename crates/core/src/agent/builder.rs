use std::sync::Arc;
use std::time::Duration;

use parley_model::ModelProvider;

use super::{Agent, AgentInner, MessageFn};
use crate::checkpoint::{Checkpointer, MemoryCheckpointer};
use crate::model_client::{DeltaFn, ModelClient, RetryPolicy, StreamDelta};
use crate::store::MessageStore;
use crate::thread::Message;
use crate::tool::{Dispatcher, Tool};

/// [`Agent`] builder.
pub struct AgentBuilder {
    model_client: ModelClient,
    dispatcher: Dispatcher,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    system_prompt: Option<String>,
    max_rounds: usize,
    model_timeout: Duration,
    tool_timeout: Option<Duration>,
    on_message: Option<MessageFn>,
    on_delta: Option<DeltaFn>,
}

impl AgentBuilder {
    /// The default number of tool rounds allowed in one turn.
    pub const DEFAULT_MAX_ROUNDS: usize = 10;
    /// The default limit for one model call, retries included.
    pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);
    /// The default limit for one tool call.
    pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider, RetryPolicy::default()),
            dispatcher: Dispatcher::default(),
            checkpointer: None,
            system_prompt: None,
            max_rounds: Self::DEFAULT_MAX_ROUNDS,
            model_timeout: Self::DEFAULT_MODEL_TIMEOUT,
            tool_timeout: Some(Self::DEFAULT_TOOL_TIMEOUT),
            on_message: None,
            on_delta: None,
        }
    }

    /// Sets where threads are persisted. Threads are kept in memory if no
    /// checkpointer is given.
    #[inline]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.dispatcher.register(tool);
        self
    }

    /// Sets a system prompt, sent ahead of the history in every model
    /// request. It is not stored in threads.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets how many tool rounds a turn may run before it is stopped.
    #[inline]
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Sets the time limit of one model call, retries included.
    #[inline]
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Sets the time limit of one tool call. `None` lets tools run for as
    /// long as they need.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Sets how failed model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.model_client.set_retry_policy(policy);
        self
    }

    /// Attaches a callback invoked with the thread id and the message each
    /// time a message has been persisted.
    #[inline]
    pub fn on_message(
        mut self,
        on_message: impl Fn(&str, &Message) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(on_message));
        self
    }

    /// Attaches a callback invoked with each piece of assistant text as the
    /// model generates it, and whenever a broken-off request is retried.
    #[inline]
    pub fn on_delta(
        mut self,
        on_delta: impl Fn(StreamDelta<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_delta = Some(Arc::new(on_delta));
        self
    }

    /// Builds the agent.
    pub fn build(self) -> Agent {
        let Self {
            model_client,
            mut dispatcher,
            checkpointer,
            system_prompt,
            max_rounds,
            model_timeout,
            tool_timeout,
            on_message,
            on_delta,
        } = self;

        dispatcher.set_timeout(tool_timeout);
        let checkpointer: Arc<dyn Checkpointer> = match checkpointer {
            Some(checkpointer) => checkpointer,
            None => Arc::new(MemoryCheckpointer::new()),
        };

        Agent {
            inner: Arc::new(AgentInner {
                model_client,
                dispatcher,
                store: MessageStore::new(checkpointer),
                system_prompt,
                max_rounds,
                model_timeout,
                on_message,
                on_delta,
            }),
        }
    }
}
