mod builder;
mod error;
mod state;

use std::sync::Arc;
use std::time::Duration;

use parley_model::{AssistantMessage, ModelRequest, ToolCallRequest};
use tokio::time::timeout;
use tracing::Instrument;

pub use builder::AgentBuilder;
pub use error::TurnError;
pub use state::LoopState;

use crate::checkpoint::CheckpointError;
use crate::model_client::{DeltaFn, ModelClient};
use crate::store::{MessageStore, ThreadGuard};
use crate::thread::{Message, Thread};
use crate::tool::Dispatcher;

type MessageFn = Arc<dyn Fn(&str, &Message) + Send + Sync>;

/// The result of a completed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The content of the final assistant message.
    pub answer: String,
    /// The number of tool dispatch rounds the turn went through.
    pub rounds: usize,
    /// Every message this turn appended to the thread, in order.
    pub appended: Vec<Message>,
}

/// An agent, which runs conversation turns against a model and its tools.
///
/// A turn appends the user input to a thread, then alternates between asking
/// the model and running the tools it requests, until the model answers
/// without requesting any tool. Every message is persisted as soon as it is
/// produced.
///
/// The agent is cheap to clone. Turns on different threads may run
/// concurrently, turns on the same thread wait for each other.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    model_client: ModelClient,
    dispatcher: Dispatcher,
    store: MessageStore,
    system_prompt: Option<String>,
    max_rounds: usize,
    model_timeout: Duration,
    on_message: Option<MessageFn>,
    on_delta: Option<DeltaFn>,
}

impl Agent {
    /// Runs a turn for `input` on the thread `thread_id`.
    ///
    /// Tool calls left unanswered by an interrupted turn are settled first,
    /// so the model never sees a request without its result.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future abandons the turn. Messages persisted so far stay
    /// in the thread, and [`Agent::resume_turn`] picks up from there.
    pub async fn run_turn<S: Into<String>>(
        &self,
        thread_id: &str,
        input: S,
    ) -> Result<TurnOutcome, TurnError> {
        let span = debug_span!("turn", thread_id);
        async {
            let mut guard = self.inner.store.lock(thread_id).await?;
            let start = guard.thread().len();

            if let Some(LoopState::DispatchingTools(pending)) =
                LoopState::derive(guard.thread().messages())
            {
                debug!("settling {} tool calls of an earlier turn", pending.len());
                self.dispatch(&mut guard, &pending).await?;
            }

            self.append(&mut guard, Message::user(input)).await?;
            self.drive(guard, LoopState::AwaitingModel, start).await
        }
        .instrument(span)
        .await
    }

    /// Continues the turn that was interrupted on `thread_id`.
    ///
    /// Returns `None` if there is nothing to continue: the thread is empty or
    /// ends with a final answer. Only the tool calls that have no result yet
    /// are dispatched, so no message is duplicated.
    pub async fn resume_turn(
        &self,
        thread_id: &str,
    ) -> Result<Option<TurnOutcome>, TurnError> {
        let span = debug_span!("resume", thread_id);
        async {
            let guard = self.inner.store.lock(thread_id).await?;
            let state = match LoopState::derive(guard.thread().messages()) {
                None | Some(LoopState::Done(_)) => return Ok(None),
                Some(state) => state,
            };
            info!("resuming turn at {state:?}");
            let start = guard.thread().len();
            self.drive(guard, state, start).await.map(Some)
        }
        .instrument(span)
        .await
    }

    /// Returns the persisted messages of `thread_id`.
    #[inline]
    pub async fn history(&self, thread_id: &str) -> Result<Thread, CheckpointError> {
        self.inner.store.load(thread_id).await
    }

    async fn drive(
        &self,
        mut guard: ThreadGuard,
        mut state: LoopState,
        start: usize,
    ) -> Result<TurnOutcome, TurnError> {
        let max_rounds = self.inner.max_rounds;
        let mut rounds = 0;
        loop {
            trace!("loop state: {state:?}");
            state = match state {
                LoopState::AwaitingModel => {
                    let message = self.call_model(guard.thread()).await?;
                    let next = if message.tool_calls.is_empty() {
                        LoopState::Done(message.content.clone())
                    } else {
                        LoopState::DispatchingTools(message.tool_calls.clone())
                    };
                    self.append(&mut guard, Message::Assistant(message)).await?;
                    next
                }
                LoopState::DispatchingTools(_) if rounds >= max_rounds => {
                    warn!("round limit ({max_rounds}) reached");
                    return Err(TurnError::LoopLimitExceeded { limit: max_rounds });
                }
                LoopState::DispatchingTools(requests) => {
                    rounds += 1;
                    self.dispatch(&mut guard, &requests).await?;
                    LoopState::AwaitingModel
                }
                LoopState::Done(answer) => {
                    return Ok(TurnOutcome {
                        answer,
                        rounds,
                        appended: guard.thread().messages()[start..].to_vec(),
                    });
                }
            };
        }
    }

    async fn call_model(
        &self,
        thread: &Thread,
    ) -> Result<AssistantMessage, TurnError> {
        let inner = &*self.inner;
        let mut messages = Vec::with_capacity(thread.len() + 1);
        if let Some(prompt) = &inner.system_prompt {
            messages.push(Message::System(prompt.clone()));
        }
        messages.extend_from_slice(thread.messages());
        let req = ModelRequest {
            messages,
            tools: inner.dispatcher.definitions(),
        };

        let fut = inner.model_client.send_request(req, inner.on_delta.clone());
        match timeout(inner.model_timeout, fut).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(err)) => Err(TurnError::ModelUnavailable {
                kind: err.kind(),
                message: err.to_string(),
            }),
            Err(_) => Err(TurnError::ModelTimeout(inner.model_timeout)),
        }
    }

    async fn dispatch(
        &self,
        guard: &mut ThreadGuard,
        requests: &[ToolCallRequest],
    ) -> Result<(), TurnError> {
        for result in self.inner.dispatcher.invoke(requests).await {
            self.append(guard, result).await?;
        }
        Ok(())
    }

    async fn append(
        &self,
        guard: &mut ThreadGuard,
        message: Message,
    ) -> Result<(), TurnError> {
        guard.append(message).await?;
        if let (Some(on_message), Some(message)) =
            (&self.inner.on_message, guard.thread().last())
        {
            on_message(guard.thread().thread_id(), message);
        }
        Ok(())
    }
}
