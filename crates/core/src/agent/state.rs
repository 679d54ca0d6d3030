use std::collections::HashSet;

use parley_model::ToolCallRequest;

use crate::thread::Message;

/// Where a turn stands, derived from the messages of its thread.
///
/// The state is never stored. Every message a turn produces is persisted
/// before the next state is entered, so the state of an interrupted turn can
/// always be recovered from the thread with [`LoopState::derive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// The model has to be asked for the next assistant message.
    AwaitingModel,
    /// The latest assistant message requested these tool calls, and their
    /// results are not in the thread yet.
    DispatchingTools(Vec<ToolCallRequest>),
    /// The turn is over, holding the content of the final assistant message.
    Done(String),
}

impl LoopState {
    /// Derives the state from the messages of a thread, or `None` for an
    /// empty thread.
    ///
    /// When an assistant message is followed by results for only some of its
    /// requests, the state is [`LoopState::DispatchingTools`] with only the
    /// unanswered requests, in the order the model emitted them.
    pub fn derive(messages: &[Message]) -> Option<Self> {
        let state = match messages.last()? {
            Message::System(_) | Message::User(_) => LoopState::AwaitingModel,
            Message::Assistant(msg) if msg.tool_calls.is_empty() => {
                LoopState::Done(msg.content.clone())
            }
            Message::Assistant(msg) => {
                LoopState::DispatchingTools(msg.tool_calls.clone())
            }
            Message::Tool(_) => {
                let answered: HashSet<_> = messages
                    .iter()
                    .rev()
                    .map_while(|msg| msg.tool_result())
                    .map(|result| result.id.as_str())
                    .collect();
                let pending: Vec<_> = messages
                    .iter()
                    .rev()
                    .find(|msg| !matches!(msg, Message::Tool(_)))
                    .map(|msg| msg.tool_calls())
                    .unwrap_or_default()
                    .iter()
                    .filter(|req| !answered.contains(req.id.as_str()))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    LoopState::AwaitingModel
                } else {
                    LoopState::DispatchingTools(pending)
                }
            }
        };
        Some(state)
    }
}
