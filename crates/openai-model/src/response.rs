use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use parley_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use pin_project_lite::pin_project;
use serde_json::Value;

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCallDelta};

/// A tool call whose fragments are still arriving.
#[derive(Default)]
struct PartialToolCall {
    index: Option<u32>,
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn into_request(self) -> ToolCallRequest {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            // Malformed arguments are passed on as a string, so the tool
            // rejects them and the model gets to see why.
            serde_json::from_str(&self.arguments)
                .unwrap_or(Value::String(self.arguments))
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<PartialToolCall>,
    // Events that are decoded but not yet returned by `poll_next_event`.
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    fn merge_tool_call(&mut self, delta: ToolCallDelta) {
        let existing = match delta.index {
            Some(index) => self
                .tool_calls
                .iter()
                .position(|call| call.index == Some(index)),
            // Without an index, a new id starts a new call and anything else
            // continues the latest one.
            None if delta.id.is_some() => None,
            None => self.tool_calls.len().checked_sub(1),
        };
        let call = match existing {
            Some(idx) => &mut self.tool_calls[idx],
            None => {
                self.tool_calls.push(PartialToolCall {
                    index: delta.index,
                    ..Default::default()
                });
                let last = self.tool_calls.len() - 1;
                &mut self.tool_calls[last]
            }
        };

        if call.id.is_empty() {
            call.id = delta.id.unwrap_or_default();
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.arguments.push_str(&arguments);
            }
        }
    }

    /// Queues the assembled tool calls and the completion event. Tool calls
    /// are only complete once the model has finished.
    fn finish(&mut self, finish_reason: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let has_tool_calls = !self.tool_calls.is_empty();
        for call in self.tool_calls.drain(..) {
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(call.into_request()));
        }
        let reason = match finish_reason {
            Some("tool_calls") => ModelFinishReason::ToolCalls,
            None if has_tool_calls => ModelFinishReason::ToolCalls,
            _ => ModelFinishReason::Stop,
        };
        self.pending_events
            .push_back(ModelResponseEvent::Completed(reason));
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(partial_state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The state moves into a new future that pulls the next event.
        *this.next_event_fut = Some(Box::pin(next_event(partial_state)));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut state: PartialState) -> NextEvent {
    loop {
        if let Some(event) = state.pending_events.pop_front() {
            return Ok((Some(event), state));
        }
        if state.finished {
            return Ok((None, state));
        }

        let data = match state.sse.next_event().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                // Anything received so far may be cut off.
                return Err(Error::new(
                    "stream ended before the response finished",
                    ErrorKind::Other,
                ));
            }
            Err(err) => {
                return Err(Error::new(err.to_string(), ErrorKind::Other));
            }
        };
        trace!("got sse event: {data}");
        if data.trim() == "[DONE]" {
            state.finish(None);
            continue;
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(&data)
            .map_err(|err| Error::new(err.to_string(), ErrorKind::Other))?;
        if let Some(err) = chunk.error {
            return Err(Error::new(err.message, ErrorKind::Other));
        }
        if !chunk.id.is_empty()
            && state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        // Chunks without choices (usage reports) are skipped.
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                state
                    .pending_events
                    .push_back(ModelResponseEvent::MessageDelta(content));
            }
            for delta in choice.delta.tool_calls.into_iter().flatten() {
                state.merge_tool_call(delta);
            }
            match choice.finish_reason.as_deref() {
                Some("content_filter") => {
                    return Err(Error::new(
                        "response blocked by the content filter",
                        ErrorKind::Moderated,
                    ));
                }
                Some(reason) => state.finish(Some(reason)),
                None => {}
            }
        }
    }
}
