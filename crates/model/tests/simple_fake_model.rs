use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use parley_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    Role, ToolCallRequest,
};
use serde_json::json;
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Streams a canned reply word by word. Questions ending with `?` are
/// answered with a `search` tool call instead, unless the last message is
/// already a tool result.
#[derive(Debug)]
struct FakeModelResponse {
    fake_events: VecDeque<ModelResponseEvent>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeModelResponse {
    fn new(last: &ModelMessage) -> Self {
        let mut fake_events: VecDeque<_> = match last {
            ModelMessage::User(text) if text.ends_with('?') => {
                VecDeque::from([ModelResponseEvent::ToolCall(ToolCallRequest {
                    id: "c1".to_owned(),
                    name: "search".to_owned(),
                    arguments: json!({ "query": text }),
                })])
            }
            _ => {
                let reply = format!("You said {}", last.content());
                let words: Vec<_> = reply.split(' ').collect();
                words
                    .iter()
                    .enumerate()
                    .map(|(idx, word)| {
                        let mut word = (*word).to_owned();
                        if idx + 1 < words.len() {
                            word.push(' ');
                        }
                        ModelResponseEvent::MessageDelta(word)
                    })
                    .collect()
            }
        };
        let reason = if matches!(
            fake_events.front(),
            Some(ModelResponseEvent::ToolCall(_))
        ) {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        };
        fake_events.push_back(ModelResponseEvent::Completed(reason));
        Self {
            fake_events,
            sleep: None,
        }
    }
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.fake_events.pop_front()));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_event(cx)
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = match req.messages.last() {
            Some(last) => Ok(FakeModelResponse::new(last)),
            None => Err(FakeModelProviderError(ErrorKind::Other)),
        };
        ready(result)
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    async fn collect(
        mut resp: FakeModelResponse,
    ) -> (String, Vec<ToolCallRequest>, Option<ModelFinishReason>) {
        let mut text = String::new();
        let mut tool_calls = vec![];
        let mut finish_reason = None;
        loop {
            let resp_fut =
                poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx));
            match resp_fut.await {
                Ok(Some(ModelResponseEvent::MessageDelta(delta))) => {
                    text.push_str(&delta);
                }
                Ok(Some(ModelResponseEvent::ToolCall(req))) => {
                    tool_calls.push(req);
                }
                Ok(Some(ModelResponseEvent::Completed(reason))) => {
                    finish_reason = Some(reason);
                }
                Ok(None) => break,
                Err(err) => unreachable!("unexpected error: {err:?}"),
            }
        }
        (text, tool_calls, finish_reason)
    }

    #[tokio::test]
    async fn test_completion() {
        let provider = FakeModelProvider;
        let req = ModelRequest {
            messages: vec![ModelMessage::user("Good morning")],
            tools: vec![],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (text, tool_calls, reason) = collect(resp).await;

        assert_eq!(text, "You said Good morning");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, Some(ModelFinishReason::Stop));
    }

    #[tokio::test]
    async fn test_tool_call() {
        let provider = FakeModelProvider;
        let req = ModelRequest {
            messages: vec![ModelMessage::user("What's the weather in Paris?")],
            tools: vec![],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (text, tool_calls, reason) = collect(resp).await;

        assert!(text.is_empty());
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "search");
        assert_eq!(reason, Some(ModelFinishReason::ToolCalls));
        assert_eq!(req.messages[0].role(), Role::User);
    }

    #[tokio::test]
    async fn test_error() {
        let provider = FakeModelProvider;
        let req = ModelRequest {
            messages: vec![],
            tools: vec![],
        };
        let result = provider.send_request(&req).await;
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.kind().is_transient());
    }
}
