use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry_notify;
use parley_model::{
    AssistantMessage, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent,
};
use tracing::Instrument;

/// Progress of an assistant message while it is being generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamDelta<'a> {
    /// The next piece of text.
    Text(&'a str),
    /// The attempt broke off and the request is being sent again. Text
    /// received since the last restart will not be part of the message.
    Restarted,
}

/// Receives the progress of an assistant message as it is generated.
pub(crate) type DeltaFn = Arc<dyn Fn(StreamDelta<'_>) + Send + Sync>;

type SendRequestResult = Result<AssistantMessage, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<DeltaFn>) -> BoxedSendRequestFuture
        + Send + Sync
>;

/// How failed model requests are retried.
///
/// Only errors whose [`kind`](parley_model::ErrorKind) is transient are
/// retried, with exponentially growing pauses in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The pause before the first retry.
    pub initial_interval: Duration,
    /// The longest pause between two attempts.
    pub max_interval: Duration,
    /// Retrying stops once this much time has passed since the first
    /// attempt. `None` retries transient errors forever.
    pub max_elapsed_time: Option<Duration>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn never() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(1),
            max_elapsed_time: Some(Duration::ZERO),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            max_elapsed_time: Some(Duration::from_secs(30)),
        }
    }
}

/// A wrapper around a model provider that erases its type and folds the
/// streamed response into a single assistant message.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
    retry_policy: RetryPolicy,
}

impl ModelClient {
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        retry_policy: RetryPolicy,
    ) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req, on_delta| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("sending {} messages", req.messages.len());
                    let resp = fut.await.map_err(|err| {
                        Box::new(err) as Box<dyn ModelProviderError>
                    })?;
                    receive_response(resp, on_delta).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            retry_policy,
        }
    }

    #[inline]
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Sends a request, retrying transient failures, and returns the
    /// complete assistant message.
    ///
    /// Text of an attempt that fails midway has already been delivered to
    /// `on_delta` when the request is retried, so a retry is announced with
    /// [`StreamDelta::Restarted`].
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_delta: Option<DeltaFn>,
    ) -> SendRequestResult {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_policy.initial_interval)
            .with_max_interval(self.retry_policy.max_interval)
            .with_max_elapsed_time(self.retry_policy.max_elapsed_time)
            .build();

        retry_notify(
            backoff,
            || {
                let fut = (self.handler_fn)(req.clone(), on_delta.clone());
                async move {
                    fut.await.map_err(|err| {
                        if err.kind().is_transient() {
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        }
                    })
                }
            },
            |err: Box<dyn ModelProviderError>, after: Duration| {
                warn!("model request failed ({err}), retrying in {after:?}");
                if let Some(on_delta) = &on_delta {
                    on_delta(StreamDelta::Restarted);
                }
            },
        )
        .await
    }
}

async fn receive_response<R: ModelResponse>(
    resp: R,
    on_delta: Option<DeltaFn>,
) -> SendRequestResult {
    let mut message = AssistantMessage::default();
    let mut finish_reason = None;

    let mut resp = pin!(resp);
    loop {
        let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .map_err(|err| {
                error!("response interrupted: {err}");
                Box::new(err) as Box<dyn ModelProviderError>
            })?;
        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                if let Some(on_delta) = &on_delta {
                    on_delta(StreamDelta::Text(&delta));
                }
                message.content.push_str(&delta);
            }
            ModelResponseEvent::ToolCall(req) => message.tool_calls.push(req),
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!(
        "response finished ({finish_reason:?}), {} tool calls",
        message.tool_calls.len()
    );
    Ok(message)
}
