use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use parley_model::{ModelMessage, ModelTool, ToolCallRequest, ToolCallResult};
use tokio::time::timeout;
use tracing::Instrument;

use crate::tool::object::{ToolObject, ToolObjectImpl};
use crate::tool::{Error, Tool, ToolResult};

/// The registry of tools offered to the model, and the executor of the tool
/// calls it requests.
///
/// Tools are looked up by name at dispatch time. A request naming a tool that
/// is not registered, a tool that fails, and a tool that runs out of time all
/// produce an error-bearing tool result instead of an `Err`, so the model can
/// react to the failure.
#[derive(Default)]
pub struct Dispatcher {
    tools: BTreeMap<String, Box<dyn ToolObject>>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Registers a tool. A tool registered earlier under the same name is
    /// replaced.
    pub fn register<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self
            .tools
            .insert(name.clone(), Box::new(ToolObjectImpl(tool)))
            .is_some()
        {
            warn!("tool `{name}` registered twice, keeping the latest");
        }
    }

    /// Limits how long a single tool call may run.
    #[inline]
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Returns `true` if a tool with this name is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the definitions of all registered tools, sorted by name.
    #[inline]
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Runs the requested tool calls and returns one tool message per
    /// request, in the same order as `requests`.
    ///
    /// The calls of one batch run concurrently. The order of the results
    /// doesn't depend on which call finishes first.
    pub async fn invoke(&self, requests: &[ToolCallRequest]) -> Vec<ModelMessage> {
        let span = debug_span!("tool dispatcher", count = requests.len());
        join_all(requests.iter().map(|req| self.invoke_one(req)))
            .instrument(span)
            .await
    }

    async fn invoke_one(&self, req: &ToolCallRequest) -> ModelMessage {
        let result = match self.tools.get(&req.name) {
            Some(tool) => {
                trace!(
                    "running tool {} ({}) with args: {:?}",
                    req.name, req.id, req.arguments
                );
                let fut = tool.execute(req.arguments.clone());
                match self.timeout {
                    Some(limit) => match timeout(limit, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::timeout().with_reason(format!(
                            "`{}` did not finish within {limit:?}",
                            req.name
                        ))),
                    },
                    None => fut.await,
                }
            }
            None => {
                warn!("tool not found: {}", req.name);
                Err(Error::unknown_tool(&req.name))
            }
        };
        if let Err(err) = &result {
            debug!("tool call {} failed: {err}", req.id);
        }
        ModelMessage::Tool(make_result(req.id.clone(), result))
    }
}

fn make_result(id: String, result: ToolResult) -> ToolCallResult {
    match result {
        Ok(content) => ToolCallResult {
            id,
            content,
            is_error: false,
        },
        Err(err) => ToolCallResult {
            id,
            content: format!("Error: {err}\nPlease fix your mistakes."),
            is_error: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::{Value, json};
    use tokio::time::sleep;

    use super::*;
    use crate::tool::ErrorKind;

    static EMPTY_SCHEMA: &Value = &Value::Null;

    #[derive(Deserialize)]
    struct EchoInput {
        text: String,
        #[serde(default)]
        delay_ms: u64,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the text back"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async move {
                sleep(Duration::from_millis(input.delay_ms)).await;
                Ok(input.text)
            }
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        type Input = Value;

        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn parameter_schema(&self) -> &Value {
            EMPTY_SCHEMA
        }

        fn execute(
            &self,
            _input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            std::future::ready(Err(
                Error::execution_error().with_reason("upstream is down")
            ))
        }
    }

    fn request(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments,
        }
    }

    fn results(messages: &[ModelMessage]) -> Vec<&ToolCallResult> {
        messages.iter().filter_map(|msg| msg.tool_result()).collect()
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EchoTool);

        // The first call finishes last.
        let requests = vec![
            request("c1", "echo", json!({ "text": "slow", "delay_ms": 30 })),
            request("c2", "echo", json!({ "text": "fast" })),
            request("c3", "echo", json!({ "text": "medium", "delay_ms": 10 })),
        ];
        let messages = dispatcher.invoke(&requests).await;
        let results = results(&messages);

        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        let contents: Vec<_> =
            results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["slow", "fast", "medium"]);
        assert!(results.iter().all(|r| !r.is_error));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_result() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EchoTool);

        let requests = vec![
            request("c1", "weather", json!({})),
            request("c2", "echo", json!({ "text": "still runs" })),
        ];
        let messages = dispatcher.invoke(&requests).await;
        let results = results(&messages);

        assert_eq!(results.len(), 2);
        assert!(results[0].is_error);
        assert_eq!(results[0].id, "c1");
        assert!(results[0].content.contains("`weather` is not a valid tool"));
        assert!(!results[1].is_error);
        assert_eq!(results[1].content, "still runs");
    }

    #[tokio::test]
    async fn test_failures_are_captured() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EchoTool);
        dispatcher.register(FailingTool);

        let requests = vec![
            request("c1", "fail", json!({})),
            request("c2", "echo", json!({ "wrong": 1 })),
        ];
        let messages = dispatcher.invoke(&requests).await;
        let results = results(&messages);

        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Error: Execution error"));
        assert!(results[0].content.contains("upstream is down"));
        assert!(results[1].is_error);
        assert!(results[1].content.starts_with("Error: Invalid input"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(EchoTool);
        dispatcher.set_timeout(Some(Duration::from_millis(5)));

        let requests =
            vec![request("c1", "echo", json!({ "text": "x", "delay_ms": 500 }))];
        let messages = dispatcher.invoke(&requests).await;
        let result = messages[0].tool_result().unwrap();
        assert!(result.is_error);
        assert!(result.content.starts_with("Error: Timed out"));
    }

    #[test]
    fn test_definitions() {
        let mut dispatcher = Dispatcher::default();
        dispatcher.register(FailingTool);
        dispatcher.register(EchoTool);
        dispatcher.register(EchoTool);

        let names: Vec<_> = dispatcher
            .definitions()
            .into_iter()
            .map(|def| def.name)
            .collect();
        assert_eq!(names, ["echo", "fail"]);
        assert!(dispatcher.contains("echo"));
        assert!(!dispatcher.contains("search"));
        assert_eq!(Error::unknown_tool("x").kind(), ErrorKind::UnknownTool);
    }
}
