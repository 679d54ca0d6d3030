use parley_core::tool::{Error as ToolError, Tool, ToolResult};
use reqwest::Client;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The Tavily search endpoint.
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.tavily.com/search";

/// Input of [`SearchTool`].
#[derive(Deserialize, JsonSchema)]
pub struct SearchToolParameters {
    #[schemars(description = "What to search the web for.")]
    query: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    url: String,
    #[serde(default)]
    content: String,
}

/// One search hit, as reported to the model.
#[derive(Debug, PartialEq, Eq, Serialize)]
struct SearchHit<'a> {
    url: &'a str,
    content: &'a str,
}

/// A tool for searching the web through a Tavily-compatible API.
pub struct SearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
    parameter_schema: Value,
}

impl SearchTool {
    /// The number of results returned when not configured otherwise.
    pub const DEFAULT_MAX_RESULTS: usize = 2;

    /// Creates a search tool authenticating with `api_key`.
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_owned(),
            max_results: Self::DEFAULT_MAX_RESULTS,
            parameter_schema: schema_for!(SearchToolParameters).to_value(),
        }
    }

    /// Sends the searches to another endpoint speaking the same protocol.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets how many results a search returns at most.
    #[inline]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

impl Tool for SearchTool {
    type Input = SearchToolParameters;

    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Searches the web. Use it for current events and facts you are not \
         sure about. Returns a JSON list of results with their URL and content."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: SearchToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let query = input.query.trim().to_owned();
        let max_results = self.max_results;
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "query": query,
                "max_results": max_results,
            }));

        async move {
            if query.is_empty() {
                return Err(ToolError::invalid_input()
                    .with_reason("the query cannot be empty"));
            }
            debug!("searching for {query:?}");

            let resp = request.send().await.map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ToolError::execution_error().with_reason(format!(
                    "the search service answered with {status}"
                )));
            }
            let resp: SearchResponse = resp.json().await.map_err(|err| {
                ToolError::execution_error().with_reason(err.to_string())
            })?;
            format_results(&resp, max_results)
        }
    }
}

fn format_results(resp: &SearchResponse, max_results: usize) -> ToolResult {
    let hits: Vec<_> = resp
        .results
        .iter()
        .take(max_results)
        .map(|result| SearchHit {
            url: &result.url,
            content: &result.content,
        })
        .collect();
    serde_json::to_string(&hits)
        .map_err(|err| ToolError::execution_error().with_reason(err.to_string()))
}
