//! Command line and environment configuration of the `parley` binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_core::{Checkpointer, FileCheckpointer, MemoryCheckpointer};
use parley_openai_model::{DEFAULT_BASE_URL, OpenAIConfig, OpenAIConfigBuilder};

use crate::session::DEFAULT_THREAD_ID;
use crate::tools::SearchTool;

/// Chat with an assistant that can search the web.
///
/// Every flag can also be set through its environment variable, or a `.env`
/// file in the working directory.
#[derive(Parser)]
#[command(name = "parley", version)]
pub struct Args {
    /// The conversation thread to continue.
    #[arg(long, env = "PARLEY_THREAD_ID", default_value = DEFAULT_THREAD_ID)]
    pub thread_id: String,

    /// Where threads are persisted.
    #[arg(long, env = "PARLEY_STORE_DIR", default_value = ".parley/threads")]
    pub store_dir: PathBuf,

    /// Keep threads in memory only, forgetting them on exit.
    #[arg(long)]
    pub in_memory: bool,

    /// Print every step of a turn, including tool calls and their results.
    #[arg(long)]
    pub stream: bool,

    /// The maximum number of tool rounds one message may trigger.
    #[arg(long, env = "PARLEY_MAX_ROUNDS", default_value_t = 10)]
    pub max_rounds: usize,

    /// Time limit of one model call, in seconds.
    #[arg(long, default_value_t = 120)]
    pub model_timeout_secs: u64,

    /// Time limit of one tool call, in seconds.
    #[arg(long, default_value_t = 60)]
    pub tool_timeout_secs: u64,

    /// Instructions given to the model ahead of every conversation.
    #[arg(long, env = "PARLEY_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// The model to chat with.
    #[arg(long, env = "OPENAI_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    search_api_key: Option<String>,

    /// The maximum number of results one search returns.
    #[arg(long, default_value_t = SearchTool::DEFAULT_MAX_RESULTS)]
    pub search_max_results: usize,
}

impl Args {
    /// Returns the provider configuration.
    pub fn openai_config(&self) -> OpenAIConfig {
        let mut builder = OpenAIConfigBuilder::with_api_key(&self.api_key)
            .with_base_url(&self.base_url);
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        builder.build()
    }

    /// Returns the search tool, or `None` if no search API key is set.
    pub fn search_tool(&self) -> Option<SearchTool> {
        let api_key = self.search_api_key.as_deref()?;
        Some(SearchTool::new(api_key).with_max_results(self.search_max_results))
    }

    /// Returns where threads are persisted.
    pub fn checkpointer(&self) -> Arc<dyn Checkpointer> {
        if self.in_memory {
            Arc::new(MemoryCheckpointer::new())
        } else {
            Arc::new(FileCheckpointer::new(&self.store_dir))
        }
    }

    /// Returns the time limit of one model call.
    #[inline]
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    /// Returns the time limit of one tool call.
    #[inline]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Loads environment variables from a `.env` file in the working directory,
/// if there is one.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("loaded environment from {}", path.display()),
        Err(dotenvy::Error::Io(err))
            if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to load .env file: {err}"),
    }
}
