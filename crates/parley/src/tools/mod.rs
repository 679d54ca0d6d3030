//! Built-in tools that models can use.

mod search;

pub use search::{DEFAULT_SEARCH_ENDPOINT, SearchTool, SearchToolParameters};
