//! Core logic of parley: the agent loop, tool dispatch and durable
//! conversation threads.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod checkpoint;
mod model_client;
mod store;
mod thread;
pub mod tool;

pub use agent::{Agent, AgentBuilder, LoopState, TurnError, TurnOutcome};
pub use checkpoint::{CheckpointError, Checkpointer, FileCheckpointer, MemoryCheckpointer};
pub use model_client::{RetryPolicy, StreamDelta};
pub use store::{MessageStore, ThreadGuard};
pub use thread::{Message, Role, Thread};
