//! An abstraction layer for chat models.
//!
//! This crate establishes a unified protocol for the agent loop to talk to
//! the supported model providers, so that the loop can switch between them
//! without modifying the core codebase.
//!
//! It also defines [`ModelMessage`], the unit of conversation history. The
//! same type is sent to the providers and persisted by the checkpointers,
//! which is why every message type here is serializable.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod message;
mod provider;
mod request;
mod response;

pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
