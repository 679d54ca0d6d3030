//! A chat assistant that answers in durable conversation threads and can
//! search the web on its way to an answer.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the assistant into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

#[cfg(feature = "cli")]
pub mod config;
pub mod console;
mod session;
pub mod tools;

pub use session::{DEFAULT_THREAD_ID, Session, SessionBuilder};

/// Re-exports of [`parley_core`] crate.
pub mod core {
    pub use parley_core::*;
}
