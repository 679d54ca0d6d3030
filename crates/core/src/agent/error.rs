use std::time::Duration;

use parley_model::ErrorKind;

use crate::checkpoint::CheckpointError;

/// Errors that end a turn early.
///
/// Every message appended before the error stays in the thread, so the turn
/// can be continued with [`Agent::resume_turn`](crate::Agent::resume_turn).
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The model provider failed, after retrying transient failures.
    #[error("model unavailable ({kind}): {message}")]
    ModelUnavailable {
        /// The kind of the last provider error.
        kind: ErrorKind,
        /// The message of the last provider error.
        message: String,
    },
    /// The model didn't answer in time.
    #[error("model did not answer within {0:?}")]
    ModelTimeout(Duration),
    /// The model kept requesting tools after the allowed number of rounds.
    #[error("model still requested tools after {limit} rounds")]
    LoopLimitExceeded {
        /// The configured round limit.
        limit: usize,
    },
    /// The thread could not be loaded or saved.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
