mod chunks;
mod sse;

pub use chunks::{ChunkSource, Error as ChunksError};
pub use sse::Sse;
