use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::future::ready;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::Response;

/// The body stream failed before it was complete.
#[derive(Debug, PartialEq, Eq)]
pub struct Error(String);

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "body stream failed: {}", self.0)
    }
}

type NextChunk<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Bytes>, Error>> + Send + 'a>>;

/// A source of response body chunks.
pub trait ChunkSource: Send {
    /// Returns the next chunk, or `None` once the body is exhausted.
    fn next_chunk(&mut self) -> NextChunk<'_>;
}

impl ChunkSource for Response {
    fn next_chunk(&mut self) -> NextChunk<'_> {
        Box::pin(async move {
            self.chunk().await.map_err(|err| Error(err.to_string()))
        })
    }
}

/// Prerecorded chunks, handed out in order.
impl ChunkSource for VecDeque<Bytes> {
    fn next_chunk(&mut self) -> NextChunk<'_> {
        Box::pin(ready(Ok(self.pop_front())))
    }
}
