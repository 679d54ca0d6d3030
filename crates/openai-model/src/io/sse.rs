use std::fmt::{self, Display};

use super::{ChunkSource, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    Chunks(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Chunks(err) => Display::fmt(err, f),
            Error::InvalidPayload => write!(f, "event is not valid UTF-8"),
        }
    }
}

/// A type for reading the data of server-sent events from a chunk stream.
///
/// Line endings are normalized first, so `\r\n`, `\r` and `\n` are all
/// accepted, even when split across chunks. Comment lines and fields other
/// than `data` are skipped, and multi-line data is joined with `\n`. An
/// unterminated event at the end of the stream is discarded.
pub struct Sse {
    buf: Vec<u8>,
    pending_cr: bool,
    eof: bool,
    source: Box<dyn ChunkSource>,
}

impl Sse {
    #[inline]
    pub fn new<S: ChunkSource + 'static>(source: S) -> Self {
        Self {
            buf: Vec::new(),
            pending_cr: false,
            eof: false,
            source: Box::new(source),
        }
    }

    /// Returns the data of the next event, or `None` once the stream ended.
    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(data) = self.try_parse_event()? {
                return Ok(Some(data));
            }
            if self.eof {
                return Ok(None);
            }
            match self.source.next_chunk().await.map_err(Error::Chunks)? {
                Some(bytes) => self.push_normalized(&bytes),
                None => self.eof = true,
            }
        }
    }

    fn push_normalized(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                b'\r' => {
                    self.buf.push(b'\n');
                    self.pending_cr = true;
                }
                // The second half of a `\r\n`.
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.buf.push(byte);
                    self.pending_cr = false;
                }
            }
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        // Events without any data line (keep-alive comments, `event:` only
        // blocks) are consumed without being returned.
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            let block =
                str::from_utf8(&block).map_err(|_| Error::InvalidPayload)?;

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (field, value) = line.split_once(':').unwrap_or((line, ""));
                if field != "data" {
                    continue;
                }
                let value = value.strip_prefix(' ').unwrap_or(value);
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }
            if data.is_some() {
                return Ok(data);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use bytes::Bytes;

    use super::*;

    fn sse_from(chunks: &[&'static [u8]]) -> Sse {
        let chunks: VecDeque<_> =
            chunks.iter().copied().map(Bytes::from_static).collect();
        Sse::new(chunks)
    }

    #[tokio::test]
    async fn test_normal_events() {
        let mut sse = sse_from(&[b"data: hello\n\n", b"data: bye\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
        // Still exhausted.
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_chunks_and_crlf() {
        let mut sse = sse_from(&[b"data:", b" hello\r", b"\n\r\n", b"data:bye\r\r"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "hello");
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "bye");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_comments_and_other_fields() {
        let mut sse = sse_from(&[
            b": keep-alive\n\n",
            b"event: message\nid: 7\ndata: first\ndata: second\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "first\nsecond");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multibyte_split() {
        let text = "data: 晴天\n\n".as_bytes();
        let (head, tail) = text.split_at(8);
        let mut sse = Sse::new(VecDeque::from([
            Bytes::copy_from_slice(head),
            Bytes::copy_from_slice(tail),
        ]));
        assert_eq!(sse.next_event().await.unwrap().unwrap(), "晴天");
    }

    #[tokio::test]
    async fn test_incomplete_and_invalid_data() {
        let mut sse = sse_from(&[b"data: hello\n", b"data: bye\n"]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(&[b"data: \xff\xfe\n\n"]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }
}
