//! Byte streams shared by the cipher and storage layers.
//!
//! A [`ByteStream`] is a single-consumer resource: handing it to a function
//! moves it, so the caller cannot read from it afterwards.

use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use std::pin::Pin;

use crate::Result;

/// Byte stream type for upload, download and cipher transforms.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Build a stream that yields `data` in pieces of at most `piece` bytes.
pub fn bytes_stream(data: impl Into<Bytes>, piece: usize) -> ByteStream {
    let data = data.into();
    let piece = piece.max(1);
    let mut pieces = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + piece).min(data.len());
        pieces.push(Ok(data.slice(offset..end)));
        offset = end;
    }
    Box::pin(stream::iter(pieces))
}

/// Drain a stream into memory. Intended for small payloads and tests.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Pulls fixed-size pieces out of a stream whose items have arbitrary sizes.
///
/// At most one upstream item beyond the requested size is buffered.
pub struct ChunkReader {
    inner: ByteStream,
    buffer: BytesMut,
    exhausted: bool,
}

impl ChunkReader {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            exhausted: false,
        }
    }

    /// Read up to `limit` bytes.
    ///
    /// Returns fewer than `limit` bytes only once the upstream stream has
    /// ended; an empty result means end of stream.
    pub async fn read_up_to(&mut self, limit: usize) -> Result<Bytes> {
        while self.buffer.len() < limit && !self.exhausted {
            match self.inner.next().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk?),
                None => self.exhausted = true,
            }
        }
        let take = limit.min(self.buffer.len());
        Ok(self.buffer.split_to(take).freeze())
    }

    /// Whether the upstream stream has ended and nothing is buffered.
    pub fn is_finished(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }
}
