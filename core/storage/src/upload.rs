//! Resumable chunked upload.
//!
//! The source stream is cut into chunks of `chunk_size` bytes and sent through
//! a [`ResumableSession`]. When the provider persists only part of a chunk the
//! unacknowledged tail is carried over and sent first in the next request, so
//! the source is read exactly once and memory stays bounded by one chunk.
//!
//! The total size is only announced once the source is exhausted; until then
//! ranges read `bytes {start}-{end}/*`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use veilvault_common::{ByteStream, ChunkReader, Error, Result};

/// Chunked upload tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes per request.
    pub chunk_size: usize,
    /// Consecutive requests without any newly acknowledged byte before the
    /// upload is abandoned.
    pub max_stalled_rounds: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: 128 * 1024 * 1024,
            max_stalled_rounds: 3,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput(
                "Upload chunk size must be positive".to_string(),
            ));
        }
        if self.max_stalled_rounds == 0 {
            return Err(Error::InvalidInput(
                "max_stalled_rounds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The `Content-Range` of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Offset of the first byte in the body.
    pub start: u64,
    /// Offset of the last byte (inclusive); None for an empty body.
    pub end: Option<u64>,
    /// Total size once known.
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn len(&self) -> u64 {
        self.end.map_or(0, |end| end + 1 - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end.is_none()
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "bytes {}-{}/", self.start, end)?,
            None => write!(f, "bytes */")?,
        }
        match self.total {
            Some(total) => write!(f, "{}", total),
            None => write!(f, "*"),
        }
    }
}

/// Provider reply to one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The file is complete (HTTP 200/201).
    Complete,
    /// More data expected (HTTP 308). `persisted` counts the bytes stored
    /// so far, from offset 0.
    Incomplete { persisted: u64 },
}

/// One open upload session on the provider.
#[async_trait]
pub trait ResumableSession: Send {
    /// Send `body` described by `range`.
    async fn put_chunk(&mut self, range: &ContentRange, body: Bytes) -> Result<ChunkOutcome>;

    /// Cancel the session after a failure.
    async fn abort(&mut self) -> Result<()>;
}

/// Parse a `Range: bytes=0-N` response header into the number of persisted
/// bytes (N + 1).
pub fn parse_range_header(value: &str) -> Option<u64> {
    let range = value.trim();
    let range = range.strip_prefix("bytes=").unwrap_or(range);
    let (first, last) = range.split_once('-')?;
    if first.trim() != "0" {
        return None;
    }
    last.trim().parse::<u64>().ok().map(|last| last + 1)
}

/// Summary of a finished upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub bytes: u64,
    pub requests: u32,
}

struct ChunkedUpload<'a, S: ResumableSession + ?Sized> {
    session: &'a mut S,
    reader: ChunkReader,
    config: &'a UploadConfig,
    acknowledged: u64,
    carry: Bytes,
    source_done: bool,
    stalled: u32,
    requests: u32,
}

impl<'a, S: ResumableSession + ?Sized> ChunkedUpload<'a, S> {
    /// Next request body: carried-over bytes followed by fresh source bytes.
    async fn next_body(&mut self) -> Result<Bytes> {
        if self.source_done {
            return Ok(std::mem::take(&mut self.carry));
        }
        let want = self.config.chunk_size - self.carry.len();
        let fresh = self.reader.read_up_to(want).await?;
        if fresh.len() < want {
            self.source_done = true;
        }
        if self.carry.is_empty() {
            return Ok(fresh);
        }
        let mut body = BytesMut::with_capacity(self.carry.len() + fresh.len());
        body.extend_from_slice(&self.carry);
        body.extend_from_slice(&fresh);
        self.carry = Bytes::new();
        Ok(body.freeze())
    }

    async fn run(&mut self) -> Result<UploadReport> {
        loop {
            let body = self.next_body().await?;
            let start = self.acknowledged;
            let offered = start + body.len() as u64;
            let range = ContentRange {
                start,
                end: (!body.is_empty()).then(|| offered - 1),
                total: self.source_done.then_some(offered),
            };

            self.requests += 1;
            debug!(range = %range, request = self.requests, "Sending upload chunk");
            let outcome = self.session.put_chunk(&range, body.clone()).await?;

            match outcome {
                ChunkOutcome::Complete if self.source_done => {
                    return Ok(UploadReport {
                        bytes: offered,
                        requests: self.requests,
                    });
                }
                ChunkOutcome::Complete => {
                    return Err(Error::ProviderRequestFailed(
                        "Provider completed the upload before the end of the stream".to_string(),
                    ));
                }
                ChunkOutcome::Incomplete { persisted } => {
                    if persisted < self.acknowledged || persisted > offered {
                        return Err(Error::ProviderRequestFailed(format!(
                            "Provider acknowledged {} bytes, outside {}..={}",
                            persisted, self.acknowledged, offered
                        )));
                    }
                    if persisted == self.acknowledged {
                        self.stalled += 1;
                        if self.stalled >= self.config.max_stalled_rounds {
                            return Err(Error::ProviderRequestFailed(format!(
                                "No progress after {} requests",
                                self.stalled
                            )));
                        }
                    } else {
                        self.stalled = 0;
                    }
                    let sent = (persisted - self.acknowledged) as usize;
                    self.carry = body.slice(sent..);
                    self.acknowledged = persisted;
                    if !self.carry.is_empty() {
                        debug!(
                            acknowledged = persisted,
                            resend = self.carry.len(),
                            "Provider persisted a partial chunk"
                        );
                    }
                }
            }
        }
    }
}

/// Drive a resumable session to completion with the contents of `source`.
///
/// On any failure the session is aborted and the error is reported as
/// `UploadFailed` with the number of bytes the provider had acknowledged.
pub async fn upload_chunked<S>(
    session: &mut S,
    source: ByteStream,
    config: &UploadConfig,
) -> Result<UploadReport>
where
    S: ResumableSession + ?Sized,
{
    config.validate()?;

    let mut upload = ChunkedUpload {
        session,
        reader: ChunkReader::new(source),
        config,
        acknowledged: 0,
        carry: Bytes::new(),
        source_done: false,
        stalled: 0,
        requests: 0,
    };

    match upload.run().await {
        Ok(report) => Ok(report),
        Err(err) => {
            let acknowledged = upload.acknowledged;
            warn!(acknowledged, error = %err, "Chunked upload failed, aborting session");
            if let Err(abort_err) = upload.session.abort().await {
                warn!(error = %abort_err, "Failed to abort upload session");
            }
            Err(match err {
                Error::UploadFailed { .. } => err,
                other => Error::UploadFailed {
                    acknowledged,
                    reason: other.to_string(),
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use veilvault_common::bytes_stream;

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        /// Persist everything offered.
        All,
        /// Persist up to this absolute offset.
        Upto(u64),
        Fail,
        /// Claim completion regardless of the total.
        Done,
    }

    #[derive(Default)]
    struct ScriptedSession {
        script: VecDeque<Reply>,
        stored: Vec<u8>,
        ranges: Vec<String>,
        aborted: bool,
    }

    impl ScriptedSession {
        fn with(script: &[Reply]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ResumableSession for ScriptedSession {
        async fn put_chunk(&mut self, range: &ContentRange, body: Bytes) -> Result<ChunkOutcome> {
            self.ranges.push(range.to_string());
            assert_eq!(range.start, self.stored.len() as u64, "range must start at acknowledged offset");
            assert_eq!(range.len(), body.len() as u64);

            let keep = match self.script.pop_front().unwrap_or(Reply::All) {
                Reply::All => body.len(),
                Reply::Upto(offset) => (offset - range.start) as usize,
                Reply::Fail => return Err(Error::ProviderRequestFailed("connection reset".into())),
                Reply::Done => return Ok(ChunkOutcome::Complete),
            };
            self.stored.extend_from_slice(&body[..keep]);

            match range.total {
                Some(total) if total == self.stored.len() as u64 => Ok(ChunkOutcome::Complete),
                _ => Ok(ChunkOutcome::Incomplete {
                    persisted: self.stored.len() as u64,
                }),
            }
        }

        async fn abort(&mut self) -> Result<()> {
            self.aborted = true;
            Ok(())
        }
    }

    fn config(chunk_size: usize) -> UploadConfig {
        UploadConfig {
            chunk_size,
            max_stalled_rounds: 3,
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    #[test]
    fn test_content_range_display() {
        let partial = ContentRange { start: 0, end: Some(127), total: None };
        assert_eq!(partial.to_string(), "bytes 0-127/*");
        let last = ContentRange { start: 128, end: Some(299), total: Some(300) };
        assert_eq!(last.to_string(), "bytes 128-299/300");
        let finalize = ContentRange { start: 256, end: None, total: Some(256) };
        assert_eq!(finalize.to_string(), "bytes */256");
        assert_eq!(finalize.len(), 0);
        assert_eq!(last.len(), 172);
    }

    #[test]
    fn test_parse_range_header() {
        assert_eq!(parse_range_header("bytes=0-49"), Some(50));
        assert_eq!(parse_range_header("0-0"), Some(1));
        assert_eq!(parse_range_header("bytes=10-49"), None);
        assert_eq!(parse_range_header("garbage"), None);
    }

    #[tokio::test]
    async fn test_partial_ack_resends_tail() {
        let source = data(300);
        let mut session = ScriptedSession::with(&[Reply::Upto(50)]);

        let report = upload_chunked(&mut session, bytes_stream(source.clone(), 7), &config(128))
            .await
            .unwrap();

        assert_eq!(
            session.ranges,
            vec!["bytes 0-127/*", "bytes 50-177/*", "bytes 178-299/300"]
        );
        assert_eq!(session.stored, source);
        assert_eq!(report, UploadReport { bytes: 300, requests: 3 });
        assert!(!session.aborted);
    }

    #[tokio::test]
    async fn test_final_chunk_partial_ack() {
        let source = data(100);
        let mut session = ScriptedSession::with(&[Reply::Upto(60)]);

        upload_chunked(&mut session, bytes_stream(source.clone(), 100), &config(128))
            .await
            .unwrap();

        assert_eq!(session.ranges, vec!["bytes 0-99/100", "bytes 60-99/100"]);
        assert_eq!(session.stored, source);
    }

    #[tokio::test]
    async fn test_exact_multiple_is_finalized() {
        let source = data(256);
        let mut session = ScriptedSession::default();

        let report = upload_chunked(&mut session, bytes_stream(source.clone(), 64), &config(128))
            .await
            .unwrap();

        assert_eq!(
            session.ranges,
            vec!["bytes 0-127/*", "bytes 128-255/*", "bytes */256"]
        );
        assert_eq!(report.bytes, 256);
        assert_eq!(session.stored, source);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let mut session = ScriptedSession::default();
        let report = upload_chunked(&mut session, bytes_stream(Vec::new(), 1), &config(128))
            .await
            .unwrap();
        assert_eq!(session.ranges, vec!["bytes */0"]);
        assert_eq!(report, UploadReport { bytes: 0, requests: 1 });
    }

    #[tokio::test]
    async fn test_network_error_aborts_with_offset() {
        let mut session = ScriptedSession::with(&[Reply::All, Reply::Fail]);
        let result = upload_chunked(&mut session, bytes_stream(data(300), 300), &config(128)).await;

        match result {
            Err(Error::UploadFailed { acknowledged, .. }) => assert_eq!(acknowledged, 128),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(session.aborted);
    }

    #[tokio::test]
    async fn test_stalled_provider_gives_up() {
        let mut session = ScriptedSession::with(&[Reply::Upto(0), Reply::Upto(0), Reply::Upto(0)]);
        let result = upload_chunked(&mut session, bytes_stream(data(300), 300), &config(128)).await;

        assert!(matches!(result, Err(Error::UploadFailed { acknowledged: 0, .. })));
        assert_eq!(session.ranges.len(), 3);
        assert!(session.aborted);
    }

    #[tokio::test]
    async fn test_early_completion_is_an_error() {
        let mut session = ScriptedSession::with(&[Reply::Done]);
        let result = upload_chunked(&mut session, bytes_stream(data(300), 300), &config(128)).await;
        assert!(matches!(result, Err(Error::UploadFailed { .. })));
        assert!(session.aborted);
    }

    #[tokio::test]
    async fn test_source_error_aborts() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from(data(200))),
            Err(Error::Io(std::io::Error::other("disk gone"))),
        ];
        let mut session = ScriptedSession::default();
        let result = upload_chunked(&mut session, Box::pin(stream::iter(items)), &config(128)).await;

        assert!(matches!(result, Err(Error::UploadFailed { acknowledged: 128, .. })));
        assert!(session.aborted);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut session = ScriptedSession::default();
        let result = upload_chunked(&mut session, bytes_stream(data(1), 1), &config(0)).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
