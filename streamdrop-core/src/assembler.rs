use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::fetcher::ChunkFetcher;
use crate::plan::StreamPlan;
use crate::pool::WorkGuard;
use crate::upstream::UpstreamSession;
use crate::{ByteStream, ObjectLocator, StreamError, StreamResult};

/// Where an assembler is in its fetch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Init,
    Fetching,
    Yielding,
    Done,
    Aborted,
}

/// Drives the chunk fetch loop for one stream.
///
/// Exactly one chunk is in flight at a time and the next read only starts
/// once the consumer asks for more, so backpressure from the HTTP writer
/// reaches the upstream directly.
pub struct StreamAssembler {
    plan: StreamPlan,
    locator: Arc<ObjectLocator>,
    session: Arc<dyn UpstreamSession>,
    fetcher: Arc<ChunkFetcher>,
    chunk_index: u64,
    state: AssemblerState,
}

impl StreamAssembler {
    pub fn new(
        plan: StreamPlan,
        locator: Arc<ObjectLocator>,
        session: Arc<dyn UpstreamSession>,
        fetcher: Arc<ChunkFetcher>,
    ) -> Self {
        Self {
            plan,
            locator,
            session,
            fetcher,
            chunk_index: 0,
            state: AssemblerState::Init,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn plan(&self) -> &StreamPlan {
        &self.plan
    }

    /// Fetch and trim the next chunk.
    ///
    /// Returns `None` once the plan is satisfied or after an error has been
    /// returned.
    pub async fn next_chunk(&mut self) -> Option<StreamResult<Bytes>> {
        match self.state {
            AssemblerState::Done | AssemblerState::Aborted => return None,
            AssemblerState::Init => self.chunk_index = 1,
            AssemblerState::Fetching | AssemblerState::Yielding => {}
        }

        if self.chunk_index > self.plan.chunk_count {
            self.state = AssemblerState::Done;
            debug!(media = self.locator.media_id, chunks = self.plan.chunk_count, "stream complete");
            return None;
        }

        self.state = AssemblerState::Fetching;
        let offset = self.plan.chunk_offset(self.chunk_index);
        let limit = self.plan.chunk_size as u32;

        let chunk = match self
            .fetcher
            .fetch(self.session.as_ref(), &self.locator, offset, limit)
            .await
        {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(self.abort(e))),
        };

        let Some(bounds) = self.plan.slice_bounds(self.chunk_index, chunk.len()) else {
            let e = StreamError::Truncated {
                offset,
                expected: self.plan.required_len(self.chunk_index),
                actual: chunk.len(),
            };
            return Some(Err(self.abort(e)));
        };

        self.state = AssemblerState::Yielding;
        self.chunk_index += 1;
        Some(Ok(chunk.slice(bounds)))
    }

    /// Turn the assembler into a body stream. `guard` is held until the
    /// stream ends or is dropped.
    pub fn into_stream(mut self, guard: WorkGuard) -> ByteStream {
        Box::pin(async_stream::stream! {
            let _guard = guard;
            while let Some(item) = self.next_chunk().await {
                match item {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        // Headers are already out; failing the body closes the connection.
                        yield Err(std::io::Error::other(e));
                        break;
                    }
                }
            }
        })
    }

    fn abort(&mut self, error: StreamError) -> StreamError {
        self.state = AssemblerState::Aborted;
        warn!(
            media = self.locator.media_id,
            chunk = self.chunk_index,
            of = self.plan.chunk_count,
            error = %error,
            "stream aborted"
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUpstream;
    use crate::retry::RetryPolicy;
    use crate::upstream::{UpstreamClient, UpstreamError};
    use crate::{DcId, FileMetadata};
    use futures::StreamExt;
    use std::time::Duration;

    fn setup(len: usize, chunk_size: u64, start: u64, end: u64) -> (MemoryUpstream, StreamAssembler, Vec<u8>) {
        let upstream = MemoryUpstream::new(DcId(1));
        let data: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let locator = upstream.insert(DcId(1), data.clone(), FileMetadata::new(len as u64));
        let plan = StreamPlan::new(start, end, len as u64, chunk_size).unwrap();
        let fetcher = ChunkFetcher::new(RetryPolicy::fixed(5, Duration::from_millis(500)), None);
        let assembler = StreamAssembler::new(
            plan,
            Arc::new(locator),
            upstream.primary_session(),
            Arc::new(fetcher),
        );
        (upstream, assembler, data)
    }

    async fn drain(assembler: &mut StreamAssembler) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = assembler.next_chunk().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn walks_states_to_done() {
        let (_, mut assembler, data) = setup(5000, 1024, 1000, 4000);
        assert_eq!(assembler.state(), AssemblerState::Init);

        let first = assembler.next_chunk().await.unwrap().unwrap();
        assert_eq!(&first[..], &data[1000..1024]);
        assert_eq!(assembler.state(), AssemblerState::Yielding);

        let rest = drain(&mut assembler).await;
        assert_eq!(&rest[..], &data[1024..=4000]);
        assert_eq!(assembler.state(), AssemblerState::Done);
        assert!(assembler.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn single_chunk_slice() {
        let (_, mut assembler, data) = setup(1024, 1024, 100, 200);
        let out = drain(&mut assembler).await;
        assert_eq!(out.len(), 101);
        assert_eq!(&out[..], &data[100..=200]);
    }

    #[tokio::test]
    async fn unavailable_chunk_aborts() {
        let (upstream, mut assembler, _) = setup(4096, 1024, 0, 4095);
        assembler.next_chunk().await.unwrap().unwrap();
        upstream.fail_next_reads([UpstreamError::FileReferenceExpired]);

        let err = assembler.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::StaleReference { .. }));
        assert_eq!(assembler.state(), AssemblerState::Aborted);
        assert!(assembler.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn short_chunk_aborts() {
        let (upstream, mut assembler, _) = setup(4096, 1024, 0, 4095);
        upstream.truncate_object(1, 1500);

        assembler.next_chunk().await.unwrap().unwrap();
        let err = assembler.next_chunk().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Truncated { offset: 1024, expected: 1024, actual: 476 }));
    }

    #[tokio::test]
    async fn body_stream_releases_guard() {
        let (_, assembler, data) = setup(3000, 1024, 0, 2999);
        let handle = Arc::new(crate::pool::ClientHandle::new(
            "a",
            Arc::new(MemoryUpstream::new(DcId(1))),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        ));

        let mut body = assembler.into_stream(handle.begin_stream());
        assert_eq!(handle.load(), 1);

        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(out, data);
        drop(body);
        assert_eq!(handle.load(), 0);
    }

    #[tokio::test]
    async fn dropping_body_mid_stream_releases_guard() {
        let (upstream, assembler, _) = setup(8192, 1024, 0, 8191);
        let handle = Arc::new(crate::pool::ClientHandle::new(
            "a",
            Arc::new(upstream.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        ));

        let mut body = assembler.into_stream(handle.begin_stream());
        body.next().await.unwrap().unwrap();
        drop(body);

        assert_eq!(handle.load(), 0);
        // no read-ahead past what the consumer took
        assert_eq!(upstream.stats().reads, 1);
    }
}
