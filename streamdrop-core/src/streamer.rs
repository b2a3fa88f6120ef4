use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::assembler::StreamAssembler;
use crate::fetcher::ChunkFetcher;
use crate::plan::{ContentRange, RangeRequest, StreamPlan};
use crate::pool::{ClientHandle, ClientPool, ClientResolver};
use crate::registry::{lookup_active, LinkLookup, LinkRecord, LinkRegistry};
use crate::{ByteStream, FileMetadata, ObjectLocator, StreamConfig, StreamCtx, StreamError, StreamResult};

/// A link resolved down to its object, without opening a stream
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub record: LinkRecord,
    pub locator: ObjectLocator,
    pub metadata: FileMetadata,
}

/// Headers and body of a stream that is ready to be sent
pub struct OpenedStream {
    pub metadata: FileMetadata,
    /// Length of the body in bytes
    pub content_length: u64,
    /// Set when the request carried a range
    pub content_range: Option<ContentRange>,
    pub body: ByteStream,
    pub client_id: String,
}

impl OpenedStream {
    pub fn is_partial(&self) -> bool {
        self.content_range.is_some()
    }
}

impl std::fmt::Debug for OpenedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedStream")
            .field("metadata", &self.metadata)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Entry point of the streaming engine.
///
/// Turns a short id and an optional byte range into response metadata plus
/// a lazily fetched body, spreading streams over the client pool.
pub struct MediaStreamer {
    pool: Arc<ClientPool>,
    resolver: ClientResolver,
    registry: Arc<dyn LinkRegistry>,
    fetcher: Arc<ChunkFetcher>,
    config: StreamConfig,
}

impl MediaStreamer {
    /// Create a streamer; fails if the config is invalid
    pub fn new<R: LinkRegistry + 'static>(
        pool: ClientPool,
        registry: R,
        config: StreamConfig,
    ) -> StreamResult<Self> {
        Self::with_shared(Arc::new(pool), Arc::new(registry), config)
    }

    /// Create a streamer over a pool and registry shared with other components
    pub fn with_shared(
        pool: Arc<ClientPool>,
        registry: Arc<dyn LinkRegistry>,
        config: StreamConfig,
    ) -> StreamResult<Self> {
        config.validate()?;
        let fetcher = ChunkFetcher::new(config.fetch_retry.clone(), config.chunk_timeout);
        Ok(Self {
            pool,
            resolver: ClientResolver::default(),
            registry,
            fetcher: Arc::new(fetcher),
            config,
        })
    }

    /// Replace the client resolution order used for streams
    pub fn with_resolver(mut self, resolver: ClientResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn pool(&self) -> &ClientPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<dyn LinkRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Active record for `id`. Expired and unknown ids are the same `NotFound`.
    pub async fn resolve_link(&self, id: &str) -> StreamResult<LinkRecord> {
        match lookup_active(self.registry.as_ref(), id, Utc::now()).await? {
            LinkLookup::Active(record) => Ok(record),
            LinkLookup::Expired => {
                debug!(link = %id, "link expired");
                Err(StreamError::not_found(id))
            }
            LinkLookup::Missing => Err(StreamError::not_found(id)),
        }
    }

    /// Resolve a link and its object metadata. Used by the info and page
    /// routes; prefers the default client since nothing is streamed.
    #[instrument(skip(self))]
    pub async fn describe(&self, id: &str) -> StreamResult<ResolvedLink> {
        let record = self.resolve_link(id).await?;
        let locator = decode_locator(&record)?;
        let client = ClientResolver::prefer_default().resolve(&self.pool)?;
        let metadata = fetch_metadata(&client, &record, &locator).await?;
        Ok(ResolvedLink {
            record,
            locator,
            metadata,
        })
    }

    /// Validate the request and prepare the body stream.
    ///
    /// Everything that can fail with a clean HTTP status (unknown link,
    /// missing object, bad range, no client, no session) fails here before
    /// any byte is fetched. Errors after this point end the body early.
    #[instrument(skip(self, ctx), fields(link = %ctx.link_id, request_id = %ctx.request_id))]
    pub async fn open(&self, ctx: &StreamCtx, range: Option<RangeRequest>) -> StreamResult<OpenedStream> {
        let record = self.resolve_link(&ctx.link_id).await?;
        let locator = decode_locator(&record)?;
        // Counted from here on; every early return below releases it.
        let guard = self.resolver.acquire(&self.pool)?;
        let client = Arc::clone(guard.handle());
        let metadata = fetch_metadata(&client, &record, &locator).await?;
        let total_size = metadata.size;

        let (start, end) = match range {
            Some(range) => range.resolve(total_size)?,
            None if total_size == 0 => {
                return Ok(OpenedStream {
                    metadata,
                    content_length: 0,
                    content_range: None,
                    body: Box::pin(futures::stream::empty::<std::io::Result<bytes::Bytes>>()),
                    client_id: client.id().to_string(),
                });
            }
            None => (0, total_size - 1),
        };
        let plan = StreamPlan::new(start, end, total_size, self.config.chunk_size as u64)?;

        let session = client.sessions().acquire(locator.dc_id).await?;

        info!(
            client = %client.id(),
            dc = %locator.dc_id,
            start,
            end,
            total_size,
            chunks = plan.chunk_count,
            "stream opened"
        );

        let assembler = StreamAssembler::new(plan, Arc::new(locator), session, Arc::clone(&self.fetcher));
        Ok(OpenedStream {
            metadata,
            content_length: plan.content_length(),
            content_range: range.map(|_| plan.content_range()),
            body: assembler.into_stream(guard),
            client_id: client.id().to_string(),
        })
    }
}

fn decode_locator(record: &LinkRecord) -> StreamResult<ObjectLocator> {
    record.locator().map_err(|e| {
        warn!(link = %record.id, error = %e, "stored object reference does not decode");
        StreamError::not_found(&record.id)
    })
}

async fn fetch_metadata(
    client: &ClientHandle,
    record: &LinkRecord,
    locator: &ObjectLocator,
) -> StreamResult<FileMetadata> {
    let metadata = client
        .client()
        .file_metadata(locator)
        .await
        .map_err(|source| StreamError::Upstream { source })?;

    let Some(mut metadata) = metadata else {
        warn!(link = %record.id, media = locator.media_id, "object no longer exists upstream");
        return Err(StreamError::not_found(&record.id));
    };
    if metadata.file_name.is_none() {
        metadata.file_name = record.file_name.clone();
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUpstream;
    use crate::registry::{MemoryLinkRegistry, NewLink};
    use crate::retry::RetryPolicy;
    use crate::DcId;
    use futures::TryStreamExt;
    use std::time::Duration;

    struct Fixture {
        upstream: MemoryUpstream,
        streamer: MediaStreamer,
        handle: Arc<ClientHandle>,
        data: Vec<u8>,
        link_id: String,
    }

    async fn fixture(len: usize) -> Fixture {
        let upstream = MemoryUpstream::new(DcId(1));
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let locator = upstream.insert(
            DcId(1),
            data.clone(),
            FileMetadata::new(len as u64).with_mime_type("video/mp4"),
        );

        let registry = MemoryLinkRegistry::new();
        let link = registry
            .create(NewLink::new(&locator, 1).with_file_name("clip.mp4"))
            .await
            .unwrap();

        let handle = Arc::new(ClientHandle::new(
            "main",
            Arc::new(upstream.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        ));
        let pool = ClientPool::new().with_default(Arc::clone(&handle));
        let config = StreamConfig::new().with_chunk_size(1024);
        let streamer = MediaStreamer::new(pool, registry, config).unwrap();

        Fixture {
            upstream,
            streamer,
            handle,
            data,
            link_id: link.id,
        }
    }

    #[tokio::test]
    async fn full_body_without_range() {
        let f = fixture(5000).await;
        let opened = f.streamer.open(&StreamCtx::new(&f.link_id), None).await.unwrap();

        assert!(!opened.is_partial());
        assert_eq!(opened.content_length, 5000);
        assert_eq!(opened.metadata.display_name(), "clip.mp4");

        let body: Vec<u8> = opened.body.map_ok(|b| b.to_vec()).try_concat().await.unwrap();
        assert_eq!(body, f.data);
        assert_eq!(f.handle.load(), 0);
    }

    #[tokio::test]
    async fn ranged_body() {
        let f = fixture(5000).await;
        let opened = f
            .streamer
            .open(&StreamCtx::new(&f.link_id), Some(RangeRequest::new(1000, Some(1100))))
            .await
            .unwrap();

        assert_eq!(opened.content_range.unwrap().to_string(), "bytes 1000-1100/5000");
        assert_eq!(opened.content_length, 101);
        let body: Vec<u8> = opened.body.map_ok(|b| b.to_vec()).try_concat().await.unwrap();
        assert_eq!(body, &f.data[1000..=1100]);
    }

    #[tokio::test]
    async fn bad_range_fails_before_any_read() {
        let f = fixture(5000).await;
        let err = f
            .streamer
            .open(&StreamCtx::new(&f.link_id), Some(RangeRequest::new(0, Some(5000))))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::RangeNotSatisfiable { total_size: 5000 }));
        assert_eq!(f.upstream.stats().reads, 0);
        assert_eq!(f.handle.load(), 0);
    }

    #[tokio::test]
    async fn removed_object_is_not_found() {
        let f = fixture(100).await;
        let record = f.streamer.resolve_link(&f.link_id).await.unwrap();
        f.upstream.remove(record.locator().unwrap().media_id);

        let err = f.streamer.describe(&f.link_id).await.unwrap_err();
        assert!(matches!(err, StreamError::NotFound { .. }));
    }

    #[tokio::test]
    async fn empty_object_streams_nothing() {
        let upstream = MemoryUpstream::new(DcId(1));
        let locator = upstream.insert(DcId(1), Vec::new(), FileMetadata::new(0));
        let registry = MemoryLinkRegistry::new();
        let link = registry.create(NewLink::new(&locator, 1)).await.unwrap();
        let pool = ClientPool::new().with_default(Arc::new(ClientHandle::new(
            "main",
            Arc::new(upstream.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        )));
        let streamer = MediaStreamer::new(pool, registry, StreamConfig::default()).unwrap();

        let opened = streamer.open(&StreamCtx::new(&link.id), None).await.unwrap();
        assert_eq!(opened.content_length, 0);
        let body: Vec<_> = opened.body.try_collect().await.unwrap();
        assert!(body.is_empty());
        assert_eq!(upstream.stats().reads, 0);
    }

    #[test]
    fn rejects_invalid_chunk_size() {
        let result = MediaStreamer::new(
            ClientPool::new(),
            MemoryLinkRegistry::new(),
            StreamConfig::new().with_chunk_size(3000),
        );
        assert!(matches!(result, Err(StreamError::Invalid { .. })));
    }
}
