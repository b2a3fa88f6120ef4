//! # streamdrop-core: range-aware chunked streaming
//!
//! `streamdrop-core` serves objects held in a remote, session-based object
//! store as seekable byte streams. A short link id resolves to an object
//! locator; an HTTP-style byte range is translated into aligned chunk reads;
//! chunks are fetched one at a time with bounded retry and trimmed so the
//! body contains exactly the requested bytes.
//!
//! ## Key Features
//!
//! - **Exact ranges**: any `[start, end]` span is served byte-exact whatever the chunk size
//! - **Load balancing**: each stream runs on the least loaded client of a pool
//! - **Shared sessions**: one session per client and datacenter, created once and reused
//! - **Retry policy**: rate limits and flaky reads are absorbed without the client noticing
//! - **No HTTP coupling**: the axum layer lives in `streamdrop-axum`
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use futures::TryStreamExt;
//! use streamdrop_core::memory::MemoryUpstream;
//! use streamdrop_core::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> StreamResult<()> {
//! let upstream = MemoryUpstream::new(DcId(1));
//! let locator = upstream.insert(DcId(1), b"hello world".to_vec(), FileMetadata::new(11));
//!
//! let registry = MemoryLinkRegistry::new();
//! let link = registry.create(NewLink::new(&locator, 42)).await?;
//!
//! let config = StreamConfig::default();
//! let main = Arc::new(ClientHandle::new("main", Arc::new(upstream), config.session_retry.clone()));
//! let streamer = MediaStreamer::new(ClientPool::new().with_default(main), registry, config)?;
//!
//! let opened = streamer
//!     .open(&StreamCtx::new(link.id), Some(RangeRequest::new(6, None)))
//!     .await?;
//! let body: Vec<u8> = opened.body.map_ok(|b| b.to_vec()).try_concat().await?;
//! assert_eq!(body, b"world");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  MediaStreamer  │  ← link lookup, metadata, range validation
//! ├─────────────────┤
//! │ StreamAssembler │  ← chunk loop, trimming
//! ├─────────────────┤
//! │  ChunkFetcher   │  ← one read, retried
//! ├─────────────────┤
//! │  SessionCache   │  ← per datacenter sessions
//! ├─────────────────┤
//! │ UpstreamClient  │  ← the object store
//! └─────────────────┘
//! ```

mod assembler;
mod config;
mod error;
mod fetcher;
mod locator;
pub mod media;
pub mod memory;
mod plan;
mod pool;
pub mod registry;
pub mod retry;
mod session;
mod streamer;
mod types;
pub mod upstream;

pub use assembler::{AssemblerState, StreamAssembler};
pub use config::StreamConfig;
pub use error::{ErrorKind, StreamError, StreamResult};
pub use fetcher::ChunkFetcher;
pub use locator::ObjectLocator;
pub use plan::{ContentRange, RangeRequest, StreamPlan};
pub use pool::{ClientHandle, ClientPool, ClientResolver, ClientSource, WorkGuard};
pub use registry::{lookup_active, LinkLookup, LinkRecord, LinkRegistry, MemoryLinkRegistry, NewLink, ShortId};
pub use retry::{Backoff, RetryHint, RetryPolicy, Retryable};
pub use session::SessionCache;
pub use streamer::{MediaStreamer, OpenedStream, ResolvedLink};
pub use types::{ByteStream, DcId, FileMetadata, StreamCtx};
pub use upstream::{UpstreamClient, UpstreamError, UpstreamSession};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, ClientHandle, ClientPool, DcId, FileMetadata, LinkRegistry, MediaStreamer,
        MemoryLinkRegistry, NewLink, ObjectLocator, RangeRequest, StreamConfig, StreamCtx,
        StreamError, StreamResult,
    };
}
