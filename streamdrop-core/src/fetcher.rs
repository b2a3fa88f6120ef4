use std::time::Duration;

use bytes::Bytes;
use tracing::{instrument, warn};

use crate::retry::{RetryHint, RetryPolicy, Retryable};
use crate::upstream::{FilePart, UpstreamError, UpstreamSession};
use crate::{DcId, ObjectLocator, StreamError, StreamResult};

/// Issues single aligned chunk reads with bounded retry.
#[derive(Debug, Clone)]
pub struct ChunkFetcher {
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

#[derive(Debug)]
enum AttemptError {
    Upstream(UpstreamError),
    Redirected(DcId),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Upstream(e) => write!(f, "{e}"),
            AttemptError::Redirected(dc) => write!(f, "redirected to cdn dc {dc}"),
        }
    }
}

impl Retryable for AttemptError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            AttemptError::Upstream(e) => e.retry_hint(),
            AttemptError::Redirected(_) => RetryHint::Never,
        }
    }
}

impl ChunkFetcher {
    pub fn new(retry: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self { retry, timeout }
    }

    /// Read `limit` bytes at the aligned `offset`.
    ///
    /// Rate limits and transient failures are retried per the policy. A
    /// rejected reference or a CDN redirect fails at once.
    #[instrument(skip(self, session, locator), fields(media = locator.media_id, dc = %session.dc_id()))]
    pub async fn fetch(
        &self,
        session: &dyn UpstreamSession,
        locator: &ObjectLocator,
        offset: u64,
        limit: u32,
    ) -> StreamResult<Bytes> {
        let result = self
            .retry
            .run("chunk", |_| self.attempt(session, locator, offset, limit))
            .await;

        result.map_err(|failure| match failure.error {
            AttemptError::Redirected(dc_id) => {
                warn!(offset, cdn_dc = %dc_id, "cdn redirect is not supported, aborting stream");
                StreamError::unsupported(format!("cdn redirect to dc {dc_id}"))
            }
            AttemptError::Upstream(UpstreamError::FileReferenceExpired) => {
                warn!(
                    offset,
                    media = locator.media_id,
                    stale_reference = true,
                    "upstream rejected object reference"
                );
                StreamError::StaleReference {
                    media_id: locator.media_id,
                }
            }
            AttemptError::Upstream(source) => StreamError::TransientUpstream {
                offset,
                attempts: failure.attempts,
                source,
            },
        })
    }

    async fn attempt(
        &self,
        session: &dyn UpstreamSession,
        locator: &ObjectLocator,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, AttemptError> {
        let read = session.get_file(locator, offset, limit);
        let part = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| AttemptError::Upstream(UpstreamError::Timeout(timeout)))?,
            None => read.await,
        };

        match part.map_err(AttemptError::Upstream)? {
            FilePart::Bytes(bytes) => Ok(bytes),
            FilePart::CdnRedirect { dc_id } => Err(AttemptError::Redirected(dc_id)),
        }
    }
}
