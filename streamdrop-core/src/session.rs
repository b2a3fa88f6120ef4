use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::retry::RetryPolicy;
use crate::upstream::{UpstreamClient, UpstreamResult, UpstreamSession};
use crate::{DcId, StreamError, StreamResult};

type SessionSlot = Arc<OnceCell<Arc<dyn UpstreamSession>>>;

/// Per-client cache of datacenter sessions.
///
/// A session is created at most once per datacenter and then shared by every
/// stream that needs it for the lifetime of the owning client. Concurrent
/// first calls for the same datacenter wait on a single creation.
pub struct SessionCache {
    client: Arc<dyn UpstreamClient>,
    retry: RetryPolicy,
    slots: Mutex<HashMap<DcId, SessionSlot>>,
}

impl SessionCache {
    pub fn new(client: Arc<dyn UpstreamClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Session able to read objects stored on `dc_id`
    #[instrument(skip(self), fields(dc = %dc_id))]
    pub async fn acquire(&self, dc_id: DcId) -> StreamResult<Arc<dyn UpstreamSession>> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(dc_id).or_default())
        };

        // A failed init leaves the cell empty so the next stream tries again.
        let session = slot.get_or_try_init(|| self.create(dc_id)).await?;
        Ok(Arc::clone(session))
    }

    /// Number of datacenters with an established session
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn create(&self, dc_id: DcId) -> StreamResult<Arc<dyn UpstreamSession>> {
        self.retry
            .run("session", |_| self.connect(dc_id))
            .await
            .map_err(|failure| {
                warn!(dc = %dc_id, attempts = failure.attempts, error = %failure.error, "session unavailable");
                StreamError::SessionUnavailable {
                    dc_id,
                    attempts: failure.attempts,
                    source: failure.error,
                }
            })
    }

    async fn connect(&self, dc_id: DcId) -> UpstreamResult<Arc<dyn UpstreamSession>> {
        let home = self.client.home_dc().await?;
        if dc_id == home {
            return Ok(self.client.primary_session());
        }

        let session = self.client.open_media_session(dc_id).await?;
        let auth = self.client.export_authorization(dc_id).await?;
        session.import_authorization(auth).await?;
        info!(dc = %dc_id, home = %home, "authorized media session");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUpstream;
    use std::time::Duration;

    fn cache(upstream: &MemoryUpstream) -> SessionCache {
        SessionCache::new(
            Arc::new(upstream.clone()),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        )
    }

    #[tokio::test]
    async fn home_dc_reuses_primary_session() {
        let upstream = MemoryUpstream::new(DcId(2));
        let sessions = cache(&upstream);

        let session = sessions.acquire(DcId(2)).await.unwrap();
        assert_eq!(session.dc_id(), DcId(2));
        assert_eq!(upstream.stats().sessions_opened, 0);
        assert_eq!(upstream.stats().authorizations_exported, 0);
    }

    #[tokio::test]
    async fn foreign_dc_exports_authorization_once() {
        let upstream = MemoryUpstream::new(DcId(2));
        let sessions = cache(&upstream);

        let first = sessions.acquire(DcId(4)).await.unwrap();
        let second = sessions.acquire(DcId(4)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(upstream.stats().sessions_opened, 1);
        assert_eq!(upstream.stats().authorizations_exported, 1);
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_calls_create_one_session() {
        let upstream = MemoryUpstream::new(DcId(1)).with_latency(Duration::from_millis(20));
        let sessions = Arc::new(cache(&upstream));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                tokio::spawn(async move { sessions.acquire(DcId(5)).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(upstream.stats().sessions_opened, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn session_creation_is_retried_then_fails() {
        let upstream = MemoryUpstream::new(DcId(1));
        upstream.fail_next_sessions(3);
        let sessions = cache(&upstream);

        let err = sessions.acquire(DcId(3)).await.err().unwrap();
        assert!(matches!(
            err,
            StreamError::SessionUnavailable { attempts: 3, .. }
        ));
        assert!(sessions.is_empty());

        // the slot stays retryable
        assert!(sessions.acquire(DcId(3)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn session_creation_recovers_within_bound() {
        let upstream = MemoryUpstream::new(DcId(1));
        upstream.fail_next_sessions(2);
        let sessions = cache(&upstream);

        assert!(sessions.acquire(DcId(3)).await.is_ok());
        assert_eq!(upstream.stats().sessions_opened, 1);
    }
}
