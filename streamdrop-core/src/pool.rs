use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::session::SessionCache;
use crate::upstream::UpstreamClient;
use crate::{StreamError, StreamResult};

/// An upstream connection together with its session cache and load counter.
pub struct ClientHandle {
    id: String,
    client: Arc<dyn UpstreamClient>,
    sessions: SessionCache,
    load: AtomicUsize,
}

impl ClientHandle {
    pub fn new<S: Into<String>>(id: S, client: Arc<dyn UpstreamClient>, session_retry: RetryPolicy) -> Self {
        Self {
            id: id.into(),
            sessions: SessionCache::new(Arc::clone(&client), session_retry),
            client,
            load: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Streams currently running on this client
    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Count a stream against this client until the guard is dropped.
    pub fn begin_stream(self: &Arc<Self>) -> WorkGuard {
        let load = self.load.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(client = %self.id, load, "stream started");
        WorkGuard {
            handle: Arc::clone(self),
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("load", &self.load())
            .finish()
    }
}

/// Releases one unit of work on drop.
///
/// Dropping happens on every exit path of a stream: completion, fetch failure,
/// and the HTTP body being dropped when the client disconnects.
#[derive(Debug)]
pub struct WorkGuard {
    handle: Arc<ClientHandle>,
}

impl WorkGuard {
    pub fn client_id(&self) -> &str {
        self.handle.id()
    }

    /// Client this unit of work is counted against
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let previous = self.handle.load.fetch_sub(1, Ordering::SeqCst);
        debug!(client = %self.handle.id, load = previous.saturating_sub(1), "stream finished");
    }
}

/// Set of upstream clients streams are spread across
#[derive(Debug, Default)]
pub struct ClientPool {
    clients: Vec<Arc<ClientHandle>>,
    default: Option<Arc<ClientHandle>>,
    /// Serializes pick-and-count so concurrent streams see each other's load
    pick: Mutex<()>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, handle: Arc<ClientHandle>) -> Self {
        self.clients.push(handle);
        self
    }

    /// Client used when the pool has no usable member
    pub fn with_default(mut self, handle: Arc<ClientHandle>) -> Self {
        self.default = Some(handle);
        self
    }

    pub fn clients(&self) -> &[Arc<ClientHandle>] {
        &self.clients
    }

    pub fn default_client(&self) -> Option<Arc<ClientHandle>> {
        self.default.clone()
    }

    /// Client with the fewest running streams; ties go to the earliest added.
    pub fn pick_least_loaded(&self) -> Option<Arc<ClientHandle>> {
        self.clients.iter().min_by_key(|c| c.load()).cloned()
    }

    /// `(client id, load)` for every pool member
    pub fn loads(&self) -> Vec<(String, usize)> {
        self.clients
            .iter()
            .map(|c| (c.id().to_string(), c.load()))
            .collect()
    }
}

/// One way of finding a client for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSource {
    LeastLoaded,
    Default,
}

impl ClientSource {
    pub fn pick(&self, pool: &ClientPool) -> Option<Arc<ClientHandle>> {
        match self {
            ClientSource::LeastLoaded => pool.pick_least_loaded(),
            ClientSource::Default => pool.default_client(),
        }
    }
}

/// Ordered list of [`ClientSource`]s, tried first to last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResolver {
    sources: Vec<ClientSource>,
}

impl Default for ClientResolver {
    /// Least loaded pool member, then the default client
    fn default() -> Self {
        Self::new(vec![ClientSource::LeastLoaded, ClientSource::Default])
    }
}

impl ClientResolver {
    pub fn new(sources: Vec<ClientSource>) -> Self {
        Self { sources }
    }

    /// Default client first; used for metadata-only requests
    pub fn prefer_default() -> Self {
        Self::new(vec![ClientSource::Default, ClientSource::LeastLoaded])
    }

    pub fn sources(&self) -> &[ClientSource] {
        &self.sources
    }

    pub fn resolve(&self, pool: &ClientPool) -> StreamResult<Arc<ClientHandle>> {
        self.sources
            .iter()
            .find_map(|source| source.pick(pool))
            .ok_or(StreamError::PoolExhausted)
    }

    /// Pick a client and count a stream against it in one step.
    ///
    /// The guard must be taken before any await so that streams opened
    /// concurrently spread over the pool instead of all seeing the same loads.
    pub fn acquire(&self, pool: &ClientPool) -> StreamResult<WorkGuard> {
        let _pick = pool.pick.lock();
        self.resolve(pool).map(|client| client.begin_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUpstream;
    use crate::DcId;
    use std::time::Duration;

    fn handle(id: &str) -> Arc<ClientHandle> {
        Arc::new(ClientHandle::new(
            id,
            Arc::new(MemoryUpstream::new(DcId(1))),
            RetryPolicy::fixed(3, Duration::from_millis(500)),
        ))
    }

    #[test]
    fn picks_minimum_and_breaks_ties_in_order() {
        let (a, b, c) = (handle("a"), handle("b"), handle("c"));
        let pool = ClientPool::new()
            .with_client(Arc::clone(&a))
            .with_client(Arc::clone(&b))
            .with_client(Arc::clone(&c));

        assert_eq!(pool.pick_least_loaded().unwrap().id(), "a");

        let _a1 = a.begin_stream();
        assert_eq!(pool.pick_least_loaded().unwrap().id(), "b");

        let _b1 = b.begin_stream();
        let _c1 = c.begin_stream();
        let _c2 = c.begin_stream();
        assert_eq!(pool.pick_least_loaded().unwrap().id(), "a");
    }

    #[test]
    fn guard_releases_on_drop() {
        let a = handle("a");
        {
            let _g1 = a.begin_stream();
            let _g2 = a.begin_stream();
            assert_eq!(a.load(), 2);
        }
        assert_eq!(a.load(), 0);
    }

    #[test]
    fn resolver_falls_back_to_default() {
        let pool = ClientPool::new().with_default(handle("main"));
        let client = ClientResolver::default().resolve(&pool).unwrap();
        assert_eq!(client.id(), "main");
    }

    #[test]
    fn resolver_prefers_pool_members() {
        let pool = ClientPool::new()
            .with_client(handle("worker-1"))
            .with_default(handle("main"));
        assert_eq!(ClientResolver::default().resolve(&pool).unwrap().id(), "worker-1");
        assert_eq!(ClientResolver::prefer_default().resolve(&pool).unwrap().id(), "main");
    }

    #[test]
    fn empty_pool_without_default_is_exhausted() {
        let err = ClientResolver::default().resolve(&ClientPool::new()).unwrap_err();
        assert!(matches!(err, StreamError::PoolExhausted));
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn acquire_counts_the_pick_immediately() {
        let pool = ClientPool::new()
            .with_client(handle("worker-0"))
            .with_client(handle("worker-1"));
        let resolver = ClientResolver::default();

        let first = resolver.acquire(&pool).unwrap();
        let second = resolver.acquire(&pool).unwrap();
        assert_eq!(first.client_id(), "worker-0");
        assert_eq!(second.client_id(), "worker-1");

        drop(first);
        assert_eq!(resolver.acquire(&pool).unwrap().client_id(), "worker-0");
        assert_eq!(pool.loads(), [("worker-0".to_string(), 0), ("worker-1".to_string(), 1)]);
    }

    #[test]
    fn each_source_is_independent() {
        let pool = ClientPool::new().with_client(handle("worker-1"));
        assert!(ClientSource::Default.pick(&pool).is_none());
        assert_eq!(ClientSource::LeastLoaded.pick(&pool).unwrap().id(), "worker-1");
    }
}
