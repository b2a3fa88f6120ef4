//! In-memory upstream.
//!
//! Holds objects in process memory and lets tests script upstream behaviour:
//! rate limits, flaky reads, stuck reads, rotated references, CDN redirects
//! and failing session setup. Every handle cloned from the same
//! [`MemoryUpstream`] shares one store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::upstream::{
    ExportedAuthorization, FilePart, UpstreamClient, UpstreamError, UpstreamResult, UpstreamSession,
};
use crate::{DcId, FileMetadata, ObjectLocator};

/// Call counters, read with [`MemoryUpstream::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// `get_file` calls, including failed ones
    pub reads: u64,
    /// Media sessions opened on non-home datacenters
    pub sessions_opened: u64,
    pub authorizations_exported: u64,
}

#[derive(Debug)]
struct StoredObject {
    dc_id: DcId,
    data: Bytes,
    metadata: FileMetadata,
    reference: Bytes,
    generation: u32,
    cdn: Option<DcId>,
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<i64, StoredObject>,
    next_media_id: i64,
    latency: Duration,
    read_failures: VecDeque<UpstreamError>,
    stalled_reads: u32,
    session_failures: u32,
    exported: HashMap<i64, DcId>,
    stats: MemoryStats,
}

#[derive(Debug)]
struct Inner {
    home: DcId,
    state: Mutex<State>,
}

/// Scriptable in-memory object store implementing [`UpstreamClient`]
#[derive(Debug, Clone)]
pub struct MemoryUpstream {
    inner: Arc<Inner>,
}

impl MemoryUpstream {
    pub fn new(home: DcId) -> Self {
        Self {
            inner: Arc::new(Inner {
                home,
                state: Mutex::new(State {
                    next_media_id: 1,
                    ..State::default()
                }),
            }),
        }
    }

    /// Delay applied to every session setup, metadata lookup and read
    pub fn with_latency(self, latency: Duration) -> Self {
        self.inner.state.lock().latency = latency;
        self
    }

    /// Store `data` on `dc_id`. Media ids are assigned from 1 upwards.
    pub fn insert(&self, dc_id: DcId, data: Vec<u8>, metadata: FileMetadata) -> ObjectLocator {
        let mut state = self.inner.state.lock();
        let media_id = state.next_media_id;
        state.next_media_id += 1;

        let reference = reference_bytes(media_id, 0);
        state.objects.insert(
            media_id,
            StoredObject {
                dc_id,
                data: Bytes::from(data),
                metadata,
                reference: reference.clone(),
                generation: 0,
                cdn: None,
            },
        );

        ObjectLocator::new(dc_id, media_id, media_id.wrapping_mul(0x5bd1_e995))
            .with_file_reference(reference)
    }

    pub fn remove(&self, media_id: i64) -> bool {
        self.inner.state.lock().objects.remove(&media_id).is_some()
    }

    /// Invalidate every locator issued so far for `media_id`.
    /// Returns the locator carrying the new reference.
    pub fn rotate_reference(&self, media_id: i64) -> Option<ObjectLocator> {
        let mut state = self.inner.state.lock();
        let object = state.objects.get_mut(&media_id)?;
        object.generation += 1;
        object.reference = reference_bytes(media_id, object.generation);
        Some(
            ObjectLocator::new(object.dc_id, media_id, media_id.wrapping_mul(0x5bd1_e995))
                .with_file_reference(object.reference.clone()),
        )
    }

    /// Make reads of `media_id` answer with a CDN redirect
    pub fn redirect_to_cdn(&self, media_id: i64, cdn: DcId) {
        if let Some(object) = self.inner.state.lock().objects.get_mut(&media_id) {
            object.cdn = Some(cdn);
        }
    }

    /// Cut the stored bytes without touching the reported metadata size
    pub fn truncate_object(&self, media_id: i64, len: usize) {
        if let Some(object) = self.inner.state.lock().objects.get_mut(&media_id) {
            object.data.truncate(len);
        }
    }

    /// Queue errors returned by the next reads, in order
    pub fn fail_next_reads<I: IntoIterator<Item = UpstreamError>>(&self, errors: I) {
        self.inner.state.lock().read_failures.extend(errors);
    }

    /// The next `n` reads never complete
    pub fn stall_next_reads(&self, n: u32) {
        self.inner.state.lock().stalled_reads += n;
    }

    /// The next `n` media session setups fail with a network error
    pub fn fail_next_sessions(&self, n: u32) {
        self.inner.state.lock().session_failures += n;
    }

    pub fn stats(&self) -> MemoryStats {
        self.inner.state.lock().stats
    }

    fn session(&self, dc_id: DcId, authorized: bool) -> Arc<dyn UpstreamSession> {
        Arc::new(MemorySession {
            dc_id,
            inner: Arc::clone(&self.inner),
            authorized: AtomicBool::new(authorized),
        })
    }

    async fn delay(&self) {
        let latency = self.inner.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn reference_bytes(media_id: i64, generation: u32) -> Bytes {
    Bytes::from(format!("ref:{media_id}:{generation}"))
}

#[async_trait]
impl UpstreamClient for MemoryUpstream {
    async fn home_dc(&self) -> UpstreamResult<DcId> {
        Ok(self.inner.home)
    }

    fn primary_session(&self) -> Arc<dyn UpstreamSession> {
        self.session(self.inner.home, true)
    }

    async fn export_authorization(&self, dc_id: DcId) -> UpstreamResult<ExportedAuthorization> {
        self.delay().await;
        if dc_id == self.inner.home {
            return Err(UpstreamError::rpc(400, "DC_ID_INVALID"));
        }
        let mut state = self.inner.state.lock();
        state.stats.authorizations_exported += 1;
        let id = state.stats.authorizations_exported as i64;
        state.exported.insert(id, dc_id);
        Ok(ExportedAuthorization {
            id,
            bytes: Bytes::from(format!("auth:{id}:{dc_id}")),
        })
    }

    async fn open_media_session(&self, dc_id: DcId) -> UpstreamResult<Arc<dyn UpstreamSession>> {
        self.delay().await;
        {
            let mut state = self.inner.state.lock();
            if state.session_failures > 0 {
                state.session_failures -= 1;
                return Err(UpstreamError::network("connection refused"));
            }
            state.stats.sessions_opened += 1;
        }
        Ok(self.session(dc_id, false))
    }

    async fn file_metadata(&self, locator: &ObjectLocator) -> UpstreamResult<Option<FileMetadata>> {
        self.delay().await;
        let state = self.inner.state.lock();
        Ok(state
            .objects
            .get(&locator.media_id)
            .map(|object| object.metadata.clone()))
    }
}

struct MemorySession {
    dc_id: DcId,
    inner: Arc<Inner>,
    authorized: AtomicBool,
}

impl MemorySession {
    fn read(&self, locator: &ObjectLocator, offset: u64, limit: u32) -> UpstreamResult<FilePart> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(UpstreamError::rpc(401, "AUTH_KEY_UNREGISTERED"));
        }
        if limit == 0 || offset % limit as u64 != 0 {
            return Err(UpstreamError::rpc(400, "OFFSET_INVALID"));
        }

        let state = self.inner.state.lock();
        let object = state
            .objects
            .get(&locator.media_id)
            .ok_or_else(|| UpstreamError::rpc(400, "MEDIA_EMPTY"))?;
        if object.dc_id != self.dc_id {
            return Err(UpstreamError::rpc(303, format!("FILE_MIGRATE_{}", object.dc_id)));
        }
        if object.reference != locator.file_reference {
            return Err(UpstreamError::FileReferenceExpired);
        }
        if let Some(dc_id) = object.cdn {
            return Ok(FilePart::CdnRedirect { dc_id });
        }

        let len = object.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(limit as u64).min(len) as usize;
        Ok(FilePart::Bytes(object.data.slice(start..end)))
    }
}

#[async_trait]
impl UpstreamSession for MemorySession {
    fn dc_id(&self) -> DcId {
        self.dc_id
    }

    async fn import_authorization(&self, auth: ExportedAuthorization) -> UpstreamResult<()> {
        let valid = self.inner.state.lock().exported.get(&auth.id) == Some(&self.dc_id);
        if !valid {
            return Err(UpstreamError::rpc(400, "AUTH_BYTES_INVALID"));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_file(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        limit: u32,
    ) -> UpstreamResult<FilePart> {
        let (failure, stalled, latency) = {
            let mut state = self.inner.state.lock();
            state.stats.reads += 1;
            let failure = state.read_failures.pop_front();
            let stalled = failure.is_none() && state.stalled_reads > 0;
            if stalled {
                state.stalled_reads -= 1;
            }
            (failure, stalled, state.latency)
        };

        if let Some(error) = failure {
            return Err(error);
        }
        if stalled {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.read(locator, offset, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_aligned_slices() {
        let upstream = MemoryUpstream::new(DcId(1));
        let locator = upstream.insert(DcId(1), (0u8..=99).collect(), FileMetadata::new(100));
        let session = upstream.primary_session();

        let part = session.get_file(&locator, 64, 32).await.unwrap();
        assert_eq!(part, FilePart::Bytes(Bytes::from((64u8..96).collect::<Vec<_>>())));

        let tail = session.get_file(&locator, 96, 32).await.unwrap();
        assert_eq!(tail, FilePart::Bytes(Bytes::from(vec![96u8, 97, 98, 99])));
    }

    #[tokio::test]
    async fn rejects_misaligned_offsets() {
        let upstream = MemoryUpstream::new(DcId(1));
        let locator = upstream.insert(DcId(1), vec![0; 100], FileMetadata::new(100));
        let err = upstream
            .primary_session()
            .get_file(&locator, 10, 32)
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::rpc(400, "OFFSET_INVALID"));
    }

    #[tokio::test]
    async fn foreign_session_needs_imported_authorization() {
        let upstream = MemoryUpstream::new(DcId(1));
        let locator = upstream.insert(DcId(4), vec![1; 64], FileMetadata::new(64));

        let session = upstream.open_media_session(DcId(4)).await.unwrap();
        assert!(session.get_file(&locator, 0, 64).await.is_err());

        let auth = upstream.export_authorization(DcId(4)).await.unwrap();
        session.import_authorization(auth).await.unwrap();
        assert!(session.get_file(&locator, 0, 64).await.is_ok());
    }

    #[tokio::test]
    async fn rotated_reference_invalidates_old_locators() {
        let upstream = MemoryUpstream::new(DcId(1));
        let old = upstream.insert(DcId(1), vec![1; 64], FileMetadata::new(64));
        let new = upstream.rotate_reference(old.media_id).unwrap();
        let session = upstream.primary_session();

        assert_eq!(
            session.get_file(&old, 0, 64).await.unwrap_err(),
            UpstreamError::FileReferenceExpired
        );
        assert!(session.get_file(&new, 0, 64).await.is_ok());
    }
}
