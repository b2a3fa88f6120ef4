use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use streamdrop_core::{LinkRecord, LinkRegistry, MemoryLinkRegistry, NewLink, StreamError, StreamResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Link registry kept in memory and written back to a JSON file on change.
///
/// The file holds an array of [`LinkRecord`]s, oldest first. Writes go to a
/// sibling temporary file which is then renamed over the original.
#[derive(Debug)]
pub struct JsonFileLinkRegistry {
    path: PathBuf,
    links: MemoryLinkRegistry,
    write_lock: Mutex<()>,
}

impl JsonFileLinkRegistry {
    /// Load the registry from `path`; a missing file is an empty registry
    pub async fn load<P: Into<PathBuf>>(path: P) -> StreamResult<Self> {
        let path = path.into();
        let records: Vec<LinkRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StreamError::registry)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), links = records.len(), "loaded link registry");

        Ok(Self {
            path,
            links: MemoryLinkRegistry::from_records(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> Vec<LinkRecord> {
        self.links.snapshot()
    }

    async fn persist(&self) -> StreamResult<()> {
        let _guard = self.write_lock.lock().await;
        let records = self.links.snapshot();
        let json = serde_json::to_vec_pretty(&records).map_err(StreamError::registry)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), links = records.len(), "persisted link registry");
        Ok(())
    }
}

#[async_trait]
impl LinkRegistry for JsonFileLinkRegistry {
    async fn lookup(&self, id: &str) -> StreamResult<Option<LinkRecord>> {
        self.links.lookup(id).await
    }

    async fn create(&self, link: NewLink) -> StreamResult<LinkRecord> {
        let record = self.links.create(link).await?;
        if let Err(e) = self.persist().await {
            self.links.delete(&record.id).await?;
            warn!(link = %record.id, error = %e, "link not saved, dropped");
            return Err(e);
        }
        Ok(record)
    }

    async fn delete(&self, id: &str) -> StreamResult<bool> {
        let Some(record) = self.links.lookup(id).await? else {
            return Ok(false);
        };
        self.links.delete(id).await?;
        if let Err(e) = self.persist().await {
            self.links.insert(record);
            warn!(link = %id, error = %e, "deletion not saved, link restored");
            return Err(e);
        }
        Ok(true)
    }

    async fn active_for_owner(&self, owner_id: i64, limit: usize) -> StreamResult<Vec<LinkRecord>> {
        self.links.active_for_owner(owner_id, limit).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StreamResult<usize> {
        let expired: Vec<_> = self
            .links
            .snapshot()
            .into_iter()
            .filter(|r| r.is_expired(now))
            .collect();
        let purged = self.links.purge_expired(now).await?;
        if purged > 0 {
            if let Err(e) = self.persist().await {
                expired.into_iter().for_each(|r| self.links.insert(r));
                warn!(error = %e, "purge not saved, links restored");
                return Err(e);
            }
        }
        Ok(purged)
    }
}
