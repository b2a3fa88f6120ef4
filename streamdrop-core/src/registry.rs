use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{ObjectLocator, StreamResult};

/// URL-safe random link identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortId(String);

impl ShortId {
    /// 8 random bytes as unpadded URL-safe base64 (11 characters)
    pub fn generate() -> Self {
        let bytes: [u8; 8] = rand::random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A published link: short id to stored object, owned by one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: String,
    /// Encoded [`ObjectLocator`]
    pub object_ref: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl LinkRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry < now)
    }

    pub fn locator(&self) -> StreamResult<ObjectLocator> {
        ObjectLocator::decode(&self.object_ref)
    }
}

/// Input for [`LinkRegistry::create`]
#[derive(Debug, Clone)]
pub struct NewLink {
    pub object_ref: String,
    pub owner_id: i64,
    pub file_name: Option<String>,
    pub ttl: Option<Duration>,
}

impl NewLink {
    pub fn new(locator: &ObjectLocator, owner_id: i64) -> Self {
        Self {
            object_ref: locator.encode(),
            owner_id,
            file_name: None,
            ttl: None,
        }
    }

    pub fn with_file_name<S: Into<String>>(mut self, name: S) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Expire the link `ttl` after creation
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Build the record under `id`, created at `now`
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> LinkRecord {
        LinkRecord {
            id,
            object_ref: self.object_ref,
            owner_id: self.owner_id,
            created_at: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
            file_name: self.file_name,
        }
    }
}

/// Storage for published links
#[async_trait]
pub trait LinkRegistry: Send + Sync {
    /// Raw record, expired or not
    async fn lookup(&self, id: &str) -> StreamResult<Option<LinkRecord>>;

    /// Store a new link under a fresh [`ShortId`]
    async fn create(&self, link: NewLink) -> StreamResult<LinkRecord>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> StreamResult<bool>;

    /// Unexpired links of `owner_id`, newest first, at most `limit`
    async fn active_for_owner(&self, owner_id: i64, limit: usize) -> StreamResult<Vec<LinkRecord>>;

    /// Drop every record expired at `now`; returns how many were dropped
    async fn purge_expired(&self, now: DateTime<Utc>) -> StreamResult<usize>;
}

/// Outcome of resolving a short id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLookup {
    Active(LinkRecord),
    Expired,
    Missing,
}

impl LinkLookup {
    pub fn into_active(self) -> Option<LinkRecord> {
        match self {
            LinkLookup::Active(record) => Some(record),
            LinkLookup::Expired | LinkLookup::Missing => None,
        }
    }
}

/// Look `id` up and classify it against `now`
pub async fn lookup_active(
    registry: &dyn LinkRegistry,
    id: &str,
    now: DateTime<Utc>,
) -> StreamResult<LinkLookup> {
    Ok(match registry.lookup(id).await? {
        None => LinkLookup::Missing,
        Some(record) if record.is_expired(now) => LinkLookup::Expired,
        Some(record) => LinkLookup::Active(record),
    })
}

/// Link registry kept in process memory
#[derive(Debug, Default)]
pub struct MemoryLinkRegistry {
    links: RwLock<HashMap<String, LinkRecord>>,
}

impl MemoryLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = LinkRecord>>(records: I) -> Self {
        Self {
            links: RwLock::new(records.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Store a record as-is, replacing any record with the same id
    pub fn insert(&self, record: LinkRecord) {
        self.links.write().insert(record.id.clone(), record);
    }

    /// All records, oldest first
    pub fn snapshot(&self) -> Vec<LinkRecord> {
        let mut records: Vec<_> = self.links.read().values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.links.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.read().is_empty()
    }
}

#[async_trait]
impl LinkRegistry for MemoryLinkRegistry {
    async fn lookup(&self, id: &str) -> StreamResult<Option<LinkRecord>> {
        Ok(self.links.read().get(id).cloned())
    }

    async fn create(&self, link: NewLink) -> StreamResult<LinkRecord> {
        let mut links = self.links.write();
        let id = loop {
            let id = ShortId::generate().into_string();
            if !links.contains_key(&id) {
                break id;
            }
        };
        let record = link.into_record(id, Utc::now());
        links.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn delete(&self, id: &str) -> StreamResult<bool> {
        Ok(self.links.write().remove(id).is_some())
    }

    async fn active_for_owner(&self, owner_id: i64, limit: usize) -> StreamResult<Vec<LinkRecord>> {
        let now = Utc::now();
        let mut records: Vec<_> = self
            .links
            .read()
            .values()
            .filter(|r| r.owner_id == owner_id && !r.is_expired(now))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StreamResult<usize> {
        let mut links = self.links.write();
        let before = links.len();
        links.retain(|_, r| !r.is_expired(now));
        Ok(before - links.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DcId;

    fn locator() -> ObjectLocator {
        ObjectLocator::new(DcId(2), 42, 7).with_file_reference(vec![1, 2, 3])
    }

    fn record(id: &str, owner_id: i64, created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> LinkRecord {
        LinkRecord {
            id: id.to_string(),
            object_ref: locator().encode(),
            owner_id,
            created_at,
            expires_at,
            file_name: None,
        }
    }

    #[test]
    fn short_ids_are_url_safe_tokens() {
        let id = ShortId::generate();
        assert_eq!(id.as_str().len(), 11);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(id, ShortId::generate());
    }

    #[tokio::test]
    async fn create_then_lookup() {
        let registry = MemoryLinkRegistry::new();
        let created = registry
            .create(NewLink::new(&locator(), 9).with_file_name("clip.mp4"))
            .await
            .unwrap();

        let found = registry.lookup(&created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.locator().unwrap(), locator());
        assert_eq!(found.expires_at, None);
    }

    #[tokio::test]
    async fn lookup_active_classifies_records() {
        let now = Utc::now();
        let registry = MemoryLinkRegistry::from_records([
            record("live", 1, now, Some(now + Duration::hours(1))),
            record("old", 1, now - Duration::days(2), Some(now - Duration::days(1))),
            record("forever", 1, now, None),
        ]);

        assert!(matches!(lookup_active(&registry, "live", now).await.unwrap(), LinkLookup::Active(_)));
        assert!(matches!(lookup_active(&registry, "forever", now).await.unwrap(), LinkLookup::Active(_)));
        assert_eq!(lookup_active(&registry, "old", now).await.unwrap(), LinkLookup::Expired);
        assert_eq!(lookup_active(&registry, "nope", now).await.unwrap(), LinkLookup::Missing);
    }

    #[tokio::test]
    async fn owner_listing_is_newest_first_and_skips_expired() {
        let now = Utc::now();
        let registry = MemoryLinkRegistry::from_records([
            record("a", 1, now - Duration::minutes(3), None),
            record("b", 1, now - Duration::minutes(1), None),
            record("c", 1, now - Duration::minutes(2), Some(now - Duration::seconds(5))),
            record("d", 2, now, None),
        ]);

        let ids: Vec<_> = registry
            .active_for_owner(1, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(registry.active_for_owner(1, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_and_delete() {
        let now = Utc::now();
        let registry = MemoryLinkRegistry::from_records([
            record("keep", 1, now, None),
            record("gone", 1, now, Some(now - Duration::seconds(1))),
        ]);

        assert_eq!(registry.purge_expired(now).await.unwrap(), 1);
        assert!(registry.delete("keep").await.unwrap());
        assert!(!registry.delete("keep").await.unwrap());
        assert!(registry.is_empty());
    }
}
