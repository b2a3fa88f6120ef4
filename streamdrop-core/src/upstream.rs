use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::retry::{RetryHint, Retryable};
use crate::{DcId, FileMetadata, ObjectLocator};

/// Result type for calls into the upstream object store
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Failures reported by an upstream client or session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// Rate limited: the upstream asks us to wait before the next call
    #[error("rate limited, must wait {seconds}s")]
    FloodWait { seconds: u64 },

    /// The locator's reference bytes were rotated upstream
    #[error("file reference expired")]
    FileReferenceExpired,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },
}

impl UpstreamError {
    pub fn rpc<S: Into<String>>(code: i32, message: S) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }
}

impl Retryable for UpstreamError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            UpstreamError::FloodWait { seconds } => {
                RetryHint::After(Duration::from_secs(seconds.saturating_add(1)))
            }
            UpstreamError::FileReferenceExpired => RetryHint::Never,
            UpstreamError::Timeout(_) | UpstreamError::Network(_) => RetryHint::Backoff,
            // Negative codes are transport-level failures; 5xx are server side.
            UpstreamError::Rpc { code, .. } if *code < 0 || *code >= 500 => RetryHint::Backoff,
            UpstreamError::Rpc { .. } => RetryHint::Never,
        }
    }
}

/// Authorization exported from the home datacenter for use on another one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedAuthorization {
    pub id: i64,
    pub bytes: Bytes,
}

/// Response to a single chunk read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePart {
    Bytes(Bytes),
    /// The object must be fetched from an alternate source. Not supported.
    CdnRedirect { dc_id: DcId },
}

/// An authenticated transport session bound to one datacenter
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    fn dc_id(&self) -> DcId;

    async fn import_authorization(&self, auth: ExportedAuthorization) -> UpstreamResult<()>;

    /// Read `limit` bytes at `offset`. `offset` is always a multiple of `limit`.
    async fn get_file(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        limit: u32,
    ) -> UpstreamResult<FilePart>;
}

/// A session-owning connection to the object store
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Datacenter the client is logged into
    async fn home_dc(&self) -> UpstreamResult<DcId>;

    /// Session to the home datacenter
    fn primary_session(&self) -> Arc<dyn UpstreamSession>;

    async fn export_authorization(&self, dc_id: DcId) -> UpstreamResult<ExportedAuthorization>;

    /// Negotiate a key with `dc_id` and start an unauthorized media session on it
    async fn open_media_session(&self, dc_id: DcId) -> UpstreamResult<Arc<dyn UpstreamSession>>;

    /// Size, mime type and name of the object, `None` if it no longer exists
    async fn file_metadata(&self, locator: &ObjectLocator) -> UpstreamResult<Option<FileMetadata>>;
}
