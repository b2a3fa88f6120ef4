use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use uuid::Uuid;

/// Stream of bytes handed to the HTTP body writer
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Upstream partition that owns an object and the session able to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DcId(pub u32);

impl std::fmt::Display for DcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File metadata as reported by the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

impl FileMetadata {
    pub const DEFAULT_MIME_TYPE: &'static str = "application/octet-stream";
    pub const DEFAULT_FILE_NAME: &'static str = "file";

    pub fn new(size: u64) -> Self {
        Self {
            size,
            mime_type: None,
            file_name: None,
        }
    }

    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Mime type, falling back to `application/octet-stream`
    pub fn content_type(&self) -> &str {
        self.mime_type
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(Self::DEFAULT_MIME_TYPE)
    }

    /// Display name, falling back to `file`
    pub fn display_name(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(Self::DEFAULT_FILE_NAME)
    }

    /// Whether the object can be played inline (video or audio)
    pub fn is_media(&self) -> bool {
        let mime = self.content_type();
        mime.starts_with("video/") || mime.starts_with("audio/")
    }
}

/// Per-request context carried through logs
#[derive(Debug, Clone)]
pub struct StreamCtx {
    pub link_id: String,
    pub request_id: String,
}

impl StreamCtx {
    pub fn new<S: Into<String>>(link_id: S) -> Self {
        Self {
            link_id: link_id.into(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }
}
