//! Upstream backed by a local media directory.
//!
//! Every regular file directly under the root is an object on datacenter 1.
//! A locator carries the file name as its reference, the file length as its
//! media id and the modification time as its access hash, so replacing a
//! file invalidates the links published for the old contents.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use streamdrop_core::upstream::{
    ExportedAuthorization, FilePart, UpstreamClient, UpstreamError, UpstreamResult, UpstreamSession,
};
use streamdrop_core::{DcId, FileMetadata, ObjectLocator};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

pub const MEDIA_DC: DcId = DcId(1);

#[derive(Debug, Clone)]
pub struct FsUpstream {
    root: Arc<PathBuf>,
}

impl FsUpstream {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Locator and metadata for `file_name` as it is on disk right now
    pub async fn locate(&self, file_name: &str) -> std::io::Result<(ObjectLocator, FileMetadata)> {
        let path = self.path_for(file_name.as_bytes()).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a plain file name")
        })?;
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"));
        }

        let locator = ObjectLocator::new(MEDIA_DC, meta.len() as i64, modified_secs(&meta))
            .with_file_reference(Bytes::copy_from_slice(file_name.as_bytes()));
        Ok((locator, file_metadata(file_name, meta.len())))
    }

    /// Names of the regular files under the root, sorted
    pub async fn list(&self) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.as_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path named by a reference; `None` unless it is a single plain component
    fn path_for(&self, reference: &[u8]) -> Option<PathBuf> {
        let name = std::str::from_utf8(reference).ok()?;
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        plain.then(|| self.root.join(name))
    }

    /// Current on-disk state of the object, checked against the locator
    async fn open_checked(&self, locator: &ObjectLocator) -> UpstreamResult<(PathBuf, std::fs::Metadata)> {
        let path = self
            .path_for(&locator.file_reference)
            .ok_or(UpstreamError::FileReferenceExpired)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UpstreamError::FileReferenceExpired)
            }
            Err(e) => return Err(UpstreamError::network(e.to_string())),
        };
        if meta.len() as i64 != locator.media_id || modified_secs(&meta) != locator.access_hash {
            debug!(path = %path.display(), "file changed since the link was published");
            return Err(UpstreamError::FileReferenceExpired);
        }
        Ok((path, meta))
    }
}

fn modified_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn file_metadata(file_name: &str, size: u64) -> FileMetadata {
    let mut metadata = FileMetadata::new(size).with_file_name(file_name);
    if let Some(mime) = mime_for(file_name) {
        metadata = metadata.with_mime_type(mime);
    }
    metadata
}

fn mime_for(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => return None,
    })
}

#[async_trait]
impl UpstreamClient for FsUpstream {
    async fn home_dc(&self) -> UpstreamResult<DcId> {
        Ok(MEDIA_DC)
    }

    fn primary_session(&self) -> Arc<dyn UpstreamSession> {
        Arc::new(FsSession {
            upstream: self.clone(),
        })
    }

    async fn export_authorization(&self, _dc_id: DcId) -> UpstreamResult<ExportedAuthorization> {
        Err(UpstreamError::rpc(400, "DC_ID_INVALID"))
    }

    async fn open_media_session(&self, _dc_id: DcId) -> UpstreamResult<Arc<dyn UpstreamSession>> {
        Err(UpstreamError::rpc(400, "DC_ID_INVALID"))
    }

    async fn file_metadata(&self, locator: &ObjectLocator) -> UpstreamResult<Option<FileMetadata>> {
        let Some(path) = self.path_for(&locator.file_reference) else {
            return Ok(None);
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {
                let name = String::from_utf8_lossy(&locator.file_reference);
                Ok(Some(file_metadata(&name, meta.len())))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(UpstreamError::network(e.to_string())),
        }
    }
}

struct FsSession {
    upstream: FsUpstream,
}

#[async_trait]
impl UpstreamSession for FsSession {
    fn dc_id(&self) -> DcId {
        MEDIA_DC
    }

    async fn import_authorization(&self, _auth: ExportedAuthorization) -> UpstreamResult<()> {
        Ok(())
    }

    async fn get_file(
        &self,
        locator: &ObjectLocator,
        offset: u64,
        limit: u32,
    ) -> UpstreamResult<FilePart> {
        let (path, _) = self.upstream.open_checked(locator).await?;
        let io = |e: std::io::Error| UpstreamError::network(e.to_string());

        let mut file = tokio::fs::File::open(&path).await.map_err(io)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io)?;
        let mut buf = Vec::with_capacity(limit as usize);
        file.take(limit as u64).read_to_end(&mut buf).await.map_err(io)?;
        Ok(FilePart::Bytes(Bytes::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_chunks_of_a_published_file() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(dir.path().join("clip.mp4"), &data).unwrap();

        let upstream = FsUpstream::new(dir.path());
        let (locator, metadata) = upstream.locate("clip.mp4").await.unwrap();
        assert_eq!(metadata.size, 3000);
        assert_eq!(metadata.content_type(), "video/mp4");

        let session = upstream.primary_session();
        let part = session.get_file(&locator, 2048, 1024).await.unwrap();
        assert_eq!(part, FilePart::Bytes(Bytes::copy_from_slice(&data[2048..])));
    }

    #[tokio::test]
    async fn replaced_file_is_a_stale_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"first").unwrap();
        let upstream = FsUpstream::new(dir.path());
        let (locator, _) = upstream.locate("a.bin").await.unwrap();

        std::fs::write(dir.path().join("a.bin"), b"second version").unwrap();
        let err = upstream.primary_session().get_file(&locator, 0, 1024).await.unwrap_err();
        assert_eq!(err, UpstreamError::FileReferenceExpired);
    }

    #[tokio::test]
    async fn refuses_paths_outside_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = FsUpstream::new(dir.path());
        assert!(upstream.locate("../etc/passwd").await.is_err());

        let locator = ObjectLocator::new(MEDIA_DC, 1, 1).with_file_reference(&b"../secret"[..]);
        assert_eq!(upstream.file_metadata(&locator).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lists_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"b").unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names = FsUpstream::new(dir.path()).list().await.unwrap();
        assert_eq!(names, ["a.mp4", "b.mp3"]);
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for("x.MKV"), Some("video/x-matroska"));
        assert_eq!(mime_for("noext"), None);
    }
}
