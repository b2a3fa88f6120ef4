//! Object locator and its registry encoding.
//!
//! The registry stores a locator as an URL-safe, unpadded base64 string of a
//! small versioned binary layout:
//!
//! ```text
//! u8    version (2)
//! u32   dc id            (LE)
//! i64   media id         (LE)
//! i64   access hash      (LE)
//! u32   reference length (LE), then the reference bytes
//! u32   size tag length  (LE), then the tag (UTF-8)
//! ```
//!
//! Version 1 used single-byte length prefixes and is still decoded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DcId, StreamError, StreamResult};

const LOCATOR_VERSION: u8 = 2;
const LEGACY_VERSION: u8 = 1;

/// Identifies a remote binary object and the datacenter holding it.
///
/// Decoded once per stream request and never mutated afterwards. A stale
/// `file_reference` is the expected cause of upstream rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocator {
    pub dc_id: DcId,
    pub media_id: i64,
    pub access_hash: i64,
    pub file_reference: Bytes,
    pub thumb_size: String,
}

impl ObjectLocator {
    pub fn new(dc_id: DcId, media_id: i64, access_hash: i64) -> Self {
        Self {
            dc_id,
            media_id,
            access_hash,
            file_reference: Bytes::new(),
            thumb_size: String::new(),
        }
    }

    pub fn with_file_reference<B: Into<Bytes>>(mut self, reference: B) -> Self {
        self.file_reference = reference.into();
        self
    }

    pub fn with_thumb_size<S: Into<String>>(mut self, tag: S) -> Self {
        self.thumb_size = tag.into();
        self
    }

    /// Encode into the registry string form
    pub fn encode(&self) -> String {
        let mut buf = BytesMut::with_capacity(
            1 + 4 + 8 + 8 + 4 + 4 + self.file_reference.len() + self.thumb_size.len(),
        );
        buf.put_u8(LOCATOR_VERSION);
        buf.put_u32_le(self.dc_id.0);
        buf.put_i64_le(self.media_id);
        buf.put_i64_le(self.access_hash);
        put_field(&mut buf, &self.file_reference);
        put_field(&mut buf, self.thumb_size.as_bytes());
        URL_SAFE_NO_PAD.encode(buf)
    }

    /// Decode the registry string form
    pub fn decode(encoded: &str) -> StreamResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| StreamError::invalid(format!("locator is not valid base64: {e}")))?;
        let mut buf = Bytes::from(raw);

        if buf.remaining() < 1 + 4 + 8 + 8 {
            return Err(StreamError::invalid("locator is truncated"));
        }
        let version = buf.get_u8();
        if version != LOCATOR_VERSION && version != LEGACY_VERSION {
            return Err(StreamError::invalid(format!(
                "unsupported locator version {version}"
            )));
        }
        let dc_id = DcId(buf.get_u32_le());
        let media_id = buf.get_i64_le();
        let access_hash = buf.get_i64_le();
        let file_reference = take_field(&mut buf, version)?;
        let thumb_size = String::from_utf8(take_field(&mut buf, version)?.to_vec())
            .map_err(|_| StreamError::invalid("locator size tag is not UTF-8"))?;

        if buf.has_remaining() {
            return Err(StreamError::invalid("trailing bytes after locator"));
        }

        Ok(Self {
            dc_id,
            media_id,
            access_hash,
            file_reference,
            thumb_size,
        })
    }
}

fn put_field(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn take_field(buf: &mut Bytes, version: u8) -> StreamResult<Bytes> {
    let prefix = if version == LEGACY_VERSION { 1 } else { 4 };
    if buf.remaining() < prefix {
        return Err(StreamError::invalid("locator is truncated"));
    }
    let len = if version == LEGACY_VERSION {
        buf.get_u8() as usize
    } else {
        buf.get_u32_le() as usize
    };
    if buf.remaining() < len {
        return Err(StreamError::invalid("locator is truncated"));
    }
    Ok(buf.split_to(len))
}
