//! Translation of an HTTP byte range into aligned chunk reads.

use std::ops::Range;

use crate::{StreamError, StreamResult};

/// Byte range as requested by the client, before validation.
///
/// `start` is signed so that a negative offset can be rejected as
/// unsatisfiable instead of failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub start: i64,
    pub end: Option<i64>, // None means "to end of file"
}

impl RangeRequest {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: i64) -> Self {
        Self { start, end: None }
    }

    /// Resolve against the object size into an inclusive `(start, end)`.
    pub fn resolve(&self, total_size: u64) -> StreamResult<(u64, u64)> {
        let unsatisfiable = StreamError::RangeNotSatisfiable { total_size };
        if self.start < 0 || total_size == 0 {
            return Err(unsatisfiable);
        }
        let start = self.start as u64;
        let end = match self.end {
            Some(end) if end < 0 => return Err(unsatisfiable),
            Some(end) => end as u64,
            None => total_size - 1,
        };
        if end >= total_size || start > end {
            return Err(unsatisfiable);
        }
        Ok((start, end))
    }
}

/// Value of a `Content-Range` header: `bytes start-end/total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
}

impl std::fmt::Display for ContentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total_size)
    }
}

/// Chunk plan for one request. Derived once, never mutated.
///
/// Chunks are numbered from 1. Chunk `i` starts at
/// `aligned_offset + (i - 1) * chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPlan {
    pub start_byte: u64,
    pub end_byte: u64,
    pub total_size: u64,
    pub chunk_size: u64,
    pub aligned_offset: u64,
    /// Bytes dropped from the front of the first chunk
    pub leading_trim: u64,
    /// Position just past the last wanted byte within the last chunk
    pub trailing_trim: u64,
    pub chunk_count: u64,
}

impl StreamPlan {
    /// Plan the inclusive span `[start_byte, end_byte]`.
    ///
    /// Requires `0 <= start_byte <= end_byte < total_size`; callers reject
    /// anything else as unsatisfiable before planning.
    pub fn new(start_byte: u64, end_byte: u64, total_size: u64, chunk_size: u64) -> StreamResult<Self> {
        if chunk_size == 0 {
            return Err(StreamError::invalid("chunk size must be positive"));
        }
        if start_byte > end_byte || end_byte >= total_size {
            return Err(StreamError::RangeNotSatisfiable { total_size });
        }

        let aligned_offset = start_byte - (start_byte % chunk_size);
        let leading_trim = start_byte - aligned_offset;
        let trailing_trim = (end_byte % chunk_size) + 1;
        let requested_len = end_byte - start_byte + 1;
        let chunk_count = (requested_len + leading_trim).div_ceil(chunk_size);

        Ok(Self {
            start_byte,
            end_byte,
            total_size,
            chunk_size,
            aligned_offset,
            leading_trim,
            trailing_trim,
            chunk_count,
        })
    }

    /// Plan the whole object
    pub fn full(total_size: u64, chunk_size: u64) -> StreamResult<Self> {
        if total_size == 0 {
            return Err(StreamError::RangeNotSatisfiable { total_size });
        }
        Self::new(0, total_size - 1, total_size, chunk_size)
    }

    pub fn content_length(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }

    pub fn content_range(&self) -> ContentRange {
        ContentRange {
            start: self.start_byte,
            end: self.end_byte,
            total_size: self.total_size,
        }
    }

    /// Upstream offset of the 1-based chunk `index`
    pub fn chunk_offset(&self, index: u64) -> u64 {
        self.aligned_offset + (index - 1) * self.chunk_size
    }

    /// Part of chunk `index` that belongs to the response.
    ///
    /// The first chunk loses `leading_trim` bytes from its start, the last is
    /// cut at `trailing_trim`, a chunk that is both gets both cuts and interior
    /// chunks pass through whole. Returns `None` when the upstream returned
    /// fewer bytes than the plan needs from this chunk.
    pub fn slice_bounds(&self, index: u64, chunk_len: usize) -> Option<Range<usize>> {
        let start = if index == 1 { self.leading_trim } else { 0 };
        let end = if index == self.chunk_count {
            self.trailing_trim
        } else {
            self.chunk_size
        };
        let (start, end) = (start as usize, end as usize);
        if end > chunk_len || start >= end {
            return None;
        }
        Some(start..end)
    }

    /// Bytes the upstream must return for chunk `index` to satisfy the plan
    pub fn required_len(&self, index: u64) -> usize {
        if index == self.chunk_count {
            self.trailing_trim as usize
        } else {
            self.chunk_size as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1_048_576;

    #[test]
    fn whole_object_chunk_count() {
        let plan = StreamPlan::full(10_000_000, MIB).unwrap();
        assert_eq!(plan.chunk_count, 10);
        assert_eq!(plan.aligned_offset, 0);
        assert_eq!(plan.leading_trim, 0);
        assert_eq!(plan.trailing_trim, (9_999_999 % MIB) + 1);
        assert_eq!(plan.content_length(), 10_000_000);
    }

    #[test]
    fn single_chunk_gets_both_cuts() {
        let plan = StreamPlan::new(100, 200, 5_000, 1024).unwrap();
        assert_eq!(plan.chunk_count, 1);
        assert_eq!(plan.slice_bounds(1, 1024), Some(100..201));
    }

    #[test]
    fn small_range_crossing_a_boundary_needs_two_chunks() {
        let plan = StreamPlan::new(1000, 1100, 5_000, 1024).unwrap();
        assert_eq!(plan.chunk_count, 2);
        assert_eq!(plan.chunk_offset(1), 0);
        assert_eq!(plan.chunk_offset(2), 1024);
        assert_eq!(plan.slice_bounds(1, 1024), Some(1000..1024));
        assert_eq!(plan.slice_bounds(2, 1024), Some(0..77));
    }

    #[test]
    fn interior_chunks_pass_through() {
        let plan = StreamPlan::new(10, 5000, 6000, 1024).unwrap();
        assert_eq!(plan.chunk_count, 5);
        assert_eq!(plan.slice_bounds(3, 1024), Some(0..1024));
    }

    #[test]
    fn short_upstream_chunk_is_detected() {
        let plan = StreamPlan::new(0, 4095, 8192, 1024).unwrap();
        assert_eq!(plan.slice_bounds(2, 512), None);
        assert_eq!(plan.required_len(2), 1024);
    }

    #[test]
    fn range_request_resolution() {
        assert_eq!(RangeRequest::from_start(0).resolve(10).unwrap(), (0, 9));
        assert_eq!(RangeRequest::new(2, Some(5)).resolve(10).unwrap(), (2, 5));
        assert!(RangeRequest::from_start(-1).resolve(10).is_err());
        assert!(RangeRequest::new(0, Some(10)).resolve(10).is_err());
        assert!(RangeRequest::new(6, Some(5)).resolve(10).is_err());
        assert!(RangeRequest::from_start(0).resolve(0).is_err());
    }

    #[test]
    fn content_range_header_value() {
        let plan = StreamPlan::new(5, 9, 100, 1024).unwrap();
        assert_eq!(plan.content_range().to_string(), "bytes 5-9/100");
    }
}
