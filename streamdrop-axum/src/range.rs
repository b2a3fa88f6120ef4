//! `Range` request header parsing.
//!
//! Only a single `bytes=<start>-[<end>]` range is understood. Suffix ranges
//! (`bytes=-500`), multiple ranges and other units are rejected, and so is
//! anything that does not parse; the endpoint answers all of them with 416.

use axum::http::HeaderValue;
use streamdrop_core::RangeRequest;

/// The header could not be turned into a single byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedRange;

pub fn parse_range(value: &HeaderValue) -> Result<RangeRequest, MalformedRange> {
    let value = value.to_str().map_err(|_| MalformedRange)?;
    parse_range_str(value)
}

pub fn parse_range_str(value: &str) -> Result<RangeRequest, MalformedRange> {
    let byte_range = value.trim().strip_prefix("bytes=").ok_or(MalformedRange)?.trim();
    if byte_range.contains(',') {
        return Err(MalformedRange);
    }

    // The separator is the first '-' after the first character, so a
    // negative start still parses and is then rejected as unsatisfiable.
    let dash = byte_range
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i)
        .ok_or(MalformedRange)?;
    let (start, end) = (&byte_range[..dash], &byte_range[dash + 1..]);

    let start = start.trim().parse::<i64>().map_err(|_| MalformedRange)?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse::<i64>().map_err(|_| MalformedRange)?),
    };
    Ok(RangeRequest::new(start, end))
}
