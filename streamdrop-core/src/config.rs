use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{StreamError, StreamResult};

/// Configuration for the streaming engine
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Size of one upstream read. Must be a power of two.
    pub chunk_size: u32,

    /// Retry policy for a single chunk read
    pub fetch_retry: RetryPolicy,

    /// Retry policy for creating a datacenter session
    pub session_retry: RetryPolicy,

    /// Upper bound for one chunk read attempt. `None` waits forever.
    pub chunk_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024, // 1 MiB
            fetch_retry: RetryPolicy::fixed(5, Duration::from_millis(500)),
            session_retry: RetryPolicy::fixed(3, Duration::from_millis(500)),
            chunk_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl StreamConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set chunk size
    pub fn with_chunk_size(mut self, bytes: u32) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Set the chunk read retry policy
    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    /// Set the session creation retry policy
    pub fn with_session_retry(mut self, policy: RetryPolicy) -> Self {
        self.session_retry = policy;
        self
    }

    /// Bound each chunk read attempt
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    /// Let chunk reads wait on the upstream indefinitely
    pub fn without_chunk_timeout(mut self) -> Self {
        self.chunk_timeout = None;
        self
    }

    pub fn validate(&self) -> StreamResult<()> {
        if !self.chunk_size.is_power_of_two() {
            return Err(StreamError::invalid(format!(
                "chunk size must be a positive power of two, got {}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}
