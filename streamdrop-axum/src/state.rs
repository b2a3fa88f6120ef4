use std::sync::Arc;

use streamdrop_core::MediaStreamer;

/// Router state shared by every handler
#[derive(Clone)]
pub struct StreamState {
    pub streamer: Arc<MediaStreamer>,
    /// Public origin used to build download links, without a trailing `/`
    pub base_url: Arc<str>,
}

impl StreamState {
    pub fn new<S: AsRef<str>>(streamer: Arc<MediaStreamer>, base_url: S) -> Self {
        Self {
            streamer,
            base_url: Arc::from(base_url.as_ref().trim_end_matches('/')),
        }
    }
}
