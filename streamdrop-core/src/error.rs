use thiserror::Error;

use crate::upstream::UpstreamError;
use crate::DcId;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while resolving or streaming a link
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Link expired or invalid: {id}")]
    NotFound { id: String },

    #[error("Requested range not satisfiable for {total_size} bytes")]
    RangeNotSatisfiable { total_size: u64 },

    #[error("Upstream unavailable at offset {offset} after {attempts} attempts")]
    TransientUpstream {
        offset: u64,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("Object reference rejected by upstream for media {media_id}")]
    StaleReference { media_id: i64 },

    #[error("No upstream client available to stream")]
    PoolExhausted,

    #[error("Session to dc {dc_id} unavailable after {attempts} attempts")]
    SessionUnavailable {
        dc_id: DcId,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    #[error("Upstream returned {actual} bytes at offset {offset}, expected at least {expected}")]
    Truncated {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported upstream response: {what}")]
    Unsupported { what: String },

    #[error("Upstream request failed")]
    Upstream {
        #[source]
        source: UpstreamError,
    },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Link registry failure")]
    Registry {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Transport-level classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,          // 400
    NotFound,            // 404
    RangeNotSatisfiable, // 416
    GeneralError,        // 500
    Unavailable,         // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::RangeNotSatisfiable => 416,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::RangeNotSatisfiable => "RangeNotSatisfiable",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::RangeNotSatisfiable => "range-not-satisfiable",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl StreamError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create an unsupported upstream response error
    pub fn unsupported<S: Into<String>>(what: S) -> Self {
        Self::Unsupported { what: what.into() }
    }

    /// Create a registry error from any error type
    pub fn registry<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Registry {
            source: Box::new(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::NotFound { .. } => ErrorKind::NotFound,
            StreamError::RangeNotSatisfiable { .. } => ErrorKind::RangeNotSatisfiable,
            StreamError::PoolExhausted | StreamError::SessionUnavailable { .. } => {
                ErrorKind::Unavailable
            }
            StreamError::Invalid { .. } => ErrorKind::BadRequest,
            StreamError::TransientUpstream { .. }
            | StreamError::StaleReference { .. }
            | StreamError::Truncated { .. }
            | StreamError::Unsupported { .. }
            | StreamError::Upstream { .. }
            | StreamError::Registry { .. }
            | StreamError::Io { .. } => ErrorKind::GeneralError,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Message that is safe to return to HTTP clients.
    ///
    /// Server-side failures collapse to a generic message so upstream details
    /// stay in the logs.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::NotFound => "Link expired or invalid.".to_string(),
            ErrorKind::GeneralError => "Streaming failed.".to_string(),
            _ => self.to_string(),
        }
    }

    /// Feathers-style JSON payload: `name`, `message`, `code`, `className`.
    pub fn to_json(&self) -> serde_json::Value {
        let kind = self.kind();
        serde_json::json!({
            "name": kind.name(),
            "message": self.client_message(),
            "code": kind.status_code(),
            "className": kind.class_name(),
        })
    }
}
