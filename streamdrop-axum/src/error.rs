use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use streamdrop_core::{ErrorKind, StreamError};
use tracing::{error, warn};

#[derive(Debug)]
pub struct StreamAxumError(pub StreamError);

impl From<StreamError> for StreamAxumError {
    fn from(e: StreamError) -> Self {
        Self(e)
    }
}

impl IntoResponse for StreamAxumError {
    fn into_response(self) -> Response {
        let err = self.0;
        match err.kind() {
            ErrorKind::GeneralError => error!(error = %err, "request failed"),
            ErrorKind::Unavailable => warn!(error = %err, "no upstream available"),
            _ => {}
        }

        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut res = (status, Json(err.to_json())).into_response();

        if let StreamError::RangeNotSatisfiable { total_size } = err {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total_size}")) {
                res.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfiable_range_reports_the_size() {
        let res = StreamAxumError(StreamError::RangeNotSatisfiable { total_size: 1234 }).into_response();
        assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(res.headers()[header::CONTENT_RANGE], "bytes */1234");
    }

    #[test]
    fn pool_exhaustion_is_503() {
        let res = StreamAxumError(StreamError::PoolExhausted).into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(res.headers().get(header::CONTENT_RANGE).is_none());
    }
}
