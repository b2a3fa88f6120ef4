use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use streamdrop_core::media::{mask_filename, readable_size, safe_file_name, PlayerLinks};
use streamdrop_core::{OpenedStream, ResolvedLink, StreamCtx, StreamError};
use tracing::debug;

use crate::page::ShowPage;
use crate::range::parse_range;
use crate::{StreamAxumError, StreamState};

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is healthy and running!",
    }))
}

/// `GET /dl/{id}/{file_name}`. The file name segment is cosmetic.
pub async fn download(
    State(state): State<StreamState>,
    Path((id, _file_name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, StreamAxumError> {
    let mut ctx = StreamCtx::new(&id);
    if let Some(request_id) = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_request_id(request_id);
    }

    let range = match headers.get(header::RANGE).map(parse_range) {
        None => None,
        Some(Ok(range)) => Some(range),
        Some(Err(_)) => {
            // Unknown links still answer 404 whatever the range looks like.
            let link = state.streamer.describe(&id).await?;
            debug!(link = %id, "unparseable range header");
            return Err(StreamError::RangeNotSatisfiable {
                total_size: link.metadata.size,
            }
            .into());
        }
    };

    let opened = state.streamer.open(&ctx, range).await?;
    Ok(stream_response(opened))
}

fn stream_response(opened: OpenedStream) -> Response {
    let status = if opened.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let disposition = format!(
        "inline; filename=\"{}\"",
        safe_file_name(opened.metadata.display_name())
    );

    let mut res = Response::new(Body::from_stream(opened.body));
    *res.status_mut() = status;

    let headers = res.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(opened.metadata.content_type())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(opened.content_length));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_bytes(disposition.as_bytes()).unwrap_or(HeaderValue::from_static("inline")),
    );
    if let Some(range) = opened.content_range {
        if let Ok(value) = HeaderValue::from_str(&range.to_string()) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
    res
}

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_size: String,
    pub is_media: bool,
    #[serde(flatten)]
    pub links: PlayerLinks,
}

impl FileInfo {
    fn new(base_url: &str, link: &ResolvedLink) -> Self {
        let metadata = &link.metadata;
        Self {
            file_name: metadata.display_name().to_string(),
            file_size: readable_size(metadata.size),
            is_media: metadata.is_media(),
            links: PlayerLinks::new(
                base_url,
                &link.record.id,
                metadata.display_name(),
                metadata.content_type(),
            ),
        }
    }
}

/// `GET /api/file/{id}`
pub async fn file_info(
    State(state): State<StreamState>,
    Path(id): Path<String>,
) -> Result<Json<FileInfo>, StreamAxumError> {
    let link = state.streamer.describe(&id).await?;
    Ok(Json(FileInfo::new(&state.base_url, &link)))
}

/// `GET /show/{id}`
pub async fn show(
    State(state): State<StreamState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StreamAxumError> {
    let link = state.streamer.describe(&id).await?;
    let info = FileInfo::new(&state.base_url, &link);
    let masked = mask_filename(&info.file_name);

    let page = ShowPage {
        file_name: &masked,
        file_size: &info.file_size,
        mime_type: link.metadata.content_type(),
        is_media: info.is_media,
        links: &info.links,
    };
    Ok(Html(page.render()))
}
