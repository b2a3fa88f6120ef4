use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use streamdrop_core::MediaStreamer;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::StreamState;

/// The streaming routes with their middleware stack
#[derive(Clone)]
pub struct StreamApp {
    pub state: StreamState,
    pub router: Router<()>,
}

impl StreamApp {
    pub fn new<S: AsRef<str>>(streamer: Arc<MediaStreamer>, base_url: S) -> Self {
        let state = StreamState::new(streamer, base_url);
        let router = Router::new()
            .route("/", get(routes::health))
            .route("/dl/{id}/{file_name}", get(routes::download))
            .route("/api/file/{id}", get(routes::file_info))
            .route("/show/{id}", get(routes::show))
            .with_state(state.clone())
            .layer(CorsLayer::permissive())
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            );

        Self { state, router }
    }

    pub async fn listen<A>(self, addr: A) -> anyhow::Result<()>
    where
        A: ToSocketAddrs,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router).await?;
        Ok(())
    }
}

pub fn stream_app<S: AsRef<str>>(streamer: Arc<MediaStreamer>, base_url: S) -> StreamApp {
    StreamApp::new(streamer, base_url)
}
