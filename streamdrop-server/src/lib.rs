//! Standalone streamdrop server.
//!
//! Serves the files of one media directory through short links kept in a
//! JSON file. Settings come from the environment, see [`ServerConfig`].

use std::sync::Arc;

use anyhow::Context;
use streamdrop_axum::{stream_app, StreamApp};
use streamdrop_core::media::PlayerLinks;
use streamdrop_core::{ClientHandle, ClientPool, LinkRegistry, MediaStreamer, NewLink};
use tracing::{info, warn};

mod config;
mod fs_upstream;
mod json_registry;

pub use config::ServerConfig;
pub use fs_upstream::{FsUpstream, MEDIA_DC};
pub use json_registry::JsonFileLinkRegistry;

/// Owner recorded on links the server publishes itself
pub const SERVER_OWNER_ID: i64 = 0;

/// Wire the upstream, pool, registry and routes described by `config`
pub async fn build(config: &ServerConfig) -> anyhow::Result<StreamApp> {
    let stream_config = config.stream_config();
    let upstream = FsUpstream::new(&config.media_dir);

    let mut pool = ClientPool::new().with_default(Arc::new(ClientHandle::new(
        "default",
        Arc::new(upstream.clone()),
        stream_config.session_retry.clone(),
    )));
    for index in 0..config.clients {
        pool = pool.with_client(Arc::new(ClientHandle::new(
            format!("worker-{index}"),
            Arc::new(upstream.clone()),
            stream_config.session_retry.clone(),
        )));
    }

    let registry = Arc::new(
        JsonFileLinkRegistry::load(&config.links_file)
            .await
            .with_context(|| format!("loading links from {}", config.links_file.display()))?,
    );
    if config.auto_publish {
        publish_new_files(&upstream, &registry, &config.base_url).await?;
    }

    let streamer = MediaStreamer::with_shared(Arc::new(pool), registry, stream_config)?;
    info!(
        media_dir = %config.media_dir.display(),
        clients = config.clients,
        "streamer ready"
    );
    Ok(stream_app(Arc::new(streamer), &config.base_url))
}

/// Create a link for every media file that has none for its current contents.
/// Returns the records created.
pub async fn publish_new_files(
    upstream: &FsUpstream,
    registry: &JsonFileLinkRegistry,
    base_url: &str,
) -> anyhow::Result<Vec<streamdrop_core::LinkRecord>> {
    let names = upstream
        .list()
        .await
        .with_context(|| format!("listing {}", upstream.root().display()))?;
    let published: Vec<String> = registry.records().into_iter().map(|r| r.object_ref).collect();

    let mut created = Vec::new();
    for name in names {
        let (locator, metadata) = match upstream.locate(&name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(file = %name, error = %e, "skipping file");
                continue;
            }
        };
        if published.contains(&locator.encode()) {
            continue;
        }

        let record = registry
            .create(NewLink::new(&locator, SERVER_OWNER_ID).with_file_name(name.as_str()))
            .await?;
        let links = PlayerLinks::new(base_url, &record.id, &name, metadata.content_type());
        info!(file = %name, link = %links.direct_dl_link, "published");
        created.push(record);
    }
    Ok(created)
}
