use anyhow::Result;
use streamdrop_server::ServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    let app = streamdrop_server::build(&config).await?;

    println!("[streamdrop] listening on http://{} ({})", config.addr(), config.base_url);

    app.listen(config.addr()).await?;

    Ok(())
}
