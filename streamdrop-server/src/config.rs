use std::path::PathBuf;
use std::time::Duration;

use streamdrop_core::StreamConfig;

/// Server settings, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public origin used in generated links, without a trailing `/`
    pub base_url: String,
    pub chunk_size: u32,
    /// `0` disables the per-chunk timeout
    pub chunk_timeout_secs: u64,
    pub links_file: PathBuf,
    pub media_dir: PathBuf,
    /// Number of pooled clients besides the default one
    pub clients: usize,
    /// Publish every file of `media_dir` that has no link yet on startup
    pub auto_publish: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values use defaults
    pub fn from_vars<F>(vars: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = var_or(&vars, "HTTP_HOST", "127.0.0.1".to_string());
        let port = var_or(&vars, "HTTP_PORT", 8080u16);
        let base_url = var_or(&vars, "BASE_URL", format!("http://{host}:{port}"))
            .trim_end_matches('/')
            .to_string();

        Self {
            chunk_size: var_or(&vars, "STREAMDROP_CHUNK_SIZE", 1024 * 1024),
            chunk_timeout_secs: var_or(&vars, "STREAMDROP_CHUNK_TIMEOUT_SECS", 60),
            links_file: PathBuf::from(var_or(&vars, "STREAMDROP_LINKS_FILE", "links.json".to_string())),
            media_dir: PathBuf::from(var_or(&vars, "STREAMDROP_MEDIA_DIR", "media".to_string())),
            clients: var_or(&vars, "STREAMDROP_CLIENTS", 2),
            auto_publish: var_or(&vars, "STREAMDROP_AUTO_PUBLISH", false),
            host,
            port,
            base_url,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stream_config(&self) -> StreamConfig {
        let config = StreamConfig::new().with_chunk_size(self.chunk_size);
        match self.chunk_timeout_secs {
            0 => config.without_chunk_timeout(),
            secs => config.with_chunk_timeout(Duration::from_secs(secs)),
        }
    }
}

fn var_or<F, T>(vars: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    vars(key)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
