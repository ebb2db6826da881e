use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub tcp_addr: String,
    pub instance_id: u64,
    /// Physical ids of every instance in the cluster, this one included.
    pub cluster: Vec<u64>,
    pub requests_cap: usize,
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    pub data_dir: String,
    /// Soft cap on resident chunk bytes before the cache spills, in MiB.
    pub mem_threshold_mb: usize,
    pub tile_size: usize,
    pub tiles_per_chunk: usize,
    pub rle_chunk_format: bool,
    pub redundancy: usize,
    /// Expected fraction of non-default cells in a fresh sparse chunk.
    pub sparse_chunk_init_density: f64,
    /// Sparse chunks denser than this are rewritten as dense on flush.
    pub dense_chunk_threshold: f64,
    pub string_size_estimation: usize,
    pub replication_queue_size: usize,
    /// Seconds between error-checker wakeups while waiting on cluster acks.
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub stdout_level: String,
    pub file_level: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Deserialize)]
pub struct UserEntry {
    pub name: String,
    /// base64(SHA-512(password)), the same digest the client sends.
    pub password_digest: String,
}

use std::env;

pub fn load_settings() -> Result<Settings, config::ConfigError> {
    let config_path = env::var("ROOSTERDB_CONFIG").unwrap_or_else(|_| "config".to_string());

    let settings: Settings = config::Config::builder()
        .add_source(config::File::from_str(
            DEFAULT_SETTINGS,
            config::FileFormat::Toml,
        ))
        .add_source(config::File::with_name(&config_path).required(false))
        .build()?
        .try_deserialize()?;

    Ok(settings)
}

/// Fallback used when no config file is present (tests, scratch clusters).
const DEFAULT_SETTINGS: &str = r#"
[server]
tcp_addr = "127.0.0.1:1239"
instance_id = 0
cluster = [0]
requests_cap = 64

[engine]
data_dir = "data"
mem_threshold_mb = 64
tile_size = 1024
tiles_per_chunk = 0
rle_chunk_format = true
redundancy = 0
sparse_chunk_init_density = 0.10
dense_chunk_threshold = 1.0
string_size_estimation = 16
replication_queue_size = 16
ack_timeout_secs = 10

[logging]
log_dir = "logs"
stdout_level = "info"
file_level = "debug"

[auth]
enabled = false
users = []
"#;
