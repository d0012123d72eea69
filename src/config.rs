//! CLI surface and config-file layering: `clap`-derived flags, each mirrored as an
//! environment variable under the `APLFS_` prefix, with an optional TOML file layered
//! beneath CLI flags and environment variables, beneath which built-in defaults apply.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Raw CLI flags. Every setting besides `--config` is optional here so the precedence
/// order (CLI/env > file > built-in default) can be resolved uniformly in [`Settings::resolve`].
#[derive(Debug, Clone, Parser, Default)]
#[command(name = "aplfsd", about = "Mounts an APL query backend as a read-mostly NFSv3 filesystem")]
pub struct Cli {
    /// TOML config file layered beneath CLI flags and environment variables.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "APLFS_LISTEN")]
    pub listen: Option<SocketAddr>,
    #[arg(long, env = "APLFS_DEFAULT_RANGE")]
    pub default_range: Option<String>,
    #[arg(long, env = "APLFS_DEFAULT_LIMIT")]
    pub default_limit: Option<u64>,
    #[arg(long, env = "APLFS_MAX_LIMIT")]
    pub max_limit: Option<u64>,
    #[arg(long, env = "APLFS_MAX_RANGE")]
    pub max_range: Option<String>,
    #[arg(long, env = "APLFS_CACHE_TTL")]
    pub cache_ttl: Option<String>,
    #[arg(long, env = "APLFS_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: Option<u64>,
    #[arg(long, env = "APLFS_CACHE_MAX_BYTES")]
    pub cache_max_bytes: Option<u64>,
    #[arg(long, env = "APLFS_MAX_IN_MEMORY_BYTES")]
    pub max_in_memory_bytes: Option<u64>,
    #[arg(long, env = "APLFS_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
    #[arg(long, env = "APLFS_QUERY_DIR")]
    pub query_dir: Option<PathBuf>,
    #[arg(long, env = "APLFS_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,
    #[arg(long, env = "APLFS_SAMPLE_LIMIT")]
    pub sample_limit: Option<u64>,
    #[arg(long, env = "APLFS_METADATA_TTL")]
    pub metadata_ttl: Option<String>,
    #[arg(long, env = "APLFS_URL")]
    pub url: Option<String>,
    #[arg(long, env = "APLFS_TOKEN")]
    pub token: Option<String>,
    #[arg(long, env = "APLFS_ORG")]
    pub org: Option<String>,
}

/// Mirrors [`Cli`] for deserializing a `--config` TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub listen: Option<SocketAddr>,
    pub default_range: Option<String>,
    pub default_limit: Option<u64>,
    pub max_limit: Option<u64>,
    pub max_range: Option<String>,
    pub cache_ttl: Option<String>,
    pub cache_max_entries: Option<u64>,
    pub cache_max_bytes: Option<u64>,
    pub max_in_memory_bytes: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub query_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub sample_limit: Option<u64>,
    pub metadata_ttl: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
    pub org: Option<String>,
}

/// Fully resolved configuration: every setting pinned to a concrete value, after
/// layering CLI/env over an optional file over built-in defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub default_range: String,
    pub default_limit: u64,
    pub max_limit: u64,
    pub max_range: String,
    pub cache_ttl: String,
    pub cache_max_entries: u64,
    pub cache_max_bytes: u64,
    pub max_in_memory_bytes: u64,
    pub cache_dir: Option<PathBuf>,
    pub query_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub sample_limit: u64,
    pub metadata_ttl: String,
    pub url: String,
    pub token: String,
    pub org: Option<String>,
}

impl Settings {
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, String> {
        Ok(Self {
            listen: cli.listen.or(file.listen).unwrap_or_else(|| "127.0.0.1:2049".parse().unwrap()),
            default_range: cli.default_range.or(file.default_range).unwrap_or_else(|| "1h".to_string()),
            default_limit: cli.default_limit.or(file.default_limit).unwrap_or(10_000),
            max_limit: cli.max_limit.or(file.max_limit).unwrap_or(0),
            max_range: cli.max_range.or(file.max_range).unwrap_or_default(),
            cache_ttl: cli.cache_ttl.or(file.cache_ttl).unwrap_or_else(|| "5m".to_string()),
            cache_max_entries: cli.cache_max_entries.or(file.cache_max_entries).unwrap_or(1024),
            cache_max_bytes: cli.cache_max_bytes.or(file.cache_max_bytes).unwrap_or(64 * 1024 * 1024),
            max_in_memory_bytes: cli.max_in_memory_bytes.or(file.max_in_memory_bytes).unwrap_or(16 * 1024 * 1024),
            cache_dir: cli.cache_dir.or(file.cache_dir),
            query_dir: cli.query_dir.or(file.query_dir).ok_or("--query-dir is required (or set query_dir in --config)")?,
            temp_dir: cli.temp_dir.or(file.temp_dir).unwrap_or_else(|| PathBuf::from("/tmp")),
            sample_limit: cli.sample_limit.or(file.sample_limit).unwrap_or(100),
            metadata_ttl: cli.metadata_ttl.or(file.metadata_ttl).unwrap_or_else(|| "1m".to_string()),
            url: cli.url.or(file.url).ok_or("--url is required (or set url in --config)")?,
            token: cli.token.or(file.token).ok_or("--token is required (or set token in --config)")?,
            org: cli.org.or(file.org),
        })
    }
}

/// Parses CLI flags (which clap has already layered over environment variables) and, if
/// `--config` names a TOML file, layers that file beneath them.
pub fn load() -> Result<Settings, String> {
    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| format!("reading config file {}: {e}", path.display()))?;
            toml::from_str(&text).map_err(|e| format!("parsing config file {}: {e}", path.display()))?
        }
        None => FileConfig::default(),
    };
    Settings::resolve(cli, file)
}
