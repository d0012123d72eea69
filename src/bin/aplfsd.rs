//! Binary entrypoint: resolves configuration, wires the upstream client through the
//! cache/executor/metadata/query-store subsystems, and serves NFSv3 on the configured
//! listen address.

use aplfs::cache::{Cache, Config as CacheConfig};
use aplfs::compiler;
use aplfs::config;
use aplfs::executor::{Executor, Limits};
use aplfs::metadata::{DatasetCache, FieldCache};
use aplfs::nfs_adapter::NfsAdapter;
use aplfs::nodes::fs::Fs;
use aplfs::query_store::QueryStore;
use aplfs::upstream::{HttpClient, QueryClient};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    if let Err(err) = run().await {
        tracing::error!(%err, "aplfsd exited");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let settings = config::load()?;

    let client: Arc<dyn QueryClient> = Arc::new(HttpClient::new(settings.url.clone(), settings.token.clone(), settings.org.clone()));

    let cache = Arc::new(Cache::new(CacheConfig {
        ttl: Some(humantime::parse_duration(&settings.cache_ttl)?),
        max_entries: non_zero(settings.cache_max_entries).map(|n| n as usize),
        max_bytes: non_zero(settings.cache_max_bytes),
        disk_dir: settings.cache_dir.clone(),
    }));

    let limits = Limits {
        max_in_memory_bytes: settings.max_in_memory_bytes,
        max_cache_bytes: non_zero(settings.cache_max_bytes),
        temp_dir: settings.temp_dir.clone(),
        default_row_cap: settings.default_limit,
        default_range: settings.default_range.clone(),
    };
    let executor = Arc::new(Executor::new(client.clone(), cache.clone(), limits));

    let metadata_ttl = humantime::parse_duration(&settings.metadata_ttl)?;
    let datasets = Arc::new(DatasetCache::new(client.clone(), metadata_ttl, settings.cache_dir.clone()));
    let fields = Arc::new(FieldCache::new(client.clone(), metadata_ttl, settings.cache_dir.clone()));
    datasets.warm_from_disk().await;

    let query_store = Arc::new(QueryStore::new(settings.query_dir.clone()));

    let compiler_opts = compiler::Options {
        default_range: settings.default_range.clone(),
        default_row_cap: non_zero(settings.default_limit),
        max_range: if settings.max_range.is_empty() { None } else { Some(humantime::parse_duration(&settings.max_range)?) },
        max_row_cap: non_zero(settings.max_limit),
    };

    let fs = Arc::new(Fs::new(client, executor, datasets, fields, query_store, compiler_opts, settings.sample_limit));
    let adapter = Arc::new(NfsAdapter::new(fs));

    let listener = TcpListener::bind(settings.listen).await?;
    info!(listen = %settings.listen, url = %settings.url, "aplfsd listening");

    aplfs::handle_forever(listener, adapter).await?;
    Ok(())
}

fn non_zero(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}
