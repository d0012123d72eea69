//! Dataset and field metadata caches: TTL-bounded, single-flight refill, optional
//! disk-backed JSON persistence so a cold start can serve stale-but-present metadata
//! before the first upstream round trip completes.

use crate::singleflight::SingleFlight;
use crate::upstream::{Dataset, Error as UpstreamError, Field, QueryClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum Error {
    Upstream(UpstreamError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Upstream(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<UpstreamError> for Error {
    fn from(e: UpstreamError) -> Self {
        Error::Upstream(e)
    }
}

struct Entry<T> {
    value: Vec<T>,
    fetched_at: Instant,
}

/// Caches the process-wide list of datasets.
pub struct DatasetCache {
    client: Arc<dyn QueryClient>,
    ttl: Duration,
    disk_path: Option<PathBuf>,
    state: RwLock<Option<Entry<Dataset>>>,
    single_flight: SingleFlight<&'static str, Vec<Dataset>, Error>,
}

impl DatasetCache {
    pub fn new(client: Arc<dyn QueryClient>, ttl: Duration, cache_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            ttl,
            disk_path: cache_dir.map(|d| d.join("datasets.json")),
            state: RwLock::new(None),
            single_flight: SingleFlight::new(),
        }
    }

    /// Populates from the on-disk snapshot if it exists and is within TTL. Call once at startup.
    pub async fn warm_from_disk(&self) {
        let Some(path) = &self.disk_path else { return };
        let Ok(meta) = tokio::fs::metadata(path).await else { return };
        let Ok(mtime) = meta.modified() else { return };
        if self.ttl > Duration::ZERO && SystemTime::now().duration_since(mtime).unwrap_or(Duration::MAX) > self.ttl {
            return;
        }
        let Ok(bytes) = tokio::fs::read(path).await else { return };
        let Ok(datasets) = serde_json::from_slice::<Vec<Dataset>>(&bytes) else { return };
        *self.state.write().await = Some(Entry { value: datasets, fetched_at: Instant::now() });
        debug!("warmed dataset cache from disk");
    }

    pub async fn list(&self, ctx: &CancellationToken) -> Result<Vec<Dataset>, Error> {
        {
            let state = self.state.read().await;
            if let Some(entry) = state.as_ref() {
                if !entry.value.is_empty() && (self.ttl == Duration::ZERO || entry.fetched_at.elapsed() < self.ttl) {
                    return Ok(entry.value.clone());
                }
            }
        }

        let client = self.client.clone();
        let ctx = ctx.clone();
        let datasets = self.single_flight.run("datasets", move || async move { Ok(client.list_datasets(&ctx).await?) }).await?;

        *self.state.write().await = Some(Entry { value: datasets.clone(), fetched_at: Instant::now() });
        self.persist(&datasets).await;
        Ok(datasets)
    }

    async fn persist(&self, datasets: &[Dataset]) {
        let Some(path) = &self.disk_path else { return };
        if let Some(dir) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                warn!(%err, "failed to create cache directory for dataset metadata");
                return;
            }
        }
        match serde_json::to_vec(datasets) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(path, bytes).await {
                    warn!(%err, "failed to persist dataset metadata");
                }
            }
            Err(err) => warn!(%err, "failed to serialize dataset metadata"),
        }
    }
}

/// Caches per-dataset field lists, one TTL'd entry per dataset name.
pub struct FieldCache {
    client: Arc<dyn QueryClient>,
    ttl: Duration,
    disk_dir: Option<PathBuf>,
    state: RwLock<std::collections::HashMap<String, Entry<Field>>>,
    single_flight: SingleFlight<String, Vec<Field>, Error>,
}

impl FieldCache {
    pub fn new(client: Arc<dyn QueryClient>, ttl: Duration, cache_dir: Option<PathBuf>) -> Self {
        Self {
            client,
            ttl,
            disk_dir: cache_dir.map(|d| d.join("fields")),
            state: RwLock::new(std::collections::HashMap::new()),
            single_flight: SingleFlight::new(),
        }
    }

    fn disk_path(&self, dataset: &str) -> Option<PathBuf> {
        self.disk_dir.as_ref().map(|dir| dir.join(format!("{dataset}.json")))
    }

    async fn warm_one_from_disk(&self, dataset: &str) {
        let Some(path) = self.disk_path(dataset) else { return };
        let Ok(meta) = tokio::fs::metadata(&path).await else { return };
        let Ok(mtime) = meta.modified() else { return };
        if self.ttl > Duration::ZERO && SystemTime::now().duration_since(mtime).unwrap_or(Duration::MAX) > self.ttl {
            return;
        }
        let Ok(bytes) = tokio::fs::read(&path).await else { return };
        let Ok(fields) = serde_json::from_slice::<Vec<Field>>(&bytes) else { return };
        self.state.write().await.insert(dataset.to_string(), Entry { value: fields, fetched_at: Instant::now() });
    }

    pub async fn list(&self, ctx: &CancellationToken, dataset: &str) -> Result<Vec<Field>, Error> {
        {
            let state = self.state.read().await;
            if let Some(entry) = state.get(dataset) {
                if self.ttl == Duration::ZERO || entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }
        self.warm_one_from_disk(dataset).await;
        {
            let state = self.state.read().await;
            if let Some(entry) = state.get(dataset) {
                if self.ttl == Duration::ZERO || entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }

        let client = self.client.clone();
        let ctx = ctx.clone();
        let ds = dataset.to_string();
        let fields = self.single_flight.run(dataset.to_string(), move || async move { Ok(client.list_fields(&ctx, &ds).await?) }).await?;

        self.state.write().await.insert(dataset.to_string(), Entry { value: fields.clone(), fetched_at: Instant::now() });
        self.persist(dataset, &fields).await;
        Ok(fields)
    }

    async fn persist(&self, dataset: &str, fields: &[Field]) {
        let Some(path) = self.disk_path(dataset) else { return };
        if let Some(dir) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(dir).await {
                warn!(%err, dataset, "failed to create cache directory for field metadata");
                return;
            }
        }
        match serde_json::to_vec(fields) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    warn!(%err, dataset, "failed to persist field metadata");
                }
            }
            Err(err) => warn!(%err, dataset, "failed to serialize field metadata"),
        }
    }
}
