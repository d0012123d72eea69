//! The long-lived subsystems every node needs to answer `Stat`/`Lookup`/`ReadDir`/`Open`.
//! Nodes are ephemeral, value-like, and hold no back-reference cycle: they borrow an
//! [`Fs`] for the duration of one operation.

use crate::compiler;
use crate::executor::Executor;
use crate::metadata::{DatasetCache, FieldCache};
use crate::query_store::QueryStore;
use crate::upstream::QueryClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const RESERVED_ROOT_NAMES: &[&str] = &["datasets", "README.txt", "examples", "_presets", "_queries"];

/// Process-wide subsystems shared by the node graph.
pub struct Fs {
    pub client: Arc<dyn QueryClient>,
    pub executor: Arc<Executor>,
    pub datasets: Arc<DatasetCache>,
    pub fields: Arc<FieldCache>,
    pub query_store: Arc<QueryStore>,
    pub compiler_opts: compiler::Options,
    pub sample_limit: u64,
    /// Caches the concrete byte length of a computed file the first time it's opened, so
    /// later `Stat` calls report the real size instead of a placeholder.
    opened_sizes: Mutex<HashMap<String, u64>>,
}

impl Fs {
    pub fn new(
        client: Arc<dyn QueryClient>,
        executor: Arc<Executor>,
        datasets: Arc<DatasetCache>,
        fields: Arc<FieldCache>,
        query_store: Arc<QueryStore>,
        compiler_opts: compiler::Options,
        sample_limit: u64,
    ) -> Self {
        Self { client, executor, datasets, fields, query_store, compiler_opts, sample_limit, opened_sizes: Mutex::new(HashMap::new()) }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        CancellationToken::new()
    }

    pub async fn cached_size(&self, path: &str) -> Option<u64> {
        self.opened_sizes.lock().await.get(path).copied()
    }

    pub async fn remember_size(&self, path: &str, size: u64) {
        self.opened_sizes.lock().await.insert(path.to_string(), size);
    }

    /// Best-effort background warm of a dataset's field cache, fired when the dataset is
    /// first observed (e.g. enumerated under `/datasets`). Bounded by the field cache's
    /// own single-flight, so it can never race a foreground request into a duplicate call.
    pub fn prefetch_fields(self: &Arc<Self>, dataset: String) {
        let fs = self.clone();
        tokio::spawn(async move {
            let ctx = fs.cancellation_token();
            let _ = fs.fields.list(&ctx, &dataset).await;
        });
    }

    pub fn preset_range(&self) -> &str {
        &self.compiler_opts.default_range
    }
}

pub fn is_reserved_root_name(name: &str) -> bool {
    RESERVED_ROOT_NAMES.contains(&name)
}
