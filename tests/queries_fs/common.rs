use std::sync::Arc;
use std::time::Duration;

use aplfs::cache::{Cache, Config as CacheConfig};
use aplfs::compiler;
use aplfs::executor::{Executor, Limits};
use aplfs::metadata::{DatasetCache, FieldCache};
use aplfs::nfs_adapter::NfsAdapter;
use aplfs::nodes::fs::Fs;
use aplfs::query_store::QueryStore;
use aplfs::upstream::{Dataset, Error as UpstreamError, Field, FieldDef, QueryClient, QueryResult, Table};
use aplfs::vfs::{self, FileName, SetAttr, SetTime};
use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fake upstream returning one dataset ("logs") with a handful of fields and a single
/// query result table, so every computed file has something non-trivial to render.
pub struct FakeClient;

#[async_trait]
impl QueryClient for FakeClient {
    async fn query_apl(&self, _ctx: &CancellationToken, _apl: &str) -> Result<QueryResult, UpstreamError> {
        Ok(QueryResult {
            tables: vec![Table {
                fields: vec![
                    FieldDef { name: "_time".to_string(), kind: Some("datetime".to_string()), agg: None },
                    FieldDef { name: "status".to_string(), kind: Some("string".to_string()), agg: Some("count".to_string()) },
                ],
                rows: Some(vec![vec![json!("2026-07-28T00:00:00Z"), json!("ok")]]),
                columns: None,
                status: json!({"rowsExamined": 1}),
            }],
        })
    }

    async fn list_datasets(&self, _ctx: &CancellationToken) -> Result<Vec<Dataset>, UpstreamError> {
        Ok(vec![Dataset {
            name: "logs".to_string(),
            description: Some("application logs".to_string()),
            created_by: Some("ops".to_string()),
            created_at: None,
        }])
    }

    async fn list_fields(&self, _ctx: &CancellationToken, _dataset: &str) -> Result<Vec<Field>, UpstreamError> {
        Ok(vec![
            Field { name: "status".to_string(), kind: "string".to_string(), unit: None, hidden: false },
            Field { name: "duration_ms".to_string(), kind: "number".to_string(), unit: Some("ms".to_string()), hidden: false },
        ])
    }
}

/// An `NfsAdapter` wired against [`FakeClient`], with its query store rooted in a
/// scratch temp dir that is removed when the fixture drops.
pub struct Fixture {
    pub adapter: NfsAdapter,
    _tempdir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        let client: Arc<dyn QueryClient> = Arc::new(FakeClient);
        let cache = Arc::new(Cache::new(CacheConfig { ttl: None, max_entries: None, max_bytes: None, disk_dir: None }));
        let limits = Limits {
            max_in_memory_bytes: 1 << 20,
            max_cache_bytes: None,
            temp_dir: tempdir.path().to_path_buf(),
            default_row_cap: 1_000,
            default_range: "1h".to_string(),
        };
        let executor = Arc::new(Executor::new(client.clone(), cache, limits));
        let datasets = Arc::new(DatasetCache::new(client.clone(), Duration::from_secs(60), None));
        let fields = Arc::new(FieldCache::new(client.clone(), Duration::from_secs(60), None));
        let query_store = Arc::new(QueryStore::new(tempdir.path().join("queries")));
        let fs = Arc::new(Fs::new(client, executor, datasets, fields, query_store, compiler::Options::default(), 50));
        Fixture { adapter: NfsAdapter::new(fs), _tempdir: tempdir }
    }

    pub fn root(&self) -> vfs::FileHandle {
        self.adapter.root_handle()
    }
}

pub fn name(n: &str) -> FileName {
    FileName(n.to_owned())
}

pub fn zero_size_attr() -> SetAttr {
    SetAttr { mode: None, uid: None, gid: None, size: Some(0), atime: SetTime::DontChange, mtime: SetTime::DontChange }
}
