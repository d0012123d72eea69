//! Typed VFS nodes, modeled as a sum type per the "implementers in languages without
//! ad-hoc interfaces should model nodes as sum types" design note: each arm answers
//! whether it's a directory, whether it has content, and whether it's writable.

pub mod fs;

use crate::compiler::{self, CompiledQuery, Format};
use crate::executor::{self, ExecOptions, Payload};
use crate::presets;
use fs::Fs;
use serde_json::json;
use std::sync::Arc;

pub const README: &str = "apl-fs mounts a remote APL query backend as a read-mostly filesystem.\n\
See /examples/quickstart.txt for the path grammar, or /datasets for what's queryable.\n";

pub const QUICKSTART: &str = "\
# Quickstart

List datasets:
  ls /datasets

Inspect a dataset's schema:
  cat /datasets/<name>/schema.json

Run an ad-hoc query over the path grammar:
  cat '/datasets/<name>/q/where/status>=500/result.csv'
  cat '/datasets/<name>/q/range/ago/24h/summarize/count()/result.ndjson'

Or write raw APL into a named slot:
  echo \"['logs'] | take 5\" > /_queries/demo/apl
  cat /_queries/demo/result.ndjson
";

#[derive(Debug, Clone)]
pub enum NodeError {
    NotFound,
    NotDir,
    IsDir,
    ReadOnly,
    Invalid(String),
    Io(String),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::NotFound => write!(f, "not found"),
            NodeError::NotDir => write!(f, "not a directory"),
            NodeError::IsDir => write!(f, "is a directory"),
            NodeError::ReadOnly => write!(f, "read-only"),
            NodeError::Invalid(s) => write!(f, "invalid: {s}"),
            NodeError::Io(s) => write!(f, "i/o error: {s}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<compiler::CompileError> for NodeError {
    fn from(e: compiler::CompileError) -> Self {
        NodeError::Invalid(e.to_string())
    }
}

impl From<executor::Error> for NodeError {
    fn from(e: executor::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

impl From<crate::query_store::Error> for NodeError {
    fn from(e: crate::query_store::Error) -> Self {
        match e {
            crate::query_store::Error::InvalidName(_) => NodeError::Invalid(e.to_string()),
            crate::query_store::Error::Io(_) => NodeError::Io(e.to_string()),
        }
    }
}

impl From<crate::metadata::Error> for NodeError {
    fn from(e: crate::metadata::Error) -> Self {
        NodeError::Io(e.to_string())
    }
}

/// What `Stat` needs to answer, independent of the wire protocol.
#[derive(Debug, Clone)]
pub struct Info {
    pub is_dir: bool,
    pub writable: bool,
    /// `None` for directories and for not-yet-opened computed files, which report a
    /// placeholder size until their first `Open`.
    pub size: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum ComputedFile {
    Schema { dataset: String, format: Format },
    Sample { dataset: String },
    FieldTop { dataset: String, field: String },
    FieldHistogram { dataset: String, field: String },
    PresetMeta { name: &'static str },
    PresetResult { dataset: String, name: &'static str, format: Format },
    QueryPathResult { dataset: String, segments: Vec<String> },
    SlotResult { slot: String, format: Format, error_sentinel: bool },
    SlotSchema { slot: String },
    SlotStats { slot: String },
}

#[derive(Debug, Clone)]
pub enum Node {
    Root,
    ExamplesDir,
    DatasetsDir,
    DatasetDir { dataset: String },
    FieldsDir { dataset: String },
    FieldDir { dataset: String, field: String },
    PresetsDir,
    DatasetPresetsDir { dataset: String },
    QueriesDir,
    QueryEntryDir { slot: String },
    QueryPathDir { dataset: String, segments: Vec<String> },
    StaticFile { content: Arc<Vec<u8>> },
    AplFile { slot: String },
    Computed(ComputedFile),
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(
            self,
            Node::Root
                | Node::ExamplesDir
                | Node::DatasetsDir
                | Node::DatasetDir { .. }
                | Node::FieldsDir { .. }
                | Node::FieldDir { .. }
                | Node::PresetsDir
                | Node::DatasetPresetsDir { .. }
                | Node::QueriesDir
                | Node::QueryEntryDir { .. }
                | Node::QueryPathDir { .. }
        )
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Node::AplFile { .. })
    }

    /// A stable identity string used as the key for the opened-size cache.
    pub fn path_key(&self) -> String {
        match self {
            Node::Root => "/".to_string(),
            Node::ExamplesDir => "/examples".to_string(),
            Node::DatasetsDir => "/datasets".to_string(),
            Node::DatasetDir { dataset } => format!("/{dataset}"),
            Node::FieldsDir { dataset } => format!("/{dataset}/fields"),
            Node::FieldDir { dataset, field } => format!("/{dataset}/fields/{field}"),
            Node::PresetsDir => "/_presets".to_string(),
            Node::DatasetPresetsDir { dataset } => format!("/{dataset}/presets"),
            Node::QueriesDir => "/_queries".to_string(),
            Node::QueryEntryDir { slot } => format!("/_queries/{slot}"),
            Node::QueryPathDir { dataset, segments } => format!("/{dataset}/q/{}", segments.join("/")),
            Node::StaticFile { .. } => "static".to_string(),
            Node::AplFile { slot } => format!("/_queries/{slot}/apl"),
            Node::Computed(c) => computed_path_key(c),
        }
    }

    pub async fn stat(&self, fs: &Arc<Fs>) -> Result<Info, NodeError> {
        if self.is_dir() {
            return Ok(Info { is_dir: true, writable: false, size: None });
        }
        if let Node::StaticFile { content } = self {
            return Ok(Info { is_dir: false, writable: false, size: Some(content.len() as u64) });
        }
        if let Node::AplFile { slot } = self {
            let bytes = fs.query_store.read(slot).await?;
            return Ok(Info { is_dir: false, writable: true, size: Some(bytes.len() as u64) });
        }
        // Computed files: report the real size if we've opened this path before,
        // otherwise a moderate placeholder so clients don't mistake size 0 for EOF.
        let size = fs.cached_size(&self.path_key()).await.or(Some(4096));
        Ok(Info { is_dir: false, writable: false, size })
    }

    pub async fn lookup(&self, fs: &Arc<Fs>, name: &str) -> Result<Node, NodeError> {
        match self {
            Node::Root => self.lookup_root(fs, name).await,
            Node::ExamplesDir => {
                if name == "quickstart.txt" {
                    Ok(Node::StaticFile { content: Arc::new(QUICKSTART.as_bytes().to_vec()) })
                } else {
                    Err(NodeError::NotFound)
                }
            }
            Node::DatasetsDir => {
                let ctx = fs.cancellation_token();
                let datasets = fs.datasets.list(&ctx).await?;
                if datasets.iter().any(|d| d.name == name) {
                    Ok(Node::DatasetDir { dataset: name.to_string() })
                } else {
                    Err(NodeError::NotFound)
                }
            }
            Node::DatasetDir { dataset } => self.lookup_dataset_dir(dataset, name),
            Node::FieldsDir { dataset } => {
                let ctx = fs.cancellation_token();
                let fields = fs.fields.list(&ctx, dataset).await?;
                if fields.iter().any(|f| f.name == name) {
                    Ok(Node::FieldDir { dataset: dataset.clone(), field: name.to_string() })
                } else {
                    Err(NodeError::NotFound)
                }
            }
            Node::FieldDir { dataset, field } => match name {
                "top.csv" => Ok(Node::Computed(ComputedFile::FieldTop { dataset: dataset.clone(), field: field.clone() })),
                "histogram.csv" => Ok(Node::Computed(ComputedFile::FieldHistogram { dataset: dataset.clone(), field: field.clone() })),
                _ => Err(NodeError::NotFound),
            },
            Node::PresetsDir => {
                let stem = name.strip_suffix(".json").ok_or(NodeError::NotFound)?;
                let preset = presets::find(stem).ok_or(NodeError::NotFound)?;
                Ok(Node::Computed(ComputedFile::PresetMeta { name: preset.name }))
            }
            Node::DatasetPresetsDir { dataset } => {
                let applicable = presets::for_dataset(dataset, None);
                for preset in applicable {
                    if name == format!("{}.{}", preset.name, preset.format.extension()) {
                        return Ok(Node::Computed(ComputedFile::PresetResult { dataset: dataset.clone(), name: preset.name, format: preset.format }));
                    }
                }
                Err(NodeError::NotFound)
            }
            Node::QueriesDir => {
                crate::query_store::validate_name(name)?;
                Ok(Node::QueryEntryDir { slot: name.to_string() })
            }
            Node::QueryEntryDir { slot } => match name {
                "apl" => Ok(Node::AplFile { slot: slot.clone() }),
                "result.ndjson" => Ok(Node::Computed(ComputedFile::SlotResult { slot: slot.clone(), format: Format::Ndjson, error_sentinel: false })),
                "result.csv" => Ok(Node::Computed(ComputedFile::SlotResult { slot: slot.clone(), format: Format::Csv, error_sentinel: false })),
                "result.json" => Ok(Node::Computed(ComputedFile::SlotResult { slot: slot.clone(), format: Format::Json, error_sentinel: false })),
                "result.error" => Ok(Node::Computed(ComputedFile::SlotResult { slot: slot.clone(), format: Format::Ndjson, error_sentinel: true })),
                "schema.csv" => Ok(Node::Computed(ComputedFile::SlotSchema { slot: slot.clone() })),
                "stats.json" => Ok(Node::Computed(ComputedFile::SlotStats { slot: slot.clone() })),
                _ => Err(NodeError::NotFound),
            },
            Node::QueryPathDir { dataset, segments } => {
                let mut next = segments.clone();
                next.push(name.to_string());
                if name.starts_with("result.") {
                    Ok(Node::Computed(ComputedFile::QueryPathResult { dataset: dataset.clone(), segments: next }))
                } else {
                    Ok(Node::QueryPathDir { dataset: dataset.clone(), segments: next })
                }
            }
            _ => Err(NodeError::NotDir),
        }
    }

    async fn lookup_root(&self, fs: &Arc<Fs>, name: &str) -> Result<Node, NodeError> {
        match name {
            "README.txt" => Ok(Node::StaticFile { content: Arc::new(README.as_bytes().to_vec()) }),
            "examples" => Ok(Node::ExamplesDir),
            "datasets" => Ok(Node::DatasetsDir),
            "_presets" => Ok(Node::PresetsDir),
            "_queries" => Ok(Node::QueriesDir),
            _ => {
                let ctx = fs.cancellation_token();
                let datasets = fs.datasets.list(&ctx).await?;
                if datasets.iter().any(|d| d.name == name) && !fs::is_reserved_root_name(name) {
                    fs.prefetch_fields(name.to_string());
                    Ok(Node::DatasetDir { dataset: name.to_string() })
                } else {
                    Err(NodeError::NotFound)
                }
            }
        }
    }

    fn lookup_dataset_dir(&self, dataset: &str, name: &str) -> Result<Node, NodeError> {
        match name {
            "schema.json" => Ok(Node::Computed(ComputedFile::Schema { dataset: dataset.to_string(), format: Format::Json })),
            "schema.csv" => Ok(Node::Computed(ComputedFile::Schema { dataset: dataset.to_string(), format: Format::Csv })),
            "sample.ndjson" => Ok(Node::Computed(ComputedFile::Sample { dataset: dataset.to_string() })),
            "fields" => Ok(Node::FieldsDir { dataset: dataset.to_string() }),
            "presets" => Ok(Node::DatasetPresetsDir { dataset: dataset.to_string() }),
            "q" => Ok(Node::QueryPathDir { dataset: dataset.to_string(), segments: Vec::new() }),
            _ => Err(NodeError::NotFound),
        }
    }

    pub async fn read_dir(&self, fs: &Arc<Fs>) -> Result<Vec<String>, NodeError> {
        match self {
            Node::Root => {
                let ctx = fs.cancellation_token();
                let mut names: Vec<String> = fs::RESERVED_ROOT_NAMES.iter().map(|s| s.to_string()).collect();
                for dataset in fs.datasets.list(&ctx).await? {
                    if !fs::is_reserved_root_name(&dataset.name) {
                        names.push(dataset.name);
                    }
                }
                Ok(names)
            }
            Node::ExamplesDir => Ok(vec!["quickstart.txt".to_string()]),
            Node::DatasetsDir => {
                let ctx = fs.cancellation_token();
                Ok(fs.datasets.list(&ctx).await?.into_iter().map(|d| d.name).collect())
            }
            Node::DatasetDir { .. } => Ok(vec![
                "schema.json".to_string(),
                "schema.csv".to_string(),
                "sample.ndjson".to_string(),
                "fields".to_string(),
                "presets".to_string(),
                "q".to_string(),
            ]),
            Node::FieldsDir { dataset } => {
                let ctx = fs.cancellation_token();
                Ok(fs.fields.list(&ctx, dataset).await?.into_iter().map(|f| f.name).collect())
            }
            Node::FieldDir { .. } => Ok(vec!["top.csv".to_string(), "histogram.csv".to_string()]),
            Node::PresetsDir => Ok(presets::catalog().into_iter().map(|p| format!("{}.json", p.name)).collect()),
            Node::DatasetPresetsDir { dataset } => {
                Ok(presets::for_dataset(dataset, None).into_iter().map(|p| format!("{}.{}", p.name, p.format.extension())).collect())
            }
            Node::QueriesDir => Ok(fs.query_store.list().await?),
            Node::QueryEntryDir { .. } => Ok(vec![
                "apl".to_string(),
                "result.ndjson".to_string(),
                "result.csv".to_string(),
                "result.json".to_string(),
                "result.error".to_string(),
                "schema.csv".to_string(),
                "stats.json".to_string(),
            ]),
            // The query-path tree is infinite and opaque; only Lookup descends into it.
            Node::QueryPathDir { .. } => Ok(Vec::new()),
            _ => Err(NodeError::NotDir),
        }
    }

    pub async fn open(&self, fs: &Arc<Fs>) -> Result<Vec<u8>, NodeError> {
        let bytes = match self {
            Node::StaticFile { content } => (**content).clone(),
            Node::AplFile { slot } => fs.query_store.read(slot).await?,
            Node::Computed(computed) => self.open_computed(fs, computed).await?,
            _ if self.is_dir() => return Err(NodeError::IsDir),
            _ => return Err(NodeError::NotFound),
        };
        fs.remember_size(&self.path_key(), bytes.len() as u64).await;
        Ok(bytes)
    }

    async fn open_computed(&self, fs: &Arc<Fs>, computed: &ComputedFile) -> Result<Vec<u8>, NodeError> {
        let ctx = fs.cancellation_token();
        match computed {
            ComputedFile::Schema { dataset, format } => {
                let apl = format!("['{dataset}']\n| getschema");
                payload_bytes(fs.executor.execute(&ctx, &apl, *format, ExecOptions::COMPILED).await?).await
            }
            ComputedFile::Sample { dataset } => {
                let apl = format!("['{dataset}']\n| take {}", fs.sample_limit);
                payload_bytes(fs.executor.execute(&ctx, &apl, Format::Ndjson, ExecOptions::COMPILED).await?).await
            }
            ComputedFile::FieldTop { dataset, field } => {
                let apl = format!("['{dataset}']\n| summarize topk({field}, 10)");
                payload_bytes(fs.executor.execute(&ctx, &apl, Format::Csv, ExecOptions::COMPILED).await?).await
            }
            ComputedFile::FieldHistogram { dataset, field } => {
                let apl = format!("['{dataset}']\n| summarize histogram({field}, 100)");
                payload_bytes(fs.executor.execute(&ctx, &apl, Format::Csv, ExecOptions::COMPILED).await?).await
            }
            ComputedFile::PresetMeta { name } => {
                let preset = presets::find(name).ok_or(NodeError::NotFound)?;
                let meta = json!({
                    "name": preset.name,
                    "description": preset.description,
                    "format": preset.format.extension(),
                });
                let mut bytes = serde_json::to_vec_pretty(&meta).map_err(|e| NodeError::Io(e.to_string()))?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            ComputedFile::PresetResult { dataset, name, format } => {
                let preset = presets::find(name).ok_or(NodeError::NotFound)?;
                let apl = presets::render(preset, dataset, fs.preset_range());
                payload_bytes(fs.executor.execute(&ctx, &apl, *format, ExecOptions::COMPILED).await?).await
            }
            ComputedFile::QueryPathResult { dataset, segments } => {
                let compiled: CompiledQuery = compiler::compile_segments(dataset, segments, &fs.compiler_opts)?;
                run_compiled(fs, &ctx, &compiled).await
            }
            ComputedFile::SlotResult { slot, format, error_sentinel } => {
                let apl = fs.query_store.read(slot).await?;
                let apl_text = String::from_utf8_lossy(&apl).into_owned();
                if *error_sentinel {
                    return Ok(run_slot_envelope(fs, &ctx, &apl_text).await);
                }
                if apl_text.trim().is_empty() {
                    return Err(NodeError::Invalid("query slot is empty".to_string()));
                }
                let payload = fs.executor.execute(&ctx, &apl_text, *format, ExecOptions::RAW_SLOT).await?;
                payload_bytes(payload).await
            }
            ComputedFile::SlotSchema { slot } => {
                let apl = fs.query_store.read(slot).await?;
                let apl_text = String::from_utf8_lossy(&apl).into_owned();
                let result = fs.client.query_apl(&ctx, &apl_text).await.map_err(|e| NodeError::Io(e.to_string()))?;
                let table = result.tables.first().cloned().unwrap_or_default();
                let mut out = String::from("name,type,aggregation\n");
                for field in &table.fields {
                    out.push_str(&format!("{},{},{}\n", field.name, field.kind.clone().unwrap_or_default(), field.agg.clone().unwrap_or_default()));
                }
                Ok(out.into_bytes())
            }
            ComputedFile::SlotStats { slot } => {
                let apl = fs.query_store.read(slot).await?;
                let apl_text = String::from_utf8_lossy(&apl).into_owned();
                let result = fs.client.query_apl(&ctx, &apl_text).await.map_err(|e| NodeError::Io(e.to_string()))?;
                let status = result.tables.first().map(|t| t.status.clone()).unwrap_or(serde_json::Value::Null);
                let body = json!({ "apl": apl_text, "status": status });
                let mut bytes = serde_json::to_vec_pretty(&body).map_err(|e| NodeError::Io(e.to_string()))?;
                bytes.push(b'\n');
                Ok(bytes)
            }
        }
    }
}

async fn run_compiled(fs: &Arc<Fs>, ctx: &tokio_util::sync::CancellationToken, compiled: &CompiledQuery) -> Result<Vec<u8>, NodeError> {
    if compiled.error_sentinel {
        return Ok(run_slot_envelope(fs, ctx, &compiled.text).await);
    }
    let payload = fs.executor.execute(ctx, &compiled.text, compiled.format, ExecOptions::COMPILED).await?;
    payload_bytes(payload).await
}

async fn run_slot_envelope(fs: &Arc<Fs>, ctx: &tokio_util::sync::CancellationToken, apl: &str) -> Vec<u8> {
    match fs.executor.execute(ctx, apl, Format::Ndjson, ExecOptions::RAW_SLOT).await {
        Ok(_) => executor::error_envelope(apl, None),
        Err(e) => executor::error_envelope(apl, Some(&e.to_string())),
    }
}

async fn payload_bytes(payload: Payload) -> Result<Vec<u8>, NodeError> {
    match payload {
        Payload::Bytes(b) => Ok((*b).clone()),
        Payload::File { file, .. } => tokio::fs::read(file.path()).await.map_err(|e| NodeError::Io(e.to_string())),
    }
}

fn computed_path_key(c: &ComputedFile) -> String {
    match c {
        ComputedFile::Schema { dataset, format } => format!("/{dataset}/schema.{}", format.extension()),
        ComputedFile::Sample { dataset } => format!("/{dataset}/sample.ndjson"),
        ComputedFile::FieldTop { dataset, field } => format!("/{dataset}/fields/{field}/top.csv"),
        ComputedFile::FieldHistogram { dataset, field } => format!("/{dataset}/fields/{field}/histogram.csv"),
        ComputedFile::PresetMeta { name } => format!("/_presets/{name}.json"),
        ComputedFile::PresetResult { dataset, name, format } => format!("/{dataset}/presets/{name}.{}", format.extension()),
        ComputedFile::QueryPathResult { dataset, segments } => format!("/{dataset}/q/{}", segments.join("/")),
        ComputedFile::SlotResult { slot, format, error_sentinel } => {
            if *error_sentinel {
                format!("/_queries/{slot}/result.error")
            } else {
                format!("/_queries/{slot}/result.{}", format.extension())
            }
        }
        ComputedFile::SlotSchema { slot } => format!("/_queries/{slot}/schema.csv"),
        ComputedFile::SlotStats { slot } => format!("/_queries/{slot}/stats.json"),
    }
}
