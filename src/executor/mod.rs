//! Wraps the upstream query client: injects default time range/row cap, fingerprints
//! requests, deduplicates concurrent identical work, encodes tabular results, and spills
//! oversize results to disk.

mod encode;
mod spill;

pub use spill::SpillFile;

use crate::cache::Cache;
use crate::compiler::Format;
use crate::singleflight::SingleFlight;
use crate::upstream::{Error as UpstreamError, QueryClient};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use spill::SpillWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Governs whether default injection and the cache are consulted for a given call.
#[derive(Debug, Clone, Copy)]
pub struct ExecOptions {
    pub use_cache: bool,
    pub ensure_time_range: bool,
    pub ensure_row_cap: bool,
}

impl ExecOptions {
    pub const COMPILED: Self = Self { use_cache: true, ensure_time_range: false, ensure_row_cap: false };
    pub const RAW_SLOT: Self = Self { use_cache: true, ensure_time_range: false, ensure_row_cap: false };
}

/// The materialized result of a query: either in-memory bytes or a disk-backed temp file.
/// `Clone` is cheap (both arms are reference-counted); the temp file is unlinked when the
/// last clone is dropped.
#[derive(Clone)]
pub enum Payload {
    Bytes(Arc<Vec<u8>>),
    File { file: Arc<SpillFile>, size: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Bytes(b) => b.len() as u64,
            Payload::File { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub enum Error {
    Upstream(UpstreamError),
    Io(String),
    UnsupportedFormat(String),
    Cancelled,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Upstream(e) => write!(f, "{e}"),
            Error::Io(s) => write!(f, "i/o error: {s}"),
            Error::UnsupportedFormat(s) => write!(f, "unsupported format: {s}"),
            Error::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<UpstreamError> for Error {
    fn from(e: UpstreamError) -> Self {
        Error::Upstream(e)
    }
}

/// Resource knobs for the executor, threaded in from configuration.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_in_memory_bytes: u64,
    pub max_cache_bytes: Option<u64>,
    pub temp_dir: PathBuf,
    pub default_row_cap: u64,
    pub default_range: String,
}

pub struct Executor {
    client: Arc<dyn QueryClient>,
    cache: Arc<Cache>,
    limits: Limits,
    single_flight: SingleFlight<String, Payload, Error>,
}

impl Executor {
    pub fn new(client: Arc<dyn QueryClient>, cache: Arc<Cache>, limits: Limits) -> Self {
        Self { client, cache, limits, single_flight: SingleFlight::new() }
    }

    /// Fingerprint used for both the cache and the single-flight key.
    pub fn fingerprint(apl: &str, format: Format) -> String {
        format!("{apl}|{}", format.extension())
    }

    pub async fn execute(&self, ctx: &CancellationToken, apl: &str, format: Format, opts: ExecOptions) -> Result<Payload, Error> {
        let mut text = apl.to_string();
        if opts.ensure_time_range {
            text = ensure_time_range(&text, &self.limits.default_range);
        }
        if opts.ensure_row_cap && self.limits.default_row_cap > 0 {
            text = ensure_row_cap(&text, self.limits.default_row_cap);
        }

        let fingerprint = Self::fingerprint(&text, format);

        if opts.use_cache {
            if let Some(bytes) = self.cache.get(&fingerprint).await {
                debug!(fingerprint, "executor cache hit");
                return Ok(Payload::Bytes(Arc::new(bytes)));
            }
        }

        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let limits = self.limits.clone();
        let client = self.client.clone();
        let text_for_leader = text.clone();
        let ctx_for_leader = ctx.clone();
        let payload = self
            .single_flight
            .run(fingerprint.clone(), move || async move {
                let result = client.query_apl(&ctx_for_leader, &text_for_leader).await?;
                encode::encode(&result.tables, format, &limits).await
            })
            .await?;

        if opts.use_cache {
            if let Payload::Bytes(bytes) = &payload {
                let fits = self.limits.max_cache_bytes.map(|max| max == 0 || bytes.len() as u64 <= max).unwrap_or(true);
                if fits {
                    self.cache.set(&fingerprint, bytes.as_ref().clone()).await;
                }
            }
        }

        Ok(payload)
    }
}

fn ensure_time_range(apl: &str, default_range: &str) -> String {
    if apl.contains("_time between") {
        return apl.to_string();
    }
    let clause = format!("where _time between (ago({default_range}) .. now())");
    match apl.find('\n') {
        Some(idx) => {
            let (head, tail) = apl.split_at(idx);
            format!("{head}\n| {clause}{tail}")
        }
        None => format!("{apl}\n| {clause}"),
    }
}

fn ensure_row_cap(apl: &str, default_cap: u64) -> String {
    let lower = apl.to_lowercase();
    if lower.contains(" take ") || lower.contains("| take") || lower.contains(" top ") {
        return apl.to_string();
    }
    format!("{apl}\n| take {default_cap}")
}

/// Error envelope for `result.error` and any compile-error sink: always well-formed JSON
/// with `apl`, `ok`, `error`, `at`, pretty-printed and newline-terminated.
pub fn error_envelope(apl: &str, error: Option<&str>) -> Vec<u8> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        apl: &'a str,
        ok: bool,
        error: &'a str,
        at: String,
    }
    let envelope = Envelope { apl, ok: error.is_none(), error: error.unwrap_or(""), at: Utc::now().to_rfc3339() };
    match serde_json::to_vec_pretty(&envelope) {
        Ok(mut bytes) => {
            bytes.push(b'\n');
            bytes
        }
        Err(_) => {
            let fallback = json!({"ok": false, "at": Utc::now().to_rfc3339()});
            let mut bytes = serde_json::to_vec(&fallback).unwrap_or_default();
            bytes.push(b'\n');
            bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_time_range_is_idempotent() {
        let with_range = "['logs']\n| where _time between (ago(1h) .. now())";
        assert_eq!(ensure_time_range(with_range, "5m"), with_range);
    }

    #[test]
    fn ensure_time_range_inserts_after_dataset_line() {
        let out = ensure_time_range("['logs']\n| take 5", "5m");
        assert_eq!(out, "['logs']\n| where _time between (ago(5m) .. now())\n| take 5");
    }

    #[test]
    fn ensure_row_cap_detects_existing_take_and_top() {
        assert_eq!(ensure_row_cap("['logs']\n| take 5", 100), "['logs']\n| take 5");
        assert_eq!(ensure_row_cap("['logs']\n| top 5 by x desc", 100), "['logs']\n| top 5 by x desc");
    }

    #[test]
    fn ensure_row_cap_appends_when_absent() {
        assert_eq!(ensure_row_cap("['logs']", 100), "['logs']\n| take 100");
    }

    #[test]
    fn error_envelope_is_well_formed() {
        let bytes = error_envelope("['logs']", None);
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["apl"], "['logs']");
        assert_eq!(v["error"], "");
        assert!(v["at"].is_string());
    }

    #[test]
    fn error_envelope_reports_failure() {
        let bytes = error_envelope("['logs']", Some("boom"));
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "boom");
    }
}
