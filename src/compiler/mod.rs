//! Pure path-segment to APL compiler.
//!
//! `compile_segments` takes a dataset name and the ordered path segments found under a
//! dataset's `q/` tree and produces the APL text the executor will run. No I/O, no
//! clocks, no global state: the same inputs always yield the same [`CompiledQuery`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::fmt;
use std::time::Duration;

/// Output format requested by a compiled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ndjson,
    Csv,
    Json,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Ndjson => "ndjson",
            Format::Csv => "csv",
            Format::Json => "json",
        }
    }

    fn parse(ext: &str) -> Option<Self> {
        match ext {
            "ndjson" => Some(Format::Ndjson),
            "csv" => Some(Format::Csv),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

/// Compiler knobs, threaded in from configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Default range duration applied when no `range` segment appears, e.g. `"1h"`.
    pub default_range: String,
    /// Default row cap appended when no `limit`/`top` segment appears. `None` disables it.
    pub default_row_cap: Option<u64>,
    /// Upper bound on any explicit range's span. `None` means unbounded.
    pub max_range: Option<Duration>,
    /// Upper bound on any explicit `limit`/`top` value. `None` means unbounded.
    pub max_row_cap: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self { default_range: "1h".to_string(), default_row_cap: Some(10_000), max_range: None, max_row_cap: None }
    }
}

/// Result of compiling a segment list against a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub dataset: String,
    pub text: String,
    pub format: Format,
    /// Set when the terminating segment was `result.error`: the underlying text still
    /// compiles (format collapses to ndjson for execution) but the caller must wrap the
    /// outcome in the error envelope rather than returning raw encoded bytes.
    pub error_sentinel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    EmptyDataset,
    UnknownKeyword(String),
    MissingArgument { keyword: &'static str },
    InvalidEncoding(String),
    InvalidDuration(String),
    RangeTooWide,
    InvalidTimestamp(String),
    RangeInverted,
    InvalidCap(String),
    CapTooLarge,
    InvalidOrder(String),
    UnknownFormat(String),
    TrailingSegments,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::EmptyDataset => write!(f, "dataset name must not be empty"),
            CompileError::UnknownKeyword(s) => write!(f, "unknown path segment: {s}"),
            CompileError::MissingArgument { keyword } => write!(f, "{keyword}: missing argument"),
            CompileError::InvalidEncoding(s) => write!(f, "segment is not valid percent or base64 encoding: {s}"),
            CompileError::InvalidDuration(s) => write!(f, "not a valid duration: {s}"),
            CompileError::RangeTooWide => write!(f, "range exceeds the configured maximum"),
            CompileError::InvalidTimestamp(s) => write!(f, "not a valid RFC3339 timestamp: {s}"),
            CompileError::RangeInverted => write!(f, "range end precedes range start"),
            CompileError::InvalidCap(s) => write!(f, "not a valid row count: {s}"),
            CompileError::CapTooLarge => write!(f, "row cap exceeds the configured maximum"),
            CompileError::InvalidOrder(s) => write!(f, "not a valid order clause: {s}"),
            CompileError::UnknownFormat(s) => write!(f, "unknown output format: {s}"),
            CompileError::TrailingSegments => write!(f, "segments after result.<ext> are not permitted"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compiles `segments` for `dataset` under `opts`. Pure function: no I/O, no shared state.
pub fn compile_segments(dataset: &str, segments: &[String], opts: &Options) -> Result<CompiledQuery, CompileError> {
    if dataset.is_empty() {
        return Err(CompileError::EmptyDataset);
    }

    let mut steps: Vec<String> = Vec::new();
    let mut range_present = false;
    let mut cap_present = false;
    let mut format = Format::Ndjson;
    let mut error_sentinel = false;

    let mut i = 0usize;
    while i < segments.len() {
        let keyword = segments[i].as_str();

        if let Some(ext) = keyword.strip_prefix("result.") {
            match ext {
                "ndjson" => format = Format::Ndjson,
                "csv" => format = Format::Csv,
                "json" => format = Format::Json,
                "error" => {
                    format = Format::Ndjson;
                    error_sentinel = true;
                }
                other => return Err(CompileError::UnknownFormat(other.to_string())),
            }
            if i + 1 != segments.len() {
                return Err(CompileError::TrailingSegments);
            }
            i += 1;
            continue;
        }

        match keyword {
            "range" => {
                let (clause, consumed) = compile_range(segments, i, opts)?;
                steps.push(clause);
                range_present = true;
                i += consumed;
            }
            "where" => {
                let expr = decode_segment(arg(segments, i, 1, "where")?)?;
                steps.push(format!("where {expr}"));
                i += 2;
            }
            "search" => {
                let term = decode_segment(arg(segments, i, 1, "search")?)?;
                let escaped = term.replace('\\', "\\\\").replace('"', "\\\"");
                steps.push(format!("search \"{escaped}\""));
                i += 2;
            }
            "summarize" => {
                let agg = decode_segment(arg(segments, i, 1, "summarize")?)?;
                if segments.get(i + 2).map(String::as_str) == Some("by") {
                    let fields = decode_segment(arg(segments, i, 3, "summarize")?)?;
                    steps.push(format!("summarize {agg} by {fields}"));
                    i += 4;
                } else {
                    steps.push(format!("summarize {agg}"));
                    i += 2;
                }
            }
            "project" => {
                let fields = decode_segment(arg(segments, i, 1, "project")?)?;
                steps.push(format!("project {fields}"));
                i += 2;
            }
            "project-away" => {
                let fields = decode_segment(arg(segments, i, 1, "project-away")?)?;
                steps.push(format!("project-away {fields}"));
                i += 2;
            }
            "order" => {
                let raw = arg(segments, i, 1, "order")?;
                let (field, dir) = split_field_dir(raw)?;
                steps.push(format!("order by {field} {dir}"));
                i += 2;
            }
            "limit" => {
                let raw = arg(segments, i, 1, "limit")?;
                let n = parse_row_cap(raw, opts)?;
                steps.push(format!("take {n}"));
                cap_present = true;
                i += 2;
            }
            "top" => {
                let n_raw = arg(segments, i, 1, "top")?;
                let n = parse_row_cap(n_raw, opts)?;
                if segments.get(i + 2).map(String::as_str) != Some("by") {
                    return Err(CompileError::MissingArgument { keyword: "top" });
                }
                let field_dir = arg(segments, i, 3, "top")?;
                let (field, dir) = split_field_dir(field_dir)?;
                steps.push(format!("top {n} by {field} {dir}"));
                cap_present = true;
                i += 4;
            }
            "format" => {
                let raw = arg(segments, i, 1, "format")?;
                format = Format::parse(raw).ok_or_else(|| CompileError::UnknownFormat(raw.to_string()))?;
                i += 2;
            }
            other => return Err(CompileError::UnknownKeyword(other.to_string())),
        }
    }

    if !range_present {
        steps.insert(0, default_range_clause(opts));
    }
    if !cap_present {
        if let Some(cap) = opts.default_row_cap {
            if cap > 0 {
                steps.push(format!("take {cap}"));
            }
        }
    }

    Ok(CompiledQuery { dataset: dataset.to_string(), text: assemble(dataset, &steps), format, error_sentinel })
}

fn arg<'a>(segments: &'a [String], base: usize, offset: usize, keyword: &'static str) -> Result<&'a str, CompileError> {
    segments.get(base + offset).map(String::as_str).ok_or(CompileError::MissingArgument { keyword })
}

fn assemble(dataset: &str, steps: &[String]) -> String {
    let mut text = format!("['{dataset}']");
    if !steps.is_empty() {
        text.push_str("\n| ");
        text.push_str(&steps.join("\n| "));
    }
    text
}

fn default_range_clause(opts: &Options) -> String {
    let range = if opts.default_range.is_empty() { "1h" } else { opts.default_range.as_str() };
    format!("where _time between (ago({range}) .. now())")
}

fn compile_range(segments: &[String], base: usize, opts: &Options) -> Result<(String, usize), CompileError> {
    match segments.get(base + 1).map(String::as_str) {
        Some("ago") => {
            let dur_raw = arg(segments, base, 2, "range ago")?;
            let dur = humantime::parse_duration(dur_raw).map_err(|_| CompileError::InvalidDuration(dur_raw.to_string()))?;
            if let Some(max) = opts.max_range {
                if dur > max {
                    return Err(CompileError::RangeTooWide);
                }
            }
            Ok((format!("where _time between (ago({dur_raw}) .. now())"), 3))
        }
        Some("from") => {
            let t1_raw = arg(segments, base, 2, "range from")?;
            if segments.get(base + 3).map(String::as_str) != Some("to") {
                return Err(CompileError::MissingArgument { keyword: "range from/to" });
            }
            let t2_raw = arg(segments, base, 4, "range from/to")?;
            let t1 = chrono::DateTime::parse_from_rfc3339(t1_raw).map_err(|_| CompileError::InvalidTimestamp(t1_raw.to_string()))?;
            let t2 = chrono::DateTime::parse_from_rfc3339(t2_raw).map_err(|_| CompileError::InvalidTimestamp(t2_raw.to_string()))?;
            if t2 < t1 {
                return Err(CompileError::RangeInverted);
            }
            if let Some(max) = opts.max_range {
                let span = (t2 - t1).to_std().unwrap_or(Duration::ZERO);
                if span > max {
                    return Err(CompileError::RangeTooWide);
                }
            }
            Ok((format!("where _time between (datetime(\"{t1_raw}\") .. datetime(\"{t2_raw}\"))"), 5))
        }
        _ => Err(CompileError::MissingArgument { keyword: "range" }),
    }
}

fn parse_row_cap(raw: &str, opts: &Options) -> Result<u64, CompileError> {
    let n: u64 = raw.parse().map_err(|_| CompileError::InvalidCap(raw.to_string()))?;
    if let Some(max) = opts.max_row_cap {
        if n > max {
            return Err(CompileError::CapTooLarge);
        }
    }
    Ok(n)
}

fn split_field_dir(raw: &str) -> Result<(&str, &str), CompileError> {
    let (field, dir) = raw.split_once(':').ok_or_else(|| CompileError::InvalidOrder(raw.to_string()))?;
    if field.is_empty() || (dir != "asc" && dir != "desc") {
        return Err(CompileError::InvalidOrder(raw.to_string()));
    }
    Ok((field, dir))
}

/// Decodes a single path segment used as a free-form argument (expression, term, field
/// list, aggregation). Percent-encoding wins when present; otherwise a raw-URL-safe
/// base64 segment is accepted if it round-trips and decodes to valid UTF-8; otherwise
/// the segment passes through unescaped.
fn decode_segment(raw: &str) -> Result<String, CompileError> {
    if raw.contains('%') {
        return percent_encoding::percent_decode_str(raw)
            .decode_utf8()
            .map(|s| s.into_owned())
            .map_err(|_| CompileError::InvalidEncoding(raw.to_string()));
    }
    if let Ok(bytes) = URL_SAFE_NO_PAD.decode(raw) {
        if URL_SAFE_NO_PAD.encode(&bytes) == raw {
            if let Ok(s) = String::from_utf8(bytes) {
                return Ok(s);
            }
        }
    }
    Ok(raw.to_string())
}
