//! Client for the remote APL query service. The transport details (connection pooling,
//! TLS, retry backoff curve) are `reqwest`/`backoff` concerns; this module owns the
//! request shapes, auth headers, and error classification the rest of the crate depends on.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A dataset known to the upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "who")]
    pub created_by: Option<String>,
    #[serde(default, rename = "created")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A field (column) of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// One table of an APL query result. The upstream service has shipped both row-major
/// and column-major table shapes historically; both deserialize here, and [`Table::rows`]
/// gives callers a uniform row-iteration view regardless of which arrived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Row-major data: one inner `Vec` per row, values positional to `fields`.
    #[serde(default)]
    pub rows: Option<Vec<Vec<Value>>>,
    /// Column-major data: one inner `Vec` per field, values positional to rows.
    #[serde(default)]
    pub columns: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    pub status: Value,
}

impl Table {
    /// Rows, in order, aligned to `fields` regardless of the wire shape.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        if let Some(rows) = &self.rows {
            return rows.clone();
        }
        if let Some(columns) = &self.columns {
            let len = columns.iter().map(|c| c.len()).max().unwrap_or(0);
            return (0..len)
                .map(|i| columns.iter().map(|c| c.get(i).cloned().unwrap_or(Value::Null)).collect())
                .collect();
        }
        Vec::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub agg: Option<String>,
}

/// Result of an APL query: the tables the upstream returned, in order.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone)]
pub enum Error {
    Transport(String),
    Status(u16, String),
    Auth,
    Cancelled,
    Decode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(s) => write!(f, "upstream transport error: {s}"),
            Error::Status(code, body) => write!(f, "upstream returned status {code}: {body}"),
            Error::Auth => write!(f, "upstream rejected credentials"),
            Error::Cancelled => write!(f, "request cancelled"),
            Error::Decode(s) => write!(f, "failed to decode upstream response: {s}"),
        }
    }
}

impl std::error::Error for Error {}

/// The subset of upstream operations the rest of the crate needs. A trait so tests can
/// substitute a fake implementation without standing up an HTTP server.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn query_apl(&self, ctx: &CancellationToken, apl: &str) -> Result<QueryResult, Error>;
    async fn list_datasets(&self, ctx: &CancellationToken) -> Result<Vec<Dataset>, Error>;
    async fn list_fields(&self, ctx: &CancellationToken, dataset: &str) -> Result<Vec<Field>, Error>;
}

/// `reqwest`-backed implementation speaking bearer-token auth against a configured base URL.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    org: Option<String>,
    max_attempts: u32,
}

impl HttpClient {
    pub fn new(base_url: String, token: String, org: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url, token, org, max_attempts: 4 }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(org) = &self.org {
            req = req.header("X-Axiom-Org-Id", org);
        }
        req
    }

    async fn send_with_retry(&self, ctx: &CancellationToken, build: impl Fn() -> reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let mut backoff = backoff::ExponentialBackoffBuilder::new().with_max_elapsed_time(Some(Duration::from_secs(10))).build();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let fut = build().send();
            let resp = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                r = fut => r,
            };
            match resp {
                Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                    return Err(Error::Auth);
                }
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().is_server_error() && attempt < self.max_attempts => {
                    if let Some(delay) = backoff.next_backoff() {
                        warn!(status = %resp.status(), attempt, "upstream returned a server error, retrying");
                        tokio::select! {
                            biased;
                            _ = ctx.cancelled() => return Err(Error::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Status(status, body));
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Status(status, body));
                }
                Err(err) if attempt < self.max_attempts => {
                    if let Some(delay) = backoff.next_backoff() {
                        warn!(%err, attempt, "upstream transport error, retrying");
                        tokio::select! {
                            biased;
                            _ = ctx.cancelled() => return Err(Error::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    return Err(Error::Transport(err.to_string()));
                }
                Err(err) => return Err(Error::Transport(err.to_string())),
            }
        }
    }
}

#[async_trait]
impl QueryClient for HttpClient {
    async fn query_apl(&self, ctx: &CancellationToken, apl: &str) -> Result<QueryResult, Error> {
        #[derive(Serialize)]
        struct Body<'a> {
            apl: &'a str,
        }
        let body = Body { apl };
        let resp = self.send_with_retry(ctx, || self.request(reqwest::Method::POST, "/v1/datasets/_apl").json(&body)).await?;
        let tables: Vec<Table> = resp.json().await.map_err(|e| Error::Decode(e.to_string()))?;
        debug!(table_count = tables.len(), "query_apl succeeded");
        Ok(QueryResult { tables })
    }

    async fn list_datasets(&self, ctx: &CancellationToken) -> Result<Vec<Dataset>, Error> {
        let resp = self.send_with_retry(ctx, || self.request(reqwest::Method::GET, "/v1/datasets")).await?;
        resp.json().await.map_err(|e| Error::Decode(e.to_string()))
    }

    async fn list_fields(&self, ctx: &CancellationToken, dataset: &str) -> Result<Vec<Field>, Error> {
        let path = format!("/v1/datasets/{dataset}/fields");
        let resp = self.send_with_retry(ctx, || self.request(reqwest::Method::GET, &path)).await?;
        resp.json().await.map_err(|e| Error::Decode(e.to_string()))
    }
}
