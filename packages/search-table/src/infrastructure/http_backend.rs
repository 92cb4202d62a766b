//! HTTP Search Backend
//!
//! Talks to an Elasticsearch-compatible REST API:
//!
//! - `HEAD /{index}`: existence check
//! - `PUT /{index}`: create with settings, mappings and aliases
//! - `POST /_bulk`: NDJSON bulk request
//! - `POST /{index}/_search`: query with size limit
//!
//! Requests go to the configured hosts round-robin; a host that cannot be
//! reached is skipped in favor of the next one.

use async_trait::async_trait;
use reqwest::{Certificate, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::{ConfigError, TableConfig};
use crate::domain::models::{CompiledCondition, Document, PendingOperation, StoredDocument};
use crate::domain::ports::{BulkItemOutcome, BulkResponse, SearchBackend};
use crate::error::{Result, TableError};

const NDJSON: &str = "application/x-ndjson";
const ALREADY_EXISTS: &str = "resource_already_exists_exception";

pub struct HttpSearchBackend {
    client: Client,
    hosts: Vec<Url>,
    next_host: AtomicUsize,
    username: String,
    password: String,
}

impl HttpSearchBackend {
    /// Build the client: hosts, credentials, timeouts and trust material
    pub fn from_config(config: &TableConfig) -> Result<Self> {
        let hosts = parse_hosts(config)?;

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(config.connection_timeout_ms))
            .timeout(Duration::from_millis(config.socket_timeout_ms));

        if config.ssl_enabled {
            let path = config.trust_store_path.as_ref().ok_or_else(|| ConfigError::Missing {
                option: "trust.store.path".to_string(),
                reason: "a trust store is required when ssl.enabled is true".to_string(),
            })?;
            let pem = std::fs::read(path).map_err(|e| {
                TableError::transport(format!(
                    "Failed to read trust store {}: {}",
                    path.display(),
                    e
                ))
                .with_source(e)
            })?;
            let certificate = Certificate::from_pem(&pem).map_err(|e| {
                TableError::transport(format!(
                    "Failed to load certificate from trust store {}: {}",
                    path.display(),
                    e
                ))
                .with_source(e)
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().map_err(|e| {
            TableError::transport(format!("Failed to create HTTP client: {}", e)).with_source(e)
        })?;

        Ok(Self {
            client,
            hosts,
            next_host: AtomicUsize::new(0),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    /// Send a request to `path` on the next host, failing over to the
    /// following hosts on connect errors
    async fn send<F>(&self, path: &[&str], build: F) -> Result<Response>
    where
        F: Fn(&Client, Url) -> RequestBuilder,
    {
        let start = self.next_host.fetch_add(1, Ordering::Relaxed);
        let mut last_error = None;

        for offset in 0..self.hosts.len() {
            let host = &self.hosts[(start + offset) % self.hosts.len()];
            let request = build(&self.client, endpoint(host, path)?)
                .basic_auth(&self.username, Some(&self.password));

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    debug!("Search host {} unavailable: {}", host, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(match last_error {
            Some(e) => TableError::transport(format!("All search hosts failed, last error: {}", e))
                .with_source(e),
            None => TableError::config("No search hosts configured"),
        })
    }
}

impl fmt::Debug for HttpSearchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSearchBackend")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .finish()
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .send(&[index], |client, url| client.head(url))
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TableError::backend(
                status.as_u16(),
                format!("unexpected answer checking index {}", index),
            )),
        }
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        let response = self
            .send(&[index], |client, url| client.put(url).json(body))
            .await?;
        let status = response.status();
        if status.is_success() {
            debug!("Created index {}", index);
            return Ok(());
        }

        let error: Value = response.json().await.unwrap_or(Value::Null);
        if error_type(&error) == Some(ALREADY_EXISTS) {
            return Err(TableError::index_already_exists(index));
        }
        Err(TableError::backend(status.as_u16(), error_reason(&error)))
    }

    async fn bulk(&self, operations: &[PendingOperation]) -> Result<BulkResponse> {
        let body = encode_bulk_body(operations)?;
        let response = self
            .send(&["_bulk"], |client, url| {
                client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, NDJSON)
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(TableError::backend(status.as_u16(), error_reason(&payload)));
        }
        decode_bulk_response(operations, payload)
    }

    async fn search(
        &self,
        index: &str,
        condition: &CompiledCondition,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let request = json!({ "query": condition.as_json(), "size": limit });
        let response = self
            .send(&[index, "_search"], |client, url| client.post(url).json(&request))
            .await?;

        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(TableError::backend(status.as_u16(), error_reason(&payload)));
        }
        decode_search_response(payload)
    }
}

/// Hosts from `elasticsearch.member.list`, or `scheme://hostname:port`
pub fn parse_hosts(config: &TableConfig) -> std::result::Result<Vec<Url>, ConfigError> {
    let raw: Vec<String> = match &config.member_list {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => vec![format!("{}://{}:{}", config.scheme, config.hostname, config.port)],
    };

    if raw.is_empty() {
        return Err(ConfigError::Missing {
            option: "elasticsearch.member.list".to_string(),
            reason: "the member list names no hosts".to_string(),
        });
    }

    raw.into_iter()
        .map(|entry| {
            let url = Url::parse(&entry).map_err(|e| ConfigError::MalformedUrl {
                url: entry.clone(),
                reason: e.to_string(),
            })?;
            match url.scheme() {
                "http" | "https" if url.host_str().is_some() => Ok(url),
                _ => Err(ConfigError::MalformedUrl {
                    url: entry,
                    reason: "expected an http(s) url with a host".to_string(),
                }),
            }
        })
        .collect()
}

/// `host` with `segments` appended as percent-encoded path segments
fn endpoint(host: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|_| TableError::config(format!("Search host {} cannot carry a path", host)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// NDJSON body: one action line per operation, followed by its source line
pub fn encode_bulk_body(operations: &[PendingOperation]) -> Result<String> {
    let mut body = String::new();
    for operation in operations {
        let mut meta = serde_json::Map::new();
        meta.insert("_index".to_string(), json!(operation.index_name()));
        if let Some(id) = operation.id() {
            meta.insert("_id".to_string(), json!(id));
        }
        body.push_str(&serde_json::to_string(&json!({ operation.action(): meta }))?);
        body.push('\n');

        match operation {
            PendingOperation::Index { source, .. } => {
                body.push_str(&serde_json::to_string(source)?);
                body.push('\n');
            }
            PendingOperation::Update { doc, upsert, .. } => {
                body.push_str(&serde_json::to_string(
                    &json!({ "doc": doc, "doc_as_upsert": upsert }),
                )?);
                body.push('\n');
            }
            PendingOperation::Delete { .. } => {}
        }
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    items: Vec<HashMap<String, RawBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_index", default)]
    index: String,
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<Value>,
}

/// Map a bulk response onto the operations it answers, by position
pub fn decode_bulk_response(operations: &[PendingOperation], payload: Value) -> Result<BulkResponse> {
    let raw: RawBulkResponse = serde_json::from_value(payload)?;
    if raw.items.len() != operations.len() {
        return Err(TableError::transport(format!(
            "Bulk response has {} items for {} operations",
            raw.items.len(),
            operations.len()
        )));
    }

    let items = raw
        .items
        .into_iter()
        .zip(operations)
        .enumerate()
        .map(|(position, (mut entry, operation))| {
            let item = entry.remove(operation.action()).or_else(|| {
                entry.into_values().next()
            });
            match item {
                Some(item) => BulkItemOutcome {
                    position,
                    action: operation.action(),
                    index: item.index,
                    id: item.id,
                    status: item.status,
                    failure: item.error.as_ref().map(error_reason),
                },
                None => BulkItemOutcome {
                    position,
                    action: operation.action(),
                    index: operation.index_name().to_string(),
                    id: operation.id().map(str::to_string),
                    status: 0,
                    failure: Some("empty bulk response item".to_string()),
                },
            }
        })
        .collect();

    Ok(BulkResponse {
        took: Duration::from_millis(raw.took),
        items,
    })
}

#[derive(Debug, Deserialize)]
struct RawSearchResponse {
    hits: RawHits,
}

#[derive(Debug, Deserialize)]
struct RawHits {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Document,
}

pub fn decode_search_response(payload: Value) -> Result<Vec<StoredDocument>> {
    let raw: RawSearchResponse = serde_json::from_value(payload)?;
    Ok(raw
        .hits
        .hits
        .into_iter()
        .map(|hit| StoredDocument {
            index: hit.index,
            id: hit.id,
            source: hit.source,
        })
        .collect())
}

/// `error.type` of an error body (`{"error": {"type": ...}}` or the inner object)
fn error_type(body: &Value) -> Option<&str> {
    body.get("error")
        .unwrap_or(body)
        .get("type")
        .and_then(Value::as_str)
}

/// `type: reason` of an error body, or the raw body
fn error_reason(body: &Value) -> String {
    let error = match body.get("error") {
        Some(Value::String(message)) => return message.clone(),
        Some(error) => error,
        None => body,
    };
    match (
        error.get("type").and_then(Value::as_str),
        error.get("reason").and_then(Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (Some(kind), None) => kind.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => body.to_string(),
    }
}
