//! In-Memory Search Backend (for testing)
//!
//! HashMap-based backend with the write semantics of a document index
//! (overwrite by id, partial update, upsert, alias resolution) plus knobs
//! for injecting failures and counters for asserting on traffic.
//! NOT for production use.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::models::{CompiledCondition, Document, PendingOperation, StoredDocument};
use crate::domain::ports::{BulkItemOutcome, BulkResponse, SearchBackend};
use crate::error::{Result, TableError};

#[derive(Debug, Clone, Default)]
struct MemoryIndex {
    body: Value,
    documents: BTreeMap<String, Document>,
}

#[derive(Default)]
struct Faults {
    /// Remaining bulk calls to fail at transport level
    fail_bulk_times: AtomicUsize,
    fail_bulk_always: AtomicBool,
    /// Existence checks always answer "absent"
    stale_existence_checks: AtomicBool,
    fail_existence_checks: AtomicBool,
    fail_index_creation: AtomicBool,
    /// Document ids rejected with a conflict inside bulk responses
    rejected_ids: Mutex<HashSet<String>>,
    bulk_delay: Mutex<Option<Duration>>,
}

#[derive(Default)]
struct Traffic {
    bulk_calls: Mutex<Vec<usize>>,
    index_creations: AtomicUsize,
    bulk_in_flight: AtomicUsize,
    max_bulk_in_flight: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct InMemorySearchBackend {
    indices: Arc<RwLock<HashMap<String, MemoryIndex>>>,
    /// alias → index
    aliases: Arc<RwLock<HashMap<String, String>>>,
    faults: Arc<Faults>,
    traffic: Arc<Traffic>,
}

impl InMemorySearchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Failure injection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Fail the next `times` bulk calls with a transport error
    pub fn fail_bulk_times(&self, times: usize) {
        self.faults.fail_bulk_times.store(times, Ordering::SeqCst);
    }

    pub fn fail_bulk_always(&self, enabled: bool) {
        self.faults.fail_bulk_always.store(enabled, Ordering::SeqCst);
    }

    /// Existence checks answer "absent" even for existing indices,
    /// as seen by a creator racing other processes
    pub fn set_stale_existence_checks(&self, enabled: bool) {
        self.faults
            .stale_existence_checks
            .store(enabled, Ordering::SeqCst);
    }

    pub fn fail_existence_checks(&self, enabled: bool) {
        self.faults
            .fail_existence_checks
            .store(enabled, Ordering::SeqCst);
    }

    pub fn fail_index_creation(&self, enabled: bool) {
        self.faults.fail_index_creation.store(enabled, Ordering::SeqCst);
    }

    /// Reject operations on document `id` inside bulk responses
    pub fn reject_document(&self, id: impl Into<String>) {
        self.faults.rejected_ids.lock().insert(id.into());
    }

    /// Hold every bulk call for `delay`
    pub fn set_bulk_delay(&self, delay: Option<Duration>) {
        *self.faults.bulk_delay.lock() = delay;
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Inspection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Operation count of every bulk call, in call order
    pub fn bulk_call_sizes(&self) -> Vec<usize> {
        self.traffic.bulk_calls.lock().clone()
    }

    pub fn bulk_call_count(&self) -> usize {
        self.traffic.bulk_calls.lock().len()
    }

    /// Highest number of bulk calls observed executing at once
    pub fn max_concurrent_bulk_calls(&self) -> usize {
        self.traffic.max_bulk_in_flight.load(Ordering::SeqCst)
    }

    /// Successful index creations
    pub fn index_creation_count(&self) -> usize {
        self.traffic.index_creations.load(Ordering::SeqCst)
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create-index body an index was created with
    pub fn index_body(&self, index: &str) -> Option<Value> {
        let name = self.resolve(index)?;
        self.indices.read().get(&name).map(|i| i.body.clone())
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.resolve(index)
            .and_then(|name| self.indices.read().get(&name).map(|i| i.documents.len()))
            .unwrap_or(0)
    }

    pub fn get_document(&self, index: &str, id: &str) -> Option<Document> {
        let name = self.resolve(index)?;
        self.indices
            .read()
            .get(&name)
            .and_then(|i| i.documents.get(id).cloned())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Internals
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Concrete index name behind a name or alias
    fn resolve(&self, name: &str) -> Option<String> {
        if self.indices.read().contains_key(name) {
            return Some(name.to_string());
        }
        self.aliases.read().get(name).cloned()
    }

    fn take_bulk_fault(&self) -> bool {
        if self.faults.fail_bulk_always.load(Ordering::SeqCst) {
            return true;
        }
        self.faults
            .fail_bulk_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, position: usize, operation: &PendingOperation) -> BulkItemOutcome {
        let requested = operation.index_name();
        let index = self.resolve(requested).unwrap_or_else(|| requested.to_string());
        let mut outcome = BulkItemOutcome {
            position,
            action: operation.action(),
            index: index.clone(),
            id: operation.id().map(str::to_string),
            status: 200,
            failure: None,
        };

        if let Some(id) = operation.id() {
            if self.faults.rejected_ids.lock().contains(id) {
                outcome.status = 409;
                outcome.failure = Some(format!(
                    "version_conflict_engine_exception: [{}]: version conflict",
                    id
                ));
                return outcome;
            }
        }

        let mut indices = self.indices.write();
        match operation {
            PendingOperation::Index { id, source, .. } => {
                // Indexing into a missing index creates it, as a real backend does.
                let target = indices.entry(index).or_default();
                let id = id
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                let replaced = target.documents.insert(id.clone(), source.clone());
                outcome.status = if replaced.is_some() { 200 } else { 201 };
                outcome.id = Some(id);
            }
            PendingOperation::Update {
                id, doc, upsert, ..
            } => {
                let existing = indices
                    .get_mut(&index)
                    .and_then(|target| target.documents.get_mut(id));
                match existing {
                    Some(stored) => {
                        for (field, value) in doc {
                            stored.insert(field.clone(), value.clone());
                        }
                    }
                    None if *upsert => {
                        indices
                            .entry(index)
                            .or_default()
                            .documents
                            .insert(id.clone(), doc.clone());
                        outcome.status = 201;
                    }
                    None => {
                        outcome.status = 404;
                        outcome.failure =
                            Some(format!("document_missing_exception: [{}]: document missing", id));
                    }
                }
            }
            PendingOperation::Delete { id, .. } => {
                let removed = indices
                    .get_mut(&index)
                    .and_then(|target| target.documents.remove(id));
                if removed.is_none() {
                    // A missing document is a "not_found" result, not a failure.
                    outcome.status = 404;
                }
            }
        }
        outcome
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    async fn index_exists(&self, index: &str) -> Result<bool> {
        if self.faults.fail_existence_checks.load(Ordering::SeqCst) {
            return Err(TableError::transport(format!(
                "Connection reset while checking index {}",
                index
            )));
        }
        if self.faults.stale_existence_checks.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.resolve(index).is_some())
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<()> {
        if self.faults.fail_index_creation.load(Ordering::SeqCst) {
            return Err(TableError::backend(500, "internal_server_error"));
        }

        let mut indices = self.indices.write();
        let mut aliases = self.aliases.write();
        if indices.contains_key(index) || aliases.contains_key(index) {
            return Err(TableError::index_already_exists(index));
        }

        indices.insert(
            index.to_string(),
            MemoryIndex {
                body: body.clone(),
                documents: BTreeMap::new(),
            },
        );
        if let Some(Value::Object(requested)) = body.get("aliases") {
            for alias in requested.keys() {
                aliases.insert(alias.clone(), index.to_string());
            }
        }
        self.traffic.index_creations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bulk(&self, operations: &[PendingOperation]) -> Result<BulkResponse> {
        self.traffic.bulk_calls.lock().push(operations.len());
        let in_flight = self.traffic.bulk_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.traffic
            .max_bulk_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.faults.bulk_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.take_bulk_fault() {
            Err(TableError::transport("Connection refused"))
        } else {
            let started = Instant::now();
            let items = operations
                .iter()
                .enumerate()
                .map(|(position, operation)| self.apply(position, operation))
                .collect();
            Ok(BulkResponse {
                took: started.elapsed(),
                items,
            })
        };

        self.traffic.bulk_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn search(
        &self,
        index: &str,
        condition: &CompiledCondition,
        limit: usize,
    ) -> Result<Vec<StoredDocument>> {
        let name = self.resolve(index).ok_or_else(|| {
            TableError::backend(404, format!("index_not_found_exception: no such index [{}]", index))
        })?;

        let indices = self.indices.read();
        let Some(target) = indices.get(&name) else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for (id, source) in &target.documents {
            if hits.len() >= limit {
                break;
            }
            if matches(condition.as_json(), id, source)? {
                hits.push(StoredDocument {
                    index: name.clone(),
                    id: id.clone(),
                    source: source.clone(),
                });
            }
        }
        Ok(hits)
    }
}

/// Evaluate the query subset used by tables: `match_all`, `term`, `match`,
/// `ids` and `bool` (`must`, `filter`, `should`, `must_not`)
fn matches(query: &Value, id: &str, source: &Document) -> Result<bool> {
    let Some((kind, body)) = query.as_object().and_then(|q| q.iter().next()) else {
        return Err(TableError::backend(400, format!("parsing_exception: malformed query {}", query)));
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "term" | "match" => {
            let Some((field, expected)) = body.as_object().and_then(|b| b.iter().next()) else {
                return Err(TableError::backend(400, format!("parsing_exception: empty {}", kind)));
            };
            // {"field": {"value": x}} and {"field": {"query": x}} forms
            let expected = expected
                .get("value")
                .or_else(|| expected.get("query"))
                .unwrap_or(expected);
            let field = field.strip_suffix(".keyword").unwrap_or(field);
            Ok(source.get(field) == Some(expected))
        }
        "ids" => Ok(body
            .get("values")
            .and_then(Value::as_array)
            .is_some_and(|values| values.iter().any(|v| v.as_str() == Some(id)))),
        "bool" => {
            let clauses = |name: &str| -> Vec<Value> {
                match body.get(name) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(single) => vec![single.clone()],
                    None => Vec::new(),
                }
            };
            for clause in clauses("must").iter().chain(clauses("filter").iter()) {
                if !matches(clause, id, source)? {
                    return Ok(false);
                }
            }
            for clause in &clauses("must_not") {
                if matches(clause, id, source)? {
                    return Ok(false);
                }
            }
            let should = clauses("should");
            if should.is_empty() {
                return Ok(true);
            }
            for clause in &should {
                if matches(clause, id, source)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(TableError::backend(
            400,
            format!("parsing_exception: unsupported query [{}]", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn index_op(id: Option<&str>, source: Value) -> PendingOperation {
        PendingOperation::Index {
            index: "stock".to_string(),
            id: id.map(str::to_string),
            source: doc(source),
        }
    }

    #[tokio::test]
    async fn test_index_overwrites_by_id() {
        let backend = InMemorySearchBackend::new();
        let response = backend
            .bulk(&[
                index_op(Some("IBM"), json!({"symbol": "IBM", "price": 1.0})),
                index_op(Some("IBM"), json!({"symbol": "IBM", "price": 2.0})),
            ])
            .await
            .unwrap();

        assert_eq!(response.items[0].status, 201);
        assert_eq!(response.items[1].status, 200);
        assert_eq!(backend.document_count("stock"), 1);
        assert_eq!(
            backend.get_document("stock", "IBM").unwrap()["price"],
            json!(2.0)
        );
    }

    #[tokio::test]
    async fn test_index_without_id_generates_one() {
        let backend = InMemorySearchBackend::new();
        let response = backend
            .bulk(&[
                index_op(None, json!({"symbol": "IBM"})),
                index_op(None, json!({"symbol": "IBM"})),
            ])
            .await
            .unwrap();
        assert_eq!(backend.document_count("stock"), 2);
        assert_ne!(response.items[0].id, response.items[1].id);
    }

    #[tokio::test]
    async fn test_update_and_upsert() {
        let backend = InMemorySearchBackend::new();
        backend
            .bulk(&[index_op(Some("IBM"), json!({"symbol": "IBM", "price": 1.0}))])
            .await
            .unwrap();

        let response = backend
            .bulk(&[
                PendingOperation::Update {
                    index: "stock".to_string(),
                    id: "IBM".to_string(),
                    doc: doc(json!({"price": 3.0})),
                    upsert: false,
                },
                PendingOperation::Update {
                    index: "stock".to_string(),
                    id: "WSO2".to_string(),
                    doc: doc(json!({"price": 4.0})),
                    upsert: false,
                },
                PendingOperation::Update {
                    index: "stock".to_string(),
                    id: "ORCL".to_string(),
                    doc: doc(json!({"symbol": "ORCL"})),
                    upsert: true,
                },
            ])
            .await
            .unwrap();

        assert_eq!(
            Value::Object(backend.get_document("stock", "IBM").unwrap()),
            json!({"symbol": "IBM", "price": 3.0})
        );
        assert!(response.items[1].is_failure());
        assert_eq!(response.items[2].status, 201);
        assert!(backend.get_document("stock", "ORCL").is_some());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_failure() {
        let backend = InMemorySearchBackend::new();
        let response = backend
            .bulk(&[PendingOperation::Delete {
                index: "stock".to_string(),
                id: "IBM".to_string(),
            }])
            .await
            .unwrap();
        assert!(!response.has_failures());
        assert_eq!(response.items[0].status, 404);
    }

    #[tokio::test]
    async fn test_rejected_document() {
        let backend = InMemorySearchBackend::new();
        backend.reject_document("IBM");
        let response = backend
            .bulk(&[
                index_op(Some("IBM"), json!({"symbol": "IBM"})),
                index_op(Some("WSO2"), json!({"symbol": "WSO2"})),
            ])
            .await
            .unwrap();
        assert_eq!(response.failures().len(), 1);
        assert_eq!(response.failures()[0].status, 409);
        assert_eq!(backend.document_count("stock"), 1);
    }

    #[tokio::test]
    async fn test_bulk_fault_injection() {
        let backend = InMemorySearchBackend::new();
        backend.fail_bulk_times(2);
        assert!(backend.bulk(&[]).await.is_err());
        assert!(backend.bulk(&[]).await.is_err());
        assert!(backend.bulk(&[]).await.is_ok());
        assert_eq!(backend.bulk_call_sizes(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_create_index_registers_alias() {
        let backend = InMemorySearchBackend::new();
        backend
            .create_index("stock_v1", &json!({"aliases": {"stock": {}}}))
            .await
            .unwrap();
        assert!(backend.index_exists("stock").await.unwrap());

        let err = backend.create_index("stock", &json!({})).await.unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::IndexAlreadyExists);

        backend
            .bulk(&[index_op(Some("IBM"), json!({"symbol": "IBM"}))])
            .await
            .unwrap();
        assert_eq!(backend.document_count("stock_v1"), 1);
    }

    #[tokio::test]
    async fn test_search_queries() {
        let backend = InMemorySearchBackend::new();
        backend
            .bulk(&[
                index_op(Some("IBM"), json!({"symbol": "IBM", "volume": 10})),
                index_op(Some("WSO2"), json!({"symbol": "WSO2", "volume": 10})),
                index_op(Some("ORCL"), json!({"symbol": "ORCL", "volume": 20})),
            ])
            .await
            .unwrap();

        let all = backend
            .search("stock", &CompiledCondition::match_all(), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let limited = backend
            .search("stock", &CompiledCondition::match_all(), 2)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);

        let ibm = backend
            .search("stock", &CompiledCondition::term("symbol.keyword", "IBM"), 10)
            .await
            .unwrap();
        assert_eq!(ibm.len(), 1);
        assert_eq!(ibm[0].id, "IBM");

        let condition = CompiledCondition(json!({
            "bool": {
                "filter": [{"term": {"volume": 10}}],
                "must_not": {"ids": {"values": ["WSO2"]}}
            }
        }));
        let hits = backend.search("stock", &condition, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "IBM");
    }

    #[tokio::test]
    async fn test_search_missing_index_and_bad_query() {
        let backend = InMemorySearchBackend::new();
        let err = backend
            .search("stock", &CompiledCondition::match_all(), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Backend);

        backend
            .bulk(&[index_op(Some("IBM"), json!({"symbol": "IBM"}))])
            .await
            .unwrap();
        let err = backend
            .search("stock", &CompiledCondition(json!({"regexp": {"symbol": "I.*"}})), 10)
            .await
            .unwrap_err();
        assert!(err.message.contains("regexp"));
    }
}
