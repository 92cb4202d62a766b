//! Index lifecycle: create-if-absent, tolerant of concurrent creators
//!
//! Per index name: `Unknown → Creating → Confirmed`. A failed attempt returns
//! the name to `Unknown` so the next write retries. Calls for the same name
//! inside one process are serialized on that name's lock; calls from other
//! processes are reconciled by treating "already exists" as success.

use dashmap::DashMap;
use parking_lot::RwLock;
use prometheus::IntCounter;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ports::SearchBackend;
use crate::domain::schema::IndexSchemaBuilder;
use crate::error::{ErrorKind, Result, TableError};

/// Lifecycle state of one index name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLifecycleState {
    Unknown,
    Creating,
    Confirmed,
}

/// How `ensure_index` confirmed an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEnsureOutcome {
    /// Already confirmed by an earlier call
    Cached,
    /// Existence check found it
    Existed,
    /// Created by this call
    Created,
    /// Another creator won the race
    CreatedConcurrently,
}

/// Index creation parameters shared by every index of a table
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
    pub alias: Option<String>,
}

/// Per-name creation lock and the state it guards
///
/// The state is readable without the lock, so inspection never waits on
/// (or is confused by) a creation in progress.
#[derive(Debug)]
struct IndexCell {
    creation: Mutex<()>,
    state: RwLock<IndexLifecycleState>,
}

impl IndexCell {
    fn state(&self) -> IndexLifecycleState {
        *self.state.read()
    }

    fn set(&self, state: IndexLifecycleState) {
        *self.state.write() = state;
    }
}

pub struct IndexLifecycleManager {
    table_id: String,
    backend: Arc<dyn SearchBackend>,
    schema: IndexSchemaBuilder,
    settings: IndexSettings,
    states: DashMap<String, Arc<IndexCell>>,
    creations: Option<IntCounter>,
}

impl IndexLifecycleManager {
    pub fn new(
        table_id: impl Into<String>,
        backend: Arc<dyn SearchBackend>,
        schema: IndexSchemaBuilder,
        settings: IndexSettings,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            backend,
            schema,
            settings,
            states: DashMap::new(),
            creations: None,
        }
    }

    /// Count indices created by this manager
    pub fn with_creation_counter(mut self, counter: IntCounter) -> Self {
        self.creations = Some(counter);
        self
    }

    pub fn schema(&self) -> &IndexSchemaBuilder {
        &self.schema
    }

    /// Make sure `index` exists, creating it when absent
    pub async fn ensure_index(&self, index: &str) -> Result<IndexEnsureOutcome> {
        let cell = self
            .states
            .entry(index.to_string())
            .or_insert_with(|| {
                Arc::new(IndexCell {
                    creation: Mutex::new(()),
                    state: RwLock::new(IndexLifecycleState::Unknown),
                })
            })
            .clone();

        if cell.state() == IndexLifecycleState::Confirmed {
            return Ok(IndexEnsureOutcome::Cached);
        }

        let _creation = cell.creation.lock().await;
        // Confirmed by the caller that held the lock before us.
        if cell.state() == IndexLifecycleState::Confirmed {
            return Ok(IndexEnsureOutcome::Cached);
        }

        cell.set(IndexLifecycleState::Creating);
        let result = self.create_if_absent(index).await;
        cell.set(match result {
            Ok(_) => IndexLifecycleState::Confirmed,
            Err(_) => IndexLifecycleState::Unknown,
        });
        result
    }

    async fn create_if_absent(&self, index: &str) -> Result<IndexEnsureOutcome> {
        debug!("Creating index: {} for table id: {}", index, self.table_id);

        match self.backend.index_exists(index).await {
            Ok(true) => {
                debug!(
                    "Index: {} has already been created for table id: {}",
                    index, self.table_id
                );
                return Ok(IndexEnsureOutcome::Existed);
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Could not check existence of index: {} for table id: {}, attempting creation: {}",
                index, self.table_id, e
            ),
        }

        let body = self.schema.create_index_body(
            self.settings.number_of_shards,
            self.settings.number_of_replicas,
            self.settings.alias.as_deref(),
        );

        match self.backend.create_index(index, &body).await {
            Ok(()) => {
                if let Some(counter) = &self.creations {
                    counter.inc();
                }
                info!("Index {} has been created for table id: {}", index, self.table_id);
                Ok(IndexEnsureOutcome::Created)
            }
            Err(e) if e.kind == ErrorKind::IndexAlreadyExists => {
                warn!(
                    "Index name: {} already created for table id: {}",
                    index, self.table_id
                );
                Ok(IndexEnsureOutcome::CreatedConcurrently)
            }
            Err(e) => Err(TableError::index_creation(format!(
                "Error while creating index: {} for table id: {}: {}",
                index, self.table_id, e.message
            ))
            .with_source(e)),
        }
    }

    pub fn state(&self, index: &str) -> IndexLifecycleState {
        self.states
            .get(index)
            .map_or(IndexLifecycleState::Unknown, |cell| cell.state())
    }

    /// Confirmed index names, sorted
    pub fn confirmed_indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .iter()
            .filter(|entry| entry.value().state() == IndexLifecycleState::Confirmed)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Attribute, AttributeSchema, SemanticType};
    use crate::infrastructure::memory_backend::InMemorySearchBackend;
    use std::collections::BTreeMap;

    fn manager(backend: Arc<InMemorySearchBackend>) -> IndexLifecycleManager {
        let schema =
            AttributeSchema::new(vec![Attribute::new("symbol", SemanticType::String)]).unwrap();
        IndexLifecycleManager::new(
            "StockTable",
            backend,
            IndexSchemaBuilder::new(&schema, &BTreeMap::new()).unwrap(),
            IndexSettings {
                number_of_shards: 1,
                number_of_replicas: 0,
                alias: Some("stocks".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn test_creates_absent_index_once() {
        let backend = Arc::new(InMemorySearchBackend::new());
        let manager = manager(backend.clone());

        assert_eq!(manager.state("stock"), IndexLifecycleState::Unknown);
        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::Created
        );
        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::Cached
        );
        assert_eq!(manager.state("stock"), IndexLifecycleState::Confirmed);
        assert_eq!(backend.index_creation_count(), 1);
        assert!(backend.index_exists("stocks").await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_index_is_confirmed() {
        let backend = Arc::new(InMemorySearchBackend::new());
        backend.create_index("stock", &serde_json::json!({})).await.unwrap();
        let manager = manager(backend.clone());

        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::Existed
        );
        assert_eq!(backend.index_creation_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_race_is_success() {
        let backend = Arc::new(InMemorySearchBackend::new());
        backend.create_index("stock", &serde_json::json!({})).await.unwrap();
        backend.set_stale_existence_checks(true);
        let manager = manager(backend.clone());

        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::CreatedConcurrently
        );
        assert_eq!(manager.confirmed_indices(), vec!["stock".to_string()]);
    }

    #[tokio::test]
    async fn test_creation_failure_resets_state() {
        let backend = Arc::new(InMemorySearchBackend::new());
        backend.fail_index_creation(true);
        let manager = manager(backend.clone());

        let err = manager.ensure_index("stock").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexCreation);
        assert_eq!(manager.state("stock"), IndexLifecycleState::Unknown);

        backend.fail_index_creation(false);
        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::Created
        );
    }

    #[tokio::test]
    async fn test_existence_check_error_still_creates() {
        let backend = Arc::new(InMemorySearchBackend::new());
        backend.fail_existence_checks(true);
        let manager = manager(backend.clone());

        assert_eq!(
            manager.ensure_index("stock").await.unwrap(),
            IndexEnsureOutcome::Created
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_confirmed_state_stable_under_cached_calls() {
        let backend = Arc::new(InMemorySearchBackend::new());
        let manager = Arc::new(manager(backend.clone()));
        manager.ensure_index("stock").await.unwrap();

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        manager.ensure_index("stock").await.unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            assert_eq!(manager.state("stock"), IndexLifecycleState::Confirmed);
            assert_eq!(manager.confirmed_indices(), vec!["stock".to_string()]);
        }
        for caller in callers {
            caller.await.unwrap();
        }
        assert_eq!(backend.index_creation_count(), 1);
    }
}
