//! Search Event Table
//!
//! Table facade over a search backend. Write calls resolve the target index,
//! make sure it exists, derive document ids and enqueue operations into the
//! bulk processor; they return once everything is enqueued; dispatch outcomes
//! only reach the bulk listener.

use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::bulk::{BulkListener, BulkMetrics, BulkProcessor, BulkSettings, LoggingBulkListener};
use crate::config::TableConfig;
use crate::domain::identity::DocumentIdentityResolver;
use crate::domain::models::{
    partial_document, record_document, CompiledCondition, Document, DocumentId,
    PendingOperation, Record, RecordMap, StoredDocument, TableDefinition,
};
use crate::domain::ports::SearchBackend;
use crate::domain::schema::IndexSchemaBuilder;
use crate::error::{ErrorKind, Result, TableError};
use crate::index::{IndexLifecycleManager, IndexRouter, IndexRouting, IndexSettings};

/// A record that was skipped without failing the whole call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRejection {
    /// Position of the record in the call's input
    pub position: usize,
    pub kind: ErrorKind,
    pub reason: String,
}

impl RecordRejection {
    fn new(position: usize, error: &TableError) -> Self {
        Self {
            position,
            kind: error.kind,
            reason: error.message.clone(),
        }
    }
}

/// Outcome of a write call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    /// Operations handed to the bulk processor
    pub enqueued: usize,
    pub rejected: Vec<RecordRejection>,
}

impl WriteSummary {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

pub struct SearchEventTable {
    definition: TableDefinition,
    config: TableConfig,
    backend: Arc<dyn SearchBackend>,
    identity: DocumentIdentityResolver,
    router: IndexRouter,
    lifecycle: IndexLifecycleManager,
    processor: BulkProcessor,
    metrics: BulkMetrics,
    /// Serializes route → ensure → commit → enqueue
    route_lock: Mutex<()>,
}

impl SearchEventTable {
    /// Initialize with the logging listener and a private metrics registry
    pub async fn init(
        definition: TableDefinition,
        config: TableConfig,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<Self> {
        let listener = Arc::new(LoggingBulkListener::new(definition.id.clone()));
        Self::init_with(definition, config, backend, listener, &Registry::new()).await
    }

    /// Initialize against the HTTP backend described by `config`
    #[cfg(feature = "http")]
    pub async fn connect(definition: TableDefinition, config: TableConfig) -> Result<Self> {
        let backend = Arc::new(crate::infrastructure::HttpSearchBackend::from_config(&config)?);
        Self::init(definition, config, backend).await
    }

    /// Validate configuration, build the mapping, ensure the fixed index
    /// (fixed mode) and start the bulk processor
    pub async fn init_with(
        definition: TableDefinition,
        config: TableConfig,
        backend: Arc<dyn SearchBackend>,
        listener: Arc<dyn BulkListener>,
        registry: &Registry,
    ) -> Result<Self> {
        config.validate()?;
        config.validate_for(&definition)?;

        let identity = DocumentIdentityResolver::new(&definition.schema, &definition.primary_keys)?;
        let schema = IndexSchemaBuilder::new(&definition.schema, &config.type_mappings)?;
        let metrics = BulkMetrics::new(registry, &definition.id)?;

        let lifecycle = IndexLifecycleManager::new(
            definition.id.clone(),
            backend.clone(),
            schema,
            IndexSettings {
                number_of_shards: config.number_of_shards,
                number_of_replicas: config.number_of_replicas,
                alias: config.index_alias.clone(),
            },
        )
        .with_creation_counter(metrics.index_creations.clone());

        let router = IndexRouter::from_config(&config, &definition);
        if let IndexRouting::Fixed(index) = router.routing() {
            lifecycle.ensure_index(index).await?;
        }

        let processor = BulkProcessor::start(
            definition.id.clone(),
            backend.clone(),
            listener,
            metrics.clone(),
            BulkSettings::from_config(&config),
        )?;

        info!(
            "Table {} initialized (routing={:?}, primary keys={:?})",
            definition.id,
            router.routing(),
            definition.primary_keys
        );

        Ok(Self {
            definition,
            config,
            backend,
            identity,
            router,
            lifecycle,
            processor,
            metrics,
            route_lock: Mutex::new(()),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Writes
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Insert records; records sharing a document id overwrite each other
    ///
    /// Every record is serialized before anything is enqueued, so a record
    /// that cannot be serialized fails the whole call. A record whose
    /// dynamic index cannot be created is rejected on its own.
    pub async fn add(&self, records: &[Record]) -> Result<WriteSummary> {
        self.ensure_open()?;
        let schema = &self.definition.schema;

        let mut prepared = Vec::with_capacity(records.len());
        let mut errors = Vec::new();
        for (position, record) in records.iter().enumerate() {
            match record_document(schema, record)
                .and_then(|doc| Ok((doc, self.identity.resolve(schema, record)?)))
            {
                Ok((doc, id)) => prepared.push((record, doc, id)),
                Err(e) => errors.push(format!("[{}]: {}", position, e.message)),
            }
        }
        if !errors.is_empty() {
            return Err(TableError::serialization(format!(
                "Error while generating documents for table id: {}: {}",
                self.definition.id,
                errors.join("; ")
            )));
        }

        let _route = self.route_lock.lock().await;
        let mut summary = WriteSummary::default();
        for (position, (record, source, id)) in prepared.into_iter().enumerate() {
            let target = match self.router.route(record) {
                Ok(target) => target,
                Err(e) => {
                    summary.rejected.push(RecordRejection::new(position, &e));
                    continue;
                }
            };

            if target.switched {
                if let Err(e) = self.lifecycle.ensure_index(&target.index).await {
                    warn!(
                        "Rejected record [{}] of table id: {}: {}",
                        position, self.definition.id, e
                    );
                    summary.rejected.push(RecordRejection::new(position, &e));
                    continue;
                }
                self.router.commit(&target.index);
            }

            self.processor.enqueue(PendingOperation::Index {
                index: target.index,
                id,
                source,
            })?;
            summary.enqueued += 1;
        }
        Ok(summary)
    }

    /// Delete the documents addressed by each condition parameter map
    pub async fn delete(&self, conditions: &[RecordMap]) -> Result<WriteSummary> {
        self.ensure_open()?;
        self.require_identity("delete")?;

        let _route = self.route_lock.lock().await;
        let index = self.router.require_active()?;
        let mut summary = WriteSummary::default();
        for (position, params) in conditions.iter().enumerate() {
            match self.identity.require(&self.definition.schema, params) {
                Ok(id) => {
                    self.processor.enqueue(PendingOperation::Delete {
                        index: index.clone(),
                        id,
                    })?;
                    summary.enqueued += 1;
                }
                Err(e) => summary.rejected.push(RecordRejection::new(position, &e)),
            }
        }
        Ok(summary)
    }

    /// Partially update documents: `values[i]` is applied to the document
    /// addressed by `conditions[i]`
    ///
    /// Only attributes present in `values[i]` are written.
    pub async fn update(&self, conditions: &[RecordMap], values: &[RecordMap]) -> Result<WriteSummary> {
        self.ensure_open()?;
        self.require_identity("update")?;
        check_lengths("update values", conditions.len(), values.len())?;

        let docs = values
            .iter()
            .map(|v| partial_document(&self.definition.schema, v))
            .collect::<Result<Vec<Document>>>()?;

        let _route = self.route_lock.lock().await;
        let index = self.router.require_active()?;
        let mut summary = WriteSummary::default();
        for (position, (params, doc)) in conditions.iter().zip(docs).enumerate() {
            match self.document_id(params, &values[position]) {
                Ok(id) => {
                    self.processor.enqueue(PendingOperation::Update {
                        index: index.clone(),
                        id,
                        doc,
                        upsert: false,
                    })?;
                    summary.enqueued += 1;
                }
                Err(e) => summary.rejected.push(RecordRejection::new(position, &e)),
            }
        }
        Ok(summary)
    }

    /// Update documents, creating them when absent
    ///
    /// The upserted document is `records[i]` overlaid with `values[i]`.
    /// Records whose update cannot be addressed (no identity, or no index
    /// resolved yet) are inserted with [`add`](Self::add) instead.
    pub async fn update_or_add(
        &self,
        conditions: &[RecordMap],
        values: &[RecordMap],
        records: &[Record],
    ) -> Result<WriteSummary> {
        self.ensure_open()?;
        check_lengths("update values", conditions.len(), values.len())?;
        check_lengths("fallback records", conditions.len(), records.len())?;

        let schema = &self.definition.schema;
        let mut docs = Vec::with_capacity(records.len());
        for (record, set) in records.iter().zip(values) {
            let mut doc = record_document(schema, record)?;
            doc.extend(partial_document(schema, set)?);
            docs.push(doc);
        }

        let mut summary = WriteSummary::default();
        let mut fallback = Vec::new();
        {
            let _route = self.route_lock.lock().await;
            let index = self.router.active();
            for (position, doc) in docs.into_iter().enumerate() {
                let id = self
                    .identity
                    .resolve(schema, &conditions[position])
                    .or_else(|_| self.identity.resolve(schema, &records[position]));
                match (&index, id) {
                    (Some(index), Ok(Some(id))) => {
                        self.processor.enqueue(PendingOperation::Update {
                            index: index.clone(),
                            id,
                            doc,
                            upsert: true,
                        })?;
                        summary.enqueued += 1;
                    }
                    _ => fallback.push(position),
                }
            }
        }

        if !fallback.is_empty() {
            let fallback_records: Vec<Record> =
                fallback.iter().map(|&p| records[p].clone()).collect();
            let added = self.add(&fallback_records).await?;
            summary.enqueued += added.enqueued;
            summary
                .rejected
                .extend(added.rejected.into_iter().map(|mut rejection| {
                    rejection.position = fallback[rejection.position];
                    rejection
                }));
        }
        Ok(summary)
    }

    /// Dispatch everything buffered and wait for in-flight batches
    pub async fn flush(&self) -> Result<()> {
        self.processor.flush().await
    }

    /// Flush and stop the bulk processor; the table rejects further calls
    pub async fn destroy(&self) -> Result<()> {
        let result = self.processor.close().await;
        info!("Table {} destroyed", self.definition.id);
        result
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Reads
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Documents of the active index matching `condition`, at most `limit`
    ///
    /// Buffered writes are not visible until dispatched.
    pub async fn find(&self, condition: &CompiledCondition, limit: usize) -> Result<Vec<StoredDocument>> {
        self.ensure_open()?;
        match self.router.active() {
            Some(index) => self.backend.search(&index, condition, limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn contains(&self, condition: &CompiledCondition) -> Result<bool> {
        Ok(!self.find(condition, 1).await?.is_empty())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Introspection
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn table_id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Index update/delete currently target
    pub fn active_index(&self) -> Option<String> {
        self.router.active()
    }

    pub fn lifecycle(&self) -> &IndexLifecycleManager {
        &self.lifecycle
    }

    pub fn metrics(&self) -> &BulkMetrics {
        &self.metrics
    }

    pub fn is_destroyed(&self) -> bool {
        self.processor.is_closed()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Helpers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn ensure_open(&self) -> Result<()> {
        if self.processor.is_closed() {
            return Err(TableError::closed(&self.definition.id));
        }
        Ok(())
    }

    fn require_identity(&self, operation: &str) -> Result<()> {
        if self.identity.has_identity() {
            return Ok(());
        }
        Err(TableError::missing_identity(format!(
            "Table id: {} declares no primary key, {} cannot address documents",
            self.definition.id, operation
        )))
    }

    /// Id from the condition parameters, else from the set values
    fn document_id(&self, params: &RecordMap, values: &RecordMap) -> Result<DocumentId> {
        let schema = &self.definition.schema;
        self.identity
            .require(schema, params)
            .or_else(|_| self.identity.require(schema, values))
    }
}

fn check_lengths(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(TableError::serialization(format!(
            "Got {} {} for {} condition parameter maps",
            actual, what, expected
        )));
    }
    Ok(())
}
