//! End-to-end table behaviour against the in-memory backend

use pretty_assertions::assert_eq;
use prometheus::Registry;
use serde_json::json;
use std::sync::Arc;

use search_table::{
    Attribute, AttributeSchema, CompiledCondition, ErrorKind, FieldValue, InMemorySearchBackend,
    LoggingBulkListener, Record, RecordMap, SearchEventTable, SemanticType, TableConfig,
    TableDefinition,
};

fn definition(keys: &[&str]) -> TableDefinition {
    let schema = AttributeSchema::new(vec![
        Attribute::new("symbol", SemanticType::String),
        Attribute::new("price", SemanticType::Float),
        Attribute::new("volume", SemanticType::Long),
        Attribute::new("index", SemanticType::String),
    ])
    .unwrap();
    TableDefinition::new("StockTable", schema).with_primary_keys(keys.iter().copied())
}

fn stock(symbol: &str, price: f32, volume: i64, index: &str) -> Record {
    vec![symbol.into(), price.into(), volume.into(), index.into()]
}

fn params(pairs: &[(&str, FieldValue)]) -> RecordMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn table(
    keys: &[&str],
    config: TableConfig,
) -> (SearchEventTable, Arc<InMemorySearchBackend>) {
    let backend = Arc::new(InMemorySearchBackend::new());
    let table = SearchEventTable::init(definition(keys), config, backend.clone())
        .await
        .unwrap();
    (table, backend)
}

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn init_creates_fixed_index_named_after_table() {
    let (table, backend) = table(&["symbol"], TableConfig::default()).await;

    assert_eq!(table.active_index().as_deref(), Some("StockTable"));
    assert_eq!(backend.index_names(), vec!["StockTable".to_string()]);
    assert_eq!(table.metrics().index_creations.get(), 1);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn init_applies_type_mapping_and_alias() {
    let config = TableConfig::from_options([
        ("index.name", "stock"),
        ("index.alias", "stocks"),
        ("type.mapping.volume", "keyword"),
    ])
    .unwrap();
    let (table, backend) = table(&["symbol"], config).await;

    let body = backend.index_body("stock").unwrap();
    assert_eq!(body["mappings"]["properties"]["volume"], json!({"type": "keyword"}));
    assert_eq!(body["mappings"]["properties"]["price"], json!({"type": "float"}));
    assert_eq!(body["aliases"], json!({"stocks": {}}));
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn init_fails_when_fixed_index_cannot_be_created() {
    let backend = Arc::new(InMemorySearchBackend::new());
    backend.fail_index_creation(true);

    let result = SearchEventTable::init(definition(&[]), TableConfig::default(), backend).await;
    let err = result.err().unwrap();
    assert_eq!(err.kind, ErrorKind::IndexCreation);
}

#[tokio::test]
async fn init_rejects_invalid_configuration() {
    let backend = Arc::new(InMemorySearchBackend::new());
    let config = TableConfig::default().type_mapping("isin", "keyword");

    let result = SearchEventTable::init(definition(&[]), config, backend.clone()).await;
    assert_eq!(result.err().unwrap().kind, ErrorKind::Config);
    // Nothing reached the backend.
    assert!(backend.index_names().is_empty());

    let result = SearchEventTable::init(definition(&["isin"]), TableConfig::default(), backend).await;
    assert_eq!(result.err().unwrap().kind, ErrorKind::Config);
}

#[tokio::test]
async fn init_with_shared_registry() {
    let backend = Arc::new(InMemorySearchBackend::new());
    let registry = Registry::new();
    let table = SearchEventTable::init_with(
        definition(&["symbol"]),
        TableConfig::default(),
        backend.clone(),
        Arc::new(LoggingBulkListener::new("StockTable")),
        &registry,
    )
    .await
    .unwrap();

    table.add(&[stock("IBM", 1.0, 10, "")]).await.unwrap();
    table.flush().await.unwrap();

    let families = registry.gather();
    assert!(families
        .iter()
        .any(|f| f.get_name() == "bulk_dispatches_total"));

    // Registering a second table with the same id on the registry fails.
    let duplicate = SearchEventTable::init_with(
        definition(&["symbol"]),
        TableConfig::default(),
        backend,
        Arc::new(LoggingBulkListener::new("StockTable")),
        &registry,
    )
    .await;
    assert_eq!(duplicate.err().unwrap().kind, ErrorKind::Metrics);
    table.destroy().await.unwrap();
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn same_key_inserted_twice_keeps_one_document() {
    let (table, backend) = table(&["symbol"], TableConfig::default()).await;

    let summary = table
        .add(&[stock("IBM", 100.0, 10, ""), stock("IBM", 101.0, 12, "")])
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 2);
    assert!(summary.is_complete());
    table.flush().await.unwrap();

    assert_eq!(backend.document_count("StockTable"), 1);
    let doc = backend.get_document("StockTable", "IBM").unwrap();
    assert_eq!(doc["price"], json!(101.0));
    assert_eq!(doc["volume"], json!(12));
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn records_without_keys_get_generated_ids() {
    let (table, backend) = table(&[], TableConfig::default()).await;

    table
        .add(&[stock("IBM", 100.0, 10, ""), stock("IBM", 100.0, 10, "")])
        .await
        .unwrap();
    table.flush().await.unwrap();

    assert_eq!(backend.document_count("StockTable"), 2);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn unserializable_record_fails_whole_call() {
    let (table, backend) = table(&["symbol"], TableConfig::default()).await;

    let err = table
        .add(&[
            stock("IBM", 100.0, 10, ""),
            stock("WSO2", f32::INFINITY, 10, ""),
            vec!["ORCL".into()],
        ])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Serialization);
    assert!(err.message.contains("[1]"));
    assert!(err.message.contains("[2]"));

    table.flush().await.unwrap();
    assert_eq!(table.metrics().enqueued.get(), 0);
    assert_eq!(backend.document_count("StockTable"), 0);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn update_and_delete_address_documents_by_key() {
    let (table, backend) = table(&["symbol"], TableConfig::default()).await;
    table
        .add(&[stock("IBM", 100.0, 10, ""), stock("WSO2", 50.0, 5, "")])
        .await
        .unwrap();

    let summary = table
        .update(
            &[params(&[("symbol", "IBM".into())])],
            &[params(&[("price", FieldValue::Float(150.0))])],
        )
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 1);

    table
        .delete(&[params(&[("symbol", "WSO2".into())])])
        .await
        .unwrap();
    table.flush().await.unwrap();

    let ibm = backend.get_document("StockTable", "IBM").unwrap();
    assert_eq!(ibm["price"], json!(150.0));
    // Attributes absent from the update are untouched.
    assert_eq!(ibm["volume"], json!(10));
    assert!(backend.get_document("StockTable", "WSO2").is_none());
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn update_and_delete_require_declared_keys() {
    let (table, _backend) = table(&[], TableConfig::default()).await;

    let err = table
        .delete(&[params(&[("symbol", "IBM".into())])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingIdentity);

    let err = table
        .update(
            &[params(&[("symbol", "IBM".into())])],
            &[params(&[("price", FieldValue::Float(1.0))])],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingIdentity);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn delete_without_key_value_rejects_that_record() {
    let (table, _backend) = table(&["symbol"], TableConfig::default()).await;

    let summary = table
        .delete(&[
            params(&[("symbol", "IBM".into())]),
            params(&[("volume", FieldValue::Long(1))]),
        ])
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].position, 1);
    assert_eq!(summary.rejected[0].kind, ErrorKind::MissingIdentity);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn update_or_add_upserts_by_key() {
    let (table, backend) = table(&["symbol"], TableConfig::default()).await;
    table.add(&[stock("IBM", 100.0, 10, "")]).await.unwrap();

    let summary = table
        .update_or_add(
            &[
                params(&[("symbol", "IBM".into())]),
                params(&[("symbol", "WSO2".into())]),
            ],
            &[
                params(&[("price", FieldValue::Float(120.0))]),
                params(&[("price", FieldValue::Float(60.0))]),
            ],
            &[stock("IBM", 0.0, 11, ""), stock("WSO2", 0.0, 7, "")],
        )
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 2);
    table.flush().await.unwrap();

    assert_eq!(backend.document_count("StockTable"), 2);
    let ibm = backend.get_document("StockTable", "IBM").unwrap();
    assert_eq!(ibm["price"], json!(120.0));
    assert_eq!(ibm["volume"], json!(11));
    let wso2 = backend.get_document("StockTable", "WSO2").unwrap();
    assert_eq!(wso2["price"], json!(60.0));
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn update_or_add_without_keys_falls_back_to_add() {
    let (table, backend) = table(&[], TableConfig::default()).await;

    let summary = table
        .update_or_add(
            &[params(&[("symbol", "IBM".into())])],
            &[RecordMap::new()],
            &[stock("IBM", 1.0, 1, "")],
        )
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 1);
    table.flush().await.unwrap();
    assert_eq!(backend.document_count("StockTable"), 1);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn mismatched_update_inputs_are_rejected() {
    let (table, _backend) = table(&["symbol"], TableConfig::default()).await;
    let err = table
        .update(&[params(&[("symbol", "IBM".into())])], &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Serialization);
    table.destroy().await.unwrap();
}

// ============================================================================
// Dynamic index routing
// ============================================================================

fn payload_config() -> TableConfig {
    TableConfig::from_options([("payload.index.of.index.name", "3")]).unwrap()
}

#[tokio::test]
async fn dynamic_switch_ensures_new_index_before_writing() {
    let (table, backend) = table(&["symbol"], payload_config()).await;
    assert!(backend.index_names().is_empty());
    assert_eq!(table.active_index(), None);

    table.add(&[stock("IBM", 100.0, 10, "stock_a")]).await.unwrap();
    assert_eq!(table.active_index().as_deref(), Some("stock_a"));

    table.add(&[stock("WSO2", 50.0, 5, "stock_b")]).await.unwrap();
    assert_eq!(table.active_index().as_deref(), Some("stock_b"));
    table.flush().await.unwrap();

    // Created through the lifecycle manager (with mapping), not implicitly by
    // the first bulk write.
    let body = backend.index_body("stock_b").unwrap();
    assert!(body["mappings"]["properties"]["symbol"].is_object());
    assert_eq!(backend.index_creation_count(), 2);
    assert_eq!(
        table.lifecycle().confirmed_indices(),
        vec!["stock_a".to_string(), "stock_b".to_string()]
    );
    assert!(backend.get_document("stock_a", "IBM").is_some());
    assert!(backend.get_document("stock_b", "WSO2").is_some());

    // Update/delete follow the last resolved index.
    table
        .update(
            &[params(&[("symbol", "WSO2".into())])],
            &[params(&[("volume", FieldValue::Long(6))])],
        )
        .await
        .unwrap();
    table
        .delete(&[params(&[("symbol", "IBM".into())])])
        .await
        .unwrap();
    table.flush().await.unwrap();

    assert_eq!(backend.get_document("stock_b", "WSO2").unwrap()["volume"], json!(6));
    // IBM lives in stock_a, which the delete did not target.
    assert!(backend.get_document("stock_a", "IBM").is_some());
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn dynamic_index_names_compare_case_insensitively() {
    let (table, backend) = table(&["symbol"], payload_config()).await;

    table
        .add(&[stock("IBM", 1.0, 1, "stock"), stock("WSO2", 1.0, 1, "STOCK")])
        .await
        .unwrap();
    table.flush().await.unwrap();

    assert_eq!(backend.index_names(), vec!["stock".to_string()]);
    assert_eq!(backend.document_count("stock"), 2);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn dynamic_creation_failure_rejects_only_that_record() {
    let (table, backend) = table(&["symbol"], payload_config()).await;
    table.add(&[stock("IBM", 1.0, 1, "stock_a")]).await.unwrap();

    backend.fail_index_creation(true);
    let summary = table
        .add(&[stock("WSO2", 1.0, 1, "stock_b"), stock("ORCL", 1.0, 1, "stock_a")])
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].position, 0);
    assert_eq!(summary.rejected[0].kind, ErrorKind::IndexCreation);
    assert_eq!(table.active_index().as_deref(), Some("stock_a"));

    // The table stays usable and retries the failed name on the next write.
    backend.fail_index_creation(false);
    let summary = table.add(&[stock("WSO2", 1.0, 1, "stock_b")]).await.unwrap();
    assert!(summary.is_complete());
    table.flush().await.unwrap();
    assert_eq!(backend.document_count("stock_a"), 2);
    assert_eq!(backend.document_count("stock_b"), 1);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn delete_before_any_routed_insert_is_an_error() {
    let (table, _backend) = table(&["symbol"], payload_config()).await;
    let err = table
        .delete(&[params(&[("symbol", "IBM".into())])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::IndexRouting);
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn non_string_index_name_rejects_record() {
    let (table, _backend) = table(&["symbol"], payload_config()).await;
    let summary = table
        .add(&[vec![
            "IBM".into(),
            1.0f32.into(),
            1i64.into(),
            FieldValue::Null,
        ]])
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 0);
    assert_eq!(summary.rejected[0].kind, ErrorKind::IndexRouting);
    table.destroy().await.unwrap();
}

// ============================================================================
// Reads and teardown
// ============================================================================

#[tokio::test]
async fn find_and_contains_search_active_index() {
    let (table, _backend) = table(&["symbol"], TableConfig::default()).await;
    table
        .add(&[stock("IBM", 100.0, 10, ""), stock("WSO2", 50.0, 10, "")])
        .await
        .unwrap();
    table.flush().await.unwrap();

    let hits = table
        .find(&CompiledCondition::term("volume", 10), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    assert!(table
        .contains(&CompiledCondition::term("symbol.keyword", "IBM"))
        .await
        .unwrap());
    assert!(!table
        .contains(&CompiledCondition::term("symbol.keyword", "ORCL"))
        .await
        .unwrap());
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn destroy_flushes_and_closes() {
    let config = TableConfig::default().bulk_actions(100);
    let (table, backend) = table(&["symbol"], config).await;
    table.add(&[stock("IBM", 1.0, 1, "")]).await.unwrap();
    assert_eq!(backend.document_count("StockTable"), 0);

    table.destroy().await.unwrap();
    assert!(table.is_destroyed());
    assert_eq!(backend.document_count("StockTable"), 1);

    let err = table.add(&[stock("WSO2", 1.0, 1, "")]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
    let err = table
        .delete(&[params(&[("symbol", "IBM".into())])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Closed);
    // Destroying twice is harmless.
    table.destroy().await.unwrap();
}

#[tokio::test]
async fn forbidden_index_name_rejects_only_that_record() {
    let (table, backend) = table(&["symbol"], payload_config()).await;
    let summary = table
        .add(&[
            stock("IBM", 1.0, 1, "logs/_settings?x=1"),
            stock("WSO2", 1.0, 1, "stock"),
        ])
        .await
        .unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].position, 0);
    assert_eq!(summary.rejected[0].kind, ErrorKind::IndexRouting);
    assert_eq!(backend.index_names(), vec!["stock".to_string()]);
    table.destroy().await.unwrap();
}
