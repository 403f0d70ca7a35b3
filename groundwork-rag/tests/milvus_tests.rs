//! Contract tests for the Milvus backend against a local fake of the
//! Milvus RESTful API (v2).
#![cfg(feature = "milvus")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use groundwork_rag::milvus::MilvusVectorStore;
use groundwork_rag::{
    EmbeddingModel, EmbeddingProvider, IndexOutcome, RagError, Result, RetrievalConfig,
    RetrievalService, VectorStore,
};
use serde_json::{Value, json};

#[derive(Default)]
struct FakeCollection {
    dimension: usize,
    /// VarChar limit of the text field, in UTF-8 bytes.
    max_length: usize,
    rows: Vec<(i64, String, Vec<f32>)>,
    index: Option<Value>,
    load_requested: bool,
    loaded: bool,
    pending_polls: usize,
}

#[derive(Default)]
struct FakeMilvus {
    databases: HashMap<String, HashMap<String, FakeCollection>>,
    next_id: i64,
    calls: Vec<String>,
    required_token: Option<String>,
    /// Polls of `get_load_state` answered "loading" before a load completes.
    load_delay_polls: usize,
    never_loads: bool,
}

type Shared = Arc<Mutex<FakeMilvus>>;

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "code": 0, "data": data }))
}

fn fail(code: i64, message: &str) -> Json<Value> {
    Json(json!({ "code": code, "message": message }))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn floats(value: &Value) -> Vec<f32> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
        .unwrap_or_default()
}

async fn handle(
    State(state): State<Shared>,
    Path(path): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut milvus = state.lock().unwrap();
    milvus.calls.push(path.clone());

    if let Some(token) = &milvus.required_token {
        let expected = format!("Bearer {token}");
        let sent = headers.get("authorization").and_then(|v| v.to_str().ok());
        if sent != Some(expected.as_str()) {
            return fail(1800, "user hasn't authenticated");
        }
    }

    let db = body["dbName"].as_str().unwrap_or("default").to_string();
    let name = body["collectionName"].as_str().unwrap_or_default().to_string();
    let delay = milvus.load_delay_polls;
    let never_loads = milvus.never_loads;

    match path.as_str() {
        "databases/list" => {
            let mut names: Vec<&String> = milvus.databases.keys().collect();
            names.sort();
            ok(json!(names))
        }
        "databases/create" => {
            if milvus.databases.contains_key(&db) {
                return fail(65535, "database already exist");
            }
            milvus.databases.insert(db, HashMap::new());
            ok(json!({}))
        }
        "databases/drop" => match milvus.databases.get(&db) {
            Some(collections) if !collections.is_empty() => {
                fail(65535, "can not drop database with collections")
            }
            _ => {
                milvus.databases.remove(&db);
                ok(json!({}))
            }
        },
        "collections/list" => {
            let names: Vec<String> = milvus
                .databases
                .get(&db)
                .map(|c| c.keys().cloned().collect())
                .unwrap_or_default();
            ok(json!(names))
        }
        "collections/has" => {
            let has = milvus.databases.get(&db).is_some_and(|c| c.contains_key(&name));
            ok(json!({ "has": has }))
        }
        "collections/create" => {
            let Some(collections) = milvus.databases.get_mut(&db) else {
                return fail(800, "database not found");
            };
            let param = |field: &str, key: &str| {
                body["schema"]["fields"]
                    .as_array()
                    .and_then(|fields| fields.iter().find(|f| f["fieldName"] == field))
                    .and_then(|f| f["elementTypeParams"][key].as_u64())
                    .unwrap_or(0) as usize
            };
            let dimension = param("embedding", "dim");
            let max_length = param("text", "max_length");
            collections.insert(name, FakeCollection { dimension, max_length, ..Default::default() });
            ok(json!({}))
        }
        "collections/drop" => {
            if let Some(collections) = milvus.databases.get_mut(&db) {
                collections.remove(&name);
            }
            ok(json!({}))
        }
        _ => {
            let next_id = milvus.next_id;
            let Some(collection) = milvus.databases.get_mut(&db).and_then(|c| c.get_mut(&name))
            else {
                return fail(100, "collection not found");
            };
            let (response, inserted) =
                collection_call(&path, &body, collection, next_id, delay, never_loads);
            milvus.next_id += inserted;
            response
        }
    }
}

fn collection_call(
    path: &str,
    body: &Value,
    collection: &mut FakeCollection,
    next_id: i64,
    delay: usize,
    never_loads: bool,
) -> (Json<Value>, i64) {
    let response = match path {
        "collections/describe" => ok(json!({
            "fields": [
                { "name": "id", "type": "Int64", "primaryKey": true, "params": [] },
                { "name": "text", "type": "VarChar",
                  "params": [{ "key": "max_length", "value": collection.max_length.to_string() }] },
                { "name": "embedding", "type": "FloatVector",
                  "params": [{ "key": "dim", "value": collection.dimension.to_string() }] }
            ]
        })),
        "collections/flush" => ok(json!({})),
        "collections/get_stats" => ok(json!({ "rowCount": collection.rows.len() })),
        "collections/load" => {
            if collection.index.is_none() {
                return (fail(700, "index not found"), 0);
            }
            collection.load_requested = true;
            collection.pending_polls = delay;
            ok(json!({}))
        }
        "collections/get_load_state" => {
            let state = if collection.loaded {
                "LoadStateLoaded"
            } else if !collection.load_requested {
                "LoadStateNotLoad"
            } else if !never_loads && collection.pending_polls == 0 {
                collection.loaded = true;
                "LoadStateLoaded"
            } else {
                collection.pending_polls = collection.pending_polls.saturating_sub(1);
                "LoadStateLoading"
            };
            ok(json!({ "loadState": state }))
        }
        "indexes/list" => {
            let names: Vec<&str> = collection.index.iter().map(|_| "embedding").collect();
            ok(json!(names))
        }
        "indexes/create" => {
            collection.index = body["indexParams"].get(0).cloned();
            ok(json!({}))
        }
        "entities/insert" => {
            let rows = body["data"].as_array().cloned().unwrap_or_default();
            let too_long = rows
                .iter()
                .any(|row| row["text"].as_str().unwrap_or_default().len() > collection.max_length);
            if too_long {
                return (fail(1100, "length of varchar field text exceeds max length"), 0);
            }
            let mut ids = Vec::new();
            for (offset, row) in rows.iter().enumerate() {
                let id = next_id + 1 + offset as i64;
                let text = row["text"].as_str().unwrap_or_default().to_string();
                collection.rows.push((id, text, floats(&row["embedding"])));
                // Milvus encodes int64 ids as strings.
                ids.push(id.to_string());
            }
            let count = ids.len() as i64;
            return (ok(json!({ "insertCount": count, "insertIds": ids })), count);
        }
        "entities/search" => {
            if !collection.loaded {
                return (fail(101, "collection not loaded"), 0);
            }
            let query = floats(&body["data"][0]);
            let limit = body["limit"].as_u64().unwrap_or(10) as usize;
            let mut hits: Vec<(f32, &(i64, String, Vec<f32>))> =
                collection.rows.iter().map(|row| (squared_l2(&query, &row.2), row)).collect();
            hits.sort_by(|a, b| a.0.total_cmp(&b.0));
            let data: Vec<Value> = hits
                .into_iter()
                .take(limit)
                .map(|(distance, (id, text, _))| json!({ "id": id, "distance": distance, "text": text }))
                .collect();
            ok(json!(data))
        }
        other => fail(1100, &format!("unsupported path {other}")),
    };
    (response, 0)
}

async fn spawn_milvus(fake: FakeMilvus) -> (String, Shared, tokio::task::JoinHandle<()>) {
    let mut fake = fake;
    fake.databases.entry("default".to_string()).or_default();
    let state: Shared = Arc::new(Mutex::new(fake));
    let app = Router::new()
        .route("/v2/vectordb/{*path}", post(handle))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server run");
    });
    (format!("http://{}", addr), state, handle)
}

fn store(url: &str) -> MilvusVectorStore {
    MilvusVectorStore::new(url, "my_database", "thai_text_embeddings")
        .unwrap()
        .with_timeout(Duration::from_secs(5))
        .with_load_poll_interval(Duration::from_millis(10))
}

fn count_calls(state: &Shared, path: &str) -> usize {
    state.lock().unwrap().calls.iter().filter(|c| *c == path).count()
}

#[tokio::test]
async fn collection_lifecycle_round_trip() {
    let fake = FakeMilvus { load_delay_polls: 2, ..Default::default() };
    let (url, state, handle) = spawn_milvus(fake).await;
    let store = store(&url);

    store.ensure_database(false).await.unwrap();
    store.ensure_database(false).await.unwrap();
    assert_eq!(count_calls(&state, "databases/create"), 1);

    assert!(store.create_collection(4).await.unwrap().created);
    assert!(!store.create_collection(4).await.unwrap().created);

    let near = store.insert("สวัสดี", &[1.0, 0.0, 0.0, 0.0]).await.unwrap();
    let far = store.insert("ขอบคุณ", &[0.0, 0.0, 0.0, 3.0]).await.unwrap();
    assert!(far > near);
    assert_eq!(count_calls(&state, "collections/flush"), 2);

    assert!(matches!(store.search(&[1.0, 0.0, 0.0, 0.0], 1).await, Err(RagError::IndexMissing { .. })));

    assert_eq!(store.create_index().await.unwrap(), IndexOutcome::Created);
    assert_eq!(store.create_index().await.unwrap(), IndexOutcome::AlreadyExists);
    {
        let milvus = state.lock().unwrap();
        let index = milvus.databases["my_database"]["thai_text_embeddings"].index.clone().unwrap();
        assert_eq!(index["metricType"], "L2");
        assert_eq!(index["params"]["index_type"], "IVF_FLAT");
        assert_eq!(index["params"]["nlist"], 128);
    }

    let results = store.search(&[1.0, 0.0, 0.0, 1.0], 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, near);
    assert_eq!(results[0].text, "สวัสดี");
    assert!((results[0].distance - 1.0).abs() < 1e-6);
    assert!((results[1].distance - 5.0f32.sqrt()).abs() < 1e-6);
    assert_eq!(count_calls(&state, "collections/load"), 1);

    let status = store.status().await.unwrap();
    assert_eq!((status.row_count, status.dimension), (2, Some(4)));
    assert!(status.indexed && status.loaded);

    handle.abort();
}

#[tokio::test]
async fn reused_collection_with_other_dimension_is_schema_mismatch() {
    let (url, _state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let first = store(&url);
    first.ensure_database(false).await.unwrap();
    first.create_collection(8).await.unwrap();

    let second = store(&url);
    let err = second.create_collection(4).await.unwrap_err();
    assert!(matches!(err, RagError::SchemaMismatch { expected: 8, actual: 4, .. }));

    handle.abort();
}

#[tokio::test]
async fn insert_with_wrong_dimension_never_reaches_server() {
    let (url, state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let store = store(&url);
    store.ensure_database(false).await.unwrap();
    store.create_collection(4).await.unwrap();

    let err = store.insert("short", &[1.0, 2.0]).await.unwrap_err();
    assert!(matches!(err, RagError::SchemaMismatch { expected: 4, actual: 2, .. }));
    assert_eq!(count_calls(&state, "entities/insert"), 0);
    assert_eq!(store.status().await.unwrap().row_count, 0);

    handle.abort();
}

#[tokio::test]
async fn thai_text_within_char_limit_fits_varchar_bytes() {
    let (url, state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let store = store(&url).with_max_text_length(1000);
    store.ensure_database(false).await.unwrap();
    store.create_collection(2).await.unwrap();
    assert_eq!(state.lock().unwrap().databases["my_database"]["thai_text_embeddings"].max_length, 4000);

    // 400 Thai chars are 1200 bytes.
    let long_thai = "ก".repeat(400);
    store.insert(&long_thai, &[1.0, 0.0]).await.unwrap();
    store.insert(&"ก".repeat(1000), &[0.0, 1.0]).await.unwrap();
    assert_eq!(store.status().await.unwrap().row_count, 2);

    let err = store.insert(&"ก".repeat(1001), &[1.0, 1.0]).await.unwrap_err();
    assert!(matches!(err, RagError::TextTooLong { max: 1000, actual: 1001 }));
    assert_eq!(count_calls(&state, "entities/insert"), 2);

    handle.abort();
}

#[tokio::test]
async fn drop_collection_twice_leaves_it_absent() {
    let (url, state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let store = store(&url);
    store.ensure_database(false).await.unwrap();
    store.create_collection(4).await.unwrap();
    store.insert("สวัสดี", &[1.0, 0.0, 0.0, 0.0]).await.unwrap();

    store.drop_collection().await.unwrap();
    store.drop_collection().await.unwrap();

    let status = store.status().await.unwrap();
    assert!(!status.exists);
    assert_eq!(status.row_count, 0);
    assert_eq!(count_calls(&state, "collections/drop"), 1);
    assert!(state.lock().unwrap().databases["my_database"].is_empty());

    // A dropped collection can come back with another dimension.
    assert!(store.create_collection(8).await.unwrap().created);
    assert_eq!(store.status().await.unwrap().dimension, Some(8));

    handle.abort();
}

#[tokio::test]
async fn reset_drops_collections_and_recreates_database() {
    let (url, state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let store = store(&url);
    store.ensure_database(false).await.unwrap();
    store.create_collection(4).await.unwrap();
    store.insert("old", &[0.0; 4]).await.unwrap();

    store.ensure_database(true).await.unwrap();

    assert!(!store.status().await.unwrap().exists);
    assert!(state.lock().unwrap().databases.contains_key("my_database"));
    assert_eq!(count_calls(&state, "databases/drop"), 1);

    handle.abort();
}

#[tokio::test]
async fn default_database_is_never_dropped() {
    let (url, state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let store = MilvusVectorStore::new(&url, "default", "docs").unwrap();
    store.ensure_database(false).await.unwrap();
    store.create_collection(2).await.unwrap();

    store.ensure_database(true).await.unwrap();

    assert!(!store.status().await.unwrap().exists);
    assert_eq!(count_calls(&state, "databases/drop"), 0);
    assert_eq!(count_calls(&state, "databases/create"), 0);

    handle.abort();
}

#[tokio::test]
async fn load_that_never_completes_times_out() {
    let fake = FakeMilvus { never_loads: true, ..Default::default() };
    let (url, _state, handle) = spawn_milvus(fake).await;
    let store = store(&url).with_timeout(Duration::from_millis(200));
    store.ensure_database(false).await.unwrap();
    store.create_collection(2).await.unwrap();
    store.create_index().await.unwrap();

    let err = store.search(&[0.0, 0.0], 1).await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { .. }));

    handle.abort();
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let fake = FakeMilvus { required_token: Some("root:Milvus".into()), ..Default::default() };
    let (url, _state, handle) = spawn_milvus(fake).await;

    let anonymous = store(&url);
    assert!(matches!(anonymous.ensure_database(false).await, Err(RagError::VectorStoreError { .. })));

    let authenticated = store(&url).with_token("root:Milvus");
    authenticated.ensure_database(false).await.unwrap();

    handle.abort();
}

#[tokio::test]
async fn unreachable_server_is_store_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = store(&format!("http://{addr}")).ensure_database(false).await.unwrap_err();
    assert!(matches!(err, RagError::StoreUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_store_unavailable() {
    let app = Router::new().route(
        "/v2/vectordb/{*path}",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "proxy not healthy") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let err = store(&format!("http://{addr}")).status().await.unwrap_err();
    assert!(matches!(err, RagError::StoreUnavailable { .. }));

    handle.abort();
}

/// Counts characters into buckets; equal texts give equal vectors.
struct MockEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; 8];
        for (i, c) in text.chars().enumerate() {
            embedding[(c as usize + i) % 8] += 1.0;
        }
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        8
    }
}

#[tokio::test]
async fn service_answers_thai_query_through_milvus() {
    let (url, _state, handle) = spawn_milvus(FakeMilvus::default()).await;
    let config = RetrievalConfig::builder()
        .embedding_model(EmbeddingModel::custom("mock-embedder", 8))
        .build()
        .unwrap();
    let store = store(&url);
    let service = RetrievalService::builder()
        .config(config)
        .embedding_provider(Arc::new(MockEmbeddingProvider))
        .vector_store(Arc::new(store))
        .seed_corpus(["สวัสดี", "ขอบคุณ"])
        .build()
        .unwrap();

    service.initialize().await.unwrap();
    let outcome = service.answer_query("สวัสดี", Some(1)).await.unwrap();
    assert_eq!(outcome.hits().len(), 1);
    assert_eq!(outcome.hits()[0].text, "สวัสดี");
    assert!(outcome.hits()[0].distance.abs() < 1e-6);

    handle.abort();
}
