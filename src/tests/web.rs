use std::sync::{Arc, Barrier};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::app::{create_app, create_app_with, word};
use crate::semantic::{EmbeddingClient, EmbeddingError, ModelConfig};
use crate::web::router;

async fn call(app: Arc<crate::app::App>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = router(app).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_and_search() {
    let (app, _, _tmp) = create_app();
    let app = Arc::new(app);

    let (status, doc) = call(
        app.clone(),
        "POST",
        "/api/documents",
        Some(json!({"word": "ephemeral", "description": "lasting a very short time", "tags": ["adjective"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(doc["word"], "ephemeral");
    assert_eq!(doc["kind"], "word");

    let (status, hits) = call(
        app.clone(),
        "POST",
        "/api/search",
        Some(json!({"query": "short", "mode": "lexical"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().unwrap().len(), 1);
    assert_eq!(hits[0]["document"]["id"], doc["id"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_and_delete_document() {
    let (app, _, _tmp) = create_app();
    let doc = app.add(word("glad", "feeling happy")).unwrap();
    let app = Arc::new(app);

    let (status, body) = call(app.clone(), "POST", "/api/documents/get", Some(json!({"id": doc.id}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["word"], "glad");

    let (status, _) = call(app.clone(), "POST", "/api/documents/get", Some(json!({"id": "glad"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app.clone(), "POST", "/api/documents/delete", Some(json!({"id": doc.id}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(app.clone(), "POST", "/api/documents/get", Some(json!({"id": doc.id}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_rejects_zero_limit() {
    let (app, _, _tmp) = create_app();
    let (status, body) = call(
        Arc::new(app),
        "POST",
        "/api/search",
        Some(json!({"query": "x", "limit": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("limit"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_word_is_bad_request() {
    let (app, _, _tmp) = create_app();
    let (status, _) = call(Arc::new(app), "POST", "/api/documents", Some(json!({"word": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_embedding_lifecycle() {
    let (app, _, _tmp) = create_app();
    app.add(word("glad", "feeling happy")).unwrap();
    let app = Arc::new(app);

    let (status, body) = call(app.clone(), "POST", "/api/embeddings/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);

    let (status, body) = call(
        app.clone(),
        "POST",
        "/api/embeddings/start",
        Some(json!({"batch_size": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["started"], true);

    // wait for the background job
    let mut status_body = Value::Null;
    for _ in 0..200 {
        let (_, body) = call(app.clone(), "GET", "/api/embeddings/status", None).await;
        if body["running"] == false && !body["last_report"].is_null() {
            status_body = body;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status_body["last_report"]["outcome"], "completed");
    assert_eq!(status_body["last_report"]["processed"], 1);

    let (status, stats) = call(app.clone(), "GET", "/api/embeddings/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["embeddings"]["count"], 1);
    assert_eq!(stats["documents"], 1);
}

/// Holds the first request open until released.
struct GateClient {
    entered: Barrier,
    release: Barrier,
}

impl EmbeddingClient for GateClient {
    fn generate(&self, texts: &[String], _: &ModelConfig) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.entered.wait();
        self.release.wait();
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_start_conflicts() {
    let client = Arc::new(GateClient {
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let (app, _tmp) = create_app_with(client.clone());
    app.add(word("glad", "feeling happy")).unwrap();
    let app = Arc::new(app);

    let (status, _) = call(app.clone(), "POST", "/api/embeddings/start", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    tokio::task::block_in_place(|| client.entered.wait());

    let (status, body) = call(app.clone(), "POST", "/api/embeddings/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already running"));

    let (_, body) = call(app.clone(), "POST", "/api/embeddings/cancel", None).await;
    assert_eq!(body["cancelled"], true);

    tokio::task::block_in_place(|| client.release.wait());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_without_model_is_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = crate::config::Config::load_with(tmp.path()).unwrap();
    config.semantic_search.model = String::new();
    let db = crate::store::Database::open(tmp.path().join("vocab.sqlite3")).unwrap();
    let app = crate::app::App::new(
        config,
        Arc::new(db),
        Arc::new(super::app::TopicClient::default()),
    );

    let (status, body) = call(Arc::new(app), "POST", "/api/embeddings/start", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("model"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reindex() {
    let (app, _, _tmp) = create_app();
    app.add(word("glad", "feeling happy")).unwrap();

    let (status, body) = call(Arc::new(app), "POST", "/api/lexical/reindex", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "rebuilt");
    assert_eq!(body["indexed"], 1);
}
