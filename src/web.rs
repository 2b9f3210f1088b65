use crate::{
    app::{App, AppError, SearchMode, SearchResults, Stats},
    documents::{Document, DocumentCreate},
    semantic::{BatchOptions, BatchStatus, EmbeddingError, SyncReport},
    store::StoreError,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/api/search", post(search))
        .route("/api/documents", post(create))
        .route("/api/documents/get", post(get_document))
        .route("/api/documents/delete", post(delete_document))
        .route("/api/embeddings/start", post(start_embeddings))
        .route("/api/embeddings/cancel", post(cancel_embeddings))
        .route("/api/embeddings/status", get(embedding_status))
        .route("/api/embeddings/stats", get(stats))
        .route("/api/lexical/reindex", post(reindex))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn start_app(app: Arc<App>) -> anyhow::Result<()> {
    let signal = shutdown_signal(app.clone());

    async fn shutdown_signal(app: Arc<App>) {
        let ctrl_c = async {
            if let Err(err) = signal::ctrl_c().await {
                log::error!("failed to install Ctrl+C handler: {err}");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    log::error!("failed to install signal handler: {err}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        if app.cancel_embeddings() {
            log::warn!("embedding batch cancelled by shutdown");
        }
    }

    let addr = std::env::var("VOCAB_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(signal)
        .await?;

    Ok(())
}

pub fn start_daemon(app: App) -> anyhow::Result<()> {
    // the blocking http client must be dropped outside the runtime
    let app = Arc::new(app);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app.clone()))
}

#[derive(Debug)]
struct HttpError(AppError);

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::BatchRunning => StatusCode::CONFLICT,
            AppError::Embedding(EmbeddingError::Config(_)) => StatusCode::BAD_REQUEST,
            AppError::Store(StoreError::Unavailable) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Embedding(_) | AppError::Store(_) | AppError::IO(_) | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub threshold: Option<f64>,
    #[serde(default)]
    pub mode: SearchMode,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResults>, HttpError> {
    log::debug!("payload: {payload:?}");

    if let Some(limit) = payload.limit {
        if limit == 0 {
            return Err(AppError::BadRequest("limit must be positive".to_string()).into());
        }
    }

    let app = state.app.clone();
    let results = tokio::task::block_in_place(move || {
        app.search(
            payload.mode,
            &payload.query,
            payload.limit,
            payload.threshold,
        )
    });

    Ok(Json(results))
}

async fn create(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<DocumentCreate>,
) -> Result<(StatusCode, Json<Document>), HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let doc = tokio::task::block_in_place(move || app.add(payload))?;

    Ok((StatusCode::CREATED, Json(doc)))
}

#[derive(Debug, Deserialize)]
pub struct DocumentIdRequest {
    pub id: String,
}

async fn get_document(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<DocumentIdRequest>,
) -> Result<Json<Document>, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    let doc = tokio::task::block_in_place(move || app.get(&payload.id))?;
    Ok(Json(doc))
}

async fn delete_document(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<DocumentIdRequest>,
) -> Result<StatusCode, HttpError> {
    log::debug!("payload: {payload:?}");

    let app = state.app.clone();
    tokio::task::block_in_place(move || app.delete(&payload.id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct StartResponse {
    started: bool,
    status: BatchStatus,
}

async fn start_embeddings(
    State(state): State<Arc<SharedState>>,
    payload: Option<Json<BatchOptions>>,
) -> Result<(StatusCode, Json<StartResponse>), HttpError> {
    let options = payload.map(|Json(options)| options).unwrap_or_default();
    log::debug!("payload: {options:?}");

    // the job keeps running after its handle is dropped
    let _handle = state.app.start_embeddings(options, None)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            started: true,
            status: state.app.embedding_status(),
        }),
    ))
}

async fn cancel_embeddings(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    let cancelled = state.app.cancel_embeddings();
    Json(json!({ "cancelled": cancelled }))
}

async fn embedding_status(State(state): State<Arc<SharedState>>) -> Json<BatchStatus> {
    Json(state.app.embedding_status())
}

async fn stats(State(state): State<Arc<SharedState>>) -> Result<Json<Stats>, HttpError> {
    let app = state.app.clone();
    let stats = tokio::task::block_in_place(move || app.stats())?;
    Ok(Json(stats))
}

async fn reindex(State(state): State<Arc<SharedState>>) -> Result<Json<SyncReport>, HttpError> {
    let app = state.app.clone();
    let report = tokio::task::block_in_place(move || app.reindex_lexical())?;
    Ok(Json(report))
}
