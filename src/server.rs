//! HTTP endpoints for uploads, listing drafts, publishing and notifications.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display, future::Future, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;

use crate::{
    cache::ListingRecord,
    chain::LedgerProgram,
    content::FileContentStore,
    editor::ListingEditor,
    error::{MarketError, MarketResult},
    metadata::Draft,
    notify::{MemoryNotifier, Notification},
    publish::{PrecryptUpload, PublishReceipt, OCTET_STREAM},
    session::LocalSession,
    sync::SyncStatus,
};

type Editor = ListingEditor<LedgerProgram, FileContentStore>;

struct HttpState {
    session: LocalSession,
    /// One editing session per listing, opened on first use.
    editors: Mutex<HashMap<String, Arc<Editor>>>,
    /// Must be the notifier the session reports to.
    inbox: MemoryNotifier,
    verbose: bool,
}

impl HttpState {
    fn new(session: LocalSession, inbox: MemoryNotifier, verbose: bool) -> Arc<Self> {
        Arc::new(Self {
            session,
            editors: Mutex::new(HashMap::new()),
            inbox,
            verbose,
        })
    }

    fn log(&self, line: impl Display) {
        if self.verbose {
            println!("[http] {line}");
        }
    }

    /// The listing's editor, opened and loaded on first use. Loading happens
    /// outside the map lock so one slow listing does not stall the others;
    /// if two requests race, the first editor inserted is kept.
    async fn editor(&self, id: &str) -> MarketResult<Arc<Editor>> {
        if let Some(editor) = self.editors.lock().await.get(id) {
            return Ok(editor.clone());
        }
        let mut editor = ListingEditor::open(self.session.clone(), id);
        editor.ready().await?;
        let mut editors = self.editors.lock().await;
        let editor = editors
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(editor));
        Ok(editor.clone())
    }
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
}

/// Stored upload as returned by `POST /content`.
#[derive(Serialize, Deserialize)]
struct Stored {
    cid: String,
    /// Gateway URL of the bytes.
    uri: String,
}

/// Draft of a listing with its sync status.
#[derive(Serialize)]
struct DraftView {
    draft: Draft,
    status: SyncStatus,
}

impl DraftView {
    fn of(editor: &Editor) -> Self {
        Self {
            draft: editor.draft(),
            status: editor.status(),
        }
    }
}

/// [`MarketError`] rendered as a JSON body with a matching status code.
struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MarketError::Validation(_) => StatusCode::BAD_REQUEST,
            MarketError::NotFound(_) => StatusCode::NOT_FOUND,
            MarketError::WalletDisconnected => StatusCode::UNAUTHORIZED,
            MarketError::Storage(_) | MarketError::Chain(_) => StatusCode::BAD_GATEWAY,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Start the HTTP server. `inbox` must be the notifier `session` reports to.
pub async fn serve_http(
    addr: SocketAddr,
    session: LocalSession,
    inbox: MemoryNotifier,
    verbose: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = app(session, inbox, verbose);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn app(session: LocalSession, inbox: MemoryNotifier, verbose: bool) -> Router {
    let state = HttpState::new(session, inbox, verbose);
    Router::new()
        .route("/healthz", get(healthz))
        .route("/content", post(upload_content))
        .route("/listings", post(create_listing))
        .route("/listings/:id", get(get_listing))
        .route("/listings/:id/refetch", post(refetch_listing))
        .route("/listings/:id/draft", get(get_draft).patch(patch_draft))
        .route("/listings/:id/publish", post(publish_listing))
        .route("/listings/:id/precrypts", post(attach_precrypt))
        .route("/notifications", get(notifications))
        .with_state(state)
}

/// Health check endpoint.
async fn healthz(State(state): State<Arc<HttpState>>) -> Json<Health> {
    state.log("GET /healthz");
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Store the raw request body under its `Content-Type`.
async fn upload_content(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Stored> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(OCTET_STREAM)
        .to_string();
    state.log(format_args!("POST /content ({} bytes, {content_type})", body.len()));
    let upload = state.session.upload_file(body.to_vec(), &content_type).await?;
    Ok(Json(Stored {
        cid: upload.cid,
        uri: upload.file.uri,
    }))
}

async fn create_listing(
    State(state): State<Arc<HttpState>>,
    Json(draft): Json<Draft>,
) -> std::result::Result<(StatusCode, Json<PublishReceipt>), ApiError> {
    state.log("POST /listings");
    let receipt = state.session.create_listing(&draft).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_listing(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> ApiResult<ListingRecord> {
    state.log(format_args!("GET /listings/{id}"));
    let cache = state.session.cache();
    let record = match cache.get(&id) {
        Some(record) => record,
        None => cache.fetch(&id).await?,
    };
    Ok(Json(record))
}

async fn refetch_listing(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> ApiResult<ListingRecord> {
    state.log(format_args!("POST /listings/{id}/refetch"));
    Ok(Json(state.session.cache().refetch(&id).await?))
}

async fn get_draft(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> ApiResult<DraftView> {
    state.log(format_args!("GET /listings/{id}/draft"));
    let editor = state.editor(&id).await?;
    Ok(Json(DraftView::of(&editor)))
}

/// Shallow-merge the body into the listing's draft.
async fn patch_draft(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(partial): Json<Draft>,
) -> ApiResult<DraftView> {
    state.log(format_args!("PATCH /listings/{id}/draft"));
    let editor = state.editor(&id).await?;
    editor.change(partial);
    Ok(Json(DraftView::of(&editor)))
}

async fn publish_listing(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
) -> ApiResult<PublishReceipt> {
    state.log(format_args!("POST /listings/{id}/publish"));
    let editor = state.editor(&id).await?;
    Ok(Json(editor.publish().await?))
}

async fn attach_precrypt(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<String>,
    Json(upload): Json<PrecryptUpload>,
) -> ApiResult<PublishReceipt> {
    state.log(format_args!("POST /listings/{id}/precrypts"));
    let editor = state.editor(&id).await?;
    Ok(Json(editor.attach_precrypt(upload).await?))
}

/// Notifications since the previous call.
async fn notifications(State(state): State<Arc<HttpState>>) -> Json<Vec<Notification>> {
    let pending = state.inbox.drain();
    state.log(format_args!("GET /notifications -> {}", pending.len()));
    Json(pending)
}
