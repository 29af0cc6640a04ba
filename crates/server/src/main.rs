use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    approve_issue, create_issue, dashboard, get_issue, list_issues, list_users, load_photo,
    login, reject_issue, resolve_actor, start_issue, submit_issue_for_review, upload_photo,
    views, ApiContext,
};
use shared::{
    domain::{Issue, IssueId, IssueStatus, NewIssue, PhotoId, TransitionKind, User, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        DashboardStats, IssueDetail, IssueEvent, IssueQuery, LoginRequest, PhotoUploadResponse,
        SubmitForReviewRequest,
    },
};
use storage::{MemoryStore, Storage};
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod http_error;

use app_state::AppState;
use config::{load_settings, prepare_database_url, Settings, StoreBackend};
use http_error::{ApiJson, ApiPath, ApiQuery, HttpError, HttpResult};

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct IssueListQuery {
    user_id: i64,
    #[serde(default)]
    search: Option<String>,
    #[serde(default)]
    status: Option<IssueStatus>,
}

#[derive(Debug, Deserialize)]
struct PhotoUploadQuery {
    user_id: i64,
    #[serde(default)]
    mime_type: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let api = build_api_context(&settings).await?;
    let public_url = settings.public_url()?;
    let (events, _) = broadcast::channel(settings.event_buffer);

    let state = AppState {
        api,
        events,
        public_url,
        max_photo_bytes: settings.max_photo_bytes,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, store = ?settings.store, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_api_context(settings: &Settings) -> anyhow::Result<ApiContext> {
    match settings.store {
        StoreBackend::Memory => {
            let store = if settings.seed_demo_data {
                MemoryStore::seeded()
            } else {
                MemoryStore::new()
            };
            Ok(ApiContext::new(store))
        }
        StoreBackend::Sqlite => {
            let database_url = prepare_database_url(&settings.database_url)?;
            let storage = Storage::new(&database_url).await.map_err(|error| {
                error!(
                    %database_url,
                    error = %format!("{error:#}"),
                    "failed to open SQLite database; verify parent directory exists and permissions are correct"
                );
                error
            })?;
            if settings.seed_demo_data && storage.seed_demo_data().await? {
                info!(%database_url, "seeded demo users and issues");
            }
            Ok(ApiContext::new(storage))
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let max_body = state.max_photo_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/users", get(http_list_users))
        .route("/issues", get(http_list_issues).post(http_create_issue))
        .route("/issues/:issue_id", get(http_get_issue))
        .route("/issues/:issue_id/start", post(http_start_issue))
        .route("/issues/:issue_id/submit", post(http_submit_issue))
        .route("/issues/:issue_id/approve", post(http_approve_issue))
        .route("/issues/:issue_id/reject", post(http_reject_issue))
        .route("/dashboard", get(http_dashboard))
        .route("/photos", post(http_upload_photo))
        .route("/photos/:photo_id", get(http_download_photo))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    match state.api.issues.health_check().await {
        Ok(()) => "ok".into_response(),
        Err(error) => {
            warn!(error = %format!("{error:#}"), "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> HttpResult<Json<User>> {
    let user = login(&state.api, &req.username).await?;
    Ok(Json(user))
}

async fn http_list_users(State(state): State<Arc<AppState>>) -> HttpResult<Json<Vec<User>>> {
    let users = list_users(&state.api).await?;
    Ok(Json(users))
}

async fn http_list_issues(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<IssueListQuery>,
) -> HttpResult<Json<Vec<Issue>>> {
    let query = IssueQuery {
        search: q.search,
        status: q.status,
    };
    let issues = list_issues(&state.api, UserId(q.user_id), &query).await?;
    Ok(Json(issues))
}

async fn http_create_issue(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<UserQuery>,
    ApiJson(new_issue): ApiJson<NewIssue>,
) -> HttpResult<(StatusCode, Json<Issue>)> {
    let issue = create_issue(&state.api, UserId(q.user_id), new_issue).await?;
    let _ = state.events.send(IssueEvent::IssueCreated {
        issue: issue.clone(),
    });
    Ok((StatusCode::CREATED, Json(issue)))
}

async fn http_get_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Json<IssueDetail>> {
    let detail = get_issue(&state.api, UserId(q.user_id), IssueId(issue_id)).await?;
    Ok(Json(detail))
}

async fn http_start_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Json<Issue>> {
    let result = start_issue(&state.api, UserId(q.user_id), IssueId(issue_id)).await;
    publish_update(&state, result, TransitionKind::Start, UserId(q.user_id))
}

// An empty body is a submit without an after photo.
async fn http_submit_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<UserQuery>,
    body: Bytes,
) -> HttpResult<Json<Issue>> {
    let req: SubmitForReviewRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SubmitForReviewRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| HttpError::validation(format!("invalid submit body: {e}")))?
    };
    let result = submit_issue_for_review(
        &state.api,
        UserId(q.user_id),
        IssueId(issue_id),
        req.photo_url_after,
    )
    .await;
    publish_update(
        &state,
        result,
        TransitionKind::SubmitForReview,
        UserId(q.user_id),
    )
}

async fn http_approve_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Json<Issue>> {
    let result = approve_issue(&state.api, UserId(q.user_id), IssueId(issue_id)).await;
    publish_update(&state, result, TransitionKind::Approve, UserId(q.user_id))
}

async fn http_reject_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Json<Issue>> {
    let result = reject_issue(&state.api, UserId(q.user_id), IssueId(issue_id)).await;
    publish_update(&state, result, TransitionKind::Reject, UserId(q.user_id))
}

fn publish_update(
    state: &AppState,
    result: Result<Issue, ApiError>,
    action: TransitionKind,
    actor: UserId,
) -> HttpResult<Json<Issue>> {
    let issue = result?;
    let _ = state.events.send(IssueEvent::IssueUpdated {
        issue: issue.clone(),
        action,
        actor,
    });
    Ok(Json(issue))
}

async fn http_dashboard(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Json<DashboardStats>> {
    let stats = dashboard(&state.api, UserId(q.user_id)).await?;
    Ok(Json(stats))
}

async fn http_upload_photo(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<PhotoUploadQuery>,
    body: Bytes,
) -> HttpResult<Json<PhotoUploadResponse>> {
    let photo_id = upload_photo(
        &state.api,
        UserId(q.user_id),
        &body,
        q.mime_type.as_deref(),
    )
    .await?;
    let url = state
        .public_url
        .join(&format!("photos/{photo_id}"))
        .map_err(|e| {
            ApiError::new(
                ErrorCode::Internal,
                format!("failed to build photo url: {e}"),
            )
        })?;
    Ok(Json(PhotoUploadResponse {
        photo_id,
        url: url.to_string(),
        size_bytes: body.len(),
    }))
}

async fn http_download_photo(
    State(state): State<Arc<AppState>>,
    ApiPath(photo_id): ApiPath<i64>,
) -> HttpResult<impl IntoResponse> {
    let photo = load_photo(&state.api, PhotoId(photo_id)).await?;

    let mut headers = HeaderMap::new();
    let content_type = photo
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    Ok((StatusCode::OK, headers, photo.bytes))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<UserQuery>,
) -> HttpResult<Response> {
    let viewer = resolve_actor(&state.api, UserId(q.user_id)).await?;
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, viewer)))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket, viewer: User) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            let event = match events_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(viewer = %viewer.id, skipped, "websocket subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !event_visible_to(&event, &viewer) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

fn event_visible_to(event: &IssueEvent, viewer: &User) -> bool {
    match event {
        IssueEvent::IssueCreated { issue } | IssueEvent::IssueUpdated { issue, .. } => {
            views::is_visible_to(issue, viewer)
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
