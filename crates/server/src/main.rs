use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{ApiContext, TaskStore};
use shared::{
    domain::{PostId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CommentPayload, CreateCommentRequest, CreatePostRequest, CreateTaskRequest, PostPayload,
        ProfileSummary, ServerEvent, SyncUserRequest, Task, ToggleLikeResponse, UserSummary,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

mod app_state;
mod config;

use app_state::AppState;
use crate::config::{load_settings, prepare_database_url};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct ViewerQuery {
    user_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let tasks = if settings.seed_tasks {
        TaskStore::seeded()
    } else {
        TaskStore::default()
    };

    let state = AppState::new(ApiContext { storage, tasks }, settings.event_buffer);
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users/sync", post(http_sync_user))
        .route("/users/:identity_subject", get(http_profile))
        .route("/posts", get(http_list_posts).post(http_create_post))
        .route("/posts/:post_id", delete(http_delete_post))
        .route("/posts/:post_id/likes", post(http_toggle_like))
        .route("/posts/:post_id/comments", post(http_create_comment))
        .route("/api/tasks", get(http_list_tasks).post(http_create_task))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    if err.code == ErrorCode::Internal {
        warn!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

/// Malformed or mistyped bodies surface as typed validation errors.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| reject(ApiError::validation(rejection.body_text())))
}

fn viewer(query: Result<Query<ViewerQuery>, QueryRejection>) -> ApiResult<UserId> {
    query
        .map(|Query(q)| UserId(q.user_id))
        .map_err(|rejection| reject(ApiError::validation(rejection.body_text())))
}

fn post_id(path: Result<Path<i64>, PathRejection>) -> ApiResult<PostId> {
    path.map(|Path(id)| PostId(id))
        .map_err(|rejection| reject(ApiError::validation(rejection.body_text())))
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| reject(ApiError::internal(e.to_string())))?;
    Ok("ok")
}

async fn http_sync_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SyncUserRequest>, JsonRejection>,
) -> ApiResult<Json<UserSummary>> {
    let request = json_body(body)?;
    let user = server_api::sync_user(&state.api, &request)
        .await
        .map_err(reject)?;
    Ok(Json(user))
}

async fn http_profile(
    State(state): State<Arc<AppState>>,
    Path(identity_subject): Path<String>,
) -> ApiResult<Json<ProfileSummary>> {
    let profile = server_api::profile_by_identity(&state.api, &identity_subject)
        .await
        .map_err(reject)?;
    Ok(Json(profile))
}

async fn http_list_posts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<PostPayload>>> {
    let posts = server_api::list_posts(&state.api).await.map_err(reject)?;
    Ok(Json(posts))
}

async fn http_create_post(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
    body: Result<Json<CreatePostRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PostPayload>)> {
    let user_id = viewer(query)?;
    let request = json_body(body)?;
    let post = server_api::create_post(&state.api, user_id, &request)
        .await
        .map_err(reject)?;
    state.publish(ServerEvent::PostCreated { post: post.clone() });
    Ok((StatusCode::CREATED, Json(post)))
}

async fn http_delete_post(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
) -> ApiResult<StatusCode> {
    let post_id = post_id(path)?;
    server_api::delete_post(&state.api, viewer(query)?, post_id)
        .await
        .map_err(reject)?;
    state.publish(ServerEvent::PostDeleted { post_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn http_toggle_like(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
) -> ApiResult<Json<ToggleLikeResponse>> {
    let post_id = post_id(path)?;
    let user_id = viewer(query)?;
    let response = server_api::toggle_like(&state.api, user_id, post_id)
        .await
        .map_err(reject)?;
    state.publish(ServerEvent::LikeToggled {
        post_id: response.post_id,
        user_id,
        liked: response.liked,
        like_count: response.like_count,
    });
    Ok(Json(response))
}

async fn http_create_comment(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<ViewerQuery>, QueryRejection>,
    body: Result<Json<CreateCommentRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CommentPayload>)> {
    let post_id = post_id(path)?;
    let user_id = viewer(query)?;
    let request = json_body(body)?;
    let comment = server_api::create_comment(&state.api, user_id, post_id, &request)
        .await
        .map_err(reject)?;
    state.publish(ServerEvent::CommentAdded {
        comment: comment.clone(),
    });
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn http_list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(server_api::list_tasks(&state.api).await)
}

async fn http_create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let request = json_body(body)?;
    let task = server_api::create_task(&state.api, request)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
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

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
