use super::*;
use axum::{body, body::Body, http::Request};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>, i64) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext {
        storage,
        tasks: TaskStore::seeded(),
    };
    let state = Arc::new(AppState::new(api, 32));
    let app = build_router(state.clone(), 16 * 1024);

    let alice = sync(&app, "idp|alice", "alice").await;
    (app, state, alice)
}

async fn sync(app: &Router, subject: &str, username: &str) -> i64 {
    let request = Request::post("/users/sync")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "identity_subject": subject,
                "first_name": "Test",
                "username": username,
                "email_addresses": [format!("{username}@example.com")],
            })
            .to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let user: UserSummary = read_json(response).await;
    user.user_id.0
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_post(uri: String, value: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

async fn create_post(app: &Router, user_id: i64, content: &str) -> PostPayload {
    let response = app
        .clone()
        .oneshot(json_post(
            format!("/posts?user_id={user_id}"),
            serde_json::json!({ "content": content }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state, _alice) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn profile_route_returns_counts_and_404_for_unknown() {
    let (app, _state, alice) = test_app().await;
    create_post(&app, alice, "hello").await;

    let response = app
        .clone()
        .oneshot(
            Request::get("/users/idp%7Calice")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let profile: ProfileSummary = read_json(response).await;
    assert_eq!(profile.post_count, 1);

    let missing = app
        .oneshot(
            Request::get("/users/nobody")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn like_route_toggles_and_broadcasts() {
    let (app, state, alice) = test_app().await;
    let mut events = state.events.subscribe();
    let post = create_post(&app, alice, "like me").await;
    assert!(matches!(
        events.recv().await.expect("event"),
        ServerEvent::PostCreated { .. }
    ));

    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/posts/{}/likes?user_id={alice}", post.post_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let toggled: ToggleLikeResponse = read_json(response).await;
    assert!(toggled.liked);
    assert_eq!(toggled.like_count, 1);

    match events.recv().await.expect("event") {
        ServerEvent::LikeToggled {
            post_id,
            liked,
            like_count,
            ..
        } => {
            assert_eq!(post_id, post.post_id);
            assert!(liked);
            assert_eq!(like_count, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn comment_route_validates_and_creates() {
    let (app, _state, alice) = test_app().await;
    let post = create_post(&app, alice, "talk to me").await;

    let empty = app
        .clone()
        .oneshot(json_post(
            format!("/posts/{}/comments?user_id={alice}", post.post_id),
            serde_json::json!({ "content": "  " }),
        ))
        .await
        .expect("response");
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(empty).await;
    assert_eq!(err.code, ErrorCode::Validation);

    let created = app
        .clone()
        .oneshot(json_post(
            format!("/posts/{}/comments?user_id={alice}", post.post_id),
            serde_json::json!({ "content": "hi there" }),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let comment: CommentPayload = read_json(created).await;
    assert_eq!(comment.author.username, "alice");

    let listed = app
        .oneshot(Request::get("/posts").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let posts: Vec<PostPayload> = read_json(listed).await;
    assert_eq!(posts[0].comments.len(), 1);
}

#[tokio::test]
async fn delete_route_requires_author() {
    let (app, _state, alice) = test_app().await;
    let bob = sync(&app, "idp|bob", "bob").await;
    let post = create_post(&app, alice, "mine").await;

    let forbidden = app
        .clone()
        .oneshot(
            Request::delete(format!("/posts/{}?user_id={bob}", post.post_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let deleted = app
        .clone()
        .oneshot(
            Request::delete(format!("/posts/{}?user_id={alice}", post.post_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let missing = app
        .oneshot(
            Request::delete(format!("/posts/{}?user_id={alice}", post.post_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_routes_use_injected_store() {
    let (app, state, _alice) = test_app().await;

    let created = app
        .clone()
        .oneshot(json_post(
            "/api/tasks".to_string(),
            serde_json::json!({ "title": "Write docs" }),
        ))
        .await
        .expect("response");
    assert_eq!(created.status(), StatusCode::CREATED);
    let task: Task = read_json(created).await;
    assert_eq!(task.id.0, 3);

    let rejected = app
        .clone()
        .oneshot(json_post(
            "/api/tasks".to_string(),
            serde_json::json!({ "name": "wrong field" }),
        ))
        .await
        .expect("response");
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let listed = app
        .oneshot(Request::get("/api/tasks").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let tasks: Vec<Task> = read_json(listed).await;
    assert_eq!(tasks.len(), 3);
    assert_eq!(state.api.tasks.list().await.len(), 3);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (app, _state, alice) = test_app().await;
    let huge = "x".repeat(32 * 1024);
    let response = app
        .oneshot(json_post(
            format!("/posts?user_id={alice}"),
            serde_json::json!({ "content": huge }),
        ))
        .await
        .expect("response");
    assert!(
        response.status() == StatusCode::PAYLOAD_TOO_LARGE
            || response.status() == StatusCode::BAD_REQUEST,
        "unexpected status {}",
        response.status()
    );
}

#[tokio::test]
async fn malformed_viewer_or_post_id_is_a_typed_validation_error() {
    let (app, state, alice) = test_app().await;
    let post = create_post(&app, alice, "target").await;
    let mut events = state.events.subscribe();

    for uri in [
        format!("/posts/{}/likes", post.post_id),
        format!("/posts/{}/likes?user_id=alice", post.post_id),
        format!("/posts/abc/likes?user_id={alice}"),
    ] {
        let response = app
            .clone()
            .oneshot(Request::post(uri.clone()).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let err: ApiError = read_json(response).await;
        assert_eq!(err.code, ErrorCode::Validation, "{uri}");
        assert!(!err.message.is_empty());
    }

    let response = app
        .clone()
        .oneshot(
            Request::delete("/posts/nope?user_id=1")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Validation);

    assert!(events.try_recv().is_err());
}
