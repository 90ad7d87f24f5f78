use shared::{
    domain::{PostId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        CommentPayload, CreateCommentRequest, CreatePostRequest, CreateTaskRequest, PostPayload,
        ProfileSummary, SyncUserRequest, Task, ToggleLikeResponse, UserSummary,
    },
};
use storage::{NewUser, Storage, StoredComment, StoredPost, StoredUser};
use tracing::{error, info};

pub mod tasks;

pub use tasks::TaskStore;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub tasks: TaskStore,
}

pub async fn sync_user(ctx: &ApiContext, request: &SyncUserRequest) -> Result<UserSummary, ApiError> {
    request.validate()?;
    let username = request
        .resolved_username()
        .ok_or_else(|| ApiError::validation("a username or an email address is required"))?;
    let name = request.display_name();

    let synced = ctx
        .storage
        .sync_user(&NewUser {
            identity_subject: request.identity_subject.trim(),
            name: &name,
            username: &username,
            email: request.primary_email().unwrap_or_default(),
            image: request.image_url.as_deref().unwrap_or_default(),
        })
        .await
        .map_err(internal)?;

    if synced.created {
        info!(user_id = synced.user.user_id.0, "synced new user from identity provider");
    }
    Ok(user_summary(synced.user))
}

pub async fn profile_by_identity(
    ctx: &ApiContext,
    identity_subject: &str,
) -> Result<ProfileSummary, ApiError> {
    let profile = ctx
        .storage
        .profile_by_identity(identity_subject)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    Ok(ProfileSummary {
        user: user_summary(profile.user),
        follower_count: profile.follower_count,
        following_count: profile.following_count,
        post_count: profile.post_count,
    })
}

pub async fn list_posts(ctx: &ApiContext) -> Result<Vec<PostPayload>, ApiError> {
    let posts = ctx.storage.list_posts().await.map_err(internal)?;
    Ok(posts.into_iter().map(post_payload).collect())
}

pub async fn create_post(
    ctx: &ApiContext,
    user_id: UserId,
    request: &CreatePostRequest,
) -> Result<PostPayload, ApiError> {
    ensure_known_user(ctx, user_id).await?;
    request.validate()?;

    let image = request
        .image
        .as_deref()
        .map(str::trim)
        .filter(|image| !image.is_empty());
    let post_id = ctx
        .storage
        .create_post(user_id, &request.content, image)
        .await
        .map_err(internal)?;
    let post = ctx
        .storage
        .load_post(post_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::internal("created post vanished"))?;
    Ok(post_payload(post))
}

pub async fn toggle_like(
    ctx: &ApiContext,
    user_id: UserId,
    post_id: PostId,
) -> Result<ToggleLikeResponse, ApiError> {
    ensure_known_user(ctx, user_id).await?;
    let state = ctx
        .storage
        .toggle_like(post_id, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;

    Ok(ToggleLikeResponse {
        post_id,
        liked: state.liked,
        like_count: state.like_count,
    })
}

pub async fn create_comment(
    ctx: &ApiContext,
    user_id: UserId,
    post_id: PostId,
    request: &CreateCommentRequest,
) -> Result<CommentPayload, ApiError> {
    ensure_known_user(ctx, user_id).await?;
    request.validate()?;

    let comment = ctx
        .storage
        .create_comment(post_id, user_id, &request.content)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;
    Ok(comment_payload(comment))
}

pub async fn delete_post(ctx: &ApiContext, user_id: UserId, post_id: PostId) -> Result<(), ApiError> {
    let author = ctx
        .storage
        .post_author(post_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("post not found"))?;
    if author != user_id {
        return Err(ApiError::forbidden("no delete permission"));
    }

    let removed = ctx.storage.delete_post(post_id).await.map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("post not found"));
    }
    info!(post_id = post_id.0, user_id = user_id.0, "post deleted");
    Ok(())
}

pub async fn list_tasks(ctx: &ApiContext) -> Vec<Task> {
    ctx.tasks.list().await
}

pub async fn create_task(ctx: &ApiContext, request: CreateTaskRequest) -> Result<Task, ApiError> {
    ctx.tasks.create(request).await
}

async fn ensure_known_user(ctx: &ApiContext, user_id: UserId) -> Result<StoredUser, ApiError> {
    ctx.storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown user"))
}

fn user_summary(user: StoredUser) -> UserSummary {
    UserSummary {
        user_id: user.user_id,
        identity_subject: user.identity_subject,
        name: user.name,
        username: user.username,
        email: user.email,
        image: user.image,
        bio: user.bio,
        created_at: user.created_at,
    }
}

fn post_payload(post: StoredPost) -> PostPayload {
    PostPayload {
        post_id: post.post_id,
        author: post.author,
        content: post.content,
        image: post.image,
        created_at: post.created_at,
        like_count: post.liker_ids.len() as u64,
        liker_ids: post.liker_ids,
        comments: post.comments.into_iter().map(comment_payload).collect(),
    }
}

fn comment_payload(comment: StoredComment) -> CommentPayload {
    CommentPayload {
        comment_id: comment.comment_id,
        post_id: comment.post_id,
        author: comment.author,
        content: comment.content,
        created_at: comment.created_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %err, "storage operation failed");
    ApiError::internal(err.to_string())
}
