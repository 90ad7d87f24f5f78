use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Identity, PostId, UserId},
    error::ApiError,
    protocol::{
        CreateCommentRequest, CreatePostRequest, CreateTaskRequest, PostPayload, ProfileSummary,
        SyncUserRequest, Task, ToggleLikeResponse, UserSummary,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::{
    comments::CommentRecord,
    error::{MutationResult, RemoteFailure},
};

/// The remote operations the feed controllers depend on.
#[async_trait]
pub trait PostBackend: Send + Sync {
    async fn toggle_engagement(&self, item_id: PostId) -> MutationResult<()>;
    async fn submit_comment(&self, item_id: PostId, text: String) -> MutationResult<CommentRecord>;
    async fn delete_item(&self, item_id: PostId) -> MutationResult<()>;
    async fn fetch_current_user_identity(&self) -> Option<Identity>;
}

#[derive(Serialize)]
struct ViewerQuery {
    user_id: i64,
}

pub struct HttpBackend {
    http: Client,
    base_url: Url,
    session: RwLock<Option<Identity>>,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        let base_url = Url::parse(server_url)
            .with_context(|| format!("invalid server url {server_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(anyhow!("server_url must start with http:// or https://"));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            session: RwLock::new(None),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn viewer(&self) -> MutationResult<UserId> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|identity| identity.user_id)
            .ok_or_else(|| RemoteFailure::Rejected("not signed in".into()))
    }

    /// Sync the profile from the identity provider and remember the
    /// resulting user as the session.
    pub async fn sign_in(&self, profile: &SyncUserRequest) -> Result<Identity> {
        let response = self
            .http
            .post(self.endpoint(&["users", "sync"]))
            .json(profile)
            .send()
            .await?;
        let user: UserSummary = decode(response).await?;
        let identity = Identity {
            user_id: user.user_id,
            username: user.username,
        };
        info!(user_id = %identity.user_id, username = %identity.username, "signed in");
        *self.session.write().await = Some(identity.clone());
        Ok(identity)
    }

    pub async fn sign_out(&self) {
        self.session.write().await.take();
    }

    pub async fn profile(&self, identity_subject: &str) -> Result<ProfileSummary> {
        let response = self.http.get(self.endpoint(&["users", identity_subject])).send().await?;
        Ok(decode(response).await?)
    }

    pub async fn list_posts(&self) -> Result<Vec<PostPayload>> {
        let response = self.http.get(self.endpoint(&["posts"])).send().await?;
        Ok(decode(response).await?)
    }

    pub async fn create_post(&self, request: &CreatePostRequest) -> Result<PostPayload> {
        let user_id = self.viewer().await?;
        let response = self
            .http
            .post(self.endpoint(&["posts"]))
            .query(&ViewerQuery { user_id: user_id.0 })
            .json(request)
            .send()
            .await?;
        Ok(decode(response).await?)
    }

    pub async fn list_tasks(&self) -> Result<Vec<Task>> {
        let response = self.http.get(self.endpoint(&["api", "tasks"])).send().await?;
        Ok(decode(response).await?)
    }

    pub async fn create_task(&self, title: &str) -> Result<Task> {
        let response = self
            .http
            .post(self.endpoint(&["api", "tasks"]))
            .json(&CreateTaskRequest {
                title: title.to_string(),
            })
            .send()
            .await?;
        Ok(decode(response).await?)
    }
}

#[async_trait]
impl PostBackend for HttpBackend {
    async fn toggle_engagement(&self, item_id: PostId) -> MutationResult<()> {
        let user_id = self.viewer().await?;
        let response = self
            .http
            .post(self.endpoint(&["posts", &item_id.to_string(), "likes"]))
            .query(&ViewerQuery { user_id: user_id.0 })
            .send()
            .await?;
        let toggled: ToggleLikeResponse = decode(response).await?;
        debug!(
            post_id = %toggled.post_id,
            liked = toggled.liked,
            like_count = toggled.like_count,
            "server confirmed like toggle"
        );
        Ok(())
    }

    async fn submit_comment(&self, item_id: PostId, text: String) -> MutationResult<CommentRecord> {
        let user_id = self.viewer().await?;
        let response = self
            .http
            .post(self.endpoint(&["posts", &item_id.to_string(), "comments"]))
            .query(&ViewerQuery { user_id: user_id.0 })
            .json(&CreateCommentRequest { content: text })
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_item(&self, item_id: PostId) -> MutationResult<()> {
        let user_id = self.viewer().await?;
        let response = self
            .http
            .delete(self.endpoint(&["posts", &item_id.to_string()]))
            .query(&ViewerQuery { user_id: user_id.0 })
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn fetch_current_user_identity(&self) -> Option<Identity> {
        self.session.read().await.clone()
    }
}

async fn check_status(response: Response) -> MutationResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(err.into()),
        Err(_) => Err(RemoteFailure::Rejected(format!("server returned {status}"))),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> MutationResult<T> {
    Ok(check_status(response).await?.json().await?)
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
