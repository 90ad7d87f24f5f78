use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AuthorSummary, CommentId, PostId, TaskId, UserId},
    error::ApiError,
};

pub const MAX_POST_CHARS: usize = 2000;
pub const MAX_COMMENT_CHARS: usize = 1000;
pub const MAX_TASK_TITLE_CHARS: usize = 200;

/// Profile claims forwarded from the identity provider on sign-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncUserRequest {
    pub identity_subject: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl SyncUserRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.identity_subject.trim().is_empty() {
            return Err(ApiError::validation("identity subject is required"));
        }
        if self.resolved_username().is_none() {
            return Err(ApiError::validation(
                "a username or an email address is required",
            ));
        }
        Ok(())
    }

    pub fn display_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        )
        .trim()
        .to_string()
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.email_addresses
            .first()
            .map(String::as_str)
            .filter(|email| !email.trim().is_empty())
    }

    /// Explicit username first, otherwise the local part of the primary email.
    pub fn resolved_username(&self) -> Option<String> {
        if let Some(username) = self
            .username
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            return Some(username.to_string());
        }
        self.primary_email()
            .and_then(|email| email.split('@').next())
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub identity_subject: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub user: UserSummary,
    pub follower_count: u64,
    pub following_count: u64,
    pub post_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl CreatePostRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        let has_image = self
            .image
            .as_deref()
            .is_some_and(|image| !image.trim().is_empty());
        if self.content.trim().is_empty() && !has_image {
            return Err(ApiError::validation("post needs content or an image"));
        }
        if self.content.chars().count() > MAX_POST_CHARS {
            return Err(ApiError::validation(format!(
                "post content exceeds {MAX_POST_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub content: String,
}

impl CreateCommentRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.content.trim().is_empty() {
            return Err(ApiError::validation("comment cannot be empty"));
        }
        if self.content.chars().count() > MAX_COMMENT_CHARS {
            return Err(ApiError::validation(format!(
                "comment exceeds {MAX_COMMENT_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPayload {
    pub comment_id: CommentId,
    pub post_id: PostId,
    pub author: AuthorSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    pub post_id: PostId,
    pub author: AuthorSummary,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub liker_ids: Vec<UserId>,
    pub like_count: u64,
    pub comments: Vec<CommentPayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleLikeResponse {
    pub post_id: PostId,
    pub liked: bool,
    pub like_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub title: String,
}

impl CreateTaskRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("title is required"));
        }
        if self.title.chars().count() > MAX_TASK_TITLE_CHARS {
            return Err(ApiError::validation(format!(
                "title exceeds {MAX_TASK_TITLE_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    PostCreated {
        post: PostPayload,
    },
    PostDeleted {
        post_id: PostId,
    },
    LikeToggled {
        post_id: PostId,
        user_id: UserId,
        liked: bool,
        like_count: u64,
    },
    CommentAdded {
        comment: CommentPayload,
    },
    Error(ApiError),
}
