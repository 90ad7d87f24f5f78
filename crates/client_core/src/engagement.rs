use std::sync::Arc;

use shared::{
    domain::{PostId, UserId},
    protocol::PostPayload,
};

use crate::{
    backend::PostBackend, controller::OptimisticField, error::MutationError, notify::Notifier,
};

/// The viewer's like flag and the post's like count, always moved together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngagementState {
    pub has_liked: bool,
    pub like_count: u64,
}

impl EngagementState {
    pub fn derive(liker_ids: &[UserId], viewer: Option<UserId>) -> Self {
        Self {
            has_liked: viewer.is_some_and(|viewer| liker_ids.contains(&viewer)),
            like_count: liker_ids.len() as u64,
        }
    }

    pub fn from_post(post: &PostPayload, viewer: Option<UserId>) -> Self {
        Self {
            has_liked: viewer.is_some_and(|viewer| post.liker_ids.contains(&viewer)),
            like_count: post.like_count,
        }
    }

    pub fn toggled(self) -> Self {
        if self.has_liked {
            Self {
                has_liked: false,
                like_count: self.like_count.saturating_sub(1),
            }
        } else {
            Self {
                has_liked: true,
                like_count: self.like_count.saturating_add(1),
            }
        }
    }
}

/// Like button for one post.
pub struct LikeToggle {
    post_id: PostId,
    backend: Arc<dyn PostBackend>,
    field: OptimisticField<EngagementState>,
}

impl LikeToggle {
    pub fn new(
        post_id: PostId,
        initial: EngagementState,
        backend: Arc<dyn PostBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            post_id,
            backend,
            field: OptimisticField::new("like", initial, notifier)
                .with_failure_notice("Failed to update like"),
        }
    }

    pub fn post_id(&self) -> PostId {
        self.post_id
    }

    /// Flip the like immediately and confirm with the server. Returns the
    /// state that stays visible afterwards.
    pub async fn toggle(&self) -> Result<EngagementState, MutationError> {
        let backend = self.backend.clone();
        let post_id = self.post_id;
        self.field
            .attempt(
                |current| current.toggled(),
                || async move { backend.toggle_engagement(post_id).await },
            )
            .await?;
        Ok(self.field.snapshot().await)
    }

    pub async fn state(&self) -> EngagementState {
        self.field.snapshot().await
    }

    pub async fn is_pending(&self) -> bool {
        self.field.is_pending().await
    }

    /// Adopt authoritative counts from a refetch. Refused while a toggle is
    /// in flight.
    pub async fn rebase(&self, authoritative: EngagementState) -> bool {
        self.field.rebase(authoritative).await
    }
}
