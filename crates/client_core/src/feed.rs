use std::sync::Arc;

use shared::{
    domain::{Identity, PostId},
    protocol::PostPayload,
};
use tracing::debug;

use crate::{
    backend::PostBackend,
    comments::{CommentRecord, CommentThread, PendingCommentDraft},
    deletion::{ConfirmationGate, DeletionFlow, DeletionOutcome, FeedItem},
    engagement::{EngagementState, LikeToggle},
    error::MutationError,
    notify::Notifier,
};

/// What the viewer may do with a rendered post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerActions {
    Interactive { viewer: Identity, can_delete: bool },
    SignInPrompt,
}

impl ViewerActions {
    fn for_post(post: &PostPayload, viewer: Option<&Identity>) -> Self {
        match viewer {
            Some(viewer) => Self::Interactive {
                viewer: viewer.clone(),
                can_delete: post.author.user_id == viewer.user_id,
            },
            None => Self::SignInPrompt,
        }
    }

    pub fn can_delete(&self) -> bool {
        matches!(self, Self::Interactive { can_delete: true, .. })
    }
}

pub struct PostView {
    post: PostPayload,
    actions: ViewerActions,
    likes: LikeToggle,
    thread: CommentThread,
}

impl PostView {
    pub fn new(
        post: PostPayload,
        viewer: Option<&Identity>,
        backend: Arc<dyn PostBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let engagement = EngagementState::from_post(&post, viewer.map(|viewer| viewer.user_id));
        let likes = LikeToggle::new(post.post_id, engagement, backend.clone(), notifier.clone());
        let thread = CommentThread::new(post.post_id, post.comments.clone(), backend, notifier);
        Self {
            actions: ViewerActions::for_post(&post, viewer),
            post,
            likes,
            thread,
        }
    }

    pub fn post_id(&self) -> PostId {
        self.post.post_id
    }

    /// The post as loaded. Likes and comments may have moved on since; read
    /// those through [`PostView::likes`] and [`PostView::comments`].
    pub fn post(&self) -> &PostPayload {
        &self.post
    }

    pub fn actions(&self) -> &ViewerActions {
        &self.actions
    }

    fn require_viewer(&self, action: &str) -> Result<(), MutationError> {
        match self.actions {
            ViewerActions::Interactive { .. } => Ok(()),
            ViewerActions::SignInPrompt => {
                Err(MutationError::validation(format!("sign in to {action}")))
            }
        }
    }

    pub async fn toggle_like(&self) -> Result<EngagementState, MutationError> {
        self.require_viewer("like posts")?;
        self.likes.toggle().await
    }

    pub async fn set_comment_draft(&self, text: impl Into<String>) {
        self.thread.set_draft(text).await;
    }

    pub async fn comment_draft(&self) -> PendingCommentDraft {
        self.thread.draft().await
    }

    pub async fn submit_comment(&self) -> Result<CommentRecord, MutationError> {
        self.require_viewer("comment")?;
        self.thread.submit().await
    }

    pub async fn likes(&self) -> EngagementState {
        self.likes.state().await
    }

    pub async fn comments(&self) -> Vec<CommentRecord> {
        self.thread.comments().await
    }

    /// Adopt refetched likes and comments. Returns false when a pending
    /// mutation kept either part from being replaced.
    pub async fn refresh(&self, fresh: &PostPayload) -> bool {
        let viewer = match &self.actions {
            ViewerActions::Interactive { viewer, .. } => Some(viewer.user_id),
            ViewerActions::SignInPrompt => None,
        };
        let likes = self
            .likes
            .rebase(EngagementState::from_post(fresh, viewer))
            .await;
        let comments = self.thread.rebase(fresh.comments.clone()).await;
        likes && comments
    }
}

impl FeedItem for Arc<PostView> {
    fn item_id(&self) -> PostId {
        self.post_id()
    }
}

/// The rendered feed for one viewer.
pub struct FeedView {
    viewer: Option<Identity>,
    backend: Arc<dyn PostBackend>,
    notifier: Arc<dyn Notifier>,
    flow: DeletionFlow<Arc<PostView>>,
}

impl FeedView {
    /// Build views for `posts`. The viewer identity is fetched once here.
    pub async fn load(
        backend: Arc<dyn PostBackend>,
        posts: Vec<PostPayload>,
        gate: Arc<dyn ConfirmationGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let viewer = backend.fetch_current_user_identity().await;
        debug!(
            signed_in = viewer.is_some(),
            posts = posts.len(),
            "feed loaded"
        );
        let views = posts
            .into_iter()
            .map(|post| {
                Arc::new(PostView::new(
                    post,
                    viewer.as_ref(),
                    backend.clone(),
                    notifier.clone(),
                ))
            })
            .collect();
        let flow = DeletionFlow::new(views, backend.clone(), gate, notifier.clone());
        Self {
            viewer,
            backend,
            notifier,
            flow,
        }
    }

    pub fn viewer(&self) -> Option<&Identity> {
        self.viewer.as_ref()
    }

    pub async fn posts(&self) -> Vec<Arc<PostView>> {
        self.flow.items().await
    }

    pub async fn post(&self, post_id: PostId) -> Option<Arc<PostView>> {
        self.flow.find(post_id).await
    }

    pub async fn is_deleting(&self, post_id: PostId) -> bool {
        self.flow.is_deleting(post_id).await
    }

    /// Delete a post the viewer authored, after confirmation.
    pub async fn delete_post(&self, post_id: PostId) -> Result<DeletionOutcome, MutationError> {
        let view = self
            .post(post_id)
            .await
            .ok_or_else(|| MutationError::validation(format!("post {post_id} is not in the feed")))?;
        if !view.actions().can_delete() {
            return Err(MutationError::validation(
                "only the author can delete this post",
            ));
        }
        self.flow.delete(post_id).await
    }

    /// Merge a refetched post list. Existing views keep their controllers
    /// and adopt the fresh counts; new posts get new views. Refused while a
    /// deletion is in flight.
    pub async fn refresh(&self, posts: Vec<PostPayload>) -> bool {
        let current = self.flow.items().await;
        let mut views = Vec::with_capacity(posts.len());
        for fresh in posts {
            match current.iter().find(|view| view.post_id() == fresh.post_id) {
                Some(view) => {
                    if !view.refresh(&fresh).await {
                        debug!(post_id = %fresh.post_id, "post refresh deferred");
                    }
                    views.push(view.clone());
                }
                None => views.push(Arc::new(PostView::new(
                    fresh,
                    self.viewer.as_ref(),
                    self.backend.clone(),
                    self.notifier.clone(),
                ))),
            }
        }
        self.flow.rebase(views).await
    }
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
