use std::sync::Arc;

use shared::{
    domain::PostId,
    protocol::{CommentPayload, CreateCommentRequest},
};

use crate::{
    backend::PostBackend, controller::OptimisticField, error::MutationError, notify::Notifier,
};

/// A comment as confirmed by the server.
pub type CommentRecord = CommentPayload;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCommentDraft {
    pub text: String,
    pub submitting: bool,
}

#[derive(Debug, Clone, Default)]
struct ThreadState {
    comments: Vec<CommentRecord>,
    draft: String,
}

/// Visible comments of one post plus the viewer's draft.
///
/// Submission is pessimistic: nothing is appended until the server returns
/// the stored comment.
pub struct CommentThread {
    post_id: PostId,
    backend: Arc<dyn PostBackend>,
    field: OptimisticField<ThreadState>,
}

impl CommentThread {
    pub fn new(
        post_id: PostId,
        comments: Vec<CommentRecord>,
        backend: Arc<dyn PostBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let initial = ThreadState {
            comments,
            draft: String::new(),
        };
        Self {
            post_id,
            backend,
            field: OptimisticField::new("comment", initial, notifier)
                .with_success_notice("Comment posted successfully")
                .with_failure_notice("Failed to add comment"),
        }
    }

    pub async fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.field.edit(|state| state.draft = text).await;
    }

    pub async fn draft(&self) -> PendingCommentDraft {
        let text = self.field.snapshot().await.draft;
        PendingCommentDraft {
            text,
            submitting: self.field.is_pending().await,
        }
    }

    pub async fn comments(&self) -> Vec<CommentRecord> {
        self.field.snapshot().await.comments
    }

    /// Send the current draft. Blank or oversized drafts fail validation
    /// without reaching the server.
    pub async fn submit(&self) -> Result<CommentRecord, MutationError> {
        let request = CreateCommentRequest {
            content: self.field.snapshot().await.draft.trim().to_string(),
        };
        request
            .validate()
            .map_err(|err| MutationError::validation(err.message))?;

        let backend = self.backend.clone();
        let post_id = self.post_id;
        self.field
            .submit(
                || async move { backend.submit_comment(post_id, request.content).await },
                |state, comment: &CommentRecord| {
                    state.comments.push(comment.clone());
                    state.draft.clear();
                },
            )
            .await
    }

    /// Replace the visible comments with a refetched list; the draft is kept.
    pub async fn rebase(&self, comments: Vec<CommentRecord>) -> bool {
        self.field
            .rebase_with(|state| state.comments = comments)
            .await
    }
}
