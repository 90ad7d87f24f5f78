use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use shared::{domain::PostId, protocol::PostPayload};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    backend::PostBackend,
    error::MutationError,
    notify::{Notice, Notifier},
};

/// Asks the user to confirm a destructive action.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, item_id: PostId) -> bool;
}

/// Gate with a fixed answer, for non-interactive callers.
pub struct AutoConfirm(pub bool);

#[async_trait]
impl ConfirmationGate for AutoConfirm {
    async fn confirm(&self, _item_id: PostId) -> bool {
        self.0
    }
}

pub trait FeedItem {
    fn item_id(&self) -> PostId;
}

impl FeedItem for PostPayload {
    fn item_id(&self) -> PostId {
        self.post_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    Removed,
    Declined,
}

struct DeletionState<I> {
    items: Vec<I>,
    deleting: HashSet<PostId>,
}

/// Confirm-then-commit removal over a local collection. Items stay visible
/// until the server confirms the delete.
pub struct DeletionFlow<I> {
    inner: Mutex<DeletionState<I>>,
    backend: Arc<dyn PostBackend>,
    gate: Arc<dyn ConfirmationGate>,
    notifier: Arc<dyn Notifier>,
}

impl<I> DeletionFlow<I>
where
    I: FeedItem + Clone,
{
    pub fn new(
        items: Vec<I>,
        backend: Arc<dyn PostBackend>,
        gate: Arc<dyn ConfirmationGate>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Mutex::new(DeletionState {
                items,
                deleting: HashSet::new(),
            }),
            backend,
            gate,
            notifier,
        }
    }

    pub async fn items(&self) -> Vec<I> {
        self.inner.lock().await.items.clone()
    }

    pub async fn find(&self, item_id: PostId) -> Option<I> {
        let state = self.inner.lock().await;
        state
            .items
            .iter()
            .find(|item| item.item_id() == item_id)
            .cloned()
    }

    pub async fn is_deleting(&self, item_id: PostId) -> bool {
        self.inner.lock().await.deleting.contains(&item_id)
    }

    /// Replace the collection with a refetch. Refused while any deletion is
    /// in flight.
    pub async fn rebase(&self, items: Vec<I>) -> bool {
        let mut state = self.inner.lock().await;
        if !state.deleting.is_empty() {
            debug!(in_flight = state.deleting.len(), "feed rebase deferred");
            return false;
        }
        state.items = items;
        true
    }

    pub async fn delete(&self, item_id: PostId) -> Result<DeletionOutcome, MutationError> {
        self.check_admissible(item_id).await?;

        if !self.gate.confirm(item_id).await {
            debug!(%item_id, "deletion declined");
            return Ok(DeletionOutcome::Declined);
        }

        {
            // the gate may have been open for a while; re-check under the lock
            let mut state = self.inner.lock().await;
            Self::admissible(&state, item_id)?;
            state.deleting.insert(item_id);
        }

        let outcome = self.backend.delete_item(item_id).await;

        let mut state = self.inner.lock().await;
        state.deleting.remove(&item_id);
        match outcome {
            Ok(()) => {
                state.items.retain(|item| item.item_id() != item_id);
                drop(state);
                info!(%item_id, "item deleted");
                self.notifier.notify(Notice::success("Post deleted successfully"));
                Ok(DeletionOutcome::Removed)
            }
            Err(failure) => {
                drop(state);
                warn!(%item_id, reason = failure.reason(), "delete failed, item kept");
                self.notifier.notify(Notice::error("Failed to delete post"));
                Err(failure.into())
            }
        }
    }

    async fn check_admissible(&self, item_id: PostId) -> Result<(), MutationError> {
        let state = self.inner.lock().await;
        Self::admissible(&state, item_id)
    }

    fn admissible(state: &DeletionState<I>, item_id: PostId) -> Result<(), MutationError> {
        if state.deleting.contains(&item_id) {
            debug!(%item_id, "dropped delete while another is in flight");
            return Err(MutationError::GuardRejected { field: "delete" });
        }
        if !state.items.iter().any(|item| item.item_id() == item_id) {
            return Err(MutationError::validation(format!(
                "post {item_id} is not in the feed"
            )));
        }
        Ok(())
    }
}
