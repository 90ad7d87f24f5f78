use std::{fmt, future::Future, sync::Arc};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{MutationError, MutationResult},
    notify::{Notice, Notifier},
};

/// One piece of user-visible state whose mutations are reconciled against a
/// remote call.
///
/// At most one mutation is in flight per field. While it is pending the
/// visible state is the confirmed baseline plus that single mutation's
/// predicted effect; any further attempt is dropped, never queued. The lock
/// is released before the remote call is awaited, so reads stay available
/// during the suspension.
pub struct OptimisticField<S> {
    field: &'static str,
    inner: Mutex<FieldState<S>>,
    notifier: Arc<dyn Notifier>,
    success_notice: Option<&'static str>,
    failure_notice: &'static str,
}

struct FieldState<S> {
    visible: S,
    pending: Option<PendingAttempt<S>>,
}

struct PendingAttempt<S> {
    attempt_id: Uuid,
    snapshot: Option<S>,
}

impl<S> OptimisticField<S>
where
    S: Clone + fmt::Debug,
{
    pub fn new(field: &'static str, initial: S, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            field,
            inner: Mutex::new(FieldState {
                visible: initial,
                pending: None,
            }),
            notifier,
            success_notice: None,
            failure_notice: "Something went wrong",
        }
    }

    pub fn with_success_notice(mut self, message: &'static str) -> Self {
        self.success_notice = Some(message);
        self
    }

    pub fn with_failure_notice(mut self, message: &'static str) -> Self {
        self.failure_notice = message;
        self
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub async fn snapshot(&self) -> S {
        self.inner.lock().await.visible.clone()
    }

    pub async fn is_pending(&self) -> bool {
        self.inner.lock().await.pending.is_some()
    }

    /// Replace the baseline with freshly fetched authoritative state.
    /// Refused while a mutation is pending.
    pub async fn rebase(&self, authoritative: S) -> bool {
        self.rebase_with(|visible| *visible = authoritative).await
    }

    pub async fn rebase_with(&self, apply: impl FnOnce(&mut S)) -> bool {
        let mut state = self.inner.lock().await;
        if state.pending.is_some() {
            debug!(field = self.field, "rebase deferred while a mutation is pending");
            return false;
        }
        apply(&mut state.visible);
        true
    }

    /// Local edit that is not a remote mutation (typing into a draft).
    /// Allowed while a submission is pending.
    pub(crate) async fn edit(&self, apply: impl FnOnce(&mut S)) {
        let mut state = self.inner.lock().await;
        apply(&mut state.visible);
    }

    /// Optimistic mutation: show `predict(current)` immediately, then keep it
    /// on success or restore the exact pre-attempt snapshot on failure.
    ///
    /// `remote` is only invoked when the attempt is admitted.
    pub async fn attempt<T, P, F, Fut>(&self, predict: P, remote: F) -> Result<T, MutationError>
    where
        P: FnOnce(&S) -> S,
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationResult<T>>,
    {
        let attempt_id = {
            let mut state = self.inner.lock().await;
            let attempt_id = self.admit(&mut state)?;
            let snapshot = state.visible.clone();
            state.visible = predict(&snapshot);
            debug!(
                field = self.field,
                %attempt_id,
                predicted = ?state.visible,
                "applied optimistic state"
            );
            state.pending = Some(PendingAttempt {
                attempt_id,
                snapshot: Some(snapshot),
            });
            attempt_id
        };

        let outcome = remote().await;
        self.settle(attempt_id, outcome, |_, _| {}).await
    }

    /// Pessimistic mutation: visible state is untouched until the remote call
    /// succeeds, then `commit` folds the authoritative result in.
    pub async fn submit<T, F, Fut, C>(&self, remote: F, commit: C) -> Result<T, MutationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationResult<T>>,
        C: FnOnce(&mut S, &T),
    {
        let attempt_id = {
            let mut state = self.inner.lock().await;
            let attempt_id = self.admit(&mut state)?;
            state.pending = Some(PendingAttempt {
                attempt_id,
                snapshot: None,
            });
            attempt_id
        };

        let outcome = remote().await;
        self.settle(attempt_id, outcome, commit).await
    }

    fn admit(&self, state: &mut FieldState<S>) -> Result<Uuid, MutationError> {
        if let Some(pending) = &state.pending {
            debug!(
                field = self.field,
                pending_attempt = %pending.attempt_id,
                "dropped attempt while another is in flight"
            );
            return Err(MutationError::GuardRejected { field: self.field });
        }
        Ok(Uuid::new_v4())
    }

    async fn settle<T, C>(
        &self,
        attempt_id: Uuid,
        outcome: MutationResult<T>,
        commit: C,
    ) -> Result<T, MutationError>
    where
        C: FnOnce(&mut S, &T),
    {
        let mut state = self.inner.lock().await;
        let pending = state.pending.take();

        match outcome {
            Ok(value) => {
                commit(&mut state.visible, &value);
                drop(state);
                info!(field = self.field, %attempt_id, "mutation confirmed");
                if let Some(message) = self.success_notice {
                    self.notifier.notify(Notice::success(message));
                }
                Ok(value)
            }
            Err(failure) => {
                if let Some(snapshot) = pending.and_then(|pending| pending.snapshot) {
                    state.visible = snapshot;
                }
                drop(state);
                warn!(
                    field = self.field,
                    %attempt_id,
                    reason = failure.reason(),
                    "mutation failed, visible state restored"
                );
                self.notifier.notify(Notice::error(self.failure_notice));
                Err(failure.into())
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
