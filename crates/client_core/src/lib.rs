//! Client-side state for the social feed.
//!
//! Every user-triggered mutation goes through [`OptimisticField`]: likes are
//! applied before the server answers and rolled back on failure, comments
//! and deletions only change visible state once the server confirms.

pub mod backend;
pub mod comments;
pub mod controller;
pub mod deletion;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod notify;

#[cfg(test)]
mod test_support;

pub use backend::{HttpBackend, PostBackend};
pub use comments::{CommentRecord, CommentThread, PendingCommentDraft};
pub use controller::OptimisticField;
pub use deletion::{AutoConfirm, ConfirmationGate, DeletionFlow, DeletionOutcome, FeedItem};
pub use engagement::{EngagementState, LikeToggle};
pub use error::{MutationError, MutationResult, RemoteFailure};
pub use feed::{FeedView, PostView, ViewerActions};
pub use notify::{BroadcastNotifier, Notice, NoticeLevel, Notifier};
