use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{AuthorSummary, CommentId, Identity, PostId, UserId},
    protocol::{CommentPayload, PostPayload},
};
use tokio::sync::oneshot;

use crate::{
    backend::PostBackend,
    comments::CommentRecord,
    error::{MutationResult, RemoteFailure},
    notify::{Notice, Notifier},
};

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().expect("notices lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().expect("notices lock").push(notice);
    }
}

/// How the scripted backend answers one call.
pub(crate) enum Reply<T> {
    Now(MutationResult<T>),
    Later(oneshot::Receiver<MutationResult<T>>),
}

impl<T> Reply<T> {
    pub(crate) fn fail(reason: &str) -> Self {
        Self::Now(Err(RemoteFailure::Rejected(reason.to_string())))
    }

    pub(crate) fn transport(reason: &str) -> Self {
        Self::Now(Err(RemoteFailure::Transport(reason.to_string())))
    }

    /// Reply held until the returned sender fires.
    pub(crate) fn gated() -> (oneshot::Sender<MutationResult<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self::Later(rx))
    }

    async fn resolve(self) -> MutationResult<T> {
        match self {
            Self::Now(result) => result,
            Self::Later(rx) => rx
                .await
                .unwrap_or_else(|_| Err(RemoteFailure::Transport("reply dropped".into()))),
        }
    }
}

/// Backend whose replies are queued per operation; an empty queue succeeds.
pub(crate) struct ScriptedBackend {
    identity: Option<Identity>,
    toggle_replies: Mutex<VecDeque<Reply<()>>>,
    comment_replies: Mutex<VecDeque<Reply<CommentRecord>>>,
    delete_replies: Mutex<VecDeque<Reply<()>>>,
    pub(crate) toggle_calls: AtomicUsize,
    pub(crate) comment_calls: AtomicUsize,
    pub(crate) delete_calls: AtomicUsize,
    next_comment_id: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn signed_in(identity: Identity) -> Self {
        Self::with_identity(Some(identity))
    }

    pub(crate) fn signed_out() -> Self {
        Self::with_identity(None)
    }

    fn with_identity(identity: Option<Identity>) -> Self {
        Self {
            identity,
            toggle_replies: Mutex::new(VecDeque::new()),
            comment_replies: Mutex::new(VecDeque::new()),
            delete_replies: Mutex::new(VecDeque::new()),
            toggle_calls: AtomicUsize::new(0),
            comment_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            next_comment_id: AtomicUsize::new(100),
        }
    }

    pub(crate) fn queue_toggle(&self, reply: Reply<()>) {
        self.toggle_replies.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn queue_comment(&self, reply: Reply<CommentRecord>) {
        self.comment_replies.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn queue_delete(&self, reply: Reply<()>) {
        self.delete_replies.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PostBackend for ScriptedBackend {
    async fn toggle_engagement(&self, _item_id: PostId) -> MutationResult<()> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.toggle_replies.lock().expect("lock").pop_front();
        match reply {
            Some(reply) => reply.resolve().await,
            None => Ok(()),
        }
    }

    async fn submit_comment(&self, item_id: PostId, text: String) -> MutationResult<CommentRecord> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.comment_replies.lock().expect("lock").pop_front();
        match reply {
            Some(reply) => reply.resolve().await,
            None => {
                let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst) as i64;
                let author = self.identity.clone().unwrap_or_else(|| identity(0, "anon"));
                Ok(comment(id, item_id, &author, &text))
            }
        }
    }

    async fn delete_item(&self, _item_id: PostId) -> MutationResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.delete_replies.lock().expect("lock").pop_front();
        match reply {
            Some(reply) => reply.resolve().await,
            None => Ok(()),
        }
    }

    async fn fetch_current_user_identity(&self) -> Option<Identity> {
        self.identity.clone()
    }
}

pub(crate) fn identity(user_id: i64, username: &str) -> Identity {
    Identity {
        user_id: UserId(user_id),
        username: username.to_string(),
    }
}

pub(crate) fn author(identity: &Identity) -> AuthorSummary {
    AuthorSummary {
        user_id: identity.user_id,
        name: identity.username.clone(),
        username: identity.username.clone(),
        image: None,
    }
}

pub(crate) fn comment(id: i64, post_id: PostId, by: &Identity, text: &str) -> CommentPayload {
    CommentPayload {
        comment_id: CommentId(id),
        post_id,
        author: author(by),
        content: text.to_string(),
        created_at: Utc::now(),
    }
}

/// Post by `by` with `likers` already liking it.
pub(crate) fn post(post_id: i64, by: &Identity, likers: &[i64]) -> PostPayload {
    PostPayload {
        post_id: PostId(post_id),
        author: author(by),
        content: format!("post {post_id}"),
        image: None,
        created_at: Utc::now(),
        liker_ids: likers.iter().copied().map(UserId).collect(),
        like_count: likers.len() as u64,
        comments: Vec::new(),
    }
}
