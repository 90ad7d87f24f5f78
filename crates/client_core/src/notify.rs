use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient, non-blocking message for the user (a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

pub struct BroadcastNotifier {
    notices: broadcast::Sender<Notice>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (notices, _) = broadcast::channel(capacity.max(1));
        Self { notices }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notice: Notice) {
        // nobody listening is fine, the notice is transient
        let _ = self.notices.send(notice);
    }
}
