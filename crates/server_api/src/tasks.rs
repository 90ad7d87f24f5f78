use std::sync::Arc;

use shared::{
    domain::TaskId,
    error::ApiError,
    protocol::{CreateTaskRequest, Task},
};
use tokio::sync::RwLock;
use tracing::info;

/// In-memory task list owned by the process and shared with handlers.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl TaskStore {
    pub fn new(initial: Vec<Task>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn seeded() -> Self {
        Self::new(vec![
            Task {
                id: TaskId(1),
                title: "Learn".into(),
                completed: false,
            },
            Task {
                id: TaskId(2),
                title: "Learn JS".into(),
                completed: true,
            },
        ])
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    pub async fn create(&self, request: CreateTaskRequest) -> Result<Task, ApiError> {
        request.validate()?;

        let mut tasks = self.tasks.write().await;
        let next_id = tasks.iter().map(|task| task.id.0).max().unwrap_or(0) + 1;
        let task = Task {
            id: TaskId(next_id),
            title: request.title.trim().to_string(),
            completed: false,
        };
        tasks.push(task.clone());
        info!(task_id = next_id, "task created");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::ErrorCode;

    #[tokio::test]
    async fn seeded_store_lists_two_tasks() {
        let store = TaskStore::seeded();
        let tasks = store.list().await;
        assert_eq!(tasks.len(), 2);
        assert!(tasks[1].completed);
    }

    #[tokio::test]
    async fn create_assigns_next_id() {
        let store = TaskStore::seeded();
        let task = store
            .create(CreateTaskRequest {
                title: "  Learn Rust ".into(),
            })
            .await
            .expect("task");
        assert_eq!(task.id, TaskId(3));
        assert_eq!(task.title, "Learn Rust");
        assert!(!task.completed);
        assert_eq!(store.list().await.len(), 3);
    }

    #[tokio::test]
    async fn invalid_title_never_mutates_store() {
        let store = TaskStore::default();
        let err = store
            .create(CreateTaskRequest { title: "".into() })
            .await
            .expect_err("should fail");
        assert_eq!(err.code, ErrorCode::Validation);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn clones_share_the_same_list() {
        let store = TaskStore::default();
        let handle = store.clone();
        handle
            .create(CreateTaskRequest {
                title: "shared".into(),
            })
            .await
            .expect("task");
        assert_eq!(store.list().await.len(), 1);
    }
}
