use super::*;
use crate::{
    error::RemoteFailure,
    notify::NoticeLevel,
    test_support::RecordingNotifier,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

fn counter(notifier: &Arc<RecordingNotifier>) -> OptimisticField<u32> {
    OptimisticField::new("counter", 5, notifier.clone()).with_failure_notice("Failed to count")
}

#[tokio::test]
async fn failed_attempt_restores_exact_snapshot() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier);

    let err = field
        .attempt(|n| n + 1, || async {
            Err::<(), _>(RemoteFailure::Rejected("nope".into()))
        })
        .await
        .expect_err("should fail");

    assert_eq!(err, MutationError::Remote(RemoteFailure::Rejected("nope".into())));
    assert_eq!(field.snapshot().await, 5);
    assert!(!field.is_pending().await);
    let notices = notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, "Failed to count");
}

#[tokio::test]
async fn transport_failure_rolls_back_like_explicit_failure() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier);

    field
        .attempt(|n| n * 10, || async {
            Err::<(), _>(RemoteFailure::Transport("connection reset".into()))
        })
        .await
        .expect_err("should fail");

    assert_eq!(field.snapshot().await, 5);
    assert_eq!(notifier.notices().len(), 1);
}

#[tokio::test]
async fn success_keeps_prediction_as_new_baseline() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier).with_success_notice("Counted");

    let value = field
        .attempt(|n| n + 1, || async { Ok::<_, RemoteFailure>("server says ok") })
        .await
        .expect("attempt");

    assert_eq!(value, "server says ok");
    assert_eq!(field.snapshot().await, 6);
    assert!(!field.is_pending().await);
    assert_eq!(notifier.notices(), vec![Notice::success("Counted")]);
}

#[tokio::test]
async fn prediction_is_visible_while_pending() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier);
    let (release, gate) = oneshot::channel::<()>();

    let attempt = field.attempt(|n| n + 1, || async move {
        gate.await
            .map_err(|_| RemoteFailure::Transport("gate dropped".into()))
    });
    let observe = async {
        tokio::task::yield_now().await;
        let during = (field.snapshot().await, field.is_pending().await);
        release.send(()).expect("release");
        during
    };

    let (result, during) = tokio::join!(attempt, observe);
    result.expect("attempt");
    assert_eq!(during, (6, true));
    assert_eq!(field.snapshot().await, 6);
}

#[tokio::test]
async fn second_attempt_while_pending_is_dropped() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier);
    let remote_calls = AtomicUsize::new(0);
    let (release, gate) = oneshot::channel::<()>();

    let first = field.attempt(|n| n + 1, || {
        remote_calls.fetch_add(1, Ordering::SeqCst);
        async move {
            gate.await
                .map_err(|_| RemoteFailure::Transport("gate dropped".into()))
        }
    });
    let second = async {
        tokio::task::yield_now().await;
        let result = field
            .attempt(|n| n + 100, || {
                remote_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), RemoteFailure>(()) }
            })
            .await;
        let visible = field.snapshot().await;
        release.send(()).expect("release");
        (result, visible)
    };

    let (first, (second, visible_after_drop)) = tokio::join!(first, second);
    first.expect("first attempt");
    assert_eq!(
        second.expect_err("dropped"),
        MutationError::GuardRejected { field: "counter" }
    );
    assert_eq!(visible_after_drop, 6);
    assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
    assert_eq!(field.snapshot().await, 6);
    assert!(notifier.notices().is_empty());
}

#[tokio::test]
async fn rebase_is_refused_while_pending() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = counter(&notifier);
    let (release, gate) = oneshot::channel::<()>();

    let attempt = field.attempt(|n| n + 1, || async move {
        gate.await
            .map_err(|_| RemoteFailure::Transport("gate dropped".into()))
    });
    let rebase_during = async {
        tokio::task::yield_now().await;
        let accepted = field.rebase(42).await;
        release.send(()).expect("release");
        accepted
    };

    let (result, accepted) = tokio::join!(attempt, rebase_during);
    result.expect("attempt");
    assert!(!accepted);
    assert_eq!(field.snapshot().await, 6);

    assert!(field.rebase(42).await);
    assert_eq!(field.snapshot().await, 42);
}

#[tokio::test]
async fn submit_changes_nothing_until_confirmed() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = OptimisticField::new("list", vec![1u32], notifier.clone());
    let (release, gate) = oneshot::channel::<()>();

    let submit = field.submit(
        || async move {
            gate.await
                .map(|()| 2u32)
                .map_err(|_| RemoteFailure::Transport("gate dropped".into()))
        },
        |list: &mut Vec<u32>, value: &u32| list.push(*value),
    );
    let observe = async {
        tokio::task::yield_now().await;
        let during = field.snapshot().await;
        release.send(()).expect("release");
        during
    };

    let (result, during) = tokio::join!(submit, observe);
    assert_eq!(result.expect("submit"), 2);
    assert_eq!(during, vec![1]);
    assert_eq!(field.snapshot().await, vec![1, 2]);
}

#[tokio::test]
async fn failed_submit_keeps_edits_made_while_pending() {
    let notifier = Arc::new(RecordingNotifier::default());
    let field = OptimisticField::new("draft", String::from("hello"), notifier.clone());
    let (release, gate) = oneshot::channel::<()>();

    let submit = field.submit(
        || async move {
            let _ = gate.await;
            Err::<(), _>(RemoteFailure::Rejected("boom".into()))
        },
        |_: &mut String, _: &()| {},
    );
    let edit = async {
        tokio::task::yield_now().await;
        field.edit(|draft| draft.push_str(" world")).await;
        release.send(()).expect("release");
    };

    let (result, ()) = tokio::join!(submit, edit);
    result.expect_err("should fail");
    assert_eq!(field.snapshot().await, "hello world");
    assert_eq!(notifier.notices().len(), 1);
}
