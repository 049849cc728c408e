//! Cooperative shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use topic_consumer::transport::Operation;
use topic_consumer::{consumer, Consumer, Disposition};

use crate::handlers;
use crate::support::{self, created, TaskCreatedStateChangeEvent, GROUP};

#[tokio::test]
async fn cancel_during_batch_finishes_it_then_stops() {
    let broker = support::broker();
    for i in 0..6 {
        broker
            .publish_json("task-created", &format!("c-{i}"), &created(&format!("t-{i}"), "a"))
            .unwrap();
    }

    let mut app = support::app(&broker);
    let token = app.cancel_token();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    app.register(
        Consumer::new("on_task_created", move |_e: TaskCreatedStateChangeEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
            token.cancel();
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Disposition::Ack
            }
        }),
        topic_consumer::SubscriptionOptions::new().max_batch_size(2),
    )
    .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), app.run(None))
        .await
        .unwrap()
        .unwrap();

    // One batch in flight when cancelled; nothing fetched after it.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.total().acked, 2);
    assert_eq!(broker.receive_calls("task-created", GROUP), 1);
    assert_eq!(broker.pending("task-created", GROUP), 4);
    assert_eq!(broker.in_flight("task-created", GROUP), 0);
    assert_eq!(broker.close_count(), 1);
}

#[tokio::test]
async fn cancel_stops_every_runner() {
    let broker = support::broker();
    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_updated)).unwrap();
    app.consume(consumer!(handlers::on_task_deleted)).unwrap();

    let token = app.cancel_token();
    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    };

    let (report, ()) = tokio::join!(app.run(None), stopper);
    let report = report.unwrap();

    assert_eq!(report.runners.len(), 3);
    for runner in &report.runners {
        assert_eq!(runner.stats.messages, 0);
        assert!(runner.stats.empty_polls >= 1);
    }

    // Nothing is fetched once stopped.
    let before = broker.receive_calls("task-created", GROUP);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.receive_calls("task-created", GROUP), before);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let broker = support::broker();
    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();

    app.cancel();
    app.cancel();
    app.cancel_token().cancel();

    let report = app.run(None).await.unwrap();
    assert_eq!(report.total().batches, 0);
    assert!(broker
        .journal("task-created", GROUP)
        .iter()
        .all(|op| !matches!(op, Operation::Receive { .. })));
}
