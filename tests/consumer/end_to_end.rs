//! Messages flow from publish to settlement.

use topic_consumer::transport::Message;
use topic_consumer::{consumer, SubscriptionOptions, REJECT_REASON};

use crate::handlers;
use crate::support::{self, created, run_until, TaskDeletedStateChangeEvent, GROUP};

#[tokio::test]
async fn dispositions_are_applied() {
    let broker = support::broker();
    broker.set_max_delivery_count(2);
    broker.publish_json("task-created", "m-ok", &created("t-1", "write tests")).unwrap();
    broker.publish_json("task-created", "m-empty", &created("t-2", "")).unwrap();
    broker.publish_json("task-created", "m-flaky", &created("t-3", "flaky")).unwrap();

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();

    let observer = broker.clone();
    let report = run_until(&app, None, || {
        observer.completed("task-created", GROUP).len() == 1
            && observer.dead_lettered("task-created", GROUP).len() == 2
    })
    .await
    .unwrap();

    assert_eq!(broker.completed("task-created", GROUP), vec!["m-ok"]);

    let dead: Vec<(String, String)> = broker
        .dead_lettered("task-created", GROUP)
        .into_iter()
        .map(|(m, reason)| (m.id, reason))
        .collect();
    assert!(dead.contains(&("m-empty".to_string(), REJECT_REASON.to_string())));
    assert!(dead.contains(&("m-flaky".to_string(), "MaxDeliveryCountExceeded".to_string())));

    let stats = report.get("task-created|task-worker").unwrap();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.settle_failures, 0);
}

#[tokio::test]
async fn raw_and_typed_handlers_run_side_by_side() {
    let broker = support::broker();
    broker.publish_json("task-created", "c-1", &created("t-1", "a")).unwrap();
    broker
        .publish("task-updated", Message::with_string_body("u-1", r#"{"anything":[1,2,3]}"#));
    broker
        .publish_json(
            "task-deleted",
            "d-1",
            &TaskDeletedStateChangeEvent { task_id: "t-1".into() },
        )
        .unwrap();

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_updated)).unwrap();
    app.consume(consumer!(handlers::on_task_deleted)).unwrap();

    let observer = broker.clone();
    let report = run_until(&app, None, || {
        ["task-created", "task-updated", "task-deleted"]
            .iter()
            .all(|s| observer.completed(s, GROUP).len() == 1)
    })
    .await
    .unwrap();

    assert_eq!(
        report.keys(),
        vec![
            "task-created|task-worker",
            "task-updated|task-worker",
            "task-deleted|task-worker"
        ]
    );
    assert_eq!(report.total().acked, 3);
}

#[tokio::test]
async fn handler_errors_and_bad_bodies_are_retried() {
    let broker = support::broker();
    broker.set_max_delivery_count(1);
    broker
        .publish_json(
            "task-deleted",
            "d-locked",
            &TaskDeletedStateChangeEvent { task_id: "locked-1".into() },
        )
        .unwrap();
    broker.publish("task-deleted", Message::with_string_body("d-garbage", "{not json"));
    broker.publish("task-deleted", Message::with_string_body("d-shape", r#"{"entity_id":"x"}"#));

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_deleted)).unwrap();

    let observer = broker.clone();
    let report = run_until(&app, None, || observer.dead_lettered("task-deleted", GROUP).len() == 3)
        .await
        .unwrap();

    for (_, reason) in broker.dead_lettered("task-deleted", GROUP) {
        assert_eq!(reason, "MaxDeliveryCountExceeded");
    }
    assert!(broker.completed("task-deleted", GROUP).is_empty());
    assert_eq!(report.total().retried, 3);
}

#[tokio::test]
async fn explicit_stream_and_group() {
    let broker = support::broker();
    broker.create_subscription("task-created", "audit");
    broker.publish_json("task-created", "c-1", &created("t-1", "a")).unwrap();

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.register(
        consumer!(handlers::audit),
        SubscriptionOptions::new().stream("task-created").group("audit"),
    )
    .unwrap();

    let observer = broker.clone();
    run_until(&app, None, || {
        observer.completed("task-created", GROUP).len() == 1
            && observer.completed("task-created", "audit").len() == 1
    })
    .await
    .unwrap();

    assert_eq!(broker.completed("task-created", "audit"), vec!["c-1"]);
    assert_eq!(broker.completed("task-created", GROUP), vec!["c-1"]);
}

#[tokio::test]
async fn batch_size_override_limits_fetches() {
    let broker = support::broker();
    for i in 0..7 {
        broker
            .publish_json("task-created", &format!("c-{i}"), &created(&format!("t-{i}"), "a"))
            .unwrap();
    }

    let mut app = support::app(&broker);
    app.register(
        consumer!(handlers::on_task_created),
        SubscriptionOptions::new().max_batch_size(3),
    )
    .unwrap();

    let observer = broker.clone();
    let report = run_until(&app, None, || observer.completed("task-created", GROUP).len() == 7)
        .await
        .unwrap();

    let stats = report.get("task-created|task-worker").unwrap();
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.messages, 7);
}
