//! Subscription filters select which runners start.

use topic_consumer::{consumer, RunError, SubscriptionFilter};

use crate::handlers;
use crate::support::{self, created, run_until, GROUP};

#[tokio::test]
async fn only_filtered_subscription_runs() {
    let broker = support::broker();
    broker.publish_json("task-created", "c-1", &created("t-1", "a")).unwrap();
    broker
        .publish_json("task-updated", "u-1", &serde_json::json!({"entity_id": "t-1", "title": "b"}))
        .unwrap();

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_updated)).unwrap();

    let filter: SubscriptionFilter = "task-created|task-worker".parse().unwrap();
    let observer = broker.clone();
    let report = run_until(&app, Some(filter), || {
        observer.completed("task-created", GROUP).len() == 1
    })
    .await
    .unwrap();

    assert_eq!(report.keys(), vec!["task-created|task-worker"]);
    assert_eq!(broker.receive_calls("task-updated", GROUP), 0);
    assert_eq!(broker.pending("task-updated", GROUP), 1);
}

#[tokio::test]
async fn filter_from_config() {
    let broker = support::broker();
    let config = support::config().with_filter("task-updated|task-worker".parse().unwrap());
    let mut app = topic_consumer::ConsumerApp::new(config, broker.clone(), support::event_types());
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_updated)).unwrap();
    app.cancel();

    let report = app.run(None).await.unwrap();

    assert_eq!(report.keys(), vec!["task-updated|task-worker"]);
    assert_eq!(broker.receive_calls("task-created", GROUP), 0);
}

#[tokio::test]
async fn empty_registry_never_connects() {
    let broker = support::broker();
    let app = support::app(&broker);

    let err = app
        .run(Some("task-created|task-worker".parse().unwrap()))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::NoSubscriptions));
    assert_eq!(broker.connect_count(), 0);
    assert_eq!(broker.close_count(), 0);
}
