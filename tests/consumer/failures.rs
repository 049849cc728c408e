//! Failures stay contained: per message, per runner, per connection.

use std::time::Duration;

use topic_consumer::transport::{Lifecycle, Message};
use topic_consumer::{
    consumer, ConsumerApp, Consumer, Disposition, RunError, SubscriptionOptions, TransportError,
};

use crate::handlers;
use crate::support::{self, created, run_until, GROUP};

#[tokio::test]
async fn panicking_handler_only_fails_its_message() {
    let broker = support::broker();
    broker.set_max_delivery_count(1);
    broker.publish("task-updated", Message::with_string_body("boom", r#"{"panic":true}"#));
    broker.publish("task-updated", Message::with_string_body("fine", r#"{"panic":false}"#));

    let mut app = support::app(&broker);
    app.consume(Consumer::new("on_task_updated", |body: serde_json::Value| async move {
        if body["panic"] == true {
            panic!("handler bug");
        }
        Disposition::Ack
    }))
    .unwrap();

    let observer = broker.clone();
    let report = run_until(&app, None, || {
        observer.completed("task-updated", GROUP).len() == 1
            && observer.dead_lettered("task-updated", GROUP).len() == 1
    })
    .await
    .unwrap();

    assert_eq!(broker.completed("task-updated", GROUP), vec!["fine"]);
    let stats = report.get("task-updated|task-worker").unwrap();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.retried, 1);
}

#[tokio::test]
async fn receive_failure_stops_app_and_reports_first_error() {
    let broker = support::broker();
    broker.fail_next_receive(
        "task-deleted",
        GROUP,
        TransportError::Receive("entity not found".into()),
    );

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_deleted)).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), app.run(None))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        RunError::Transport(TransportError::Receive(reason)) => {
            assert_eq!(reason, "entity not found")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(app.cancel_token().is_cancelled());
    assert_eq!(broker.connect_count(), 1);
    assert_eq!(broker.close_count(), 1);
}

#[tokio::test]
async fn lost_lease_stops_app_after_closing_connection() {
    let broker = support::broker();
    broker.fail_lease_renewal("task-created", GROUP, "lock token expired");

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.consume(consumer!(handlers::on_task_deleted)).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), app.run(None))
        .await
        .unwrap()
        .unwrap_err();

    match err {
        RunError::Transport(TransportError::LeaseRenewal(reason)) => {
            assert_eq!(reason, "lock token expired")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(app.cancel_token().is_cancelled());
    assert_eq!(broker.close_count(), 1);

    let lifecycle = broker.lifecycle();
    let closed = |event: &&Lifecycle| {
        matches!(event, Lifecycle::ReceiverClosed(_) | Lifecycle::RenewerClosed(_))
    };
    assert_eq!(lifecycle.iter().filter(closed).count(), 4);
}

#[tokio::test]
async fn unauthorized_connect() {
    let broker = support::broker();
    broker.require_credentials();

    let mut app = support::app(&broker);
    app.consume(consumer!(handlers::on_task_created)).unwrap();

    let err = app.run(None).await.unwrap_err();
    assert!(matches!(err, RunError::Transport(TransportError::Unauthorized(_))));
    assert_eq!(broker.close_count(), 0);
}

#[tokio::test]
async fn connection_string_satisfies_credentials() {
    let broker = support::broker();
    broker.require_credentials();
    let config = support::config().with_connection(topic_consumer::ConnectionSettings {
        connection_string: Some("Endpoint=sb://local/;SharedAccessKey=secret".into()),
        ..Default::default()
    });

    let mut app = ConsumerApp::new(config, broker.clone(), support::event_types());
    app.consume(consumer!(handlers::on_task_created)).unwrap();
    app.cancel();

    app.run(None).await.unwrap();
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn hung_handler_times_out() {
    let broker = support::broker();
    broker.set_max_delivery_count(1);
    broker.publish_json("task-created", "c-1", &created("t-1", "a")).unwrap();

    let mut app = support::app(&broker);
    app.register(
        Consumer::new("on_task_created", |_e: serde_json::Value| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }),
        SubscriptionOptions::new().handler_timeout(Duration::from_millis(20)),
    )
    .unwrap();

    let observer = broker.clone();
    run_until(&app, None, || observer.dead_lettered("task-created", GROUP).len() == 1)
        .await
        .unwrap();

    assert!(broker.completed("task-created", GROUP).is_empty());
}

#[test]
fn registration_errors_surface_at_register() {
    let broker = support::broker();
    let mut app = support::app(&broker);

    let err = app
        .consume(Consumer::new("on_task_archived", |_e: serde_json::Value| async {}))
        .unwrap_err();
    assert_eq!(err.to_string(), "no event type found to match stream `task-archived`");
    assert!(app.subscriptions().is_empty());
}
