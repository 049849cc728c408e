//! Test domain: task lifecycle events and an app wired to the in-memory broker.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use topic_consumer::transport::InMemoryBroker;
use topic_consumer::{
    ConsumerApp, ConsumerConfig, EventPayload, EventType, EventTypeRegistry, RunError, RunReport,
    SubscriptionFilter,
};

pub const GROUP: &str = "task-worker";

#[derive(Debug, Clone, Serialize, Deserialize, EventPayload)]
pub struct TaskCreatedStateChangeEvent {
    pub entity_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, EventPayload)]
pub struct TaskUpdatedStateChangeEvent {
    pub entity_id: String,
    pub title: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, EventPayload)]
#[event(entity_id = task_id)]
pub struct TaskDeletedStateChangeEvent {
    pub task_id: String,
}

/// Abstract marker; never gets a stream.
#[derive(Debug, Clone, Deserialize, EventPayload)]
pub struct TaskStateChangeEventBase {
    pub entity_id: String,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn event_types() -> EventTypeRegistry {
    EventTypeRegistry::discover([
        EventType::of::<TaskStateChangeEventBase>(),
        EventType::of::<TaskCreatedStateChangeEvent>(),
        EventType::of::<TaskUpdatedStateChangeEvent>(),
        EventType::of::<TaskDeletedStateChangeEvent>(),
    ])
    .unwrap()
}

pub fn config() -> ConsumerConfig {
    ConsumerConfig::default()
        .with_default_group(GROUP)
        .with_max_wait_time(Duration::from_millis(20))
}

/// Broker with a subscription per stream in the default group.
pub fn broker() -> InMemoryBroker {
    init_tracing();
    let broker = InMemoryBroker::new();
    for stream in ["task-created", "task-updated", "task-deleted"] {
        broker.create_subscription(stream, GROUP);
    }
    broker
}

pub fn app(broker: &InMemoryBroker) -> ConsumerApp<InMemoryBroker> {
    ConsumerApp::new(config(), broker.clone(), event_types())
}

pub fn created(id: &str, title: &str) -> TaskCreatedStateChangeEvent {
    TaskCreatedStateChangeEvent {
        entity_id: id.into(),
        title: title.into(),
    }
}

/// Run `app` until `done` holds (or five seconds pass), then cancel it.
pub async fn run_until(
    app: &ConsumerApp<InMemoryBroker>,
    filter: Option<SubscriptionFilter>,
    done: impl Fn() -> bool,
) -> Result<RunReport, RunError> {
    let token = app.cancel_token();
    let stopper = async move {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && !token.is_cancelled() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
    };

    let (report, ()) = tokio::join!(app.run(filter), stopper);
    report
}
