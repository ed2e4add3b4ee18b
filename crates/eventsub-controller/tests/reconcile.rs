//! Reconciler scenarios against the stream backend and in-memory
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use eventsub_backend::{Backend, ClusterLocalSinkValidator, StreamBackend, StreamConfig};
use eventsub_controller::{ReconcileOutcome, Reconciler, SubscriptionDefaults};
use eventsub_core::subscription::reasons;
use eventsub_core::{
    ConditionType, EventBroadcaster, EventKind, HashedNameMapper, PrefixCleaner, ResourceKey,
    SubjectAlphabet, Subscription, TypeMatching,
};
use eventsub_memory::{InMemoryStreamBroker, InMemorySubscriptionStore};

const STREAM: &str = "eventsub";
const SINK: &str = "http://orders.shop.svc.cluster.local:8080/events";

struct Fixture {
    store: Arc<InMemorySubscriptionStore>,
    broker: Arc<InMemoryStreamBroker>,
    backend: Arc<StreamBackend>,
    events: EventBroadcaster,
    reconciler: Reconciler,
}

async fn fixture() -> Fixture {
    let store = Arc::new(InMemorySubscriptionStore::new());
    let broker = Arc::new(InMemoryStreamBroker::new());
    let backend = Arc::new(StreamBackend::new(
        StreamConfig {
            url: "nats://broker.test:4222".into(),
            ..Default::default()
        },
        broker.clone(),
        Arc::new(HashedNameMapper::new(STREAM, 48, 24)),
    ));
    backend.initialize().await.unwrap();

    let events = EventBroadcaster::new();
    let reconciler = Reconciler::new(
        store.clone(),
        backend.clone(),
        Arc::new(PrefixCleaner::new("", SubjectAlphabet::Stream, 255)),
        Arc::new(events.clone()),
        SubscriptionDefaults {
            requeue_after: Duration::from_secs(5),
            validate_sinks: true,
        },
    )
    .with_sink_validator(Arc::new(ClusterLocalSinkValidator));

    Fixture {
        store,
        broker,
        backend,
        events,
        reconciler,
    }
}

fn orders() -> Subscription {
    Subscription::new("shop", "orders-v1", SINK, ["order.created.v1"])
}

impl Fixture {
    fn stored(&self, key: &ResourceKey) -> Subscription {
        self.store.snapshot(key).unwrap()
    }

    fn filters(&self, subscription: &Subscription) -> Vec<String> {
        self.broker
            .consumer(STREAM, &self.backend.consumer_name(subscription))
            .map(|c| c.filter_subjects)
            .unwrap_or_default()
    }
}

#[tokio::test]
async fn test_orders_lifecycle() {
    let f = fixture().await;
    let key = f.store.insert(orders()).key();

    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Synced);
    let stored = f.stored(&key);
    assert!(stored.status.ready);
    assert!(stored.has_finalizer());
    assert_eq!(stored.status.observed_generation, Some(1));
    assert_eq!(f.filters(&stored), vec!["order.created.v1".to_string()]);

    f.store
        .update_spec(&key, |spec| spec.types.push("order.updated.v1".into()))
        .unwrap();
    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Synced);
    let stored = f.stored(&key);
    assert_eq!(stored.status.observed_generation, Some(2));
    assert_eq!(f.broker.consumers(STREAM).len(), 1);
    assert_eq!(
        f.filters(&stored),
        vec!["order.created.v1".to_string(), "order.updated.v1".to_string()]
    );

    f.store.mark_deleted(&key).unwrap();
    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Deleted);
    assert!(f.broker.consumers(STREAM).is_empty());
    assert!(!f.store.contains(&key));

    // Duplicate notification after deletion.
    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::NotFound);
}

#[tokio::test]
async fn test_unchanged_subscription_writes_status_once() {
    let f = fixture().await;
    let key = f.store.insert(orders()).key();

    f.reconciler.reconcile(&key).await;
    let writes = f.store.status_write_count();
    assert_eq!(writes, 1);

    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Synced);
    assert_eq!(f.store.status_write_count(), writes);
}

#[tokio::test]
async fn test_duplicate_raw_types_are_collapsed() {
    let f = fixture().await;
    let sub = Subscription::new(
        "shop",
        "dupes",
        SINK,
        ["order.created.v1", "order.created.v1", "order.paid.v1"],
    );
    let key = f.store.insert(sub).key();

    f.reconciler.reconcile(&key).await;
    let stored = f.stored(&key);
    let originals: Vec<&str> = stored
        .status
        .types
        .iter()
        .map(|t| t.original_type.as_str())
        .collect();
    assert_eq!(originals, vec!["order.created.v1", "order.paid.v1"]);
    assert_eq!(f.filters(&stored).len(), 2);
}

#[tokio::test]
async fn test_uncleanable_type_is_terminal() {
    let f = fixture().await;
    let key = f
        .store
        .insert(Subscription::new("shop", "broken", SINK, ["..."]))
        .key();

    let outcome = f.reconciler.reconcile(&key).await;
    assert!(matches!(outcome, ReconcileOutcome::Terminal { .. }));

    let stored = f.stored(&key);
    assert!(!stored.status.ready);
    let ready = stored.status.condition(ConditionType::Ready).unwrap();
    assert_eq!(ready.reason, reasons::CONVERSION_FAILED);
    assert!(f.broker.consumers(STREAM).is_empty());
}

#[tokio::test]
async fn test_exact_type_over_subject_limit_is_terminal() {
    let f = fixture().await;
    let sub = Subscription::new("shop", "exact", SINK, ["a".repeat(300)])
        .with_type_matching(TypeMatching::Exact);
    let key = f.store.insert(sub).key();

    let outcome = f.reconciler.reconcile(&key).await;
    match outcome {
        ReconcileOutcome::Terminal { reason } => assert!(reason.contains("maximum length")),
        other => panic!("expected terminal outcome, got {other:?}"),
    }
    assert!(f.broker.consumers(STREAM).is_empty());
}

#[tokio::test]
async fn test_exact_type_is_used_verbatim() {
    let f = fixture().await;
    let sub = Subscription::new("shop", "exact", SINK, ["Order.Created.V1"])
        .with_type_matching(TypeMatching::Exact);
    let key = f.store.insert(sub).key();

    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Synced);
    assert_eq!(f.filters(&f.stored(&key)), vec!["Order.Created.V1".to_string()]);
}

#[tokio::test]
async fn test_foreign_namespace_sink_is_rejected_before_backend() {
    let f = fixture().await;
    let sub = Subscription::new(
        "shop",
        "elsewhere",
        "http://orders.billing.svc.cluster.local",
        ["order.created.v1"],
    );
    let key = f.store.insert(sub).key();

    let outcome = f.reconciler.reconcile(&key).await;
    assert!(matches!(outcome, ReconcileOutcome::Terminal { .. }));

    let stored = f.stored(&key);
    assert!(!stored.status.condition(ConditionType::SinkValid).unwrap().is_true());
    assert_eq!(
        stored.status.condition(ConditionType::Ready).unwrap().reason,
        reasons::SINK_INVALID
    );
    assert!(f.broker.consumers(STREAM).is_empty());
}

#[tokio::test]
async fn test_backend_failure_requeues_and_recovers() {
    let f = fixture().await;
    let key = f.store.insert(orders()).key();

    f.broker.fail_consumer_writes(true);
    let outcome = f.reconciler.reconcile(&key).await;
    assert!(outcome.is_requeue());
    if let ReconcileOutcome::Requeue { after, .. } = outcome {
        assert_eq!(after, Duration::from_secs(5));
    }
    let stored = f.stored(&key);
    assert!(!stored.status.ready);
    assert_eq!(
        stored.status.condition(ConditionType::Ready).unwrap().reason,
        reasons::SYNC_FAILED
    );
    assert!(stored.status.ready_message().is_some());

    f.broker.fail_consumer_writes(false);
    assert_eq!(f.reconciler.reconcile(&key).await, ReconcileOutcome::Synced);
    let stored = f.stored(&key);
    assert!(stored.status.ready);
    assert!(stored.status.ready_message().is_none());
}

#[tokio::test]
async fn test_ready_transition_is_recorded_once() {
    let f = fixture().await;
    let mut events = f.events.subscribe();
    let key = f.store.insert(orders()).key();

    f.reconciler.reconcile(&key).await;
    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Normal);
    assert_eq!(event.reason, reasons::SYNCED);
    assert_eq!(event.key, key);

    f.reconciler.reconcile(&key).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_teardown_keeps_finalizer() {
    let f = fixture().await;
    let key = f.store.insert(orders()).key();
    f.reconciler.reconcile(&key).await;

    let consumer = f.backend.consumer_name(&f.stored(&key));
    f.broker.fail_deletes_for(consumer);
    f.store.mark_deleted(&key).unwrap();

    let outcome = f.reconciler.reconcile(&key).await;
    assert!(outcome.is_requeue());

    let stored = f.stored(&key);
    assert!(stored.has_finalizer());
    assert!(stored.is_being_deleted());
    assert_eq!(
        stored.status.condition(ConditionType::Ready).unwrap().reason,
        reasons::DELETE_FAILED
    );
}

#[tokio::test]
async fn test_missing_subscription_is_not_found() {
    let f = fixture().await;
    let outcome = f
        .reconciler
        .reconcile(&ResourceKey::new("shop", "ghost"))
        .await;
    assert_eq!(outcome, ReconcileOutcome::NotFound);
}

#[tokio::test]
async fn test_status_write_failure_is_requeued() {
    let f = fixture().await;
    let key = f.store.insert(orders()).key();
    f.store.fail_status_updates_for(key.clone());

    let outcome = f.reconciler.reconcile(&key).await;
    assert!(outcome.is_requeue());
    assert!(!f.stored(&key).status.ready);
}
