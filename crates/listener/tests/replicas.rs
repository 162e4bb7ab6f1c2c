//! Two replicas behind one load balancer, sharing a lease and a NodePool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autoshift::{
    ClusterApi, ExclusionPolicy, InMemoryLeaseBackend, LeaderCheck, LeaseIdentity, LeaseTiming,
    LeadershipGate, MutationError, ResourceName, ZoneExclusionMutator,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use listener::{build_router, HttpConfirmer, WebhookState};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[derive(Default)]
struct SharedNodePool {
    policy: Mutex<ExclusionPolicy>,
    writes: AtomicUsize,
}

#[async_trait]
impl ClusterApi for SharedNodePool {
    async fn fetch_policy(&self, _: &ResourceName) -> Result<ExclusionPolicy, MutationError> {
        Ok(self.policy.lock().unwrap().clone())
    }

    async fn update_policy(
        &self,
        _: &ResourceName,
        policy: &ExclusionPolicy,
    ) -> Result<(), MutationError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.policy.lock().unwrap() = policy.clone();
        Ok(())
    }
}

struct Replica {
    gate: Arc<LeadershipGate>,
    router: Router,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn replica(name: &str, leases: &Arc<InMemoryLeaseBackend>, pool: &Arc<SharedNodePool>) -> Replica {
    let timing = LeaseTiming::new(
        Duration::from_millis(1000),
        Duration::from_millis(500),
        Duration::from_millis(100),
    )
    .unwrap();
    let gate = Arc::new(LeadershipGate::new(
        LeaseIdentity::new(name).unwrap(),
        timing,
        leases.clone(),
    ));
    let state = WebhookState {
        confirmer: Arc::new(HttpConfirmer::new(Duration::from_secs(5)).unwrap()),
        leadership: gate.state(),
        mutator: Arc::new(ZoneExclusionMutator::new(pool.clone())),
        target: ResourceName::new("default").unwrap(),
    };
    let cancel = CancellationToken::new();
    let task = {
        let gate = Arc::clone(&gate);
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.start(cancel).await })
    };
    Replica {
        gate,
        router: build_router(state),
        cancel,
        task,
    }
}

async fn wait_for_leader(replicas: &[&Replica]) -> usize {
    for _ in 0..50 {
        if let Some(i) = replicas.iter().position(|r| r.gate.state().is_leader()) {
            return i;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no replica became leader");
}

fn notification(zone: &str) -> String {
    let event = json!({
        "version": "0",
        "id": format!("evt-{zone}"),
        "detail-type": "Autoshift In Progress",
        "source": "aws.arc-zonal-shift",
        "account": "123456789012",
        "time": "2024-11-08T12:00:00Z",
        "region": "us-east-1",
        "detail": { "version": "1", "metadata": { "awayFrom": zone } }
    });
    json!({ "Type": "Notification", "MessageId": format!("m-{zone}"), "Message": event.to_string() })
        .to_string()
}

async fn post(router: &Router, body: String) -> StatusCode {
    router
        .clone()
        .oneshot(Request::post("/webhook").body(Body::from(body)).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn only_the_leader_mutates_and_a_successor_takes_over() {
    let leases = Arc::new(InMemoryLeaseBackend::new());
    let pool = Arc::new(SharedNodePool::default());
    let a = replica("pod-a", &leases, &pool);
    let b = replica("pod-b", &leases, &pool);

    let leader = wait_for_leader(&[&a, &b]).await;
    let (leader, follower) = if leader == 0 { (a, b) } else { (b, a) };

    // Fan-out: both replicas receive the same delivery.
    assert_eq!(post(&follower.router, notification("use1-az1")).await, StatusCode::OK);
    assert_eq!(post(&leader.router, notification("use1-az1")).await, StatusCode::OK);
    assert_eq!(pool.writes.load(Ordering::SeqCst), 1);

    leader.cancel.cancel();
    leader.task.await.unwrap();
    wait_for_leader(&[&follower]).await;

    assert_eq!(post(&follower.router, notification("use1-az2")).await, StatusCode::OK);
    assert_eq!(pool.writes.load(Ordering::SeqCst), 2);

    let zones: Vec<String> = pool
        .policy
        .lock()
        .unwrap()
        .excluded_zones()
        .map(str::to_string)
        .collect();
    assert_eq!(zones, ["use1-az1", "use1-az2"]);

    follower.cancel.cancel();
    follower.task.await.unwrap();
}

#[tokio::test]
async fn subscription_is_confirmed_by_every_replica() {
    let hits = Arc::new(AtomicUsize::new(0));
    let stub = {
        let hits = Arc::clone(&hits);
        Router::new().route(
            "/confirm",
            get(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "<ConfirmSubscriptionResponse/>"
                }
            }),
        )
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, stub).await.unwrap() });

    let leases = Arc::new(InMemoryLeaseBackend::new());
    let pool = Arc::new(SharedNodePool::default());
    let replicas = [replica("pod-a", &leases, &pool), replica("pod-b", &leases, &pool)];
    let body = json!({
        "Type": "SubscriptionConfirmation",
        "SubscribeURL": format!("http://{addr}/confirm")
    })
    .to_string();

    for r in &replicas {
        assert_eq!(post(&r.router, body.clone()).await, StatusCode::OK);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(pool.writes.load(Ordering::SeqCst), 0);

    for r in replicas {
        r.cancel.cancel();
        r.task.await.unwrap();
    }
}
