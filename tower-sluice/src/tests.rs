use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{ready, Ready};
use sluice::{DegradeGrade, DegradeRule, FlowGrade, FlowRule, Node, Sluice};
use tower::{BoxError, Layer, Service, ServiceExt};

use super::*;

#[derive(Clone)]
struct MockService {
    count: Arc<AtomicUsize>,
    fail: bool,
}

impl MockService {
    fn ok(count: Arc<AtomicUsize>) -> Self {
        Self { count, fail: false }
    }

    fn failing(count: Arc<AtomicUsize>) -> Self {
        Self { count, fail: true }
    }
}

impl Service<()> for MockService {
    type Response = ();
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: ()) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            ready(Err(BoxError::from("backend down")))
        } else {
            ready(Ok(()))
        }
    }
}

fn governed(resource: &str, count: f64) -> Sluice {
    let sluice = Sluice::new();
    sluice
        .load_flow_rules(vec![FlowRule {
            resource: resource.into(),
            grade: FlowGrade::Qps,
            count,
            ..FlowRule::default()
        }])
        .unwrap();
    sluice
}

#[tokio::test]
async fn admitted_requests_reach_the_inner_service() {
    let sluice = governed("api", 100.0);
    let hits = Arc::new(AtomicUsize::new(0));

    let mut service = GateLayer::new(sluice, "api").layer(MockService::ok(hits.clone()));
    service.ready().await.unwrap().call(()).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejections_never_reach_the_inner_service() {
    let sluice = governed("tight", 1.0);
    let hits = Arc::new(AtomicUsize::new(0));

    let mut service =
        GateLayer::new(sluice, "tight").layer(MockService::ok(hits.clone()));

    service.ready().await.unwrap().call(()).await.unwrap();
    let err = service
        .ready()
        .await
        .unwrap()
        .call(())
        .await
        .expect_err("second call exceeds the limit");

    let gate = err.downcast_ref::<GateError>().expect("typed gate error");
    assert!(matches!(gate, GateError::Blocked(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1, "inner saw only the admitted call");
}

#[tokio::test]
async fn clones_share_the_runtime_budget() {
    let sluice = governed("shared", 1.0);
    let hits = Arc::new(AtomicUsize::new(0));
    let layer = GateLayer::new(sluice, "shared");

    let mut svc1 = layer.layer(MockService::ok(hits.clone()));
    let mut svc2 = layer.layer(MockService::ok(hits.clone()));

    svc1.ready().await.unwrap().call(()).await.unwrap();
    assert!(svc2.ready().await.unwrap().call(()).await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn inner_errors_feed_the_circuit_breaker() {
    let sluice = Sluice::new();
    sluice
        .load_degrade_rules(vec![DegradeRule {
            resource: "flaky".into(),
            grade: DegradeGrade::ExceptionCount,
            count: 3.0,
            time_window_sec: 1,
        }])
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let mut service =
        GateLayer::new(sluice.clone(), "flaky").layer(MockService::failing(hits.clone()));

    for _ in 0..3 {
        let _ = service.ready().await.unwrap().call(()).await;
    }

    // Three recorded exceptions reach the threshold; the breaker now rejects
    // before the inner service is consulted.
    let err = service.ready().await.unwrap().call(()).await.expect_err("circuit open");
    assert!(err.downcast_ref::<GateError>().is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let cluster = sluice.cluster_node("flaky").unwrap();
    assert_eq!(cluster.total_exception(), 3);
}

#[tokio::test]
async fn completion_releases_concurrency() {
    let sluice = Sluice::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let mut service =
        GateLayer::new(sluice.clone(), "conc").layer(MockService::ok(hits.clone()));

    service.ready().await.unwrap().call(()).await.unwrap();

    let cluster = sluice.cluster_node("conc").unwrap();
    assert_eq!(cluster.cur_thread_num(), 0);
    assert_eq!(cluster.total_pass(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn entries_survive_thread_hops() {
    let sluice = governed("hop", 1_000.0);
    let hits = Arc::new(AtomicUsize::new(0));
    let layer = GateLayer::new(sluice.clone(), "hop");

    let mut handles = vec![];
    for _ in 0..16 {
        let mut service = layer.layer(MockService::ok(hits.clone()));
        handles.push(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            service.ready().await.unwrap().call(()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let cluster = sluice.cluster_node("hop").unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 16);
    assert_eq!(cluster.cur_thread_num(), 0, "every entry exited cleanly");
    assert_eq!(cluster.total_pass(), 16);
}
