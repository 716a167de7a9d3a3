//! Capture server over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use capture_relay::broker_memory::MemoryBroker;
use capture_relay::config::CaptureConfig;
use capture_relay::ingest::IngestService;
use capture_relay::link::LinkState;
use capture_relay::metrics::RelayMetrics;
use capture_relay::queue::{QueueClient, QueueSettings};
use capture_relay::server::router;

const LIST: &str = "keys";

async fn start(broker: &MemoryBroker, capture: CaptureConfig) -> (SocketAddr, Arc<IngestService>) {
    let metrics = Arc::new(RelayMetrics::new());
    let queue = QueueClient::connect(
        Arc::new(broker.clone()),
        QueueSettings {
            list_key: LIST.into(),
            reconnect_wait: Duration::from_millis(10),
            heartbeat: Duration::from_millis(10),
        },
        metrics.clone(),
    )
    .await;
    let service = Arc::new(IngestService::new(queue, &capture, metrics));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(service.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, service)
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn assert_capture_response(resp: &reqwest::Response) {
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_post_is_queued() {
    let broker = MemoryBroker::new();
    let (addr, _svc) = start(&broker, CaptureConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/capture", addr))
        .body("user=alice&path=%2Fhome&button=buy+now")
        .send()
        .await
        .unwrap();
    assert_capture_response(&resp);

    wait_until(|| broker.entry_keys().len() == 1).await;
    let key = &broker.list(LIST)[0];
    assert!(key.starts_with("/home:alice:"));
    let entry = broker.entry(key).unwrap();
    assert!(entry.contains(&("button".to_string(), "buy+now".to_string())));
}

#[tokio::test]
async fn test_every_method_and_path_gets_200() {
    let broker = MemoryBroker::new();
    let (addr, _svc) = start(&broker, CaptureConfig::default()).await;
    let client = reqwest::Client::new();

    for method in [
        reqwest::Method::GET,
        reqwest::Method::POST,
        reqwest::Method::PUT,
        reqwest::Method::DELETE,
        reqwest::Method::OPTIONS,
    ] {
        let resp = client
            .request(method.clone(), format!("http://{}/any/where?x=1", addr))
            .send()
            .await
            .unwrap();
        assert_capture_response(&resp);
        assert!(resp.bytes().await.unwrap().is_empty(), "{} had a body", method);
    }
}

#[tokio::test]
async fn test_malformed_body_still_200() {
    let broker = MemoryBroker::new();
    let (addr, svc) = start(&broker, CaptureConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .body("no-equals-sign")
        .send()
        .await
        .unwrap();
    assert_capture_response(&resp);

    wait_until(|| svc.metrics().snapshot().events_malformed == 1).await;
    assert!(broker.entry_keys().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_truncated_not_rejected() {
    let broker = MemoryBroker::new();
    let capture = CaptureConfig {
        max_data_size: 16,
        ..CaptureConfig::default()
    };
    let (addr, _svc) = start(&broker, capture).await;

    let body = format!("a={}", "x".repeat(10_000));
    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_capture_response(&resp);

    wait_until(|| broker.entry_keys().len() == 1).await;
    let key = broker.entry_keys().remove(0);
    let entry = broker.entry(&key).unwrap();
    assert_eq!(entry[0], ("a".to_string(), "x".repeat(13)));
}

#[tokio::test]
async fn test_events_during_outage_are_lost() {
    let broker = MemoryBroker::new();
    let (addr, svc) = start(&broker, CaptureConfig::default()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/", addr);

    broker.set_online(false);
    let mut state = svc.queue().subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == LinkState::Reconnecting),
    )
    .await
    .unwrap()
    .unwrap();

    let resp = client.post(&url).body("user=lost&a=1").send().await.unwrap();
    assert_capture_response(&resp);
    wait_until(|| svc.metrics().snapshot().writes_dropped >= 2).await;

    broker.set_online(true);
    tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    let resp = client.post(&url).body("user=kept&a=2").send().await.unwrap();
    assert_capture_response(&resp);
    wait_until(|| broker.entry_keys().len() == 1).await;

    let keys = broker.list(LIST);
    assert_eq!(keys.len(), 1);
    assert!(keys[0].contains(":kept:"));
}
