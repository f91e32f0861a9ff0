//! End-to-end discovery passes against the in-memory store and wiremock
//! health endpoints.
//!
//! Run with: cargo test -p nerve-discovery --test discovery

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nerve_core::{Config, ServiceFailurePolicy};
use nerve_discovery::{
    CoordinationStore, Endpoint, Error, MemoryStore, NerveDiscovery, NodeStat, SessionObserver,
    StoreEvent, StoreSession,
};

const ROOT: &str = "/nerve/services";

fn config(health: bool) -> Config {
    let mut config = Config::default();
    config.zookeeper.hosts = "memory".to_string();
    config.health.enabled = health;
    config
}

fn register(store: &MemoryStore, service: &str, node: &str, host: &str, port: u16) {
    store.put(
        &format!("{ROOT}/{service}/services/{node}"),
        format!(r#"{{"host":"{host}","port":{port},"name":"{node}"}}"#),
    );
}

fn register_server(store: &MemoryStore, service: &str, node: &str, server: &MockServer) {
    let addr = server.address();
    register(store, service, node, &addr.ip().to_string(), addr.port());
}

async fn health_server(status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    server
}

async fn slow_health_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"hystrix":true}"#)
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

fn discovery(store: &MemoryStore, config: &Config) -> NerveDiscovery {
    NerveDiscovery::new(Arc::new(store.clone()), config).unwrap()
}

#[tokio::test]
async fn test_single_instance_without_health_check() {
    let store = MemoryStore::new();
    store.put(
        "/nerve/services/checkout-svc/services/node0",
        r#"{"host":"10.0.0.5","port":8080}"#,
    );

    let endpoints = discovery(&store, &config(false)).discover().await.unwrap();

    assert_eq!(
        endpoints,
        vec![Endpoint {
            address: "10.0.0.5:8080".to_string(),
            cluster: "Default".to_string(),
            live: true,
        }]
    );
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_instance_without_monitoring_support_is_excluded() {
    let server = health_server(200, r#"{"hystrix": false}"#).await;
    let store = MemoryStore::new();
    register_server(&store, "checkout-svc", "node0", &server);

    let endpoints = discovery(&store, &config(true)).discover().await.unwrap();

    assert!(endpoints.is_empty());
}

#[tokio::test]
async fn test_every_instance_of_every_service_is_found() {
    let mut servers = Vec::new();
    let store = MemoryStore::new();
    for service in ["checkout", "billing"] {
        for node in 0..3 {
            let server = health_server(200, r#"{"hystrix":true,"status":"UP"}"#).await;
            register_server(&store, service, &format!("node{node}"), &server);
            servers.push(server);
        }
    }

    let mut config = config(true);
    config.discovery.cluster_name = "payments".to_string();
    let endpoints = discovery(&store, &config).discover().await.unwrap();

    assert_eq!(endpoints.len(), 6);
    assert!(endpoints.iter().all(|e| e.cluster == "payments" && e.live));
}

#[tokio::test]
async fn test_malformed_node_removes_exactly_one_endpoint() {
    let store = MemoryStore::new();
    for node in 0..3u16 {
        register(&store, "a", &format!("n{node}"), "10.0.1.1", 9000 + node);
        register(&store, "b", &format!("n{node}"), "10.0.2.2", 9000 + node);
    }
    store.put(&format!("{ROOT}/a/services/n1"), r#"{"host":"10.0.1.1"}"#);

    let endpoints = discovery(&store, &config(false)).discover().await.unwrap();
    assert_eq!(endpoints.len(), 5);
    assert!(!endpoints.iter().any(|e| e.address == "10.0.1.1:9001"));
}

#[tokio::test]
async fn test_probe_outcomes_decide_membership() {
    let supported = health_server(200, r#"{"hystrix":true}"#).await;
    let unavailable = health_server(503, r#"{"hystrix":true}"#).await;
    let unsupported = health_server(200, r#"{"hystrix":false}"#).await;
    let garbled = health_server(200, "<html>ok</html>").await;

    let store = MemoryStore::new();
    register_server(&store, "svc", "supported", &supported);
    register_server(&store, "svc", "unavailable", &unavailable);
    register_server(&store, "svc", "unsupported", &unsupported);
    register_server(&store, "other", "garbled", &garbled);

    let endpoints = discovery(&store, &config(true)).discover().await.unwrap();

    let expected = format!("127.0.0.1:{}", supported.address().port());
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].address, expected);
}

#[tokio::test]
async fn test_unreachable_store_fails_pass() {
    let store = MemoryStore::new();
    register(&store, "a", "n0", "10.0.0.1", 80);
    store.set_unreachable(true);

    let result = discovery(&store, &config(false)).discover().await;

    assert!(matches!(result, Err(Error::Session(_))));
}

#[tokio::test]
async fn test_missing_root_fails_pass() {
    let store = MemoryStore::new();
    store.put("/elsewhere/a/services/n0", r#"{"host":"10.0.0.1","port":80}"#);

    let result = discovery(&store, &config(false)).discover().await;

    assert!(matches!(result, Err(Error::Listing { .. })));
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_service_failure_policy_is_configurable() {
    let store = MemoryStore::new();
    register(&store, "a", "n0", "10.0.0.1", 80);
    register(&store, "b", "n0", "10.0.0.2", 80);
    store.fail_listing(&format!("{ROOT}/b/services"));

    let result = discovery(&store, &config(false)).discover().await;
    assert!(matches!(result, Err(Error::Listing { .. })));

    let mut lenient = config(false);
    lenient.discovery.service_failure_policy = ServiceFailurePolicy::SkipService;
    let endpoints = discovery(&store, &lenient).discover().await.unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].address, "10.0.0.1:80");
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_repeated_passes_are_idempotent() {
    let good = health_server(200, r#"{"hystrix":true}"#).await;
    let bad = health_server(500, "").await;
    let store = MemoryStore::new();
    register_server(&store, "a", "good", &good);
    register_server(&store, "a", "bad", &bad);
    register(&store, "b", "broken", "10.0.0.1", 0);

    let discovery = discovery(&store, &config(true));
    let first: HashSet<Endpoint> = discovery.discover().await.unwrap().into_iter().collect();
    let second: HashSet<Endpoint> = discovery.discover().await.unwrap().into_iter().collect();

    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(store.sessions_opened(), 2);
    assert_eq!(store.sessions_closed(), 2);
}

#[tokio::test]
async fn test_concurrent_passes_are_independent() {
    let store = MemoryStore::new();
    for node in 0..5u16 {
        register(&store, "a", &format!("n{node}"), "10.0.0.1", 8000 + node);
    }
    let discovery = discovery(&store, &config(false));

    let (first, second) = tokio::join!(discovery.discover(), discovery.discover());

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(store.sessions_opened(), 2);
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_cancellation_abandons_in_flight_probes() {
    let slow = slow_health_server(Duration::from_secs(5)).await;
    let store = MemoryStore::new();
    register_server(&store, "a", "slow", &slow);

    let mut config = config(true);
    config.health.read_timeout_ms = 10_000;
    let discovery = discovery(&store, &config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = discovery.discover_until(&cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.open_sessions(), 0);
}

#[tokio::test]
async fn test_deadline_bounds_the_pass() {
    let slow = slow_health_server(Duration::from_secs(5)).await;
    let store = MemoryStore::new();
    register_server(&store, "a", "slow", &slow);

    let mut config = config(true);
    config.health.read_timeout_ms = 10_000;
    config.discovery.deadline_ms = Some(200);

    let result = discovery(&store, &config).discover().await;

    assert!(matches!(result, Err(Error::Timeout(_))));
}

/// Store whose listings take a while, to interrupt a pass mid-walk
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

struct SlowSession {
    inner: Box<dyn StoreSession>,
    delay: Duration,
}

#[async_trait]
impl CoordinationStore for SlowStore {
    async fn connect(&self) -> nerve_discovery::Result<Box<dyn StoreSession>> {
        Ok(Box::new(SlowSession {
            inner: self.inner.connect().await?,
            delay: self.delay,
        }))
    }
}

#[async_trait]
impl StoreSession for SlowSession {
    async fn list_children(&self, path: &str) -> nerve_discovery::Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_children(path).await
    }

    async fn exists(&self, path: &str) -> nerve_discovery::Result<Option<NodeStat>> {
        self.inner.exists(path).await
    }

    async fn get_data(&self, path: &str) -> nerve_discovery::Result<(Vec<u8>, NodeStat)> {
        self.inner.get_data(path).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_cancellation_mid_walk_closes_session() {
    let store = MemoryStore::new();
    register(&store, "a", "n0", "10.0.0.1", 80);
    let slow = SlowStore {
        inner: store.clone(),
        delay: Duration::from_secs(5),
    };
    let discovery = NerveDiscovery::new(Arc::new(slow), &config(false)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = discovery.discover_until(&cancel).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(store.sessions_opened(), 1);
    assert_eq!(store.open_sessions(), 0);
}

#[derive(Default)]
struct CountingObserver(AtomicUsize);

impl SessionObserver for CountingObserver {
    fn on_event(&self, _event: &StoreEvent) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_changes_after_pass_are_not_observed() {
    let observer = Arc::new(CountingObserver::default());
    let store = MemoryStore::with_observer(observer.clone());
    register(&store, "a", "n0", "10.0.0.1", 80);

    let endpoints = discovery(&store, &config(false)).discover().await.unwrap();
    assert_eq!(endpoints.len(), 1);

    // the pass registered watches on n0; the session is gone by now
    register(&store, "a", "n0", "10.0.0.9", 80);
    store.remove(&format!("{ROOT}/a/services/n0"));

    assert_eq!(observer.0.load(Ordering::SeqCst), 0);
}
