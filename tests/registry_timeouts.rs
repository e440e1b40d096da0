use crawl_coordinator::registry::{RegistryOptions, RequestRegistry};
use crawl_coordinator::request::Request;
use std::time::{Duration, Instant};

fn registry() -> RequestRegistry {
    RequestRegistry::new(RegistryOptions {
        tick: Duration::from_millis(20),
        wheel_size: 128,
        ..RegistryOptions::default()
    })
}

fn request(fingerprint: &str) -> Request {
    Request::builder("job", format!("https://example.com/{}", fingerprint))
        .fingerprint(fingerprint)
        .timeout_ms(2000)
        .build()
        .unwrap()
}

#[tokio::test]
async fn forgotten_request_is_drained_after_its_timeout() {
    let registry = registry();
    let registered = Instant::now();
    assert!(registry.register(request("u1")).unwrap());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(registry.drain_timed_out().is_empty());

    let mut drained = Vec::new();
    while drained.is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
        drained = registry.drain_timed_out();
    }
    assert!(registered.elapsed() >= Duration::from_millis(2000));
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].fingerprint, "u1");
    assert_eq!(registry.size(), 0);
    assert!(registry.complete("u1").is_none());
}

#[tokio::test]
async fn completed_request_never_times_out() {
    let registry = registry();
    registry.register(request("u1")).unwrap();

    let completed = registry.complete("u1").unwrap();
    assert_eq!(completed.fingerprint, "u1");

    tokio::time::sleep(Duration::from_millis(2300)).await;
    assert!(registry.drain_timed_out().is_empty());
    assert_eq!(registry.size(), 0);
}

#[tokio::test]
async fn shutdown_rejects_new_registrations() {
    let registry = registry();
    registry.register(request("a")).unwrap();
    registry.shutdown();
    registry.shutdown();

    assert!(registry.is_shut_down());
    assert!(registry.register(request("b")).is_err());
}
