use crawl_coordinator::bus::InProcessBus;
use crawl_coordinator::config::ConfigLoader;
use crawl_coordinator::crawler::{CrawlerEngine, CrawlerState, EngineSettings};
use crawl_coordinator::downloader::HttpDownloader;
use crawl_coordinator::frontier::Frontier;
use crawl_coordinator::registry::RequestRegistry;
use crawl_coordinator::statistics::{StatisticsClient, StatisticsService};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn crawls_a_config_against_a_live_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("crawl.yaml");
    std::fs::write(
        &config_path,
        format!(
            "name: live\nowner: live-job\nstart_urls:\n  - {uri}/ok\n  - {uri}/broken\n  - {uri}/ok\nrequest_timeout_ms: 2000\nregistry:\n  tick_ms: 10\nfrontier:\n  retry_limit: 1\n  reclaim_interval_ms: 20\nagent:\n  id: agent-live\n  print_interval_ms: 0\n",
            uri = server.uri()
        ),
    )
    .unwrap();

    let config = ConfigLoader::load(&config_path).unwrap();
    let bus = Arc::new(InProcessBus::new(config.bus.max_redeliveries));
    let store = ConfigLoader::create_store(&config).await.unwrap();
    let service = StatisticsService::start(bus.as_ref(), store.clone()).await.unwrap();
    let statistics = StatisticsClient::new(bus.clone());
    let registry = Arc::new(RequestRegistry::new(config.registry.options()));
    let frontier = Arc::new(Frontier::new(
        config.frontier.options(),
        registry.clone(),
        statistics.clone(),
    ));
    let downloader = Arc::new(
        HttpDownloader::new(&config.user_agent, Duration::from_millis(config.request_timeout_ms))
            .unwrap(),
    );

    let settings = EngineSettings::from_config(&config);
    assert_eq!(settings.owner, "live-job");
    assert!(settings.print_interval.is_none());
    let seeds = ConfigLoader::seed_requests(&config, &settings.owner).unwrap();
    let engine = CrawlerEngine::new(settings, frontier, downloader, statistics, None);

    let snapshot = engine.run(seeds).await.unwrap();
    service.stop().await;

    assert_eq!(engine.state().await, CrawlerState::Stopped);
    assert_eq!(snapshot.requests_queued, 2);
    assert_eq!(snapshot.requests_succeeded, 1);
    assert_eq!(snapshot.requests_failed, 2);
    assert_eq!(snapshot.requests_abandoned, 1);
    assert!(registry.is_shut_down());

    let stats = store.crawl("live-job").await.unwrap().unwrap();
    assert_eq!((stats.total, stats.success, stats.failure), (2, 1, 1));
    assert_eq!(stats.left(), 0);
    assert!(stats.exited_at.is_some());

    let agent = store.agent("agent-live").await.unwrap().unwrap();
    assert_eq!((agent.success, agent.failure), (1, 2));
    assert_eq!(agent.agent_name.as_deref(), Some("live-agent"));
}
