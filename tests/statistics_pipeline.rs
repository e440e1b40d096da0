use crawl_coordinator::bus::{InProcessBus, MessageBus};
use crawl_coordinator::statistics::{
    CrawlStatus, CsvExporter, MemoryStatisticsStore, SqliteStatisticsStore, StatisticsClient,
    StatisticsService, StatisticsStore,
};
use std::sync::Arc;

async fn publish_job1(client: &StatisticsClient) {
    client.start("job1", "first job").await.unwrap();
    client.increase_total("job1", 10).await.unwrap();
    for _ in 0..3 {
        client.increase_success("job1").await.unwrap();
    }
    for _ in 0..2 {
        client.increase_failure("job1").await.unwrap();
    }
}

#[tokio::test]
async fn counters_reach_the_memory_store() {
    let bus = Arc::new(InProcessBus::default());
    let store: Arc<dyn StatisticsStore> = Arc::new(MemoryStatisticsStore::new());
    let service = StatisticsService::start(bus.as_ref(), store.clone()).await.unwrap();
    let client = StatisticsClient::new(bus.clone());

    publish_job1(&client).await;
    service.stop().await;

    let stats = store.crawl("job1").await.unwrap().unwrap();
    assert_eq!((stats.total, stats.success, stats.failure), (10, 3, 2));
    assert_eq!(stats.left(), 5);
    assert_eq!(stats.status(), CrawlStatus::Running);
}

#[tokio::test]
async fn counters_survive_in_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("stats.db");

    {
        let bus = Arc::new(InProcessBus::default());
        let store: Arc<dyn StatisticsStore> =
            Arc::new(SqliteStatisticsStore::connect(&db).await.unwrap());
        let service = StatisticsService::start(bus.as_ref(), store.clone()).await.unwrap();
        let client = StatisticsClient::new(bus.clone());

        publish_job1(&client).await;
        client.exit("job1").await.unwrap();
        service.stop().await;
    }

    let reopened = SqliteStatisticsStore::connect(&db).await.unwrap();
    let stats = reopened.crawl("job1").await.unwrap().unwrap();
    assert_eq!(stats.left(), 5);
    assert_eq!(stats.status(), CrawlStatus::Exited);
    assert_eq!(stats.name.as_deref(), Some("first job"));

    let csv_path = dir.path().join("stats.csv");
    let mut exporter = CsvExporter::create(&csv_path).unwrap();
    for stats in reopened.crawls(0, 10).await.unwrap() {
        exporter.write(&stats).unwrap();
    }
    exporter.finish().unwrap();
    reopened.close().await;

    let csv = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("owner,name,status,total"));
    assert!(lines.next().unwrap().starts_with("job1,first job,exited,10,3,2,5,"));
}

#[tokio::test]
async fn malformed_messages_do_not_stop_the_service() {
    let bus = Arc::new(InProcessBus::new(0));
    let store: Arc<dyn StatisticsStore> = Arc::new(MemoryStatisticsStore::new());
    let service = StatisticsService::start(bus.as_ref(), store.clone()).await.unwrap();
    let mut failures = bus.failures();
    let client = StatisticsClient::new(bus.clone());

    bus.publish("Statistics", b"not json".to_vec()).await.unwrap();
    client.increase_total("job2", 1).await.unwrap();
    service.stop().await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.topic, "Statistics");
    assert_eq!(store.crawl("job2").await.unwrap().unwrap().total, 1);
}
