pub mod client;
pub mod event;
pub mod export;
pub mod service;
pub mod store;

pub use client::StatisticsClient;
pub use event::{StatisticsEvent, StatisticsMessage};
pub use export::CsvExporter;
pub use service::{StatisticsAggregator, StatisticsService};
pub use store::{
    AgentStatistics, CrawlStatistics, CrawlStatus, MemoryStatisticsStore, SqliteStatisticsStore,
    StatisticsStore,
};
