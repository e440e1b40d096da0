pub mod bus;
pub mod config;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod frontier;
pub mod metrics;
pub mod registry;
pub mod request;
pub mod statistics;
pub mod timer;

pub use bus::{InProcessBus, MessageBus, MessageHandler};
pub use crawler::{CrawlerEngine, CrawlerState, EngineSettings};
pub use downloader::{Download, Downloader, HttpDownloader};
pub use error::{Error, Result};
pub use frontier::{Completion, Frontier, FrontierOptions, Outcome};
pub use metrics::collector::MetricsCollector;
pub use metrics::snapshot::MetricsSnapshot;
pub use registry::{RegistryOptions, RequestRegistry};
pub use request::Request;
pub use statistics::{StatisticsClient, StatisticsService, StatisticsStore};
pub use timer::{HashedWheelTimer, TimeoutHandle};
