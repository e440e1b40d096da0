pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AgentConfig, BusConfig, CrawlConfig, FrontierConfig, RegistryConfig, StatisticsConfig,
};
