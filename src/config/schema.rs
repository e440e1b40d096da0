use crate::frontier::{DedupPolicy, FrontierOptions, FrontierOrder};
use crate::registry::RegistryOptions;
use crate::request::{DEFAULT_TIMEOUT_MS, MIN_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CrawlConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    /// Crawl identifier used to partition statistics; generated when absent.
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub start_urls: Vec<String>,

    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1))]
    pub concurrency: usize,

    #[serde(default = "default_delay")]
    pub delay_ms: u64,

    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 2000))]
    pub request_timeout_ms: u64,

    /// Follow-up requests deeper than this are dropped.
    #[serde(default)]
    pub max_depth: Option<u32>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub frontier: FrontierConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub statistics: StatisticsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RegistryConfig {
    #[serde(default = "default_tick")]
    #[validate(range(min = 1))]
    pub tick_ms: u64,

    #[serde(default = "default_wheel_size")]
    #[validate(range(min = 1))]
    pub wheel_size: usize,

    #[serde(default = "default_min_timeout")]
    #[validate(range(min = 2000))]
    pub min_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick(),
            wheel_size: default_wheel_size(),
            min_timeout_ms: default_min_timeout(),
        }
    }
}

impl RegistryConfig {
    pub fn options(&self) -> RegistryOptions {
        RegistryOptions {
            tick: Duration::from_millis(self.tick_ms),
            wheel_size: self.wheel_size,
            min_timeout_ms: self.min_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FrontierConfig {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    #[serde(default)]
    pub dedup: DedupPolicy,

    #[serde(default)]
    pub order: FrontierOrder,

    #[serde(default = "default_reclaim_interval")]
    #[validate(range(min = 1))]
    pub reclaim_interval_ms: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            dedup: DedupPolicy::default(),
            order: FrontierOrder::default(),
            reclaim_interval_ms: default_reclaim_interval(),
        }
    }
}

impl FrontierConfig {
    pub fn options(&self) -> FrontierOptions {
        FrontierOptions {
            retry_limit: self.retry_limit,
            dedup: self.dedup,
            order: self.order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_redeliveries")]
    pub max_redeliveries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: default_redeliveries(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StatisticsConfig {
    #[default]
    Memory,
    Sqlite {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// How often a `Print` event is published while crawling; 0 disables it.
    #[serde(default = "default_print_interval")]
    pub print_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            print_interval_ms: default_print_interval(),
        }
    }
}

pub(crate) fn default_concurrency() -> usize {
    4
}

pub(crate) fn default_delay() -> u64 {
    0
}

pub(crate) fn default_request_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

pub(crate) fn default_user_agent() -> String {
    "Crawl-Coordinator/1.0".to_string()
}

fn default_tick() -> u64 {
    1000
}

fn default_wheel_size() -> usize {
    512
}

fn default_min_timeout() -> u64 {
    MIN_TIMEOUT_MS
}

fn default_retry_limit() -> u32 {
    3
}

fn default_reclaim_interval() -> u64 {
    1000
}

fn default_redeliveries() -> u32 {
    3
}

fn default_print_interval() -> u64 {
    5000
}
