use crate::config::schema::{
    default_concurrency, default_delay, default_request_timeout, default_user_agent, CrawlConfig,
    StatisticsConfig,
};
use crate::error::{Error, Result};
use crate::request::Request;
use crate::statistics::{MemoryStatisticsStore, SqliteStatisticsStore, StatisticsStore};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<CrawlConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<CrawlConfig> {
        let path = fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("{}: {}", path.display(), e))
        })?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path.parent()
                .ok_or_else(|| Error::Config(format!(
                    "Cannot determine parent directory for {}",
                    path.display()
                )))?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            Self::validate(&final_config)?;
        }

        Ok(final_config)
    }

    fn validate(config: &CrawlConfig) -> Result<()> {
        config.validate().map_err(|e| Error::Validation(e))?;
        config.registry.validate().map_err(|e| Error::Validation(e))?;
        config.frontier.validate().map_err(|e| Error::Validation(e))?;
        if config.request_timeout_ms < config.registry.min_timeout_ms {
            return Err(Error::Config(format!(
                "request_timeout_ms ({}) is below registry.min_timeout_ms ({})",
                config.request_timeout_ms, config.registry.min_timeout_ms
            )));
        }
        Ok(())
    }

    fn load_file(path: &Path) -> Result<CrawlConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let config: CrawlConfig = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some("yaml") | Some("yml") => {
                let config: CrawlConfig = serde_yaml::from_str(&content)?;
                Ok(config)
            }
            Some("toml") => {
                let config: CrawlConfig = toml::from_str(&content)?;
                Ok(config)
            }
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    fn merge_configs(mut parent: CrawlConfig, child: CrawlConfig) -> CrawlConfig {
        if !child.name.is_empty() {
            parent.name = child.name;
        }
        if child.owner.is_some() {
            parent.owner = child.owner;
        }
        if !child.start_urls.is_empty() {
            parent.start_urls = child.start_urls;
        }
        if child.concurrency != default_concurrency() {
            parent.concurrency = child.concurrency;
        }
        if child.delay_ms != default_delay() {
            parent.delay_ms = child.delay_ms;
        }
        if child.request_timeout_ms != default_request_timeout() {
            parent.request_timeout_ms = child.request_timeout_ms;
        }
        if child.max_depth.is_some() {
            parent.max_depth = child.max_depth;
        }
        if child.user_agent != default_user_agent() {
            parent.user_agent = child.user_agent;
        }
        if child.registry != Default::default() {
            parent.registry = child.registry;
        }
        if child.frontier != Default::default() {
            parent.frontier = child.frontier;
        }
        if child.bus != Default::default() {
            parent.bus = child.bus;
        }
        if child.statistics != StatisticsConfig::Memory {
            parent.statistics = child.statistics;
        }
        if child.agent != Default::default() {
            parent.agent = child.agent;
        }

        parent.extends = None;
        parent
    }

    /// Builds the statistics store selected by the config.
    pub async fn create_store(config: &CrawlConfig) -> Result<Arc<dyn StatisticsStore>> {
        let store: Arc<dyn StatisticsStore> = match &config.statistics {
            StatisticsConfig::Memory => Arc::new(MemoryStatisticsStore::new()),
            StatisticsConfig::Sqlite { path } => {
                Arc::new(SqliteStatisticsStore::connect(PathBuf::from(path)).await?)
            }
        };
        Ok(store)
    }

    pub fn seed_requests(config: &CrawlConfig, owner: &str) -> Result<Vec<Request>> {
        config
            .start_urls
            .iter()
            .map(|url| {
                Request::builder(owner, url.as_str())
                    .timeout_ms(config.request_timeout_ms)
                    .build()
            })
            .collect()
    }
}
