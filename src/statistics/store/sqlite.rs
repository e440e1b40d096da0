use super::{AgentStatistics, CrawlStatistics, StatisticsStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

const CREATE_CRAWL_TABLE: &str = "CREATE TABLE IF NOT EXISTS crawl_statistics (
    owner TEXT PRIMARY KEY,
    name TEXT,
    total INTEGER NOT NULL DEFAULT 0,
    success INTEGER NOT NULL DEFAULT 0,
    failure INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    exited_at TEXT,
    last_modified_at TEXT NOT NULL
)";

const CREATE_AGENT_TABLE: &str = "CREATE TABLE IF NOT EXISTS agent_statistics (
    agent_id TEXT PRIMARY KEY,
    agent_name TEXT,
    success INTEGER NOT NULL DEFAULT 0,
    failure INTEGER NOT NULL DEFAULT 0,
    elapsed_ms INTEGER NOT NULL DEFAULT 0,
    registered_at TEXT,
    last_seen_at TEXT NOT NULL
)";

/// Counters persisted in SQLite. Every mutation is a single upsert, so
/// concurrent increments for one owner are applied by the database.
pub struct SqliteStatisticsStore {
    pool: SqlitePool,
}

impl SqliteStatisticsStore {
    pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn_str = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&conn_str).await?;
        Self::with_pool(pool).await
    }

    /// Single-connection in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_CRAWL_TABLE).execute(&pool).await?;
        sqlx::query(CREATE_AGENT_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn add_to_crawl(&self, owner: &str, column: &str, amount: u64) -> Result<()> {
        let query = format!(
            "INSERT INTO crawl_statistics (owner, {column}, last_modified_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner) DO UPDATE SET {column} = {column} + excluded.{column},
             last_modified_at = excluded.last_modified_at"
        );
        sqlx::query(&query)
            .bind(owner)
            .bind(to_i64(amount)?)
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_to_agent(&self, agent_id: &str, column: &str, elapsed_ms: u64) -> Result<()> {
        let query = format!(
            "INSERT INTO agent_statistics (agent_id, {column}, elapsed_ms, last_seen_at) VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET {column} = {column} + 1,
             elapsed_ms = elapsed_ms + excluded.elapsed_ms,
             last_seen_at = excluded.last_seen_at"
        );
        sqlx::query(&query)
            .bind(agent_id)
            .bind(to_i64(elapsed_ms)?)
            .bind(now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatisticsStore for SqliteStatisticsStore {
    async fn start(&self, owner: &str, name: &str) -> Result<()> {
        let at = now();
        sqlx::query(
            "INSERT INTO crawl_statistics (owner, name, started_at, last_modified_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(owner) DO UPDATE SET name = excluded.name,
             started_at = COALESCE(crawl_statistics.started_at, excluded.started_at),
             last_modified_at = excluded.last_modified_at",
        )
        .bind(owner)
        .bind(name)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exit(&self, owner: &str) -> Result<()> {
        let at = now();
        sqlx::query(
            "INSERT INTO crawl_statistics (owner, exited_at, last_modified_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(owner) DO UPDATE SET exited_at = excluded.exited_at,
             last_modified_at = excluded.last_modified_at",
        )
        .bind(owner)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increase_total(&self, owner: &str, count: u64) -> Result<()> {
        self.add_to_crawl(owner, "total", count).await
    }

    async fn increase_success(&self, owner: &str) -> Result<()> {
        self.add_to_crawl(owner, "success", 1).await
    }

    async fn increase_failure(&self, owner: &str) -> Result<()> {
        self.add_to_crawl(owner, "failure", 1).await
    }

    async fn register_agent(&self, agent_id: &str, agent_name: &str) -> Result<()> {
        let at = now();
        sqlx::query(
            "INSERT INTO agent_statistics (agent_id, agent_name, registered_at, last_seen_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET agent_name = excluded.agent_name,
             registered_at = COALESCE(agent_statistics.registered_at, excluded.registered_at),
             last_seen_at = excluded.last_seen_at",
        )
        .bind(agent_id)
        .bind(agent_name)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increase_agent_success(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.add_to_agent(agent_id, "success", elapsed_ms).await
    }

    async fn increase_agent_failure(&self, agent_id: &str, elapsed_ms: u64) -> Result<()> {
        self.add_to_agent(agent_id, "failure", elapsed_ms).await
    }

    async fn crawl(&self, owner: &str) -> Result<Option<CrawlStatistics>> {
        let row = sqlx::query("SELECT * FROM crawl_statistics WHERE owner = ?1")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| crawl_from_row(&row)).transpose()
    }

    async fn crawls(&self, offset: usize, limit: usize) -> Result<Vec<CrawlStatistics>> {
        let rows = sqlx::query(
            "SELECT * FROM crawl_statistics ORDER BY last_modified_at DESC, owner ASC LIMIT ?1 OFFSET ?2",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(to_i64(offset as u64)?)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(crawl_from_row).collect()
    }

    async fn agent(&self, agent_id: &str) -> Result<Option<AgentStatistics>> {
        let row = sqlx::query("SELECT * FROM agent_statistics WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| agent_from_row(&row)).transpose()
    }

    async fn agents(&self) -> Result<Vec<AgentStatistics>> {
        let rows = sqlx::query("SELECT * FROM agent_statistics ORDER BY agent_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(agent_from_row).collect()
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::Internal(format!("Counter overflow: {}", value)))
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn parse_time(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Internal(format!("Bad timestamp {}: {}", raw, e)))
        })
        .transpose()
}

fn crawl_from_row(row: &SqliteRow) -> Result<CrawlStatistics> {
    let last_modified: String = row.try_get("last_modified_at")?;
    Ok(CrawlStatistics {
        owner: row.try_get("owner")?,
        name: row.try_get("name")?,
        total: to_u64(row.try_get("total")?),
        success: to_u64(row.try_get("success")?),
        failure: to_u64(row.try_get("failure")?),
        started_at: parse_time(row.try_get("started_at")?)?,
        exited_at: parse_time(row.try_get("exited_at")?)?,
        last_modified_at: parse_time(Some(last_modified))?.unwrap_or_else(Utc::now),
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<AgentStatistics> {
    let last_seen: String = row.try_get("last_seen_at")?;
    Ok(AgentStatistics {
        agent_id: row.try_get("agent_id")?,
        agent_name: row.try_get("agent_name")?,
        success: to_u64(row.try_get("success")?),
        failure: to_u64(row.try_get("failure")?),
        elapsed_ms: to_u64(row.try_get("elapsed_ms")?),
        registered_at: parse_time(row.try_get("registered_at")?)?,
        last_seen_at: parse_time(Some(last_seen))?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upserts_accumulate_per_owner() {
        let store = SqliteStatisticsStore::in_memory().await.unwrap();
        store.start("job1", "demo").await.unwrap();
        store.increase_total("job1", 10).await.unwrap();
        for _ in 0..3 {
            store.increase_success("job1").await.unwrap();
        }
        store.increase_failure("job1").await.unwrap();
        store.increase_failure("job1").await.unwrap();
        store.increase_success("job2").await.unwrap();

        let stats = store.crawl("job1").await.unwrap().unwrap();
        assert_eq!(stats.name.as_deref(), Some("demo"));
        assert_eq!((stats.total, stats.success, stats.failure), (10, 3, 2));
        assert_eq!(stats.left(), 5);
        assert!(stats.started_at.is_some());
        assert!(stats.exited_at.is_none());

        let other = store.crawl("job2").await.unwrap().unwrap();
        assert_eq!(other.success, 1);
        assert!(other.name.is_none());
        assert_eq!(store.crawls(0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn restart_and_exit() {
        let store = SqliteStatisticsStore::in_memory().await.unwrap();
        store.start("job", "a").await.unwrap();
        store.increase_total("job", 2).await.unwrap();
        let first = store.crawl("job").await.unwrap().unwrap();

        store.start("job", "b").await.unwrap();
        store.exit("job").await.unwrap();
        store.increase_success("job").await.unwrap();

        let stats = store.crawl("job").await.unwrap().unwrap();
        assert_eq!(stats.name.as_deref(), Some("b"));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.started_at, first.started_at);
        assert!(stats.exited_at.is_some());
    }

    #[tokio::test]
    async fn agent_records() {
        let store = SqliteStatisticsStore::in_memory().await.unwrap();
        store.increase_agent_success("a1", 120).await.unwrap();
        store.register_agent("a1", "worker-1").await.unwrap();
        store.increase_agent_failure("a1", 80).await.unwrap();

        let agent = store.agent("a1").await.unwrap().unwrap();
        assert_eq!(agent.agent_name.as_deref(), Some("worker-1"));
        assert_eq!((agent.success, agent.failure, agent.elapsed_ms), (1, 1, 200));
        assert_eq!(agent.average_latency_ms(), 100);
        assert!(agent.registered_at.is_some());
        assert!(store.agent("missing").await.unwrap().is_none());
        assert_eq!(store.agents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");

        let store = SqliteStatisticsStore::connect(&path).await.unwrap();
        store.increase_total("job", 7).await.unwrap();
        store.close().await;

        let reopened = SqliteStatisticsStore::connect(&path).await.unwrap();
        assert_eq!(reopened.crawl("job").await.unwrap().unwrap().total, 7);
    }
}
