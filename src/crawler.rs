use crate::config::CrawlConfig;
use crate::downloader::Downloader;
use crate::error::Result;
use crate::frontier::{Completion, Frontier, Outcome};
use crate::metrics::collector::MetricsCollector;
use crate::metrics::snapshot::MetricsSnapshot;
use crate::request::Request;
use crate::statistics::StatisticsClient;
use futures::stream::StreamExt;
use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, sleep, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Who is crawling what, and how hard.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub owner: String,
    pub name: String,
    pub agent_id: String,
    pub agent_name: String,
    pub concurrency: usize,
    pub delay: Duration,
    pub max_depth: Option<u32>,
    pub reclaim_interval: Duration,
    /// `None` disables periodic `Print` events.
    pub print_interval: Option<Duration>,
}

impl EngineSettings {
    /// Missing owner and agent ids get a fresh time-ordered uuid.
    pub fn from_config(config: &CrawlConfig) -> Self {
        let owner = config
            .owner
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let agent_id = config
            .agent
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let agent_name = config
            .agent
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-agent", config.name));

        Self {
            owner,
            name: config.name.clone(),
            agent_id,
            agent_name,
            concurrency: config.concurrency.max(1),
            delay: Duration::from_millis(config.delay_ms),
            max_depth: config.max_depth,
            reclaim_interval: Duration::from_millis(config.frontier.reclaim_interval_ms.max(1)),
            print_interval: match config.agent.print_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

#[derive(Clone)]
struct Worker {
    frontier: Arc<Frontier>,
    downloader: Arc<dyn Downloader>,
    statistics: StatisticsClient,
    metrics: Arc<MetricsCollector>,
    in_flight: Arc<AtomicUsize>,
    agent_id: String,
    delay: Duration,
    max_depth: Option<u32>,
}

impl Worker {
    async fn process(&self, request: Request) {
        self.metrics.increment_active_workers();

        let started = Instant::now();
        let limit = Duration::from_millis(request.timeout_ms);
        let (outcome, follow_ups) =
            match tokio::time::timeout(limit, self.downloader.download(&request)).await {
                Ok(Ok(download)) => (Outcome::Success, download.follow_ups),
                Ok(Err(e)) => {
                    log::warn!("Failed to download {}: {}", request.url, e);
                    (Outcome::Failure(e.to_string()), Vec::new())
                }
                Err(_) => {
                    log::warn!("{} did not answer within {}ms", request.url, request.timeout_ms);
                    (Outcome::Timeout, Vec::new())
                }
            };
        let elapsed = started.elapsed();
        let succeeded = outcome == Outcome::Success;

        let completion = self.frontier.on_completed(&request, outcome).await;
        self.metrics.record_attempt(succeeded, elapsed, completion);

        let elapsed_ms = elapsed.as_millis() as u64;
        let published = if succeeded {
            self.statistics.increase_agent_success(&self.agent_id, elapsed_ms).await
        } else {
            self.statistics.increase_agent_failure(&self.agent_id, elapsed_ms).await
        };
        if let Err(e) = published {
            log::warn!("Failed to publish agent statistics: {}", e);
        }

        if completion == Completion::Succeeded && !follow_ups.is_empty() {
            self.enqueue(follow_ups).await;
        }

        sleep(self.delay).await;
        self.metrics.decrement_active_workers();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn enqueue(&self, follow_ups: Vec<Request>) {
        let follow_ups: Vec<Request> = follow_ups
            .into_iter()
            .filter(|r| self.max_depth.is_none_or(|max| r.depth <= max))
            .collect();
        if follow_ups.is_empty() {
            return;
        }
        match self.frontier.push_many(follow_ups).await {
            Ok(admitted) => self.metrics.add_queued(admitted as u64),
            Err(e) => log::error!("Rejected follow-up requests: {}", e),
        }
    }
}

pub struct CrawlerEngine {
    settings: EngineSettings,
    frontier: Arc<Frontier>,
    downloader: Arc<dyn Downloader>,
    statistics: StatisticsClient,
    metrics: Arc<MetricsCollector>,
    state: Arc<Mutex<CrawlerState>>,
    state_watcher: watch::Sender<CrawlerState>,
}

impl CrawlerEngine {
    pub fn new(
        settings: EngineSettings,
        frontier: Arc<Frontier>,
        downloader: Arc<dyn Downloader>,
        statistics: StatisticsClient,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CrawlerState::Idle);

        Self {
            settings,
            frontier,
            downloader,
            statistics,
            metrics: metrics.unwrap_or_else(|| Arc::new(MetricsCollector::new())),
            state: Arc::new(Mutex::new(CrawlerState::Idle)),
            state_watcher: state_tx,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn frontier(&self) -> &Arc<Frontier> {
        &self.frontier
    }

    /// Crawls from `seeds` until the frontier runs dry, ctrl-c arrives or
    /// [`stop`](Self::stop) is called. The frontier is shut down on return.
    pub async fn run(&self, seeds: Vec<Request>) -> Result<MetricsSnapshot> {
        self.set_state(CrawlerState::Running).await;
        let owner = self.settings.owner.clone();

        self.report(
            self.statistics
                .register_agent(&self.settings.agent_id, &self.settings.agent_name)
                .await,
        );
        self.report(self.statistics.start(&owner, &self.settings.name).await);

        let admitted = match self.frontier.push_many(seeds).await {
            Ok(admitted) => admitted,
            Err(e) => {
                self.set_state(CrawlerState::Stopped).await;
                return Err(e);
            }
        };
        self.metrics.add_queued(admitted as u64);
        log::info!(
            "Seeded {} requests for {} (retry limit {})",
            admitted,
            owner,
            self.frontier.retry_limit()
        );

        let concurrency = self.settings.concurrency;
        let in_flight = Arc::new(AtomicUsize::new(0));
        let (requests_tx, requests_rx) = mpsc::channel::<Request>(concurrency);

        let worker = Worker {
            frontier: self.frontier.clone(),
            downloader: self.downloader.clone(),
            statistics: self.statistics.clone(),
            metrics: self.metrics.clone(),
            in_flight: in_flight.clone(),
            agent_id: self.settings.agent_id.clone(),
            delay: self.settings.delay,
            max_depth: self.settings.max_depth,
        };
        let workers = tokio::spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(requests_rx)
                .for_each_concurrent(concurrency, |request| {
                    let worker = worker.clone();
                    async move { worker.process(request).await }
                })
                .await;
            log::debug!("Workers finished.");
        });

        let mut state_rx = self.state_watcher.subscribe();
        let mut reclaim = interval(self.settings.reclaim_interval);
        reclaim.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut print = self.settings.print_interval.map(|period| {
            let mut print = interval(period);
            print.set_missed_tick_behavior(MissedTickBehavior::Delay);
            print
        });
        let mut poll = interval(Duration::from_millis(20));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    log::info!("Shutting down...");
                    break;
                }
                changed = state_rx.changed() => {
                    if changed.is_err() || *state_rx.borrow() == CrawlerState::Stopped {
                        log::info!("Stop requested.");
                        break;
                    }
                }
                _ = reclaim.tick() => {
                    let reclaimed = self.frontier.reclaim_timed_out().await;
                    self.metrics.add_reclaimed(reclaimed as u64);
                }
                _ = tick(&mut print) => {
                    self.report(self.statistics.print(&owner).await);
                }
                _ = poll.tick() => {
                    let current = *state_rx.borrow();
                    match current {
                        CrawlerState::Paused => continue,
                        CrawlerState::Stopped => break,
                        _ => {}
                    }
                    let free = concurrency.saturating_sub(in_flight.load(Ordering::SeqCst));
                    if free > 0 {
                        let batch = self.frontier.dispatch(free).await;
                        self.metrics.add_dispatched(batch.len() as u64);
                        for request in batch {
                            in_flight.fetch_add(1, Ordering::SeqCst);
                            if requests_tx.send(request).await.is_err() {
                                in_flight.fetch_sub(1, Ordering::SeqCst);
                                log::error!("Worker pool is gone");
                            }
                        }
                    }
                    if in_flight.load(Ordering::SeqCst) == 0 && self.frontier.is_idle() {
                        log::info!("Crawl finished.");
                        break;
                    }
                }
            }
        }

        drop(requests_tx);
        if let Err(e) = workers.await {
            log::error!("Worker pool failed: {}", e);
        }

        self.report(self.statistics.exit(&owner).await);
        self.report(self.statistics.print(&owner).await);
        self.frontier.shutdown();
        self.set_state(CrawlerState::Stopped).await;

        Ok(self.metrics.snapshot())
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn watch_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        let (tx, rx) = watch::channel(self.metrics.snapshot());
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if tx.send(metrics.snapshot()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub async fn state(&self) -> CrawlerState {
        *self.state.lock().await
    }

    pub fn watch_state(&self) -> watch::Receiver<CrawlerState> {
        self.state_watcher.subscribe()
    }

    /// Stops dispatching; in-flight requests still finish.
    pub async fn pause(&self) {
        if self.state().await == CrawlerState::Running {
            self.set_state(CrawlerState::Paused).await;
        }
    }

    pub async fn resume(&self) {
        if self.state().await == CrawlerState::Paused {
            self.set_state(CrawlerState::Running).await;
        }
    }

    pub async fn stop(&self) {
        self.set_state(CrawlerState::Stopped).await;
    }

    pub async fn set_state(&self, state: CrawlerState) {
        let mut state_guard = self.state.lock().await;
        *state_guard = state;
        let _ = self.state_watcher.send(state);
    }

    fn report(&self, published: Result<()>) {
        if let Err(e) = published {
            log::warn!("Failed to publish statistics: {}", e);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
