//! Scheduling frontier.
//!
//! Holds the requests waiting to be dispatched, filters duplicates on the
//! way in and decides what happens to a request once the registry lets go
//! of it: success ends it, a failure or timeout puts it back in the queue
//! until the retry limit is used up.

pub mod dedup;
pub mod queue;

pub use dedup::{DedupPolicy, DuplicateFilter, InFlightDuplicateFilter, PermanentDuplicateFilter};
pub use queue::FrontierOrder;

use crate::error::{Error, Result};
use crate::registry::RequestRegistry;
use crate::request::Request;
use crate::statistics::StatisticsClient;
use parking_lot::Mutex;
use queue::PendingQueue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct FrontierOptions {
    /// Redispatches allowed after the first attempt.
    pub retry_limit: u32,
    pub dedup: DedupPolicy,
    pub order: FrontierOrder,
}

impl Default for FrontierOptions {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            dedup: DedupPolicy::default(),
            order: FrontierOrder::default(),
        }
    }
}

/// How a dispatched request ended on the worker side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
    Timeout,
}

/// What the frontier did with a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Retried { retried_times: u32 },
    Abandoned,
    /// The registry no longer held the request: its timeout won the race
    /// and the reclaim path owns it.
    Reclaimed,
}

pub struct Frontier {
    queue: Mutex<PendingQueue>,
    filter: Box<dyn DuplicateFilter>,
    registry: Arc<RequestRegistry>,
    statistics: StatisticsClient,
    retry_limit: u32,
    // Admitted requests that have not succeeded or been abandoned yet,
    // wherever they are (queue, registry, timed-out batch, or in between).
    outstanding: AtomicUsize,
}

impl Frontier {
    pub fn new(
        options: FrontierOptions,
        registry: Arc<RequestRegistry>,
        statistics: StatisticsClient,
    ) -> Self {
        Self {
            queue: Mutex::new(PendingQueue::new(options.order)),
            filter: options.dedup.filter(),
            registry,
            statistics,
            retry_limit: options.retry_limit,
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Pending requests.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Admits `request` unless the dedup filter rejects it (`Ok(false)`).
    pub async fn push(&self, request: Request) -> Result<bool> {
        self.validate(&request)?;
        let owner = request.owner.clone();
        if !self.admit(request) {
            return Ok(false);
        }
        self.report(self.statistics.increase_total(&owner, 1).await);
        Ok(true)
    }

    /// Admits a batch; publishes one `Total` per owner. Nothing is admitted
    /// if any request is invalid.
    pub async fn push_many(&self, requests: Vec<Request>) -> Result<usize> {
        for request in &requests {
            self.validate(request)?;
        }

        let mut per_owner: BTreeMap<String, u64> = BTreeMap::new();
        for request in requests {
            let owner = request.owner.clone();
            if self.admit(request) {
                *per_owner.entry(owner).or_default() += 1;
            }
        }

        let mut admitted = 0;
        for (owner, count) in per_owner {
            admitted += count as usize;
            self.report(self.statistics.increase_total(&owner, count).await);
        }
        Ok(admitted)
    }

    /// Removes up to `max` requests in frontier order. The caller registers
    /// them before dispatching.
    pub fn pull(&self, max: usize) -> Vec<Request> {
        let mut queue = self.queue.lock();
        let mut pulled = Vec::with_capacity(max.min(queue.len()));
        while pulled.len() < max {
            match queue.pop() {
                Some(request) => pulled.push(request),
                None => break,
            }
        }
        pulled
    }

    /// Pulls up to `max` requests and registers them as in flight.
    pub async fn dispatch(&self, max: usize) -> Vec<Request> {
        let mut dispatched = Vec::new();
        for request in self.pull(max) {
            match self.registry.register(request.clone()) {
                Ok(true) => {
                    log::trace!("Dispatching {}", request.url);
                    dispatched.push(request);
                }
                Ok(false) => {
                    log::warn!("Dropping {}: a copy is already in flight", request.fingerprint);
                    self.abandon(request).await;
                }
                Err(e) => {
                    log::error!("Cannot dispatch {}: {}", request.url, e);
                    self.abandon(request).await;
                }
            }
        }
        dispatched
    }

    /// Reports the outcome of a dispatched request. `dispatched` is the copy
    /// handed out by [`dispatch`](Self::dispatch); its `retried_times` tells
    /// attempts apart, so a late report from an attempt that timed out never
    /// completes the retry running in its place.
    pub async fn on_completed(&self, dispatched: &Request, outcome: Outcome) -> Completion {
        let fingerprint = &dispatched.fingerprint;
        let Some(request) = self
            .registry
            .complete_attempt(fingerprint, dispatched.retried_times)
        else {
            log::debug!(
                "{} (attempt {}) finished after its timeout reclaimed it",
                fingerprint,
                dispatched.retried_times + 1
            );
            return Completion::Reclaimed;
        };

        match outcome {
            Outcome::Success => {
                self.filter.release(&request.fingerprint);
                self.finish();
                self.report(self.statistics.increase_success(&request.owner).await);
                Completion::Succeeded
            }
            Outcome::Failure(reason) => self.fail(request, &reason).await,
            Outcome::Timeout => self.fail(request, "timed out").await,
        }
    }

    /// Runs every request the registry timed out through the failure path.
    pub async fn reclaim_timed_out(&self) -> usize {
        let timed_out = self.registry.drain_timed_out();
        let count = timed_out.len();
        for request in timed_out {
            self.fail(request, "timed out").await;
        }
        if count > 0 {
            log::info!("Reclaimed {} timed out requests", count);
        }
        count
    }

    /// Nothing pending, nothing in flight, nothing waiting to be reclaimed.
    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
            && self.is_empty()
            && self.registry.size() == 0
            && self.registry.timed_out_len() == 0
    }

    pub fn shutdown(&self) {
        self.queue.lock().clear();
        self.registry.shutdown();
    }

    fn validate(&self, request: &Request) -> Result<()> {
        let floor = self.registry.min_timeout_ms();
        if request.timeout_ms < floor {
            return Err(Error::Config(format!(
                "Request {} has timeout {}ms, minimum is {}ms",
                request.url, request.timeout_ms, floor
            )));
        }
        Ok(())
    }

    fn admit(&self, request: Request) -> bool {
        if !self.filter.admit(&request.fingerprint) {
            log::debug!("Duplicate request {} ignored", request.url);
            return false;
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        log::trace!("Queued {}", request.url);
        self.queue.lock().push(request);
        true
    }

    async fn fail(&self, mut request: Request, reason: &str) -> Completion {
        if request.retried_times < self.retry_limit {
            request.retried_times += 1;
            let retried_times = request.retried_times;
            log::debug!(
                "Retrying {} ({}/{}): {}",
                request.url,
                retried_times,
                self.retry_limit,
                reason
            );
            self.queue.lock().push(request);
            return Completion::Retried { retried_times };
        }

        log::warn!(
            "Abandoning {} after {} retries: {}",
            request.url,
            request.retried_times,
            reason
        );
        self.abandon(request).await;
        Completion::Abandoned
    }

    async fn abandon(&self, request: Request) {
        self.filter.release(&request.fingerprint);
        self.finish();
        self.report(self.statistics.increase_failure(&request.owner).await);
    }

    fn finish(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn report(&self, published: Result<()>) {
        if let Err(e) = published {
            log::warn!("Failed to publish statistics: {}", e);
        }
    }
}
