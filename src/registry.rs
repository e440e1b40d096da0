//! In-flight request registry.
//!
//! Every dispatched request is recorded here under its fingerprint with a
//! timeout on the wheel timer. A request leaves the registry exactly once:
//! either through `complete` or because its timer fired, in which case it
//! lands in the timed-out batch returned by `drain_timed_out`. Both paths
//! go through a single removal from the fingerprint map, so the first one
//! wins and the other becomes a no-op.

use crate::error::{Error, Result};
use crate::request::{Request, MIN_TIMEOUT_MS};
use crate::timer::{HashedWheelTimer, TimeoutHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub tick: Duration,
    pub wheel_size: usize,
    /// Never below `MIN_TIMEOUT_MS`.
    pub min_timeout_ms: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            wheel_size: 512,
            min_timeout_ms: MIN_TIMEOUT_MS,
        }
    }
}

struct InFlight {
    generation: u64,
    request: Request,
    timeout: TimeoutHandle,
}

#[derive(Default)]
struct Inner {
    entries: DashMap<String, InFlight>,
    timed_out: Mutex<Vec<Request>>,
    shut_down: AtomicBool,
}

impl Inner {
    fn on_timeout(&self, fingerprint: &str, generation: u64) {
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }
        let removed = self
            .entries
            .remove_if(fingerprint, |_, in_flight| in_flight.generation == generation);

        if let Some((_, in_flight)) = removed {
            log::warn!(
                "Request {} ({}) timed out after {}ms",
                in_flight.request.fingerprint,
                in_flight.request.url,
                in_flight.request.timeout_ms
            );
            self.timed_out.lock().push(in_flight.request);
        }
    }
}

pub struct RequestRegistry {
    inner: Arc<Inner>,
    timer: HashedWheelTimer,
    min_timeout_ms: u64,
    generations: AtomicU64,
}

impl RequestRegistry {
    /// Must be called from within a Tokio runtime; starts the wheel timer.
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            timer: HashedWheelTimer::new(options.tick, options.wheel_size),
            min_timeout_ms: options.min_timeout_ms.max(MIN_TIMEOUT_MS),
            generations: AtomicU64::new(0),
        }
    }

    /// Records `request` as in flight.
    ///
    /// Returns `Ok(false)` when the fingerprint is already in flight; the
    /// caller must not dispatch a second copy. A timeout below the floor is
    /// a configuration error.
    pub fn register(&self, request: Request) -> Result<bool> {
        if request.timeout_ms < self.min_timeout_ms {
            return Err(Error::Config(format!(
                "Request timeout {}ms is below the minimum of {}ms",
                request.timeout_ms, self.min_timeout_ms
            )));
        }
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Internal("Registry has been shut down".to_string()));
        }

        let fingerprint = request.fingerprint.clone();
        let generation = match self.inner.entries.entry(fingerprint.clone()) {
            Entry::Occupied(_) => {
                log::debug!("Request {} is already in flight", fingerprint);
                return Ok(false);
            }
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let inner: Weak<Inner> = Arc::downgrade(&self.inner);
                let timer_fingerprint = fingerprint.clone();
                let timeout = self.timer.schedule(
                    Duration::from_millis(request.timeout_ms),
                    move || {
                        if let Some(inner) = inner.upgrade() {
                            inner.on_timeout(&timer_fingerprint, generation);
                        }
                    },
                );
                log::trace!("Registered {} for {}ms", fingerprint, request.timeout_ms);
                vacant.insert(InFlight {
                    generation,
                    request,
                    timeout,
                });
                generation
            }
        };

        // A shutdown that cleared the map between the check above and the
        // insert would leave this entry behind.
        if self.inner.shut_down.load(Ordering::SeqCst) {
            if let Some((_, in_flight)) = self
                .inner
                .entries
                .remove_if(&fingerprint, |_, in_flight| in_flight.generation == generation)
            {
                in_flight.timeout.cancel();
            }
            return Err(Error::Internal("Registry has been shut down".to_string()));
        }
        Ok(true)
    }

    /// Removes and returns the request, or `None` when its timeout already
    /// reclaimed it.
    pub fn complete(&self, fingerprint: &str) -> Option<Request> {
        let (_, in_flight) = self.inner.entries.remove(fingerprint)?;
        in_flight.timeout.cancel();
        Some(in_flight.request)
    }

    /// Like [`complete`](Self::complete), but only for the attempt that was
    /// dispatched with `retried_times`. A late report from an earlier
    /// attempt leaves a newer registration of the fingerprint alone.
    pub fn complete_attempt(&self, fingerprint: &str, retried_times: u32) -> Option<Request> {
        let (_, in_flight) = self.inner.entries.remove_if(fingerprint, |_, in_flight| {
            in_flight.request.retried_times == retried_times
        })?;
        in_flight.timeout.cancel();
        Some(in_flight.request)
    }

    /// Takes every request whose timeout fired since the previous drain.
    pub fn drain_timed_out(&self) -> Vec<Request> {
        std::mem::take(&mut *self.inner.timed_out.lock())
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.inner.entries.contains_key(fingerprint)
    }

    /// In-flight requests.
    pub fn size(&self) -> usize {
        self.inner.entries.len()
    }

    /// Timed-out requests waiting for the next drain.
    pub fn timed_out_len(&self) -> usize {
        self.inner.timed_out.lock().len()
    }

    pub fn min_timeout_ms(&self) -> u64 {
        self.min_timeout_ms
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let unfired = self.timer.stop();
        self.inner.entries.clear();
        self.inner.timed_out.lock().clear();
        log::info!("Request registry shut down ({} timers dropped)", unfired);
    }
}

impl Drop for RequestRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}
