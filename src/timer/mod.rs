//! Hashed wheel timer.
//!
//! Timeouts are pushed onto an incoming queue in O(1) and moved into their
//! bucket by a single ticking task. Every tick the task visits one bucket and
//! fires the entries whose rotation count has run out, so the cost of a tick
//! depends on the bucket, not on the total number of outstanding timeouts.
//! Cancelling only flips the timeout's state; the entry is dropped the next
//! time its bucket is visited.

pub mod wheel;

pub use wheel::TimingWheel;

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

type TimerTask = Box<dyn FnOnce() + Send + 'static>;

struct Timeout {
    state: AtomicU8,
    deadline: Instant,
    task: Mutex<Option<TimerTask>>,
    pending: Arc<AtomicUsize>,
}

impl Timeout {
    fn transition(&self, to: u8) -> bool {
        if self
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

/// Handle to a scheduled timeout.
#[derive(Clone)]
pub struct TimeoutHandle {
    timeout: Arc<Timeout>,
}

impl TimeoutHandle {
    /// Returns `false` when the timeout already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        if self.timeout.transition(CANCELLED) {
            self.timeout.task.lock().take();
            true
        } else {
            false
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.timeout.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.timeout.state.load(Ordering::Acquire) == EXPIRED
    }
}

struct Shared {
    tick: Duration,
    incoming: Mutex<Vec<Arc<Timeout>>>,
    pending: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

pub struct HashedWheelTimer {
    shared: Arc<Shared>,
    wheel_size: usize,
    shutdown: watch::Sender<bool>,
}

impl HashedWheelTimer {
    /// Starts the ticking task. Must be called from within a Tokio runtime.
    pub fn new(tick: Duration, wheel_size: usize) -> Self {
        let tick = tick.max(Duration::from_millis(1));
        let wheel = TimingWheel::new(wheel_size);
        let wheel_size = wheel.size();
        let shared = Arc::new(Shared {
            tick,
            incoming: Mutex::new(Vec::new()),
            pending: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_ticker(shared.clone(), wheel, shutdown_rx));
        log::debug!(
            "Wheel timer started: tick={:?}, buckets={}",
            tick,
            wheel_size
        );

        Self {
            shared,
            wheel_size,
            shutdown: shutdown_tx,
        }
    }

    pub fn tick(&self) -> Duration {
        self.shared.tick
    }

    pub fn wheel_size(&self) -> usize {
        self.wheel_size
    }

    /// Timeouts scheduled and neither fired nor cancelled.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Runs `task` once `delay` has elapsed, at tick granularity and never
    /// early. After `stop` the returned handle is already cancelled.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimeoutHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let timeout = Arc::new(Timeout {
            state: AtomicU8::new(PENDING),
            deadline: Instant::now() + delay,
            task: Mutex::new(Some(Box::new(task))),
            pending: self.shared.pending.clone(),
        });

        {
            // `stop` raises the flag before draining under this lock, so a
            // timeout pushed here is either drained by it or never pushed.
            let mut incoming = self.shared.incoming.lock();
            if !self.is_stopped() {
                self.shared.pending.fetch_add(1, Ordering::SeqCst);
                incoming.push(timeout.clone());
                return TimeoutHandle { timeout };
            }
        }

        timeout.state.store(CANCELLED, Ordering::Release);
        timeout.task.lock().take();
        TimeoutHandle { timeout }
    }

    /// Stops the ticking task and drops every unfired timeout. Returns how
    /// many were still pending. Calling it again returns 0.
    pub fn stop(&self) -> usize {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let unfired = self.pending();
        let _ = self.shutdown.send(true);

        for timeout in std::mem::take(&mut *self.shared.incoming.lock()) {
            if timeout.transition(CANCELLED) {
                timeout.task.lock().take();
            }
        }

        log::debug!("Wheel timer stopped with {} unfired timeouts", unfired);
        unfired
    }
}

impl Drop for HashedWheelTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticker(
    shared: Arc<Shared>,
    mut wheel: TimingWheel<Arc<Timeout>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let start = Instant::now();

    loop {
        let next_tick = start + tick_offset(shared.tick, wheel.ticks() + 1);
        tokio::select! {
            _ = tokio::time::sleep_until(next_tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let now = Instant::now();
        transfer_incoming(&shared, &mut wheel, now);

        for timeout in wheel.advance() {
            if timeout.is_cancelled() {
                continue;
            }
            if timeout.deadline > now {
                let ticks = ticks_until(shared.tick, timeout.deadline - now);
                wheel.insert(timeout, ticks);
                continue;
            }
            fire(&timeout);
        }

        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }
    }

    for timeout in wheel.drain() {
        if timeout.transition(CANCELLED) {
            timeout.task.lock().take();
        }
    }
    log::trace!("Wheel ticker exited");
}

fn transfer_incoming(shared: &Shared, wheel: &mut TimingWheel<Arc<Timeout>>, now: Instant) {
    let incoming = std::mem::take(&mut *shared.incoming.lock());
    for timeout in incoming {
        if timeout.is_cancelled() {
            continue;
        }
        let remaining = timeout.deadline.saturating_duration_since(now);
        wheel.insert(timeout, ticks_until(shared.tick, remaining));
    }
}

fn fire(timeout: &Timeout) {
    if !timeout.transition(EXPIRED) {
        return;
    }
    let task = timeout.task.lock().take();
    if let Some(task) = task {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::error!("Timer task panicked");
        }
    }
}

fn tick_offset(tick: Duration, ticks: u64) -> Duration {
    Duration::from_nanos((tick.as_nanos() as u64).saturating_mul(ticks))
}

/// Whole ticks covering `remaining`; at least one.
fn ticks_until(tick: Duration, remaining: Duration) -> u64 {
    let tick_nanos = tick.as_nanos().max(1);
    let ticks = remaining.as_nanos().div_ceil(tick_nanos);
    (ticks as u64).max(1)
}
