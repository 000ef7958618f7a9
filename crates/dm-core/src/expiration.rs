//! Background purge of expired messages.
//!
//! The scheduler is a single tokio task that alternates between a purge pass
//! and a sleep. After each pass it looks for the nearest future deadline and
//! sleeps until then, clamped to `[MIN_PURGE_DELAY, MAX_PURGE_DELAY]`. The
//! upper bound caps how stale the store can get when the clock drifts or a
//! nearer deadline is inserted while the task sleeps.
//!
//! `stop` bumps a generation counter under the scheduler lock. A pass re-checks
//! the generation under the same lock before purging, so a wake-up that was
//! already queued when `stop` ran never purges.

use crate::constants::{MAX_PURGE_DELAY, MIN_PURGE_DELAY};
use crate::store::MessageStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock driven by hand, for tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Delay until the next purge pass.
///
/// `deadline - now` clamped to `[1s, 60s]`; 60s when nothing is scheduled to
/// expire. A deadline at or before `now` yields the 1s floor.
pub fn next_wake_delay(next_deadline: Option<u64>, now_secs: u64) -> Duration {
    match next_deadline {
        Some(deadline) => Duration::from_secs(deadline.saturating_sub(now_secs))
            .clamp(MIN_PURGE_DELAY, MAX_PURGE_DELAY),
        None => MAX_PURGE_DELAY,
    }
}

enum SchedulerState {
    Idle,
    Armed { task: JoinHandle<()> },
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    generation: AtomicU64,
    passes: AtomicU64,
}

pub struct ExpirationScheduler {
    store: Arc<MessageStore>,
    clock: Arc<dyn Clock>,
    inner: Arc<SchedulerInner>,
}

impl ExpirationScheduler {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<MessageStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(SchedulerState::Idle),
                generation: AtomicU64::new(0),
                passes: AtomicU64::new(0),
            }),
        }
    }

    /// Arm the scheduler. Returns false (and does nothing) if already armed.
    ///
    /// Must be called from within a tokio runtime. The first pass runs as soon
    /// as the store reports hydration complete.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if matches!(*state, SchedulerState::Armed { .. }) {
            return false;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = tokio::spawn(run_purge_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.inner),
            generation,
        ));
        *state = SchedulerState::Armed { task };

        tracing::info!("expiration: scheduler armed (generation {})", generation);
        true
    }

    /// Cancel the armed timer. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let SchedulerState::Armed { task } = std::mem::replace(&mut *state, SchedulerState::Idle)
        {
            task.abort();
            tracing::info!("expiration: scheduler stopped");
        }
    }

    pub fn is_armed(&self) -> bool {
        matches!(*self.inner.state.lock(), SchedulerState::Armed { .. })
    }

    /// Number of purge passes performed since construction.
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_purge_loop(
    store: Arc<MessageStore>,
    clock: Arc<dyn Clock>,
    inner: Arc<SchedulerInner>,
    generation: u64,
) {
    store.await_hydration().await;

    while let Some(delay) = purge_pass(&store, clock.as_ref(), &inner, generation) {
        tracing::trace!("expiration: next pass in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// One purge pass. Returns the delay until the next pass, or None when the
/// scheduler was stopped (or restarted) since this loop was armed.
///
/// The generation check and the removal happen under the scheduler lock;
/// observers are notified after it is released so they may call back into
/// the scheduler.
fn purge_pass(
    store: &MessageStore,
    clock: &dyn Clock,
    inner: &SchedulerInner,
    generation: u64,
) -> Option<Duration> {
    let (removed, touched, delay) = {
        let _state = inner.state.lock();
        if inner.generation.load(Ordering::SeqCst) != generation {
            return None;
        }

        let now = clock.now_secs();
        let (removed, touched) = store.remove_expired(now);
        inner.passes.fetch_add(1, Ordering::SeqCst);
        (removed, touched, next_wake_delay(store.next_expiration_after(now), now))
    };

    if removed > 0 {
        tracing::info!("expiration: removed {} expired message(s)", removed);
    }
    store.publish(&touched);

    Some(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::store::MemoryKv;
    use std::sync::atomic::AtomicBool;

    const CONV: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const ME: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn expiring(id: &str, deadline: u64) -> Message {
        let mut m = Message::new(id, ME, 1);
        m.tags
            .push(vec!["expiration".to_string(), deadline.to_string()]);
        m
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_next_wake_delay_bounds() {
        assert_eq!(next_wake_delay(None, 100), MAX_PURGE_DELAY);
        assert_eq!(next_wake_delay(Some(130), 100), Duration::from_secs(30));
        assert_eq!(next_wake_delay(Some(100), 100), MIN_PURGE_DELAY);
        assert_eq!(next_wake_delay(Some(50), 100), MIN_PURGE_DELAY);
        assert_eq!(next_wake_delay(Some(100_000), 100), MAX_PURGE_DELAY);
    }

    #[test]
    fn test_stale_generation_never_purges() {
        let store = MessageStore::in_memory();
        store.upsert(CONV, ME, expiring("m1", 150));
        let inner = SchedulerInner {
            state: Mutex::new(SchedulerState::Idle),
            generation: AtomicU64::new(2),
            passes: AtomicU64::new(0),
        };
        let clock = ManualClock::new(1_000);

        assert!(purge_pass(&store, &clock, &inner, 1).is_none());
        assert!(store.message(CONV, "m1").is_some());
        assert_eq!(inner.passes.load(Ordering::SeqCst), 0);

        assert_eq!(
            purge_pass(&store, &clock, &inner, 2),
            Some(MAX_PURGE_DELAY)
        );
        assert!(store.message(CONV, "m1").is_none());
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let scheduler = ExpirationScheduler::new(Arc::new(MessageStore::in_memory()));
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let store = Arc::new(MessageStore::in_memory());
        let scheduler = ExpirationScheduler::with_clock(store, Arc::new(ManualClock::new(100)));

        assert!(scheduler.start());
        assert!(!scheduler.start());
        assert!(scheduler.is_armed());

        settle().await;
        assert_eq!(scheduler.passes(), 1);

        tokio::time::advance(MAX_PURGE_DELAY).await;
        settle().await;
        assert_eq!(scheduler.passes(), 2);

        scheduler.stop();
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purges_when_deadline_passes() {
        let store = Arc::new(MessageStore::in_memory());
        store.upsert(CONV, ME, expiring("short", 150));
        store.upsert(CONV, ME, expiring("long", 300));
        let clock = Arc::new(ManualClock::new(100));
        let scheduler = ExpirationScheduler::with_clock(store.clone(), clock.clone());

        scheduler.start();
        settle().await;
        assert_eq!(scheduler.passes(), 1);
        assert!(store.message(CONV, "short").is_some());

        clock.set(250);
        tokio::time::advance(Duration::from_secs(50)).await;
        settle().await;

        assert!(store.message(CONV, "short").is_none());
        assert!(store.message(CONV, "long").is_some());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_purge_after_stop() {
        let store = Arc::new(MessageStore::in_memory());
        store.upsert(CONV, ME, expiring("m1", 150));
        let clock = Arc::new(ManualClock::new(100));
        let scheduler = ExpirationScheduler::with_clock(store.clone(), clock.clone());

        scheduler.start();
        settle().await;
        scheduler.stop();

        clock.set(500);
        tokio::time::advance(MAX_PURGE_DELAY).await;
        settle().await;

        assert_eq!(scheduler.passes(), 1);
        assert!(store.message(CONV, "m1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_hydration() {
        let store = Arc::new(MessageStore::new(Arc::new(MemoryKv::new())));
        let scheduler =
            ExpirationScheduler::with_clock(store.clone(), Arc::new(ManualClock::new(100)));

        scheduler.start();
        settle().await;
        assert_eq!(scheduler.passes(), 0);

        store.hydrate().unwrap();
        settle().await;
        assert_eq!(scheduler.passes(), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_may_query_scheduler() {
        let store = Arc::new(MessageStore::in_memory());
        store.upsert(CONV, ME, expiring("m1", 150));
        let scheduler = Arc::new(ExpirationScheduler::with_clock(
            store.clone(),
            Arc::new(ManualClock::new(1_000)),
        ));

        let saw_armed = Arc::new(AtomicBool::new(false));
        let (weak, flag) = (Arc::downgrade(&scheduler), saw_armed.clone());
        let _sub = store.subscribe(move |_| {
            if let Some(scheduler) = weak.upgrade() {
                flag.store(scheduler.is_armed(), Ordering::SeqCst);
            }
        });

        scheduler.start();
        settle().await;

        assert!(store.message(CONV, "m1").is_none());
        assert!(saw_armed.load(Ordering::SeqCst));
        assert_eq!(scheduler.passes(), 1);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let store = Arc::new(MessageStore::in_memory());
        let scheduler = ExpirationScheduler::with_clock(store, Arc::new(ManualClock::new(100)));

        assert!(scheduler.start());
        settle().await;
        scheduler.stop();
        assert!(scheduler.start());
        settle().await;

        assert_eq!(scheduler.passes(), 2);
        scheduler.stop();
    }
}
