//! Deduplicating work queue shared between event producers and reconcile workers.
//!
//! A key is in at most one of two places at any time: waiting in the queue, or held by a
//! worker. Adding a key that is already waiting is a no-op. Adding a key that is held marks
//! it dirty, and it is redelivered exactly once after the worker calls [`WorkQueue::done`].
use std::{
    collections::VecDeque,
    fmt::Debug,
    future::poll_fn,
    hash::Hash,
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::RandomState;
use hashbrown::{hash_map::Entry, HashMap, HashSet};
use parking_lot::Mutex;
use tokio::{
    sync::{mpsc, Notify},
    time::Instant,
};
use tokio_util::{
    sync::CancellationToken,
    time::delay_queue::{self, DelayQueue},
};
use tracing::{debug, trace, Span};

use crate::utils::RetryBackoff;

/// A cloneable handle to a deduplicating queue of keys
///
/// All clones share the same underlying queue.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    backoff: RetryBackoff,
    schedule: mpsc::UnboundedSender<ScheduleRequest<T>>,
    // Cancelled on shutdown so pending delayed adds stop early
    shutdown: CancellationToken,
    span: Span,
}

/// A request to add `key` back at `run_at`
struct ScheduleRequest<T> {
    key: T,
    run_at: Instant,
}

/// Bookkeeping for a key waiting in the delay queue
struct ScheduledEntry {
    run_at: Instant,
    queue_key: delay_queue::Key,
}

struct State<T> {
    queue: VecDeque<T>,
    /// Keys that need processing: everything in `queue` plus held keys that were re-added
    dirty: HashSet<T, RandomState>,
    /// Keys currently held by a worker
    processing: HashSet<T, RandomState>,
    failures: HashMap<T, u32, RandomState>,
    /// Handed to the delay driver when the first delayed add is scheduled
    requests: Option<mpsc::UnboundedReceiver<ScheduleRequest<T>>>,
    shutting_down: bool,
}

impl<T> State<T> {
    fn new(requests: mpsc::UnboundedReceiver<ScheduleRequest<T>>) -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::default(),
            processing: HashSet::default(),
            failures: HashMap::default(),
            requests: Some(requests),
            shutting_down: false,
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    /// Creates an empty queue retrying failed keys with `backoff`
    #[must_use]
    pub fn new(backoff: RetryBackoff) -> Self {
        Self::with_span(backoff, tracing::debug_span!("workqueue"))
    }

    /// Creates an empty queue that emits its logs inside `span`
    #[must_use]
    pub fn with_span(backoff: RetryBackoff, span: Span) -> Self {
        let (schedule, requests) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(requests)),
                notify: Notify::new(),
                backoff,
                schedule,
                shutdown: CancellationToken::new(),
                span,
            }),
        }
    }

    /// Marks `key` as needing processing
    ///
    /// Ignored after [`shutdown`](Self::shutdown).
    pub fn add(&self, key: T) {
        let _entered = self.shared.span.enter();
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            trace!(?key, "queue is shutting down, ignoring add");
            return;
        }
        if state.dirty.contains(&key) {
            trace!(?key, "key already pending");
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "key in flight, deferring until done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Waits for the next key and marks it in flight
    ///
    /// Returns `None` once the queue has been shut down, including for callers that were
    /// already waiting.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so an add between the check and the await
            // is not missed
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Releases a key obtained from [`get`](Self::get)
    ///
    /// A key that was re-added while in flight goes back into the queue.
    pub fn done(&self, key: &T) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if !state.shutting_down && state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Releases `key` and adds it back after `delay`
    ///
    /// A zero delay re-adds immediately. A key that is already waiting on a delay keeps
    /// whichever deadline is earlier. Delayed adds are abandoned on shutdown.
    ///
    /// Delayed adds are driven by a single task per queue, spawned on first use, so this
    /// must be called from within a tokio runtime when `delay` is non-zero.
    pub fn requeue_after(&self, key: T, delay: Duration) {
        self.done(&key);
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let _entered = self.shared.span.enter();
        trace!(?key, ?delay, "scheduling delayed add");
        // The deadline starts now, not when the driver receives the request
        let run_at = Instant::now() + delay;
        let requests = self.shared.state.lock().requests.take();
        if let Some(requests) = requests {
            tokio::spawn(drive_delays(
                Arc::downgrade(&self.shared),
                requests,
                self.shared.shutdown.clone(),
            ));
        }
        if self.shared.schedule.send(ScheduleRequest { key, run_at }).is_err() {
            trace!("delay driver stopped, dropping delayed add");
        }
    }

    /// Counts a failure for `key` and adds it back after the backoff for that count
    ///
    /// Returns the delay chosen.
    pub fn requeue_rate_limited(&self, key: T) -> Duration {
        let failures = {
            let mut state = self.shared.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.shared.backoff.delay(failures);
        {
            let _entered = self.shared.span.enter();
            debug!(?key, failures, ?delay, "requeueing with backoff");
        }
        self.requeue_after(key, delay);
        delay
    }

    /// Number of failures recorded for `key` since it was last forgotten
    pub fn failures(&self, key: &T) -> u32 {
        self.shared.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Clears the failure count of `key`
    pub fn forget(&self, key: &T) {
        self.shared.state.lock().failures.remove(key);
    }

    /// Stops handing out keys
    ///
    /// Every current and future [`get`](Self::get) returns `None`, and further adds are ignored.
    /// Keys still waiting in the queue or on a delay are dropped rather than delivered.
    /// Keys already in flight may still be released with [`done`](Self::done).
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutting_down = true;
            state.queue.clear();
            state.dirty.clear();
        }
        {
            let _entered = self.shared.span.enter();
            debug!("work queue shut down");
        }
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Whether no keys are waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

/// Moves delayed keys back into the queue as their deadlines pass
///
/// Stops on shutdown, or once every queue handle is gone.
async fn drive_delays<T>(
    queue: Weak<Shared<T>>,
    mut requests: mpsc::UnboundedReceiver<ScheduleRequest<T>>,
    shutdown: CancellationToken,
) where
    T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    let mut delays = DelayQueue::new();
    let mut scheduled = HashMap::<T, ScheduledEntry, RandomState>::default();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => schedule(&mut delays, &mut scheduled, request),
                None => break,
            },
            Some(expired) = poll_fn(|cx| delays.poll_expired(cx)), if !delays.is_empty() => {
                let key = expired.into_inner();
                scheduled.remove(&key);
                match queue.upgrade() {
                    Some(shared) => WorkQueue { shared }.add(key),
                    None => break,
                }
            }
        }
    }
}

/// Schedules a delayed add; the earlier deadline wins for a key that is already waiting
fn schedule<T: Clone + Eq + Hash>(
    delays: &mut DelayQueue<T>,
    scheduled: &mut HashMap<T, ScheduledEntry, RandomState>,
    request: ScheduleRequest<T>,
) {
    match scheduled.entry(request.key) {
        Entry::Occupied(mut entry) => {
            let entry = entry.get_mut();
            if request.run_at < entry.run_at {
                delays.reset_at(&entry.queue_key, request.run_at);
                entry.run_at = request.run_at;
            }
        }
        Entry::Vacant(entry) => {
            let queue_key = delays.insert_at(entry.key().clone(), request.run_at);
            entry.insert(ScheduledEntry {
                run_at: request.run_at,
                queue_key,
            });
        }
    }
}
