//! Multi-threaded fibre driver.
//!
//! A [`ThreadPool`] drives the same fibres as a
//! [`Scheduler`](crate::Scheduler), but across worker threads pulling from
//! lock-free priority queues. Queue selection is biased, not ordered: each
//! worker walks a precomputed weighted index array in which lower-numeric
//! (higher) priorities appear more often, so low-priority queues can starve
//! while higher ones stay busy.
//!
//! Worker panics never cross thread boundaries: a panicking fibre is always
//! logged and dropped.

use crate::clock::Clock;
use crate::fibre::{describe_panic, Fibre};
use crate::finally::finally;
use crate::id::FibreId;
use crate::log;
use crate::migrate::{MoveEndpoint, MoveSink, SchedulerType};
use crate::queue::SharedQueue;
use crate::resumption::ResumeMode;
use crate::scheduler::SchedulerParams;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Construction parameters for [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolParams {
    /// Queue sizing, priority levels and panic policy. The pool ignores
    /// `move_queue_size` (its priority queues are the inbound move surface)
    /// and `panic_policy` (workers always log).
    pub scheduler: SchedulerParams,
    /// Worker thread count:
    ///
    /// - `None` - all available parallelism
    /// - `Some(n)`, n > 0 - exactly n workers
    /// - `Some(0)` - no workers; the caller drives [`ThreadPool::update`]
    /// - `Some(-n)` - available parallelism minus n, at least 1
    pub worker_count: Option<i32>,
    /// How long workers (and blocked callers) sleep when idle.
    pub idle_sleep_duration: Duration,
}

impl Default for ThreadPoolParams {
    fn default() -> Self {
        Self {
            scheduler: SchedulerParams::default(),
            worker_count: Some(0),
            idle_sleep_duration: Duration::from_millis(1),
        }
    }
}

fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn resolve_worker_count(requested: Option<i32>) -> usize {
    match requested {
        None => available_parallelism(),
        Some(n) if n > 0 => n as usize,
        Some(0) => 0,
        Some(n) => available_parallelism()
            .saturating_sub(n.unsigned_abs() as usize)
            .max(1),
    }
}

/// State shared between the pool handle and its workers.
struct PoolShared {
    queues: Vec<Arc<SharedQueue>>,
    /// Weighted queue-selection array: for N priority levels, index i occurs
    /// N − i times, so the lowest-numeric level is tried most often.
    weights: Vec<usize>,
    paused: AtomicBool,
    quit: AtomicBool,
    idle_sleep: Duration,
    clock: Clock,
}

impl PoolShared {
    fn select_queue_index(&self, priority: i32) -> usize {
        let index = self
            .queues
            .partition_point(|queue| queue.priority() < priority);
        if index == self.queues.len() {
            let fallback = self.queues.len() - 1;
            log::error(&format!(
                "no queue declared for priority {priority}; using level {}",
                self.queues[fallback].priority()
            ));
            return fallback;
        }
        if self.queues[index].priority() != priority {
            log::error(&format!(
                "no queue declared for priority {priority}; using level {}",
                self.queues[index].priority()
            ));
        }
        index
    }

    /// Pops the next fibre, trying queues in weighted rotation. One full pass
    /// over the weight array without a hit means no work is available.
    fn next_fibre(&self, rotation: &mut usize) -> Option<Fibre> {
        for _ in 0..self.weights.len() {
            let queue = self.weights[*rotation];
            *rotation = (*rotation + 1) % self.weights.len();
            if let Some(fibre) = self.queues[queue].pop() {
                if fibre.valid() {
                    return Some(fibre);
                }
            }
        }
        None
    }

    /// Drives one fibre to its next suspension. Returns false when no fibre
    /// was available. A fibre whose requeue target is full is resumed again
    /// rather than dropped.
    fn process_one(&self, rotation: &mut usize) -> bool {
        let Some(mut fibre) = self.next_fibre(rotation) else {
            return false;
        };
        loop {
            let epoch_time_s = self.clock.update();
            let resume = fibre.resume(epoch_time_s);
            match resume.mode {
                ResumeMode::Expire | ResumeMode::Moved => return true,
                ResumeMode::Panicked => {
                    let payload = fibre.take_panic();
                    log::error(&format!(
                        "fibre {} ({}) panicked: {}",
                        fibre.id(),
                        fibre.name(),
                        describe_panic(payload.as_deref())
                    ));
                    return true;
                }
                ResumeMode::Continue | ResumeMode::Sleep => {
                    if let Some(request) = resume.reschedule {
                        if request.priority != fibre.priority() {
                            fibre.set_priority(request.priority);
                        }
                    }
                    let index = self.select_queue_index(fibre.priority());
                    match self.queues[index].try_push(fibre) {
                        Ok(()) => return true,
                        Err(returned) => fibre = returned,
                    }
                }
            }
        }
    }

    fn worker_loop(&self, index: usize) {
        let mut rotation = index % self.weights.len();
        while !self.quit.load(Ordering::Acquire) {
            if self.paused.load(Ordering::Acquire) || !self.process_one(&mut rotation) {
                thread::sleep(self.idle_sleep);
            }
        }
    }
}

/// Endpoint workers and migrating fibres deliver into.
struct PoolEndpoint {
    shared: Arc<PoolShared>,
}

impl MoveSink for PoolEndpoint {
    fn deliver(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        let previous = fibre.priority();
        if let Some(priority) = priority {
            fibre.set_priority(priority);
        }
        let index = self.shared.select_queue_index(fibre.priority());
        self.shared.queues[index].try_push(fibre).map_err(|fibre| {
            fibre.set_priority(previous);
            fibre
        })
    }
}

/// A multi-threaded fibre driver over lock-free priority queues.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates the pool and starts its workers.
    #[must_use]
    pub fn new(params: ThreadPoolParams) -> Self {
        Self::with_clock(params, Clock::new())
    }

    /// Creates the pool with a caller-supplied clock (e.g. simulated time).
    #[must_use]
    pub fn with_clock(params: ThreadPoolParams, clock: Clock) -> Self {
        let levels = params.scheduler.sorted_levels();
        let queues: Vec<Arc<SharedQueue>> = levels
            .iter()
            .map(|&priority| {
                Arc::new(SharedQueue::new(
                    priority,
                    params.scheduler.initial_queue_size,
                ))
            })
            .collect();
        let mut weights = Vec::new();
        for index in 0..queues.len() {
            for _ in 0..queues.len() - index {
                weights.push(index);
            }
        }
        let shared = Arc::new(PoolShared {
            queues,
            weights,
            paused: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            idle_sleep: params.idle_sleep_duration,
            clock,
        });

        let workers = (0..resolve_worker_count(params.worker_count))
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("spindle-worker-{index}"))
                    .spawn(move || shared.worker_loop(index))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Number of worker threads. Zero means the caller must drive
    /// [`update`](Self::update).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Approximate true when every queue is empty. Fibres being resumed on
    /// workers are in no queue, so this can report empty while work is still
    /// in flight.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.shared.queues.iter().all(|queue| queue.is_empty())
    }

    /// Approximate number of queued fibres.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared.queues.iter().map(|queue| queue.len()).sum()
    }

    /// Adds a fibre at `priority` and returns its id.
    ///
    /// Blocks, sleeping the idle interval, while the target queue is full.
    pub fn start(&self, fibre: Fibre, priority: i32, name: &str) -> FibreId {
        fibre.set_priority(priority);
        if !name.is_empty() {
            fibre.set_name(name);
        }
        let id = fibre.id();
        let index = self.shared.select_queue_index(priority);
        let mut pending = fibre;
        loop {
            match self.shared.queues[index].try_push(pending) {
                Ok(()) => return id,
                Err(returned) => {
                    pending = returned;
                    thread::sleep(self.shared.idle_sleep);
                }
            }
        }
    }

    /// Drops every queued fibre. Workers are paused for the duration so they
    /// do not keep requeueing in-flight fibres behind the sweep.
    pub fn cancel_all(&self) {
        self.shared.paused.store(true, Ordering::Release);
        let shared = &self.shared;
        let _resume = finally(|| shared.paused.store(false, Ordering::Release));
        for queue in &shared.queues {
            queue.clear();
        }
    }

    /// Joins the scheduling loop from the calling thread, processing fibres
    /// until `continue_condition` returns false or no work is available.
    ///
    /// Thread-safe so long as the condition is.
    pub fn update<F>(&self, mut continue_condition: F)
    where
        F: FnMut() -> bool,
    {
        let mut rotation = 0;
        while continue_condition() {
            if !self.shared.process_one(&mut rotation) {
                break;
            }
        }
    }

    /// [`update`](Self::update) bounded by a time slice instead of a
    /// predicate.
    pub fn update_for(&self, time_slice: Duration) {
        let deadline = Instant::now() + time_slice;
        self.update(|| Instant::now() < deadline);
    }

    /// Polls until every queue is empty or `timeout` elapses, sleeping the
    /// idle interval between polls. `None` waits indefinitely.
    ///
    /// Returns the final [`empty`](Self::empty) observation. Unreliable by
    /// design: fibres on workers are in no queue, so true does not prove all
    /// work finished.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.empty() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            thread::sleep(self.shared.idle_sleep);
        }
        self.empty()
    }
}

impl SchedulerType for ThreadPool {
    fn move_fibre(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        PoolEndpoint {
            shared: Arc::clone(&self.shared),
        }
        .deliver(fibre, priority)
    }

    fn move_endpoint(&self) -> MoveEndpoint {
        MoveEndpoint::new(Arc::new(PoolEndpoint {
            shared: Arc::clone(&self.shared),
        }))
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        self.cancel_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field(
                "levels",
                &self
                    .shared
                    .queues
                    .iter()
                    .map(|q| q.priority())
                    .collect::<Vec<_>>(),
            )
            .field("workers", &self.workers.len())
            .field("running_count", &self.running_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::yield_now;
    use std::sync::atomic::AtomicUsize;

    fn pool_params(levels: Vec<i32>, workers: Option<i32>) -> ThreadPoolParams {
        ThreadPoolParams {
            scheduler: SchedulerParams {
                priority_levels: levels,
                ..SchedulerParams::default()
            },
            worker_count: workers,
            idle_sleep_duration: Duration::from_millis(1),
        }
    }

    #[test]
    fn worker_count_resolution() {
        assert_eq!(resolve_worker_count(Some(0)), 0);
        assert_eq!(resolve_worker_count(Some(3)), 3);
        assert_eq!(resolve_worker_count(None), available_parallelism());
        assert_eq!(
            resolve_worker_count(Some(-1)),
            available_parallelism().saturating_sub(1).max(1)
        );
        assert_eq!(resolve_worker_count(Some(-1_000)), 1);
    }

    #[test]
    fn weighted_selection_array_biases_high_priority() {
        let pool = ThreadPool::new(pool_params(vec![0, 10, 20], Some(0)));
        assert_eq!(pool.shared.weights, vec![0, 0, 0, 1, 1, 2]);
    }

    #[test]
    fn caller_driven_update_drains_fibres() {
        let pool = ThreadPool::new(pool_params(vec![0], Some(0)));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counted = counter.clone();
            pool.start(
                Fibre::new(async move {
                    yield_now().await;
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
                0,
                "",
            );
        }
        assert_eq!(pool.running_count(), 8);
        pool.update(|| true);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert!(pool.empty());
    }

    #[test]
    fn start_returns_running_id() {
        let pool = ThreadPool::new(pool_params(vec![0], Some(0)));
        let id = pool.start(Fibre::new(async {}), 0, "probe");
        assert!(id.running());
        pool.update(|| true);
        assert!(!id.running());
    }

    #[test]
    fn cancel_all_clears_queues_and_releases_ids() {
        let pool = ThreadPool::new(pool_params(vec![0], Some(0)));
        let ids: Vec<_> = (0..4)
            .map(|_| {
                pool.start(
                    Fibre::new(async {
                        loop {
                            yield_now().await;
                        }
                    }),
                    0,
                    "",
                )
            })
            .collect();
        pool.cancel_all();
        assert!(pool.empty());
        for id in &ids {
            assert!(!id.running());
        }
        assert!(!pool.shared.paused.load(Ordering::Acquire));
    }

    #[test]
    fn undeclared_priority_selects_lower_bound_queue() {
        let pool = ThreadPool::new(pool_params(vec![0, 100], Some(0)));
        pool.start(Fibre::new(async {}), 55, "");
        assert_eq!(pool.shared.queues[1].len(), 1);
        pool.start(Fibre::new(async {}), 400, "");
        assert_eq!(pool.shared.queues[1].len(), 2);
    }

    #[test]
    fn worker_panic_is_logged_not_propagated() {
        let pool = ThreadPool::new(pool_params(vec![0], Some(0)));
        let id = pool.start(
            Fibre::new(async {
                panic!("worker fibre panic");
            }),
            0,
            "doomed",
        );
        // Driven from this thread; the panic must not escape update.
        pool.update(|| true);
        assert!(!id.running());
        assert!(pool.empty());
    }
}
