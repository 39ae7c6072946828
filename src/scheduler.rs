//! Single-threaded fibre scheduler.
//!
//! A [`Scheduler`] drives cooperative fibres from one thread. It owns an
//! ordered fan of FIFO queues, one per declared priority level, and drains
//! them lowest-numeric-first on every [`update`](Scheduler::update). Fibres
//! must cede control regularly; there is no preemption, so a blocking fibre
//! stalls the whole scheduler.
//!
//! The one thread-safe surface is the inbound move channel: other schedulers
//! (and [`SchedulerHandle`]s on any thread) push fibres onto it, and the
//! owning scheduler folds them into its priority queues at the top of each
//! tick and between fibre resumes.
//!
//! ```no_run
//! use spindle::{Fibre, Scheduler, SchedulerParams};
//!
//! let mut scheduler = Scheduler::new(SchedulerParams::default());
//! scheduler.start(
//!     Fibre::new(async {
//!         spindle::suspend::sleep_s(1.0).await;
//!     }),
//!     0,
//!     "napper",
//! );
//! while !scheduler.empty() {
//!     scheduler.update();
//! }
//! ```

use crate::clock::Clock;
use crate::fibre::{describe_panic, Fibre};
use crate::id::FibreId;
use crate::log;
use crate::migrate::{MoveEndpoint, MoveSink, SchedulerType};
use crate::queue::{FibreQueue, SharedQueue};
use crate::resumption::{QueuePosition, ResumeMode};
use std::sync::Arc;

/// What [`Scheduler::update`] does with a fibre panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Log the payload and drop the fibre.
    #[default]
    Log,
    /// Re-raise the payload out of `update`; the caller catches it. The
    /// panicking fibre is dropped either way.
    Propagate,
}

/// Construction parameters for [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerParams {
    /// Initial capacity of each priority queue. Queues grow by doubling.
    pub initial_queue_size: usize,
    /// Fixed capacity of the inbound move channel.
    pub move_queue_size: usize,
    /// Priority levels to create queues for, lowest numeric draining first.
    /// An empty list means a single queue at priority 0.
    pub priority_levels: Vec<i32>,
    /// Disposition of fibre panics.
    pub panic_policy: PanicPolicy,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            initial_queue_size: 1024,
            move_queue_size: 256,
            priority_levels: Vec::new(),
            panic_policy: PanicPolicy::default(),
        }
    }
}

impl SchedulerParams {
    pub(crate) fn sorted_levels(&self) -> Vec<i32> {
        let mut levels = self.priority_levels.clone();
        if levels.is_empty() {
            levels.push(0);
        }
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

/// Epoch time of the most recent tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Time {
    /// Epoch of the last `update`, in seconds.
    pub epoch_time_s: f64,
    /// Seconds elapsed between the last two updates.
    pub dt: f64,
}

/// A single-threaded multi-priority fibre driver.
pub struct Scheduler {
    queues: Vec<FibreQueue>,
    move_channel: Arc<SharedQueue>,
    clock: Clock,
    time: Time,
    panic_policy: PanicPolicy,
}

impl Scheduler {
    /// Creates a scheduler with its priority queues built eagerly.
    #[must_use]
    pub fn new(params: SchedulerParams) -> Self {
        let queues = params
            .sorted_levels()
            .into_iter()
            .map(|priority| FibreQueue::new(priority, params.initial_queue_size))
            .collect();
        Self {
            queues,
            move_channel: Arc::new(SharedQueue::new(0, params.move_queue_size)),
            clock: Clock::new(),
            time: Time::default(),
            panic_policy: params.panic_policy,
        }
    }

    /// Replaces the clock used by [`update`](Self::update), e.g. with a
    /// simulated time source.
    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
    }

    /// Returns true when no fibres are queued or inbound.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.running_count() == 0
    }

    /// Number of fibres held by this scheduler, inbound moves included.
    /// Cancelled-in-place entries count until their slot is popped.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.queues.iter().map(FibreQueue::len).sum::<usize>() + self.move_channel.len()
    }

    /// Returns true when a fibre with `id` sits in one of the priority
    /// queues.
    #[must_use]
    pub fn contains(&self, id: &FibreId) -> bool {
        self.queues.iter().any(|queue| queue.contains(id))
    }

    /// Epoch and delta of the most recent tick.
    #[must_use]
    pub fn time(&self) -> Time {
        self.time
    }

    /// Returns a clonable handle for starting and migrating fibres from
    /// other threads or from inside running fibres. Deliveries land on the
    /// move channel and join the priority queues on the next tick.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            move_channel: Arc::clone(&self.move_channel),
        }
    }

    /// Adds a fibre at `priority` and returns its id.
    ///
    /// When `priority` names no declared queue the closest lower-bound queue
    /// takes the fibre and an error is logged.
    pub fn start(&mut self, fibre: Fibre, priority: i32, name: &str) -> FibreId {
        fibre.set_priority(priority);
        if !name.is_empty() {
            fibre.set_name(name);
        }
        let id = fibre.id();
        let index = self.select_queue_index(priority);
        self.queues[index].push(fibre, QueuePosition::Back);
        id
    }

    /// Cancels a queued fibre, dropping it in place. Returns whether a fibre
    /// matching `id` was found; repeat calls return false.
    pub fn cancel(&mut self, id: &FibreId) -> bool {
        self.queues.iter_mut().any(|queue| queue.cancel(id))
    }

    /// Cancels every id in `ids`, returning how many were found.
    pub fn cancel_many(&mut self, ids: &[FibreId]) -> usize {
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Drops every fibre, queued or inbound.
    pub fn cancel_all(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.move_channel.clear();
    }

    /// Runs one tick against the scheduler's own [`Clock`].
    pub fn update(&mut self) {
        let epoch_time_s = self.clock.update();
        self.update_with(epoch_time_s);
    }

    /// Runs one tick at the caller-supplied epoch time, which must be
    /// monotonically non-decreasing across calls.
    ///
    /// Drains the move channel, then each priority queue in ascending
    /// order. Per queue, the number of pops is the queue's size at the start
    /// of the drain plus the number of entries that expired during it, so
    /// expirations do not cut the drain short and fibres rescheduled into the
    /// queue mid-tick can run within the tick. The move channel is pumped
    /// between resumes so a full channel elsewhere cannot deadlock two
    /// schedulers migrating toward each other.
    ///
    /// With [`PanicPolicy::Propagate`] a fibre panic re-raises here.
    pub fn update_with(&mut self, epoch_time_s: f64) {
        self.time = Time {
            dt: epoch_time_s - self.time.epoch_time_s,
            epoch_time_s,
        };
        self.pump_move_channel();
        for index in 0..self.queues.len() {
            self.drain_queue(index, epoch_time_s);
        }
    }

    fn drain_queue(&mut self, index: usize, epoch_time_s: f64) {
        let initial = self.queues[index].len();
        let mut expired = 0usize;
        let mut processed = 0usize;
        while processed < initial + expired {
            self.pump_move_channel();
            let Some(mut fibre) = self.queues[index].pop() else {
                break;
            };
            processed += 1;
            if !fibre.valid() || fibre.cancelled() {
                expired += 1;
                continue;
            }
            let resume = fibre.resume(epoch_time_s);
            match resume.mode {
                ResumeMode::Expire | ResumeMode::Moved => expired += 1,
                ResumeMode::Panicked => {
                    let payload = fibre.take_panic();
                    match self.panic_policy {
                        PanicPolicy::Log => {
                            log::error(&format!(
                                "fibre {} ({}) panicked: {}",
                                fibre.id(),
                                fibre.name(),
                                describe_panic(payload.as_deref())
                            ));
                            expired += 1;
                        }
                        PanicPolicy::Propagate => {
                            drop(fibre);
                            let payload: Box<dyn std::any::Any + Send> = match payload {
                                Some(payload) => payload,
                                None => Box::new("fibre panicked".to_string()),
                            };
                            std::panic::resume_unwind(payload);
                        }
                    }
                }
                ResumeMode::Continue | ResumeMode::Sleep => match resume.reschedule {
                    Some(request) => {
                        let target = self.select_queue_index(request.priority);
                        if target != index {
                            fibre.set_priority(request.priority);
                        }
                        self.queues[target].push(fibre, request.position);
                    }
                    None => self.queues[index].push(fibre, QueuePosition::Back),
                },
            }
        }
    }

    fn pump_move_channel(&mut self) {
        while let Some(fibre) = self.move_channel.pop() {
            if !fibre.valid() {
                continue;
            }
            let index = self.select_queue_index(fibre.priority());
            self.queues[index].push(fibre, QueuePosition::Back);
        }
    }

    fn select_queue_index(&self, priority: i32) -> usize {
        let index = self.queues.partition_point(|queue| queue.priority() < priority);
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
}

impl SchedulerType for Scheduler {
    fn move_fibre(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        self.handle().move_fibre(fibre, priority)
    }

    fn move_endpoint(&self) -> MoveEndpoint {
        self.handle().move_endpoint()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("levels", &self.queues.iter().map(FibreQueue::priority).collect::<Vec<_>>())
            .field("running_count", &self.running_count())
            .field("time", &self.time)
            .finish()
    }
}

/// A clonable, `Send` handle to a [`Scheduler`]'s move channel.
///
/// Lets running fibres (which cannot hold `&mut Scheduler`) and other threads
/// start fibres on the scheduler, and serves as the migration target for
/// [`move_to`](crate::suspend::move_to). Deliveries are bounded by the move
/// channel capacity and fail rather than block.
#[derive(Clone)]
pub struct SchedulerHandle {
    move_channel: Arc<SharedQueue>,
}

impl SchedulerHandle {
    /// Hands a new fibre to the scheduler via its move channel. The fibre
    /// joins its priority queue on the scheduler's next tick.
    ///
    /// Fails when the move channel is saturated, returning the fibre intact.
    pub fn start(&self, fibre: Fibre, priority: i32, name: &str) -> Result<FibreId, Fibre> {
        fibre.set_priority(priority);
        if !name.is_empty() {
            fibre.set_name(name);
        }
        let id = fibre.id();
        self.move_channel.try_push(fibre).map(|()| id)
    }
}

impl MoveSink for SchedulerHandle {
    fn deliver(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        let previous = fibre.priority();
        if let Some(priority) = priority {
            fibre.set_priority(priority);
        }
        self.move_channel.try_push(fibre).map_err(|fibre| {
            fibre.set_priority(previous);
            fibre
        })
    }
}

impl SchedulerType for SchedulerHandle {
    fn move_fibre(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        self.deliver(fibre, priority)
    }

    fn move_endpoint(&self) -> MoveEndpoint {
        MoveEndpoint::new(Arc::new(self.clone()))
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::{reschedule, yield_now};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn recording_fibre(tag: i32, order: Arc<Mutex<Vec<i32>>>) -> Fibre {
        Fibre::new(async move {
            order.lock().unwrap().push(tag);
        })
    }

    #[test]
    fn drains_queues_in_ascending_priority_order() {
        let mut scheduler = Scheduler::new(SchedulerParams {
            priority_levels: vec![10, -5, 0],
            ..SchedulerParams::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        scheduler.start(recording_fibre(10, order.clone()), 10, "");
        scheduler.start(recording_fibre(-5, order.clone()), -5, "");
        scheduler.start(recording_fibre(0, order.clone()), 0, "");

        scheduler.update_with(0.0);
        assert_eq!(*order.lock().unwrap(), vec![-5, 0, 10]);
        assert!(scheduler.empty());
    }

    #[test]
    fn undeclared_priority_falls_back_to_lower_bound() {
        let mut scheduler = Scheduler::new(SchedulerParams {
            priority_levels: vec![0, 100],
            ..SchedulerParams::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        // 50 is undeclared: lower bound is the 100 queue.
        scheduler.start(recording_fibre(50, order.clone()), 50, "");
        scheduler.start(recording_fibre(0, order.clone()), 0, "");
        // 200 is past every declared level: the last queue takes it.
        scheduler.start(recording_fibre(200, order.clone()), 200, "");

        scheduler.update_with(0.0);
        assert_eq!(*order.lock().unwrap(), vec![0, 50, 200]);
    }

    #[test]
    fn yielding_fibre_survives_ticks_until_done() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        let counter = Arc::new(AtomicUsize::new(0));
        let counted = counter.clone();
        let id = scheduler.start(
            Fibre::new(async move {
                for _ in 0..3 {
                    counted.fetch_add(1, Ordering::SeqCst);
                    yield_now().await;
                }
            }),
            0,
            "ticker",
        );

        let mut ticks = 0;
        while id.running() && ticks < 10 {
            scheduler.update_with(ticks as f64);
            ticks += 1;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!id.running());
        assert!(scheduler.empty());
    }

    #[test]
    fn reschedule_moves_fibre_across_queues() {
        let mut scheduler = Scheduler::new(SchedulerParams {
            priority_levels: vec![0, 5],
            ..SchedulerParams::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        let log = order.clone();
        scheduler.start(
            Fibre::new(async move {
                log.lock().unwrap().push("before");
                reschedule(5, QueuePosition::Back).await;
                log.lock().unwrap().push("after");
            }),
            0,
            "",
        );
        let witness = order.clone();
        scheduler.start(
            Fibre::new(async move {
                witness.lock().unwrap().push("witness");
                yield_now().await;
            }),
            5,
            "",
        );

        // Tick 1: priority-0 fibre runs, requests the 5 queue; the witness in
        // queue 5 runs after it; the rescheduled fibre joined queue 5 during
        // the drain and so also completes within the tick.
        scheduler.update_with(0.0);
        assert_eq!(*order.lock().unwrap(), vec!["before", "witness", "after"]);
    }

    #[test]
    fn cancel_is_idempotent_and_drops_the_fibre() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        let id = scheduler.start(
            Fibre::new(async {
                loop {
                    yield_now().await;
                }
            }),
            0,
            "",
        );
        scheduler.update_with(0.0);
        assert!(id.running());

        assert!(scheduler.cancel(&id));
        assert!(!id.running(), "cancel drops the fibre in place");
        assert!(!scheduler.cancel(&id));

        scheduler.update_with(1.0);
        assert!(scheduler.empty());
    }

    #[test]
    fn cancel_all_releases_every_id() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        let ids: Vec<FibreId> = (0..4)
            .map(|_| {
                scheduler.start(
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
        scheduler.update_with(0.0);
        scheduler.cancel_all();
        assert!(scheduler.empty());
        for id in &ids {
            assert!(!id.running());
        }
    }

    #[test]
    fn handle_start_lands_on_next_tick() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        let handle = scheduler.handle();
        let ran = Arc::new(AtomicUsize::new(0));
        let counted = ran.clone();
        let id = handle
            .start(
                Fibre::new(async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                }),
                0,
                "via-handle",
            )
            .expect("move channel has room");
        assert!(id.running());
        assert_eq!(scheduler.running_count(), 1);

        scheduler.update_with(0.0);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(scheduler.empty());
    }

    #[test]
    fn dropping_scheduler_releases_fibres() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        let id = scheduler.start(
            Fibre::new(async {
                loop {
                    yield_now().await;
                }
            }),
            0,
            "",
        );
        scheduler.update_with(0.0);
        assert!(id.running());
        drop(scheduler);
        assert!(!id.running());
    }

    #[test]
    fn time_reports_epoch_and_dt() {
        let mut scheduler = Scheduler::new(SchedulerParams::default());
        scheduler.update_with(1.0);
        scheduler.update_with(1.25);
        let time = scheduler.time();
        assert_eq!(time.epoch_time_s, 1.25);
        assert!((time.dt - 0.25).abs() < 1e-12);
    }
}
