//! The fibre: a suspendable task and its promise frame.
//!
//! A [`Fibre`] owns a boxed future (the fibre body) and a promise holding the
//! state the drivers act on: the pending [`Resumption`], a reschedule request,
//! a captured panic, the owned [`FibreId`], priority, debug name, and a
//! pending move to another scheduler. The suspension points in
//! [`suspend`](crate::suspend) write into the promise through a thread-local
//! slot that [`Fibre::resume`] sets for the duration of each poll.

use crate::id::FibreId;
use crate::migrate::PendingMove;
use crate::resumption::{Reschedule, Resume, Resumption};
use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll, Wake, Waker};

/// Shared promise frame of a fibre.
pub(crate) struct FibrePromise {
    /// When the fibre may next resume. Relative time until the driver rewrites
    /// it after the yield.
    pub(crate) resumption: Resumption,
    /// Requeue request set by a reschedule suspension.
    pub(crate) reschedule: Option<Reschedule>,
    /// Payload of a panic raised inside the fibre body.
    pub(crate) panic: Option<Box<dyn Any + Send>>,
    /// The fibre's identity; running bit cleared when the fibre ends.
    pub(crate) id: FibreId,
    /// Current priority level.
    pub(crate) priority: i32,
    /// Debug name, used in driver logs.
    pub(crate) name: String,
    /// Deferred transfer to another scheduler, attempted by the driver after
    /// the next resume.
    pub(crate) pending_move: Option<PendingMove>,
}

type PromiseCell = Arc<Mutex<FibrePromise>>;

thread_local! {
    static ACTIVE_PROMISE: RefCell<Option<PromiseCell>> = const { RefCell::new(None) };
}

/// Restores the previously active promise on drop.
struct ActivePromiseGuard {
    prev: Option<PromiseCell>,
}

impl Drop for ActivePromiseGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        ACTIVE_PROMISE.with(|slot| *slot.borrow_mut() = prev);
    }
}

fn set_active_promise(promise: PromiseCell) -> ActivePromiseGuard {
    let prev = ACTIVE_PROMISE.with(|slot| slot.borrow_mut().replace(promise));
    ActivePromiseGuard { prev }
}

/// Runs `f` against the promise of the fibre currently being resumed on this
/// thread. Panics when called outside a fibre body - every suspension point
/// requires a driving scheduler.
pub(crate) fn with_active_promise<R>(f: impl FnOnce(&mut FibrePromise) -> R) -> R {
    let cell = ACTIVE_PROMISE
        .with(|slot| slot.borrow().clone())
        .expect("fibre suspension point used outside a fibre body");
    let mut promise = cell.lock().expect("fibre promise lock poisoned");
    f(&mut promise)
}

/// Renders a panic payload for driver logs.
pub(crate) fn describe_panic(payload: Option<&(dyn Any + Send)>) -> String {
    match payload {
        Some(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                (*msg).to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "non-string panic payload".to_string()
            }
        }
        None => "panic payload already taken".to_string(),
    }
}

fn noop_waker() -> Waker {
    struct NoopWake;
    impl Wake for NoopWake {
        fn wake(self: Arc<Self>) {}
    }
    static WAKER: OnceLock<Waker> = OnceLock::new();
    WAKER
        .get_or_init(|| Waker::from(Arc::new(NoopWake)))
        .clone()
}

/// A suspendable task owned by a scheduler.
///
/// Move-only by construction: there is at most one owner, and transferring a
/// fibre between schedulers moves the whole value. A default-constructed
/// fibre is the invalid sentinel queues hand back for cancelled slots.
#[derive(Default)]
pub struct Fibre {
    future: Option<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,
    promise: Option<PromiseCell>,
    cancelled: bool,
}

impl Fibre {
    /// Wraps a fibre body. The fibre starts suspended; its id is already
    /// allocated and flagged running.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = FibreId::allocate();
        id.set_running(true);
        let promise = FibrePromise {
            resumption: Resumption::default(),
            reschedule: None,
            panic: None,
            id,
            priority: 0,
            name: String::new(),
            pending_move: None,
        };
        Self {
            future: Some(Box::pin(body)),
            promise: Some(Arc::new(Mutex::new(promise))),
            cancelled: false,
        }
    }

    /// Returns the fibre's id, or an invalid id for the sentinel fibre.
    #[must_use]
    pub fn id(&self) -> FibreId {
        self.with_promise(FibreId::default, |p| p.id.clone())
    }

    /// Returns the debug name.
    #[must_use]
    pub fn name(&self) -> String {
        self.with_promise(String::new, |p| p.name.clone())
    }

    /// Sets the debug name.
    pub fn set_name(&self, name: &str) {
        self.with_promise(|| (), |p| p.name = name.to_string());
    }

    /// Returns the current priority level.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.with_promise(|| 0, |p| p.priority)
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        self.with_promise(|| (), |p| p.priority = priority);
    }

    /// Returns true when this wrapper holds a fibre (not the sentinel).
    #[must_use]
    pub fn valid(&self) -> bool {
        self.promise.is_some()
    }

    /// True when there is nothing left to resume: sentinel, completed body,
    /// or cancel bit set.
    #[must_use]
    pub fn done(&self) -> bool {
        self.future.is_none() || self.cancelled
    }

    /// Marks the fibre for cancellation; the next [`resume`](Self::resume)
    /// expires it.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Returns true when the cancel bit is set.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Takes the payload of a panic raised inside the fibre body, if any.
    #[must_use]
    pub fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.promise.as_ref().and_then(|cell| {
            cell.lock().expect("fibre promise lock poisoned").panic.take()
        })
    }

    fn with_promise<R>(&self, fallback: impl FnOnce() -> R, f: impl FnOnce(&mut FibrePromise) -> R) -> R {
        match &self.promise {
            Some(cell) => f(&mut cell.lock().expect("fibre promise lock poisoned")),
            None => fallback(),
        }
    }

    fn flag_not_running(&self) {
        self.with_promise(|| (), |p| p.id.set_running(false));
    }

    /// Drives the fibre once against the current epoch time.
    ///
    /// Checks the pending [`Resumption`] first and returns
    /// [`ResumeMode::Sleep`](crate::ResumeMode::Sleep) without polling when it
    /// is unmet. Otherwise polls the body (unless a move is already pending),
    /// captures panics into the promise, attempts any pending move, rewrites a
    /// fresh relative deadline to absolute epoch time, and reports the
    /// disposition to the driver.
    pub fn resume(&mut self, epoch_time_s: f64) -> Resume {
        if self.done() {
            self.flag_not_running();
            return Resume::expire();
        }
        let cell = self
            .promise
            .clone()
            .expect("live fibre without a promise");

        // Evaluate the gate outside the promise lock; conditions are user code.
        let (condition, time_s) = {
            let promise = cell.lock().expect("fibre promise lock poisoned");
            (promise.resumption.condition.clone(), promise.resumption.time_s)
        };
        if let Some(condition) = condition {
            if !condition() && (time_s <= 0.0 || epoch_time_s < time_s) {
                return Resume::sleep();
            }
        } else if epoch_time_s < time_s {
            return Resume::sleep();
        }

        let move_already_pending = {
            let mut promise = cell.lock().expect("fibre promise lock poisoned");
            promise.resumption = Resumption::default();
            promise.pending_move.is_some()
        };

        if !move_already_pending {
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            let future = self.future.as_mut().expect("checked by done()");
            let guard = set_active_promise(cell.clone());
            let polled = catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
            drop(guard);
            match polled {
                Err(payload) => {
                    cell.lock().expect("fibre promise lock poisoned").panic = Some(payload);
                    self.flag_not_running();
                    return Resume::panicked();
                }
                Ok(Poll::Ready(())) => {
                    self.future = None;
                    self.flag_not_running();
                    return Resume::expire();
                }
                Ok(Poll::Pending) => {}
            }
        }

        let pending_move = cell
            .lock()
            .expect("fibre promise lock poisoned")
            .pending_move
            .take();
        if let Some(pending) = pending_move {
            let fibre = std::mem::take(self);
            match pending.attempt(fibre) {
                Ok(()) => return Resume::moved(),
                Err(returned) => {
                    // Target channel full; retry on the next resume.
                    *self = returned;
                    cell.lock().expect("fibre promise lock poisoned").pending_move = Some(pending);
                }
            }
        }

        let mut promise = cell.lock().expect("fibre promise lock poisoned");
        if promise.resumption.time_s > 0.0 {
            promise.resumption.time_s += epoch_time_s;
        }
        Resume::continue_with(promise.reschedule.take())
    }
}

impl Drop for Fibre {
    fn drop(&mut self) {
        // Drop the body before clearing the flag so cleanup guards inside the
        // fibre observe their own fibre as still running.
        self.future = None;
        self.flag_not_running();
    }
}

impl std::fmt::Debug for Fibre {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fibre")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("cancelled", &self.cancelled)
            .field("done", &self.done())
            .finish()
    }
}
