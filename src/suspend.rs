//! Suspension points for fibre bodies.
//!
//! Everything a fibre can await lives here:
//!
//! - [`yield_now`] - resume on the next tick.
//! - [`sleep`] / [`sleep_s`] - resume after a duration of epoch time.
//! - [`wait`] - resume once a predicate returns true.
//! - [`wait_timeout`] - as [`wait`], or after a timeout.
//! - [`join`] - resume once another fibre stops running.
//! - [`reschedule`] - yield and requeue at a new priority.
//! - [`move_to`] - transfer this fibre to another scheduler.
//!
//! `wait`/`wait_timeout`/`join` complete immediately when the condition
//! already holds; the others always suspend once. Each future stores its
//! resumption into the active fibre's promise on first poll, so awaiting them
//! outside a fibre body panics.

use crate::fibre::with_active_promise;
use crate::id::FibreId;
use crate::migrate::{PendingMove, SchedulerType};
use crate::resumption::{QueuePosition, Reschedule, Resumption, WaitCondition};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Suspends the fibre until the next tick.
#[must_use = "suspension points do nothing unless awaited"]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future of [`yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }
        this.yielded = true;
        with_active_promise(|promise| promise.resumption = Resumption::immediate());
        Poll::Pending
    }
}

/// Suspends the fibre for `duration` of epoch time.
#[must_use = "suspension points do nothing unless awaited"]
pub fn sleep(duration: Duration) -> Sleep {
    sleep_s(duration.as_secs_f64())
}

/// Suspends the fibre for `seconds` of epoch time.
///
/// The deadline is measured against the driving scheduler's epoch, so under a
/// simulated clock a "second" is whatever the clock says it is.
#[must_use = "suspension points do nothing unless awaited"]
pub fn sleep_s(seconds: f64) -> Sleep {
    Sleep {
        seconds,
        slept: false,
    }
}

/// Future of [`sleep`] / [`sleep_s`].
#[derive(Debug)]
pub struct Sleep {
    seconds: f64,
    slept: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.slept {
            return Poll::Ready(());
        }
        this.slept = true;
        let seconds = this.seconds;
        with_active_promise(|promise| promise.resumption = Resumption::after(seconds));
        Poll::Pending
    }
}

/// Suspends the fibre until `condition` returns true.
///
/// Completes without suspending when the condition already holds.
#[must_use = "suspension points do nothing unless awaited"]
pub fn wait<F>(condition: F) -> Wait
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    Wait {
        condition: Some(Arc::new(condition)),
        timeout_s: 0.0,
        suspended: false,
    }
}

/// Suspends the fibre until `condition` returns true or `timeout` elapses.
///
/// On timeout the fibre resumes with the predicate unchecked; re-evaluate it
/// to distinguish the two outcomes.
#[must_use = "suspension points do nothing unless awaited"]
pub fn wait_timeout<F>(condition: F, timeout: Duration) -> Wait
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    Wait {
        condition: Some(Arc::new(condition)),
        timeout_s: timeout.as_secs_f64(),
        suspended: false,
    }
}

/// Future of [`wait`] / [`wait_timeout`].
pub struct Wait {
    condition: Option<WaitCondition>,
    timeout_s: f64,
    suspended: bool,
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.suspended {
            return Poll::Ready(());
        }
        let condition = this.condition.take().expect("wait polled after first suspension");
        if condition() {
            return Poll::Ready(());
        }
        this.suspended = true;
        let timeout_s = this.timeout_s;
        with_active_promise(move |promise| {
            promise.resumption = Resumption::when(condition, timeout_s);
        });
        Poll::Pending
    }
}

impl std::fmt::Debug for Wait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wait")
            .field("timeout_s", &self.timeout_s)
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}

/// Returns the id of the fibre currently executing on this thread.
///
/// Panics outside a fibre body.
#[must_use]
pub fn current_fibre_id() -> FibreId {
    with_active_promise(|promise| promise.id.clone())
}

/// Suspends the fibre until the fibre identified by `id` stops running.
///
/// Completes immediately when `id` is invalid or already finished. A fibre
/// joining itself degenerates to [`yield_now`].
#[must_use = "suspension points do nothing unless awaited"]
pub fn join(id: FibreId) -> JoinFibre {
    JoinFibre {
        id: Some(id),
        suspended: false,
    }
}

/// Future of [`join`].
#[derive(Debug)]
pub struct JoinFibre {
    id: Option<FibreId>,
    suspended: bool,
}

impl Future for JoinFibre {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.suspended {
            return Poll::Ready(());
        }
        let id = this.id.take().expect("join polled after first suspension");
        if !id.running() {
            return Poll::Ready(());
        }
        this.suspended = true;
        with_active_promise(move |promise| {
            if promise.id == id {
                // Waiting on ourselves would never release; degrade to a yield.
                promise.resumption = Resumption::immediate();
            } else {
                promise.resumption = Resumption::when(Arc::new(move || !id.running()), 0.0);
            }
        });
        Poll::Pending
    }
}

/// Yields and asks the driver to requeue this fibre at `priority`, joining
/// the queue at `position`.
#[must_use = "suspension points do nothing unless awaited"]
pub fn reschedule(priority: i32, position: QueuePosition) -> RescheduleRequest {
    RescheduleRequest {
        request: Reschedule { priority, position },
        yielded: false,
    }
}

/// Future of [`reschedule`].
#[derive(Debug)]
pub struct RescheduleRequest {
    request: Reschedule,
    yielded: bool,
}

impl Future for RescheduleRequest {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }
        this.yielded = true;
        let request = this.request;
        with_active_promise(move |promise| {
            promise.resumption = Resumption::immediate();
            promise.reschedule = Some(request);
        });
        Poll::Pending
    }
}

/// Transfers this fibre to `target` after the suspension.
///
/// `priority` overrides the fibre's priority on arrival. The transfer is
/// attempted by the source driver right after this suspension; when the
/// target's inbound channel is full the fibre stays on the source and the
/// transfer is retried on every subsequent tick until it lands. The await
/// completes on the target.
#[must_use = "suspension points do nothing unless awaited"]
pub fn move_to<T>(target: &T, priority: Option<i32>) -> MoveTo
where
    T: SchedulerType + ?Sized,
{
    MoveTo {
        pending: Some(PendingMove::new(target.move_endpoint(), priority)),
        suspended: false,
    }
}

/// Future of [`move_to`].
pub struct MoveTo {
    pending: Option<PendingMove>,
    suspended: bool,
}

impl Future for MoveTo {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.suspended {
            return Poll::Ready(());
        }
        this.suspended = true;
        let pending = this.pending.take().expect("move_to polled after first suspension");
        with_active_promise(move |promise| {
            promise.resumption = Resumption::immediate();
            promise.pending_move = Some(pending);
        });
        Poll::Pending
    }
}

impl std::fmt::Debug for MoveTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveTo")
            .field("suspended", &self.suspended)
            .finish_non_exhaustive()
    }
}
