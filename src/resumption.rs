//! Resumption values: "when may this fibre resume".
//!
//! A [`Resumption`] carries an optional predicate and a deadline in seconds.
//! Fibre suspension points store one into the fibre's promise; the driver
//! consults it before resuming. Deadlines are written as *relative* durations
//! by the fibre and rewritten to *absolute* epoch times by the driver
//! immediately after the fibre yields.

use std::sync::Arc;

/// Predicate gating a fibre's resumption.
pub type WaitCondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// When a suspended fibre may resume.
///
/// The fibre may resume when the predicate is present and returns true, or
/// when the predicate is absent and `now >= time_s`, or when the predicate
/// returns false but `time_s > 0` and `now >= time_s` (a wait with timeout).
#[derive(Clone, Default)]
pub struct Resumption {
    /// Deadline in seconds. Relative when stored by a suspension point,
    /// absolute epoch time once the driver has rewritten it.
    pub time_s: f64,
    /// Optional resumption predicate.
    pub condition: Option<WaitCondition>,
}

impl Resumption {
    /// Resume on the very next tick.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Resume after `seconds` of epoch time.
    #[must_use]
    pub fn after(seconds: f64) -> Self {
        Self {
            time_s: seconds,
            condition: None,
        }
    }

    /// Resume once `condition` returns true, or after `timeout_s` when
    /// positive.
    #[must_use]
    pub fn when(condition: WaitCondition, timeout_s: f64) -> Self {
        Self {
            time_s: timeout_s,
            condition: Some(condition),
        }
    }
}

impl std::fmt::Debug for Resumption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resumption")
            .field("time_s", &self.time_s)
            .field("condition", &self.condition.as_ref().map(|_| ".."))
            .finish()
    }
}

/// End of a priority queue targeted by an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePosition {
    /// Append after existing entries (FIFO).
    #[default]
    Back,
    /// Insert before existing entries.
    Front,
}

/// A request, made by a running fibre, to be requeued at a new priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reschedule {
    /// Target priority level.
    pub priority: i32,
    /// Which end of the target queue to join.
    pub position: QueuePosition,
}

/// What the driver should do with a fibre after [`resume`](crate::Fibre::resume).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// The fibre finished, was cancelled, or was dropped by policy. Discard it.
    Expire,
    /// The resumption condition is unmet; requeue without having polled.
    Sleep,
    /// The fibre ran and yielded again; requeue, honouring any reschedule.
    Continue,
    /// Ownership was transferred to another scheduler. Do not requeue.
    Moved,
    /// The fibre panicked; the payload is held in its promise.
    Panicked,
}

/// Result of driving a fibre once.
#[derive(Debug)]
pub struct Resume {
    /// Disposition of the fibre.
    pub mode: ResumeMode,
    /// Requeue request carried out of a [`ResumeMode::Continue`].
    pub reschedule: Option<Reschedule>,
}

impl Resume {
    pub(crate) fn expire() -> Self {
        Self {
            mode: ResumeMode::Expire,
            reschedule: None,
        }
    }

    pub(crate) fn sleep() -> Self {
        Self {
            mode: ResumeMode::Sleep,
            reschedule: None,
        }
    }

    pub(crate) fn moved() -> Self {
        Self {
            mode: ResumeMode::Moved,
            reschedule: None,
        }
    }

    pub(crate) fn panicked() -> Self {
        Self {
            mode: ResumeMode::Panicked,
            reschedule: None,
        }
    }

    pub(crate) fn continue_with(reschedule: Option<Reschedule>) -> Self {
        Self {
            mode: ResumeMode::Continue,
            reschedule,
        }
    }
}
