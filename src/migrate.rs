//! Cross-scheduler migration.
//!
//! Any driver that can accept ownership of a fibre implements
//! [`SchedulerType`]. A fibre awaiting [`move_to`](crate::suspend::move_to)
//! captures the target's [`MoveEndpoint`] - a cheap, clonable, `'static`
//! handle - in its promise; the source driver invokes it right after the next
//! resume. Delivery either succeeds (ownership transfers, the source sees
//! [`ResumeMode::Moved`](crate::ResumeMode::Moved)) or fails with the fibre
//! handed back for a retry on the following tick.

use crate::fibre::Fibre;
use std::sync::Arc;

/// Destination-side delivery of a migrating fibre.
pub(crate) trait MoveSink: Send + Sync {
    /// Takes ownership of `fibre`, optionally overriding its priority on
    /// arrival. On failure the fibre is returned to the caller unchanged.
    fn deliver(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre>;
}

/// A clonable handle through which fibres are delivered to a scheduler.
///
/// Obtained from [`SchedulerType::move_endpoint`]; held by pending moves
/// across suspensions and threads.
#[derive(Clone)]
pub struct MoveEndpoint {
    sink: Arc<dyn MoveSink>,
}

impl MoveEndpoint {
    pub(crate) fn new(sink: Arc<dyn MoveSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn deliver(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        self.sink.deliver(fibre, priority)
    }
}

impl std::fmt::Debug for MoveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveEndpoint").finish_non_exhaustive()
    }
}

/// A scheduler that fibres can migrate to.
pub trait SchedulerType {
    /// Attempts to take ownership of `fibre`, optionally overriding its
    /// priority on arrival. Failure (a saturated inbound channel) returns the
    /// fibre intact so the source can retry.
    fn move_fibre(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre>;

    /// Returns the delivery handle a pending move holds across suspension.
    fn move_endpoint(&self) -> MoveEndpoint;
}

impl SchedulerType for MoveEndpoint {
    fn move_fibre(&self, fibre: Fibre, priority: Option<i32>) -> Result<(), Fibre> {
        self.deliver(fibre, priority)
    }

    fn move_endpoint(&self) -> MoveEndpoint {
        self.clone()
    }
}

/// A deferred transfer captured on a fibre's promise at the `move_to`
/// suspension point.
pub(crate) struct PendingMove {
    endpoint: MoveEndpoint,
    priority: Option<i32>,
}

impl PendingMove {
    pub(crate) fn new(endpoint: MoveEndpoint, priority: Option<i32>) -> Self {
        Self { endpoint, priority }
    }

    /// Attempts the transfer. `Err` hands the fibre back so the pending move
    /// can be restored for the next tick.
    pub(crate) fn attempt(&self, fibre: Fibre) -> Result<(), Fibre> {
        self.endpoint.deliver(fibre, self.priority)
    }
}
