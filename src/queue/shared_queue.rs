//! Bounded lock-free MPMC fibre queue.

use crate::fibre::Fibre;
use crossbeam_queue::ArrayQueue;

/// A fixed-capacity, lock-free, multi-producer multi-consumer queue of
/// fibres, labelled with the priority level it serves.
///
/// Every live fibre is owned by exactly one place at any instant: a [`Fibre`]
/// wrapper somewhere, or a slot in one of these queues. [`try_push`]
/// transfers ownership in on success and hands the wrapper back intact on
/// failure, so a saturated queue never loses a fibre.
///
/// Thread pools use one per priority level; single-threaded schedulers use
/// one as their inbound move channel.
///
/// [`try_push`]: Self::try_push
pub struct SharedQueue {
    queue: ArrayQueue<Fibre>,
    priority: i32,
}

impl SharedQueue {
    /// Creates a queue for `priority` holding at most `capacity` fibres.
    #[must_use]
    pub fn new(priority: i32, capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            priority,
        }
    }

    /// The priority level this queue serves.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Approximate number of queued fibres.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Approximate emptiness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Attempts to enqueue `fibre`. On success ownership transfers into the
    /// queue; on failure (queue full) the fibre comes back unchanged.
    pub fn try_push(&self, fibre: Fibre) -> Result<(), Fibre> {
        self.queue.push(fibre)
    }

    /// Removes and returns the oldest fibre, or `None` when empty.
    pub fn pop(&self) -> Option<Fibre> {
        self.queue.pop()
    }

    /// Drains and drops every queued fibre.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

impl std::fmt::Debug for SharedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedQueue")
            .field("priority", &self.priority)
            .field("len", &self.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}
