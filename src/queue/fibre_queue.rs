//! Single-threaded fibre ring buffer.

use crate::fibre::Fibre;
use crate::id::FibreId;
use crate::resumption::QueuePosition;

const MIN_CAPACITY: usize = 16;

/// A FIFO ring buffer of owned fibres with front/back insertion and in-place
/// cancellation, labelled with the priority level it serves.
///
/// Capacity is always a power of two of at least 16, so neighbour indices are
/// a mask away. One slot is kept free to distinguish full from empty; pushing
/// into a full ring doubles the buffer, preserving FIFO order.
pub struct FibreQueue {
    buffer: Vec<Fibre>,
    head: usize,
    tail: usize,
    priority: i32,
}

impl FibreQueue {
    /// Creates a queue for `priority` with at least `capacity` slots.
    #[must_use]
    pub fn new(priority: i32, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let mut buffer = Vec::new();
        buffer.resize_with(capacity, Fibre::default);
        Self {
            buffer,
            head: 0,
            tail: 0,
            priority,
        }
    }

    /// The priority level this queue serves. A label only; the queue itself
    /// never compares priorities.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of occupied slots, cancelled placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & self.mask()
    }

    /// Returns true when no slots are occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        self.next_index(self.head) == self.tail
    }

    fn mask(&self) -> usize {
        self.buffer.len() - 1
    }

    fn next_index(&self, index: usize) -> usize {
        index.wrapping_add(1) & self.mask()
    }

    fn prior_index(&self, index: usize) -> usize {
        index.wrapping_sub(1) & self.mask()
    }

    /// Returns true when a fibre with `id` occupies a slot.
    #[must_use]
    pub fn contains(&self, id: &FibreId) -> bool {
        if !id.valid() {
            return false;
        }
        let mut index = self.tail;
        while index != self.head {
            if self.buffer[index].id() == *id {
                return true;
            }
            index = self.next_index(index);
        }
        false
    }

    /// Appends `fibre`, or prepends it when `position` is
    /// [`QueuePosition::Front`]. Grows when full.
    pub fn push(&mut self, fibre: Fibre, position: QueuePosition) {
        if self.is_full() {
            self.grow();
        }
        match position {
            QueuePosition::Back => {
                let insert = self.head;
                self.head = self.next_index(self.head);
                self.buffer[insert] = fibre;
            }
            QueuePosition::Front => {
                let insert = self.prior_index(self.tail);
                self.buffer[insert] = fibre;
                self.tail = insert;
            }
        }
    }

    /// Removes and returns the oldest entry. A cancelled slot comes back as
    /// an invalid fibre, which drivers treat as a no-op; `None` means the
    /// queue is empty.
    pub fn pop(&mut self) -> Option<Fibre> {
        if self.is_empty() {
            return None;
        }
        let fibre = std::mem::take(&mut self.buffer[self.tail]);
        self.tail = self.next_index(self.tail);
        Some(fibre)
    }

    /// Replaces the entry matching `id` with an invalid placeholder, dropping
    /// the fibre in place. Slot count is unchanged. Returns whether a match
    /// was found.
    pub fn cancel(&mut self, id: &FibreId) -> bool {
        if !id.valid() {
            return false;
        }
        let mut index = self.tail;
        while index != self.head {
            if self.buffer[index].id() == *id {
                self.buffer[index] = Fibre::default();
                return true;
            }
            index = self.next_index(index);
        }
        false
    }

    /// Drops every entry and resets the indices. Capacity is retained.
    pub fn clear(&mut self) {
        let capacity = self.buffer.len();
        self.buffer.clear();
        self.buffer.resize_with(capacity, Fibre::default);
        self.head = 0;
        self.tail = 0;
    }

    fn grow(&mut self) {
        let mut grown = Vec::new();
        grown.resize_with(self.buffer.len() * 2, Fibre::default);
        let mut count = 0;
        while let Some(fibre) = self.pop() {
            grown[count] = fibre;
            count += 1;
        }
        self.buffer = grown;
        self.tail = 0;
        self.head = count;
    }
}

impl std::fmt::Debug for FibreQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FibreQueue")
            .field("priority", &self.priority)
            .field("len", &self.len())
            .field("capacity", &self.buffer.len())
            .finish()
    }
}
