//! Fibre queues: the single-threaded ring buffer behind each scheduler
//! priority level, and the lock-free shared queue behind thread pools and
//! move channels.

mod fibre_queue;
mod shared_queue;

pub use fibre_queue::FibreQueue;
pub use shared_queue::SharedQueue;
