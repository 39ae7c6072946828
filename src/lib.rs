//! Spindle: a cooperative fibre runtime.
//!
//! # Overview
//!
//! A fibre is a task that yields control explicitly; the runtime multiplexes
//! many fibres over one or many OS threads. Two drivers share one fibre
//! abstraction:
//!
//! - [`Scheduler`] - single-threaded, draining a priority-ordered fan of FIFO
//!   queues on every tick.
//! - [`ThreadPool`] - N workers pulling from lock-free queues with weighted
//!   priority selection.
//!
//! Fibres sleep for wall-clock durations, wait on predicates, await other
//! fibres, requeue themselves at new priorities, and migrate between
//! schedulers over lock-free move channels. There is no preemption: a fibre
//! that does not yield stalls its driver.
//!
//! # Writing a fibre
//!
//! A fibre body is any `async` block built from the suspension points in
//! [`suspend`]:
//!
//! ```no_run
//! use spindle::suspend::{sleep_s, yield_now};
//! use spindle::{Fibre, Scheduler, SchedulerParams};
//!
//! let mut scheduler = Scheduler::new(SchedulerParams::default());
//! let id = scheduler.start(
//!     Fibre::new(async {
//!         yield_now().await;      // resume next tick
//!         sleep_s(0.5).await;     // resume after half a second of epoch time
//!     }),
//!     0,
//!     "example",
//! );
//! while id.running() {
//!     scheduler.update();
//! }
//! ```
//!
//! # Module structure
//!
//! - [`id`]: shared fibre identifiers with a running flag
//! - [`resumption`]: resumption values and driver verdicts
//! - [`fibre`]: the fibre wrapper and its resume state machine
//! - [`suspend`]: the suspension vocabulary fibre bodies await
//! - [`queue`]: ring-buffer and lock-free fibre queues
//! - [`clock`]: monotonic, replaceable time source
//! - [`scheduler`]: the single-threaded driver
//! - [`pool`]: the multi-threaded driver
//! - [`migrate`]: the cross-scheduler migration contract
//! - [`log`]: process-wide leveled log hook
//! - [`finally`]: scoped release guard

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod clock;
pub mod fibre;
pub mod finally;
pub mod id;
pub mod log;
pub mod migrate;
pub mod pool;
pub mod queue;
pub mod resumption;
pub mod scheduler;
pub mod suspend;

pub use clock::Clock;
pub use fibre::Fibre;
pub use finally::{finally, Finally};
pub use id::FibreId;
pub use migrate::{MoveEndpoint, SchedulerType};
pub use pool::{ThreadPool, ThreadPoolParams};
pub use queue::{FibreQueue, SharedQueue};
pub use resumption::{QueuePosition, Reschedule, Resume, ResumeMode, Resumption, WaitCondition};
pub use scheduler::{PanicPolicy, Scheduler, SchedulerHandle, SchedulerParams, Time};
pub use suspend::{
    current_fibre_id, join, move_to, reschedule, sleep, sleep_s, wait, wait_timeout, yield_now,
};
