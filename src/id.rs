//! Fibre identifiers.
//!
//! A [`FibreId`] is a shared handle over a single 64-bit cell. The low bit is
//! the mutable *running* flag; the remaining bits are the immutable identity.
//! Every clone of an id observes writes to the running flag, which is how
//! awaiting another fibre's completion works without any channel between the
//! two schedulers involved.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Raw value stored in a fibre id cell.
pub type IdValue = u64;

/// Sentinel cell value marking an invalid id.
pub const INVALID_FIBRE: IdValue = IdValue::MAX;

/// Bit of the cell reserved for the running flag.
const RUNNING_BIT: IdValue = 1;

/// Identity allocator. Steps by 2 so the low bit stays free for the running
/// flag; wrap-around skips the value that would collide with the sentinel.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id_value() -> IdValue {
    loop {
        let id = NEXT_ID.fetch_add(2, Ordering::Relaxed);
        if id != INVALID_FIBRE & !RUNNING_BIT {
            return id;
        }
    }
}

/// A shared, clonable identifier for a fibre.
///
/// Equality compares the identity bits only; the running flag does not
/// participate. A default-constructed id is invalid, never running, and never
/// equal to the id of any live fibre.
#[derive(Clone, Default)]
pub struct FibreId {
    cell: Option<Arc<AtomicU64>>,
}

impl FibreId {
    /// Allocates a fresh identity. The running flag starts clear; the owning
    /// fibre raises it on construction.
    pub(crate) fn allocate() -> Self {
        Self {
            cell: Some(Arc::new(AtomicU64::new(next_id_value()))),
        }
    }

    /// Returns the identity bits, or [`INVALID_FIBRE`] for an invalid id.
    #[must_use]
    pub fn value(&self) -> IdValue {
        self.cell
            .as_ref()
            .map_or(INVALID_FIBRE, |cell| cell.load(Ordering::Acquire) & !RUNNING_BIT)
    }

    /// Returns true unless this id is the invalid sentinel.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.cell
            .as_ref()
            .is_some_and(|cell| cell.load(Ordering::Acquire) != INVALID_FIBRE)
    }

    /// Returns true while the identified fibre is alive on some scheduler.
    #[must_use]
    pub fn running(&self) -> bool {
        self.cell
            .as_ref()
            .is_some_and(|cell| {
                let raw = cell.load(Ordering::Acquire);
                raw != INVALID_FIBRE && raw & RUNNING_BIT != 0
            })
    }

    /// Raises or clears the running flag. Clearing is idempotent.
    pub(crate) fn set_running(&self, running: bool) {
        if let Some(cell) = &self.cell {
            if running {
                cell.fetch_or(RUNNING_BIT, Ordering::AcqRel);
            } else {
                cell.fetch_and(!RUNNING_BIT, Ordering::AcqRel);
            }
        }
    }
}

impl PartialEq for FibreId {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for FibreId {}

impl fmt::Debug for FibreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid() {
            write!(f, "FibreId({})", self.value() >> 1)
        } else {
            write!(f, "FibreId(invalid)")
        }
    }
}

impl fmt::Display for FibreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid() {
            write!(f, "F{}", self.value() >> 1)
        } else {
            write!(f, "F-")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_id_is_invalid_and_not_running() {
        let id = FibreId::default();
        assert!(!id.valid());
        assert!(!id.running());
        assert_eq!(id.value(), INVALID_FIBRE);
    }

    #[test]
    fn allocated_ids_are_distinct() {
        let a = FibreId::allocate();
        let b = FibreId::allocate();
        assert!(a.valid());
        assert!(b.valid());
        assert_ne!(a, b);
    }

    #[test]
    fn identity_ignores_running_flag() {
        let id = FibreId::allocate();
        let value = id.value();
        id.set_running(true);
        assert_eq!(id.value(), value);
        id.set_running(false);
        assert_eq!(id.value(), value);
    }

    #[test]
    fn clones_observe_running_writes() {
        let id = FibreId::allocate();
        let observer = id.clone();
        assert!(!observer.running());
        id.set_running(true);
        assert!(observer.running());
        id.set_running(false);
        assert!(!observer.running());
        // Clearing twice is a no-op.
        id.set_running(false);
        assert!(!observer.running());
    }

    #[test]
    fn equality_compares_identity_only() {
        let id = FibreId::allocate();
        let twin = id.clone();
        id.set_running(true);
        assert_eq!(id, twin);
        assert_ne!(id, FibreId::default());
    }
}
