//! Scoped release guard.

/// Runs a closure when dropped.
///
/// Useful inside fibre bodies to guarantee cleanup even when the fibre is
/// cancelled while suspended: locals are dropped when the fibre is discarded,
/// which fires the guard.
#[must_use = "the guard runs its action on drop; binding it to _ runs it immediately"]
pub struct Finally<F: FnOnce()> {
    action: Option<F>,
}

impl<F: FnOnce()> Drop for Finally<F> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

/// Creates a guard that invokes `action` when it leaves scope.
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// static RELEASED: AtomicBool = AtomicBool::new(false);
///
/// {
///     let _guard = spindle::finally(|| RELEASED.store(true, Ordering::SeqCst));
/// }
/// assert!(RELEASED.load(Ordering::SeqCst));
/// ```
pub fn finally<F: FnOnce()>(action: F) -> Finally<F> {
    Finally {
        action: Some(action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn runs_on_scope_exit() {
        let fired = Cell::new(false);
        {
            let _guard = finally(|| fired.set(true));
            assert!(!fired.get());
        }
        assert!(fired.get());
    }

    #[test]
    fn runs_on_unwind() {
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let observed = fired.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = finally(move || fired.store(true, std::sync::atomic::Ordering::SeqCst));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
