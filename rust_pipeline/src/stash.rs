//! Scope-bound restoration guards.
//!
//! A [`StashGuard`] holds a snapshot of part of a value and writes it back
//! exactly once when the guard is dropped: at the end of the scope, on an
//! early `return`/`?`, or while unwinding from a panic. The guard derefs to
//! the guarded value, so nested guards borrow through the outer one and are
//! therefore dropped (restored) in reverse order of acquisition.

use std::ops::{Deref, DerefMut};

pub struct StashGuard<'a, T, S> {
    target: &'a mut T,
    saved: Option<S>,
    restore: fn(&mut T, S),
}

impl<'a, T, S> StashGuard<'a, T, S> {
    pub(crate) fn new(target: &'a mut T, saved: S, restore: fn(&mut T, S)) -> Self {
        StashGuard {
            target,
            saved: Some(saved),
            restore,
        }
    }

    /// The snapshot that will be restored.
    pub fn saved(&self) -> Option<&S> {
        self.saved.as_ref()
    }
}

impl<T, S> Deref for StashGuard<'_, T, S> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T, S> DerefMut for StashGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T, S> Drop for StashGuard<'_, T, S> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            (self.restore)(self.target, saved);
        }
    }
}
