//! Producer-side serialization hooks.
//!
//! The queue itself only synchronizes its occupancy counter. When more than one context may
//! call `put`, the caller supplies a [`Lock`] that is held across the whole put sequence,
//! including the paths that reject the event.
//!
//! Only locks marked [`ExclusiveLock`] let a split producer be cloned; any other lock is held
//! by a producer that already has the queue to itself.

/// Runs a closure with mutual exclusion appropriate to the platform.
pub trait Lock {
    /// Run `f` exactly once and return its result.
    ///
    /// Whatever exclusion the lock provides is held from before `f` starts until after it
    /// returns or unwinds.
    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// A [`Lock`] whose sections never overlap.
///
/// # Safety
/// While one `with_lock` call on a value is running its closure, no other `with_lock` call on
/// the same value (or a copy of it, from any context) may run its closure. Leaving a section
/// must happen-before entering the next one.
pub unsafe trait ExclusiveLock: Lock {}

/// No serialization. Correct for a single producer.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoLock;

impl Lock for NoLock {
    #[inline(always)]
    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// A lock/unlock callback pair, e.g. interrupt disable/enable.
///
/// `unlock` runs on every exit from the guarded section, unwinding included.
#[derive(Copy, Clone, Debug)]
pub struct HookPair<L, U> {
    lock: L,
    unlock: U,
}

impl<L: Fn(), U: Fn()> HookPair<L, U> {
    pub const fn new(lock: L, unlock: U) -> Self {
        Self { lock, unlock }
    }

    /// A hook pair vouched for as mutually exclusive, so producers using it can be cloned.
    ///
    /// # Safety
    /// `lock` and `unlock` must uphold the [`ExclusiveLock`] contract.
    pub const unsafe fn new_exclusive(lock: L, unlock: U) -> Exclusive<Self> {
        Exclusive(Self { lock, unlock })
    }
}

struct Unlock<'u, U: Fn()>(&'u U);

impl<U: Fn()> Drop for Unlock<'_, U> {
    fn drop(&mut self) {
        (self.0)();
    }
}

impl<L: Fn(), U: Fn()> Lock for HookPair<L, U> {
    #[inline]
    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        (self.lock)();
        let _unlock = Unlock(&self.unlock);
        f()
    }
}

/// Marks a [`Lock`] as an [`ExclusiveLock`].
#[derive(Copy, Clone, Debug)]
pub struct Exclusive<T>(T);

impl<T: Lock> Exclusive<T> {
    /// # Safety
    /// `lock` must uphold the [`ExclusiveLock`] contract.
    pub const unsafe fn new(lock: T) -> Self {
        Self(lock)
    }
}

impl<T: Lock> Lock for Exclusive<T> {
    #[inline]
    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.0.with_lock(f)
    }
}

// SAFETY: guaranteed by whoever called `Exclusive::new` or `HookPair::new_exclusive`.
unsafe impl<T: Lock> ExclusiveLock for Exclusive<T> {}

/// Serializes producers through the global `critical-section` implementation.
#[cfg(feature = "critical-section")]
#[derive(Copy, Clone, Debug, Default)]
pub struct CriticalSectionLock;

#[cfg(feature = "critical-section")]
impl Lock for CriticalSectionLock {
    #[inline]
    fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        critical_section::with(|_| f())
    }
}

// SAFETY: critical sections are global and never overlap.
#[cfg(feature = "critical-section")]
unsafe impl ExclusiveLock for CriticalSectionLock {}

#[cfg(test)]
mod tests {
    use super::{HookPair, Lock, NoLock};
    use core::cell::RefCell;
    use std::vec::Vec;

    #[test]
    fn no_lock_runs_closure() {
        assert_eq!(NoLock.with_lock(|| 7), 7);
    }

    #[test]
    fn hook_pair_brackets_closure() {
        let log = RefCell::new(Vec::new());
        let hooks = HookPair::new(
            || log.borrow_mut().push("lock"),
            || log.borrow_mut().push("unlock"),
        );

        let out = hooks.with_lock(|| {
            log.borrow_mut().push("body");
            3
        });

        assert_eq!(out, 3);
        assert_eq!(&log.borrow()[..], &["lock", "body", "unlock"]);
    }

    #[test]
    fn hook_pair_unlocks_on_unwind() {
        let unlocked = core::cell::Cell::new(false);
        let hooks = HookPair::new(|| {}, || unlocked.set(true));

        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: () = hooks.with_lock(|| panic!("boom"));
        }));

        assert!(caught.is_err());
        assert!(unlocked.get());
    }

    #[cfg(feature = "critical-section")]
    #[test]
    fn critical_section_lock_runs_closure() {
        use super::CriticalSectionLock;
        assert_eq!(CriticalSectionLock.with_lock(|| "inside"), "inside");
    }
}
