use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::util::hint::cold;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LazyLockState {
    /// Signifies this lock is uninitialized
    Uninit = 0,
    /// Signifies this lock is mid initialization. Whoever sees this, including
    /// the initializer itself (recursively), must not wait for the value.
    Initializing = 1,
    /// Signifies this lock is initialized. The value never changes again.
    Init = 2,
}

impl LazyLockState {
    const fn from_u8(state: u8) -> Self {
        match state {
            0 => Self::Uninit,
            1 => Self::Initializing,
            _ => Self::Init,
        }
    }
}

/// A LazyLock that let's you poll its initialization state (including
/// mid-init). Nobody blocks on an initialization in flight.
pub struct LazyLock<T> {
    cell: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
}

// SAFETY: the cell is written exactly once, by the thread that won the
// `Uninit -> Initializing` CAS, and only read after an `Acquire` load of
// `Init`, which pairs with the `Release` store that publishes it.
unsafe impl<T> Sync for LazyLock<T> where T: Send + Sync {}

impl<T> LazyLock<T> {
    pub const fn new() -> Self {
        Self {
            cell: UnsafeCell::new(MaybeUninit::uninit()),
            state: AtomicU8::new(LazyLockState::Uninit as u8),
        }
    }

    pub fn state(&self) -> LazyLockState {
        LazyLockState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The value, if somebody already finished initializing it
    pub fn get(&self) -> Option<&T> {
        match self.state() {
            // SAFETY: `Init` was observed with `Acquire`
            LazyLockState::Init => Some(unsafe { self.assume_init() }),
            _ => None,
        }
    }

    /// # Safety
    ///
    /// The state must have been observed as [`LazyLockState::Init`]
    unsafe fn assume_init(&self) -> &T {
        // SAFETY: requirement passed to caller
        unsafe { (*self.cell.get()).assume_init_ref() }
    }

    /// Get the value, running `init` if nobody has yet. Returns the state
    /// instead if an initialization is already in flight, on this thread or
    /// any other.
    pub fn initialize<F>(&self, init: F) -> Result<&T, LazyLockState>
    where
        F: FnOnce() -> T,
    {
        match self.state() {
            // SAFETY: `Init` was observed with `Acquire`
            LazyLockState::Init => Ok(unsafe { self.assume_init() }),
            LazyLockState::Initializing => Err(LazyLockState::Initializing),
            LazyLockState::Uninit => cold(|| self.initialize_slow(init)),
        }
    }

    fn initialize_slow<F>(&self, init: F) -> Result<&T, LazyLockState>
    where
        F: FnOnce() -> T,
    {
        if let Err(state) = self.state.compare_exchange(
            LazyLockState::Uninit as u8,
            LazyLockState::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return match LazyLockState::from_u8(state) {
                // SAFETY: `Init` was observed with `Acquire`
                LazyLockState::Init => Ok(unsafe { self.assume_init() }),
                state => Err(state),
            };
        }
        let value = init();
        // SAFETY: we won the CAS, so we are the only writer and nobody reads
        // until `Init` is published below
        unsafe { (*self.cell.get()).write(value) };
        self.state
            .store(LazyLockState::Init as u8, Ordering::Release);
        // SAFETY: we just stored `Init` ourselves
        Ok(unsafe { self.assume_init() })
    }
}

impl<T> Default for LazyLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LazyLock<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == LazyLockState::Init as u8 {
            // SAFETY: `Init` means the cell holds a value, and `&mut self`
            // means nobody else can be looking at it
            unsafe { self.cell.get_mut().assume_init_drop() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_once() {
        let lock = LazyLock::new();
        assert_eq!(lock.state(), LazyLockState::Uninit);
        assert!(lock.get().is_none());
        assert_eq!(lock.initialize(|| 42), Ok(&42));
        assert_eq!(lock.initialize(|| panic!("initialized twice")), Ok(&42));
        assert_eq!(lock.state(), LazyLockState::Init);
        assert_eq!(lock.get(), Some(&42));
    }

    #[test]
    fn recursive_initialize_sees_initializing() {
        let lock = LazyLock::new();
        let value = lock.initialize(|| {
            assert_eq!(lock.state(), LazyLockState::Initializing);
            assert_eq!(
                lock.initialize(|| unreachable!()),
                Err(LazyLockState::Initializing)
            );
            7
        });
        assert_eq!(value, Ok(&7));
    }

    #[test]
    fn drops_the_value() {
        use std::rc::Rc;

        let marker = Rc::new(());
        {
            let lock = LazyLock::new();
            let _ = lock.initialize(|| Rc::clone(&marker));
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
