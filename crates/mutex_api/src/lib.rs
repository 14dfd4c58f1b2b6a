//! Lock abstraction decoupling lock-generic data structures from any one
//! mutex implementation.
//!
//! Kernel code implements [`Mutex`] for its interrupt-aware spinlock; host
//! tests enable the `std` feature and plug in `std::sync::Mutex` instead.

#![cfg_attr(any(not(feature = "std"), target_os = "none"), no_std)]

use core::ops::DerefMut;

/// Mutual exclusion around a single value.
pub trait Mutex {
    /// The value the mutex protects.
    type Data;

    /// RAII guard returned by [`lock`](Self::lock); the lock is released
    /// when the guard is dropped.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex wrapping `data`.
    fn new(data: Self::Data) -> Self;

    /// Acquires the mutex, spinning or blocking until it is available.
    fn lock(&self) -> Self::Guard<'_>;
}

#[cfg(all(feature = "std", not(target_os = "none")))]
impl<T> Mutex for std::sync::Mutex<T> {
    type Data = T;
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock().unwrap()
    }
}
