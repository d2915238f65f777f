//! Spin lock guarding one shard.
//!
//! Spinning never allocates, which keeps the heap usable as the process
//! global allocator: a parking mutex could call back into the heap while a
//! thread waits.

use core::{
  cell::UnsafeCell,
  hint,
  ops::{Deref, DerefMut},
  sync::atomic::{AtomicBool, Ordering},
};

pub(crate) struct SpinLock<T> {
  locked: AtomicBool,
  data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
  pub(crate) const fn new(data: T) -> Self {
    Self {
      locked: AtomicBool::new(false),
      data: UnsafeCell::new(data),
    }
  }

  /// Acquires the lock without waiting. `None` if another thread holds it.
  #[inline]
  pub(crate) fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
    self
      .locked
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .ok()
      .map(|_| SpinGuard { lock: self })
  }

  #[inline]
  pub(crate) fn lock(&self) -> SpinGuard<'_, T> {
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      while self.locked.load(Ordering::Relaxed) {
        hint::spin_loop();
      }
    }
    SpinGuard { lock: self }
  }
}

pub(crate) struct SpinGuard<'a, T> {
  lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    unsafe { &*self.lock.data.get() }
  }
}

impl<T> DerefMut for SpinGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.lock.data.get() }
  }
}

impl<T> Drop for SpinGuard<'_, T> {
  #[inline]
  fn drop(&mut self) {
    self.lock.locked.store(false, Ordering::Release);
  }
}
