//! Synchronization primitives used across the socket layer.
//!
//! - [`Mutex`] wraps `std::sync::Mutex` and removes poisoning: a callback
//!   panicking on the reactor thread must not wedge every other socket.
//! - [`Signal`] is the reusable wake-up used by blocking entry points
//!   (the accept loop) to park until a reactor callback releases them.

use std::sync as std_sync;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

/// A mutual exclusion primitive that wraps `std::sync::Mutex`.
///
/// Unlike `std::sync::Mutex`, this does not support poisoning.
pub struct Mutex<T: ?Sized> {
  inner: std_sync::Mutex<T>,
}

impl<T> Mutex<T> {
  /// Creates a new mutex in an unlocked state ready for use.
  #[inline]
  pub const fn new(value: T) -> Self {
    Self { inner: std_sync::Mutex::new(value) }
  }
}

impl<T: ?Sized> Mutex<T> {
  /// Acquires a mutex, blocking the current thread until it is able to do so.
  ///
  /// This function does not propagate poisoning, so it will always succeed.
  #[inline]
  pub fn lock(&self) -> MutexGuard<'_, T> {
    MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
  }
}

/// An RAII implementation of a "scoped lock" of a mutex.
///
/// When this structure is dropped (falls out of scope), the lock will be unlocked.
pub struct MutexGuard<'a, T: ?Sized> {
  inner: std_sync::MutexGuard<'a, T>,
}

impl<T: ?Sized> std::ops::Deref for MutexGuard<'_, T> {
  type Target = T;

  #[inline]
  fn deref(&self) -> &T {
    &self.inner
  }
}

impl<T: ?Sized> std::ops::DerefMut for MutexGuard<'_, T> {
  #[inline]
  fn deref_mut(&mut self) -> &mut T {
    &mut self.inner
  }
}

/// Auto-reset wake-up flag.
///
/// Any number of [`release`](Self::release) calls before a
/// [`wait`](Self::wait) collapse into a single pending wake-up, and `wait`
/// consumes it. The signal can be reused indefinitely.
#[derive(Clone)]
pub struct Signal {
  tx: Sender<()>,
  rx: Receiver<()>,
}

impl Signal {
  pub fn new() -> Self {
    let (tx, rx) = crossbeam_channel::bounded(1);
    Self { tx, rx }
  }

  /// Wakes one waiter, or the next one to call `wait`.
  pub fn release(&self) {
    match self.tx.try_send(()) {
      Ok(()) | Err(TrySendError::Full(())) => {}
      // Both halves live in `self`.
      Err(TrySendError::Disconnected(())) => unreachable!(),
    }
  }

  /// Blocks until released.
  pub fn wait(&self) {
    // Cannot disconnect while `self.tx` is alive.
    let _ = self.rx.recv();
  }

  /// Blocks until released or `timeout` elapses. Returns whether it was
  /// released.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    match self.rx.recv_timeout(timeout) {
      Ok(()) => true,
      Err(RecvTimeoutError::Timeout) => false,
      Err(RecvTimeoutError::Disconnected) => unreachable!(),
    }
  }

  /// Drops a pending wake-up, if any.
  pub fn reset(&self) {
    let _ = self.rx.try_recv();
  }
}

impl Default for Signal {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_mutex_survives_panicking_holder() {
    let mutex = Arc::new(Mutex::new(1));
    let m = mutex.clone();
    let _ = thread::spawn(move || {
      let _guard = m.lock();
      panic!("poison attempt");
    })
    .join();

    *mutex.lock() += 1;
    assert_eq!(*mutex.lock(), 2);
  }

  #[test]
  fn test_signal_release_before_wait() {
    let signal = Signal::new();
    signal.release();
    signal.release();
    assert!(signal.wait_timeout(Duration::from_millis(10)));
    // Two releases collapse into one.
    assert!(!signal.wait_timeout(Duration::from_millis(10)));
  }

  #[test]
  fn test_signal_wakes_blocked_thread() {
    let signal = Signal::new();
    let waiter = signal.clone();
    let handle = thread::spawn(move || waiter.wait());

    thread::sleep(Duration::from_millis(20));
    signal.release();
    handle.join().unwrap();
  }

  #[test]
  fn test_signal_reset_discards_pending() {
    let signal = Signal::new();
    signal.release();
    signal.reset();
    assert!(!signal.wait_timeout(Duration::from_millis(10)));
  }
}
