//! OS readiness polling.
//!
//! Uses epoll on Linux/Android and kqueue on BSD/macOS. Every registration is
//! one-shot (`EPOLLONESHOT` / `EV_ONESHOT`): after an event is delivered the
//! descriptor stays silent until it is re-armed with [`ReadinessPoll::modify`].

mod notifier;
mod os;
mod util;

#[cfg(test)]
pub(crate) mod tests;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use os::epoll as sys;

#[cfg(any(
  target_os = "macos",
  target_os = "ios",
  target_os = "tvos",
  target_os = "watchos",
  target_os = "freebsd",
  target_os = "dragonfly",
  target_os = "openbsd",
  target_os = "netbsd"
))]
pub(crate) use os::kqueue as sys;

pub(crate) use notifier::NOTIFY_KEY;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::Interest;

/// Trait for OS-specific readiness polling implementations
///
/// ## Design for cross-platform compatibility
///
/// - **epoll**: Registers both read/write interest on a single fd
/// - **kqueue**: Registers read and write separately as different filters
/// - This trait accommodates both by accepting Interest flags
pub trait ReadinessPoll {
  /// The native event type used by this implementation
  type NativeEvent;

  /// Add interest for a file descriptor
  /// This is not idempotent.
  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Modify existing interest for a file descriptor
  /// This is idempotent, but fails if not added before.
  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()>;

  /// Remove all interest for a file descriptor
  /// This fails with `ENOENT` if 'fd' hasn't previously been added.
  fn delete(&self, fd: RawFd) -> io::Result<()>;

  /// Wait for events, filling the provided buffer
  /// Returns the number of events received
  fn wait(
    &self,
    events: &mut [Self::NativeEvent],
    timeout: Option<Duration>,
  ) -> io::Result<usize>;

  /// Wake up a potentially blocking wait call
  fn notify(&self) -> io::Result<()>;

  /// Extract the key from a native event
  fn event_key(event: &Self::NativeEvent) -> u64;

  /// Extract the interest from a native event
  ///
  /// For kqueue: returns either READ or WRITE (one event per filter)
  /// For epoll: may return both READ and WRITE in a single event. Error and
  /// hang-up conditions report both, so whichever side is waiting wakes up
  /// and observes the error from its own syscall.
  fn event_interest(event: &Self::NativeEvent) -> Interest;
}

/// Readiness reported for one registered key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
  pub key: u64,
  pub readable: bool,
  pub writable: bool,
}

/// Reusable buffer of native events.
pub struct Events {
  events: Vec<<sys::OsPoller as ReadinessPoll>::NativeEvent>,
  len: usize,
}

// SAFETY: the raw pointers in NativeEvent (kevent::udata) only carry integer
// keys and are never dereferenced.
unsafe impl Send for Events {}

impl Events {
  pub fn with_capacity(capacity: usize) -> Self {
    assert!(capacity > 0, "Events::with_capacity: capacity must be > 0");
    // SAFETY: epoll_event and kevent are plain C structs; all-zero is valid.
    Self { events: vec![unsafe { std::mem::zeroed() }; capacity], len: 0 }
  }

  /// Events from the last [`Events::wait_on`], without the internal
  /// notification wake-ups.
  pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
    self.events[..self.len]
      .iter()
      .map(|native| {
        let interest = sys::OsPoller::event_interest(native);
        Event {
          key: sys::OsPoller::event_key(native),
          readable: interest.is_readable(),
          writable: interest.is_writable(),
        }
      })
      .filter(|event| event.key != NOTIFY_KEY)
  }

  /// Blocks on `poller` for at most `timeout` and stores what it returned.
  pub fn wait_on(
    &mut self,
    poller: &sys::OsPoller,
    timeout: Option<Duration>,
  ) -> io::Result<()> {
    self.len = 0;
    let n = match poller.wait(&mut self.events, timeout) {
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => 0,
      Err(err) => return Err(err),
    };
    assert!(
      n <= self.events.len(),
      "wait returned more events than buffer capacity"
    );
    self.len = n;
    Ok(())
  }
}
