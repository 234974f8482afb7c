//! Readiness reactor contract.
//!
//! A [`Reactor`] binds a file descriptor, a direction and an optional timeout
//! to a callback that fires exactly once: when the descriptor becomes ready,
//! when the timeout elapses, when the descriptor is closed through
//! [`Reactor::close_fd`], or when arming fails. Sockets only talk to the
//! reactor through this trait; [`EventLoop`] is the bundled implementation.

mod event_loop;
pub(crate) mod poller;

pub use event_loop::EventLoop;

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// Direction a registration waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
  Read,
  Write,
  ReadAndWrite,
}

impl Interest {
  pub fn is_readable(&self) -> bool {
    matches!(self, Self::Read | Self::ReadAndWrite)
  }

  pub fn is_writable(&self) -> bool {
    matches!(self, Self::Write | Self::ReadAndWrite)
  }

  /// Union of two optional interests.
  pub(crate) fn merge(read: bool, write: bool) -> Option<Self> {
    match (read, write) {
      (true, true) => Some(Self::ReadAndWrite),
      (true, false) => Some(Self::Read),
      (false, true) => Some(Self::Write),
      (false, false) => None,
    }
  }
}

/// Why a registration fired.
#[derive(Debug)]
pub enum Readiness {
  /// The descriptor is ready in the registered direction (or has an error
  /// condition pending, which the next syscall will report).
  Ready,
  /// The timeout elapsed first.
  TimedOut,
  /// The descriptor was closed through [`Reactor::close_fd`].
  Closed,
  /// The descriptor could not be armed.
  Failed(io::Error),
}

impl Readiness {
  pub fn is_ready(&self) -> bool {
    matches!(self, Self::Ready)
  }
}

/// One-shot readiness callback. Runs on the reactor thread, or synchronously
/// inside [`Reactor::register`] for [`Readiness::Failed`].
pub type Callback = Box<dyn FnOnce(RawFd, Readiness) + Send>;

/// Handle to a live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration {
  id: u64,
  fd: RawFd,
  interest: Interest,
}

impl Registration {
  pub(crate) fn new(id: u64, fd: RawFd, interest: Interest) -> Self {
    Self { id, fd, interest }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn interest(&self) -> Interest {
    self.interest
  }
}

impl fmt::Display for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{} (fd {}, {:?})", self.id, self.fd, self.interest)
  }
}

/// Event-notification reactor.
///
/// Implementations must invoke every callback at most once and must never
/// invoke it while holding a lock that `register`, `cancel` or `close_fd`
/// would need, so callbacks are free to register again.
pub trait Reactor: Send + Sync {
  /// Arms a one-shot registration. `timeout = None` waits forever.
  ///
  /// A descriptor holds at most one registration per direction; registering
  /// a direction that is already taken replaces the older registration,
  /// which is dropped without being called.
  fn register(
    &self,
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
    callback: Callback,
  ) -> Registration;

  /// Removes a registration without calling it. Returns `false` if it had
  /// already fired or been cancelled.
  fn cancel(&self, registration: Registration) -> bool;

  /// Fires every registration on `fd` with [`Readiness::Closed`] and forgets
  /// the descriptor. Call before the descriptor number is released.
  fn close_fd(&self, fd: RawFd);

  /// Whether the caller is running on the thread that invokes callbacks.
  fn is_reactor_thread(&self) -> bool {
    false
  }
}

/// Turns a seconds value into a wait budget. Negative (conventionally `-1`)
/// means wait forever.
///
/// ```
/// use std::time::Duration;
/// use lio_socket::timeout_from_secs;
///
/// assert_eq!(timeout_from_secs(-1.0), None);
/// assert_eq!(timeout_from_secs(1.5), Some(Duration::from_millis(1500)));
/// ```
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
  if secs < 0.0 || secs.is_nan() {
    None
  } else {
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
  }
}

/// Absolute point in time a suspended operation gives up at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
  /// `None`, or a timeout too large to represent, never expires.
  pub fn after(timeout: Option<Duration>) -> Self {
    match timeout.and_then(|t| Instant::now().checked_add(t)) {
      Some(at) => Self(Some(at)),
      None => Self::never(),
    }
  }

  pub fn never() -> Self {
    Self(None)
  }

  /// Time left, `None` for no deadline. `Some(ZERO)` once expired.
  pub fn remaining(&self) -> Option<Duration> {
    self.0.map(|at| at.saturating_duration_since(Instant::now()))
  }

  pub fn is_expired(&self) -> bool {
    self.0.is_some_and(|at| Instant::now() >= at)
  }
}
