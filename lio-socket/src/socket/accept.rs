use super::{AcceptWait, AsyncSocket, Shared};
use crate::error::{Error, Result};
use crate::reactor::{Deadline, Interest, Readiness, Registration};

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Builds a connection type out of a freshly accepted socket.
///
/// Lets [`AsyncSocket::accept_as`] and [`AsyncSocket::for_each_accept_as`]
/// hand out protocol-specific wrappers instead of bare sockets.
pub trait Connection: Send + 'static {
  fn from_socket(socket: AsyncSocket) -> Self;
}

impl Connection for AsyncSocket {
  fn from_socket(socket: AsyncSocket) -> Self {
    socket
  }
}

type AcceptCallback = Box<dyn FnOnce(Option<AsyncSocket>) + Send>;

fn is_transient(err: &io::Error) -> bool {
  matches!(err.raw_os_error(), Some(libc::EINTR) | Some(libc::ECONNABORTED))
}

impl Shared {
  /// One accept. `Ok(None)` when no connection is queued.
  fn try_accept(&self) -> io::Result<Option<AsyncSocket>> {
    loop {
      match self.raw.accept() {
        Ok((fd, peer)) => {
          log::debug!("fd {} accepted {peer} as fd {fd}", self.raw.fd());
          let shared =
            Shared::from_raw_fd(fd, self.raw.family(), self.ctx.clone())?;
          return Ok(Some(AsyncSocket::from_shared(shared)));
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
        Err(err) if is_transient(&err) => {
          log::trace!("accept on fd {} retried: {err}", self.raw.fd());
        }
        Err(err) => return Err(err),
      }
    }
  }

  /// Claims the accept-wait slot.
  fn claim_accept_wait(&self) -> Result<()> {
    let mut wait = self.accept_wait.lock();
    match *wait {
      AcceptWait::Idle => {
        *wait = AcceptWait::Pending(None);
        Ok(())
      }
      AcceptWait::Pending(_) => Err(Error::AcceptPending),
    }
  }

  fn store_accept_registration(&self, registration: Registration) {
    let mut wait = self.accept_wait.lock();
    // Already fired when the slot is Idle again.
    if *wait == AcceptWait::Pending(None) {
      *wait = AcceptWait::Pending(Some(registration));
    }
  }

  fn release_accept_wait(&self) -> Option<Registration> {
    match std::mem::replace(&mut *self.accept_wait.lock(), AcceptWait::Idle) {
      AcceptWait::Pending(registration) => registration,
      AcceptWait::Idle => None,
    }
  }

  /// Parks a single accept on the reactor until a connection is queued or
  /// the deadline passes. The slot must have been claimed.
  fn await_accept(self: Arc<Self>, deadline: Deadline, callback: AcceptCallback) {
    let Some(pinned) = self.raw.pin() else {
      self.release_accept_wait();
      return callback(None);
    };
    let fd = pinned.fd();
    let reactor = self.ctx.reactor().clone();
    let shared = self.clone();

    let registration = reactor.register(
      fd,
      Interest::Read,
      deadline.remaining(),
      Box::new(move |_, readiness| {
        shared.release_accept_wait();
        if !readiness.is_ready() {
          log::debug!("accept on fd {fd} gave up: {readiness:?}");
          return callback(None);
        }

        match shared.try_accept() {
          Ok(Some(socket)) => callback(Some(socket)),
          Ok(None) => match shared.claim_accept_wait() {
            Ok(()) => shared.await_accept(deadline, callback),
            Err(_) => callback(None),
          },
          Err(err) => {
            log::warn!("accept on fd {fd} failed: {err}");
            callback(None)
          }
        }
      }),
    );

    self.store_accept_registration(registration);
  }
}

/// Clears the accept-loop flag when the loop exits, however it exits.
struct LoopGuard<'a>(&'a AtomicBool);

impl Drop for LoopGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl AsyncSocket {
  /// Accepts one connection.
  ///
  /// `callback` receives the connection, or `None` if none arrived within
  /// `timeout` (`None` waits forever), the socket was closed, or accepting
  /// failed after waiting. It runs inline when a connection is already
  /// queued. Only one accept may wait on a socket at a time.
  pub fn accept<F>(&self, timeout: Option<Duration>, callback: F) -> Result<()>
  where
    F: FnOnce(Option<AsyncSocket>) + Send + 'static,
  {
    self.accept_as::<AsyncSocket, F>(timeout, callback)
  }

  /// [`accept`](Self::accept), wrapping the connection with
  /// [`Connection::from_socket`].
  pub fn accept_as<C, F>(&self, timeout: Option<Duration>, callback: F) -> Result<()>
  where
    C: Connection,
    F: FnOnce(Option<C>) + Send + 'static,
  {
    self.open_fd()?;
    if self.shared.accept_loop.load(Ordering::Acquire) {
      return Err(Error::AcceptLoopActive);
    }

    self.shared.claim_accept_wait()?;
    match self.shared.try_accept() {
      Ok(Some(socket)) => {
        self.shared.release_accept_wait();
        callback(Some(C::from_socket(socket)));
      }
      Ok(None) => self.shared.clone().await_accept(
        Deadline::after(timeout),
        Box::new(move |socket| callback(socket.map(C::from_socket))),
      ),
      Err(err) => {
        self.shared.release_accept_wait();
        return Err(Error::Network(err));
      }
    }
    Ok(())
  }

  /// Accepts connections until the socket is closed, handing each one to
  /// `callback` on a new execution context from the context's spawner.
  ///
  /// Blocks the calling thread; run it on a thread of its own, never on the
  /// reactor thread. Returns `Ok(())` once the socket is closed and an error
  /// if accepting fails for a reason other than a dropped or interrupted
  /// connection attempt. Only one loop may run per socket.
  pub fn for_each_accept<F>(&self, callback: F) -> Result<()>
  where
    F: Fn(AsyncSocket) + Send + Sync + 'static,
  {
    self.for_each_accept_as::<AsyncSocket, F>(callback)
  }

  /// [`for_each_accept`](Self::for_each_accept), wrapping each connection
  /// with [`Connection::from_socket`].
  pub fn for_each_accept_as<C, F>(&self, callback: F) -> Result<()>
  where
    C: Connection,
    F: Fn(C) + Send + Sync + 'static,
  {
    let shared = &self.shared;
    if shared.accept_loop.swap(true, Ordering::AcqRel) {
      return Err(Error::AcceptLoopActive);
    }
    let _guard = LoopGuard(&shared.accept_loop);

    if *shared.accept_wait.lock() != AcceptWait::Idle {
      return Err(Error::AcceptPending);
    }

    let callback = Arc::new(callback);
    let reactor = shared.ctx.reactor();
    let spawner = shared.ctx.spawner();
    shared.accept_signal.reset();
    log::debug!("accept loop started on fd {}", self.fd());

    loop {
      let fd = self.fd();
      if fd < 0 {
        log::debug!("accept loop stopped: socket closed");
        return Ok(());
      }

      match shared.try_accept() {
        Ok(Some(socket)) => {
          let callback = callback.clone();
          spawner.spawn(Box::new(move || callback(C::from_socket(socket))));
        }
        Ok(None) => {
          shared.claim_accept_wait()?;
          let Some(pinned) = shared.raw.pin() else {
            shared.release_accept_wait();
            continue;
          };

          shared.accept_outcome.lock().take();
          let owner = shared.clone();
          let registration = reactor.register(
            pinned.fd(),
            Interest::Read,
            None,
            Box::new(move |_, readiness| {
              *owner.accept_outcome.lock() = Some(readiness);
              owner.accept_signal.release();
            }),
          );
          shared.store_accept_registration(registration);
          drop(pinned);

          shared.accept_signal.wait();

          // No-op once it has fired.
          if let Some(registration) = shared.release_accept_wait() {
            reactor.cancel(registration);
          }

          match shared.accept_outcome.lock().take() {
            Some(Readiness::Failed(err)) => {
              log::error!("accept loop on fd {fd} could not wait: {err}");
              return Err(Error::Network(err));
            }
            // Closed, or the reactor shut down under us.
            Some(Readiness::Closed) if self.is_open() => {
              log::error!("accept loop on fd {fd} lost its reactor");
              return Err(Error::Network(io::ErrorKind::NotConnected.into()));
            }
            _ => {}
          }
        }
        Err(_) if !self.is_open() => {
          log::debug!("accept loop stopped: socket closed");
          return Ok(());
        }
        Err(err) => {
          log::error!("accept loop on fd {fd} stopped: {err}");
          return Err(Error::Network(err));
        }
      }
    }
  }
}
