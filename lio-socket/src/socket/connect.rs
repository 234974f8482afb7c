use super::AsyncSocket;
use crate::error::{Error, Result};
use crate::net_utils;
use crate::reactor::{Deadline, Interest, Readiness};

use std::io;
use std::time::Duration;

impl AsyncSocket {
  /// Connects to `address:port` without blocking.
  ///
  /// `callback` receives the connected socket, or `None` if the connection
  /// was refused, failed, or did not complete within `timeout` (`None`
  /// waits forever). It runs inline when the connect completes at once.
  ///
  /// Resolution failures and errors reported by the initial `connect(2)` are
  /// returned instead; the callback is not invoked then.
  pub fn connect<F>(
    self,
    address: &str,
    port: u16,
    timeout: Option<Duration>,
    callback: F,
  ) -> Result<()>
  where
    F: FnOnce(Option<AsyncSocket>) + Send + 'static,
  {
    let addr = net_utils::resolve(address, port)?;

    match self.shared.raw.connect(addr) {
      Ok(()) => {
        log::debug!("fd {} connected to {addr} immediately", self.fd());
        callback(Some(self));
        Ok(())
      }
      Err(err)
        if matches!(
          err.raw_os_error(),
          Some(libc::EINPROGRESS) | Some(libc::EINTR) | Some(libc::EAGAIN)
        ) =>
      {
        log::trace!("fd {} connecting to {addr}", self.fd());
        self.await_connect(Deadline::after(timeout), Box::new(callback));
        Ok(())
      }
      Err(err) => {
        log::debug!("connect to {addr} failed: {err}");
        Err(Error::Network(err))
      }
    }
  }

  fn await_connect(
    self,
    deadline: Deadline,
    callback: Box<dyn FnOnce(Option<AsyncSocket>) + Send>,
  ) {
    let shared = self.shared.clone();
    let Some(pinned) = shared.raw.pin() else {
      log::debug!("connect abandoned: socket closed");
      return callback(None);
    };
    let fd = pinned.fd();
    let reactor = shared.ctx.reactor().clone();

    reactor.register(
      fd,
      Interest::Write,
      deadline.remaining(),
      Box::new(move |_, readiness| match readiness {
        Readiness::Ready => match self.connect_outcome() {
          Ok(true) => callback(Some(self)),
          // Woken before the handshake finished.
          Ok(false) => self.await_connect(deadline, callback),
          Err(err) => {
            log::debug!("connect on fd {fd} failed: {err}");
            callback(None)
          }
        },
        other => {
          log::debug!("connect on fd {fd} did not complete: {other:?}");
          callback(None)
        }
      }),
    );
  }

  /// `Ok(true)` once connected, `Ok(false)` while still in progress.
  fn connect_outcome(&self) -> io::Result<bool> {
    if let Some(err) = self.shared.raw.take_error()? {
      return Err(err);
    }
    match self.shared.raw.peer_addr() {
      Ok(_) => Ok(true),
      Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => Ok(false),
      Err(err) => Err(err),
    }
  }
}
