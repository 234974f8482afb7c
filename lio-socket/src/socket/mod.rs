//! Callback-driven TCP sockets.

mod accept;
mod connect;
pub(crate) mod raw;
mod stream;
pub(crate) mod transfer;

pub use accept::Connection;
pub use raw::RawSocket;

use crate::context::IoContext;
use crate::error::{Error, Result};
use crate::net_utils;
use crate::reactor::{Readiness, Registration};
use crate::sync::{Mutex, Signal};

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// State shared between a socket handle and the continuations it has
/// parked on the reactor.
pub(crate) struct Shared {
  pub(crate) raw: RawSocket,
  pub(crate) ctx: IoContext,
  /// At most one accept waits on the reactor at a time.
  pub(crate) accept_wait: Mutex<AcceptWait>,
  pub(crate) accept_signal: Signal,
  /// Why the accept loop's last registration fired.
  pub(crate) accept_outcome: Mutex<Option<Readiness>>,
  pub(crate) accept_loop: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptWait {
  Idle,
  /// Set before registering, so the slot is claimed even if the
  /// registration fires before its handle is stored.
  Pending(Option<Registration>),
}

impl Shared {
  fn new(raw: RawSocket, ctx: IoContext) -> Self {
    Self {
      raw,
      ctx,
      accept_wait: Mutex::new(AcceptWait::Idle),
      accept_signal: Signal::new(),
      accept_outcome: Mutex::new(None),
      accept_loop: AtomicBool::new(false),
    }
  }

  pub(crate) fn from_raw_fd(
    fd: RawFd,
    family: libc::c_int,
    ctx: IoContext,
  ) -> io::Result<Self> {
    Ok(Self::new(RawSocket::from_raw_fd(fd, family)?, ctx))
  }

  /// Closes the descriptor, completing everything parked on it with
  /// "closed", and wakes a blocked accept loop.
  pub(crate) fn close(&self) {
    let reactor = self.ctx.reactor().clone();
    self.raw.close_with(move |fd| reactor.close_fd(fd));
    self.accept_signal.release();
  }
}

/// Non-blocking TCP socket driven by callbacks.
///
/// Every operation either completes immediately or parks a continuation on
/// the context's reactor; completions then run on the reactor thread. A
/// socket is closed explicitly with [`close`](Self::close) or when dropped,
/// and closing completes every pending operation as failed.
///
/// ```no_run
/// use std::time::Duration;
/// use lio_socket::{AsyncSocket, Config, IoContext};
///
/// let ctx = IoContext::new(Config::default())?;
/// let server = AsyncSocket::new(&ctx);
/// server.bind(9000, "127.0.0.1")?;
/// server.listen()?;
///
/// AsyncSocket::new(&ctx).connect("127.0.0.1", 9000, Some(Duration::from_secs(5)), |conn| {
///   if let Some(conn) = conn {
///     conn.write_bytes(b"hello", |sent| println!("sent {sent:?}"));
///   }
/// })?;
/// # Ok::<(), lio_socket::Error>(())
/// ```
pub struct AsyncSocket {
  shared: Arc<Shared>,
}

impl AsyncSocket {
  /// An unallocated socket. The descriptor is created by the first
  /// [`bind`](Self::bind) or [`connect`](Self::connect).
  pub fn new(ctx: &IoContext) -> Self {
    Self { shared: Arc::new(Shared::new(RawSocket::new(), ctx.clone())) }
  }

  /// Takes ownership of an open stream socket descriptor and switches it to
  /// non-blocking mode.
  /// The descriptor is closed if it is not a usable socket.
  pub fn from_raw_fd(fd: RawFd, ctx: &IoContext) -> Result<Self> {
    let family = match net_utils::socket_family(fd) {
      Ok(family) => family,
      Err(err) => {
        let _ = syscall!(close(fd));
        return Err(err.into());
      }
    };
    Ok(Self::from_shared(Shared::from_raw_fd(fd, family, ctx.clone())?))
  }

  fn from_shared(shared: Shared) -> Self {
    Self { shared: Arc::new(shared) }
  }

  /// Binds to `address` (a host name or numeric address) and `port`.
  pub fn bind(&self, port: u16, address: &str) -> Result<()> {
    let addr = net_utils::resolve(address, port)?;
    self.shared.raw.bind(addr)?;
    Ok(())
  }

  /// Binds to `0.0.0.0:port`.
  pub fn bind_any(&self, port: u16) -> Result<()> {
    self.shared.raw.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))?;
    Ok(())
  }

  /// Listens with the configured backlog.
  pub fn listen(&self) -> Result<()> {
    self.listen_with_backlog(self.shared.ctx.config().backlog())
  }

  pub fn listen_with_backlog(&self, backlog: i32) -> Result<()> {
    self.shared.raw.listen(backlog)?;
    Ok(())
  }

  /// Closes the socket. Pending reads, writes, accepts and connects complete
  /// as failed, and a thread blocked in
  /// [`for_each_accept`](Self::for_each_accept) returns. Idempotent.
  ///
  /// Completions of pending operations run on the calling thread.
  pub fn close(&self) {
    self.shared.close();
  }

  pub fn is_open(&self) -> bool {
    self.shared.raw.is_open()
  }

  /// The descriptor, `-1` when closed or not yet allocated.
  pub fn fd(&self) -> RawFd {
    self.shared.raw.fd()
  }

  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.shared.raw.local_addr()?)
  }

  pub fn peer_addr(&self) -> Result<SocketAddr> {
    Ok(self.shared.raw.peer_addr()?)
  }

  pub fn context(&self) -> &IoContext {
    &self.shared.ctx
  }

  fn open_fd(&self) -> Result<RawFd> {
    match self.fd() {
      -1 => Err(Error::Closed),
      fd => Ok(fd),
    }
  }
}

impl Drop for AsyncSocket {
  fn drop(&mut self) {
    self.shared.close();
  }
}

impl fmt::Debug for AsyncSocket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncSocket")
      .field("fd", &self.fd())
      .field("family", &self.shared.raw.family())
      .finish()
  }
}
