use crate::net_utils;
use crate::sync::Mutex;

use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

const INVALID: RawFd = -1;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
  let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
  if flags & libc::O_NONBLOCK == 0 {
    syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
  }
  Ok(())
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
  let flags = syscall!(fcntl(fd, libc::F_GETFD))?;
  if flags & libc::FD_CLOEXEC == 0 {
    syscall!(fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC))?;
  }
  Ok(())
}

fn set_int_option(
  fd: RawFd,
  level: libc::c_int,
  name: libc::c_int,
  value: libc::c_int,
) -> io::Result<()> {
  syscall!(setsockopt(
    fd,
    level,
    name,
    &value as *const libc::c_int as *const libc::c_void,
    mem::size_of::<libc::c_int>() as libc::socklen_t,
  ))?;
  Ok(())
}

/// Puts a descriptor into the state every open [`RawSocket`] is in.
fn prepare(fd: RawFd) -> io::Result<()> {
  set_nonblocking(fd)?;
  set_cloexec(fd)?;
  #[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "tvos",
    target_os = "watchos",
    target_os = "freebsd",
    target_os = "dragonfly"
  ))]
  set_int_option(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1)?;
  Ok(())
}

type ReleaseHook = Box<dyn FnOnce(RawFd) + Send>;

/// A closed descriptor whose number is still reserved.
struct Retired {
  fd: RawFd,
  before_release: ReleaseHook,
}

/// Owned OS stream socket, `-1` while unallocated.
///
/// The descriptor is held atomically so `close` can race with operations on
/// other threads. Every syscall and reactor registration runs under an
/// [`FdGuard`]; a close that lands while guards are alive marks the socket
/// closed at once but releases the descriptor number only when the last
/// guard is dropped, so no operation ever touches a reused number.
pub struct RawSocket {
  fd: AtomicI32,
  family: AtomicI32,
  pins: AtomicUsize,
  retired: Mutex<Vec<Retired>>,
}

/// Keeps a descriptor number from being released while it is in use.
pub(crate) struct FdGuard<'a> {
  socket: &'a RawSocket,
  fd: RawFd,
}

impl FdGuard<'_> {
  pub fn fd(&self) -> RawFd {
    self.fd
  }
}

impl Drop for FdGuard<'_> {
  fn drop(&mut self) {
    if self.socket.pins.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.socket.release_retired();
    }
  }
}

impl RawSocket {
  /// An unallocated socket.
  pub fn new() -> Self {
    Self::with_fd(INVALID, libc::AF_UNSPEC)
  }

  fn with_fd(fd: RawFd, family: libc::c_int) -> Self {
    Self {
      fd: AtomicI32::new(fd),
      family: AtomicI32::new(family),
      pins: AtomicUsize::new(0),
      retired: Mutex::new(Vec::new()),
    }
  }

  /// Takes ownership of an open stream socket and makes it non-blocking.
  /// The descriptor is closed if that fails.
  pub fn from_raw_fd(fd: RawFd, family: libc::c_int) -> io::Result<Self> {
    if let Err(err) = prepare(fd) {
      let _ = syscall!(close(fd));
      return Err(err);
    }
    Ok(Self::with_fd(fd, family))
  }

  /// Pins the current descriptor, `None` when closed or unallocated.
  pub(crate) fn pin(&self) -> Option<FdGuard<'_>> {
    self.pins.fetch_add(1, Ordering::SeqCst);
    let guard = FdGuard { socket: self, fd: self.fd.load(Ordering::SeqCst) };
    if guard.fd == INVALID {
      return None;
    }
    Some(guard)
  }

  /// Releases closed descriptors once nothing pins them.
  fn release_retired(&self) {
    if self.pins.load(Ordering::SeqCst) != 0 {
      return;
    }
    let retired = mem::take(&mut *self.retired.lock());
    for Retired { fd, before_release } in retired {
      before_release(fd);
      if let Err(err) = syscall!(close(fd)) {
        log::warn!("close({fd}) failed: {err}");
      }
      log::debug!("closed fd {fd}");
    }
  }

  pub fn fd(&self) -> RawFd {
    self.fd.load(Ordering::Acquire)
  }

  pub fn is_open(&self) -> bool {
    self.fd() != INVALID
  }

  /// `AF_UNSPEC` until allocated.
  pub fn family(&self) -> libc::c_int {
    self.family.load(Ordering::Acquire)
  }

  fn open_fd(&self) -> io::Result<FdGuard<'_>> {
    self.pin().ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
  }

  /// Creates the descriptor if there is none yet. No-op otherwise.
  pub fn allocate(&self, family: libc::c_int) -> io::Result<RawFd> {
    Ok(self.allocate_pinned(family)?.fd())
  }

  fn allocate_pinned(&self, family: libc::c_int) -> io::Result<FdGuard<'_>> {
    if let Some(pinned) = self.pin() {
      return Ok(pinned);
    }

    let fd = syscall!(socket(family, libc::SOCK_STREAM, 0))?;
    if let Err(err) = prepare(fd) {
      let _ = syscall!(close(fd));
      return Err(err);
    }

    match self.fd.compare_exchange(
      INVALID,
      fd,
      Ordering::AcqRel,
      Ordering::Acquire,
    ) {
      Ok(_) => {
        self.family.store(family, Ordering::Release);
        log::debug!("allocated socket fd {fd} (family {family})");
      }
      // Another thread allocated first.
      Err(_) => {
        let _ = syscall!(close(fd));
      }
    }
    self.open_fd()
  }

  pub fn bind(&self, addr: SocketAddr) -> io::Result<()> {
    let pinned = self.allocate_pinned(net_utils::family_of(&addr))?;
    let fd = pinned.fd();
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;

    let (storage, len) = net_utils::std_socketaddr_into_libc(addr);
    syscall!(bind(
      fd,
      &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
      len
    ))?;
    log::debug!("fd {fd} bound to {addr}");
    Ok(())
  }

  pub fn listen(&self, backlog: i32) -> io::Result<()> {
    let pinned = self.open_fd()?;
    let fd = pinned.fd();
    syscall!(listen(fd, backlog))?;
    log::debug!("fd {fd} listening (backlog {backlog})");
    Ok(())
  }

  /// Starts a non-blocking connect. `EINPROGRESS` comes back as an error.
  pub fn connect(&self, addr: SocketAddr) -> io::Result<()> {
    let pinned = self.allocate_pinned(net_utils::family_of(&addr))?;
    let (storage, len) = net_utils::std_socketaddr_into_libc(addr);
    syscall!(connect(
      pinned.fd(),
      &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
      len
    ))?;
    Ok(())
  }

  /// One non-blocking accept. The returned descriptor is already
  /// non-blocking and close-on-exec.
  pub fn accept(&self) -> io::Result<(RawFd, SocketAddr)> {
    let pinned = self.open_fd()?;
    let fd = pinned.fd();
    // SAFETY: all-zero sockaddr_storage is valid.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let addr_ptr = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr;

    #[cfg(any(
      target_os = "linux",
      target_os = "android",
      target_os = "freebsd",
      target_os = "dragonfly",
      target_os = "openbsd",
      target_os = "netbsd"
    ))]
    let client = syscall!(accept4(
      fd,
      addr_ptr,
      &mut len,
      libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC
    ))?;

    #[cfg(not(any(
      target_os = "linux",
      target_os = "android",
      target_os = "freebsd",
      target_os = "dragonfly",
      target_os = "openbsd",
      target_os = "netbsd"
    )))]
    let client = {
      let client = syscall!(accept(fd, addr_ptr, &mut len))?;
      if let Err(err) = prepare(client) {
        let _ = syscall!(close(client));
        return Err(err);
      }
      client
    };

    match net_utils::libc_socketaddr_into_std(&storage) {
      Ok(peer) => Ok((client, peer)),
      Err(err) => {
        let _ = syscall!(close(client));
        Err(err)
      }
    }
  }

  /// One `recv`, retried on `EINTR`.
  pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
    let pinned = self.open_fd()?;
    let n = syscall_retry!(recv(
      pinned.fd(),
      buf.as_mut_ptr() as *mut libc::c_void,
      buf.len(),
      0
    ))?;
    Ok(n as usize)
  }

  /// One `send`, retried on `EINTR`. Never raises `SIGPIPE`.
  pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
    let pinned = self.open_fd()?;
    let n = syscall_retry!(send(
      pinned.fd(),
      buf.as_ptr() as *const libc::c_void,
      buf.len(),
      SEND_FLAGS
    ))?;
    Ok(n as usize)
  }

  /// Pending error on the socket (`SO_ERROR`), clearing it.
  pub fn take_error(&self) -> io::Result<Option<io::Error>> {
    let pinned = self.open_fd()?;
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    syscall!(getsockopt(
      pinned.fd(),
      libc::SOL_SOCKET,
      libc::SO_ERROR,
      &mut value as *mut libc::c_int as *mut libc::c_void,
      &mut len,
    ))?;
    Ok((value != 0).then(|| io::Error::from_raw_os_error(value)))
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    let pinned = self.open_fd()?;
    // SAFETY: all-zero sockaddr_storage is valid.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getsockname(
      pinned.fd(),
      &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
      &mut len
    ))?;
    net_utils::libc_socketaddr_into_std(&storage)
  }

  pub fn peer_addr(&self) -> io::Result<SocketAddr> {
    let pinned = self.open_fd()?;
    // SAFETY: all-zero sockaddr_storage is valid.
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    syscall!(getpeername(
      pinned.fd(),
      &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
      &mut len
    ))?;
    net_utils::libc_socketaddr_into_std(&storage)
  }

  /// Closes the descriptor if open. `before_release` runs after the
  /// descriptor is marked invalid and shut down, but while its number is
  /// still reserved: right away, or on the thread that drops the last
  /// [`FdGuard`] if the descriptor is pinned. Returns whether the socket was
  /// open.
  pub fn close_with(
    &self,
    before_release: impl FnOnce(RawFd) + Send + 'static,
  ) -> bool {
    let fd = self.fd.swap(INVALID, Ordering::SeqCst);
    if fd == INVALID {
      return false;
    }

    // ENOTCONN for listeners and unconnected sockets.
    let _ = syscall!(shutdown(fd, libc::SHUT_RDWR));
    self
      .retired
      .lock()
      .push(Retired { fd, before_release: Box::new(before_release) });
    self.release_retired();
    true
  }

  /// Idempotent.
  pub fn close(&self) -> bool {
    self.close_with(|_| {})
  }
}

impl Default for RawSocket {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for RawSocket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RawSocket")
      .field("fd", &self.fd())
      .field("family", &self.family())
      .finish_non_exhaustive()
  }
}

impl Drop for RawSocket {
  fn drop(&mut self) {
    self.close();
  }
}
