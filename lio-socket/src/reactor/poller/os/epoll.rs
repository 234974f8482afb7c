use super::super::notifier::{NOTIFY_KEY, Notifier};
use super::super::{ReadinessPoll, util};
use crate::reactor::Interest;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, ptr};

const ERROR_BITS: u32 = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
const READ_BITS: u32 = (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
const WRITE_BITS: u32 = libc::EPOLLOUT as u32;

/// One-shot epoll mask for `interest`.
fn mask_for(interest: Interest) -> u32 {
  let mut mask = libc::EPOLLONESHOT as u32;
  if interest.is_readable() {
    mask |= READ_BITS;
  }
  if interest.is_writable() {
    mask |= WRITE_BITS;
  }
  mask
}

/// epoll instance plus the pipe that interrupts `epoll_wait`.
pub struct OsPoller {
  epfd: OwnedFd,
  wakeup: Notifier,
}

impl OsPoller {
  pub fn new() -> io::Result<Self> {
    let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
    // SAFETY: epoll_create1 just returned this descriptor.
    let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
    let poller = Self { epfd, wakeup: Notifier::new()? };

    // Level-triggered: a pending wake-up keeps firing until drained.
    poller.control(
      libc::EPOLL_CTL_ADD,
      poller.wakeup.read_fd(),
      libc::EPOLLIN as u32,
      NOTIFY_KEY,
    )?;
    Ok(poller)
  }

  fn control(
    &self,
    op: libc::c_int,
    fd: RawFd,
    events: u32,
    key: u64,
  ) -> io::Result<()> {
    let mut event = libc::epoll_event { events, u64: key };
    syscall!(epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event))?;
    Ok(())
  }
}

impl ReadinessPoll for OsPoller {
  type NativeEvent = libc::epoll_event;

  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.control(libc::EPOLL_CTL_ADD, fd, mask_for(interest), key)
  }

  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    self.control(libc::EPOLL_CTL_MOD, fd, mask_for(interest), key)
  }

  fn delete(&self, fd: RawFd) -> io::Result<()> {
    let result = syscall!(epoll_ctl(
      self.epfd.as_raw_fd(),
      libc::EPOLL_CTL_DEL,
      fd,
      ptr::null_mut(),
    ));

    match result {
      Ok(_) => Ok(()),
      // The kernel drops the interest together with a closed fd.
      Err(err) if err.raw_os_error() == Some(libc::EBADF) => {
        Err(io::Error::from_raw_os_error(libc::ENOENT))
      }
      Err(err) => Err(err),
    }
  }

  fn wait(
    &self,
    events: &mut [Self::NativeEvent],
    timeout: Option<Duration>,
  ) -> io::Result<usize> {
    let capacity = libc::c_int::try_from(events.len()).unwrap_or(libc::c_int::MAX);
    let n = syscall!(epoll_wait(
      self.epfd.as_raw_fd(),
      events.as_mut_ptr(),
      capacity,
      util::timeout_to_millis(timeout),
    ))? as usize;
    debug_assert!(n <= events.len());

    if events[..n].iter().any(|event| event.u64 == NOTIFY_KEY) {
      self.wakeup.drain();
    }
    Ok(n)
  }

  fn notify(&self) -> io::Result<()> {
    self.wakeup.notify()
  }

  fn event_key(event: &Self::NativeEvent) -> u64 {
    event.u64
  }

  fn event_interest(event: &Self::NativeEvent) -> Interest {
    let bits = event.events;
    let failed = bits & ERROR_BITS != 0;
    let readable = failed || bits & READ_BITS != 0;
    let writable = failed || bits & WRITE_BITS != 0;
    Interest::merge(readable, writable).unwrap_or(Interest::Read)
  }
}
