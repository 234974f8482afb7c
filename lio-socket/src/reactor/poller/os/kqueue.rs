use super::super::notifier::NOTIFY_KEY;
use super::super::{ReadinessPoll, util};
use crate::reactor::Interest;
use crate::sync::Mutex;

use std::collections::HashSet;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use std::{io, ptr};

/// Special identifier for EVFILT_USER notification events
const NOTIFY_IDENT: usize = NOTIFY_KEY as usize;

/// Wrapper around a kqueue file descriptor
pub struct OsPoller {
  kq_fd: OwnedFd,
  /// Track registered fds to match epoll's strict add/modify semantics
  registered_fds: Mutex<HashSet<RawFd>>,
}

impl OsPoller {
  /// Create a new kqueue instance
  pub fn new() -> io::Result<Self> {
    let kqueue = Self {
      kq_fd: unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) },
      registered_fds: Mutex::new(HashSet::new()),
    };

    // Register EVFILT_USER for notifications
    // Using EV_CLEAR for edge-triggered behavior to avoid event storms
    let kev = libc::kevent {
      ident: NOTIFY_IDENT as libc::uintptr_t,
      filter: libc::EVFILT_USER,
      flags: libc::EV_ADD | libc::EV_ENABLE | libc::EV_CLEAR,
      fflags: 0,
      data: 0,
      udata: NOTIFY_IDENT as *mut libc::c_void,
    };

    kqueue.submit(&[kev])?;

    Ok(kqueue)
  }

  fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
    if changes.is_empty() {
      return Ok(());
    }

    let ret = syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      changes.as_ptr(),
      changes.len() as i32,
      ptr::null_mut(),
      0,
      ptr::null(),
    ))?;

    assert_eq!(
      ret, 0,
      "kevent with no output events should return 0, got {}",
      ret
    );
    Ok(())
  }

  /// Arm the filters in `interest` in a single syscall (batched)
  fn arm(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    let mut changes: [libc::kevent; 2] = unsafe { std::mem::zeroed() };
    let mut n = 0;

    for (wanted, filter) in [
      (interest.is_readable(), libc::EVFILT_READ),
      (interest.is_writable(), libc::EVFILT_WRITE),
    ] {
      if wanted {
        changes[n] = libc::kevent {
          ident: fd as libc::uintptr_t,
          filter,
          flags: libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT,
          fflags: 0,
          data: 0,
          udata: key as usize as *mut libc::c_void,
        };
        n += 1;
      }
    }

    self.submit(&changes[..n])
  }

  /// Delete interest for a file descriptor
  fn delete_filter(&self, fd: RawFd, filter: i16) -> io::Result<()> {
    let kev = libc::kevent {
      ident: fd as libc::uintptr_t,
      filter,
      flags: libc::EV_DELETE,
      fflags: 0,
      data: 0,
      udata: ptr::null_mut(),
    };

    match self.submit(&[kev]) {
      Err(err)
        if !util::is_not_found_error(&err)
          && err.raw_os_error() != Some(libc::EBADF) =>
      {
        Err(err)
      }
      _ => Ok(()),
    }
  }
}

impl ReadinessPoll for OsPoller {
  type NativeEvent = libc::kevent;

  fn add(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    // Match epoll's EEXIST behavior
    if !self.registered_fds.lock().insert(fd) {
      return Err(io::Error::from_raw_os_error(libc::EEXIST));
    }

    match self.arm(fd, key, interest) {
      Ok(()) => Ok(()),
      Err(e) => {
        // Rollback: remove from tracking if syscall failed
        let removed = self.registered_fds.lock().remove(&fd);
        assert!(removed, "fd should have been in registered_fds for rollback");
        Err(e)
      }
    }
  }

  fn modify(&self, fd: RawFd, key: u64, interest: Interest) -> io::Result<()> {
    // Match epoll's ENOENT behavior
    if !self.registered_fds.lock().contains(&fd) {
      return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }

    // A filter that is still armed from an earlier registration would fire
    // for nobody.
    if !interest.is_readable() {
      self.delete_filter(fd, libc::EVFILT_READ)?;
    }
    if !interest.is_writable() {
      self.delete_filter(fd, libc::EVFILT_WRITE)?;
    }

    self.arm(fd, key, interest)
  }

  fn delete(&self, fd: RawFd) -> io::Result<()> {
    if !self.registered_fds.lock().remove(&fd) {
      return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }

    self.delete_filter(fd, libc::EVFILT_READ)?;
    self.delete_filter(fd, libc::EVFILT_WRITE)?;
    Ok(())
  }

  fn wait(
    &self,
    events: &mut [Self::NativeEvent],
    timeout: Option<Duration>,
  ) -> io::Result<usize> {
    let timespec = timeout.map(util::duration_to_timespec);
    let timeout_ptr = match timespec.as_ref() {
      Some(ts) => ts as *const libc::timespec,
      None => ptr::null(),
    };

    let n = syscall!(kevent(
      self.kq_fd.as_raw_fd(),
      ptr::null(),
      0,
      events.as_mut_ptr(),
      events.len() as i32,
      timeout_ptr,
    ))? as usize;

    assert!(
      n <= events.len(),
      "kevent returned more events ({}) than buffer size ({})",
      n,
      events.len()
    );

    Ok(n)
  }

  fn notify(&self) -> io::Result<()> {
    let kev = libc::kevent {
      ident: NOTIFY_IDENT as libc::uintptr_t,
      filter: libc::EVFILT_USER,
      flags: 0,
      fflags: libc::NOTE_TRIGGER,
      data: 0,
      udata: NOTIFY_IDENT as *mut libc::c_void,
    };

    self.submit(&[kev])
  }

  fn event_key(event: &Self::NativeEvent) -> u64 {
    event.udata as usize as u64
  }

  fn event_interest(event: &Self::NativeEvent) -> Interest {
    match event.filter {
      libc::EVFILT_WRITE => Interest::Write,
      _ => Interest::Read,
    }
  }
}
