//! Wake-up mechanism for a thread blocked in the poller.
//!
//! - On kqueue: `EVFILT_USER` events, handled inside the kqueue poller itself.
//! - On epoll: a non-blocking pipe whose read end is registered with the
//!   poller (POSIX-compliant, works on Linux and Redox OS).

/// Special key used to identify notification events
pub const NOTIFY_KEY: u64 = u64::MAX;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use self::pipe::Notifier;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod pipe {
  use std::io;
  use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

  pub struct Notifier {
    /// Read end of the pipe
    read_fd: OwnedFd,
    /// Write end of the pipe
    write_fd: OwnedFd,
  }

  impl Notifier {
    /// Create a new notifier using a pipe
    pub fn new() -> io::Result<Self> {
      let mut fds = [0i32; 2];
      syscall!(pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK))?;

      // SAFETY: pipe2 just handed us two fresh descriptors.
      Ok(Self {
        read_fd: unsafe { OwnedFd::from_raw_fd(fds[0]) },
        write_fd: unsafe { OwnedFd::from_raw_fd(fds[1]) },
      })
    }

    /// The file descriptor to register with the poller
    pub fn read_fd(&self) -> RawFd {
      self.read_fd.as_raw_fd()
    }

    /// Trigger a notification by writing to the pipe
    pub fn notify(&self) -> io::Result<()> {
      let byte: u8 = 1;
      let result = syscall!(write(
        self.write_fd.as_raw_fd(),
        &byte as *const u8 as *const libc::c_void,
        1,
      ));

      match result {
        // Pipe already full: a wake-up is pending anyway.
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
        other => other.map(|_| ()),
      }
    }

    /// Empty the pipe so the next wait blocks again.
    pub fn drain(&self) {
      let mut buf = [0u8; 64];
      loop {
        let n = unsafe {
          libc::read(
            self.read_fd.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
          )
        };
        if n <= 0 {
          break;
        }
      }
    }
  }
}
