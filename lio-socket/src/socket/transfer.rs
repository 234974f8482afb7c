//! Resumable partial reads and writes.
//!
//! A [`PendingTransfer`] owns its buffer, a cursor and a deadline. It moves
//! bytes until the socket would block, then arms a one-shot registration and
//! continues from the reactor when the descriptor is ready again:
//!
//! ```text
//! Attempting ──► Complete
//!     │  ▲
//!     ▼  │ ready
//!  Waiting ──► TimedOut / Closed / Failed
//! ```

use super::Shared;
use crate::reactor::{Deadline, Interest, Readiness};

use std::fmt;
use std::io;
use std::sync::Arc;

/// Why a transfer did not complete.
#[derive(Debug)]
pub(crate) enum Failure {
  /// The peer closed its side before the transfer was done.
  Disconnected,
  TimedOut,
  /// The local socket was closed.
  Closed,
  Io(io::Error),
}

impl From<Failure> for io::Error {
  fn from(failure: Failure) -> Self {
    match failure {
      Failure::Disconnected => io::ErrorKind::UnexpectedEof.into(),
      Failure::TimedOut => io::ErrorKind::TimedOut.into(),
      Failure::Closed => io::ErrorKind::NotConnected.into(),
      Failure::Io(err) => err,
    }
  }
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Disconnected => f.write_str("peer disconnected"),
      Self::TimedOut => f.write_str("timed out"),
      Self::Closed => f.write_str("socket closed"),
      Self::Io(err) => err.fmt(f),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
  Read,
  Write,
}

pub(crate) type Completion =
  Box<dyn FnOnce(Result<Vec<u8>, Failure>) + Send + 'static>;

/// What one round of syscalls achieved.
#[derive(Debug)]
pub(crate) enum Progress {
  Done,
  WouldBlock,
  Failed(Failure),
}

pub(crate) struct PendingTransfer {
  buf: Vec<u8>,
  cursor: usize,
  direction: Direction,
  deadline: Deadline,
  completion: Completion,
}

impl PendingTransfer {
  /// Reads exactly `count` bytes into a fresh buffer.
  pub fn read(count: usize, deadline: Deadline, completion: Completion) -> Self {
    Self {
      buf: vec![0; count],
      cursor: 0,
      direction: Direction::Read,
      deadline,
      completion,
    }
  }

  /// Writes all of `bytes`.
  pub fn write(bytes: Vec<u8>, deadline: Deadline, completion: Completion) -> Self {
    Self { buf: bytes, cursor: 0, direction: Direction::Write, deadline, completion }
  }

  pub fn total(&self) -> usize {
    self.buf.len()
  }

  pub fn transferred(&self) -> usize {
    self.cursor
  }

  pub fn remaining(&self) -> usize {
    self.buf.len() - self.cursor
  }

  fn interest(&self) -> Interest {
    match self.direction {
      Direction::Read => Interest::Read,
      Direction::Write => Interest::Write,
    }
  }

  /// Moves bytes until done, the socket would block, or something fails.
  /// Partial progress is kept in the cursor.
  pub fn advance(&mut self, socket: &Shared) -> Progress {
    while self.remaining() > 0 {
      if !socket.raw.is_open() {
        return Progress::Failed(Failure::Closed);
      }

      let result = match self.direction {
        Direction::Read => socket.raw.recv(&mut self.buf[self.cursor..]),
        Direction::Write => socket.raw.send(&self.buf[self.cursor..]),
      };

      match result {
        Ok(0) => {
          return Progress::Failed(match self.direction {
            Direction::Read => Failure::Disconnected,
            Direction::Write => Failure::Io(io::ErrorKind::WriteZero.into()),
          });
        }
        Ok(n) => {
          assert!(n <= self.remaining(), "kernel moved more than requested");
          self.cursor += n;
          log::trace!(
            "{:?} progress {}/{} on fd {}",
            self.direction,
            self.transferred(),
            self.total(),
            socket.raw.fd()
          );
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
          return Progress::WouldBlock;
        }
        // Closed between the check and the syscall.
        Err(err) if err.raw_os_error() == Some(libc::EBADF) => {
          return Progress::Failed(Failure::Closed);
        }
        Err(err) => return Progress::Failed(Failure::Io(err)),
      }
    }

    Progress::Done
  }

  fn finish(self, result: Result<(), Failure>) {
    let Self { buf, completion, .. } = self;
    completion(result.map(|()| buf));
  }

  /// Drives the transfer to completion, suspending on `socket`'s reactor
  /// whenever the descriptor would block. The completion fires exactly once.
  pub fn resume(mut self, socket: Arc<Shared>) {
    match self.advance(&socket) {
      Progress::Done => self.finish(Ok(())),
      Progress::Failed(failure) => {
        log::trace!("{:?} on fd {} failed: {failure}", self.direction, socket.raw.fd());
        self.finish(Err(failure))
      }
      Progress::WouldBlock => {
        if self.deadline.is_expired() {
          return self.finish(Err(Failure::TimedOut));
        }

        let owner = socket.clone();
        let Some(pinned) = owner.raw.pin() else {
          return self.finish(Err(Failure::Closed));
        };

        let interest = self.interest();
        let timeout = self.deadline.remaining();
        let reactor = socket.ctx.reactor().clone();
        reactor.register(
          pinned.fd(),
          interest,
          timeout,
          Box::new(move |_, readiness| match readiness {
            Readiness::Ready => self.resume(socket),
            Readiness::TimedOut => self.finish(Err(Failure::TimedOut)),
            Readiness::Closed => self.finish(Err(Failure::Closed)),
            Readiness::Failed(err) => self.finish(Err(Failure::Io(err))),
          }),
        );
      }
    }
  }
}

impl fmt::Debug for PendingTransfer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PendingTransfer")
      .field("direction", &self.direction)
      .field("cursor", &self.cursor)
      .field("total", &self.buf.len())
      .field("deadline", &self.deadline)
      .finish_non_exhaustive()
  }
}
