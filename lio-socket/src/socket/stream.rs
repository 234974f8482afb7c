use super::AsyncSocket;
use super::transfer::PendingTransfer;
use crate::error::{Error, Result};
use crate::reactor::{Deadline, Interest, Readiness};

use std::io;
use std::time::Duration;

impl AsyncSocket {
  /// Reads exactly `count` bytes.
  ///
  /// `completion` receives all `count` bytes, or `None` if the peer
  /// disconnected, an error occurred, the socket was closed, or `timeout`
  /// (`None` waits forever) elapsed first. Bytes received before a failure
  /// are discarded. `count == 0` completes at once with an empty buffer.
  pub fn read_bytes_fully<F>(
    &self,
    count: usize,
    timeout: Option<Duration>,
    completion: F,
  ) where
    F: FnOnce(Option<Vec<u8>>) + Send + 'static,
  {
    let transfer = PendingTransfer::read(
      count,
      Deadline::after(timeout),
      Box::new(move |result| completion(result.ok())),
    );
    transfer.resume(self.shared.clone());
  }

  /// Reads whatever is available, up to `count` bytes, without waiting.
  ///
  /// `completion` receives the bytes read, an empty buffer if nothing is
  /// available right now, or `None` if the peer disconnected, the socket is
  /// closed, or the read failed. Runs inline.
  pub fn read_some_bytes<F>(&self, count: usize, completion: F)
  where
    F: FnOnce(Option<Vec<u8>>),
  {
    if !self.is_open() {
      return completion(None);
    }
    if count == 0 {
      return completion(Some(Vec::new()));
    }

    let mut buf = vec![0; count];
    match self.shared.raw.recv(&mut buf) {
      Ok(0) => completion(None),
      Ok(n) => {
        buf.truncate(n);
        completion(Some(buf))
      }
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        completion(Some(Vec::new()))
      }
      Err(err) => {
        log::debug!("read on fd {} failed: {err}", self.fd());
        completion(None)
      }
    }
  }

  /// Writes all of `bytes`, waiting for the socket to drain as often as
  /// needed, with no time limit.
  ///
  /// `completion` receives the number of bytes written (always
  /// `bytes.len()`) or the error that stopped the write.
  pub fn write_bytes<F>(&self, bytes: &[u8], completion: F)
  where
    F: FnOnce(io::Result<usize>) + Send + 'static,
  {
    self.write_bytes_with_timeout(bytes, None, completion)
  }

  /// Writes `bytes[offset..offset + length]`, like
  /// [`write_bytes`](Self::write_bytes). An out-of-bounds range is rejected
  /// before anything is sent.
  pub fn write_bytes_range<F>(
    &self,
    bytes: &[u8],
    offset: usize,
    length: usize,
    completion: F,
  ) -> Result<()>
  where
    F: FnOnce(io::Result<usize>) + Send + 'static,
  {
    let range = offset
      .checked_add(length)
      .filter(|end| *end <= bytes.len())
      .map(|end| offset..end)
      .ok_or(Error::InvalidRange { offset, length, len: bytes.len() })?;

    self.write_bytes(&bytes[range], completion);
    Ok(())
  }

  /// [`write_bytes`](Self::write_bytes) that gives up with
  /// [`io::ErrorKind::TimedOut`] once `timeout` has elapsed. Bytes already
  /// sent stay sent.
  pub fn write_bytes_with_timeout<F>(
    &self,
    bytes: &[u8],
    timeout: Option<Duration>,
    completion: F,
  ) where
    F: FnOnce(io::Result<usize>) + Send + 'static,
  {
    let transfer = PendingTransfer::write(
      bytes.to_vec(),
      Deadline::after(timeout),
      Box::new(move |result| {
        completion(result.map(|buf| buf.len()).map_err(io::Error::from))
      }),
    );
    transfer.resume(self.shared.clone());
  }

  /// Writes all of `bytes`, blocking the calling thread until the socket
  /// has taken them. Returns `true` iff every byte was sent.
  ///
  /// Must not be called from a completion callback: the reactor thread
  /// would wait on itself. Such calls fail immediately.
  pub fn write_bytes_fully(&self, bytes: &[u8]) -> bool {
    let reactor = self.shared.ctx.reactor();
    let mut sent = 0;

    while sent < bytes.len() {
      match self.shared.raw.send(&bytes[sent..]) {
        Ok(0) => {
          log::debug!("write on fd {} accepted no bytes", self.fd());
          return false;
        }
        Ok(n) => sent += n,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
          if reactor.is_reactor_thread() {
            log::error!(
              "write_bytes_fully would block the reactor thread on fd {}",
              self.fd()
            );
            return false;
          }

          let Some(pinned) = self.shared.raw.pin() else {
            log::debug!("write stopped: socket closed");
            return false;
          };
          let (tx, rx) = crossbeam_channel::bounded(1);
          reactor.register(
            pinned.fd(),
            Interest::Write,
            None,
            Box::new(move |_, readiness| {
              let _ = tx.send(readiness);
            }),
          );
          // Unpinned before blocking so a close can complete the wait.
          drop(pinned);

          match rx.recv() {
            Ok(Readiness::Ready) => {}
            Ok(other) => {
              log::debug!("write on fd {} stopped: {other:?}", self.fd());
              return false;
            }
            // Callback dropped unfired: replaced by another writer.
            Err(_) => return false,
          }
        }
        Err(err) => {
          log::debug!("write on fd {} failed: {err}", self.fd());
          return false;
        }
      }
    }

    true
  }
}
