use super::ReadinessPoll;
use crate::reactor::Interest;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

// Helper utilities

/// RAII wrapper for a socket file descriptor
pub struct OwnedSocket(RawFd);

impl AsRawFd for OwnedSocket {
  fn as_raw_fd(&self) -> RawFd {
    self.0
  }
}

impl Drop for OwnedSocket {
  fn drop(&mut self) {
    let _ = syscall!(close(self.0));
  }
}

/// Create a pair of connected, non-blocking sockets (Unix domain socket pair)
pub fn create_socket_pair() -> io::Result<(OwnedSocket, OwnedSocket)> {
  let mut fds = [0i32; 2];

  let _ = syscall!(socketpair(
    libc::AF_UNIX,
    libc::SOCK_STREAM,
    0,
    fds.as_mut_ptr()
  ))?;

  let pair = (OwnedSocket(fds[0]), OwnedSocket(fds[1]));
  crate::socket::raw::set_nonblocking(fds[0])?;
  crate::socket::raw::set_nonblocking(fds[1])?;
  Ok(pair)
}

fn write_some(fd: RawFd, data: &[u8]) -> io::Result<()> {
  let written =
    syscall!(write(fd, data.as_ptr() as *const libc::c_void, data.len()))?;
  assert!(written > 0, "Failed to write data");
  Ok(())
}

fn keys<P: ReadinessPoll>(events: &[P::NativeEvent]) -> Vec<u64> {
  events
    .iter()
    .map(P::event_key)
    .filter(|key| *key != super::NOTIFY_KEY)
    .collect()
}

/// Adding read interest and waiting returns no events when no data is available
pub fn test_add_read_no_data<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _sock2) = create_socket_pair()?;
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  poller.add(sock1.as_raw_fd(), 1, Interest::Read)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(10)))?;
  assert!(keys::<P>(&events[..n]).is_empty(), "Expected no events");

  Ok(())
}

/// Read interest triggers when data is written
pub fn test_read_becomes_ready<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, sock2) = create_socket_pair()?;
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  write_some(sock2.as_raw_fd(), b"hello")?;
  poller.add(sock1.as_raw_fd(), 1, Interest::Read)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  assert_eq!(n, 1, "Expected 1 read event");
  assert_eq!(P::event_key(&events[0]), 1);
  assert!(P::event_interest(&events[0]).is_readable());

  Ok(())
}

/// Write interest triggers immediately (sockets are usually writable)
pub fn test_write_immediately_ready<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _sock2) = create_socket_pair()?;
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  poller.add(sock1.as_raw_fd(), 2, Interest::Write)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  let found = events[..n]
    .iter()
    .any(|e| P::event_key(e) == 2 && P::event_interest(e).is_writable());
  assert!(found, "Expected writable event with key 2");

  Ok(())
}

/// A delivered event disarms the fd until it is modified again
pub fn test_one_shot_until_rearmed<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, sock2) = create_socket_pair()?;
  let fd1 = sock1.as_raw_fd();
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  write_some(sock2.as_raw_fd(), b"x")?;
  poller.add(fd1, 7, Interest::Read)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  assert_eq!(keys::<P>(&events[..n]), vec![7]);

  // Data is still unread, but the registration already fired.
  let n = poller.wait(&mut events, Some(Duration::from_millis(20)))?;
  assert!(keys::<P>(&events[..n]).is_empty(), "one-shot fired twice");

  poller.modify(fd1, 7, Interest::Read)?;
  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  assert_eq!(keys::<P>(&events[..n]), vec![7]);

  Ok(())
}

/// Modifying interest on an existing fd
pub fn test_modify_interest<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _sock2) = create_socket_pair()?;
  let fd1 = sock1.as_raw_fd();
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  poller.add(fd1, 4, Interest::Read)?;
  poller.modify(fd1, 4, Interest::Write)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  assert_eq!(keys::<P>(&events[..n]), vec![4]);

  Ok(())
}

/// Deleting interest prevents further events
pub fn test_delete_interest<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _sock2) = create_socket_pair()?;
  let fd1 = sock1.as_raw_fd();
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  poller.add(fd1, 5, Interest::Write)?;
  poller.delete(fd1)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(10)))?;
  assert!(!keys::<P>(&events[..n]).contains(&5));

  // Deleted fds can be added again.
  poller.add(fd1, 6, Interest::Write)?;

  Ok(())
}

/// Adding the same fd twice fails with EEXIST
pub fn test_add_twice_fails<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _sock2) = create_socket_pair()?;
  let fd1 = sock1.as_raw_fd();

  poller.add(fd1, 1, Interest::Read)?;
  let err = poller.add(fd1, 1, Interest::Write).unwrap_err();
  assert_eq!(err.raw_os_error(), Some(libc::EEXIST));

  Ok(())
}

/// Monitoring multiple file descriptors simultaneously
pub fn test_multiple_fds<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let (sock1, _a) = create_socket_pair()?;
  let (sock2, _b) = create_socket_pair()?;
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  poller.add(sock1.as_raw_fd(), 10, Interest::Write)?;
  poller.add(sock2.as_raw_fd(), 20, Interest::Write)?;

  let n = poller.wait(&mut events, Some(Duration::from_millis(100)))?;
  let got = keys::<P>(&events[..n]);
  assert!(got.contains(&10), "Expected event for fd1 with key 10");
  assert!(got.contains(&20), "Expected event for fd2 with key 20");

  Ok(())
}

/// notify() wakes up a blocking wait
pub fn test_notify_wakes_wait<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll + Send + Sync + 'static,
  P::NativeEvent: Clone,
{
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  let poller_ref = std::sync::Arc::new(poller);
  let p_clone = poller_ref.clone();

  std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(50));
    p_clone.notify().expect("notify() from spawned thread failed");
  });

  let start = Instant::now();
  let _n = poller_ref.wait(&mut events, Some(Duration::from_secs(5)))?;
  let elapsed = start.elapsed();

  assert!(
    elapsed < Duration::from_secs(1),
    "Notify should have woken up wait quickly, but took {:?}",
    elapsed
  );

  // The wake-up is consumed.
  let start = Instant::now();
  let _n = poller_ref.wait(&mut events, Some(Duration::from_millis(50)))?;
  assert!(start.elapsed() >= Duration::from_millis(40));

  Ok(())
}

/// Deleting a non-existent fd returns ENOENT
pub fn test_delete_nonexistent_fd<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let result = poller.delete(999);
  assert_eq!(
    result.unwrap_err().raw_os_error(),
    Some(libc::ENOENT),
    "Error should be ENOENT"
  );

  Ok(())
}

/// Timeout elapses when nothing is registered
pub fn test_timeout_no_events<P>(poller: P) -> io::Result<()>
where
  P: ReadinessPoll,
  P::NativeEvent: Clone,
{
  let mut events = vec![unsafe { std::mem::zeroed() }; 16];

  let start = Instant::now();
  let n = poller.wait(&mut events, Some(Duration::from_millis(30)))?;
  assert_eq!(n, 0);
  assert!(start.elapsed() >= Duration::from_millis(25));

  Ok(())
}

/// Generates one `#[test]` per poller test case.
///
/// Usage: `generate_poller_tests!(OsPoller::new().unwrap());`
#[macro_export]
#[doc(hidden)]
macro_rules! generate_poller_tests {
  ($poller:expr) => {
    $crate::generate_poller_tests!(@case $poller;
      test_add_read_no_data,
      test_read_becomes_ready,
      test_write_immediately_ready,
      test_one_shot_until_rearmed,
      test_modify_interest,
      test_delete_interest,
      test_add_twice_fails,
      test_multiple_fds,
      test_notify_wakes_wait,
      test_delete_nonexistent_fd,
      test_timeout_no_events
    );
  };
  (@case $poller:expr; $($name:ident),* $(,)?) => {
    $(
      #[test]
      fn $name() {
        let poller = $poller;
        $crate::reactor::poller::tests::$name(poller)
          .expect(concat!(stringify!($name), " failed"));
      }
    )*
  };
}
