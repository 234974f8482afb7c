use std::time::Duration;

/// Convert Duration to libc::timespec
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn duration_to_timespec(duration: Duration) -> libc::timespec {
  libc::timespec {
    tv_sec: duration.as_secs() as libc::time_t,
    tv_nsec: duration.subsec_nanos() as libc::c_long,
  }
}

/// Convert a poll timeout into epoll's millisecond form (-1 = forever).
///
/// Sub-millisecond remainders round up so a deadline is never polled early
/// into a busy loop.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn timeout_to_millis(timeout: Option<Duration>) -> i32 {
  match timeout {
    Some(d) => {
      let mut ms = d.as_millis();
      if d.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
      }
      if ms > i32::MAX as u128 { i32::MAX } else { ms as i32 }
    }
    None => -1,
  }
}

/// Check if an error is "not found" (ENOENT)
///
/// Used when deleting non-existent fd interests - should not error
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub fn is_not_found_error(err: &std::io::Error) -> bool {
  err.raw_os_error() == Some(libc::ENOENT)
}
