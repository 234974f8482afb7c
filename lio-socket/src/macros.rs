macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}

/// Retries a `syscall!` while it fails with `EINTR`.
macro_rules! syscall_retry {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
    loop {
      match syscall!($fn($($arg),*)) {
        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
        other => break other,
      }
    }
  }};
}
