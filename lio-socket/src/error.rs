use std::{fmt, io};

/// Errors surfaced synchronously by socket setup calls.
///
/// Failures that happen after an operation suspended on the reactor are never
/// returned through this type; they reach the completion callback instead.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
  /// The host could neither be parsed as an address nor resolved by name.
  AddressResolution { address: String, port: u16 },
  /// A socket syscall failed with something other than "would block".
  Network(io::Error),
  /// [`for_each_accept`](crate::AsyncSocket::for_each_accept) is already
  /// running on this socket.
  AcceptLoopActive,
  /// A single [`accept`](crate::AsyncSocket::accept) is already waiting on
  /// this socket.
  AcceptPending,
  /// `offset + length` lies outside the buffer handed to a write.
  InvalidRange { offset: usize, length: usize, len: usize },
  /// The socket has no open descriptor.
  Closed,
}

/// The Result type for the lio-socket crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  /// OS error number carried by [`Error::Network`].
  pub fn errno(&self) -> Option<i32> {
    match self {
      Self::Network(err) => err.raw_os_error(),
      _ => None,
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Network(err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Self::Network(err)
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::AddressResolution { address, port } => {
        write!(f, "could not resolve address {address}:{port}")
      }
      Self::Network(err) => write!(f, "network error: {err}"),
      Self::AcceptLoopActive => {
        f.write_str("an accept loop is already running on this socket")
      }
      Self::AcceptPending => {
        f.write_str("an accept is already waiting on this socket")
      }
      Self::InvalidRange { offset, length, len } => write!(
        f,
        "range {offset}..{} is out of bounds for a buffer of {len} bytes",
        offset.saturating_add(*length)
      ),
      Self::Closed => f.write_str("socket is closed"),
    }
  }
}
