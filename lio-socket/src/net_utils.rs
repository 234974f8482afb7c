use crate::error::{Error, Result};

use std::{
  io, mem,
  net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6,
    ToSocketAddrs,
  },
};

/// Resolves `address` (numeric form first, then a name lookup) to the first
/// matching socket address.
pub fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
  if let Ok(ip) = address.parse::<IpAddr>() {
    return Ok(SocketAddr::new(ip, port));
  }

  let resolution_error =
    || Error::AddressResolution { address: address.to_owned(), port };

  match (address, port).to_socket_addrs() {
    Ok(mut addrs) => addrs.next().ok_or_else(resolution_error),
    Err(err) => {
      log::debug!("lookup of {address} failed: {err}");
      Err(resolution_error())
    }
  }
}

pub fn family_of(addr: &SocketAddr) -> libc::c_int {
  match addr {
    SocketAddr::V4(_) => libc::AF_INET,
    SocketAddr::V6(_) => libc::AF_INET6,
  }
}

/// Address family of an open socket.
pub fn socket_family(fd: std::os::fd::RawFd) -> io::Result<libc::c_int> {
  // SAFETY: all-zero sockaddr_storage is valid.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
  syscall!(getsockname(
    fd,
    &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
    &mut len
  ))?;
  Ok(storage.ss_family as libc::c_int)
}

/// Reads a socket address the kernel wrote into `storage`.
pub fn libc_socketaddr_into_std(
  storage: &libc::sockaddr_storage,
) -> io::Result<SocketAddr> {
  match storage.ss_family as libc::c_int {
    libc::AF_INET => {
      // SAFETY: ss_family says the storage holds a sockaddr_in, and
      // sockaddr_storage is large and aligned enough for it.
      let v4 = unsafe {
        &*(storage as *const libc::sockaddr_storage).cast::<libc::sockaddr_in>()
      };
      let ip = Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
      Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(v4.sin_port))))
    }
    libc::AF_INET6 => {
      // SAFETY: as above, for sockaddr_in6.
      let v6 = unsafe {
        &*(storage as *const libc::sockaddr_storage)
          .cast::<libc::sockaddr_in6>()
      };
      Ok(SocketAddr::V6(SocketAddrV6::new(
        Ipv6Addr::from(v6.sin6_addr.s6_addr),
        u16::from_be(v6.sin6_port),
        v6.sin6_flowinfo,
        v6.sin6_scope_id,
      )))
    }
    _ => Err(io::Error::from_raw_os_error(libc::EAFNOSUPPORT)),
  }
}

/// Lays out `addr` as a C socket address. Returns the storage and the length
/// to pass alongside it.
pub fn std_socketaddr_into_libc(
  addr: SocketAddr,
) -> (libc::sockaddr_storage, libc::socklen_t) {
  // SAFETY: sockaddr_storage is plain old data; all-zero is valid.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

  let len = match addr {
    SocketAddr::V4(v4) => {
      // SAFETY: sockaddr_in fits in sockaddr_storage by definition.
      unsafe {
        (&mut storage as *mut libc::sockaddr_storage)
          .cast::<libc::sockaddr_in>()
          .write(into_addr(v4));
      }
      mem::size_of::<libc::sockaddr_in>()
    }
    SocketAddr::V6(v6) => {
      // SAFETY: sockaddr_in6 fits in sockaddr_storage by definition.
      unsafe {
        (&mut storage as *mut libc::sockaddr_storage)
          .cast::<libc::sockaddr_in6>()
          .write(into_addr6(v6));
      }
      mem::size_of::<libc::sockaddr_in6>()
    }
  };

  (storage, len as libc::socklen_t)
}

fn into_addr(addr: SocketAddrV4) -> libc::sockaddr_in {
  // SAFETY: sockaddr_in is a C struct with primitive integer fields.
  let mut _addr: libc::sockaddr_in = unsafe { mem::zeroed() };

  #[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
  ))]
  {
    _addr.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
  }
  _addr.sin_family = libc::AF_INET as libc::sa_family_t;
  _addr.sin_port = addr.port().to_be();
  _addr.sin_addr = libc::in_addr { s_addr: u32::from(*addr.ip()).to_be() };

  _addr
}

fn into_addr6(addr: SocketAddrV6) -> libc::sockaddr_in6 {
  // SAFETY: sockaddr_in6 is a C struct with primitive integer/array fields.
  let mut _addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };

  #[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
  ))]
  {
    _addr.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
  }
  _addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
  _addr.sin6_port = addr.port().to_be();
  _addr.sin6_addr = libc::in6_addr { s6_addr: addr.ip().octets() };
  _addr.sin6_flowinfo = addr.flowinfo();
  _addr.sin6_scope_id = addr.scope_id();

  _addr
}
