mod common;

use common::{WAIT, context, listener, manual_context};
use lio_socket::{AsyncSocket, Connection, Error};
use std::collections::HashSet;
use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn test_each_client_gets_its_own_socket() {
  const CLIENTS: usize = 8;

  let ctx = context();
  let (server, port) = listener(&ctx);
  let server = Arc::new(server);

  let (tx, rx) = mpsc::channel();
  let looping = server.clone();
  let handle = thread::spawn(move || {
    looping.for_each_accept(move |conn| {
      let _ = tx.send((conn.fd(), conn.peer_addr().unwrap(), thread::current().id()));
      // Keep it open until the test has looked at it.
      thread::sleep(Duration::from_millis(200));
    })
  });

  let clients: Vec<TcpStream> = (0..CLIENTS)
    .map(|_| TcpStream::connect(("127.0.0.1", port)).unwrap())
    .collect();

  let mut fds = HashSet::new();
  let mut peers = HashSet::new();
  let mut threads = HashSet::new();
  for _ in 0..CLIENTS {
    let (fd, peer, thread) = rx.recv_timeout(WAIT).expect("missing connection");
    fds.insert(fd);
    peers.insert(peer);
    threads.insert(thread);
  }

  assert_eq!(fds.len(), CLIENTS, "descriptors were reused while open");
  assert_eq!(threads.len(), CLIENTS, "connections shared a context");
  let expected: HashSet<_> =
    clients.iter().map(|c| c.local_addr().unwrap()).collect();
  assert_eq!(peers, expected);

  server.close();
  handle.join().unwrap().expect("loop should end cleanly on close");
}

#[test]
fn test_close_releases_blocked_loop() {
  let ctx = context();
  let (server, _port) = listener(&ctx);
  let server = Arc::new(server);

  let (done_tx, done_rx) = mpsc::channel();
  let looping = server.clone();
  thread::spawn(move || {
    let result = looping.for_each_accept(|_| {});
    done_tx.send(result.is_ok()).unwrap();
  });

  // Parked with nothing to accept.
  assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

  server.close();
  assert!(done_rx.recv_timeout(WAIT).expect("loop stayed blocked"));
}

#[test]
fn test_second_loop_is_rejected() {
  let ctx = context();
  let (server, _port) = listener(&ctx);
  let server = Arc::new(server);

  let looping = server.clone();
  let handle = thread::spawn(move || looping.for_each_accept(|_| {}));
  thread::sleep(Duration::from_millis(100));

  let err = server.for_each_accept(|_| {}).unwrap_err();
  assert!(matches!(err, Error::AcceptLoopActive));
  let err = server.accept(None, |_| {}).unwrap_err();
  assert!(matches!(err, Error::AcceptLoopActive));

  server.close();
  assert!(handle.join().unwrap().is_ok());

  // The guard is cleared once the loop has returned.
  assert!(server.for_each_accept(|_| {}).is_ok());
}

#[test]
fn test_loop_fails_when_reactor_is_stopped() {
  let (ev, ctx) = manual_context();
  ev.stop();
  let (server, _port) = listener(&ctx);
  let server = Arc::new(server);

  let (done_tx, done_rx) = mpsc::channel();
  let looping = server.clone();
  thread::spawn(move || {
    let result = looping.for_each_accept(|_| {});
    done_tx.send(result).unwrap();
  });

  let result = done_rx.recv_timeout(WAIT).expect("loop kept spinning");
  assert!(matches!(result, Err(Error::Network(_))));
  // The loop gave up without closing the listener.
  assert!(server.is_open());
}

#[test]
fn test_loop_on_unopened_socket_returns() {
  let ctx = context();
  let server = AsyncSocket::new(&ctx);
  assert!(server.for_each_accept(|_| {}).is_ok());
}

#[test]
fn test_loop_on_non_listening_socket_fails() {
  let ctx = context();
  let socket = AsyncSocket::new(&ctx);
  socket.bind(0, "127.0.0.1").unwrap();

  let err = socket.for_each_accept(|_| {}).unwrap_err();
  assert_eq!(err.errno(), Some(libc::EINVAL));
}

struct Greeter(AsyncSocket);

impl Connection for Greeter {
  fn from_socket(socket: AsyncSocket) -> Self {
    Greeter(socket)
  }
}

#[test]
fn test_for_each_accept_as_wraps_connections() {
  let ctx = context();
  let (server, port) = listener(&ctx);
  let server = Arc::new(server);

  let looping = server.clone();
  let handle = thread::spawn(move || {
    looping.for_each_accept_as::<Greeter, _>(|greeter| {
      assert!(greeter.0.write_bytes_fully(b"hi"));
    })
  });

  let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
  client.set_read_timeout(Some(WAIT)).unwrap();
  let mut buf = [0u8; 2];
  client.read_exact(&mut buf).unwrap();
  assert_eq!(&buf, b"hi");

  server.close();
  assert!(handle.join().unwrap().is_ok());
}
