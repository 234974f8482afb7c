#![allow(dead_code)]

use lio_socket::{AsyncSocket, Config, EventLoop, IoContext, ThreadSpawner};
use std::net::TcpStream;
use std::sync::{Arc, mpsc};
use std::time::Duration;

/// Upper bound for anything that should happen "promptly".
pub const WAIT: Duration = Duration::from_secs(5);

pub fn context() -> IoContext {
  IoContext::new(Config::default()).expect("Failed to start io context")
}

/// A context whose event loop only runs when the test calls `turn`.
pub fn manual_context() -> (Arc<EventLoop>, IoContext) {
  let ev = Arc::new(EventLoop::new(&Config::default()).expect("Failed to create event loop"));
  let ctx = IoContext::from_parts(
    ev.clone(),
    Arc::new(ThreadSpawner::default()),
    Config::default(),
  );
  (ev, ctx)
}

/// A listening socket on an ephemeral loopback port.
pub fn listener(ctx: &IoContext) -> (AsyncSocket, u16) {
  let server = AsyncSocket::new(ctx);
  server.bind(0, "127.0.0.1").expect("Failed to bind");
  server.listen().expect("Failed to listen");
  let port = server.local_addr().expect("Failed to get local addr").port();
  (server, port)
}

/// An accepted `AsyncSocket` and the blocking std client connected to it.
pub fn peer_pair(ctx: &IoContext) -> (AsyncSocket, TcpStream) {
  let (server, port) = listener(ctx);
  let client =
    TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect");

  let (tx, rx) = mpsc::channel();
  server
    .accept(Some(WAIT), move |conn| tx.send(conn).unwrap())
    .expect("Failed to accept");
  let conn = rx
    .recv_timeout(WAIT)
    .expect("accept callback never ran")
    .expect("accept yielded no connection");
  (conn, client)
}

/// Two connected `AsyncSocket`s: (accepted side, connecting side).
pub fn async_pair(ctx: &IoContext) -> (AsyncSocket, AsyncSocket) {
  let (server, port) = listener(ctx);

  let (client_tx, client_rx) = mpsc::channel();
  AsyncSocket::new(ctx)
    .connect("127.0.0.1", port, Some(WAIT), move |conn| {
      client_tx.send(conn).unwrap()
    })
    .expect("Failed to start connect");

  let (server_tx, server_rx) = mpsc::channel();
  server
    .accept(Some(WAIT), move |conn| server_tx.send(conn).unwrap())
    .expect("Failed to accept");

  let client = client_rx.recv_timeout(WAIT).unwrap().expect("connect failed");
  let accepted = server_rx.recv_timeout(WAIT).unwrap().expect("accept failed");
  (accepted, client)
}
