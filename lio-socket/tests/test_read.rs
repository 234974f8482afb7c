mod common;

use common::{WAIT, async_pair, context, peer_pair};
use lio_socket::{IoContext, timeout_from_secs};
use proptest::prelude::*;
use proptest::test_runner::TestRunner;
use std::io::Write;
use std::net::Shutdown;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_read_fully_across_chunks() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);

  let (tx, rx) = mpsc::channel();
  conn.read_bytes_fully(12, timeout_from_secs(5.0), move |bytes| {
    tx.send(bytes).unwrap()
  });

  for chunk in [&b"hell"[..], b"o, w", b"orld"] {
    client.write_all(chunk).unwrap();
    thread::sleep(Duration::from_millis(20));
  }

  let bytes = rx.recv_timeout(WAIT).unwrap().expect("read failed");
  assert_eq!(bytes, b"hello, world");
}

#[test]
fn test_read_fully_leaves_extra_bytes_unread() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);
  client.write_all(b"0123456789").unwrap();

  let (tx, rx) = mpsc::channel();
  let first = tx.clone();
  conn.read_bytes_fully(4, Some(WAIT), move |bytes| first.send(bytes).unwrap());
  assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), b"0123");

  conn.read_bytes_fully(6, Some(WAIT), move |bytes| tx.send(bytes).unwrap());
  assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), b"456789");
}

#[test]
fn test_read_fully_partial_then_stall_times_out() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);

  let (tx, rx) = mpsc::channel();
  let start = Instant::now();
  conn.read_bytes_fully(10, timeout_from_secs(1.0), move |bytes| {
    tx.send(bytes).unwrap()
  });
  client.write_all(b"four").unwrap();

  let bytes = rx.recv_timeout(WAIT).unwrap();
  let elapsed = start.elapsed();
  assert_eq!(bytes, None, "partial bytes must not be delivered");
  assert!(elapsed >= Duration::from_secs(1), "timed out early: {elapsed:?}");
  assert!(elapsed < Duration::from_secs(3), "timed out late: {elapsed:?}");
}

#[test]
fn test_read_fully_deadline_is_not_reset_by_progress() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);

  let (tx, rx) = mpsc::channel();
  let start = Instant::now();
  conn.read_bytes_fully(100, Some(Duration::from_millis(500)), move |bytes| {
    tx.send(bytes).unwrap()
  });

  // A trickle that would keep a per-wait timeout alive forever.
  let writer = thread::spawn(move || {
    for _ in 0..20 {
      if client.write_all(b"x").is_err() {
        break;
      }
      thread::sleep(Duration::from_millis(100));
    }
  });

  assert_eq!(rx.recv_timeout(WAIT).unwrap(), None);
  assert!(start.elapsed() < Duration::from_millis(1500));
  writer.join().unwrap();
}

#[test]
fn test_read_fully_peer_disconnect() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);

  let (tx, rx) = mpsc::channel();
  conn.read_bytes_fully(8, None, move |bytes| tx.send(bytes).unwrap());
  client.write_all(b"abc").unwrap();
  client.shutdown(Shutdown::Write).unwrap();

  assert_eq!(rx.recv_timeout(WAIT).unwrap(), None);
}

#[test]
fn test_read_fully_zero_bytes() {
  let ctx = context();
  let (conn, _client) = peer_pair(&ctx);

  let (tx, rx) = mpsc::channel();
  conn.read_bytes_fully(0, None, move |bytes| tx.send(bytes).unwrap());
  assert_eq!(rx.try_recv().unwrap(), Some(Vec::new()));
}

#[test]
fn test_read_some_without_data_is_empty() {
  let ctx = context();
  let (conn, _client) = peer_pair(&ctx);

  let mut result = None;
  conn.read_some_bytes(100, |bytes| result = Some(bytes));
  assert_eq!(result, Some(Some(Vec::new())));
}

#[test]
fn test_read_some_returns_available_bytes() {
  let ctx = context();
  let (conn, mut client) = peer_pair(&ctx);
  client.write_all(b"abcdef").unwrap();
  thread::sleep(Duration::from_millis(50));

  let mut first = None;
  conn.read_some_bytes(4, |bytes| first = bytes);
  assert_eq!(first.as_deref(), Some(&b"abcd"[..]));

  let mut rest = None;
  conn.read_some_bytes(100, |bytes| rest = bytes);
  assert_eq!(rest.as_deref(), Some(&b"ef"[..]));
}

#[test]
fn test_read_some_after_disconnect_is_absent() {
  let ctx = context();
  let (conn, client) = peer_pair(&ctx);
  drop(client);
  thread::sleep(Duration::from_millis(50));

  let mut result = None;
  conn.read_some_bytes(16, |bytes| result = Some(bytes));
  assert_eq!(result, Some(None));
}

#[test]
fn test_read_some_on_closed_socket_is_absent() {
  let ctx = context();
  let (conn, _client) = peer_pair(&ctx);
  conn.close();

  let mut result = None;
  conn.read_some_bytes(16, |bytes| result = Some(bytes));
  assert_eq!(result, Some(None));
}

#[test]
fn test_concurrent_read_and_write_on_one_socket() {
  let ctx = context();
  let (a, b) = async_pair(&ctx);

  let (read_tx, read_rx) = mpsc::channel();
  a.read_bytes_fully(5, Some(WAIT), move |bytes| read_tx.send(bytes).unwrap());

  let (write_tx, write_rx) = mpsc::channel();
  a.write_bytes(b"ping!", move |sent| write_tx.send(sent.ok()).unwrap());
  assert_eq!(write_rx.recv_timeout(WAIT).unwrap(), Some(5));

  let (echo_tx, echo_rx) = mpsc::channel();
  b.read_bytes_fully(5, Some(WAIT), move |bytes| echo_tx.send(bytes).unwrap());
  let got = echo_rx.recv_timeout(WAIT).unwrap().unwrap();
  assert_eq!(got, b"ping!");

  b.write_bytes(b"pong!", |_| {});
  assert_eq!(read_rx.recv_timeout(WAIT).unwrap().unwrap(), b"pong!");
}

fn prop_read_exact_run(
  ctx: &IoContext,
  payload: Vec<u8>,
  chunk: usize,
) -> Result<(), TestCaseError> {
  let (conn, mut client) = peer_pair(ctx);

  let (tx, rx) = mpsc::channel();
  conn.read_bytes_fully(payload.len(), Some(WAIT), move |bytes| {
    tx.send(bytes).unwrap()
  });

  let sent = payload.clone();
  let writer = thread::spawn(move || {
    for piece in sent.chunks(chunk) {
      client.write_all(piece).unwrap();
      thread::yield_now();
    }
    // Extra bytes must not leak into the result.
    client.write_all(b"trailer").unwrap();
    client
  });

  let received = rx.recv_timeout(WAIT).unwrap();
  let _client = writer.join().unwrap();

  prop_assert_eq!(received, Some(payload));
  Ok(())
}

#[test]
fn prop_test_read_fully_is_byte_exact() {
  let ctx = context();
  let mut runner = TestRunner::new(ProptestConfig::with_cases(32));

  runner
    .run(
      &(prop::collection::vec(any::<u8>(), 1..=16384), 1usize..=2048),
      |(payload, chunk)| prop_read_exact_run(&ctx, payload, chunk),
    )
    .unwrap();
}
