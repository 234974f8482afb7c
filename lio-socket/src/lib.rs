#![cfg_attr(docsrs, feature(doc_cfg))]

//! # lio-socket - Callback-Driven Non-Blocking TCP
//!
//! Non-blocking TCP sockets whose operations either complete immediately or
//! park a continuation on a readiness reactor, so the calling thread never
//! blocks on the network.
//!
//! ## Features
//! - **Exact reads** that resume across partial arrivals, with deadlines.
//! - **Incremental writes** that survive flow-control stalls.
//! - **Accept loop** handing every connection to its own execution context.
//! - **Pluggable reactor and spawner**, passed explicitly through an
//!   [`IoContext`].
//!
//! ## Platform support
//!
//! | Platform   | Readiness mechanism | Status |
//! |------------|---------------------|--------|
//! | Linux      | epoll               | Yes    |
//! | macOS/BSD  | kqueue              | Yes    |
//! | Windows    | -                   | No     |
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lio_socket::{AsyncSocket, Config, IoContext};
//!
//! let ctx = IoContext::new(Config::default())?;
//! let server = Arc::new(AsyncSocket::new(&ctx));
//! server.bind(9000, "127.0.0.1")?;
//! server.listen()?;
//!
//! // Echo four bytes back to every client.
//! server.for_each_accept(|conn| {
//!   let conn = Arc::new(conn);
//!   let writer = conn.clone();
//!   conn.read_bytes_fully(4, None, move |bytes| {
//!     if let Some(bytes) = bytes {
//!       writer.write_bytes(&bytes, |_| {});
//!     }
//!   });
//! })?;
//! # Ok::<(), lio_socket::Error>(())
//! ```
//!
//! ## Threading
//!
//! Completions run on the reactor thread. Blocking entry points
//! ([`AsyncSocket::for_each_accept`], [`AsyncSocket::write_bytes_fully`])
//! must run on threads of their own.
//!
//! ## Error Handling
//!
//! Setup calls return [`Result`]. Anything that fails after an operation has
//! waited on the reactor is reported only through its completion: `None`
//! for reads, accepts and connects, an [`std::io::Error`] for writes.

#[macro_use]
mod macros;

mod config;
mod context;
mod error;
mod net_utils;
pub mod reactor;
mod socket;
mod spawn;
mod sync;

pub use config::Config;
pub use context::IoContext;
pub use error::{Error, Result};
pub use reactor::{
  Callback, EventLoop, Interest, Reactor, Readiness, Registration,
  timeout_from_secs,
};
pub use socket::{AsyncSocket, Connection, RawSocket};
pub use spawn::{Spawn, Task, ThreadSpawner};
pub use sync::Signal;
