use crate::config::Config;
use crate::reactor::{EventLoop, Reactor};
use crate::spawn::{Spawn, ThreadSpawner};

use std::fmt;
use std::io;
use std::sync::Arc;

/// Reactor, spawner and configuration shared by a group of sockets.
///
/// Cloning is cheap. Every [`AsyncSocket`](crate::AsyncSocket) keeps a clone,
/// so the reactor lives as long as any socket using it.
#[derive(Clone)]
pub struct IoContext {
  reactor: Arc<dyn Reactor>,
  spawner: Arc<dyn Spawn>,
  config: Config,
}

impl IoContext {
  /// Starts a background [`EventLoop`] and uses a [`ThreadSpawner`] for
  /// accepted connections.
  pub fn new(config: Config) -> io::Result<Self> {
    let reactor = EventLoop::spawn(&config)?;
    let spawner = ThreadSpawner::new(config.worker_name());
    Ok(Self::from_parts(Arc::new(reactor), Arc::new(spawner), config))
  }

  pub fn from_parts(
    reactor: Arc<dyn Reactor>,
    spawner: Arc<dyn Spawn>,
    config: Config,
  ) -> Self {
    Self { reactor, spawner, config }
  }

  pub fn reactor(&self) -> &Arc<dyn Reactor> {
    &self.reactor
  }

  pub fn spawner(&self) -> &Arc<dyn Spawn> {
    &self.spawner
  }

  pub fn config(&self) -> &Config {
    &self.config
  }
}

impl fmt::Debug for IoContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IoContext").field("config", &self.config).finish_non_exhaustive()
  }
}
