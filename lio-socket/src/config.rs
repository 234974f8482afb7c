/// Tunables shared by an [`IoContext`](crate::IoContext) and every socket
/// created from it.
///
/// ```
/// use lio_socket::Config;
///
/// let config = Config::default().listen_backlog(1024).event_capacity(256);
/// assert_eq!(config.backlog(), 1024);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
  backlog: i32,
  event_capacity: usize,
  reactor_thread_name: String,
  worker_thread_name: String,
}

impl Config {
  pub const DEFAULT_BACKLOG: i32 = 128;
  pub const DEFAULT_EVENT_CAPACITY: usize = 512;

  /// Backlog passed to `listen(2)` by [`AsyncSocket::listen`](crate::AsyncSocket::listen).
  pub fn listen_backlog(mut self, backlog: i32) -> Self {
    self.backlog = backlog;
    self
  }

  /// Maximum number of readiness events drained per reactor turn.
  pub fn event_capacity(mut self, capacity: usize) -> Self {
    assert!(capacity > 0, "Config::event_capacity: capacity must be > 0");
    self.event_capacity = capacity;
    self
  }

  /// Name of the background reactor thread.
  pub fn reactor_thread_name(mut self, name: impl Into<String>) -> Self {
    self.reactor_thread_name = name.into();
    self
  }

  /// Name given to threads started by [`ThreadSpawner`](crate::ThreadSpawner).
  pub fn worker_thread_name(mut self, name: impl Into<String>) -> Self {
    self.worker_thread_name = name.into();
    self
  }

  pub fn backlog(&self) -> i32 {
    self.backlog
  }

  pub fn events(&self) -> usize {
    self.event_capacity
  }

  pub fn reactor_name(&self) -> &str {
    &self.reactor_thread_name
  }

  pub fn worker_name(&self) -> &str {
    &self.worker_thread_name
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      backlog: Self::DEFAULT_BACKLOG,
      event_capacity: Self::DEFAULT_EVENT_CAPACITY,
      reactor_thread_name: "lio-reactor".to_owned(),
      worker_thread_name: "lio-conn".to_owned(),
    }
  }
}
