//! Execution contexts for accepted connections.

use std::thread;

/// Unit of work handed to a [`Spawn`] implementation.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task on a fresh execution context.
///
/// The accept loop hands every accepted connection to `spawn`, so an
/// implementation must not run the task inline on the calling thread if the
/// task may block.
pub trait Spawn: Send + Sync {
  fn spawn(&self, task: Task);
}

/// One named OS thread per task.
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
  name: String,
}

impl ThreadSpawner {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

impl Default for ThreadSpawner {
  fn default() -> Self {
    Self::new("lio-conn")
  }
}

impl Spawn for ThreadSpawner {
  fn spawn(&self, task: Task) {
    // On failure the closure comes back dropped, which closes any socket it
    // owned.
    if let Err(err) = thread::Builder::new().name(self.name.clone()).spawn(task)
    {
      log::warn!("could not start a {} thread: {err}", self.name);
    }
  }
}

impl<F> Spawn for F
where
  F: Fn(Task) + Send + Sync,
{
  fn spawn(&self, task: Task) {
    self(task)
  }
}
