use super::poller::{Events, ReadinessPoll, sys};
use super::{Callback, Interest, Reactor, Readiness, Registration};
use crate::config::Config;
use crate::sync::Mutex;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

struct Entry {
  id: u64,
  interest: Interest,
  deadline: Option<Instant>,
  callback: Callback,
}

impl Entry {
  fn overlaps(&self, readable: bool, writable: bool) -> bool {
    (readable && self.interest.is_readable())
      || (writable && self.interest.is_writable())
  }
}

/// Everything registered on one descriptor. The OS interest is the union of
/// the entries, so a read and a write can wait on the same fd.
#[derive(Default)]
struct Slot {
  entries: Vec<Entry>,
  in_poller: bool,
}

impl Slot {
  fn interest(&self) -> Option<Interest> {
    Interest::merge(
      self.entries.iter().any(|e| e.interest.is_readable()),
      self.entries.iter().any(|e| e.interest.is_writable()),
    )
  }

  fn take_overlapping(&mut self, readable: bool, writable: bool) -> Vec<Entry> {
    let mut taken = Vec::new();
    let mut i = 0;
    while i < self.entries.len() {
      if self.entries[i].overlaps(readable, writable) {
        taken.push(self.entries.swap_remove(i));
      } else {
        i += 1;
      }
    }
    taken
  }
}

#[derive(Default)]
struct State {
  slots: HashMap<RawFd, Slot>,
  /// Ordered by expiry, id breaks ties.
  deadlines: BTreeMap<(Instant, u64), RawFd>,
}

impl State {
  fn forget_deadline(&mut self, entry: &Entry) {
    if let Some(at) = entry.deadline {
      self.deadlines.remove(&(at, entry.id));
    }
  }

  fn earliest(&self) -> Option<Instant> {
    self.deadlines.keys().next().map(|(at, _)| *at)
  }
}

type Fired = Vec<(Callback, RawFd, Readiness)>;

fn fire(fired: Fired) {
  for (callback, fd, readiness) in fired {
    callback(fd, readiness);
  }
}

fn copy_error(err: &io::Error) -> io::Error {
  match err.raw_os_error() {
    Some(code) => io::Error::from_raw_os_error(code),
    None => io::Error::new(err.kind(), err.to_string()),
  }
}

fn stopped_error() -> io::Error {
  io::Error::new(io::ErrorKind::NotConnected, "event loop is stopped")
}

fn is_gone(err: &io::Error) -> bool {
  matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF))
}

struct Inner {
  poller: sys::OsPoller,
  state: Mutex<State>,
  events: Mutex<Events>,
  next_id: AtomicU64,
  stopped: AtomicBool,
  owner: OnceLock<ThreadId>,
}

impl Inner {
  fn on_owner_thread(&self) -> bool {
    self.owner.get() == Some(&thread::current().id())
  }

  /// Brings the poller in line with `fd`'s slot. Entries that can't be armed
  /// are moved to `fired` with [`Readiness::Failed`].
  fn sync(&self, state: &mut State, fd: RawFd, fired: &mut Fired) {
    let (interest, in_poller) = match state.slots.get(&fd) {
      Some(slot) => (slot.interest(), slot.in_poller),
      None => return,
    };

    let Some(interest) = interest else {
      if in_poller {
        if let Err(err) = self.poller.delete(fd) {
          if !is_gone(&err) {
            log::warn!("could not deregister fd {fd}: {err}");
          }
        }
      }
      state.slots.remove(&fd);
      return;
    };

    let key = fd as u64;
    let result = if in_poller {
      match self.poller.modify(fd, key, interest) {
        // The fd was closed and reused behind our back.
        Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
          self.poller.add(fd, key, interest)
        }
        other => other,
      }
    } else {
      match self.poller.add(fd, key, interest) {
        Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
          self.poller.modify(fd, key, interest)
        }
        other => other,
      }
    };

    match result {
      Ok(()) => {
        if let Some(slot) = state.slots.get_mut(&fd) {
          slot.in_poller = true;
        }
      }
      Err(err) => {
        log::warn!("could not arm fd {fd} for {interest:?}: {err}");
        if let Some(slot) = state.slots.remove(&fd) {
          for entry in slot.entries {
            state.forget_deadline(&entry);
            fired.push((entry.callback, fd, Readiness::Failed(copy_error(&err))));
          }
        }
      }
    }
  }

  fn register(
    &self,
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
    callback: Callback,
  ) -> Registration {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let registration = Registration::new(id, fd, interest);

    if fd < 0 {
      callback(fd, Readiness::Failed(io::Error::from_raw_os_error(libc::EBADF)));
      return registration;
    }

    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let mut fired = Fired::new();
    let replaced;
    let wake;
    {
      let mut guard = self.state.lock();
      if self.stopped.load(Ordering::Acquire) {
        drop(guard);
        callback(fd, Readiness::Failed(stopped_error()));
        return registration;
      }
      let state = &mut *guard;

      let slot = state.slots.entry(fd).or_default();
      replaced = slot
        .take_overlapping(interest.is_readable(), interest.is_writable());
      slot.entries.push(Entry { id, interest, deadline, callback });

      for old in &replaced {
        state.forget_deadline(old);
      }

      wake = deadline.is_some_and(|at| state.earliest().is_none_or(|first| at < first));
      if let Some(at) = deadline {
        state.deadlines.insert((at, id), fd);
      }

      self.sync(state, fd, &mut fired);
    }

    if !replaced.is_empty() {
      log::trace!("registration {registration} replaced {} older", replaced.len());
    }
    // Dropped outside the lock: a callback may own the last handle to a
    // socket, and dropping that closes it through this reactor.
    drop(replaced);

    log::trace!("registered {registration} timeout={timeout:?}");
    if wake && !self.on_owner_thread() {
      if let Err(err) = self.poller.notify() {
        log::warn!("could not wake the event loop: {err}");
      }
    }

    fire(fired);
    registration
  }

  fn cancel(&self, registration: Registration) -> bool {
    let fd = registration.fd();
    let mut fired = Fired::new();
    let removed = {
      let mut guard = self.state.lock();
      let state = &mut *guard;

      let Some(slot) = state.slots.get_mut(&fd) else { return false };
      let Some(pos) =
        slot.entries.iter().position(|e| e.id == registration.id())
      else {
        return false;
      };
      let entry = slot.entries.swap_remove(pos);
      state.forget_deadline(&entry);
      self.sync(state, fd, &mut fired);
      entry
    };

    log::trace!("cancelled {registration}");
    drop(removed);
    fire(fired);
    true
  }

  fn close_fd(&self, fd: RawFd) {
    let slot = {
      let mut guard = self.state.lock();
      let state = &mut *guard;

      let Some(slot) = state.slots.remove(&fd) else { return };
      if slot.in_poller {
        if let Err(err) = self.poller.delete(fd) {
          if !is_gone(&err) {
            log::warn!("could not deregister fd {fd}: {err}");
          }
        }
      }
      for entry in &slot.entries {
        state.forget_deadline(entry);
      }
      slot
    };

    log::trace!("fd {fd} closed with {} pending registrations", slot.entries.len());
    for entry in slot.entries {
      (entry.callback)(fd, Readiness::Closed);
    }
  }

  fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
    let _ = self.owner.set(thread::current().id());

    let poll_timeout = {
      let state = self.state.lock();
      let until_deadline =
        state.earliest().map(|at| at.saturating_duration_since(Instant::now()));
      match (timeout, until_deadline) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
      }
    };

    let mut events = self.events.lock();
    events.wait_on(&self.poller, poll_timeout)?;

    let mut fired = Fired::new();
    {
      let mut guard = self.state.lock();
      let state = &mut *guard;

      for event in events.iter() {
        let fd = event.key as RawFd;
        // Cancelled or closed while we were polling.
        let Some(slot) = state.slots.get_mut(&fd) else { continue };
        let ready = slot.take_overlapping(event.readable, event.writable);
        for entry in ready {
          state.forget_deadline(&entry);
          fired.push((entry.callback, fd, Readiness::Ready));
        }
        // One-shot: whatever is left must be armed again.
        self.sync(state, fd, &mut fired);
      }

      let now = Instant::now();
      while let Some(first) = state.deadlines.first_entry() {
        if first.key().0 > now {
          break;
        }
        let ((_, id), fd) = first.remove_entry();
        let Some(slot) = state.slots.get_mut(&fd) else { continue };
        let Some(pos) = slot.entries.iter().position(|e| e.id == id) else {
          continue;
        };
        let entry = slot.entries.swap_remove(pos);
        fired.push((entry.callback, fd, Readiness::TimedOut));
        self.sync(state, fd, &mut fired);
      }
    }
    drop(events);

    let count = fired.len();
    fire(fired);
    Ok(count)
  }

  /// Fires everything still registered with [`Readiness::Closed`].
  fn close_all(&self) {
    let slots = {
      let mut state = self.state.lock();
      state.deadlines.clear();
      std::mem::take(&mut state.slots)
    };

    for (fd, slot) in slots {
      if slot.in_poller {
        let _ = self.poller.delete(fd);
      }
      for entry in slot.entries {
        (entry.callback)(fd, Readiness::Closed);
      }
    }
  }

  fn run(&self) {
    let _ = self.owner.set(thread::current().id());
    log::debug!("event loop started");

    while !self.stopped.load(Ordering::Acquire) {
      if let Err(err) = self.turn(None) {
        log::error!("event loop poll failed: {err}");
        self.stopped.store(true, Ordering::Release);
      }
    }

    self.close_all();
    log::debug!("event loop stopped");
  }
}

/// Single-threaded readiness loop over epoll/kqueue with a deadline index
/// for timeouts.
///
/// [`EventLoop::spawn`] drives it from a background thread;
/// [`EventLoop::new`] leaves driving to the caller through
/// [`EventLoop::turn`]. Dropping the loop stops it and fires every pending
/// registration with [`Readiness::Closed`].
pub struct EventLoop {
  inner: Arc<Inner>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
  /// Creates a loop that only makes progress when [`turn`](Self::turn) is
  /// called.
  pub fn new(config: &Config) -> io::Result<Self> {
    let inner = Inner {
      poller: sys::OsPoller::new()?,
      state: Mutex::new(State::default()),
      events: Mutex::new(Events::with_capacity(config.events())),
      next_id: AtomicU64::new(0),
      stopped: AtomicBool::new(false),
      owner: OnceLock::new(),
    };
    Ok(Self { inner: Arc::new(inner), thread: Mutex::new(None) })
  }

  /// Creates a loop running on its own thread.
  pub fn spawn(config: &Config) -> io::Result<Self> {
    let this = Self::new(config)?;
    let inner = this.inner.clone();
    let handle = thread::Builder::new()
      .name(config.reactor_name().to_owned())
      .spawn(move || inner.run())?;
    *this.thread.lock() = Some(handle);
    Ok(this)
  }

  /// Polls once for at most `timeout` (or until the earliest deadline) and
  /// runs the callbacks that became due. Returns how many ran.
  pub fn turn(&self, timeout: Option<Duration>) -> io::Result<usize> {
    self.inner.turn(timeout)
  }

  pub fn is_stopped(&self) -> bool {
    self.inner.stopped.load(Ordering::Acquire)
  }

  /// Stops the loop. Pending registrations fire with
  /// [`Readiness::Closed`]; later ones fail immediately.
  pub fn stop(&self) {
    self.inner.stopped.store(true, Ordering::Release);

    let handle = self.thread.lock().take();
    let Some(handle) = handle else {
      self.inner.close_all();
      return;
    };

    if let Err(err) = self.inner.poller.notify() {
      log::warn!("could not wake the event loop: {err}");
    }

    // Dropped from one of its own callbacks: the thread exits on its own.
    if handle.thread().id() == thread::current().id() {
      return;
    }
    if handle.join().is_err() {
      log::error!("event loop thread panicked");
    }
  }
}

impl Drop for EventLoop {
  fn drop(&mut self) {
    self.stop();
  }
}

impl Reactor for EventLoop {
  fn register(
    &self,
    fd: RawFd,
    interest: Interest,
    timeout: Option<Duration>,
    callback: Callback,
  ) -> Registration {
    self.inner.register(fd, interest, timeout, callback)
  }

  fn cancel(&self, registration: Registration) -> bool {
    self.inner.cancel(registration)
  }

  fn close_fd(&self, fd: RawFd) {
    self.inner.close_fd(fd)
  }

  fn is_reactor_thread(&self) -> bool {
    self.inner.on_owner_thread()
  }
}
