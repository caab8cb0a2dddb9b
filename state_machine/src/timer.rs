use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::trace;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// One-shot countdowns used to drive timeout transitions.
///
/// `on_expiry` may be invoked from any thread.  `cancel` is best-effort: a callback that is
/// already running or queued can still be delivered after it returns, and cancelling a handle
/// that already fired or was cancelled must be a silent no-op.
pub trait TimerBackend: Send {
  fn arm(&mut self, duration: Duration, on_expiry: ExpiryCallback) -> TimerHandle;
  fn cancel(&mut self, handle: TimerHandle);
}

/// Backend spawning one sleeping task per countdown on a tokio runtime.
pub struct TokioTimer {
  runtime: Handle,
  next_id: u64,
  tasks: HashMap<TimerHandle, JoinHandle<()>>,
}

impl TokioTimer {
  pub fn new(runtime: Handle) -> Self {
    Self { runtime, next_id: 0, tasks: HashMap::new() }
  }

  /// Binds to the runtime of the calling context.
  pub fn current() -> Result<Self, TryCurrentError> {
    Ok(Self::new(Handle::try_current()?))
  }
}

impl TimerBackend for TokioTimer {
  fn arm(&mut self, duration: Duration, on_expiry: ExpiryCallback) -> TimerHandle {
    self.tasks.retain(|_, task| !task.is_finished());

    let handle = TimerHandle(self.next_id);
    self.next_id += 1;
    let deadline = Instant::now() + duration;
    let task = self.runtime.spawn(async move {
      tokio::time::sleep_until(deadline).await;
      on_expiry();
    });
    trace!("armed {:?} for {:?}", handle, duration);
    self.tasks.insert(handle, task);
    handle
  }

  fn cancel(&mut self, handle: TimerHandle) {
    if let Some(task) = self.tasks.remove(&handle) {
      trace!("cancelled {:?}", handle);
      task.abort();
    }
  }
}

impl Drop for TokioTimer {
  fn drop(&mut self) {
    for (_, task) in self.tasks.drain() {
      task.abort();
    }
  }
}

/// Deterministic backend driven by an explicit virtual clock.  Clones share the same clock and
/// pending timers, so a test can keep one clone while the machine owns another.
#[derive(Clone, Default)]
pub struct ManualTimer {
  inner: Arc<Mutex<ManualClock>>,
}

#[derive(Default)]
struct ManualClock {
  now: Duration,
  next_id: u64,
  pending: Vec<PendingTimer>,
  cancelled: usize,
  fired: usize,
}

struct PendingTimer {
  handle: TimerHandle,
  deadline: Duration,
  on_expiry: ExpiryCallback,
}

impl ManualTimer {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, ManualClock> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn now(&self) -> Duration {
    self.lock().now
  }

  pub fn pending(&self) -> usize {
    self.lock().pending.len()
  }

  pub fn cancelled(&self) -> usize {
    self.lock().cancelled
  }

  pub fn fired(&self) -> usize {
    self.lock().fired
  }

  /// Time remaining until the earliest pending timer.
  pub fn next_deadline(&self) -> Option<Duration> {
    let clock = self.lock();
    clock.pending.iter().map(|p| p.deadline - clock.now).min()
  }

  /// Moves the clock forward by `by`, firing every timer that comes due in deadline order.
  /// Callbacks run without the clock locked.  Returns how many fired.
  pub fn advance(&self, by: Duration) -> usize {
    let target = self.lock().now + by;
    let mut fired = 0;
    loop {
      let due = {
        let mut clock = self.lock();
        let next = clock.pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.deadline <= target)
            .min_by_key(|(_, p)| (p.deadline, p.handle))
            .map(|(i, _)| i);
        next.map(|i| {
          let timer = clock.pending.remove(i);
          clock.now = timer.deadline;
          clock.fired += 1;
          timer
        })
      };
      match due {
        Some(timer) => {
          (timer.on_expiry)();
          fired += 1;
        },
        None => break,
      }
    }
    self.lock().now = target;
    fired
  }

  /// Jumps to the earliest pending deadline and fires whatever is due there.
  pub fn fire_next(&self) -> bool {
    match self.next_deadline() {
      Some(remaining) => self.advance(remaining) > 0,
      None => false,
    }
  }
}

impl TimerBackend for ManualTimer {
  fn arm(&mut self, duration: Duration, on_expiry: ExpiryCallback) -> TimerHandle {
    let mut clock = self.lock();
    let handle = TimerHandle(clock.next_id);
    clock.next_id += 1;
    let deadline = clock.now + duration;
    clock.pending.push(PendingTimer { handle, deadline, on_expiry });
    handle
  }

  fn cancel(&mut self, handle: TimerHandle) {
    let mut clock = self.lock();
    let before = clock.pending.len();
    clock.pending.retain(|p| p.handle != handle);
    if clock.pending.len() != before {
      clock.cancelled += 1;
    }
  }
}
