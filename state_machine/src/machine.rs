use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, log, Level};

use crate::callbacks::{Callback, CallbackRegistry};
use crate::error::{ConfigError, FsmError, FsmResult, LifecycleError};
use crate::state::{Enumeration, Expiry};
use crate::table::{ConfigWarning, TransitionTable};
use crate::timer::{TimerBackend, TimerHandle};

/// Where fired timers are reported.  Called on whatever thread the timer backend fires on, so
/// implementations normally just forward the token to the context that owns the machine.
pub type ExpirySink<S> = Arc<dyn Fn(Expiry<S>) + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lifecycle {
  Unconfigured,
  Configured,
  Running,
  Stopped,
}

#[derive(Copy, Clone, Debug)]
struct ArmedTimeout<S> {
  handle: TimerHandle,
  expiry: Expiry<S>,
}

/// Flat state machine advanced by timeouts and by "always" events.
///
/// All mutation goes through `&mut self`, so callers sharing a machine across threads have to
/// serialize access themselves; [crate::runner::Runner] does this with a single queue.
pub struct StateMachine<S, E, A> {
  debug_name: &'static str,
  table: TransitionTable<S, E>,
  callbacks: CallbackRegistry<S, A>,
  timer: Option<Box<dyn TimerBackend>>,
  sink: Option<ExpirySink<S>>,
  lifecycle: Lifecycle,
  current: Option<S>,
  armed: Option<ArmedTimeout<S>>,
  generation: u64,
}

impl<S: Enumeration, E: Enumeration, A> StateMachine<S, E, A> {
  pub fn new(debug_name: &'static str) -> Self {
    Self {
      debug_name,
      table: TransitionTable::new(),
      callbacks: CallbackRegistry::new(),
      timer: None,
      sink: None,
      lifecycle: Lifecycle::Unconfigured,
      current: None,
      armed: None,
      generation: 0,
    }
  }

  pub fn debug_name(&self) -> &'static str {
    self.debug_name
  }

  pub fn nb_states(&self) -> usize {
    S::COUNT
  }

  pub fn nb_events(&self) -> usize {
    E::COUNT
  }

  pub fn lifecycle(&self) -> Lifecycle {
    self.lifecycle
  }

  /// `None` until the machine has been started.
  pub fn current_state(&self) -> Option<S> {
    self.current
  }

  pub fn table(&self) -> &TransitionTable<S, E> {
    &self.table
  }

  pub fn callbacks(&self) -> &CallbackRegistry<S, A> {
    &self.callbacks
  }

  pub fn validate(&self) -> Vec<ConfigWarning<S, E>> {
    self.table.validate()
  }

  pub fn has_timer(&self) -> bool {
    self.timer.is_some()
  }

  /// Token of the timeout currently counting down, if any.
  pub fn armed_expiry(&self) -> Option<Expiry<S>> {
    self.armed.map(|a| a.expiry)
  }

  pub fn set_timeout(&mut self, from: S, duration: Duration, to: S) -> FsmResult<&mut Self> {
    self.ensure_configurable()?;
    self.table.set_timeout(from, duration, to)?;
    self.lifecycle = Lifecycle::Configured;
    Ok(self)
  }

  pub fn set_always_transition(&mut self, event: E, to: S) -> FsmResult<&mut Self> {
    self.ensure_configurable()?;
    self.table.set_always_transition(event, to)?;
    self.lifecycle = Lifecycle::Configured;
    Ok(self)
  }

  pub fn set_callback<F>(&mut self, state: S, action: F, arg: A) -> FsmResult<&mut Self>
  where
      F: Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    self.ensure_configurable()?;
    self.callbacks.assign(state, Callback::new(action, arg))?;
    self.lifecycle = Lifecycle::Configured;
    Ok(self)
  }

  /// Timer backend used for timeout rules.  Can be swapped whenever the machine is not running.
  pub fn assign_timer(&mut self, timer: impl TimerBackend + 'static) -> FsmResult<&mut Self> {
    self.ensure_not_running()?;
    self.timer = Some(Box::new(timer));
    Ok(self)
  }

  pub fn set_expiry_sink(&mut self, sink: impl Fn(Expiry<S>) + Send + Sync + 'static) -> FsmResult<&mut Self> {
    self.ensure_not_running()?;
    self.sink = Some(Arc::new(sink));
    Ok(self)
  }

  fn ensure_configurable(&self) -> Result<(), LifecycleError> {
    match self.lifecycle {
      Lifecycle::Unconfigured | Lifecycle::Configured => Ok(()),
      other => Err(LifecycleError::ConfigureAfterStart(other)),
    }
  }

  fn ensure_not_running(&self) -> Result<(), LifecycleError> {
    match self.lifecycle {
      Lifecycle::Running => Err(LifecycleError::AlreadyStarted),
      _ => Ok(()),
    }
  }

  /// Enters state 0, running its callback and arming its timeout.  A stopped machine may be
  /// started again.
  pub fn start(&mut self) -> FsmResult<()> {
    self.ensure_not_running()?;
    if self.table.has_timeouts() && (self.timer.is_none() || self.sink.is_none()) {
      return Err(LifecycleError::MissingTimer.into());
    }
    let initial = S::from_index(0).ok_or(ConfigError::NoStates)?;
    info!("{}: Starting...", self.debug_name);
    self.lifecycle = Lifecycle::Running;
    self.current = None;
    self.enter(initial)
  }

  /// Applies the always transition for `event`.  Unmapped events are ignored.
  pub fn handle_event(&mut self, event: E) -> FsmResult<()> {
    if self.lifecycle != Lifecycle::Running {
      debug!("{}: Not running, dropping [{}]", self.debug_name, event.debug_name());
      return Ok(());
    }
    match self.table.always_of(event) {
      Some(target) => {
        debug!("{}: Received [{}]", self.debug_name, event.debug_name());
        self.enter(target)
      },
      None => {
        debug!("{}: Unhandled [{}]", self.debug_name, event.debug_name());
        Ok(())
      },
    }
  }

  /// Applies a fired timeout, unless it no longer matches the armed timer.  A mismatch means an
  /// event moved the machine on while the notification was in flight.
  pub fn handle_timeout(&mut self, expiry: Expiry<S>) -> FsmResult<()> {
    if self.lifecycle != Lifecycle::Running {
      debug!("{}: Not running, dropping expiry of [{}]", self.debug_name, expiry.state.debug_name());
      return Ok(());
    }
    let is_current = self.current == Some(expiry.state)
        && self.armed_expiry() == Some(expiry);
    if !is_current {
      debug!(
        "{}: Discarding stale expiry of [{}] (generation {})",
        self.debug_name,
        expiry.state.debug_name(),
        expiry.generation);
      return Ok(());
    }

    // Already fired; nothing to cancel.
    self.armed = None;
    match self.table.timeout_of(expiry.state) {
      Some(rule) => self.enter(rule.target),
      None => Ok(()),
    }
  }

  /// Cancels any pending timeout and stops reacting to events.  Repeated calls do nothing.
  pub fn stop(&mut self) {
    if self.lifecycle != Lifecycle::Running {
      return;
    }
    self.cancel_armed();
    self.lifecycle = Lifecycle::Stopped;
    info!("{}: Stopped", self.debug_name);
  }

  /// The transition protocol.  The new state is committed and its timeout armed even when its
  /// callback fails; the callback error is returned afterwards.
  fn enter(&mut self, target: S) -> FsmResult<()> {
    self.cancel_armed();
    let previous = self.current.replace(target);
    self.log_transition(previous, target);

    let result = match self.callbacks.get(target) {
      Some(callback) => callback.invoke().map_err(|source| FsmError::Callback {
        state: target.debug_name(),
        source,
      }),
      None => Ok(()),
    };

    self.arm_timeout(target);
    result
  }

  fn arm_timeout(&mut self, state: S) {
    let rule = match self.table.timeout_of(state) {
      Some(rule) => rule,
      None => return,
    };
    if let (Some(timer), Some(sink)) = (self.timer.as_mut(), self.sink.as_ref()) {
      self.generation += 1;
      let expiry = Expiry { state, generation: self.generation };
      let sink = sink.clone();
      let handle = timer.arm(rule.duration, Box::new(move || sink(expiry)));
      self.armed = Some(ArmedTimeout { handle, expiry });
    }
  }

  fn cancel_armed(&mut self) {
    if let Some(armed) = self.armed.take() {
      if let Some(timer) = self.timer.as_mut() {
        timer.cancel(armed.handle);
      }
    }
  }

  fn log_transition(&self, previous: Option<S>, target: S) {
    let level = if cfg!(feature = "print-states") { Level::Info } else { Level::Debug };
    match previous {
      Some(previous) => log!(
        level,
        "{}: [{}] => [{}]",
        self.debug_name,
        previous.debug_name(),
        target.debug_name()),
      None => log!(level, "{}: Entering [{}]", self.debug_name, target.debug_name()),
    }
  }
}
