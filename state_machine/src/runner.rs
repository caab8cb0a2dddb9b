use log::{error, info};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::descriptor::StateMachineDescriptor;
use crate::error::{FsmError, FsmResult, LifecycleError};
use crate::machine::StateMachine;
use crate::state::{Enumeration, Expiry};
use crate::timer::TokioTimer;

/// Injects events into a running machine.  Cheap to clone and usable from any thread.
pub struct Dispatcher<S, E> {
  tx: UnboundedSender<InternalEvent<S, E>>,
}

impl<S, E> Clone for Dispatcher<S, E> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<S: Enumeration, E: Enumeration> Dispatcher<S, E> {
  pub fn dispatch(&self, event: E) -> Result<(), LifecycleError> {
    self.tx
        .send(InternalEvent::UserEvent(event))
        .map_err(|_| LifecycleError::NotRunning)
  }

  pub fn dispatch_delay_ms(&self, event: E, delay_ms: u64) {
    self.dispatch_delay(event, Duration::from_millis(delay_ms));
  }

  /// Must be called from within a tokio runtime.
  pub fn dispatch_delay(&self, event: E, delay: Duration) {
    let clone_self = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      let _ = clone_self.dispatch(event);
    });
  }

  pub fn dispatch_at_time(&self, event: E, deadline: Instant) {
    let clone_self = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep_until(deadline).await;
      let _ = clone_self.dispatch(event);
    });
  }
}

/// Drives a [StateMachine] from a dedicated tokio task.
///
/// External events and timer expiries arrive on the same queue, which is what keeps every
/// transition atomic with respect to the others.  If the machine has no timer backend when the
/// runner starts, a [TokioTimer] on the current runtime is assigned.
pub struct Runner<S, E, A> {
  tx: UnboundedSender<InternalEvent<S, E>>,
  state_rx: watch::Receiver<Option<S>>,
  join_handle: Option<JoinHandle<FsmResult<StateMachine<S, E, A>>>>,
}

impl<S: Enumeration, E: Enumeration, A: Send + Sync + 'static> Runner<S, E, A> {
  pub fn start(mut machine: StateMachine<S, E, A>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(None);
    let expiry_tx = tx.clone();
    let join_handle = tokio::spawn(async move {
      if !machine.has_timer() {
        machine.assign_timer(TokioTimer::new(Handle::current()))?;
      }
      machine.set_expiry_sink(move |expiry| {
        // Fails only once the runner is gone, at which point nobody cares.
        let _ = expiry_tx.send(InternalEvent::Timeout(expiry));
      })?;
      let internal = RunnerInternal { machine, rx, state_tx };
      internal.run().await
    });
    Self {
      tx,
      state_rx,
      join_handle: Some(join_handle),
    }
  }

  pub fn start_descriptor<D>(descriptor: &D) -> FsmResult<Self>
  where
      D: StateMachineDescriptor<State = S, Event = E, Arg = A>,
  {
    Ok(Self::start(descriptor.build()?))
  }

  pub fn dispatcher(&self) -> Dispatcher<S, E> {
    Dispatcher { tx: self.tx.clone() }
  }

  pub fn dispatch(&self, event: E) -> Result<(), LifecycleError> {
    self.dispatcher().dispatch(event)
  }

  /// Latest state published by the runner; `None` before the machine has started.
  pub fn current_state(&self) -> Option<S> {
    *self.state_rx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<Option<S>> {
    self.state_rx.clone()
  }

  /// Stops the machine after every event queued so far has been handled, then hands it back so
  /// the caller can inspect it.
  pub async fn shutdown(self) -> FsmResult<StateMachine<S, E, A>> {
    let _ = self.tx.send(InternalEvent::Shutdown);
    self.join().await
  }

  /// Waits for the runner to end on its own, which only happens when a callback fails.
  pub async fn join(mut self) -> FsmResult<StateMachine<S, E, A>> {
    match self.join_handle.take() {
      Some(join_handle) => join_handle.await?,
      None => Err(LifecycleError::NotRunning.into()),
    }
  }
}

impl<S, E, A> Drop for Runner<S, E, A> {
  fn drop(&mut self) {
    if self.join_handle.is_some() {
      let _ = self.tx.send(InternalEvent::Shutdown);
    }
  }
}

struct RunnerInternal<S, E, A> {
  machine: StateMachine<S, E, A>,
  rx: UnboundedReceiver<InternalEvent<S, E>>,
  state_tx: watch::Sender<Option<S>>,
}

impl<S: Enumeration, E: Enumeration, A> RunnerInternal<S, E, A> {
  async fn run(mut self) -> FsmResult<StateMachine<S, E, A>> {
    let debug_name = self.machine.debug_name();
    let started = self.machine.start();
    self.publish();
    if let Err(err) = started {
      return self.fail(err);
    }

    while let Some(event) = self.rx.recv().await {
      let result = match event {
        InternalEvent::UserEvent(event) => self.machine.handle_event(event),
        InternalEvent::Timeout(expiry) => self.machine.handle_timeout(expiry),
        InternalEvent::Shutdown => {
          info!("{}: Received shutdown signal...", debug_name);
          break;
        },
      };
      self.publish();
      if let Err(err) = result {
        return self.fail(err);
      }
    }

    self.machine.stop();
    info!("{}: No longer handling events", debug_name);
    Ok(self.machine)
  }

  fn fail(mut self, err: FsmError) -> FsmResult<StateMachine<S, E, A>> {
    error!("{}: Halting: {}", self.machine.debug_name(), err);
    self.machine.stop();
    self.rx.close();
    Err(err)
  }

  fn publish(&self) {
    let current = self.machine.current_state();
    if *self.state_tx.borrow() != current {
      let _ = self.state_tx.send(current);
    }
  }
}

enum InternalEvent<S, E> {
  /// Event injected by the application.
  UserEvent(E),

  /// A timeout fired; may be stale by the time it is handled.
  Timeout(Expiry<S>),

  /// Stop the machine; no messages are handled after this one (which is still governed by FIFO
  /// ordering).
  Shutdown,
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use anyhow::anyhow;

  use crate::machine::Lifecycle;
  use crate::state::test_ids::*;

  use super::*;

  type Log = Arc<Mutex<Vec<&'static str>>>;

  fn door_machine(log: &Log) -> StateMachine<Door, Knock, &'static str> {
    let mut machine = StateMachine::new("DoorRunner");
    machine
        .set_timeout(Door::Closed, Duration::from_secs(1), Door::Open).unwrap()
        .set_timeout(Door::Open, Duration::from_secs(5), Door::Closed).unwrap()
        .set_always_transition(Knock::Slam, Door::Locked).unwrap();
    for (state, label) in [(Door::Closed, "closed"), (Door::Open, "open"), (Door::Locked, "locked")] {
      let log = log.clone();
      machine.set_callback(state, move |l: &&'static str| {
        log.lock().unwrap().push(*l);
        Ok(())
      }, label).unwrap();
    }
    machine
  }

  #[tokio::test]
  async fn test_shutdown_hands_back_machine() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));
    let machine = runner.shutdown().await.unwrap();

    assert_eq!(machine.lifecycle(), Lifecycle::Stopped);
    assert_eq!(machine.current_state(), Some(Door::Closed));
    assert!(machine.armed_expiry().is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_timeouts_drive_the_machine() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runner.current_state(), Some(Door::Closed));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runner.current_state(), Some(Door::Open));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(runner.current_state(), Some(Door::Closed));

    runner.shutdown().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["closed", "open", "closed"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_event_cancels_pending_timeout() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(runner.current_state(), Some(Door::Open));

    runner.dispatch(Knock::Slam).unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let machine = runner.shutdown().await.unwrap();
    assert_eq!(machine.current_state(), Some(Door::Locked));
    assert_eq!(*log.lock().unwrap(), vec!["closed", "open", "locked"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_delayed_dispatch_and_subscription() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));
    let mut states = runner.subscribe();
    runner.dispatcher().dispatch_delay_ms(Knock::Slam, 200);

    let mut seen = vec![];
    while seen.last() != Some(&Door::Locked) {
      states.changed().await.unwrap();
      if let Some(state) = *states.borrow() {
        seen.push(state);
      }
    }
    assert_eq!(seen, vec![Door::Closed, Door::Locked]);
    runner.shutdown().await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_dispatch_at_deadline() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));
    let deadline = Instant::now() + Duration::from_millis(1200);
    runner.dispatcher().dispatch_at_time(Knock::Slam, deadline);

    tokio::time::sleep_until(deadline - Duration::from_millis(1)).await;
    assert_eq!(runner.current_state(), Some(Door::Open));
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(runner.current_state(), Some(Door::Locked));

    runner.shutdown().await.unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["closed", "open", "locked"]);
  }

  #[tokio::test]
  async fn test_unmapped_events_are_ignored() {
    let log = Log::default();
    let runner = Runner::start(door_machine(&log));
    runner.dispatch(Knock::Push).unwrap();
    runner.dispatch(Knock::Push).unwrap();

    let machine = runner.shutdown().await.unwrap();
    assert_eq!(machine.current_state(), Some(Door::Closed));
    assert_eq!(*log.lock().unwrap(), vec!["closed"]);
  }

  #[tokio::test]
  async fn test_callback_failure_halts_runner() {
    let mut machine = StateMachine::<Door, Knock, ()>::new("Jammed");
    machine
        .set_always_transition(Knock::Push, Door::Open).unwrap()
        .set_callback(Door::Open, |_| Err(anyhow!("hinge broke")), ()).unwrap();
    let runner = Runner::start(machine);
    let dispatcher = runner.dispatcher();
    dispatcher.dispatch(Knock::Push).unwrap();

    let err = match runner.join().await {
      Ok(_) => panic!("callback failure should halt the runner"),
      Err(err) => err,
    };
    assert!(matches!(err, FsmError::Callback { ref state, .. } if state == "Open"));
    assert_eq!(dispatcher.dispatch(Knock::Push), Err(LifecycleError::NotRunning));
  }

  #[tokio::test]
  async fn test_running_machine_is_rejected() {
    let mut machine = StateMachine::<Door, Knock, ()>::new("AlreadyRunning");
    machine.start().unwrap();
    let err = match Runner::start(machine).join().await {
      Ok(_) => panic!("a running machine cannot be handed to a runner"),
      Err(err) => err,
    };
    assert!(matches!(err, FsmError::Lifecycle(LifecycleError::AlreadyStarted)));
  }
}
