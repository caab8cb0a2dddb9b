pub mod callbacks;
pub mod descriptor;
pub mod error;
pub mod graph_printer;
pub mod machine;
pub mod runner;
pub mod state;
pub mod table;
pub mod timer;

pub use callbacks::{Action, Callback};
pub use descriptor::StateMachineDescriptor;
pub use error::{ConfigError, FsmError, FsmResult, LifecycleError};
pub use machine::{Lifecycle, StateMachine};
pub use runner::{Dispatcher, Runner};
pub use state::{Enumeration, Expiry};
pub use table::{ConfigWarning, TimeoutRule};
pub use timer::{ManualTimer, TimerBackend, TimerHandle, TokioTimer};

/// Compile-time options this engine was built with, e.g. `state_machine 0.1.0 [print-states]`.
pub fn build_options() -> String {
  let mut options = vec![];
  if cfg!(feature = "print-states") {
    options.push("print-states");
  }
  format!("{} {} [{}]", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"), options.join(", "))
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use tokio::time::Duration;

  use crate::graph_printer::*;

  use super::*;

  const COIN_TIMEOUT_MS: u64 = 3000;

  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  enum Turnstile {
    Locked,
    Unlocked,
    Alarm,
  }

  impl Enumeration for Turnstile {
    const COUNT: usize = 3;

    fn index(self) -> usize {
      self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
      match index {
        0 => Some(Turnstile::Locked),
        1 => Some(Turnstile::Unlocked),
        2 => Some(Turnstile::Alarm),
        _ => None,
      }
    }
  }

  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  enum TurnstileEvent {
    Coin,
    Force,
  }

  impl Enumeration for TurnstileEvent {
    const COUNT: usize = 2;

    fn index(self) -> usize {
      self as usize
    }

    fn from_index(index: usize) -> Option<Self> {
      match index {
        0 => Some(TurnstileEvent::Coin),
        1 => Some(TurnstileEvent::Force),
        _ => None,
      }
    }
  }

  #[derive(Default)]
  struct TurnstileMachine {
    events: Arc<Mutex<Vec<String>>>,
  }

  impl TurnstileMachine {
    fn recorder(&self) -> impl Fn(&&'static str) -> anyhow::Result<()> + Send + Sync + 'static {
      let events = self.events.clone();
      move |label: &&'static str| {
        println!("TurnstileMachine: {}", label);
        events.lock().unwrap().push(label.to_string());
        Ok(())
      }
    }
  }

  impl StateMachineDescriptor for TurnstileMachine {
    type State = Turnstile;
    type Event = TurnstileEvent;
    type Arg = &'static str;

    fn debug_name(&self) -> &'static str {
      "TurnstileMachine"
    }

    fn configure(&self, machine: &mut StateMachine<Turnstile, TurnstileEvent, &'static str>) -> FsmResult<()> {
      machine
          .set_always_transition(TurnstileEvent::Coin, Turnstile::Unlocked)?
          .set_always_transition(TurnstileEvent::Force, Turnstile::Alarm)?
          .set_timeout(Turnstile::Unlocked, Duration::from_millis(COIN_TIMEOUT_MS), Turnstile::Locked)?
          .set_timeout(Turnstile::Alarm, Duration::from_secs(10), Turnstile::Locked)?
          .set_callback(Turnstile::Locked, self.recorder(), "locked")?
          .set_callback(Turnstile::Unlocked, self.recorder(), "unlocked")?
          .set_callback(Turnstile::Alarm, self.recorder(), "alarm")?;
      Ok(())
    }
  }

  #[test]
  fn test_descriptor_builds_configured_machine() {
    let machine = TurnstileMachine::default().build().unwrap();
    assert_eq!(machine.debug_name(), "TurnstileMachine");
    assert_eq!(machine.lifecycle(), Lifecycle::Configured);
    assert!(machine.validate().is_empty());
    println!("{}", StateGraphPrinter::config_string(&machine));
  }

  #[test]
  fn test_build_options() {
    let options = build_options();
    assert!(options.starts_with("state_machine "));
    assert_eq!(options.contains("print-states"), cfg!(feature = "print-states"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_coin_timeout_and_forced_entry() {
    let _ = env_logger::builder().is_test(true).try_init();
    let descriptor = TurnstileMachine::default();
    let runner = Runner::start_descriptor(&descriptor).unwrap();
    let dispatcher = runner.dispatcher();

    dispatcher.dispatch(TurnstileEvent::Coin).unwrap();
    tokio::time::sleep(Duration::from_millis(COIN_TIMEOUT_MS - 1)).await;
    assert_eq!(runner.current_state(), Some(Turnstile::Unlocked));

    // A second coin restarts the countdown rather than stacking a second one.
    dispatcher.dispatch(TurnstileEvent::Coin).unwrap();
    tokio::time::sleep(Duration::from_millis(COIN_TIMEOUT_MS - 1)).await;
    assert_eq!(runner.current_state(), Some(Turnstile::Unlocked));
    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(runner.current_state(), Some(Turnstile::Locked));

    dispatcher.dispatch_delay_ms(TurnstileEvent::Force, 500);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runner.current_state(), Some(Turnstile::Alarm));

    let machine = runner.shutdown().await.unwrap();
    assert_eq!(machine.lifecycle(), Lifecycle::Stopped);
    assert_eq!(*descriptor.events.lock().unwrap(), vec![
      "locked",
      "unlocked",
      "unlocked",
      "locked",
      "alarm",
    ]);
  }
}
