use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use state_machine::{Enumeration, FsmResult, StateMachine, StateMachineDescriptor};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LightState {
  Init,
  Red,
  Orange,
  Green,
  BlinkOn,
  BlinkOff,
}

impl Enumeration for LightState {
  const COUNT: usize = 6;

  fn index(self) -> usize {
    self as usize
  }

  fn from_index(index: usize) -> Option<Self> {
    match index {
      0 => Some(LightState::Init),
      1 => Some(LightState::Red),
      2 => Some(LightState::Orange),
      3 => Some(LightState::Green),
      4 => Some(LightState::BlinkOn),
      5 => Some(LightState::BlinkOff),
      _ => None,
    }
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LightEvent {
  /// Back to `Init`, whatever the current state.
  Reset,
  /// Start blinking orange.
  WarningOn,
}

impl Enumeration for LightEvent {
  const COUNT: usize = 2;

  fn index(self) -> usize {
    self as usize
  }

  fn from_index(index: usize) -> Option<Self> {
    match index {
      0 => Some(LightEvent::Reset),
      1 => Some(LightEvent::WarningOn),
      _ => None,
    }
  }
}

/// How long each phase lasts.  Missing fields in a timings file fall back to the defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Timings {
  pub init_ms: u64,
  pub red_ms: u64,
  pub green_ms: u64,
  pub orange_ms: u64,
  pub blink_ms: u64,
}

impl Default for Timings {
  fn default() -> Self {
    Self {
      init_ms: 3000,
      red_ms: 4000,
      green_ms: 4000,
      orange_ms: 1000,
      blink_ms: 1000,
    }
  }
}

impl Timings {
  pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
    let file = File::open(path)?;
    Self::from_reader(BufReader::new(file))
  }

  pub fn from_reader(reader: impl Read) -> anyhow::Result<Self> {
    Ok(serde_json::from_reader(reader)?)
  }
}

pub type Lamp = Arc<dyn Fn(&str) + Send + Sync>;

/// Red, green and orange cycle driven purely by timeouts, with a blinking warning mode and a
/// reset that can interrupt anything.  `lamp` receives the label of each colour as it lights up.
pub struct TrafficLight {
  timings: Timings,
  lamp: Lamp,
}

impl TrafficLight {
  pub fn new(timings: Timings, lamp: impl Fn(&str) + Send + Sync + 'static) -> Self {
    Self { timings, lamp: Arc::new(lamp) }
  }
}

impl StateMachineDescriptor for TrafficLight {
  type State = LightState;
  type Event = LightEvent;
  type Arg = String;

  fn debug_name(&self) -> &'static str {
    "TrafficLight"
  }

  fn configure(&self, machine: &mut StateMachine<LightState, LightEvent, String>) -> FsmResult<()> {
    let t = &self.timings;
    machine
        .set_timeout(LightState::Init, Duration::from_millis(t.init_ms), LightState::Red)?
        .set_timeout(LightState::Red, Duration::from_millis(t.red_ms), LightState::Green)?
        .set_timeout(LightState::Green, Duration::from_millis(t.green_ms), LightState::Orange)?
        .set_timeout(LightState::Orange, Duration::from_millis(t.orange_ms), LightState::Red)?
        .set_timeout(LightState::BlinkOn, Duration::from_millis(t.blink_ms), LightState::BlinkOff)?
        .set_timeout(LightState::BlinkOff, Duration::from_millis(t.blink_ms), LightState::BlinkOn)?
        .set_always_transition(LightEvent::Reset, LightState::Init)?
        .set_always_transition(LightEvent::WarningOn, LightState::BlinkOn)?;

    for (state, label) in [
      (LightState::Red, "RED"),
      (LightState::Orange, "ORANGE"),
      (LightState::Green, "GREEN"),
    ] {
      let lamp = self.lamp.clone();
      machine.set_callback(state, move |value: &String| {
        lamp(value);
        Ok(())
      }, label.to_string())?;
    }
    Ok(())
  }
}
