use std::fmt::Debug;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::machine::StateMachine;
use crate::state::Enumeration;

pub struct StateGraphPrinter;

impl StateGraphPrinter {
  /// # Example output:
  ///
  /// ```text
  /// TrafficLight: 6 states, 2 events
  ///   timeouts:
  ///     Init --(3s)--> Red
  ///     Red --(4s)--> Green
  ///   always:
  ///     Reset => Init
  ///   callbacks:
  ///     Red ("RED")
  ///   warnings:
  ///     event WarningOn has no effect
  /// ```
  pub fn write_config<S, E, A, W>(machine: &StateMachine<S, E, A>, out: &mut W) -> io::Result<()>
  where
      S: Enumeration,
      E: Enumeration,
      A: Debug,
      W: Write,
  {
    writeln!(
      out,
      "{}: {} states, {} events",
      machine.debug_name(),
      machine.nb_states(),
      machine.nb_events())?;

    writeln!(out, "  timeouts:")?;
    for (from, rule) in machine.table().timeouts() {
      writeln!(
        out,
        "    {} --({})--> {}",
        from.debug_name(),
        format_duration(rule.duration),
        rule.target.debug_name())?;
    }

    writeln!(out, "  always:")?;
    for (event, target) in machine.table().always_transitions() {
      writeln!(out, "    {} => {}", event.debug_name(), target.debug_name())?;
    }

    writeln!(out, "  callbacks:")?;
    for (state, callback) in machine.callbacks().iter() {
      writeln!(out, "    {} ({:?})", state.debug_name(), callback.arg)?;
    }

    let warnings = machine.validate();
    if !warnings.is_empty() {
      writeln!(out, "  warnings:")?;
      for warning in warnings {
        writeln!(out, "    {}", warning)?;
      }
    }
    Ok(())
  }

  pub fn config_string<S, E, A>(machine: &StateMachine<S, E, A>) -> String
  where
      S: Enumeration,
      E: Enumeration,
      A: Debug,
  {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = Self::write_config(machine, &mut out);
    String::from_utf8_lossy(&out).into_owned()
  }

  /// Graphviz rendition of the table.  Always transitions hang off a single point node since
  /// they apply from every state.
  pub fn write_dot<S, E, A, W>(machine: &StateMachine<S, E, A>, out: &mut W) -> io::Result<()>
  where
      S: Enumeration,
      E: Enumeration,
      W: Write,
  {
    writeln!(out, "digraph {} {{", machine.debug_name())?;
    writeln!(out, "  rankdir=LR;")?;
    for state in S::all() {
      let shape = if state.index() == 0 { "doublecircle" } else { "circle" };
      let style = if machine.callbacks().get(state).is_some() { ", style=bold" } else { "" };
      writeln!(out, "  {} [shape={}{}];", state.debug_name(), shape, style)?;
    }
    for (from, rule) in machine.table().timeouts() {
      writeln!(
        out,
        "  {} -> {} [label=\"{}\"];",
        from.debug_name(),
        rule.target.debug_name(),
        format_duration(rule.duration))?;
    }
    let mut always = machine.table().always_transitions().peekable();
    if always.peek().is_some() {
      writeln!(out, "  any [shape=point];")?;
      for (event, target) in always {
        writeln!(
          out,
          "  any -> {} [label=\"{}\", style=dashed];",
          target.debug_name(),
          event.debug_name())?;
      }
    }
    writeln!(out, "}}")
  }

  pub fn write_dot_file<S, E, A>(machine: &StateMachine<S, E, A>, path: impl AsRef<Path>) -> io::Result<()>
  where
      S: Enumeration,
      E: Enumeration,
  {
    let mut writer = BufWriter::new(File::create(path)?);
    Self::write_dot(machine, &mut writer)?;
    writer.flush()
  }

  pub fn snapshot<S, E, A>(machine: &StateMachine<S, E, A>) -> ConfigSnapshot
  where
      S: Enumeration,
      E: Enumeration,
      A: Debug,
  {
    ConfigSnapshot {
      name: machine.debug_name().to_string(),
      nb_states: machine.nb_states(),
      nb_events: machine.nb_events(),
      timeouts: machine.table().timeouts()
          .map(|(from, rule)| TimeoutEntry {
            from: from.debug_name(),
            to: rule.target.debug_name(),
            duration_ms: u64::try_from(rule.duration.as_millis()).unwrap_or(u64::MAX),
            duration: format_duration(rule.duration),
          })
          .collect(),
      always: machine.table().always_transitions()
          .map(|(event, to)| AlwaysEntry { event: event.debug_name(), to: to.debug_name() })
          .collect(),
      callbacks: machine.callbacks().iter()
          .map(|(state, callback)| CallbackEntry {
            state: state.debug_name(),
            arg: format!("{:?}", callback.arg),
          })
          .collect(),
      warnings: machine.validate().iter().map(|w| w.to_string()).collect(),
    }
  }
}

/// Serializable view of a machine's configuration.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
  pub name: String,
  pub nb_states: usize,
  pub nb_events: usize,
  pub timeouts: Vec<TimeoutEntry>,
  pub always: Vec<AlwaysEntry>,
  pub callbacks: Vec<CallbackEntry>,
  pub warnings: Vec<String>,
}

impl ConfigSnapshot {
  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TimeoutEntry {
  pub from: String,
  pub to: String,
  pub duration_ms: u64,
  /// Exact duration, as rendered in the text dump.
  pub duration: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AlwaysEntry {
  pub event: String,
  pub to: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CallbackEntry {
  pub state: String,
  pub arg: String,
}

fn format_duration(duration: Duration) -> String {
  let nanos = duration.subsec_nanos();
  if nanos == 0 {
    format!("{}s", duration.as_secs())
  } else if nanos % 1_000_000 == 0 {
    format!("{}ms", duration.as_millis())
  } else {
    format!("{:?}", duration)
  }
}
