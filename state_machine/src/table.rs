use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use crate::error::ConfigError;
use crate::state::{checked_index, Enumeration};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimeoutRule<S> {
  pub duration: Duration,
  pub target: S,
}

/// Timeout and always-transition rules of a machine.  Both maps are partial and each entry can
/// only be assigned once.
pub struct TransitionTable<S, E> {
  timeouts: Vec<Option<TimeoutRule<S>>>,
  always: Vec<Option<S>>,
  _events: PhantomData<E>,
}

impl<S: Enumeration, E: Enumeration> TransitionTable<S, E> {
  pub fn new() -> Self {
    Self {
      timeouts: vec![None; S::COUNT],
      always: vec![None; E::COUNT],
      _events: PhantomData,
    }
  }

  pub fn set_timeout(&mut self, from: S, duration: Duration, to: S) -> Result<(), ConfigError> {
    let from_index = state_index(from)?;
    state_index(to)?;
    let slot = &mut self.timeouts[from_index];
    if slot.is_some() {
      return Err(ConfigError::DuplicateTimeout(from.debug_name()));
    }
    *slot = Some(TimeoutRule { duration, target: to });
    Ok(())
  }

  pub fn set_always_transition(&mut self, event: E, to: S) -> Result<(), ConfigError> {
    let event_index = checked_index(event).ok_or(ConfigError::EventOutOfRange {
      index: event.index(),
      count: E::COUNT,
    })?;
    state_index(to)?;
    let slot = &mut self.always[event_index];
    if slot.is_some() {
      return Err(ConfigError::DuplicateTransition(event.debug_name()));
    }
    *slot = Some(to);
    Ok(())
  }

  pub fn timeout_of(&self, state: S) -> Option<TimeoutRule<S>> {
    checked_index(state).and_then(|i| self.timeouts[i])
  }

  pub fn always_of(&self, event: E) -> Option<S> {
    checked_index(event).and_then(|i| self.always[i])
  }

  pub fn has_timeouts(&self) -> bool {
    self.timeouts.iter().any(Option::is_some)
  }

  /// Configured timeouts in state order.
  pub fn timeouts(&self) -> impl Iterator<Item = (S, TimeoutRule<S>)> + '_ {
    self.timeouts
        .iter()
        .enumerate()
        .filter_map(|(i, rule)| Some((S::from_index(i)?, (*rule)?)))
  }

  /// Configured always transitions in event order.
  pub fn always_transitions(&self) -> impl Iterator<Item = (E, S)> + '_ {
    self.always
        .iter()
        .enumerate()
        .filter_map(|(i, target)| Some((E::from_index(i)?, (*target)?)))
  }

  /// Lists suspicious but legal configuration.  The initial state counts as reachable.
  pub fn validate(&self) -> Vec<ConfigWarning<S, E>> {
    let mut warnings = vec![];
    let any_always = self.always.iter().any(Option::is_some);

    let mut targeted = vec![false; S::COUNT];
    if let Some(first) = targeted.first_mut() {
      *first = true;
    }
    for (_, rule) in self.timeouts() {
      targeted[rule.target.index()] = true;
    }
    for (_, target) in self.always_transitions() {
      targeted[target.index()] = true;
    }

    for state in S::all() {
      let index = state.index();
      if !targeted[index] {
        warnings.push(ConfigWarning::Unreachable(state));
      } else if self.timeouts[index].is_none() && !any_always {
        warnings.push(ConfigWarning::DeadEnd(state));
      }
    }
    for event in E::all() {
      if self.always[event.index()].is_none() {
        warnings.push(ConfigWarning::UnusedEvent(event));
      }
    }
    warnings
  }
}

impl<S: Enumeration, E: Enumeration> Default for TransitionTable<S, E> {
  fn default() -> Self {
    Self::new()
  }
}

fn state_index<S: Enumeration>(state: S) -> Result<usize, ConfigError> {
  checked_index(state).ok_or(ConfigError::StateOutOfRange {
    index: state.index(),
    count: S::COUNT,
  })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigWarning<S, E> {
  /// Reachable state with nothing that can ever move the machine out of it.
  DeadEnd(S),

  /// Neither the initial state nor the target of any rule.
  Unreachable(S),

  /// Event without an always transition; receiving it does nothing.
  UnusedEvent(E),
}

impl<S: Enumeration, E: Enumeration> fmt::Display for ConfigWarning<S, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConfigWarning::DeadEnd(s) => write!(f, "state {} is a dead end", s.debug_name()),
      ConfigWarning::Unreachable(s) => write!(f, "state {} is unreachable", s.debug_name()),
      ConfigWarning::UnusedEvent(e) => write!(f, "event {} has no effect", e.debug_name()),
    }
  }
}
