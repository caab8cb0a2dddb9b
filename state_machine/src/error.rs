use thiserror::Error;

use crate::machine::Lifecycle;

/// Rejected configuration.  Nothing is recorded when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("state index {index} out of range (machine has {count} states)")]
  StateOutOfRange { index: usize, count: usize },

  #[error("event index {index} out of range (machine has {count} events)")]
  EventOutOfRange { index: usize, count: usize },

  #[error("timeout already assigned for state {0}")]
  DuplicateTimeout(String),

  #[error("always transition already assigned for event {0}")]
  DuplicateTransition(String),

  #[error("callback already assigned for state {0}")]
  DuplicateCallback(String),

  #[error("machine declares no states")]
  NoStates,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
  #[error("machine already started")]
  AlreadyStarted,

  #[error("cannot configure a machine in the {0:?} phase")]
  ConfigureAfterStart(Lifecycle),

  #[error("timeouts are configured but no timer backend and expiry sink were assigned")]
  MissingTimer,

  #[error("machine is no longer running")]
  NotRunning,
}

#[derive(Error, Debug)]
pub enum FsmError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  /// Entry action failed.  The machine has already committed to `state` when this is returned.
  #[error("callback for state {state} failed: {source}")]
  Callback {
    state: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("runner task failed: {0}")]
  Task(#[from] tokio::task::JoinError),
}

pub type FsmResult<T> = Result<T, FsmError>;
