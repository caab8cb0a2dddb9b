use std::sync::Arc;

use crate::error::ConfigError;
use crate::state::{checked_index, Enumeration};

/// Entry action run when the machine enters a state.  Any `Fn(&A) -> anyhow::Result<()>`
/// closure or function qualifies.
pub trait Action<A>: Send + Sync {
  fn invoke(&self, arg: &A) -> anyhow::Result<()>;
}

impl<F, A> Action<A> for F
where
    F: Fn(&A) -> anyhow::Result<()> + Send + Sync,
{
  fn invoke(&self, arg: &A) -> anyhow::Result<()> {
    (self)(arg)
  }
}

/// An action paired with the value it is always invoked with.
pub struct Callback<A> {
  action: Arc<dyn Action<A>>,
  pub arg: A,
}

impl<A> Clone for Callback<A> where A: Clone {
  fn clone(&self) -> Self {
    Self {
      action: self.action.clone(),
      arg: self.arg.clone(),
    }
  }
}

impl<A> Callback<A> {
  pub fn new<F>(action: F, arg: A) -> Self
  where
      F: Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    Self::from_action(action, arg)
  }

  pub fn from_action(action: impl Action<A> + 'static, arg: A) -> Self {
    Self { action: Arc::new(action), arg }
  }

  pub fn invoke(&self) -> anyhow::Result<()> {
    self.action.invoke(&self.arg)
  }
}

pub struct CallbackRegistry<S, A> {
  slots: Vec<Option<Callback<A>>>,
  _states: std::marker::PhantomData<S>,
}

impl<S: Enumeration, A> CallbackRegistry<S, A> {
  pub fn new() -> Self {
    Self {
      slots: (0..S::COUNT).map(|_| None).collect(),
      _states: std::marker::PhantomData,
    }
  }

  pub fn assign(&mut self, state: S, callback: Callback<A>) -> Result<(), ConfigError> {
    let index = checked_index(state).ok_or(ConfigError::StateOutOfRange {
      index: state.index(),
      count: S::COUNT,
    })?;
    let slot = &mut self.slots[index];
    if slot.is_some() {
      return Err(ConfigError::DuplicateCallback(state.debug_name()));
    }
    *slot = Some(callback);
    Ok(())
  }

  pub fn get(&self, state: S) -> Option<&Callback<A>> {
    checked_index(state).and_then(|i| self.slots[i].as_ref())
  }

  /// States with a callback, in index order.
  pub fn iter(&self) -> impl Iterator<Item = (S, &Callback<A>)> + '_ {
    self.slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| Some((S::from_index(i)?, slot.as_ref()?)))
  }
}

impl<S: Enumeration, A> Default for CallbackRegistry<S, A> {
  fn default() -> Self {
    Self::new()
  }
}
