use crate::error::FsmResult;
use crate::machine::StateMachine;
use crate::state::Enumeration;

/// Declares a machine: its vocabulary, its name and how its rules are wired up.
pub trait StateMachineDescriptor {
  type State: Enumeration;
  type Event: Enumeration;
  type Arg: Send + Sync + 'static;

  fn debug_name(&self) -> &'static str;
  fn configure(&self, machine: &mut StateMachine<Self::State, Self::Event, Self::Arg>) -> FsmResult<()>;

  fn build(&self) -> FsmResult<StateMachine<Self::State, Self::Event, Self::Arg>> {
    let mut machine = StateMachine::new(self.debug_name());
    self.configure(&mut machine)?;
    Ok(machine)
  }
}
