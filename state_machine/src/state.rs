use std::fmt::Debug;

/// A closed, contiguous set of identifiers numbered `0..COUNT`.  Both the states and the events
/// of a machine are described this way, typically by a plain fieldless enum:
///
/// ```
/// use state_machine::state::Enumeration;
///
/// #[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// enum Light { Red, Green }
///
/// impl Enumeration for Light {
///   const COUNT: usize = 2;
///
///   fn index(self) -> usize {
///     self as usize
///   }
///
///   fn from_index(index: usize) -> Option<Self> {
///     match index {
///       0 => Some(Light::Red),
///       1 => Some(Light::Green),
///       _ => None,
///     }
///   }
/// }
/// ```
///
/// Index 0 is the initial state of any machine built over the enumeration.
pub trait Enumeration: Copy + Eq + Debug + Send + Sync + 'static {
  const COUNT: usize;

  fn index(self) -> usize;
  fn from_index(index: usize) -> Option<Self>;

  /// Short name used in logs and exports.
  fn debug_name(self) -> String {
    format!("{:?}", self)
  }

  fn all() -> Box<dyn Iterator<Item = Self>> {
    Box::new((0..Self::COUNT).filter_map(Self::from_index))
  }
}

/// Checks that `id` maps into `0..COUNT`, returning its index when it does.
pub(crate) fn checked_index<T: Enumeration>(id: T) -> Option<usize> {
  let index = id.index();
  if index < T::COUNT {
    Some(index)
  } else {
    None
  }
}

/// Identity of one armed timeout.  The generation increases with every arming so that a
/// notification from an earlier visit to the same state can be told apart from the current one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Expiry<S> {
  pub state: S,
  pub generation: u64,
}
