pub mod frame;
pub mod heap;
pub mod objekt;
pub mod path;
pub mod state;

pub use frame::Frame;
pub use heap::Heap;
pub use objekt::{Array, Instance, Klass, Objekt};
pub use path::{Clause, PathCondition};
pub use state::{RefState, State, StateError, Stuck};
