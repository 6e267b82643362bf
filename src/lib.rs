//! A symbolic execution engine for a stack-based object-oriented bytecode
//! VM. Given a target method and entry conditions it explores all feasible
//! execution paths, keeping per path a symbolic state (heap, operand
//! stacks, path condition). Primitive and reference values may be
//! symbolic; when execution depends on one, the engine forks the state
//! into one child per feasible outcome, pushing the disambiguating clause
//! onto the child's path condition. Feasibility is delegated to a
//! pluggable decision procedure.
//!
//! The crate layers bottom-up: `types` and `value` define the signature
//! records and the immutable value algebra, `calc` and `rewr` build and
//! canonicalize primitive expressions, `mem` holds the mutable cells of a
//! state, `bc` is the read-only class oracle, `dec` the decision
//! procedure, `algo` the per-bytecode algorithm catalog, and `jvm` the
//! engine step loop plus the depth-first runner.

pub mod algo;
pub mod apps;
pub mod bc;
pub mod calc;
pub mod dec;
pub mod jvm;
pub mod mem;
pub mod rewr;
pub mod rules;
pub mod tree;
pub mod types;
pub mod value;

pub use calc::Calculator;
pub use jvm::{Runner, RunnerBuilder, RunnerParameters};
pub use mem::State;
pub use value::{Primitive, Reference, Value};
