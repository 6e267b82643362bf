pub mod engine;
pub mod params;
pub mod runner;

pub use engine::{Engine, StepOutcome};
pub use params::{BuildError, RunnerBuilder, RunnerParameters};
pub use runner::{Actions, DefaultActions, RunOutcome, RunStats, Runner, RunnerError};
