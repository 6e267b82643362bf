use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::algo::ExecError;
use crate::jvm::engine::{Engine, StepOutcome};
use crate::jvm::params::RunnerParameters;
use crate::mem::state::{State, Stuck};
use crate::types::Signature;
use crate::value::Value;

/// Per-state hooks of the runner. A `true` return stops the whole run.
pub trait Actions {
    fn at_root(&mut self, _state: &State) -> bool {
        false
    }

    fn at_pre_step(&mut self, _state: &State) -> bool {
        false
    }

    fn at_post_step(&mut self, _state: &State) -> bool {
        false
    }

    fn at_contradiction(&mut self, _state: &State) -> bool {
        false
    }

    fn at_stuck(&mut self, _state: &State) -> bool {
        false
    }

    fn at_observed_change(&mut self, _class: &str, _field: &Signature, _value: &Value) -> bool {
        false
    }
}

/// The no-op hook set.
pub struct DefaultActions;

impl Actions for DefaultActions {}

/// How a run ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum RunOutcome {
    /// The worklist drained: the whole (scoped) tree was explored.
    Completed,
    /// The wall-clock budget expired; remaining states are unfinished.
    TimedOut,
    /// The count scope was exhausted.
    CountExhausted,
    /// A hook requested the stop.
    Stopped,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub states_explored: u64,
    pub steps: u64,
    pub stuck_returns: u64,
    pub stuck_exceptions: u64,
    pub stuck_unsupported: u64,
    pub contradictions: u64,
    pub decision_failures: u64,
    pub pruned_by_depth: u64,
    pub pruned_by_subregion: u64,
    pub unfinished: u64,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    /// An invariant was violated. The offending state stays available on
    /// the runner for post-mortem inspection.
    #[error("fatal engine error: {0}")]
    Fatal(String),
}

/// Depth-first driver over the state space: a LIFO worklist of pending
/// successors, scope limits, a cooperative wall-clock deadline and the
/// per-state hooks.
pub struct Runner {
    engine: Engine,
    root: Option<State>,
    actions: Box<dyn Actions>,
    worklist: Vec<State>,
    depth_scope: usize,
    count_scope: u64,
    timeout: Option<Duration>,
    identifier_subregion: Option<String>,
    observed: Vec<(String, Signature)>,
    observed_cache: HashMap<(String, String), Value>,
    stats: RunStats,
}

impl Runner {
    pub(crate) fn new(
        engine: Engine,
        root: State,
        actions: Box<dyn Actions>,
        params: &RunnerParameters,
    ) -> Runner {
        Runner {
            engine,
            root: Some(root),
            actions,
            worklist: Vec::new(),
            depth_scope: params.depth_scope,
            count_scope: params.count_scope,
            timeout: if params.timeout_millis == 0 {
                None
            } else {
                Some(Duration::from_millis(params.timeout_millis))
            },
            identifier_subregion: params.identifier_subregion.clone(),
            observed: params.observed_variables.clone(),
            observed_cache: HashMap::new(),
            stats: RunStats::default(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The state the engine was on when a fatal error surfaced.
    pub fn offending_state(&self) -> Option<&State> {
        self.engine.current_state()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Runs to completion, a scope limit, the deadline or a hook stop.
    /// The decision procedure is released in every case.
    pub fn run(&mut self) -> Result<RunOutcome, RunnerError> {
        let result = self.run_inner();
        if let Err(e) = self.engine.close_decision_procedure() {
            warn!("failed to release the decision procedure: {}", e);
        }
        result
    }

    fn run_inner(&mut self) -> Result<RunOutcome, RunnerError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let root = self
            .root
            .take()
            .ok_or_else(|| RunnerError::Fatal("runner was already run".to_owned()))?;
        self.stats.states_explored = 1;
        if self.actions.at_root(&root) {
            return Ok(RunOutcome::Stopped);
        }
        self.engine.set_current_state(root);

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.stats.unfinished = self.worklist.len() as u64 + 1;
                    info!("timeout: {} states unfinished", self.stats.unfinished);
                    return Ok(RunOutcome::TimedOut);
                }
            }
            if self.count_scope > 0 && self.stats.states_explored >= self.count_scope {
                return Ok(RunOutcome::CountExhausted);
            }

            let (is_stuck, depth, in_subregion) = {
                let state = self
                    .engine
                    .current_state()
                    .ok_or_else(|| RunnerError::Fatal("engine lost its state".to_owned()))?;
                (state.is_stuck(), state.depth(), self.in_subregion(state))
            };

            if !in_subregion {
                self.stats.pruned_by_subregion += 1;
                self.engine.discard_current_state();
                if !self.backtrack() {
                    return Ok(RunOutcome::Completed);
                }
                continue;
            }

            if is_stuck {
                let state = self.engine.discard_current_state().expect("state present");
                match state.stuck() {
                    Some(Stuck::Return(_)) => self.stats.stuck_returns += 1,
                    Some(Stuck::Exception(_)) => self.stats.stuck_exceptions += 1,
                    Some(Stuck::Unsupported(_)) => self.stats.stuck_unsupported += 1,
                    None => {}
                }
                if self.actions.at_stuck(&state) {
                    return Ok(RunOutcome::Stopped);
                }
                if !self.backtrack() {
                    return Ok(RunOutcome::Completed);
                }
                continue;
            }

            if self.depth_scope > 0 && depth >= self.depth_scope {
                // Scope exhaustion: this state's children are skipped.
                self.stats.pruned_by_depth += 1;
                debug!("depth scope reached, pruning");
                self.engine.discard_current_state();
                if !self.backtrack() {
                    return Ok(RunOutcome::Completed);
                }
                continue;
            }

            if self
                .actions
                .at_pre_step(self.engine.current_state().expect("state present"))
            {
                return Ok(RunOutcome::Stopped);
            }

            match self.engine.step() {
                Ok(StepOutcome::Stepped) => {
                    self.stats.steps += 1;
                }
                Ok(StepOutcome::Forked(n)) => {
                    self.stats.steps += 1;
                    debug!("forked into {} successors", n);
                    let pending = self.engine.take_pending();
                    self.worklist.extend(pending);
                }
                Ok(StepOutcome::Contradiction) => {
                    self.stats.contradictions += 1;
                    let state = self.engine.discard_current_state().expect("state present");
                    if self.actions.at_contradiction(&state) {
                        return Ok(RunOutcome::Stopped);
                    }
                    if !self.backtrack() {
                        return Ok(RunOutcome::Completed);
                    }
                    continue;
                }
                Ok(StepOutcome::Stuck) => {
                    // Handled above; a stuck state never reaches step.
                    continue;
                }
                Err(ExecError::Decision(e)) => {
                    // A decision failure kills the path, not the run.
                    warn!("decision procedure failed: {}", e);
                    self.stats.decision_failures += 1;
                    self.engine.discard_current_state();
                    if !self.backtrack() {
                        return Ok(RunOutcome::Completed);
                    }
                    continue;
                }
                Err(e) => {
                    return Err(RunnerError::Fatal(e.to_string()));
                }
            }

            if self
                .actions
                .at_post_step(self.engine.current_state().expect("state present"))
            {
                return Ok(RunOutcome::Stopped);
            }
            if self.notify_observed() {
                return Ok(RunOutcome::Stopped);
            }
        }
    }

    /// Pops the next in-subregion state off the worklist and makes it
    /// current; `false` when the worklist drains.
    fn backtrack(&mut self) -> bool {
        while let Some(state) = self.worklist.pop() {
            if !self.in_subregion(&state) {
                self.stats.pruned_by_subregion += 1;
                continue;
            }
            self.stats.states_explored += 1;
            debug!("backtracking to [{}]", state.identifier());
            self.engine.set_current_state(state);
            return true;
        }
        false
    }

    /// A state is expanded iff its identifier and the configured prefix
    /// agree on their common length; this enables resuming or sharding a
    /// run by tree region.
    fn in_subregion(&self, state: &State) -> bool {
        match &self.identifier_subregion {
            None => true,
            Some(region) => {
                let id = state.identifier();
                id.starts_with(region.as_str()) || region.starts_with(id)
            }
        }
    }

    fn notify_observed(&mut self) -> bool {
        if self.observed.is_empty() {
            return false;
        }
        let mut changes = Vec::new();
        {
            let state = match self.engine.current_state() {
                Some(s) => s,
                None => return false,
            };
            for (class, field) in &self.observed {
                let value = state
                    .klass(class)
                    .and_then(|k| k.field_value(field))
                    .cloned();
                if let Some(value) = value {
                    let key = (class.clone(), field.name.clone());
                    if self.observed_cache.get(&key) != Some(&value) {
                        changes.push((key, class.clone(), field.clone(), value));
                    }
                }
            }
        }
        for (key, class, field, value) in changes {
            self.observed_cache.insert(key, value.clone());
            if self.actions.at_observed_change(&class, &field, &value) {
                return true;
            }
        }
        false
    }
}
