use std::collections::{HashMap, VecDeque};

use log::trace;

use crate::algo::{self, opcodes, ExecError, ExecutionContext};
use crate::bc::ClassHierarchy;
use crate::calc::Calculator;
use crate::dec::DecisionProcedure;
use crate::mem::state::{State, Stuck};
use crate::rules::LicsRules;

/// What one `step` did to the current state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    /// The state is stuck; nothing happened.
    Stuck,
    /// The state was mutated in place.
    Stepped,
    /// The step forked: the first successor is now current, the rest are
    /// pending for the runner's worklist.
    Forked(usize),
    /// Every alternative was infeasible; the current state is preserved
    /// for the contradiction hook and must be discarded.
    Contradiction,
}

/// The step loop: decodes the current opcode, dispatches its algorithm,
/// and manages successors. Keeps the decision procedure's assumptions in
/// sync with the current state's path condition: incremental pushes along
/// a path, a full (fast-mode) reload after a backtrack.
pub struct Engine {
    calc: Calculator,
    hier: ClassHierarchy,
    rules: LicsRules,
    heap_scope: HashMap<String, usize>,
    dec: Box<dyn DecisionProcedure>,
    current: Option<State>,
    pending: VecDeque<State>,
    synced_clauses: usize,
    needs_full_sync: bool,
}

impl Engine {
    pub fn new(
        calc: Calculator,
        hier: ClassHierarchy,
        rules: LicsRules,
        heap_scope: HashMap<String, usize>,
        dec: Box<dyn DecisionProcedure>,
    ) -> Engine {
        Engine {
            calc,
            hier,
            rules,
            heap_scope,
            dec,
            current: None,
            pending: VecDeque::new(),
            synced_clauses: 0,
            needs_full_sync: true,
        }
    }

    pub fn calculator(&self) -> &Calculator {
        &self.calc
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hier
    }

    pub fn current_state(&self) -> Option<&State> {
        self.current.as_ref()
    }

    /// Makes a state current, e.g. on backtrack. The decision procedure is
    /// fully resynchronized before the next query.
    pub fn set_current_state(&mut self, state: State) {
        self.current = Some(state);
        self.needs_full_sync = true;
    }

    pub fn discard_current_state(&mut self) -> Option<State> {
        self.current.take()
    }

    /// Drains the successors beyond the first one of the last fork.
    pub fn take_pending(&mut self) -> Vec<State> {
        self.pending.drain(..).collect()
    }

    pub fn close_decision_procedure(&mut self) -> Result<(), crate::dec::DecisionError> {
        self.dec.close()
    }

    pub fn step(&mut self) -> Result<StepOutcome, ExecError> {
        let mut state = match self.current.take() {
            Some(s) => s,
            None => return Err(ExecError::Unexpected("no current state".to_owned())),
        };
        if state.is_stuck() {
            self.current = Some(state);
            return Ok(StepOutcome::Stuck);
        }

        if let Err(e) = self.sync_assumptions(&state) {
            self.current = Some(state);
            return Err(e.into());
        }

        let op = match state.instruction(0) {
            Ok(op) => op,
            Err(_) => {
                state.create_throwable_and_throw(&self.hier, algo::VERIFY_ERROR);
                self.current = Some(state);
                return Ok(StepOutcome::Stepped);
            }
        };
        state.bump_sequence_number();
        trace!(
            "[{}:{}] pc {:?} op 0x{:02x}",
            state.identifier(),
            state.sequence_number(),
            state.pc().ok(),
            op
        );

        let mut ctx = ExecutionContext {
            calc: &self.calc,
            hier: &self.hier,
            rules: &self.rules,
            heap_scope: &self.heap_scope,
            dec: self.dec.as_mut(),
        };
        match algo::execute(op, &mut state, &mut ctx) {
            Ok(successors) if successors.is_empty() => {
                if op != opcodes::WIDE {
                    // Drop a stray wide flag left by a malformed prefix.
                    state.take_wide();
                }
                self.current = Some(state);
                Ok(StepOutcome::Stepped)
            }
            Ok(mut successors) => {
                let n = successors.len();
                let first = successors.remove(0);
                // The first successor extends the parent's path condition,
                // so the incremental sync stays valid.
                self.current = Some(first);
                self.pending.extend(successors);
                Ok(StepOutcome::Forked(n))
            }
            Err(ExecError::Contradiction) => {
                self.current = Some(state);
                Ok(StepOutcome::Contradiction)
            }
            Err(ExecError::CannotInvokeNative(name)) => {
                trace!("cannot invoke native method {}", name);
                state.set_stuck(Stuck::Unsupported(op));
                self.current = Some(state);
                Ok(StepOutcome::Stepped)
            }
            Err(e) => {
                // Preserve the offending state for post-mortem inspection.
                self.current = Some(state);
                Err(e)
            }
        }
    }

    fn sync_assumptions(&mut self, state: &State) -> Result<(), crate::dec::DecisionError> {
        let clauses = state.path_condition().clauses();
        if self.needs_full_sync || clauses.len() < self.synced_clauses {
            self.dec.go_fast_and_imprecise();
            let result = self.dec.set_assumptions(clauses);
            self.dec.stop_fast_and_imprecise();
            result?;
            self.needs_full_sync = false;
        } else {
            for clause in &clauses[self.synced_clauses..] {
                self.dec.push_assumption(clause)?;
            }
        }
        self.synced_clauses = clauses.len();
        Ok(())
    }
}
