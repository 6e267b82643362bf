use log::trace;
use thiserror::Error;

use crate::mem::objekt::Objekt;
use crate::mem::path::Clause;
use crate::value::{HeapPos, Primitive, SymbolicRef};

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision procedure failure: {0}")]
    Failed(String),
    #[error("assumption contradicts the current assumptions: {0}")]
    Contradiction(String),
    #[error("decision procedure is closed")]
    Closed,
}

/// A decision procedure accumulates a satisfiable assumption as a list of
/// clauses and answers satisfiability queries under it. Implementations
/// form a chain of responsibility: a link decides what it can and hands the
/// rest to the next link.
pub trait DecisionProcedure {
    /// Possibly delays consistency checking of pushed clauses.
    fn go_fast_and_imprecise(&mut self) {}

    /// Restores full consistency checking; the mode after creation.
    fn stop_fast_and_imprecise(&mut self) {}

    fn push_assumption(&mut self, clause: &Clause) -> Result<(), DecisionError>;

    fn clear_assumptions(&mut self) -> Result<(), DecisionError>;

    fn set_assumptions(&mut self, clauses: &[Clause]) -> Result<(), DecisionError> {
        self.clear_assumptions()?;
        for c in clauses {
            self.push_assumption(c)?;
        }
        Ok(())
    }

    /// Satisfiability of a boolean primitive under the current assumptions.
    fn is_sat(&mut self, expr: &Primitive) -> Result<bool, DecisionError>;

    fn is_sat_null(&mut self, r: &SymbolicRef) -> Result<bool, DecisionError>;

    fn is_sat_aliases(
        &mut self,
        r: &SymbolicRef,
        pos: HeapPos,
        objekt: &Objekt,
    ) -> Result<bool, DecisionError>;

    fn is_sat_expands(&mut self, r: &SymbolicRef, class_name: &str) -> Result<bool, DecisionError>;

    fn is_sat_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError>;

    fn is_sat_not_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError>;

    /// An equivalent primitive under the current assumptions; the default
    /// is the identity.
    fn simplify(&self, p: Primitive) -> Primitive {
        p
    }

    /// Releases backend resources; further queries fail.
    fn close(&mut self) -> Result<(), DecisionError> {
        Ok(())
    }
}

/// The terminal link: every query is satisfiable unless it is refuted by
/// the clauses already on the assumption list or by constant evaluation.
/// Keeps resolution and initialization assumptions coherent, which is what
/// the engine needs for deterministic exploration without an SMT backend.
#[derive(Default)]
pub struct DecisionProcedureAlwSat {
    assumptions: Vec<Clause>,
    fast: bool,
    closed: bool,
}

impl DecisionProcedureAlwSat {
    pub fn new() -> DecisionProcedureAlwSat {
        DecisionProcedureAlwSat::default()
    }

    fn check_open(&self) -> Result<(), DecisionError> {
        if self.closed {
            Err(DecisionError::Closed)
        } else {
            Ok(())
        }
    }
}

impl DecisionProcedure for DecisionProcedureAlwSat {
    fn go_fast_and_imprecise(&mut self) {
        self.fast = true;
    }

    fn stop_fast_and_imprecise(&mut self) {
        self.fast = false;
    }

    fn push_assumption(&mut self, clause: &Clause) -> Result<(), DecisionError> {
        self.check_open()?;
        if !self.fast {
            if let Clause::Assume(p) = clause {
                if p.surely_false() {
                    return Err(DecisionError::Contradiction(p.to_string()));
                }
            }
        }
        self.assumptions.push(clause.clone());
        Ok(())
    }

    fn clear_assumptions(&mut self) -> Result<(), DecisionError> {
        self.check_open()?;
        self.assumptions.clear();
        Ok(())
    }

    fn is_sat(&mut self, expr: &Primitive) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(!expr.surely_false())
    }

    fn is_sat_null(&mut self, r: &SymbolicRef) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(self.assumptions.iter().all(|c| match c {
            Clause::AssumeAliases(s, _) | Clause::AssumeExpands(s, _) => s.id != r.id,
            _ => true,
        }))
    }

    fn is_sat_aliases(
        &mut self,
        r: &SymbolicRef,
        pos: HeapPos,
        _objekt: &Objekt,
    ) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(self.assumptions.iter().all(|c| match c {
            Clause::AssumeNull(s) | Clause::AssumeExpands(s, _) => s.id != r.id,
            Clause::AssumeAliases(s, p) => s.id != r.id || *p == pos,
            _ => true,
        }))
    }

    fn is_sat_expands(&mut self, r: &SymbolicRef, class_name: &str) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(self.assumptions.iter().all(|c| match c {
            Clause::AssumeNull(s) | Clause::AssumeAliases(s, _) => s.id != r.id,
            Clause::AssumeExpands(s, class) => s.id != r.id || class == class_name,
            _ => true,
        }))
    }

    fn is_sat_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(!self
            .assumptions
            .iter()
            .any(|c| matches!(c, Clause::AssumeClassNotInitialized(n) if n == class_name)))
    }

    fn is_sat_not_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        self.check_open()?;
        Ok(!self
            .assumptions
            .iter()
            .any(|c| matches!(c, Clause::AssumeClassInitialized(n) if n == class_name)))
    }

    fn close(&mut self) -> Result<(), DecisionError> {
        self.closed = true;
        Ok(())
    }
}

/// Chain link that traces every query and delegates to the next link.
pub struct DecisionProcedureTracing<D> {
    next: D,
}

impl<D: DecisionProcedure> DecisionProcedureTracing<D> {
    pub fn new(next: D) -> DecisionProcedureTracing<D> {
        DecisionProcedureTracing { next }
    }
}

impl<D: DecisionProcedure> DecisionProcedure for DecisionProcedureTracing<D> {
    fn go_fast_and_imprecise(&mut self) {
        self.next.go_fast_and_imprecise();
    }

    fn stop_fast_and_imprecise(&mut self) {
        self.next.stop_fast_and_imprecise();
    }

    fn push_assumption(&mut self, clause: &Clause) -> Result<(), DecisionError> {
        trace!("push assumption: {}", clause);
        self.next.push_assumption(clause)
    }

    fn clear_assumptions(&mut self) -> Result<(), DecisionError> {
        trace!("clear assumptions");
        self.next.clear_assumptions()
    }

    fn is_sat(&mut self, expr: &Primitive) -> Result<bool, DecisionError> {
        let r = self.next.is_sat(expr);
        trace!("isSat({}) = {:?}", expr, r);
        r
    }

    fn is_sat_null(&mut self, r: &SymbolicRef) -> Result<bool, DecisionError> {
        let res = self.next.is_sat_null(r);
        trace!("isSatNull({}) = {:?}", r.origin, res);
        res
    }

    fn is_sat_aliases(
        &mut self,
        r: &SymbolicRef,
        pos: HeapPos,
        objekt: &Objekt,
    ) -> Result<bool, DecisionError> {
        let res = self.next.is_sat_aliases(r, pos, objekt);
        trace!("isSatAliases({}, @{}) = {:?}", r.origin, pos, res);
        res
    }

    fn is_sat_expands(&mut self, r: &SymbolicRef, class_name: &str) -> Result<bool, DecisionError> {
        let res = self.next.is_sat_expands(r, class_name);
        trace!("isSatExpands({}, {}) = {:?}", r.origin, class_name, res);
        res
    }

    fn is_sat_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        let res = self.next.is_sat_initialized(class_name);
        trace!("isSatInitialized({}) = {:?}", class_name, res);
        res
    }

    fn is_sat_not_initialized(&mut self, class_name: &str) -> Result<bool, DecisionError> {
        let res = self.next.is_sat_not_initialized(class_name);
        trace!("isSatNotInitialized({}) = {:?}", class_name, res);
        res
    }

    fn simplify(&self, p: Primitive) -> Primitive {
        self.next.simplify(p)
    }

    fn close(&mut self) -> Result<(), DecisionError> {
        self.next.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Lit, Reference};
    use std::rc::Rc;

    fn sym(id: u64) -> Rc<SymbolicRef> {
        match Reference::symbolic(id, "ROOT.f", "a/A") {
            Reference::Symbolic(r) => r,
            _ => unreachable!(),
        }
    }

    #[test]
    fn constant_false_is_unsat() {
        let mut dp = DecisionProcedureAlwSat::new();
        assert!(!dp.is_sat(&Primitive::simplex(Lit::Boolean(false))).unwrap());
        assert!(dp.is_sat(&Primitive::simplex(Lit::Boolean(true))).unwrap());
        assert!(dp
            .is_sat(&Primitive::term(crate::types::PrimitiveType::Boolean, 0))
            .unwrap());
    }

    #[test]
    fn resolution_assumptions_stay_coherent() {
        let mut dp = DecisionProcedureAlwSat::new();
        let r = sym(7);
        dp.push_assumption(&Clause::AssumeExpands(r.clone(), "a/A".to_owned()))
            .unwrap();
        assert!(!dp.is_sat_null(&r).unwrap());
        assert!(dp.is_sat_expands(&r, "a/A").unwrap());
        assert!(!dp.is_sat_expands(&r, "a/B").unwrap());
        let other = sym(8);
        assert!(dp.is_sat_null(&other).unwrap());
    }

    #[test]
    fn initialization_assumptions_stay_coherent() {
        let mut dp = DecisionProcedureAlwSat::new();
        dp.push_assumption(&Clause::AssumeClassNotInitialized("k/K".to_owned()))
            .unwrap();
        assert!(!dp.is_sat_initialized("k/K").unwrap());
        assert!(dp.is_sat_not_initialized("k/K").unwrap());
        assert!(dp.is_sat_initialized("k/Other").unwrap());
    }

    #[test]
    fn contradictory_pushes_fail_unless_fast() {
        let mut dp = DecisionProcedureAlwSat::new();
        let falsum = Clause::Assume(Primitive::simplex(Lit::Boolean(false)));
        assert!(matches!(
            dp.push_assumption(&falsum),
            Err(DecisionError::Contradiction(_))
        ));
        dp.go_fast_and_imprecise();
        assert!(dp.push_assumption(&falsum).is_ok());
    }

    #[test]
    fn closed_procedures_reject_queries() {
        let mut dp = DecisionProcedureAlwSat::new();
        dp.close().unwrap();
        assert!(matches!(
            dp.is_sat(&Primitive::simplex(Lit::Boolean(true))),
            Err(DecisionError::Closed)
        ));
    }
}
