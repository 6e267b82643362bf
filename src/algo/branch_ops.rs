use crate::algo::{
    advance, fork, jump, opcodes::*, read_i16, read_i32, resolve_reference, throw_verify_error,
    AfterResolution, ExecutionContext, Outcome,
};
use crate::mem::path::Clause;
use crate::mem::state::{RefState, State};
use crate::tree::{BranchAlternative, DecisionAlternative, SwitchAlternative};
use crate::types::PrimitiveType;
use crate::value::{Operator, Primitive, Value};

/// Branch bytecodes. A concrete condition takes its branch directly
/// (schema b); a symbolic one forks one successor per feasible outcome
/// with the disambiguating clause on each path condition (schema d).
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        IFEQ..=IFLE => {
            let target = match branch_target(state) {
                Ok(t) => t,
                Err(_) => return throw_verify_error(state, ctx),
            };
            let operator = condition_operator(op - IFEQ);
            let v = match pop_int(state) {
                Some(v) => v,
                None => return throw_verify_error(state, ctx),
            };
            let cond = ctx.calc.apply_binary(&v, operator, &ctx.calc.val_int(0))?;
            branch_on(state, ctx, cond, target, 3)
        }
        IF_ICMPEQ..=IF_ICMPLE => {
            let target = match branch_target(state) {
                Ok(t) => t,
                Err(_) => return throw_verify_error(state, ctx),
            };
            let operator = condition_operator(op - IF_ICMPEQ);
            let b = match pop_int(state) {
                Some(b) => b,
                None => return throw_verify_error(state, ctx),
            };
            let a = match pop_int(state) {
                Some(a) => a,
                None => return throw_verify_error(state, ctx),
            };
            let cond = ctx.calc.apply_binary(&a, operator, &b)?;
            branch_on(state, ctx, cond, target, 3)
        }
        IF_ACMPEQ | IF_ACMPNE => {
            let target = match branch_target(state) {
                Ok(t) => t,
                Err(_) => return throw_verify_error(state, ctx),
            };
            // Resolve either operand first, re-executing this bytecode.
            for n in 0..2 {
                if let Value::Reference(r) = state.top_n(n)? {
                    if let RefState::Unresolved(sym) = state.ref_state(r) {
                        return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
                    }
                }
            }
            let b = match pop_ref_state(state) {
                Some(r) => r,
                None => return throw_verify_error(state, ctx),
            };
            let a = match pop_ref_state(state) {
                Some(r) => r,
                None => return throw_verify_error(state, ctx),
            };
            let same = match (a, b) {
                (RefState::Null, RefState::Null) => true,
                (RefState::Object(x), RefState::Object(y)) => x == y,
                _ => false,
            };
            let taken = if op == IF_ACMPEQ { same } else { !same };
            take_or_fall(state, ctx, taken, target, 3)
        }
        IFNULL | IFNONNULL => {
            let target = match branch_target(state) {
                Ok(t) => t,
                Err(_) => return throw_verify_error(state, ctx),
            };
            if let Value::Reference(r) = state.top()? {
                if let RefState::Unresolved(sym) = state.ref_state(r) {
                    return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
                }
            }
            let r = match pop_ref_state(state) {
                Some(r) => r,
                None => return throw_verify_error(state, ctx),
            };
            let is_null = matches!(r, RefState::Null);
            let taken = if op == IFNULL { is_null } else { !is_null };
            take_or_fall(state, ctx, taken, target, 3)
        }
        GOTO => {
            let target = match branch_target(state) {
                Ok(t) => t,
                Err(_) => return throw_verify_error(state, ctx),
            };
            jump(state, ctx, target)?;
            Ok(vec![])
        }
        GOTO_W => {
            let pc = state.pc()? as i64;
            let target = match read_i32(state, 1) {
                Ok(off) => pc + off as i64,
                Err(_) => return throw_verify_error(state, ctx),
            };
            jump(state, ctx, target)?;
            Ok(vec![])
        }
        TABLESWITCH => tableswitch(state, ctx),
        LOOKUPSWITCH => lookupswitch(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn condition_operator(selector: u8) -> Operator {
    [
        Operator::Eq,
        Operator::Ne,
        Operator::Lt,
        Operator::Ge,
        Operator::Gt,
        Operator::Le,
    ][selector as usize]
}

fn branch_target(state: &State) -> Result<i64, crate::mem::state::StateError> {
    let pc = state.pc()? as i64;
    Ok(pc + read_i16(state, 1)? as i64)
}

fn pop_int(state: &mut State) -> Option<Primitive> {
    match state.top().ok()? {
        Value::Primitive(p) if p.ty() == PrimitiveType::Int => {}
        _ => return None,
    }
    match state.pop().ok()? {
        Value::Primitive(p) => Some(p),
        _ => None,
    }
}

fn pop_ref_state(state: &mut State) -> Option<RefState> {
    match state.top().ok()? {
        Value::Reference(_) => {}
        _ => return None,
    }
    match state.pop().ok()? {
        Value::Reference(r) => Some(state.ref_state(&r)),
        _ => None,
    }
}

/// Concrete outcome: take the branch or fall through, no fork.
fn take_or_fall(
    state: &mut State,
    ctx: &mut ExecutionContext,
    taken: bool,
    target: i64,
    len: usize,
) -> Outcome {
    if taken {
        jump(state, ctx, target)?;
    } else {
        advance(state, ctx, len)?;
    }
    Ok(vec![])
}

/// The binary branch decision: concrete conditions branch in place, and
/// symbolic ones fork into the feasible subset of `{TAKEN, NOT_TAKEN}`.
fn branch_on(
    state: &mut State,
    ctx: &mut ExecutionContext,
    cond: Primitive,
    target: i64,
    len: usize,
) -> Outcome {
    if let Some(lit) = cond.as_simplex() {
        return take_or_fall(state, ctx, !lit.is_zero(), target, len);
    }

    let not_cond = ctx.calc.not(&cond)?;
    let mut alts = Vec::new();
    if ctx.dec.is_sat(&cond)? {
        alts.push(DecisionAlternative::new(BranchAlternative::Taken, 0));
    }
    if ctx.dec.is_sat(&not_cond)? {
        alts.push(DecisionAlternative::new(BranchAlternative::NotTaken, 1));
    }

    let hier = ctx.hier;
    fork(state, alts, |child, alt| {
        match alt.kind {
            BranchAlternative::Taken => {
                child.push_clause(Clause::Assume(cond.clone()));
                if target < 0 || child.jump_pc(target as usize).is_err() {
                    child.create_throwable_and_throw(hier, crate::algo::VERIFY_ERROR);
                }
            }
            BranchAlternative::NotTaken => {
                child.push_clause(Clause::Assume(not_cond.clone()));
                if child.inc_pc(len).is_err() {
                    child.create_throwable_and_throw(hier, crate::algo::VERIFY_ERROR);
                }
            }
        }
        Ok(())
    })
}

/// Operand offset of the first switch operand: between zero and three
/// padding bytes align it to a four-byte boundary from the method start.
fn switch_base(pc: usize) -> usize {
    4 - pc % 4
}

fn tableswitch(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let pc = state.pc()?;
    let base = switch_base(pc);
    let decode = || -> Result<(i64, i32, i32, Vec<i64>), crate::mem::state::StateError> {
        let default = pc as i64 + read_i32(state, base)? as i64;
        let low = read_i32(state, base + 4)?;
        let high = read_i32(state, base + 8)?;
        let mut targets = Vec::new();
        for k in 0..(high as i64 - low as i64 + 1).max(0) {
            let off = read_i32(state, base + 12 + (k as usize) * 4)?;
            targets.push(pc as i64 + off as i64);
        }
        Ok((default, low, high, targets))
    };
    let (default, low, high, targets) = match decode() {
        Ok(x) => x,
        Err(_) => return throw_verify_error(state, ctx),
    };
    let cases: Vec<(i32, i64)> = (low..=high)
        .zip(targets.iter().copied())
        .collect::<Vec<_>>();
    switch_on(state, ctx, cases, default)
}

fn lookupswitch(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let pc = state.pc()?;
    let base = switch_base(pc);
    let decode = || -> Result<(i64, Vec<(i32, i64)>), crate::mem::state::StateError> {
        let default = pc as i64 + read_i32(state, base)? as i64;
        let npairs = read_i32(state, base + 4)?;
        let mut cases = Vec::new();
        for k in 0..npairs.max(0) {
            let at = base + 8 + (k as usize) * 8;
            let matched = read_i32(state, at)?;
            let off = read_i32(state, at + 4)?;
            cases.push((matched, pc as i64 + off as i64));
        }
        Ok((default, cases))
    };
    let (default, cases) = match decode() {
        Ok(x) => x,
        Err(_) => return throw_verify_error(state, ctx),
    };
    switch_on(state, ctx, cases, default)
}

/// The switch decision: a concrete selector jumps in place; a symbolic one
/// forks over the feasible cases in ascending order with the default last.
fn switch_on(
    state: &mut State,
    ctx: &mut ExecutionContext,
    cases: Vec<(i32, i64)>,
    default: i64,
) -> Outcome {
    let selector = match pop_int(state) {
        Some(v) => v,
        None => return throw_verify_error(state, ctx),
    };

    if let Some(lit) = selector.as_simplex() {
        let x = match lit {
            crate::value::Lit::Int(x) => x,
            _ => return throw_verify_error(state, ctx),
        };
        let target = cases
            .iter()
            .find(|(k, _)| *k == x)
            .map(|(_, t)| *t)
            .unwrap_or(default);
        jump(state, ctx, target)?;
        return Ok(vec![]);
    }

    // One alternative per feasible case, then the default under the
    // conjunction of all the inequalities.
    let mut alts: Vec<DecisionAlternative<(SwitchAlternative, Primitive)>> = Vec::new();
    let mut others = ctx.calc.val_boolean(true);
    for (i, (k, target)) in cases.iter().enumerate() {
        let eq = ctx
            .calc
            .eq(&selector, &ctx.calc.val_int(*k))?;
        let ne = ctx
            .calc
            .ne(&selector, &ctx.calc.val_int(*k))?;
        others = ctx.calc.and(&others, &ne)?;
        if ctx.dec.is_sat(&eq)? {
            alts.push(DecisionAlternative::new(
                (
                    SwitchAlternative::Case {
                        value: *k,
                        target: *target as usize,
                    },
                    eq,
                ),
                i,
            ));
        }
    }
    if ctx.dec.is_sat(&others)? {
        alts.push(DecisionAlternative::new(
            (
                SwitchAlternative::Default {
                    target: default as usize,
                },
                others,
            ),
            cases.len(),
        ));
    }

    let hier = ctx.hier;
    fork(state, alts, |child, alt| {
        let (kind, clause) = &alt.kind;
        child.push_clause(Clause::Assume(clause.clone()));
        let target = match kind {
            SwitchAlternative::Case { target, .. } => *target,
            SwitchAlternative::Default { target } => *target,
        };
        if child.jump_pc(target).is_err() {
            child.create_throwable_and_throw(hier, crate::algo::VERIFY_ERROR);
        }
        Ok(())
    })
}
