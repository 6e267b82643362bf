use crate::algo::{
    advance, fork, opcodes::*, read_u16, read_u8, resolve_reference, throw_verify_error,
    AfterResolution, ExecutionContext, Outcome, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
    NEGATIVE_ARRAY_SIZE_EXCEPTION, NULL_POINTER_EXCEPTION, VERIFY_ERROR,
};
use crate::bc::ClassHierarchy;
use crate::calc::Calculator;
use crate::mem::objekt::{Array, Objekt};
use crate::mem::path::Clause;
use crate::mem::state::{RefState, State};
use crate::tree::{ArrayAccessAlternative, DecisionAlternative};
use crate::types::{parse_type, PrimitiveType};
use crate::value::{default_value, HeapPos, Reference, Value};

/// Array bytecodes. Accesses with a symbolic index fork on the bounds
/// decision; the out-of-bounds successor throws the modeled exception.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        IALOAD..=SALOAD => access(op, state, ctx, false),
        IASTORE..=SASTORE => access(op, state, ctx, true),
        ARRAYLENGTH => arraylength(state, ctx),
        NEWARRAY => newarray(state, ctx),
        ANEWARRAY => anewarray(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

/// Member descriptors an access family accepts; `None` means any
/// reference member.
fn family_members(op: u8) -> Option<&'static [&'static str]> {
    match op {
        IALOAD | IASTORE => Some(&["I"]),
        LALOAD | LASTORE => Some(&["J"]),
        FALOAD | FASTORE => Some(&["F"]),
        DALOAD | DASTORE => Some(&["D"]),
        BALOAD | BASTORE => Some(&["B", "Z"]),
        CALOAD | CASTORE => Some(&["C"]),
        SALOAD | SASTORE => Some(&["S"]),
        AALOAD | AASTORE => None,
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn access(op: u8, state: &mut State, ctx: &mut ExecutionContext, is_store: bool) -> Outcome {
    // Operand layout, top first: store = [value, index, arrayref],
    // load = [index, arrayref].
    let ref_depth = if is_store { 2 } else { 1 };
    let index_depth = ref_depth - 1;

    let array_pos = {
        let r = match state.top_n(ref_depth)? {
            Value::Reference(r) => r.clone(),
            _ => return throw_verify_error(state, ctx),
        };
        match state.ref_state(&r) {
            RefState::Unresolved(sym) => {
                return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
            }
            RefState::Null => {
                state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
                return Ok(vec![]);
            }
            RefState::Object(pos) => pos,
        }
    };

    let index = match state.top_n(index_depth)? {
        Value::Primitive(p) if p.ty() == PrimitiveType::Int => p.clone(),
        _ => return throw_verify_error(state, ctx),
    };

    let (length, member) = match state.heap().get(array_pos).and_then(Objekt::as_array) {
        Some(arr) => (arr.length().clone(), arr.member_descriptor.clone()),
        None => return throw_verify_error(state, ctx),
    };
    match family_members(op) {
        Some(members) if !members.contains(&member.as_str()) => {
            return throw_verify_error(state, ctx);
        }
        None if !matches!(member.chars().next(), Some('L') | Some('[')) => {
            return throw_verify_error(state, ctx);
        }
        _ => {}
    }

    let in_bounds = {
        let lo = ctx.calc.le(&ctx.calc.val_int(0), &index)?;
        let hi = ctx.calc.lt(&index, &length)?;
        ctx.calc.and(&lo, &hi)?
    };

    if let Some(lit) = in_bounds.as_simplex() {
        // Concrete bounds: no fork.
        if lit.is_zero() {
            state.create_throwable_and_throw(ctx.hier, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION);
            return Ok(vec![]);
        }
        if is_store {
            do_array_store(state, ctx.hier, ctx.calc, array_pos, &member)?;
        } else {
            do_array_load(state, ctx.hier, ctx.calc, array_pos)?;
        }
        return Ok(vec![]);
    }

    let out_of_bounds = ctx.calc.not(&in_bounds)?;
    let mut alts = Vec::new();
    if ctx.dec.is_sat(&in_bounds)? {
        alts.push(DecisionAlternative::new(ArrayAccessAlternative::In, 0));
    }
    if ctx.dec.is_sat(&out_of_bounds)? {
        alts.push(DecisionAlternative::new(ArrayAccessAlternative::Out, 1));
    }

    let hier = ctx.hier;
    let calc = ctx.calc;
    fork(state, alts, |child, alt| {
        match alt.kind {
            ArrayAccessAlternative::In => {
                child.push_clause(Clause::Assume(in_bounds.clone()));
                if is_store {
                    do_array_store(child, hier, calc, array_pos, &member)?;
                } else {
                    do_array_load(child, hier, calc, array_pos)?;
                }
            }
            ArrayAccessAlternative::Out => {
                child.push_clause(Clause::Assume(out_of_bounds.clone()));
                child.create_throwable_and_throw(hier, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION);
            }
        }
        Ok(())
    })
}

/// The in-bounds load effect: reads the element, materializing a fresh
/// symbolic member for unbacked slots of symbolic arrays so repeated loads
/// agree, and widens small integral members to int.
fn do_array_load(
    state: &mut State,
    hier: &ClassHierarchy,
    calc: &Calculator,
    pos: HeapPos,
) -> Result<(), crate::algo::ExecError> {
    let index = match state.pop()? {
        Value::Primitive(p) => p,
        _ => unreachable!("operand was checked"),
    };
    state.pop()?; // arrayref

    let (existing, member, backing, origin) = {
        let arr = state
            .heap()
            .get(pos)
            .and_then(Objekt::as_array)
            .ok_or_else(|| {
                crate::algo::ExecError::Unexpected(format!("lost array at @{}", pos))
            })?;
        (
            arr.entry(&index).cloned(),
            arr.member_descriptor.clone(),
            arr.has_concrete_backing(),
            arr.origin.clone(),
        )
    };

    let value = match existing {
        Some(v) => v,
        None if backing => parse_type(&member)
            .map(|t| default_value(&t))
            .unwrap_or(Value::Reference(Reference::Null)),
        None => {
            let base = origin.unwrap_or_else(|| "array".to_owned());
            let elem_origin = format!("{}[{}]", base, index);
            let fresh = state.fresh_value_for(&member, &elem_origin);
            if let Some(arr) = state.heap_mut().get_mut(pos).and_then(Objekt::as_array_mut) {
                arr.store(index.clone(), fresh.clone());
            }
            fresh
        }
    };

    let value = crate::algo::widen_small_value(calc, value)?;
    state.push(value)?;
    if state.inc_pc(1).is_err() {
        state.create_throwable_and_throw(hier, VERIFY_ERROR);
    }
    Ok(())
}

/// The in-bounds store effect: narrows small integral values back to the
/// member type and records the entry, shadowing older ones.
fn do_array_store(
    state: &mut State,
    hier: &ClassHierarchy,
    calc: &Calculator,
    pos: HeapPos,
    member: &str,
) -> Result<(), crate::algo::ExecError> {
    let value = state.pop()?;
    let index = match state.pop()? {
        Value::Primitive(p) => p,
        _ => unreachable!("operand was checked"),
    };
    state.pop()?; // arrayref

    let value = crate::algo::narrow_for_store(calc, member, value)?;

    if let Some(arr) = state.heap_mut().get_mut(pos).and_then(Objekt::as_array_mut) {
        arr.store(index, value);
    }
    if state.inc_pc(1).is_err() {
        state.create_throwable_and_throw(hier, VERIFY_ERROR);
    }
    Ok(())
}

fn arraylength(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let r = match state.top()? {
        Value::Reference(r) => r.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    match state.ref_state(&r) {
        RefState::Unresolved(sym) => {
            return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
        }
        RefState::Null => {
            state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
            return Ok(vec![]);
        }
        RefState::Object(pos) => {
            let length = match state.heap().get(pos).and_then(Objekt::as_array) {
                Some(arr) => arr.length().clone(),
                None => return throw_verify_error(state, ctx),
            };
            state.pop()?;
            state.push(Value::Primitive(length))?;
            advance(state, ctx, 1)?;
        }
    }
    Ok(vec![])
}

fn newarray(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let atype = match read_u8(state, 1) {
        Ok(t) => t,
        Err(_) => return throw_verify_error(state, ctx),
    };
    let member = match atype {
        4 => "Z",
        5 => "C",
        6 => "F",
        7 => "D",
        8 => "B",
        9 => "S",
        10 => "I",
        11 => "J",
        _ => return throw_verify_error(state, ctx),
    };
    allocate_array(state, ctx, member.to_owned(), 2)
}

fn anewarray(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let index = match read_u16(state, 1) {
        Ok(i) => i,
        Err(_) => return throw_verify_error(state, ctx),
    };
    let class_name = state.current_method()?.class_name.clone();
    let cf = ctx.hier.class_file(&class_name)?;
    let member_class = match cf.class_ref(index) {
        Ok(c) => c.to_owned(),
        Err(_) => return throw_verify_error(state, ctx),
    };
    let member = if member_class.starts_with('[') {
        member_class
    } else {
        format!("L{};", member_class)
    };
    allocate_array(state, ctx, member, 3)
}

/// Allocation decision on the requested length: a symbolic length forks
/// into the valid and the negative-size outcome.
fn allocate_array(
    state: &mut State,
    ctx: &mut ExecutionContext,
    member: String,
    len: usize,
) -> Outcome {
    let count = match state.top()? {
        Value::Primitive(p) if p.ty() == PrimitiveType::Int => p.clone(),
        _ => return throw_verify_error(state, ctx),
    };

    let nonneg = ctx.calc.le(&ctx.calc.val_int(0), &count)?;
    if let Some(lit) = nonneg.as_simplex() {
        if lit.is_zero() {
            state.create_throwable_and_throw(ctx.hier, NEGATIVE_ARRAY_SIZE_EXCEPTION);
            return Ok(vec![]);
        }
        state.pop()?;
        let pos = state
            .heap_mut()
            .alloc(Objekt::Array(Array::new_concrete(&member, count)));
        state.push(Value::Reference(Reference::Concrete(pos)))?;
        advance(state, ctx, len)?;
        return Ok(vec![]);
    }

    let negative = ctx.calc.not(&nonneg)?;
    let mut alts = Vec::new();
    if ctx.dec.is_sat(&nonneg)? {
        alts.push(DecisionAlternative::new(ArrayAccessAlternative::In, 0));
    }
    if ctx.dec.is_sat(&negative)? {
        alts.push(DecisionAlternative::new(ArrayAccessAlternative::Out, 1));
    }

    let hier = ctx.hier;
    fork(state, alts, |child, alt| {
        match alt.kind {
            ArrayAccessAlternative::In => {
                child.push_clause(Clause::Assume(nonneg.clone()));
                child.pop()?;
                let pos = child
                    .heap_mut()
                    .alloc(Objekt::Array(Array::new_concrete(&member, count.clone())));
                child.push(Value::Reference(Reference::Concrete(pos)))?;
                if child.inc_pc(len).is_err() {
                    child.create_throwable_and_throw(hier, VERIFY_ERROR);
                }
            }
            ArrayAccessAlternative::Out => {
                child.push_clause(Clause::Assume(negative.clone()));
                child.create_throwable_and_throw(hier, NEGATIVE_ARRAY_SIZE_EXCEPTION);
            }
        }
        Ok(())
    })
}
