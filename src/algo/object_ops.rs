use crate::algo::{
    advance, ensure_klass, opcodes::*, read_u16, resolve_reference, throw_verify_error,
    AfterResolution, ExecutionContext, Outcome, CLASS_CAST_EXCEPTION,
    INCOMPATIBLE_CLASS_CHANGE_ERROR, NO_CLASS_DEFINITION_FOUND_ERROR, NULL_POINTER_EXCEPTION,
};
use crate::mem::state::{RefState, State};
use crate::value::{Reference, Value};

/// Object creation and type-test bytecodes; the monitors are no-ops after
/// the null check under the single-threaded model.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        NEW => new(state, ctx),
        CHECKCAST | INSTANCEOF => type_test(op, state, ctx),
        MONITORENTER | MONITOREXIT => monitor(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn class_operand(
    state: &mut State,
    ctx: &mut ExecutionContext,
) -> Result<Option<String>, crate::algo::ExecError> {
    let index = match read_u16(state, 1) {
        Ok(i) => i,
        Err(_) => {
            state.create_throwable_and_throw(ctx.hier, crate::algo::VERIFY_ERROR);
            return Ok(None);
        }
    };
    let current_class = state.current_method()?.class_name.clone();
    let cf = ctx.hier.class_file(&current_class)?;
    match cf.class_ref(index) {
        Ok(name) => Ok(Some(name.to_owned())),
        Err(_) => {
            state.create_throwable_and_throw(ctx.hier, crate::algo::VERIFY_ERROR);
            Ok(None)
        }
    }
}

fn new(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let class_name = match class_operand(state, ctx)? {
        Some(n) => n,
        None => return Ok(vec![]),
    };
    let cf = match ctx.hier.class_file(&class_name) {
        Ok(cf) => cf,
        Err(_) => {
            state.create_throwable_and_throw(ctx.hier, NO_CLASS_DEFINITION_FOUND_ERROR);
            return Ok(vec![]);
        }
    };
    if cf.is_interface || cf.is_abstract {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(vec![]);
    }

    let must_exit = ensure_klass(state, ctx, &class_name)?;
    if must_exit {
        return Ok(vec![]);
    }

    let pos = state.allocate_instance(ctx.hier, &class_name);
    state.push(Value::Reference(Reference::Concrete(pos)))?;
    advance(state, ctx, 3)?;
    Ok(vec![])
}

fn type_test(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let target = match class_operand(state, ctx)? {
        Some(n) => n,
        None => return Ok(vec![]),
    };
    let r = match state.top()? {
        Value::Reference(r) => r.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    match state.ref_state(&r) {
        RefState::Unresolved(sym) => {
            return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
        }
        RefState::Null => {
            // A null passes every cast and is an instance of nothing.
            if op == INSTANCEOF {
                state.pop()?;
                state.push(Value::Primitive(ctx.calc.val_int(0)))?;
            }
            advance(state, ctx, 3)?;
        }
        RefState::Object(pos) => {
            let runtime_class = state
                .heap()
                .get(pos)
                .map(|o| o.class_name().to_owned())
                .ok_or_else(|| {
                    crate::algo::ExecError::Unexpected(format!("lost object @{}", pos))
                })?;
            let assignable = ctx.hier.is_assignable(&runtime_class, &target);
            if op == CHECKCAST {
                if !assignable {
                    state.create_throwable_and_throw(ctx.hier, CLASS_CAST_EXCEPTION);
                    return Ok(vec![]);
                }
            } else {
                state.pop()?;
                state.push(Value::Primitive(ctx.calc.val_int(assignable as i32)))?;
            }
            advance(state, ctx, 3)?;
        }
    }
    Ok(vec![])
}

fn monitor(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
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
        }
        RefState::Object(_) => {
            state.pop()?;
            advance(state, ctx, 1)?;
        }
    }
    Ok(vec![])
}
