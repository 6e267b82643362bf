use crate::algo::{
    advance, cp_value, ensure_klass, load_value, narrow_for_store, opcodes::*, read_u16,
    resolve_reference, throw_verify_error, widen_small_value, AfterResolution, ExecError,
    ExecutionContext, Outcome, ILLEGAL_ACCESS_ERROR, INCOMPATIBLE_CLASS_CHANGE_ERROR,
    NO_CLASS_DEFINITION_FOUND_ERROR, NO_SUCH_FIELD_ERROR, NULL_POINTER_EXCEPTION,
};
use crate::bc::HierError;
use crate::mem::objekt::Objekt;
use crate::mem::state::{RefState, State};
use crate::types::Signature;
use crate::value::Value;

/// Field access bytecodes: schema (c). Resolution failures raise modeled
/// errors; reads of unresolved symbolic references fork on resolution.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        GETSTATIC => getstatic(state, ctx),
        PUTSTATIC => putstatic(state, ctx),
        GETFIELD => getfield(state, ctx),
        PUTFIELD => putfield(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

enum Resolved {
    Ok(Signature),
    Thrown,
}

/// Reads the field signature at the instruction's constant pool index and
/// resolves it, raising the appropriate modeled error on failure.
fn resolve_field_operand(
    state: &mut State,
    ctx: &mut ExecutionContext,
) -> Result<Resolved, ExecError> {
    let index = match read_u16(state, 1) {
        Ok(i) => i,
        Err(_) => {
            state.create_throwable_and_throw(ctx.hier, crate::algo::VERIFY_ERROR);
            return Ok(Resolved::Thrown);
        }
    };
    let current_class = state.current_method()?.class_name.clone();
    let cf = ctx.hier.class_file(&current_class)?;
    let field_sig = match cf.field_signature(index) {
        Ok(sig) => sig.clone(),
        Err(_) => {
            state.create_throwable_and_throw(ctx.hier, crate::algo::VERIFY_ERROR);
            return Ok(Resolved::Thrown);
        }
    };
    match ctx.hier.resolve_field(&current_class, &field_sig) {
        Ok(resolved) => Ok(Resolved::Ok(resolved)),
        Err(HierError::ClassFileNotFound(_)) => {
            state.create_throwable_and_throw(ctx.hier, NO_CLASS_DEFINITION_FOUND_ERROR);
            Ok(Resolved::Thrown)
        }
        Err(HierError::FieldNotFound(_)) => {
            state.create_throwable_and_throw(ctx.hier, NO_SUCH_FIELD_ERROR);
            Ok(Resolved::Thrown)
        }
        Err(HierError::FieldNotAccessible { .. }) => {
            state.create_throwable_and_throw(ctx.hier, ILLEGAL_ACCESS_ERROR);
            Ok(Resolved::Thrown)
        }
        Err(e) => Err(e.into()),
    }
}

/// Checks the static-or-interface requirement of the static access
/// bytecodes; `false` means the modeled error was thrown.
fn check_static(
    state: &mut State,
    ctx: &mut ExecutionContext,
    resolved: &Signature,
) -> Result<bool, ExecError> {
    let field_cf = ctx.hier.class_file(&resolved.class_name)?;
    let is_static = field_cf.is_field_static(resolved)?;
    if !field_cf.is_interface && !is_static {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(false);
    }
    Ok(true)
}

fn getstatic(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let resolved = match resolve_field_operand(state, ctx)? {
        Resolved::Ok(sig) => sig,
        Resolved::Thrown => return Ok(vec![]),
    };
    if !check_static(state, ctx, &resolved)? {
        return Ok(vec![]);
    }

    let field_cf = ctx.hier.class_file(&resolved.class_name)?;
    let is_constant = field_cf.is_field_constant(&resolved)?;

    let value = if is_constant {
        // Compile-time constants read straight from the constant pool,
        // without forcing class initialization.
        let entry = field_cf.field_constant_value(&resolved)?.clone();
        match cp_value(state, ctx, &entry) {
            Some(v) => v,
            None => return throw_verify_error(state, ctx),
        }
    } else {
        let must_exit = ensure_klass(state, ctx, &resolved.class_name)?;
        if must_exit {
            // Execution continues in the initializer; this bytecode
            // re-executes once it returns.
            return Ok(vec![]);
        }
        state
            .klass(&resolved.class_name)
            .and_then(|k| k.field_value(&resolved))
            .cloned()
            .ok_or_else(|| {
                ExecError::Unexpected(format!("static area lost field {}", resolved))
            })?
    };

    let value = widen_small_value(ctx.calc, value)?;
    load_value(state, ctx, value, 3)
}

fn putstatic(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let resolved = match resolve_field_operand(state, ctx)? {
        Resolved::Ok(sig) => sig,
        Resolved::Thrown => return Ok(vec![]),
    };
    if !check_static(state, ctx, &resolved)? {
        return Ok(vec![]);
    }

    let must_exit = ensure_klass(state, ctx, &resolved.class_name)?;
    if must_exit {
        return Ok(vec![]);
    }

    let value = state.pop()?;
    let value = narrow_for_store(ctx.calc, &resolved.descriptor, value)?;
    let stored = state
        .klass_mut(&resolved.class_name)
        .map(|k| k.set_field(&resolved, value))
        .unwrap_or(false);
    if !stored {
        return Err(ExecError::Unexpected(format!(
            "static area lost field {}",
            resolved
        )));
    }
    advance(state, ctx, 3)?;
    Ok(vec![])
}

fn getfield(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let resolved = match resolve_field_operand(state, ctx)? {
        Resolved::Ok(sig) => sig,
        Resolved::Thrown => return Ok(vec![]),
    };
    if ctx.hier.class_file(&resolved.class_name)?.is_field_static(&resolved)? {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(vec![]);
    }

    let receiver = match state.top()? {
        Value::Reference(r) => r.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    let pos = match state.ref_state(&receiver) {
        RefState::Unresolved(sym) => {
            return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
        }
        RefState::Null => {
            state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
            return Ok(vec![]);
        }
        RefState::Object(pos) => pos,
    };

    let value = state
        .heap()
        .get(pos)
        .and_then(Objekt::as_instance)
        .and_then(|i| i.field_value(&resolved))
        .cloned()
        .ok_or_else(|| {
            ExecError::Unexpected(format!("object @{} lacks field {}", pos, resolved))
        })?;
    state.pop()?;
    let value = widen_small_value(ctx.calc, value)?;
    load_value(state, ctx, value, 3)
}

fn putfield(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let resolved = match resolve_field_operand(state, ctx)? {
        Resolved::Ok(sig) => sig,
        Resolved::Thrown => return Ok(vec![]),
    };
    if ctx.hier.class_file(&resolved.class_name)?.is_field_static(&resolved)? {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(vec![]);
    }

    // Stack, top first: value, objectref.
    let receiver = match state.top_n(1)? {
        Value::Reference(r) => r.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    let pos = match state.ref_state(&receiver) {
        RefState::Unresolved(sym) => {
            return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
        }
        RefState::Null => {
            state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
            return Ok(vec![]);
        }
        RefState::Object(pos) => pos,
    };

    let value = state.pop()?;
    state.pop()?; // objectref
    let value = narrow_for_store(ctx.calc, &resolved.descriptor, value)?;
    let stored = state
        .heap_mut()
        .get_mut(pos)
        .and_then(Objekt::as_instance_mut)
        .map(|i| i.set_field(&resolved, value))
        .unwrap_or(false);
    if !stored {
        return Err(ExecError::Unexpected(format!(
            "object @{} lacks field {}",
            pos, resolved
        )));
    }
    advance(state, ctx, 3)?;
    Ok(vec![])
}
