use crate::algo::{
    advance, ensure_klass, opcodes::*, read_u16, resolve_reference, throw_verify_error,
    AfterResolution, ExecError, ExecutionContext, Outcome, ILLEGAL_ACCESS_ERROR,
    INCOMPATIBLE_CLASS_CHANGE_ERROR, NO_CLASS_DEFINITION_FOUND_ERROR, NO_SUCH_METHOD_ERROR,
    NULL_POINTER_EXCEPTION,
};
use crate::bc::{HierError, MethodInfo};
use crate::mem::frame::Frame;
use crate::mem::state::{RefState, State, Stuck};
use crate::types::{parse_method_descriptor, PrimitiveType, Signature, TypeDesc};
use crate::value::{Primitive, Reference, Value};

/// Invocation, return and throw bytecodes: schema (c) plus the frame
/// machinery of the thread stack.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => invoke(op, state, ctx),
        IRETURN..=ARETURN => value_return(op, state, ctx),
        RETURN => do_return(state, ctx, None),
        ATHROW => athrow(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn invoke(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let len = if op == INVOKEINTERFACE { 5 } else { 3 };
    let index = match read_u16(state, 1) {
        Ok(i) => i,
        Err(_) => return throw_verify_error(state, ctx),
    };
    let current_class = state.current_method()?.class_name.clone();
    let cf = ctx.hier.class_file(&current_class)?;
    let (sig, is_iface_ref) = match cf.method_signature(index) {
        Ok((sig, flag)) => (sig.clone(), flag),
        Err(_) => return throw_verify_error(state, ctx),
    };
    if is_iface_ref != (op == INVOKEINTERFACE) {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(vec![]);
    }

    let resolved = match ctx.hier.resolve_method(&current_class, &sig, is_iface_ref) {
        Ok(r) => r,
        Err(HierError::ClassFileNotFound(_)) => {
            state.create_throwable_and_throw(ctx.hier, NO_CLASS_DEFINITION_FOUND_ERROR);
            return Ok(vec![]);
        }
        Err(HierError::MethodNotFound(_)) => {
            state.create_throwable_and_throw(ctx.hier, NO_SUCH_METHOD_ERROR);
            return Ok(vec![]);
        }
        Err(HierError::MethodNotAccessible { .. }) => {
            state.create_throwable_and_throw(ctx.hier, ILLEGAL_ACCESS_ERROR);
            return Ok(vec![]);
        }
        Err(e) => return Err(e.into()),
    };

    let (params, ret) = match parse_method_descriptor(&resolved.descriptor) {
        Some(x) => x,
        None => return throw_verify_error(state, ctx),
    };
    let has_receiver = op != INVOKESTATIC;

    // Locate and null-check the receiver under the arguments.
    if has_receiver {
        let receiver = match state.top_n(params.len())? {
            Value::Reference(r) => r.clone(),
            _ => return throw_verify_error(state, ctx),
        };
        match state.ref_state(&receiver) {
            RefState::Unresolved(sym) => {
                return resolve_reference(state, ctx, &sym, AfterResolution::Reexecute);
            }
            RefState::Null => {
                state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
                return Ok(vec![]);
            }
            RefState::Object(_) => {}
        }
    }

    // Select the target: static binding for static/special calls, the
    // receiver's runtime class otherwise.
    let target_sig = if matches!(op, INVOKESTATIC | INVOKESPECIAL) {
        resolved.clone()
    } else {
        let receiver = match state.top_n(params.len())? {
            Value::Reference(r) => r.clone(),
            _ => return throw_verify_error(state, ctx),
        };
        let pos = match state.ref_state(&receiver) {
            RefState::Object(pos) => pos,
            _ => unreachable!("receiver was checked"),
        };
        let runtime_class = state
            .heap()
            .get(pos)
            .map(|o| o.class_name().to_owned())
            .ok_or_else(|| ExecError::Unexpected(format!("lost receiver @{}", pos)))?;
        if runtime_class.starts_with('[') {
            // Methods on array objects are not modeled.
            state.set_stuck(Stuck::Unsupported(op));
            return Ok(vec![]);
        }
        match ctx.hier.lookup_method_impl(&runtime_class, &resolved) {
            Ok(t) => t,
            Err(HierError::MethodNotFound(_)) => {
                state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        }
    };

    let target_cf = ctx.hier.class_file(&target_sig.class_name)?;
    let method: MethodInfo = target_cf
        .find_method(&target_sig)
        .cloned()
        .ok_or_else(|| ExecError::Unexpected(format!("lost method {}", target_sig)))?;
    if method.is_abstract {
        state.create_throwable_and_throw(ctx.hier, INCOMPATIBLE_CLASS_CHANGE_ERROR);
        return Ok(vec![]);
    }

    if op == INVOKESTATIC {
        let must_exit = ensure_klass(state, ctx, &target_sig.class_name)?;
        if must_exit {
            return Ok(vec![]);
        }
    }

    if method.is_native {
        return native_invoke_pure(state, ctx, &target_sig, &params, &ret, has_receiver, len);
    }

    let code = method
        .code
        .clone()
        .ok_or_else(|| ExecError::Unexpected(format!("method {} has no code", target_sig)))?;

    // Pop the arguments (receiver first in locals) and build the frame.
    let argc = params.len() + has_receiver as usize;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(state.pop()?);
    }
    args.reverse();

    let return_pc = state.pc()? + len;
    let mut frame = Frame::new(target_sig.clone(), code, return_pc);
    let mut slot = 0;
    for value in args {
        let cat2 = value.is_category2();
        if !frame.set_local(slot, value) {
            return Err(ExecError::Unexpected(format!(
                "argument does not fit the locals of {}",
                target_sig
            )));
        }
        slot += if cat2 { 2 } else { 1 };
    }
    state.push_frame(frame);
    Ok(vec![])
}

/// The pure-native model: a native call has no side effects beyond its
/// return value. A primitive-typed result over primitive arguments
/// becomes an uninterpreted function application; a reference result is
/// null; anything else cannot be modeled.
fn native_invoke_pure(
    state: &mut State,
    ctx: &mut ExecutionContext,
    sig: &Signature,
    params: &[TypeDesc],
    ret: &Option<TypeDesc>,
    has_receiver: bool,
    len: usize,
) -> Outcome {
    let argc = params.len() + has_receiver as usize;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        args.push(state.pop()?);
    }
    args.reverse();

    let return_value = match ret {
        None => None,
        Some(TypeDesc::Primitive(p)) => {
            let mut prims: Vec<Primitive> = Vec::with_capacity(args.len());
            for a in &args {
                match a {
                    Value::Primitive(p) => prims.push(p.clone()),
                    _ => return Err(ExecError::CannotInvokeNative(sig.to_string())),
                }
            }
            Some(Value::Primitive(ctx.calc.apply_function(*p, &sig.name, &prims)?))
        }
        Some(_) => Some(Value::Reference(Reference::Null)),
    };

    if let Some(v) = return_value {
        state.push(v)?;
    }
    advance(state, ctx, len)?;
    Ok(vec![])
}

fn value_return(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let value = state.pop()?;
    let matches_family = match op {
        IRETURN => matches!(&value, Value::Primitive(p) if p.ty() == PrimitiveType::Int),
        LRETURN => matches!(&value, Value::Primitive(p) if p.ty() == PrimitiveType::Long),
        FRETURN => matches!(&value, Value::Primitive(p) if p.ty() == PrimitiveType::Float),
        DRETURN => matches!(&value, Value::Primitive(p) if p.ty() == PrimitiveType::Double),
        ARETURN => matches!(&value, Value::Reference(_)),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    };
    if !matches_family {
        return throw_verify_error(state, ctx);
    }
    do_return(state, ctx, Some(value))
}

fn do_return(state: &mut State, ctx: &mut ExecutionContext, value: Option<Value>) -> Outcome {
    let finished = match state.pop_frame() {
        Some(f) => f,
        None => {
            state.set_stuck(Stuck::Return(value));
            return Ok(vec![]);
        }
    };
    if state.frames().is_empty() {
        state.set_stuck(Stuck::Return(value));
        return Ok(vec![]);
    }
    if let Some(v) = value {
        state.push(v)?;
    }
    if state.jump_pc(finished.return_pc()).is_err() {
        state.create_throwable_and_throw(ctx.hier, crate::algo::VERIFY_ERROR);
    }
    Ok(vec![])
}

fn athrow(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let r = match state.top()? {
        Value::Reference(r) => r.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    match state.ref_state(&r) {
        RefState::Unresolved(sym) => {
            resolve_reference(state, ctx, &sym, AfterResolution::Reexecute)
        }
        RefState::Null => {
            state.create_throwable_and_throw(ctx.hier, NULL_POINTER_EXCEPTION);
            Ok(vec![])
        }
        RefState::Object(_) => {
            state.pop()?;
            state.throw_reference(ctx.hier, r);
            Ok(vec![])
        }
    }
}
