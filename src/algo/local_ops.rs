use crate::algo::{
    advance, opcodes::*, read_i16, read_u16, read_u8, throw_verify_error, ExecutionContext,
    Outcome,
};
use crate::mem::state::State;
use crate::types::PrimitiveType;
use crate::value::Value;

/// Local-variable bytecodes, including the `wide` prefix itself: all
/// schema (a). The prefix sets the one-shot wide flag, which doubles the
/// operand width of the next load, store or increment.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        WIDE => {
            state.set_wide();
            advance(state, ctx, 1)?;
            Ok(vec![])
        }
        ILOAD..=ALOAD => {
            let family = op - ILOAD;
            let wide = state.take_wide();
            let (index, len) = match operand_index(state, wide) {
                Ok(x) => x,
                Err(_) => return throw_verify_error(state, ctx),
            };
            load(state, ctx, family, index, len)
        }
        ILOAD_0..=ALOAD_3 => {
            let n = op - ILOAD_0;
            load(state, ctx, n / 4, (n % 4) as usize, 1)
        }
        ISTORE..=ASTORE => {
            let family = op - ISTORE;
            let wide = state.take_wide();
            let (index, len) = match operand_index(state, wide) {
                Ok(x) => x,
                Err(_) => return throw_verify_error(state, ctx),
            };
            store(state, ctx, family, index, len)
        }
        ISTORE_0..=ASTORE_3 => {
            let n = op - ISTORE_0;
            store(state, ctx, n / 4, (n % 4) as usize, 1)
        }
        IINC => iinc(state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn operand_index(state: &State, wide: bool) -> Result<(usize, usize), crate::mem::state::StateError> {
    if wide {
        Ok((read_u16(state, 1)? as usize, 3))
    } else {
        Ok((read_u8(state, 1)? as usize, 2))
    }
}

fn family_matches(family: u8, value: &Value) -> bool {
    match family {
        0 => matches!(value, Value::Primitive(p) if p.ty() == PrimitiveType::Int),
        1 => matches!(value, Value::Primitive(p) if p.ty() == PrimitiveType::Long),
        2 => matches!(value, Value::Primitive(p) if p.ty() == PrimitiveType::Float),
        3 => matches!(value, Value::Primitive(p) if p.ty() == PrimitiveType::Double),
        4 => matches!(value, Value::Reference(_)),
        _ => false,
    }
}

fn load(
    state: &mut State,
    ctx: &mut ExecutionContext,
    family: u8,
    index: usize,
    len: usize,
) -> Outcome {
    let value = match state.current_frame()?.local(index) {
        Some(v) => v.clone(),
        None => return throw_verify_error(state, ctx),
    };
    if !family_matches(family, &value) {
        return throw_verify_error(state, ctx);
    }
    state.push(value)?;
    advance(state, ctx, len)?;
    Ok(vec![])
}

fn store(
    state: &mut State,
    ctx: &mut ExecutionContext,
    family: u8,
    index: usize,
    len: usize,
) -> Outcome {
    let value = state.pop()?;
    if !family_matches(family, &value) {
        return throw_verify_error(state, ctx);
    }
    if !state.current_frame_mut()?.set_local(index, value) {
        return throw_verify_error(state, ctx);
    }
    advance(state, ctx, len)?;
    Ok(vec![])
}

fn iinc(state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let wide = state.take_wide();
    let read = || -> Result<(usize, i32, usize), crate::mem::state::StateError> {
        if wide {
            Ok((read_u16(state, 1)? as usize, read_i16(state, 3)? as i32, 5))
        } else {
            Ok((
                read_u8(state, 1)? as usize,
                (read_u8(state, 2)? as i8) as i32,
                3,
            ))
        }
    };
    let (index, konst, len) = match read() {
        Ok(x) => x,
        Err(_) => return throw_verify_error(state, ctx),
    };
    let value = match state.current_frame()?.local(index) {
        Some(Value::Primitive(p)) if p.ty() == PrimitiveType::Int => p.clone(),
        _ => return throw_verify_error(state, ctx),
    };
    let incremented = ctx.calc.add(&value, &ctx.calc.val_int(konst))?;
    if !state
        .current_frame_mut()?
        .set_local(index, Value::Primitive(incremented))
    {
        return throw_verify_error(state, ctx);
    }
    advance(state, ctx, len)?;
    Ok(vec![])
}
