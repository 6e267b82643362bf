use crate::algo::{
    advance, cp_value, load_value, opcodes::*, read_i16, read_u16, read_u8, throw_verify_error,
    ExecutionContext, Outcome,
};
use crate::bc::ConstPoolEntry;
use crate::mem::state::{State, Stuck};
use crate::value::{Reference, Value};

/// Constant-pushing bytecodes: schema (a), except for string constants,
/// which go through the load machinery to be interned.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        ACONST_NULL => {
            state.push(Value::Reference(Reference::Null))?;
            advance(state, ctx, 1)?;
        }
        ICONST_M1..=ICONST_5 => {
            let v = op as i32 - ICONST_0 as i32;
            state.push(Value::Primitive(ctx.calc.val_int(v)))?;
            advance(state, ctx, 1)?;
        }
        LCONST_0 | LCONST_1 => {
            let v = (op - LCONST_0) as i64;
            state.push(Value::Primitive(ctx.calc.val_long(v)))?;
            advance(state, ctx, 1)?;
        }
        FCONST_0 | FCONST_1 | FCONST_2 => {
            let v = (op - FCONST_0) as f32;
            state.push(Value::Primitive(ctx.calc.val_float(v)))?;
            advance(state, ctx, 1)?;
        }
        DCONST_0 | DCONST_1 => {
            let v = (op - DCONST_0) as f64;
            state.push(Value::Primitive(ctx.calc.val_double(v)))?;
            advance(state, ctx, 1)?;
        }
        BIPUSH => {
            let b = match read_u8(state, 1) {
                Ok(b) => b as i8,
                Err(_) => return throw_verify_error(state, ctx),
            };
            state.push(Value::Primitive(ctx.calc.val_int(b as i32)))?;
            advance(state, ctx, 2)?;
        }
        SIPUSH => {
            let v = match read_i16(state, 1) {
                Ok(v) => v,
                Err(_) => return throw_verify_error(state, ctx),
            };
            state.push(Value::Primitive(ctx.calc.val_int(v as i32)))?;
            advance(state, ctx, 3)?;
        }
        LDC | LDC_W | LDC2_W => return ldc(op, state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
    Ok(vec![])
}

fn ldc(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let (index, len) = if op == LDC {
        match read_u8(state, 1) {
            Ok(i) => (i as u16, 2),
            Err(_) => return throw_verify_error(state, ctx),
        }
    } else {
        match read_u16(state, 1) {
            Ok(i) => (i, 3),
            Err(_) => return throw_verify_error(state, ctx),
        }
    };

    let class_name = state.current_method()?.class_name.clone();
    let cf = match ctx.hier.class_file(&class_name) {
        Ok(cf) => cf,
        Err(e) => return Err(crate::algo::ExecError::Unexpected(e.to_string())),
    };
    let entry = match cf.cp_entry(index) {
        Ok(e) => e.clone(),
        Err(_) => return throw_verify_error(state, ctx),
    };

    // The wide-constant form loads exactly the category-2 entries; the
    // narrow forms load everything else.
    let category2 = matches!(entry, ConstPoolEntry::Long(_) | ConstPoolEntry::Double(_));
    if category2 != (op == LDC2_W) {
        return throw_verify_error(state, ctx);
    }

    if let ConstPoolEntry::ClassRef(_) = entry {
        // Class literal objects are not modeled.
        state.set_stuck(Stuck::Unsupported(op));
        return Ok(vec![]);
    }
    match cp_value(state, ctx, &entry) {
        Some(value) => load_value(state, ctx, value, len),
        None => throw_verify_error(state, ctx),
    }
}
