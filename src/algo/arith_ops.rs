use crate::algo::{
    advance, opcodes::*, throw_verify_error, ExecutionContext, Outcome, ARITHMETIC_EXCEPTION,
};
use crate::calc::CalcError;
use crate::mem::state::State;
use crate::types::PrimitiveType;
use crate::value::{Lit, Operator, Primitive, Value};

/// Arithmetic, conversion and compare bytecodes: schema (a). Division and
/// remainder by a concretely zero divisor raise the modeled arithmetic
/// exception without advancing the pc, so the throw walks the frames of
/// the faulting instruction.
pub(super) fn exec(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    match op {
        IADD..=DREM => {
            let base = op - IADD;
            let operator = [
                Operator::Add,
                Operator::Sub,
                Operator::Mul,
                Operator::Div,
                Operator::Rem,
            ][(base / 4) as usize];
            let ty = value_type(base % 4);
            binary(state, ctx, operator, ty)
        }
        INEG..=DNEG => {
            let ty = value_type(op - INEG);
            let a = match pop_primitive(state, ty) {
                Some(a) => a,
                None => return throw_verify_error(state, ctx),
            };
            let r = ctx.calc.neg(&a)?;
            state.push(Value::Primitive(r))?;
            advance(state, ctx, 1)?;
            Ok(vec![])
        }
        ISHL..=LUSHR => {
            let base = op - ISHL;
            let operator = [Operator::Shl, Operator::Shr, Operator::Ushr][(base / 2) as usize];
            let ty = value_type(base % 2);
            let dist = match pop_primitive(state, PrimitiveType::Int) {
                Some(d) => d,
                None => return throw_verify_error(state, ctx),
            };
            let a = match pop_primitive(state, ty) {
                Some(a) => a,
                None => return throw_verify_error(state, ctx),
            };
            let r = ctx.calc.apply_binary(&a, operator, &dist)?;
            state.push(Value::Primitive(r))?;
            advance(state, ctx, 1)?;
            Ok(vec![])
        }
        IAND..=LXOR => {
            let base = op - IAND;
            let operator =
                [Operator::AndBits, Operator::OrBits, Operator::XorBits][(base / 2) as usize];
            let ty = value_type(base % 2);
            binary(state, ctx, operator, ty)
        }
        I2L..=I2S => conversion(op, state, ctx),
        LCMP..=DCMPG => compare(op, state, ctx),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    }
}

fn value_type(selector: u8) -> PrimitiveType {
    match selector {
        0 => PrimitiveType::Int,
        1 => PrimitiveType::Long,
        2 => PrimitiveType::Float,
        _ => PrimitiveType::Double,
    }
}

fn pop_primitive(state: &mut State, ty: PrimitiveType) -> Option<Primitive> {
    match state.top().ok()? {
        Value::Primitive(p) if p.ty() == ty => {}
        _ => return None,
    }
    match state.pop().ok()? {
        Value::Primitive(p) => Some(p),
        _ => None,
    }
}

fn binary(
    state: &mut State,
    ctx: &mut ExecutionContext,
    operator: Operator,
    ty: PrimitiveType,
) -> Outcome {
    let b = match pop_primitive(state, ty) {
        Some(b) => b,
        None => return throw_verify_error(state, ctx),
    };
    let a = match pop_primitive(state, ty) {
        Some(a) => a,
        None => return throw_verify_error(state, ctx),
    };

    // A concretely zero divisor of an integral division faults before any
    // expression is built.
    let divides = matches!(operator, Operator::Div | Operator::Rem);
    let integral = matches!(ty, PrimitiveType::Int | PrimitiveType::Long);
    if divides && integral && matches!(b.as_simplex(), Some(l) if l.is_zero()) {
        state.create_throwable_and_throw(ctx.hier, ARITHMETIC_EXCEPTION);
        return Ok(vec![]);
    }

    let r = match ctx.calc.apply_binary(&a, operator, &b) {
        Ok(r) => r,
        Err(CalcError::DivisionByZero) => {
            state.create_throwable_and_throw(ctx.hier, ARITHMETIC_EXCEPTION);
            return Ok(vec![]);
        }
        Err(e) => return Err(e.into()),
    };
    state.push(Value::Primitive(r))?;
    advance(state, ctx, 1)?;
    Ok(vec![])
}

fn conversion(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    use PrimitiveType::*;
    // (source, destination, widened back to int afterwards)
    let (src, dst, back_to_int) = match op {
        I2L => (Int, Long, false),
        I2F => (Int, Float, false),
        I2D => (Int, Double, false),
        L2I => (Long, Int, false),
        L2F => (Long, Float, false),
        L2D => (Long, Double, false),
        F2I => (Float, Int, false),
        F2L => (Float, Long, false),
        F2D => (Float, Double, false),
        D2I => (Double, Int, false),
        D2L => (Double, Long, false),
        D2F => (Double, Float, false),
        I2B => (Int, Byte, true),
        I2C => (Int, Char, true),
        I2S => (Int, Short, true),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    };
    let a = match pop_primitive(state, src) {
        Some(a) => a,
        None => return throw_verify_error(state, ctx),
    };
    let converted = ctx.calc.to(dst, &a)?;
    // The truncating int conversions leave an int on the operand stack.
    let result = if back_to_int {
        ctx.calc.widen(Int, &converted)?
    } else {
        converted
    };
    state.push(Value::Primitive(result))?;
    advance(state, ctx, 1)?;
    Ok(vec![])
}

/// The three-way compare bytecodes. Concrete operands evaluate to one of
/// `-1`, `0`, `1`; symbolic ones become an uninterpreted function
/// application so branches over the result stay decidable downstream.
fn compare(op: u8, state: &mut State, ctx: &mut ExecutionContext) -> Outcome {
    let (ty, name, nan_result) = match op {
        LCMP => (PrimitiveType::Long, "lcmp", 0),
        FCMPL => (PrimitiveType::Float, "fcmpl", -1),
        FCMPG => (PrimitiveType::Float, "fcmpg", 1),
        DCMPL => (PrimitiveType::Double, "dcmpl", -1),
        DCMPG => (PrimitiveType::Double, "dcmpg", 1),
        _ => unreachable!("dispatched opcode 0x{:02x}", op),
    };
    let b = match pop_primitive(state, ty) {
        Some(b) => b,
        None => return throw_verify_error(state, ctx),
    };
    let a = match pop_primitive(state, ty) {
        Some(a) => a,
        None => return throw_verify_error(state, ctx),
    };
    let result = match (a.as_simplex(), b.as_simplex()) {
        (Some(x), Some(y)) => ctx.calc.val_int(eval_cmp(x, y, nan_result)),
        _ => ctx.calc.apply_function(PrimitiveType::Int, name, &[a, b])?,
    };
    state.push(Value::Primitive(result))?;
    advance(state, ctx, 1)?;
    Ok(vec![])
}

fn eval_cmp(a: Lit, b: Lit, nan_result: i32) -> i32 {
    match (a, b) {
        (Lit::Long(x), Lit::Long(y)) => match x.cmp(&y) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        },
        (Lit::Float(x), Lit::Float(y)) => float_cmp(x as f64, y as f64, nan_result),
        (Lit::Double(x), Lit::Double(y)) => float_cmp(x, y, nan_result),
        _ => unreachable!("operands were type-checked"),
    }
}

fn float_cmp(x: f64, y: f64, nan_result: i32) -> i32 {
    if x.is_nan() || y.is_nan() {
        nan_result
    } else if x < y {
        -1
    } else if x > y {
        1
    } else {
        0
    }
}
