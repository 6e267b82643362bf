use thiserror::Error;

use crate::rewr::{default_rewriters, Rewriter};
use crate::types::{narrows, widens, PrimitiveType};
use crate::value::{Lit, Operator, Primitive, PrimitiveKind};

/// Errors signaled by the calculator's builders. The calculator never
/// silently coerces: a type or arity mismatch is always reported.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    #[error("invalid type: {0}")]
    InvalidType(String),
    #[error("invalid operator: {0}")]
    InvalidOperator(String),
    #[error("integer division by zero")]
    DivisionByZero,
}

/// The sole constructor of derived primitive values. Builders validate
/// operand types, evaluate eagerly when every operand is concrete, and pipe
/// every built node through the configured rewriter chain.
pub struct Calculator {
    rewriters: Vec<Box<dyn Rewriter>>,
}

impl Default for Calculator {
    fn default() -> Calculator {
        Calculator { rewriters: default_rewriters() }
    }
}

impl Calculator {
    pub fn new(rewriters: Vec<Box<dyn Rewriter>>) -> Calculator {
        Calculator { rewriters }
    }

    // Literal injection.

    pub fn val_lit(&self, lit: Lit) -> Primitive {
        Primitive::simplex(lit)
    }

    pub fn val_boolean(&self, x: bool) -> Primitive {
        Primitive::simplex(Lit::Boolean(x))
    }

    pub fn val_int(&self, x: i32) -> Primitive {
        Primitive::simplex(Lit::Int(x))
    }

    pub fn val_long(&self, x: i64) -> Primitive {
        Primitive::simplex(Lit::Long(x))
    }

    pub fn val_float(&self, x: f32) -> Primitive {
        Primitive::simplex(Lit::Float(x))
    }

    pub fn val_double(&self, x: f64) -> Primitive {
        Primitive::simplex(Lit::Double(x))
    }

    // Arithmetic.

    pub fn add(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.arithmetic(Operator::Add, a, b)
    }

    pub fn sub(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.arithmetic(Operator::Sub, a, b)
    }

    pub fn mul(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.arithmetic(Operator::Mul, a, b)
    }

    pub fn div(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.arithmetic(Operator::Div, a, b)
    }

    pub fn rem(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.arithmetic(Operator::Rem, a, b)
    }

    pub fn neg(&self, a: &Primitive) -> Result<Primitive, CalcError> {
        let a = self.promote_numeric(a)?;
        if let Some(lit) = a.as_simplex() {
            return Ok(Primitive::simplex(eval_neg(lit)));
        }
        let ty = a.ty();
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Unary {
            ty,
            op: Operator::Neg,
            operand: a,
        }))
    }

    // Shifts: the shifted operand is `I` or `J`, the distance is `I`.

    pub fn shl(&self, a: &Primitive, dist: &Primitive) -> Result<Primitive, CalcError> {
        self.shift(Operator::Shl, a, dist)
    }

    pub fn shr(&self, a: &Primitive, dist: &Primitive) -> Result<Primitive, CalcError> {
        self.shift(Operator::Shr, a, dist)
    }

    pub fn ushr(&self, a: &Primitive, dist: &Primitive) -> Result<Primitive, CalcError> {
        self.shift(Operator::Ushr, a, dist)
    }

    // Bitwise operations over `I`, `J` or `Z`.

    pub fn and_bits(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.bitwise(Operator::AndBits, a, b)
    }

    pub fn or_bits(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.bitwise(Operator::OrBits, a, b)
    }

    pub fn xor_bits(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.bitwise(Operator::XorBits, a, b)
    }

    // Logical operations over `Z`.

    pub fn and(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.logical(Operator::And, a, b)
    }

    pub fn or(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.logical(Operator::Or, a, b)
    }

    pub fn not(&self, a: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(a)?;
        if a.ty() != PrimitiveType::Boolean {
            return Err(CalcError::InvalidType(format!("logical not over {}", a.ty())));
        }
        if let Some(lit) = a.as_simplex() {
            return Ok(self.val_boolean(lit.is_zero()));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Unary {
            ty: PrimitiveType::Boolean,
            op: Operator::Not,
            operand: a.clone(),
        }))
    }

    // Comparisons. The result type is always `Z`.

    pub fn eq(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Eq, a, b)
    }

    pub fn ne(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Ne, a, b)
    }

    pub fn lt(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Lt, a, b)
    }

    pub fn le(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Le, a, b)
    }

    pub fn gt(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Gt, a, b)
    }

    pub fn ge(&self, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        self.comparison(Operator::Ge, a, b)
    }

    // Conversions.

    pub fn widen(&self, to: PrimitiveType, p: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(p)?;
        let from = p.ty();
        if !widens(to, from) {
            return Err(CalcError::InvalidType(format!("cannot widen {} to {}", from, to)));
        }
        if let Some(lit) = p.as_simplex() {
            return Ok(Primitive::simplex(convert_lit(to, lit)));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Widening {
            ty: to,
            arg: p.clone(),
        }))
    }

    pub fn narrow(&self, to: PrimitiveType, p: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(p)?;
        let from = p.ty();
        if !narrows(to, from) {
            return Err(CalcError::InvalidType(format!("cannot narrow {} to {}", from, to)));
        }
        if let Some(lit) = p.as_simplex() {
            return Ok(Primitive::simplex(convert_lit(to, lit)));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Narrowing {
            ty: to,
            arg: p.clone(),
        }))
    }

    /// Converts `p` to `to`, choosing widening or narrowing as appropriate;
    /// returns `p` unchanged if it already has type `to`.
    pub fn to(&self, to: PrimitiveType, p: &Primitive) -> Result<Primitive, CalcError> {
        let from = p.ty();
        if from == to {
            Ok(p.clone())
        } else if widens(to, from) {
            self.widen(to, p)
        } else if narrows(to, from) {
            self.narrow(to, p)
        } else {
            Err(CalcError::InvalidType(format!("cannot convert {} to {}", from, to)))
        }
    }

    /// Builds an uninterpreted function application over primitives.
    pub fn apply_function(
        &self,
        ty: PrimitiveType,
        name: &str,
        args: &[Primitive],
    ) -> Result<Primitive, CalcError> {
        if !ty.is_value_type() {
            return Err(CalcError::InvalidType(format!("function {} returns void", name)));
        }
        for a in args {
            check_not_any(a)?;
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Apply {
            ty,
            name: name.to_owned(),
            args: args.to_vec(),
        }))
    }

    // Dispatch by operator, one table per arity.

    pub fn apply_unary(&self, op: Operator, a: &Primitive) -> Result<Primitive, CalcError> {
        match op {
            Operator::Neg => self.neg(a),
            Operator::Not => self.not(a),
            _ => Err(CalcError::InvalidOperator(format!("{:?} is not unary", op))),
        }
    }

    pub fn apply_binary(
        &self,
        a: &Primitive,
        op: Operator,
        b: &Primitive,
    ) -> Result<Primitive, CalcError> {
        match op {
            Operator::Add | Operator::Sub | Operator::Mul | Operator::Div | Operator::Rem => {
                self.arithmetic(op, a, b)
            }
            Operator::Shl | Operator::Shr | Operator::Ushr => self.shift(op, a, b),
            Operator::AndBits | Operator::OrBits | Operator::XorBits => self.bitwise(op, a, b),
            Operator::And | Operator::Or => self.logical(op, a, b),
            Operator::Eq
            | Operator::Ne
            | Operator::Lt
            | Operator::Le
            | Operator::Gt
            | Operator::Ge => self.comparison(op, a, b),
            Operator::Neg | Operator::Not => {
                Err(CalcError::InvalidOperator(format!("{:?} is not binary", op)))
            }
        }
    }

    /// Canonicalizes an arbitrary primitive bottom-up: children first, then
    /// the rebuilt node through every rewriter. Idempotent.
    pub fn simplify(&self, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Simplex(_) | PrimitiveKind::Term { .. } | PrimitiveKind::Any => {
                Ok(p.clone())
            }
            PrimitiveKind::Unary { op, ref operand, .. } => {
                let operand = self.simplify(operand)?;
                self.apply_unary(op, &operand)
            }
            PrimitiveKind::Binary { op, ref left, ref right, .. } => {
                let left = self.simplify(left)?;
                let right = self.simplify(right)?;
                self.apply_binary(&left, op, &right)
            }
            PrimitiveKind::Widening { ty, ref arg } => {
                let arg = self.simplify(arg)?;
                self.to(ty, &arg)
            }
            PrimitiveKind::Narrowing { ty, ref arg } => {
                let arg = self.simplify(arg)?;
                self.to(ty, &arg)
            }
            PrimitiveKind::Apply { ty, ref name, ref args } => {
                let args = args
                    .iter()
                    .map(|a| self.simplify(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.apply_function(ty, name, &args)
            }
        }
    }

    pub(crate) fn apply_rewriters(&self, p: Primitive) -> Result<Primitive, CalcError> {
        let mut cur = p;
        for rw in &self.rewriters {
            cur = rw.rewrite(self, &cur)?;
        }
        Ok(cur)
    }

    // Builder families.

    fn arithmetic(&self, op: Operator, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        let a = self.promote_numeric(a)?;
        let b = self.promote_numeric(b)?;
        let ty = a.ty();
        if ty != b.ty() {
            return Err(CalcError::InvalidType(format!(
                "operands of {:?} have types {} and {}",
                op,
                ty,
                b.ty()
            )));
        }
        if let (Some(x), Some(y)) = (a.as_simplex(), b.as_simplex()) {
            return Ok(Primitive::simplex(eval_arithmetic(op, x, y)?));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Binary {
            ty,
            op,
            left: a,
            right: b,
        }))
    }

    fn shift(&self, op: Operator, a: &Primitive, dist: &Primitive) -> Result<Primitive, CalcError> {
        let a = self.promote_numeric(a)?;
        let dist = self.promote_numeric(dist)?;
        let ty = a.ty();
        if !matches!(ty, PrimitiveType::Int | PrimitiveType::Long) {
            return Err(CalcError::InvalidType(format!("shifted operand has type {}", ty)));
        }
        if dist.ty() != PrimitiveType::Int {
            return Err(CalcError::InvalidType(format!(
                "shift distance has type {}",
                dist.ty()
            )));
        }
        if let (Some(x), Some(d)) = (a.as_simplex(), dist.as_simplex()) {
            return Ok(Primitive::simplex(eval_shift(op, x, d)));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Binary {
            ty,
            op,
            left: a,
            right: dist,
        }))
    }

    fn bitwise(&self, op: Operator, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(a)?;
        check_not_any(b)?;
        let (a, b) = if a.ty() == PrimitiveType::Boolean && b.ty() == PrimitiveType::Boolean {
            (a.clone(), b.clone())
        } else {
            (self.promote_numeric(a)?, self.promote_numeric(b)?)
        };
        let ty = a.ty();
        if ty != b.ty()
            || !matches!(ty, PrimitiveType::Int | PrimitiveType::Long | PrimitiveType::Boolean)
        {
            return Err(CalcError::InvalidType(format!(
                "operands of {:?} have types {} and {}",
                op,
                ty,
                b.ty()
            )));
        }
        if let (Some(x), Some(y)) = (a.as_simplex(), b.as_simplex()) {
            return Ok(Primitive::simplex(eval_bitwise(op, x, y)));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Binary {
            ty,
            op,
            left: a,
            right: b,
        }))
    }

    fn logical(&self, op: Operator, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(a)?;
        check_not_any(b)?;
        if a.ty() != PrimitiveType::Boolean || b.ty() != PrimitiveType::Boolean {
            return Err(CalcError::InvalidType(format!(
                "operands of {:?} have types {} and {}",
                op,
                a.ty(),
                b.ty()
            )));
        }
        if let (Some(x), Some(y)) = (a.as_simplex(), b.as_simplex()) {
            let r = match op {
                Operator::And => !x.is_zero() && !y.is_zero(),
                Operator::Or => !x.is_zero() || !y.is_zero(),
                _ => unreachable!(),
            };
            return Ok(self.val_boolean(r));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Binary {
            ty: PrimitiveType::Boolean,
            op,
            left: a.clone(),
            right: b.clone(),
        }))
    }

    fn comparison(&self, op: Operator, a: &Primitive, b: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(a)?;
        check_not_any(b)?;
        let both_boolean =
            a.ty() == PrimitiveType::Boolean && b.ty() == PrimitiveType::Boolean;
        let (a, b) = if both_boolean && matches!(op, Operator::Eq | Operator::Ne) {
            (a.clone(), b.clone())
        } else {
            (self.promote_numeric(a)?, self.promote_numeric(b)?)
        };
        if a.ty() != b.ty() {
            return Err(CalcError::InvalidType(format!(
                "operands of {:?} have types {} and {}",
                op,
                a.ty(),
                b.ty()
            )));
        }
        if let (Some(x), Some(y)) = (a.as_simplex(), b.as_simplex()) {
            return Ok(self.val_boolean(eval_comparison(op, x, y)));
        }
        self.apply_rewriters(Primitive::from_kind(PrimitiveKind::Binary {
            ty: PrimitiveType::Boolean,
            op,
            left: a,
            right: b,
        }))
    }

    /// Unary numeric promotion: `B`/`S`/`C` widen to `I`; `Z` and `Any` are
    /// rejected; `I`/`J`/`F`/`D` pass through.
    fn promote_numeric(&self, p: &Primitive) -> Result<Primitive, CalcError> {
        check_not_any(p)?;
        let t = p.ty();
        if t == PrimitiveType::Boolean {
            return Err(CalcError::InvalidType("boolean in numeric context".to_owned()));
        }
        if t.promotes_to_int() {
            self.widen(PrimitiveType::Int, p)
        } else if t.is_promoted() {
            Ok(p.clone())
        } else {
            Err(CalcError::InvalidType(format!("{} in numeric context", t)))
        }
    }
}

fn check_not_any(p: &Primitive) -> Result<(), CalcError> {
    if matches!(p.kind(), PrimitiveKind::Any) {
        Err(CalcError::InvalidOperand("wildcard in operation".to_owned()))
    } else {
        Ok(())
    }
}

// Concrete evaluation, following the hosted semantics: two's-complement
// wrapping for I/J, IEEE-754 for F/D.

fn eval_arithmetic(op: Operator, a: Lit, b: Lit) -> Result<Lit, CalcError> {
    use Operator::*;
    Ok(match (a, b) {
        (Lit::Int(x), Lit::Int(y)) => Lit::Int(match op {
            Add => x.wrapping_add(y),
            Sub => x.wrapping_sub(y),
            Mul => x.wrapping_mul(y),
            Div => {
                if y == 0 {
                    return Err(CalcError::DivisionByZero);
                }
                x.wrapping_div(y)
            }
            Rem => {
                if y == 0 {
                    return Err(CalcError::DivisionByZero);
                }
                x.wrapping_rem(y)
            }
            _ => unreachable!(),
        }),
        (Lit::Long(x), Lit::Long(y)) => Lit::Long(match op {
            Add => x.wrapping_add(y),
            Sub => x.wrapping_sub(y),
            Mul => x.wrapping_mul(y),
            Div => {
                if y == 0 {
                    return Err(CalcError::DivisionByZero);
                }
                x.wrapping_div(y)
            }
            Rem => {
                if y == 0 {
                    return Err(CalcError::DivisionByZero);
                }
                x.wrapping_rem(y)
            }
            _ => unreachable!(),
        }),
        (Lit::Float(x), Lit::Float(y)) => Lit::Float(match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Rem => x % y,
            _ => unreachable!(),
        }),
        (Lit::Double(x), Lit::Double(y)) => Lit::Double(match op {
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Rem => x % y,
            _ => unreachable!(),
        }),
        _ => unreachable!("operands were checked for equal promoted types"),
    })
}

fn eval_neg(a: Lit) -> Lit {
    match a {
        Lit::Int(x) => Lit::Int(x.wrapping_neg()),
        Lit::Long(x) => Lit::Long(x.wrapping_neg()),
        Lit::Float(x) => Lit::Float(-x),
        Lit::Double(x) => Lit::Double(-x),
        _ => unreachable!("operand was promoted"),
    }
}

fn eval_shift(op: Operator, a: Lit, dist: Lit) -> Lit {
    let d = match dist {
        Lit::Int(d) => d,
        _ => unreachable!("shift distance was checked to be I"),
    };
    match a {
        Lit::Int(x) => {
            let d = (d & 31) as u32;
            Lit::Int(match op {
                Operator::Shl => x.wrapping_shl(d),
                Operator::Shr => x.wrapping_shr(d),
                Operator::Ushr => ((x as u32).wrapping_shr(d)) as i32,
                _ => unreachable!(),
            })
        }
        Lit::Long(x) => {
            let d = (d & 63) as u32;
            Lit::Long(match op {
                Operator::Shl => x.wrapping_shl(d),
                Operator::Shr => x.wrapping_shr(d),
                Operator::Ushr => ((x as u64).wrapping_shr(d)) as i64,
                _ => unreachable!(),
            })
        }
        _ => unreachable!("shifted operand was checked to be I or J"),
    }
}

fn eval_bitwise(op: Operator, a: Lit, b: Lit) -> Lit {
    match (a, b) {
        (Lit::Int(x), Lit::Int(y)) => Lit::Int(match op {
            Operator::AndBits => x & y,
            Operator::OrBits => x | y,
            Operator::XorBits => x ^ y,
            _ => unreachable!(),
        }),
        (Lit::Long(x), Lit::Long(y)) => Lit::Long(match op {
            Operator::AndBits => x & y,
            Operator::OrBits => x | y,
            Operator::XorBits => x ^ y,
            _ => unreachable!(),
        }),
        (Lit::Boolean(x), Lit::Boolean(y)) => Lit::Boolean(match op {
            Operator::AndBits => x & y,
            Operator::OrBits => x | y,
            Operator::XorBits => x ^ y,
            _ => unreachable!(),
        }),
        _ => unreachable!("operands were checked for equal types"),
    }
}

fn eval_comparison(op: Operator, a: Lit, b: Lit) -> bool {
    use Operator::*;
    match (a, b) {
        (Lit::Int(x), Lit::Int(y)) => match op {
            Eq => x == y,
            Ne => x != y,
            Lt => x < y,
            Le => x <= y,
            Gt => x > y,
            Ge => x >= y,
            _ => unreachable!(),
        },
        (Lit::Long(x), Lit::Long(y)) => match op {
            Eq => x == y,
            Ne => x != y,
            Lt => x < y,
            Le => x <= y,
            Gt => x > y,
            Ge => x >= y,
            _ => unreachable!(),
        },
        (Lit::Float(x), Lit::Float(y)) => match op {
            Eq => x == y,
            Ne => x != y,
            Lt => x < y,
            Le => x <= y,
            Gt => x > y,
            Ge => x >= y,
            _ => unreachable!(),
        },
        (Lit::Double(x), Lit::Double(y)) => match op {
            Eq => x == y,
            Ne => x != y,
            Lt => x < y,
            Le => x <= y,
            Gt => x > y,
            Ge => x >= y,
            _ => unreachable!(),
        },
        (Lit::Boolean(x), Lit::Boolean(y)) => match op {
            Eq => x == y,
            Ne => x != y,
            _ => unreachable!(),
        },
        _ => unreachable!("operands were checked for equal types"),
    }
}

/// Concrete conversion between primitive types, with the hosted VM's
/// saturating float-to-integral semantics.
pub fn convert_lit(to: PrimitiveType, lit: Lit) -> Lit {
    let via_i64 = |x: i64| match to {
        PrimitiveType::Byte => Lit::Byte(x as i8),
        PrimitiveType::Short => Lit::Short(x as i16),
        PrimitiveType::Char => Lit::Char(x as u16),
        PrimitiveType::Int => Lit::Int(x as i32),
        PrimitiveType::Long => Lit::Long(x),
        PrimitiveType::Float => Lit::Float(x as f32),
        PrimitiveType::Double => Lit::Double(x as f64),
        PrimitiveType::Boolean => Lit::Boolean(x != 0),
        PrimitiveType::Void => Lit::Int(0),
    };
    match lit {
        Lit::Boolean(b) => via_i64(b as i64),
        Lit::Byte(x) => via_i64(x as i64),
        Lit::Short(x) => via_i64(x as i64),
        Lit::Char(x) => via_i64(x as i64),
        Lit::Int(x) => via_i64(x as i64),
        Lit::Long(x) => match to {
            PrimitiveType::Float => Lit::Float(x as f32),
            PrimitiveType::Double => Lit::Double(x as f64),
            _ => via_i64(x),
        },
        Lit::Float(x) => match to {
            PrimitiveType::Double => Lit::Double(x as f64),
            PrimitiveType::Long => Lit::Long(x as i64),
            PrimitiveType::Int => Lit::Int(x as i32),
            _ => via_i64(x as i64),
        },
        Lit::Double(x) => match to {
            PrimitiveType::Float => Lit::Float(x as f32),
            PrimitiveType::Long => Lit::Long(x as i64),
            PrimitiveType::Int => Lit::Int(x as i32),
            _ => via_i64(x as i64),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PrimitiveKind;

    fn calc() -> Calculator {
        Calculator::default()
    }

    #[test]
    fn eager_wrapping_arithmetic() {
        let c = calc();
        let r = c.add(&c.val_int(i32::MAX), &c.val_int(1)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(i32::MIN)));
        let r = c.div(&c.val_int(i32::MIN), &c.val_int(-1)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(i32::MIN)));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let c = calc();
        assert!(matches!(
            c.div(&c.val_int(1), &c.val_int(0)),
            Err(CalcError::DivisionByZero)
        ));
        assert!(matches!(
            c.rem(&c.val_long(1), &c.val_long(0)),
            Err(CalcError::DivisionByZero)
        ));
    }

    #[test]
    fn small_ints_promote_before_arithmetic() {
        let c = calc();
        let b = Primitive::simplex(Lit::Byte(-2));
        let r = c.add(&b, &c.val_int(7)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(5)));
    }

    #[test]
    fn mixed_promoted_types_are_rejected() {
        let c = calc();
        assert!(matches!(
            c.add(&c.val_int(1), &c.val_long(1)),
            Err(CalcError::InvalidType(_))
        ));
        assert!(matches!(
            c.add(&c.val_boolean(true), &c.val_int(1)),
            Err(CalcError::InvalidType(_))
        ));
    }

    #[test]
    fn shift_distance_masking() {
        let c = calc();
        let r = c.shl(&c.val_int(1), &c.val_int(33)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(2)));
        let r = c.ushr(&c.val_int(-1), &c.val_int(28)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(15)));
        let r = c.shl(&c.val_long(1), &c.val_int(64)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Long(1)));
    }

    #[test]
    fn symbolic_operands_build_expressions() {
        let c = calc();
        let x = Primitive::term(PrimitiveType::Int, 0);
        let r = c.add(&x, &c.val_int(2)).unwrap();
        match *r.kind() {
            PrimitiveKind::Binary { op: Operator::Add, ty: PrimitiveType::Int, .. } => {}
            ref k => panic!("unexpected node {:?}", k),
        }
        assert_eq!(r.ty(), PrimitiveType::Int);
    }

    #[test]
    fn comparisons_have_boolean_type() {
        let c = calc();
        let x = Primitive::term(PrimitiveType::Long, 0);
        let r = c.lt(&x, &c.val_long(10)).unwrap();
        assert_eq!(r.ty(), PrimitiveType::Boolean);
        let r = c.ge(&c.val_double(1.5), &c.val_double(1.0)).unwrap();
        assert!(r.surely_true());
    }

    #[test]
    fn nan_comparisons_are_false() {
        let c = calc();
        let nan = c.val_double(f64::NAN);
        assert!(c.lt(&nan, &c.val_double(0.0)).unwrap().surely_false());
        assert!(c.eq(&nan, &nan).unwrap().surely_false());
        assert!(c.ne(&nan, &nan).unwrap().surely_true());
    }

    #[test]
    fn saturating_float_narrowing() {
        let c = calc();
        let r = c.narrow(PrimitiveType::Int, &c.val_float(1e20)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Int(i32::MAX)));
        let r = c.narrow(PrimitiveType::Long, &c.val_double(f64::NAN)).unwrap();
        assert_eq!(r.as_simplex(), Some(Lit::Long(0)));
    }

    #[test]
    fn widen_narrow_roundtrip_lossless() {
        let c = calc();
        let v = c.val_int(123);
        let narrowed = c.narrow(PrimitiveType::Byte, &v).unwrap();
        let back = c.widen(PrimitiveType::Int, &narrowed).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn to_is_identity_on_same_type() {
        let c = calc();
        let x = Primitive::term(PrimitiveType::Int, 9);
        assert_eq!(c.to(PrimitiveType::Int, &x).unwrap(), x);
    }

    #[test]
    fn unary_dispatch_rejects_binary_operators() {
        let c = calc();
        assert!(matches!(
            c.apply_unary(Operator::Add, &c.val_int(1)),
            Err(CalcError::InvalidOperator(_))
        ));
        assert!(matches!(
            c.apply_binary(&c.val_int(1), Operator::Neg, &c.val_int(1)),
            Err(CalcError::InvalidOperator(_))
        ));
    }
}
