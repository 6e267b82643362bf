use crate::calc::{CalcError, Calculator};
use crate::types::{widens, PrimitiveType};
use crate::value::{zero_of, Lit, Operator, Primitive, PrimitiveKind};

/// A term rewriter over the primitive algebra. `rewrite` dispatches per node
/// kind; concrete rewriters override the per-kind hooks they care about and
/// leave the rest at the identity default. Rewriters are chained by
/// composition in the calculator.
pub trait Rewriter {
    fn rewrite(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match p.kind() {
            PrimitiveKind::Simplex(_) => self.rewrite_simplex(calc, p),
            PrimitiveKind::Term { .. } => self.rewrite_term(calc, p),
            PrimitiveKind::Any => self.rewrite_any(calc, p),
            PrimitiveKind::Unary { .. } => self.rewrite_unary(calc, p),
            PrimitiveKind::Binary { .. } => self.rewrite_binary(calc, p),
            PrimitiveKind::Widening { .. } => self.rewrite_widening(calc, p),
            PrimitiveKind::Narrowing { .. } => self.rewrite_narrowing(calc, p),
            PrimitiveKind::Apply { .. } => self.rewrite_apply(calc, p),
        }
    }

    fn rewrite_simplex(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_term(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_any(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_unary(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_binary(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_widening(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_narrowing(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }

    fn rewrite_apply(&self, _calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        Ok(p.clone())
    }
}

/// The default chain, in application order.
pub fn default_rewriters() -> Vec<Box<dyn Rewriter>> {
    vec![
        Box::new(RewriterOperationOnSimplex),
        Box::new(RewriterCancellation),
        Box::new(RewriterExpressionIdentities),
        Box::new(RewriterComparisonNormalization),
    ]
}

fn is_integral(ty: PrimitiveType) -> bool {
    matches!(
        ty,
        PrimitiveType::Byte
            | PrimitiveType::Short
            | PrimitiveType::Char
            | PrimitiveType::Int
            | PrimitiveType::Long
    )
}

fn is_one(lit: Lit) -> bool {
    match lit {
        Lit::Int(x) => x == 1,
        Lit::Long(x) => x == 1,
        Lit::Float(x) => x == 1.0,
        Lit::Double(x) => x == 1.0,
        _ => false,
    }
}

/// Folds any node whose operands are all concrete, by routing it back
/// through the calculator's eager evaluation path.
pub struct RewriterOperationOnSimplex;

impl Rewriter for RewriterOperationOnSimplex {
    fn rewrite_unary(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Unary { op, ref operand, .. } if !operand.is_symbolic() => {
                calc.apply_unary(op, operand)
            }
            _ => Ok(p.clone()),
        }
    }

    fn rewrite_binary(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Binary { op, ref left, ref right, .. }
                if !left.is_symbolic() && !right.is_symbolic() =>
            {
                calc.apply_binary(left, op, right)
            }
            _ => Ok(p.clone()),
        }
    }

    fn rewrite_widening(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Widening { ty, ref arg } if !arg.is_symbolic() => calc.widen(ty, arg),
            _ => Ok(p.clone()),
        }
    }

    fn rewrite_narrowing(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Narrowing { ty, ref arg } if !arg.is_symbolic() => calc.narrow(ty, arg),
            _ => Ok(p.clone()),
        }
    }
}

/// Cancels inverse pairs: `neg(neg(x)) = x`, `not(not(x)) = x`, `not` of an
/// integral comparison folds to the complementary comparison, stacked
/// conversions collapse to a single conversion where one suffices.
pub struct RewriterCancellation;

impl Rewriter for RewriterCancellation {
    fn rewrite_unary(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        if let PrimitiveKind::Unary { op, ref operand, .. } = *p.kind() {
            match (op, operand.kind()) {
                (Operator::Neg, &PrimitiveKind::Unary { op: Operator::Neg, operand: ref inner, .. }) => {
                    return Ok(inner.clone());
                }
                (Operator::Not, &PrimitiveKind::Unary { op: Operator::Not, operand: ref inner, .. }) => {
                    return Ok(inner.clone());
                }
                (
                    Operator::Not,
                    &PrimitiveKind::Binary { op: cmp, ref left, ref right, .. },
                ) if cmp.is_comparison() && is_integral(left.ty()) && is_integral(right.ty()) => {
                    if let Some(complement) = cmp.complement() {
                        return calc.apply_binary(left, complement, right);
                    }
                }
                _ => {}
            }
        }
        Ok(p.clone())
    }

    fn rewrite_widening(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        if let PrimitiveKind::Widening { ty, ref arg } = *p.kind() {
            if arg.ty() == ty {
                return Ok(arg.clone());
            }
            if let PrimitiveKind::Widening { arg: ref inner, .. } = *arg.kind() {
                if widens(ty, inner.ty()) {
                    return calc.widen(ty, inner);
                }
            }
        }
        Ok(p.clone())
    }

    fn rewrite_narrowing(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        if let PrimitiveKind::Narrowing { ty, ref arg } = *p.kind() {
            if arg.ty() == ty {
                return Ok(arg.clone());
            }
            match *arg.kind() {
                // Narrowing a widened value back to its own type is the
                // identity when the whole chain is integral (sign-extend
                // then truncate) or the exact F -> D -> F roundtrip.
                PrimitiveKind::Widening { ty: mid, arg: ref inner } if inner.ty() == ty => {
                    let integral = is_integral(ty) && is_integral(mid);
                    let exact_float = ty == PrimitiveType::Float && mid == PrimitiveType::Double;
                    if integral || exact_float {
                        return Ok(inner.clone());
                    }
                }
                // Stacked integral narrowings collapse: I -> S -> B is I -> B.
                PrimitiveKind::Narrowing { ty: mid, arg: ref inner }
                    if is_integral(ty) && is_integral(mid) && is_integral(inner.ty()) =>
                {
                    return calc.narrow(ty, inner);
                }
                _ => {}
            }
        }
        Ok(p.clone())
    }
}

/// Identity and absorbing element laws, plus the canonicalizations the
/// constant-on-the-right convention enables: commuting a leading constant
/// rightward and folding `(x + c1) + c2` into `x + (c1 + c2)`.
pub struct RewriterExpressionIdentities;

impl RewriterExpressionIdentities {
    fn commutes(op: Operator) -> bool {
        matches!(
            op,
            Operator::Add
                | Operator::Mul
                | Operator::AndBits
                | Operator::OrBits
                | Operator::XorBits
                | Operator::And
                | Operator::Or
        )
    }

}

impl Rewriter for RewriterExpressionIdentities {
    fn rewrite_binary(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        let (op, left, right, ty) = match *p.kind() {
            PrimitiveKind::Binary { op, ref left, ref right, ty } => (op, left, right, ty),
            _ => return Ok(p.clone()),
        };

        // Constant on the right whenever the operator commutes.
        if Self::commutes(op) && !left.is_symbolic() && right.is_symbolic() {
            return calc.apply_binary(right, op, left);
        }

        let rlit = right.as_simplex();
        let llit = left.as_simplex();

        match op {
            Operator::Add => {
                if matches!(rlit, Some(l) if l.is_zero()) {
                    return Ok(left.clone());
                }
                if let Some(c2) = rlit {
                    if let PrimitiveKind::Binary {
                        op: Operator::Add, left: ref x, right: ref c1, ..
                    } = *left.kind()
                    {
                        if let Some(c1) = c1.as_simplex() {
                            let folded = calc.add(
                                &Primitive::simplex(c1),
                                &Primitive::simplex(c2),
                            )?;
                            return calc.add(x, &folded);
                        }
                    }
                }
            }
            Operator::Sub => {
                if matches!(rlit, Some(l) if l.is_zero()) {
                    return Ok(left.clone());
                }
                if is_integral(ty) && left == right {
                    return Ok(Primitive::simplex(zero_of(ty)));
                }
            }
            Operator::Mul => {
                if matches!(rlit, Some(l) if is_one(l)) {
                    return Ok(left.clone());
                }
                if is_integral(ty) && matches!(rlit, Some(l) if l.is_zero()) {
                    return Ok(Primitive::simplex(zero_of(ty)));
                }
                if let Some(c2) = rlit {
                    if let PrimitiveKind::Binary {
                        op: Operator::Mul, left: ref x, right: ref c1, ..
                    } = *left.kind()
                    {
                        if let Some(c1) = c1.as_simplex() {
                            let folded = calc.mul(
                                &Primitive::simplex(c1),
                                &Primitive::simplex(c2),
                            )?;
                            return calc.mul(x, &folded);
                        }
                    }
                }
            }
            Operator::Div => {
                if matches!(rlit, Some(l) if is_one(l)) {
                    return Ok(left.clone());
                }
            }
            Operator::Shl | Operator::Shr | Operator::Ushr => {
                if matches!(rlit, Some(l) if l.is_zero()) {
                    return Ok(left.clone());
                }
            }
            Operator::AndBits => match rlit {
                Some(l) if l.is_zero() => return Ok(Primitive::simplex(zero_of(ty))),
                Some(Lit::Boolean(true)) => return Ok(left.clone()),
                _ => {}
            },
            Operator::OrBits | Operator::XorBits => match rlit {
                Some(Lit::Boolean(true)) if op == Operator::OrBits => {
                    return Ok(calc.val_boolean(true));
                }
                Some(l) if l.is_zero() => return Ok(left.clone()),
                _ => {}
            },
            Operator::And => match (llit, rlit) {
                (_, Some(Lit::Boolean(true))) => return Ok(left.clone()),
                (_, Some(Lit::Boolean(false))) => return Ok(calc.val_boolean(false)),
                (Some(Lit::Boolean(true)), _) => return Ok(right.clone()),
                (Some(Lit::Boolean(false)), _) => return Ok(calc.val_boolean(false)),
                _ => {}
            },
            Operator::Or => match (llit, rlit) {
                (_, Some(Lit::Boolean(false))) => return Ok(left.clone()),
                (_, Some(Lit::Boolean(true))) => return Ok(calc.val_boolean(true)),
                (Some(Lit::Boolean(false)), _) => return Ok(right.clone()),
                (Some(Lit::Boolean(true)), _) => return Ok(calc.val_boolean(true)),
                _ => {}
            },
            Operator::Eq if is_integral(left.ty()) && left == right => {
                return Ok(calc.val_boolean(true));
            }
            Operator::Ne if is_integral(left.ty()) && left == right => {
                return Ok(calc.val_boolean(false));
            }
            _ => {}
        }
        Ok(p.clone())
    }
}

/// Normalizes `>` and `>=` to `<` and `<=` with swapped operands. The swap
/// is a pure operand exchange, so it is safe for floating comparisons too.
pub struct RewriterComparisonNormalization;

impl Rewriter for RewriterComparisonNormalization {
    fn rewrite_binary(&self, calc: &Calculator, p: &Primitive) -> Result<Primitive, CalcError> {
        match *p.kind() {
            PrimitiveKind::Binary { op: Operator::Gt, ref left, ref right, .. } => {
                calc.apply_binary(right, Operator::Lt, left)
            }
            PrimitiveKind::Binary { op: Operator::Ge, ref left, ref right, .. } => {
                calc.apply_binary(right, Operator::Le, left)
            }
            _ => Ok(p.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SymbolId;

    fn calc() -> Calculator {
        Calculator::default()
    }

    fn x(id: SymbolId) -> Primitive {
        Primitive::term(PrimitiveType::Int, id)
    }

    #[test]
    fn additive_identity() {
        let c = calc();
        let v = x(0);
        assert_eq!(c.add(&v, &c.val_int(0)).unwrap(), v);
        assert_eq!(c.add(&c.val_int(0), &v).unwrap(), v);
        assert_eq!(c.sub(&v, &c.val_int(0)).unwrap(), v);
    }

    #[test]
    fn multiplicative_identity_and_absorption() {
        let c = calc();
        let v = x(0);
        assert_eq!(c.mul(&v, &c.val_int(1)).unwrap(), v);
        assert_eq!(c.mul(&v, &c.val_int(0)).unwrap(), c.val_int(0));
        assert_eq!(c.and_bits(&v, &c.val_int(0)).unwrap(), c.val_int(0));
        assert_eq!(c.or_bits(&v, &c.val_int(0)).unwrap(), v);
    }

    #[test]
    fn constants_commute_right_and_fold() {
        let c = calc();
        let v = x(0);
        let a = c.add(&c.val_int(3), &v).unwrap();
        let b = c.add(&v, &c.val_int(3)).unwrap();
        assert_eq!(a, b);
        let folded = c.add(&a, &c.val_int(4)).unwrap();
        assert_eq!(folded, c.add(&v, &c.val_int(7)).unwrap());
    }

    #[test]
    fn double_negation_cancels() {
        let c = calc();
        let v = x(0);
        let n = c.neg(&v).unwrap();
        assert_eq!(c.neg(&n).unwrap(), v);
        let b = Primitive::term(PrimitiveType::Boolean, 1);
        let nb = c.not(&b).unwrap();
        assert_eq!(c.not(&nb).unwrap(), b);
    }

    #[test]
    fn not_of_integral_comparison_complements() {
        let c = calc();
        let lt = c.lt(&x(0), &x(1)).unwrap();
        let not = c.not(&lt).unwrap();
        // !(x0 < x1) becomes x0 >= x1, then normalizes to x1 <= x0.
        assert_eq!(not, c.ge(&x(0), &x(1)).unwrap());
    }

    #[test]
    fn gt_normalizes_to_swapped_lt() {
        let c = calc();
        assert_eq!(c.gt(&x(0), &x(1)).unwrap(), c.lt(&x(1), &x(0)).unwrap());
        assert_eq!(c.ge(&x(0), &x(1)).unwrap(), c.le(&x(1), &x(0)).unwrap());
    }

    #[test]
    fn stacked_widenings_collapse() {
        let c = calc();
        let b = Primitive::term(PrimitiveType::Byte, 0);
        let w1 = c.widen(PrimitiveType::Int, &b).unwrap();
        let w2 = c.widen(PrimitiveType::Long, &w1).unwrap();
        match *w2.kind() {
            PrimitiveKind::Widening { ty: PrimitiveType::Long, ref arg } => {
                assert_eq!(*arg, b);
            }
            ref k => panic!("expected a single widening, got {:?}", k),
        }
    }

    #[test]
    fn narrow_of_widen_cancels_on_integral_roundtrip() {
        let c = calc();
        let v = x(0);
        let w = c.widen(PrimitiveType::Long, &v).unwrap();
        assert_eq!(c.narrow(PrimitiveType::Int, &w).unwrap(), v);
    }

    #[test]
    fn rewriting_is_idempotent() {
        let c = calc();
        let e = c
            .add(&c.mul(&x(0), &c.val_int(1)).unwrap(), &c.val_int(0))
            .unwrap();
        let once = c.simplify(&e).unwrap();
        let twice = c.simplify(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, x(0));
    }

    #[test]
    fn sub_self_is_zero_for_integrals() {
        let c = calc();
        let v = x(0);
        assert_eq!(c.sub(&v, &v).unwrap(), c.val_int(0));
        let f = Primitive::term(PrimitiveType::Double, 1);
        // NaN - NaN is NaN, so the float case must not fold.
        assert!(c.sub(&f, &f).unwrap().is_symbolic());
    }
}
