//! Compile-time constant evaluation of AST nodes.
//!
//! Named as an external collaborator in spec §1 ("compile-time constant
//! evaluation of AST nodes"), described only at its interface: lowering
//! calls [`eval_const_int`] for global initializers and for constant-index
//! bounds checking, and otherwise treats this module as opaque.

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::frontend::ast::{BinOp, Expr, UnOp};

/// Evaluate `expr` as a compile-time integer constant, or `None` if it is
/// not a constant expression (e.g. it reads a non-constant variable).
pub fn eval_const_int(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::IntLit { value, .. } => Some(*value),
        Expr::Unary { op, operand, .. } => {
            let v = eval_const_int(operand)?;
            Some(match op {
                UnOp::Neg => v.wrapping_neg(),
                UnOp::Not => (v == 0) as i64,
                UnOp::BitNot => !v,
                UnOp::AddrOf | UnOp::Deref => return None,
            })
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let a = eval_const_int(lhs)?;
            let b = eval_const_int(rhs)?;
            Some(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_div(b)
                }
                BinOp::Rem => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_rem(b)
                }
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Shl => a.wrapping_shl(b as u32),
                BinOp::Shr => a.wrapping_shr(b as u32),
                BinOp::Eq => (a == b) as i64,
                BinOp::Ne => (a != b) as i64,
                BinOp::Lt => (a < b) as i64,
                BinOp::Le => (a <= b) as i64,
                BinOp::Gt => (a > b) as i64,
                BinOp::Ge => (a >= b) as i64,
                BinOp::LogAnd => ((a != 0) && (b != 0)) as i64,
                BinOp::LogOr => ((a != 0) || (b != 0)) as i64,
            })
        }
        Expr::Cast { operand, .. } => eval_const_int(operand),
        _ => None,
    }
}

/// Spec §8 boundary behavior: "Array index folding at exactly `len`:
/// warning 'subscript out of bounds'; compilation continues." Checks a
/// constant index against a known array length and, if it is out of range,
/// emits a warning without preventing lowering from proceeding.
pub fn check_const_index_bounds(index: &Expr, len: usize, diags: &mut DiagnosticEngine) {
    if let Some(i) = eval_const_int(index) {
        if i < 0 || i as usize >= len {
            diags.emit(Diagnostic::warning(
                format!("subscript out of bounds: index {} in array of length {}", i, len),
                index.span(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;

    fn lit(v: i64) -> Expr {
        Expr::IntLit { value: v, ty: crate::common::types::Type::i32_ty(), span: Span::dummy() }
    }

    #[test]
    fn evaluates_arithmetic() {
        let e = Expr::Binary { op: BinOp::Add, lhs: Box::new(lit(2)), rhs: Box::new(lit(3)), span: Span::dummy() };
        assert_eq!(eval_const_int(&e), Some(5));
    }

    #[test]
    fn division_by_zero_is_not_a_constant() {
        let e = Expr::Binary { op: BinOp::Div, lhs: Box::new(lit(1)), rhs: Box::new(lit(0)), span: Span::dummy() };
        assert_eq!(eval_const_int(&e), None);
    }

    #[test]
    fn warns_on_index_exactly_at_len() {
        let mut diags = DiagnosticEngine::new();
        check_const_index_bounds(&lit(4), 4, &mut diags);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.error_count(), 0);
    }

    #[test]
    fn in_bounds_index_is_silent() {
        let mut diags = DiagnosticEngine::new();
        check_const_index_bounds(&lit(3), 4, &mut diags);
        assert_eq!(diags.warning_count(), 0);
    }
}
