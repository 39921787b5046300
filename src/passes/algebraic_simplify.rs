//! Algebraic simplification (spec §4.4): identity and self-operand rewrites
//! that don't need constant-folding's full evaluation. Runs after
//! `constant-fold` so operands that folded to literals are already gone.
//!
//! Identity table: `x+0`/`0+x` -> x, `x-0` -> x, `x*1`/`1*x` -> x,
//! `x*0`/`0*x` -> 0, `x/1` -> x, `x/x` -> 1 (x a nonzero constant), `x-x` -> 0,
//! `x&x`/`x|x` -> x, `x^x` -> 0, `x<<0`/`x>>0` -> x, and signed division by a
//! power of two constant `2^k` becomes an arithmetic shift right by `k`.

use crate::ir::instruction::{BinOp, Instruction};
use crate::ir::module::Module;
use crate::ir::value::ValueId;

pub fn run_block(module: &mut Module, _func: ValueId, block: ValueId) -> bool {
    let mut changed = false;
    loop {
        let mut rewritten = false;
        for &inst_id in module.block_insts(block).to_vec().iter() {
            if !module.is_live(inst_id) {
                continue;
            }
            if let Some(replacement) = try_simplify(module, inst_id) {
                module.replace_all_uses_with(inst_id, replacement);
                if !module.has_uses(inst_id) && module.is_live(inst_id) {
                    module.erase(block, inst_id);
                }
                rewritten = true;
                changed = true;
            }
        }
        if !rewritten {
            break;
        }
    }
    changed
}

fn try_simplify(module: &mut Module, inst_id: ValueId) -> Option<ValueId> {
    let (op, lhs, rhs) = match module.inst(inst_id) {
        Instruction::Binary { op, lhs, rhs } => (*op, *lhs, *rhs),
        _ => return None,
    };
    let lhs_zero = is_const_zero(module, lhs);
    let rhs_zero = is_const_zero(module, rhs);
    let rhs_one = module.const_int_value(rhs) == Some(1);
    let lhs_one = module.const_int_value(lhs) == Some(1);
    let same_operand = lhs == rhs;

    match op {
        BinOp::Add if lhs_zero => Some(rhs),
        BinOp::Add if rhs_zero => Some(lhs),
        BinOp::Sub if rhs_zero => Some(lhs),
        BinOp::Sub if same_operand => Some(module.const_int(module.ty(lhs).clone(), 0)),
        BinOp::Mul if rhs_one => Some(lhs),
        BinOp::Mul if lhs_one => Some(rhs),
        BinOp::Mul if lhs_zero || rhs_zero => Some(module.const_int(module.ty(lhs).clone(), 0)),
        BinOp::SDiv | BinOp::UDiv if rhs_one => Some(lhs),
        BinOp::SDiv | BinOp::UDiv if same_operand && !is_maybe_zero(module, lhs) => Some(module.const_int(module.ty(lhs).clone(), 1)),
        BinOp::SDiv => power_of_two_shift(module, inst_id, lhs, rhs),
        BinOp::And if same_operand => Some(lhs),
        BinOp::Or if same_operand => Some(lhs),
        BinOp::Xor if same_operand => Some(module.const_int(module.ty(lhs).clone(), 0)),
        BinOp::Shl | BinOp::AShr | BinOp::LShr if rhs_zero => Some(lhs),
        _ => None,
    }
}

fn is_const_zero(module: &Module, id: ValueId) -> bool {
    module.const_int_value(id) == Some(0)
}

fn is_maybe_zero(module: &Module, id: ValueId) -> bool {
    match module.const_int_value(id) {
        Some(v) => v == 0,
        None => true,
    }
}

/// `x / 2^k` (signed, k constant and > 0) becomes `x >>a k`. Only applies
/// when the divisor is a known power of two; anything else is left for
/// `constant-fold` or the backend's own division lowering.
fn power_of_two_shift(module: &mut Module, inst_id: ValueId, lhs: ValueId, rhs: ValueId) -> Option<ValueId> {
    let divisor = module.const_int_value(rhs)?;
    if divisor <= 0 || divisor & (divisor - 1) != 0 {
        return None;
    }
    let shift_amount = divisor.trailing_zeros() as i64;
    let ty = module.ty(lhs).clone();
    let shift_const = module.const_int(ty.clone(), shift_amount);
    let block = find_owning_block(module, inst_id);
    Some(module.insert_before(block, inst_id, ty, Instruction::Binary { op: BinOp::AShr, lhs, rhs: shift_const }, crate::common::source::Span::dummy()))
}

fn find_owning_block(module: &Module, inst_id: ValueId) -> ValueId {
    for func in module.functions() {
        for &block in module.function_blocks(func) {
            if module.block_insts(block).contains(&inst_id) {
                return block;
            }
        }
    }
    panic!("instruction not found in any block")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_function(m: &mut Module) -> (ValueId, ValueId) {
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (f, b)
    }

    #[test]
    fn simplifies_add_zero() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let zero = m.const_int(Type::i32_ty(), 0);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: zero }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(add) }, Span::dummy());
        assert!(run_block(&mut m, f, b));
        assert!(!m.is_live(add));
    }

    #[test]
    fn simplifies_mul_by_zero_to_zero_not_lhs() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let zero = m.const_int(Type::i32_ty(), 0);
        let mul = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Mul, lhs: p, rhs: zero }, Span::dummy());
        let ret = m.append_inst(b, Type::Void, Instruction::Ret { value: Some(mul) }, Span::dummy());
        run_block(&mut m, f, b);
        let value = match m.inst(ret) {
            Instruction::Ret { value } => value.unwrap(),
            _ => unreachable!(),
        };
        assert_eq!(m.const_int_value(value), Some(0));
    }

    #[test]
    fn rewrites_signed_division_by_power_of_two_as_shift() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let four = m.const_int(Type::i32_ty(), 4);
        let div = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::SDiv, lhs: p, rhs: four }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(div) }, Span::dummy());
        assert!(run_block(&mut m, f, b));
        assert!(!m.is_live(div));
        let shift = *m.block_insts(b).iter().find(|&&i| matches!(m.inst(i), Instruction::Binary { op: BinOp::AShr, .. })).unwrap();
        match m.inst(shift) {
            Instruction::Binary { op: BinOp::AShr, rhs, .. } => assert_eq!(m.const_int_value(*rhs), Some(2)),
            _ => unreachable!(),
        }
    }
}
