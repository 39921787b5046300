//! Constant folding (spec §4.4): binary/unary/cast instructions whose
//! operands are all constants fold to the literal result. Integer overflow
//! wraps two's-complement per the destination width; division/modulo by a
//! constant zero is left in place with a warning rather than folded, so the
//! runtime trap (or UB) behaves exactly as the source wrote it.

use crate::common::types::{IntWidth, Type};
use crate::ir::instruction::{BinOp, CastKind, Instruction, UnOp};
use crate::ir::module::Module;
use crate::ir::value::ValueId;

pub fn run_block(module: &mut Module, _func: ValueId, block: ValueId) -> bool {
    let mut changed = false;
    for &inst_id in module.block_insts(block).to_vec().iter() {
        if !module.is_live(inst_id) {
            continue;
        }
        if let Some(folded) = try_fold(module, inst_id) {
            module.replace_all_uses_with(inst_id, folded);
            if module.uses(inst_id).is_empty() && module.is_live(inst_id) {
                module.erase(block, inst_id);
            }
            changed = true;
        }
    }
    changed
}

fn try_fold(module: &mut Module, inst_id: ValueId) -> Option<ValueId> {
    let inst = module.inst(inst_id).clone();
    match inst {
        Instruction::Binary { op, lhs, rhs } => fold_binary(module, op, lhs, rhs),
        Instruction::Unary { op, operand } => fold_unary(module, op, operand),
        Instruction::Cast { kind, operand } => fold_cast(module, inst_id, kind, operand),
        _ => None,
    }
}

fn int_width_signed(ty: &Type) -> Option<(IntWidth, bool)> {
    match ty {
        Type::Int(w, s) => Some((*w, *s)),
        Type::RightValue(t) | Type::Const(t) => int_width_signed(t),
        _ => None,
    }
}

fn wrap(value: i64, width: IntWidth, signed: bool) -> i64 {
    let bits = width.bits();
    let mask: i64 = if bits >= 64 { -1 } else { (1i64 << bits) - 1 };
    let v = value & mask;
    if signed && v & (1i64 << (bits - 1)) != 0 {
        v - (1i64 << bits)
    } else {
        v
    }
}

fn fold_binary(module: &mut Module, op: BinOp, lhs: ValueId, rhs: ValueId) -> Option<ValueId> {
    let l = module.const_int_value(lhs)?;
    let r = module.const_int_value(rhs)?;
    let ty = module.ty(lhs).clone();
    let (width, signed) = int_width_signed(&ty).unwrap_or((IntWidth::W32, true));

    let result = match op {
        BinOp::Add => wrap(l.wrapping_add(r), width, signed),
        BinOp::Sub => wrap(l.wrapping_sub(r), width, signed),
        BinOp::Mul => wrap(l.wrapping_mul(r), width, signed),
        BinOp::SDiv => {
            if r == 0 {
                log::warn!("division by constant zero left unfolded");
                return None;
            }
            wrap(l.wrapping_div(r), width, signed)
        }
        BinOp::UDiv => {
            if r == 0 {
                log::warn!("division by constant zero left unfolded");
                return None;
            }
            wrap((l as u64 / r as u64) as i64, width, signed)
        }
        BinOp::SRem => {
            if r == 0 {
                log::warn!("modulo by constant zero left unfolded");
                return None;
            }
            wrap(l.wrapping_rem(r), width, signed)
        }
        BinOp::URem => {
            if r == 0 {
                log::warn!("modulo by constant zero left unfolded");
                return None;
            }
            wrap((l as u64 % r as u64) as i64, width, signed)
        }
        BinOp::And => wrap(l & r, width, signed),
        BinOp::Or => wrap(l | r, width, signed),
        BinOp::Xor => wrap(l ^ r, width, signed),
        BinOp::Shl => wrap(l.wrapping_shl(r as u32 % width.bits()), width, signed),
        BinOp::AShr => wrap(l.wrapping_shr(r as u32 % width.bits()), width, signed),
        BinOp::LShr => wrap(((l as u64) >> (r as u64 % width.bits() as u64)) as i64, width, signed),
        BinOp::ICmpEq => (l == r) as i64,
        BinOp::ICmpNe => (l != r) as i64,
        BinOp::ICmpSlt => (l < r) as i64,
        BinOp::ICmpSle => (l <= r) as i64,
        BinOp::ICmpSgt => (l > r) as i64,
        BinOp::ICmpSge => (l >= r) as i64,
        BinOp::ICmpUlt => ((l as u64) < (r as u64)) as i64,
        BinOp::ICmpUle => ((l as u64) <= (r as u64)) as i64,
        BinOp::ICmpUgt => ((l as u64) > (r as u64)) as i64,
        BinOp::ICmpUge => ((l as u64) >= (r as u64)) as i64,
    };
    let result_ty = if op.is_comparison() { Type::i32_ty() } else { ty };
    Some(module.const_int(result_ty, result))
}

fn fold_unary(module: &mut Module, op: UnOp, operand: ValueId) -> Option<ValueId> {
    let v = module.const_int_value(operand)?;
    let ty = module.ty(operand).clone();
    let (width, signed) = int_width_signed(&ty).unwrap_or((IntWidth::W32, true));
    let result = match op {
        UnOp::Neg => wrap(v.wrapping_neg(), width, signed),
        UnOp::Not => wrap(!v, width, signed),
    };
    Some(module.const_int(ty, result))
}

fn fold_cast(module: &mut Module, inst_id: ValueId, kind: CastKind, operand: ValueId) -> Option<ValueId> {
    if !matches!(kind, CastKind::Trunc | CastKind::ZExt | CastKind::SExt) {
        return None;
    }
    let v = module.const_int_value(operand)?;
    let result_ty = module.ty(inst_id).clone();
    let (width, signed) = int_width_signed(&result_ty).unwrap_or((IntWidth::W32, true));
    Some(module.const_int(result_ty, wrap(v, width, signed)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::Instruction;
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_function(m: &mut Module) -> (ValueId, ValueId) {
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (f, b)
    }

    #[test]
    fn folds_constant_addition() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let a = m.const_int(Type::i32_ty(), 2);
        let c = m.const_int(Type::i32_ty(), 3);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: a, rhs: c }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(add) }, Span::dummy());
        assert!(run_block(&mut m, f, b));
        let ret = module_ret_value(&m, b);
        assert_eq!(m.const_int_value(ret), Some(5));
    }

    #[test]
    fn leaves_division_by_zero_unfolded() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let a = m.const_int(Type::i32_ty(), 10);
        let zero = m.const_int(Type::i32_ty(), 0);
        let div = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::SDiv, lhs: a, rhs: zero }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(div) }, Span::dummy());
        assert!(!run_block(&mut m, f, b));
        assert!(m.is_live(div));
    }

    #[test]
    fn wraps_signed_overflow() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let max = m.const_int(Type::i32_ty(), i32::MAX as i64);
        let one = m.const_int(Type::i32_ty(), 1);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: max, rhs: one }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(add) }, Span::dummy());
        run_block(&mut m, f, b);
        let ret = module_ret_value(&m, b);
        assert_eq!(m.const_int_value(ret), Some(i32::MIN as i64));
    }

    fn module_ret_value(m: &Module, block: ValueId) -> ValueId {
        let last = *m.block_insts(block).last().unwrap();
        match m.inst(last) {
            Instruction::Ret { value } => value.unwrap(),
            _ => panic!("expected ret"),
        }
    }
}
