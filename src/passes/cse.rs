//! Common subexpression elimination (spec §4.4): within one block, a pure
//! instruction with the same opcode and operands as an earlier instruction
//! is replaced by that earlier instruction. No cross-block value numbering —
//! `cfg-simplify` and `mem2reg` already collapse the control flow that would
//! make a cross-block version pay for itself.

use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::FxHashMap;

pub fn run_block(module: &mut Module, _func: ValueId, block: ValueId) -> bool {
    let mut changed = false;
    let mut seen: FxHashMap<Key, ValueId> = FxHashMap::default();
    for &inst_id in module.block_insts(block).to_vec().iter() {
        if !module.is_live(inst_id) {
            continue;
        }
        let inst = module.inst(inst_id).clone();
        if !is_cse_candidate(&inst) {
            continue;
        }
        let key = Key::new(&inst);
        if let Some(&earlier) = seen.get(&key) {
            module.replace_all_uses_with(inst_id, earlier);
            if !module.has_uses(inst_id) {
                module.erase(block, inst_id);
            }
            changed = true;
        } else {
            seen.insert(key, inst_id);
        }
    }
    changed
}

/// Anything without side effects and without memory/control dependence can
/// be deduplicated purely by operand identity; loads, calls, and allocas
/// are excluded since an intervening store could change what they observe.
fn is_cse_candidate(inst: &Instruction) -> bool {
    matches!(inst, Instruction::Binary { .. } | Instruction::Unary { .. } | Instruction::Cast { .. } | Instruction::Gep { .. })
}

#[derive(PartialEq, Eq, Hash)]
enum Key {
    Binary(&'static str, ValueId, ValueId),
    Unary(&'static str, ValueId),
    Cast(&'static str, ValueId),
    Gep(ValueId, Vec<ValueId>),
}

impl Key {
    fn new(inst: &Instruction) -> Key {
        match inst {
            Instruction::Binary { op, lhs, rhs } => {
                let (lhs, rhs) = if op.is_commutative() && *rhs < *lhs { (*rhs, *lhs) } else { (*lhs, *rhs) };
                Key::Binary(op.mnemonic(), lhs, rhs)
            }
            Instruction::Unary { op, operand } => Key::Unary(unop_name(*op), *operand),
            Instruction::Cast { kind, operand } => Key::Cast(cast_name(*kind), *operand),
            Instruction::Gep { base, indices } => Key::Gep(*base, indices.clone()),
            _ => unreachable!("filtered by is_cse_candidate"),
        }
    }
}

fn unop_name(op: crate::ir::instruction::UnOp) -> &'static str {
    match op {
        crate::ir::instruction::UnOp::Neg => "neg",
        crate::ir::instruction::UnOp::Not => "not",
    }
}

fn cast_name(kind: crate::ir::instruction::CastKind) -> &'static str {
    use crate::ir::instruction::CastKind;
    match kind {
        CastKind::Trunc => "trunc",
        CastKind::ZExt => "zext",
        CastKind::SExt => "sext",
        CastKind::PtrToInt => "ptrtoint",
        CastKind::IntToPtr => "inttoptr",
        CastKind::Bitcast => "bitcast",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::BinOp;
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_function(m: &mut Module) -> (ValueId, ValueId) {
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (f, b)
    }

    #[test]
    fn eliminates_duplicate_binary_expression() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let a = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: one }, Span::dummy());
        let dup = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: one }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(dup) }, Span::dummy());
        assert!(run_block(&mut m, f, b));
        assert!(!m.is_live(dup));
        assert!(m.is_live(a));
    }

    #[test]
    fn treats_commutative_operands_as_equal_either_order() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let a = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: one }, Span::dummy());
        let dup = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: one, rhs: p }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(dup) }, Span::dummy());
        assert!(run_block(&mut m, f, b));
        assert!(!m.is_live(dup));
        assert!(m.is_live(a));
    }

    #[test]
    fn does_not_deduplicate_loads() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let ptr = m.append_inst(b, Type::ptr(Type::i32_ty()), Instruction::Alloca { allocated_ty: Type::i32_ty() }, Span::dummy());
        let l1 = m.append_inst(b, Type::i32_ty(), Instruction::Load { ptr }, Span::dummy());
        let l2 = m.append_inst(b, Type::i32_ty(), Instruction::Load { ptr }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(l2) }, Span::dummy());
        run_block(&mut m, f, b);
        assert!(m.is_live(l1));
        assert!(m.is_live(l2));
    }
}
