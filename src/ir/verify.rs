//! The IR verifier: checks the Quantified Invariants of spec §8 hold before
//! and after each pass runs in debug builds, and once more before codegen.
//! A violation here means the compiler has a bug — it is reported as
//! [`CompileError::IrInvariantViolation`], never as a `SourceError`.

use crate::common::error::CompileError;
use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::FxHashSet;

pub fn verify_module(module: &Module) -> Result<(), CompileError> {
    for func in module.functions() {
        verify_function(module, func)?;
    }
    Ok(())
}

fn verify_function(module: &Module, func: ValueId) -> Result<(), CompileError> {
    let blocks = module.function_blocks(func);
    if blocks.is_empty() {
        return Ok(()); // a declaration without a body
    }

    let block_set: FxHashSet<ValueId> = blocks.iter().copied().collect();

    for &block in blocks {
        let insts = module.block_insts(block);

        // Exactly one terminator, and it must be the last instruction.
        let terminator_positions: Vec<usize> = insts.iter().enumerate().filter(|(_, &i)| module.inst(i).is_terminator()).map(|(i, _)| i).collect();
        if terminator_positions.len() != 1 {
            return Err(CompileError::IrInvariantViolation(format!(
                "block {} has {} terminators, expected exactly 1",
                block,
                terminator_positions.len()
            )));
        }
        if terminator_positions[0] != insts.len() - 1 {
            return Err(CompileError::IrInvariantViolation(format!("block {} has a non-terminal terminator", block)));
        }

        // Phis, if present, occupy a contiguous prefix of the block.
        let mut seen_non_phi = false;
        for &inst_id in insts {
            let is_phi = module.inst(inst_id).is_phi();
            if is_phi && seen_non_phi {
                return Err(CompileError::IrInvariantViolation(format!("phi {} does not appear in the block's leading phi run", inst_id)));
            }
            if !is_phi {
                seen_non_phi = true;
            }
        }

        // Branch targets name real blocks of this function.
        for target in module.block_successors(block) {
            if !block_set.contains(&target) {
                return Err(CompileError::IrInvariantViolation(format!("block {} branches to {}, outside its function", block, target)));
            }
        }

        // Every operand of every instruction resolves to a live value.
        for &inst_id in insts {
            let inst = module.inst(inst_id);
            for i in 0..inst.operand_count() {
                let op = inst.operand(i);
                if !module.is_live(op) {
                    return Err(CompileError::IrInvariantViolation(format!("instruction {} references erased value {}", inst_id, op)));
                }
            }
        }
    }

    verify_use_lists_exact(module, func)?;
    verify_dominance(module, func)?;

    Ok(())
}

/// "Use-lists are exact": for every operand slot `user[i] == v`, `v.uses()`
/// contains exactly one `Use { user, slot: i }`, and vice versa.
fn verify_use_lists_exact(module: &Module, func: ValueId) -> Result<(), CompileError> {
    for &block in module.function_blocks(func) {
        for &inst_id in module.block_insts(block) {
            let inst = module.inst(inst_id);
            for i in 0..inst.operand_count() {
                let target = inst.operand(i);
                let found = module.uses(target).iter().any(|u| u.user == inst_id && u.slot == i as u32);
                if !found {
                    return Err(CompileError::IrInvariantViolation(format!(
                        "missing use edge: {} operand {} names {} but {} has no matching Use",
                        inst_id, i, target, target
                    )));
                }
            }
        }
    }
    Ok(())
}

/// "A use must be dominated by its definition, except for phi operands,
/// which only need the def to dominate the named predecessor block" (§3.2).
fn verify_dominance(module: &Module, func: ValueId) -> Result<(), CompileError> {
    let dom = module.dom_tree(func);
    for &block in module.function_blocks(func) {
        for &inst_id in module.block_insts(block) {
            let inst = module.inst(inst_id);
            if let Instruction::Phi { incomings } = inst {
                for edge in incomings {
                    if !dom.dominates_value(module, edge.value, edge.block) && !module.is_block(edge.value) {
                        return Err(CompileError::IrInvariantViolation(format!(
                            "phi {} operand {} is not available at the end of predecessor {}",
                            inst_id, edge.value, edge.block
                        )));
                    }
                }
            } else {
                for i in 0..inst.operand_count() {
                    let op = inst.operand(i);
                    if module.is_block(op) {
                        continue; // a branch target, not a dominance-checked def
                    }
                    if !dom.dominates_value(module, op, inst_id) {
                        return Err(CompileError::IrInvariantViolation(format!("{} uses {} without being dominated by its definition", inst_id, op)));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::BinOp;
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn simple_function() -> (Module, ValueId, ValueId) {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        (m, f, entry)
    }

    #[test]
    fn well_formed_function_verifies() {
        let (mut m, f, entry) = simple_function();
        let a = m.const_int(Type::i32_ty(), 1);
        let b = m.const_int(Type::i32_ty(), 2);
        let sum = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: a, rhs: b }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());
        assert!(verify_function(&m, f).is_ok());
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let (mut m, f, entry) = simple_function();
        let a = m.const_int(Type::i32_ty(), 1);
        m.append_inst(entry, Type::i32_ty(), Instruction::Unary { op: crate::ir::instruction::UnOp::Neg, operand: a }, Span::dummy());
        assert!(verify_function(&m, f).is_err());
    }

    #[test]
    fn branch_to_foreign_block_is_rejected() {
        let (mut m, f, entry) = simple_function();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::Void) }));
        let other_f = m.add_function("g", fty, Linkage::Internal, Span::dummy());
        let foreign_block = m.add_block(other_f, "entry", Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Br { target: foreign_block }, Span::dummy());
        assert!(verify_function(&m, f).is_err());
    }
}
