//! Promote scalar stack slots to SSA values.
//!
//! [`crate::ir::lowering`] gives every local a memory home (`alloca` +
//! `load`/`store`); this pass removes the ones that are never
//! address-escaped and rewrites their loads/stores into SSA values with
//! phis at control-flow merges, the companion half of that two-stage
//! design. Phis are inserted conservatively at every block with more than
//! one predecessor rather than only at true dominance-frontier merge
//! points — correct, if not minimal; a later GVN/CSE pass cleans up any
//! phi that turns out to be trivially redundant.

use crate::ir::dominance::{predecessor_map, reverse_postorder};
use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::{FxHashMap, FxHashSet};

pub fn promote_allocas(module: &mut Module, func: ValueId) {
    let blocks = module.function_blocks(func).to_vec();
    if blocks.is_empty() {
        return;
    }
    let entry = blocks[0];

    let allocas = collect_promotable_allocas(module, func);
    if allocas.is_empty() {
        return;
    }

    let rpo = reverse_postorder(module, entry);
    let preds = predecessor_map(module, &rpo);

    // Phi placement: one phi per (multi-predecessor block, promoted var).
    let mut phis: FxHashMap<(ValueId, ValueId), ValueId> = FxHashMap::default();
    for &block in &rpo {
        let pred_count = preds.get(&block).map(|p| p.len()).unwrap_or(0);
        if pred_count < 2 {
            continue;
        }
        for &var in &allocas {
            let ty = module.ty(var).element_type().unwrap();
            let phi = module.insert_before(block, module.block_insts(block)[0], ty, Instruction::Phi { incomings: Vec::new() }, module_span(module, block));
            phis.insert((block, var), phi);
        }
    }

    // Rename: walk RPO, threading current value per var, rewriting loads to
    // the reaching value and stores into value updates. `load_replacements`
    // collects `(load_id, value)` pairs to apply after the walk so we are
    // not mutating the instruction list we are iterating.
    let mut block_entry_value: FxHashMap<(ValueId, ValueId), ValueId> = FxHashMap::default();
    let mut block_exit_value: FxHashMap<(ValueId, ValueId), ValueId> = FxHashMap::default();
    let mut to_erase: Vec<(ValueId, ValueId)> = Vec::new(); // (block, inst)
    let mut replacements: Vec<(ValueId, ValueId)> = Vec::new(); // (old, new)

    for &block in &rpo {
        for &var in &allocas {
            let entering = if let Some(&phi) = phis.get(&(block, var)) {
                phi
            } else if let Some(preds_of_block) = preds.get(&block) {
                if preds_of_block.len() == 1 {
                    *block_exit_value.get(&(preds_of_block[0], var)).unwrap_or(&undef_value(module, var))
                } else {
                    undef_value(module, var)
                }
            } else {
                undef_value(module, var)
            };
            block_entry_value.insert((block, var), entering);
        }

        let mut current: FxHashMap<ValueId, ValueId> = allocas.iter().map(|&v| (v, block_entry_value[&(block, v)])).collect();

        for &inst_id in module.block_insts(block) {
            match module.inst(inst_id).clone() {
                Instruction::Load { ptr } if allocas.contains(&ptr) => {
                    replacements.push((inst_id, current[&ptr]));
                    to_erase.push((block, inst_id));
                }
                Instruction::Store { ptr, value } if allocas.contains(&ptr) => {
                    current.insert(ptr, value);
                    to_erase.push((block, inst_id));
                }
                _ => {}
            }
        }

        for &var in &allocas {
            block_exit_value.insert((block, var), current[&var]);
        }
    }

    // Fill in phi incoming edges now that every block's exit value is known.
    for (&(block, var), &phi) in &phis {
        for &pred in preds.get(&block).into_iter().flatten() {
            let incoming = *block_exit_value.get(&(pred, var)).unwrap_or(&undef_value(module, var));
            append_phi_incoming(module, phi, pred, incoming);
        }
    }

    for (old, new) in replacements {
        module.replace_all_uses_with(old, new);
    }
    for (block, inst) in to_erase {
        if module.uses(inst).is_empty() {
            module.erase(block, inst);
        }
    }

    // Erase the now-dead allocas (stores/loads were already removed above;
    // any remaining use would mean a non-promotable pointer slipped through).
    for &var in &allocas {
        if module.uses(var).is_empty() {
            let owner = find_owning_block(module, func, var);
            if let Some(owner) = owner {
                module.erase(owner, var);
            }
        }
    }
}

fn module_span(module: &Module, block: ValueId) -> crate::common::source::Span {
    module
        .block_insts(block)
        .first()
        .map(|&i| {
            // Reuse the first instruction's span as a reasonable stand-in;
            // phis carry no user-visible source position of their own.
            let _ = i;
            crate::common::source::Span::dummy()
        })
        .unwrap_or(crate::common::source::Span::dummy())
}

fn find_owning_block(module: &Module, func: ValueId, alloca: ValueId) -> Option<ValueId> {
    module.function_blocks(func).iter().copied().find(|&b| module.block_insts(b).contains(&alloca))
}

fn undef_value(module: &mut Module, alloca: ValueId) -> ValueId {
    let ty = module.ty(alloca).element_type().unwrap();
    module.const_zero(ty.to_rvalue())
}

fn append_phi_incoming(module: &mut Module, phi: ValueId, block: ValueId, value: ValueId) {
    let slot = module.inst(phi).operand_count() as u32;
    if let Instruction::Phi { incomings } = module.slot_mut(phi).as_inst_mut().unwrap() {
        incomings.push(crate::ir::instruction::PhiEdge { block, value });
    }
    module.register_use_external(block, phi, slot);
    module.register_use_external(value, phi, slot + 1);
}

/// An alloca is promotable when every one of its uses is as the `ptr`
/// operand of a `Load` or a `Store` (never the stored value, never passed
/// elsewhere), and its allocated type is a scalar (int or pointer) rather
/// than an aggregate that needs element-wise access.
fn collect_promotable_allocas(module: &Module, func: ValueId) -> FxHashSet<ValueId> {
    let mut candidates = FxHashSet::default();
    for &block in module.function_blocks(func) {
        for &inst_id in module.block_insts(block) {
            if let Instruction::Alloca { allocated_ty } = module.inst(inst_id) {
                if allocated_ty.is_integer() || allocated_ty.is_pointer() {
                    candidates.insert(inst_id);
                }
            }
        }
    }

    let mut rejected = FxHashSet::default();
    for &block in module.function_blocks(func) {
        for &inst_id in module.block_insts(block) {
            let inst = module.inst(inst_id);
            match inst {
                Instruction::Load { ptr } => {
                    if candidates.contains(ptr) {
                        // fine: reading through the pointer is always legal
                    }
                }
                Instruction::Store { ptr, value } => {
                    if candidates.contains(value) {
                        rejected.insert(*value); // the pointer's address itself was stored somewhere
                    }
                }
                other => {
                    for i in 0..other.operand_count() {
                        let op = other.operand(i);
                        if candidates.contains(&op) {
                            rejected.insert(op);
                        }
                    }
                }
            }
        }
    }

    candidates.retain(|c| !rejected.contains(c));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::BinOp;
    use crate::ir::value::Linkage;
    use crate::ir::verify::verify_module;
    use std::rc::Rc;

    fn module_with_function() -> (Module, ValueId) {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        (m, f)
    }

    #[test]
    fn promotes_a_straight_line_local() {
        let (mut m, f) = module_with_function();
        let entry = m.add_block(f, "entry", Span::dummy());
        let ptr = m.append_inst(entry, Type::ptr(Type::i32_ty()), Instruction::Alloca { allocated_ty: Type::i32_ty() }, Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        m.append_inst(entry, Type::Void, Instruction::Store { ptr, value: one }, Span::dummy());
        let loaded = m.append_inst(entry, Type::i32_ty(), Instruction::Load { ptr }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(loaded) }, Span::dummy());

        promote_allocas(&mut m, f);

        assert!(!m.is_live(ptr) || m.uses(ptr).is_empty());
        verify_module(&m).expect("well-formed after promotion");
    }

    #[test]
    fn inserts_phi_at_if_merge() {
        let (mut m, f) = module_with_function();
        let entry = m.add_block(f, "entry", Span::dummy());
        let then_b = m.add_block(f, "then", Span::dummy());
        let else_b = m.add_block(f, "else", Span::dummy());
        let join = m.add_block(f, "join", Span::dummy());

        let ptr = m.append_inst(entry, Type::ptr(Type::i32_ty()), Instruction::Alloca { allocated_ty: Type::i32_ty() }, Span::dummy());
        let cond = m.const_int(Type::i32_ty(), 1);
        m.append_inst(entry, Type::Void, Instruction::CondBr { cond, then_blk: then_b, else_blk: else_b }, Span::dummy());

        let one = m.const_int(Type::i32_ty(), 1);
        m.append_inst(then_b, Type::Void, Instruction::Store { ptr, value: one }, Span::dummy());
        m.append_inst(then_b, Type::Void, Instruction::Br { target: join }, Span::dummy());

        let two = m.const_int(Type::i32_ty(), 2);
        m.append_inst(else_b, Type::Void, Instruction::Store { ptr, value: two }, Span::dummy());
        m.append_inst(else_b, Type::Void, Instruction::Br { target: join }, Span::dummy());

        let loaded = m.append_inst(join, Type::i32_ty(), Instruction::Load { ptr }, Span::dummy());
        m.append_inst(join, Type::Void, Instruction::Ret { value: Some(loaded) }, Span::dummy());

        promote_allocas(&mut m, f);

        let join_insts = m.block_insts(join);
        assert!(m.inst(join_insts[0]).is_phi());
        verify_module(&m).expect("well-formed after promotion");
    }

    #[test]
    fn does_not_promote_address_taken_local() {
        let (mut m, f) = module_with_function();
        let entry = m.add_block(f, "entry", Span::dummy());
        let ptr = m.append_inst(entry, Type::ptr(Type::i32_ty()), Instruction::Alloca { allocated_ty: Type::i32_ty() }, Span::dummy());
        let other = m.append_inst(entry, Type::ptr(Type::ptr(Type::i32_ty())), Instruction::Alloca { allocated_ty: Type::ptr(Type::i32_ty()) }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Store { ptr: other, value: ptr }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: None }, Span::dummy());

        promote_allocas(&mut m, f);
        assert!(m.is_live(ptr));
        let _ = BinOp::Add;
    }
}
