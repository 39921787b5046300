//! Control-flow simplification (spec §4.4): fold conditional branches whose
//! arms agree or whose condition is constant, thread jumps through empty
//! forwarding blocks, and remove blocks no longer reachable from the entry.
//! Runs to a local fixpoint per function, bounded the same way the pass
//! manager's own fixpoint loop is.

use crate::common::source::Span;
use crate::common::types::Type;
use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::FxHashSet;

const MAX_ITERATIONS: u32 = 32;

pub fn run_function(module: &mut Module, func: ValueId) -> bool {
    let mut changed_overall = false;
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        changed |= fold_redundant_cond_branches(module, func);
        changed |= thread_jump_chains(module, func);
        changed |= remove_dead_blocks(module, func);
        changed_overall |= changed;
        if !changed {
            break;
        }
    }
    changed_overall
}

fn fold_redundant_cond_branches(module: &mut Module, func: ValueId) -> bool {
    let mut changed = false;
    for block in module.function_blocks(func).to_vec() {
        let term = match module.block_terminator(block) {
            Some(t) => t,
            None => continue,
        };
        let (cond, then_blk, else_blk) = match module.inst(term) {
            Instruction::CondBr { cond, then_blk, else_blk } => (*cond, *then_blk, *else_blk),
            _ => continue,
        };
        if then_blk == else_blk {
            replace_terminator(module, block, term, Instruction::Br { target: then_blk });
            changed = true;
            continue;
        }
        if let Some(c) = module.const_int_value(cond) {
            let (keep, drop) = if c != 0 { (then_blk, else_blk) } else { (else_blk, then_blk) };
            replace_terminator(module, block, term, Instruction::Br { target: keep });
            module.remove_incoming_edge(drop, block);
            changed = true;
        }
    }
    changed
}

fn replace_terminator(module: &mut Module, block: ValueId, old_term: ValueId, new_inst: Instruction) {
    let new_id = module.insert_before(block, old_term, Type::Void, new_inst, Span::dummy());
    module.replace_all_uses_with(old_term, new_id);
    module.erase(block, old_term);
}

/// Redirects a block's sole predecessor straight to its branch target when
/// the block itself is nothing but that one `br`. Limited to single
/// -predecessor forwarding blocks: merging a multi-predecessor forwarding
/// block would require splitting one phi incoming edge into several, which
/// dead-block removal below makes unnecessary in practice.
fn thread_jump_chains(module: &mut Module, func: ValueId) -> bool {
    let mut changed = false;
    let entry = module.function_entry(func);
    for block in module.function_blocks(func).to_vec() {
        if Some(block) == entry {
            continue;
        }
        let insts = module.block_insts(block);
        if insts.len() != 1 {
            continue;
        }
        let target = match module.inst(insts[0]) {
            Instruction::Br { target } => *target,
            _ => continue,
        };
        if target == block {
            continue;
        }
        let preds = predecessors_of(module, func, block);
        if preds.len() != 1 {
            continue;
        }
        let pred = preds[0];
        redirect_branch(module, pred, block, target);
        rename_phi_incoming_block(module, target, block, pred);
        changed = true;
    }
    changed
}

fn predecessors_of(module: &Module, func: ValueId, block: ValueId) -> Vec<ValueId> {
    module.function_blocks(func).iter().copied().filter(|&b| module.block_successors(b).contains(&block)).collect()
}

fn redirect_branch(module: &mut Module, pred: ValueId, old: ValueId, new: ValueId) {
    let term = module.block_terminator(pred).expect("predecessor must end in a terminator");
    enum Action {
        Br,
        CondBr { then_matches: bool, else_matches: bool },
        None,
    }
    let action = match module.inst(term) {
        Instruction::Br { target } if *target == old => Action::Br,
        Instruction::CondBr { then_blk, else_blk, .. } => Action::CondBr {
            then_matches: *then_blk == old,
            else_matches: *else_blk == old,
        },
        _ => Action::None,
    };
    match action {
        Action::Br => module.set_operand(term, 0, new),
        Action::CondBr { then_matches, else_matches } => {
            if then_matches {
                module.set_operand(term, 1, new);
            }
            if else_matches {
                module.set_operand(term, 2, new);
            }
        }
        Action::None => {}
    }
}

fn rename_phi_incoming_block(module: &mut Module, block: ValueId, old: ValueId, new: ValueId) {
    for &inst in module.block_insts(block).to_vec().iter() {
        if !module.inst(inst).is_phi() {
            break;
        }
        let incomings = match module.inst(inst) {
            Instruction::Phi { incomings } => incomings.clone(),
            _ => continue,
        };
        for (idx, edge) in incomings.iter().enumerate() {
            if edge.block == old {
                module.set_operand(inst, idx * 2, new);
            }
        }
    }
}

fn remove_dead_blocks(module: &mut Module, func: ValueId) -> bool {
    let blocks = module.function_blocks(func).to_vec();
    let entry = match module.function_entry(func) {
        Some(e) => e,
        None => return false,
    };
    let mut reachable: FxHashSet<ValueId> = FxHashSet::default();
    let mut worklist = vec![entry];
    while let Some(b) = worklist.pop() {
        if !reachable.insert(b) {
            continue;
        }
        for s in module.block_successors(b) {
            worklist.push(s);
        }
    }
    let dead: Vec<ValueId> = blocks.into_iter().filter(|b| !reachable.contains(b)).collect();
    if dead.is_empty() {
        return false;
    }
    for &d in &dead {
        for succ in module.block_successors(d) {
            if module.is_live(succ) {
                module.remove_incoming_edge(succ, d);
            }
        }
    }
    for d in dead {
        module.remove_block(func, d);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::PhiEdge;
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_function(m: &mut Module) -> ValueId {
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        m.add_function("f", fty, Linkage::Internal, Span::dummy())
    }

    #[test]
    fn folds_cond_branch_with_identical_arms() {
        let mut m = Module::new();
        let f = new_function(&mut m);
        let entry = m.add_block(f, "entry", Span::dummy());
        let merge = m.add_block(f, "merge", Span::dummy());
        let cond = m.const_int(Type::i32_ty(), 1);
        m.append_inst(entry, Type::Void, Instruction::CondBr { cond, then_blk: merge, else_blk: merge }, Span::dummy());
        m.append_inst(merge, Type::Void, Instruction::Ret { value: None }, Span::dummy());
        assert!(run_function(&mut m, f));
        let term = m.block_terminator(entry).unwrap();
        assert!(matches!(m.inst(term), Instruction::Br { target } if *target == merge));
    }

    #[test]
    fn threads_through_empty_forwarding_block() {
        let mut m = Module::new();
        let f = new_function(&mut m);
        let entry = m.add_block(f, "entry", Span::dummy());
        let forward = m.add_block(f, "forward", Span::dummy());
        let target = m.add_block(f, "target", Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Br { target: forward }, Span::dummy());
        m.append_inst(forward, Type::Void, Instruction::Br { target }, Span::dummy());
        m.append_inst(target, Type::Void, Instruction::Ret { value: None }, Span::dummy());
        assert!(run_function(&mut m, f));
        let term = m.block_terminator(entry).unwrap();
        assert!(matches!(m.inst(term), Instruction::Br { target: t } if *t == target));
    }

    #[test]
    fn removes_unreachable_block_and_its_phi_edge() {
        let mut m = Module::new();
        let f = new_function(&mut m);
        let entry = m.add_block(f, "entry", Span::dummy());
        let live_pred = m.add_block(f, "live_pred", Span::dummy());
        let dead_pred = m.add_block(f, "dead_pred", Span::dummy());
        let merge = m.add_block(f, "merge", Span::dummy());

        m.append_inst(entry, Type::Void, Instruction::Br { target: live_pred }, Span::dummy());
        m.append_inst(live_pred, Type::Void, Instruction::Br { target: merge }, Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let two = m.const_int(Type::i32_ty(), 2);
        m.append_inst(dead_pred, Type::Void, Instruction::Br { target: merge }, Span::dummy());
        let phi = m.append_inst(
            merge,
            Type::i32_ty(),
            Instruction::Phi { incomings: vec![PhiEdge { block: live_pred, value: one }, PhiEdge { block: dead_pred, value: two }] },
            Span::dummy(),
        );
        m.append_inst(merge, Type::Void, Instruction::Ret { value: Some(phi) }, Span::dummy());

        assert!(run_function(&mut m, f));
        assert!(!m.is_live(dead_pred));
        match m.inst(phi) {
            Instruction::Phi { incomings } => assert_eq!(incomings.len(), 1),
            _ => unreachable!(),
        }
    }
}
