//! Dominator tree construction, backing `Module::dominates` (spec §3.2:
//! "a use must be dominated by its definition, except for phi operands").
//!
//! Iterative data-flow over reverse postorder, the textbook Cooper/Harvey/
//! Kennedy algorithm — the same fixpoint-over-RPO shape the mid-level passes
//! (C4) and the liveness analysis (C7) both use elsewhere in this crate.

use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::FxHashMap;

pub struct DomTree {
    entry: ValueId,
    rpo: Vec<ValueId>,
    rpo_index: FxHashMap<ValueId, usize>,
    idom: FxHashMap<ValueId, ValueId>,
}

impl DomTree {
    pub fn build(module: &Module, func: ValueId) -> DomTree {
        let blocks = module.function_blocks(func);
        let entry = match blocks.first() {
            Some(&e) => e,
            None => {
                return DomTree { entry: ValueId::INVALID, rpo: Vec::new(), rpo_index: FxHashMap::default(), idom: FxHashMap::default() };
            }
        };

        let rpo = reverse_postorder(module, entry);
        let mut rpo_index = FxHashMap::default();
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index.insert(b, i);
        }

        let preds = predecessor_map(module, &rpo);

        let mut idom: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<ValueId> = None;
                for &p in preds.get(&b).into_iter().flatten() {
                    if !idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&rpo_index, &idom, cur, p),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom.get(&b) != Some(&ni) {
                        idom.insert(b, ni);
                        changed = true;
                    }
                }
            }
        }

        DomTree { entry, rpo, rpo_index, idom }
    }

    /// `a` dominates `b` iff walking `idom` from `b` reaches `a`.
    pub fn dominates(&self, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        if !self.rpo_index.contains_key(&a) || !self.rpo_index.contains_key(&b) {
            return false;
        }
        let mut cur = b;
        loop {
            match self.idom.get(&cur) {
                Some(&p) if p == cur => return cur == a,
                Some(&p) => {
                    if p == a {
                        return true;
                    }
                    cur = p;
                }
                None => return false,
            }
        }
    }

    /// Value-level dominance: an instruction in block `bb_a` dominates an
    /// instruction in a different block `bb_b` iff `bb_a` dominates `bb_b`.
    /// Used by verification and by passes (e.g. GVN) checking whether a
    /// replacement value is available at a use site.
    pub fn dominates_value(&self, module: &Module, def: ValueId, use_site: ValueId) -> bool {
        let def_block = owning_block(module, def);
        let use_block = owning_block(module, use_site);
        match (def_block, use_block) {
            (Some(db), Some(ub)) if db == ub => {
                let insts = module.block_insts(db);
                let di = insts.iter().position(|&i| i == def);
                let ui = insts.iter().position(|&i| i == use_site);
                match (di, ui) {
                    (Some(d), Some(u)) => d <= u,
                    _ => true,
                }
            }
            (Some(db), Some(ub)) => self.dominates(db, ub),
            _ => true,
        }
    }

    pub fn entry(&self) -> ValueId {
        self.entry
    }
}

fn owning_block(module: &Module, v: ValueId) -> Option<ValueId> {
    if module.is_block(v) {
        // `v` may itself be a block value (e.g. a branch target compared
        // against a phi's incoming block), in which case it owns itself.
        return Some(v);
    }
    module.all_value_ids().filter(|&b| module.is_block(b)).find(|&b| module.block_insts(b).contains(&v))
}

pub(crate) fn reverse_postorder(module: &Module, entry: ValueId) -> Vec<ValueId> {
    let mut visited = std::collections::HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((b, processed)) = stack.pop() {
        if processed {
            postorder.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for succ in module.block_successors(b) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

pub(crate) fn predecessor_map(module: &Module, rpo: &[ValueId]) -> FxHashMap<ValueId, Vec<ValueId>> {
    let mut preds: FxHashMap<ValueId, Vec<ValueId>> = FxHashMap::default();
    for &b in rpo {
        for succ in module.block_successors(b) {
            preds.entry(succ).or_default().push(b);
        }
    }
    preds
}

fn intersect(rpo_index: &FxHashMap<ValueId, usize>, idom: &FxHashMap<ValueId, ValueId>, mut a: ValueId, mut b: ValueId) -> ValueId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::Instruction;
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn setup_diamond() -> (Module, ValueId, ValueId, ValueId, ValueId, ValueId) {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::Void) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let then_b = m.add_block(f, "then", Span::dummy());
        let else_b = m.add_block(f, "else", Span::dummy());
        let join = m.add_block(f, "join", Span::dummy());

        let cond = m.const_int(Type::i32_ty(), 1);
        m.append_inst(entry, Type::Void, Instruction::CondBr { cond, then_blk: then_b, else_blk: else_b }, Span::dummy());
        m.append_inst(then_b, Type::Void, Instruction::Br { target: join }, Span::dummy());
        m.append_inst(else_b, Type::Void, Instruction::Br { target: join }, Span::dummy());
        m.append_inst(join, Type::Void, Instruction::Ret { value: None }, Span::dummy());

        (m, f, entry, then_b, else_b, join)
    }

    #[test]
    fn entry_dominates_everything() {
        let (m, f, entry, then_b, else_b, join) = setup_diamond();
        let dt = m.dom_tree(f);
        assert!(dt.dominates(entry, then_b));
        assert!(dt.dominates(entry, else_b));
        assert!(dt.dominates(entry, join));
    }

    #[test]
    fn branches_do_not_dominate_each_other() {
        let (m, f, _entry, then_b, else_b, _join) = setup_diamond();
        let dt = m.dom_tree(f);
        assert!(!dt.dominates(then_b, else_b));
        assert!(!dt.dominates(else_b, then_b));
    }

    #[test]
    fn join_is_not_dominated_by_either_branch() {
        let (m, f, _entry, then_b, else_b, join) = setup_diamond();
        let dt = m.dom_tree(f);
        assert!(!dt.dominates(then_b, join));
        assert!(!dt.dominates(else_b, join));
    }
}
