//! The SSA module: the owning arena for every value, plus the editing API
//! of spec §4.1 (`replace_all_uses_with`, `set_operand`, `insert_before` /
//! `insert_after` / `erase`, `dominates`).

use crate::common::source::Span;
use crate::common::types::Type;
use crate::ir::dominance::DomTree;
use crate::ir::instruction::Instruction;
use crate::ir::value::{Linkage, Slot, Use, ValueId, ValueKind};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64, String),
    Zero(String),
    Array(String, Vec<ValueId>),
    Struct(String, Vec<ValueId>),
}

pub struct Module {
    slots: Vec<Slot>,
    pub top_level: Vec<ValueId>,
    const_cache: FxHashMap<ConstKey, ValueId>,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    pub fn new() -> Self {
        Self { slots: Vec::new(), top_level: Vec::new(), const_cache: FxHashMap::default() }
    }

    fn alloc(&mut self, ty: Type, kind: ValueKind, span: Span, name_hint: Option<String>) -> ValueId {
        let id = ValueId(self.slots.len() as u32);
        self.slots.push(Slot { ty, kind, uses: Vec::new(), name_hint, span, live: true });
        id
    }

    pub fn slot(&self, id: ValueId) -> &Slot {
        let s = &self.slots[id.index()];
        debug_assert!(s.live, "use of erased value {}", id);
        s
    }

    pub fn slot_mut(&mut self, id: ValueId) -> &mut Slot {
        debug_assert!(self.slots[id.index()].live, "use of erased value {}", id);
        &mut self.slots[id.index()]
    }

    pub fn ty(&self, id: ValueId) -> &Type {
        &self.slot(id).ty
    }

    pub fn uses(&self, id: ValueId) -> &[Use] {
        &self.slot(id).uses
    }

    pub fn has_uses(&self, id: ValueId) -> bool {
        !self.slot(id).uses.is_empty()
    }

    pub fn inst(&self, id: ValueId) -> &Instruction {
        self.slot(id).as_inst().expect("not an instruction")
    }

    // ---- constants (value-deduplicated within the module, §4.1) ----

    pub fn const_int(&mut self, ty: Type, value: i64) -> ValueId {
        let key = ConstKey::Int(value, ty.to_string());
        if let Some(&id) = self.const_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ty, ValueKind::ConstInt { value }, Span::dummy(), None);
        self.const_cache.insert(key, id);
        id
    }

    pub fn const_zero(&mut self, ty: Type) -> ValueId {
        let key = ConstKey::Zero(ty.to_string());
        if let Some(&id) = self.const_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ty, ValueKind::ConstZero, Span::dummy(), None);
        self.const_cache.insert(key, id);
        id
    }

    pub fn const_array(&mut self, ty: Type, elems: Vec<ValueId>) -> ValueId {
        let key = ConstKey::Array(ty.to_string(), elems.clone());
        if let Some(&id) = self.const_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ty, ValueKind::ConstArray { elems: elems.clone() }, Span::dummy(), None);
        for (i, e) in elems.iter().enumerate() {
            self.add_use(*e, id, i as u32);
        }
        self.const_cache.insert(key, id);
        id
    }

    pub fn const_struct(&mut self, ty: Type, elems: Vec<ValueId>) -> ValueId {
        let key = ConstKey::Struct(ty.to_string(), elems.clone());
        if let Some(&id) = self.const_cache.get(&key) {
            return id;
        }
        let id = self.alloc(ty, ValueKind::ConstStruct { elems: elems.clone() }, Span::dummy(), None);
        for (i, e) in elems.iter().enumerate() {
            self.add_use(*e, id, i as u32);
        }
        self.const_cache.insert(key, id);
        id
    }

    pub fn const_int_value(&self, id: ValueId) -> Option<i64> {
        match &self.slot(id).kind {
            ValueKind::ConstInt { value } => Some(*value),
            ValueKind::ConstZero => Some(0),
            _ => None,
        }
    }

    pub fn is_constant(&self, id: ValueId) -> bool {
        matches!(self.slot(id).kind, ValueKind::ConstInt { .. } | ValueKind::ConstZero | ValueKind::ConstArray { .. } | ValueKind::ConstStruct { .. })
    }

    /// Element list of a `ConstArray`/`ConstStruct`, for backends that need
    /// to emit an aggregate initializer element-by-element. `None` for
    /// anything else, including `ConstZero` (callers fall back to its size).
    pub fn const_aggregate_elems(&self, id: ValueId) -> Option<&[ValueId]> {
        match &self.slot(id).kind {
            ValueKind::ConstArray { elems } | ValueKind::ConstStruct { elems } => Some(elems),
            _ => None,
        }
    }

    // ---- top-level values ----

    pub fn add_global(&mut self, name: impl Into<String>, ty: Type, linkage: Linkage, init: Option<ValueId>, mutable: bool, span: Span) -> ValueId {
        let name = name.into();
        let id = self.alloc(Type::Pointer(Box::new(ty)), ValueKind::GlobalVar { name: name.clone(), linkage, init, mutable }, span, Some(name));
        if let Some(init) = init {
            self.add_use(init, id, 0);
        }
        self.top_level.push(id);
        id
    }

    pub fn add_function(&mut self, name: impl Into<String>, ty: Type, linkage: Linkage, span: Span) -> ValueId {
        let name = name.into();
        let id = self.alloc(ty, ValueKind::Function { name: name.clone(), linkage, params: Vec::new(), blocks: Vec::new(), pure: false }, span, Some(name));
        self.top_level.push(id);
        id
    }

    pub fn add_param(&mut self, func: ValueId, ty: Type, span: Span) -> ValueId {
        let index = match &self.slot(func).kind {
            ValueKind::Function { params, .. } => params.len() as u32,
            _ => panic!("add_param on non-function"),
        };
        let id = self.alloc(ty, ValueKind::Argument { index, owner: func }, span, None);
        if let ValueKind::Function { params, .. } = &mut self.slot_mut(func).kind {
            params.push(id);
        }
        id
    }

    pub fn function_name(&self, func: ValueId) -> &str {
        match &self.slot(func).kind {
            ValueKind::Function { name, .. } => name,
            _ => panic!("not a function"),
        }
    }

    pub fn function_linkage(&self, func: ValueId) -> Linkage {
        match &self.slot(func).kind {
            ValueKind::Function { linkage, .. } => *linkage,
            _ => panic!("not a function"),
        }
    }

    pub fn function_blocks(&self, func: ValueId) -> &[ValueId] {
        match &self.slot(func).kind {
            ValueKind::Function { blocks, .. } => blocks,
            _ => panic!("not a function"),
        }
    }

    pub fn function_params(&self, func: ValueId) -> &[ValueId] {
        match &self.slot(func).kind {
            ValueKind::Function { params, .. } => params,
            _ => panic!("not a function"),
        }
    }

    pub fn function_entry(&self, func: ValueId) -> Option<ValueId> {
        self.function_blocks(func).first().copied()
    }

    pub fn set_function_pure(&mut self, func: ValueId, pure: bool) {
        if let ValueKind::Function { pure: p, .. } = &mut self.slot_mut(func).kind {
            *p = pure;
        }
    }

    pub fn function_purity(&self, func: ValueId) -> bool {
        match &self.slot(func).kind {
            ValueKind::Function { pure, .. } => *pure,
            _ => panic!("not a function"),
        }
    }

    pub fn add_block(&mut self, func: ValueId, name_hint: impl Into<String>, span: Span) -> ValueId {
        let id = self.alloc(Type::Void, ValueKind::Block { owner: func, insts: Vec::new() }, span, Some(name_hint.into()));
        if let ValueKind::Function { blocks, .. } = &mut self.slot_mut(func).kind {
            blocks.push(id);
        }
        id
    }

    pub fn block_insts(&self, block: ValueId) -> &[ValueId] {
        match &self.slot(block).kind {
            ValueKind::Block { insts, .. } => insts,
            _ => panic!("not a block"),
        }
    }

    pub fn is_block(&self, id: ValueId) -> bool {
        matches!(self.slot(id).kind, ValueKind::Block { .. })
    }

    pub fn block_owner(&self, block: ValueId) -> ValueId {
        match &self.slot(block).kind {
            ValueKind::Block { owner, .. } => *owner,
            _ => panic!("not a block"),
        }
    }

    pub fn block_terminator(&self, block: ValueId) -> Option<ValueId> {
        let insts = self.block_insts(block);
        let last = *insts.last()?;
        if self.inst(last).is_terminator() {
            Some(last)
        } else {
            None
        }
    }

    pub fn block_successors(&self, block: ValueId) -> Vec<ValueId> {
        match self.block_terminator(block) {
            Some(t) => match self.inst(t) {
                Instruction::Br { target } => vec![*target],
                Instruction::CondBr { then_blk, else_blk, .. } => vec![*then_blk, *else_blk],
                Instruction::Ret { .. } => vec![],
                _ => vec![],
            },
            None => vec![],
        }
    }

    // ---- instruction construction & editing (spec §4.1) ----

    fn add_use(&mut self, target: ValueId, user: ValueId, slot: u32) {
        self.slots[target.index()].uses.push(Use { user, slot });
    }

    /// Register a use edge for an operand slot created outside the normal
    /// `append_inst`/`insert_before` paths — currently only
    /// [`crate::ir::builder::IrBuilder::add_incoming`], which grows a phi's
    /// operand list after the phi instruction already exists.
    pub(crate) fn register_use_external(&mut self, target: ValueId, user: ValueId, slot: u32) {
        self.add_use(target, user, slot);
    }

    fn remove_use(&mut self, target: ValueId, user: ValueId, slot: u32) {
        let uses = &mut self.slots[target.index()].uses;
        if let Some(pos) = uses.iter().position(|u| u.user == user && u.slot == slot) {
            uses.remove(pos);
        }
    }

    /// Append a new instruction to the end of `block`'s instruction list,
    /// registering use edges for every operand up front.
    pub fn append_inst(&mut self, block: ValueId, ty: Type, inst: Instruction, span: Span) -> ValueId {
        let id = self.alloc(ty, ValueKind::Inst(inst), span, None);
        self.register_operand_uses(id);
        if let ValueKind::Block { insts, .. } = &mut self.slot_mut(block).kind {
            insts.push(id);
        }
        id
    }

    /// Insert a new instruction immediately before `before` in its block.
    pub fn insert_before(&mut self, block: ValueId, before: ValueId, ty: Type, inst: Instruction, span: Span) -> ValueId {
        let id = self.alloc(ty, ValueKind::Inst(inst), span, None);
        self.register_operand_uses(id);
        if let ValueKind::Block { insts, .. } = &mut self.slot_mut(block).kind {
            let pos = insts.iter().position(|&i| i == before).expect("`before` not in block");
            insts.insert(pos, id);
        }
        id
    }

    pub fn insert_after(&mut self, block: ValueId, after: ValueId, ty: Type, inst: Instruction, span: Span) -> ValueId {
        let id = self.alloc(ty, ValueKind::Inst(inst), span, None);
        self.register_operand_uses(id);
        if let ValueKind::Block { insts, .. } = &mut self.slot_mut(block).kind {
            let pos = insts.iter().position(|&i| i == after).expect("`after` not in block");
            insts.insert(pos + 1, id);
        }
        id
    }

    fn register_operand_uses(&mut self, inst_id: ValueId) {
        let operands = self.inst(inst_id).operands();
        for (i, op) in operands.into_iter().enumerate() {
            self.add_use(op, inst_id, i as u32);
        }
    }

    /// Erase an instruction: detach its operand uses first, then remove it
    /// from its block's instruction list (spec §3.2's lifecycle order).
    /// Panics (a bug in the caller, not a `CompileError`) if `inst` still
    /// has uses — the caller must `replace_all_uses_with` first.
    pub fn erase(&mut self, block: ValueId, inst: ValueId) {
        assert!(self.slot(inst).uses.is_empty(), "erasing {inst} with remaining uses");
        let operand_count = self.inst(inst).operand_count();
        for i in 0..operand_count {
            let target = self.inst(inst).operand(i);
            self.remove_use(target, inst, i as u32);
        }
        if let ValueKind::Block { insts, .. } = &mut self.slot_mut(block).kind {
            insts.retain(|&i| i != inst);
        }
        self.slots[inst.index()].live = false;
    }

    /// `set_operand(inst, i, v)`: remove the old use edge at slot `i`,
    /// install the new one.
    pub fn set_operand(&mut self, user: ValueId, i: usize, new_val: ValueId) {
        let old = self.slot(user).as_inst().unwrap().operand(i);
        if old == new_val {
            return;
        }
        self.remove_use(old, user, i as u32);
        {
            let inst = self.slot_mut(user).as_inst_mut().unwrap();
            *inst.operand_mut(i) = new_val;
        }
        self.add_use(new_val, user, i as u32);
    }

    /// `replace_all_uses_with(old, new)`: rewrite every operand slot that
    /// names `old` to name `new` instead. After this call `old.uses()` is
    /// empty.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = std::mem::take(&mut self.slots[old.index()].uses);
        for u in uses {
            let inst = self.slot_mut(u.user).as_inst_mut().unwrap();
            *inst.operand_mut(u.slot as usize) = new;
            self.add_use(new, u.user, u.slot);
        }
    }

    /// Remove the `(incoming_block, value)` entry for `pred` from every phi
    /// at the head of `block` (spec §4.1: "removing a predecessor edge
    /// removes matching incoming entries").
    pub fn remove_incoming_edge(&mut self, block: ValueId, pred: ValueId) {
        let insts: Vec<ValueId> = self.block_insts(block).to_vec();
        for inst_id in insts {
            let is_phi = self.inst(inst_id).is_phi();
            if !is_phi {
                break;
            }
            // Detach the use this phi held on `pred`'s incoming value before
            // dropping the entry, and on the predecessor block value itself.
            if let Instruction::Phi { incomings } = self.inst(inst_id).clone() {
                for (slot, edge) in incomings.iter().enumerate() {
                    if edge.block == pred {
                        self.remove_use(edge.value, inst_id, (slot * 2 + 1) as u32);
                        self.remove_use(edge.block, inst_id, (slot * 2) as u32);
                    }
                }
            }
            if let Instruction::Phi { incomings } = self.slot_mut(inst_id).as_inst_mut().unwrap() {
                incomings.retain(|e| e.block != pred);
            }
            // Re-number remaining use slots to match the compacted operand list.
            self.renumber_uses(inst_id);
        }
    }

    /// After an operand list changes shape (phi incoming removal), the
    /// `slot` field recorded in remaining `Use`s must be recomputed to match
    /// new indices, since `Use::slot` is positional.
    fn renumber_uses(&mut self, inst_id: ValueId) {
        // Rebuild use edges for this instruction from scratch: simplest way
        // to keep `Use::slot` positionally exact after a shape change.
        let operands = self.inst(inst_id).operands();
        for target in self.slots.iter_mut() {
            target.uses.retain(|u| u.user != inst_id);
        }
        for (i, op) in operands.into_iter().enumerate() {
            self.add_use(op, inst_id, i as u32);
        }
    }

    /// Remove an unreachable block from `func` entirely: detach every use
    /// its own instructions hold on other values, then drop it from the
    /// function's block list. Callers must have already redirected any
    /// predecessor edges (`remove_incoming_edge` on every surviving
    /// successor) before calling this — `cfg-simplify`'s dead-block removal
    /// is the only caller.
    pub fn remove_block(&mut self, func: ValueId, block: ValueId) {
        let insts: Vec<ValueId> = self.block_insts(block).to_vec();
        for inst in insts.into_iter().rev() {
            let operand_count = self.inst(inst).operand_count();
            for i in 0..operand_count {
                let target = self.inst(inst).operand(i);
                self.remove_use(target, inst, i as u32);
            }
            self.slots[inst.index()].live = false;
        }
        if let ValueKind::Function { blocks, .. } = &mut self.slot_mut(func).kind {
            blocks.retain(|&b| b != block);
        }
        self.slots[block.index()].live = false;
    }

    pub fn dom_tree(&self, func: ValueId) -> DomTree {
        DomTree::build(self, func)
    }

    pub fn dominates(&self, func: ValueId, a: ValueId, b: ValueId) -> bool {
        self.dom_tree(func).dominates_value(self, a, b)
    }

    /// Module-pass-safe traversal: collects the current top-level list up
    /// front so a pass erasing entries mid-traversal cannot invalidate the
    /// iteration cursor (spec §4.3: "guarantees a safe traversal that
    /// tolerates erasure at the current cursor").
    pub fn top_level_snapshot(&self) -> Vec<ValueId> {
        self.top_level.clone()
    }

    pub fn erase_top_level(&mut self, id: ValueId) {
        self.top_level.retain(|&v| v != id);
        self.slots[id.index()].live = false;
    }

    pub fn is_live(&self, id: ValueId) -> bool {
        self.slots[id.index()].live
    }

    pub fn slots_len(&self) -> usize {
        self.slots.len()
    }

    pub fn all_value_ids(&self) -> impl Iterator<Item = ValueId> + '_ {
        (0..self.slots.len() as u32).map(ValueId).filter(move |&id| self.is_live(id))
    }

    pub fn name_hint(&self, id: ValueId) -> Option<&str> {
        self.slot(id).name_hint.as_deref()
    }

    pub fn functions(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.top_level.iter().copied().filter(|&id| matches!(self.slot(id).kind, ValueKind::Function { .. }))
    }

    pub fn globals(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.top_level.iter().copied().filter(|&id| matches!(self.slot(id).kind, ValueKind::GlobalVar { .. }))
    }

    pub fn global_info(&self, id: ValueId) -> (&str, Linkage, Option<ValueId>) {
        match &self.slot(id).kind {
            ValueKind::GlobalVar { name, linkage, init, .. } => (name.as_str(), *linkage, *init),
            _ => panic!("not a global"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Type;
    use crate::ir::instruction::{BinOp, Instruction};

    fn new_function(m: &mut Module) -> (ValueId, ValueId) {
        let fty = Type::Function(std::rc::Rc::new(crate::common::types::FunctionSig {
            params: vec![],
            ret: Box::new(Type::i32_ty()),
        }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (f, b)
    }

    #[test]
    fn const_int_is_deduplicated() {
        let mut m = Module::new();
        let a = m.const_int(Type::i32_ty(), 7);
        let b = m.const_int(Type::i32_ty(), 7);
        assert_eq!(a, b);
    }

    #[test]
    fn append_inst_registers_use_edges() {
        let mut m = Module::new();
        let (_, b) = new_function(&mut m);
        let c1 = m.const_int(Type::i32_ty(), 1);
        let c2 = m.const_int(Type::i32_ty(), 2);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: c1, rhs: c2 }, Span::dummy());
        assert_eq!(m.uses(c1).len(), 1);
        assert_eq!(m.uses(c1)[0].user, add);
        assert_eq!(m.uses(c2)[0].slot, 1);
    }

    #[test]
    fn replace_all_uses_with_clears_old_uses() {
        let mut m = Module::new();
        let (_, b) = new_function(&mut m);
        let c1 = m.const_int(Type::i32_ty(), 1);
        let c2 = m.const_int(Type::i32_ty(), 2);
        let c3 = m.const_int(Type::i32_ty(), 3);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: c1, rhs: c2 }, Span::dummy());
        m.replace_all_uses_with(c1, c3);
        assert!(m.uses(c1).is_empty());
        assert_eq!(m.inst(add).operand(0), c3);
        assert_eq!(m.uses(c3).len(), 1);
    }

    #[test]
    fn set_operand_updates_both_directions() {
        let mut m = Module::new();
        let (_, b) = new_function(&mut m);
        let c1 = m.const_int(Type::i32_ty(), 1);
        let c2 = m.const_int(Type::i32_ty(), 2);
        let c3 = m.const_int(Type::i32_ty(), 3);
        let add = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: c1, rhs: c2 }, Span::dummy());
        m.set_operand(add, 0, c3);
        assert_eq!(m.inst(add).operand(0), c3);
        assert!(m.uses(c1).is_empty());
        assert_eq!(m.uses(c3)[0].user, add);
    }

    #[test]
    fn erase_requires_empty_use_list() {
        let mut m = Module::new();
        let (_, b) = new_function(&mut m);
        let c1 = m.const_int(Type::i32_ty(), 1);
        let neg = m.append_inst(b, Type::i32_ty(), Instruction::Unary { op: crate::ir::instruction::UnOp::Neg, operand: c1 }, Span::dummy());
        m.set_operand(neg, 0, c1);
        // neg has no uses itself: erasing it is legal and detaches its operand use.
        m.erase(b, neg);
        assert!(m.uses(c1).is_empty());
        assert!(!m.block_insts(b).contains(&neg));
    }
}
