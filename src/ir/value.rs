//! The SSA value model (spec §3.2, component C1).
//!
//! Every value — constant, global, function, block, argument, or
//! instruction — lives in one arena per [`crate::ir::module::Module`] and is
//! named by a [`ValueId`], the "arena index" alternative spec §9's design
//! notes call out for representing use-def edges. An operand slot is a
//! `ValueId` stored inside the user's [`crate::ir::instruction::Instruction`];
//! the reverse edge is a [`Use`] pushed onto the referenced value's `uses`
//! list. [`crate::ir::module::Module::set_operand`] and
//! `replace_all_uses_with` are the only code paths that mutate an operand
//! slot, and they keep both directions in lockstep — this is the invariant
//! spec §3.2 calls "exact" use-lists.

use crate::common::source::Span;
use crate::common::types::Type;
use crate::ir::instruction::Instruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub const INVALID: ValueId = ValueId(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Back-edge from a value to one operand slot that names it: "slot `slot`
/// of instruction/value `user`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: ValueId,
    pub slot: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
    Inline,
    GlobalCtor,
}

impl Linkage {
    /// "A value with empty `uses()` and Internal/Inline linkage may be
    /// deleted" (spec §3.2).
    pub fn is_locally_eliminable(self) -> bool {
        matches!(self, Linkage::Internal | Linkage::Inline)
    }
}

#[derive(Debug, Clone)]
pub enum ValueKind {
    ConstInt { value: i64 },
    ConstZero,
    ConstArray { elems: Vec<ValueId> },
    ConstStruct { elems: Vec<ValueId> },

    GlobalVar { name: String, linkage: Linkage, init: Option<ValueId>, mutable: bool },

    /// A function; `blocks` is empty for a declaration without a body
    /// ("function... with or without body", spec §3.2).
    Function { name: String, linkage: Linkage, params: Vec<ValueId>, blocks: Vec<ValueId>, pure: bool },

    Argument { index: u32, owner: ValueId },

    /// A basic block, itself a first-class [`Value`] so it can be named as
    /// a branch target or phi-incoming-block operand.
    Block { owner: ValueId, insts: Vec<ValueId> },

    Inst(Instruction),
}

/// One arena slot. `live` is a tombstone flag: erasing a value does not
/// compact the arena (that would invalidate every other `ValueId`), it just
/// marks the slot dead after its uses have been detached.
#[derive(Debug, Clone)]
pub struct Slot {
    pub ty: Type,
    pub kind: ValueKind,
    pub uses: Vec<Use>,
    pub name_hint: Option<String>,
    pub span: Span,
    pub live: bool,
}

impl Slot {
    pub fn as_inst(&self) -> Option<&Instruction> {
        match &self.kind {
            ValueKind::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_inst_mut(&mut self) -> Option<&mut Instruction> {
        match &mut self.kind {
            ValueKind::Inst(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<(&ValueId, &Vec<ValueId>)> {
        match &self.kind {
            ValueKind::Block { owner, insts } => Some((owner, insts)),
            _ => None,
        }
    }
}
