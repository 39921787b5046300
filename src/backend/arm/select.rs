//! Instruction selection (spec §4.6): walk every function block-by-block and
//! emit one or more `MInst`s per SSA value. Every live SSA value that needs
//! a register gets its own `VReg`; `Alloca`s get a stack slot instead and
//! their address is materialized on demand from the frame pointer.

use super::mir::{Condition, MInst, Opcode, Operand, VReg, FP};
use crate::common::types::Type;
use crate::ir::instruction::{BinOp, CastKind, Instruction, UnOp};
use crate::ir::module::Module;
use crate::ir::value::ValueId;
use rustc_hash::FxHashMap;

pub struct SelectedFunction {
    pub name: String,
    pub is_global: bool,
    pub insts: Vec<MInst>,
    pub vreg_count: u32,
    /// Total bytes this function's allocas occupy below the frame pointer,
    /// i.e. the frame region `[fp - alloca_bytes, fp)`. Spill slots (C8)
    /// live further down, below this region.
    pub alloca_bytes: u32,
}

struct Selector<'m> {
    module: &'m Module,
    next_vreg: u32,
    /// Every SSA value (instruction result or parameter) that lives in a
    /// register, mapped to the vreg holding it. An `Alloca`'s vreg holds its
    /// materialized frame address, same as any other instruction result.
    value_regs: FxHashMap<ValueId, VReg>,
    /// Running total of bytes claimed by allocas seen so far; each new
    /// alloca gets the next `[offset, offset + size)` slice below fp.
    next_alloca_offset: u32,
    insts: Vec<MInst>,
}

pub fn select_function(module: &Module, func: ValueId) -> SelectedFunction {
    let mut sel = Selector { module, next_vreg: 0, value_regs: FxHashMap::default(), next_alloca_offset: 0, insts: Vec::new() };

    sel.insts.push(MInst::new(Opcode::FuncBegin, None, vec![Operand::FrameSize]));

    for (i, &param) in module.function_params(func).iter().enumerate() {
        let v = sel.fresh_vreg_for(param);
        // First 4 args arrive in r0-r3; the rest were pushed by the caller
        // onto the stack above the frame pointer. The concrete offset
        // depends on how many registers this function's prologue pushes,
        // which isn't known until after allocation, so this is left as a
        // `StackArg` placeholder for `emit.rs` to resolve.
        if i < 4 {
            sel.insts.push(MInst::new(Opcode::Mov, Some(Operand::Virtual(v)), vec![Operand::Physical(super::mir::PhysReg(i as u8))]));
        } else {
            sel.insts.push(MInst::new(Opcode::Ldr, Some(Operand::Virtual(v)), vec![Operand::StackArg((i - 4) as u32)]));
        }
    }

    for &block in module.function_blocks(func) {
        sel.insts.push(MInst::new(Opcode::Label, Some(Operand::Label(block_label(module, block))), vec![]));
        for &inst in module.block_insts(block) {
            sel.select_inst(inst);
        }
    }

    resolve_phis(module, func, &mut sel);

    sel.insts.push(MInst::new(Opcode::Label, Some(Operand::Label(epilogue_label(module, func))), vec![]));
    sel.insts.push(MInst::new(Opcode::FuncEnd, None, vec![Operand::FrameSize]));

    SelectedFunction {
        name: module.function_name(func).to_string(),
        is_global: module.function_linkage(func) == crate::ir::value::Linkage::External,
        insts: sel.insts,
        vreg_count: sel.next_vreg,
        alloca_bytes: sel.next_alloca_offset,
    }
}

pub fn block_label(module: &Module, block: ValueId) -> String {
    format!(".L{}_{}", module.function_name(module.block_owner(block)), block.index())
}

pub fn epilogue_label(module: &Module, func: ValueId) -> String {
    format!(".Lret_{}", module.function_name(func))
}

impl<'m> Selector<'m> {
    fn fresh_vreg(&mut self) -> VReg {
        let v = VReg(self.next_vreg);
        self.next_vreg += 1;
        v
    }

    fn fresh_vreg_for(&mut self, value: ValueId) -> VReg {
        let v = self.fresh_vreg();
        self.value_regs.insert(value, v);
        v
    }

    fn operand(&mut self, value: ValueId) -> Operand {
        if let Some(c) = self.module.const_int_value(value) {
            return Operand::Imm(c);
        }
        if let Some(&v) = self.value_regs.get(&value) {
            return Operand::Virtual(v);
        }
        // A value referenced before its selecting instruction has run
        // (forward reference through a not-yet-visited phi edge); reserve
        // its vreg now so later code can fill it in.
        Operand::Virtual(self.fresh_vreg_for(value))
    }

    fn select_inst(&mut self, inst: ValueId) {
        let instruction = self.module.inst(inst).clone();
        match instruction {
            Instruction::Binary { op, lhs, rhs } => self.select_binary(inst, op, lhs, rhs),
            Instruction::Unary { op, operand } => self.select_unary(inst, op, operand),
            Instruction::Load { ptr } => {
                let dest = self.fresh_vreg_for(inst);
                let addr = self.address_operand(ptr);
                self.insts.push(MInst::new(Opcode::Ldr, Some(Operand::Virtual(dest)), vec![addr]));
            }
            Instruction::Store { ptr, value } => {
                let val = self.operand(value);
                let addr = self.address_operand(ptr);
                self.insts.push(MInst::new(Opcode::Str, Some(addr), vec![val]));
            }
            Instruction::Cast { kind, operand } => self.select_cast(inst, kind, operand),
            Instruction::Alloca { allocated_ty } => {
                let slot_vreg = self.fresh_vreg_for(inst);
                self.next_alloca_offset += allocated_ty.size();
                let offset = self.next_alloca_offset;
                self.insts.push(MInst::new(Opcode::Sub, Some(Operand::Virtual(slot_vreg)), vec![Operand::Physical(FP), Operand::Imm(offset as i64)]));
            }
            Instruction::Gep { base, indices } => self.select_gep(inst, base, &indices),
            Instruction::Call { callee, args } => self.select_call(inst, callee, &args),
            Instruction::Phi { .. } => {
                // handled by resolve_phis; just reserve the destination
                // register so uses within the block see a stable vreg.
                self.fresh_vreg_for(inst);
            }
            Instruction::Br { target } => {
                self.insts.push(MInst::new(Opcode::B, Some(Operand::Label(block_label(self.module, target))), vec![]));
            }
            Instruction::CondBr { cond, then_blk, else_blk } => {
                let c = self.operand(cond);
                self.insts.push(MInst::new(Opcode::Cmp, None, vec![c, Operand::Imm(0)]));
                self.insts.push(
                    MInst::new(Opcode::Bcond, Some(Operand::Label(block_label(self.module, then_blk))), vec![])
                        .with_cond(Condition::Ne),
                );
                self.insts.push(MInst::new(Opcode::B, Some(Operand::Label(block_label(self.module, else_blk))), vec![]));
            }
            Instruction::Ret { value } => {
                if let Some(v) = value {
                    let op = self.operand(v);
                    self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Physical(super::mir::PhysReg(0))), vec![op]));
                }
                let func = self.module.block_owner(self.owning_block(inst));
                self.insts.push(MInst::new(Opcode::B, Some(Operand::Label(epilogue_label(self.module, func))), vec![]));
            }
        }
    }

    fn owning_block(&self, inst: ValueId) -> ValueId {
        for func in self.module.functions() {
            for &block in self.module.function_blocks(func) {
                if self.module.block_insts(block).contains(&inst) {
                    return block;
                }
            }
        }
        panic!("instruction has no owning block")
    }

    /// Loads or computes an address into an `Operand::Mem` for `Ldr`/`Str`.
    /// An `Alloca`'s address is its frame slot plus zero; any other pointer
    /// value is used directly as the memory base.
    fn address_operand(&mut self, ptr: ValueId) -> Operand {
        let base = self.operand(ptr);
        Operand::Mem { base: Box::new(base), offset: 0 }
    }

    fn select_binary(&mut self, inst: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId) {
        let l = self.operand(lhs);
        let r = self.operand(rhs);
        let dest = self.fresh_vreg_for(inst);
        if op.is_comparison() {
            self.insts.push(MInst::new(Opcode::Cmp, None, vec![l, r]));
            self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Virtual(dest)), vec![Operand::Imm(0)]));
            let cond = comparison_condition(op);
            self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Virtual(dest)), vec![Operand::Imm(1)]).with_cond(cond));
            return;
        }
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::SDiv => Opcode::SDiv,
            BinOp::UDiv => Opcode::UDiv,
            BinOp::SRem | BinOp::URem => {
                // no remainder opcode in the target set: rem(a,b) = a - (a/b)*b
                let div_op = if op == BinOp::SRem { Opcode::SDiv } else { Opcode::UDiv };
                let q = self.fresh_vreg();
                self.insts.push(MInst::new(div_op, Some(Operand::Virtual(q)), vec![l.clone(), r.clone()]));
                let prod = self.fresh_vreg();
                self.insts.push(MInst::new(Opcode::Mul, Some(Operand::Virtual(prod)), vec![Operand::Virtual(q), r]));
                self.insts.push(MInst::new(Opcode::Sub, Some(Operand::Virtual(dest)), vec![l, Operand::Virtual(prod)]));
                return;
            }
            BinOp::And => Opcode::And,
            BinOp::Or => Opcode::Orr,
            BinOp::Xor => Opcode::Eor,
            BinOp::Shl => Opcode::Lsl,
            BinOp::LShr => Opcode::Lsr,
            BinOp::AShr => Opcode::Asr,
            _ => unreachable!("comparison ops handled above"),
        };
        self.insts.push(MInst::new(opcode, Some(Operand::Virtual(dest)), vec![l, r]));
    }

    fn select_unary(&mut self, inst: ValueId, op: UnOp, operand: ValueId) {
        let o = self.operand(operand);
        let dest = self.fresh_vreg_for(inst);
        match op {
            UnOp::Neg => self.insts.push(MInst::new(Opcode::Sub, Some(Operand::Virtual(dest)), vec![Operand::Imm(0), o])),
            UnOp::Not => self.insts.push(MInst::new(Opcode::Eor, Some(Operand::Virtual(dest)), vec![o, Operand::Imm(-1)])),
        }
    }

    fn select_cast(&mut self, inst: ValueId, kind: CastKind, operand: ValueId) {
        let src_ty = self.module.ty(operand).clone();
        let o = self.operand(operand);
        let dest = self.fresh_vreg_for(inst);
        match kind {
            CastKind::ZExt | CastKind::Trunc => {
                let bits = src_ty.size() * 8;
                let mask = if bits >= 64 { -1i64 } else { (1i64 << bits) - 1 };
                self.insts.push(MInst::new(Opcode::And, Some(Operand::Virtual(dest)), vec![o, Operand::Imm(mask)]));
            }
            CastKind::SExt => {
                let bits = (src_ty.size() * 8) as i64;
                let shift = 32 - bits;
                let tmp = self.fresh_vreg();
                self.insts.push(MInst::new(Opcode::Lsl, Some(Operand::Virtual(tmp)), vec![o, Operand::Imm(shift)]));
                self.insts.push(MInst::new(Opcode::Asr, Some(Operand::Virtual(dest)), vec![Operand::Virtual(tmp), Operand::Imm(shift)]));
            }
            CastKind::PtrToInt | CastKind::IntToPtr | CastKind::Bitcast => {
                self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Virtual(dest)), vec![o]));
            }
        }
    }

    fn select_gep(&mut self, inst: ValueId, base: ValueId, indices: &[ValueId]) {
        let base_op = self.operand(base);
        let pointee = self.module.ty(base).element_type().expect("gep base is a pointer or array");
        let dest = self.fresh_vreg_for(inst);
        let index = indices[0];

        if let Type::Struct(_) = pointee.unqualified() {
            let field_idx = self.module.const_int_value(index).expect("struct field index is always constant") as usize;
            let offset = pointee.field_offset(field_idx);
            self.insts.push(MInst::new(Opcode::Add, Some(Operand::Virtual(dest)), vec![base_op, Operand::Imm(offset as i64)]));
            return;
        }

        let elem_size = pointee.size();
        let idx_op = self.operand(index);
        if let Some(c) = self.module.const_int_value(index) {
            self.insts.push(MInst::new(Opcode::Add, Some(Operand::Virtual(dest)), vec![base_op, Operand::Imm(c * elem_size as i64)]));
            return;
        }
        if elem_size.is_power_of_two() {
            let shift = elem_size.trailing_zeros() as i64;
            let scaled = self.fresh_vreg();
            self.insts.push(MInst::new(Opcode::Lsl, Some(Operand::Virtual(scaled)), vec![idx_op, Operand::Imm(shift)]));
            self.insts.push(MInst::new(Opcode::Add, Some(Operand::Virtual(dest)), vec![base_op, Operand::Virtual(scaled)]));
        } else {
            let scaled = self.fresh_vreg();
            self.insts.push(MInst::new(Opcode::Mul, Some(Operand::Virtual(scaled)), vec![idx_op, Operand::Imm(elem_size as i64)]));
            self.insts.push(MInst::new(Opcode::Add, Some(Operand::Virtual(dest)), vec![base_op, Operand::Virtual(scaled)]));
        }
    }

    fn select_call(&mut self, inst: ValueId, callee: ValueId, args: &[ValueId]) {
        for (i, &arg) in args.iter().enumerate().take(4) {
            let a = self.operand(arg);
            self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Physical(super::mir::PhysReg(i as u8))), vec![a]));
        }
        for &arg in args.iter().skip(4).rev() {
            let a = self.operand(arg);
            self.insts.push(MInst::new(Opcode::Push, None, vec![a]));
        }
        let name = self.module.function_name(callee).to_string();
        self.insts.push(MInst::new(Opcode::Bl, Some(Operand::Label(name)), vec![]));
        if args.len() > 4 {
            let extra = (args.len() - 4) as i64 * 4;
            self.insts.push(MInst::new(Opcode::Add, Some(Operand::Physical(super::mir::PhysReg(13))), vec![Operand::Physical(super::mir::PhysReg(13)), Operand::Imm(extra)]));
        }
        if !matches!(self.module.ty(inst), Type::Void) {
            let dest = self.fresh_vreg_for(inst);
            self.insts.push(MInst::new(Opcode::Mov, Some(Operand::Virtual(dest)), vec![Operand::Physical(super::mir::PhysReg(0))]));
        }
    }
}

fn comparison_condition(op: BinOp) -> Condition {
    match op {
        BinOp::ICmpEq => Condition::Eq,
        BinOp::ICmpNe => Condition::Ne,
        BinOp::ICmpSlt => Condition::Lt,
        BinOp::ICmpSle => Condition::Le,
        BinOp::ICmpSgt => Condition::Gt,
        BinOp::ICmpSge => Condition::Ge,
        BinOp::ICmpUlt => Condition::Ult,
        BinOp::ICmpUle => Condition::Ule,
        BinOp::ICmpUgt => Condition::Ugt,
        BinOp::ICmpUge => Condition::Uge,
        _ => unreachable!("not a comparison opcode"),
    }
}

/// Phi nodes are resolved by copy-insertion on incoming edges: for every
/// phi, append a `Mov` into its destination vreg at the end of each
/// predecessor block, just before that block's terminator.
fn resolve_phis(module: &Module, func: ValueId, sel: &mut Selector) {
    let mut insertions: Vec<(usize, MInst)> = Vec::new();
    for &block in module.function_blocks(func) {
        for &inst in module.block_insts(block) {
            let incomings = match module.inst(inst) {
                Instruction::Phi { incomings } => incomings.clone(),
                _ => continue,
            };
            let dest = *sel.value_regs.get(&inst).expect("phi destination reserved during selection");
            for edge in incomings {
                let src = sel.operand(edge.value);
                let copy = MInst::new(Opcode::Mov, Some(Operand::Virtual(dest)), vec![src]);
                let pos = terminator_position(sel, &block_label(module, edge.block));
                insertions.push((pos, copy));
            }
        }
    }
    insertions.sort_by(|a, b| b.0.cmp(&a.0));
    for (pos, inst) in insertions {
        sel.insts.insert(pos, inst);
    }
}

/// Index of the first terminator (`B`/`Bcond`/`Bx`) instruction within the
/// labeled block `label`, i.e. where a phi copy must be inserted before.
fn terminator_position(sel: &Selector, label: &str) -> usize {
    let mut in_block = false;
    for (i, inst) in sel.insts.iter().enumerate() {
        if inst.opcode == Opcode::Label {
            if let Some(Operand::Label(l)) = &inst.dest {
                if in_block {
                    break;
                }
                if l == label {
                    in_block = true;
                }
                continue;
            }
        }
        if in_block && inst.is_terminator() {
            return i;
        }
    }
    sel.insts.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn binop_sig(n: usize) -> Type {
        Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty(); n], ret: Box::new(Type::i32_ty()) }))
    }

    #[test]
    fn selects_straight_line_addition() {
        let mut m = Module::new();
        let f = m.add_function("add1", binop_sig(1), Linkage::External, Span::dummy());
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let sum = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: one }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());

        let sf = select_function(&m, f);
        assert!(sf.insts.iter().any(|i| i.opcode == Opcode::Add));
        assert!(!sf.insts.iter().any(|i| i.opcode == Opcode::Bl));
    }

    #[test]
    fn resolves_phi_via_predecessor_copies() {
        let mut m = Module::new();
        let f = m.add_function("sel", binop_sig(1), Linkage::External, Span::dummy());
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let a = m.add_block(f, "a", Span::dummy());
        let b = m.add_block(f, "b", Span::dummy());
        let merge = m.add_block(f, "merge", Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::CondBr { cond: p, then_blk: a, else_blk: b }, Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let two = m.const_int(Type::i32_ty(), 2);
        m.append_inst(a, Type::Void, Instruction::Br { target: merge }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Br { target: merge }, Span::dummy());
        let phi = m.append_inst(
            merge,
            Type::i32_ty(),
            Instruction::Phi { incomings: vec![crate::ir::instruction::PhiEdge { block: a, value: one }, crate::ir::instruction::PhiEdge { block: b, value: two }] },
            Span::dummy(),
        );
        m.append_inst(merge, Type::Void, Instruction::Ret { value: Some(phi) }, Span::dummy());

        let sf = select_function(&m, f);
        let mov_count = sf.insts.iter().filter(|i| i.opcode == Opcode::Mov).count();
        assert!(mov_count >= 2);
    }
}
