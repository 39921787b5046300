//! Back-end cleanups and assembly text emission (spec §4.9): substitute
//! physical registers and stack slots for virtual registers, patch the
//! frame size placeholder left by `select.rs`, drop now-redundant copies,
//! collapse a branch immediately followed by its own target label, and
//! print the result as ARM-like assembly text.

use super::cfg::build_cfg;
use super::mir::{Condition, MInst, Opcode, Operand, PhysReg, FP, LR, SP};
use super::regalloc::{Assignment, AllocationResult};
use super::select::SelectedFunction;
use std::fmt::Write as _;

const WORD: u32 = 4;

pub fn emit_function(func: &SelectedFunction, alloc: &AllocationResult) -> String {
    let frame_size = round_up_16(alloc.spill_slots + func.alloca_bytes);
    let mut insts = substitute_operands(&func.insts, alloc, frame_size, func.alloca_bytes);
    drop_redundant_copies(&mut insts);
    collapse_trivial_branches(&mut insts);

    let mut out = String::new();
    if func.is_global {
        let _ = writeln!(out, "    .global {}", func.name);
    }
    let _ = writeln!(out, "{}:", func.name);
    for inst in &insts {
        print_inst(&mut out, inst, &alloc.callee_saved_used, frame_size);
    }
    out
}

fn round_up_16(n: u32) -> u32 {
    (n + 15) & !15
}

fn substitute_operands(insts: &[MInst], alloc: &AllocationResult, frame_size: u32, alloca_bytes: u32) -> Vec<MInst> {
    insts
        .iter()
        .map(|inst| {
            let mut new = inst.clone();
            new.dest = inst.dest.as_ref().map(|o| substitute(o, alloc, frame_size, alloca_bytes));
            new.operands = inst.operands.iter().map(|o| substitute(o, alloc, frame_size, alloca_bytes)).collect();
            new
        })
        .collect()
}

/// Resolves every placeholder operand left by selection into a concrete
/// register or `[fp, #off]` memory reference. The frame below `fp` is laid
/// out allocas-then-spills: `[fp - alloca_bytes, fp)` holds alloca slots
/// (materialized directly by `select.rs` as `Sub`, not through here), and
/// `[fp - alloca_bytes - spill_slots, fp - alloca_bytes)` holds spills.
fn substitute(op: &Operand, alloc: &AllocationResult, frame_size: u32, alloca_bytes: u32) -> Operand {
    match op {
        Operand::Virtual(v) => match alloc.assignments.get(v) {
            Some(Assignment::Register(r)) => Operand::Physical(*r),
            Some(Assignment::Spill(offset)) => {
                Operand::Mem { base: Box::new(Operand::Physical(FP)), offset: -(alloca_bytes as i64) - (*offset as i64) - WORD as i64 }
            }
            None => Operand::Physical(FP),
        },
        Operand::Mem { base, offset } => Operand::Mem { base: Box::new(substitute(base, alloc, frame_size, alloca_bytes)), offset: *offset },
        Operand::FrameSize => Operand::Imm(frame_size as i64),
        Operand::StackArg(k) => {
            // Overflow arg k sits just above the prologue's pushed
            // registers (callee-saved set + fp + lr), which `mov fp, sp`
            // then points straight at.
            let pushed = (alloc.callee_saved_used.len() as i64 + 2) * WORD as i64;
            Operand::Mem { base: Box::new(Operand::Physical(FP)), offset: pushed + *k as i64 * WORD as i64 }
        }
        other => other.clone(),
    }
}

/// A `Mov dest, src` where `dest == src` after register assignment does
/// nothing; phi resolution and argument shuffling both produce these often
/// enough to be worth a dedicated pass rather than folding into selection.
fn drop_redundant_copies(insts: &mut Vec<MInst>) {
    insts.retain(|inst| {
        if inst.opcode != Opcode::Mov || inst.cond.is_some() {
            return true;
        }
        !matches!((&inst.dest, inst.operands.first()), (Some(d), Some(s)) if d == s)
    });
}

/// A `B L` immediately before the label `L` it targets is a no-op fallthrough.
fn collapse_trivial_branches(insts: &mut Vec<MInst>) {
    let mut i = 0;
    while i < insts.len() {
        if insts[i].opcode == Opcode::B {
            if let (Some(Operand::Label(target)), Some(next)) = (&insts[i].dest, insts.get(i + 1)) {
                if next.opcode == Opcode::Label {
                    if let Some(Operand::Label(next_name)) = &next.dest {
                        if target == next_name {
                            insts.remove(i);
                            continue;
                        }
                    }
                }
            }
        }
        i += 1;
    }
}

fn print_inst(out: &mut String, inst: &MInst, callee_saved: &[PhysReg], frame_size: u32) {
    match inst.opcode {
        Opcode::Label => {
            if let Some(Operand::Label(l)) = &inst.dest {
                let _ = writeln!(out, "{l}:");
            }
        }
        Opcode::Comment => {
            if let Some(c) = &inst.comment {
                let _ = writeln!(out, "    @ {c}");
            }
        }
        Opcode::FuncBegin => {
            let _ = writeln!(out, "    push {{{}, lr}}", reg_list(callee_saved));
            let _ = writeln!(out, "    mov fp, sp");
            if frame_size > 0 {
                let _ = writeln!(out, "    sub sp, sp, #{frame_size}");
            }
        }
        Opcode::FuncEnd => {
            if frame_size > 0 {
                let _ = writeln!(out, "    add sp, sp, #{frame_size}");
            }
            let _ = writeln!(out, "    pop {{{}, pc}}", reg_list(callee_saved));
        }
        Opcode::DataWord => {
            if let Some(Operand::Imm(v)) = inst.operands.first() {
                let _ = writeln!(out, "    .word {v}");
            }
        }
        _ => print_real_inst(out, inst),
    }
}

fn reg_list(callee_saved: &[PhysReg]) -> String {
    let mut names: Vec<String> = callee_saved.iter().map(|r| r.name()).collect();
    names.push(FP.name());
    names.join(", ")
}

fn print_real_inst(out: &mut String, inst: &MInst) {
    let mnemonic = mnemonic(inst.opcode, inst.cond);
    let mut parts: Vec<String> = Vec::new();
    if let Some(d) = &inst.dest {
        parts.push(format_operand(d));
    }
    for o in &inst.operands {
        parts.push(format_operand(o));
    }
    let _ = writeln!(out, "    {mnemonic} {}", parts.join(", "));
}

fn mnemonic(opcode: Opcode, cond: Option<Condition>) -> String {
    let base = match opcode {
        Opcode::Mov => "mov",
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Mul => "mul",
        Opcode::SDiv => "sdiv",
        Opcode::UDiv => "udiv",
        Opcode::And => "and",
        Opcode::Orr => "orr",
        Opcode::Eor => "eor",
        Opcode::Lsl => "lsl",
        Opcode::Lsr => "lsr",
        Opcode::Asr => "asr",
        Opcode::Cmp => "cmp",
        Opcode::Ldr => "ldr",
        Opcode::Str => "str",
        Opcode::B => "b",
        Opcode::Bcond => "b",
        Opcode::Bl => "bl",
        Opcode::Bx => "bx",
        Opcode::Push => "push",
        Opcode::Pop => "pop",
        _ => unreachable!("pseudo-ops handled in print_inst"),
    };
    match cond {
        Some(c) if c != Condition::Al => format!("{base}{}", c.mnemonic()),
        _ => base.to_string(),
    }
}

fn format_operand(op: &Operand) -> String {
    match op {
        Operand::Physical(r) => r.name(),
        Operand::Imm(v) => format!("#{v}"),
        Operand::Mem { base, offset } => {
            if *offset == 0 {
                format!("[{}]", format_operand(base))
            } else {
                format!("[{}, #{offset}]", format_operand(base))
            }
        }
        Operand::Label(l) => l.clone(),
        Operand::Cond(c) => c.mnemonic().to_string(),
        Operand::Virtual(v) => format!("%v{}", v.0),
        Operand::FrameSize => "#<frame>".to_string(),
        Operand::StackArg(k) => format!("#<stackarg{k}>"),
    }
}

pub fn cfg_for(func: &SelectedFunction) -> super::cfg::Cfg {
    build_cfg(&func.insts)
}

#[allow(dead_code)]
fn unused_reserved_refs() -> (PhysReg, PhysReg) {
    (SP, LR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::arm::cfg::{compute_intervals, compute_liveness, LiveInterval};
    use crate::backend::arm::mir::VReg;
    use crate::backend::arm::regalloc::allocate;

    fn fake_alloc(assignments: rustc_hash::FxHashMap<VReg, Assignment>) -> AllocationResult {
        AllocationResult { assignments, callee_saved_used: vec![PhysReg(4)], spill_slots: 0 }
    }

    #[test]
    fn drops_self_copy_after_allocation() {
        let mut map = rustc_hash::FxHashMap::default();
        map.insert(VReg(0), Assignment::Register(PhysReg(4)));
        let insts = vec![MInst::new(Opcode::Mov, Some(Operand::Virtual(VReg(0))), vec![Operand::Virtual(VReg(0))])];
        let mut substituted = substitute_operands(&insts, &fake_alloc(map), 0, 0);
        drop_redundant_copies(&mut substituted);
        assert!(substituted.is_empty());
    }

    #[test]
    fn collapses_branch_into_following_label() {
        let mut insts = vec![
            MInst::new(Opcode::B, Some(Operand::Label("next".into())), vec![]),
            MInst::new(Opcode::Label, Some(Operand::Label("next".into())), vec![]),
        ];
        collapse_trivial_branches(&mut insts);
        assert_eq!(insts.len(), 1);
    }

    #[test]
    fn full_pipeline_allocates_and_emits_without_panicking() {
        use crate::backend::arm::select::select_function;
        use crate::common::source::Span;
        use crate::common::types::{FunctionSig, Type};
        use crate::ir::instruction::{BinOp, Instruction};
        use crate::ir::module::Module;
        use crate::ir::value::Linkage;
        use std::rc::Rc;

        let mut m = Module::new();
        let sig = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("add1", sig, Linkage::External, Span::dummy());
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let sum = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: p, rhs: one }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());

        let sf = select_function(&m, f);
        let cfg = build_cfg(&sf.insts);
        let liveness = compute_liveness(&sf.insts, &cfg);
        let intervals: Vec<LiveInterval> = compute_intervals(&sf.insts, &cfg, &liveness);
        let alloc = allocate(intervals).unwrap();
        let text = emit_function(&sf, &alloc);
        assert!(text.contains("add1:"));
        assert!(text.contains("push"));
    }
}
