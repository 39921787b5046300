//! Textual SSA printer (spec §6/§8: `-emit-ir` output, and the form
//! round-tripped by [`crate::ir::reader`] in idempotence tests).
//!
//! The format is deliberately minimal: one function per block of text,
//! values named by a per-function, first-appearance-order `%N`/`bbN` token
//! rather than the raw arena `ValueId` — the arena interleaves constants,
//! globals and instructions from every function in one id space, so raw ids
//! are not stable under a reparse. Renumbering from scratch on every print
//! is what makes [`crate::ir::reader::parse_module`] able to reproduce the
//! same text byte-for-byte.

use crate::common::types::Type;
use crate::ir::instruction::{BinOp, CastKind, Instruction, UnOp};
use crate::ir::module::Module;
use crate::ir::value::{Linkage, ValueId};
use rustc_hash::FxHashMap;
use std::fmt::Write as _;

pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    for global in module.globals() {
        print_global(module, global, &mut out);
    }
    for func in module.functions() {
        print_function(module, func, &mut out);
    }
    out
}

fn print_global(module: &Module, id: ValueId, out: &mut String) {
    let (name, linkage, init) = module.global_info(id);
    let pointee = module.ty(id).deref().unwrap_or(Type::Void);
    let init_text = match init {
        Some(v) => match module.const_int_value(v) {
            Some(n) => n.to_string(),
            None => "zeroinitializer".to_string(),
        },
        None => "zeroinitializer".to_string(),
    };
    writeln!(out, "global {} {} {} = {}", linkage_str(linkage), pointee, name, init_text).unwrap();
}

/// Assigns stable `%N` tokens to every instruction and parameter of one
/// function, and `bbN` labels to every block, both in first-appearance
/// (i.e. print) order.
struct Namer {
    values: FxHashMap<ValueId, String>,
    blocks: FxHashMap<ValueId, String>,
    next_value: u32,
    next_block: u32,
}

impl Namer {
    fn new() -> Namer {
        Namer { values: FxHashMap::default(), blocks: FxHashMap::default(), next_value: 0, next_block: 0 }
    }

    fn name_value(&mut self, id: ValueId) -> String {
        self.values
            .entry(id)
            .or_insert_with(|| {
                let n = self.next_value;
                self.next_value += 1;
                format!("%{}", n)
            })
            .clone()
    }

    fn name_block(&mut self, id: ValueId) -> String {
        self.blocks
            .entry(id)
            .or_insert_with(|| {
                let n = self.next_block;
                self.next_block += 1;
                format!("bb{}", n)
            })
            .clone()
    }
}

fn print_function(module: &Module, func: ValueId, out: &mut String) {
    let name = module.function_name(func);
    let linkage = module.function_linkage(func);
    let params = module.function_params(func);
    let blocks = module.function_blocks(func);

    let mut namer = Namer::new();
    let param_list = params
        .iter()
        .map(|&p| format!("{} {}", module.ty(p), namer.name_value(p)))
        .collect::<Vec<_>>()
        .join(", ");

    if blocks.is_empty() {
        writeln!(out, "declare {} {}({})", linkage_str(linkage), name, param_list).unwrap();
        return;
    }

    // Pre-assign block labels in appearance order so forward branches print
    // the label a later pass over the same block list would also assign.
    for &block in blocks {
        namer.name_block(block);
    }

    writeln!(out, "function {} {}({}) {{", linkage_str(linkage), name, param_list).unwrap();
    for &block in blocks {
        writeln!(out, "{}:", namer.name_block(block)).unwrap();
        for &inst in module.block_insts(block) {
            writeln!(out, "  {}", format_inst(module, inst, &mut namer)).unwrap();
        }
    }
    writeln!(out, "}}").unwrap();
}

fn linkage_str(linkage: Linkage) -> &'static str {
    match linkage {
        Linkage::External => "external",
        Linkage::Internal => "internal",
        Linkage::Inline => "inline",
        Linkage::GlobalCtor => "ctor",
    }
}

fn format_value_ref(module: &Module, id: ValueId, namer: &mut Namer) -> String {
    match module.const_int_value(id) {
        Some(v) => v.to_string(),
        None if module.is_block(id) => namer.name_block(id),
        None => namer.name_value(id),
    }
}

fn format_inst(module: &Module, id: ValueId, namer: &mut Namer) -> String {
    let ty = module.ty(id).clone();
    let inst = module.inst(id).clone();
    let name = namer.name_value(id);
    match &inst {
        Instruction::Binary { op, lhs, rhs } => format!(
            "{} = {} {} {}, {}",
            name,
            binop_mnemonic(*op),
            ty,
            format_value_ref(module, *lhs, namer),
            format_value_ref(module, *rhs, namer)
        ),
        Instruction::Unary { op, operand } => format!(
            "{} = {} {} {}",
            name,
            match op {
                UnOp::Neg => "neg",
                UnOp::Not => "not",
            },
            ty,
            format_value_ref(module, *operand, namer)
        ),
        Instruction::Load { ptr } => format!("{} = load {}, {}", name, ty, format_value_ref(module, *ptr, namer)),
        Instruction::Store { ptr, value } => {
            let v = format_value_ref(module, *value, namer);
            let p = format_value_ref(module, *ptr, namer);
            format!("store {}, {}", v, p)
        }
        Instruction::Cast { kind, operand } => {
            let o = format_value_ref(module, *operand, namer);
            format!("{} = {} {} to {}", name, cast_mnemonic(*kind), o, ty)
        }
        Instruction::Alloca { allocated_ty } => format!("{} = alloca {}", name, allocated_ty),
        Instruction::Gep { base, indices } => {
            let b = format_value_ref(module, *base, namer);
            let idx = indices.iter().map(|i| format_value_ref(module, *i, namer)).collect::<Vec<_>>().join(", ");
            format!("{} = gep {}, {}", name, b, idx)
        }
        Instruction::Call { callee, args } => {
            let c = format_value_ref(module, *callee, namer);
            let a = args.iter().map(|x| format_value_ref(module, *x, namer)).collect::<Vec<_>>().join(", ");
            format!("{} = call {} {}({})", name, ty, c, a)
        }
        Instruction::Phi { incomings } => {
            let edges = incomings
                .iter()
                .map(|e| format!("{} : {}", format_value_ref(module, e.value, namer), namer.name_block(e.block)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} = phi {} [{}]", name, ty, edges)
        }
        Instruction::Br { target } => format!("br {}", namer.name_block(*target)),
        Instruction::CondBr { cond, then_blk, else_blk } => {
            let c = format_value_ref(module, *cond, namer);
            let t = namer.name_block(*then_blk);
            let e = namer.name_block(*else_blk);
            format!("br {}, {}, {}", c, t, e)
        }
        Instruction::Ret { value } => match value {
            Some(v) => format!("ret {}", format_value_ref(module, *v, namer)),
            None => "ret void".to_string(),
        },
    }
}

fn binop_mnemonic(op: BinOp) -> &'static str {
    op.mnemonic()
}

fn cast_mnemonic(kind: CastKind) -> &'static str {
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
    use std::rc::Rc;

    #[test]
    fn prints_a_trivial_function() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("main", fty, Linkage::External, Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        let a = m.const_int(Type::i32_ty(), 1);
        let b = m.const_int(Type::i32_ty(), 2);
        let sum = m.append_inst(entry, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: a, rhs: b }, Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());

        let text = print_module(&m);
        assert!(text.contains("function external main()"));
        assert!(text.contains("= add i32 1, 2"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn renumbers_values_independent_of_raw_ids() {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty()], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("id", fty, Linkage::External, Span::dummy());
        let p = m.add_param(f, Type::i32_ty(), Span::dummy());
        let entry = m.add_block(f, "entry", Span::dummy());
        m.append_inst(entry, Type::Void, Instruction::Ret { value: Some(p) }, Span::dummy());
        let text = print_module(&m);
        assert!(text.contains("id(i32 %0)"));
        assert!(text.contains("ret %0"));
    }
}
