//! Inlining (spec §4.4): replace calls to small `Inline`-linkage functions
//! with a copy of the callee's body. Limited to straight-line (single-block)
//! callees — a function under the size threshold that takes more than one
//! block to express is rare enough that skipping it costs little, and it
//! avoids having to thread multi-block control flow and return-value phis
//! through the call site.

use crate::common::source::Span;
use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::value::{Linkage, ValueId};
use rustc_hash::FxHashMap;

const INLINE_SIZE_THRESHOLD: usize = 32;

pub fn run_module(module: &mut Module) -> bool {
    let candidates: Vec<ValueId> = module.functions().filter(|&f| is_inline_candidate(module, f)).collect();
    if candidates.is_empty() {
        return false;
    }
    let call_sites = collect_calls(module, &candidates);
    let mut changed = false;
    for call_inst in call_sites {
        if !module.is_live(call_inst) {
            continue;
        }
        let (callee, args) = match module.inst(call_inst) {
            Instruction::Call { callee, args } => (*callee, args.clone()),
            _ => continue,
        };
        if !candidates.contains(&callee) {
            continue;
        }
        inline_call(module, call_inst, callee, &args);
        changed = true;
    }
    changed
}

fn is_inline_candidate(module: &Module, f: ValueId) -> bool {
    if module.function_linkage(f) != Linkage::Inline {
        return false;
    }
    let blocks = module.function_blocks(f);
    if blocks.len() != 1 {
        return false;
    }
    let insts = module.block_insts(blocks[0]);
    if insts.len() > INLINE_SIZE_THRESHOLD {
        return false;
    }
    !calls_function(module, blocks[0], f)
}

fn calls_function(module: &Module, block: ValueId, target: ValueId) -> bool {
    module.block_insts(block).iter().any(|&i| matches!(module.inst(i), Instruction::Call { callee, .. } if *callee == target))
}

fn collect_calls(module: &Module, candidates: &[ValueId]) -> Vec<ValueId> {
    let mut calls = Vec::new();
    for func in module.functions() {
        for &block in module.function_blocks(func) {
            for &inst in module.block_insts(block) {
                if let Instruction::Call { callee, .. } = module.inst(inst) {
                    if candidates.contains(callee) {
                        calls.push(inst);
                    }
                }
            }
        }
    }
    calls
}

fn inline_call(module: &mut Module, call_inst: ValueId, callee: ValueId, args: &[ValueId]) {
    let block = find_owning_block(module, call_inst);
    let callee_block = module.function_blocks(callee)[0];
    let params = module.function_params(callee).to_vec();

    let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for (param, arg) in params.iter().zip(args.iter()) {
        value_map.insert(*param, *arg);
    }

    let insts = module.block_insts(callee_block).to_vec();
    let mut ret_value: Option<ValueId> = None;
    for &inst_id in &insts {
        let inst = module.inst(inst_id).clone();
        if let Instruction::Ret { value } = inst {
            ret_value = value.map(|v| remap_value(&value_map, v));
            continue;
        }
        let remapped = remap_inst(&inst, &value_map);
        let ty = module.ty(inst_id).clone();
        let new_id = module.insert_before(block, call_inst, ty, remapped, Span::dummy());
        value_map.insert(inst_id, new_id);
    }

    if let Some(v) = ret_value {
        module.replace_all_uses_with(call_inst, v);
    }
    module.erase(block, call_inst);
}

fn remap_value(map: &FxHashMap<ValueId, ValueId>, id: ValueId) -> ValueId {
    *map.get(&id).unwrap_or(&id)
}

fn remap_inst(inst: &Instruction, map: &FxHashMap<ValueId, ValueId>) -> Instruction {
    match inst {
        Instruction::Binary { op, lhs, rhs } => Instruction::Binary { op: *op, lhs: remap_value(map, *lhs), rhs: remap_value(map, *rhs) },
        Instruction::Unary { op, operand } => Instruction::Unary { op: *op, operand: remap_value(map, *operand) },
        Instruction::Load { ptr } => Instruction::Load { ptr: remap_value(map, *ptr) },
        Instruction::Store { ptr, value } => Instruction::Store { ptr: remap_value(map, *ptr), value: remap_value(map, *value) },
        Instruction::Cast { kind, operand } => Instruction::Cast { kind: *kind, operand: remap_value(map, *operand) },
        Instruction::Alloca { allocated_ty } => Instruction::Alloca { allocated_ty: allocated_ty.clone() },
        Instruction::Gep { base, indices } => Instruction::Gep { base: remap_value(map, *base), indices: indices.iter().map(|&i| remap_value(map, i)).collect() },
        Instruction::Call { callee, args } => Instruction::Call { callee: *callee, args: args.iter().map(|&a| remap_value(map, a)).collect() },
        other => other.clone(),
    }
}

fn find_owning_block(module: &Module, inst_id: ValueId) -> ValueId {
    for func in module.functions() {
        for &block in module.function_blocks(func) {
            if module.block_insts(block).contains(&inst_id) {
                return block;
            }
        }
    }
    panic!("instruction not found in any block")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::BinOp;
    use std::rc::Rc;

    fn binop_sig(n: usize) -> Type {
        Type::Function(Rc::new(FunctionSig { params: vec![Type::i32_ty(); n], ret: Box::new(Type::i32_ty()) }))
    }

    #[test]
    fn inlines_small_function_call() {
        let mut m = Module::new();
        let callee = m.add_function("add1", binop_sig(1), Linkage::Inline, Span::dummy());
        let cp = m.add_param(callee, Type::i32_ty(), Span::dummy());
        let cb = m.add_block(callee, "entry", Span::dummy());
        let one = m.const_int(Type::i32_ty(), 1);
        let sum = m.append_inst(cb, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: cp, rhs: one }, Span::dummy());
        m.append_inst(cb, Type::Void, Instruction::Ret { value: Some(sum) }, Span::dummy());

        let caller = m.add_function("caller", binop_sig(1), Linkage::External, Span::dummy());
        let arg_param = m.add_param(caller, Type::i32_ty(), Span::dummy());
        let cab = m.add_block(caller, "entry", Span::dummy());
        let call = m.append_inst(cab, Type::i32_ty(), Instruction::Call { callee, args: vec![arg_param] }, Span::dummy());
        m.append_inst(cab, Type::Void, Instruction::Ret { value: Some(call) }, Span::dummy());

        assert!(run_module(&mut m));
        assert!(!m.is_live(call));
        let has_add = m.block_insts(cab).iter().any(|&i| m.is_live(i) && matches!(m.inst(i), Instruction::Binary { op: BinOp::Add, .. }));
        assert!(has_add);
    }

    #[test]
    fn skips_self_recursive_function() {
        let mut m = Module::new();
        let callee = m.add_function("rec", binop_sig(1), Linkage::Inline, Span::dummy());
        let cp = m.add_param(callee, Type::i32_ty(), Span::dummy());
        let cb = m.add_block(callee, "entry", Span::dummy());
        let call = m.append_inst(cb, Type::i32_ty(), Instruction::Call { callee, args: vec![cp] }, Span::dummy());
        m.append_inst(cb, Type::Void, Instruction::Ret { value: Some(call) }, Span::dummy());

        let caller = m.add_function("caller", binop_sig(1), Linkage::External, Span::dummy());
        let arg_param = m.add_param(caller, Type::i32_ty(), Span::dummy());
        let cab = m.add_block(caller, "entry", Span::dummy());
        let outer_call = m.append_inst(cab, Type::i32_ty(), Instruction::Call { callee, args: vec![arg_param] }, Span::dummy());
        m.append_inst(cab, Type::Void, Instruction::Ret { value: Some(outer_call) }, Span::dummy());

        assert!(!run_module(&mut m));
        assert!(m.is_live(outer_call));
    }
}
