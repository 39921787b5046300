//! Dead code elimination (spec §4.4): remove instructions with no side
//! effects and no uses, repeated to a fixpoint within one function.

use crate::ir::module::Module;
use crate::ir::value::ValueId;

pub fn run_function(module: &mut Module, func: ValueId) -> bool {
    let mut changed_overall = false;
    loop {
        let mut changed = false;
        for &block in module.function_blocks(func).to_vec().iter() {
            for &inst in module.block_insts(block).to_vec().iter() {
                if !module.is_live(inst) {
                    continue;
                }
                if module.has_uses(inst) {
                    continue;
                }
                let is_dead = !module.inst(inst).has_side_effects(|callee| is_pure_callee(module, callee));
                if is_dead {
                    module.erase(block, inst);
                    changed = true;
                }
            }
        }
        changed_overall |= changed;
        if !changed {
            break;
        }
    }
    changed_overall
}

fn is_pure_callee(module: &Module, callee: ValueId) -> bool {
    if module.functions().any(|f| f == callee) {
        function_is_pure(module, callee)
    } else {
        false
    }
}

fn function_is_pure(module: &Module, func: ValueId) -> bool {
    // Mirrors `Module::set_function_pure`'s flag; the purity analysis that
    // sets it lives alongside the inliner (spec §4.4's call-graph work).
    module.function_purity(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::source::Span;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::instruction::{BinOp, Instruction};
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_function(m: &mut Module) -> (ValueId, ValueId) {
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (f, b)
    }

    #[test]
    fn removes_unused_pure_instruction() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let a = m.const_int(Type::i32_ty(), 1);
        let bb = m.const_int(Type::i32_ty(), 2);
        let dead = m.append_inst(b, Type::i32_ty(), Instruction::Binary { op: BinOp::Add, lhs: a, rhs: bb }, Span::dummy());
        let ret_val = m.const_int(Type::i32_ty(), 0);
        m.append_inst(b, Type::Void, Instruction::Ret { value: Some(ret_val) }, Span::dummy());
        assert!(run_function(&mut m, f));
        assert!(!m.is_live(dead));
    }

    #[test]
    fn keeps_store_even_if_unused() {
        let mut m = Module::new();
        let (f, b) = new_function(&mut m);
        let ptr = m.append_inst(b, Type::ptr(Type::i32_ty()), Instruction::Alloca { allocated_ty: Type::i32_ty() }, Span::dummy());
        let v = m.const_int(Type::i32_ty(), 1);
        let store = m.append_inst(b, Type::Void, Instruction::Store { ptr, value: v }, Span::dummy());
        m.append_inst(b, Type::Void, Instruction::Ret { value: None }, Span::dummy());
        run_function(&mut m, f);
        assert!(m.is_live(store));
    }
}
