//! C2: the IR builder. A cursor-based facade over [`Module`] that tracks an
//! insertion point and exposes one `create_*` method per instruction shape,
//! applying MimiC's implicit numeric promotion (spec §3.1's
//! `common_numeric_type`) where an operator combines mismatched operand
//! types.

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::source::Span;
use crate::common::types::Type;
use crate::ir::instruction::{BinOp, CastKind, Instruction, PhiEdge, UnOp};
use crate::ir::module::Module;
use crate::ir::value::ValueId;

/// Where new instructions land: append to the end of a block, or insert
/// immediately before a named instruction already in that block.
#[derive(Clone, Copy)]
enum InsertPoint {
    End(ValueId),
    Before(ValueId, ValueId),
}

pub struct IrBuilder<'m> {
    module: &'m mut Module,
    point: Option<InsertPoint>,
    current_span: Span,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self { module, point: None, current_span: Span::dummy() }
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    pub fn module_mut(&mut self) -> &mut Module {
        self.module
    }

    pub fn set_span(&mut self, span: Span) {
        self.current_span = span;
    }

    pub fn position_at_end(&mut self, block: ValueId) {
        self.point = Some(InsertPoint::End(block));
    }

    pub fn position_before(&mut self, block: ValueId, inst: ValueId) {
        self.point = Some(InsertPoint::Before(block, inst));
    }

    pub fn current_block(&self) -> Option<ValueId> {
        match self.point {
            Some(InsertPoint::End(b)) | Some(InsertPoint::Before(b, _)) => Some(b),
            None => None,
        }
    }

    /// True once the current block already carries a terminator — callers
    /// use this to skip emitting unreachable instructions after `return`,
    /// `break`, or `continue` (spec §8: trailing dead code after an
    /// unconditional jump is simply never appended to the block).
    pub fn block_is_terminated(&self) -> bool {
        match self.current_block() {
            Some(b) => self.module.block_terminator(b).is_some(),
            None => true,
        }
    }

    fn emit(&mut self, ty: Type, inst: Instruction) -> ValueId {
        let span = self.current_span;
        match self.point.expect("builder has no insertion point") {
            InsertPoint::End(b) => self.module.append_inst(b, ty, inst, span),
            InsertPoint::Before(b, before) => self.module.insert_before(b, before, ty, inst, span),
        }
    }

    // ---- arithmetic / logical ----

    /// Build a binary operator, applying implicit numeric promotion to a
    /// common type when the operand types differ (spec §3.1). `diags` is
    /// used only to report the (rare) case where no common type exists.
    pub fn create_binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, diags: &mut DiagnosticEngine) -> ValueId {
        let lhs_ty = self.module.ty(lhs).clone();
        let rhs_ty = self.module.ty(rhs).clone();
        let result_ty = if op.is_comparison() {
            Type::i32_ty()
        } else {
            match lhs_ty.common_numeric_type(&rhs_ty) {
                Some(t) => t,
                None => {
                    diags.emit(Diagnostic::error(
                        format!("no common type for operands of types {} and {}", lhs_ty, rhs_ty),
                        self.current_span,
                    ));
                    lhs_ty.clone()
                }
            }
        };
        self.emit(result_ty, Instruction::Binary { op, lhs, rhs })
    }

    pub fn create_unary(&mut self, op: UnOp, operand: ValueId) -> ValueId {
        let ty = self.module.ty(operand).clone();
        self.emit(ty, Instruction::Unary { op, operand })
    }

    pub fn create_load(&mut self, ptr: ValueId) -> ValueId {
        let pointee = self.module.ty(ptr).element_type().expect("load of non-pointer");
        self.emit(pointee, Instruction::Load { ptr })
    }

    pub fn create_store(&mut self, ptr: ValueId, value: ValueId) -> ValueId {
        self.emit(Type::Void, Instruction::Store { ptr, value })
    }

    pub fn create_cast(&mut self, kind: CastKind, operand: ValueId, target_ty: Type) -> ValueId {
        self.emit(target_ty, Instruction::Cast { kind, operand })
    }

    pub fn create_alloca(&mut self, allocated_ty: Type) -> ValueId {
        let ptr_ty = Type::ptr(allocated_ty.clone());
        self.emit(ptr_ty, Instruction::Alloca { allocated_ty })
    }

    pub fn create_gep(&mut self, base: ValueId, indices: Vec<ValueId>, result_ty: Type) -> ValueId {
        self.emit(result_ty, Instruction::Gep { base, indices })
    }

    pub fn create_call(&mut self, callee: ValueId, args: Vec<ValueId>, ret_ty: Type) -> ValueId {
        self.emit(ret_ty, Instruction::Call { callee, args })
    }

    pub fn create_phi(&mut self, ty: Type, incomings: Vec<PhiEdge>) -> ValueId {
        self.emit(ty, Instruction::Phi { incomings })
    }

    /// Grow a phi's operand list with one more `(block, value)` edge.
    /// `register_operand_uses` only runs when an instruction is first
    /// created, so the new slots' use edges are registered here instead.
    pub fn add_incoming(&mut self, phi: ValueId, block: ValueId, value: ValueId) {
        let slot_idx = self.module.inst(phi).operand_count() as u32;
        if let Instruction::Phi { incomings } = self.module.slot_mut(phi).as_inst_mut().unwrap() {
            incomings.push(PhiEdge { block, value });
        }
        self.module.register_use_external(block, phi, slot_idx);
        self.module.register_use_external(value, phi, slot_idx + 1);
    }

    // ---- control flow ----

    pub fn create_br(&mut self, target: ValueId) -> ValueId {
        self.emit(Type::Void, Instruction::Br { target })
    }

    pub fn create_cond_br(&mut self, cond: ValueId, then_blk: ValueId, else_blk: ValueId) -> ValueId {
        self.emit(Type::Void, Instruction::CondBr { cond, then_blk, else_blk })
    }

    pub fn create_ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.emit(Type::Void, Instruction::Ret { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{FunctionSig, Type};
    use crate::ir::value::Linkage;
    use std::rc::Rc;

    fn new_module_with_block() -> (Module, ValueId) {
        let mut m = Module::new();
        let fty = Type::Function(Rc::new(FunctionSig { params: vec![], ret: Box::new(Type::i32_ty()) }));
        let f = m.add_function("f", fty, Linkage::Internal, Span::dummy());
        let b = m.add_block(f, "entry", Span::dummy());
        (m, b)
    }

    #[test]
    fn create_binary_promotes_to_common_type() {
        let (mut m, b) = new_module_with_block();
        let mut diags = DiagnosticEngine::new();
        let a = m.const_int(Type::i8_ty(), 1);
        let bb = m.const_int(Type::i32_ty(), 2);
        let mut builder = IrBuilder::new(&mut m);
        builder.position_at_end(b);
        let add = builder.create_binary(BinOp::Add, a, bb, &mut diags);
        assert_eq!(diags.error_count(), 0);
        assert_eq!(*builder.module().ty(add), Type::i32_ty());
    }

    #[test]
    fn comparison_result_is_i32() {
        let (mut m, b) = new_module_with_block();
        let mut diags = DiagnosticEngine::new();
        let a = m.const_int(Type::i32_ty(), 1);
        let bb = m.const_int(Type::i32_ty(), 2);
        let mut builder = IrBuilder::new(&mut m);
        builder.position_at_end(b);
        let cmp = builder.create_binary(BinOp::ICmpSlt, a, bb, &mut diags);
        assert_eq!(*builder.module().ty(cmp), Type::i32_ty());
    }

    #[test]
    fn alloca_yields_pointer_type() {
        let (mut m, b) = new_module_with_block();
        let mut builder = IrBuilder::new(&mut m);
        builder.position_at_end(b);
        let a = builder.create_alloca(Type::i32_ty());
        assert_eq!(*builder.module().ty(a), Type::ptr(Type::i32_ty()));
    }
}
