//! AST -> SSA IR lowering.
//!
//! Every local variable gets a stack slot (`alloca`) at its declaration
//! point, reads and writes go through `load`/`store`; [`crate::ir::mem2reg`]
//! promotes the scalar ones to real SSA values afterward. This mirrors the
//! two-stage shape real C-family compilers use (naive memory IR first, SSA
//! construction as a separate pass) rather than threading a renaming
//! environment through the lowerer itself.

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::types::{StructDef, Type};
use crate::frontend::ast::{self, Expr, ExternalDecl, Stmt, TranslationUnit};
use crate::frontend::const_eval;
use crate::ir::builder::IrBuilder;
use crate::ir::instruction::{BinOp as IrBinOp, CastKind, UnOp as IrUnOp};
use crate::ir::module::Module;
use crate::ir::value::{Linkage as IrLinkage, ValueId};
use std::collections::HashMap;
use std::rc::Rc;

pub fn lower_translation_unit(tu: &TranslationUnit, structs: &HashMap<String, Rc<StructDef>>, diags: &mut DiagnosticEngine) -> Module {
    let mut module = Module::new();
    let mut function_ids: HashMap<String, ValueId> = HashMap::new();
    let mut global_ids: HashMap<String, ValueId> = HashMap::new();

    for decl in &tu.decls {
        if let ExternalDecl::Function(f) = decl {
            let sig = Type::Function(Rc::new(crate::common::types::FunctionSig {
                params: f.params.iter().map(|p| p.ty.decay_for_param()).collect(),
                ret: Box::new(f.ret_ty.clone()),
            }));
            let linkage = ir_linkage(f.linkage);
            let id = module.add_function(&f.name, sig, linkage, f.span);
            for p in &f.params {
                module.add_param(id, p.ty.decay_for_param(), p.span);
            }
            function_ids.insert(f.name.clone(), id);
        }
    }

    for decl in &tu.decls {
        if let ExternalDecl::Global(g) = decl {
            let init_id = g.init.as_ref().and_then(|e| const_eval::eval_const_int(e)).map(|v| module.const_int(g.ty.to_rvalue(), v));
            let linkage = ir_linkage(g.linkage);
            let id = module.add_global(&g.name, g.ty.clone(), linkage, init_id, true, g.span);
            global_ids.insert(g.name.clone(), id);
        }
    }

    for decl in &tu.decls {
        if let ExternalDecl::Function(f) = decl {
            if let Some(body) = &f.body {
                let func_id = function_ids[&f.name];
                let mut fl = FnLower {
                    module: &mut module,
                    diags,
                    function_ids: &function_ids,
                    global_ids: &global_ids,
                    _structs: structs,
                    scopes: vec![HashMap::new()],
                    func: func_id,
                    current_block: ValueId::INVALID,
                    loop_stack: Vec::new(),
                };
                fl.lower_function_body(f, body);
            }
        }
    }

    let _ = structs;
    module
}

/// Build a positioned `IrBuilder` borrowing only `module`, never the rest of
/// `FnLower` — so callers can still pass `self.diags` as a separate argument
/// in the same expression without the borrow checker seeing a conflict.
fn new_builder(module: &mut Module, block: ValueId) -> IrBuilder<'_> {
    let mut b = IrBuilder::new(module);
    b.position_at_end(block);
    b
}

fn ir_linkage(l: ast::Linkage) -> IrLinkage {
    match l {
        ast::Linkage::External => IrLinkage::External,
        ast::Linkage::Internal => IrLinkage::Internal,
    }
}

struct FnLower<'a, 'm> {
    module: &'m mut Module,
    diags: &'a mut DiagnosticEngine,
    function_ids: &'a HashMap<String, ValueId>,
    global_ids: &'a HashMap<String, ValueId>,
    _structs: &'a HashMap<String, Rc<StructDef>>,
    scopes: Vec<HashMap<String, (ValueId, Type)>>,
    func: ValueId,
    current_block: ValueId,
    /// (continue target, break target) per enclosing loop.
    loop_stack: Vec<(ValueId, ValueId)>,
}

impl<'a, 'm> FnLower<'a, 'm> {
    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare_var(&mut self, name: &str, ptr: ValueId, ty: Type) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), (ptr, ty));
    }

    fn lookup_var(&self, name: &str) -> Option<(ValueId, Type)> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    fn is_terminated(&self) -> bool {
        self.module.block_terminator(self.current_block).is_some()
    }

    fn lower_function_body(&mut self, f: &ast::FunctionDecl, body: &ast::Block) {
        let entry = self.module.add_block(self.func, "entry", f.span);
        self.current_block = entry;

        let params = self.module.function_params(self.func).to_vec();
        for (p, param_id) in f.params.iter().zip(params) {
            let param_ty = self.module.ty(param_id).clone();
            let ptr = new_builder(self.module, self.current_block).create_alloca(param_ty.clone());
            new_builder(self.module, self.current_block).create_store(ptr, param_id);
            self.declare_var(&p.name, ptr, param_ty);
        }

        self.lower_block(body);

        if !self.is_terminated() {
            if f.ret_ty.is_void() {
                new_builder(self.module, self.current_block).create_ret(None);
            } else {
                // Sema already flags a missing return in a non-void function;
                // this keeps the IR well-formed (every block terminated) even
                // though the source is rejected.
                let zero = self.module.const_zero(f.ret_ty.to_rvalue());
                new_builder(self.module, self.current_block).create_ret(Some(zero));
            }
        }
    }

    fn lower_block(&mut self, block: &ast::Block) {
        self.push_scope();
        for stmt in &block.stmts {
            if self.is_terminated() {
                break; // dead code after return/break/continue is simply not emitted
            }
            self.lower_stmt(stmt);
        }
        self.pop_scope();
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.lower_expr(e);
            }
            Stmt::LocalDecl { name, ty, init, .. } => {
                let ptr = new_builder(self.module, self.current_block).create_alloca(ty.clone());
                self.declare_var(name, ptr, ty.clone());
                if let Some(init) = init {
                    let v = self.lower_expr(init);
                    let v = self.coerce(v, ty);
                    new_builder(self.module, self.current_block).create_store(ptr, v);
                }
            }
            Stmt::Return(value, _) => {
                let v = value.as_ref().map(|e| self.lower_expr(e));
                new_builder(self.module, self.current_block).create_ret(v);
            }
            Stmt::If { cond, then_blk, else_blk, .. } => self.lower_if(cond, then_blk, else_blk.as_ref()),
            Stmt::While { cond, body, .. } => self.lower_while(cond, body),
            Stmt::Break(span) => match self.loop_stack.last() {
                Some(&(_, brk)) => {
                    new_builder(self.module, self.current_block).create_br(brk);
                }
                None => self.diags.emit(Diagnostic::error("'break' outside of a loop", *span)),
            },
            Stmt::Continue(span) => match self.loop_stack.last() {
                Some(&(cont, _)) => {
                    new_builder(self.module, self.current_block).create_br(cont);
                }
                None => self.diags.emit(Diagnostic::error("'continue' outside of a loop", *span)),
            },
            Stmt::Block(b) => self.lower_block(b),
        }
    }

    fn lower_if(&mut self, cond: &Expr, then_blk: &ast::Block, else_blk: Option<&ast::Block>) {
        let cond_v = self.lower_expr(cond);
        let cond_v = self.to_bool(cond_v);

        let then_bb = self.module.add_block(self.func, "if.then", then_blk.span);
        let else_bb = self.module.add_block(self.func, "if.else", then_blk.span);
        let merge_bb = self.module.add_block(self.func, "if.end", then_blk.span);

        new_builder(self.module, self.current_block).create_cond_br(cond_v, then_bb, else_bb);

        self.current_block = then_bb;
        self.lower_block(then_blk);
        if !self.is_terminated() {
            new_builder(self.module, self.current_block).create_br(merge_bb);
        }

        self.current_block = else_bb;
        if let Some(else_blk) = else_blk {
            self.lower_block(else_blk);
        }
        if !self.is_terminated() {
            new_builder(self.module, self.current_block).create_br(merge_bb);
        }

        self.current_block = merge_bb;
    }

    fn lower_while(&mut self, cond: &Expr, body: &ast::Block) {
        let cond_bb = self.module.add_block(self.func, "while.cond", body.span);
        let body_bb = self.module.add_block(self.func, "while.body", body.span);
        let end_bb = self.module.add_block(self.func, "while.end", body.span);

        new_builder(self.module, self.current_block).create_br(cond_bb);

        self.current_block = cond_bb;
        let cond_v = self.lower_expr(cond);
        let cond_v = self.to_bool(cond_v);
        new_builder(self.module, self.current_block).create_cond_br(cond_v, body_bb, end_bb);

        self.loop_stack.push((cond_bb, end_bb));
        self.current_block = body_bb;
        self.lower_block(body);
        if !self.is_terminated() {
            new_builder(self.module, self.current_block).create_br(cond_bb);
        }
        self.loop_stack.pop();

        self.current_block = end_bb;
    }

    /// Produce an i32 0/1 value for a branch condition, treating any nonzero
    /// integer/pointer as true.
    fn to_bool(&mut self, v: ValueId) -> ValueId {
        let zero = self.module.const_zero(self.module.ty(v).to_rvalue());
        new_builder(self.module, self.current_block).create_binary(IrBinOp::ICmpNe, v, zero, self.diags)
    }

    fn coerce(&mut self, v: ValueId, target: &Type) -> ValueId {
        let src = self.module.ty(v).clone();
        if src.is_identical(target) || src.unqualified().is_identical(target.unqualified()) {
            return v;
        }
        if src.is_integer() && target.is_integer() {
            let kind = if src.size() < target.size() {
                if src.is_signed() { CastKind::SExt } else { CastKind::ZExt }
            } else {
                CastKind::Trunc
            };
            return new_builder(self.module, self.current_block).create_cast(kind, v, target.to_rvalue());
        }
        if src.is_pointer() && target.is_integer() {
            return new_builder(self.module, self.current_block).create_cast(CastKind::PtrToInt, v, target.to_rvalue());
        }
        if src.is_integer() && target.is_pointer() {
            return new_builder(self.module, self.current_block).create_cast(CastKind::IntToPtr, v, target.to_rvalue());
        }
        v
    }

    /// Compute the address of an lvalue expression.
    fn lower_lvalue(&mut self, expr: &Expr) -> (ValueId, Type) {
        match expr {
            Expr::Ident { name, span } => {
                if let Some((ptr, ty)) = self.lookup_var(name) {
                    (ptr, ty)
                } else if let Some(&gid) = self.global_ids.get(name) {
                    let pointee = self.module.ty(gid).deref().unwrap();
                    (gid, pointee)
                } else {
                    self.diags.emit(Diagnostic::error(format!("use of undeclared identifier '{}'", name), *span));
                    let dummy = self.module.const_zero(Type::i32_ty());
                    (dummy, Type::i32_ty())
                }
            }
            Expr::Unary { op: ast::UnOp::Deref, operand, .. } => {
                let ptr = self.lower_expr(operand);
                let pointee = self.module.ty(ptr).element_type().unwrap_or(Type::i32_ty());
                (ptr, pointee)
            }
            Expr::Index { base, index, .. } => {
                let (base_ptr, base_ty) = self.lower_address_base(base);
                let idx = self.lower_expr(index);
                let elem_ty = base_ty.element_type().unwrap_or(Type::i32_ty());
                let result_ty = Type::ptr(elem_ty.clone());
                let gep = new_builder(self.module, self.current_block).create_gep(base_ptr, vec![idx], result_ty);
                (gep, elem_ty)
            }
            Expr::Member { base, field, span } => {
                let (base_ptr, base_ty) = self.lower_address_base(base);
                match base_ty.field(field) {
                    Some((idx, field_ty)) => {
                        let idx_v = self.module.const_int(Type::u32_ty(), idx as i64);
                        let result_ty = Type::ptr(field_ty.clone());
                        let gep = new_builder(self.module, self.current_block).create_gep(base_ptr, vec![idx_v], result_ty);
                        (gep, field_ty)
                    }
                    None => {
                        self.diags.emit(Diagnostic::error(format!("no field '{}' on {}", field, base_ty), *span));
                        let dummy = self.module.const_zero(Type::i32_ty());
                        (dummy, Type::i32_ty())
                    }
                }
            }
            _ => {
                self.diags.emit(Diagnostic::error("expression is not assignable", expr.span()));
                let dummy = self.module.const_zero(Type::i32_ty());
                (dummy, Type::i32_ty())
            }
        }
    }

    /// Like `lower_lvalue`, but for the base of `[]`/`.`: an array base is
    /// its own address (arrays decay without an extra load), anything else
    /// is address-of-lvalue as usual.
    fn lower_address_base(&mut self, base: &Expr) -> (ValueId, Type) {
        let (ptr, ty) = self.lower_lvalue(base);
        if ty.is_array() {
            (ptr, ty)
        } else if ty.is_pointer() {
            let loaded = new_builder(self.module, self.current_block).create_load(ptr);
            (loaded, ty.element_type().map(Type::ptr).unwrap_or(ty))
        } else {
            (ptr, ty)
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> ValueId {
        match expr {
            Expr::IntLit { value, ty, .. } => self.module.const_int(ty.to_rvalue(), *value),
            Expr::Ident { .. } => {
                let (ptr, ty) = self.lower_lvalue(expr);
                if ty.is_array() {
                    ptr
                } else {
                    new_builder(self.module, self.current_block).create_load(ptr)
                }
            }
            Expr::Unary { op: ast::UnOp::AddrOf, operand, .. } => self.lower_lvalue(operand).0,
            Expr::Unary { op: ast::UnOp::Deref, .. } => {
                let (ptr, _) = self.lower_lvalue(expr);
                new_builder(self.module, self.current_block).create_load(ptr)
            }
            Expr::Unary { op, operand, .. } => {
                let v = self.lower_expr(operand);
                match op {
                    ast::UnOp::Neg => new_builder(self.module, self.current_block).create_unary(IrUnOp::Neg, v),
                    ast::UnOp::Not => {
                        let zero = self.module.const_zero(self.module.ty(v).to_rvalue());
                        new_builder(self.module, self.current_block).create_binary(IrBinOp::ICmpEq, v, zero, self.diags)
                    }
                    ast::UnOp::BitNot => new_builder(self.module, self.current_block).create_unary(IrUnOp::Not, v),
                    ast::UnOp::AddrOf | ast::UnOp::Deref => unreachable!("handled above"),
                }
            }
            Expr::Binary { op: ast::BinOp::LogAnd, lhs, rhs, .. } => self.lower_short_circuit(lhs, rhs, true),
            Expr::Binary { op: ast::BinOp::LogOr, lhs, rhs, .. } => self.lower_short_circuit(lhs, rhs, false),
            Expr::Binary { op, lhs, rhs, .. } => {
                let l = self.lower_expr(lhs);
                let r = self.lower_expr(rhs);
                new_builder(self.module, self.current_block).create_binary(ir_binop(*op), l, r, self.diags)
            }
            Expr::Assign { target, value, .. } => {
                let (ptr, ty) = self.lower_lvalue(target);
                let v = self.lower_expr(value);
                let v = self.coerce(v, &ty);
                new_builder(self.module, self.current_block).create_store(ptr, v);
                v
            }
            Expr::Call { callee, args, span } => {
                let callee_id = match self.function_ids.get(callee) {
                    Some(&id) => id,
                    None => {
                        self.diags.emit(Diagnostic::error(format!("call to undeclared function '{}'", callee), *span));
                        return self.module.const_zero(Type::i32_ty());
                    }
                };
                let ret_ty = match self.module.ty(callee_id).unqualified() {
                    Type::Function(sig) => (*sig.ret).clone(),
                    _ => Type::Void,
                };
                let arg_vals: Vec<ValueId> = args.iter().map(|a| self.lower_expr(a)).collect();
                new_builder(self.module, self.current_block).create_call(callee_id, arg_vals, ret_ty.to_rvalue())
            }
            Expr::Index { .. } | Expr::Member { .. } => {
                let (ptr, ty) = self.lower_lvalue(expr);
                if ty.is_array() {
                    ptr
                } else {
                    new_builder(self.module, self.current_block).create_load(ptr)
                }
            }
            Expr::Cast { ty, operand, .. } => {
                let v = self.lower_expr(operand);
                self.coerce(v, ty)
            }
            Expr::Sizeof { ty, .. } => self.module.const_int(Type::u32_ty(), ty.size() as i64),
        }
    }

    fn lower_short_circuit(&mut self, lhs: &Expr, rhs: &Expr, is_and: bool) -> ValueId {
        let l = self.lower_expr(lhs);
        let l_bool = self.to_bool(l);

        let rhs_bb = self.module.add_block(self.func, "sc.rhs", lhs.span());
        let merge_bb = self.module.add_block(self.func, "sc.end", lhs.span());

        if is_and {
            new_builder(self.module, self.current_block).create_cond_br(l_bool, rhs_bb, merge_bb);
        } else {
            new_builder(self.module, self.current_block).create_cond_br(l_bool, merge_bb, rhs_bb);
        }
        let short_circuit_block = self.current_block;

        self.current_block = rhs_bb;
        let r = self.lower_expr(rhs);
        let r_bool = self.to_bool(r);
        let rhs_end_block = self.current_block;
        new_builder(self.module, self.current_block).create_br(merge_bb);

        self.current_block = merge_bb;
        let short_circuit_val = self.module.const_int(Type::i32_ty(), if is_and { 0 } else { 1 });
        let phi = new_builder(self.module, self.current_block).create_phi(Type::i32_ty(), Vec::new());
        new_builder(self.module, self.current_block).add_incoming(phi, short_circuit_block, short_circuit_val);
        new_builder(self.module, self.current_block).add_incoming(phi, rhs_end_block, r_bool);
        phi
    }
}

fn ir_binop(op: ast::BinOp) -> IrBinOp {
    match op {
        ast::BinOp::Add => IrBinOp::Add,
        ast::BinOp::Sub => IrBinOp::Sub,
        ast::BinOp::Mul => IrBinOp::Mul,
        ast::BinOp::Div => IrBinOp::SDiv,
        ast::BinOp::Rem => IrBinOp::SRem,
        ast::BinOp::And => IrBinOp::And,
        ast::BinOp::Or => IrBinOp::Or,
        ast::BinOp::Xor => IrBinOp::Xor,
        ast::BinOp::Shl => IrBinOp::Shl,
        ast::BinOp::Shr => IrBinOp::AShr,
        ast::BinOp::Eq => IrBinOp::ICmpEq,
        ast::BinOp::Ne => IrBinOp::ICmpNe,
        ast::BinOp::Lt => IrBinOp::ICmpSlt,
        ast::BinOp::Le => IrBinOp::ICmpSle,
        ast::BinOp::Gt => IrBinOp::ICmpSgt,
        ast::BinOp::Ge => IrBinOp::ICmpSge,
        ast::BinOp::LogAnd | ast::BinOp::LogOr => unreachable!("short-circuited separately"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn lower_src(src: &str) -> (Module, DiagnosticEngine) {
        let mut lexer = Lexer::new(src, 0);
        let tokens = lexer.tokenize();
        let mut diags = DiagnosticEngine::new();
        let (tu, structs) = {
            let parser = Parser::new(tokens, &mut diags);
            parser.parse()
        };
        let module = lower_translation_unit(&tu, &structs, &mut diags);
        (module, diags)
    }

    #[test]
    fn lowers_simple_arithmetic_function() {
        let (module, diags) = lower_src("int f(int x) { return x + 1; }");
        assert_eq!(diags.error_count(), 0);
        let f = module.functions().next().unwrap();
        assert!(!module.function_blocks(f).is_empty());
        crate::ir::verify::verify_module(&module).expect("well-formed IR");
    }

    #[test]
    fn lowers_if_else_with_merge_block() {
        let (module, _) = lower_src("int f(int x) { if (x) { return 1; } else { return 0; } }");
        let f = module.functions().next().unwrap();
        assert!(module.function_blocks(f).len() >= 3);
        crate::ir::verify::verify_module(&module).expect("well-formed IR");
    }

    #[test]
    fn lowers_while_loop() {
        let (module, _) = lower_src("int f(int n) { int i; i = 0; while (i) { i = i - 1; } return i; }");
        crate::ir::verify::verify_module(&module).expect("well-formed IR");
    }
}
