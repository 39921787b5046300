//! Semantic analysis: scope resolution and type checking over the AST.
//!
//! Out of the core's scope per spec §1; exists so the crate can reject
//! ill-typed MimiC source before handing a module to the builder. Scopes are
//! an explicit stack of maps (spec §9's design note: "no implicit global
//! state"), and the alias scope is kept separate from other names per the
//! §9 resolution of the source's alias-scope bug.

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::source::Span;
use crate::common::types::{StructDef, StructRegistry, Type};
use crate::frontend::ast::*;
use std::collections::HashMap;
use std::rc::Rc;

struct ScopeStack {
    scopes: Vec<HashMap<String, Type>>,
}

impl ScopeStack {
    fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }

    fn push(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, ty: Type) {
        self.scopes.last_mut().unwrap().insert(name.to_string(), ty);
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.get(name) {
                return Some(ty);
            }
        }
        None
    }
}

pub struct SemanticAnalyzer<'a> {
    diags: &'a mut DiagnosticEngine,
    functions: HashMap<String, (Vec<Type>, Type)>,
    globals: HashMap<String, Type>,
    scopes: ScopeStack,
    current_ret_ty: Type,
    loop_depth: u32,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(diags: &'a mut DiagnosticEngine) -> Self {
        Self {
            diags,
            functions: HashMap::new(),
            globals: HashMap::new(),
            scopes: ScopeStack::new(),
            current_ret_ty: Type::Void,
            loop_depth: 0,
        }
    }

    pub fn analyze(&mut self, tu: &TranslationUnit, structs: &HashMap<String, Rc<StructDef>>) {
        let mut registry = StructRegistry::new();
        for def in structs.values() {
            registry.declare((**def).clone_def());
        }
        if let Err(msg) = registry.check_no_recursive_structs() {
            self.diags.emit(Diagnostic::error(msg, Span::dummy()));
        }

        for decl in &tu.decls {
            match decl {
                ExternalDecl::Function(f) => {
                    let params = f.params.iter().map(|p| p.ty.clone()).collect();
                    self.functions.insert(f.name.clone(), (params, f.ret_ty.clone()));
                }
                ExternalDecl::Global(g) => {
                    self.globals.insert(g.name.clone(), g.ty.clone());
                }
                _ => {}
            }
        }

        for decl in &tu.decls {
            if let ExternalDecl::Function(f) = decl {
                self.analyze_function(f);
            }
        }
    }

    fn analyze_function(&mut self, f: &FunctionDecl) {
        self.scopes.push();
        self.current_ret_ty = f.ret_ty.clone();
        for p in &f.params {
            self.scopes.declare(&p.name, p.ty.clone());
        }
        if let Some(body) = &f.body {
            self.analyze_block(body);
        }
        self.scopes.pop();
    }

    fn analyze_block(&mut self, block: &Block) {
        self.scopes.push();
        for stmt in &block.stmts {
            self.analyze_stmt(stmt);
        }
        self.scopes.pop();
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.analyze_expr(e);
            }
            Stmt::LocalDecl { name, ty, init, span } => {
                if let Some(init) = init {
                    if let Some(init_ty) = self.analyze_expr(init) {
                        if !ty.can_accept(&init_ty) {
                            self.diags.emit(Diagnostic::error(
                                format!("cannot initialize '{}' of type {} with value of type {}", name, ty, init_ty),
                                *span,
                            ));
                        }
                    }
                }
                self.scopes.declare(name, ty.clone());
            }
            Stmt::Return(value, span) => {
                let is_void = self.current_ret_ty.is_void();
                match value {
                    Some(e) => {
                        if is_void {
                            self.diags.emit(Diagnostic::error("returning a value from a void function", *span));
                        } else if let Some(ty) = self.analyze_expr(e) {
                            if !self.current_ret_ty.can_accept(&ty) {
                                self.diags.emit(Diagnostic::error(
                                    format!("return type mismatch: expected {}, found {}", self.current_ret_ty, ty),
                                    *span,
                                ));
                            }
                        }
                    }
                    None => {
                        if !is_void {
                            self.diags.emit(Diagnostic::error("missing return value in non-void function", *span));
                        }
                    }
                }
            }
            Stmt::If { cond, then_blk, else_blk, .. } => {
                self.analyze_expr(cond);
                self.analyze_block(then_blk);
                if let Some(e) = else_blk {
                    self.analyze_block(e);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.analyze_expr(cond);
                self.loop_depth += 1;
                self.analyze_block(body);
                self.loop_depth -= 1;
            }
            Stmt::Break(span) | Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    self.diags.emit(Diagnostic::error("break/continue outside of a loop", *span));
                }
            }
            Stmt::Block(b) => self.analyze_block(b),
        }
    }

    fn analyze_expr(&mut self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::IntLit { ty, .. } => Some(ty.clone()),
            Expr::Ident { name, span } => {
                if let Some(ty) = self.scopes.lookup(name) {
                    Some(ty.clone())
                } else if let Some(ty) = self.globals.get(name) {
                    Some(ty.clone())
                } else {
                    self.diags.emit(Diagnostic::error(format!("use of undeclared identifier '{}'", name), *span));
                    None
                }
            }
            Expr::Binary { op, lhs, rhs, span } => {
                let lt = self.analyze_expr(lhs);
                let rt = self.analyze_expr(rhs);
                match (lt, rt) {
                    (Some(lt), Some(rt)) => {
                        if matches!(op, BinOp::LogAnd | BinOp::LogOr | BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge) {
                            Some(Type::i32_ty())
                        } else if let Some(common) = lt.common_numeric_type(&rt) {
                            Some(common)
                        } else {
                            self.diags.emit(Diagnostic::error(
                                format!("incompatible operand types {} and {}", lt, rt),
                                *span,
                            ));
                            None
                        }
                    }
                    _ => None,
                }
            }
            Expr::Unary { op, operand, span } => {
                let t = self.analyze_expr(operand)?;
                match op {
                    UnOp::AddrOf => Some(Type::ptr(t)),
                    UnOp::Deref => t.deref().or_else(|| {
                        self.diags.emit(Diagnostic::error("cannot dereference a non-pointer", *span));
                        None
                    }),
                    _ => Some(t),
                }
            }
            Expr::Assign { target, value, span } => {
                let tt = self.analyze_expr(target);
                let vt = self.analyze_expr(value);
                if let (Some(tt), Some(vt)) = (&tt, &vt) {
                    if !tt.is_assignable_to() {
                        self.diags.emit(Diagnostic::error("assignment to a const or non-lvalue expression", *span));
                    } else if !tt.can_accept(vt) {
                        self.diags.emit(Diagnostic::error(format!("cannot assign {} to {}", vt, tt), *span));
                    }
                }
                tt
            }
            Expr::Call { callee, args, span } => {
                let sig = self.functions.get(callee).cloned();
                match sig {
                    Some((params, ret)) => {
                        if params.len() != args.len() {
                            self.diags.emit(Diagnostic::error(
                                format!("'{}' expects {} argument(s), found {}", callee, params.len(), args.len()),
                                *span,
                            ));
                        }
                        for (i, a) in args.iter().enumerate() {
                            if let Some(at) = self.analyze_expr(a) {
                                if let Some(pt) = params.get(i) {
                                    if !pt.can_accept(&at) {
                                        self.diags.emit(Diagnostic::error(
                                            format!("argument {} to '{}' has wrong type", i + 1, callee),
                                            *span,
                                        ));
                                    }
                                }
                            }
                        }
                        Some(ret)
                    }
                    None => {
                        self.diags.emit(Diagnostic::error(format!("call to undeclared function '{}'", callee), *span));
                        None
                    }
                }
            }
            Expr::Index { base, index, span } => {
                self.analyze_expr(index);
                let bt = self.analyze_expr(base)?;
                bt.element_type().or_else(|| {
                    self.diags.emit(Diagnostic::error("indexing a non-array, non-pointer value", *span));
                    None
                })
            }
            Expr::Member { base, field, span } => {
                let bt = self.analyze_expr(base)?;
                match bt.field(field) {
                    Some((_, ty)) => Some(ty),
                    None => {
                        self.diags.emit(Diagnostic::error(format!("no field '{}' on {}", field, bt), *span));
                        None
                    }
                }
            }
            Expr::Cast { ty, operand, span } => {
                let ot = self.analyze_expr(operand)?;
                if !ot.can_cast_to(ty) {
                    self.diags.emit(Diagnostic::error(format!("cannot cast {} to {}", ot, ty), *span));
                }
                Some(ty.clone())
            }
            Expr::Sizeof { ty, .. } => {
                let _ = ty.size();
                Some(Type::u32_ty())
            }
        }
    }
}

// `Type::Struct` wraps an `Rc<StructDef>`; `StructDef` itself derives no
// `Clone` (its identity matters), so struct-registry rebuilding for the
// recursion check needs a structural copy, not a shared one.
trait CloneStructDef {
    fn clone_def(&self) -> StructDef;
}

impl CloneStructDef for StructDef {
    fn clone_def(&self) -> StructDef {
        StructDef { name: self.name.clone(), fields: self.fields.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    fn analyze_src(src: &str) -> DiagnosticEngine {
        let mut lexer = Lexer::new(src, 0);
        let tokens = lexer.tokenize();
        let mut diags = DiagnosticEngine::new();
        let (tu, structs) = {
            let parser = Parser::new(tokens, &mut diags);
            parser.parse()
        };
        let mut sema = SemanticAnalyzer::new(&mut diags);
        sema.analyze(&tu, &structs);
        diags
    }

    #[test]
    fn accepts_well_typed_function() {
        let diags = analyze_src("int f(int x) { return x * 1 + 0; }");
        assert_eq!(diags.error_count(), 0);
    }

    #[test]
    fn rejects_call_to_undeclared_function() {
        let diags = analyze_src("int f() { return g(); }");
        assert!(diags.has_errors());
    }

    #[test]
    fn rejects_undeclared_identifier() {
        let diags = analyze_src("int f() { return y; }");
        assert!(diags.has_errors());
    }

    #[test]
    fn accepts_external_call_with_matching_signature() {
        let diags = analyze_src("int g(int x); int f() { int a; a = g(1); return 0; }");
        assert_eq!(diags.error_count(), 0);
    }

    #[test]
    fn rejects_break_outside_loop() {
        let diags = analyze_src("int f() { break; return 0; }");
        assert!(diags.has_errors());
    }
}
