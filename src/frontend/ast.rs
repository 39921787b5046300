//! The MimiC abstract syntax tree.
//!
//! The AST is the interface the core (IR builder, spec §4.2) consumes; its
//! surface syntax is deliberately small (spec §1: lexing/parsing/semantic
//! analysis are out of the core's scope, described only at their interface).

use crate::common::source::Span;
use crate::common::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Type,
    pub body: Option<Block>,
    pub linkage: Linkage,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
    pub linkage: Linkage,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<(String, Type)>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExternalDecl {
    Function(FunctionDecl),
    Global(GlobalDecl),
    Struct(StructDecl),
    TypeAlias { name: String, ty: Type, span: Span },
}

#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub decls: Vec<ExternalDecl>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    LocalDecl { name: String, ty: Type, init: Option<Expr>, span: Span },
    Return(Option<Expr>, Span),
    If { cond: Expr, then_blk: Block, else_blk: Option<Block>, span: Span },
    While { cond: Expr, body: Block, span: Span },
    Break(Span),
    Continue(Span),
    Block(Block),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    AddrOf,
    Deref,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit { value: i64, ty: Type, span: Span },
    Ident { name: String, span: Span },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    Unary { op: UnOp, operand: Box<Expr>, span: Span },
    Assign { target: Box<Expr>, value: Box<Expr>, span: Span },
    Call { callee: String, args: Vec<Expr>, span: Span },
    Index { base: Box<Expr>, index: Box<Expr>, span: Span },
    Member { base: Box<Expr>, field: String, span: Span },
    Cast { ty: Type, operand: Box<Expr>, span: Span },
    Sizeof { ty: Type, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLit { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Call { span, .. }
            | Expr::Index { span, .. }
            | Expr::Member { span, .. }
            | Expr::Cast { span, .. }
            | Expr::Sizeof { span, .. } => *span,
        }
    }
}
