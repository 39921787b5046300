//! Recursive-descent parser for MimiC source text, producing the AST of
//! `frontend::ast`. Out of the core's scope per spec §1; kept compact.

use crate::common::error::{Diagnostic, DiagnosticEngine};
use crate::common::source::Span;
use crate::common::types::{IntWidth, StructDef, StructField, Type};
use crate::frontend::ast::*;
use crate::frontend::lexer::{Token, TokenKind};
use std::collections::HashMap;
use std::rc::Rc;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    diags: &'a mut DiagnosticEngine,
    structs: HashMap<String, Rc<StructDef>>,
    aliases: HashMap<String, Type>,
}

type PResult<T> = Result<T, ()>;

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, diags: &'a mut DiagnosticEngine) -> Self {
        Self { tokens, pos: 0, diags, structs: HashMap::new(), aliases: HashMap::new() }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Token> {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(kind) {
            Ok(self.bump())
        } else {
            self.diags.emit(Diagnostic::error(
                format!("expected {:?}, found {:?}", kind, self.peek()),
                self.span(),
            ));
            Err(())
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(self.peek()) == std::mem::discriminant(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn parse(mut self) -> (TranslationUnit, HashMap<String, Rc<StructDef>>) {
        let mut decls = Vec::new();
        while !self.tokens[self.pos].is_eof() {
            match self.parse_external_decl() {
                Ok(Some(d)) => decls.push(d),
                Ok(None) => {}
                Err(()) => self.resync(),
            }
        }
        (TranslationUnit { decls }, self.structs)
    }

    /// Skip tokens until the next statement/declaration boundary so a single
    /// parse error does not cascade into noise (SourceError accumulation
    /// policy, spec §7).
    fn resync(&mut self) {
        while !self.tokens[self.pos].is_eof() {
            if matches!(self.peek(), TokenKind::Semicolon) {
                self.bump();
                return;
            }
            if matches!(self.peek(), TokenKind::RBrace) {
                return;
            }
            self.bump();
        }
    }

    fn is_type_start(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Void
                | TokenKind::Int
                | TokenKind::Uint
                | TokenKind::Char
                | TokenKind::Uchar
                | TokenKind::Struct
                | TokenKind::Const
        ) || matches!(self.peek(), TokenKind::Identifier(name) if self.aliases.contains_key(name))
    }

    fn parse_type(&mut self) -> PResult<Type> {
        let is_const = self.eat(&TokenKind::Const);
        let mut ty = match self.peek().clone() {
            TokenKind::Void => {
                self.bump();
                Type::Void
            }
            TokenKind::Int => {
                self.bump();
                Type::Int(IntWidth::W32, true)
            }
            TokenKind::Uint => {
                self.bump();
                Type::Int(IntWidth::W32, false)
            }
            TokenKind::Char => {
                self.bump();
                Type::Int(IntWidth::W8, true)
            }
            TokenKind::Uchar => {
                self.bump();
                Type::Int(IntWidth::W8, false)
            }
            TokenKind::Struct => {
                self.bump();
                let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
                let name = ident_text(&name_tok);
                match self.structs.get(&name) {
                    Some(def) => Type::Struct(def.clone()),
                    None => {
                        self.diags.emit(Diagnostic::error(format!("unknown struct '{}'", name), name_tok.span));
                        return Err(());
                    }
                }
            }
            TokenKind::Identifier(name) => {
                if let Some(aliased) = self.aliases.get(&name).cloned() {
                    self.bump();
                    aliased
                } else {
                    self.diags.emit(Diagnostic::error(format!("expected a type, found '{}'", name), self.span()));
                    return Err(());
                }
            }
            other => {
                self.diags.emit(Diagnostic::error(format!("expected a type, found {:?}", other), self.span()));
                return Err(());
            }
        };
        while self.eat(&TokenKind::Star) {
            ty = Type::Pointer(Box::new(ty));
        }
        if is_const {
            ty = Type::Const(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_external_decl(&mut self) -> PResult<Option<ExternalDecl>> {
        if self.eat(&TokenKind::Typedef) {
            let ty = self.parse_type()?;
            let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
            let name = ident_text(&name_tok);
            self.expect(&TokenKind::Semicolon)?;
            // §9 resolution: aliases live in their own scope, never the enum/tag scope.
            self.aliases.insert(name.clone(), ty.clone());
            return Ok(Some(ExternalDecl::TypeAlias { name, ty, span: name_tok.span }));
        }

        if matches!(self.peek(), TokenKind::Struct) && matches!(self.tokens.get(self.pos + 2).map(|t| &t.kind), Some(TokenKind::LBrace)) {
            return self.parse_struct_decl().map(|d| Some(ExternalDecl::Struct(d)));
        }

        let start = self.span();
        let linkage = if self.eat(&TokenKind::Static) {
            Linkage::Internal
        } else if self.eat(&TokenKind::Extern) {
            Linkage::External
        } else {
            Linkage::External
        };

        let ty = self.parse_type()?;
        let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
        let name = ident_text(&name_tok);

        if self.eat(&TokenKind::LParen) {
            let params = self.parse_params()?;
            self.expect(&TokenKind::RParen)?;
            let body = if self.eat(&TokenKind::Semicolon) {
                None
            } else {
                Some(self.parse_block()?)
            };
            return Ok(Some(ExternalDecl::Function(FunctionDecl {
                name,
                params,
                ret_ty: ty,
                body,
                linkage,
                span: start.merge(name_tok.span),
            })));
        }

        let mut ty = ty;
        if self.eat(&TokenKind::LBracket) {
            let len_tok = self.expect(&TokenKind::IntLiteral(0))?;
            let len = match len_tok.kind {
                TokenKind::IntLiteral(n) => n as usize,
                _ => unreachable!(),
            };
            self.expect(&TokenKind::RBracket)?;
            ty = Type::Array(Box::new(ty), len);
        }

        let init = if self.eat(&TokenKind::Assign) {
            Some(self.parse_initializer()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(Some(ExternalDecl::Global(GlobalDecl { name, ty, init, linkage, span: start.merge(name_tok.span) })))
    }

    fn parse_struct_decl(&mut self) -> PResult<StructDecl> {
        let start = self.span();
        self.expect(&TokenKind::Struct)?;
        let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
        let name = ident_text(&name_tok);
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace) {
            let fty = self.parse_type()?;
            let fname_tok = self.expect(&TokenKind::Identifier(String::new()))?;
            fields.push((ident_text(&fname_tok), fty));
            self.expect(&TokenKind::Semicolon)?;
        }
        self.expect(&TokenKind::RBrace)?;
        self.expect(&TokenKind::Semicolon)?;

        let def = StructDef {
            name: name.clone(),
            fields: fields.iter().map(|(n, t)| StructField { name: n.clone(), ty: t.clone() }).collect(),
        };
        self.structs.insert(name.clone(), Rc::new(def));

        Ok(StructDecl { name, fields, span: start })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        if matches!(self.peek(), TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            let start = self.span();
            let ty = self.parse_type()?;
            let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
            let ty = ty.decay_for_param();
            params.push(Param { name: ident_text(&name_tok), ty, span: start });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_block(&mut self) -> PResult<Block> {
        let start = self.span();
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !matches!(self.peek(), TokenKind::RBrace) {
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(()) => self.resync(),
            }
        }
        let end = self.span();
        self.expect(&TokenKind::RBrace)?;
        Ok(Block { stmts, span: start.merge(end) })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let start = self.span();
        match self.peek().clone() {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Return => {
                self.bump();
                let value = if matches!(self.peek(), TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Return(value, start))
            }
            TokenKind::If => {
                self.bump();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let then_blk = self.parse_block_or_single()?;
                let else_blk = if self.eat(&TokenKind::Else) { Some(self.parse_block_or_single()?) } else { None };
                Ok(Stmt::If { cond, then_blk, else_blk, span: start })
            }
            TokenKind::While => {
                self.bump();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.parse_block_or_single()?;
                Ok(Stmt::While { cond, body, span: start })
            }
            TokenKind::Break => {
                self.bump();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Break(start))
            }
            TokenKind::Continue => {
                self.bump();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Continue(start))
            }
            _ if self.is_type_start() => {
                let ty = self.parse_type()?;
                let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
                let mut ty = ty;
                if self.eat(&TokenKind::LBracket) {
                    let len_tok = self.expect(&TokenKind::IntLiteral(0))?;
                    let len = match len_tok.kind {
                        TokenKind::IntLiteral(n) => n as usize,
                        _ => unreachable!(),
                    };
                    self.expect(&TokenKind::RBracket)?;
                    ty = Type::Array(Box::new(ty), len);
                }
                let init = if self.eat(&TokenKind::Assign) { Some(self.parse_expr()?) } else { None };
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::LocalDecl { name: ident_text(&name_tok), ty, init, span: start })
            }
            _ => {
                let e = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Expr(e))
            }
        }
    }

    fn parse_block_or_single(&mut self) -> PResult<Block> {
        if matches!(self.peek(), TokenKind::LBrace) {
            self.parse_block()
        } else {
            let start = self.span();
            let stmt = self.parse_stmt()?;
            Ok(Block { stmts: vec![stmt], span: start })
        }
    }

    fn parse_initializer(&mut self) -> PResult<Expr> {
        // Only scalar initializers are supported for now; array/struct
        // brace-initializers degrade to the first scalar element so globals
        // like `static int t[4] = {1,2,3,4};` still parse (sema evaluates
        // the remaining elements as zero).
        if matches!(self.peek(), TokenKind::LBrace) {
            self.bump();
            let span = self.span();
            let mut first = Expr::IntLit { value: 0, ty: Type::i32_ty(), span };
            let mut i = 0;
            while !matches!(self.peek(), TokenKind::RBrace) {
                let e = self.parse_assign_expr()?;
                if i == 0 {
                    first = e;
                }
                i += 1;
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace)?;
            Ok(first)
        } else {
            self.parse_assign_expr()
        }
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_assign_expr()
    }

    fn parse_assign_expr(&mut self) -> PResult<Expr> {
        let lhs = self.parse_logical_or()?;
        if matches!(self.peek(), TokenKind::Assign) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_assign_expr()?;
            return Ok(Expr::Assign { target: Box::new(lhs), value: Box::new(rhs), span });
        }
        Ok(lhs)
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_logical_and()?;
        while matches!(self.peek(), TokenKind::PipePipe) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_logical_and()?;
            lhs = Expr::Binary { op: BinOp::LogOr, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_or()?;
        while matches!(self.peek(), TokenKind::AmpAmp) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_bit_or()?;
            lhs = Expr::Binary { op: BinOp::LogAnd, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_xor()?;
        while matches!(self.peek(), TokenKind::Pipe) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_bit_xor()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_and()?;
        while matches!(self.peek(), TokenKind::Caret) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_bit_and()?;
            lhs = Expr::Binary { op: BinOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), TokenKind::Amp) {
            let span = self.span();
            self.bump();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqualEqual => BinOp::Eq,
                TokenKind::BangEqual => BinOp::Ne,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                TokenKind::Less => BinOp::Lt,
                TokenKind::LessEqual => BinOp::Le,
                TokenKind::Greater => BinOp::Gt,
                TokenKind::GreaterEqual => BinOp::Ge,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                TokenKind::LessLess => BinOp::Shl,
                TokenKind::GreaterGreater => BinOp::Shr,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            let span = self.span();
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let span = self.span();
        let op = match self.peek() {
            TokenKind::Minus => Some(UnOp::Neg),
            TokenKind::Bang => Some(UnOp::Not),
            TokenKind::Tilde => Some(UnOp::BitNot),
            TokenKind::Amp => Some(UnOp::AddrOf),
            TokenKind::Star => Some(UnOp::Deref),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op, operand: Box::new(operand), span });
        }
        if matches!(self.peek(), TokenKind::Sizeof) {
            self.bump();
            self.expect(&TokenKind::LParen)?;
            let ty = self.parse_type()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(Expr::Sizeof { ty, span });
        }
        if matches!(self.peek(), TokenKind::LParen)
            && matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(k) if self.is_type_token(k))
        {
            self.bump();
            let ty = self.parse_type()?;
            self.expect(&TokenKind::RParen)?;
            let operand = self.parse_unary()?;
            return Ok(Expr::Cast { ty, operand: Box::new(operand), span });
        }
        self.parse_postfix()
    }

    fn is_type_token(&self, k: &TokenKind) -> bool {
        matches!(
            k,
            TokenKind::Void | TokenKind::Int | TokenKind::Uint | TokenKind::Char | TokenKind::Uchar | TokenKind::Struct | TokenKind::Const
        ) || matches!(k, TokenKind::Identifier(name) if self.aliases.contains_key(name))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::LBracket => {
                    let span = self.span();
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    e = Expr::Index { base: Box::new(e), index: Box::new(index), span };
                }
                TokenKind::Dot => {
                    let span = self.span();
                    self.bump();
                    let name_tok = self.expect(&TokenKind::Identifier(String::new()))?;
                    e = Expr::Member { base: Box::new(e), field: ident_text(&name_tok), span };
                }
                _ => break,
            }
        }
        Ok(e)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.span();
        match self.peek().clone() {
            TokenKind::IntLiteral(v) => {
                self.bump();
                Ok(Expr::IntLit { value: v, ty: Type::i32_ty(), span })
            }
            TokenKind::Identifier(name) => {
                self.bump();
                if self.eat(&TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !matches!(self.peek(), TokenKind::RParen) {
                        loop {
                            args.push(self.parse_assign_expr()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    Ok(Expr::Call { callee: name, args, span })
                } else {
                    Ok(Expr::Ident { name, span })
                }
            }
            TokenKind::LParen => {
                self.bump();
                let e = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(e)
            }
            other => {
                self.diags.emit(Diagnostic::error(format!("expected an expression, found {:?}", other), span));
                Err(())
            }
        }
    }
}

fn ident_text(tok: &Token) -> String {
    match &tok.kind {
        TokenKind::Identifier(s) => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse_src(src: &str) -> (TranslationUnit, DiagnosticEngine) {
        let mut lexer = Lexer::new(src, 0);
        let tokens = lexer.tokenize();
        let mut diags = DiagnosticEngine::new();
        let tu = {
            let parser = Parser::new(tokens, &mut diags);
            parser.parse().0
        };
        (tu, diags)
    }

    #[test]
    fn parses_simple_function() {
        let (tu, diags) = parse_src("int f(int x) { return x * 1 + 0; }");
        assert_eq!(diags.error_count(), 0);
        assert_eq!(tu.decls.len(), 1);
        match &tu.decls[0] {
            ExternalDecl::Function(f) => {
                assert_eq!(f.name, "f");
                assert_eq!(f.params.len(), 1);
                assert!(f.body.is_some());
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn parses_static_global_array() {
        let (tu, diags) = parse_src("static int unused_tbl[4] = {1,2,3,4};");
        assert_eq!(diags.error_count(), 0);
        match &tu.decls[0] {
            ExternalDecl::Global(g) => {
                assert_eq!(g.linkage, Linkage::Internal);
                assert!(g.ty.is_array());
            }
            _ => panic!("expected global"),
        }
    }

    #[test]
    fn parses_while_loop() {
        let (tu, diags) = parse_src("int f(int n) { int s; s = 0; while (n) { s = s + n; n = n - 1; } return s; }");
        assert_eq!(diags.error_count(), 0);
        assert_eq!(tu.decls.len(), 1);
    }
}
