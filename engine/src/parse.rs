//! Recursive-descent parser producing [`Program`] trees.
//!
//! Statements follow Go shape closely enough that oracle-generated code in
//! the documented dialect parses unchanged: short variable declarations,
//! three-form `for`, `switch`, closures, composite literals. As in Go,
//! composite literals are not allowed directly in `if`/`for`/`switch`
//! headers (parenthesize them).

use std::fmt;

use crate::ast::*;
use crate::lex::{LexError, Lexer, Spanned, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub msg: String,
    pub line: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.msg)
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self {
            msg: e.msg,
            line: e.line,
        }
    }
}

type PResult<T> = Result<T, ParseError>;

pub fn parse(src: &str) -> PResult<Program> {
    let toks = Lexer::new(src).tokenize()?;
    Parser::new(toks).program()
}

/// Classification of a parsed type, everything non-composite collapsing to
/// `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeInfo {
    Bytes,
    List,
    Map,
    Other,
}

/// Result of parsing a simple statement in a `for` header.
enum Simple {
    Stmt(Stmt),
    RangeClause {
        key: Option<String>,
        value: Option<String>,
        expr: Expr,
    },
}

/// Hard bound on expression/statement nesting. Overly deep input is rejected
/// instead of risking the host stack.
const MAX_NESTING: u32 = 200;

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
    /// Whether a composite literal may start at primary position. Cleared
    /// inside `if`/`for`/`switch` headers, restored inside any parentheses.
    composite_ok: bool,
    depth: u32,
}

impl Parser {
    fn new(toks: Vec<Spanned>) -> Self {
        Self {
            toks,
            pos: 0,
            composite_ok: true,
            depth: 0,
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.err("expression nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.toks[self.pos.min(self.toks.len() - 1)].line
    }

    fn bump(&mut self) -> Token {
        let tok = self.toks[self.pos.min(self.toks.len() - 1)].tok.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Token) -> PResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.err(format!("expected {tok:?}, found {}", self.peek())))
        }
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError {
            msg: msg.into(),
            line: self.line(),
        }
    }

    fn ident(&mut self) -> PResult<String> {
        match self.bump() {
            Token::Ident(name) => Ok(name),
            other => Err(self.err(format!("expected identifier, found {other}"))),
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&Token::Semi) {}
    }

    // ----- declarations -----

    fn program(&mut self) -> PResult<Program> {
        self.skip_semis();
        self.expect(&Token::Package)?;
        let package = self.ident()?;
        self.skip_semis();

        let mut imports = Vec::new();
        while *self.peek() == Token::Import {
            self.bump();
            if self.eat(&Token::LParen) {
                loop {
                    self.skip_semis();
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    match self.bump() {
                        Token::Str(path) => imports.push(path),
                        other => {
                            return Err(self.err(format!("expected import path, found {other}")));
                        }
                    }
                }
            } else {
                match self.bump() {
                    Token::Str(path) => imports.push(path),
                    other => return Err(self.err(format!("expected import path, found {other}"))),
                }
            }
            self.skip_semis();
        }

        let mut funcs = Vec::new();
        loop {
            self.skip_semis();
            match self.peek() {
                Token::Eof => break,
                Token::Func => {
                    self.bump();
                    let name = self.ident()?;
                    let params = self.param_list()?;
                    self.opt_result_type()?;
                    let body = self.block()?;
                    funcs.push(FuncDecl { name, params, body });
                }
                other => return Err(self.err(format!("expected func declaration, found {other}"))),
            }
        }

        Ok(Program {
            package,
            imports,
            funcs,
        })
    }

    /// `( a, b int, c []byte )` - names collected, types validated and
    /// discarded.
    fn param_list(&mut self) -> PResult<Vec<String>> {
        self.expect(&Token::LParen)?;
        let mut names = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                break;
            }
            names.push(self.ident()?);
            if !matches!(self.peek(), Token::Comma | Token::RParen) {
                self.type_expr()?;
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(names)
    }

    fn opt_result_type(&mut self) -> PResult<()> {
        if *self.peek() != Token::LBrace {
            self.type_expr()?;
        }
        Ok(())
    }

    fn starts_type(tok: &Token) -> bool {
        matches!(
            tok,
            Token::LBracket | Token::Map | Token::Interface | Token::Func | Token::Ident(_)
        )
    }

    fn type_expr(&mut self) -> PResult<TypeInfo> {
        match self.peek().clone() {
            Token::LBracket => {
                self.bump();
                self.expect(&Token::RBracket)?;
                let elem_is_byte = matches!(self.peek(), Token::Ident(name) if name == "byte" || name == "uint8");
                self.type_expr()?;
                Ok(if elem_is_byte {
                    TypeInfo::Bytes
                } else {
                    TypeInfo::List
                })
            }
            Token::Map => {
                self.bump();
                self.expect(&Token::LBracket)?;
                self.type_expr()?;
                self.expect(&Token::RBracket)?;
                self.type_expr()?;
                Ok(TypeInfo::Map)
            }
            Token::Interface => {
                self.bump();
                self.expect(&Token::LBrace)?;
                self.expect(&Token::RBrace)?;
                Ok(TypeInfo::Other)
            }
            Token::Func => {
                self.bump();
                self.expect(&Token::LParen)?;
                loop {
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    self.type_expr()?;
                    if !self.eat(&Token::Comma) {
                        self.expect(&Token::RParen)?;
                        break;
                    }
                }
                if Self::starts_type(self.peek()) {
                    self.type_expr()?;
                }
                Ok(TypeInfo::Other)
            }
            Token::Ident(_) => {
                self.bump();
                if self.eat(&Token::Dot) {
                    self.ident()?;
                }
                Ok(TypeInfo::Other)
            }
            other => Err(self.err(format!("expected type, found {other}"))),
        }
    }

    // ----- statements -----

    fn block(&mut self) -> PResult<Block> {
        let saved = self.composite_ok;
        self.composite_ok = true;
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            self.skip_semis();
            if self.eat(&Token::RBrace) {
                break;
            }
            stmts.push(self.stmt()?);
        }
        self.composite_ok = saved;
        Ok(stmts)
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let result = self.stmt_inner();
        self.leave();
        result
    }

    fn stmt_inner(&mut self) -> PResult<Stmt> {
        match self.peek() {
            Token::Var => self.var_stmt(),
            Token::If => self.if_stmt(),
            Token::For => self.for_stmt(),
            Token::Switch => self.switch_stmt(),
            Token::Return => {
                self.bump();
                if matches!(self.peek(), Token::Semi | Token::RBrace) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.expr(1)?)))
                }
            }
            Token::Break => {
                self.bump();
                Ok(Stmt::Break)
            }
            Token::Continue => {
                self.bump();
                Ok(Stmt::Continue)
            }
            Token::LBrace => Ok(Stmt::Block(self.block()?)),
            _ => match self.simple_stmt(false)? {
                Simple::Stmt(stmt) => Ok(stmt),
                Simple::RangeClause { .. } => Err(self.err("range outside for statement")),
            },
        }
    }

    fn var_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let name = self.ident()?;
        if !matches!(self.peek(), Token::Assign | Token::Semi | Token::RBrace) {
            self.type_expr()?;
        }
        let expr = if self.eat(&Token::Assign) {
            Some(self.expr(1)?)
        } else {
            None
        };
        Ok(Stmt::Var { name, expr })
    }

    fn simple_stmt(&mut self, in_for_header: bool) -> PResult<Simple> {
        let mut exprs = vec![self.expr(1)?];
        while self.eat(&Token::Comma) {
            exprs.push(self.expr(1)?);
        }

        match self.peek().clone() {
            Token::Define => {
                self.bump();
                let mut names = Vec::with_capacity(exprs.len());
                for e in &exprs {
                    match e {
                        Expr::Ident(name) => names.push(name.clone()),
                        _ => return Err(self.err("left side of := must be identifiers")),
                    }
                }
                if in_for_header && *self.peek() == Token::Range {
                    self.bump();
                    if names.len() > 2 {
                        return Err(self.err("too many variables in range clause"));
                    }
                    let blank = |s: &String| s == "_";
                    let key = names.first().filter(|n| !blank(n)).cloned();
                    let value = names.get(1).filter(|n| !blank(n)).cloned();
                    let expr = self.expr(1)?;
                    return Ok(Simple::RangeClause { key, value, expr });
                }
                let rhs = self.expr_list()?;
                if rhs.len() != names.len() && !(names.len() == 2 && rhs.len() == 1) {
                    return Err(self.err("assignment count mismatch"));
                }
                Ok(Simple::Stmt(Stmt::Define { names, exprs: rhs }))
            }
            Token::Assign => {
                self.bump();
                let targets = self.targets(exprs)?;
                let rhs = self.expr_list()?;
                if rhs.len() != targets.len() && !(targets.len() == 2 && rhs.len() == 1) {
                    return Err(self.err("assignment count mismatch"));
                }
                Ok(Simple::Stmt(Stmt::Assign {
                    targets,
                    op: None,
                    exprs: rhs,
                }))
            }
            tok @ (Token::PlusAssign
            | Token::MinusAssign
            | Token::StarAssign
            | Token::SlashAssign
            | Token::PercentAssign
            | Token::AndAssign
            | Token::OrAssign
            | Token::XorAssign
            | Token::ShlAssign
            | Token::ShrAssign) => {
                self.bump();
                if exprs.len() != 1 {
                    return Err(self.err("compound assignment takes a single target"));
                }
                let op = match tok {
                    Token::PlusAssign => BinOp::Add,
                    Token::MinusAssign => BinOp::Sub,
                    Token::StarAssign => BinOp::Mul,
                    Token::SlashAssign => BinOp::Div,
                    Token::PercentAssign => BinOp::Rem,
                    Token::AndAssign => BinOp::BitAnd,
                    Token::OrAssign => BinOp::BitOr,
                    Token::XorAssign => BinOp::BitXor,
                    Token::ShlAssign => BinOp::Shl,
                    _ => BinOp::Shr,
                };
                let targets = self.targets(exprs)?;
                let rhs = self.expr(1)?;
                Ok(Simple::Stmt(Stmt::Assign {
                    targets,
                    op: Some(op),
                    exprs: vec![rhs],
                }))
            }
            Token::Inc | Token::Dec => {
                let inc = self.bump() == Token::Inc;
                if exprs.len() != 1 {
                    return Err(self.err("++/-- takes a single target"));
                }
                let target = self.targets(exprs)?.remove(0);
                Ok(Simple::Stmt(Stmt::IncDec { target, inc }))
            }
            _ => {
                if exprs.len() != 1 {
                    return Err(self.err("expected assignment after expression list"));
                }
                Ok(Simple::Stmt(Stmt::Expr(exprs.remove(0))))
            }
        }
    }

    fn expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.expr(1)?];
        while self.eat(&Token::Comma) {
            exprs.push(self.expr(1)?);
        }
        Ok(exprs)
    }

    fn targets(&self, exprs: Vec<Expr>) -> PResult<Vec<Target>> {
        exprs
            .into_iter()
            .map(|e| match e {
                Expr::Ident(name) => Ok(Target::Ident(name)),
                Expr::Index { base, index } => Ok(Target::Index {
                    base: *base,
                    index: *index,
                }),
                _ => Err(self.err("cannot assign to this expression")),
            })
            .collect()
    }

    fn header_simple(&mut self, in_for_header: bool) -> PResult<Simple> {
        let saved = self.composite_ok;
        self.composite_ok = false;
        let result = self.simple_stmt(in_for_header);
        self.composite_ok = saved;
        result
    }

    fn header_expr(&mut self) -> PResult<Expr> {
        let saved = self.composite_ok;
        self.composite_ok = false;
        let result = self.expr(1);
        self.composite_ok = saved;
        result
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let first = self.header_simple(false)?;
        let (init, cond) = if self.eat(&Token::Semi) {
            let Simple::Stmt(init) = first else {
                return Err(self.err("bad if initializer"));
            };
            (Some(Box::new(init)), self.header_expr()?)
        } else {
            match first {
                Simple::Stmt(Stmt::Expr(cond)) => (None, cond),
                _ => return Err(self.err("missing condition in if statement")),
            }
        };
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if *self.peek() == Token::If {
                Some(Box::new(self.if_stmt()?))
            } else {
                Some(Box::new(Stmt::Block(self.block()?)))
            }
        } else {
            None
        };
        Ok(Stmt::If(IfStmt {
            init,
            cond,
            then,
            otherwise,
        }))
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        if *self.peek() == Token::LBrace {
            return Ok(Stmt::For(ForStmt::Loop { body: self.block()? }));
        }

        let init = if *self.peek() == Token::Semi {
            None
        } else {
            match self.header_simple(true)? {
                Simple::RangeClause { key, value, expr } => {
                    let body = self.block()?;
                    return Ok(Stmt::For(ForStmt::Range {
                        key,
                        value,
                        expr,
                        body,
                    }));
                }
                Simple::Stmt(stmt) => {
                    if *self.peek() == Token::LBrace {
                        let Stmt::Expr(cond) = stmt else {
                            return Err(self.err("missing condition in for statement"));
                        };
                        let body = self.block()?;
                        return Ok(Stmt::For(ForStmt::While { cond, body }));
                    }
                    Some(Box::new(stmt))
                }
            }
        };

        self.expect(&Token::Semi)?;
        let cond = if *self.peek() == Token::Semi {
            None
        } else {
            Some(self.header_expr()?)
        };
        self.expect(&Token::Semi)?;
        let post = if *self.peek() == Token::LBrace {
            None
        } else {
            match self.header_simple(false)? {
                Simple::Stmt(stmt) => Some(Box::new(stmt)),
                Simple::RangeClause { .. } => return Err(self.err("range in for post statement")),
            }
        };
        let body = self.block()?;
        Ok(Stmt::For(ForStmt::Classic {
            init,
            cond,
            post,
            body,
        }))
    }

    fn switch_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let subject = if *self.peek() == Token::LBrace {
            None
        } else {
            Some(self.header_expr()?)
        };
        self.expect(&Token::LBrace)?;
        let mut cases = Vec::new();
        loop {
            self.skip_semis();
            match self.peek() {
                Token::RBrace => {
                    self.bump();
                    break;
                }
                Token::Case => {
                    self.bump();
                    let matches = self.expr_list()?;
                    self.expect(&Token::Colon)?;
                    let body = self.case_body()?;
                    cases.push(SwitchCase { matches, body });
                }
                Token::Default => {
                    self.bump();
                    self.expect(&Token::Colon)?;
                    let body = self.case_body()?;
                    cases.push(SwitchCase {
                        matches: Vec::new(),
                        body,
                    });
                }
                other => return Err(self.err(format!("expected case or default, found {other}"))),
            }
        }
        Ok(Stmt::Switch(SwitchStmt { subject, cases }))
    }

    fn case_body(&mut self) -> PResult<Block> {
        let mut stmts = Vec::new();
        loop {
            self.skip_semis();
            if matches!(self.peek(), Token::Case | Token::Default | Token::RBrace) {
                return Ok(stmts);
            }
            stmts.push(self.stmt()?);
        }
    }

    // ----- expressions -----

    fn expr(&mut self, min_prec: u8) -> PResult<Expr> {
        self.enter()?;
        let result = self.expr_inner(min_prec);
        self.leave();
        result
    }

    fn expr_inner(&mut self, min_prec: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::OrOr => BinOp::Or,
                Token::AndAnd => BinOp::And,
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                Token::Pipe => BinOp::BitOr,
                Token::Caret => BinOp::BitXor,
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                Token::Shl => BinOp::Shl,
                Token::Shr => BinOp::Shr,
                Token::Amp => BinOp::BitAnd,
                _ => break,
            };
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Token::Minus => Some(UnOp::Neg),
            Token::Not => Some(UnOp::Not),
            Token::Caret => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.bump();
                    let field = self.ident()?;
                    expr = Expr::Selector {
                        base: Box::new(expr),
                        field,
                    };
                }
                Token::LParen => {
                    self.bump();
                    let saved = self.composite_ok;
                    self.composite_ok = true;
                    let mut args = Vec::new();
                    loop {
                        self.skip_semis();
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        args.push(self.expr(1)?);
                        self.skip_semis();
                        if !self.eat(&Token::Comma) {
                            self.skip_semis();
                            self.expect(&Token::RParen)?;
                            break;
                        }
                    }
                    self.composite_ok = saved;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                Token::LBracket => {
                    self.bump();
                    let saved = self.composite_ok;
                    self.composite_ok = true;
                    if self.eat(&Token::Colon) {
                        let hi = if *self.peek() == Token::RBracket {
                            None
                        } else {
                            Some(Box::new(self.expr(1)?))
                        };
                        self.expect(&Token::RBracket)?;
                        expr = Expr::Slice {
                            base: Box::new(expr),
                            lo: None,
                            hi,
                        };
                    } else {
                        let first = self.expr(1)?;
                        if self.eat(&Token::Colon) {
                            let hi = if *self.peek() == Token::RBracket {
                                None
                            } else {
                                Some(Box::new(self.expr(1)?))
                            };
                            self.expect(&Token::RBracket)?;
                            expr = Expr::Slice {
                                base: Box::new(expr),
                                lo: Some(Box::new(first)),
                                hi,
                            };
                        } else {
                            self.expect(&Token::RBracket)?;
                            expr = Expr::Index {
                                base: Box::new(expr),
                                index: Box::new(first),
                            };
                        }
                    }
                    self.composite_ok = saved;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Token::Int(v) => {
                self.bump();
                Ok(Expr::Int(v))
            }
            Token::Float(v) => {
                self.bump();
                Ok(Expr::Float(v))
            }
            Token::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            Token::Char(c) => {
                self.bump();
                Ok(Expr::Int(c))
            }
            Token::Nil => {
                self.bump();
                Ok(Expr::Nil)
            }
            Token::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Token::Ident(name) => {
                self.bump();
                Ok(Expr::Ident(name))
            }
            Token::LParen => {
                self.bump();
                let saved = self.composite_ok;
                self.composite_ok = true;
                let expr = self.expr(1)?;
                self.composite_ok = saved;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::Func => {
                self.bump();
                let params = self.param_list()?;
                self.opt_result_type()?;
                let body = self.block()?;
                Ok(Expr::FuncLit { params, body })
            }
            Token::Map => {
                let info = self.type_expr()?;
                debug_assert_eq!(info, TypeInfo::Map);
                if self.composite_ok && *self.peek() == Token::LBrace {
                    self.map_lit()
                } else {
                    Ok(Expr::TypeRef(CompositeKind::Map))
                }
            }
            Token::LBracket => {
                let info = self.type_expr()?;
                let kind = match info {
                    TypeInfo::Bytes => CompositeKind::Bytes,
                    _ => CompositeKind::List,
                };
                if self.composite_ok && *self.peek() == Token::LBrace {
                    let elems = self.elem_list()?;
                    Ok(match kind {
                        CompositeKind::Bytes => Expr::BytesLit(elems),
                        _ => Expr::ListLit(elems),
                    })
                } else {
                    Ok(Expr::TypeRef(kind))
                }
            }
            other => Err(self.err(format!("unexpected token {other}"))),
        }
    }

    fn map_lit(&mut self) -> PResult<Expr> {
        self.expect(&Token::LBrace)?;
        let mut pairs = Vec::new();
        loop {
            self.skip_semis();
            if self.eat(&Token::RBrace) {
                break;
            }
            let key = self.expr(1)?;
            self.expect(&Token::Colon)?;
            let value = self.expr(1)?;
            pairs.push((key, value));
            self.skip_semis();
            if !self.eat(&Token::Comma) {
                self.skip_semis();
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(Expr::MapLit(pairs))
    }

    fn elem_list(&mut self) -> PResult<Vec<Expr>> {
        self.expect(&Token::LBrace)?;
        let mut elems = Vec::new();
        loop {
            self.skip_semis();
            if self.eat(&Token::RBrace) {
                break;
            }
            elems.push(self.expr(1)?);
            self.skip_semis();
            if !self.eat(&Token::Comma) {
                self.skip_semis();
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(elems)
    }
}
