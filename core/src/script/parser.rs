//! Recursive-descent parser for the routine language.
//!
//! Nesting depth is bounded so hostile input cannot exhaust the
//! stack of whichever thread happens to be validating it.
//!
//! RULE: Depth counts tree depth, not parser recursion. Operator and
//! postfix chains are parsed in loops but every link deepens the tree,
//! so every link counts against `MAX_NESTING`.

use super::{
    ast::*,
    lexer::{tokenize, Spanned, Token},
    value::format_number,
};
use std::fmt;
use std::rc::Rc;

/// Maximum statement/expression nesting accepted by the parser,
/// chained operators and postfix steps included.
pub const MAX_NESTING: usize = 96;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

/// Parse a complete routine.
pub fn parse(source: &str) -> PResult<Program> {
    let (tokens, errors) = tokenize(source);
    let mut parser = Parser::new(source, tokens);
    if let Some(err) = errors.first() {
        return Err(parser.error_at_offset(
            err.span.start,
            format!("unrecognised input '{}'", err.text),
        ));
    }
    parser.parse_program()
}

struct Parser<'a> {
    source:         &'a str,
    line_starts:    Vec<usize>,
    tokens:         Vec<Spanned>,
    pos:            usize,
    depth:          usize,
    function_depth: usize,
    loop_depth:     usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Spanned>) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
            tokens,
            pos: 0,
            depth: 0,
            function_depth: 0,
            loop_depth: 0,
        }
    }

    fn parse_program(&mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while self.peek().is_some() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ── Cursor helpers ─────────────────────────────────────────

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> PResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= offset)
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |t| t.span.start)
    }

    fn current_line(&self) -> u32 {
        self.line_of(self.current_offset()) as u32
    }

    /// True when the next token starts on a later line than the
    /// previous token ended.
    fn on_new_line(&self) -> bool {
        match (self.pos.checked_sub(1).and_then(|p| self.tokens.get(p)), self.tokens.get(self.pos)) {
            (Some(prev), Some(next)) => self.line_of(next.span.start) > self.line_of(prev.span.end),
            _ => true,
        }
    }

    fn error_at_offset(&self, offset: usize, message: String) -> ParseError {
        let line = self.line_of(offset);
        let line_start = self.line_starts.get(line - 1).copied().unwrap_or(0);
        ParseError {
            message,
            line,
            column: offset - line_start + 1,
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        self.error_at_offset(self.current_offset(), message.into())
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let found = self
            .peek()
            .map_or_else(|| "end of input".to_string(), |t| t.to_string());
        self.error_here(format!("expected {what}, found {found}"))
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("routine is nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Parse an operator or postfix chain. Links added with `link`
    /// are released when the chain ends.
    fn chain<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let base = self.depth;
        let result = f(self);
        self.depth = base;
        result
    }

    fn link(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("routine is nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Statement terminator: `;`, or implied before `}`, end of input,
    /// or a line break.
    fn end_statement(&mut self) -> PResult<()> {
        if self.eat(&Token::Semicolon)
            || self.check(&Token::RightBrace)
            || self.peek().is_none()
            || self.on_new_line()
        {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    // ── Statements ─────────────────────────────────────────────

    fn parse_statement(&mut self) -> PResult<Stmt> {
        self.nested(|p| {
            let line = p.current_line();
            let kind = p.parse_statement_kind()?;
            Ok(Stmt { kind, line })
        })
    }

    fn parse_statement_kind(&mut self) -> PResult<StmtKind> {
        match self.peek() {
            None => Err(self.unexpected("a statement")),
            Some(Token::Function) if matches!(self.peek_at(1), Some(Token::Identifier(_))) => {
                self.pos += 1;
                let name = self.expect_ident("function name")?;
                Ok(StmtKind::Function(self.parse_function_rest(Some(name))?))
            }
            Some(Token::Let | Token::Const | Token::Var) => {
                let decl = self.parse_declaration()?;
                self.end_statement()?;
                Ok(decl)
            }
            Some(Token::If) => self.parse_if(),
            Some(Token::For) => self.parse_for(),
            Some(Token::While) => {
                self.pos += 1;
                self.expect(&Token::LeftParen, "'(' after 'while'")?;
                let cond = self.parse_expression()?;
                self.expect(&Token::RightParen, "')'")?;
                let body = Box::new(self.parse_loop_body()?);
                Ok(StmtKind::While { cond, body })
            }
            Some(Token::Return) => {
                if self.function_depth == 0 {
                    return Err(self.error_here("'return' outside of a function"));
                }
                self.pos += 1;
                let value = if self.check(&Token::Semicolon)
                    || self.check(&Token::RightBrace)
                    || self.peek().is_none()
                    || self.on_new_line()
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_statement()?;
                Ok(StmtKind::Return(value))
            }
            Some(Token::Break | Token::Continue) => {
                if self.loop_depth == 0 {
                    return Err(self.error_here("'break' or 'continue' outside of a loop"));
                }
                let kind = match self.advance() {
                    Some(Token::Break) => StmtKind::Break,
                    _ => StmtKind::Continue,
                };
                self.end_statement()?;
                Ok(kind)
            }
            Some(Token::Throw) => {
                self.pos += 1;
                let value = self.parse_expression()?;
                self.end_statement()?;
                Ok(StmtKind::Throw(value))
            }
            Some(Token::LeftBrace) => Ok(StmtKind::Block(self.parse_block()?)),
            Some(Token::Semicolon) => {
                self.pos += 1;
                Ok(StmtKind::Empty)
            }
            Some(Token::Import | Token::Export) => {
                Err(self.error_here("module syntax ('import'/'export') is not supported"))
            }
            Some(_) => {
                let expr = self.parse_expression()?;
                self.end_statement()?;
                Ok(StmtKind::Expr(expr))
            }
        }
    }

    fn parse_declaration(&mut self) -> PResult<StmtKind> {
        let kind = match self.advance() {
            Some(Token::Const) => DeclKind::Const,
            Some(Token::Var) => DeclKind::Var,
            _ => DeclKind::Let,
        };
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident("variable name")?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error_here(format!("const '{name}' needs an initializer")));
            }
            bindings.push((name, init));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Declare { kind, bindings })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.pos += 1;
        self.expect(&Token::LeftParen, "'(' after 'if'")?;
        let cond = self.parse_expression()?;
        self.expect(&Token::RightParen, "')'")?;
        let then = Box::new(self.parse_statement()?);
        let otherwise = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If { cond, then, otherwise })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.pos += 1;
        self.expect(&Token::LeftParen, "'(' after 'for'")?;

        let is_for_of = matches!(self.peek(), Some(Token::Let | Token::Const | Token::Var))
            && matches!(self.peek_at(1), Some(Token::Identifier(_)))
            && matches!(self.peek_at(2), Some(Token::Identifier(of)) if of == "of");
        if is_for_of {
            let kind = match self.advance() {
                Some(Token::Const) => DeclKind::Const,
                Some(Token::Var) => DeclKind::Var,
                _ => DeclKind::Let,
            };
            let name = self.expect_ident("loop variable")?;
            self.pos += 1; // `of`
            let iterable = self.parse_expression()?;
            self.expect(&Token::RightParen, "')'")?;
            let body = Box::new(self.parse_loop_body()?);
            return Ok(StmtKind::ForOf { kind, name, iterable, body });
        }

        let init = if self.eat(&Token::Semicolon) {
            None
        } else {
            let line = self.current_line();
            let kind = if matches!(self.peek(), Some(Token::Let | Token::Const | Token::Var)) {
                self.parse_declaration()?
            } else {
                StmtKind::Expr(self.parse_expression()?)
            };
            self.expect(&Token::Semicolon, "';' after loop initializer")?;
            Some(Box::new(Stmt { kind, line }))
        };
        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Token::Semicolon, "';' after loop condition")?;
        let step = if self.check(&Token::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Token::RightParen, "')'")?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(StmtKind::For { init, cond, step, body })
    }

    fn parse_loop_body(&mut self) -> PResult<Stmt> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(&Token::LeftBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RightBrace) {
            if self.peek().is_none() {
                return Err(self.unexpected("'}'"));
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    // ── Functions ──────────────────────────────────────────────

    fn parse_function_rest(&mut self, name: Option<String>) -> PResult<Rc<FunctionDecl>> {
        self.expect(&Token::LeftParen, "'(' before parameters")?;
        let params = self.parse_param_list()?;
        let body = self.parse_function_block()?;
        Ok(Rc::new(FunctionDecl {
            name,
            params,
            body: FunctionBody::Block(body),
        }))
    }

    /// Parameters after an opening `(`, through the closing `)`.
    fn parse_param_list(&mut self) -> PResult<Vec<String>> {
        let mut params: Vec<String> = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(params);
        }
        loop {
            let name = self.expect_ident("parameter name")?;
            if params.contains(&name) {
                return Err(self.error_here(format!("duplicate parameter '{name}'")));
            }
            params.push(name);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RightParen, "')' after parameters")?;
            return Ok(params);
        }
    }

    fn parse_function_block(&mut self) -> PResult<Vec<Stmt>> {
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    /// `x => ...` or `(a, b) => ...`; `None` when the tokens ahead are
    /// not an arrow function.
    fn try_arrow(&mut self) -> PResult<Option<Expr>> {
        let params = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Identifier(name)), Some(Token::FatArrow)) => {
                let params = vec![name.clone()];
                self.pos += 2;
                params
            }
            (Some(Token::LeftParen), _) if self.arrow_ahead() => {
                self.pos += 1;
                let params = self.parse_param_list()?;
                self.expect(&Token::FatArrow, "'=>'")?;
                params
            }
            _ => return Ok(None),
        };

        let body = if self.check(&Token::LeftBrace) {
            FunctionBody::Block(self.parse_function_block()?)
        } else {
            let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
            let expr = self.parse_assignment();
            self.loop_depth = saved_loops;
            FunctionBody::Expr(Box::new(expr?))
        };
        Ok(Some(Expr::Function(Rc::new(FunctionDecl {
            name: None,
            params,
            body,
        }))))
    }

    /// Scan `( ident, ... ) =>` from the current `(` without consuming.
    fn arrow_ahead(&self) -> bool {
        let mut i = self.pos + 1;
        loop {
            match self.tokens.get(i).map(|t| &t.token) {
                Some(Token::RightParen) => break,
                Some(Token::Identifier(_)) => {
                    i += 1;
                    match self.tokens.get(i).map(|t| &t.token) {
                        Some(Token::Comma) => i += 1,
                        Some(Token::RightParen) => break,
                        _ => return false,
                    }
                }
                _ => return false,
            }
        }
        matches!(self.tokens.get(i + 1).map(|t| &t.token), Some(Token::FatArrow))
    }

    // ── Expressions ────────────────────────────────────────────

    fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            if let Some(arrow) = p.try_arrow()? {
                return Ok(arrow);
            }
            let target = p.parse_conditional()?;
            let op = match p.peek() {
                Some(Token::Assign) => Some(None),
                Some(Token::PlusAssign) => Some(Some(BinaryOp::Add)),
                Some(Token::MinusAssign) => Some(Some(BinaryOp::Sub)),
                Some(Token::StarAssign) => Some(Some(BinaryOp::Mul)),
                Some(Token::SlashAssign) => Some(Some(BinaryOp::Div)),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(target);
            };
            if !is_assignable(&target) {
                return Err(p.error_here("invalid assignment target"));
            }
            p.pos += 1;
            let value = p.parse_assignment()?;
            Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
        })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_assignment()?;
        self.expect(&Token::Colon, "':' in conditional expression")?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_and()?;
            while p.eat(&Token::OrOr) {
                p.link()?;
                let right = p.parse_and()?;
                left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
            }
            Ok(left)
        })
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_equality()?;
            while p.eat(&Token::AndAnd) {
                p.link()?;
                let right = p.parse_equality()?;
                left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
            }
            Ok(left)
        })
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_relational()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Eq) => BinaryOp::Eq,
                    Some(Token::Ne) => BinaryOp::Ne,
                    Some(Token::StrictEq) => BinaryOp::StrictEq,
                    Some(Token::StrictNe) => BinaryOp::StrictNe,
                    _ => return Ok(left),
                };
                p.pos += 1;
                p.link()?;
                let right = p.parse_relational()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            }
        })
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_additive()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Lt) => BinaryOp::Lt,
                    Some(Token::Le) => BinaryOp::Le,
                    Some(Token::Gt) => BinaryOp::Gt,
                    Some(Token::Ge) => BinaryOp::Ge,
                    _ => return Ok(left),
                };
                p.pos += 1;
                p.link()?;
                let right = p.parse_additive()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            }
        })
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_multiplicative()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Plus) => BinaryOp::Add,
                    Some(Token::Minus) => BinaryOp::Sub,
                    _ => return Ok(left),
                };
                p.pos += 1;
                p.link()?;
                let right = p.parse_multiplicative()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            }
        })
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        self.chain(|p| {
            let mut left = p.parse_exponent()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Star) => BinaryOp::Mul,
                    Some(Token::Slash) => BinaryOp::Div,
                    Some(Token::Percent) => BinaryOp::Rem,
                    _ => return Ok(left),
                };
                p.pos += 1;
                p.link()?;
                let right = p.parse_exponent()?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            }
        })
    }

    fn parse_exponent(&mut self) -> PResult<Expr> {
        let base = self.parse_unary()?;
        if !self.eat(&Token::StarStar) {
            return Ok(base);
        }
        let exponent = self.nested(|p| p.parse_exponent())?;
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        self.nested(|p| {
            let op = match p.peek() {
                Some(Token::Minus) => UnaryOp::Neg,
                Some(Token::Plus) => UnaryOp::Plus,
                Some(Token::Bang) => UnaryOp::Not,
                Some(Token::PlusPlus | Token::MinusMinus) => {
                    let increment = matches!(p.advance(), Some(Token::PlusPlus));
                    let target = p.parse_unary()?;
                    if !is_assignable(&target) {
                        return Err(p.error_here("invalid increment/decrement target"));
                    }
                    return Ok(Expr::Update {
                        increment,
                        prefix: true,
                        target: Box::new(target),
                    });
                }
                _ => return p.parse_postfix(),
            };
            p.pos += 1;
            let operand = p.parse_unary()?;
            Ok(Expr::Unary(op, Box::new(operand)))
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_call_member()?;
        let increment = match self.peek() {
            Some(Token::PlusPlus) if !self.on_new_line() => true,
            Some(Token::MinusMinus) if !self.on_new_line() => false,
            _ => return Ok(expr),
        };
        if !is_assignable(&expr) {
            return Err(self.error_here("invalid increment/decrement target"));
        }
        self.pos += 1;
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.eat(&Token::New) {
            let name = self.expect_ident("constructor name after 'new'")?;
            self.expect(&Token::LeftParen, "'(' after constructor name")?;
            Expr::New(name, self.parse_arguments()?)
        } else {
            self.parse_primary()?
        };
        self.chain(|p| loop {
            match p.peek() {
                Some(Token::Dot) => {
                    p.pos += 1;
                    p.link()?;
                    let name = p.expect_ident("property name after '.'")?;
                    expr = Expr::Member(Box::new(expr), name);
                }
                Some(Token::LeftBracket) => {
                    p.pos += 1;
                    p.link()?;
                    let index = p.parse_expression()?;
                    p.expect(&Token::RightBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LeftParen) => {
                    p.pos += 1;
                    p.link()?;
                    let args = p.parse_arguments()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        })
    }

    /// Arguments after an opening `(`, through the closing `)`.
    fn parse_arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.eat(&Token::Comma) {
                if self.eat(&Token::RightParen) {
                    return Ok(args);
                }
                continue;
            }
            self.expect(&Token::RightParen, "')' after arguments")?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.pos;
        let Some(token) = self.advance() else {
            return Err(self.unexpected("an expression"));
        };
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(Rc::from(s.as_str()))),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Undefined => Ok(Expr::Undefined),
            Token::Identifier(name) => Ok(Expr::Ident(name)),
            Token::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RightParen, "')'")?;
                Ok(expr)
            }
            Token::LeftBracket => self.parse_array_literal(),
            Token::LeftBrace => self.parse_object_literal(),
            Token::Function => {
                let name = match self.peek() {
                    Some(Token::Identifier(_)) => Some(self.expect_ident("function name")?),
                    _ => None,
                };
                Ok(Expr::Function(self.parse_function_rest(name)?))
            }
            Token::Import => {
                self.pos = start;
                Err(self.error_here("module loading ('import') is not supported"))
            }
            other => {
                self.pos = start;
                Err(self.error_here(format!("unexpected {other}")))
            }
        }
    }

    fn parse_array_literal(&mut self) -> PResult<Expr> {
        let mut items = Vec::new();
        loop {
            if self.eat(&Token::RightBracket) {
                return Ok(Expr::Array(items));
            }
            items.push(self.parse_assignment()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RightBracket, "']' after array elements")?;
                return Ok(Expr::Array(items));
            }
        }
    }

    fn parse_object_literal(&mut self) -> PResult<Expr> {
        let mut fields: Vec<(String, Expr)> = Vec::new();
        loop {
            if self.eat(&Token::RightBrace) {
                return Ok(Expr::Object(fields));
            }
            let (key, shorthand_ok) = match self.peek() {
                Some(Token::Identifier(name)) => (name.clone(), true),
                Some(Token::Str(s)) => (s.clone(), false),
                Some(Token::Number(n)) => (format_number(*n), false),
                _ => return Err(self.unexpected("property name")),
            };
            self.pos += 1;
            let value = if self.eat(&Token::Colon) {
                self.parse_assignment()?
            } else if shorthand_ok {
                Expr::Ident(key.clone())
            } else {
                return Err(self.unexpected("':' after property name"));
            };
            fields.retain(|(k, _)| k != &key);
            fields.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RightBrace, "'}' after object fields")?;
                return Ok(Expr::Object(fields));
            }
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_function_with_loop_and_return() {
        let program = parse(
            "function calculate(params) {\n\
               let total = 0;\n\
               for (let i = 0; i < params.n; i++) { total += i; }\n\
               return { total };\n\
             }",
        )
        .unwrap();
        assert_eq!(program.top_level_functions().count(), 1);
        assert_eq!(program.function_count(), 1);
    }

    #[test]
    fn arrow_functions_are_counted() {
        let program = parse("const f = (a, b) => a - b;\nconst g = x => ({ x });").unwrap();
        assert_eq!(program.top_level_functions().count(), 0);
        assert_eq!(program.function_count(), 2);
    }

    #[test]
    fn chains_count_toward_nesting() {
        let within = format!("const x = 1{};", " + 1".repeat(MAX_NESTING - 8));
        assert!(parse(&within).is_ok());
        let beyond = format!("const x = 1{};", " + 1".repeat(MAX_NESTING + 1));
        assert!(parse(&beyond).unwrap_err().message.contains("nested too deeply"));
        let members = format!("const x = a{};", ".b".repeat(MAX_NESTING + 1));
        assert!(parse(&members).unwrap_err().message.contains("nested too deeply"));
    }

    #[test]
    fn parenthesised_expression_is_not_an_arrow() {
        let program = parse("const a = 1; const b = (a) * 2;").unwrap();
        assert_eq!(program.function_count(), 0);
    }

    #[test]
    fn missing_brace_reports_position() {
        let err = parse("function f() {\n  return 1;\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("'}'"), "{err}");
    }

    #[test]
    fn return_outside_function_is_rejected() {
        assert!(parse("return 1;").is_err());
    }

    #[test]
    fn two_expressions_on_one_line_need_a_separator() {
        assert!(parse("let a = 1 let b = 2").is_err());
        assert!(parse("let a = 1\nlet b = 2").is_ok());
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let source = format!("const x = {}1{};", "(".repeat(5000), ")".repeat(5000));
        let err = parse(&source).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn invalid_assignment_target() {
        assert!(parse("1 = 2;").is_err());
    }
}
