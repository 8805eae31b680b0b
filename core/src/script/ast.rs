//! Syntax tree for the routine language.

use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

impl Program {
    /// Top-level function declarations in source order.
    pub fn top_level_functions(&self) -> impl Iterator<Item = &Rc<FunctionDecl>> {
        self.body.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::Function(decl) => Some(decl),
            _ => None,
        })
    }

    /// Number of functions anywhere in the program, including
    /// function expressions and arrows.
    pub fn function_count(&self) -> usize {
        let mut count = 0;
        for stmt in &self.body {
            count += stmt.function_count();
        }
        count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Function(Rc<FunctionDecl>),
    Declare {
        kind: DeclKind,
        bindings: Vec<(String, Option<Expr>)>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: DeclKind,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Empty,
}

impl Stmt {
    fn function_count(&self) -> usize {
        match &self.kind {
            StmtKind::Function(decl) => 1 + decl.body.function_count(),
            StmtKind::Declare { bindings, .. } => bindings
                .iter()
                .filter_map(|(_, init)| init.as_ref())
                .map(Expr::function_count)
                .sum(),
            StmtKind::Expr(e) | StmtKind::Throw(e) => e.function_count(),
            StmtKind::Return(e) => e.as_ref().map_or(0, Expr::function_count),
            StmtKind::If { cond, then, otherwise } => {
                cond.function_count()
                    + then.function_count()
                    + otherwise.as_ref().map_or(0, |s| s.function_count())
            }
            StmtKind::For { init, cond, step, body } => {
                init.as_ref().map_or(0, |s| s.function_count())
                    + cond.as_ref().map_or(0, Expr::function_count)
                    + step.as_ref().map_or(0, Expr::function_count)
                    + body.function_count()
            }
            StmtKind::ForOf { iterable, body, .. } => iterable.function_count() + body.function_count(),
            StmtKind::While { cond, body } => cond.function_count() + body.function_count(),
            StmtKind::Block(stmts) => stmts.iter().map(Stmt::function_count).sum(),
            StmtKind::Break | StmtKind::Continue | StmtKind::Empty => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Arrow function with an expression body.
    Expr(Box<Expr>),
}

impl FunctionBody {
    fn function_count(&self) -> usize {
        match self {
            FunctionBody::Block(stmts) => stmts.iter().map(Stmt::function_count).sum(),
            FunctionBody::Expr(e) => e.function_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::StrictEq => "===",
            Self::StrictNe => "!==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `=` is `None`; compound assignments carry their arithmetic operator.
pub type AssignOp = Option<BinaryOp>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Function(Rc<FunctionDecl>),
}

impl Expr {
    fn function_count(&self) -> usize {
        match self {
            Expr::Function(decl) => 1 + decl.body.function_count(),
            Expr::Array(items) => items.iter().map(Expr::function_count).sum(),
            Expr::Object(fields) => fields.iter().map(|(_, e)| e.function_count()).sum(),
            Expr::Member(obj, _) => obj.function_count(),
            Expr::Index(a, b)
            | Expr::Binary(_, a, b)
            | Expr::Logical(_, a, b)
            | Expr::Assign(_, a, b) => a.function_count() + b.function_count(),
            Expr::Call(callee, args) => {
                callee.function_count() + args.iter().map(Expr::function_count).sum::<usize>()
            }
            Expr::New(_, args) => args.iter().map(Expr::function_count).sum(),
            Expr::Unary(_, e) => e.function_count(),
            Expr::Update { target, .. } => target.function_count(),
            Expr::Conditional(a, b, c) => a.function_count() + b.function_count() + c.function_count(),
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::Ident(_) => 0,
        }
    }
}
