// AST node types for .stg stage definition files.
//
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
// Names are not resolved here: a call may refer to a stage, an input, or a
// builtin (`min`/`max`); `resolve` decides which.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete stage program: a sequence of top-level statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
    pub span: Span,
}

// ── Statements ──

/// A top-level statement with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Input(InputStmt),
    Extern(ExternStmt),
    /// `output a, b`: stages whose buffers are bound by the caller.
    Output(Vec<Ident>),
    /// `order a, b, c`: explicit execution order.
    Order(Vec<Ident>),
    Define(DefineStmt),
}

// ── input_stmt: 'input' IDENT '(' params ')' ──

#[derive(Debug, Clone, PartialEq)]
pub struct InputStmt {
    pub name: Ident,
    pub params: Vec<Ident>,
}

// ── extern_stmt: 'extern' IDENT '(' params ')' '=' IDENT '(' idents? ')' ──

#[derive(Debug, Clone, PartialEq)]
pub struct ExternStmt {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub symbol: Ident,
    pub inputs: Vec<Ident>,
}

// ── define_stmt: IDENT '(' exprs ')' '=' (expr | '{' exprs '}') ──

/// A pure definition, or an update when the name is already defined.
#[derive(Debug, Clone, PartialEq)]
pub struct DefineStmt {
    pub name: Ident,
    /// Left-hand side coordinates. Pure definitions require distinct variables.
    pub args: Vec<Expr>,
    pub values: Vec<Expr>,
    /// True when the right-hand side was written as `{..}`.
    pub tuple: bool,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Var(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call(CallExpr),
}

/// `name(args)` or `name(args)[slot]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: Ident,
    pub args: Vec<Expr>,
    pub slot: Option<i64>,
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
