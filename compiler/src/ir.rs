// ir.rs — Stage definitions and the scheduled-region statement tree
//
// Expressions and statements are immutable `Arc`-shared trees. A rewrite
// rebuilds only the path from the root to a changed node; untouched subtrees
// are reused by reference, so `same_as` (pointer identity) holds for them
// across rewrites.
//
// Preconditions: none (data model).
// Postconditions: `Stmt::block` never produces a block containing a no-op.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// What a call expression refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Another stage of the pipeline (a reference expression).
    Stage,
    /// An external input image bound by the caller.
    Image,
    /// An opaque extern symbol (used by extern stage definitions).
    Extern,
}

/// A call node: reads slot `value_index` of `name` at `args`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub name: String,
    pub call_type: CallType,
    pub value_index: usize,
    /// The callee produces more than one value; the slot is always printed.
    pub tuple: bool,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprNode {
    IntImm(i64),
    Var(String),
    Binary { op: BinOp, a: Expr, b: Expr },
    Call(Call),
    /// The whole buffer of a stage or input, as passed to extern stages.
    BufferRef(String),
}

/// Shared handle to an immutable expression node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Expr(Arc<ExprNode>);

impl Expr {
    pub fn new(node: ExprNode) -> Self {
        Expr(Arc::new(node))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprNode::IntImm(value))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprNode::Var(name.into()))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Self {
        Self::new(ExprNode::Binary { op, a, b })
    }

    pub fn add(a: Expr, b: Expr) -> Self {
        Self::binary(BinOp::Add, a, b)
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Self::binary(BinOp::Sub, a, b)
    }

    pub fn mul(a: Expr, b: Expr) -> Self {
        Self::binary(BinOp::Mul, a, b)
    }

    pub fn call(
        name: impl Into<String>,
        call_type: CallType,
        value_index: usize,
        args: Vec<Expr>,
    ) -> Self {
        Self::new(ExprNode::Call(Call {
            name: name.into(),
            call_type,
            value_index,
            tuple: false,
            args,
        }))
    }

    /// Reference slot `value_index` of stage `name`.
    pub fn stage_ref(name: impl Into<String>, value_index: usize, args: Vec<Expr>) -> Self {
        Self::call(name, CallType::Stage, value_index, args)
    }

    /// Reference slot `value_index` of the tuple-valued stage `name`.
    pub fn tuple_ref(name: impl Into<String>, value_index: usize, args: Vec<Expr>) -> Self {
        Self::new(ExprNode::Call(Call {
            name: name.into(),
            call_type: CallType::Stage,
            value_index,
            tuple: true,
            args,
        }))
    }

    pub fn buffer(name: impl Into<String>) -> Self {
        Self::new(ExprNode::BufferRef(name.into()))
    }

    pub fn node(&self) -> &ExprNode {
        &self.0
    }

    /// Pointer identity: true iff both handles share the same node.
    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self.node() {
            ExprNode::Call(call) => Some(call),
            _ => None,
        }
    }
}

/// Exact structural equality: same node kinds, same leaves, same order.
/// No algebraic normalization (`x + y` and `y + x` differ).
pub fn equal(a: &Expr, b: &Expr) -> bool {
    a.same_as(b) || a.node() == b.node()
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node() {
            ExprNode::IntImm(v) => write!(f, "{}", v),
            ExprNode::Var(name) => write!(f, "{}", name),
            ExprNode::Binary { op, a, b } => match op {
                BinOp::Min | BinOp::Max => write!(f, "{}({}, {})", op.symbol(), a, b),
                _ => write!(f, "({} {} {})", a, op.symbol(), b),
            },
            ExprNode::Call(call) => {
                write!(f, "{}(", call.name)?;
                write_args(f, &call.args)?;
                write!(f, ")")?;
                if call.tuple || call.value_index != 0 {
                    write!(f, "[{}]", call.value_index)?;
                }
                Ok(())
            }
            ExprNode::BufferRef(name) => write!(f, "{}.buffer", name),
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// Half-open extent of one dimension: `[min, min + extent)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StmtNode {
    /// Allocation scope of a stage's buffer.
    Realize {
        name: String,
        bounds: Vec<Range>,
        body: Stmt,
    },
    /// Produce (`is_producer`) or consume marker delimiting a buffer's
    /// liveness window.
    ProducerConsumer {
        name: String,
        is_producer: bool,
        body: Stmt,
    },
    For {
        var: String,
        min: Expr,
        extent: Expr,
        body: Stmt,
    },
    Block {
        first: Stmt,
        rest: Stmt,
    },
    /// Multi-dimensional store of every tuple slot of `name` at `args`.
    Provide {
        name: String,
        values: Vec<Expr>,
        args: Vec<Expr>,
    },
    Evaluate(Expr),
}

/// Shared handle to an immutable statement node.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Stmt(Arc<StmtNode>);

impl Stmt {
    pub fn new(node: StmtNode) -> Self {
        Stmt(Arc::new(node))
    }

    pub fn realize(name: impl Into<String>, bounds: Vec<Range>, body: Stmt) -> Self {
        Self::new(StmtNode::Realize {
            name: name.into(),
            bounds,
            body,
        })
    }

    pub fn producer_consumer(name: impl Into<String>, is_producer: bool, body: Stmt) -> Self {
        Self::new(StmtNode::ProducerConsumer {
            name: name.into(),
            is_producer,
            body,
        })
    }

    pub fn produce(name: impl Into<String>, body: Stmt) -> Self {
        Self::producer_consumer(name, true, body)
    }

    pub fn consume(name: impl Into<String>, body: Stmt) -> Self {
        Self::producer_consumer(name, false, body)
    }

    pub fn for_loop(var: impl Into<String>, min: Expr, extent: Expr, body: Stmt) -> Self {
        Self::new(StmtNode::For {
            var: var.into(),
            min,
            extent,
            body,
        })
    }

    /// Sequence two statements, dropping either side that is a no-op.
    pub fn block(first: Stmt, rest: Stmt) -> Self {
        if first.is_no_op() {
            rest
        } else if rest.is_no_op() {
            first
        } else {
            Self::new(StmtNode::Block { first, rest })
        }
    }

    pub fn provide(name: impl Into<String>, values: Vec<Expr>, args: Vec<Expr>) -> Self {
        Self::new(StmtNode::Provide {
            name: name.into(),
            values,
            args,
        })
    }

    pub fn evaluate(value: Expr) -> Self {
        Self::new(StmtNode::Evaluate(value))
    }

    pub fn no_op() -> Self {
        Self::evaluate(Expr::int(0))
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self.node(), StmtNode::Evaluate(e) if matches!(e.node(), ExprNode::IntImm(0)))
    }

    pub fn node(&self) -> &StmtNode {
        &self.0
    }

    pub fn same_as(&self, other: &Stmt) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

const INDENT: &str = "  ";

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match stmt.node() {
        StmtNode::Realize { name, bounds, body } => {
            write!(f, "{}realize {}(", pad, name)?;
            for (i, range) in bounds.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[{}, {}]", range.min, range.extent)?;
            }
            writeln!(f, ") {{")?;
            write_stmt(f, body, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
        StmtNode::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            let marker = if *is_producer { "produce" } else { "consume" };
            writeln!(f, "{}{} {} {{", pad, marker, name)?;
            write_stmt(f, body, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
        StmtNode::For {
            var,
            min,
            extent,
            body,
        } => {
            writeln!(f, "{}for ({}, {}, {}) {{", pad, var, min, extent)?;
            write_stmt(f, body, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
        StmtNode::Block { first, rest } => {
            write_stmt(f, first, depth)?;
            write_stmt(f, rest, depth)
        }
        StmtNode::Provide { name, values, args } => {
            write!(f, "{}{}(", pad, name)?;
            write_args(f, args)?;
            write!(f, ") = ")?;
            if values.len() == 1 {
                writeln!(f, "{}", values[0])
            } else {
                write!(f, "{{")?;
                write_args(f, values)?;
                writeln!(f, "}}")
            }
        }
        StmtNode::Evaluate(value) => writeln!(f, "{}{}", pad, value),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Debug for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// ── Stages ──────────────────────────────────────────────────────────────────

/// An in-place recurrence applied after the pure definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDefinition {
    pub args: Vec<Expr>,
    pub values: Vec<Expr>,
}

/// An opaque external computation producing the stage's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternDefinition {
    pub symbol: String,
    /// Stages or input images whose whole buffers are passed to `symbol`.
    pub inputs: Vec<String>,
}

/// A named pipeline computation.
///
/// `values` holds one expression per tuple slot; it is empty only for extern
/// stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub args: Vec<String>,
    pub values: Vec<Expr>,
    pub update: Option<UpdateDefinition>,
    pub extern_def: Option<ExternDefinition>,
}

impl Stage {
    pub fn pure(name: impl Into<String>, args: &[&str], values: Vec<Expr>) -> Self {
        Stage {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            values,
            update: None,
            extern_def: None,
        }
    }

    pub fn with_update(mut self, update: UpdateDefinition) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_extern(mut self, extern_def: ExternDefinition) -> Self {
        self.extern_def = Some(extern_def);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.args.len()
    }

    /// Number of values the stage's buffer holds. An extern stage carries no
    /// value expressions but produces one value.
    pub fn value_count(&self) -> usize {
        if self.has_extern_definition() {
            1
        } else {
            self.values.len()
        }
    }

    pub fn has_update_definition(&self) -> bool {
        self.update.is_some()
    }

    pub fn has_extern_definition(&self) -> bool {
        self.extern_def.is_some()
    }

    /// The stage's own index variables as expressions, in parameter order.
    pub fn arg_exprs(&self) -> Vec<Expr> {
        self.args.iter().map(Expr::var).collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extern_def.is_some() {
            write!(f, "extern ")?;
        }
        write!(f, "{}({}) = ", self.name, self.args.join(", "))?;
        if let Some(ext) = &self.extern_def {
            return write!(f, "{}({})", ext.symbol, ext.inputs.join(", "));
        }
        if self.values.len() == 1 {
            write!(f, "{}", self.values[0])
        } else {
            write!(f, "{{")?;
            write_args(f, &self.values)?;
            write!(f, "}}")
        }
    }
}

/// Symbol table: stage name → definition.
pub type Env = HashMap<String, Stage>;

/// Build an environment from a list of stages.
pub fn env_of(stages: impl IntoIterator<Item = Stage>) -> Env {
    stages.into_iter().map(|s| (s.name.clone(), s)).collect()
}

// ── Tests ───────────────────────────────────────────────────────────────────
