// resolve.rs — Name resolution for stage programs
//
// Walks the parsed AST, binds every call to a stage, an input image or a
// builtin, converts definitions into `ir::Stage`s, and fixes the execution
// order and the set of externally bound stages.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns the stage environment, execution order and outputs
//                 plus all accumulated diagnostics. When no error is reported,
//                 `order` is topological and names every stage exactly once.
// Failure modes: unknown names, duplicate definitions, arity and tuple-width
//                violations, cycles and bad directives produce `Diagnostic`
//                entries. Resolution continues past errors.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::{self, BinaryOp, CallExpr, DefineStmt, ExprKind, Ident, Program, Span};
use crate::diag::{codes, Diagnostic};
use crate::ir::{BinOp, CallType, Env, Expr, ExternDefinition, Stage, UpdateDefinition};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution.
#[derive(Debug)]
pub struct ResolveResult {
    pub resolved: ResolvedProgram,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolution tables consumed by lowering and copy elision.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProgram {
    pub env: Env,
    /// Stage names, producers before consumers.
    pub order: Vec<String>,
    /// Stages whose buffers are bound by the caller.
    pub outputs: Vec<String>,
    /// Input image name → dimensionality.
    pub inputs: HashMap<String, usize>,
}

impl ResolvedProgram {
    /// Stages that must keep their buffers.
    pub fn external(&self) -> HashSet<String> {
        self.outputs.iter().cloned().collect()
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Resolve all names in a parsed stage program.
pub fn resolve(program: &Program) -> ResolveResult {
    let mut ctx = ResolveCtx::default();

    // Pass 1: collect inputs, definitions and directives
    ctx.collect_globals(program);
    ctx.compute_widths();

    // Pass 2: convert definitions into stages
    ctx.convert_stages();

    // Post-pass: execution order and outputs
    let order = ctx.execution_order();
    let outputs = ctx.resolve_outputs(&order, program.span);

    let env = ctx.stages.drain(..).map(|s| (s.name.clone(), s)).collect();
    ResolveResult {
        resolved: ResolvedProgram {
            env,
            order,
            outputs,
            inputs: ctx.inputs.iter().map(|(k, v)| (k.clone(), v.dims)).collect(),
        },
        diagnostics: ctx.diagnostics,
    }
}

// ── Internal context ────────────────────────────────────────────────────────

const BUILTINS: [&str; 2] = ["min", "max"];

struct InputEntry {
    dims: usize,
    span: Span,
}

enum DefKind<'p> {
    Pure {
        def: &'p DefineStmt,
        update: Option<&'p DefineStmt>,
    },
    Extern(&'p ast::ExternStmt),
}

struct StageDef<'p> {
    name: &'p Ident,
    kind: DefKind<'p>,
}

#[derive(Default)]
struct ResolveCtx<'p> {
    inputs: HashMap<String, InputEntry>,
    defs: Vec<StageDef<'p>>,
    by_name: HashMap<String, usize>,
    /// Tuple width of each stage, after bare-call expansion.
    widths: HashMap<String, usize>,
    /// Stage → stages it reads (self-reads of updates excluded).
    deps: HashMap<String, Vec<String>>,
    stages: Vec<Stage>,
    outputs: Vec<&'p Ident>,
    output_seen: bool,
    order: Option<(&'p [Ident], Span)>,
    diagnostics: Vec<Diagnostic>,
}

/// What a conversion is currently inside of.
struct Scope<'s> {
    owner: &'s str,
    vars: &'s [String],
    is_update: bool,
}

impl<'p> ResolveCtx<'p> {
    fn error(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    fn definition_span(&self, name: &str) -> Option<Span> {
        if let Some(&i) = self.by_name.get(name) {
            return Some(self.defs[i].name.span);
        }
        self.inputs.get(name).map(|i| i.span)
    }

    fn duplicate(&mut self, name: &Ident, what: &str) {
        let mut d = Diagnostic::error(
            codes::E0101,
            name.span,
            format!("duplicate definition of {} `{}`", what, name.name),
        );
        if let Some(first) = self.definition_span(&name.name) {
            d = d.with_related(first, "first defined here");
        }
        self.error(d);
    }

    fn check_params(&mut self, params: &[Ident]) {
        let mut seen = HashSet::new();
        for p in params {
            if !seen.insert(p.name.as_str()) {
                self.error(Diagnostic::error(
                    codes::E0104,
                    p.span,
                    format!("parameter `{}` appears more than once", p.name),
                ));
            }
        }
    }

    // ── Pass 1: collect globals ─────────────────────────────────────────

    fn collect_globals(&mut self, program: &'p Program) {
        for stmt in &program.statements {
            match &stmt.kind {
                ast::StatementKind::Input(input) => {
                    if self.is_defined(&input.name.name) {
                        self.duplicate(&input.name, "input");
                        continue;
                    }
                    self.check_params(&input.params);
                    self.inputs.insert(
                        input.name.name.clone(),
                        InputEntry {
                            dims: input.params.len(),
                            span: input.name.span,
                        },
                    );
                }
                ast::StatementKind::Extern(ext) => {
                    if self.is_defined(&ext.name.name) {
                        self.duplicate(&ext.name, "stage");
                        continue;
                    }
                    self.check_params(&ext.params);
                    self.push_def(&ext.name, DefKind::Extern(ext));
                }
                ast::StatementKind::Define(def) => self.collect_define(def),
                ast::StatementKind::Output(names) => {
                    self.output_seen = true;
                    self.outputs.extend(names.iter());
                }
                ast::StatementKind::Order(names) => {
                    if self.order.is_some() {
                        self.error(
                            Diagnostic::error(codes::E0108, stmt.span, "duplicate `order` directive")
                                .with_hint("list the whole execution order in one directive"),
                        );
                        continue;
                    }
                    self.order = Some((names.as_slice(), stmt.span));
                }
            }
        }
    }

    fn is_defined(&self, name: &str) -> bool {
        self.inputs.contains_key(name) || self.by_name.contains_key(name)
    }

    fn push_def(&mut self, name: &'p Ident, kind: DefKind<'p>) {
        self.by_name.insert(name.name.clone(), self.defs.len());
        self.defs.push(StageDef { name, kind });
    }

    fn collect_define(&mut self, def: &'p DefineStmt) {
        let name = &def.name;
        if BUILTINS.contains(&name.name.as_str()) {
            self.error(Diagnostic::error(
                codes::E0101,
                name.span,
                format!("`{}` is a builtin and cannot be defined", name.name),
            ));
            return;
        }
        if self.inputs.contains_key(&name.name) {
            self.duplicate(name, "input");
            return;
        }

        let Some(&index) = self.by_name.get(&name.name) else {
            self.check_pure_args(def);
            self.push_def(name, DefKind::Pure { def, update: None });
            return;
        };

        // A second definition of a pure stage is its update.
        let first = self.defs[index].name.span;
        let clash = match &mut self.defs[index].kind {
            DefKind::Pure { update, .. } if update.is_none() => {
                *update = Some(def);
                None
            }
            DefKind::Pure { .. } => Some("stage already has an update definition"),
            DefKind::Extern(_) => Some("extern stages cannot be updated"),
        };
        if let Some(reason) = clash {
            self.error(
                Diagnostic::error(
                    codes::E0101,
                    name.span,
                    format!("duplicate definition of stage `{}`", name.name),
                )
                .with_hint(reason)
                .with_related(first, "first defined here"),
            );
        }
    }

    fn check_pure_args(&mut self, def: &DefineStmt) {
        let mut seen = HashSet::new();
        for arg in &def.args {
            match &arg.kind {
                ExprKind::Var(v) if seen.insert(v.as_str()) => {}
                ExprKind::Var(v) => self.error(Diagnostic::error(
                    codes::E0104,
                    arg.span,
                    format!("parameter `{}` appears more than once", v),
                )),
                _ => self.error(
                    Diagnostic::error(
                        codes::E0104,
                        arg.span,
                        format!("parameters of `{}` must be plain variables", def.name.name),
                    )
                    .with_hint("only an update definition may use expressions on the left"),
                ),
            }
        }
    }

    /// Width of every pure stage. A definition whose whole right-hand side is
    /// a bare call to a tuple stage inherits that stage's width.
    fn compute_widths(&mut self) {
        let names: Vec<String> = self.defs.iter().map(|d| d.name.name.clone()).collect();
        for name in names {
            let mut visiting = Vec::new();
            let w = self.width_of(&name, &mut visiting);
            self.widths.insert(name, w);
        }
    }

    fn width_of(&self, name: &str, visiting: &mut Vec<String>) -> usize {
        if let Some(&w) = self.widths.get(name) {
            return w;
        }
        let Some(&i) = self.by_name.get(name) else {
            return 1;
        };
        let DefKind::Pure { def, .. } = &self.defs[i].kind else {
            return 1;
        };
        match bare_call(def) {
            Some(call) if call.name.name != name && !visiting.iter().any(|v| v == name) => {
                visiting.push(name.to_string());
                let w = self.width_of(&call.name.name, visiting);
                visiting.pop();
                w
            }
            _ => def.values.len(),
        }
    }

    fn width(&self, name: &str) -> usize {
        self.widths.get(name).copied().unwrap_or(1)
    }

    // ── Pass 2: convert definitions ─────────────────────────────────────

    fn convert_stages(&mut self) {
        for i in 0..self.defs.len() {
            let name = self.defs[i].name;
            let stage = match self.defs[i].kind {
                DefKind::Extern(ext) => self.convert_extern(ext),
                DefKind::Pure { def, update } => self.convert_pure(name, def, update),
            };
            self.stages.push(stage);
        }
    }

    fn add_dep(&mut self, owner: &str, callee: &str) {
        if owner == callee {
            return;
        }
        let deps = self.deps.entry(owner.to_string()).or_default();
        if !deps.iter().any(|d| d == callee) {
            deps.push(callee.to_string());
        }
    }

    fn convert_extern(&mut self, ext: &ast::ExternStmt) -> Stage {
        let owner = ext.name.name.as_str();
        let mut inputs = Vec::new();
        for input in &ext.inputs {
            let name = input.name.as_str();
            if name == owner {
                self.error(Diagnostic::error(
                    codes::E0109,
                    input.span,
                    format!("extern stage `{}` reads its own buffer", owner),
                ));
            } else if self.by_name.contains_key(name) {
                self.add_dep(owner, name);
            } else if !self.inputs.contains_key(name) {
                self.error(Diagnostic::error(
                    codes::E0102,
                    input.span,
                    format!("unknown stage or input `{}`", name),
                ));
            }
            inputs.push(name.to_string());
        }
        Stage {
            name: owner.to_string(),
            args: ext.params.iter().map(|p| p.name.clone()).collect(),
            values: Vec::new(),
            update: None,
            extern_def: Some(ExternDefinition {
                symbol: ext.symbol.name.clone(),
                inputs,
            }),
        }
    }

    fn convert_pure(
        &mut self,
        name: &Ident,
        def: &DefineStmt,
        update: Option<&DefineStmt>,
    ) -> Stage {
        let args: Vec<String> = def
            .args
            .iter()
            .enumerate()
            .map(|(i, a)| match &a.kind {
                ExprKind::Var(v) => v.clone(),
                _ => format!("_{}", i),
            })
            .collect();
        let scope = Scope {
            owner: &name.name,
            vars: &args,
            is_update: false,
        };
        let values = self.convert_values(def, &scope);

        let update = update.map(|u| {
            let mut vars = Vec::new();
            for a in &u.args {
                collect_vars(a, &mut vars);
            }
            let scope = Scope {
                owner: &name.name,
                vars: &vars,
                is_update: true,
            };
            if u.args.len() != args.len() {
                self.error(Diagnostic::error(
                    codes::E0103,
                    u.name.span,
                    format!(
                        "update of `{}` has {} coordinate(s), expected {}",
                        name.name,
                        u.args.len(),
                        args.len()
                    ),
                ));
            }
            let u_args = u.args.iter().map(|a| self.convert_expr(a, &scope)).collect();
            let u_values = self.convert_values(u, &scope);
            if u_values.len() != values.len() {
                self.error(
                    Diagnostic::error(
                        codes::E0106,
                        u.name.span,
                        format!(
                            "update of `{}` has {} value(s), the pure definition has {}",
                            name.name,
                            u_values.len(),
                            values.len()
                        ),
                    )
                    .with_related(name.span, "pure definition here"),
                );
            }
            UpdateDefinition {
                args: u_args,
                values: u_values,
            }
        });

        Stage {
            name: name.name.clone(),
            args,
            values,
            update,
            extern_def: None,
        }
    }

    fn convert_values(&mut self, def: &DefineStmt, scope: &Scope<'_>) -> Vec<Expr> {
        if let Some(call) = bare_call(def) {
            let w = self.width(&call.name.name);
            if w > 1 && self.by_name.contains_key(&call.name.name) {
                let span = def.values[0].span;
                return match self.convert_stage_args(call, span, scope) {
                    Some(args) => (0..w)
                        .map(|k| Expr::tuple_ref(call.name.name.clone(), k, args.clone()))
                        .collect(),
                    None => vec![Expr::int(0); w],
                };
            }
        }
        def.values
            .iter()
            .map(|v| self.convert_expr(v, scope))
            .collect()
    }

    fn convert_expr(&mut self, expr: &ast::Expr, scope: &Scope<'_>) -> Expr {
        match &expr.kind {
            ExprKind::Int(n) => Expr::int(*n),
            ExprKind::Var(v) => {
                if !scope.vars.iter().any(|s| s == v) {
                    self.error(Diagnostic::error(
                        codes::E0102,
                        expr.span,
                        format!("unbound variable `{}` in `{}`", v, scope.owner),
                    ));
                }
                Expr::var(v.clone())
            }
            ExprKind::Neg(inner) => match inner.kind {
                ExprKind::Int(n) => Expr::int(-n),
                _ => Expr::sub(Expr::int(0), self.convert_expr(inner, scope)),
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let op = match op {
                    BinaryOp::Add => BinOp::Add,
                    BinaryOp::Sub => BinOp::Sub,
                    BinaryOp::Mul => BinOp::Mul,
                    BinaryOp::Div => BinOp::Div,
                };
                let a = self.convert_expr(lhs, scope);
                let b = self.convert_expr(rhs, scope);
                Expr::binary(op, a, b)
            }
            ExprKind::Call(call) => self.convert_call(call, expr.span, scope),
        }
    }

    fn convert_call(&mut self, call: &CallExpr, span: Span, scope: &Scope<'_>) -> Expr {
        let name = call.name.name.as_str();

        if BUILTINS.contains(&name) {
            if call.args.len() != 2 {
                self.error(Diagnostic::error(
                    codes::E0103,
                    span,
                    format!("`{}` takes 2 arguments, found {}", name, call.args.len()),
                ));
                return Expr::int(0);
            }
            if call.slot.is_some() {
                self.error(Diagnostic::error(
                    codes::E0105,
                    span,
                    format!("`{}` has a single value", name),
                ));
            }
            let op = if name == "min" { BinOp::Min } else { BinOp::Max };
            let a = self.convert_expr(&call.args[0], scope);
            let b = self.convert_expr(&call.args[1], scope);
            return Expr::binary(op, a, b);
        }

        if let Some(dims) = self.inputs.get(name).map(|i| i.dims) {
            if call.args.len() != dims {
                self.arity(call, span, dims);
                return Expr::int(0);
            }
            if call.slot.is_some_and(|k| k != 0) {
                self.error(Diagnostic::error(
                    codes::E0105,
                    span,
                    format!("input `{}` has a single value", name),
                ));
            }
            let args = call.args.iter().map(|a| self.convert_expr(a, scope)).collect();
            return Expr::call(name, CallType::Image, 0, args);
        }

        if !self.by_name.contains_key(name) {
            self.error(Diagnostic::error(
                codes::E0102,
                call.name.span,
                format!("unknown stage or input `{}`", name),
            ));
            return Expr::int(0);
        }

        let width = self.width(name);
        let value_index = match call.slot {
            None if width > 1 => {
                self.error(
                    Diagnostic::error(
                        codes::E0105,
                        span,
                        format!("stage `{}` has {} values; read one of them", name, width),
                    )
                    .with_hint(format!("write `{}(..)[k]` with k < {}", name, width)),
                );
                return Expr::int(0);
            }
            None => 0,
            Some(k) if width == 1 => {
                self.error(Diagnostic::error(
                    codes::E0105,
                    span,
                    format!("stage `{}` has a single value; `[{}]` is not allowed", name, k),
                ));
                return Expr::int(0);
            }
            Some(k) => match usize::try_from(k) {
                Ok(k) if k < width => k,
                _ => {
                    self.error(Diagnostic::error(
                        codes::E0105,
                        span,
                        format!(
                            "value index {} out of range for `{}` ({} values)",
                            k, name, width
                        ),
                    ));
                    return Expr::int(0);
                }
            },
        };

        match self.convert_stage_args(call, span, scope) {
            Some(args) if width > 1 => Expr::tuple_ref(name, value_index, args),
            Some(args) => Expr::stage_ref(name, value_index, args),
            None => Expr::int(0),
        }
    }

    /// Arity and self-reference checks shared by stage reads.
    fn convert_stage_args(
        &mut self,
        call: &CallExpr,
        span: Span,
        scope: &Scope<'_>,
    ) -> Option<Vec<Expr>> {
        let name = call.name.name.as_str();
        let dims = self
            .by_name
            .get(name)
            .map(|&i| match &self.defs[i].kind {
                DefKind::Pure { def, .. } => def.args.len(),
                DefKind::Extern(ext) => ext.params.len(),
            })
            .unwrap_or(0);
        if call.args.len() != dims {
            self.arity(call, span, dims);
            return None;
        }
        if name == scope.owner && !scope.is_update {
            self.error(
                Diagnostic::error(
                    codes::E0109,
                    span,
                    format!("pure definition of `{}` reads itself", name),
                )
                .with_hint("recursive reads belong in an update definition"),
            );
            return None;
        }
        self.add_dep(scope.owner, name);
        Some(call.args.iter().map(|a| self.convert_expr(a, scope)).collect())
    }

    fn arity(&mut self, call: &CallExpr, span: Span, dims: usize) {
        let mut d = Diagnostic::error(
            codes::E0103,
            span,
            format!(
                "`{}` takes {} argument(s), found {}",
                call.name.name,
                dims,
                call.args.len()
            ),
        );
        if let Some(def) = self.definition_span(&call.name.name) {
            d = d.with_related(def, "defined here");
        }
        self.error(d);
    }

    // ── Post-pass: order and outputs ────────────────────────────────────

    /// Explicit `order` if valid, else a stable topological order.
    fn execution_order(&mut self) -> Vec<String> {
        let names: Vec<String> = self.defs.iter().map(|d| d.name.name.clone()).collect();
        let empty = Vec::new();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut topo: Vec<String> = Vec::new();

        // Kahn's algorithm; ties go to the earliest definition.
        while let Some(next) = names.iter().find(|n| {
            !placed.contains(n.as_str())
                && self
                    .deps
                    .get(n.as_str())
                    .unwrap_or(&empty)
                    .iter()
                    .all(|d| placed.contains(d.as_str()))
        }) {
            placed.insert(next);
            topo.push(next.clone());
        }

        if topo.len() < names.len() {
            let stuck: Vec<&str> = names
                .iter()
                .filter(|n| !placed.contains(n.as_str()))
                .map(|n| n.as_str())
                .collect();
            let span = self.defs[self.by_name[stuck[0]]].name.span;
            self.error(Diagnostic::error(
                codes::E0107,
                span,
                format!("cyclic dependency among stages: {}", stuck.join(", ")),
            ));
            topo.extend(stuck.iter().map(|s| s.to_string()));
            return topo;
        }

        match self.order {
            Some((idents, span)) => self.explicit_order(idents, span, &names).unwrap_or(topo),
            None => topo,
        }
    }

    fn explicit_order(
        &mut self,
        idents: &[Ident],
        directive: Span,
        names: &[String],
    ) -> Option<Vec<String>> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut valid = true;
        for id in idents {
            let name = id.name.as_str();
            if !self.by_name.contains_key(name) {
                self.error(Diagnostic::error(
                    codes::E0108,
                    id.span,
                    format!("`order` names unknown stage `{}`", name),
                ));
                valid = false;
                continue;
            }
            if !seen.insert(name) {
                self.error(Diagnostic::error(
                    codes::E0108,
                    id.span,
                    format!("`order` lists `{}` twice", name),
                ));
                valid = false;
                continue;
            }
            let late = self
                .deps
                .get(name)
                .and_then(|deps| deps.iter().find(|d| !seen.contains(d.as_str())))
                .cloned();
            if let Some(dep) = late {
                self.error(Diagnostic::error(
                    codes::E0108,
                    id.span,
                    format!("`order` places `{}` before its producer `{}`", name, dep),
                ));
                valid = false;
            }
        }
        for name in names {
            if !seen.contains(name.as_str()) {
                self.error(Diagnostic::error(
                    codes::E0108,
                    directive,
                    format!("`order` omits stage `{}`", name),
                ));
                valid = false;
            }
        }
        valid.then(|| idents.iter().map(|i| i.name.clone()).collect())
    }

    fn resolve_outputs(&mut self, order: &[String], program_span: Span) -> Vec<String> {
        if !self.output_seen {
            let Some(last) = order.last() else {
                return Vec::new();
            };
            self.diagnostics.push(
                Diagnostic::warning(
                    codes::W0101,
                    program_span,
                    format!("no `output` directive; treating `{}` as the output", last),
                )
                .with_hint(format!("add `output {}`", last)),
            );
            return vec![last.clone()];
        }

        let mut outputs: Vec<String> = Vec::new();
        let idents = std::mem::take(&mut self.outputs);
        for id in idents {
            if !self.by_name.contains_key(&id.name) {
                self.error(Diagnostic::error(
                    codes::E0108,
                    id.span,
                    format!("`output` names unknown stage `{}`", id.name),
                ));
            } else if outputs.contains(&id.name) {
                self.error(Diagnostic::error(
                    codes::E0108,
                    id.span,
                    format!("`output` lists `{}` twice", id.name),
                ));
            } else {
                outputs.push(id.name.clone());
            }
        }
        outputs
    }
}

/// The single right-hand side call `t(..)` of a scalar-form definition.
fn bare_call(def: &DefineStmt) -> Option<&CallExpr> {
    if def.tuple || def.values.len() != 1 {
        return None;
    }
    match &def.values[0].kind {
        ExprKind::Call(call) if call.slot.is_none() => Some(call),
        _ => None,
    }
}

fn collect_vars(expr: &ast::Expr, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Int(_) => {}
        ExprKind::Var(v) => {
            if !out.contains(v) {
                out.push(v.clone());
            }
        }
        ExprKind::Neg(inner) => collect_vars(inner, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            collect_vars(lhs, out);
            collect_vars(rhs, out);
        }
        ExprKind::Call(call) => {
            for a in &call.args {
                collect_vars(a, out);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
