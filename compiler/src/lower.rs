// lower.rs — Build the scheduled region from resolved stages
//
// Every stage is computed at root, in execution order. A stage's buffer is
// allocated by a `realize` scope that also encloses everything computed after
// it, so each consumer runs inside the `consume` scopes of all its producers.
//
//   realize f(bounds) {
//     produce f { loop nest }
//     consume f { <later stages> }
//   }
//
// Externally bound stages get the produce/consume markers but no `realize`;
// their buffers belong to the caller. The last stage has no consume scope.
//
// Preconditions: `resolved` comes from a `resolve` run without errors.
// Postconditions: every stage in `resolved.order` has exactly one produce scope.
// Failure modes: an empty program produces E0201.
// Side effects: none.

use std::collections::HashSet;

use crate::ast::Span;
use crate::diag::{codes, Diagnostic};
use crate::ir::{CallType, Expr, ExprNode, Range, Stage, Stmt};
use crate::mutator::{visit_expr_children, Visitor};
use crate::resolve::ResolvedProgram;

// ── Output types ────────────────────────────────────────────────────────────

/// Result of lowering.
pub struct LowerResult {
    pub stmt: Stmt,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Lower `resolved` into a statement tree. Stages in `external` are not
/// realized.
pub fn lower(resolved: &ResolvedProgram, external: &HashSet<String>, span: Span) -> LowerResult {
    let mut diagnostics = Vec::new();
    if resolved.order.is_empty() {
        diagnostics.push(
            Diagnostic::error(codes::E0201, span, "nothing to lower: no stages are defined")
                .with_hint("define at least one stage, e.g. `f(x) = x`"),
        );
        return LowerResult {
            stmt: Stmt::no_op(),
            diagnostics,
        };
    }

    let mut rest: Option<Stmt> = None;
    for name in resolved.order.iter().rev() {
        let Some(stage) = resolved.env.get(name) else {
            diagnostics.push(Diagnostic::error(
                codes::E0201,
                span,
                format!("stage `{}` is ordered but has no definition", name),
            ));
            continue;
        };
        let produce = Stmt::produce(name.clone(), compute(stage));
        let scoped = match rest.take() {
            Some(r) => Stmt::block(produce, Stmt::consume(name.clone(), r)),
            None => produce,
        };
        rest = Some(if external.contains(name) {
            scoped
        } else {
            Stmt::realize(name.clone(), bounds(stage), scoped)
        });
    }

    LowerResult {
        stmt: rest.unwrap_or_else(Stmt::no_op),
        diagnostics,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn bound_var(stage: &str, var: &str, field: &str) -> Expr {
    Expr::var(format!("{}.{}.{}", stage, var, field))
}

/// Symbolic allocation bounds, one per dimension.
pub fn bounds(stage: &Stage) -> Vec<Range> {
    stage
        .args
        .iter()
        .map(|a| Range {
            min: bound_var(&stage.name, a, "min"),
            extent: bound_var(&stage.name, a, "extent"),
        })
        .collect()
}

/// Wrap `body` in loops over `vars`, the first variable innermost.
fn loop_nest(stage: &str, vars: &[String], body: Stmt) -> Stmt {
    vars.iter().fold(body, |inner, v| {
        Stmt::for_loop(
            v.clone(),
            bound_var(stage, v, "min"),
            bound_var(stage, v, "extent"),
            inner,
        )
    })
}

/// Variables in first-use order.
struct CollectVars(Vec<String>);

impl Visitor for CollectVars {
    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprNode::Var(name) = expr.node() {
            if !self.0.contains(name) {
                self.0.push(name.clone());
            }
        }
        visit_expr_children(self, expr)
    }
}

fn compute(stage: &Stage) -> Stmt {
    if let Some(ext) = &stage.extern_def {
        let inputs = ext.inputs.iter().map(Expr::buffer).collect();
        return Stmt::evaluate(Expr::call(ext.symbol.clone(), CallType::Extern, 0, inputs));
    }

    let pure = loop_nest(
        &stage.name,
        &stage.args,
        Stmt::provide(stage.name.clone(), stage.values.clone(), stage.arg_exprs()),
    );
    let Some(update) = &stage.update else {
        return pure;
    };

    let mut vars = CollectVars(Vec::new());
    for a in &update.args {
        vars.visit_expr(a);
    }
    let update_nest = loop_nest(
        &stage.name,
        &vars.0,
        Stmt::provide(stage.name.clone(), update.values.clone(), update.args.clone()),
    );
    Stmt::block(pure, update_nest)
}

// ── Tests ───────────────────────────────────────────────────────────────────
