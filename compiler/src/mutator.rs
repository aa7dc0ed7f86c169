// mutator.rs — Sharing-preserving tree walks over `ir::Expr` / `ir::Stmt`
//
// `Mutator` rebuilds a node only when one of its children came back as a
// different node; otherwise the original handle is returned, so untouched
// subtrees keep their identity. `Visitor` is the read-only counterpart.
//
// Preconditions: none.
// Postconditions: `walk_*` returns a handle `same_as` its input whenever every
//   child mutation returned its input.
// Failure modes: none.
// Side effects: none.

use crate::ir::{Call, Expr, ExprNode, Range, Stmt, StmtNode};

// ── Mutator ─────────────────────────────────────────────────────────────────

pub trait Mutator {
    fn mutate_expr(&mut self, expr: &Expr) -> Expr {
        walk_expr(self, expr)
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> Stmt {
        walk_stmt(self, stmt)
    }
}

/// Mutate every expression in `exprs`. The flag is true if any changed.
pub fn mutate_exprs<M: Mutator + ?Sized>(m: &mut M, exprs: &[Expr]) -> (Vec<Expr>, bool) {
    let mut changed = false;
    let out = exprs
        .iter()
        .map(|e| {
            let new = m.mutate_expr(e);
            changed |= !new.same_as(e);
            new
        })
        .collect();
    (out, changed)
}

pub fn walk_expr<M: Mutator + ?Sized>(m: &mut M, expr: &Expr) -> Expr {
    match expr.node() {
        ExprNode::IntImm(_) | ExprNode::Var(_) | ExprNode::BufferRef(_) => expr.clone(),
        ExprNode::Binary { op, a, b } => {
            let new_a = m.mutate_expr(a);
            let new_b = m.mutate_expr(b);
            if new_a.same_as(a) && new_b.same_as(b) {
                expr.clone()
            } else {
                Expr::binary(*op, new_a, new_b)
            }
        }
        ExprNode::Call(call) => {
            let (args, changed) = mutate_exprs(m, &call.args);
            if !changed {
                expr.clone()
            } else {
                Expr::new(ExprNode::Call(Call {
                    name: call.name.clone(),
                    call_type: call.call_type,
                    value_index: call.value_index,
                    tuple: call.tuple,
                    args,
                }))
            }
        }
    }
}

pub fn walk_stmt<M: Mutator + ?Sized>(m: &mut M, stmt: &Stmt) -> Stmt {
    match stmt.node() {
        StmtNode::Realize { name, bounds, body } => {
            let mut changed = false;
            let new_bounds: Vec<Range> = bounds
                .iter()
                .map(|r| {
                    let min = m.mutate_expr(&r.min);
                    let extent = m.mutate_expr(&r.extent);
                    changed |= !min.same_as(&r.min) || !extent.same_as(&r.extent);
                    Range { min, extent }
                })
                .collect();
            let new_body = m.mutate_stmt(body);
            if !changed && new_body.same_as(body) {
                stmt.clone()
            } else {
                Stmt::realize(name.clone(), new_bounds, new_body)
            }
        }
        StmtNode::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            let new_body = m.mutate_stmt(body);
            if new_body.same_as(body) {
                stmt.clone()
            } else {
                Stmt::producer_consumer(name.clone(), *is_producer, new_body)
            }
        }
        StmtNode::For {
            var,
            min,
            extent,
            body,
        } => {
            let new_min = m.mutate_expr(min);
            let new_extent = m.mutate_expr(extent);
            let new_body = m.mutate_stmt(body);
            if new_min.same_as(min) && new_extent.same_as(extent) && new_body.same_as(body) {
                stmt.clone()
            } else {
                Stmt::for_loop(var.clone(), new_min, new_extent, new_body)
            }
        }
        StmtNode::Block { first, rest } => {
            let new_first = m.mutate_stmt(first);
            let new_rest = m.mutate_stmt(rest);
            if new_first.same_as(first) && new_rest.same_as(rest) {
                stmt.clone()
            } else {
                Stmt::block(new_first, new_rest)
            }
        }
        StmtNode::Provide { name, values, args } => {
            let (new_values, values_changed) = mutate_exprs(m, values);
            let (new_args, args_changed) = mutate_exprs(m, args);
            if !values_changed && !args_changed {
                stmt.clone()
            } else {
                Stmt::provide(name.clone(), new_values, new_args)
            }
        }
        StmtNode::Evaluate(value) => {
            let new_value = m.mutate_expr(value);
            if new_value.same_as(value) {
                stmt.clone()
            } else {
                Stmt::evaluate(new_value)
            }
        }
    }
}

// ── Visitor ─────────────────────────────────────────────────────────────────

pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        visit_expr_children(self, expr)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        visit_stmt_children(self, stmt)
    }
}

pub fn visit_expr_children<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr.node() {
        ExprNode::IntImm(_) | ExprNode::Var(_) | ExprNode::BufferRef(_) => {}
        ExprNode::Binary { a, b, .. } => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        ExprNode::Call(call) => {
            for arg in &call.args {
                v.visit_expr(arg);
            }
        }
    }
}

pub fn visit_stmt_children<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match stmt.node() {
        StmtNode::Realize { bounds, body, .. } => {
            for r in bounds {
                v.visit_expr(&r.min);
                v.visit_expr(&r.extent);
            }
            v.visit_stmt(body);
        }
        StmtNode::ProducerConsumer { body, .. } => v.visit_stmt(body),
        StmtNode::For {
            min, extent, body, ..
        } => {
            v.visit_expr(min);
            v.visit_expr(extent);
            v.visit_stmt(body);
        }
        StmtNode::Block { first, rest } => {
            v.visit_stmt(first);
            v.visit_stmt(rest);
        }
        StmtNode::Provide { values, args, .. } => {
            for e in values.iter().chain(args) {
                v.visit_expr(e);
            }
        }
        StmtNode::Evaluate(value) => v.visit_expr(value),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
