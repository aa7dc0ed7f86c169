// verify.rs — Post-conditions of copy elision
//
// Checks a (rewritten) statement tree for the properties the elision pass
// promises to preserve.
//
// Preconditions: `env` holds the definitions the tree was lowered from.
// Postconditions: returns an `ElisionCert`; never modifies the tree.
// Failure modes: none (a failing obligation is reported through the cert).
// Side effects: none.

use std::collections::HashSet;

use crate::ir::{CallType, Env, Expr, ExprNode, Stmt, StmtNode};
use crate::mutator::{visit_expr_children, visit_stmt_children, Visitor};

/// Machine-checkable evidence for elision postconditions (V1-V3).
#[derive(Debug, Clone)]
pub struct ElisionCert {
    /// V1: Every stage read lies inside that stage's produce or consume scope.
    pub v1_no_use_before_production: bool,
    /// V2: Every externally required stage still has a produce scope.
    pub v2_external_addressable: bool,
    /// V3: Every referenced stage still has a produce scope.
    pub v3_no_dangling_references: bool,
}

impl crate::pass::StageCert for ElisionCert {
    fn all_pass(&self) -> bool {
        self.v1_no_use_before_production
            && self.v2_external_addressable
            && self.v3_no_dangling_references
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("V1_no_use_before_production", self.v1_no_use_before_production),
            ("V2_external_addressable", self.v2_external_addressable),
            ("V3_no_dangling_references", self.v3_no_dangling_references),
        ]
    }
}

/// Verify elision postconditions on `stmt`.
pub fn verify_elision(stmt: &Stmt, env: &Env, external: &HashSet<String>) -> ElisionCert {
    let mut check = ScopeCheck {
        env,
        scopes: Vec::new(),
        produced: HashSet::new(),
        referenced: HashSet::new(),
        out_of_scope: 0,
    };
    check.visit_stmt(stmt);

    let v2 = external
        .iter()
        .filter(|name| env.contains_key(*name))
        .all(|name| check.produced.contains(name));
    let v3 = check.referenced.is_subset(&check.produced);

    ElisionCert {
        v1_no_use_before_production: check.out_of_scope == 0,
        v2_external_addressable: v2,
        v3_no_dangling_references: v3,
    }
}

struct ScopeCheck<'a> {
    env: &'a Env,
    /// Produce/consume scopes enclosing the current node.
    scopes: Vec<String>,
    produced: HashSet<String>,
    referenced: HashSet<String>,
    out_of_scope: usize,
}

impl ScopeCheck<'_> {
    fn reference(&mut self, name: &str) {
        self.referenced.insert(name.to_string());
        if !self.scopes.iter().any(|s| s == name) {
            self.out_of_scope += 1;
        }
    }
}

impl Visitor for ScopeCheck<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr.node() {
            ExprNode::Call(call) if call.call_type == CallType::Stage => self.reference(&call.name),
            ExprNode::BufferRef(name) if self.env.contains_key(name) => self.reference(name),
            _ => {}
        }
        visit_expr_children(self, expr)
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let StmtNode::ProducerConsumer {
            name, is_producer, ..
        } = stmt.node()
        else {
            return visit_stmt_children(self, stmt);
        };
        if *is_producer {
            self.produced.insert(name.clone());
        }
        self.scopes.push(name.clone());
        visit_stmt_children(self, stmt);
        self.scopes.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{env_of, Stage};
    use crate::pass::StageCert;

    fn x() -> Vec<Expr> {
        vec![Expr::var("x")]
    }

    fn env() -> Env {
        env_of(vec![
            Stage::pure("p", &["x"], vec![Expr::var("x")]),
            Stage::pure("out", &["x"], vec![Expr::stage_ref("p", 0, x())]),
        ])
    }

    fn good_tree() -> Stmt {
        Stmt::block(
            Stmt::produce("p", Stmt::provide("p", x(), x())),
            Stmt::consume(
                "p",
                Stmt::produce(
                    "out",
                    Stmt::provide("out", vec![Expr::stage_ref("p", 0, x())], x()),
                ),
            ),
        )
    }

    #[test]
    fn well_scoped_tree_passes() {
        let external: HashSet<String> = ["out".to_string()].into();
        let cert = verify_elision(&good_tree(), &env(), &external);
        assert!(cert.all_pass(), "{:?}", cert.obligations());
    }

    #[test]
    fn read_before_consume_scope_fails_v1() {
        let tree = Stmt::block(
            Stmt::produce(
                "out",
                Stmt::provide("out", vec![Expr::stage_ref("p", 0, x())], x()),
            ),
            Stmt::produce("p", Stmt::provide("p", x(), x())),
        );
        let cert = verify_elision(&tree, &env(), &HashSet::new());
        assert!(!cert.v1_no_use_before_production);
        assert!(cert.v3_no_dangling_references);
        assert!(!cert.all_pass());
    }

    #[test]
    fn dangling_reference_fails_v3() {
        let tree = Stmt::consume(
            "c",
            Stmt::produce(
                "out",
                Stmt::provide("out", vec![Expr::stage_ref("c", 0, x())], x()),
            ),
        );
        let cert = verify_elision(&tree, &env(), &HashSet::new());
        assert!(cert.v1_no_use_before_production);
        assert!(!cert.v3_no_dangling_references);
    }

    #[test]
    fn missing_external_fails_v2() {
        let external: HashSet<String> = ["p".to_string(), "out".to_string()].into();
        let tree = Stmt::produce("out", Stmt::provide("out", x(), x()));
        let cert = verify_elision(&tree, &env(), &external);
        assert!(!cert.v2_external_addressable);
        assert_eq!(
            cert.obligations()
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| *name)
                .collect::<Vec<_>>(),
            vec!["V2_external_addressable"]
        );
    }

    #[test]
    fn input_buffers_are_not_stage_references() {
        let tree = Stmt::produce(
            "out",
            Stmt::evaluate(Expr::call("ext", CallType::Extern, 0, vec![Expr::buffer("img")])),
        );
        let cert = verify_elision(&tree, &env(), &HashSet::new());
        assert!(cert.all_pass());
    }
}
