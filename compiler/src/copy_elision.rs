// copy_elision.rs — Find stages that only forward another stage and elide them
//
// A stage is a pointwise copy when every tuple slot `i` reads slot `i` of one
// other stage at exactly its own index variables. For each such
// (producer, consumer) pair, the consumer's realize scope is removed and its
// readers are redirected to the producer.
//
// Preconditions: runs on the scheduled region, before storage flattening and
//   tuple splitting (it only understands stage-level `Provide` and `Call`).
//   `order` lists producers before consumers.
// Postconditions: every redirected read lies inside the producer's consume
//   scope; externally required stages keep their produce/consume scopes.
// Failure modes: none. Anything ambiguous is left unoptimized.
// Side effects: none (trace events are returned, not printed).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::ir::{
    env_of, equal, BinOp, Call, CallType, Env, Expr, ExprNode, Stage, Stmt, StmtNode,
};
use crate::mutator::{walk_expr, walk_stmt, Mutator};
use crate::trace::{SkipReason, TraceEvent};

// ── Copy pairs ──────────────────────────────────────────────────────────────

/// `consumer` is a verbatim pointwise forwarding of `producer`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CopyPair {
    pub producer: String,
    pub consumer: String,
}

impl CopyPair {
    pub fn new(producer: impl Into<String>, consumer: impl Into<String>) -> Self {
        CopyPair {
            producer: producer.into(),
            consumer: consumer.into(),
        }
    }
}

impl fmt::Display for CopyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.producer, self.consumer)
    }
}

// ── Detection ───────────────────────────────────────────────────────────────

/// If every value of `f` forwards the matching slot of a single other stage at
/// `f`'s own index variables, return that stage's name.
///
/// Update and extern definitions are never copies. The first disqualifying
/// condition is pushed to `trace`; the trace never changes the answer.
pub fn pointwise_copy_producer(
    f: &Stage,
    env: &Env,
    trace: &mut Vec<TraceEvent>,
) -> Option<String> {
    if f.has_update_definition() {
        trace.push(TraceEvent::UpdateDefinition {
            stage: f.name.clone(),
        });
        return None;
    }
    if f.has_extern_definition() {
        trace.push(TraceEvent::ExternDefinition {
            stage: f.name.clone(),
        });
        return None;
    }

    let mut producer: Option<&Stage> = None;
    let mut first_computed: Option<usize> = None;

    for (i, value) in f.values.iter().enumerate() {
        let reference = value
            .as_call()
            .filter(|call| call.call_type == CallType::Stage && call.name != f.name)
            .and_then(|call| env.get(&call.name).map(|p| (call, p)));

        let Some((call, p)) = reference else {
            if producer.is_some() {
                trace.push(TraceEvent::PartialTuple {
                    stage: f.name.clone(),
                    slot: i,
                });
                return None;
            }
            first_computed.get_or_insert(i);
            continue;
        };

        if let Some(prev) = producer {
            if prev.name != p.name {
                trace.push(TraceEvent::MultipleProducers {
                    stage: f.name.clone(),
                    first: prev.name.clone(),
                    second: p.name.clone(),
                });
                return None;
            }
        }

        if let Some(slot) = first_computed {
            trace.push(TraceEvent::PartialTuple {
                stage: f.name.clone(),
                slot,
            });
            return None;
        }

        if p.dimensions() != f.dimensions() || call.args.len() != f.dimensions() {
            trace.push(TraceEvent::DimensionMismatch {
                stage: f.name.clone(),
                producer: p.name.clone(),
                stage_dims: f.dimensions(),
                producer_dims: p.dimensions(),
            });
            return None;
        }

        if call.value_index != i {
            trace.push(TraceEvent::SlotIndexMismatch {
                stage: f.name.clone(),
                producer: p.name.clone(),
                slot: i,
                value_index: call.value_index,
            });
            return None;
        }

        // TODO: accept constant index shifts (`f(x) = g(x + 1)`) once the
        // rewriter can offset redirected coordinates.
        for (j, (param, arg)) in f.args.iter().zip(&call.args).enumerate() {
            if !equal(&Expr::var(param), arg) {
                trace.push(TraceEvent::ArgumentMismatch {
                    stage: f.name.clone(),
                    producer: p.name.clone(),
                    slot: i,
                    dim: j,
                    expected: param.clone(),
                    found: arg.to_string(),
                });
                return None;
            }
        }

        producer = Some(p);
    }

    let p = producer?;
    // Forwarding only some values of a tuple producer is not a copy.
    if p.value_count() != f.value_count() {
        trace.push(TraceEvent::SlotCountMismatch {
            stage: f.name.clone(),
            producer: p.name.clone(),
            stage_slots: f.value_count(),
            producer_slots: p.value_count(),
        });
        return None;
    }
    trace.push(TraceEvent::CopyFound {
        stage: f.name.clone(),
        producer: p.name.clone(),
        definition: f.to_string(),
    });
    Some(p.name.clone())
}

/// Pairs found by one scan of the execution order.
#[derive(Debug, Clone, Default)]
pub struct CopyScan {
    pub pairs: Vec<CopyPair>,
    pub trace: Vec<TraceEvent>,
}

/// Classify every stage of `order`, keeping the order of the consumers.
///
/// Names missing from `env` are reported and skipped.
pub fn pointwise_copies(order: &[String], env: &Env) -> CopyScan {
    let mut scan = CopyScan::default();
    for name in order {
        let Some(stage) = env.get(name) else {
            scan.trace.push(TraceEvent::UnknownStage {
                stage: name.clone(),
            });
            continue;
        };
        if let Some(producer) = pointwise_copy_producer(stage, env, &mut scan.trace) {
            scan.pairs.push(CopyPair::new(producer, name.clone()));
        }
    }
    scan
}

// ── Elision ─────────────────────────────────────────────────────────────────

/// Consumers elided so far, each mapped to the stage that now stands in for it.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    forward: HashMap<String, String>,
}

impl AliasMap {
    /// Follow forwarding links from `name` to a stage that was not elided.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        // Bounded so a hand-built cycle cannot spin forever.
        for _ in 0..=self.forward.len() {
            match self.forward.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    fn record(&mut self, consumer: &str, producer: &str) {
        self.forward
            .insert(consumer.to_string(), producer.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Apply one copy pair to `stmt`.
///
/// Returns `stmt` itself (same node) when nothing could be elided. A consumer
/// in `external` is never removed.
pub fn elide_pair(
    stmt: &Stmt,
    env: &Env,
    external: &HashSet<String>,
    pair: &CopyPair,
    aliases: &mut AliasMap,
    trace: &mut Vec<TraceEvent>,
) -> Stmt {
    let producer = aliases.resolve(&pair.producer).to_string();
    let consumer = pair.consumer.as_str();
    let skip = |reason| TraceEvent::ElisionSkipped {
        consumer: consumer.to_string(),
        producer: producer.clone(),
        reason,
    };

    if producer == consumer {
        trace.push(skip(SkipReason::SelfAlias));
        return stmt.clone();
    }
    if external.contains(consumer) {
        trace.push(skip(SkipReason::ExternallyRequired));
        return stmt.clone();
    }
    let same_shape = match (env.get(consumer), env.get(&producer)) {
        (Some(c), Some(p)) => {
            c.dimensions() == p.dimensions() && c.value_count() == p.value_count()
        }
        _ => false,
    };
    if !same_shape {
        trace.push(skip(SkipReason::ShapeMismatch));
        return stmt.clone();
    }

    let mut pass = CopyElision::new(&producer, consumer);
    let result = pass.mutate_stmt(stmt);

    if pass.elided == 0 && pass.partial == 0 {
        trace.push(skip(SkipReason::NoScope));
    } else if pass.partial == 0 {
        aliases.record(consumer, &producer);
        trace.push(TraceEvent::Elided {
            consumer: consumer.to_string(),
            producer: producer.clone(),
            redirected: pass.redirected,
        });
    } else {
        trace.push(TraceEvent::PartialElision {
            consumer: consumer.to_string(),
            producer: producer.clone(),
            redirected: pass.redirected,
            skipped: pass.skipped,
        });
    }
    result
}

/// Apply `pairs` in order, each to the previous result.
pub fn apply_copy_pairs(
    stmt: &Stmt,
    pairs: &[CopyPair],
    env: &Env,
    external: &HashSet<String>,
    trace: &mut Vec<TraceEvent>,
) -> Stmt {
    let mut aliases = AliasMap::default();
    pairs.iter().fold(stmt.clone(), |s, pair| {
        elide_pair(&s, env, external, pair, &mut aliases, trace)
    })
}

/// Output of the whole pass.
#[derive(Debug, Clone)]
pub struct ElisionResult {
    pub stmt: Stmt,
    pub pairs: Vec<CopyPair>,
    pub trace: Vec<TraceEvent>,
}

/// Find every pointwise copy among `order` and remove the redundant buffers
/// from `stmt`. Stages in `external` keep their buffers.
pub fn copy_elision(
    stmt: &Stmt,
    order: &[String],
    env: &Env,
    external: &HashSet<String>,
) -> ElisionResult {
    let CopyScan { pairs, mut trace } = pointwise_copies(order, env);
    let stmt = apply_copy_pairs(stmt, &pairs, env, external, &mut trace);
    ElisionResult { stmt, pairs, trace }
}

/// Walks the tree looking for realize scopes of `consumer`.
struct CopyElision<'a> {
    producer: &'a str,
    consumer: &'a str,
    /// Names of the consume scopes enclosing the current node.
    live: Vec<String>,
    elided: usize,
    partial: usize,
    redirected: usize,
    skipped: usize,
}

impl<'a> CopyElision<'a> {
    fn new(producer: &'a str, consumer: &'a str) -> Self {
        CopyElision {
            producer,
            consumer,
            live: Vec::new(),
            elided: 0,
            partial: 0,
            redirected: 0,
            skipped: 0,
        }
    }

    fn elide_realize(&mut self, realize: &Stmt, body: &Stmt) -> Stmt {
        let mut redirect = Redirect {
            producer: self.producer,
            consumer: self.consumer,
            live: self.live.clone(),
            consumer_depth: 0,
            redirected: 0,
            skipped: 0,
        };
        let new_body = redirect.mutate_stmt(body);
        self.redirected += redirect.redirected;
        self.skipped += redirect.skipped;

        if redirect.skipped == 0 {
            self.elided += 1;
            return StripScopes {
                stage: self.consumer,
            }
            .mutate_stmt(&new_body);
        }

        self.partial += 1;
        match realize.node() {
            StmtNode::Realize {
                name,
                bounds,
                body: old_body,
            } if !new_body.same_as(old_body) => {
                Stmt::realize(name.clone(), bounds.clone(), new_body)
            }
            _ => realize.clone(),
        }
    }
}

impl Mutator for CopyElision<'_> {
    fn mutate_expr(&mut self, expr: &Expr) -> Expr {
        expr.clone()
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt.node() {
            StmtNode::Realize { name, body, .. } if name == self.consumer => {
                self.elide_realize(stmt, body)
            }
            StmtNode::ProducerConsumer {
                name,
                is_producer: false,
                ..
            } => {
                self.live.push(name.clone());
                let out = walk_stmt(self, stmt);
                self.live.pop();
                out
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Redirects reads of `consumer` to `producer` inside one realize scope.
struct Redirect<'a> {
    producer: &'a str,
    consumer: &'a str,
    live: Vec<String>,
    /// Number of enclosing `consume consumer` scopes.
    consumer_depth: usize,
    redirected: usize,
    skipped: usize,
}

impl Redirect<'_> {
    fn producer_live(&self) -> bool {
        self.live.iter().any(|n| n == self.producer)
    }

    /// Decide whether a read of the consumer can become a read of the producer.
    fn can_redirect(&mut self) -> bool {
        if self.consumer_depth > 0 && self.producer_live() {
            self.redirected += 1;
            true
        } else {
            self.skipped += 1;
            false
        }
    }
}

impl Mutator for Redirect<'_> {
    fn mutate_expr(&mut self, expr: &Expr) -> Expr {
        match expr.node() {
            ExprNode::Call(call)
                if call.call_type == CallType::Stage && call.name == self.consumer =>
            {
                let inner = walk_expr(self, expr);
                if !self.can_redirect() {
                    return inner;
                }
                match inner.node() {
                    ExprNode::Call(c) => Expr::new(ExprNode::Call(Call {
                        name: self.producer.to_string(),
                        ..c.clone()
                    })),
                    _ => inner,
                }
            }
            ExprNode::BufferRef(name) if name == self.consumer => {
                if self.can_redirect() {
                    Expr::buffer(self.producer)
                } else {
                    expr.clone()
                }
            }
            _ => walk_expr(self, expr),
        }
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt.node() {
            // The consumer's own production only reads the producer.
            StmtNode::ProducerConsumer {
                name,
                is_producer: true,
                ..
            } if name == self.consumer => stmt.clone(),
            StmtNode::ProducerConsumer {
                name,
                is_producer: false,
                ..
            } => {
                let is_consumer = name == self.consumer;
                self.live.push(name.clone());
                if is_consumer {
                    self.consumer_depth += 1;
                }
                let out = walk_stmt(self, stmt);
                if is_consumer {
                    self.consumer_depth -= 1;
                }
                self.live.pop();
                out
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

/// Drops `produce stage` and unwraps `consume stage` in place.
struct StripScopes<'a> {
    stage: &'a str,
}

impl Mutator for StripScopes<'_> {
    fn mutate_expr(&mut self, expr: &Expr) -> Expr {
        expr.clone()
    }

    fn mutate_stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt.node() {
            StmtNode::ProducerConsumer {
                name,
                is_producer,
                body,
            } if name == self.stage => {
                if *is_producer {
                    Stmt::no_op()
                } else {
                    self.mutate_stmt(body)
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }
}

// ── Self-test ───────────────────────────────────────────────────────────────

/// The fixed self-test pipeline found the wrong pairs.
#[derive(Debug, Clone)]
pub struct SelfTestError {
    pub expected: Vec<CopyPair>,
    pub found: Vec<CopyPair>,
}

impl fmt::Display for SelfTestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |pairs: &[CopyPair]| {
            pairs
                .iter()
                .map(|p| format!("({})", p))
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "copy elision self-test failed: expected [{}], found [{}]",
            list(&self.expected),
            list(&self.found)
        )
    }
}

impl std::error::Error for SelfTestError {}

/// The self-test pipeline and its execution order:
///
/// ```text
/// f(x, y) = x + y
/// g(x, y) = x - y
/// h(x, y) = g(x, y)
/// in(x, y) = h(x, y)
/// tile(x, y) = {f(x, y), g(x, y)}
/// output(x, y) = tile(y, x)
/// ```
pub fn self_test_pipeline() -> (Env, Vec<String>) {
    let xy = || vec![Expr::var("x"), Expr::var("y")];
    let yx = || vec![Expr::var("y"), Expr::var("x")];
    let stages = vec![
        Stage::pure("f", &["x", "y"], vec![Expr::add(Expr::var("x"), Expr::var("y"))]),
        Stage::pure(
            "g",
            &["x", "y"],
            vec![Expr::binary(BinOp::Sub, Expr::var("x"), Expr::var("y"))],
        ),
        Stage::pure("h", &["x", "y"], vec![Expr::stage_ref("g", 0, xy())]),
        Stage::pure("in", &["x", "y"], vec![Expr::stage_ref("h", 0, xy())]),
        Stage::pure(
            "tile",
            &["x", "y"],
            vec![Expr::stage_ref("f", 0, xy()), Expr::stage_ref("g", 0, xy())],
        ),
        Stage::pure(
            "output",
            &["x", "y"],
            vec![
                Expr::tuple_ref("tile", 0, yx()),
                Expr::tuple_ref("tile", 1, yx()),
            ],
        ),
    ];
    let order = ["f", "g", "h", "in", "tile", "output"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    (env_of(stages), order)
}

/// Detect copies in the self-test pipeline and check the exact pair set.
pub fn self_test() -> Result<CopyScan, SelfTestError> {
    let (env, order) = self_test_pipeline();
    let scan = pointwise_copies(&order, &env);
    let expected: BTreeSet<CopyPair> =
        [CopyPair::new("g", "h"), CopyPair::new("h", "in")].into();
    let found: BTreeSet<CopyPair> = scan.pairs.iter().cloned().collect();
    if found != expected || found.len() != scan.pairs.len() {
        return Err(SelfTestError {
            expected: expected.into_iter().collect(),
            found: scan.pairs,
        });
    }
    Ok(scan)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExternDefinition, Range, UpdateDefinition};

    fn xy() -> Vec<Expr> {
        vec![Expr::var("x"), Expr::var("y")]
    }

    fn detect(stage: &Stage, env: &Env) -> (Option<String>, Vec<TraceEvent>) {
        let mut trace = Vec::new();
        let p = pointwise_copy_producer(stage, env, &mut trace);
        (p, trace)
    }

    fn base_env() -> Env {
        env_of(vec![
            Stage::pure("p", &["x", "y"], vec![Expr::add(Expr::var("x"), Expr::var("y"))]),
            Stage::pure("q", &["x", "y"], vec![Expr::var("x")]),
            Stage::pure(
                "pair",
                &["x", "y"],
                vec![Expr::var("x"), Expr::var("y")],
            ),
            Stage::pure("line", &["x"], vec![Expr::var("x")]),
        ])
    }

    // ── Detection ──

    #[test]
    fn detects_plain_copy() {
        let env = base_env();
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("p", 0, xy())]);
        let (p, trace) = detect(&c, &env);
        assert_eq!(p.as_deref(), Some("p"));
        assert!(matches!(trace.as_slice(), [TraceEvent::CopyFound { .. }]));
    }

    #[test]
    fn detects_whole_tuple_copy() {
        let env = base_env();
        let c = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("pair", 0, xy()), Expr::stage_ref("pair", 1, xy())],
        );
        assert_eq!(detect(&c, &env).0.as_deref(), Some("pair"));
    }

    #[test]
    fn update_definition_is_never_a_copy() {
        let env = base_env();
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("p", 0, xy())]).with_update(
            UpdateDefinition {
                args: xy(),
                values: vec![Expr::int(1)],
            },
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert_eq!(
            trace,
            vec![TraceEvent::UpdateDefinition {
                stage: "c".to_string()
            }]
        );
    }

    #[test]
    fn extern_definition_is_never_a_copy() {
        let env = base_env();
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("p", 0, xy())]).with_extern(
            ExternDefinition {
                symbol: "ext".to_string(),
                inputs: vec!["p".to_string()],
            },
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert!(matches!(trace[0], TraceEvent::ExternDefinition { .. }));
    }

    #[test]
    fn copy_of_update_producer_is_detected() {
        let mut env = base_env();
        let acc = Stage::pure("acc", &["x", "y"], vec![Expr::int(0)]).with_update(
            UpdateDefinition {
                args: xy(),
                values: vec![Expr::add(Expr::stage_ref("acc", 0, xy()), Expr::int(1))],
            },
        );
        env.insert(acc.name.clone(), acc);
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("acc", 0, xy())]);
        let (p, trace) = detect(&c, &env);
        assert_eq!(p.as_deref(), Some("acc"));
        assert!(matches!(trace.as_slice(), [TraceEvent::CopyFound { .. }]));
    }

    #[test]
    fn copy_of_extern_producer_is_detected() {
        let mut env = base_env();
        let e = Stage::pure("e", &["x", "y"], vec![]).with_extern(ExternDefinition {
            symbol: "c_e".to_string(),
            inputs: vec!["img".to_string()],
        });
        env.insert(e.name.clone(), e);
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("e", 0, xy())]);
        let (p, trace) = detect(&c, &env);
        assert_eq!(p.as_deref(), Some("e"));
        assert!(matches!(trace.as_slice(), [TraceEvent::CopyFound { .. }]));
    }

    #[test]
    fn extern_producer_passes_the_shape_check() {
        let env = env_of(vec![
            Stage::pure("e", &["x"], vec![]).with_extern(ExternDefinition {
                symbol: "c_e".to_string(),
                inputs: vec![],
            }),
            Stage::pure("c", &["x"], vec![Expr::stage_ref("e", 0, x())]),
            Stage::pure("out", &["x"], vec![Expr::stage_ref("c", 0, x())]),
        ]);
        // produce e; consume e { realize c { produce c; consume c { produce out } } }
        let tree = Stmt::block(
            Stmt::produce(
                "e",
                Stmt::evaluate(Expr::call("c_e", CallType::Extern, 0, vec![])),
            ),
            Stmt::consume(
                "e",
                Stmt::realize(
                    "c",
                    range("c"),
                    Stmt::block(
                        Stmt::produce("c", provide("c", Expr::stage_ref("e", 0, x()))),
                        Stmt::consume(
                            "c",
                            Stmt::produce("out", provide("out", Expr::stage_ref("c", 0, x()))),
                        ),
                    ),
                ),
            ),
        );
        let mut trace = Vec::new();
        let out = apply_copy_pairs(&tree, &[CopyPair::new("e", "c")], &env, &HashSet::new(), &mut trace);
        assert!(out.to_string().contains("out(x) = e(x)"), "{}", out);
        assert!(matches!(trace[0], TraceEvent::Elided { redirected: 1, .. }));
    }

    #[test]
    fn multiple_producers_rejected() {
        let env = base_env();
        let c = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("p", 0, xy()), Expr::stage_ref("q", 0, xy())],
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert!(matches!(trace[0], TraceEvent::MultipleProducers { .. }));
    }

    #[test]
    fn slot_permutation_rejected() {
        let env = base_env();
        let c = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("pair", 1, xy()), Expr::stage_ref("pair", 0, xy())],
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert_eq!(
            trace,
            vec![TraceEvent::SlotIndexMismatch {
                stage: "c".to_string(),
                producer: "pair".to_string(),
                slot: 0,
                value_index: 1,
            }]
        );
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let env = base_env();
        let c = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("line", 0, vec![Expr::var("x")])],
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert!(matches!(trace[0], TraceEvent::DimensionMismatch { .. }));
    }

    #[test]
    fn swapped_arguments_rejected() {
        let env = base_env();
        let c = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("p", 0, vec![Expr::var("y"), Expr::var("x")])],
        );
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert_eq!(
            trace,
            vec![TraceEvent::ArgumentMismatch {
                stage: "c".to_string(),
                producer: "p".to_string(),
                slot: 0,
                dim: 0,
                expected: "x".to_string(),
                found: "y".to_string(),
            }]
        );
    }

    #[test]
    fn shifted_argument_rejected() {
        let env = base_env();
        let shifted = vec![Expr::add(Expr::var("x"), Expr::int(1)), Expr::var("y")];
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("p", 0, shifted)]);
        assert_eq!(detect(&c, &env).0, None);
    }

    #[test]
    fn partial_tuple_rejected_in_either_order() {
        let env = base_env();
        let forward_then_compute = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::stage_ref("pair", 0, xy()), Expr::int(3)],
        );
        let compute_then_forward = Stage::pure(
            "d",
            &["x", "y"],
            vec![Expr::int(3), Expr::stage_ref("pair", 1, xy())],
        );
        let (p, trace) = detect(&forward_then_compute, &env);
        assert_eq!(p, None);
        assert_eq!(
            trace,
            vec![TraceEvent::PartialTuple {
                stage: "c".to_string(),
                slot: 1
            }]
        );
        let (p, trace) = detect(&compute_then_forward, &env);
        assert_eq!(p, None);
        assert_eq!(
            trace,
            vec![TraceEvent::PartialTuple {
                stage: "d".to_string(),
                slot: 0
            }]
        );
    }

    #[test]
    fn single_slot_of_tuple_producer_rejected() {
        let env = base_env();
        let c = Stage::pure("c", &["x", "y"], vec![Expr::stage_ref("pair", 0, xy())]);
        let (p, trace) = detect(&c, &env);
        assert_eq!(p, None);
        assert!(matches!(trace[0], TraceEvent::SlotCountMismatch { .. }));
    }

    #[test]
    fn image_reads_and_arithmetic_are_not_copies() {
        let env = base_env();
        let image = Stage::pure(
            "c",
            &["x", "y"],
            vec![Expr::call("img", CallType::Image, 0, xy())],
        );
        let wrapped = Stage::pure(
            "d",
            &["x", "y"],
            vec![Expr::add(Expr::stage_ref("p", 0, xy()), Expr::int(0))],
        );
        assert_eq!(detect(&image, &env), (None, vec![]));
        assert_eq!(detect(&wrapped, &env), (None, vec![]));
    }

    #[test]
    fn unknown_stage_in_order_is_skipped() {
        let env = base_env();
        let scan = pointwise_copies(&["ghost".to_string(), "p".to_string()], &env);
        assert!(scan.pairs.is_empty());
        assert_eq!(
            scan.trace,
            vec![TraceEvent::UnknownStage {
                stage: "ghost".to_string()
            }]
        );
    }

    #[test]
    fn self_test_finds_exact_pairs() {
        let scan = self_test().expect("self-test should pass");
        assert_eq!(
            scan.pairs,
            vec![CopyPair::new("g", "h"), CopyPair::new("h", "in")]
        );
        assert!(scan.trace.iter().any(|e| matches!(
            e,
            TraceEvent::MultipleProducers { stage, .. } if stage == "tile"
        )));
        assert!(scan.trace.iter().any(|e| matches!(
            e,
            TraceEvent::ArgumentMismatch { stage, .. } if stage == "output"
        )));
    }

    // ── Elision ──

    fn range(stage: &str) -> Vec<Range> {
        vec![Range {
            min: Expr::var(format!("{}.x.min", stage)),
            extent: Expr::var(format!("{}.x.extent", stage)),
        }]
    }

    fn x() -> Vec<Expr> {
        vec![Expr::var("x")]
    }

    fn line_env() -> Env {
        env_of(vec![
            Stage::pure("p", &["x"], vec![Expr::var("x")]),
            Stage::pure("c", &["x"], vec![Expr::stage_ref("p", 0, x())]),
            Stage::pure("out", &["x"], vec![Expr::stage_ref("c", 0, x())]),
        ])
    }

    fn provide(name: &str, value: Expr) -> Stmt {
        Stmt::provide(name, vec![value], x())
    }

    /// realize p { produce p; consume p { realize c { produce c; consume c { produce out } } } }
    fn nested_tree() -> (Stmt, Stmt) {
        let produce_p = Stmt::produce("p", provide("p", Expr::var("x")));
        let produce_out = Stmt::produce("out", provide("out", Expr::stage_ref("c", 0, x())));
        let realize_c = Stmt::realize(
            "c",
            range("c"),
            Stmt::block(
                Stmt::produce("c", provide("c", Expr::stage_ref("p", 0, x()))),
                Stmt::consume("c", produce_out),
            ),
        );
        let tree = Stmt::realize(
            "p",
            range("p"),
            Stmt::block(produce_p.clone(), Stmt::consume("p", realize_c)),
        );
        (tree, produce_p)
    }

    #[test]
    fn elides_consumer_and_redirects_reads() {
        let (tree, produce_p) = nested_tree();
        let env = line_env();
        let mut trace = Vec::new();
        let out = apply_copy_pairs(
            &tree,
            &[CopyPair::new("p", "c")],
            &env,
            &HashSet::new(),
            &mut trace,
        );
        assert_eq!(
            out.to_string(),
            "realize p([p.x.min, p.x.extent]) {\n  produce p {\n    p(x) = x\n  }\n  consume p {\n    produce out {\n      out(x) = p(x)\n    }\n  }\n}\n"
        );
        let StmtNode::Realize { body, .. } = out.node() else {
            panic!("expected realize");
        };
        let StmtNode::Block { first, .. } = body.node() else {
            panic!("expected block");
        };
        assert!(first.same_as(&produce_p));
        assert_eq!(
            trace,
            vec![TraceEvent::Elided {
                consumer: "c".to_string(),
                producer: "p".to_string(),
                redirected: 1,
            }]
        );
    }

    #[test]
    fn second_application_is_identity() {
        let (tree, _) = nested_tree();
        let env = line_env();
        let pairs = [CopyPair::new("p", "c")];
        let mut trace = Vec::new();
        let once = apply_copy_pairs(&tree, &pairs, &env, &HashSet::new(), &mut trace);
        let twice = apply_copy_pairs(&once, &pairs, &env, &HashSet::new(), &mut trace);
        assert!(twice.same_as(&once));
    }

    #[test]
    fn external_consumer_is_kept() {
        let (tree, _) = nested_tree();
        let env = line_env();
        let external: HashSet<String> = ["c".to_string()].into();
        let mut trace = Vec::new();
        let out = apply_copy_pairs(&tree, &[CopyPair::new("p", "c")], &env, &external, &mut trace);
        assert!(out.same_as(&tree));
        assert_eq!(
            trace,
            vec![TraceEvent::ElisionSkipped {
                consumer: "c".to_string(),
                producer: "p".to_string(),
                reason: SkipReason::ExternallyRequired,
            }]
        );
    }

    #[test]
    fn missing_scope_returns_same_tree() {
        let tree = Stmt::produce("p", provide("p", Expr::var("x")));
        let env = line_env();
        let mut trace = Vec::new();
        let out = apply_copy_pairs(&tree, &[CopyPair::new("p", "c")], &env, &HashSet::new(), &mut trace);
        assert!(out.same_as(&tree));
        assert!(matches!(
            trace[0],
            TraceEvent::ElisionSkipped {
                reason: SkipReason::NoScope,
                ..
            }
        ));
    }

    #[test]
    fn read_outside_producer_scope_is_not_redirected() {
        // realize c {
        //   realize p { produce p; consume p { produce c { c(x) = p(x) } } }
        //   consume c { produce out { out(x) = c(x) } }
        // }
        let realize_p = Stmt::realize(
            "p",
            range("p"),
            Stmt::block(
                Stmt::produce("p", provide("p", Expr::var("x"))),
                Stmt::consume(
                    "p",
                    Stmt::produce("c", provide("c", Expr::stage_ref("p", 0, x()))),
                ),
            ),
        );
        let tree = Stmt::realize(
            "c",
            range("c"),
            Stmt::block(
                realize_p,
                Stmt::consume(
                    "c",
                    Stmt::produce("out", provide("out", Expr::stage_ref("c", 0, x()))),
                ),
            ),
        );
        let env = line_env();
        let mut trace = Vec::new();
        let out = apply_copy_pairs(&tree, &[CopyPair::new("p", "c")], &env, &HashSet::new(), &mut trace);
        assert!(out.same_as(&tree));
        assert_eq!(
            trace,
            vec![TraceEvent::PartialElision {
                consumer: "c".to_string(),
                producer: "p".to_string(),
                redirected: 0,
                skipped: 1,
            }]
        );
    }

    #[test]
    fn partial_redirect_keeps_consumer_buffer() {
        // consume c { produce a { a(x) = c(x) }; consume p { produce b { b(x) = c(x) } } }
        let consume_c = Stmt::consume(
            "c",
            Stmt::block(
                Stmt::produce("a", provide("a", Expr::stage_ref("c", 0, x()))),
                Stmt::consume(
                    "p",
                    Stmt::produce("b", provide("b", Expr::stage_ref("c", 0, x()))),
                ),
            ),
        );
        let tree = Stmt::realize(
            "c",
            range("c"),
            Stmt::block(
                Stmt::produce("c", provide("c", Expr::stage_ref("p", 0, x()))),
                consume_c,
            ),
        );
        let env = line_env();
        let mut trace = Vec::new();
        let pairs = [CopyPair::new("p", "c")];
        let out = apply_copy_pairs(&tree, &pairs, &env, &HashSet::new(), &mut trace);
        let text = out.to_string();
        assert!(text.contains("realize c("));
        assert!(text.contains("produce c {"));
        assert!(text.contains("a(x) = c(x)"));
        assert!(text.contains("b(x) = p(x)"));
        assert!(matches!(
            trace[0],
            TraceEvent::PartialElision {
                redirected: 1,
                skipped: 1,
                ..
            }
        ));

        let again = apply_copy_pairs(&out, &pairs, &env, &HashSet::new(), &mut Vec::new());
        assert!(again.same_as(&out));
    }

    #[test]
    fn buffer_references_are_redirected() {
        let env = env_of(vec![
            Stage::pure("p", &["x"], vec![Expr::var("x")]),
            Stage::pure("c", &["x"], vec![Expr::stage_ref("p", 0, x())]),
        ]);
        let ext_call = Stmt::evaluate(Expr::call(
            "c_blur",
            CallType::Extern,
            0,
            vec![Expr::buffer("c")],
        ));
        let tree = Stmt::consume(
            "p",
            Stmt::realize(
                "c",
                range("c"),
                Stmt::block(
                    Stmt::produce("c", provide("c", Expr::stage_ref("p", 0, x()))),
                    Stmt::consume("c", Stmt::produce("blur", ext_call)),
                ),
            ),
        );
        let out = apply_copy_pairs(
            &tree,
            &[CopyPair::new("p", "c")],
            &env,
            &HashSet::new(),
            &mut Vec::new(),
        );
        assert_eq!(
            out.to_string(),
            "consume p {\n  produce blur {\n    c_blur(p.buffer)\n  }\n}\n"
        );
    }

    #[test]
    fn redirected_tuple_reads_keep_their_slots() {
        let env = env_of(vec![
            Stage::pure("p", &["x"], vec![Expr::var("x"), Expr::int(1)]),
            Stage::pure(
                "c",
                &["x"],
                vec![Expr::tuple_ref("p", 0, x()), Expr::tuple_ref("p", 1, x())],
            ),
        ]);
        let reads = vec![Expr::tuple_ref("c", 0, x()), Expr::tuple_ref("c", 1, x())];
        let tree = Stmt::consume(
            "p",
            Stmt::realize(
                "c",
                range("c"),
                Stmt::block(
                    Stmt::produce("c", Stmt::provide("c", env["c"].values.clone(), x())),
                    Stmt::consume("c", Stmt::produce("out", Stmt::provide("out", reads, x()))),
                ),
            ),
        );
        let out = apply_copy_pairs(
            &tree,
            &[CopyPair::new("p", "c")],
            &env,
            &HashSet::new(),
            &mut Vec::new(),
        );
        assert!(out.to_string().contains("out(x) = {p(x)[0], p(x)[1]}"), "{}", out);
    }

    #[test]
    fn alias_map_follows_chains() {
        let mut aliases = AliasMap::default();
        assert!(aliases.is_empty());
        aliases.record("h", "g");
        aliases.record("in", "g");
        assert_eq!(aliases.resolve("h"), "g");
        assert_eq!(aliases.resolve("in"), "g");
        assert_eq!(aliases.resolve("f"), "f");
    }

    #[test]
    fn chained_pairs_collapse_onto_first_producer() {
        let (env, order) = self_test_pipeline();
        // realize f { produce f; consume f { realize g { ... realize output } } }
        let mut rest: Option<Stmt> = None;
        for name in order.iter().rev() {
            let stage = &env[name];
            let produce = Stmt::produce(
                name.clone(),
                Stmt::provide(name.clone(), stage.values.clone(), stage.arg_exprs()),
            );
            let scoped = match rest {
                Some(r) => Stmt::block(produce, Stmt::consume(name.clone(), r)),
                None => produce,
            };
            rest = Some(Stmt::realize(name.clone(), vec![], scoped));
        }
        let tree = rest.unwrap();
        let external: HashSet<String> = ["output".to_string()].into();
        let result = copy_elision(&tree, &order, &env, &external);
        let text = result.stmt.to_string();
        assert!(!text.contains("realize h"));
        assert!(!text.contains("realize in"));
        assert!(!text.contains("h(x, y)"));
        assert!(text.contains("realize tile"));
        assert!(result.trace.contains(&TraceEvent::Elided {
            consumer: "in".to_string(),
            producer: "g".to_string(),
            redirected: 0,
        }));
    }
}
