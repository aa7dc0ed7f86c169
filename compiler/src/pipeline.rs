// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed Program must be set before calling run_pipeline.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics; a failing elision cert.
// Side effects: calls on_pass_complete callback after each pass for immediate
//   display; prints timing and copy-elision trace lines when verbose.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::ast::Program;
use crate::copy_elision::{apply_copy_pairs, CopyPair, CopyScan, ElisionResult};
use crate::diag::{codes, has_errors, Diagnostic};
use crate::ir::Stmt;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::resolve::ResolvedProgram;
use crate::trace::TraceEvent;
use crate::verify::ElisionCert;

// ── Options ────────────────────────────────────────────────────────────────

/// Knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Extra stages to treat as externally required.
    pub keep: Vec<String>,
    /// When false, copies are still detected but the tree is left alone.
    pub elide: bool,
    /// Print per-pass timing and the copy-elision trace to stderr.
    pub verbose: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            keep: Vec::new(),
            elide: true,
            verbose: false,
        }
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

pub struct Artifacts {
    pub program: Program,
    pub resolved: Option<ResolvedProgram>,
    /// Outputs plus `--keep` stages.
    pub external: Option<HashSet<String>>,
    pub lowered: Option<Stmt>,
    pub scan: Option<CopyScan>,
    pub elided: Option<ElisionResult>,
    pub cert: Option<ElisionCert>,
}

/// Provenance metadata for reproducible reports.
///
/// `source_hash`: SHA-256 of the raw `.stg` source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from source text.
pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let result = hasher.finalize();
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&result);

    Provenance {
        source_hash,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub artifacts: Artifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(program: Program) -> Self {
        Self {
            artifacts: Artifacts {
                program,
                resolved: None,
                external: None,
                lowered: None,
                scan: None,
                elided: None,
                cert: None,
            },
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed", descriptor(self.failing_pass).name)
    }
}

impl std::error::Error for PipelineError {}

// ── Per-pass bookkeeping ───────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "stagec: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Per-pass post-processing for passes that produce no diagnostics.
fn finish_pass_no_diags(
    pass_id: PassId,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) {
    on_pass_complete(pass_id, &[]);
    if verbose {
        eprintln!(
            "stagec: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

fn print_trace(events: &[TraceEvent]) {
    for event in events {
        if event.is_rejection() {
            eprintln!("stagec: [copy-elision] not a copy: {}", event);
        } else {
            eprintln!("stagec: [copy-elision] {}", event);
        }
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `state.artifacts.program` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; elision cert failure.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let verbose = options.verbose;

    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::Resolve => {
                let t = Instant::now();
                let result = crate::resolve::resolve(&state.artifacts.program);
                let elapsed = t.elapsed();
                let mut external = result.resolved.external();
                external.extend(options.keep.iter().cloned());
                state.artifacts.external = Some(external);
                state.artifacts.resolved = Some(result.resolved);
                finish_pass(
                    state,
                    PassId::Resolve,
                    result.diagnostics,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Lower => {
                let t = Instant::now();
                let result = crate::lower::lower(
                    state.artifacts.resolved.as_ref().unwrap(),
                    state.artifacts.external.as_ref().unwrap(),
                    state.artifacts.program.span,
                );
                let elapsed = t.elapsed();
                state.artifacts.lowered = Some(result.stmt);
                finish_pass(
                    state,
                    PassId::Lower,
                    result.diagnostics,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::FindCopies => {
                let t = Instant::now();
                let resolved = state.artifacts.resolved.as_ref().unwrap();
                let scan = crate::copy_elision::pointwise_copies(&resolved.order, &resolved.env);
                let elapsed = t.elapsed();
                if verbose {
                    print_trace(&scan.trace);
                }
                state.artifacts.scan = Some(scan);
                finish_pass_no_diags(PassId::FindCopies, elapsed, verbose, &mut on_pass_complete);
            }
            PassId::ElideCopies => {
                let t = Instant::now();
                let resolved = state.artifacts.resolved.as_ref().unwrap();
                let lowered = state.artifacts.lowered.as_ref().unwrap();
                let scan = state.artifacts.scan.as_ref().unwrap();
                let mut trace = Vec::new();
                let stmt = if options.elide {
                    apply_copy_pairs(
                        lowered,
                        &scan.pairs,
                        &resolved.env,
                        state.artifacts.external.as_ref().unwrap(),
                        &mut trace,
                    )
                } else {
                    lowered.clone()
                };
                let elapsed = t.elapsed();
                if verbose {
                    print_trace(&trace);
                }
                let mut full_trace = scan.trace.clone();
                full_trace.extend(trace);
                state.artifacts.elided = Some(ElisionResult {
                    stmt,
                    pairs: scan.pairs.clone(),
                    trace: full_trace,
                });
                finish_pass_no_diags(PassId::ElideCopies, elapsed, verbose, &mut on_pass_complete);
            }
            PassId::Verify => {
                let t = Instant::now();
                let cert = crate::verify::verify_elision(
                    &state.artifacts.elided.as_ref().unwrap().stmt,
                    &state.artifacts.resolved.as_ref().unwrap().env,
                    state.artifacts.external.as_ref().unwrap(),
                );
                let elapsed = t.elapsed();
                let mut diags = Vec::new();
                if !cert.all_pass() {
                    let failed: Vec<_> = cert
                        .obligations()
                        .iter()
                        .filter(|(_, ok)| !ok)
                        .map(|(name, _)| *name)
                        .collect();
                    diags.push(Diagnostic::error(
                        codes::E0301,
                        state.artifacts.program.span,
                        format!("copy elision verification failed: {}", failed.join(", ")),
                    ));
                }
                state.artifacts.cert = Some(cert);
                finish_pass(
                    state,
                    PassId::Verify,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}

// ── JSON report ────────────────────────────────────────────────────────────

/// Everything `--emit json` prints, in a stable shape.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub compiler_version: &'static str,
    pub source_hash: String,
    pub order: &'a [String],
    /// Externally required stages, sorted.
    pub external: Vec<&'a str>,
    pub pairs: &'a [CopyPair],
    pub trace: &'a [TraceEvent],
    pub lowered: String,
    pub elided: String,
    pub obligations: BTreeMap<&'static str, bool>,
}

/// Build the report from a state that ran through `PassId::Verify`.
///
/// Returns `None` if any required artifact is missing.
pub fn build_report(state: &CompilationState) -> Option<Report<'_>> {
    let a = &state.artifacts;
    let resolved = a.resolved.as_ref()?;
    let elided = a.elided.as_ref()?;
    let mut external: Vec<&str> = a.external.as_ref()?.iter().map(|s| s.as_str()).collect();
    external.sort_unstable();
    Some(Report {
        compiler_version: env!("CARGO_PKG_VERSION"),
        source_hash: state
            .provenance
            .as_ref()
            .map(|p| p.source_hash_hex())
            .unwrap_or_default(),
        order: &resolved.order,
        external,
        pairs: &elided.pairs,
        trace: &elided.trace,
        lowered: a.lowered.as_ref()?.to_string(),
        elided: elided.stmt.to_string(),
        obligations: a.cert.as_ref()?.obligations().into_iter().collect(),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state_for(source: &str) -> CompilationState {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let mut state = CompilationState::new(parsed.program.expect("parse failed"));
        state.provenance = Some(compute_provenance(source));
        state
    }

    const CHAIN: &str = "f(x) = x\ng(x) = f(x)\nh(x) = g(x) * 2\noutput h\n";

    #[test]
    fn runs_only_required_passes() {
        let mut state = state_for(CHAIN);
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::FindCopies, &PipelineOptions::default(), |p, _| {
            seen.push(p)
        })
        .expect("pipeline should succeed");
        assert_eq!(seen, vec![PassId::Resolve, PassId::FindCopies]);
        assert!(state.artifacts.lowered.is_none());
        assert_eq!(
            state.artifacts.scan.as_ref().unwrap().pairs,
            vec![CopyPair::new("f", "g")]
        );
    }

    #[test]
    fn full_run_elides_and_verifies() {
        let mut state = state_for(CHAIN);
        run_pipeline(&mut state, PassId::Verify, &PipelineOptions::default(), |_, _| {})
            .expect("pipeline should succeed");
        let elided = state.artifacts.elided.as_ref().unwrap().stmt.to_string();
        assert!(!elided.contains("realize g"));
        assert!(elided.contains("h(x) = (f(x) * 2)"));
        assert!(state.artifacts.cert.as_ref().unwrap().all_pass());
        assert!(!state.has_error);
    }

    #[test]
    fn no_elide_keeps_lowered_tree() {
        let mut state = state_for(CHAIN);
        let options = PipelineOptions {
            elide: false,
            ..PipelineOptions::default()
        };
        run_pipeline(&mut state, PassId::Verify, &options, |_, _| {}).expect("pipeline should succeed");
        let lowered = state.artifacts.lowered.as_ref().unwrap();
        assert!(state.artifacts.elided.as_ref().unwrap().stmt.same_as(lowered));
    }

    #[test]
    fn keep_protects_a_copy() {
        let mut state = state_for(CHAIN);
        let options = PipelineOptions {
            keep: vec!["g".to_string()],
            ..PipelineOptions::default()
        };
        run_pipeline(&mut state, PassId::Verify, &options, |_, _| {}).expect("pipeline should succeed");
        let elided = state.artifacts.elided.as_ref().unwrap();
        assert!(elided.stmt.to_string().contains("produce g {"));
        assert!(elided.trace.iter().any(|e| matches!(
            e,
            TraceEvent::ElisionSkipped { consumer, .. } if consumer == "g"
        )));
    }

    #[test]
    fn resolve_error_stops_the_pipeline() {
        let mut state = state_for("f(x) = nope(x)\noutput f\n");
        let err = run_pipeline(&mut state, PassId::Verify, &PipelineOptions::default(), |_, _| {})
            .unwrap_err();
        assert_eq!(err.failing_pass, PassId::Resolve);
        assert_eq!(err.to_string(), "resolve failed");
        assert!(state.has_error);
        assert!(state.artifacts.lowered.is_none());
        assert_eq!(state.diagnostics[0].code, Some(codes::E0102));
    }

    #[test]
    fn report_serializes() {
        let mut state = state_for(CHAIN);
        run_pipeline(&mut state, PassId::Verify, &PipelineOptions::default(), |_, _| {})
            .expect("pipeline should succeed");
        let report = build_report(&state).expect("report");
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&report).unwrap()).unwrap();
        assert_eq!(json["pairs"][0]["producer"], "f");
        assert_eq!(json["pairs"][0]["consumer"], "g");
        assert_eq!(json["external"][0], "h");
        assert_eq!(json["obligations"]["V1_no_use_before_production"], true);
        assert_eq!(json["source_hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn provenance_is_deterministic() {
        let a = compute_provenance(CHAIN);
        let b = compute_provenance(CHAIN);
        let c = compute_provenance("f(x) = x\n");
        assert_eq!(a.source_hash, b.source_hash);
        assert_ne!(a.source_hash, c.source_hash);
    }
}
