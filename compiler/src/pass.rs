// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded, it runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Lower,
    FindCopies,
    ElideCopies,
    Verify,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Resolved, // ResolvedProgram
    Lowered,  // Stmt
    Pairs,    // CopyScan
    Elided,   // Stmt + TraceEvents
    Cert,     // ElisionCert
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Resolved],
            invariants: "all names bound, order topological, outputs known",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Lowered],
            invariants: "one produce scope per stage, consumers inside producers",
        },
        PassId::FindCopies => PassDescriptor {
            name: "find_copies",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Pairs],
            invariants: "pairs listed in consumer execution order",
        },
        PassId::ElideCopies => PassDescriptor {
            name: "elide_copies",
            inputs: &[PassId::Lower, PassId::FindCopies],
            outputs: &[ArtifactId::Elided],
            invariants: "external stages keep their scopes, unchanged subtrees shared",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::ElideCopies],
            outputs: &[ArtifactId::Cert],
            invariants: "V1-V3 obligations hold on the rewritten tree",
        },
    }
}

// ── Certificates ───────────────────────────────────────────────────────────

/// Evidence produced by a verifying pass: a named list of obligations.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;

    /// `(name, holds)` for each obligation, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Resolve,
    PassId::Lower,
    PassId::FindCopies,
    PassId::ElideCopies,
    PassId::Verify,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
