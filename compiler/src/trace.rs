// trace.rs — Structured trace events emitted by copy elision
//
// The pass never logs. It returns these events so the driver can print them
// behind `--verbose` and `--emit json` can serialize them. Events never
// influence the result of the pass.

use std::fmt;

use serde::Serialize;

/// Why a registered copy pair did not (fully) elide its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The consumer's buffer is bound outside the region; it stays as an alias.
    ExternallyRequired,
    /// No allocation scope for the consumer exists in the tree.
    NoScope,
    /// Consumer and producer no longer agree on dimensions or tuple width.
    ShapeMismatch,
    /// The pair resolves to a stage forwarding to itself.
    SelfAlias,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::ExternallyRequired => "buffer is externally required, deferred",
            SkipReason::NoScope => "no realize scope found",
            SkipReason::ShapeMismatch => "shape mismatch",
            SkipReason::SelfAlias => "resolves to itself",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    // ── Detection ──
    UnknownStage {
        stage: String,
    },
    UpdateDefinition {
        stage: String,
    },
    ExternDefinition {
        stage: String,
    },
    MultipleProducers {
        stage: String,
        first: String,
        second: String,
    },
    DimensionMismatch {
        stage: String,
        producer: String,
        stage_dims: usize,
        producer_dims: usize,
    },
    SlotCountMismatch {
        stage: String,
        producer: String,
        stage_slots: usize,
        producer_slots: usize,
    },
    SlotIndexMismatch {
        stage: String,
        producer: String,
        slot: usize,
        value_index: usize,
    },
    ArgumentMismatch {
        stage: String,
        producer: String,
        slot: usize,
        dim: usize,
        expected: String,
        found: String,
    },
    PartialTuple {
        stage: String,
        slot: usize,
    },
    CopyFound {
        stage: String,
        producer: String,
        definition: String,
    },

    // ── Elision ──
    Elided {
        consumer: String,
        producer: String,
        redirected: usize,
    },
    PartialElision {
        consumer: String,
        producer: String,
        redirected: usize,
        skipped: usize,
    },
    ElisionSkipped {
        consumer: String,
        producer: String,
        reason: SkipReason,
    },
}

impl TraceEvent {
    /// True for events that explain why a stage is not a pointwise copy.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TraceEvent::UnknownStage { .. }
                | TraceEvent::UpdateDefinition { .. }
                | TraceEvent::ExternDefinition { .. }
                | TraceEvent::MultipleProducers { .. }
                | TraceEvent::DimensionMismatch { .. }
                | TraceEvent::SlotCountMismatch { .. }
                | TraceEvent::SlotIndexMismatch { .. }
                | TraceEvent::ArgumentMismatch { .. }
                | TraceEvent::PartialTuple { .. }
        )
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::UnknownStage { stage } => {
                write!(f, "stage \"{}\" is not in the environment", stage)
            }
            TraceEvent::UpdateDefinition { stage } => {
                write!(f, "stage \"{}\" has an update definition", stage)
            }
            TraceEvent::ExternDefinition { stage } => {
                write!(f, "stage \"{}\" has an extern definition", stage)
            }
            TraceEvent::MultipleProducers {
                stage,
                first,
                second,
            } => write!(
                f,
                "stage \"{}\" calls multiple stages: \"{}\" and \"{}\"",
                stage, second, first
            ),
            TraceEvent::DimensionMismatch {
                stage,
                producer,
                stage_dims,
                producer_dims,
            } => write!(
                f,
                "stage \"{}\" ({}-D) does not read \"{}\" ({}-D) pointwise",
                stage, stage_dims, producer, producer_dims
            ),
            TraceEvent::SlotCountMismatch {
                stage,
                producer,
                stage_slots,
                producer_slots,
            } => write!(
                f,
                "stage \"{}\" has {} value(s) but \"{}\" has {}; not a whole-tuple copy",
                stage, stage_slots, producer, producer_slots
            ),
            TraceEvent::SlotIndexMismatch {
                stage,
                producer,
                slot,
                value_index,
            } => write!(
                f,
                "stage \"{}\" reads {}[{}] at value index {}",
                stage, producer, value_index, slot
            ),
            TraceEvent::ArgumentMismatch {
                stage,
                producer,
                slot,
                dim,
                expected,
                found,
            } => write!(
                f,
                "at arg {} of value {}, {} passes {} to {} where {} was expected",
                dim, slot, stage, found, producer, expected
            ),
            TraceEvent::PartialTuple { stage, slot } => write!(
                f,
                "stage \"{}\" mixes forwarded and computed values (value {}); not a simple copy",
                stage, slot
            ),
            TraceEvent::CopyFound { definition, .. } => {
                write!(f, "found pointwise copy -> {}", definition)
            }
            TraceEvent::Elided {
                consumer,
                producer,
                redirected,
            } => write!(
                f,
                "elided \"{}\": {} reference(s) now read \"{}\"",
                consumer, redirected, producer
            ),
            TraceEvent::PartialElision {
                consumer,
                producer,
                redirected,
                skipped,
            } => write!(
                f,
                "kept \"{}\": {} reference(s) redirected to \"{}\", {} outside its live scope",
                consumer, redirected, producer, skipped
            ),
            TraceEvent::ElisionSkipped {
                consumer,
                producer,
                reason,
            } => write!(
                f,
                "skipped \"{}\" (copy of \"{}\"): {}",
                consumer, producer, reason
            ),
        }
    }
}
