//! Sequence exploration
//!
//! Read-only drill-down: raw events of a range, each annotated with the
//! transition that led into it. Reversal flags come from the graphs the
//! events were scored in, so the annotation agrees with the report.

use std::collections::HashMap;

use crate::config::ReversalRule;
use crate::graph::TransitionGraphBuilder;
use crate::types::{ActionEvent, AnnotatedEvent, TransitionAnnotation, TransitionGraph};

/// Reversal flag of each transition, keyed by the sequence number of the
/// event it leads into
pub type ReversalFlags = HashMap<u64, bool>;

/// Annotator for raw event sequences
pub struct SequenceExplorer;

impl SequenceExplorer {
    /// Collect the per-transition reversal flags of scored graphs
    pub fn reversal_flags<'a>(graphs: impl IntoIterator<Item = &'a TransitionGraph>) -> ReversalFlags {
        graphs
            .into_iter()
            .flat_map(|graph| graph.steps.iter())
            .map(|step| (step.to_sequence_no, step.reversal))
            .collect()
    }

    /// Order `events` and annotate each with its incoming transition, with
    /// reversal flags evaluated over the given events only.
    pub fn annotate(events: &[ActionEvent], rules: &[ReversalRule]) -> Vec<AnnotatedEvent> {
        let graph = TransitionGraphBuilder::build(events, rules);
        Self::annotate_with_flags(events, &Self::reversal_flags([&graph]))
    }

    /// Order `events` and annotate each with its incoming transition.
    ///
    /// The first event has no incoming transition. An event whose transition
    /// was not scored (it opens a period) is never flagged as a reversal.
    pub fn annotate_with_flags(events: &[ActionEvent], flags: &ReversalFlags) -> Vec<AnnotatedEvent> {
        let ordered = TransitionGraphBuilder::ordered(events);

        let mut annotated = Vec::with_capacity(ordered.len());
        let mut previous = None;
        for event in ordered {
            let incoming = previous.map(|from| TransitionAnnotation {
                from,
                reversal: flags.get(&event.sequence_no).copied().unwrap_or(false),
            });
            previous = Some(event.action_type);
            annotated.push(AnnotatedEvent { event, incoming });
        }
        annotated
    }
}
