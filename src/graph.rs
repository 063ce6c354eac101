//! Transition graph construction
//!
//! Turns one user's ordered event sequence into a directed multigraph of
//! `action -> action` transitions. Every consecutive pair of events is one
//! transition; each transition is checked against the reversal rules.

use std::collections::BTreeMap;

use crate::config::ReversalRule;
use crate::types::{ActionEvent, ActionType, TransitionEdge, TransitionGraph, TransitionStep};

/// Builder for transition graphs
pub struct TransitionGraphBuilder;

impl TransitionGraphBuilder {
    /// Events sorted into their total order `(timestamp, sequence_no)`
    pub fn ordered(events: &[ActionEvent]) -> Vec<ActionEvent> {
        let mut ordered = events.to_vec();
        ordered.sort_by_key(|e| e.order_key());
        ordered
    }

    /// Build the transition graph for a sequence of events.
    ///
    /// Input order does not matter; the events are sorted first. Zero or one
    /// event yields an empty graph with `total_transitions == 0`.
    pub fn build(events: &[ActionEvent], rules: &[ReversalRule]) -> TransitionGraph {
        let ordered = Self::ordered(events);

        let mut distinct = ActionSet::default();
        for event in &ordered {
            distinct.insert(event.action_type);
        }

        let steps = compute_steps(&ordered, rules);

        let mut edges: BTreeMap<(ActionType, ActionType), TransitionEdge> = BTreeMap::new();
        for step in &steps {
            let edge = edges
                .entry((step.from, step.to))
                .or_insert_with(|| TransitionEdge {
                    from: step.from,
                    to: step.to,
                    count: 0,
                    reversal_count: 0,
                    first_at: step.at,
                    last_at: step.at,
                });
            edge.count += 1;
            if step.reversal {
                edge.reversal_count += 1;
            }
            edge.first_at = edge.first_at.min(step.at);
            edge.last_at = edge.last_at.max(step.at);
        }

        TransitionGraph {
            edges: edges.into_values().collect(),
            total_transitions: steps.len() as u32,
            steps,
            distinct_actions: distinct.to_vec(),
            event_count: ordered.len() as u32,
            last_event_at: ordered.last().map(|e| e.timestamp),
        }
    }
}

/// Transitions of an already ordered sequence
fn compute_steps(ordered: &[ActionEvent], rules: &[ReversalRule]) -> Vec<TransitionStep> {
    if ordered.len() < 2 {
        return Vec::new();
    }

    // later[i] holds every action occurring at index >= i
    let mut later = vec![ActionSet::default(); ordered.len() + 1];
    for i in (0..ordered.len()).rev() {
        let mut set = later[i + 1];
        set.insert(ordered[i].action_type);
        later[i] = set;
    }

    ordered
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (prev, next) = (&pair[0], &pair[1]);
            TransitionStep {
                from: prev.action_type,
                to: next.action_type,
                at: next.timestamp,
                from_sequence_no: prev.sequence_no,
                to_sequence_no: next.sequence_no,
                // Followups are looked for strictly after the `to` event
                reversal: is_reversal(prev.action_type, next.action_type, later[i + 2], rules),
            }
        })
        .collect()
}

fn is_reversal(from: ActionType, to: ActionType, later: ActionSet, rules: &[ReversalRule]) -> bool {
    rules.iter().any(|rule| {
        rule.from == from
            && rule.to == to
            && rule.requires_followup.map_or(true, |followup| later.contains(followup))
    })
}

/// Small bitset over the closed action enum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ActionSet(u16);

impl ActionSet {
    fn insert(&mut self, action: ActionType) {
        self.0 |= 1 << action as u16;
    }

    fn contains(&self, action: ActionType) -> bool {
        self.0 & (1 << action as u16) != 0
    }

    fn to_vec(self) -> Vec<ActionType> {
        ActionType::ALL
            .into_iter()
            .filter(|a| self.contains(*a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_reversal_rules;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn make_events(actions: &[ActionType]) -> Vec<ActionEvent> {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        actions
            .iter()
            .enumerate()
            .map(|(i, action)| ActionEvent {
                user_id: "user-1".to_string(),
                action_type: *action,
                timestamp: base + Duration::minutes(i as i64 * 10),
                sequence_no: i as u64 + 1,
            })
            .collect()
    }

    #[test]
    fn test_empty_and_single_event() {
        let rules = default_reversal_rules();

        let empty = TransitionGraphBuilder::build(&[], &rules);
        assert_eq!(empty.total_transitions, 0);
        assert!(empty.is_insufficient());
        assert!(empty.last_event_at.is_none());

        let single = TransitionGraphBuilder::build(&make_events(&[ActionType::Login]), &rules);
        assert_eq!(single.total_transitions, 0);
        assert_eq!(single.event_count, 1);
        assert_eq!(single.distinct_actions, vec![ActionType::Login]);
        assert!(single.edges.is_empty());
    }

    #[test]
    fn test_counts_sum_to_event_count_minus_one() {
        use ActionType::*;
        let events = make_events(&[Login, Browse, Browse, AddToCart, Browse, Browse, Purchase]);
        let graph = TransitionGraphBuilder::build(&events, &default_reversal_rules());

        assert_eq!(graph.total_transitions, 6);
        assert_eq!(graph.edges.iter().map(|e| e.count).sum::<u32>(), 6);
        assert_eq!(graph.edge(Browse, Browse).unwrap().count, 2);
        assert_eq!(graph.distinct_actions, vec![Login, Browse, AddToCart, Purchase]);

        let bb = graph.edge(Browse, Browse).unwrap();
        assert!(bb.first_at < bb.last_at);
    }

    #[test]
    fn test_sorts_defensively_with_sequence_tiebreak() {
        use ActionType::*;
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let event = |action, seq| ActionEvent {
            user_id: "user-1".to_string(),
            action_type: action,
            timestamp: at,
            sequence_no: seq,
        };
        // Same timestamp, supplied out of order
        let events = vec![event(Cancel, 2), event(Purchase, 1)];
        let graph = TransitionGraphBuilder::build(&events, &default_reversal_rules());

        assert_eq!(graph.steps.len(), 1);
        assert_eq!(graph.steps[0].from, Purchase);
        assert_eq!(graph.steps[0].to, Cancel);
        assert!(graph.steps[0].reversal);
    }

    #[test]
    fn test_cart_churn_is_all_reversals() {
        use ActionType::*;
        let events = make_events(&[AddToCart, RemoveFromCart, AddToCart, RemoveFromCart]);
        let graph = TransitionGraphBuilder::build(&events, &default_reversal_rules());

        assert_eq!(graph.total_transitions, 3);
        assert_eq!(graph.reversal_count(), 3);
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_followup_rule_requires_later_event() {
        use ActionType::*;
        let rules = default_reversal_rules();

        let without = TransitionGraphBuilder::build(&make_events(&[Login, Logout]), &rules);
        assert_eq!(without.reversal_count(), 0);

        let with = TransitionGraphBuilder::build(&make_events(&[Login, Logout, Browse, Login]), &rules);
        assert_eq!(with.reversal_count(), 1);
        assert!(with.steps[0].reversal);
        assert!(!with.steps[2].reversal);
    }

    #[test]
    fn test_rules_are_configuration() {
        use ActionType::*;
        let events = make_events(&[Purchase, Cancel]);

        let graph = TransitionGraphBuilder::build(&events, &[]);
        assert_eq!(graph.reversal_count(), 0);

        let rules = vec![ReversalRule::new(Browse, Logout)];
        let graph = TransitionGraphBuilder::build(&make_events(&[Browse, Logout]), &rules);
        assert_eq!(graph.reversal_count(), 1);
    }
}
