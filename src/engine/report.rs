//! Decision subgraph extraction for visualization.
//!
//! Renders the local automaton neighborhood of a decision as a node/edge
//! list small enough to read: breadth-first from the decision state, capped
//! at [`MAX_SUBGRAPH_STATES`] states, with human-readable transition labels.

use crate::{AnalysisError, DecisionId, Grammar, RuleId, StateId, StateKind, TransitionKind};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

/// Upper bound on states per extracted subgraph; past this the rendering
/// stops being readable and the subgraph is truncated instead.
pub const MAX_SUBGRAPH_STATES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgraphNode {
    pub state: StateId,
    pub rule: RuleId,
    /// `"basic"`, `"decision"`, `"rule-start"` or `"rule-stop"`.
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgraphEdge {
    pub from: StateId,
    pub to: StateId,
    pub label: String,
}

/// The local neighborhood of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionSubgraph {
    pub decision: DecisionId,
    pub rule: RuleId,
    pub rule_name: String,
    pub alternative_count: usize,
    /// Breadth-first from the decision state.
    pub nodes: Vec<SubgraphNode>,
    pub edges: Vec<SubgraphEdge>,
    /// True when the cap cut off part of the neighborhood.
    pub truncated: bool,
}

pub fn decision_subgraph(grammar: &Grammar, decision: DecisionId) -> Result<DecisionSubgraph, AnalysisError> {
    let root = grammar
        .decision_state(decision)
        .ok_or_else(|| AnalysisError::Internal { detail: format!("decision {decision} out of range") })?;

    let mut order: Vec<StateId> = Vec::new();
    let mut seen: BTreeSet<StateId> = BTreeSet::new();
    let mut queue: VecDeque<StateId> = VecDeque::new();
    let mut truncated = false;

    seen.insert(root.id);
    queue.push_back(root.id);
    while let Some(sid) = queue.pop_front() {
        order.push(sid);
        for tr in &grammar.state(sid).transitions {
            if seen.contains(&tr.target) {
                continue;
            }
            if seen.len() >= MAX_SUBGRAPH_STATES {
                truncated = true;
                continue;
            }
            seen.insert(tr.target);
            queue.push_back(tr.target);
        }
    }

    let nodes = order
        .iter()
        .map(|&sid| {
            let state = grammar.state(sid);
            SubgraphNode { state: sid, rule: state.rule, kind: kind_label(state.kind).to_string() }
        })
        .collect();

    let mut edges = Vec::new();
    for &sid in &order {
        for tr in &grammar.state(sid).transitions {
            if seen.contains(&tr.target) {
                edges.push(SubgraphEdge { from: sid, to: tr.target, label: edge_label(grammar, &tr.kind) });
            }
        }
    }

    Ok(DecisionSubgraph {
        decision,
        rule: root.rule,
        rule_name: grammar.rule(root.rule).name.clone(),
        alternative_count: root.transitions.len(),
        nodes,
        edges,
        truncated,
    })
}

fn kind_label(kind: StateKind) -> &'static str {
    match kind {
        StateKind::Basic => "basic",
        StateKind::Decision(_) => "decision",
        StateKind::RuleStart => "rule-start",
        StateKind::RuleStop => "rule-stop",
    }
}

fn edge_label(grammar: &Grammar, kind: &TransitionKind) -> String {
    match kind {
        TransitionKind::Epsilon => "ε".to_string(),
        TransitionKind::Terminal(ts) => {
            grammar.token_set(*ts).iter().map(|&t| grammar.token_name(t)).collect::<Vec<_>>().join("|")
        }
        TransitionKind::RuleCall { rule } => format!("call {}", grammar.rule(*rule).name),
        TransitionKind::Predicate { precedence: Some(level) } => format!("prec {level}"),
        TransitionKind::Predicate { precedence: None } => "pred".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;

    #[test]
    fn loop_decision_subgraph_shows_both_alternatives() {
        let g = grammars::arithmetic();
        let expr = g.require_rule("expr").unwrap();
        let decision = g.decision_points().into_iter().find(|dp| dp.rule == expr).unwrap();

        let sub = decision_subgraph(&g, decision.decision).unwrap();
        assert_eq!(sub.rule_name, "expr");
        assert_eq!(sub.alternative_count, 2);
        assert!(!sub.truncated);

        // First node is the decision itself; its two outgoing edges carry
        // the operator set and the ε exit.
        assert_eq!(sub.nodes[0].kind, "decision");
        let labels: Vec<&str> =
            sub.edges.iter().filter(|e| e.from == sub.nodes[0].state).map(|e| e.label.as_str()).collect();
        assert!(labels.contains(&"PLUS|MINUS"));
        assert!(labels.contains(&"ε"));
        // The loop body calls term and resumes at the decision.
        assert!(sub.edges.iter().any(|e| e.label == "call term" && e.to == sub.nodes[0].state));
    }

    #[test]
    fn oversized_neighborhood_is_truncated() {
        use crate::GrammarBuilder;
        let mut b = GrammarBuilder::new();
        let tok = b.token("A");
        let r = b.parser_rule("wide");
        let d = b.decision(r);
        b.epsilon(b.start_state(r), d);
        // A long chain well past the cap.
        let mut prev = d;
        for _ in 0..2 * MAX_SUBGRAPH_STATES {
            let next = b.state(r);
            b.terminal(prev, &[tok], next);
            prev = next;
        }
        b.terminal(prev, &[tok], b.stop_state(r));
        b.epsilon(d, b.stop_state(r));
        let g = b.build().unwrap();

        let sub = decision_subgraph(&g, 0).unwrap();
        assert!(sub.truncated);
        assert_eq!(sub.nodes.len(), MAX_SUBGRAPH_STATES);
        assert!(sub.edges.iter().all(|e| sub.nodes.iter().any(|n| n.state == e.to)));
    }

    #[test]
    fn invalid_decision_id_is_an_internal_error() {
        let g = grammars::arithmetic();
        assert!(matches!(decision_subgraph(&g, 99), Err(AnalysisError::Internal { .. })));
    }
}
