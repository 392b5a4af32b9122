//! Per-rule decision complexity scoring and grammar-wide aggregates.
//!
//! Counting is scoped to the rule body: the BFS visits only states owned by
//! the rule and never crosses a rule-call boundary, so a callee's internal
//! decisions never inflate its callers' scores. Graph-derived metrics
//! (depth, fan-in/out, recursiveness) come from [`RuleGraph`].

use super::graph::RuleGraph;
use crate::{Grammar, RuleId, RuleKind, StateKind};
use std::collections::{HashSet, VecDeque};

/// Structural metrics for a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RuleMetrics {
    /// Decision states inside this rule's body.
    pub decision_points: usize,
    /// Top-level alternatives of the rule.
    pub alternative_count: usize,
    /// Longest acyclic call path from a root rule down to this one.
    pub depth: usize,
    pub fan_in: usize,
    pub fan_out: usize,
    /// Participates in a dependency cycle (self- or mutually recursive).
    pub recursive: bool,
}

/// Reductions over all per-rule results.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Aggregate {
    pub parser_rules: usize,
    pub lexer_rules: usize,
    pub fragment_rules: usize,
    pub total_decision_points: usize,
    /// Mean top-level alternative count across parser rules.
    pub average_alternatives: f64,
    pub max_depth: usize,
}

/// Bounded BFS over the states owned by `rule`.
pub fn analyze_rule(grammar: &Grammar, graph: &RuleGraph, rule: RuleId) -> RuleMetrics {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut queue = VecDeque::from([grammar.rule(rule).start_state]);
    let mut decision_points = 0usize;

    while let Some(sid) = queue.pop_front() {
        if !visited.insert(sid) {
            continue;
        }
        let state = grammar.state(sid);
        if matches!(state.kind, StateKind::Decision(_)) && state.transitions.len() >= 2 {
            decision_points += 1;
        }
        for tr in &state.transitions {
            // Call boundaries are not crossed: the continuation target is
            // owned by this rule, the callee's start state is not.
            if grammar.state(tr.target).rule == rule {
                queue.push_back(tr.target);
            }
        }
    }

    RuleMetrics {
        decision_points,
        alternative_count: grammar.rule(rule).alternative_count,
        depth: graph.depth(rule),
        fan_in: graph.fan_in(rule),
        fan_out: graph.fan_out(rule),
        recursive: graph.is_recursive(rule),
    }
}

/// Grammar-wide reductions over every rule's metrics.
pub fn aggregate(grammar: &Grammar, per_rule: &[(RuleId, RuleMetrics)]) -> Aggregate {
    let parser_rules = grammar.count_by_kind(RuleKind::Parser);
    let parser_alt_sum: usize = per_rule
        .iter()
        .filter(|(id, _)| grammar.rule(*id).kind == RuleKind::Parser)
        .map(|(_, m)| m.alternative_count)
        .sum();

    Aggregate {
        parser_rules,
        lexer_rules: grammar.count_by_kind(RuleKind::Lexer),
        fragment_rules: grammar.count_by_kind(RuleKind::Fragment),
        total_decision_points: per_rule.iter().map(|(_, m)| m.decision_points).sum(),
        average_alternatives: if parser_rules == 0 { 0.0 } else { parser_alt_sum as f64 / parser_rules as f64 },
        max_depth: per_rule.iter().map(|(_, m)| m.depth).max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;

    #[test]
    fn callee_decisions_do_not_leak_into_callers() {
        let g = grammars::arithmetic();
        let graph = RuleGraph::build(&g);
        let expr = g.rule_named("expr").unwrap();
        let term = g.rule_named("term").unwrap();

        // expr: term (('+'|'-') term)* owns exactly the loop decision.
        let m_expr = analyze_rule(&g, &graph, expr);
        assert_eq!(m_expr.decision_points, 1);

        // term's own decision is counted on term, not on expr.
        let m_term = analyze_rule(&g, &graph, term);
        assert!(m_term.decision_points >= 1);
    }

    #[test]
    fn self_recursion_flags_recursive() {
        let g = grammars::dangling_else();
        let graph = RuleGraph::build(&g);
        let stat = g.rule_named("stat").unwrap();
        assert!(analyze_rule(&g, &graph, stat).recursive);
    }

    #[test]
    fn aggregate_counts_rules_by_kind() {
        let g = grammars::arithmetic();
        let graph = RuleGraph::build(&g);
        let per_rule: Vec<_> = (0..g.rules().len()).map(|r| (r, analyze_rule(&g, &graph, r))).collect();
        let agg = aggregate(&g, &per_rule);

        assert_eq!(agg.parser_rules + agg.lexer_rules + agg.fragment_rules, g.rules().len());
        assert!(agg.total_decision_points >= 2);
        assert!(agg.average_alternatives >= 1.0);
    }
}
