//! Left-recursion detection.
//!
//! Three related diagnostics:
//!
//! - **Direct**: from the rule's start state, following epsilon transitions
//!   only, the first non-epsilon transition on some branch is a `RuleCall`
//!   back to the same rule.
//! - **Transformed**: the grammar compiler already rewrote the rule into
//!   precedence-climbing form; detected by the precedence-guard predicates
//!   it leaves in the rule body. The guard levels are reported sorted
//!   ascending, deduplicated.
//! - **Indirect**: a dependency cycle of size > 1. By default the cycle is
//!   verified against the leftmost-call edge subset: the recursive call must
//!   occur in leftmost position all the way around the cycle. The analyzed
//!   legacy system reported *any* dependency cycle here; that approximation
//!   is available via [`Options::legacy_cycle_left_recursion`].
//!
//! [`Options::legacy_cycle_left_recursion`]: crate::Options

use super::graph::RuleGraph;
use crate::{Grammar, RuleId, TransitionKind};
use std::collections::{BTreeSet, HashSet};

/// Per-rule left-recursion findings.
#[derive(Debug, Clone)]
pub struct LeftRecursion {
    pub direct: bool,
    pub transformed: bool,
    /// Precedence-guard levels found in the rule body, ascending, deduplicated.
    pub precedence_levels: Vec<u32>,
    /// Cycles of size > 1 this rule participates in that qualify as indirect
    /// left recursion (under the selected verification mode).
    pub indirect_cycles: Vec<BTreeSet<RuleId>>,
}

/// Follow only epsilon transitions from the rule's start state; a `RuleCall`
/// back to the same rule at the epsilon frontier makes the rule directly
/// left-recursive. A `Terminal` at the frontier settles that branch as not
/// left-recursive.
pub fn is_directly_left_recursive(grammar: &Grammar, rule: RuleId) -> bool {
    let mut visited: HashSet<usize> = HashSet::new();
    let mut stack = vec![grammar.rule(rule).start_state];

    while let Some(sid) = stack.pop() {
        if !visited.insert(sid) {
            continue;
        }
        for tr in &grammar.state(sid).transitions {
            match tr.kind {
                TransitionKind::Epsilon => stack.push(tr.target),
                TransitionKind::RuleCall { rule: callee } if callee == rule => return true,
                _ => {}
            }
        }
    }
    false
}

/// Whether the rule carries precedence-climbing guards, and at which levels.
pub fn precedence_levels(grammar: &Grammar, rule: RuleId) -> Vec<u32> {
    let mut levels: Vec<u32> = grammar
        .states_of(rule)
        .flat_map(|s| s.transitions.iter())
        .filter_map(|tr| match tr.kind {
            TransitionKind::Predicate { precedence } => precedence,
            _ => None,
        })
        .collect();
    levels.sort_unstable();
    levels.dedup();
    levels
}

pub fn is_transformed(grammar: &Grammar, rule: RuleId) -> bool {
    !precedence_levels(grammar, rule).is_empty()
}

/// Full left-recursion analysis for one rule.
///
/// `legacy_cycle_check` selects the analyzed system's approximation (any
/// dependency cycle of size > 1 counts as indirect left recursion) instead of
/// the default leftmost-position verification.
pub fn analyze(grammar: &Grammar, graph: &RuleGraph, rule: RuleId, legacy_cycle_check: bool) -> LeftRecursion {
    let levels = precedence_levels(grammar, rule);
    let indirect_cycles = graph
        .cycles()
        .iter()
        .filter(|cycle| cycle.len() > 1 && cycle.contains(&rule))
        .filter(|cycle| legacy_cycle_check || cycle_is_leftmost(graph, cycle))
        .cloned()
        .collect();

    LeftRecursion {
        direct: is_directly_left_recursive(grammar, rule),
        transformed: !levels.is_empty(),
        precedence_levels: levels,
        indirect_cycles,
    }
}

/// A cycle qualifies as indirect *left* recursion only when its members stay
/// mutually reachable through leftmost calls alone: recursion that passes
/// through a non-leftmost position consumes input before re-entering and is
/// plain (bounded) recursion, not left recursion.
fn cycle_is_leftmost(graph: &RuleGraph, cycle: &BTreeSet<RuleId>) -> bool {
    let leftmost = graph.leftmost_edges();
    cycle.iter().all(|&from| {
        // Every member must reach every other member inside the cycle using
        // leftmost edges only.
        let mut seen: BTreeSet<RuleId> = BTreeSet::new();
        let mut stack: Vec<RuleId> = leftmost
            .iter()
            .filter(|&&(f, t)| f == from && cycle.contains(&t))
            .map(|&(_, t)| t)
            .collect();
        while let Some(r) = stack.pop() {
            if !seen.insert(r) {
                continue;
            }
            stack.extend(
                leftmost.iter().filter(|&&(f, t)| f == r && cycle.contains(&t)).map(|&(_, t)| t),
            );
        }
        cycle.iter().all(|m| seen.contains(m))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Grammar, GrammarBuilder};

    /// `expr: expr '+' term | term;  term: NUMBER;`
    fn direct_lr_grammar() -> Grammar {
        let mut b = GrammarBuilder::new();
        let plus = b.token("PLUS");
        let number = b.token("NUMBER");
        let expr = b.parser_rule("expr");
        let term = b.parser_rule("term");
        b.entry_point(expr);

        let (e0, e1) = (b.start_state(expr), b.stop_state(expr));
        let d = b.decision(expr);
        b.epsilon(e0, d);
        // Alt 1: expr '+' term
        let after_expr = b.state(expr);
        let after_plus = b.state(expr);
        b.rule_call(d, expr, after_expr);
        b.terminal(after_expr, &[plus], after_plus);
        b.rule_call(after_plus, term, e1);
        // Alt 2: term
        b.rule_call(d, term, e1);

        let (t0, t1) = (b.start_state(term), b.stop_state(term));
        b.terminal(t0, &[number], t1);

        b.build().unwrap()
    }

    #[test]
    fn expr_is_directly_left_recursive_term_is_not() {
        let g = direct_lr_grammar();
        assert!(is_directly_left_recursive(&g, g.rule_named("expr").unwrap()));
        assert!(!is_directly_left_recursive(&g, g.rule_named("term").unwrap()));
    }

    #[test]
    fn precedence_guards_mark_transformed_rules() {
        let mut b = GrammarBuilder::new();
        let number = b.token("NUMBER");
        let expr = b.parser_rule("expr");
        b.entry_point(expr);
        let (e0, e1) = (b.start_state(expr), b.stop_state(expr));
        let mid_a = b.state(expr);
        let mid_b = b.state(expr);
        b.predicate(e0, Some(2), mid_a);
        b.predicate(e0, Some(1), mid_b);
        // A duplicated level collapses in the report.
        b.predicate(mid_a, Some(2), e1);
        b.terminal(mid_b, &[number], e1);
        let g = b.build().unwrap();

        assert!(is_transformed(&g, expr));
        assert_eq!(precedence_levels(&g, expr), vec![1, 2]);
    }

    #[test]
    fn non_leftmost_cycle_is_not_indirect_left_recursion() {
        // a: b; b: KW a;  the cycle re-enters `a` only after consuming KW.
        let mut b = GrammarBuilder::new();
        let kw = b.token("KW");
        let ra = b.parser_rule("a");
        let rb = b.parser_rule("b");
        b.entry_point(ra);
        let (a0, a1) = (b.start_state(ra), b.stop_state(ra));
        b.rule_call(a0, rb, a1);
        let (b0, b1) = (b.start_state(rb), b.stop_state(rb));
        let mid = b.state(rb);
        b.terminal(b0, &[kw], mid);
        b.rule_call(mid, ra, b1);
        let g = b.build().unwrap();
        let graph = RuleGraph::build(&g);

        let strict = analyze(&g, &graph, ra, false);
        assert!(strict.indirect_cycles.is_empty());

        // The legacy approximation still reports the dependency cycle.
        let legacy = analyze(&g, &graph, ra, true);
        assert_eq!(legacy.indirect_cycles.len(), 1);
    }

    #[test]
    fn leftmost_cycle_is_indirect_left_recursion() {
        // a: b; b: a KW;
        let mut b = GrammarBuilder::new();
        let kw = b.token("KW");
        let ra = b.parser_rule("a");
        let rb = b.parser_rule("b");
        b.entry_point(ra);
        let (a0, a1) = (b.start_state(ra), b.stop_state(ra));
        b.rule_call(a0, rb, a1);
        let (b0, b1) = (b.start_state(rb), b.stop_state(rb));
        let mid = b.state(rb);
        b.rule_call(b0, ra, mid);
        b.terminal(mid, &[kw], b1);
        let g = b.build().unwrap();
        let graph = RuleGraph::build(&g);

        let strict = analyze(&g, &graph, ra, false);
        assert_eq!(strict.indirect_cycles.len(), 1);
        assert!(strict.indirect_cycles[0].contains(&rb));
    }
}
