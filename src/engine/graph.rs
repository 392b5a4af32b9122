//! Rule dependency graph: edges, cycles, unused rules, depth, fan-in/out.
//!
//! The graph is *derived*: nothing here is stored on the rule table. Each
//! `RuleCall` transition on a state owned by rule `A` targeting rule `B`
//! contributes one edge `A → B`. A second, narrower edge set, the
//! *leftmost-call* subset, keeps only calls reachable from a rule's start
//! state through epsilon transitions alone; the left-recursion detector uses
//! it to verify that a dependency cycle actually recurses in leftmost
//! position.
//!
//! All traversals run with explicit stacks and visited guards so they
//! terminate on arbitrarily cyclic inputs (self-recursive and
//! mutually-recursive rules) without unbounded growth.

use crate::{Grammar, RuleId, TransitionKind};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Derived rule dependency graph and the diagnostics computed from it.
#[derive(Debug, Clone)]
pub struct RuleGraph {
    /// Caller → callee edges, deduplicated.
    edges: BTreeSet<(RuleId, RuleId)>,
    /// Edge subset where the call is reachable from the caller's start state
    /// via epsilon transitions only (leftmost position).
    leftmost_edges: BTreeSet<(RuleId, RuleId)>,
    /// Dependency cycles, each reported once regardless of entry rule
    /// (order-insensitive set equality).
    cycles: Vec<BTreeSet<RuleId>>,
    /// Rules with zero in-degree that are not designated entry points.
    unused: Vec<RuleId>,
    fan_in: Vec<usize>,
    fan_out: Vec<usize>,
    /// Longest acyclic call path from any zero-in-degree rule, bounded by
    /// the rule count for rules inside cycles.
    depth: Vec<usize>,
}

impl RuleGraph {
    pub fn build(grammar: &Grammar) -> Self {
        let n = grammar.rules().len();
        let mut edges: BTreeSet<(RuleId, RuleId)> = BTreeSet::new();

        for state in grammar.states() {
            for tr in &state.transitions {
                if let TransitionKind::RuleCall { rule: callee } = tr.kind {
                    edges.insert((state.rule, callee));
                }
            }
        }

        let leftmost_edges = leftmost_call_edges(grammar);

        let mut fan_in = vec![0usize; n];
        let mut fan_out = vec![0usize; n];
        for &(caller, callee) in &edges {
            fan_out[caller] += 1;
            fan_in[callee] += 1;
        }

        let cycles = find_cycles(n, &edges);

        let unused: Vec<RuleId> =
            (0..n).filter(|&r| fan_in[r] == 0 && !grammar.is_entry_point(r)).collect();

        let depth = compute_depths(n, &edges, &fan_in);

        debug!(rules = n, edges = edges.len(), cycles = cycles.len(), unused = unused.len(), "rule graph built");
        RuleGraph { edges, leftmost_edges, cycles, unused, fan_in, fan_out, depth }
    }

    pub fn edges(&self) -> &BTreeSet<(RuleId, RuleId)> {
        &self.edges
    }

    pub fn leftmost_edges(&self) -> &BTreeSet<(RuleId, RuleId)> {
        &self.leftmost_edges
    }

    pub fn cycles(&self) -> &[BTreeSet<RuleId>] {
        &self.cycles
    }

    pub fn unused_rules(&self) -> &[RuleId] {
        &self.unused
    }

    pub fn fan_in(&self, rule: RuleId) -> usize {
        self.fan_in[rule]
    }

    pub fn fan_out(&self, rule: RuleId) -> usize {
        self.fan_out[rule]
    }

    pub fn depth(&self, rule: RuleId) -> usize {
        self.depth[rule]
    }

    pub fn in_cycle(&self, rule: RuleId) -> bool {
        self.cycles.iter().any(|c| c.contains(&rule))
    }

    /// Whether the rule participates in any dependency cycle (directly or
    /// mutually recursive).
    pub fn is_recursive(&self, rule: RuleId) -> bool {
        self.in_cycle(rule) || self.edges.contains(&(rule, rule))
    }
}

/// Calls reachable from each rule's start state without consuming input:
/// epsilon-closure over the rule's own states, collecting `RuleCall`
/// transitions found at epsilon-reachable states.
fn leftmost_call_edges(grammar: &Grammar) -> BTreeSet<(RuleId, RuleId)> {
    let mut leftmost = BTreeSet::new();

    for (id, rule) in grammar.rules().iter().enumerate() {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack = vec![rule.start_state];

        while let Some(sid) = stack.pop() {
            if !visited.insert(sid) {
                continue;
            }
            for tr in &grammar.state(sid).transitions {
                match tr.kind {
                    TransitionKind::Epsilon => stack.push(tr.target),
                    TransitionKind::RuleCall { rule: callee } => {
                        leftmost.insert((id, callee));
                    }
                    // Terminals consume input; predicates gate alternatives.
                    // Neither extends the leftmost frontier.
                    TransitionKind::Terminal(_) | TransitionKind::Predicate { .. } => {}
                }
            }
        }
    }

    leftmost
}

/// Back-edge cycle detection: iterative DFS with an explicit recursion stack.
///
/// Each back edge yields the cycle currently on the path; cycles are
/// deduplicated by set equality of participating rules so `{A, B}` found via
/// two different entry rules is reported once.
fn find_cycles(n: usize, edges: &BTreeSet<(RuleId, RuleId)>) -> Vec<BTreeSet<RuleId>> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    let successors = |r: RuleId| edges.range((r, 0)..(r + 1, 0)).map(|&(_, to)| to);

    let mut color = vec![WHITE; n];
    let mut cycles: Vec<BTreeSet<RuleId>> = Vec::new();

    for root in 0..n {
        if color[root] != WHITE {
            continue;
        }
        // (rule, successor list, next index)
        let mut stack: Vec<(RuleId, Vec<RuleId>, usize)> = vec![(root, successors(root).collect(), 0)];
        let mut path: Vec<RuleId> = vec![root];
        color[root] = GRAY;

        while let Some((node, succs, idx)) = stack.last_mut() {
            if *idx < succs.len() {
                let next = succs[*idx];
                *idx += 1;
                match color[next] {
                    WHITE => {
                        color[next] = GRAY;
                        path.push(next);
                        stack.push((next, successors(next).collect(), 0));
                    }
                    GRAY => {
                        // Back edge: the cycle is the path suffix from `next`.
                        let from = path.iter().position(|&r| r == next).unwrap_or(0);
                        let cycle: BTreeSet<RuleId> = path[from..].iter().copied().collect();
                        if !cycles.contains(&cycle) {
                            cycles.push(cycle);
                        }
                    }
                    _ => {}
                }
            } else {
                color[*node] = BLACK;
                path.pop();
                stack.pop();
            }
        }
    }

    // Stable report order: smallest member first, then size.
    cycles.sort_by(|a, b| {
        a.iter().next().cmp(&b.iter().next()).then(a.len().cmp(&b.len())).then(a.cmp(b))
    });
    cycles
}

/// Depth per rule: length of the longest acyclic path from any zero-in-degree
/// rule. A per-path visited guard bounds traversal so recursion never exceeds
/// the number of rules, even inside cycles.
fn compute_depths(n: usize, edges: &BTreeSet<(RuleId, RuleId)>, fan_in: &[usize]) -> Vec<usize> {
    let successors = |r: RuleId| edges.range((r, 0)..(r + 1, 0)).map(|&(_, to)| to);
    let mut depth = vec![0usize; n];

    // Roots: zero in-degree rules. A grammar whose every rule sits inside a
    // cycle has no roots; depths stay 0 there.
    for root in (0..n).filter(|&r| fan_in[r] == 0) {
        // (rule, path length); `on_path` is the acyclicity guard.
        let mut stack: Vec<(RuleId, usize, bool)> = vec![(root, 0, false)];
        let mut on_path = vec![false; n];

        while let Some((node, len, leaving)) = stack.pop() {
            if leaving {
                on_path[node] = false;
                continue;
            }
            if on_path[node] || len >= n {
                continue;
            }
            on_path[node] = true;
            depth[node] = depth[node].max(len);
            stack.push((node, len, true));
            for next in successors(node) {
                stack.push((next, len + 1, false));
            }
        }
    }

    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GrammarBuilder, RuleKind};

    /// `a: b; b: a;` plus an entry rule `start: a;` and an orphan `dead: ID;`.
    fn mutual_grammar() -> Grammar {
        let mut b = GrammarBuilder::new();
        let id_tok = b.token("ID");
        let start = b.parser_rule("start");
        let a = b.parser_rule("a");
        let bb = b.parser_rule("b");
        let dead = b.parser_rule("dead");

        b.entry_point(start);
        let (s0, s1) = (b.start_state(start), b.stop_state(start));
        b.rule_call(s0, a, s1);

        let (a0, a1) = (b.start_state(a), b.stop_state(a));
        b.rule_call(a0, bb, a1);
        let (b0, b1) = (b.start_state(bb), b.stop_state(bb));
        b.rule_call(b0, a, b1);

        let (d0, d1) = (b.start_state(dead), b.stop_state(dead));
        b.terminal(d0, &[id_tok], d1);

        b.build().unwrap()
    }

    #[test]
    fn mutual_recursion_reports_exactly_one_cycle() {
        let g = mutual_grammar();
        let graph = RuleGraph::build(&g);
        let a = g.rule_named("a").unwrap();
        let bb = g.rule_named("b").unwrap();

        assert_eq!(graph.cycles().len(), 1);
        assert_eq!(graph.cycles()[0], [a, bb].into_iter().collect());
    }

    #[test]
    fn unreferenced_non_entry_rule_is_unused() {
        let g = mutual_grammar();
        let graph = RuleGraph::build(&g);
        let dead = g.rule_named("dead").unwrap();
        let start = g.rule_named("start").unwrap();

        assert!(graph.unused_rules().contains(&dead));
        // Entry points are exempt even with zero in-degree.
        assert!(!graph.unused_rules().contains(&start));
    }

    #[test]
    fn fan_counts_match_edge_set() {
        let g = mutual_grammar();
        let graph = RuleGraph::build(&g);
        let a = g.rule_named("a").unwrap();

        // a is called by start and b; a calls b.
        assert_eq!(graph.fan_in(a), 2);
        assert_eq!(graph.fan_out(a), 1);
    }

    #[test]
    fn depth_is_longest_acyclic_path_and_bounded_in_cycles() {
        let g = mutual_grammar();
        let graph = RuleGraph::build(&g);
        let start = g.rule_named("start").unwrap();
        let a = g.rule_named("a").unwrap();
        let bb = g.rule_named("b").unwrap();

        assert_eq!(graph.depth(start), 0);
        assert_eq!(graph.depth(a), 1);
        assert_eq!(graph.depth(bb), 2);
        assert!(graph.depth(a) < g.rules().len());
    }

    #[test]
    fn leftmost_edges_exclude_calls_behind_terminals() {
        let mut b = GrammarBuilder::new();
        let kw = b.token("KW");
        let outer = b.rule("outer", RuleKind::Parser);
        let inner = b.rule("inner", RuleKind::Parser);
        b.entry_point(outer);

        // outer: KW inner;  the call sits behind a terminal.
        let (o0, o1) = (b.start_state(outer), b.stop_state(outer));
        let mid = b.state(outer);
        b.terminal(o0, &[kw], mid);
        b.rule_call(mid, inner, o1);

        let (i0, i1) = (b.start_state(inner), b.stop_state(inner));
        b.terminal(i0, &[kw], i1);

        let g = b.build().unwrap();
        let graph = RuleGraph::build(&g);
        assert!(graph.edges().contains(&(outer, inner)));
        assert!(!graph.leftmost_edges().contains(&(outer, inner)));
    }
}
