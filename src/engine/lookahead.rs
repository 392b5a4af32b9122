//! FIRST/FOLLOW computation and decision lookahead conflict analysis.
//!
//! Sets are computed once per grammar by fixed-point iteration with
//! dirty-flag convergence (an iteration that inserts nothing terminates the
//! loop), then served from the analyzer. Traversals carry visited-state
//! guards so cyclic automata converge instead of recursing.
//!
//! FOLLOW is a **context-free approximation**: one set per rule, merging
//! every call site, not one set per invocation context. That is the
//! documented contract; callers needing call-site precision must use the
//! runtime profiler instead.

use crate::{AnalysisError, DecisionId, Grammar, RuleId, StateId, TokenId, TransitionKind};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

// --- Lookahead sets -----------------------------------------------------------

/// An ordered set of token identifiers plus the `Epsilon` and `EndOfInput`
/// sentinel markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LookaheadSet {
    pub tokens: BTreeSet<TokenId>,
    /// The construct can derive the empty string.
    pub epsilon: bool,
    /// End of input can appear at this point.
    pub eof: bool,
}

impl LookaheadSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: TokenId) -> bool {
        self.tokens.insert(token)
    }

    pub fn contains(&self, token: TokenId) -> bool {
        self.tokens.contains(&token)
    }

    /// Union in `other`'s tokens and markers; returns whether anything new
    /// was added (dirty flag for fixed-point convergence).
    pub fn union(&mut self, other: &LookaheadSet) -> bool {
        let before = (self.tokens.len(), self.epsilon, self.eof);
        self.tokens.extend(other.tokens.iter().copied());
        self.epsilon |= other.epsilon;
        self.eof |= other.eof;
        before != (self.tokens.len(), self.epsilon, self.eof)
    }

    /// Tokens only, without the epsilon marker (used when a callee's FIRST
    /// flows into a caller's set but nullability does not propagate).
    pub fn union_tokens(&mut self, other: &LookaheadSet) -> bool {
        let before = self.tokens.len();
        self.tokens.extend(other.tokens.iter().copied());
        before != self.tokens.len()
    }

    /// Two sets conflict when they can both accept the same next token (or
    /// both accept end of input).
    pub fn intersects(&self, other: &LookaheadSet) -> bool {
        (self.eof && other.eof) || self.tokens.iter().any(|t| other.tokens.contains(t))
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && !self.epsilon && !self.eof
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Human-readable rendering using the grammar's token names.
    pub fn display(&self, grammar: &Grammar) -> String {
        let mut parts: Vec<String> = self.tokens.iter().map(|&t| grammar.token_name(t)).collect();
        if self.epsilon {
            parts.push("ε".to_string());
        }
        if self.eof {
            parts.push("<EOF>".to_string());
        }
        format!("{{{}}}", parts.join(", "))
    }
}

/// Lookahead for one decision alternative: a concrete token set, or the
/// `Dynamic` sentinel when the alternative is guarded by a runtime predicate
/// whose outcome cannot be statically determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Lookahead {
    Tokens(LookaheadSet),
    Dynamic,
}

// --- Analyzer -----------------------------------------------------------------

/// Precomputed FIRST/FOLLOW sets for every rule of a grammar.
#[derive(Debug)]
pub struct LookaheadAnalyzer<'g> {
    grammar: &'g Grammar,
    first: Vec<LookaheadSet>,
    follow: Vec<LookaheadSet>,
}

impl<'g> LookaheadAnalyzer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        let first = compute_first(grammar);
        let follow = compute_follow(grammar, &first);
        LookaheadAnalyzer { grammar, first, follow }
    }

    /// Terminal tokens that can begin a derivation of `rule`, with the
    /// epsilon marker when the rule can derive the empty string.
    pub fn first(&self, rule: RuleId) -> &LookaheadSet {
        &self.first[rule]
    }

    /// Tokens that can appear immediately after any invocation of `rule`.
    /// Context-free approximation; see the module docs.
    pub fn follow(&self, rule: RuleId) -> &LookaheadSet {
        &self.follow[rule]
    }

    /// One lookahead per outgoing alternative of the decision, in transition
    /// order. Predicate-guarded alternatives yield [`Lookahead::Dynamic`];
    /// alternatives that can exit the rule fold in FOLLOW(rule).
    pub fn decision_lookaheads(&self, decision: DecisionId) -> Result<Vec<Lookahead>, AnalysisError> {
        let state = self
            .grammar
            .decision_state(decision)
            .ok_or_else(|| AnalysisError::Internal { detail: format!("decision {decision} is out of range") })?;

        Ok((0..state.transitions.len()).map(|alt| self.alternative_lookahead(state.id, alt)).collect())
    }

    /// Pairs of alternative indices whose lookahead sets overlap. `Dynamic`
    /// alternatives are excluded from conflict testing.
    pub fn conflicts(&self, decision: DecisionId) -> Result<Vec<(usize, usize)>, AnalysisError> {
        let sets = self.decision_lookaheads(decision)?;
        let mut out = Vec::new();
        for i in 0..sets.len() {
            for j in i + 1..sets.len() {
                if let (Lookahead::Tokens(a), Lookahead::Tokens(b)) = (&sets[i], &sets[j]) {
                    if a.intersects(b) {
                        out.push((i, j));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Decisions owned by `rule`, in decision-id order.
    pub fn decisions_of(&self, rule: RuleId) -> Vec<DecisionId> {
        self.grammar
            .decision_points()
            .into_iter()
            .filter(|dp| dp.rule == rule)
            .map(|dp| dp.decision)
            .collect()
    }

    fn alternative_lookahead(&self, decision_state: StateId, alt: usize) -> Lookahead {
        let state = self.grammar.state(decision_state);
        let rule = state.rule;
        let head = &state.transitions[alt];

        // An alternative whose gate is a bare runtime predicate cannot be
        // decided statically. Precedence guards are left-recursion machinery
        // with a statically known shape and are traversed like epsilon.
        if matches!(head.kind, TransitionKind::Predicate { precedence: None }) {
            return Lookahead::Dynamic;
        }

        let mut set = LookaheadSet::new();
        let mut exits_rule = false;
        let mut visited: HashSet<StateId> = HashSet::new();
        let mut pending: Vec<(TransitionKind, StateId)> = vec![(head.kind.clone(), head.target)];

        while let Some((kind, target)) = pending.pop() {
            match kind {
                TransitionKind::Terminal(ts) => {
                    for &t in self.grammar.token_set(ts) {
                        set.insert(t);
                    }
                    // First terminal reached; this path contributes nothing further.
                }
                TransitionKind::RuleCall { rule: callee } => {
                    set.union_tokens(&self.first[callee]);
                    if self.first[callee].epsilon {
                        self.expand_state(rule, target, &mut pending, &mut visited, &mut exits_rule);
                    }
                }
                TransitionKind::Epsilon | TransitionKind::Predicate { .. } => {
                    self.expand_state(rule, target, &mut pending, &mut visited, &mut exits_rule);
                }
            }
        }

        if exits_rule {
            set.union(&self.follow[rule]);
        }
        Lookahead::Tokens(set)
    }

    /// Queue the outgoing transitions of `target`, flagging rule exit when
    /// the stop state is reached.
    fn expand_state(
        &self,
        rule: RuleId,
        target: StateId,
        pending: &mut Vec<(TransitionKind, StateId)>,
        visited: &mut HashSet<StateId>,
        exits_rule: &mut bool,
    ) {
        if !visited.insert(target) {
            return;
        }
        if target == self.grammar.rule(rule).stop_state {
            *exits_rule = true;
            return;
        }
        for tr in &self.grammar.state(target).transitions {
            pending.push((tr.kind.clone(), tr.target));
        }
    }
}

/// FIRST(rule): closure of terminal labels reachable from the rule's start
/// state without exiting the rule; epsilon marker set when the stop state is
/// reachable without consuming. Fixed-point across rules so mutually
/// recursive FIRST dependencies converge.
fn compute_first(grammar: &Grammar) -> Vec<LookaheadSet> {
    let n = grammar.rules().len();
    let mut first: Vec<LookaheadSet> = vec![LookaheadSet::new(); n];

    loop {
        let mut changed = false;

        for (id, rule) in grammar.rules().iter().enumerate() {
            let mut acc = first[id].clone();
            let mut visited: HashSet<StateId> = HashSet::new();
            let mut stack = vec![rule.start_state];

            while let Some(sid) = stack.pop() {
                if !visited.insert(sid) {
                    continue;
                }
                if sid == rule.stop_state {
                    acc.epsilon = true;
                    continue;
                }
                for tr in &grammar.state(sid).transitions {
                    match tr.kind {
                        TransitionKind::Terminal(ts) => {
                            for &t in grammar.token_set(ts) {
                                acc.insert(t);
                            }
                        }
                        TransitionKind::RuleCall { rule: callee } => {
                            acc.union_tokens(&first[callee]);
                            if first[callee].epsilon {
                                stack.push(tr.target);
                            }
                        }
                        TransitionKind::Epsilon | TransitionKind::Predicate { .. } => stack.push(tr.target),
                    }
                }
            }

            if acc != first[id] {
                first[id] = acc;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    first
}

/// FOLLOW(rule): for every call site, FIRST of the caller's continuation;
/// when the continuation can reach the caller's stop state, FOLLOW(caller)
/// propagates too. Entry points admit end of input.
fn compute_follow(grammar: &Grammar, first: &[LookaheadSet]) -> Vec<LookaheadSet> {
    let n = grammar.rules().len();
    let mut follow: Vec<LookaheadSet> = vec![LookaheadSet::new(); n];
    for &entry in grammar.entry_points() {
        follow[entry].eof = true;
    }

    // Call sites are fixed; collect them once.
    let call_sites: Vec<(RuleId, RuleId, StateId)> = grammar
        .states()
        .iter()
        .flat_map(|s| {
            s.transitions.iter().filter_map(move |tr| match tr.kind {
                TransitionKind::RuleCall { rule: callee } => Some((s.rule, callee, tr.target)),
                _ => None,
            })
        })
        .collect();

    loop {
        let mut changed = false;

        for &(caller, callee, resume) in &call_sites {
            let (cont_first, cont_nullable) = continuation_first(grammar, first, caller, resume);
            changed |= follow[callee].union_tokens(&cont_first);
            if cont_nullable {
                let caller_follow = follow[caller].clone();
                changed |= follow[callee].union(&caller_follow);
            }
        }

        if !changed {
            break;
        }
    }

    // FOLLOW sets carry no epsilon marker.
    for set in &mut follow {
        set.epsilon = false;
    }
    follow
}

/// FIRST of the continuation starting at `from` inside `rule`, plus whether
/// the continuation can reach the rule's stop state without consuming.
fn continuation_first(
    grammar: &Grammar,
    first: &[LookaheadSet],
    rule: RuleId,
    from: StateId,
) -> (LookaheadSet, bool) {
    let stop = grammar.rule(rule).stop_state;
    let mut acc = LookaheadSet::new();
    let mut nullable = false;
    let mut visited: HashSet<StateId> = HashSet::new();
    let mut stack = vec![from];

    while let Some(sid) = stack.pop() {
        if !visited.insert(sid) {
            continue;
        }
        if sid == stop {
            nullable = true;
            continue;
        }
        for tr in &grammar.state(sid).transitions {
            match tr.kind {
                TransitionKind::Terminal(ts) => {
                    for &t in grammar.token_set(ts) {
                        acc.insert(t);
                    }
                }
                TransitionKind::RuleCall { rule: callee } => {
                    acc.union_tokens(&first[callee]);
                    if first[callee].epsilon {
                        stack.push(tr.target);
                    }
                }
                TransitionKind::Epsilon | TransitionKind::Predicate { .. } => stack.push(tr.target),
            }
        }
    }

    (acc, nullable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;

    #[test]
    fn first_of_expr_equals_first_of_term() {
        let g = grammars::arithmetic();
        let az = LookaheadAnalyzer::new(&g);
        let expr = g.rule_named("expr").unwrap();
        let term = g.rule_named("term").unwrap();
        assert_eq!(az.first(expr).tokens, az.first(term).tokens);
        assert!(!az.first(expr).epsilon);
    }

    #[test]
    fn loop_decision_has_continue_and_exit_lookaheads() {
        let g = grammars::arithmetic();
        let az = LookaheadAnalyzer::new(&g);
        let expr = g.rule_named("expr").unwrap();
        let decisions = az.decisions_of(expr);
        assert_eq!(decisions.len(), 1);

        let sets = az.decision_lookaheads(decisions[0]).unwrap();
        assert_eq!(sets.len(), 2);

        let plus = grammars::arithmetic_token(&g, "PLUS");
        let minus = grammars::arithmetic_token(&g, "MINUS");
        let Lookahead::Tokens(cont) = &sets[0] else { panic!("continue alternative must be concrete") };
        assert_eq!(cont.tokens, [plus, minus].into_iter().collect());

        // Exit alternative folds in FOLLOW(expr): at least ')' and EOF here.
        let Lookahead::Tokens(exit) = &sets[1] else { panic!("exit alternative must be concrete") };
        let rparen = grammars::arithmetic_token(&g, "RPAREN");
        assert!(exit.contains(rparen));
        assert!(exit.eof);
        for t in &az.follow(expr).tokens {
            assert!(exit.contains(*t));
        }
    }

    #[test]
    fn disjoint_alternatives_never_conflict() {
        let g = grammars::arithmetic();
        let az = LookaheadAnalyzer::new(&g);
        let factor = g.rule_named("factor").unwrap();
        // factor: NUMBER | '(' expr ')' has disjoint first tokens.
        for d in az.decisions_of(factor) {
            assert!(az.conflicts(d).unwrap().is_empty());
        }
    }

    #[test]
    fn shared_first_token_reports_one_conflict() {
        let g = grammars::dangling_else();
        let az = LookaheadAnalyzer::new(&g);
        let stat = g.rule_named("stat").unwrap();
        let decisions = az.decisions_of(stat);
        assert_eq!(decisions.len(), 1);

        // Both if-alternatives start with IF; the ID alternative is disjoint.
        let conflicts = az.conflicts(decisions[0]).unwrap();
        assert_eq!(conflicts, vec![(0, 1)]);
    }

    #[test]
    fn predicate_guarded_alternative_is_dynamic_and_excluded() {
        use crate::GrammarBuilder;
        let mut b = GrammarBuilder::new();
        let a_tok = b.token("A");
        let r = b.parser_rule("r");
        b.entry_point(r);
        let (s0, s1) = (b.start_state(r), b.stop_state(r));
        let d = b.decision(r);
        b.epsilon(s0, d);
        let g1 = b.state(r);
        b.predicate(d, None, g1);
        b.terminal(g1, &[a_tok], s1);
        b.terminal(d, &[a_tok], s1);
        let g = b.build().unwrap();

        let az = LookaheadAnalyzer::new(&g);
        let sets = az.decision_lookaheads(0).unwrap();
        assert_eq!(sets[0], Lookahead::Dynamic);
        // Both alternatives can start with A, but Dynamic is excluded.
        assert!(az.conflicts(0).unwrap().is_empty());
    }

    #[test]
    fn follow_of_inner_rule_includes_call_site_continuations() {
        let g = grammars::arithmetic();
        let az = LookaheadAnalyzer::new(&g);
        let term = g.rule_named("term").unwrap();
        let plus = grammars::arithmetic_token(&g, "PLUS");
        let minus = grammars::arithmetic_token(&g, "MINUS");
        // term is followed by '+' or '-' inside expr's loop, and inherits
        // FOLLOW(expr) at the loop exit.
        assert!(az.follow(term).contains(plus));
        assert!(az.follow(term).contains(minus));
        assert!(az.follow(term).eof);
    }
}
