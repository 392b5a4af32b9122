extern crate self as gramscope;

mod api;
mod engine;
mod error;
mod exec;
pub mod grammars;

pub use api::{
    AggregateComplexity, AmbiguityReport, ComplexityReport, DecisionConflicts, DecisionGraphReport, GraphReport,
    GraphRuleRow, LeftRecursionReport, LeftRecursionRow, LookaheadReport, Options, ProfileOptions, RuleAmbiguity,
    RuleComplexity, RuleFlags, RuleLookahead, analyze_complexity, analyze_left_recursion, analyze_lookahead,
    analyze_rule_graph, decision_graph, detect_ambiguities,
};
pub use engine::{
    Coverage, DecisionSubgraph, Lookahead, LookaheadSet, ProfileOutcome, ProfiledEvent, RuleGraph, SubgraphEdge,
    SubgraphNode,
};
pub use error::AnalysisError;
pub use exec::{
    AmbiguityEvent, DecisionStats, InstrumentedParse, LexSpec, ParseExecutor, ParseOutcome, ReferenceExecutor, Token,
    TokenStream,
};

use std::collections::{BTreeSet, HashMap};

// --- Identifiers --------------------------------------------------------------

/// Rule identifier (index into [`Grammar::rules`]).
pub type RuleId = usize;
/// State identifier (index into the automaton state arena).
pub type StateId = usize;
/// Decision identifier (index into the automaton decision table).
pub type DecisionId = usize;
/// Interned token-set identifier.
pub type TokenSetId = usize;
/// Token type identifier, assigned by the grammar compiler.
pub type TokenId = u32;

// --- Rule table ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum RuleKind {
    Parser,
    Lexer,
    Fragment,
}

/// A grammar rule as handed over by the external grammar compiler.
///
/// Immutable once the owning [`Grammar`] is built. Identified uniquely by
/// `name` within a grammar.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub kind: RuleKind,
    /// Number of top-level alternatives (out-degree of the entry decision,
    /// or 1 for single-alternative rules).
    pub alternative_count: usize,
    pub start_state: StateId,
    pub stop_state: StateId,
}

// --- Automaton ----------------------------------------------------------------

/// Classification of an automaton state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Basic,
    /// A prediction point: ≥2 outgoing transitions requiring the parser to
    /// choose an alternative.
    Decision(DecisionId),
    RuleStart,
    RuleStop,
}

/// A transition label in the automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    /// Consumes no input; control-flow structure within a rule.
    Epsilon,
    /// Consumes one token out of the referenced interned token set.
    Terminal(TokenSetId),
    /// Invokes another rule. The transition's `target` is the continuation
    /// state in the *calling* rule (where control resumes after the callee
    /// completes).
    RuleCall { rule: RuleId },
    /// A runtime predicate gate. `precedence: Some(level)` is the structural
    /// marker a grammar compiler leaves behind when it rewrites a directly
    /// left-recursive rule into precedence-climbing form.
    Predicate { precedence: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub target: StateId,
}

/// One state in the flat automaton arena.
///
/// The automaton exclusively owns all states for its lifetime; analysis code
/// holds only indices and never mutates.
#[derive(Debug, Clone)]
pub struct State {
    pub id: StateId,
    /// Owning rule. Every state belongs to exactly one rule's body.
    pub rule: RuleId,
    pub kind: StateKind,
    pub transitions: Vec<Transition>,
}

/// Derived view of a decision state: a `Decision`-kind state with ≥2
/// outgoing transitions requiring prediction.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DecisionPoint {
    pub decision: DecisionId,
    pub rule: RuleId,
    pub state: StateId,
    pub alternative_count: usize,
}

// --- Grammar ------------------------------------------------------------------

/// The immutable `(rule table, automaton)` pair produced by an external
/// grammar compiler.
///
/// Every analysis in this crate takes `&Grammar` and never mutates it; the
/// structure is `Send + Sync` and safe to share across analysis workers.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    states: Vec<State>,
    token_sets: Vec<BTreeSet<TokenId>>,
    token_names: Vec<String>,
    /// Decision id → state id.
    decisions: Vec<StateId>,
    entry_points: BTreeSet<RuleId>,
    by_name: HashMap<String, RuleId>,
}

impl Grammar {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    /// Look up a rule by name.
    pub fn rule_named(&self, name: &str) -> Option<RuleId> {
        self.by_name.get(name).copied()
    }

    /// Like [`rule_named`](Self::rule_named) but returns a structured error
    /// naming the missing rule.
    pub fn require_rule(&self, name: &str) -> Result<RuleId, AnalysisError> {
        self.rule_named(name).ok_or_else(|| AnalysisError::RuleNotFound { name: name.to_string() })
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id]
    }

    /// States owned by `rule`, in arena order.
    pub fn states_of(&self, rule: RuleId) -> impl Iterator<Item = &State> {
        self.states.iter().filter(move |s| s.rule == rule)
    }

    pub fn token_set(&self, id: TokenSetId) -> &BTreeSet<TokenId> {
        &self.token_sets[id]
    }

    /// Display name for a token type (falls back to the numeric id).
    pub fn token_name(&self, token: TokenId) -> String {
        self.token_names.get(token as usize).cloned().unwrap_or_else(|| format!("<{token}>"))
    }

    pub fn token_count(&self) -> usize {
        self.token_names.len()
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }

    /// State backing a decision, if the decision id is valid.
    pub fn decision_state(&self, decision: DecisionId) -> Option<&State> {
        self.decisions.get(decision).map(|&sid| &self.states[sid])
    }

    /// Derived decision-point views, in decision-id order.
    pub fn decision_points(&self) -> Vec<DecisionPoint> {
        self.decisions
            .iter()
            .enumerate()
            .map(|(decision, &sid)| {
                let state = &self.states[sid];
                DecisionPoint { decision, rule: state.rule, state: sid, alternative_count: state.transitions.len() }
            })
            .collect()
    }

    pub fn entry_points(&self) -> &BTreeSet<RuleId> {
        &self.entry_points
    }

    pub fn is_entry_point(&self, rule: RuleId) -> bool {
        self.entry_points.contains(&rule)
    }

    /// Number of rules of the given kind.
    pub fn count_by_kind(&self, kind: RuleKind) -> usize {
        self.rules.iter().filter(|r| r.kind == kind).count()
    }
}

// --- Builder ------------------------------------------------------------------

/// Assembly surface used by the external grammar compiler (and by tests) to
/// hand over a [`Grammar`].
///
/// The builder is the only place the automaton is mutable; [`build`] validates
/// structural integrity and freezes the result. No analysis code constructs or
/// mutates automata.
///
/// [`build`]: GrammarBuilder::build
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    rules: Vec<Rule>,
    states: Vec<State>,
    token_sets: Vec<BTreeSet<TokenId>>,
    token_names: Vec<String>,
    decisions: Vec<StateId>,
    entry_points: BTreeSet<RuleId>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a token type and return its id. Ids are assigned densely in
    /// declaration order.
    pub fn token(&mut self, name: &str) -> TokenId {
        self.token_names.push(name.to_string());
        (self.token_names.len() - 1) as TokenId
    }

    /// Declare a rule of the given kind; creates its start and stop states.
    pub fn rule(&mut self, name: &str, kind: RuleKind) -> RuleId {
        let id = self.rules.len();
        let start = self.push_state(id, StateKind::RuleStart);
        let stop = self.push_state(id, StateKind::RuleStop);
        self.rules.push(Rule {
            name: name.to_string(),
            kind,
            alternative_count: 1,
            start_state: start,
            stop_state: stop,
        });
        id
    }

    /// Shorthand for [`rule`](Self::rule) with [`RuleKind::Parser`].
    pub fn parser_rule(&mut self, name: &str) -> RuleId {
        self.rule(name, RuleKind::Parser)
    }

    pub fn start_state(&self, rule: RuleId) -> StateId {
        self.rules[rule].start_state
    }

    pub fn stop_state(&self, rule: RuleId) -> StateId {
        self.rules[rule].stop_state
    }

    /// Add a basic state owned by `rule`.
    pub fn state(&mut self, rule: RuleId) -> StateId {
        self.push_state(rule, StateKind::Basic)
    }

    /// Add a decision state owned by `rule` and register its decision id.
    pub fn decision(&mut self, rule: RuleId) -> StateId {
        let decision = self.decisions.len();
        let sid = self.push_state(rule, StateKind::Decision(decision));
        self.decisions.push(sid);
        sid
    }

    pub fn epsilon(&mut self, from: StateId, to: StateId) {
        self.states[from].transitions.push(Transition { kind: TransitionKind::Epsilon, target: to });
    }

    /// Terminal transition over the given token set (interned, deduplicated).
    pub fn terminal(&mut self, from: StateId, tokens: &[TokenId], to: StateId) {
        let set: BTreeSet<TokenId> = tokens.iter().copied().collect();
        let set_id = match self.token_sets.iter().position(|s| *s == set) {
            Some(existing) => existing,
            None => {
                self.token_sets.push(set);
                self.token_sets.len() - 1
            }
        };
        self.states[from].transitions.push(Transition { kind: TransitionKind::Terminal(set_id), target: to });
    }

    /// Rule-call transition. `resume` is the continuation state in the calling
    /// rule's body.
    pub fn rule_call(&mut self, from: StateId, callee: RuleId, resume: StateId) {
        self.states[from]
            .transitions
            .push(Transition { kind: TransitionKind::RuleCall { rule: callee }, target: resume });
    }

    /// Predicate transition; `precedence: Some(level)` marks a
    /// precedence-climbing guard left by left-recursion rewriting.
    pub fn predicate(&mut self, from: StateId, precedence: Option<u32>, to: StateId) {
        self.states[from].transitions.push(Transition { kind: TransitionKind::Predicate { precedence }, target: to });
    }

    /// Designate `rule` as an entry point (kept out of unused-rule reporting).
    pub fn entry_point(&mut self, rule: RuleId) {
        self.entry_points.insert(rule);
    }

    fn push_state(&mut self, rule: RuleId, kind: StateKind) -> StateId {
        let id = self.states.len();
        self.states.push(State { id, rule, kind, transitions: Vec::new() });
        id
    }

    /// Validate and freeze the grammar.
    ///
    /// Checks: unique rule names, in-range rule/state/token-set references on
    /// every transition, and valid entry-point designations. Also derives each
    /// rule's `alternative_count` from its entry decision.
    pub fn build(mut self) -> Result<Grammar, AnalysisError> {
        let mut by_name: HashMap<String, RuleId> = HashMap::with_capacity(self.rules.len());
        for (id, rule) in self.rules.iter().enumerate() {
            if by_name.insert(rule.name.clone(), id).is_some() {
                return Err(AnalysisError::InvalidGrammar {
                    detail: format!("duplicate rule declaration \"{}\"", rule.name),
                });
            }
        }

        for state in &self.states {
            if state.rule >= self.rules.len() {
                return Err(AnalysisError::InvalidGrammar {
                    detail: format!("state {} owned by undeclared rule index {}", state.id, state.rule),
                });
            }
            for tr in &state.transitions {
                if tr.target >= self.states.len() {
                    return Err(AnalysisError::InvalidGrammar {
                        detail: format!("state {} has a transition to missing state {}", state.id, tr.target),
                    });
                }
                match tr.kind {
                    TransitionKind::Terminal(set) if set >= self.token_sets.len() => {
                        return Err(AnalysisError::InvalidGrammar {
                            detail: format!("state {} references missing token set {set}", state.id),
                        });
                    }
                    TransitionKind::RuleCall { rule } if rule >= self.rules.len() => {
                        return Err(AnalysisError::InvalidGrammar {
                            detail: format!("state {} calls unresolved rule index {rule}", state.id),
                        });
                    }
                    _ => {}
                }
            }
        }

        for entry in &self.entry_points {
            if *entry >= self.rules.len() {
                return Err(AnalysisError::InvalidGrammar { detail: format!("entry point {entry} is not a rule") });
            }
        }

        // Derive alternative counts from the first decision owned by each rule
        // (single-alternative rules have none).
        let states = std::mem::take(&mut self.states);
        for (id, rule) in self.rules.iter_mut().enumerate() {
            let entry_decision =
                states.iter().filter(|s| s.rule == id).find(|s| matches!(s.kind, StateKind::Decision(_)));
            rule.alternative_count = match entry_decision {
                Some(state) => state.transitions.len().max(1),
                None => 1,
            };
        }

        Ok(Grammar {
            rules: self.rules,
            states,
            token_sets: self.token_sets,
            token_names: self.token_names,
            decisions: self.decisions,
            entry_points: self.entry_points,
            by_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_duplicate_rule_names() {
        let mut b = GrammarBuilder::new();
        b.parser_rule("expr");
        b.parser_rule("expr");
        let err = b.build().unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidGrammar { .. }));
        assert!(err.to_string().contains("expr"));
    }

    #[test]
    fn builder_rejects_unresolved_rule_call() {
        let mut b = GrammarBuilder::new();
        let expr = b.parser_rule("expr");
        let start = b.start_state(expr);
        let stop = b.stop_state(expr);
        // Call a rule index that was never declared.
        b.states[start].transitions.push(Transition { kind: TransitionKind::RuleCall { rule: 7 }, target: stop });
        assert!(matches!(b.build(), Err(AnalysisError::InvalidGrammar { .. })));
    }

    #[test]
    fn token_sets_are_interned() {
        let mut b = GrammarBuilder::new();
        let plus = b.token("PLUS");
        let r = b.parser_rule("expr");
        let s1 = b.state(r);
        let s2 = b.state(r);
        let s3 = b.state(r);
        b.terminal(s1, &[plus], s2);
        b.terminal(s2, &[plus], s3);
        let g = b.build().unwrap();
        assert_eq!(g.token_sets.len(), 1);
    }

    #[test]
    fn alternative_count_reflects_entry_decision() {
        let g = grammars::arithmetic();
        let expr = g.require_rule("expr").unwrap();
        assert!(g.rule(expr).alternative_count >= 1);
        assert!(g.decision_points().iter().all(|dp| dp.alternative_count >= 2));
    }
}
