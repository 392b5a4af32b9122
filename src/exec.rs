//! Parse-execution collaborator seam.
//!
//! The ambiguity profiler does not parse anything itself; it drives an
//! implementation of [`ParseExecutor`] (normally the grammar runtime that
//! produced the automaton) in instrumented mode. The trait surface is the
//! contract: `tokenize` turns a sample into a [`TokenStream`], and
//! `instrumented_parse` runs one parse while recording per-decision
//! prediction statistics and ambiguity events.
//!
//! Parse outcomes are an explicit tagged result ([`ParseOutcome`]) rather
//! than caught exceptions, so an intentionally malformed sample
//! (`FailedRecoverable`) is distinguishable from a broken collaborator
//! (`FailedFatal` / `Err`).
//!
//! [`ReferenceExecutor`] is the in-crate reference implementation: a
//! longest-match lexer over a literal/pattern lexicon and an exhaustive
//! backtracking recognizer over the automaton. It is deliberately simple,
//! but its exhaustive search proves real ties under full context, which is
//! exactly what the profiler needs.

use crate::{AnalysisError, DecisionId, Grammar, RuleId, StateId, StateKind, TokenId, TransitionKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

// --- Token stream -------------------------------------------------------------

/// One lexed token. `line` and `column` are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub id: TokenId,
    pub text: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        TokenStream { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Token> {
        self.tokens.get(index)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Line/column of the token at `index`, for mapping event spans back to
    /// source positions.
    pub fn line_col(&self, index: usize) -> Option<(u32, u32)> {
        self.tokens.get(index).map(|t| (t.line, t.column))
    }
}

// --- Instrumented results -----------------------------------------------------

/// Explicit parse result tag; expected divergence (a malformed sample) is a
/// `FailedRecoverable`, a collaborator contract breach is `FailedFatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseOutcome {
    Succeeded,
    FailedRecoverable,
    FailedFatal,
}

/// A runtime-observed tie between two or more alternatives at a decision.
///
/// Produced transiently per sample parse; never persisted across requests.
/// Rule attribution and line/column mapping happen in the profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguityEvent {
    pub decision: DecisionId,
    /// Alternative indices that tied for acceptance.
    pub alternatives: BTreeSet<usize>,
    pub start_index: usize,
    pub stop_index: usize,
    /// Proven under full context (true) or only suspected under bounded
    /// context (false).
    pub exact: bool,
}

/// Per-decision prediction statistics for one instrumented parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionStats {
    pub decision: DecisionId,
    /// Distinct prediction sites (decision, input position) exercised.
    pub invocations: usize,
    /// Deepest lookahead consumed by the fast prediction strategy.
    pub max_lookahead: usize,
    /// Predictions that needed the exhaustive-context fallback.
    pub fallback_count: usize,
    /// Tie events observed at this decision.
    pub ambiguities: usize,
}

/// Everything one instrumented parse produces.
#[derive(Debug, Clone)]
pub struct InstrumentedParse {
    pub outcome: ParseOutcome,
    pub decisions: Vec<DecisionStats>,
    pub events: Vec<AmbiguityEvent>,
    /// Rules actually entered during the parse (coverage tracking).
    pub visited_rules: BTreeSet<RuleId>,
}

/// External parse-execution collaborator.
pub trait ParseExecutor: Send + Sync {
    fn tokenize(&self, input: &str) -> Result<TokenStream, AnalysisError>;

    fn instrumented_parse(
        &self,
        grammar: &Grammar,
        rule: RuleId,
        tokens: &TokenStream,
    ) -> Result<InstrumentedParse, AnalysisError>;
}

// --- Reference executor -------------------------------------------------------

/// Lexical shape of one token type for the reference lexer.
#[derive(Debug, Clone)]
pub enum LexSpec {
    /// Exact spelling (keywords, operators, punctuation).
    Literal(String),
    /// Regular expression, matched anchored at the current offset.
    Pattern(String),
}

#[derive(Debug)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s+").unwrap());

/// Reference [`ParseExecutor`]: longest-match lexing plus an exhaustive
/// backtracking recognizer that reports full-context ties.
#[derive(Debug)]
pub struct ReferenceExecutor {
    /// Tried in order; longest match wins, ties go to the earlier entry (so
    /// keyword literals should precede identifier patterns).
    matchers: Vec<(TokenId, Matcher)>,
}

impl ReferenceExecutor {
    pub fn new(lexicon: Vec<(TokenId, LexSpec)>) -> Result<Self, AnalysisError> {
        let mut matchers = Vec::with_capacity(lexicon.len());
        for (id, spec) in lexicon {
            let matcher = match spec {
                LexSpec::Literal(text) => Matcher::Literal(text),
                LexSpec::Pattern(pat) => {
                    let re = Regex::new(&format!("^(?:{pat})")).map_err(|e| AnalysisError::InvalidGrammar {
                        detail: format!("invalid lexical pattern for token {id}: {e}"),
                    })?;
                    Matcher::Pattern(re)
                }
            };
            matchers.push((id, matcher));
        }
        Ok(ReferenceExecutor { matchers })
    }
}

impl ParseExecutor for ReferenceExecutor {
    fn tokenize(&self, input: &str) -> Result<TokenStream, AnalysisError> {
        let mut tokens = Vec::new();
        let mut rest = input;
        let mut line: u32 = 1;
        let mut column: u32 = 1;

        while !rest.is_empty() {
            if let Some(ws) = WHITESPACE.find(rest) {
                for ch in ws.as_str().chars() {
                    if ch == '\n' {
                        line += 1;
                        column = 1;
                    } else {
                        column += 1;
                    }
                }
                rest = &rest[ws.end()..];
                continue;
            }

            let mut best: Option<(TokenId, usize)> = None;
            for (id, matcher) in &self.matchers {
                let matched = match matcher {
                    Matcher::Literal(text) if rest.starts_with(text.as_str()) => Some(text.len()),
                    Matcher::Literal(_) => None,
                    Matcher::Pattern(re) => re.find(rest).map(|m| m.end()),
                };
                if let Some(len) = matched {
                    if len > 0 && best.map(|(_, b)| len > b).unwrap_or(true) {
                        best = Some((*id, len));
                    }
                }
            }

            match best {
                Some((id, len)) => {
                    let text = rest[..len].to_string();
                    tokens.push(Token { id, text, line, column });
                    column += len as u32;
                    rest = &rest[len..];
                }
                None => {
                    return Err(AnalysisError::Internal {
                        detail: format!("no lexical rule matches input at line {line}, column {column}"),
                    });
                }
            }
        }

        Ok(TokenStream::new(tokens))
    }

    fn instrumented_parse(
        &self,
        grammar: &Grammar,
        rule: RuleId,
        tokens: &TokenStream,
    ) -> Result<InstrumentedParse, AnalysisError> {
        let mut sim = Simulation::new(grammar, rule, tokens);
        let mut stack = Vec::new();
        let accepted = sim.search(grammar.rule(rule).start_state, 0, &mut stack)?;
        Ok(sim.finish(accepted))
    }
}

// --- Exhaustive simulation ----------------------------------------------------

/// Upper bound on total search steps per sample; exceeding it means the
/// grammar/input pair explodes combinatorially (for example an untransformed
/// left-recursive rule) and the sample is abandoned.
const STEP_BUDGET: usize = 500_000;
/// Fast-prediction lookahead horizon before the exhaustive fallback kicks in.
const MAX_PREDICTION_DEPTH: usize = 8;

struct Simulation<'g> {
    grammar: &'g Grammar,
    start_rule: RuleId,
    tokens: Vec<TokenId>,
    steps_left: usize,
    depth_limit: usize,
    /// Acyclicity guard for the current search path: (state, position,
    /// call-stack depth) triples currently being explored.
    path: HashSet<(StateId, usize, usize)>,
    /// (decision, position) → tied alternatives.
    ties: BTreeMap<(DecisionId, usize), BTreeSet<usize>>,
    /// (decision, position) → (lookahead depth, used exhaustive fallback).
    predictions: BTreeMap<(DecisionId, usize), (usize, bool)>,
    visited_rules: BTreeSet<RuleId>,
}

impl<'g> Simulation<'g> {
    fn new(grammar: &'g Grammar, start_rule: RuleId, tokens: &TokenStream) -> Self {
        Simulation {
            grammar,
            start_rule,
            tokens: tokens.tokens().iter().map(|t| t.id).collect(),
            steps_left: STEP_BUDGET,
            depth_limit: 64 + tokens.len() * 4,
            path: HashSet::new(),
            ties: BTreeMap::new(),
            predictions: BTreeMap::new(),
            visited_rules: [start_rule].into_iter().collect(),
        }
    }

    /// Can the whole parse complete from `state` at input position `pos`
    /// with the given return stack? Explores *every* alternative so that
    /// ties anywhere in the input are observed, not just along the first
    /// accepting derivation.
    fn search(&mut self, state: StateId, pos: usize, stack: &mut Vec<StateId>) -> Result<bool, AnalysisError> {
        if self.steps_left == 0 {
            return Err(AnalysisError::Internal { detail: "simulation step budget exhausted".to_string() });
        }
        self.steps_left -= 1;
        if stack.len() > self.depth_limit {
            return Ok(false);
        }

        let key = (state, pos, stack.len());
        if !self.path.insert(key) {
            // Epsilon cycle at the same position; this path cannot make progress.
            return Ok(false);
        }
        let result = self.search_inner(state, pos, stack);
        self.path.remove(&key);
        result
    }

    fn search_inner(&mut self, state: StateId, pos: usize, stack: &mut Vec<StateId>) -> Result<bool, AnalysisError> {
        let st = self.grammar.state(state);

        if state == self.grammar.rule(st.rule).stop_state {
            return match stack.pop() {
                Some(resume) => {
                    let ok = self.search(resume, pos, stack);
                    stack.push(resume);
                    ok
                }
                None => Ok(st.rule == self.start_rule && pos == self.tokens.len()),
            };
        }

        if let StateKind::Decision(decision) = st.kind {
            if st.transitions.len() >= 2 {
                if !self.predictions.contains_key(&(decision, pos)) {
                    let sample = self.predict(state, pos);
                    self.predictions.insert((decision, pos), sample);
                }

                let mut winners: BTreeSet<usize> = BTreeSet::new();
                for alt in 0..st.transitions.len() {
                    let tr = self.grammar.state(state).transitions[alt].clone();
                    if self.follow_transition(&tr, pos, stack)? {
                        winners.insert(alt);
                    }
                }
                if winners.len() >= 2 {
                    self.ties.entry((decision, pos)).or_default().extend(winners.iter().copied());
                }
                return Ok(!winners.is_empty());
            }
        }

        let mut accepted = false;
        for i in 0..st.transitions.len() {
            let tr = self.grammar.state(state).transitions[i].clone();
            if self.follow_transition(&tr, pos, stack)? {
                accepted = true;
            }
        }
        Ok(accepted)
    }

    fn follow_transition(
        &mut self,
        tr: &crate::Transition,
        pos: usize,
        stack: &mut Vec<StateId>,
    ) -> Result<bool, AnalysisError> {
        match tr.kind {
            TransitionKind::Epsilon | TransitionKind::Predicate { .. } => self.search(tr.target, pos, stack),
            TransitionKind::Terminal(ts) => {
                let matched = self.tokens.get(pos).is_some_and(|tok| self.grammar.token_set(ts).contains(tok));
                if matched { self.search(tr.target, pos + 1, stack) } else { Ok(false) }
            }
            TransitionKind::RuleCall { rule } => {
                self.visited_rules.insert(rule);
                stack.push(tr.target);
                let ok = self.search(self.grammar.rule(rule).start_state, pos, stack);
                stack.pop();
                ok
            }
        }
    }

    /// Fast (non-exhaustive) prediction: deepen the lookahead one token at a
    /// time until at most one alternative stays viable. Conservative: when
    /// the horizon or the input runs out with several alternatives viable,
    /// the exhaustive search is the fallback.
    fn predict(&self, state: StateId, pos: usize) -> (usize, bool) {
        let transitions = self.grammar.state(state).transitions.clone();
        for k in 1..=MAX_PREDICTION_DEPTH {
            let viable = transitions
                .iter()
                .filter(|tr| {
                    let mut guard = HashSet::new();
                    self.viable_prefix(tr, pos, k, 0, &mut guard)
                })
                .count();
            if viable <= 1 {
                return (k, false);
            }
            if pos + k >= self.tokens.len() {
                break;
            }
        }
        (MAX_PREDICTION_DEPTH.min(self.tokens.len().saturating_sub(pos)).max(1), true)
    }

    /// Bounded recognizer: can this transition consume the next `k` tokens
    /// (or plausibly complete earlier)? `depth` bounds rule-call nesting.
    fn viable_prefix(
        &self,
        tr: &crate::Transition,
        pos: usize,
        k: usize,
        depth: usize,
        guard: &mut HashSet<(StateId, usize)>,
    ) -> bool {
        if k == 0 || pos >= self.tokens.len() {
            return true;
        }
        if depth > 32 {
            return true; // inconclusive; stay conservative
        }
        match tr.kind {
            TransitionKind::Terminal(ts) => {
                if self.grammar.token_set(ts).contains(&self.tokens[pos]) {
                    self.viable_state(tr.target, pos + 1, k - 1, depth, guard)
                } else {
                    false
                }
            }
            TransitionKind::Epsilon | TransitionKind::Predicate { .. } => {
                self.viable_state(tr.target, pos, k, depth, guard)
            }
            TransitionKind::RuleCall { rule } => {
                // Enter the callee; treat reaching its stop as inconclusive
                // success (the continuation is this sub-search's blind spot).
                self.viable_state(self.grammar.rule(rule).start_state, pos, k, depth + 1, guard)
            }
        }
    }

    fn viable_state(
        &self,
        state: StateId,
        pos: usize,
        k: usize,
        depth: usize,
        guard: &mut HashSet<(StateId, usize)>,
    ) -> bool {
        if k == 0 || pos >= self.tokens.len() {
            return true;
        }
        if state == self.grammar.rule(self.grammar.state(state).rule).stop_state {
            return true;
        }
        if !guard.insert((state, pos)) {
            return false;
        }
        let ok = self
            .grammar
            .state(state)
            .transitions
            .iter()
            .any(|tr| self.viable_prefix(tr, pos, k, depth, guard));
        guard.remove(&(state, pos));
        ok
    }

    fn finish(self, accepted: bool) -> InstrumentedParse {
        let stop = self.tokens.len().saturating_sub(1);

        let events: Vec<AmbiguityEvent> = self
            .ties
            .iter()
            .map(|(&(decision, start), alternatives)| AmbiguityEvent {
                decision,
                alternatives: alternatives.clone(),
                start_index: start,
                stop_index: stop,
                exact: true,
            })
            .collect();

        // Fold prediction samples and ties into per-decision statistics.
        let mut by_decision: BTreeMap<DecisionId, DecisionStats> = BTreeMap::new();
        for (&(decision, _), &(lookahead, fallback)) in &self.predictions {
            let entry = by_decision.entry(decision).or_insert(DecisionStats {
                decision,
                invocations: 0,
                max_lookahead: 0,
                fallback_count: 0,
                ambiguities: 0,
            });
            entry.invocations += 1;
            entry.max_lookahead = entry.max_lookahead.max(lookahead);
            if fallback {
                entry.fallback_count += 1;
            }
        }
        for &(decision, _) in self.ties.keys() {
            if let Some(entry) = by_decision.get_mut(&decision) {
                entry.ambiguities += 1;
            }
        }

        InstrumentedParse {
            outcome: if accepted { ParseOutcome::Succeeded } else { ParseOutcome::FailedRecoverable },
            decisions: by_decision.into_values().collect(),
            events,
            visited_rules: self.visited_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;

    #[test]
    fn tokenizer_tracks_lines_and_prefers_keywords() {
        let exec = grammars::dangling_else_executor();
        let stream = exec.tokenize("if x\nthen y").unwrap();
        let texts: Vec<&str> = stream.tokens().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["if", "x", "then", "y"]);

        let g = grammars::dangling_else();
        assert_eq!(g.token_name(stream.get(0).unwrap().id), "IF");
        assert_eq!(g.token_name(stream.get(1).unwrap().id), "ID");
        assert_eq!(stream.line_col(2), Some((2, 1)));
    }

    #[test]
    fn tokenizer_rejects_unknown_input() {
        let exec = grammars::dangling_else_executor();
        assert!(matches!(exec.tokenize("if §"), Err(AnalysisError::Internal { .. })));
    }

    #[test]
    fn dangling_else_sample_yields_a_tie_for_stat() {
        let g = grammars::dangling_else();
        let exec = grammars::dangling_else_executor();
        let stat = g.require_rule("stat").unwrap();
        let tokens = exec.tokenize("if x then if y then a else b").unwrap();
        let parse = exec.instrumented_parse(&g, stat, &tokens).unwrap();

        assert_eq!(parse.outcome, ParseOutcome::Succeeded);
        assert!(!parse.events.is_empty());
        let event = &parse.events[0];
        assert!(event.alternatives.len() >= 2);
        assert!(event.exact);
        // The tie is between the with-else and without-else alternatives.
        assert!(g.decision_state(event.decision).is_some());
    }

    #[test]
    fn unambiguous_grammar_yields_no_events() {
        let g = grammars::arithmetic();
        let exec = grammars::arithmetic_executor();
        let expr = g.require_rule("expr").unwrap();
        for sample in ["1 + 2 * 3", "(1 + 2) * 3", "42"] {
            let tokens = exec.tokenize(sample).unwrap();
            let parse = exec.instrumented_parse(&g, expr, &tokens).unwrap();
            assert_eq!(parse.outcome, ParseOutcome::Succeeded, "sample {sample:?}");
            assert!(parse.events.is_empty(), "sample {sample:?}");
        }
    }

    #[test]
    fn malformed_sample_is_recoverable_not_an_error() {
        let g = grammars::arithmetic();
        let exec = grammars::arithmetic_executor();
        let expr = g.require_rule("expr").unwrap();
        let tokens = exec.tokenize("1 + + 2").unwrap();
        let parse = exec.instrumented_parse(&g, expr, &tokens).unwrap();
        assert_eq!(parse.outcome, ParseOutcome::FailedRecoverable);
    }

    #[test]
    fn coverage_records_entered_rules() {
        let g = grammars::arithmetic();
        let exec = grammars::arithmetic_executor();
        let expr = g.require_rule("expr").unwrap();
        let tokens = exec.tokenize("1 + 2").unwrap();
        let parse = exec.instrumented_parse(&g, expr, &tokens).unwrap();

        for name in ["expr", "term", "factor"] {
            assert!(parse.visited_rules.contains(&g.require_rule(name).unwrap()), "missing {name}");
        }
    }

    #[test]
    fn decision_stats_report_lookahead_depths() {
        let g = grammars::arithmetic();
        let exec = grammars::arithmetic_executor();
        let expr = g.require_rule("expr").unwrap();
        let tokens = exec.tokenize("1 + 2").unwrap();
        let parse = exec.instrumented_parse(&g, expr, &tokens).unwrap();

        assert!(!parse.decisions.is_empty());
        for stats in &parse.decisions {
            assert!(stats.invocations >= 1);
            assert!(stats.max_lookahead >= 1);
            assert_eq!(stats.ambiguities, 0);
        }
    }
}
