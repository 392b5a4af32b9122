//! Public analysis surface.
//!
//! Thin report-shaping layer over `engine`: each function runs one analysis
//! over a [`Grammar`] and renders the result into a serializable report with
//! deterministic ordering (rule-id order for rows, ordered maps everywhere
//! else), so serialized output is byte-identical across runs on the same
//! input, wall-clock timing aside.

use crate::engine::{self, LookaheadAnalyzer, RuleGraph, left_recursion, profiler, report};
use crate::exec::ParseExecutor;
use crate::{AnalysisError, DecisionId, Grammar, RuleId, RuleKind};
use bitflags::bitflags;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use crate::engine::complexity::Aggregate as AggregateComplexity;
pub use crate::engine::profiler::Coverage;
pub use crate::engine::report::DecisionSubgraph;
pub use crate::exec::DecisionStats;

/// Options that affect static analysis behavior.
///
/// The `legacy_*` switches restore historically looser behavior for
/// consumers that depend on it; both default to off.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Report lookahead conflicts only for each rule's first decision
    /// instead of all of them.
    pub legacy_first_decision_only: bool,
    /// Classify every dependency cycle as indirect left recursion without
    /// verifying the calls sit in leftmost position.
    pub legacy_cycle_left_recursion: bool,
}

/// Options for one profiling run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileOptions {
    /// Hard per-sample time budget; a sample that exceeds it is skipped and
    /// recorded, never failing the run.
    pub per_sample_timeout: Option<Duration>,
    /// Parse samples on concurrent workers. Output ordering is unaffected.
    pub parallel: bool,
}

bitflags! {
    /// Structural flags summarizing a rule in graph report rows.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RuleFlags: u8 {
        const ENTRY_POINT    = 1 << 0;
        const UNUSED         = 1 << 1;
        const IN_CYCLE       = 1 << 2;
        const LEFT_RECURSIVE = 1 << 3;
        const TRANSFORMED    = 1 << 4;
    }
}

impl RuleFlags {
    /// Flag names in declaration order, for report rendering.
    pub fn names(self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_string()).collect()
    }
}

// --- Rule graph ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRuleRow {
    pub rule: RuleId,
    pub name: String,
    pub kind: RuleKind,
    pub fan_in: usize,
    pub fan_out: usize,
    pub depth: usize,
    pub flags: Vec<String>,
}

/// Dependency structure of the whole grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphReport {
    /// One row per rule, in rule-id order.
    pub rules: Vec<GraphRuleRow>,
    /// Caller → callee edges by name.
    pub edges: Vec<(String, String)>,
    /// Each cycle's member names, ordered.
    pub cycles: Vec<Vec<String>>,
    pub unused: Vec<String>,
}

pub fn analyze_rule_graph(grammar: &Grammar) -> GraphReport {
    let graph = RuleGraph::build(grammar);

    let rules = (0..grammar.rules().len())
        .map(|r| {
            let rule = grammar.rule(r);
            GraphRuleRow {
                rule: r,
                name: rule.name.clone(),
                kind: rule.kind,
                fan_in: graph.fan_in(r),
                fan_out: graph.fan_out(r),
                depth: graph.depth(r),
                flags: rule_flags(grammar, &graph, r).names(),
            }
        })
        .collect();

    GraphReport {
        rules,
        edges: graph
            .edges()
            .iter()
            .map(|&(from, to)| (grammar.rule(from).name.clone(), grammar.rule(to).name.clone()))
            .collect(),
        cycles: graph.cycles().iter().map(|c| c.iter().map(|&r| grammar.rule(r).name.clone()).collect()).collect(),
        unused: graph.unused_rules().iter().map(|&r| grammar.rule(r).name.clone()).collect(),
    }
}

fn rule_flags(grammar: &Grammar, graph: &RuleGraph, rule: RuleId) -> RuleFlags {
    let mut flags = RuleFlags::empty();
    if grammar.is_entry_point(rule) {
        flags |= RuleFlags::ENTRY_POINT;
    }
    if graph.unused_rules().contains(&rule) {
        flags |= RuleFlags::UNUSED;
    }
    if graph.in_cycle(rule) {
        flags |= RuleFlags::IN_CYCLE;
    }
    if left_recursion::is_directly_left_recursive(grammar, rule) {
        flags |= RuleFlags::LEFT_RECURSIVE;
    }
    if left_recursion::is_transformed(grammar, rule) {
        flags |= RuleFlags::TRANSFORMED;
    }
    flags
}

// --- Left recursion -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeftRecursionRow {
    pub name: String,
    pub direct: bool,
    /// Already rewritten into precedence-climbing form by the grammar
    /// compiler; not an error.
    pub transformed: bool,
    pub precedence_levels: Vec<u32>,
    /// Verified leftmost cycles this rule participates in, by member name.
    pub indirect_cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeftRecursionReport {
    /// Only rules with at least one finding, in rule-id order.
    pub rules: Vec<LeftRecursionRow>,
    pub legacy_cycle_check: bool,
}

pub fn analyze_left_recursion(grammar: &Grammar, options: &Options) -> LeftRecursionReport {
    let graph = RuleGraph::build(grammar);

    let rules = (0..grammar.rules().len())
        .filter_map(|r| {
            let lr = left_recursion::analyze(grammar, &graph, r, options.legacy_cycle_left_recursion);
            if !lr.direct && !lr.transformed && lr.indirect_cycles.is_empty() {
                return None;
            }
            Some(LeftRecursionRow {
                name: grammar.rule(r).name.clone(),
                direct: lr.direct,
                transformed: lr.transformed,
                precedence_levels: lr.precedence_levels,
                indirect_cycles: lr
                    .indirect_cycles
                    .iter()
                    .map(|c| c.iter().map(|&m| grammar.rule(m).name.clone()).collect())
                    .collect(),
            })
        })
        .collect();

    LeftRecursionReport { rules, legacy_cycle_check: options.legacy_cycle_left_recursion }
}

// --- Complexity ---------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleComplexity {
    pub name: String,
    pub kind: RuleKind,
    pub decision_points: usize,
    pub alternative_count: usize,
    pub depth: usize,
    pub fan_in: usize,
    pub fan_out: usize,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityReport {
    /// One row per rule, in rule-id order.
    pub rules: Vec<RuleComplexity>,
    pub aggregate: AggregateComplexity,
}

pub fn analyze_complexity(grammar: &Grammar) -> ComplexityReport {
    let graph = RuleGraph::build(grammar);
    let per_rule: Vec<_> =
        (0..grammar.rules().len()).map(|r| (r, engine::complexity::analyze_rule(grammar, &graph, r))).collect();
    let aggregate = engine::complexity::aggregate(grammar, &per_rule);

    let rules = per_rule
        .iter()
        .map(|&(r, m)| RuleComplexity {
            name: grammar.rule(r).name.clone(),
            kind: grammar.rule(r).kind,
            decision_points: m.decision_points,
            alternative_count: m.alternative_count,
            depth: m.depth,
            fan_in: m.fan_in,
            fan_out: m.fan_out,
            recursive: m.recursive,
        })
        .collect();

    ComplexityReport { rules, aggregate }
}

// --- Lookahead ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleLookahead {
    pub name: String,
    /// Rendered FIRST set, e.g. `{NUMBER, LPAREN}`.
    pub first: String,
    /// Rendered FOLLOW set.
    pub follow: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionConflicts {
    pub decision: DecisionId,
    pub rule: String,
    /// One rendered lookahead per alternative, in alternative order;
    /// predicate-gated alternatives render as `dynamic`.
    pub alternatives: Vec<String>,
    /// Alternative index pairs whose lookaheads overlap.
    pub conflicts: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookaheadReport {
    /// Parser rules in rule-id order.
    pub rules: Vec<RuleLookahead>,
    /// Every decision in decision-id order.
    pub decisions: Vec<DecisionConflicts>,
    /// Number of decisions with at least one conflict.
    pub conflicted: usize,
}

pub fn analyze_lookahead(grammar: &Grammar, options: &Options) -> Result<LookaheadReport, AnalysisError> {
    let analyzer = LookaheadAnalyzer::new(grammar);

    let rules = (0..grammar.rules().len())
        .filter(|&r| grammar.rule(r).kind == RuleKind::Parser)
        .map(|r| RuleLookahead {
            name: grammar.rule(r).name.clone(),
            first: analyzer.first(r).display(grammar),
            follow: analyzer.follow(r).display(grammar),
        })
        .collect();

    // Under the legacy switch only each rule's first decision contributes
    // conflicts; all lookahead sets are still reported.
    let mut first_decision_of: BTreeMap<RuleId, DecisionId> = BTreeMap::new();
    for dp in grammar.decision_points() {
        first_decision_of.entry(dp.rule).or_insert(dp.decision);
    }

    let mut decisions = Vec::new();
    let mut conflicted = 0;
    for dp in grammar.decision_points() {
        let alternatives = analyzer
            .decision_lookaheads(dp.decision)?
            .iter()
            .map(|la| match la {
                engine::Lookahead::Tokens(set) => set.display(grammar),
                engine::Lookahead::Dynamic => "dynamic".to_string(),
            })
            .collect();

        let suppressed =
            options.legacy_first_decision_only && first_decision_of.get(&dp.rule) != Some(&dp.decision);
        let conflicts = if suppressed { Vec::new() } else { analyzer.conflicts(dp.decision)? };
        if !conflicts.is_empty() {
            conflicted += 1;
        }

        decisions.push(DecisionConflicts {
            decision: dp.decision,
            rule: grammar.rule(dp.rule).name.clone(),
            alternatives,
            conflicts,
        });
    }

    Ok(LookaheadReport { rules, decisions, conflicted })
}

// --- Decision graphs ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionGraphReport {
    /// Bounded subgraphs in decision-id order.
    pub decisions: Vec<DecisionSubgraph>,
}

/// Extract the visualization subgraph of every decision, or only those of
/// the named rule.
pub fn decision_graph(grammar: &Grammar, rule: Option<&str>) -> Result<DecisionGraphReport, AnalysisError> {
    let filter = match rule {
        Some(name) => Some(grammar.require_rule(name)?),
        None => None,
    };

    let mut decisions = Vec::new();
    for dp in grammar.decision_points() {
        if filter.is_some_and(|r| r != dp.rule) {
            continue;
        }
        decisions.push(report::decision_subgraph(grammar, dp.decision)?);
    }
    Ok(DecisionGraphReport { decisions })
}

// --- Runtime ambiguity --------------------------------------------------------

/// Runtime findings for one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleAmbiguity {
    pub name: String,
    /// Decisions of this rule with at least one proven tie.
    pub decisions: Vec<DecisionId>,
    /// Tie events attributed to this rule.
    pub ambiguity_count: usize,
    pub events: Vec<profiler::ProfiledEvent>,
}

/// Aggregated result of [`detect_ambiguities`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbiguityReport {
    /// Entry rule the samples were parsed against.
    pub rule: String,
    pub samples_total: usize,
    pub samples_succeeded: usize,
    pub samples_failed: usize,
    /// Samples that produced no parse at all (timeouts, executor errors).
    pub skipped: Vec<(usize, AnalysisError)>,
    /// Merged per-decision prediction statistics.
    pub decisions: Vec<DecisionStats>,
    /// Rules with proven ties, in name order.
    pub rules: Vec<RuleAmbiguity>,
    /// Tie events across all samples and rules.
    pub total_ambiguities: usize,
    /// Wall-clock time of the profiling run.
    pub elapsed: Duration,
    /// Parser rules visited versus declared.
    pub coverage: Coverage,
    pub uncovered_rules: Vec<String>,
    pub ambiguous: bool,
}

/// Parse `samples` through `executor` starting at the named rule and report
/// every runtime-proven ambiguity. Per-sample failures are recorded in the
/// report; only a missing rule fails the operation itself.
pub fn detect_ambiguities(
    grammar: &Grammar,
    rule: &str,
    samples: &[String],
    executor: Arc<dyn ParseExecutor>,
    options: &ProfileOptions,
) -> Result<AmbiguityReport, AnalysisError> {
    let entry = grammar.require_rule(rule)?;
    let outcome = profiler::profile(grammar, entry, samples, &executor, options);

    let mut by_rule: BTreeMap<String, RuleAmbiguity> = BTreeMap::new();
    for event in &outcome.events {
        let entry = by_rule
            .entry(event.rule_name.clone())
            .or_insert_with(|| RuleAmbiguity {
                name: event.rule_name.clone(),
                decisions: Vec::new(),
                ambiguity_count: 0,
                events: Vec::new(),
            });
        if !entry.decisions.contains(&event.decision) {
            entry.decisions.push(event.decision);
        }
        entry.ambiguity_count += 1;
        entry.events.push(event.clone());
    }

    Ok(AmbiguityReport {
        rule: rule.to_string(),
        samples_total: outcome.samples_total,
        samples_succeeded: outcome.samples_succeeded,
        samples_failed: outcome.samples_failed,
        skipped: outcome.skipped,
        decisions: outcome.decisions,
        rules: by_rule.into_values().collect(),
        total_ambiguities: outcome.total_ambiguities,
        elapsed: outcome.elapsed,
        coverage: outcome.coverage,
        uncovered_rules: outcome.uncovered_rules.iter().map(|&r| grammar.rule(r).name.clone()).collect(),
        ambiguous: !outcome.events.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;

    #[test]
    fn graph_report_flags_entry_and_cycles() {
        let g = grammars::dangling_else();
        let report = analyze_rule_graph(&g);

        let stat = report.rules.iter().find(|r| r.name == "stat").unwrap();
        assert!(stat.flags.contains(&"ENTRY_POINT".to_string()));
        assert!(report.edges.contains(&("stat".to_string(), "expr".to_string())));
        assert!(report.unused.is_empty());
    }

    #[test]
    fn lookahead_report_counts_conflicted_decisions() {
        let g = grammars::dangling_else();
        let report = analyze_lookahead(&g, &Options::default()).unwrap();

        assert_eq!(report.conflicted, 1);
        let stat = report.decisions.iter().find(|d| d.rule == "stat").unwrap();
        assert_eq!(stat.conflicts, vec![(0, 1)]);
        assert_eq!(stat.alternatives.len(), 3);
    }

    #[test]
    fn legacy_switch_suppresses_later_decisions_only() {
        let g = grammars::arithmetic();
        let strict = analyze_lookahead(&g, &Options::default()).unwrap();
        let legacy =
            analyze_lookahead(&g, &Options { legacy_first_decision_only: true, ..Default::default() }).unwrap();

        // Arithmetic has one decision per rule, so the switch changes nothing.
        assert_eq!(strict.conflicted, legacy.conflicted);
        assert_eq!(strict.decisions.len(), legacy.decisions.len());
    }

    #[test]
    fn complexity_report_row_order_matches_rule_ids() {
        let g = grammars::arithmetic();
        let report = analyze_complexity(&g);
        let names: Vec<&str> = report.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["expr", "term", "factor"]);
        assert_eq!(report.aggregate.parser_rules, 3);
    }

    #[test]
    fn decision_graph_filters_by_rule() {
        let g = grammars::arithmetic();
        let all = decision_graph(&g, None).unwrap();
        assert_eq!(all.decisions.len(), g.decision_count());

        let only_expr = decision_graph(&g, Some("expr")).unwrap();
        assert_eq!(only_expr.decisions.len(), 1);
        assert_eq!(only_expr.decisions[0].rule_name, "expr");

        assert!(matches!(decision_graph(&g, Some("nope")), Err(AnalysisError::RuleNotFound { .. })));
    }

    #[test]
    fn detect_ambiguities_reports_the_dangling_else() {
        let g = grammars::dangling_else();
        let exec: Arc<dyn ParseExecutor> = Arc::new(grammars::dangling_else_executor());
        let samples = vec!["if x then if y then a else b".to_string(), "x".to_string()];

        let report = detect_ambiguities(&g, "stat", &samples, exec, &ProfileOptions::default()).unwrap();
        assert!(report.ambiguous);
        assert_eq!(report.rules.len(), 1);
        assert_eq!(report.rules[0].name, "stat");
        assert_eq!(report.rules[0].ambiguity_count, report.rules[0].events.len());
        assert_eq!(report.total_ambiguities, report.rules[0].ambiguity_count);
        assert!(report.total_ambiguities >= 1);
        assert!(report.elapsed > Duration::ZERO);
        assert_eq!(report.coverage, Coverage { visited: 2, declared: 2 });
        assert_eq!(report.samples_succeeded, 2);
        assert!(report.uncovered_rules.is_empty());
    }

    #[test]
    fn serialized_reports_are_byte_identical_across_runs() {
        let g = grammars::dangling_else();
        let exec: Arc<dyn ParseExecutor> = Arc::new(grammars::dangling_else_executor());
        let samples = vec!["if x then if y then a else b".to_string()];

        let render = || {
            let mut ambiguity =
                detect_ambiguities(&g, "stat", &samples, Arc::clone(&exec), &ProfileOptions::default()).unwrap();
            // Wall-clock time is the one nondeterministic field.
            ambiguity.elapsed = Duration::ZERO;
            let mut out = serde_json::to_string(&analyze_rule_graph(&g)).unwrap();
            out.push_str(&serde_json::to_string(&analyze_lookahead(&g, &Options::default()).unwrap()).unwrap());
            out.push_str(&serde_json::to_string(&analyze_complexity(&g)).unwrap());
            out.push_str(&serde_json::to_string(&ambiguity).unwrap());
            out
        };

        assert_eq!(render(), render());
    }
}
