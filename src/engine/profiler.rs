//! Runtime ambiguity profiling.
//!
//! Static conflict detection (the lookahead analyzer) can only suspect
//! ambiguity; this module proves it by parsing representative samples through
//! an instrumented [`ParseExecutor`] and collecting the full-context tie
//! events the executor reports. Sample failures never abort a profiling run:
//! a malformed sample is an expected `FailedRecoverable`, a hung or exploding
//! sample is cut off by the per-sample time budget and recorded as skipped.
//!
//! Timeouts are enforced by running each sample on its own worker thread and
//! waiting on a channel with a deadline. A worker that misses its deadline is
//! abandoned, not joined; it holds only clones of the inputs, so the profile
//! result is unaffected by whatever it does afterwards.
//!
//! All aggregation is deterministic: events are ordered by (rule name,
//! decision, sample index, start offset) and statistics are merged through
//! ordered maps, so identical inputs produce byte-identical reports apart
//! from the wall-clock `elapsed` field.

use crate::exec::{DecisionStats, InstrumentedParse, ParseExecutor, ParseOutcome, TokenStream};
use crate::{AnalysisError, DecisionId, Grammar, ProfileOptions, RuleId, RuleKind};
use crossbeam_channel::{RecvTimeoutError, bounded};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One runtime-proven tie, attributed and mapped back to the sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfiledEvent {
    pub sample_index: usize,
    /// Rule owning the conflicted decision.
    pub rule: RuleId,
    pub rule_name: String,
    pub decision: DecisionId,
    pub alternatives: BTreeSet<usize>,
    /// Token span covered by the tie, as offsets into the sample's stream.
    pub start_index: usize,
    pub stop_index: usize,
    /// Source position of the first token of the span, when it exists.
    pub line: Option<u32>,
    pub column: Option<u32>,
    /// Text of the covered span, for human-readable reports.
    pub text: String,
    pub exact: bool,
}

/// Parser-rule coverage of one profiling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Coverage {
    /// Parser rules at least one sample entered.
    pub visited: usize,
    /// Parser rules declared by the grammar.
    pub declared: usize,
}

impl Coverage {
    pub fn ratio(&self) -> f64 {
        if self.declared == 0 { 1.0 } else { self.visited as f64 / self.declared as f64 }
    }
}

/// Aggregated result of one profiling run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileOutcome {
    pub samples_total: usize,
    pub samples_succeeded: usize,
    /// Samples the executor parsed to a recoverable or fatal failure.
    pub samples_failed: usize,
    /// Samples that never produced a parse: timeouts and executor errors.
    pub skipped: Vec<(usize, AnalysisError)>,
    /// Per-decision statistics merged across all parsed samples.
    pub decisions: Vec<DecisionStats>,
    pub events: Vec<ProfiledEvent>,
    /// Tie events across all samples.
    pub total_ambiguities: usize,
    /// Wall-clock time for the whole run, including skipped samples.
    pub elapsed: Duration,
    pub coverage: Coverage,
    pub covered_rules: BTreeSet<RuleId>,
    /// Parser rules no sample ever entered.
    pub uncovered_rules: Vec<RuleId>,
}

impl ProfileOutcome {
    pub fn is_ambiguous(&self) -> bool {
        !self.events.is_empty()
    }
}

type SampleResult = Result<(TokenStream, InstrumentedParse), AnalysisError>;

/// Parse every sample through `executor` starting at `rule` and aggregate
/// the instrumentation. Per-sample problems are recorded, never propagated.
pub fn profile(
    grammar: &Grammar,
    rule: RuleId,
    samples: &[String],
    executor: &Arc<dyn ParseExecutor>,
    options: &ProfileOptions,
) -> ProfileOutcome {
    let started = Instant::now();
    let threaded = options.per_sample_timeout.is_some() || options.parallel;
    let shared: Option<Arc<Grammar>> = threaded.then(|| Arc::new(grammar.clone()));

    let results: Vec<SampleResult> = if let Some(shared) = shared {
        run_threaded(&shared, rule, samples, executor, options)
    } else {
        samples.iter().map(|text| run_sample(grammar, rule, executor.as_ref(), text)).collect()
    };

    aggregate(grammar, rule, results, started.elapsed())
}

fn run_sample(grammar: &Grammar, rule: RuleId, executor: &dyn ParseExecutor, text: &str) -> SampleResult {
    let tokens = executor.tokenize(text)?;
    let parse = executor.instrumented_parse(grammar, rule, &tokens)?;
    Ok((tokens, parse))
}

/// One worker thread per sample; collection waits on each worker's channel
/// with the per-sample deadline. In sequential mode workers are spawned one
/// at a time; in parallel mode all are spawned up front and collected in
/// sample order, so output ordering never depends on scheduling.
fn run_threaded(
    grammar: &Arc<Grammar>,
    rule: RuleId,
    samples: &[String],
    executor: &Arc<dyn ParseExecutor>,
    options: &ProfileOptions,
) -> Vec<SampleResult> {
    let spawn = |index: usize, text: &str| {
        let (tx, rx) = bounded::<SampleResult>(1);
        let worker_tx = tx.clone();
        let grammar = Arc::clone(grammar);
        let executor = Arc::clone(executor);
        let text = text.to_string();
        let spawned = thread::Builder::new().name(format!("profile-sample-{index}")).spawn(move || {
            // The receiver may be gone if the sample timed out.
            let _ = worker_tx.send(run_sample(&grammar, rule, executor.as_ref(), &text));
        });
        if let Err(err) = spawned {
            let _ = tx.send(Err(AnalysisError::Internal { detail: format!("sample {index} worker failed: {err}") }));
        }
        rx
    };

    let collect = |index: usize, rx: crossbeam_channel::Receiver<SampleResult>| -> SampleResult {
        match options.per_sample_timeout {
            Some(budget) => match rx.recv_deadline(Instant::now() + budget) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(AnalysisError::SampleTimeout { sample_index: index }),
                Err(RecvTimeoutError::Disconnected) => {
                    Err(AnalysisError::Internal { detail: format!("sample {index} worker vanished") })
                }
            },
            None => rx
                .recv()
                .map_err(|_| AnalysisError::Internal { detail: format!("sample {index} worker vanished") })?,
        }
    };

    if options.parallel {
        let receivers: Vec<_> = samples.iter().enumerate().map(|(i, text)| spawn(i, text)).collect();
        receivers.into_iter().enumerate().map(|(i, rx)| collect(i, rx)).collect()
    } else {
        samples.iter().enumerate().map(|(i, text)| collect(i, spawn(i, text))).collect()
    }
}

fn aggregate(grammar: &Grammar, rule: RuleId, results: Vec<SampleResult>, elapsed: Duration) -> ProfileOutcome {
    let samples_total = results.len();
    let mut samples_succeeded = 0;
    let mut samples_failed = 0;
    let mut skipped = Vec::new();
    let mut decisions: BTreeMap<DecisionId, DecisionStats> = BTreeMap::new();
    let mut events = Vec::new();
    let mut covered_rules: BTreeSet<RuleId> = BTreeSet::new();

    for (index, result) in results.into_iter().enumerate() {
        let (tokens, parse) = match result {
            Ok(pair) => pair,
            Err(err) => {
                warn!(sample = index, error = %err, "sample skipped");
                skipped.push((index, err));
                continue;
            }
        };

        match parse.outcome {
            ParseOutcome::Succeeded => samples_succeeded += 1,
            ParseOutcome::FailedRecoverable | ParseOutcome::FailedFatal => {
                debug!(sample = index, outcome = ?parse.outcome, "sample did not parse");
                samples_failed += 1;
            }
        }
        covered_rules.extend(parse.visited_rules.iter().copied());

        for stats in parse.decisions {
            let entry = decisions.entry(stats.decision).or_insert(DecisionStats {
                decision: stats.decision,
                invocations: 0,
                max_lookahead: 0,
                fallback_count: 0,
                ambiguities: 0,
            });
            entry.invocations += stats.invocations;
            entry.max_lookahead = entry.max_lookahead.max(stats.max_lookahead);
            entry.fallback_count += stats.fallback_count;
            entry.ambiguities += stats.ambiguities;
        }

        for event in parse.events {
            let owner = match grammar.decision_state(event.decision) {
                Some(state) => state.rule,
                None => rule,
            };
            let (line, column) = match tokens.line_col(event.start_index) {
                Some((l, c)) => (Some(l), Some(c)),
                None => (None, None),
            };
            // Executors may report spans past the end of the stream; clamp
            // both ends before slicing.
            let text = if tokens.is_empty() {
                String::new()
            } else {
                let last = tokens.len() - 1;
                let start = event.start_index.min(last);
                let stop = event.stop_index.min(last).max(start);
                tokens.tokens()[start..=stop]
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            events.push(ProfiledEvent {
                sample_index: index,
                rule: owner,
                rule_name: grammar.rule(owner).name.clone(),
                decision: event.decision,
                alternatives: event.alternatives,
                start_index: event.start_index,
                stop_index: event.stop_index,
                line,
                column,
                text,
                exact: event.exact,
            });
        }
    }

    events.sort_by(|a, b| {
        (&a.rule_name, a.decision, a.sample_index, a.start_index)
            .cmp(&(&b.rule_name, b.decision, b.sample_index, b.start_index))
    });

    let uncovered_rules: Vec<RuleId> = (0..grammar.rules().len())
        .filter(|&r| grammar.rule(r).kind == RuleKind::Parser && !covered_rules.contains(&r))
        .collect();
    let declared =
        (0..grammar.rules().len()).filter(|&r| grammar.rule(r).kind == RuleKind::Parser).count();
    let visited = declared - uncovered_rules.len();

    ProfileOutcome {
        samples_total,
        samples_succeeded,
        samples_failed,
        skipped,
        decisions: decisions.into_values().collect(),
        total_ambiguities: events.len(),
        events,
        elapsed,
        coverage: Coverage { visited, declared },
        covered_rules,
        uncovered_rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars;
    use std::time::Duration;

    fn dangling_setup() -> (Grammar, RuleId, Arc<dyn ParseExecutor>) {
        let g = grammars::dangling_else();
        let rule = g.require_rule("stat").unwrap();
        let exec: Arc<dyn ParseExecutor> = Arc::new(grammars::dangling_else_executor());
        (g, rule, exec)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ambiguous_sample_yields_attributed_events() {
        let (g, rule, exec) = dangling_setup();
        let samples = strings(&["if x then if y then a else b", "x"]);
        let outcome = profile(&g, rule, &samples, &exec, &ProfileOptions::default());

        assert_eq!(outcome.samples_total, 2);
        assert_eq!(outcome.samples_succeeded, 2);
        assert_eq!(outcome.samples_failed, 0);
        assert!(outcome.skipped.is_empty());
        assert!(outcome.is_ambiguous());

        let event = &outcome.events[0];
        assert_eq!(event.rule_name, "stat");
        assert_eq!(event.sample_index, 0);
        assert!(event.alternatives.len() >= 2);
        assert_eq!(event.line, Some(1));
        assert!(event.text.starts_with("if"));

        assert!(outcome.covered_rules.contains(&g.require_rule("expr").unwrap()));
        assert!(outcome.uncovered_rules.is_empty());
    }

    #[test]
    fn malformed_sample_counts_as_failed_not_skipped() {
        let (g, rule, exec) = dangling_setup();
        let samples = strings(&["if x then", "x"]);
        let outcome = profile(&g, rule, &samples, &exec, &ProfileOptions::default());

        assert_eq!(outcome.samples_failed, 1);
        assert_eq!(outcome.samples_succeeded, 1);
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn profiling_is_deterministic() {
        let (g, rule, exec) = dangling_setup();
        let samples = strings(&["if a then if b then c else d", "if a then b", "z"]);

        // Wall-clock time varies between runs; zero it before comparing.
        let mut first = profile(&g, rule, &samples, &exec, &ProfileOptions::default());
        let mut second = profile(&g, rule, &samples, &exec, &ProfileOptions::default());
        first.elapsed = Duration::ZERO;
        second.elapsed = Duration::ZERO;
        assert_eq!(first, second);

        // Parallel collection preserves sample ordering.
        let mut parallel = profile(&g, rule, &samples, &exec, &ProfileOptions { parallel: true, ..Default::default() });
        parallel.elapsed = Duration::ZERO;
        assert_eq!(first, parallel);
    }

    #[test]
    fn aggregation_reports_totals_timing_and_coverage() {
        let (g, rule, exec) = dangling_setup();
        let samples = strings(&["if x then if y then a else b", "x"]);
        let outcome = profile(&g, rule, &samples, &exec, &ProfileOptions::default());

        assert_eq!(outcome.total_ambiguities, outcome.events.len());
        assert!(outcome.total_ambiguities >= 1);
        assert!(outcome.elapsed > Duration::ZERO);
        assert_eq!(outcome.coverage, Coverage { visited: 2, declared: 2 });
    }

    /// Executor that reports a tie span far past the end of the stream.
    struct OverrunningExecutor {
        inner: crate::ReferenceExecutor,
    }

    impl ParseExecutor for OverrunningExecutor {
        fn tokenize(&self, input: &str) -> Result<TokenStream, AnalysisError> {
            self.inner.tokenize(input)
        }

        fn instrumented_parse(
            &self,
            grammar: &Grammar,
            rule: RuleId,
            tokens: &TokenStream,
        ) -> Result<InstrumentedParse, AnalysisError> {
            let mut parse = self.inner.instrumented_parse(grammar, rule, tokens)?;
            parse.events.push(crate::AmbiguityEvent {
                decision: 0,
                alternatives: [0, 1].into_iter().collect(),
                start_index: 999,
                stop_index: 1000,
                exact: false,
            });
            Ok(parse)
        }
    }

    #[test]
    fn out_of_range_event_span_is_clamped() {
        let g = grammars::dangling_else();
        let rule = g.require_rule("stat").unwrap();
        let exec: Arc<dyn ParseExecutor> =
            Arc::new(OverrunningExecutor { inner: grammars::dangling_else_executor() });

        let outcome = profile(&g, rule, &strings(&["x"]), &exec, &ProfileOptions::default());

        assert_eq!(outcome.events.len(), 1);
        let event = &outcome.events[0];
        assert_eq!(event.text, "x");
        assert_eq!(event.line, None);
    }

    /// Executor that hangs on samples with a `slow:` prefix.
    struct StallingExecutor {
        inner: crate::ReferenceExecutor,
    }

    impl ParseExecutor for StallingExecutor {
        fn tokenize(&self, input: &str) -> Result<TokenStream, AnalysisError> {
            match input.strip_prefix("slow:") {
                Some(rest) => {
                    thread::sleep(Duration::from_secs(5));
                    self.inner.tokenize(rest)
                }
                None => self.inner.tokenize(input),
            }
        }

        fn instrumented_parse(
            &self,
            grammar: &Grammar,
            rule: RuleId,
            tokens: &TokenStream,
        ) -> Result<InstrumentedParse, AnalysisError> {
            self.inner.instrumented_parse(grammar, rule, tokens)
        }
    }

    #[test]
    fn timed_out_sample_is_skipped_without_poisoning_the_run() {
        let g = grammars::dangling_else();
        let rule = g.require_rule("stat").unwrap();
        let exec: Arc<dyn ParseExecutor> =
            Arc::new(StallingExecutor { inner: grammars::dangling_else_executor() });

        let samples = strings(&["slow:x", "x"]);
        let options = ProfileOptions { per_sample_timeout: Some(Duration::from_millis(100)), ..Default::default() };
        let outcome = profile(&g, rule, &samples, &exec, &options);

        assert_eq!(outcome.skipped, vec![(0, AnalysisError::SampleTimeout { sample_index: 0 })]);
        assert_eq!(outcome.samples_succeeded, 1);
        assert!(!outcome.is_ambiguous());
    }
}
