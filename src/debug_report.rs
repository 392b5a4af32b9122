use gramscope::{AmbiguityReport, ComplexityReport, GraphReport, LeftRecursionReport, LookaheadReport};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

/// Everything one CLI run produced.
pub struct AnalysisBundle {
    pub graph: GraphReport,
    pub left_recursion: LeftRecursionReport,
    pub complexity: ComplexityReport,
    pub lookahead: LookaheadReport,
    pub ambiguity: Option<AmbiguityReport>,
}

pub fn print_run(grammar_name: &str, bundle: &AnalysisBundle, color: bool) {
    let palette = ansi::Palette::new(color);
    println!("\n{}", palette.bold(palette.paint(format!("⚙  Analyzing grammar: {grammar_name}"), ansi::CYAN)));

    println!("\n{}", palette.paint("━━━ Rule Graph ━━━", ansi::GRAY));
    print_graph(&bundle.graph, &palette);

    println!("\n{}", palette.paint("━━━ Left Recursion ━━━", ansi::GRAY));
    print_left_recursion(&bundle.left_recursion, &palette);

    println!("\n{}", palette.paint("━━━ Complexity ━━━", ansi::GRAY));
    print_complexity(&bundle.complexity, &palette);

    println!("\n{}", palette.paint("━━━ Lookahead ━━━", ansi::GRAY));
    print_lookahead(&bundle.lookahead, &palette);

    if let Some(ambiguity) = &bundle.ambiguity {
        println!("\n{}", palette.paint("━━━ Ambiguity Profile ━━━", ansi::GRAY));
        print_ambiguity(ambiguity, &palette);
    }
    println!();
}

fn print_graph(report: &GraphReport, palette: &ansi::Palette) {
    for row in &report.rules {
        let flags =
            if row.flags.is_empty() { palette.dim("-") } else { palette.paint(row.flags.join(","), ansi::YELLOW) };
        println!(
            "  {} {} {}  {} {}",
            palette.paint(&row.name, ansi::BLUE),
            palette.dim(format!("in:{} out:{}", row.fan_in, row.fan_out)),
            palette.dim(format!("depth:{}", row.depth)),
            palette.dim("│"),
            flags,
        );
    }
    if !report.cycles.is_empty() {
        for cycle in &report.cycles {
            println!("  {} {}", palette.paint("cycle:", ansi::YELLOW), cycle.join(" ↔ "));
        }
    }
    if !report.unused.is_empty() {
        println!("  {} {}", palette.paint("unused:", ansi::YELLOW), report.unused.join(", "));
    }
}

fn print_left_recursion(report: &LeftRecursionReport, palette: &ansi::Palette) {
    if report.rules.is_empty() {
        println!("{}", palette.dim("  No left-recursive rules"));
        return;
    }
    for row in &report.rules {
        let mut kinds = Vec::new();
        if row.direct {
            kinds.push("direct".to_string());
        }
        if row.transformed {
            kinds.push(format!("transformed (levels {:?})", row.precedence_levels));
        }
        for cycle in &row.indirect_cycles {
            kinds.push(format!("indirect via {}", cycle.join(" → ")));
        }
        println!("  {} {}", palette.paint(&row.name, ansi::BLUE), palette.paint(kinds.join("; "), ansi::YELLOW));
    }
}

fn print_complexity(report: &ComplexityReport, palette: &ansi::Palette) {
    for row in &report.rules {
        println!(
            "  {} {} {}{}",
            palette.paint(&row.name, ansi::BLUE),
            palette.dim(format!("decisions:{} alts:{}", row.decision_points, row.alternative_count)),
            palette.dim(format!("depth:{}", row.depth)),
            if row.recursive { palette.paint("  recursive", ansi::YELLOW) } else { String::new() },
        );
    }
    let agg = &report.aggregate;
    println!(
        "  {} {}  {} {}  {} {:.2}",
        palette.dim("total decisions:"),
        palette.paint(agg.total_decision_points.to_string(), ansi::GREEN),
        palette.dim("max depth:"),
        palette.paint(agg.max_depth.to_string(), ansi::GREEN),
        palette.dim("avg alternatives:"),
        agg.average_alternatives,
    );
}

fn print_lookahead(report: &LookaheadReport, palette: &ansi::Palette) {
    for rule in &report.rules {
        println!(
            "  {} {} {}  {} {}",
            palette.paint(&rule.name, ansi::BLUE),
            palette.dim("FIRST"),
            palette.paint(&rule.first, ansi::CYAN),
            palette.dim("FOLLOW"),
            palette.paint(&rule.follow, ansi::CYAN),
        );
    }
    for decision in &report.decisions {
        let status = if decision.conflicts.is_empty() {
            palette.paint("✓ disjoint", ansi::GREEN)
        } else {
            palette.paint(format!("✗ conflicts {:?}", decision.conflicts), ansi::RED)
        };
        println!(
            "  {} {}  {}",
            palette.paint(format!("decision {} ({})", decision.decision, decision.rule), ansi::BLUE),
            palette.dim(decision.alternatives.join("  ")),
            status,
        );
    }
}

fn print_ambiguity(report: &AmbiguityReport, palette: &ansi::Palette) {
    println!(
        "  {} {}  {} {}  {} {}",
        palette.dim("samples:"),
        report.samples_total,
        palette.dim("parsed:"),
        palette.paint(report.samples_succeeded.to_string(), ansi::GREEN),
        palette.dim("failed:"),
        if report.samples_failed > 0 {
            palette.paint(report.samples_failed.to_string(), ansi::YELLOW)
        } else {
            "0".to_string()
        },
    );
    for (index, err) in &report.skipped {
        println!("  {} {}", palette.paint(format!("skipped sample {index}:"), ansi::YELLOW), palette.dim(err.to_string()));
    }
    println!(
        "  {} {}  {} {}/{} rules  {} {:.1?}",
        palette.dim("ambiguities:"),
        if report.total_ambiguities > 0 {
            palette.paint(report.total_ambiguities.to_string(), ansi::RED)
        } else {
            "0".to_string()
        },
        palette.dim("coverage:"),
        report.coverage.visited,
        report.coverage.declared,
        palette.dim("elapsed:"),
        report.elapsed,
    );

    if !report.ambiguous {
        println!("{}", palette.paint("  No ambiguity observed", ansi::GREEN));
        return;
    }
    for rule in &report.rules {
        println!("  {} {}", palette.paint(&rule.name, ansi::BLUE), palette.paint("ambiguous", ansi::RED));
        for event in &rule.events {
            let at = match (event.line, event.column) {
                (Some(line), Some(column)) => format!("{line}:{column}"),
                _ => "?".to_string(),
            };
            println!(
                "    {} {} {} {}",
                palette.paint(format!("sample {} @ {at}", event.sample_index), ansi::YELLOW),
                palette.dim(format!("decision {} alts {:?}", event.decision, event.alternatives)),
                palette.dim("│"),
                palette.dim(format!("\"{}\"", event.text)),
            );
        }
    }
    if !report.uncovered_rules.is_empty() {
        println!("  {} {}", palette.paint("never exercised:", ansi::YELLOW), report.uncovered_rules.join(", "));
    }
}
