mod debug_report;

use debug_report::AnalysisBundle;
use gramscope::grammars;
use gramscope::{
    Grammar, Options, ParseExecutor, ProfileOptions, analyze_complexity, analyze_left_recursion, analyze_lookahead,
    analyze_rule_graph, detect_ambiguities,
};
use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_GRAMMAR: &str = "dangling-else";

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let (grammar, executor) = match config.grammar.as_str() {
        "arith" => (grammars::arithmetic(), Arc::new(grammars::arithmetic_executor()) as Arc<dyn ParseExecutor>),
        "dangling-else" => {
            (grammars::dangling_else(), Arc::new(grammars::dangling_else_executor()) as Arc<dyn ParseExecutor>)
        }
        other => {
            eprintln!("error: unknown grammar '{other}' (expected 'arith' or 'dangling-else')");
            std::process::exit(2);
        }
    };

    match run(&grammar, executor, &config) {
        Ok(bundle) => debug_report::print_run(&config.grammar, &bundle, config.color),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(
    grammar: &Grammar,
    executor: Arc<dyn ParseExecutor>,
    config: &CliConfig,
) -> Result<AnalysisBundle, gramscope::AnalysisError> {
    let options = Options {
        legacy_first_decision_only: config.legacy_first_decision_only,
        legacy_cycle_left_recursion: config.legacy_cycle_left_recursion,
    };

    let ambiguity = if config.samples.is_empty() {
        None
    } else {
        let rule = match &config.rule {
            Some(name) => name.clone(),
            // Entry points are ordered; the first one is the conventional start rule.
            None => match grammar.entry_points().iter().next() {
                Some(&r) => grammar.rule(r).name.clone(),
                None => grammar.rule(0).name.clone(),
            },
        };
        let profile = ProfileOptions {
            per_sample_timeout: config.timeout_ms.map(Duration::from_millis),
            parallel: config.parallel,
        };
        Some(detect_ambiguities(grammar, &rule, &config.samples, executor, &profile)?)
    };

    Ok(AnalysisBundle {
        graph: analyze_rule_graph(grammar),
        left_recursion: analyze_left_recursion(grammar, &options),
        complexity: analyze_complexity(grammar),
        lookahead: analyze_lookahead(grammar, &options)?,
        ambiguity,
    })
}

struct CliConfig {
    grammar: String,
    rule: Option<String>,
    samples: Vec<String>,
    timeout_ms: Option<u64>,
    parallel: bool,
    legacy_first_decision_only: bool,
    legacy_cycle_left_recursion: bool,
    color: bool,
}

fn parse_args() -> Result<CliConfig, String> {
    let mut config = CliConfig {
        grammar: DEFAULT_GRAMMAR.to_string(),
        rule: None,
        samples: Vec::new(),
        timeout_ms: None,
        parallel: false,
        legacy_first_decision_only: false,
        legacy_cycle_left_recursion: false,
        color: io::stdout().is_terminal(),
    };
    let mut read_stdin = true;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("gramscope {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--color" => config.color = true,
            "--no-color" => config.color = false,
            "--parallel" => config.parallel = true,
            "--legacy-first-decision-only" => config.legacy_first_decision_only = true,
            "--legacy-cycle-left-recursion" => config.legacy_cycle_left_recursion = true,
            "--no-samples" => read_stdin = false,
            "--grammar" | "-g" => {
                config.grammar = args.next().ok_or_else(|| "error: --grammar expects a value".to_string())?;
            }
            "--rule" | "-r" => {
                config.rule = Some(args.next().ok_or_else(|| "error: --rule expects a value".to_string())?);
            }
            "--sample" | "-s" => {
                let value = args.next().ok_or_else(|| "error: --sample expects a value".to_string())?;
                config.samples.push(value);
            }
            "--timeout-ms" => {
                let value = args.next().ok_or_else(|| "error: --timeout-ms expects a value".to_string())?;
                config.timeout_ms =
                    Some(value.parse().map_err(|_| format!("error: invalid --timeout-ms '{value}'"))?);
            }
            "--" => {
                let rest = args.collect::<Vec<_>>().join(" ");
                if !rest.trim().is_empty() {
                    config.samples.push(rest);
                }
                break;
            }
            _ if arg.starts_with("--grammar=") => {
                config.grammar = arg.trim_start_matches("--grammar=").to_string();
            }
            _ if arg.starts_with("--rule=") => {
                config.rule = Some(arg.trim_start_matches("--rule=").to_string());
            }
            _ if arg.starts_with("--sample=") => {
                config.samples.push(arg.trim_start_matches("--sample=").to_string());
            }
            _ if arg.starts_with("--timeout-ms=") => {
                let value = arg.trim_start_matches("--timeout-ms=");
                config.timeout_ms =
                    Some(value.parse().map_err(|_| format!("error: invalid --timeout-ms '{value}'"))?);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                let rest = std::iter::once(arg).chain(args).collect::<Vec<_>>().join(" ");
                config.samples.push(rest);
                break;
            }
        }
    }

    // Piped input supplies one sample per line when none were given on the
    // command line.
    if config.samples.is_empty() && read_stdin && !io::stdin().is_terminal() {
        for line in read_stdin_input()?.lines() {
            if !line.trim().is_empty() {
                config.samples.push(line.to_string());
            }
        }
    }

    Ok(config)
}

fn read_stdin_input() -> Result<String, String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(|err| format!("error: failed to read stdin: {err}"))?;
    Ok(buffer)
}

fn help_text() -> String {
    format!(
        "gramscope {version}

Grammar automaton analysis CLI.

Usage:
  gramscope [OPTIONS] [--] [sample...]
  gramscope [OPTIONS] --sample <text> --sample <text>

Options:
  -g, --grammar <name>           Built-in grammar to analyze: 'arith' or
                                 'dangling-else'. Default: {default_grammar}
  -r, --rule <name>              Entry rule for ambiguity profiling.
                                 Default: the grammar's first entry point.
  -s, --sample <text>            Sample input to profile (repeatable).
                                 Trailing arguments form one sample; piped
                                 stdin supplies one sample per line.
  --no-samples                   Do not read samples from stdin.
  --timeout-ms <n>               Per-sample time budget in milliseconds.
  --parallel                     Profile samples on concurrent workers.
  --legacy-first-decision-only   Report lookahead conflicts only for each
                                 rule's first decision.
  --legacy-cycle-left-recursion  Treat every dependency cycle as left
                                 recursion without leftmost verification.
  --color                        Force ANSI color output.
  --no-color                     Disable ANSI color output.
  -h, --help                     Show this help message.
  -V, --version                  Print version information.

Exit codes:
  0  Success.
  1  Analysis error.
  2  Invalid arguments.
",
        version = env!("CARGO_PKG_VERSION"),
        default_grammar = DEFAULT_GRAMMAR
    )
}
