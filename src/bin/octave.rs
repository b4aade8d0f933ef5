//! Command-line entry point.
//!
//! Loads a program from an S-expression file (or stdin), applies the flag
//! surface onto a runtime configuration, runs to completion, and prints the
//! run summary as JSON. Exit codes: 0 success, 2 validation error, 3
//! runtime guard failure, 4 I/O failure.

use clap::Parser;
use octave::prelude::*;
use octave::snapshot::SnapshotError;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_VALIDATION: u8 = 2;
const EXIT_GUARD: u8 = 3;
const EXIT_IO: u8 = 4;

/// Run an octave program from an S-expression file.
#[derive(Debug, Parser)]
#[command(name = "octave", version, about)]
struct Cli {
    /// Path to the program source, or `-` for stdin.
    program: String,

    /// Validate the program and exit without stepping.
    #[arg(long)]
    dry_run: bool,

    /// Write runtime events to a JSONL file.
    #[arg(long, value_name = "PATH")]
    trace_jsonl: Option<PathBuf>,

    /// Automatically schedule child terms for rewriting.
    #[arg(long)]
    walk_children: bool,

    /// Disable the child walk (overrides a stored snapshot setting).
    #[arg(long, conflicts_with = "walk_children")]
    no_walk_children: bool,

    /// Depth bound for the child walk.
    #[arg(long, value_name = "N")]
    walk_depth: Option<usize>,

    /// Fail fast when multiple rules match the same term.
    #[arg(long)]
    strict_matching: bool,

    /// Disable strict matching (overrides a stored snapshot setting).
    #[arg(long, conflicts_with = "strict_matching")]
    no_strict_matching: bool,

    /// Reject programs whose rule patterns deterministically overlap.
    #[arg(long)]
    detect_conflicts: bool,

    /// Per-symbol signature file (JSON), enforced on every insertion.
    #[arg(long, value_name = "PATH")]
    signature: Option<PathBuf>,

    /// Cap on unique store entries.
    #[arg(long, value_name = "N")]
    max_terms: Option<usize>,

    /// Override the program's step budget for this invocation.
    #[arg(long, value_name = "N")]
    max_steps: Option<usize>,

    /// Write the runtime snapshot to a JSON file after the run.
    #[arg(long, value_name = "PATH")]
    store_json: Option<PathBuf>,

    /// Resume from a snapshot written by --store-json.
    #[arg(long, value_name = "PATH")]
    load_store: Option<PathBuf>,

    /// Run for the step budget without waiting for the scheduler to idle.
    #[arg(long)]
    steps_only: bool,

    /// Rewrite scheduling strategy.
    #[arg(long, value_name = "fifo|lifo|random")]
    scheduler: Option<String>,

    /// Seed for the random scheduler.
    #[arg(long, value_name = "N")]
    scheduler_seed: Option<u64>,

    /// Per-rule fire budget, as name=N. Repeatable.
    #[arg(long, value_name = "NAME=N")]
    rule_budget: Vec<String>,

    /// Only fire the named rule. Repeatable.
    #[arg(long, value_name = "NAME")]
    only_rule: Vec<String>,

    /// Never fire the named rule. Repeatable.
    #[arg(long, value_name = "NAME")]
    skip_rule: Vec<String>,

    /// Only rewrite terms at the given scale. Repeatable.
    #[arg(long, value_name = "N")]
    only_scale: Vec<u32>,

    /// Never rewrite terms at the given scale. Repeatable.
    #[arg(long, value_name = "N")]
    skip_scale: Vec<u32>,
}

/// Failure carrying its process exit code.
#[derive(Debug)]
struct CliError {
    code: u8,
    message: String,
}

impl CliError {
    fn validation(message: impl ToString) -> Self {
        Self { code: EXIT_VALIDATION, message: message.to_string() }
    }

    fn guard(message: impl ToString) -> Self {
        Self { code: EXIT_GUARD, message: message.to_string() }
    }

    fn io(message: impl ToString) -> Self {
        Self { code: EXIT_IO, message: message.to_string() }
    }
}

impl From<SnapshotError> for CliError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Io(_) => CliError::io(err),
            _ => CliError::validation(err),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    ExitCode::from(run_cli(Cli::parse()))
}

fn run_cli(cli: Cli) -> u8 {
    match execute(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("octave: {}", err.message);
            err.code
        }
    }
}

fn read_program_source(path: &str) -> Result<String, CliError> {
    if path == "-" {
        let mut src = String::new();
        std::io::stdin()
            .read_to_string(&mut src)
            .map_err(|err| CliError::io(format!("reading stdin: {}", err)))?;
        return Ok(src);
    }
    fs::read_to_string(path).map_err(|err| CliError::io(format!("reading {}: {}", path, err)))
}

fn load_signature(path: &PathBuf) -> Result<Signature, CliError> {
    let text = fs::read_to_string(path)
        .map_err(|err| CliError::io(format!("reading {}: {}", path.display(), err)))?;
    let payload: serde_json::Value =
        serde_json::from_str(&text).map_err(CliError::validation)?;
    Signature::from_json(&payload).map_err(CliError::validation)
}

fn parse_rule_budgets(specs: &[String]) -> Result<BTreeMap<String, usize>, CliError> {
    let mut budgets = BTreeMap::new();
    for spec in specs {
        let (name, count) = spec
            .split_once('=')
            .ok_or_else(|| CliError::validation(format!("rule budget must be NAME=N: {}", spec)))?;
        let count: usize = count
            .parse()
            .map_err(|_| CliError::validation(format!("rule budget count must be an integer: {}", spec)))?;
        budgets.insert(name.to_string(), count);
    }
    Ok(budgets)
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig, CliError> {
    Ok(RuntimeConfig {
        walk_children: cli.walk_children,
        walk_depth: cli.walk_depth,
        strict_matching: cli.strict_matching,
        detect_conflicts: cli.detect_conflicts,
        rule_budgets: parse_rule_budgets(&cli.rule_budget)?,
        max_terms: cli.max_terms,
        include_rules: if cli.only_rule.is_empty() {
            None
        } else {
            Some(cli.only_rule.iter().cloned().collect())
        },
        exclude_rules: cli.skip_rule.iter().cloned().collect(),
        include_scales: if cli.only_scale.is_empty() {
            None
        } else {
            Some(cli.only_scale.iter().copied().collect())
        },
        exclude_scales: cli.skip_scale.iter().copied().collect::<BTreeSet<u32>>(),
    })
}

fn scheduler_kind(cli: &Cli) -> Result<Option<SchedulerKind>, CliError> {
    cli.scheduler
        .as_deref()
        .map(|name| name.parse::<SchedulerKind>().map_err(CliError::validation))
        .transpose()
}

fn execute(cli: &Cli) -> Result<u8, CliError> {
    let src = read_program_source(&cli.program)?;
    let mut program = parse_program(&src).map_err(CliError::validation)?;
    if let Some(path) = &cli.signature {
        program.signature = Some(load_signature(path)?);
    }
    validate_program(&program).map_err(CliError::validation)?;

    let config = build_config(cli)?;
    let kind = scheduler_kind(cli)?;

    if cli.dry_run {
        let report = serde_json::json!({
            "program": program.name,
            "valid": true,
            "rules": program.rules.iter().map(|r| r.name.clone()).collect::<Vec<_>>(),
            "max_steps": program.max_steps,
            "max_terms": program.max_terms,
            "fingerprint": program.fingerprint().short_hex(),
        });
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return Ok(0);
    }

    let mut runtime = match &cli.load_store {
        Some(path) => {
            let snapshot = Snapshot::load(path)?;
            let overrides = ResumeOverrides {
                scheduler: kind,
                scheduler_seed: cli.scheduler_seed,
                walk_children: if cli.walk_children {
                    Some(true)
                } else if cli.no_walk_children {
                    Some(false)
                } else {
                    None
                },
                walk_depth: cli.walk_depth,
                strict_matching: if cli.strict_matching {
                    Some(true)
                } else if cli.no_strict_matching {
                    Some(false)
                } else {
                    None
                },
            };
            resume_runtime(&snapshot, program.rules.clone(), program.signature.clone(), &overrides)?
        }
        None => {
            let options = RunOptions {
                config,
                scheduler: kind,
                scheduler_seed: cli.scheduler_seed,
                steps_only: cli.steps_only,
                max_steps: cli.max_steps,
            };
            Interpreter::new().prepare(&program, &options).map_err(|err| match err {
                octave::RunError::Validation(inner) => CliError::validation(inner),
                octave::RunError::Load(inner) => match inner {
                    octave::StoreError::TermLimitExhausted { .. } => CliError::guard(inner),
                    other => CliError::validation(other),
                },
                octave::RunError::Step(inner) => CliError::guard(inner),
            })?
        }
    };

    if let Some(path) = &cli.trace_jsonl {
        let file = fs::File::create(path)
            .map_err(|err| CliError::io(format!("creating {}: {}", path.display(), err)))?;
        runtime.add_tracer(Box::new(JsonlTracer::new(file)));
    }

    let max_steps = cli.max_steps.unwrap_or(program.max_steps);
    let run_result = if cli.steps_only {
        runtime.run(max_steps)
    } else {
        runtime.run_until_idle(max_steps)
    };

    // Guard failures still get a summary and, when requested, a resumable
    // snapshot; only the exit code distinguishes them.
    let (code, guard_message) = match &run_result {
        Ok(RunOutcome::TermLimitExhausted) => (EXIT_GUARD, None),
        Ok(_) => (0, None),
        Err(err) => (EXIT_GUARD, Some(err.to_string())),
    };

    if let Some(path) = &cli.store_json {
        runtime.snapshot().save(path)?;
    }

    let summary = runtime.summary(&program.name);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary)
            .map_err(|err| CliError::io(format!("rendering summary: {}", err)))?
    );
    if let Some(message) = guard_message {
        eprintln!("octave: {}", message);
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_program(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("program.oct");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
        path
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("octave").chain(args.iter().copied()))
    }

    const ROUND_TRIP: &str = "(program demo
        (root A)
        (rules
          (rule up (pattern :sym A) (action expand :fanout 1))
          (rule down (pattern :sym F(A)) (action reduce)))
        (max_steps 2))";

    #[test]
    fn successful_run_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        assert_eq!(run_cli(cli(&[program.to_str().unwrap()])), 0);
    }

    #[test]
    fn dry_run_validates_without_stepping() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        assert_eq!(run_cli(cli(&[program.to_str().unwrap(), "--dry-run"])), 0);
    }

    #[test]
    fn parse_failure_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, "(root (A");
        assert_eq!(run_cli(cli(&[program.to_str().unwrap()])), EXIT_VALIDATION);
    }

    #[test]
    fn missing_file_exits_four() {
        assert_eq!(run_cli(cli(&["/nonexistent/program.oct"])), EXIT_IO);
    }

    #[test]
    fn strict_ambiguity_exits_three_with_no_events() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(
            &dir,
            "(program twin
               (root X)
               (rules
                 (rule a (pattern :sym X :scale 0) (action expand :fanout 1))
                 (rule b (pattern :sym X :scale 0) (action expand :fanout 1)))
               (max_steps 4))",
        );
        let trace = dir.path().join("events.jsonl");
        let code = run_cli(cli(&[
            program.to_str().unwrap(),
            "--strict-matching",
            "--trace-jsonl",
            trace.to_str().unwrap(),
        ]));
        assert_eq!(code, EXIT_GUARD);
        assert_eq!(fs::read_to_string(&trace).unwrap(), "");
    }

    #[test]
    fn first_rule_wins_without_strict() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(
            &dir,
            "(program twin
               (root X)
               (rules
                 (rule a (pattern :sym X :scale 0) (action expand :fanout 1))
                 (rule b (pattern :sym X :scale 0) (action expand :fanout 1)))
               (max_steps 1))",
        );
        assert_eq!(run_cli(cli(&[program.to_str().unwrap()])), 0);
    }

    #[test]
    fn detect_conflicts_rejects_overlap_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(
            &dir,
            "(program twin
               (root X)
               (rules
                 (rule a (pattern :sym X) (action expand :fanout 1))
                 (rule b (pattern :sym X) (action reduce)))
               (max_steps 1))",
        );
        let code = run_cli(cli(&[program.to_str().unwrap(), "--detect-conflicts"]));
        assert_eq!(code, EXIT_VALIDATION);
    }

    #[test]
    fn term_cap_exits_three_with_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(
            &dir,
            "(program fanout
               (root R)
               (rules (rule grow (pattern :sym R) (action expand :fanout 3)))
               (max_steps 8))",
        );
        let store = dir.path().join("state.json");
        let code = run_cli(cli(&[
            program.to_str().unwrap(),
            "--max-terms",
            "3",
            "--store-json",
            store.to_str().unwrap(),
        ]));
        assert_eq!(code, EXIT_GUARD);
        let snapshot = Snapshot::load(&store).unwrap();
        assert!(snapshot.term_limit_exhausted);
        assert_eq!(snapshot.store.len(), 3);
    }

    #[test]
    fn rule_budget_caps_fires() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(
            &dir,
            "(program endless
               (root seed)
               (rules (rule grow (pattern :scale 0) (action expand :fanout 1)))
               (max_steps 64))",
        );
        // Without the budget the program would stop only via scale.
        let code = run_cli(cli(&[program.to_str().unwrap(), "--rule-budget", "grow=2"]));
        assert_eq!(code, 0);
    }

    #[test]
    fn malformed_rule_budget_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        let code = run_cli(cli(&[program.to_str().unwrap(), "--rule-budget", "grow"]));
        assert_eq!(code, EXIT_VALIDATION);
    }

    #[test]
    fn overlapping_filters_exit_two() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        let code = run_cli(cli(&[
            program.to_str().unwrap(),
            "--only-rule",
            "up",
            "--skip-rule",
            "up",
        ]));
        assert_eq!(code, EXIT_VALIDATION);
    }

    #[test]
    fn snapshot_resume_continues_the_run() {
        let dir = tempfile::tempdir().unwrap();
        // A ladder of per-scale rules so every pop keeps firing.
        let mut rules = String::new();
        for i in 0..=10 {
            rules.push_str(&format!(
                "(rule r{i} (pattern :scale {i}) (action expand :fanout 1)) "
            ));
        }
        let program = write_program(
            &dir,
            &format!("(program ladder (root seed) (rules {rules}) (max_steps 1))"),
        );
        let store = dir.path().join("state.json");
        assert_eq!(
            run_cli(cli(&[
                program.to_str().unwrap(),
                "--store-json",
                store.to_str().unwrap(),
            ])),
            0
        );
        let first = Snapshot::load(&store).unwrap();
        assert_eq!(first.frontier.len(), 1);
        assert_eq!(first.store.len(), 3);

        let resumed = dir.path().join("resumed.json");
        assert_eq!(
            run_cli(cli(&[
                program.to_str().unwrap(),
                "--load-store",
                store.to_str().unwrap(),
                "--max-steps",
                "10",
                "--store-json",
                resumed.to_str().unwrap(),
            ])),
            0
        );
        // One step then ten more: eleven expansions deep, the same store an
        // uninterrupted eleven-step run of this ladder produces.
        let second = Snapshot::load(&resumed).unwrap();
        assert_eq!(second.store.len(), 23);
        assert_eq!(second.processed.len(), 11);
        assert_eq!(second.frontier.len(), 1);
    }

    #[test]
    fn signature_violation_at_load_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        let signature = dir.path().join("signature.json");
        fs::write(
            &signature,
            r#"{"symbols": {"A": {"min_children": 2}}}"#,
        )
        .unwrap();
        let code = run_cli(cli(&[
            program.to_str().unwrap(),
            "--signature",
            signature.to_str().unwrap(),
        ]));
        assert_eq!(code, EXIT_VALIDATION);
    }

    #[test]
    fn trace_jsonl_records_each_event() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        let trace = dir.path().join("events.jsonl");
        assert_eq!(
            run_cli(cli(&[
                program.to_str().unwrap(),
                "--trace-jsonl",
                trace.to_str().unwrap(),
            ])),
            0
        );
        let lines: Vec<String> =
            fs::read_to_string(&trace).unwrap().lines().map(String::from).collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["rule"], "up");
    }

    #[test]
    fn random_scheduler_needs_known_kind() {
        let dir = tempfile::tempdir().unwrap();
        let program = write_program(&dir, ROUND_TRIP);
        let code = run_cli(cli(&[program.to_str().unwrap(), "--scheduler", "priority"]));
        assert_eq!(code, EXIT_VALIDATION);
        let ok = run_cli(cli(&[
            program.to_str().unwrap(),
            "--scheduler",
            "random",
            "--scheduler-seed",
            "7",
        ]));
        assert_eq!(ok, 0);
    }
}
