//! Programs and their validation.
//!
//! A program is a declarative bundle: a root term, an ordered rule list,
//! a step budget, and optional guards (term cap, per-rule budgets, rule and
//! scale filters, signature, structural constraints). Validation catches
//! malformed programs before any stepping begins; the `Interpreter` is a
//! thin orchestration layer that builds a runtime, drives it, and captures
//! the outcome together with a resumable snapshot.

use crate::fingerprint::{fingerprint_program, Fingerprint};
use crate::metrics::{validate_structure, StructuralConstraints};
use crate::rewrite::Rule;
use crate::runtime::{Event, RunOutcome, Runtime, RuntimeConfig, StepError, Summary};
use crate::scheduler::{make_scheduler, SchedulerKind};
use crate::signature::{Signature, SignatureError};
use crate::snapshot::{Snapshot, SnapshotError};
use crate::store::{StoreError, TermStore};
use crate::term::{Term, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Default step budget for programs that do not declare one.
pub const DEFAULT_MAX_STEPS: usize = 256;

/// Declarative description of a rewriting program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Program name, echoed in summaries.
    pub name: String,
    /// Initial root term.
    pub root: Term,
    /// Ordered rule list; names are unique.
    pub rules: Vec<Rule>,
    /// Step budget; positive.
    pub max_steps: usize,
    /// Cap on unique store entries.
    #[serde(default)]
    pub max_terms: Option<usize>,
    /// Per-rule fire budgets.
    #[serde(default)]
    pub rule_budgets: BTreeMap<String, usize>,
    /// Allowlist of rule names.
    #[serde(default)]
    pub include_rules: Option<BTreeSet<String>>,
    /// Blocklist of rule names.
    #[serde(default)]
    pub exclude_rules: BTreeSet<String>,
    /// Allowlist of scales.
    #[serde(default)]
    pub include_scales: Option<BTreeSet<u32>>,
    /// Blocklist of scales.
    #[serde(default)]
    pub exclude_scales: BTreeSet<u32>,
    /// Optional per-symbol signature, enforced on every insertion.
    #[serde(default)]
    pub signature: Option<Signature>,
    /// Optional structural bounds on the root tree.
    #[serde(default)]
    pub constraints: Option<StructuralConstraints>,
}

impl Program {
    /// Creates a program with the default step budget and no guards.
    pub fn new(name: impl Into<String>, root: Term, rules: Vec<Rule>) -> Self {
        Self {
            name: name.into(),
            root,
            rules,
            max_steps: DEFAULT_MAX_STEPS,
            max_terms: None,
            rule_budgets: BTreeMap::new(),
            include_rules: None,
            exclude_rules: BTreeSet::new(),
            include_scales: None,
            exclude_scales: BTreeSet::new(),
            signature: None,
            constraints: None,
        }
    }

    /// Returns a copy using a different root term.
    pub fn with_root(mut self, root: Term) -> Self {
        self.root = root;
        self
    }

    /// Sets the step budget.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the term cap.
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = Some(max_terms);
        self
    }

    /// Attaches a signature.
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Attaches structural constraints.
    pub fn with_constraints(mut self, constraints: StructuralConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Deterministic digest over the whole program.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_program(self)
    }
}

/// Error raised while validating a program or configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two rules share a name.
    DuplicateRuleName { name: String },
    /// A quantity that must be positive was zero.
    NonPositive { what: &'static str },
    /// A rule budget of zero would never fire.
    ZeroRuleBudget { rule: String },
    /// A rule name appears in both the include and exclude sets.
    RuleFilterOverlap { names: Vec<String> },
    /// A scale appears in both the include and exclude sets.
    ScaleFilterOverlap { scales: Vec<u32> },
    /// A filter names rules the program does not define.
    UnknownFilterRules { names: Vec<String> },
    /// Conflict detection found deterministically overlapping patterns.
    ConflictingRules { pairs: Vec<(String, String)> },
    /// The root term violates the program's signature.
    Signature(SignatureError),
    /// The root term violates the structural constraints.
    StructureViolations { violations: Vec<String> },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateRuleName { name } => {
                write!(f, "duplicate rule name: {}", name)
            }
            ValidationError::NonPositive { what } => {
                write!(f, "{} must be positive when provided", what)
            }
            ValidationError::ZeroRuleBudget { rule } => {
                write!(f, "rule budget for {} must be positive", rule)
            }
            ValidationError::RuleFilterOverlap { names } => {
                write!(f, "rules cannot be both included and excluded: {}", names.join(", "))
            }
            ValidationError::ScaleFilterOverlap { scales } => {
                let rendered: Vec<String> = scales.iter().map(|s| s.to_string()).collect();
                write!(f, "scales cannot be both included and excluded: {}", rendered.join(", "))
            }
            ValidationError::UnknownFilterRules { names } => {
                write!(f, "filtered rules not found: {}", names.join(", "))
            }
            ValidationError::ConflictingRules { pairs } => {
                let rendered: Vec<String> =
                    pairs.iter().map(|(a, b)| format!("{}/{}", a, b)).collect();
                write!(f, "conflicting rule patterns detected: {}", rendered.join(", "))
            }
            ValidationError::Signature(err) => write!(f, "signature violation: {}", err),
            ValidationError::StructureViolations { violations } => {
                write!(f, "structural constraints violated: {}", violations.join("; "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<SignatureError> for ValidationError {
    fn from(err: SignatureError) -> Self {
        ValidationError::Signature(err)
    }
}

/// Sanity checks run before any stepping begins.
///
/// Covers the step budget, the term cap, rule name uniqueness, the root
/// against the signature, and the root against structural constraints.
/// Filter and budget checks against the rule list happen in
/// [`RuntimeConfig::validate`], which the runtime constructor runs.
pub fn validate_program(program: &Program) -> Result<(), ValidationError> {
    if program.max_steps == 0 {
        return Err(ValidationError::NonPositive { what: "max_steps" });
    }
    if program.max_terms == Some(0) {
        return Err(ValidationError::NonPositive { what: "max_terms" });
    }
    let mut seen = BTreeSet::new();
    for rule in &program.rules {
        if !seen.insert(rule.name.as_str()) {
            return Err(ValidationError::DuplicateRuleName { name: rule.name.clone() });
        }
    }
    if let Some(signature) = &program.signature {
        signature.validate_tree(&program.root)?;
    }
    if let Some(constraints) = &program.constraints {
        let violations = validate_structure(&program.root, constraints);
        if !violations.is_empty() {
            return Err(ValidationError::StructureViolations { violations });
        }
    }
    Ok(())
}

/// Options controlling one interpreter invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Guard and walk configuration; merged over the program's own guards.
    pub config: RuntimeConfig,
    /// Scheduling strategy.
    pub scheduler: Option<SchedulerKind>,
    /// Seed for the random strategy.
    pub scheduler_seed: Option<u64>,
    /// Drive until idle (default) or for a bounded number of pops.
    pub steps_only: bool,
    /// Overrides the program's step budget for this invocation.
    pub max_steps: Option<usize>,
}

/// Error raised while running a program end to end.
#[derive(Debug)]
pub enum RunError {
    /// The program or configuration failed validation.
    Validation(ValidationError),
    /// The root term failed to intern.
    Load(StoreError),
    /// A step failed fatally.
    Step(StepError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Validation(err) => write!(f, "validation error: {}", err),
            RunError::Load(err) => write!(f, "load error: {}", err),
            RunError::Step(err) => write!(f, "runtime error: {}", err),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ValidationError> for RunError {
    fn from(err: ValidationError) -> Self {
        RunError::Validation(err)
    }
}

/// Captured result of a completed run.
#[derive(Debug)]
pub struct Execution {
    /// Interned root id.
    pub root_id: TermId,
    /// Why the run halted.
    pub outcome: RunOutcome,
    /// Applied rewrites in step order.
    pub events: Vec<Event>,
    /// Run summary.
    pub summary: Summary,
    /// Resumable state captured after the final step.
    pub snapshot: Snapshot,
    /// Program fingerprint the run was produced from.
    pub fingerprint: Fingerprint,
}

impl Execution {
    /// The last produced term id, or the root when no rule fired.
    pub fn final_term_id(&self) -> TermId {
        self.events
            .last()
            .and_then(|event| event.after.last().copied())
            .unwrap_or(self.root_id)
    }

    /// Rehydrates a store from the captured snapshot.
    pub fn materialize_store(&self) -> Result<TermStore, SnapshotError> {
        self.snapshot.rebuild_store(None)
    }

    /// Materializes the final term from the captured snapshot.
    pub fn materialize_final(&self) -> Result<Term, SnapshotError> {
        let store = self.materialize_store()?;
        store
            .materialize(self.final_term_id())
            .map_err(|err| SnapshotError::Corrupt(err.to_string()))
    }
}

/// Thin orchestration layer around the runtime and scheduler.
#[derive(Debug, Default)]
pub struct Interpreter;

impl Interpreter {
    /// Creates an interpreter.
    pub fn new() -> Self {
        Self
    }

    /// Builds a loaded runtime for a program without driving it.
    ///
    /// Callers that need custom action handlers register them on the
    /// returned runtime before stepping.
    pub fn prepare(&self, program: &Program, options: &RunOptions) -> Result<Runtime, RunError> {
        validate_program(program)?;

        let mut config = options.config.clone();
        if config.max_terms.is_none() {
            config.max_terms = program.max_terms;
        }
        for (name, budget) in &program.rule_budgets {
            config.rule_budgets.entry(name.clone()).or_insert(*budget);
        }
        if config.include_rules.is_none() {
            config.include_rules = program.include_rules.clone();
        }
        if config.exclude_rules.is_empty() {
            config.exclude_rules = program.exclude_rules.clone();
        }
        if config.include_scales.is_none() {
            config.include_scales = program.include_scales.clone();
        }
        if config.exclude_scales.is_empty() {
            config.exclude_scales = program.exclude_scales.clone();
        }

        let kind = options.scheduler.unwrap_or(SchedulerKind::Fifo);
        let scheduler = make_scheduler(kind, options.scheduler_seed);
        let mut runtime =
            Runtime::new(program.rules.clone(), config, scheduler, program.signature.clone())?;
        runtime.load(&program.root).map_err(RunError::Load)?;
        Ok(runtime)
    }

    /// Runs a program to completion and captures the outcome.
    pub fn run(&self, program: &Program, options: &RunOptions) -> Result<Execution, RunError> {
        let mut runtime = self.prepare(program, options)?;
        let max_steps = options.max_steps.unwrap_or(program.max_steps);
        let outcome = if options.steps_only {
            runtime.run(max_steps)
        } else {
            runtime.run_until_idle(max_steps)
        }
        .map_err(RunError::Step)?;

        Ok(Execution {
            root_id: runtime.root().expect("loaded runtime has a root"),
            outcome,
            events: runtime.events().to_vec(),
            summary: runtime.summary(&program.name),
            snapshot: runtime.snapshot(),
            fingerprint: program.fingerprint(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::{Action, Pattern};

    fn coherence_program() -> Program {
        Program::new(
            "round-trip",
            Term::leaf("A", 0),
            vec![
                Rule::new("up", Pattern::for_sym("A"), Action::Expand { fanout: 1 }),
                Rule::new("down", Pattern::for_sym("F(A)"), Action::Reduce),
            ],
        )
        .with_max_steps(2)
    }

    #[test]
    fn run_captures_events_and_summary() {
        let execution = Interpreter::new()
            .run(&coherence_program(), &RunOptions::default())
            .unwrap();
        assert_eq!(execution.events.len(), 2);
        assert_eq!(execution.summary.events, 2);
        assert!(execution.summary.idle);
        assert_eq!(execution.final_term_id(), execution.root_id);
    }

    #[test]
    fn materialize_final_reaches_through_snapshot() {
        let execution = Interpreter::new()
            .run(&coherence_program(), &RunOptions::default())
            .unwrap();
        assert_eq!(execution.materialize_final().unwrap(), Term::leaf("A", 0));
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let program = coherence_program().with_max_steps(0);
        assert!(matches!(
            validate_program(&program),
            Err(ValidationError::NonPositive { what: "max_steps" })
        ));
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let mut program = coherence_program();
        program.rules.push(Rule::new("up", Pattern::for_sym("B"), Action::Reduce));
        assert!(matches!(
            validate_program(&program),
            Err(ValidationError::DuplicateRuleName { .. })
        ));
    }

    #[test]
    fn signature_is_checked_against_root_at_load() {
        use crate::signature::SymbolSignature;
        let signature = Signature::new([(
            "A".to_string(),
            SymbolSignature { min_children: 1, max_children: None, scales: None },
        )])
        .unwrap();
        let program = coherence_program().with_signature(signature);
        assert!(matches!(
            validate_program(&program),
            Err(ValidationError::Signature(SignatureError::TooFewChildren { .. }))
        ));
    }

    #[test]
    fn constraints_are_checked_against_root() {
        let constraints = StructuralConstraints { max_nodes: Some(0), ..Default::default() };
        let program = coherence_program().with_constraints(constraints);
        assert!(matches!(
            validate_program(&program),
            Err(ValidationError::StructureViolations { .. })
        ));
    }

    #[test]
    fn program_guards_merge_into_options() {
        let mut program = coherence_program();
        program.rule_budgets.insert("up".to_string(), 1);
        let execution = Interpreter::new().run(&program, &RunOptions::default()).unwrap();
        assert_eq!(execution.summary.rule_counts.get("up"), Some(&1));
    }

    #[test]
    fn steps_only_bounds_pop_iterations() {
        let options = RunOptions { steps_only: true, max_steps: Some(1), ..Default::default() };
        let execution = Interpreter::new().run(&coherence_program(), &options).unwrap();
        assert_eq!(execution.events.len(), 1);
        assert!(execution.summary.budget_exhausted);
    }

    #[test]
    fn fingerprints_are_stable_across_runs() {
        let a = Interpreter::new().run(&coherence_program(), &RunOptions::default()).unwrap();
        let b = Interpreter::new().run(&coherence_program(), &RunOptions::default()).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
    }
}
