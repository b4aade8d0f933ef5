//! The stepping runtime.
//!
//! Single-threaded loop coupling the scheduler, the rule matcher, and the
//! store. Each step pops one frontier id, finds the matching rules under
//! the active guards, applies the first in program order (or reports
//! ambiguity under strict matching), interns the replacement set, and emits
//! one event. Steps are atomic with respect to store, frontier, and event
//! log, so a caller may stop between any two steps and the state remains a
//! valid resume point.
//!
//! # Determinism
//! Event order equals step order equals the scheduler's pop order. Two runs
//! of the same program under the same configuration, seed included, produce
//! identical event sequences modulo timestamps.

use crate::program::ValidationError;
use crate::rewrite::{ActionError, ActionOutcome, ActionRegistry, Rule};
use crate::scheduler::Scheduler;
use crate::signature::{Signature, SignatureError};
use crate::store::{StoreError, TermStore};
use crate::term::{Term, TermId};
use crate::trace::Tracer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// One applied rewrite.
///
/// `after` is the replacement set in action order; under a tripped term cap
/// it holds the ids that were interned before the cap refused the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Ordinal within this run's event log.
    pub step: usize,
    /// Name of the rule that fired.
    pub rule: String,
    /// The rewritten term.
    pub before: TermId,
    /// Replacement ids, in order.
    pub after: Vec<TermId>,
    /// Scale of the rewritten term.
    pub scale: u32,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Opaque scheduler position token, when the strategy keeps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_token: Option<String>,
}

/// Immutable configuration record for a run.
///
/// Constructed once at load and handed to the runtime; there is no
/// process-wide state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Also enqueue children of every newly scheduled term.
    pub walk_children: bool,
    /// Depth bound for the child walk; `None` is unbounded.
    pub walk_depth: Option<usize>,
    /// Report ambiguous matches instead of taking the first rule.
    pub strict_matching: bool,
    /// Reject programs with deterministically overlapping patterns at load.
    pub detect_conflicts: bool,
    /// Remaining fires per rule name.
    pub rule_budgets: BTreeMap<String, usize>,
    /// Cap on unique store entries.
    pub max_terms: Option<usize>,
    /// Allowlist of rule names; `None` admits all.
    pub include_rules: Option<BTreeSet<String>>,
    /// Blocklist of rule names.
    pub exclude_rules: BTreeSet<String>,
    /// Allowlist of scales; `None` admits all.
    pub include_scales: Option<BTreeSet<u32>>,
    /// Blocklist of scales.
    pub exclude_scales: BTreeSet<u32>,
}

impl RuntimeConfig {
    /// Checks the configuration against a rule list.
    ///
    /// Overlapping include/exclude sets, zero budgets, a zero walk depth or
    /// term cap, filters naming unknown rules, and (when conflict detection
    /// is on) overlapping patterns are all load-time errors.
    pub fn validate(&self, rules: &[Rule]) -> Result<(), ValidationError> {
        if self.walk_depth == Some(0) {
            return Err(ValidationError::NonPositive { what: "walk_depth" });
        }
        if self.max_terms == Some(0) {
            return Err(ValidationError::NonPositive { what: "max_terms" });
        }
        for (name, budget) in &self.rule_budgets {
            if *budget == 0 {
                return Err(ValidationError::ZeroRuleBudget { rule: name.clone() });
            }
        }
        if let Some(include) = &self.include_rules {
            let overlap: Vec<String> =
                include.intersection(&self.exclude_rules).cloned().collect();
            if !overlap.is_empty() {
                return Err(ValidationError::RuleFilterOverlap { names: overlap });
            }
        }
        if let Some(include) = &self.include_scales {
            let overlap: Vec<u32> =
                include.intersection(&self.exclude_scales).copied().collect();
            if !overlap.is_empty() {
                return Err(ValidationError::ScaleFilterOverlap { scales: overlap });
            }
        }
        let known: BTreeSet<&str> = rules.iter().map(|rule| rule.name.as_str()).collect();
        let mut missing: Vec<String> = Vec::new();
        if let Some(include) = &self.include_rules {
            missing.extend(include.iter().filter(|n| !known.contains(n.as_str())).cloned());
        }
        missing.extend(
            self.exclude_rules.iter().filter(|n| !known.contains(n.as_str())).cloned(),
        );
        if !missing.is_empty() {
            missing.sort();
            return Err(ValidationError::UnknownFilterRules { names: missing });
        }
        if self.detect_conflicts {
            let conflicts = crate::rewrite::conflicting_rules(rules);
            if !conflicts.is_empty() {
                return Err(ValidationError::ConflictingRules { pairs: conflicts });
            }
        }
        Ok(())
    }

    /// Returns whether a scale passes the include/exclude filters.
    pub fn admits_scale(&self, scale: u32) -> bool {
        if let Some(include) = &self.include_scales {
            if !include.contains(&scale) {
                return false;
            }
        }
        !self.exclude_scales.contains(&scale)
    }

    /// Returns whether a rule name passes the include/exclude filters.
    pub fn admits_rule(&self, name: &str) -> bool {
        if let Some(include) = &self.include_rules {
            if !include.contains(name) {
                return false;
            }
        }
        !self.exclude_rules.contains(name)
    }
}

/// Fatal step failure.
///
/// None of these are retried: the caller reruns with adjusted inputs.
#[derive(Debug)]
pub enum StepError {
    /// More than one rule matched under strict matching.
    AmbiguousMatch { sym: String, scale: u32, rules: Vec<String> },
    /// The signature rejected a mid-run insertion.
    Signature(SignatureError),
    /// A custom action failed or was unregistered.
    Action(ActionError),
    /// Store-level failure other than the term cap.
    Store(StoreError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::AmbiguousMatch { sym, scale, rules } => write!(
                f,
                "ambiguous match for term {} at scale {}: {}",
                sym,
                scale,
                rules.join(", ")
            ),
            StepError::Signature(err) => write!(f, "signature violation: {}", err),
            StepError::Action(err) => write!(f, "action failure: {}", err),
            StepError::Store(err) => write!(f, "store failure: {}", err),
        }
    }
}

impl std::error::Error for StepError {}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The frontier was empty.
    Idle,
    /// The popped term's scale was filtered out; does not count as a step.
    SkippedScale { id: TermId },
    /// No rule matched (or the selected action declined); counts as a step.
    NoMatch { id: TermId },
    /// A rule fired.
    Applied(Event),
}

/// Why a run halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The frontier drained.
    Idle,
    /// The step budget ran out with work still pending.
    BudgetExhausted,
    /// The term cap tripped.
    TermLimitExhausted,
}

/// The stepping runtime.
///
/// Owns the store, the scheduler, and all guard state. Single-threaded and
/// cooperative: the caller drives it one step (or one bounded run) at a
/// time and may snapshot between any two steps.
pub struct Runtime {
    pub(crate) store: TermStore,
    pub(crate) rules: Vec<Rule>,
    pub(crate) registry: ActionRegistry,
    pub(crate) scheduler: Box<dyn Scheduler>,
    pub(crate) config: RuntimeConfig,
    pub(crate) root: Option<TermId>,
    pub(crate) queued: HashSet<TermId>,
    pub(crate) processed: BTreeSet<TermId>,
    pub(crate) events: Vec<Event>,
    pub(crate) tracers: Vec<Box<dyn Tracer>>,
    pub(crate) rule_counts: BTreeMap<String, usize>,
    pub(crate) scale_counts: BTreeMap<u32, usize>,
    pub(crate) rule_budget_remaining: BTreeMap<String, usize>,
    pub(crate) rule_budget_exhausted: BTreeSet<String>,
    pub(crate) budget_exhausted: bool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("rules", &self.rules.len())
            .field("store_size", &self.store.len())
            .field("frontier", &self.scheduler.len())
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Creates a runtime from rules, configuration, and a scheduler.
    ///
    /// The configuration is validated against the rules up front; nothing
    /// about it changes afterwards.
    pub fn new(
        rules: Vec<Rule>,
        config: RuntimeConfig,
        scheduler: Box<dyn Scheduler>,
        signature: Option<Signature>,
    ) -> Result<Self, ValidationError> {
        config.validate(&rules)?;
        let store = TermStore::with_guards(signature, config.max_terms);
        let rule_budget_remaining = config.rule_budgets.clone();
        Ok(Self {
            store,
            rules,
            registry: ActionRegistry::new(),
            scheduler,
            config,
            root: None,
            queued: HashSet::new(),
            processed: BTreeSet::new(),
            events: Vec::new(),
            tracers: Vec::new(),
            rule_counts: BTreeMap::new(),
            scale_counts: BTreeMap::new(),
            rule_budget_remaining,
            rule_budget_exhausted: BTreeSet::new(),
            budget_exhausted: false,
        })
    }

    /// Registers a custom action handler.
    pub fn register_action(
        &mut self,
        name: impl Into<String>,
        handler: Box<dyn crate::rewrite::ActionHandler>,
    ) {
        self.registry.register(name, handler);
    }

    /// Attaches a tracer sink.
    pub fn add_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracers.push(tracer);
    }

    /// Interns the root term and seeds the frontier.
    ///
    /// Resets all per-run state first, so a runtime can be reloaded. The
    /// root tree passes through the signature and term cap like any other
    /// insertion.
    pub fn load(&mut self, root: &Term) -> Result<TermId, StoreError> {
        self.store =
            TermStore::with_guards(self.store.signature().cloned(), self.config.max_terms);
        self.reset_run_state();
        let id = self.store.intern(root)?;
        self.root = Some(id);
        self.schedule_tree(id, 0);
        Ok(id)
    }

    fn reset_run_state(&mut self) {
        self.scheduler.clear();
        self.queued.clear();
        self.processed.clear();
        self.events.clear();
        self.rule_counts.clear();
        self.scale_counts.clear();
        self.rule_budget_remaining = self.config.rule_budgets.clone();
        self.rule_budget_exhausted.clear();
        self.budget_exhausted = false;
        self.root = None;
    }

    /// Enqueues an id unless it is already queued or processed.
    pub(crate) fn schedule_term(&mut self, id: TermId) {
        if self.processed.contains(&id) || self.queued.contains(&id) {
            return;
        }
        self.scheduler.push(id);
        self.queued.insert(id);
    }

    /// Enqueues an id and, under `walk_children`, its descendants down to
    /// the configured depth.
    pub(crate) fn schedule_tree(&mut self, id: TermId, depth: usize) {
        self.schedule_term(id);
        if !self.config.walk_children {
            return;
        }
        if let Some(limit) = self.config.walk_depth {
            if depth >= limit {
                return;
            }
        }
        let children: Vec<TermId> = match self.store.children_of(id) {
            Ok(children) => children.to_vec(),
            Err(_) => return,
        };
        for child in children {
            self.schedule_tree(child, depth + 1);
        }
    }

    /// Performs one step.
    ///
    /// Pops a frontier id, matches rules under the active guards, applies
    /// the first match, interns the replacements, and emits one event. The
    /// popped term is marked processed regardless of whether a rule fired.
    pub fn step(&mut self) -> Result<StepOutcome, StepError> {
        let Some(id) = self.scheduler.pop() else {
            return Ok(StepOutcome::Idle);
        };
        self.queued.remove(&id);
        let term = self.store.materialize(id).map_err(StepError::Store)?;
        self.processed.insert(id);

        if !self.config.admits_scale(term.scale) {
            return Ok(StepOutcome::SkippedScale { id });
        }

        let (rule_name, action) = {
            let candidates: Vec<&Rule> = self
                .rules
                .iter()
                .filter(|rule| self.config.admits_rule(&rule.name))
                .filter(|rule| self.rule_budget_remaining.get(&rule.name) != Some(&0))
                .filter(|rule| rule.applies(&term))
                .collect();
            match candidates.len() {
                0 => return Ok(StepOutcome::NoMatch { id }),
                1 => {}
                _ if self.config.strict_matching => {
                    return Err(StepError::AmbiguousMatch {
                        sym: term.sym.clone(),
                        scale: term.scale,
                        rules: candidates.iter().map(|rule| rule.name.clone()).collect(),
                    });
                }
                _ => {}
            }
            let chosen = candidates[0];
            (chosen.name.clone(), chosen.action.clone())
        };

        let replacements = match action.apply(&term, &self.registry) {
            Ok(ActionOutcome::Replaced(terms)) => terms,
            Ok(ActionOutcome::NotApplicable) => return Ok(StepOutcome::NoMatch { id }),
            Err(err) => return Err(StepError::Action(err)),
        };

        let mut after = Vec::with_capacity(replacements.len());
        let mut cap_tripped = false;
        for replacement in &replacements {
            match self.store.intern(replacement) {
                Ok(rid) => after.push(rid),
                Err(StoreError::TermLimitExhausted { .. }) => {
                    cap_tripped = true;
                    break;
                }
                Err(StoreError::Signature(err)) => return Err(StepError::Signature(err)),
                Err(other) => return Err(StepError::Store(other)),
            }
        }

        *self.rule_counts.entry(rule_name.clone()).or_insert(0) += 1;
        *self.scale_counts.entry(term.scale).or_insert(0) += 1;
        if let Some(remaining) = self.rule_budget_remaining.get_mut(&rule_name) {
            *remaining -= 1;
            if *remaining == 0 {
                self.rule_budget_exhausted.insert(rule_name.clone());
            }
        }

        let event = Event {
            step: self.events.len(),
            rule: rule_name,
            before: id,
            after: after.clone(),
            scale: term.scale,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            scheduler_token: self.scheduler.state_token(),
        };
        self.events.push(event.clone());
        self.emit(&event);

        if !cap_tripped {
            for rid in after {
                self.schedule_tree(rid, 0);
            }
        }
        Ok(StepOutcome::Applied(event))
    }

    /// Drives the loop until the frontier drains, the step budget runs out,
    /// or a guard trips.
    ///
    /// `max_steps` counts pops that were not scale-filtered. Guard errors
    /// (ambiguity, mid-run signature violations) surface as `Err`; the
    /// event log and store remain consistent for summary and snapshot.
    pub fn run_until_idle(&mut self, max_steps: usize) -> Result<RunOutcome, StepError> {
        let mut steps = 0;
        loop {
            if steps >= max_steps {
                if self.scheduler.is_empty() {
                    return Ok(RunOutcome::Idle);
                }
                self.budget_exhausted = true;
                debug!(steps, "step budget exhausted with pending frontier");
                return Ok(RunOutcome::BudgetExhausted);
            }
            match self.step()? {
                StepOutcome::Idle => return Ok(RunOutcome::Idle),
                StepOutcome::SkippedScale { .. } => {}
                StepOutcome::NoMatch { .. } | StepOutcome::Applied(_) => steps += 1,
            }
            if self.store.term_limit_exhausted() {
                debug!("term limit exhausted; halting");
                return Ok(RunOutcome::TermLimitExhausted);
            }
        }
    }

    /// Drives at most `max_steps` pop iterations, idle or not.
    ///
    /// Unlike [`Runtime::run_until_idle`] every iteration consumes budget,
    /// which makes the cost of a call predictable for callers that
    /// interleave stepping with other work.
    pub fn run(&mut self, max_steps: usize) -> Result<RunOutcome, StepError> {
        for _ in 0..max_steps {
            match self.step()? {
                StepOutcome::Idle => {
                    self.budget_exhausted = false;
                    return Ok(RunOutcome::Idle);
                }
                _ => {}
            }
            if self.store.term_limit_exhausted() {
                return Ok(RunOutcome::TermLimitExhausted);
            }
        }
        self.budget_exhausted = !self.scheduler.is_empty();
        if self.budget_exhausted {
            Ok(RunOutcome::BudgetExhausted)
        } else {
            Ok(RunOutcome::Idle)
        }
    }

    /// Fans an event out to every tracer, detaching sinks that fail.
    fn emit(&mut self, event: &Event) {
        let mut failed = Vec::new();
        for (index, tracer) in self.tracers.iter_mut().enumerate() {
            if let Err(err) = tracer.record(event) {
                warn!(%err, "tracer sink failed; detaching");
                failed.push(index);
            }
        }
        for index in failed.into_iter().rev() {
            self.tracers.remove(index);
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// The term store.
    pub fn store(&self) -> &TermStore {
        &self.store
    }

    /// The root id, once loaded.
    pub fn root(&self) -> Option<TermId> {
        self.root
    }

    /// The event log for this run.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The configuration record.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Pending frontier ids in scheduler order.
    pub fn frontier(&self) -> Vec<TermId> {
        self.scheduler.pending()
    }

    /// Ids already rewritten in this run.
    pub fn processed(&self) -> &BTreeSet<TermId> {
        &self.processed
    }

    /// Fire counts per rule.
    pub fn rule_counts(&self) -> &BTreeMap<String, usize> {
        &self.rule_counts
    }

    /// Fire counts per scale.
    pub fn scale_counts(&self) -> &BTreeMap<u32, usize> {
        &self.scale_counts
    }

    /// Rules whose budget has reached zero.
    pub fn rule_budget_exhausted(&self) -> &BTreeSet<String> {
        &self.rule_budget_exhausted
    }

    /// Whether the last run stopped on the step budget.
    pub fn budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }

    /// Whether the term cap has tripped.
    pub fn term_limit_exhausted(&self) -> bool {
        self.store.term_limit_exhausted()
    }

    /// Builds the run summary.
    pub fn summary(&self, program: &str) -> Summary {
        Summary {
            program: program.to_string(),
            root: self.root,
            scheduler: self.scheduler.kind(),
            scheduler_seed: self.scheduler.seed(),
            walk_children: self.config.walk_children,
            walk_depth: self.config.walk_depth,
            strict_matching: self.config.strict_matching,
            detect_conflicts: self.config.detect_conflicts,
            max_terms: self.config.max_terms,
            events: self.events.len(),
            rule_counts: self.rule_counts.clone(),
            scale_counts: self.scale_counts.clone(),
            rule_budget_exhausted: self.rule_budget_exhausted.iter().cloned().collect(),
            term_limit_exhausted: self.store.term_limit_exhausted(),
            idle: self.scheduler.is_empty(),
            budget_exhausted: self.budget_exhausted,
            frontier: self.scheduler.pending(),
            store_size: self.store.len(),
        }
    }
}

/// Run summary emitted on stdout after a run.
///
/// Echoes the effective configuration alongside the counters so a summary
/// alone is enough to rerun the program identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Program name.
    pub program: String,
    /// Root id, when a program was loaded.
    pub root: Option<TermId>,
    /// Scheduler strategy in effect.
    pub scheduler: crate::scheduler::SchedulerKind,
    /// Seed, for the random strategy.
    pub scheduler_seed: Option<u64>,
    /// Child-walk flag in effect.
    pub walk_children: bool,
    /// Child-walk depth bound in effect.
    pub walk_depth: Option<usize>,
    /// Strict-matching flag in effect.
    pub strict_matching: bool,
    /// Conflict-detection flag in effect.
    pub detect_conflicts: bool,
    /// Term cap in effect.
    pub max_terms: Option<usize>,
    /// Number of applied rewrites.
    pub events: usize,
    /// Fires per rule.
    pub rule_counts: BTreeMap<String, usize>,
    /// Fires per scale.
    pub scale_counts: BTreeMap<u32, usize>,
    /// Rules that ran out of budget, sorted.
    pub rule_budget_exhausted: Vec<String>,
    /// Whether the term cap tripped.
    pub term_limit_exhausted: bool,
    /// Whether the frontier is empty.
    pub idle: bool,
    /// Whether the last run stopped on the step budget.
    pub budget_exhausted: bool,
    /// Pending frontier ids.
    pub frontier: Vec<TermId>,
    /// Unique terms in the store.
    pub store_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::{Action, Pattern};
    use crate::scheduler::{make_scheduler, SchedulerKind};
    use crate::trace::VecTracer;

    fn expand_reduce_rules() -> Vec<Rule> {
        vec![
            Rule::new("up", Pattern::for_sym("A"), Action::Expand { fanout: 1 }),
            Rule::new("down", Pattern::for_sym("F(A)"), Action::Reduce),
        ]
    }

    fn fifo_runtime(rules: Vec<Rule>, config: RuntimeConfig) -> Runtime {
        Runtime::new(rules, config, make_scheduler(SchedulerKind::Fifo, None), None).unwrap()
    }

    #[test]
    fn coherence_round_trip_fires_up_then_down() {
        let mut rt = fifo_runtime(expand_reduce_rules(), RuntimeConfig::default());
        let root = rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(2).unwrap();
        let rules: Vec<&str> = rt.events().iter().map(|e| e.rule.as_str()).collect();
        assert_eq!(rules, vec!["up", "down"]);
        assert!(rt.frontier().is_empty());
        // Hash-consing reuses the root id for the reduction target.
        assert_eq!(rt.events()[1].after, vec![root]);
        // A@0, F(A)@1, and the synthesized motif A.0@1.
        assert_eq!(rt.store().len(), 3);
    }

    #[test]
    fn no_term_is_rewritten_twice() {
        let mut rt = fifo_runtime(expand_reduce_rules(), RuntimeConfig::default());
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(64).unwrap();
        let before_ids: Vec<TermId> = rt.events().iter().map(|e| e.before).collect();
        let unique: std::collections::BTreeSet<TermId> = before_ids.iter().copied().collect();
        assert_eq!(before_ids.len(), unique.len());
    }

    #[test]
    fn strict_matching_reports_ambiguity() {
        let rules = vec![
            Rule::new("one", Pattern::for_sym("X").at_scale(0), Action::Expand { fanout: 1 }),
            Rule::new("two", Pattern::for_sym("X").at_scale(0), Action::Expand { fanout: 1 }),
        ];
        let config = RuntimeConfig { strict_matching: true, ..RuntimeConfig::default() };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("X", 0)).unwrap();
        let err = rt.run_until_idle(8).unwrap_err();
        assert!(matches!(err, StepError::AmbiguousMatch { ref rules, .. } if rules.len() == 2));
        assert!(rt.events().is_empty());
    }

    #[test]
    fn lenient_matching_takes_first_in_program_order() {
        let rules = vec![
            Rule::new("one", Pattern::for_sym("X").at_scale(0), Action::Expand { fanout: 1 }),
            Rule::new("two", Pattern::for_sym("X").at_scale(0), Action::Expand { fanout: 1 }),
        ];
        let mut rt = fifo_runtime(rules, RuntimeConfig::default());
        rt.load(&Term::leaf("X", 0)).unwrap();
        rt.run_until_idle(1).unwrap();
        assert_eq!(rt.events().len(), 1);
        assert_eq!(rt.events()[0].rule, "one");
    }

    #[test]
    fn rule_budget_limits_fires_and_is_reported() {
        // One self-feeding rule: every F^n(seed) keeps matching.
        let rules = vec![Rule::new("grow", Pattern::default(), Action::Expand { fanout: 1 })];
        let config = RuntimeConfig {
            rule_budgets: BTreeMap::from([("grow".to_string(), 2)]),
            ..RuntimeConfig::default()
        };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("seed", 0)).unwrap();
        rt.run_until_idle(64).unwrap();
        assert_eq!(rt.rule_counts().get("grow"), Some(&2));
        assert!(rt.rule_budget_exhausted().contains("grow"));
        assert!(rt.frontier().is_empty());
    }

    #[test]
    fn term_cap_halts_with_partial_event() {
        let rules = vec![Rule::new("grow", Pattern::for_sym("R"), Action::Expand { fanout: 3 })];
        let config = RuntimeConfig { max_terms: Some(3), ..RuntimeConfig::default() };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("R", 0)).unwrap();
        let outcome = rt.run_until_idle(16).unwrap();
        assert_eq!(outcome, RunOutcome::TermLimitExhausted);
        assert!(rt.term_limit_exhausted());
        assert_eq!(rt.store().len(), 3);
        assert_eq!(rt.events().len(), 1);
    }

    #[test]
    fn scale_filters_suppress_matching_without_counting() {
        let rules = vec![Rule::new("up", Pattern::for_sym("A"), Action::Expand { fanout: 1 })];
        let config =
            RuntimeConfig { exclude_scales: BTreeSet::from([0]), ..RuntimeConfig::default() };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("A", 0)).unwrap();
        let outcome = rt.run_until_idle(1).unwrap();
        assert_eq!(outcome, RunOutcome::Idle);
        assert!(rt.events().is_empty());
        assert_eq!(rt.scale_counts().len(), 0);
    }

    #[test]
    fn rule_filters_suppress_excluded_rules() {
        let rules = vec![
            Rule::new("up", Pattern::for_sym("A"), Action::Expand { fanout: 1 }),
            Rule::new("noop", Pattern::for_sym("A").with_max_children(0), Action::Reduce),
        ];
        let config = RuntimeConfig {
            exclude_rules: BTreeSet::from(["up".to_string()]),
            ..RuntimeConfig::default()
        };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(8).unwrap();
        assert!(rt.events().is_empty(), "reduce declines, up is excluded");
    }

    #[test]
    fn include_filter_admits_only_listed_rules() {
        let rules = vec![
            Rule::new("up", Pattern::for_sym("A"), Action::Expand { fanout: 1 }),
            Rule::new("down", Pattern::for_sym("F(A)"), Action::Reduce),
        ];
        let config = RuntimeConfig {
            include_rules: Some(BTreeSet::from(["up".to_string()])),
            ..RuntimeConfig::default()
        };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(8).unwrap();
        // up fires once; down never appears in the event log.
        assert!(rt.events().iter().all(|e| e.rule == "up"));
        assert_eq!(rt.events().len(), 1);
    }

    #[test]
    fn walk_children_enqueues_subterms() {
        let rules = vec![Rule::new("up", Pattern::for_sym("x"), Action::Expand { fanout: 1 })];
        let config = RuntimeConfig { walk_children: true, ..RuntimeConfig::default() };
        let mut rt = fifo_runtime(rules, config);
        rt.load(&Term::new("root", 0, vec![Term::leaf("x", 0)])).unwrap();
        rt.run_until_idle(8).unwrap();
        // The child x only becomes reachable through the walk.
        assert_eq!(rt.rule_counts().get("up"), Some(&1));
    }

    #[test]
    fn walk_depth_bounds_the_walk() {
        let rules = vec![Rule::new("up", Pattern::for_sym("deep"), Action::Expand { fanout: 1 })];
        let config = RuntimeConfig {
            walk_children: true,
            walk_depth: Some(1),
            ..RuntimeConfig::default()
        };
        let mut rt = fifo_runtime(rules, config);
        let tree = Term::new(
            "root",
            0,
            vec![Term::new("mid", 0, vec![Term::leaf("deep", 0)])],
        );
        rt.load(&tree).unwrap();
        rt.run_until_idle(8).unwrap();
        // deep sits at depth 2; the walk stops at depth 1.
        assert!(rt.events().is_empty());
    }

    #[test]
    fn budget_exhausted_flag_requires_pending_work() {
        let rules = vec![Rule::new("grow", Pattern::default(), Action::Expand { fanout: 1 })];
        let mut rt = fifo_runtime(rules, RuntimeConfig::default());
        rt.load(&Term::leaf("seed", 0)).unwrap();
        let outcome = rt.run_until_idle(2).unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        assert!(rt.budget_exhausted());
        assert_eq!(rt.events().len(), 2);
    }

    #[test]
    fn tracers_observe_events_in_step_order() {
        let mut rt = fifo_runtime(expand_reduce_rules(), RuntimeConfig::default());
        rt.add_tracer(Box::new(VecTracer::new()));
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(4).unwrap();
        assert_eq!(rt.events().len(), 2);
    }

    #[test]
    fn failing_tracer_is_detached_not_fatal() {
        struct Failing;
        impl Tracer for Failing {
            fn record(&mut self, _: &Event) -> Result<(), crate::trace::TraceError> {
                Err(crate::trace::TraceError::Serialize("poisoned".into()))
            }
        }
        let mut rt = fifo_runtime(expand_reduce_rules(), RuntimeConfig::default());
        rt.add_tracer(Box::new(Failing));
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(4).unwrap();
        assert_eq!(rt.events().len(), 2);
        assert!(rt.tracers.is_empty());
    }

    #[test]
    fn summary_reflects_run_state() {
        let mut rt = fifo_runtime(expand_reduce_rules(), RuntimeConfig::default());
        rt.load(&Term::leaf("A", 0)).unwrap();
        rt.run_until_idle(16).unwrap();
        let summary = rt.summary("demo");
        assert_eq!(summary.program, "demo");
        assert_eq!(summary.events, 2);
        assert!(summary.idle);
        assert!(!summary.budget_exhausted);
        assert_eq!(summary.store_size, 3);
        assert_eq!(summary.rule_counts.get("up"), Some(&1));
        assert_eq!(summary.scale_counts.get(&0), Some(&1));
        assert_eq!(summary.scale_counts.get(&1), Some(&1));
    }

    #[test]
    fn config_rejects_overlapping_filters() {
        let rules = expand_reduce_rules();
        let config = RuntimeConfig {
            include_rules: Some(BTreeSet::from(["up".to_string()])),
            exclude_rules: BTreeSet::from(["up".to_string()]),
            ..RuntimeConfig::default()
        };
        assert!(config.validate(&rules).is_err());
    }

    #[test]
    fn config_rejects_unknown_filter_rules() {
        let rules = expand_reduce_rules();
        let config = RuntimeConfig {
            exclude_rules: BTreeSet::from(["ghost".to_string()]),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(&rules),
            Err(ValidationError::UnknownFilterRules { .. })
        ));
    }

    #[test]
    fn config_rejects_conflicts_when_detection_is_on() {
        let rules = vec![
            Rule::new("a", Pattern::for_sym("X"), Action::Expand { fanout: 1 }),
            Rule::new("b", Pattern::for_sym("X"), Action::Reduce),
        ];
        let config = RuntimeConfig { detect_conflicts: true, ..RuntimeConfig::default() };
        assert!(matches!(
            config.validate(&rules),
            Err(ValidationError::ConflictingRules { .. })
        ));
        let off = RuntimeConfig::default();
        assert!(off.validate(&rules).is_ok());
    }
}
