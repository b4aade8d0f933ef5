//! Resumable runtime snapshots.
//!
//! A snapshot serializes the entire runtime state as JSON with stable keys:
//! the store in insertion order, the frontier, the processed set, the
//! scheduler kind plus its RNG state, and all guard state. Because term ids
//! are content-derived, rebuilding the store in insertion order reproduces
//! every id exactly, and a resumed run continues the pop sequence the
//! uninterrupted run would have taken.
//!
//! # Citations
//! - Consistent state capture: Chandy & Lamport, "Distributed snapshots: determining global states of distributed systems" (1985)

use crate::program::ValidationError;
use crate::rewrite::Rule;
use crate::runtime::{Runtime, RuntimeConfig};
use crate::scheduler::{make_scheduler, SchedulerError, SchedulerKind};
use crate::signature::Signature;
use crate::store::{StoreError, TermStore};
use crate::term::TermId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

/// One stored term in snapshot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTerm {
    /// Content-derived id, kept for integrity checking on load.
    pub id: TermId,
    /// Symbol.
    pub sym: String,
    /// Scale tag.
    pub scale: u32,
    /// Ordered child ids; children always precede their parent in the list.
    pub children: Vec<TermId>,
}

/// Full serialized runtime state.
///
/// Field order is the canonical key order of the JSON artifact; all
/// collections are either insertion-ordered (store, frontier) or sorted
/// (processed, filters), so equal runtime states serialize to identical
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store records in insertion order.
    pub store: Vec<StoredTerm>,
    /// Root id.
    pub root: Option<TermId>,
    /// Frontier ids in scheduler order.
    pub frontier: Vec<TermId>,
    /// Processed ids, sorted.
    pub processed: Vec<TermId>,
    /// Scheduler strategy.
    pub scheduler: SchedulerKind,
    /// Seed, for the random strategy.
    pub scheduler_seed: Option<u64>,
    /// Serialized strategy state (RNG position for the random strategy).
    pub scheduler_state: Option<serde_json::Value>,
    /// Child-walk flag.
    pub walk_children: bool,
    /// Child-walk depth bound.
    pub walk_depth: Option<usize>,
    /// Strict-matching flag.
    pub strict_matching: bool,
    /// Conflict-detection flag.
    pub detect_conflicts: bool,
    /// Rule allowlist, sorted.
    pub include_rules: Option<Vec<String>>,
    /// Rule blocklist, sorted.
    pub exclude_rules: Vec<String>,
    /// Scale allowlist, sorted.
    pub include_scales: Option<Vec<u32>>,
    /// Scale blocklist, sorted.
    pub exclude_scales: Vec<u32>,
    /// Remaining fires per rule.
    pub rule_budgets: BTreeMap<String, usize>,
    /// Rules whose budget has reached zero, sorted.
    pub rule_budget_exhausted: Vec<String>,
    /// Term cap.
    pub max_terms: Option<usize>,
    /// Whether the cap has tripped.
    pub term_limit_exhausted: bool,
}

/// Error raised while writing, reading, or restoring a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    /// File system failure.
    Io(std::io::Error),
    /// The artifact did not encode or decode as JSON.
    Json(String),
    /// A stored record's id does not match its content.
    IdMismatch { expected: TermId, computed: TermId },
    /// The snapshot references an id its store does not define.
    DanglingId { id: TermId },
    /// The scheduler state did not restore.
    Scheduler(SchedulerError),
    /// The restored configuration failed validation.
    Validation(ValidationError),
    /// Structural inconsistency in the artifact.
    Corrupt(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(err) => write!(f, "snapshot i/o error: {}", err),
            SnapshotError::Json(msg) => write!(f, "snapshot json error: {}", msg),
            SnapshotError::IdMismatch { expected, computed } => write!(
                f,
                "snapshot id mismatch: stored {} but content hashes to {}",
                expected, computed
            ),
            SnapshotError::DanglingId { id } => {
                write!(f, "snapshot references unknown term {}", id)
            }
            SnapshotError::Scheduler(err) => write!(f, "snapshot scheduler error: {}", err),
            SnapshotError::Validation(err) => write!(f, "snapshot validation error: {}", err),
            SnapshotError::Corrupt(msg) => write!(f, "corrupt snapshot: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

impl From<SchedulerError> for SnapshotError {
    fn from(err: SchedulerError) -> Self {
        SnapshotError::Scheduler(err)
    }
}

impl From<ValidationError> for SnapshotError {
    fn from(err: ValidationError) -> Self {
        SnapshotError::Validation(err)
    }
}

impl Snapshot {
    /// Renders the canonical JSON artifact.
    pub fn to_json_string(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self).map_err(|err| SnapshotError::Json(err.to_string()))
    }

    /// Parses a JSON artifact.
    pub fn from_json_str(text: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(text).map_err(|err| SnapshotError::Json(err.to_string()))
    }

    /// Writes the artifact to a file.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Reads an artifact from a file.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Rebuilds a term store from the stored records.
    ///
    /// Records intern in stored order, children before parents, and every
    /// recomputed id must equal the stored one; a mismatch means the
    /// artifact was edited or corrupted.
    pub fn rebuild_store(&self, signature: Option<Signature>) -> Result<TermStore, SnapshotError> {
        let mut store = TermStore::with_guards(signature, self.max_terms);
        for record in &self.store {
            let computed = store
                .intern_record(&record.sym, record.scale, record.children.clone())
                .map_err(|err| match err {
                    StoreError::Signature(sig) => {
                        SnapshotError::Validation(ValidationError::Signature(sig))
                    }
                    other => SnapshotError::Corrupt(other.to_string()),
                })?;
            if computed != record.id {
                return Err(SnapshotError::IdMismatch { expected: record.id, computed });
            }
        }
        store.set_term_limit_exhausted(self.term_limit_exhausted);
        Ok(store)
    }

    /// The runtime configuration stored in the artifact.
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            walk_children: self.walk_children,
            walk_depth: self.walk_depth,
            strict_matching: self.strict_matching,
            detect_conflicts: self.detect_conflicts,
            rule_budgets: self.rule_budgets.clone(),
            max_terms: self.max_terms,
            include_rules: self
                .include_rules
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            exclude_rules: self.exclude_rules.iter().cloned().collect(),
            include_scales: self
                .include_scales
                .as_ref()
                .map(|scales| scales.iter().copied().collect()),
            exclude_scales: self.exclude_scales.iter().copied().collect(),
        }
    }
}

impl Runtime {
    /// Captures the full runtime state after any step.
    pub fn snapshot(&self) -> Snapshot {
        let store = self
            .store
            .iter_ordered()
            .map(|(id, record)| StoredTerm {
                id,
                sym: record.sym.clone(),
                scale: record.scale,
                children: record.children.clone(),
            })
            .collect();
        let config = self.config();
        Snapshot {
            store,
            root: self.root,
            frontier: self.scheduler.pending(),
            processed: self.processed.iter().copied().collect(),
            scheduler: self.scheduler.kind(),
            scheduler_seed: self.scheduler.seed(),
            scheduler_state: self.scheduler.state(),
            walk_children: config.walk_children,
            walk_depth: config.walk_depth,
            strict_matching: config.strict_matching,
            detect_conflicts: config.detect_conflicts,
            include_rules: config
                .include_rules
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            exclude_rules: config.exclude_rules.iter().cloned().collect(),
            include_scales: config
                .include_scales
                .as_ref()
                .map(|scales| scales.iter().copied().collect()),
            exclude_scales: config.exclude_scales.iter().copied().collect(),
            rule_budgets: self.rule_budget_remaining.clone(),
            rule_budget_exhausted: self.rule_budget_exhausted.iter().cloned().collect(),
            max_terms: config.max_terms,
            term_limit_exhausted: self.store.term_limit_exhausted(),
        }
    }
}

/// CLI-level overrides honored on resume.
///
/// Scheduler and walk flags may change; everything else comes from the
/// stored artifact.
#[derive(Debug, Clone, Default)]
pub struct ResumeOverrides {
    /// Replace the stored scheduler strategy.
    pub scheduler: Option<SchedulerKind>,
    /// Replace the stored seed.
    pub scheduler_seed: Option<u64>,
    /// Replace the stored child-walk flag.
    pub walk_children: Option<bool>,
    /// Replace the stored child-walk depth bound.
    pub walk_depth: Option<usize>,
    /// Replace the stored strict-matching flag.
    pub strict_matching: Option<bool>,
}

/// Reconstructs a runtime from a snapshot.
///
/// The rule list and optional signature are external inputs: rules are code,
/// not state, so the caller re-supplies the program they resumed from. The
/// stored scheduler state is re-applied only when the strategy was not
/// overridden to a different kind.
pub fn resume_runtime(
    snapshot: &Snapshot,
    rules: Vec<Rule>,
    signature: Option<Signature>,
    overrides: &ResumeOverrides,
) -> Result<Runtime, SnapshotError> {
    let mut config = snapshot.config();
    if let Some(walk_children) = overrides.walk_children {
        config.walk_children = walk_children;
    }
    if let Some(walk_depth) = overrides.walk_depth {
        config.walk_depth = Some(walk_depth);
    }
    if let Some(strict) = overrides.strict_matching {
        config.strict_matching = strict;
    }

    let kind = overrides.scheduler.unwrap_or(snapshot.scheduler);
    let seed = overrides.scheduler_seed.or(snapshot.scheduler_seed);
    let scheduler = make_scheduler(kind, seed);

    let mut runtime = Runtime::new(rules, config, scheduler, None)?;
    runtime.store = snapshot.rebuild_store(signature)?;

    if let Some(root) = snapshot.root {
        if !runtime.store.contains(root) {
            return Err(SnapshotError::DanglingId { id: root });
        }
    }
    runtime.root = snapshot.root;

    for &id in &snapshot.processed {
        if !runtime.store.contains(id) {
            return Err(SnapshotError::DanglingId { id });
        }
        runtime.processed.insert(id);
    }
    for &id in &snapshot.frontier {
        if !runtime.store.contains(id) {
            return Err(SnapshotError::DanglingId { id });
        }
        runtime.scheduler.push(id);
        runtime.queued.insert(id);
    }

    runtime.rule_budget_remaining = snapshot.rule_budgets.clone();
    runtime.rule_budget_exhausted = snapshot.rule_budget_exhausted.iter().cloned().collect();

    if kind == snapshot.scheduler {
        if let Some(state) = &snapshot.scheduler_state {
            runtime.scheduler.set_state(state)?;
        }
    }
    Ok(runtime)
}
