//! Rules, patterns, and scale-shifting actions.
//!
//! A rule pairs a pattern (a predicate over symbol, scale, and child count)
//! with an action. The built-in actions are the expansion/reduction pair
//! that moves terms between adjacent scales while preserving the coherence
//! identity `reduce(expand(t)) = t`; custom actions are named, carry a
//! serializable parameter map, and dispatch through a registry.
//!
//! # Citations
//! - Rewrite rules and matching: Baader & Nipkow, "Term Rewriting and All That", Chapter 4 (1998)
//! - Self-similar motifs across scales: Mandelbrot, "The Fractal Geometry of Nature" (1982)

use crate::term::Term;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ----------------------------------------------------------------------------
// Patterns
// ----------------------------------------------------------------------------

/// Scale constraint for a pattern: an exact scale or membership in a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleFilter {
    /// Matches one scale exactly.
    Exact(u32),
    /// Matches any scale in the set.
    In(BTreeSet<u32>),
}

impl ScaleFilter {
    /// Returns whether a scale satisfies the filter.
    pub fn admits(&self, scale: u32) -> bool {
        match self {
            ScaleFilter::Exact(n) => *n == scale,
            ScaleFilter::In(set) => set.contains(&scale),
        }
    }

    /// Returns whether two filters admit a common scale.
    pub fn intersects(&self, other: &ScaleFilter) -> bool {
        match (self, other) {
            (ScaleFilter::Exact(a), ScaleFilter::Exact(b)) => a == b,
            (ScaleFilter::Exact(a), ScaleFilter::In(set))
            | (ScaleFilter::In(set), ScaleFilter::Exact(a)) => set.contains(a),
            (ScaleFilter::In(a), ScaleFilter::In(b)) => a.intersection(b).next().is_some(),
        }
    }
}

/// Predicate over a term: symbol (exact), scale (exact or membership), and
/// an optional child-count bound.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pattern {
    /// Required symbol; `None` matches any symbol.
    #[serde(default)]
    pub sym: Option<String>,
    /// Required scale; `None` matches any scale.
    #[serde(default)]
    pub scale: Option<ScaleFilter>,
    /// Upper bound on child count; `None` leaves arity unconstrained.
    #[serde(default)]
    pub max_children: Option<usize>,
}

impl Pattern {
    /// Pattern matching a symbol at any scale.
    pub fn for_sym(sym: impl Into<String>) -> Self {
        Self { sym: Some(sym.into()), ..Self::default() }
    }

    /// Pattern matching any symbol at one exact scale.
    pub fn for_scale(scale: u32) -> Self {
        Self { scale: Some(ScaleFilter::Exact(scale)), ..Self::default() }
    }

    /// Adds an exact scale constraint.
    pub fn at_scale(mut self, scale: u32) -> Self {
        self.scale = Some(ScaleFilter::Exact(scale));
        self
    }

    /// Adds a scale membership constraint.
    pub fn at_scales<I: IntoIterator<Item = u32>>(mut self, scales: I) -> Self {
        self.scale = Some(ScaleFilter::In(scales.into_iter().collect()));
        self
    }

    /// Adds a child-count upper bound.
    pub fn with_max_children(mut self, bound: usize) -> Self {
        self.max_children = Some(bound);
        self
    }

    /// Returns whether the pattern constrains anything at all.
    pub fn is_unconstrained(&self) -> bool {
        self.sym.is_none() && self.scale.is_none() && self.max_children.is_none()
    }

    /// Tests the pattern against a term.
    pub fn matches(&self, term: &Term) -> bool {
        if let Some(sym) = &self.sym {
            if term.sym != *sym {
                return false;
            }
        }
        if let Some(scale) = &self.scale {
            if !scale.admits(term.scale) {
                return false;
            }
        }
        if let Some(bound) = self.max_children {
            if term.children.len() > bound {
                return false;
            }
        }
        true
    }

    /// Returns whether two patterns can match the same term when restricted
    /// to symbol and scale alone.
    ///
    /// A child-count bound counts as a disambiguating predicate: patterns
    /// carrying one are never reported as deterministic overlaps.
    pub fn deterministically_overlaps(&self, other: &Pattern) -> bool {
        if self.max_children.is_some() || other.max_children.is_some() {
            return false;
        }
        let syms_compatible = match (&self.sym, &other.sym) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        if !syms_compatible {
            return false;
        }
        match (&self.scale, &other.scale) {
            (Some(a), Some(b)) => a.intersects(b),
            _ => true,
        }
    }
}

// ----------------------------------------------------------------------------
// Actions
// ----------------------------------------------------------------------------

/// Parameter map for custom actions, serializable as a JSON object.
pub type ActionParams = BTreeMap<String, serde_json::Value>;

/// A named rewrite operation.
///
/// The built-in pair moves terms between adjacent scales; custom actions
/// are unconstrained in the scales they emit, so coherence for them is a
/// matter for the program author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Lift to scale `s+1`: one `F(sym)` term with `fanout` motif children.
    Expand {
        /// Number of synthesized motif children; at least 1.
        fanout: usize,
    },
    /// Collapse an `F(x)` term back to `x` at scale `s-1`.
    Reduce,
    /// Registry-dispatched action with a serializable parameter map.
    Custom {
        /// Registry key.
        name: String,
        /// Parameters forwarded to the handler.
        params: ActionParams,
    },
}

impl Action {
    /// Display name for counters, logs, and fingerprints.
    pub fn name(&self) -> &str {
        match self {
            Action::Expand { .. } => "expand",
            Action::Reduce => "reduce",
            Action::Custom { name, .. } => name,
        }
    }

    /// Applies the action to a matched term.
    ///
    /// Returns the ordered replacement set, or `NotApplicable` when the
    /// action legitimately does not fire (for example `reduce` on a symbol
    /// that is not of the form `F(...)`). The caller treats `NotApplicable`
    /// exactly like a pattern that never matched.
    pub fn apply(
        &self,
        term: &Term,
        registry: &ActionRegistry,
    ) -> Result<ActionOutcome, ActionError> {
        match self {
            Action::Expand { fanout } => {
                if *fanout == 0 {
                    return Err(ActionError::ZeroFanout);
                }
                Ok(ActionOutcome::Replaced(vec![expand(term, *fanout)]))
            }
            Action::Reduce => Ok(match reduce(term) {
                Some(reduced) => ActionOutcome::Replaced(vec![reduced]),
                None => ActionOutcome::NotApplicable,
            }),
            Action::Custom { name, params } => registry.apply(name, term, params),
        }
    }
}

/// Result of applying an action to a matched term.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action fired, producing zero or more replacement terms.
    Replaced(Vec<Term>),
    /// The action does not apply to this term; not an error.
    NotApplicable,
}

/// Error raised by action application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// No handler is registered under the custom action's name.
    UnknownAction { name: String },
    /// A handler failed with a domain-specific message.
    HandlerFailed { name: String, message: String },
    /// An expand action was constructed with a zero fanout.
    ZeroFanout,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::UnknownAction { name } => write!(f, "unknown action: {}", name),
            ActionError::HandlerFailed { name, message } => {
                write!(f, "action {} failed: {}", name, message)
            }
            ActionError::ZeroFanout => write!(f, "expand requires fanout >= 1"),
        }
    }
}

impl std::error::Error for ActionError {}

/// Handler for a custom action.
pub trait ActionHandler {
    /// Applies the handler to a matched term.
    fn apply(&self, term: &Term, params: &ActionParams) -> Result<ActionOutcome, ActionError>;
}

/// Registry of custom action handlers keyed by name.
///
/// Built-in actions never consult the registry; it exists so embedders can
/// extend the action vocabulary without touching the stepping loop.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Box<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one under the name.
    pub fn register(&mut self, name: impl Into<String>, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Returns whether a handler exists for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Dispatches a custom action.
    pub fn apply(
        &self,
        name: &str,
        term: &Term,
        params: &ActionParams,
    ) -> Result<ActionOutcome, ActionError> {
        match self.handlers.get(name) {
            None => Err(ActionError::UnknownAction { name: name.to_string() }),
            Some(handler) => handler.apply(term, params),
        }
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Built-in expansion and reduction
// ----------------------------------------------------------------------------

/// Wraps a symbol in the expansion marker `F(...)`.
fn expansion_sym(sym: &str) -> String {
    format!("F({})", sym)
}

/// Strips the expansion marker, if present.
fn base_sym(sym: &str) -> Option<&str> {
    sym.strip_prefix("F(").and_then(|rest| rest.strip_suffix(')'))
}

/// Constructs the higher-scale motif term for `t`.
///
/// The result sits at scale `s+1` under the symbol `F(sym)` and carries
/// `fanout` synthesized self-similar motif children `sym.0 .. sym.(n-1)`,
/// each a leaf at the lifted scale. Expansion never mutates its input.
pub fn expand(t: &Term, fanout: usize) -> Term {
    let lifted = t.scale + 1;
    let motifs = (0..fanout)
        .map(|i| Term::leaf(format!("{}.{}", t.sym, i), lifted))
        .collect();
    Term::new(expansion_sym(&t.sym), lifted, motifs)
}

/// Collapses an expansion back to its lower-scale representative.
///
/// Applies only to terms whose symbol is of the form `F(x)` at scale 1 or
/// above; the result is the leaf `x` at scale `s-1`, which by hash-consing
/// coincides with the term expansion started from. Returns `None` when the
/// shape does not match, which callers treat as silent non-applicability.
pub fn reduce(u: &Term) -> Option<Term> {
    let base = base_sym(&u.sym)?;
    let scale = u.scale.checked_sub(1)?;
    Some(Term::leaf(base, scale))
}

// ----------------------------------------------------------------------------
// Rules
// ----------------------------------------------------------------------------

/// A named rewrite rule: pattern predicate plus action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name within a program.
    pub name: String,
    /// Predicate selecting the terms the rule fires on.
    pub pattern: Pattern,
    /// Operation applied to matched terms.
    pub action: Action,
}

impl Rule {
    /// Creates a rule.
    pub fn new(name: impl Into<String>, pattern: Pattern, action: Action) -> Self {
        Self { name: name.into(), pattern, action }
    }

    /// Returns whether the rule's pattern matches a term.
    #[inline]
    pub fn applies(&self, term: &Term) -> bool {
        self.pattern.matches(term)
    }
}

/// Collects the rules matching a term, in program order.
pub fn matching_rules<'a>(rules: &'a [Rule], term: &Term) -> Vec<&'a Rule> {
    rules.iter().filter(|rule| rule.applies(term)).collect()
}

/// Returns the first matching rule in program order, if any.
pub fn first_match<'a>(rules: &'a [Rule], term: &Term) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule.applies(term))
}

/// Finds rule pairs whose patterns deterministically overlap.
///
/// Used by load-time conflict detection; reported pairs are in program
/// order. This is a coherence guard on the program text, distinct from
/// strict matching, which trips on an actual ambiguous term at run time.
pub fn conflicting_rules(rules: &[Rule]) -> Vec<(String, String)> {
    let mut conflicts = Vec::new();
    for (i, a) in rules.iter().enumerate() {
        for b in &rules[i + 1..] {
            if a.pattern.deterministically_overlaps(&b.pattern) {
                conflicts.push((a.name.clone(), b.name.clone()));
            }
        }
    }
    conflicts
}
