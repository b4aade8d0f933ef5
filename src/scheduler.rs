//! Frontier scheduling strategies.
//!
//! The scheduler owns the ordered frontier of term ids awaiting rewrite.
//! Three strategies share one capability set (`push`, `pop`, `pending`,
//! `state`/`set_state`): FIFO for breadth-first walks, LIFO for depth-first,
//! and a seeded random strategy whose full RNG state serializes into
//! snapshots, so a resumed run continues the identical selection sequence.
//!
//! # Determinism
//! - Within one strategy the pop sequence is a function of the push history
//!   and, for the random strategy, the initial seed.
//! - `state()`/`set_state()` round-trip the strategy's internal position so
//!   snapshot resume is bit-identical.
//!
//! # Citations
//! - ChaCha stream cipher family: Bernstein, "ChaCha, a variant of Salsa20" (2008)

use crate::term::TermId;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Strategy selector, as stored in snapshots and accepted by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// Breadth-first: earliest-added id pops first.
    Fifo,
    /// Depth-first: latest-added id pops first.
    Lifo,
    /// Seeded random selection.
    Random,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Fifo => f.write_str("fifo"),
            SchedulerKind::Lifo => f.write_str("lifo"),
            SchedulerKind::Random => f.write_str("random"),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(SchedulerKind::Fifo),
            "lifo" => Ok(SchedulerKind::Lifo),
            "random" => Ok(SchedulerKind::Random),
            other => Err(SchedulerError::UnknownKind { kind: other.to_string() }),
        }
    }
}

/// Error raised by scheduler construction or state restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Unrecognized strategy name.
    UnknownKind { kind: String },
    /// A state payload was offered to a strategy that keeps none.
    StatelessStrategy { kind: SchedulerKind },
    /// The state payload did not decode.
    MalformedState(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::UnknownKind { kind } => {
                write!(f, "unknown scheduler kind: {}", kind)
            }
            SchedulerError::StatelessStrategy { kind } => {
                write!(f, "scheduler {} keeps no serializable state", kind)
            }
            SchedulerError::MalformedState(msg) => {
                write!(f, "malformed scheduler state: {}", msg)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

/// Ordered frontier of term ids awaiting rewrite.
///
/// Implementations hold only ordering state; dedup against the processed
/// set and the queued set is the runtime's job.
pub trait Scheduler: fmt::Debug {
    /// The strategy this scheduler implements.
    fn kind(&self) -> SchedulerKind;

    /// Appends an id to the frontier.
    fn push(&mut self, id: TermId);

    /// Removes and returns the next id, per strategy.
    fn pop(&mut self) -> Option<TermId>;

    /// The frontier contents in internal order.
    fn pending(&self) -> Vec<TermId>;

    /// Number of ids awaiting rewrite.
    fn len(&self) -> usize;

    /// Returns true when the frontier is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all pending ids.
    fn clear(&mut self);

    /// The seed this scheduler was constructed with, if the strategy is
    /// seeded.
    fn seed(&self) -> Option<u64> {
        None
    }

    /// Serializable strategy state beyond the frontier itself.
    fn state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restores strategy state captured by [`Scheduler::state`].
    fn set_state(&mut self, state: &serde_json::Value) -> Result<(), SchedulerError> {
        let _ = state;
        Err(SchedulerError::StatelessStrategy { kind: self.kind() })
    }

    /// Short opaque token describing the strategy position, for event
    /// records. `None` for stateless strategies.
    fn state_token(&self) -> Option<String> {
        None
    }
}

/// Constructs a scheduler for the given strategy.
///
/// The seed is meaningful only for the random strategy; it defaults to 0 so
/// unseeded random runs are still reproducible.
pub fn make_scheduler(kind: SchedulerKind, seed: Option<u64>) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Fifo => Box::new(FifoScheduler::new()),
        SchedulerKind::Lifo => Box::new(LifoScheduler::new()),
        SchedulerKind::Random => Box::new(RandomScheduler::new(seed.unwrap_or(0))),
    }
}

/// Breadth-first frontier.
#[derive(Debug, Default)]
pub struct FifoScheduler {
    queue: VecDeque<TermId>,
}

impl FifoScheduler {
    /// Creates an empty FIFO frontier.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for FifoScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Fifo
    }

    fn push(&mut self, id: TermId) {
        self.queue.push_back(id);
    }

    fn pop(&mut self) -> Option<TermId> {
        self.queue.pop_front()
    }

    fn pending(&self) -> Vec<TermId> {
        self.queue.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Depth-first frontier.
#[derive(Debug, Default)]
pub struct LifoScheduler {
    stack: Vec<TermId>,
}

impl LifoScheduler {
    /// Creates an empty LIFO frontier.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for LifoScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Lifo
    }

    fn push(&mut self, id: TermId) {
        self.stack.push(id);
    }

    fn pop(&mut self) -> Option<TermId> {
        self.stack.pop()
    }

    fn pending(&self) -> Vec<TermId> {
        self.stack.clone()
    }

    fn len(&self) -> usize {
        self.stack.len()
    }

    fn clear(&mut self) {
        self.stack.clear();
    }
}

/// Seeded random frontier.
///
/// Pops remove a uniformly chosen position. The ChaCha generator is fully
/// serializable, so `state()` captures enough to make a resumed run pick
/// the same positions the uninterrupted run would have.
#[derive(Debug)]
pub struct RandomScheduler {
    items: Vec<TermId>,
    seed: u64,
    rng: ChaCha8Rng,
}

impl RandomScheduler {
    /// Creates an empty random frontier from a seed.
    pub fn new(seed: u64) -> Self {
        Self { items: Vec::new(), seed, rng: ChaCha8Rng::seed_from_u64(seed) }
    }
}

impl Scheduler for RandomScheduler {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Random
    }

    fn push(&mut self, id: TermId) {
        self.items.push(id);
    }

    fn pop(&mut self) -> Option<TermId> {
        if self.items.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.items.len());
        Some(self.items.remove(idx))
    }

    fn pending(&self) -> Vec<TermId> {
        self.items.clone()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn seed(&self) -> Option<u64> {
        Some(self.seed)
    }

    fn state(&self) -> Option<serde_json::Value> {
        serde_json::to_value(&self.rng).ok()
    }

    fn set_state(&mut self, state: &serde_json::Value) -> Result<(), SchedulerError> {
        self.rng = serde_json::from_value(state.clone())
            .map_err(|err| SchedulerError::MalformedState(err.to_string()))?;
        Ok(())
    }

    fn state_token(&self) -> Option<String> {
        Some(format!("chacha8:{}", self.rng.get_word_pos()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<TermId> {
        (0..n).map(|i| TermId::derive(&format!("t{}", i), 0, &[])).collect()
    }

    #[test]
    fn fifo_pops_in_insertion_order() {
        let mut s = FifoScheduler::new();
        let ids = ids(3);
        for &id in &ids {
            s.push(id);
        }
        assert_eq!(s.pop(), Some(ids[0]));
        assert_eq!(s.pop(), Some(ids[1]));
        assert_eq!(s.pop(), Some(ids[2]));
        assert_eq!(s.pop(), None);
    }

    #[test]
    fn lifo_pops_in_reverse_order() {
        let mut s = LifoScheduler::new();
        let ids = ids(3);
        for &id in &ids {
            s.push(id);
        }
        assert_eq!(s.pop(), Some(ids[2]));
        assert_eq!(s.pop(), Some(ids[1]));
        assert_eq!(s.pop(), Some(ids[0]));
    }

    #[test]
    fn random_is_reproducible_per_seed() {
        let frontier = ids(8);
        let run = |seed| {
            let mut s = RandomScheduler::new(seed);
            for &id in &frontier {
                s.push(id);
            }
            let mut order = Vec::new();
            while let Some(id) = s.pop() {
                order.push(id);
            }
            order
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn random_state_round_trip_continues_sequence() {
        let frontier = ids(8);
        let mut original = RandomScheduler::new(7);
        for &id in &frontier {
            original.push(id);
        }
        original.pop();
        original.pop();

        let mut resumed = RandomScheduler::new(7);
        for &id in &original.pending() {
            resumed.push(id);
        }
        resumed.set_state(&original.state().unwrap()).unwrap();

        let drain = |mut s: RandomScheduler| {
            let mut order = Vec::new();
            while let Some(id) = s.pop() {
                order.push(id);
            }
            order
        };
        assert_eq!(drain(original), drain(resumed));
    }

    #[test]
    fn random_rejects_garbage_state() {
        let mut s = RandomScheduler::new(0);
        assert!(matches!(
            s.set_state(&serde_json::json!("not an rng")),
            Err(SchedulerError::MalformedState(_))
        ));
    }

    #[test]
    fn stateless_strategies_decline_state() {
        let mut s = FifoScheduler::new();
        assert!(s.state().is_none());
        assert!(matches!(
            s.set_state(&serde_json::json!({})),
            Err(SchedulerError::StatelessStrategy { kind: SchedulerKind::Fifo })
        ));
    }

    #[test]
    fn kind_parses_and_displays() {
        for kind in [SchedulerKind::Fifo, SchedulerKind::Lifo, SchedulerKind::Random] {
            assert_eq!(kind.to_string().parse::<SchedulerKind>().unwrap(), kind);
        }
        assert!("priority".parse::<SchedulerKind>().is_err());
    }
}
