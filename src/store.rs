//! Hash-consing term store.
//!
//! The store interns terms by content: equal `(sym, scale, children)` yields
//! one `TermId`, children are referenced by id, and shared subterms are
//! stored once. Records are immutable and the store grows monotonically
//! within a run; insertion order is tracked so snapshots can rebuild the
//! store with identical ids.
//!
//! Insertion fails only when a configured signature rejects the content or
//! when a new record would exceed the term cap. The cap trips a sticky
//! `term_limit_exhausted` flag and the store refuses further inserts without
//! panicking, letting the runtime halt cleanly.
//!
//! # Citations
//! - Hash-consing: Filliâtre & Conchon, "Type-safe modular hash-consing" (2006)
//! - Content addressing: Merkle, "A digital signature based on a conventional encryption function" (1987)

use crate::signature::{Signature, SignatureError};
use crate::term::{Term, TermId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Error raised by store insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A configured signature rejected the content.
    Signature(SignatureError),
    /// Inserting a new record would exceed the term cap.
    TermLimitExhausted { max_terms: usize },
    /// A referenced id is not present in the store.
    MissingTerm { id: TermId },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Signature(err) => write!(f, "signature violation: {}", err),
            StoreError::TermLimitExhausted { max_terms } => {
                write!(f, "term limit exhausted: store is capped at {} terms", max_terms)
            }
            StoreError::MissingTerm { id } => write!(f, "term {} not found in store", id),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<SignatureError> for StoreError {
    fn from(err: SignatureError) -> Self {
        StoreError::Signature(err)
    }
}

/// Immutable stored form of a term: children flattened to ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    /// Symbol.
    pub sym: String,
    /// Scale tag.
    pub scale: u32,
    /// Ordered child ids.
    pub children: Vec<TermId>,
}

/// Content-addressed term store with structural sharing.
///
/// # Invariants
/// - Records never change or disappear once inserted.
/// - `insertion_order` lists every id exactly once, oldest first.
/// - `len()` never exceeds `max_terms` when a cap is configured.
#[derive(Debug, Clone, Default)]
pub struct TermStore {
    records: HashMap<TermId, TermRecord>,
    insertion_order: Vec<TermId>,
    signature: Option<Signature>,
    max_terms: Option<usize>,
    term_limit_exhausted: bool,
}

impl TermStore {
    /// Creates an empty store with no signature and no cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with an optional signature validator and term cap.
    pub fn with_guards(signature: Option<Signature>, max_terms: Option<usize>) -> Self {
        Self { signature, max_terms, ..Self::default() }
    }

    /// Interns a term tree bottom-up and returns the root's id.
    ///
    /// Idempotent: re-inserting existing content returns the existing id
    /// and does not advance the cap. A cap failure may leave a prefix of
    /// the tree interned; the store stays consistent because every record
    /// that made it in is complete.
    pub fn intern(&mut self, term: &Term) -> Result<TermId, StoreError> {
        let mut child_ids = Vec::with_capacity(term.children.len());
        for child in &term.children {
            child_ids.push(self.intern(child)?);
        }
        self.intern_record(&term.sym, term.scale, child_ids)
    }

    /// Interns a single record whose children are already stored.
    pub fn intern_record(
        &mut self,
        sym: &str,
        scale: u32,
        children: Vec<TermId>,
    ) -> Result<TermId, StoreError> {
        let id = TermId::derive(sym, scale, &children);
        if self.records.contains_key(&id) {
            return Ok(id);
        }
        if let Some(signature) = &self.signature {
            signature.validate_shape(sym, scale, children.len())?;
        }
        if let Some(cap) = self.max_terms {
            if self.term_limit_exhausted || self.records.len() >= cap {
                self.term_limit_exhausted = true;
                return Err(StoreError::TermLimitExhausted { max_terms: cap });
            }
        }
        self.records.insert(id, TermRecord { sym: sym.to_string(), scale, children });
        self.insertion_order.push(id);
        Ok(id)
    }

    /// Looks up a record by id.
    pub fn get(&self, id: TermId) -> Option<&TermRecord> {
        self.records.get(&id)
    }

    /// Returns the immediate child ids of a stored term.
    pub fn children_of(&self, id: TermId) -> Result<&[TermId], StoreError> {
        self.records
            .get(&id)
            .map(|record| record.children.as_slice())
            .ok_or(StoreError::MissingTerm { id })
    }

    /// Reconstructs the tree form of a stored term.
    pub fn materialize(&self, id: TermId) -> Result<Term, StoreError> {
        let record = self.records.get(&id).ok_or(StoreError::MissingTerm { id })?;
        let mut children = Vec::with_capacity(record.children.len());
        for &child in &record.children {
            children.push(self.materialize(child)?);
        }
        Ok(Term::new(record.sym.clone(), record.scale, children))
    }

    /// Returns whether an id is present.
    #[inline]
    pub fn contains(&self, id: TermId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of unique stored terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when the store holds no terms.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Enumerates `(id, record)` pairs in insertion order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (TermId, &TermRecord)> {
        self.insertion_order.iter().map(move |&id| (id, &self.records[&id]))
    }

    /// Returns whether the term cap has tripped.
    #[inline]
    pub fn term_limit_exhausted(&self) -> bool {
        self.term_limit_exhausted
    }

    /// Returns the configured term cap, if any.
    #[inline]
    pub fn max_terms(&self) -> Option<usize> {
        self.max_terms
    }

    /// Returns the configured signature, if any.
    #[inline]
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Marks the cap as already tripped (snapshot restore).
    pub(crate) fn set_term_limit_exhausted(&mut self, exhausted: bool) {
        self.term_limit_exhausted = exhausted;
    }
}
