//! Terms and their content-derived identifiers.
//!
//! A term carries a symbol, a non-negative integer scale, and an ordered
//! sequence of children. Terms are immutable values; inside the store they
//! are addressed by `TermId`, a digest over the canonical encoding of
//! `(sym, scale, child ids)`, so equal content always yields the same id.
//!
//! # Citations
//! - Terms and positions: Baader & Nipkow, "Term Rewriting and All That", Chapter 3 (1998)
//! - Hash-consing: Ershov, "On programming of arithmetic operations" (1958);
//!   Filliâtre & Conchon, "Type-safe modular hash-consing" (2006)

use crate::fingerprint::{DigestWriter, HashDomain};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Content-derived identifier for a stored term.
///
/// Eight bytes of the domain-separated SHA-256 over the canonical encoding
/// of the term's content. Serialized as a 16-character lowercase hex string.
///
/// # Invariant
/// - Two terms have equal ids iff they have equal `(sym, scale, children)`
///   content, up to digest collisions.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId([u8; 8]);

impl TermId {
    /// Creates an id from raw bytes.
    ///
    /// Prefer [`TermId::derive`]; raw construction is for deserialization.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Returns the raw byte representation.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Derives the canonical id for term content.
    ///
    /// Absorbs the symbol, the scale, and the child ids in order into the
    /// `TermId` hash domain and keeps the leading eight digest bytes.
    /// Children are referenced by id, not by value, so shared subterms
    /// hash once.
    pub fn derive(sym: &str, scale: u32, children: &[TermId]) -> Self {
        let mut writer = DigestWriter::for_domain(HashDomain::TermId);
        writer.text(sym).number(scale.into()).begin_seq(children.len());
        for child in children {
            writer.bytes(child.as_bytes());
        }
        let digest = writer.finish();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        Self(bytes)
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Error parsing a `TermId` from its hex rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTermIdError(pub String);

impl fmt::Display for ParseTermIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid term id {:?}: expected 16 hex characters", self.0)
    }
}

impl std::error::Error for ParseTermIdError {}

impl FromStr for TermId {
    type Err = ParseTermIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.is_ascii() {
            return Err(ParseTermIdError(s.to_string()));
        }
        let mut bytes = [0u8; 8];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| ParseTermIdError(s.to_string()))?;
            bytes[i] =
                u8::from_str_radix(pair, 16).map_err(|_| ParseTermIdError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for TermId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct TermIdVisitor;

impl Visitor<'_> for TermIdVisitor {
    type Value = TermId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 16-character hex term id")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<TermId, E> {
        value.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for TermId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(TermIdVisitor)
    }
}

/// A term value: symbol, scale, ordered children.
///
/// This is the tree form used for construction, pattern matching, and
/// action application; the store keeps the flattened, id-referencing form.
/// Scales are non-negative by construction and intended as micro(0),
/// meso(1), macro(2+).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// Symbol, an arbitrary string.
    pub sym: String,
    /// Non-negative scale tag.
    #[serde(default)]
    pub scale: u32,
    /// Ordered child terms.
    #[serde(default)]
    pub children: Vec<Term>,
}

impl Term {
    /// Creates a term with children.
    pub fn new(sym: impl Into<String>, scale: u32, children: Vec<Term>) -> Self {
        Self { sym: sym.into(), scale, children }
    }

    /// Creates a childless term.
    pub fn leaf(sym: impl Into<String>, scale: u32) -> Self {
        Self { sym: sym.into(), scale, children: Vec::new() }
    }

    /// Returns true when the term has no children.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Total number of nodes in the tree, the term itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Term::node_count).sum::<usize>()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.sym, self.scale)?;
        if !self.children.is_empty() {
            write!(f, "(")?;
            for (i, child) in self.children.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
