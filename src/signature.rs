//! Per-symbol signature constraints.
//!
//! A signature declares, for each symbol, how many children a term may carry
//! and which scales it may appear at. When a signature is configured the
//! store consults it on every insertion, both at program load and during
//! rewrites, so no out-of-signature term ever becomes addressable.
//!
//! # Citations
//! - Many-sorted signatures: Baader & Nipkow, "Term Rewriting and All That", Chapter 3 (1998)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

/// Error raised when a term violates a declared signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No declaration exists for the symbol.
    UndeclaredSymbol { sym: String },
    /// Term has fewer children than the declaration allows.
    TooFewChildren { sym: String, expected: usize, found: usize },
    /// Term has more children than the declaration allows.
    TooManyChildren { sym: String, expected: usize, found: usize },
    /// Term sits at a scale outside the declared set.
    ScaleNotAllowed { sym: String, scale: u32, allowed: Vec<u32> },
    /// Two declarations share a symbol.
    DuplicateEntry { sym: String },
    /// Signature payload is structurally malformed.
    MalformedPayload(String),
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::UndeclaredSymbol { sym } => {
                write!(f, "no signature declared for symbol {}", sym)
            }
            SignatureError::TooFewChildren { sym, expected, found } => write!(
                f,
                "term {} expected at least {} children, found {}",
                sym, expected, found
            ),
            SignatureError::TooManyChildren { sym, expected, found } => write!(
                f,
                "term {} expected at most {} children, found {}",
                sym, expected, found
            ),
            SignatureError::ScaleNotAllowed { sym, scale, allowed } => write!(
                f,
                "term {} scale {} not in allowed scales {:?}",
                sym, scale, allowed
            ),
            SignatureError::DuplicateEntry { sym } => {
                write!(f, "duplicate signature entry for symbol {}", sym)
            }
            SignatureError::MalformedPayload(msg) => {
                write!(f, "malformed signature payload: {}", msg)
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// Declaration for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSignature {
    /// Minimum number of children.
    #[serde(default)]
    pub min_children: usize,
    /// Maximum number of children; `None` means unbounded.
    #[serde(default)]
    pub max_children: Option<usize>,
    /// Scales the symbol may appear at; `None` means any scale.
    #[serde(default)]
    pub scales: Option<BTreeSet<u32>>,
}

impl SymbolSignature {
    /// Validates one term's shape against this declaration.
    pub fn validate(&self, sym: &str, scale: u32, child_count: usize) -> Result<(), SignatureError> {
        if child_count < self.min_children {
            return Err(SignatureError::TooFewChildren {
                sym: sym.to_string(),
                expected: self.min_children,
                found: child_count,
            });
        }
        if let Some(max) = self.max_children {
            if child_count > max {
                return Err(SignatureError::TooManyChildren {
                    sym: sym.to_string(),
                    expected: max,
                    found: child_count,
                });
            }
        }
        if let Some(scales) = &self.scales {
            if !scales.contains(&scale) {
                return Err(SignatureError::ScaleNotAllowed {
                    sym: sym.to_string(),
                    scale,
                    allowed: scales.iter().copied().collect(),
                });
            }
        }
        Ok(())
    }
}

/// A set of per-symbol declarations.
///
/// A configured signature is closed-world: a symbol without a declaration
/// is a violation. Programs that rely on synthesized symbols (for example
/// the `F(...)` family produced by expansion) either declare them or run
/// without a signature.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Signature {
    symbols: BTreeMap<String, SymbolSignature>,
}

impl Signature {
    /// Builds a signature from `(symbol, declaration)` pairs.
    pub fn new<I>(entries: I) -> Result<Self, SignatureError>
    where
        I: IntoIterator<Item = (String, SymbolSignature)>,
    {
        let mut symbols = BTreeMap::new();
        for (sym, entry) in entries {
            if symbols.insert(sym.clone(), entry).is_some() {
                return Err(SignatureError::DuplicateEntry { sym });
            }
        }
        Ok(Self { symbols })
    }

    /// Looks up the declaration for a symbol.
    pub fn get(&self, sym: &str) -> Option<&SymbolSignature> {
        self.symbols.get(sym)
    }

    /// Deterministic iteration over declarations, sorted by symbol.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &SymbolSignature)> {
        self.symbols.iter()
    }

    /// Validates a single term's shape.
    pub fn validate_shape(
        &self,
        sym: &str,
        scale: u32,
        child_count: usize,
    ) -> Result<(), SignatureError> {
        match self.get(sym) {
            None => Err(SignatureError::UndeclaredSymbol { sym: sym.to_string() }),
            Some(entry) => entry.validate(sym, scale, child_count),
        }
    }

    /// Validates a whole term tree.
    pub fn validate_tree(&self, term: &crate::term::Term) -> Result<(), SignatureError> {
        self.validate_shape(&term.sym, term.scale, term.children.len())?;
        for child in &term.children {
            self.validate_tree(child)?;
        }
        Ok(())
    }

    /// Parses the JSON signature file form:
    /// `{"symbols": {"<sym>": {"min_children": N, "max_children": M, "scales": [..]}}}`.
    pub fn from_json(payload: &serde_json::Value) -> Result<Self, SignatureError> {
        let file: SignatureFile = serde_json::from_value(payload.clone())
            .map_err(|err| SignatureError::MalformedPayload(err.to_string()))?;
        Ok(Self { symbols: file.symbols })
    }

    /// Renders the JSON signature file form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "symbols": self.symbols })
    }
}

/// On-disk signature file shape.
#[derive(Debug, Deserialize)]
struct SignatureFile {
    symbols: BTreeMap<String, SymbolSignature>,
}
