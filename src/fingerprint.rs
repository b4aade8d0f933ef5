//! Deterministic fingerprinting for terms, rules, and programs.
//!
//! Fingerprints are SHA-256 digests over a type-tagged field encoding:
//! every absorbed field carries a one-byte marker, variable-length fields a
//! big-endian length, and sequences an up-front count, so no two distinct
//! field sequences share an encoding. Each kind of value (term id, term,
//! rule, signature, program) hashes under its own domain tag, so values of
//! different kinds never collide even when their payloads do.
//!
//! # Citations
//! - SHA-256: NIST FIPS 180-4 (2015)
//! - Domain separation: Bernstein et al., "How to hash into elliptic curves" (2009)
//! - Injective encodings for hashing: Rogaway & Shrimpton, "Cryptographic hash-function basics" (2004)

use crate::metrics::StructuralConstraints;
use crate::program::Program;
use crate::rewrite::{Action, Pattern, Rule, ScaleFilter};
use crate::signature::Signature;
use crate::term::Term;
use sha2::{Digest as _, Sha256};
use std::fmt;

// ----------------------------------------------------------------------------
// Hash domains
// ----------------------------------------------------------------------------

/// The kind of value a digest covers.
///
/// Every kind hashes under its own tag; bumping the trailing version in a
/// tag retires old digests of that kind without touching the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashDomain {
    /// Store identifiers for interned terms.
    TermId,
    /// Whole term trees.
    Term,
    /// Rewrite rules.
    Rule,
    /// Signature declarations.
    Signature,
    /// Structural constraint sets.
    Constraints,
    /// Whole programs.
    Program,
}

impl HashDomain {
    fn tag(self) -> &'static str {
        match self {
            HashDomain::TermId => "octave/term-id@0",
            HashDomain::Term => "octave/term@0",
            HashDomain::Rule => "octave/rule@0",
            HashDomain::Signature => "octave/signature@0",
            HashDomain::Constraints => "octave/constraints@0",
            HashDomain::Program => "octave/program@0",
        }
    }
}

// ----------------------------------------------------------------------------
// Fingerprint
// ----------------------------------------------------------------------------

/// A 256-bit content fingerprint.
///
/// Constructed only through [`DigestWriter::finish`], so every value in
/// circulation came out of a domain-tagged digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Returns the raw byte representation.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the first eight bytes rendered as a 16-character hex string.
    ///
    /// Short fingerprints are what run summaries and logs display; full
    /// values stay available for collision-sensitive comparisons.
    pub fn short_hex(&self) -> String {
        self.0[..8].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Canonical field encoder
// ----------------------------------------------------------------------------

/// Incremental canonical encoder feeding a SHA-256 digest.
///
/// The domain tag is absorbed first, separated from the payload by an
/// ASCII unit separator. Field markers: `S` string, `N` integer, `B` raw
/// bytes, `L` sequence count, `0` absent optional.
pub struct DigestWriter {
    hasher: Sha256,
}

impl DigestWriter {
    /// Starts an encoder for the given domain.
    pub fn for_domain(domain: HashDomain) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.tag().as_bytes());
        hasher.update([0x1f]);
        Self { hasher }
    }

    /// Absorbs a string field.
    pub fn text(&mut self, value: &str) -> &mut Self {
        self.hasher.update([b'S']);
        self.hasher.update((value.len() as u32).to_be_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Absorbs an integer field.
    pub fn number(&mut self, value: u64) -> &mut Self {
        self.hasher.update([b'N']);
        self.hasher.update(value.to_be_bytes());
        self
    }

    /// Absorbs an optional integer field.
    pub fn opt_number(&mut self, value: Option<u64>) -> &mut Self {
        match value {
            None => self.absent(),
            Some(value) => self.number(value),
        }
    }

    /// Absorbs raw bytes, such as ids or nested fingerprints.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.hasher.update([b'B']);
        self.hasher.update((value.len() as u32).to_be_bytes());
        self.hasher.update(value);
        self
    }

    /// Marks the start of a sequence with its element count.
    pub fn begin_seq(&mut self, len: usize) -> &mut Self {
        self.hasher.update([b'L']);
        self.hasher.update((len as u32).to_be_bytes());
        self
    }

    /// Marks an absent optional field.
    pub fn absent(&mut self) -> &mut Self {
        self.hasher.update([b'0']);
        self
    }

    /// Finalizes into a fingerprint.
    pub fn finish(self) -> Fingerprint {
        let output = self.hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&output);
        Fingerprint(bytes)
    }
}

// ----------------------------------------------------------------------------
// Value encoders
// ----------------------------------------------------------------------------

fn absorb_term(writer: &mut DigestWriter, term: &Term) {
    writer.text(&term.sym).number(term.scale.into()).begin_seq(term.children.len());
    for child in &term.children {
        absorb_term(writer, child);
    }
}

fn absorb_pattern(writer: &mut DigestWriter, pattern: &Pattern) {
    match &pattern.sym {
        None => writer.absent(),
        Some(sym) => writer.text(sym),
    };
    match &pattern.scale {
        None => {
            writer.absent();
        }
        Some(ScaleFilter::Exact(scale)) => {
            writer.number((*scale).into());
        }
        Some(ScaleFilter::In(scales)) => {
            writer.begin_seq(scales.len());
            for &scale in scales {
                writer.number(scale.into());
            }
        }
    }
    writer.opt_number(pattern.max_children.map(|n| n as u64));
}

fn absorb_action(writer: &mut DigestWriter, action: &Action) {
    writer.text(action.name());
    match action {
        Action::Expand { fanout } => {
            writer.number(*fanout as u64);
        }
        Action::Reduce => {
            writer.absent();
        }
        Action::Custom { params, .. } => {
            // BTreeMap iteration is already sorted by key.
            writer.begin_seq(params.len());
            for (key, value) in params {
                writer.text(key).text(&value.to_string());
            }
        }
    }
}

fn absorb_signature(writer: &mut DigestWriter, signature: &Signature) {
    writer.begin_seq(signature.entries().count());
    for (sym, entry) in signature.entries() {
        writer.text(sym).number(entry.min_children as u64);
        writer.opt_number(entry.max_children.map(|n| n as u64));
        match &entry.scales {
            None => {
                writer.absent();
            }
            Some(scales) => {
                writer.begin_seq(scales.len());
                for &scale in scales {
                    writer.number(scale.into());
                }
            }
        }
    }
}

fn absorb_constraints(writer: &mut DigestWriter, constraints: &StructuralConstraints) {
    writer.opt_number(constraints.max_nodes.map(|n| n as u64));
    writer.opt_number(constraints.max_depth.map(|n| n as u64));
    writer.opt_number(constraints.max_fanout.map(|n| n as u64));
    writer.opt_number(constraints.min_scale.map(u64::from));
    writer.opt_number(constraints.max_scale.map(u64::from));
}

// ----------------------------------------------------------------------------
// High-level fingerprints
// ----------------------------------------------------------------------------

/// Deterministic structural fingerprint for a term tree.
pub fn fingerprint_term(term: &Term) -> Fingerprint {
    let mut writer = DigestWriter::for_domain(HashDomain::Term);
    absorb_term(&mut writer, term);
    writer.finish()
}

/// Fingerprint of a single rule: name, pattern constraints, and action.
pub fn fingerprint_rule(rule: &Rule) -> Fingerprint {
    let mut writer = DigestWriter::for_domain(HashDomain::Rule);
    writer.text(&rule.name);
    absorb_pattern(&mut writer, &rule.pattern);
    absorb_action(&mut writer, &rule.action);
    writer.finish()
}

/// Fingerprint of a signature's symbol declarations.
pub fn fingerprint_signature(signature: &Signature) -> Fingerprint {
    let mut writer = DigestWriter::for_domain(HashDomain::Signature);
    absorb_signature(&mut writer, signature);
    writer.finish()
}

/// Fingerprint of a whole program.
///
/// Captures the name, root structure, budgets, filters, constraints,
/// signature, and every rule, so two programs share a fingerprint exactly
/// when a run of one is a valid replay of the other.
pub fn fingerprint_program(program: &Program) -> Fingerprint {
    let mut writer = DigestWriter::for_domain(HashDomain::Program);
    writer.text(&program.name);
    writer.bytes(fingerprint_term(&program.root).as_bytes());
    writer.number(program.max_steps as u64);
    writer.opt_number(program.max_terms.map(|n| n as u64));

    writer.begin_seq(program.rule_budgets.len());
    for (name, budget) in &program.rule_budgets {
        writer.text(name).number(*budget as u64);
    }
    match &program.include_rules {
        None => {
            writer.absent();
        }
        Some(names) => {
            writer.begin_seq(names.len());
            for name in names {
                writer.text(name);
            }
        }
    }
    writer.begin_seq(program.exclude_rules.len());
    for name in &program.exclude_rules {
        writer.text(name);
    }
    match &program.include_scales {
        None => {
            writer.absent();
        }
        Some(scales) => {
            writer.begin_seq(scales.len());
            for &scale in scales {
                writer.number(scale.into());
            }
        }
    }
    writer.begin_seq(program.exclude_scales.len());
    for &scale in &program.exclude_scales {
        writer.number(scale.into());
    }

    match &program.signature {
        None => {
            writer.absent();
        }
        Some(signature) => {
            writer.bytes(fingerprint_signature(signature).as_bytes());
        }
    }
    match &program.constraints {
        None => {
            writer.absent();
        }
        Some(constraints) => {
            let mut nested = DigestWriter::for_domain(HashDomain::Constraints);
            absorb_constraints(&mut nested, constraints);
            writer.bytes(nested.finish().as_bytes());
        }
    }

    writer.begin_seq(program.rules.len());
    for rule in &program.rules {
        writer.bytes(fingerprint_rule(rule).as_bytes());
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::ActionParams;

    fn sample_rule(name: &str) -> Rule {
        Rule::new(name, Pattern::for_sym("A"), Action::Expand { fanout: 2 })
    }

    #[test]
    fn domains_separate_equal_payloads() {
        let term = {
            let mut writer = DigestWriter::for_domain(HashDomain::Term);
            writer.text("payload");
            writer.finish()
        };
        let rule = {
            let mut writer = DigestWriter::for_domain(HashDomain::Rule);
            writer.text("payload");
            writer.finish()
        };
        assert_ne!(term, rule);
    }

    #[test]
    fn field_boundaries_prevent_splicing() {
        let a = {
            let mut writer = DigestWriter::for_domain(HashDomain::Term);
            writer.text("ab").text("c");
            writer.finish()
        };
        let b = {
            let mut writer = DigestWriter::for_domain(HashDomain::Term);
            writer.text("a").text("bc");
            writer.finish()
        };
        assert_ne!(a, b);
    }

    #[test]
    fn absent_differs_from_zero() {
        let absent = {
            let mut writer = DigestWriter::for_domain(HashDomain::Term);
            writer.opt_number(None);
            writer.finish()
        };
        let zero = {
            let mut writer = DigestWriter::for_domain(HashDomain::Term);
            writer.opt_number(Some(0));
            writer.finish()
        };
        assert_ne!(absent, zero);
    }

    #[test]
    fn term_fingerprint_is_structural() {
        let t1 = Term::new("A", 0, vec![Term::leaf("x", 0), Term::leaf("y", 0)]);
        let t2 = Term::new("A", 0, vec![Term::leaf("x", 0), Term::leaf("y", 0)]);
        let t3 = Term::new("A", 0, vec![Term::leaf("y", 0), Term::leaf("x", 0)]);
        assert_eq!(fingerprint_term(&t1), fingerprint_term(&t2));
        assert_ne!(fingerprint_term(&t1), fingerprint_term(&t3));
    }

    #[test]
    fn scale_participates_in_term_fingerprint() {
        assert_ne!(
            fingerprint_term(&Term::leaf("A", 0)),
            fingerprint_term(&Term::leaf("A", 1)),
        );
    }

    #[test]
    fn rule_fingerprint_covers_action_params() {
        let mut params = ActionParams::new();
        params.insert("k".into(), serde_json::json!(1));
        let r1 = Rule::new(
            "r",
            Pattern::for_sym("A"),
            Action::Custom { name: "annotate".into(), params: params.clone() },
        );
        params.insert("k".into(), serde_json::json!(2));
        let r2 = Rule::new(
            "r",
            Pattern::for_sym("A"),
            Action::Custom { name: "annotate".into(), params },
        );
        assert_ne!(fingerprint_rule(&r1), fingerprint_rule(&r2));
    }

    #[test]
    fn rule_fingerprints_differ_by_name() {
        assert_ne!(
            fingerprint_rule(&sample_rule("grow")),
            fingerprint_rule(&sample_rule("shrink")),
        );
    }

    #[test]
    fn exact_scale_differs_from_singleton_membership() {
        let exact = Rule::new("r", Pattern::for_sym("A").at_scale(2), Action::Reduce);
        let member = Rule::new("r", Pattern::for_sym("A").at_scales([2]), Action::Reduce);
        assert_ne!(fingerprint_rule(&exact), fingerprint_rule(&member));
    }

    #[test]
    fn short_hex_is_sixteen_chars() {
        let fp = fingerprint_term(&Term::leaf("A", 0));
        assert_eq!(fp.short_hex().len(), 16);
        assert!(fp.to_string().starts_with(&fp.short_hex()));
    }
}
