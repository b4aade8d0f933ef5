//! Octave: a scale-aware term rewriting runtime.
//!
//! This crate implements a small rewriting interpreter whose distinguishing
//! feature is an explicit *scale* label on every term, with a pair of
//! built-in operators that move terms between adjacent scales:
//! - expansion lifts a term to scale `s+1` as an `F(sym)` motif bundle, and
//! - reduction collapses `F(x)` back to `x` at scale `s-1`,
//!
//! preserving the coherence identity `reduce(expand(t)) = t`.
//!
//! # Name Origin: "Octave"
//!
//! Moving a musical motif up an octave doubles its frequency while leaving
//! its identity intact. The runtime treats scale the same way: expansion
//! and reduction transpose structure between adjacent scales without losing
//! what the structure means, and the round trip lands exactly where it
//! started.
//!
//! # Architecture
//!
//! Terms are hash-consed into a content-addressed store, so equal content
//! shares one id and snapshots rebuild bit-identically. A scheduler (FIFO,
//! LIFO, or seeded random) orders the frontier of terms awaiting rewrite;
//! the runtime drives one rule application per step under a set of guards
//! (step budget, term cap, per-rule budgets, rule and scale filters) and
//! emits one event per applied rewrite. Every run is resumable from a JSON
//! snapshot of the full runtime state.
//!
//! # Citations
//! - Term rewriting systems: Baader & Nipkow, "Term Rewriting and All That" (1998)
//! - Hash-consing: Filliâtre & Conchon, "Type-safe modular hash-consing" (2006)
//!
//! # Example
//!
//! ```
//! use octave::prelude::*;
//!
//! let program = parse_program(
//!     "(program demo
//!        (root A)
//!        (rules
//!          (rule up (pattern :sym A) (action expand :fanout 1))
//!          (rule down (pattern :sym F(A)) (action reduce)))
//!        (max_steps 2))",
//! ).unwrap();
//! let execution = Interpreter::new().run(&program, &RunOptions::default()).unwrap();
//! assert_eq!(execution.summary.events, 2);
//! assert!(execution.summary.idle);
//! ```

pub mod fingerprint;
pub mod metrics;
pub mod program;
pub mod rewrite;
pub mod runtime;
pub mod scheduler;
pub mod signature;
pub mod snapshot;
pub mod store;
pub mod surface;
pub mod term;
pub mod trace;

pub use program::{validate_program, Execution, Interpreter, Program, RunError, RunOptions, ValidationError};
pub use rewrite::{expand, reduce, Action, ActionHandler, ActionOutcome, ActionRegistry, Pattern, Rule};
pub use runtime::{Event, RunOutcome, Runtime, RuntimeConfig, StepError, StepOutcome, Summary};
pub use scheduler::{make_scheduler, Scheduler, SchedulerKind};
pub use signature::{Signature, SignatureError};
pub use snapshot::{resume_runtime, ResumeOverrides, Snapshot, SnapshotError};
pub use store::{StoreError, TermRecord, TermStore};
pub use surface::{parse_program, ParseError};
pub use term::{Term, TermId};
pub use trace::{JsonlTracer, Tracer};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::fingerprint::{fingerprint_program, fingerprint_term, Fingerprint};
    pub use crate::metrics::{measure_structure, StructuralConstraints, StructuralMetrics};
    pub use crate::program::{validate_program, Execution, Interpreter, Program, RunOptions};
    pub use crate::rewrite::{expand, reduce, Action, Pattern, Rule};
    pub use crate::runtime::{Event, RunOutcome, Runtime, RuntimeConfig, Summary};
    pub use crate::scheduler::{make_scheduler, SchedulerKind};
    pub use crate::signature::Signature;
    pub use crate::snapshot::{resume_runtime, ResumeOverrides, Snapshot};
    pub use crate::store::TermStore;
    pub use crate::surface::parse_program;
    pub use crate::term::{Term, TermId};
    pub use crate::trace::JsonlTracer;
}
