//! Event tracing sinks.
//!
//! A tracer is any sink accepting event records one at a time in step
//! order. Tracers must not back-pressure the stepping loop: when a sink
//! fails, the runtime detaches it and logs a warning once rather than
//! propagating the failure into the run.

use crate::runtime::Event;
use std::fmt;
use std::io::Write;

/// Error raised by a tracing sink.
#[derive(Debug)]
pub enum TraceError {
    /// The underlying writer failed.
    Io(std::io::Error),
    /// The event did not serialize.
    Serialize(String),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceError::Io(err) => write!(f, "trace sink i/o error: {}", err),
            TraceError::Serialize(msg) => write!(f, "trace sink serialize error: {}", msg),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<std::io::Error> for TraceError {
    fn from(err: std::io::Error) -> Self {
        TraceError::Io(err)
    }
}

/// Consumer of ordered event records.
pub trait Tracer {
    /// Accepts one event; events arrive in step order.
    fn record(&mut self, event: &Event) -> Result<(), TraceError>;
}

/// Line-delimited JSON sink over any writer.
///
/// One event per line, flushed per record so a crash mid-run loses at most
/// the event in flight.
pub struct JsonlTracer<W: Write> {
    sink: W,
}

impl<W: Write> JsonlTracer<W> {
    /// Wraps a writer.
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Tracer for JsonlTracer<W> {
    fn record(&mut self, event: &Event) -> Result<(), TraceError> {
        let line = serde_json::to_string(event)
            .map_err(|err| TraceError::Serialize(err.to_string()))?;
        self.sink.write_all(line.as_bytes())?;
        self.sink.write_all(b"\n")?;
        self.sink.flush()?;
        Ok(())
    }
}

/// In-memory sink collecting events, for tests and embedding.
#[derive(Debug, Default)]
pub struct VecTracer {
    events: Vec<Event>,
}

impl VecTracer {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// The events recorded so far.
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl Tracer for VecTracer {
    fn record(&mut self, event: &Event) -> Result<(), TraceError> {
        self.events.push(event.clone());
        Ok(())
    }
}
