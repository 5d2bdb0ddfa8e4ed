//! Structured trace records and the sinks that receive them.
//!
//! The kernel and the domain processes never format text. They hand
//! [`TraceRecord`]s to a [`TraceSink`] owned by the simulation context;
//! what happens next (collecting, logging, writing a file) is up to the sink.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::types::{SimTime, UeId};

/// The controller channel a request was made against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Signaling,
    Data,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Signaling => write!(f, "signaling"),
            ChannelKind::Data => write!(f, "data"),
        }
    }
}

/// Radio resource control state of a UE.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RrcState {
    Idle,
    Dch,
}

impl fmt::Display for RrcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RrcState::Idle => write!(f, "IDLE"),
            RrcState::Dch => write!(f, "DCH"),
        }
    }
}

/// Whether a failed handshake aborts the data send of the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeMode {
    /// Idle to DCH; failure means no data is sent this cycle.
    Hard,
    /// DCH to Idle; failure is absorbed and the UE stays in DCH.
    Soft,
}

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    RequestEnqueued,
    RequestGranted,
    RequestCompleted,
    RequestBlocked,
    TransitionSucceeded,
    TransitionFailed,
}

/// Kind-specific detail of a record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceDetail {
    Channel {
        channel: ChannelKind,
        /// Signaling message index, `None` for data
        message: Option<usize>,
        /// Wait queue length right after the operation
        queue_length: usize,
        /// Time waited in queue (grants) or held (completions)
        elapsed: SimTime,
    },
    Transition {
        from: RrcState,
        to: RrcState,
        mode: HandshakeMode,
        messages_sent: usize,
    },
}

/// A single structured trace record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub time: SimTime,
    pub ue: UeId,
    pub kind: TraceKind,
    pub detail: TraceDetail,
}

impl TraceRecord {
    /// Returns the channel of a channel record.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self.detail {
            TraceDetail::Channel { channel, .. } => Some(channel),
            TraceDetail::Transition { .. } => None,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}: ue {} ", self.time, self.ue)?;
        match &self.detail {
            TraceDetail::Channel {
                channel,
                message,
                queue_length,
                ..
            } => {
                let what = match message {
                    Some(index) => format!("{} message {}", channel, index),
                    None => format!("{} packet", channel),
                };
                let verb = match self.kind {
                    TraceKind::RequestEnqueued => "enqueued",
                    TraceKind::RequestGranted => "granted",
                    TraceKind::RequestCompleted => "completed",
                    TraceKind::RequestBlocked => "blocked",
                    _ => "?",
                };
                write!(f, "{} {} (queue {})", what, verb, queue_length)
            }
            TraceDetail::Transition {
                from,
                to,
                mode,
                messages_sent,
            } => {
                let outcome = if self.kind == TraceKind::TransitionSucceeded {
                    "succeeded"
                } else {
                    "failed"
                };
                write!(
                    f,
                    "{:?} transition {} -> {} {} after {} messages",
                    mode, from, to, outcome, messages_sent
                )
            }
        }
    }
}

/// Receives structured trace records.
pub trait TraceSink {
    fn record(&mut self, record: TraceRecord);
}

impl<S: TraceSink + ?Sized> TraceSink for Box<S> {
    fn record(&mut self, record: TraceRecord) {
        (**self).record(record);
    }
}

/// A sink that drops every record.
#[derive(Debug, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _record: TraceRecord) {}
}

/// A sink that collects records in memory.
///
/// Clones share the same buffer, so a test can keep one handle and give
/// the other to the simulation.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<TraceRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all records collected so far.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.borrow().clone()
    }

    /// Takes the collected records, leaving the buffer empty.
    pub fn take(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl TraceSink for MemorySink {
    fn record(&mut self, record: TraceRecord) {
        self.records.borrow_mut().push(record);
    }
}

/// A sink that renders records as `tracing` events.
///
/// Channel records are logged at `debug`, transitions at `info`, and
/// failures (blocked requests, failed transitions) at `warn`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&mut self, record: TraceRecord) {
        match record.kind {
            TraceKind::RequestBlocked | TraceKind::TransitionFailed => {
                tracing::warn!(target: "rncsim::trace", time = record.time, ue = record.ue, "{}", record)
            }
            TraceKind::TransitionSucceeded => {
                tracing::info!(target: "rncsim::trace", time = record.time, ue = record.ue, "{}", record)
            }
            _ => {
                tracing::debug!(target: "rncsim::trace", time = record.time, ue = record.ue, "{}", record)
            }
        }
    }
}

/// Forwards every record to two sinks.
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: TraceSink, B: TraceSink> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: TraceSink, B: TraceSink> TraceSink for Tee<A, B> {
    fn record(&mut self, record: TraceRecord) {
        self.first.record(record.clone());
        self.second.record(record);
    }
}
