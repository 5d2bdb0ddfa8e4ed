//! Statistics collection and export for controller simulations.
//!
//! A [`StatsCollector`] is a trace sink that tallies records while the run
//! is in progress. At the end it is combined with the scheduler's
//! [`RunReport`] into a [`SimulationStats`], which can be exported as JSON,
//! CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use crate::model::UeStatus;
use crate::scheduler::{RunReport, StopReason};
use crate::trace::{
    ChannelKind, HandshakeMode, RrcState, TraceDetail, TraceKind, TraceRecord, TraceSink,
};
use crate::types::{ResourceId, SimTime, UeId};

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Simulation metadata
    pub metadata: SimulationMetadata,

    /// Scheduler-level statistics
    pub engine: EngineStats,

    /// Per-channel statistics
    pub channels: BTreeMap<ChannelKind, ChannelStats>,

    /// Per-UE statistics, ordered by id
    pub ues: Vec<UeStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Simulation name/description
    pub name: String,

    /// Seed of the run
    pub seed: u64,

    /// Configured horizon
    pub horizon: SimTime,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,
}

/// Scheduler-level statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Final simulation time
    pub final_time: SimTime,

    /// Why the run stopped
    pub stop_reason: Option<StopReason>,

    /// Total events processed
    pub events_processed: u64,

    /// Events left in the queue
    pub pending_events: usize,

    /// Largest number of simultaneously pending events
    pub peak_pending_events: usize,

    /// Processes still suspended when the run stopped
    pub abandoned_processes: usize,

    /// Resources still held when the run stopped
    pub leaked_holds: usize,

    /// Trace records emitted
    pub records_emitted: u64,
}

/// Statistics for one controller channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub resource: ResourceId,
    pub name: String,
    pub max_queue_length: usize,
    pub accepted: u64,
    pub granted: u64,
    pub blocked: u64,
    pub completed: u64,
    pub peak_queue_length: usize,
    pub busy_time: SimTime,
    pub utilization: f64,
    /// Mean time between request and grant over all grants
    pub mean_wait: SimTime,
    pub max_wait: SimTime,
}

/// Statistics for one UE.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UeStats {
    pub id: UeId,
    pub final_state: RrcState,
    pub retry: bool,
    pub cycles: u64,
    pub data_sent: u64,
    pub send_failures: u64,
    pub hard_succeeded: u64,
    pub hard_failed: u64,
    pub soft_succeeded: u64,
    pub soft_failed: u64,
    pub signaling_completed: u64,
    pub signaling_blocked: u64,
    pub data_blocked: u64,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulation time per wall-clock second
    pub sim_time_per_second: f64,

    /// Events processed per second
    pub events_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the simulation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_now());
    }

    /// Copies the scheduler view of the run.
    pub fn record_run(&mut self, run: &RunReport) {
        self.metadata.horizon = run.horizon;
        self.engine = EngineStats {
            final_time: run.final_time,
            stop_reason: Some(run.stop_reason),
            events_processed: run.events_processed,
            pending_events: run.pending_events,
            peak_pending_events: run.peak_pending_events,
            abandoned_processes: run.abandoned.len(),
            leaked_holds: run.leaked.len(),
            records_emitted: run.records_emitted,
        };
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = self.engine.final_time / seconds;
            self.timing.events_per_second = self.engine.events_processed as f64 / seconds;
        }
    }

    /// Total data packets sent by all UEs.
    pub fn total_data_sent(&self) -> u64 {
        self.ues.iter().map(|ue| ue.data_sent).sum()
    }

    /// Total requests rejected by either channel.
    pub fn total_blocked(&self) -> u64 {
        self.channels.values().map(|c| c.blocked).sum()
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");

        csv.push_str(&format!("final_time,{}\n", self.engine.final_time));
        csv.push_str(&format!("events_processed,{}\n", self.engine.events_processed));
        csv.push_str(&format!("pending_events,{}\n", self.engine.pending_events));
        csv.push_str(&format!("peak_pending_events,{}\n", self.engine.peak_pending_events));
        csv.push_str(&format!("abandoned_processes,{}\n", self.engine.abandoned_processes));
        csv.push_str(&format!("leaked_holds,{}\n", self.engine.leaked_holds));
        csv.push_str(&format!("data_sent,{}\n", self.total_data_sent()));
        csv.push_str(&format!("requests_blocked,{}\n", self.total_blocked()));

        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("sim_time_per_second,{:.2}\n", self.timing.sim_time_per_second));
        csv.push_str(&format!("events_per_second,{:.2}\n", self.timing.events_per_second));

        csv
    }

    /// Exports summary statistics to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-channel statistics to CSV.
    pub fn channels_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("channel,max_queue_length,accepted,granted,blocked,completed,peak_queue_length,busy_time,utilization,mean_wait,max_wait\n");

        for (kind, stats) in &self.channels {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{:.4},{:.4},{}\n",
                kind,
                stats.max_queue_length,
                stats.accepted,
                stats.granted,
                stats.blocked,
                stats.completed,
                stats.peak_queue_length,
                stats.busy_time,
                stats.utilization,
                stats.mean_wait,
                stats.max_wait,
            ));
        }

        csv
    }

    /// Exports per-UE statistics to CSV.
    pub fn ues_to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("ue,final_state,retry,cycles,data_sent,send_failures,hard_succeeded,hard_failed,soft_succeeded,soft_failed,signaling_completed,signaling_blocked,data_blocked\n");

        for ue in &self.ues {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
                ue.id,
                ue.final_state,
                ue.retry,
                ue.cycles,
                ue.data_sent,
                ue.send_failures,
                ue.hard_succeeded,
                ue.hard_failed,
                ue.soft_succeeded,
                ue.soft_failed,
                ue.signaling_completed,
                ue.signaling_blocked,
                ue.data_blocked,
            ));
        }

        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        writeln!(w, "Seed: {}", self.metadata.seed)?;
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Engine ---")?;
        writeln!(
            w,
            "Final simulation time: {} (horizon {})",
            self.engine.final_time, self.metadata.horizon
        )?;
        if let Some(reason) = self.engine.stop_reason {
            writeln!(w, "Stopped: {:?}", reason)?;
        }
        writeln!(w, "Events processed: {}", self.engine.events_processed)?;
        writeln!(w, "Pending events: {}", self.engine.pending_events)?;
        writeln!(w, "Abandoned processes: {}", self.engine.abandoned_processes)?;
        writeln!(w, "Leaked holds: {}", self.engine.leaked_holds)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Sim time/sec: {:.2}", self.timing.sim_time_per_second)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Channels ---")?;
        for (kind, stats) in &self.channels {
            writeln!(w, "{} ({}):", kind, stats.name)?;
            writeln!(
                w,
                "  Accepted: {}, Blocked: {}, Completed: {}",
                stats.accepted, stats.blocked, stats.completed
            )?;
            writeln!(
                w,
                "  Peak queue: {}/{}, Utilization: {:.1}%",
                stats.peak_queue_length,
                stats.max_queue_length,
                stats.utilization * 100.0
            )?;
            writeln!(w, "  Wait: mean {:.3}, max {:.3}", stats.mean_wait, stats.max_wait)?;
        }
        writeln!(w)?;

        writeln!(w, "--- UEs ---")?;
        for ue in &self.ues {
            writeln!(
                w,
                "UE {}: {} retry={} cycles={} sent={} failed={}",
                ue.id, ue.final_state, ue.retry, ue.cycles, ue.data_sent, ue.send_failures
            )?;
            writeln!(
                w,
                "  Hard: {} ok / {} failed, Soft: {} ok / {} failed",
                ue.hard_succeeded, ue.hard_failed, ue.soft_succeeded, ue.soft_failed
            )?;
        }

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

fn unix_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

#[derive(Clone, Debug, Default)]
struct UeTally {
    hard_succeeded: u64,
    hard_failed: u64,
    soft_succeeded: u64,
    soft_failed: u64,
    signaling_completed: u64,
    signaling_blocked: u64,
    data_blocked: u64,
}

#[derive(Clone, Debug, Default)]
struct WaitTally {
    grants: u64,
    total: SimTime,
    max: SimTime,
}

#[derive(Debug, Default)]
struct Tally {
    ues: BTreeMap<UeId, UeTally>,
    waits: BTreeMap<ChannelKind, WaitTally>,
}

/// A trace sink that tallies per-UE and per-channel counters.
///
/// Clones share the same counters: hand one to the simulation context and
/// keep the other to call [`StatsCollector::finish`].
#[derive(Clone, Debug, Default)]
pub struct StatsCollector {
    tally: Rc<RefCell<Tally>>,
}

impl StatsCollector {
    /// Creates a new collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Combines the tallies with the end-of-run views.
    ///
    /// `channels` maps each controller channel to its resource id in
    /// `run.resources`; `ues` lists the final status of every UE by id.
    pub fn finish(
        &self,
        mut stats: SimulationStats,
        run: &RunReport,
        channels: &[(ChannelKind, ResourceId)],
        ues: &[UeStatus],
    ) -> SimulationStats {
        let tally = self.tally.borrow();
        stats.record_run(run);

        for &(kind, resource) in channels {
            let Some(report) = run.resources.iter().find(|r| r.id == resource) else {
                continue;
            };
            let waits = tally.waits.get(&kind).cloned().unwrap_or_default();
            stats.channels.insert(
                kind,
                ChannelStats {
                    resource,
                    name: report.name.clone(),
                    max_queue_length: report.max_queue_length,
                    accepted: report.stats.accepted,
                    granted: report.stats.granted,
                    blocked: report.stats.blocked,
                    completed: report.stats.completed,
                    peak_queue_length: report.stats.peak_queue_length,
                    busy_time: report.busy_time,
                    utilization: report.utilization,
                    mean_wait: if waits.grants > 0 {
                        waits.total / waits.grants as f64
                    } else {
                        0.0
                    },
                    max_wait: waits.max,
                },
            );
        }

        stats.ues = ues
            .iter()
            .enumerate()
            .map(|(id, status)| {
                let counts = tally.ues.get(&id).cloned().unwrap_or_default();
                UeStats {
                    id,
                    final_state: status.state,
                    retry: status.retry,
                    cycles: status.cycles,
                    data_sent: status.data_sent,
                    send_failures: status.send_failures,
                    hard_succeeded: counts.hard_succeeded,
                    hard_failed: counts.hard_failed,
                    soft_succeeded: counts.soft_succeeded,
                    soft_failed: counts.soft_failed,
                    signaling_completed: counts.signaling_completed,
                    signaling_blocked: counts.signaling_blocked,
                    data_blocked: counts.data_blocked,
                }
            })
            .collect();

        stats
    }
}

impl TraceSink for StatsCollector {
    fn record(&mut self, record: TraceRecord) {
        let mut guard = self.tally.borrow_mut();
        let tally = &mut *guard;
        let ue = tally.ues.entry(record.ue).or_default();

        match record.detail {
            TraceDetail::Channel {
                channel, elapsed, ..
            } => match (record.kind, channel) {
                (TraceKind::RequestGranted, _) => {
                    let waits = tally.waits.entry(channel).or_default();
                    waits.grants += 1;
                    waits.total += elapsed;
                    waits.max = waits.max.max(elapsed);
                }
                (TraceKind::RequestCompleted, ChannelKind::Signaling) => ue.signaling_completed += 1,
                (TraceKind::RequestBlocked, ChannelKind::Signaling) => ue.signaling_blocked += 1,
                (TraceKind::RequestBlocked, ChannelKind::Data) => ue.data_blocked += 1,
                _ => {}
            },
            TraceDetail::Transition { mode, .. } => {
                let succeeded = record.kind == TraceKind::TransitionSucceeded;
                let counter = match (mode, succeeded) {
                    (HandshakeMode::Hard, true) => &mut ue.hard_succeeded,
                    (HandshakeMode::Hard, false) => &mut ue.hard_failed,
                    (HandshakeMode::Soft, true) => &mut ue.soft_succeeded,
                    (HandshakeMode::Soft, false) => &mut ue.soft_failed,
                };
                *counter += 1;
            }
        }
    }
}
