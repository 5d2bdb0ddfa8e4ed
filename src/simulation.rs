//! Assembles a complete controller scenario from a [`SimConfig`] and runs it.
//!
//! One `StdRng` seeded from the config feeds every distribution, so a run is
//! fully determined by its configuration.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, SimConfig};
use crate::error::SimError;
use crate::model::{ChannelParams, Controller, UeParams, UeStatus, UserEquipment};
use crate::scheduler::{RunReport, Scheduler, SimContext};
use crate::stats::{SimulationStats, StatsCollector, Timer};
use crate::trace::{ChannelKind, MemorySink, Tee, TraceRecord, TraceSink, TracingSink};
use crate::types::{ProcessId, UeId};

/// Errors from building or running a simulation.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("simulation aborted: {0}")]
    Sim(#[from] SimError),
}

/// Result type for simulation operations.
pub type SimulationResult<T> = Result<T, SimulationError>;

/// Final view of one UE.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UeReport {
    pub id: UeId,
    pub process: ProcessId,
    pub status: UeStatus,
}

/// Everything a finished run produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub run: RunReport,
    pub ues: Vec<UeReport>,
    /// Full trace; empty unless `record_trace` is set
    pub trace: Vec<TraceRecord>,
    pub stats: SimulationStats,
}

/// A controller and its UEs, ready to run.
pub struct RncSimulation {
    config: SimConfig,
    scheduler: Scheduler,
    controller: Rc<Controller>,
    ues: Vec<(ProcessId, Rc<Cell<UeStatus>>)>,
    trace: Option<MemorySink>,
    collector: StatsCollector,
}

impl RncSimulation {
    /// Builds the scenario, rendering the trace through `tracing`.
    pub fn from_config(config: &SimConfig) -> SimulationResult<Self> {
        Self::with_sink(config, TracingSink)
    }

    /// Builds the scenario with `observer` receiving every trace record.
    pub fn with_sink<S: TraceSink + 'static>(
        config: &SimConfig,
        observer: S,
    ) -> SimulationResult<Self> {
        config.validate()?;

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(config.simulation.seed)));
        let collector = StatsCollector::new();
        let trace = config.simulation.record_trace.then(MemorySink::new);

        let sink: Box<dyn TraceSink> = match &trace {
            Some(memory) => Box::new(Tee::new(collector.clone(), Tee::new(memory.clone(), observer))),
            None => Box::new(Tee::new(collector.clone(), observer)),
        };
        let mut ctx = SimContext::new(sink);

        let channels = &config.controller;
        let controller = Rc::new(Controller::new(
            &mut ctx,
            ChannelParams::new(
                channels.signaling.queue_length,
                channels.signaling.service_time.sampler(rng.clone())?,
            ),
            ChannelParams::new(
                channels.data.queue_length,
                channels.data.service_time.sampler(rng.clone())?,
            ),
        ));

        let mut scheduler = Scheduler::new(ctx);
        let mut ues = Vec::with_capacity(config.ues.count);
        for id in 0..config.ues.count {
            let params = UeParams {
                t_dch: config.ues.t_dch,
                number_of_signalling_messages: config.ues.number_of_signalling_messages,
                inter_packet_time: config.ues.inter_packet_time.sampler(rng.clone())?,
                retrial_inter_packet_time: config
                    .ues
                    .retrial_inter_packet_time
                    .sampler(rng.clone())?,
            };
            let ue = UserEquipment::new(id, params, controller.clone());
            let monitor = ue.monitor();
            let process = scheduler.spawn(ue)?;
            ues.push((process, monitor));
        }

        tracing::debug!(
            ues = config.ues.count,
            seed = config.simulation.seed,
            "simulation assembled"
        );

        Ok(Self {
            config: config.clone(),
            scheduler,
            controller,
            ues,
            trace,
            collector,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Current status of every UE, by id.
    pub fn ue_statuses(&self) -> Vec<UeStatus> {
        self.ues.iter().map(|(_, monitor)| monitor.get()).collect()
    }

    /// Runs to the configured horizon.
    pub fn run(mut self) -> SimulationResult<SimulationReport> {
        let horizon = self.config.simulation.horizon;
        let seed = self.config.simulation.seed;
        tracing::info!(horizon, seed, ues = self.ues.len(), "simulation started");

        let mut stats = SimulationStats::new().with_name("rnc");
        stats.metadata.seed = seed;
        stats.metadata.version = env!("CARGO_PKG_VERSION").to_string();
        stats.record_start();

        let timer = Timer::start();
        let run = self.scheduler.run(horizon)?;
        let wall_time_ms = timer.elapsed_ms();

        let statuses = self.ue_statuses();
        let channels = [
            (ChannelKind::Signaling, self.controller.signaling_resource()),
            (ChannelKind::Data, self.controller.data_resource()),
        ];
        let mut stats = self.collector.finish(stats, &run, &channels, &statuses);
        stats.record_end();
        stats.compute_timing(wall_time_ms);

        let ues = self
            .ues
            .iter()
            .zip(statuses)
            .enumerate()
            .map(|(id, ((process, _), status))| UeReport {
                id,
                process: *process,
                status,
            })
            .collect();

        tracing::info!(
            final_time = run.final_time,
            events = run.events_processed,
            data_sent = stats.total_data_sent(),
            blocked = stats.total_blocked(),
            "simulation finished"
        );

        Ok(SimulationReport {
            seed,
            run,
            ues,
            trace: self.trace.map(|memory| memory.take()).unwrap_or_default(),
            stats,
        })
    }
}

/// Builds and runs one simulation.
pub fn run_config(config: &SimConfig) -> SimulationResult<SimulationReport> {
    RncSimulation::from_config(config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigBuilder;
    use crate::scheduler::StopReason;
    use crate::trace::{NullSink, RrcState, TraceKind};

    #[test]
    fn test_reference_scenario() {
        let report = RncSimulation::with_sink(&SimConfig::default(), NullSink)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.run.stop_reason, StopReason::HorizonReached);
        assert_eq!(report.run.final_time, 15.0);
        assert_eq!(report.ues.len(), 2);
        assert!(!report.trace.is_empty());

        // Both UEs send their first signaling message at t=2; one waits.
        let first_grants: Vec<(f64, usize)> = report
            .trace
            .iter()
            .filter(|r| r.kind == TraceKind::RequestGranted)
            .take(2)
            .map(|r| (r.time, r.ue))
            .collect();
        assert_eq!(first_grants, vec![(2.0, 0), (4.0, 1)]);
    }

    #[test]
    fn test_trace_can_be_disabled() {
        let config = SimConfigBuilder::new().record_trace(false).build().unwrap();
        let report = RncSimulation::with_sink(&config, NullSink)
            .unwrap()
            .run()
            .unwrap();

        assert!(report.trace.is_empty());
        assert!(report.run.records_emitted > 0);
        assert!(report.stats.ues[0].signaling_completed > 0);
    }

    #[test]
    fn test_observer_sees_every_record() {
        let observer = MemorySink::new();
        let report = RncSimulation::with_sink(&SimConfig::default(), observer.clone())
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(observer.records(), report.trace);
        assert_eq!(observer.len() as u64, report.run.records_emitted);
    }

    #[test]
    fn test_no_ues_is_an_empty_run() {
        let config = SimConfigBuilder::new().ue_count(0).build().unwrap();
        let report = RncSimulation::with_sink(&config, NullSink)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(report.run.stop_reason, StopReason::Exhausted);
        assert_eq!(report.run.final_time, 0.0);
        assert!(report.ues.is_empty());
    }

    #[test]
    fn test_statuses_start_idle() {
        let sim = RncSimulation::with_sink(&SimConfig::default(), NullSink).unwrap();
        assert!(sim
            .ue_statuses()
            .iter()
            .all(|status| status.state == RrcState::Idle));
        assert_eq!(sim.scheduler().process_count(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SimConfig::default();
        config.simulation.horizon = -3.0;
        assert!(matches!(
            RncSimulation::from_config(&config),
            Err(SimulationError::Config(_))
        ));
    }
}
