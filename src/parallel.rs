//! Independent replications of one scenario.
//!
//! Every replication gets its own scheduler, controller and generator, so
//! they share nothing but the configuration. With the `parallel` feature
//! they are spread over a rayon thread pool; without it they run one after
//! another. Reports come back in seed order either way.
//!
//! # Feature Flag
//!
//! ```toml
//! [dependencies]
//! rncsim = { version = "0.1", features = ["parallel"] }
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;
use crate::simulation::{RncSimulation, SimulationReport, SimulationResult};
use crate::trace::NullSink;

/// Runs one replication per seed.
#[derive(Clone, Debug)]
pub struct Replications {
    config: SimConfig,
    /// Number of worker threads (0 = rayon default)
    num_threads: usize,
}

impl Replications {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            num_threads: 0,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// Pass 0 for automatic detection. Ignored without the `parallel`
    /// feature.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_threads = threads;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs every seed sequentially.
    #[cfg(not(feature = "parallel"))]
    pub fn run(&self, seeds: &[u64]) -> SimulationResult<Vec<SimulationReport>> {
        seeds.iter().map(|&seed| self.run_one(seed)).collect()
    }

    /// Runs the seeds on a rayon thread pool.
    #[cfg(feature = "parallel")]
    pub fn run(&self, seeds: &[u64]) -> SimulationResult<Vec<SimulationReport>> {
        let run_all = || {
            seeds
                .par_iter()
                .map(|&seed| self.run_one(seed))
                .collect::<SimulationResult<Vec<_>>>()
        };

        if self.num_threads == 0 {
            return run_all();
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
        {
            Ok(pool) => pool.install(run_all),
            Err(err) => {
                tracing::warn!(error = %err, "could not build thread pool, using the global one");
                run_all()
            }
        }
    }

    /// Runs a single replication with `seed`.
    pub fn run_one(&self, seed: u64) -> SimulationResult<SimulationReport> {
        let mut config = self.config.clone();
        config.simulation.seed = seed;
        tracing::debug!(seed, "replication started");
        RncSimulation::with_sink(&config, NullSink)?.run()
    }
}

/// Runs `config` once per seed.
pub fn run_replications(config: &SimConfig, seeds: &[u64]) -> SimulationResult<Vec<SimulationReport>> {
    Replications::new(config.clone()).run(seeds)
}

/// Mean, minimum and maximum of one metric over replications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Spread {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for value in values {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            mean: sum / count as f64,
            min,
            max,
        }
    }
}

/// Cross-replication summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSummary {
    pub replications: usize,
    pub data_sent: Spread,
    pub requests_blocked: Spread,
    /// Blocked requests over all requests submitted, per run
    pub blocking_probability: Spread,
    pub events_processed: Spread,
}

impl ReplicationSummary {
    pub fn from_reports(reports: &[SimulationReport]) -> Self {
        Self {
            replications: reports.len(),
            data_sent: Spread::of(reports.iter().map(|r| r.stats.total_data_sent() as f64)),
            requests_blocked: Spread::of(reports.iter().map(|r| r.stats.total_blocked() as f64)),
            blocking_probability: Spread::of(reports.iter().map(|r| {
                let blocked = r.stats.total_blocked() as f64;
                let accepted: u64 = r.stats.channels.values().map(|c| c.accepted).sum();
                let submitted = blocked + accepted as f64;
                if submitted > 0.0 {
                    blocked / submitted
                } else {
                    0.0
                }
            })),
            events_processed: Spread::of(reports.iter().map(|r| r.run.events_processed as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfigBuilder;
    use crate::sampling::Distribution;

    fn random_config() -> SimConfig {
        SimConfigBuilder::new()
            .horizon(50.0)
            .ue_count(4)
            .inter_packet_time(Distribution::Exponential { mean: 3.0 })
            .signaling(1, Distribution::Uniform { min: 0.5, max: 1.5 })
            .build()
            .unwrap()
    }

    #[test]
    fn test_reports_in_seed_order() {
        let reports = Replications::new(random_config())
            .with_threads(2)
            .run(&[5, 6, 7])
            .unwrap();

        let seeds: Vec<u64> = reports.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![5, 6, 7]);
    }

    #[test]
    fn test_same_seed_same_trace() {
        let reports = run_replications(&random_config(), &[11, 11]).unwrap();
        assert_eq!(reports[0].trace, reports[1].trace);
        assert_eq!(reports[0].run.events_processed, reports[1].run.events_processed);
    }

    #[test]
    fn test_summary() {
        let reports = run_replications(&random_config(), &[1, 2, 3]).unwrap();
        let summary = ReplicationSummary::from_reports(&reports);

        assert_eq!(summary.replications, 3);
        assert!(summary.data_sent.min <= summary.data_sent.mean);
        assert!(summary.data_sent.mean <= summary.data_sent.max);
        assert!((0.0..=1.0).contains(&summary.blocking_probability.mean));
    }

    #[test]
    fn test_empty_spread() {
        assert_eq!(ReplicationSummary::from_reports(&[]).data_sent, Spread::default());
    }
}
