//! # rncsim
//!
//! A discrete-event simulation of a radio network controller (RNC) shared
//! by a population of user equipments (UEs).
//!
//! ## Design Principles
//!
//! - **Cooperative processes**: every simulated actor is a [`Process`], an
//!   explicit state machine the [`Scheduler`] resumes with one event at a
//!   time. Only one process runs between suspension points.
//! - **Deterministic ordering**: events are ordered by `(time, sequence)`,
//!   so equal-time events fire in the order they were scheduled.
//! - **Bounded FIFO resources**: a [`Resource`] has one holder, a wait
//!   queue of bounded length, and rejects requests when the queue is full.
//! - **Structured observation**: the model emits [`TraceRecord`]s to a
//!   [`TraceSink`]; rendering is left to the sink.
//!
//! ## Features
//!
//! - `parallel` - Run independent replications on a rayon thread pool
//!
//! ## Quick Start
//!
//! ```rust
//! use rncsim::config::SimConfigBuilder;
//! use rncsim::simulation::RncSimulation;
//! use rncsim::trace::NullSink;
//!
//! let config = SimConfigBuilder::new()
//!     .horizon(15.0)
//!     .ue_count(2)
//!     .signalling_messages(3)
//!     .build()
//!     .unwrap();
//!
//! let report = RncSimulation::with_sink(&config, NullSink)
//!     .unwrap()
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(report.run.final_time, 15.0);
//! println!("{}", report.stats.summary());
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use rncsim::config::SimConfig;
//!
//! let config = SimConfig::from_file("scenario.yaml")?;
//! let report = rncsim::simulation::run_config(&config)?;
//! ```

pub mod types;
pub mod error;
pub mod event;
pub mod process;
pub mod resource;
pub mod scheduler;
pub mod trace;
pub mod sampling;
pub mod model;
pub mod config;
pub mod simulation;
pub mod stats;
pub mod parallel;

// Re-export commonly used types
pub use types::{ProcessId, ResourceId, SimTime, UeId};
pub use error::{SimError, SimResult};
pub use event::{Event, EventQueue, Wakeup};
pub use process::{Process, ProcessState, Progress, Yield};
pub use resource::{Admission, Hold, Resource};
pub use scheduler::{RunReport, Scheduler, SimContext, StopReason};
pub use trace::{MemorySink, TraceKind, TraceRecord, TraceSink, TracingSink};
pub use sampling::{Distribution, Sampler};
pub use model::{ControlPlane, Controller, UeStatus, UserEquipment};
pub use config::{ConfigError, SimConfig, SimConfigBuilder};
pub use simulation::{RncSimulation, SimulationError, SimulationReport};
pub use stats::{SimulationStats, StatsCollector, Timer};
pub use parallel::{run_replications, ReplicationSummary, Replications};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// rncsim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
