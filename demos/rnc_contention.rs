//! RNC contention example.
//!
//! Several UEs share one radio network controller. Each UE must complete
//! a signaling handshake before it can send data, and falls back to IDLE
//! when it stays quiet for longer than its DCH budget. The signaling
//! channel has a short wait queue, so under load some handshakes are
//! rejected and the UE retries with a shorter interval.
//!
//! Run with an optional config file:
//!
//! ```text
//! cargo run --example rnc_contention -- demos/rnc.yaml
//! ```
//!
//! Set `RUST_LOG=rncsim::trace=debug` to see every channel record.

use std::error::Error;

use rncsim::config::{SimConfig, SimConfigBuilder};
use rncsim::parallel::{ReplicationSummary, Replications};
use rncsim::sampling::Distribution;
use rncsim::simulation::RncSimulation;

const REPLICATIONS: u64 = 8;

fn default_scenario() -> Result<SimConfig, Box<dyn Error>> {
    Ok(SimConfigBuilder::new()
        .horizon(120.0)
        .seed(2024)
        .ue_count(8)
        .t_dch(5.0)
        .signalling_messages(3)
        .inter_packet_time(Distribution::Exponential { mean: 6.0 })
        .retrial_inter_packet_time(Distribution::Uniform { min: 0.5, max: 2.0 })
        .signaling(2, Distribution::Exponential { mean: 0.6 })
        .data(4, Distribution::Fixed { value: 0.5 })
        .build()?)
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_file(path)?,
        None => default_scenario()?,
    };
    rncsim::init_logging(&config.simulation.log_level);

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              RNC Contention Simulation                   ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║   UEs:               {:<36}║", config.ues.count);
    println!("║   Horizon:           {:<36}║", config.simulation.horizon);
    println!("║   Signaling msgs:    {:<36}║", config.ues.number_of_signalling_messages);
    println!("║   Signaling queue:   {:<36}║", config.controller.signaling.queue_length);
    println!("║   Data queue:        {:<36}║", config.controller.data.queue_length);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    // ========================================================================
    // Single Run
    // ========================================================================
    let report = RncSimulation::from_config(&config)?.run()?;

    println!("First trace records:");
    for record in report.trace.iter().take(20) {
        println!("  {}", record);
    }
    if report.trace.len() > 20 {
        println!("  ... {} more", report.trace.len() - 20);
    }
    println!();

    println!("{}", report.stats.summary());

    if !report.run.leaked.is_empty() {
        println!("Resources still held at the horizon:");
        for leak in &report.run.leaked {
            println!("  {} held by {}", leak.resource_name, leak.holder_name);
        }
        println!();
    }

    // ========================================================================
    // Replications
    // ========================================================================
    let seeds: Vec<u64> = (0..REPLICATIONS).map(|i| config.simulation.seed + i).collect();
    let reports = Replications::new(config).run(&seeds)?;
    let summary = ReplicationSummary::from_reports(&reports);

    println!("Across {} replications:", summary.replications);
    println!(
        "  Data sent:            mean {:.1} (min {:.0}, max {:.0})",
        summary.data_sent.mean, summary.data_sent.min, summary.data_sent.max
    );
    println!(
        "  Blocking probability: mean {:.3} (min {:.3}, max {:.3})",
        summary.blocking_probability.mean,
        summary.blocking_probability.min,
        summary.blocking_probability.max
    );

    Ok(())
}
