//! Configuration system for the simulation.
//!
//! This module provides YAML/JSON configuration file support for describing
//! a controller scenario declaratively.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   horizon: 15.0
//!   seed: 42
//!   log_level: info
//!   record_trace: true
//!
//! ues:
//!   count: 2
//!   t_dch: 5.0
//!   number_of_signalling_messages: 3
//!   inter_packet_time:
//!     type: fixed
//!     value: 2.0
//!   retrial_inter_packet_time:
//!     type: exponential
//!     mean: 1.0
//!
//! controller:
//!   signaling:
//!     queue_length: 10
//!     service_time:
//!       type: fixed
//!       value: 2.0
//!   data:
//!     queue_length: 10
//!     service_time:
//!       type: uniform
//!       min: 0.5
//!       max: 1.5
//! ```
//!
//! Every field has a default, so an empty document is the reference
//! scenario: two UEs, three signalling messages every 2 time units, a
//! signaling channel busy for 2 time units per message, run until 15.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::sampling::Distribution;
use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global run parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Virtual time at which the run stops
    #[serde(default = "default_horizon")]
    pub horizon: SimTime,

    /// Seed of the generator behind every distribution
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to keep the full trace in the report
    #[serde(default = "default_true")]
    pub record_trace: bool,
}

fn default_horizon() -> SimTime {
    15.0
}

fn default_seed() -> u64 {
    42
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            seed: default_seed(),
            log_level: default_log_level(),
            record_trace: true,
        }
    }
}

/// Parameters shared by every UE.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UeConfig {
    /// Number of UEs
    #[serde(default = "default_ue_count")]
    pub count: usize,

    /// DCH inactivity budget
    #[serde(default = "default_t_dch")]
    pub t_dch: SimTime,

    /// Signaling messages per handshake
    #[serde(default = "default_signalling_messages")]
    pub number_of_signalling_messages: usize,

    #[serde(default = "default_inter_packet_time")]
    pub inter_packet_time: Distribution,

    /// Interval used after a failed cycle
    #[serde(default = "default_retrial_inter_packet_time")]
    pub retrial_inter_packet_time: Distribution,
}

fn default_ue_count() -> usize {
    2
}

fn default_t_dch() -> SimTime {
    5.0
}

fn default_signalling_messages() -> usize {
    3
}

fn default_inter_packet_time() -> Distribution {
    Distribution::Fixed { value: 2.0 }
}

fn default_retrial_inter_packet_time() -> Distribution {
    Distribution::Fixed { value: 1.0 }
}

impl Default for UeConfig {
    fn default() -> Self {
        Self {
            count: default_ue_count(),
            t_dch: default_t_dch(),
            number_of_signalling_messages: default_signalling_messages(),
            inter_packet_time: default_inter_packet_time(),
            retrial_inter_packet_time: default_retrial_inter_packet_time(),
        }
    }
}

/// One controller channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Requests allowed to wait while the channel is held
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    pub service_time: Distribution,
}

fn default_queue_length() -> usize {
    10
}

fn default_signaling_channel() -> ChannelConfig {
    ChannelConfig {
        queue_length: default_queue_length(),
        service_time: Distribution::Fixed { value: 2.0 },
    }
}

fn default_data_channel() -> ChannelConfig {
    ChannelConfig {
        queue_length: default_queue_length(),
        service_time: Distribution::Fixed { value: 1.0 },
    }
}

/// The controller's two channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_signaling_channel")]
    pub signaling: ChannelConfig,

    #[serde(default = "default_data_channel")]
    pub data: ChannelConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            signaling: default_signaling_channel(),
            data: default_data_channel(),
        }
    }
}

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationParams,

    #[serde(default)]
    pub ues: UeConfig,

    #[serde(default)]
    pub controller: ControllerConfig,
}

impl SimConfig {
    /// Creates the reference configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let horizon = self.simulation.horizon;
        if !(horizon >= 0.0 && horizon.is_finite()) {
            return Err(ConfigError::Validation(format!(
                "simulation.horizon must be a finite non-negative time, got {}",
                horizon
            )));
        }

        let ues = &self.ues;
        if !(ues.t_dch >= 0.0 && ues.t_dch.is_finite()) {
            return Err(ConfigError::Validation(format!(
                "ues.t_dch must be a finite non-negative time, got {}",
                ues.t_dch
            )));
        }
        ues.inter_packet_time.validate("ues.inter_packet_time")?;
        ues.retrial_inter_packet_time
            .validate("ues.retrial_inter_packet_time")?;

        self.controller
            .signaling
            .service_time
            .validate("controller.signaling.service_time")?;
        self.controller
            .data
            .service_time
            .validate("controller.data.service_time")?;

        if ues.count == 0 {
            tracing::warn!("ues.count is 0, the run will be empty");
        }
        if ues.number_of_signalling_messages == 0 {
            tracing::warn!("ues.number_of_signalling_messages is 0, handshakes succeed without signaling");
        }
        // Zero-length cycles would spin at a single instant.
        if ues.retrial_inter_packet_time.is_zero() {
            return Err(ConfigError::Validation(
                "ues.retrial_inter_packet_time must not always yield 0".to_string(),
            ));
        }
        if ues.inter_packet_time.is_zero() && self.controller.data.service_time.is_zero() {
            return Err(ConfigError::Validation(
                "ues.inter_packet_time and controller.data.service_time cannot both always yield 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a new builder starting from the reference configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn horizon(mut self, horizon: SimTime) -> Self {
        self.config.simulation.horizon = horizon;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.simulation.seed = seed;
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn record_trace(mut self, enable: bool) -> Self {
        self.config.simulation.record_trace = enable;
        self
    }

    pub fn ue_count(mut self, count: usize) -> Self {
        self.config.ues.count = count;
        self
    }

    pub fn t_dch(mut self, t_dch: SimTime) -> Self {
        self.config.ues.t_dch = t_dch;
        self
    }

    pub fn signalling_messages(mut self, n: usize) -> Self {
        self.config.ues.number_of_signalling_messages = n;
        self
    }

    pub fn inter_packet_time(mut self, dist: Distribution) -> Self {
        self.config.ues.inter_packet_time = dist;
        self
    }

    pub fn retrial_inter_packet_time(mut self, dist: Distribution) -> Self {
        self.config.ues.retrial_inter_packet_time = dist;
        self
    }

    /// Sets queue limit and service time of the signaling channel.
    pub fn signaling(mut self, queue_length: usize, service_time: Distribution) -> Self {
        self.config.controller.signaling = ChannelConfig {
            queue_length,
            service_time,
        };
        self
    }

    /// Sets queue limit and service time of the data channel.
    pub fn data(mut self, queue_length: usize, service_time: Distribution) -> Self {
        self.config.controller.data = ChannelConfig {
            queue_length,
            service_time,
        };
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
