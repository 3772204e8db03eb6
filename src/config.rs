//! Run configuration: TOML file plus command-line overrides.
//!
//! Every field has a default matching the reference scenario (three nodes,
//! 30 m range, one staggered broadcast per node, 10 s run), so the binary runs
//! without any configuration file.

use anyhow::Context;
use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::simulation::geometry::Rectangle;
use crate::simulation::mobility::{GridPositionAllocator, RandomWalkParameters};
use crate::simulation::socket::DEFAULT_PORT;

/// Highest node count the /24 addressing plan leaves room for.
pub const MAX_NODES: u32 = 250;

/// Shortest random walk leg, in seconds.
pub const MIN_LEG_DURATION: f64 = 1e-3;

#[derive(Parser, Debug)]
#[command(name = "range-broadcast-sim")]
#[command(version)]
#[command(about = "Range-limited broadcast of timestamped payloads between simulated nodes", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of nodes
    #[arg(long)]
    pub n_wifi: Option<u32>,

    /// Log every send, not only receptions
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub verbose: Option<bool>,

    /// Write send and delivery records to the trace file
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub tracing: Option<bool>,

    /// Maximum communication range in meters
    #[arg(long)]
    pub max_range: Option<f64>,

    /// Seed for positions and movement
    #[arg(long)]
    pub seed: Option<u64>,

    /// Simulated stop time in seconds
    #[arg(long)]
    pub stop_time: Option<f64>,

    /// Trace output path
    #[arg(long)]
    pub trace_file: Option<PathBuf>,

    /// Drop packets with malformed payloads instead of decoding them as zero
    #[arg(long)]
    pub strict_decode: bool,

    /// Extra value appended to every payload (repeatable)
    #[arg(long = "aux-field", allow_negative_numbers = true)]
    pub aux_fields: Vec<f64>,
}

impl Cli {
    /// Load the configuration file if one was given and apply the flags on top.
    pub fn into_config(self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path).map_err(anyhow::Error::msg)?,
            None => SimulationConfig::default(),
        };

        if let Some(n_wifi) = self.n_wifi {
            config.n_wifi = n_wifi;
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
        if let Some(tracing) = self.tracing {
            config.tracing = tracing;
        }
        if let Some(max_range) = self.max_range {
            config.max_range = max_range;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(stop_time) = self.stop_time {
            config.stop_time = stop_time;
        }
        if let Some(trace_file) = self.trace_file {
            config.trace_file = trace_file;
        }
        if self.strict_decode {
            config.payload.strict_decode = true;
        }
        if !self.aux_fields.is_empty() {
            config.payload.aux_fields = self.aux_fields;
        }

        config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub n_wifi: u32,
    pub verbose: bool,
    pub tracing: bool,
    /// Meters.
    pub max_range: f64,
    pub seed: u64,
    /// Seconds.
    pub stop_time: f64,
    pub trace_file: PathBuf,
    pub port: u16,
    pub network: Ipv4Addr,
    pub prefix_len: u8,
    /// Seconds between a send and its arrival at every receiver.
    pub propagation_delay: f64,
    pub send: SendPolicy,
    pub payload: PayloadConfig,
    pub mobility: MobilityConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_wifi: 3,
            verbose: true,
            tracing: false,
            max_range: 30.0,
            seed: 12,
            stop_time: 10.0,
            trace_file: PathBuf::from("broadcast-trace.jsonl"),
            port: DEFAULT_PORT,
            network: Ipv4Addr::new(10, 1, 3, 0),
            prefix_len: 24,
            propagation_delay: 0.0,
            send: SendPolicy::default(),
            payload: PayloadConfig::default(),
            mobility: MobilityConfig::default(),
        }
    }
}

/// When each node broadcasts. Node `i`'s `k`-th send fires at
/// `first_send + i * stagger + k * repeat_interval`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SendPolicy {
    pub first_send: f64,
    pub stagger: f64,
    pub sends_per_node: u32,
    pub repeat_interval: f64,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            first_send: 0.0,
            stagger: 1.0,
            sends_per_node: 1,
            repeat_interval: 1.0,
        }
    }
}

impl SendPolicy {
    /// Send times in seconds for `node_index`, in schedule order.
    pub fn send_times(&self, node_index: u32) -> impl Iterator<Item = f64> + '_ {
        let base = self.first_send + self.stagger * node_index as f64;
        (0..self.sends_per_node).map(move |k| base + self.repeat_interval * k as f64)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PayloadConfig {
    /// Digits after the decimal point; shortest exact rendering when absent.
    pub precision: Option<usize>,
    pub strict_decode: bool,
    /// Values appended after the timestamp.
    pub aux_fields: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MobilityModel {
    Static,
    #[default]
    RandomWalk,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct MobilityConfig {
    pub model: MobilityModel,
    pub grid: GridPositionAllocator,
    pub random_walk: RandomWalkParameters,
}

impl SimulationConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Returns
    /// * `Ok(SimulationConfig)` if the file was read and parsed
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file {}: {}", config_path.display(), e))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Reject configurations that cannot be simulated.
    ///
    /// Checks:
    /// - Node count between 1 and `MAX_NODES`
    /// - Finite, positive range and stop time
    /// - Non-negative delays and send offsets
    /// - Every time fits in a `Duration`
    /// - Mobility bounds, speeds, leg length and grid width
    pub fn validate(&self) -> Result<(), String> {
        if self.n_wifi == 0 {
            return Err("At least one node is required".to_string());
        }
        if self.n_wifi > MAX_NODES {
            return Err(format!("Too many nodes: {}, no more than {}", self.n_wifi, MAX_NODES));
        }
        if !self.max_range.is_finite() || self.max_range <= 0.0 {
            return Err(format!("Invalid max_range {}, must be a positive number of meters", self.max_range));
        }
        if !self.stop_time.is_finite() || self.stop_time <= 0.0 {
            return Err(format!("Invalid stop_time {}, must be positive", self.stop_time));
        }
        if !is_non_negative(self.propagation_delay) {
            return Err(format!("Invalid propagation_delay {}, must be non-negative", self.propagation_delay));
        }
        // Deliveries land at most `propagation_delay` after the last permitted send
        if !is_representable(self.stop_time + self.propagation_delay) {
            return Err(format!(
                "stop_time {} plus propagation_delay {} is too large to simulate",
                self.stop_time, self.propagation_delay
            ));
        }
        if self.prefix_len > 30 {
            return Err(format!("Invalid prefix_len {}, must leave room for hosts", self.prefix_len));
        }

        let send = &self.send;
        if !is_non_negative(send.first_send) || !is_non_negative(send.stagger) || !is_non_negative(send.repeat_interval) {
            return Err("Send offsets and intervals must be non-negative".to_string());
        }
        // Stagger and interval are non-negative, so the last node's last send is the latest
        if let Some(latest) = send.send_times(self.n_wifi - 1).last() {
            if !is_representable(latest) {
                return Err(format!("Latest send time {}s is too large to simulate", latest));
            }
        }

        if self.mobility.grid.grid_width == 0 {
            return Err("Invalid grid_width, must be positive".to_string());
        }
        let walk = &self.mobility.random_walk;
        if !valid_bounds(&walk.bounds) {
            return Err(format!("Invalid random walk bounds {:?}", walk.bounds));
        }
        if !is_non_negative(walk.speed_min) || !walk.speed_max.is_finite() || walk.speed_min > walk.speed_max {
            return Err(format!("Invalid speed range {}..{}", walk.speed_min, walk.speed_max));
        }
        if !is_representable(walk.leg_duration) || walk.leg_duration < MIN_LEG_DURATION {
            return Err(format!("Invalid leg_duration {}, must be at least {}s", walk.leg_duration, MIN_LEG_DURATION));
        }

        Ok(())
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Whether `seconds` converts to a `Duration` without overflow.
fn is_representable(seconds: f64) -> bool {
    Duration::try_from_secs_f64(seconds).is_ok()
}

fn valid_bounds(bounds: &Rectangle) -> bool {
    [bounds.x_min, bounds.x_max, bounds.y_min, bounds.y_max].iter().all(|v| v.is_finite()) && bounds.x_min <= bounds.x_max && bounds.y_min <= bounds.y_max
}
