//! Static configuration for a LifeGrid run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating configuration or building simulation state.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The configuration document could not be parsed.
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Physical substrate parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// Edge length of the square toroidal grid.
    pub grid_size: u32,
    /// Number of stateful cores seeded at reset; constant for the run.
    pub core_count: usize,
    /// Share of the 8-neighbour average blended into each temperature cell per step.
    pub temperature_blend: f32,
    /// Amplitude of uniform noise added to temperature per step.
    pub temperature_noise: f32,
    /// Multiplicative decay of the upper catalyser layer on emit steps.
    pub upper_decay: f32,
    /// Ceiling of the upper catalyser layer.
    pub upper_max: f32,
    /// Lower catalyser level at a core's cell that starts incubation.
    pub incubation_threshold: f32,
    /// Local temperature an incubating core needs on each qualifying step.
    pub bloom_temperature: f32,
    /// Consecutive qualifying steps before a core blooms.
    pub bloom_ticks: u32,
    /// World ticks a bloom lasts before the core returns to dormancy.
    pub bloom_duration: u64,
    /// Catalyser released into the lower layer when a bloom ends.
    pub bloom_release: f32,
    /// World ticks an unconsumed energy manifestation survives.
    pub energy_lifetime: u64,
    /// Energy granted to an agent that consumes a manifestation.
    pub energy_reward: f32,
    /// World ticks between consumption and the core relocating.
    pub relocation_delay: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_size: 64,
            core_count: 50,
            temperature_blend: 0.1,
            temperature_noise: 0.01,
            upper_decay: 0.8,
            upper_max: 2.0,
            incubation_threshold: 0.2,
            bloom_temperature: 0.2,
            bloom_ticks: 5,
            bloom_duration: 5,
            bloom_release: 0.1,
            energy_lifetime: 5,
            energy_reward: 10.0,
            relocation_delay: 3,
        }
    }
}

/// Per-agent metabolism, memory, and learning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Energy assigned at spawn.
    pub initial_energy: f32,
    /// Energy lost every update regardless of action.
    pub passive_decay: f32,
    /// Experiences retained before the oldest is evicted.
    pub memory_capacity: usize,
    /// Ticks a reward outcome stays in the trailing window.
    pub reward_window: u64,
    /// Outcome pushed when energy is collected.
    pub gain_reward: f32,
    /// Energy below which the low-energy penalty applies.
    pub low_energy_threshold: f32,
    /// Outcome pushed while energy is below the threshold.
    pub low_energy_penalty: f32,
    /// Step size of the in-lifetime output nudge.
    pub learning_rate: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            initial_energy: 100.0,
            passive_decay: 0.5,
            memory_capacity: 50,
            reward_window: 10,
            gain_reward: 1.0,
            low_energy_threshold: 20.0,
            low_energy_penalty: -0.1,
            learning_rate: 0.001,
        }
    }
}

/// Steady-state evolution parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PopulationConfig {
    /// Fixed number of agent slots.
    pub size: usize,
    /// Per-parameter probability of mutation in offspring.
    pub mutation_rate: f32,
    /// Standard deviation of mutation noise.
    pub mutation_strength: f32,
    /// Maximum number of per-tick statistics snapshots retained.
    pub history_capacity: usize,
    /// Snapshots per window when comparing recent against prior trends.
    pub trend_window: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: 5,
            mutation_rate: 0.1,
            mutation_strength: 0.1,
            history_capacity: 100,
            trend_window: 10,
        }
    }
}

/// Complete configuration for a [`crate::Simulation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Ticks between observer batches; 0 disables notifications.
    pub snapshot_interval: u64,
    /// Ticks between best-policy snapshots handed to observers; 0 disables them.
    pub policy_snapshot_interval: u64,
    pub grid: GridConfig,
    pub agent: AgentConfig,
    pub population: PopulationConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            snapshot_interval: 1,
            policy_snapshot_interval: 100,
            grid: GridConfig::default(),
            agent: AgentConfig::default(),
            population: PopulationConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.agent.validate()?;
        self.population.validate()
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size < 3 {
            return Err(ConfigError::InvalidConfig("grid_size must be at least 3"));
        }
        if !(0.0..=1.0).contains(&self.temperature_blend) {
            return Err(ConfigError::InvalidConfig(
                "temperature_blend must be within [0, 1]",
            ));
        }
        if self.temperature_noise < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "temperature_noise must be non-negative",
            ));
        }
        if !(0.0..=1.0).contains(&self.upper_decay) {
            return Err(ConfigError::InvalidConfig("upper_decay must be within [0, 1]"));
        }
        if self.upper_max <= 0.0 {
            return Err(ConfigError::InvalidConfig("upper_max must be positive"));
        }
        if self.incubation_threshold < 0.0
            || self.bloom_temperature < 0.0
            || self.bloom_release < 0.0
            || self.energy_reward < 0.0
        {
            return Err(ConfigError::InvalidConfig(
                "core thresholds, release, and reward must be non-negative",
            ));
        }
        if self.bloom_ticks == 0 {
            return Err(ConfigError::InvalidConfig("bloom_ticks must be non-zero"));
        }
        Ok(())
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_energy <= 0.0 {
            return Err(ConfigError::InvalidConfig("initial_energy must be positive"));
        }
        if self.passive_decay < 0.0 || self.learning_rate < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "passive_decay and learning_rate must be non-negative",
            ));
        }
        if self.memory_capacity == 0 {
            return Err(ConfigError::InvalidConfig("memory_capacity must be non-zero"));
        }
        Ok(())
    }
}

impl PopulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::InvalidConfig("population size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::InvalidConfig(
                "mutation_rate must be within [0, 1]",
            ));
        }
        if self.mutation_strength < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "mutation_strength must be non-negative",
            ));
        }
        if self.trend_window == 0 || self.history_capacity < self.trend_window * 2 {
            return Err(ConfigError::InvalidConfig(
                "history_capacity must hold two non-empty trend windows",
            ));
        }
        Ok(())
    }
}
