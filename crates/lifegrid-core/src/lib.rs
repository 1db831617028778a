//! Simulation engine for LifeGrid: a toroidal physical substrate, perceiving agents driven
//! by neural policies, and a steady-state evolutionary population.
//!
//! One tick is a [`GridWorld::step`] followed by a [`Population::update`]; the
//! [`Simulation`] host runs that loop, applies [`ControlCommand`]s between ticks, and feeds
//! optional [`SimulationObserver`]s.

pub mod agent;
pub mod config;
pub mod observer;
pub mod population;
pub mod sim;
pub mod world;

pub use agent::{
    Action, Agent, AgentId, AgentStatus, Experience, INPUT_LEN, NeighborView, Outcome,
    VisionSample, sample_action,
};
pub use config::{AgentConfig, ConfigError, GridConfig, PopulationConfig, SimulationConfig};
pub use observer::{NullObserver, PolicySnapshot, SimulationObserver, TickBatch};
pub use population::{
    EvolutionTrends, LifecycleEvent, Population, PopulationExport, PopulationStats,
};
pub use sim::{ControlCommand, Simulation, TickEvents, apply_control_command};
pub use world::{
    Core, CoreState, CoreTransition, EnergyManifestation, FIELD_COUNT, GridWorld, Phase,
    PhysicalReading, ScalarField, WorldSnapshot, reading_confidence,
};

pub use lifegrid_brain::{NeuralPolicy, PolicyError, SimRng};
