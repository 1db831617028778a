//! Optional collaborators notified after ticks.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentStatus};
use crate::population::{EvolutionTrends, LifecycleEvent, PopulationStats};
use crate::world::Phase;

/// Serialized policy of the fittest living agent at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub agent: AgentId,
    pub fitness: f32,
    pub architecture: Vec<usize>,
    pub serialized: String,
}

/// Aggregate payload forwarded to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickBatch {
    pub tick: u64,
    pub world_tick: u64,
    pub phase: Phase,
    pub stats: PopulationStats,
    pub trends: Option<EvolutionTrends>,
    /// Lifecycle events since the previous batch, in the order they happened.
    pub events: Vec<LifecycleEvent>,
    /// One entry per roster slot.
    pub agents: Vec<AgentStatus>,
    pub policy: Option<PolicySnapshot>,
}

/// Sink invoked after every `snapshot_interval` ticks.
///
/// Implementations must not block the caller for long; hand heavy work to a worker.
/// A panicking observer is isolated and the batch is dropped.
pub trait SimulationObserver: Send {
    fn on_tick(&mut self, batch: &TickBatch);

    /// Whether batches should carry periodic policy snapshots.
    fn wants_policy_snapshots(&self) -> bool {
        true
    }
}

/// No-op observer.
#[derive(Debug, Default)]
pub struct NullObserver;

impl SimulationObserver for NullObserver {
    fn on_tick(&mut self, _batch: &TickBatch) {}

    fn wants_policy_snapshots(&self) -> bool {
        false
    }
}
