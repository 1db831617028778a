//! Fixed-size roster with steady-state evolution.
//!
//! Slots are an arena indexed `0..size`. A dying agent is replaced synchronously in its own
//! slot, inside the same [`Population::update`] call, so the roster size never changes at any
//! observation point. A replacement born mid-tick shows up in that tick's statistics without
//! having acted yet.

use std::collections::VecDeque;

use lifegrid_brain::{PolicyError, SimRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::agent::{Agent, AgentId, AgentStatus, NeighborView};
use crate::config::{AgentConfig, ConfigError, PopulationConfig};
use crate::world::GridWorld;

/// Mean living-count drift between trend windows still considered stable.
const STABILITY_TOLERANCE: f32 = 0.5;

/// Aggregates over the living roster at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub tick: u64,
    pub population_size: usize,
    pub living: usize,
    pub total_energy: f32,
    pub average_energy: f32,
    pub total_age: u64,
    pub average_age: f32,
    pub total_fitness: f32,
    pub average_fitness: f32,
    pub max_fitness: f32,
    pub best_fitness_ever: f32,
    pub generation: u64,
    pub total_deaths: u64,
}

/// Recent-versus-prior comparison over the statistics history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvolutionTrends {
    pub recent_average_fitness: f32,
    pub prior_average_fitness: f32,
    pub fitness_delta: f32,
    pub living_delta: f32,
    pub population_stable: bool,
}

/// Birth, death, and mutation notifications for persistence collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Birth {
        tick: u64,
        slot: usize,
        agent: AgentId,
        parent: Option<AgentId>,
        generation: u32,
    },
    Death {
        tick: u64,
        slot: usize,
        agent: AgentId,
        age: u64,
        fitness: f32,
        total_energy_gained: f32,
    },
    Mutation {
        tick: u64,
        agent: AgentId,
        parent: AgentId,
        mutated_parameters: usize,
    },
    ForcedEvolution {
        tick: u64,
        slot: usize,
        replaced: AgentId,
        parent: AgentId,
    },
}

/// Serializable summary of the evolutionary state, including the best policy seen so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationExport {
    pub generation: u64,
    pub total_deaths: u64,
    pub best_fitness_ever: f32,
    pub statistics: PopulationStats,
    pub best_agent: Option<AgentStatus>,
    pub best_policy: Option<String>,
}

/// Steady-state population controller.
#[derive(Debug)]
pub struct Population {
    config: PopulationConfig,
    agent_config: AgentConfig,
    grid_size: u32,
    rng: SimRng,
    agents: Vec<Agent>,
    next_id: u64,
    generation: u64,
    total_deaths: u64,
    best_fitness_ever: f32,
    best_snapshot: Option<Agent>,
    history: VecDeque<PopulationStats>,
    events: Vec<LifecycleEvent>,
    neighbors: Vec<NeighborView>,
}

impl Population {
    pub fn new(
        config: PopulationConfig,
        agent_config: AgentConfig,
        grid_size: u32,
        rng: SimRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        agent_config.validate()?;
        let mut population = Self {
            config,
            agent_config,
            grid_size,
            rng,
            agents: Vec::with_capacity(config.size),
            next_id: 0,
            generation: 0,
            total_deaths: 0,
            best_fitness_ever: 0.0,
            best_snapshot: None,
            history: VecDeque::with_capacity(config.history_capacity),
            events: Vec::new(),
            neighbors: Vec::with_capacity(config.size),
        };
        population.reset();
        Ok(population)
    }

    /// Replace the whole roster with fresh random agents and clear every counter.
    pub fn reset(&mut self) {
        self.agents.clear();
        self.events.clear();
        self.history.clear();
        self.next_id = 0;
        self.generation = 0;
        self.total_deaths = 0;
        self.best_fitness_ever = 0.0;
        self.best_snapshot = None;
        for slot in 0..self.config.size {
            let id = self.allocate_id();
            let agent = Agent::random(id, self.agent_config, self.grid_size, &mut self.rng);
            self.events.push(LifecycleEvent::Birth {
                tick: 0,
                slot,
                agent: id,
                parent: None,
                generation: 0,
            });
            self.agents.push(agent);
        }
        info!(size = self.config.size, "population initialised");
    }

    fn allocate_id(&mut self) -> AgentId {
        let id = AgentId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Advance every slot once, replacing the dead in place, then record statistics.
    pub fn update(&mut self, world: &mut GridWorld, tick: u64) {
        for slot in 0..self.agents.len() {
            if !self.agents[slot].is_alive() {
                self.replace(slot, tick);
                continue;
            }
            self.neighbors.clear();
            self.neighbors.extend(
                self.agents
                    .iter()
                    .enumerate()
                    .filter(|(index, agent)| *index != slot && agent.is_alive())
                    .map(|(_, agent)| agent.neighbor_view()),
            );
            let alive = self.agents[slot].update(world, &self.neighbors, tick, &mut self.rng);
            if !alive {
                self.replace(slot, tick);
            }
        }
        self.record_stats(tick);
    }

    fn replace(&mut self, slot: usize, tick: u64) {
        let dead = &self.agents[slot];
        self.events.push(LifecycleEvent::Death {
            tick,
            slot,
            agent: dead.id,
            age: dead.age,
            fitness: dead.fitness,
            total_energy_gained: dead.total_energy_gained,
        });
        if dead.fitness > self.best_fitness_ever {
            self.best_fitness_ever = dead.fitness;
            self.best_snapshot = Some(dead.clone());
        }
        debug!(slot, agent = %dead.id, fitness = dead.fitness, age = dead.age, "agent died");

        let child = self.offspring(self.fittest_living(Some(slot)), tick);
        self.events.push(LifecycleEvent::Birth {
            tick,
            slot,
            agent: child.id,
            parent: child.parent,
            generation: child.generation,
        });
        self.agents[slot] = child;
        self.generation += 1;
        self.total_deaths += 1;
    }

    /// Mutated child of the agent in `parent_slot`, or a fresh random agent without one.
    fn offspring(&mut self, parent_slot: Option<usize>, tick: u64) -> Agent {
        let id = self.allocate_id();
        let Some(parent_slot) = parent_slot else {
            debug!(agent = %id, "no living parent; spawning a random agent");
            return Agent::random(id, self.agent_config, self.grid_size, &mut self.rng);
        };
        let parent = &self.agents[parent_slot];
        let (child, mutated) = parent.reproduce_counted(
            id,
            &mut self.rng,
            self.config.mutation_rate,
            self.config.mutation_strength,
        );
        self.events.push(LifecycleEvent::Mutation {
            tick,
            agent: id,
            parent: parent.id,
            mutated_parameters: mutated,
        });
        child
    }

    /// Slot of the living agent with the highest fitness; ties go to the lowest slot.
    fn fittest_living(&self, exclude: Option<usize>) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (slot, agent) in self.agents.iter().enumerate() {
            if Some(slot) == exclude || !agent.is_alive() {
                continue;
            }
            if best.is_none_or(|(_, fitness)| agent.fitness > fitness) {
                best = Some((slot, agent.fitness));
            }
        }
        best.map(|(slot, _)| slot)
    }

    fn weakest_living(&self, exclude: Option<usize>) -> Option<usize> {
        let mut worst: Option<(usize, f32)> = None;
        for (slot, agent) in self.agents.iter().enumerate() {
            if Some(slot) == exclude || !agent.is_alive() {
                continue;
            }
            if worst.is_none_or(|(_, fitness)| agent.fitness < fitness) {
                worst = Some((slot, agent.fitness));
            }
        }
        worst.map(|(slot, _)| slot)
    }

    /// Replace the weakest living agent with an offspring of the strongest.
    ///
    /// Returns `false` without changes when fewer than two agents are alive.
    pub fn force_evolution(&mut self, tick: u64) -> bool {
        let Some(strongest) = self.fittest_living(None) else {
            return false;
        };
        let Some(weakest) = self.weakest_living(Some(strongest)) else {
            return false;
        };
        let replaced = self.agents[weakest].id;
        let parent = self.agents[strongest].id;
        let child = self.offspring(Some(strongest), tick);
        self.events.push(LifecycleEvent::ForcedEvolution {
            tick,
            slot: weakest,
            replaced,
            parent,
        });
        self.events.push(LifecycleEvent::Birth {
            tick,
            slot: weakest,
            agent: child.id,
            parent: child.parent,
            generation: child.generation,
        });
        self.agents[weakest] = child;
        self.generation += 1;
        info!(slot = weakest, %replaced, %parent, "forced evolution");
        true
    }

    pub fn living_entities(&self) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(|agent| agent.is_alive())
    }

    /// Current aggregates over the living roster.
    #[must_use]
    pub fn stats(&self, tick: u64) -> PopulationStats {
        let mut stats = PopulationStats {
            tick,
            population_size: self.agents.len(),
            best_fitness_ever: self.best_fitness_ever,
            generation: self.generation,
            total_deaths: self.total_deaths,
            ..PopulationStats::default()
        };
        for agent in self.living_entities() {
            stats.living += 1;
            stats.total_energy += agent.energy;
            stats.total_age += agent.age;
            stats.total_fitness += agent.fitness;
            stats.max_fitness = stats.max_fitness.max(agent.fitness);
        }
        if stats.living > 0 {
            let living = stats.living as f32;
            stats.average_energy = stats.total_energy / living;
            stats.average_age = stats.total_age as f32 / living;
            stats.average_fitness = stats.total_fitness / living;
        }
        stats
    }

    fn record_stats(&mut self, tick: u64) {
        let stats = self.stats(tick);
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(stats);
    }

    /// Compare the newest trend window against the one before it.
    ///
    /// `None` until the history holds two full windows.
    #[must_use]
    pub fn evolution_trends(&self) -> Option<EvolutionTrends> {
        let window = self.config.trend_window;
        if self.history.len() < window * 2 {
            return None;
        }
        let start = self.history.len() - window * 2;
        let prior = self.history.range(start..start + window);
        let recent = self.history.range(start + window..);
        let recent_fitness = window_mean(recent.clone(), |s| s.average_fitness);
        let prior_fitness = window_mean(prior.clone(), |s| s.average_fitness);
        let living_delta =
            window_mean(recent, |s| s.living as f32) - window_mean(prior, |s| s.living as f32);
        Some(EvolutionTrends {
            recent_average_fitness: recent_fitness,
            prior_average_fitness: prior_fitness,
            fitness_delta: recent_fitness - prior_fitness,
            living_delta,
            population_stable: living_delta.abs() < STABILITY_TOLERANCE,
        })
    }

    pub fn export_population_state(&self, tick: u64) -> Result<PopulationExport, PolicyError> {
        let best_policy = self
            .best_snapshot
            .as_ref()
            .map(|agent| agent.policy().serialize())
            .transpose()?;
        Ok(PopulationExport {
            generation: self.generation,
            total_deaths: self.total_deaths,
            best_fitness_ever: self.best_fitness_ever,
            statistics: self.stats(tick),
            best_agent: self.best_snapshot.as_ref().map(Agent::status),
            best_policy,
        })
    }

    /// Take the lifecycle events accumulated since the last drain.
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Mutable slot access; the roster length cannot change through it.
    #[must_use]
    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    #[must_use]
    pub fn history(&self) -> &VecDeque<PopulationStats> {
        &self.history
    }

    #[must_use]
    pub fn best_snapshot(&self) -> Option<&Agent> {
        self.best_snapshot.as_ref()
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn total_deaths(&self) -> u64 {
        self.total_deaths
    }

    #[must_use]
    pub const fn best_fitness_ever(&self) -> f32 {
        self.best_fitness_ever
    }

    #[must_use]
    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }
}

fn window_mean<'a>(
    window: impl ExactSizeIterator<Item = &'a PopulationStats>,
    value: impl Fn(&PopulationStats) -> f32,
) -> f32 {
    let len = window.len();
    if len == 0 {
        return 0.0;
    }
    window.map(value).sum::<f32>() / len as f32
}
