//! Tick loop host tying the world, the population, and observers together.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use lifegrid_brain::SimRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentId, AgentStatus};
use crate::config::{ConfigError, SimulationConfig};
use crate::observer::{NullObserver, PolicySnapshot, SimulationObserver, TickBatch};
use crate::population::{LifecycleEvent, Population};
use crate::world::GridWorld;

/// Outcome of a single [`Simulation::step`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickEvents {
    /// Host tick after the step completed.
    pub tick: u64,
    pub world_tick: u64,
    pub births: usize,
    pub deaths: usize,
    pub best_fitness: f32,
}

/// External control signal, applied only between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "arg", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Stop,
    /// Advance exactly `n` ticks, whether or not the simulation is running.
    Step(u32),
    Select(Option<AgentId>),
    ForceEvolution,
    Reset,
}

/// Apply `command` to `sim`. Callers drain their queues here at tick boundaries.
pub fn apply_control_command(sim: &mut Simulation, command: ControlCommand) {
    match command {
        ControlCommand::Start => sim.running = true,
        ControlCommand::Stop => sim.running = false,
        ControlCommand::Step(count) => {
            for _ in 0..count {
                sim.step();
            }
        }
        ControlCommand::Select(None) => sim.selected = None,
        ControlCommand::Select(Some(id)) => {
            if sim.population.agent(id).is_some() {
                sim.selected = Some(id);
            } else {
                warn!(agent = %id, "cannot select unknown agent");
            }
        }
        ControlCommand::ForceEvolution => {
            if sim.population.force_evolution(sim.tick) {
                sim.collect_events();
            } else {
                debug!(tick = sim.tick, "forced evolution skipped; fewer than two living agents");
            }
        }
        ControlCommand::Reset => sim.reset(),
    }
}

/// Single-threaded simulation host. One tick is one world step followed by one
/// population update; nothing suspends mid-tick.
pub struct Simulation {
    config: SimulationConfig,
    world: GridWorld,
    population: Population,
    observer: Box<dyn SimulationObserver>,
    tick: u64,
    running: bool,
    selected: Option<AgentId>,
    pending_events: Vec<LifecycleEvent>,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("running", &self.running)
            .field("selected", &self.selected)
            .field("world_tick", &self.world.tick())
            .field("agents", &self.population.agents().len())
            .finish()
    }
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        Self::with_observer(config, Box::new(NullObserver))
    }

    /// Build a simulation that reports to `observer`. World and population draw from
    /// independent streams derived from `rng_seed`.
    pub fn with_observer(
        config: SimulationConfig,
        observer: Box<dyn SimulationObserver>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut root = SimRng::from_optional_seed(config.rng_seed);
        let world = GridWorld::new(config.grid, root.fork())?;
        let mut population = Population::new(
            config.population,
            config.agent,
            config.grid.grid_size,
            root.fork(),
        )?;
        let pending_events = population.drain_events();
        info!(
            seed = ?config.rng_seed,
            grid = config.grid.grid_size,
            agents = config.population.size,
            "simulation ready"
        );
        Ok(Self {
            config,
            world,
            population,
            observer,
            tick: 0,
            running: false,
            selected: None,
            pending_events,
        })
    }

    /// Execute one tick and notify the observer when due.
    pub fn step(&mut self) -> TickEvents {
        self.world.step();
        self.population.update(&mut self.world, self.tick);
        let (births, deaths) = self.collect_events();
        self.tick += 1;

        if let Some(selected) = self.selected
            && self.population.agent(selected).is_none()
        {
            debug!(agent = %selected, "selected agent died; clearing selection");
            self.selected = None;
        }

        let interval = self.config.snapshot_interval;
        if interval > 0 && self.tick.is_multiple_of(interval) {
            self.notify();
        }

        TickEvents {
            tick: self.tick,
            world_tick: self.world.tick(),
            births,
            deaths,
            best_fitness: self.population.best_fitness_ever(),
        }
    }

    /// Move freshly produced lifecycle events into the observer queue, returning
    /// how many births and deaths they contained.
    fn collect_events(&mut self) -> (usize, usize) {
        let events = self.population.drain_events();
        let births = events
            .iter()
            .filter(|event| matches!(event, LifecycleEvent::Birth { .. }))
            .count();
        let deaths = events
            .iter()
            .filter(|event| matches!(event, LifecycleEvent::Death { .. }))
            .count();
        if self.config.snapshot_interval > 0 {
            self.pending_events.extend(events);
        }
        (births, deaths)
    }

    fn notify(&mut self) {
        let policy_interval = self.config.policy_snapshot_interval;
        let policy = if policy_interval > 0
            && self.tick.is_multiple_of(policy_interval)
            && self.observer.wants_policy_snapshots()
        {
            self.policy_snapshot()
        } else {
            None
        };
        let batch = TickBatch {
            tick: self.tick,
            world_tick: self.world.tick(),
            phase: self.world.phase(),
            stats: self.population.stats(self.tick),
            trends: self.population.evolution_trends(),
            events: std::mem::take(&mut self.pending_events),
            agents: self.population.agents().iter().map(|agent| agent.status()).collect(),
            policy,
        };
        let observer = &mut self.observer;
        if panic::catch_unwind(AssertUnwindSafe(|| observer.on_tick(&batch))).is_err() {
            warn!(tick = batch.tick, "observer panicked; batch dropped");
        }
    }

    fn policy_snapshot(&self) -> Option<PolicySnapshot> {
        let mut best: Option<&Agent> = None;
        for agent in self.population.living_entities() {
            if best.is_none_or(|current| agent.fitness > current.fitness) {
                best = Some(agent);
            }
        }
        let best = best?;
        match best.policy().serialize() {
            Ok(serialized) => Some(PolicySnapshot {
                agent: best.id,
                fitness: best.fitness,
                architecture: best.policy().architecture(),
                serialized,
            }),
            Err(err) => {
                warn!(agent = %best.id, error = %err, "failed to serialize policy snapshot");
                None
            }
        }
    }

    /// Regenerate the world and the roster and rewind the host clock.
    pub fn reset(&mut self) {
        self.world.reset();
        self.population.reset();
        self.pending_events = self.population.drain_events();
        if self.config.snapshot_interval == 0 {
            self.pending_events.clear();
        }
        self.tick = 0;
        self.selected = None;
        info!("simulation reset");
    }

    /// Replace the observer.
    pub fn set_observer(&mut self, observer: Box<dyn SimulationObserver>) {
        self.observer = observer;
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn world(&self) -> &GridWorld {
        &self.world
    }

    #[must_use]
    pub fn world_mut(&mut self) -> &mut GridWorld {
        &mut self.world
    }

    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    #[must_use]
    pub fn population_mut(&mut self) -> &mut Population {
        &mut self.population
    }

    /// Host tick: completed steps since construction or the last reset.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub const fn selected_agent(&self) -> Option<AgentId> {
        self.selected
    }

    #[must_use]
    pub fn selected_status(&self) -> Option<AgentStatus> {
        self.selected
            .and_then(|id| self.population.agent(id))
            .map(|agent| agent.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridConfig, PopulationConfig};
    use std::sync::{Arc, Mutex};

    fn config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            rng_seed: Some(seed),
            policy_snapshot_interval: 2,
            grid: GridConfig {
                grid_size: 16,
                core_count: 6,
                ..GridConfig::default()
            },
            population: PopulationConfig {
                size: 3,
                ..PopulationConfig::default()
            },
            ..SimulationConfig::default()
        }
    }

    #[derive(Clone, Default)]
    struct SpyObserver {
        batches: Arc<Mutex<Vec<TickBatch>>>,
    }

    impl SimulationObserver for SpyObserver {
        fn on_tick(&mut self, batch: &TickBatch) {
            self.batches.lock().unwrap().push(batch.clone());
        }
    }

    struct PanickingObserver;

    impl SimulationObserver for PanickingObserver {
        fn on_tick(&mut self, _batch: &TickBatch) {
            panic!("observer failure");
        }
    }

    #[test]
    fn step_advances_world_and_host_clocks() {
        let mut sim = Simulation::new(config(1)).expect("sim");
        assert!(!sim.is_running());
        let events = sim.step();
        assert_eq!(events.tick, 1);
        assert_eq!(events.world_tick, 0);
        let events = sim.step();
        assert_eq!(events.tick, 2);
        assert_eq!(events.world_tick, 1);
        assert_eq!(sim.population().agents().len(), 3);
    }

    #[test]
    fn observer_receives_batches_with_initial_births() {
        let spy = SpyObserver::default();
        let batches = spy.batches.clone();
        let mut sim = Simulation::with_observer(config(2), Box::new(spy)).expect("sim");
        sim.step();
        sim.step();

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].tick, 1);
        assert_eq!(batches[0].agents.len(), 3);
        let births = batches[0]
            .events
            .iter()
            .filter(|event| matches!(event, LifecycleEvent::Birth { parent: None, .. }))
            .count();
        assert_eq!(births, 3);
        assert!(batches[0].policy.is_none());
        let snapshot = batches[1].policy.as_ref().expect("policy snapshot");
        assert_eq!(snapshot.architecture, lifegrid_brain::DEFAULT_ARCHITECTURE.to_vec());
    }

    #[test]
    fn observer_does_not_change_outcomes() {
        let mut quiet = Simulation::new(config(3)).expect("sim");
        let mut observed =
            Simulation::with_observer(config(3), Box::new(SpyObserver::default())).expect("sim");
        for _ in 0..10 {
            assert_eq!(quiet.step(), observed.step());
        }
        let a: Vec<_> = quiet.population().agents().iter().map(|a| a.status()).collect();
        let b: Vec<_> = observed.population().agents().iter().map(|a| a.status()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let mut sim =
            Simulation::with_observer(config(4), Box::new(PanickingObserver)).expect("sim");
        for _ in 0..3 {
            sim.step();
        }
        assert_eq!(sim.tick(), 3);
    }

    #[test]
    fn commands_apply_at_tick_boundaries() {
        let mut sim = Simulation::new(config(5)).expect("sim");
        apply_control_command(&mut sim, ControlCommand::Start);
        assert!(sim.is_running());
        apply_control_command(&mut sim, ControlCommand::Step(4));
        assert_eq!(sim.tick(), 4);
        apply_control_command(&mut sim, ControlCommand::Stop);
        assert!(!sim.is_running());

        let target = sim.population().agents()[1].id;
        apply_control_command(&mut sim, ControlCommand::Select(Some(target)));
        assert_eq!(sim.selected_agent(), Some(target));
        assert_eq!(sim.selected_status().map(|s| s.id), Some(target));
        apply_control_command(&mut sim, ControlCommand::Select(Some(AgentId(9_999))));
        assert_eq!(sim.selected_agent(), Some(target));
        apply_control_command(&mut sim, ControlCommand::Select(None));
        assert_eq!(sim.selected_agent(), None);

        let generation = sim.population().generation();
        apply_control_command(&mut sim, ControlCommand::ForceEvolution);
        assert_eq!(sim.population().generation(), generation + 1);

        apply_control_command(&mut sim, ControlCommand::Reset);
        assert_eq!(sim.tick(), 0);
        assert_eq!(sim.world().tick(), 0);
        assert_eq!(sim.population().generation(), 0);
    }

    #[test]
    fn commands_round_trip_through_json() {
        let command = ControlCommand::Select(Some(AgentId(3)));
        let json = serde_json::to_string(&command).expect("encode");
        assert_eq!(serde_json::from_str::<ControlCommand>(&json).expect("decode"), command);
        let json = serde_json::to_string(&ControlCommand::Step(2)).expect("encode");
        assert_eq!(json, r#"{"command":"step","arg":2}"#);
    }
}
