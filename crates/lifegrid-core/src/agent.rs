//! Agents: perception, bounded memory, policy-driven action, and in-lifetime learning.

use std::collections::VecDeque;
use std::f32::consts::TAU;

use lifegrid_brain::{
    ACTION_COUNT, DEFAULT_ARCHITECTURE, NeuralPolicy, PolicyError, SENSORY_INPUT_SIZE, SimRng,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::AgentConfig;
use crate::world::{FIELD_COUNT, GridWorld, PhysicalReading, wrap};

/// Chebyshev radius of the square vision window.
pub const VISION_RADIUS: i64 = 4;
/// Points sampled per vision refresh (9x9 window, centre included).
pub const VISION_POINTS: usize = 81;
/// Internal-state values appended after the vision block.
pub const INTERNAL_INPUTS: usize = 6;
/// Most recent experiences summarised in the input vector.
pub const MEMORY_SUMMARY_ENTRIES: usize = 5;
/// Values per summarised experience.
pub const MEMORY_ENTRY_WIDTH: usize = 10;
/// Length of the sensory input vector fed to the policy.
pub const INPUT_LEN: usize = VISION_POINTS * FIELD_COUNT
    + VISION_POINTS
    + INTERNAL_INPUTS
    + MEMORY_SUMMARY_ENTRIES * MEMORY_ENTRY_WIDTH;

const _: () = assert!(INPUT_LEN == SENSORY_INPUT_SIZE);

const CENTRE_SAMPLE: usize = VISION_POINTS / 2;
const LIFE_FORCE_RADIUS: u32 = 2;
const LIFE_FORCE_CAP: f32 = 0.8;
const LIFE_FORCE_PER_NEIGHBOR: f32 = 0.2;
const LIFE_FORCE_PROXIMITY: f32 = 0.15;
const LIFE_FORCE_JITTER: f32 = 0.01;

/// Stable agent identifier; never reused within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// One of the five fixed moves, in policy output order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    #[default]
    Stay,
}

impl Action {
    pub const ALL: [Self; ACTION_COUNT] = [
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Stay,
    ];

    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
            Self::Left => 2,
            Self::Right => 3,
            Self::Stay => 4,
        }
    }

    /// Grid displacement; `Up` decreases `y`.
    #[must_use]
    pub const fn delta(self) -> (i64, i64) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
            Self::Stay => (0, 0),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stay => "stay",
        }
    }
}

/// Classification of what happened to an agent during one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    EnergyGained,
    EnergyLost,
    Moved,
}

impl Outcome {
    /// Signed indicator used in the memory summary.
    #[must_use]
    pub const fn signal(self) -> f32 {
        match self {
            Self::EnergyGained => 1.0,
            Self::EnergyLost => -1.0,
            Self::Moved => 0.0,
        }
    }
}

/// Memory entry recorded once per update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub tick: u64,
    pub x: u32,
    pub y: u32,
    pub fields: [f32; FIELD_COUNT],
    pub confidence: f32,
    pub energy: f32,
    pub action: Action,
    pub outcome: Outcome,
    pub age: u64,
}

/// One point of the vision window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionSample {
    pub dx: i64,
    pub dy: i64,
    pub distance: u32,
    pub reading: PhysicalReading,
}

/// What an agent may know about another living agent while perceiving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborView {
    pub id: AgentId,
    pub x: u32,
    pub y: u32,
    pub energy: f32,
}

/// Serializable summary of an agent for observers and renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub generation: u32,
    pub parent: Option<AgentId>,
    pub x: u32,
    pub y: u32,
    pub energy: f32,
    pub age: u64,
    pub total_energy_gained: f32,
    pub fitness: f32,
    pub last_action: Action,
    pub memory_len: usize,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RewardEntry {
    tick: u64,
    value: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Decision {
    input: Vec<f32>,
    action: Action,
}

/// A single conscious entity living on the grid.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    /// Lineage depth: zero for randomly created agents.
    pub generation: u32,
    pub parent: Option<AgentId>,
    pub x: u32,
    pub y: u32,
    pub energy: f32,
    pub age: u64,
    pub total_energy_gained: f32,
    pub fitness: f32,
    pub last_action: Action,
    config: AgentConfig,
    grid_size: u32,
    policy: NeuralPolicy,
    memory: VecDeque<Experience>,
    vision: Vec<VisionSample>,
    rewards: VecDeque<RewardEntry>,
    last_decision: Option<Decision>,
}

impl Agent {
    /// Fresh agent with a randomly initialised default-architecture policy.
    pub fn random(id: AgentId, config: AgentConfig, grid_size: u32, rng: &mut SimRng) -> Self {
        let policy = NeuralPolicy::random(rng);
        Self::spawn(id, config, grid_size, policy, rng)
    }

    /// Fresh agent driven by `policy`, which must map the sensory vector onto the action set.
    pub fn with_policy(
        id: AgentId,
        config: AgentConfig,
        grid_size: u32,
        policy: NeuralPolicy,
        rng: &mut SimRng,
    ) -> Result<Self, PolicyError> {
        if policy.input_size() != INPUT_LEN {
            return Err(PolicyError::InputSize {
                expected: INPUT_LEN,
                actual: policy.input_size(),
            });
        }
        if policy.output_size() != ACTION_COUNT {
            return Err(PolicyError::ArchitectureMismatch {
                expected: DEFAULT_ARCHITECTURE.to_vec(),
                actual: policy.architecture(),
            });
        }
        Ok(Self::spawn(id, config, grid_size, policy, rng))
    }

    fn spawn(
        id: AgentId,
        config: AgentConfig,
        grid_size: u32,
        policy: NeuralPolicy,
        rng: &mut SimRng,
    ) -> Self {
        let x = rng.random_range(0..grid_size);
        let y = rng.random_range(0..grid_size);
        Self {
            id,
            generation: 0,
            parent: None,
            x,
            y,
            energy: config.initial_energy,
            age: 0,
            total_energy_gained: 0.0,
            fitness: 0.0,
            last_action: Action::Stay,
            config,
            grid_size,
            policy,
            memory: VecDeque::with_capacity(config.memory_capacity + 1),
            vision: blank_vision(),
            rewards: VecDeque::new(),
            last_decision: None,
        }
    }

    /// Offspring at a random position carrying a mutated copy of this agent's policy.
    pub fn reproduce(
        &self,
        id: AgentId,
        rng: &mut SimRng,
        mutation_rate: f32,
        mutation_strength: f32,
    ) -> Self {
        self.reproduce_counted(id, rng, mutation_rate, mutation_strength).0
    }

    /// Same as [`Self::reproduce`], also reporting how many policy parameters mutated.
    pub fn reproduce_counted(
        &self,
        id: AgentId,
        rng: &mut SimRng,
        mutation_rate: f32,
        mutation_strength: f32,
    ) -> (Self, usize) {
        let (policy, mutated) = self.policy.mutate_counted(rng, mutation_rate, mutation_strength);
        let mut child = Self::spawn(id, self.config, self.grid_size, policy, rng);
        child.generation = self.generation + 1;
        child.parent = Some(self.id);
        (child, mutated)
    }

    /// Run one perceive, learn, decide, act cycle. Returns whether the agent is still alive.
    pub fn update(
        &mut self,
        world: &mut GridWorld,
        others: &[NeighborView],
        tick: u64,
        rng: &mut SimRng,
    ) -> bool {
        let energy_before = self.energy;
        let gained_before = self.total_energy_gained;

        self.energy -= self.config.passive_decay;
        let gained = world.consume_energy(self.x, self.y);
        if gained > 0.0 {
            self.energy += gained;
            self.total_energy_gained += gained;
            self.push_reward(tick, self.config.gain_reward);
        }
        if self.energy < self.config.low_energy_threshold {
            self.push_reward(tick, self.config.low_energy_penalty);
        }
        let window = self.config.reward_window;
        self.rewards
            .retain(|entry| tick.saturating_sub(entry.tick) <= window);

        self.update_vision(world, others, tick, rng);
        self.record_experience(tick, energy_before, gained_before);
        self.fitness = self.age as f32 + self.total_energy_gained;

        self.learn_from_rewards();
        let action = match self.decide(tick, rng) {
            Ok(action) => action,
            Err(err) => {
                warn!(agent = %self.id, error = %err, "policy evaluation failed; staying put");
                Action::Stay
            }
        };
        self.act(action);

        self.age += 1;
        self.fitness = self.age as f32 + self.total_energy_gained;
        self.is_alive()
    }

    /// Sample the 9x9 window around the agent and fill in the life-force channel.
    ///
    /// Query points are not wrapped: cells beyond the grid edge read as neutral.
    pub fn update_vision(
        &mut self,
        world: &mut GridWorld,
        others: &[NeighborView],
        tick: u64,
        rng: &mut SimRng,
    ) {
        self.vision.clear();
        let (cx, cy) = (i64::from(self.x), i64::from(self.y));
        for dy in -VISION_RADIUS..=VISION_RADIUS {
            for dx in -VISION_RADIUS..=VISION_RADIUS {
                let distance = (dx.unsigned_abs() + dy.unsigned_abs()) as u32;
                let (qx, qy) = (cx + dx, cy + dy);
                let mut reading = world.get_raw_physical_properties(qx, qy, distance, self.energy);
                if reading.confidence > 0.0 {
                    reading.fields[4] = self.life_force(qx, qy, others, tick, rng);
                }
                self.vision.push(VisionSample {
                    dx,
                    dy,
                    distance,
                    reading,
                });
            }
        }
    }

    fn life_force(
        &self,
        qx: i64,
        qy: i64,
        others: &[NeighborView],
        tick: u64,
        rng: &mut SimRng,
    ) -> f32 {
        let mut count = 0usize;
        let mut proximity = 0.0;
        for other in others.iter().filter(|other| other.id != self.id) {
            let distance = (i64::from(other.x) - qx).unsigned_abs()
                + (i64::from(other.y) - qy).unsigned_abs();
            if distance > u64::from(LIFE_FORCE_RADIUS) {
                continue;
            }
            count += 1;
            let closeness = 1.0 - distance as f32 / (LIFE_FORCE_RADIUS + 1) as f32;
            let vigour = (other.energy / self.config.initial_energy).clamp(0.0, 1.0);
            proximity += closeness * vigour;
        }
        if count == 0 {
            return 0.0;
        }
        let value = (LIFE_FORCE_PER_NEIGHBOR * count as f32).min(LIFE_FORCE_CAP)
            + LIFE_FORCE_PROXIMITY * proximity / count as f32
            + 0.02 * (tick as f32 * 0.2).sin()
            + rng.symmetric(LIFE_FORCE_JITTER);
        value.clamp(0.0, 1.0)
    }

    /// Fixed-order sensory vector: vision fields, vision confidences, internal state,
    /// then the summary of the newest experiences.
    #[must_use]
    pub fn build_input_vector(&self, tick: u64) -> Vec<f32> {
        let mut input = Vec::with_capacity(INPUT_LEN);
        for sample in &self.vision {
            input.extend_from_slice(&sample.reading.fields);
        }
        input.extend(self.vision.iter().map(|sample| sample.reading.confidence));

        let size = self.grid_size as f32;
        let cycle = (tick % 100) as f32 / 100.0;
        input.extend([
            (self.energy / self.config.initial_energy).clamp(0.0, 1.0),
            self.x as f32 / size,
            self.y as f32 / size,
            (TAU * cycle).sin(),
            (TAU * cycle).cos(),
            cycle,
        ]);

        for experience in self.memory.iter().rev().take(MEMORY_SUMMARY_ENTRIES) {
            let elapsed = tick.saturating_sub(experience.tick) as f32;
            input.push(1.0 / (1.0 + elapsed));
            input.push((i64::from(experience.x) - i64::from(self.x)) as f32 / size);
            input.push((i64::from(experience.y) - i64::from(self.y)) as f32 / size);
            input.extend_from_slice(&experience.fields);
            input.push(experience.confidence);
            input.push(experience.outcome.signal());
        }
        input.resize(INPUT_LEN, 0.0);
        input
    }

    /// Evaluate the policy and sample an action from its output distribution.
    pub fn decide(&mut self, tick: u64, rng: &mut SimRng) -> Result<Action, PolicyError> {
        let input = self.build_input_vector(tick);
        let probabilities = self.policy.forward(&input)?;
        let action = sample_action(&probabilities, rng.unit());
        self.last_decision = Some(Decision { input, action });
        Ok(action)
    }

    /// Move one cell (or stay) with toroidal wraparound.
    pub fn act(&mut self, action: Action) {
        let (dx, dy) = action.delta();
        let (x, y) = wrap(i64::from(self.x) + dx, i64::from(self.y) + dy, self.grid_size);
        self.x = x;
        self.y = y;
        self.last_action = action;
    }

    fn record_experience(&mut self, tick: u64, energy_before: f32, gained_before: f32) {
        let outcome = if self.total_energy_gained > gained_before {
            Outcome::EnergyGained
        } else if energy_before - self.energy > self.config.passive_decay + f32::EPSILON {
            Outcome::EnergyLost
        } else {
            Outcome::Moved
        };
        let centre = self
            .vision
            .get(CENTRE_SAMPLE)
            .map_or(PhysicalReading::NEUTRAL, |sample| sample.reading);
        self.memory.push_back(Experience {
            tick,
            x: self.x,
            y: self.y,
            fields: centre.fields,
            confidence: centre.confidence,
            energy: self.energy,
            action: self.last_action,
            outcome,
            age: self.age,
        });
        while self.memory.len() > self.config.memory_capacity {
            self.memory.pop_front();
        }
    }

    fn push_reward(&mut self, tick: u64, value: f32) {
        self.rewards.push_back(RewardEntry { tick, value });
    }

    /// Nudge the previously chosen action toward the trailing mean reward.
    fn learn_from_rewards(&mut self) {
        if self.rewards.is_empty() {
            return;
        }
        let Some(decision) = self.last_decision.as_ref() else {
            return;
        };
        let mean =
            self.rewards.iter().map(|entry| entry.value).sum::<f32>() / self.rewards.len() as f32;
        if let Err(err) = self.policy.apply_output_nudge(
            &decision.input,
            decision.action.index(),
            mean,
            self.config.learning_rate,
        ) {
            warn!(agent = %self.id, error = %err, "output nudge rejected");
        }
    }

    /// Mean of the trailing reward window, if any rewards are held.
    #[must_use]
    pub fn mean_reward(&self) -> Option<f32> {
        if self.rewards.is_empty() {
            None
        } else {
            let total = self.rewards.iter().map(|entry| entry.value).sum::<f32>();
            Some(total / self.rewards.len() as f32)
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.energy > 0.0
    }

    #[must_use]
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id,
            generation: self.generation,
            parent: self.parent,
            x: self.x,
            y: self.y,
            energy: self.energy,
            age: self.age,
            total_energy_gained: self.total_energy_gained,
            fitness: self.fitness,
            last_action: self.last_action,
            memory_len: self.memory.len(),
            alive: self.is_alive(),
        }
    }

    #[must_use]
    pub fn neighbor_view(&self) -> NeighborView {
        NeighborView {
            id: self.id,
            x: self.x,
            y: self.y,
            energy: self.energy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &NeuralPolicy {
        &self.policy
    }

    #[must_use]
    pub fn memory(&self) -> &VecDeque<Experience> {
        &self.memory
    }

    #[must_use]
    pub fn vision(&self) -> &[VisionSample] {
        &self.vision
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Walk the cumulative distribution until it passes `draw`; rounding shortfalls pick `Stay`.
#[must_use]
pub fn sample_action(probabilities: &[f32], draw: f32) -> Action {
    let mut cumulative = 0.0;
    for (index, probability) in probabilities.iter().enumerate() {
        cumulative += probability;
        if draw < cumulative {
            return Action::from_index(index).unwrap_or_default();
        }
    }
    Action::Stay
}

fn blank_vision() -> Vec<VisionSample> {
    let mut vision = Vec::with_capacity(VISION_POINTS);
    for dy in -VISION_RADIUS..=VISION_RADIUS {
        for dx in -VISION_RADIUS..=VISION_RADIUS {
            vision.push(VisionSample {
                dx,
                dy,
                distance: (dx.unsigned_abs() + dy.unsigned_abs()) as u32,
                reading: PhysicalReading::NEUTRAL,
            });
        }
    }
    vision
}
