//! Physical substrate: toroidal scalar fields, stateful cores, and energy manifestations.

use lifegrid_brain::SimRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use tracing::debug;

use crate::config::{ConfigError, GridConfig};

/// Number of scalar channels in a physical reading.
pub const FIELD_COUNT: usize = 5;

/// Confidence by Manhattan distance from the observer; farther points use [`FAR_CONFIDENCE`].
const DISTANCE_CONFIDENCE: [f32; 5] = [1.0, 0.9, 0.7, 0.5, 0.3];
const FAR_CONFIDENCE: f32 = 0.1;
/// Observer energy that counts as fully alert.
const ENERGY_REFERENCE: f32 = 100.0;
/// Noise amplitude at zero confidence for a fully energised observer.
const READING_NOISE: f32 = 0.1;

const NEIGHBOR_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Exchange phase of the paired catalyser layers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Emit,
    Collect,
}

/// Lifecycle of a core. Transitions only run forward: dormant, incubated, bloomed, dormant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CoreState {
    #[default]
    Dormant,
    Incubated,
    Bloomed,
}

impl CoreState {
    /// Scalar code used in sensory readings (`0.0` is reserved for "no core").
    #[must_use]
    pub const fn encoded(self) -> f32 {
        match self {
            Self::Dormant => 0.3,
            Self::Incubated => 0.6,
            Self::Bloomed => 0.9,
        }
    }

    /// The only state this one may move to.
    #[must_use]
    pub const fn successor(self) -> Self {
        match self {
            Self::Dormant => Self::Incubated,
            Self::Incubated => Self::Bloomed,
            Self::Bloomed => Self::Dormant,
        }
    }
}

/// Grid-resident entity that blooms into energy under the right conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Core {
    pub id: usize,
    pub x: u32,
    pub y: u32,
    pub state: CoreState,
    pub consecutive_high_temp: u32,
    pub bloom_tick: Option<u64>,
    pub pending_move_tick: Option<u64>,
}

impl Core {
    #[must_use]
    pub const fn dormant(id: usize, x: u32, y: u32) -> Self {
        Self {
            id,
            x,
            y,
            state: CoreState::Dormant,
            consecutive_high_temp: 0,
            bloom_tick: None,
            pending_move_tick: None,
        }
    }
}

/// State change recorded while stepping cores.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoreTransition {
    pub core_id: usize,
    pub from: CoreState,
    pub to: CoreState,
}

/// Consumable energy left behind by a blooming core.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnergyManifestation {
    pub x: u32,
    pub y: u32,
    pub created_tick: u64,
    pub core_id: usize,
}

/// Point sensory query result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhysicalReading {
    pub fields: [f32; FIELD_COUNT],
    pub confidence: f32,
}

impl PhysicalReading {
    /// Reading returned for coordinates outside the grid.
    pub const NEUTRAL: Self = Self {
        fields: [0.0; FIELD_COUNT],
        confidence: 0.0,
    };
}

/// Confidence for a reading `distance` cells away, scaled by how energised the observer is.
#[must_use]
pub fn reading_confidence(distance: u32, observer_energy: f32) -> f32 {
    let base = DISTANCE_CONFIDENCE
        .get(distance as usize)
        .copied()
        .unwrap_or(FAR_CONFIDENCE);
    base * (observer_energy / ENERGY_REFERENCE).clamp(0.1, 1.0)
}

/// Square scalar grid with toroidal neighbour access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalarField {
    size: u32,
    cells: Vec<f32>,
}

impl ScalarField {
    /// Construct a `size * size` field initialised to `initial`.
    #[must_use]
    pub fn new(size: u32, initial: f32) -> Self {
        Self {
            size,
            cells: vec![initial; (size as usize) * (size as usize)],
        }
    }

    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn cells(&self) -> &[f32] {
        &self.cells
    }

    #[must_use]
    pub fn cells_mut(&mut self) -> &mut [f32] {
        &mut self.cells
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.size as usize) + (x as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x < self.size && y < self.size {
            Some(self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, x: u32, y: u32) -> Option<&mut f32> {
        if x < self.size && y < self.size {
            let idx = self.offset(x, y);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// Value at `(x, y)` after wrapping both coordinates onto the torus.
    #[must_use]
    pub fn wrapped(&self, x: i64, y: i64) -> f32 {
        let (wx, wy) = wrap(x, y, self.size);
        self.cells[self.offset(wx, wy)]
    }

    pub fn fill(&mut self, value: f32) {
        self.cells.fill(value);
    }
}

/// Wrap signed coordinates onto a `size` torus.
#[must_use]
pub fn wrap(x: i64, y: i64, size: u32) -> (u32, u32) {
    let n = i64::from(size);
    (x.rem_euclid(n) as u32, y.rem_euclid(n) as u32)
}

/// Owned copy of the world for renderers and recorders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub phase: Phase,
    pub grid_size: u32,
    pub temperature: Vec<f32>,
    pub catalyser_lower: Vec<f32>,
    pub catalyser_upper: Vec<f32>,
    pub cores: Vec<Core>,
    pub energies: Vec<EnergyManifestation>,
}

/// The physical world agents live in.
#[derive(Debug)]
pub struct GridWorld {
    config: GridConfig,
    rng: SimRng,
    tick: u64,
    phase: Phase,
    temperature: ScalarField,
    catalyser_lower: ScalarField,
    catalyser_upper: ScalarField,
    cores: Vec<Core>,
    energies: Vec<EnergyManifestation>,
    transitions: Vec<CoreTransition>,
    scratch: Vec<f32>,
    deposit: Vec<f32>,
}

impl GridWorld {
    /// Build and reset a world drawing all of its randomness from `rng`.
    pub fn new(config: GridConfig, rng: SimRng) -> Result<Self, ConfigError> {
        config.validate()?;
        let size = config.grid_size;
        let cells = (size as usize) * (size as usize);
        let mut world = Self {
            config,
            rng,
            tick: 0,
            phase: Phase::Emit,
            temperature: ScalarField::new(size, 0.0),
            catalyser_lower: ScalarField::new(size, 0.0),
            catalyser_upper: ScalarField::new(size, 0.0),
            cores: Vec::with_capacity(config.core_count),
            energies: Vec::new(),
            transitions: Vec::new(),
            scratch: vec![0.0; cells],
            deposit: vec![0.0; cells],
        };
        world.reset();
        Ok(world)
    }

    /// Regenerate every field, reseed the cores, and rewind the clock.
    pub fn reset(&mut self) {
        let size = self.config.grid_size;
        let n = size as f32;
        let rng = &mut self.rng;
        for y in 0..size {
            for x in 0..size {
                let (xf, yf) = (x as f32, y as f32);
                let value = (TAU * xf * 2.0 / n).sin() * 0.4
                    + (TAU * yf * 3.0 / n).sin() * 0.3
                    + (TAU * (xf + yf) * 5.0 / n).sin() * 0.2
                    + rng.unit() * 0.1;
                if let Some(cell) = self.temperature.get_mut(x, y) {
                    *cell = value;
                }
            }
        }
        normalize(self.temperature.cells_mut());

        self.catalyser_lower.fill(0.0);
        let upper_max = self.config.upper_max;
        for cell in self.catalyser_upper.cells_mut() {
            *cell = self.rng.random_range(0.0..upper_max);
        }

        self.cores.clear();
        for id in 0..self.config.core_count {
            let x = self.rng.random_range(0..size);
            let y = self.rng.random_range(0..size);
            self.cores.push(Core::dormant(id, x, y));
        }
        self.energies.clear();
        self.transitions.clear();
        self.tick = 0;
        self.phase = Phase::Emit;
    }

    /// Advance the physics by one emit or collect phase.
    pub fn step(&mut self) {
        self.transitions.clear();
        self.stage_pending_relocations();
        self.stage_temperature();
        self.stage_catalyser();
        self.stage_cores();
        self.stage_energy_expiry();
    }

    fn stage_pending_relocations(&mut self) {
        for idx in 0..self.cores.len() {
            let due = matches!(self.cores[idx].pending_move_tick, Some(at) if self.tick >= at);
            if !due {
                continue;
            }
            let (x, y) = self.random_neighbor(self.cores[idx].x, self.cores[idx].y);
            let core = &mut self.cores[idx];
            debug!(
                core = core.id,
                from = ?(core.x, core.y),
                to = ?(x, y),
                "core relocated after harvest"
            );
            core.x = x;
            core.y = y;
            core.pending_move_tick = None;
        }
    }

    fn stage_temperature(&mut self) {
        let size = self.config.grid_size as usize;
        {
            let cells = self.temperature.cells();
            for y in 0..size {
                let row = y * size;
                for x in 0..size {
                    let source = if x == 0 { size - 1 } else { x - 1 };
                    self.scratch[row + x] = cells[row + source];
                }
            }
        }

        let blend = self.config.temperature_blend;
        let noise = self.config.temperature_noise;
        let previous = &self.scratch;
        let rng = &mut self.rng;
        let cells = self.temperature.cells_mut();
        for y in 0..size {
            let up = if y == 0 { size - 1 } else { y - 1 };
            let down = if y + 1 == size { 0 } else { y + 1 };
            for x in 0..size {
                let left = if x == 0 { size - 1 } else { x - 1 };
                let right = if x + 1 == size { 0 } else { x + 1 };
                let neighbor_sum = previous[up * size + left]
                    + previous[up * size + x]
                    + previous[up * size + right]
                    + previous[y * size + left]
                    + previous[y * size + right]
                    + previous[down * size + left]
                    + previous[down * size + x]
                    + previous[down * size + right];
                let idx = y * size + x;
                let value = (1.0 - blend) * previous[idx]
                    + blend * (neighbor_sum / 8.0)
                    + rng.symmetric(noise);
                cells[idx] = value.clamp(0.0, 1.0);
            }
        }
    }

    fn stage_catalyser(&mut self) {
        let upper_max = self.config.upper_max;
        match self.phase {
            Phase::Emit => {
                let decay = self.config.upper_decay;
                let upper = self.catalyser_upper.cells_mut();
                for (lower, upper) in self.catalyser_lower.cells_mut().iter_mut().zip(upper) {
                    *lower += *upper;
                    *upper = (*upper * decay).clamp(0.0, upper_max);
                }
                self.phase = Phase::Collect;
            }
            Phase::Collect => {
                self.collect_catalyser();
                self.phase = Phase::Emit;
                self.tick += 1;
            }
        }
    }

    /// Push every lower-layer value up into its 3x3 neighbourhood, weighted by the
    /// current upper-layer density. Values with no dense neighbour are dropped.
    fn collect_catalyser(&mut self) {
        let size = self.config.grid_size;
        let upper_max = self.config.upper_max;
        self.scratch.copy_from_slice(self.catalyser_upper.cells());
        self.deposit.fill(0.0);
        let n = size as usize;
        let lower = self.catalyser_lower.cells_mut();
        for y in 0..size {
            for x in 0..size {
                let idx = (y as usize) * n + (x as usize);
                let value = lower[idx];
                if value <= 0.0 {
                    continue;
                }
                lower[idx] = 0.0;
                let mut targets = [(0usize, 0.0f32); 9];
                let mut total = 0.0;
                for (slot, (dx, dy)) in neighborhood().enumerate() {
                    let (nx, ny) = wrap(i64::from(x) + dx, i64::from(y) + dy, size);
                    let nidx = (ny as usize) * n + (nx as usize);
                    let density = self.scratch[nidx];
                    targets[slot] = (nidx, density);
                    total += density;
                }
                if total <= 0.0 {
                    continue;
                }
                for (nidx, density) in targets {
                    self.deposit[nidx] += value * density / total;
                }
            }
        }
        for (upper, added) in self
            .catalyser_upper
            .cells_mut()
            .iter_mut()
            .zip(&self.deposit)
        {
            *upper = (*upper + added).clamp(0.0, upper_max);
        }
    }

    fn stage_cores(&mut self) {
        let tick = self.tick;
        for idx in 0..self.cores.len() {
            let (x, y, state) = {
                let core = &self.cores[idx];
                (core.x, core.y, core.state)
            };
            let next = match state {
                CoreState::Dormant => {
                    let lower = self.catalyser_lower.get(x, y).unwrap_or(0.0);
                    (lower > self.config.incubation_threshold).then_some(CoreState::Incubated)
                }
                CoreState::Incubated => {
                    let temperature = self.temperature.get(x, y).unwrap_or(0.0);
                    let core = &mut self.cores[idx];
                    if temperature > self.config.bloom_temperature {
                        core.consecutive_high_temp += 1;
                    } else {
                        core.consecutive_high_temp = 0;
                    }
                    (core.consecutive_high_temp >= self.config.bloom_ticks)
                        .then_some(CoreState::Bloomed)
                }
                CoreState::Bloomed => {
                    let bloomed_at = self.cores[idx].bloom_tick.unwrap_or(tick);
                    (tick >= bloomed_at.saturating_add(self.config.bloom_duration))
                        .then_some(CoreState::Dormant)
                }
            };
            if let Some(next) = next {
                self.transition_core(idx, next);
            }
        }
    }

    fn transition_core(&mut self, idx: usize, next: CoreState) {
        let tick = self.tick;
        let from = self.cores[idx].state;
        debug_assert_eq!(from.successor(), next);
        match next {
            CoreState::Incubated => {
                self.cores[idx].consecutive_high_temp = 0;
            }
            CoreState::Bloomed => {
                let core = &mut self.cores[idx];
                core.consecutive_high_temp = 0;
                core.bloom_tick = Some(tick);
                self.energies.push(EnergyManifestation {
                    x: core.x,
                    y: core.y,
                    created_tick: tick,
                    core_id: core.id,
                });
                debug!(core = core.id, x = core.x, y = core.y, tick, "core bloomed");
            }
            CoreState::Dormant => {
                let (x, y) = (self.cores[idx].x, self.cores[idx].y);
                if let Some(cell) = self.catalyser_lower.get_mut(x, y) {
                    *cell += self.config.bloom_release;
                }
                let (nx, ny) = self.random_neighbor(x, y);
                let core = &mut self.cores[idx];
                core.bloom_tick = None;
                core.x = nx;
                core.y = ny;
            }
        }
        let core = &mut self.cores[idx];
        core.state = next;
        self.transitions.push(CoreTransition {
            core_id: core.id,
            from,
            to: next,
        });
    }

    fn stage_energy_expiry(&mut self) {
        let tick = self.tick;
        let lifetime = self.config.energy_lifetime;
        self.energies
            .retain(|energy| tick.saturating_sub(energy.created_tick) <= lifetime);
    }

    fn random_neighbor(&mut self, x: u32, y: u32) -> (u32, u32) {
        let (dx, dy) = NEIGHBOR_OFFSETS[self.rng.random_range(0..NEIGHBOR_OFFSETS.len())];
        wrap(i64::from(x) + dx, i64::from(y) + dy, self.config.grid_size)
    }

    /// Sense the cell at `(x, y)` from `distance` cells away.
    ///
    /// Channels: thermal, chemical, structural, energetic, and life-force (always zero
    /// here; observers fill it in). Out-of-range coordinates return [`PhysicalReading::NEUTRAL`].
    pub fn get_raw_physical_properties(
        &mut self,
        x: i64,
        y: i64,
        distance: u32,
        observer_energy: f32,
    ) -> PhysicalReading {
        let size = i64::from(self.config.grid_size);
        if !(0..size).contains(&x) || !(0..size).contains(&y) {
            return PhysicalReading::NEUTRAL;
        }
        let (cx, cy) = (x as u32, y as u32);
        let upper_max = self.config.upper_max;
        let catalyser_level =
            |lower: f32, upper: f32| ((lower + upper) / (2.0 * upper_max)).min(1.0);

        let temperature = self.temperature.get(cx, cy).unwrap_or(0.0);
        let catalyser = catalyser_level(
            self.catalyser_lower.get(cx, cy).unwrap_or(0.0),
            self.catalyser_upper.get(cx, cy).unwrap_or(0.0),
        );
        let core_code = self.core_code_at(cx, cy);
        let energy_here = if self.energy_at(cx, cy).is_some() { 1.0 } else { 0.0 };

        let mut neighbor_temperature = 0.0;
        let mut neighbor_catalyser = 0.0;
        let mut neighbor_cores = 0.0;
        let mut neighbor_energy = 0.0;
        for (dx, dy) in NEIGHBOR_OFFSETS {
            let (nx, ny) = wrap(x + dx, y + dy, self.config.grid_size);
            neighbor_temperature += self.temperature.wrapped(x + dx, y + dy);
            neighbor_catalyser += catalyser_level(
                self.catalyser_lower.wrapped(x + dx, y + dy),
                self.catalyser_upper.wrapped(x + dx, y + dy),
            );
            if self.core_code_at(nx, ny) > 0.0 {
                neighbor_cores += 1.0;
            }
            if self.energy_at(nx, ny).is_some() {
                neighbor_energy += 1.0;
            }
        }
        let neighbors = NEIGHBOR_OFFSETS.len() as f32;

        let t = self.tick as f32;
        let place = (cx + cy) as f32;
        let thermal_wave = 0.5 + 0.5 * (t * 0.1 + place * 0.05).sin();
        let structural_wave = 0.5 + 0.5 * (t * 0.05).cos();
        let energetic_wave = 0.5 + 0.5 * (t * 0.2 + place * 0.1).sin();

        let mut fields = [
            0.7 * temperature + 0.25 * (neighbor_temperature / neighbors) + 0.05 * thermal_wave,
            0.7 * catalyser + 0.3 * (neighbor_catalyser / neighbors),
            0.8 * core_code + 0.15 * (neighbor_cores / neighbors) + 0.05 * structural_wave,
            0.7 * energy_here + 0.25 * (neighbor_energy / neighbors) + 0.05 * energetic_wave,
            0.0,
        ];

        let confidence = reading_confidence(distance, observer_energy);
        if confidence < 1.0 {
            let deficiency = 1.0 - (observer_energy / ENERGY_REFERENCE).clamp(0.0, 1.0);
            let amplitude = (1.0 - confidence) * READING_NOISE * (1.0 + deficiency);
            for field in &mut fields {
                *field += self.rng.symmetric(amplitude);
            }
        }
        for field in &mut fields {
            *field = field.clamp(0.0, 1.0);
        }
        PhysicalReading { fields, confidence }
    }

    /// Harvest the energy manifestation at `(x, y)`, returning the reward or zero.
    pub fn consume_energy(&mut self, x: u32, y: u32) -> f32 {
        let Some(position) = self
            .energies
            .iter()
            .position(|energy| energy.x == x && energy.y == y)
        else {
            return 0.0;
        };
        let energy = self.energies.remove(position);
        let due = self.tick.saturating_add(self.config.relocation_delay);
        if let Some(core) = self.cores.iter_mut().find(|core| core.id == energy.core_id) {
            core.pending_move_tick = Some(due);
        }
        debug!(x, y, core = energy.core_id, tick = self.tick, "energy consumed");
        self.config.energy_reward
    }

    fn core_code_at(&self, x: u32, y: u32) -> f32 {
        self.cores
            .iter()
            .filter(|core| core.x == x && core.y == y)
            .map(|core| core.state.encoded())
            .fold(0.0, f32::max)
    }

    /// Active energy manifestation at `(x, y)`, if any.
    #[must_use]
    pub fn energy_at(&self, x: u32, y: u32) -> Option<&EnergyManifestation> {
        self.energies
            .iter()
            .find(|energy| energy.x == x && energy.y == y)
    }

    /// Owned copy of the full world state.
    #[must_use]
    pub fn world_state(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.tick,
            phase: self.phase,
            grid_size: self.config.grid_size,
            temperature: self.temperature.cells().to_vec(),
            catalyser_lower: self.catalyser_lower.cells().to_vec(),
            catalyser_upper: self.catalyser_upper.cells().to_vec(),
            cores: self.cores.clone(),
            energies: self.energies.clone(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    #[must_use]
    pub const fn grid_size(&self) -> u32 {
        self.config.grid_size
    }

    /// World clock; advances once per emit/collect pair.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn temperature(&self) -> &ScalarField {
        &self.temperature
    }

    #[must_use]
    pub fn temperature_mut(&mut self) -> &mut ScalarField {
        &mut self.temperature
    }

    #[must_use]
    pub fn catalyser_lower(&self) -> &ScalarField {
        &self.catalyser_lower
    }

    #[must_use]
    pub fn catalyser_lower_mut(&mut self) -> &mut ScalarField {
        &mut self.catalyser_lower
    }

    #[must_use]
    pub fn catalyser_upper(&self) -> &ScalarField {
        &self.catalyser_upper
    }

    #[must_use]
    pub fn catalyser_upper_mut(&mut self) -> &mut ScalarField {
        &mut self.catalyser_upper
    }

    #[must_use]
    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    /// Mutable core access. Positions and states may be edited; the count is fixed.
    #[must_use]
    pub fn cores_mut(&mut self) -> &mut [Core] {
        &mut self.cores
    }

    #[must_use]
    pub fn energies(&self) -> &[EnergyManifestation] {
        &self.energies
    }

    #[must_use]
    pub fn energies_mut(&mut self) -> &mut Vec<EnergyManifestation> {
        &mut self.energies
    }

    /// Core state changes made by the most recent [`Self::step`].
    #[must_use]
    pub fn last_transitions(&self) -> &[CoreTransition] {
        &self.transitions
    }
}

fn neighborhood() -> impl Iterator<Item = (i64, i64)> {
    (-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (dx, dy)))
}

fn normalize(values: &mut [f32]) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    for value in values.iter_mut() {
        *value = if range > f32::EPSILON {
            ((*value - min) / range).clamp(0.0, 1.0)
        } else {
            0.5
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_world(seed: u64) -> GridWorld {
        let config = GridConfig {
            grid_size: 16,
            core_count: 8,
            ..GridConfig::default()
        };
        GridWorld::new(config, SimRng::seed_from_u64(seed)).expect("world")
    }

    #[test]
    fn reset_initialises_fields() {
        let world = small_world(1);
        assert_eq!(world.tick(), 0);
        assert_eq!(world.phase(), Phase::Emit);
        assert_eq!(world.cores().len(), 8);
        assert!(world.cores().iter().all(|c| c.state == CoreState::Dormant));
        assert!(world.energies().is_empty());
        assert!(world.catalyser_lower().cells().iter().all(|v| *v == 0.0));
        assert!(
            world
                .catalyser_upper()
                .cells()
                .iter()
                .all(|v| (0.0..2.0).contains(v))
        );
        let temps = world.temperature().cells();
        assert!(temps.iter().all(|v| (0.0..=1.0).contains(v)));
        let min = temps.iter().copied().fold(f32::INFINITY, f32::min);
        let max = temps.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, 0.0);
        assert_eq!(max, 1.0);
    }

    #[test]
    fn phases_alternate_and_tick_advances_per_pair() {
        let mut world = small_world(2);
        world.step();
        assert_eq!(world.phase(), Phase::Collect);
        assert_eq!(world.tick(), 0);
        world.step();
        assert_eq!(world.phase(), Phase::Emit);
        assert_eq!(world.tick(), 1);
        for _ in 0..10 {
            world.step();
        }
        assert_eq!(world.tick(), 6);
    }

    #[test]
    fn emit_moves_upper_into_lower_and_decays() {
        let mut world = small_world(3);
        let upper_before = world.catalyser_upper().cells().to_vec();
        world.step();
        for ((lower, upper), before) in world
            .catalyser_lower()
            .cells()
            .iter()
            .zip(world.catalyser_upper().cells())
            .zip(&upper_before)
        {
            assert!((lower - before).abs() < 1e-6);
            assert!((upper - before * 0.8).abs() < 1e-6);
        }
    }

    #[test]
    fn collect_redistributes_by_density() {
        let mut world = small_world(4);
        world.step();
        world.catalyser_lower_mut().fill(0.0);
        world.catalyser_upper_mut().fill(0.0);
        *world.catalyser_lower_mut().get_mut(5, 5).expect("cell") = 0.6;
        *world.catalyser_upper_mut().get_mut(6, 5).expect("cell") = 0.1;
        *world.catalyser_upper_mut().get_mut(5, 6).expect("cell") = 0.2;
        // a lower value with no dense neighbour is dropped
        *world.catalyser_lower_mut().get_mut(12, 12).expect("cell") = 0.4;
        world.step();
        assert_eq!(world.phase(), Phase::Emit);
        assert!(world.catalyser_lower().cells().iter().all(|v| *v == 0.0));
        let right = world.catalyser_upper().get(6, 5).expect("cell");
        let below = world.catalyser_upper().get(5, 6).expect("cell");
        assert!((right - 0.3).abs() < 1e-6, "right {right}");
        assert!((below - 0.6).abs() < 1e-6, "below {below}");
        assert_eq!(world.catalyser_upper().get(12, 12), Some(0.0));
    }

    #[test]
    fn fields_stay_in_range_over_many_steps() {
        let mut world = small_world(5);
        for _ in 0..200 {
            world.step();
            assert!(world.temperature().cells().iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(world.catalyser_lower().cells().iter().all(|v| *v >= 0.0));
            assert!(world.catalyser_upper().cells().iter().all(|v| (0.0..=2.0).contains(v)));
            assert_eq!(world.cores().len(), 8);
        }
    }

    #[test]
    fn out_of_bounds_reading_is_neutral() {
        let mut world = small_world(6);
        assert_eq!(
            world.get_raw_physical_properties(-1, 3, 0, 100.0),
            PhysicalReading::NEUTRAL
        );
        assert_eq!(
            world.get_raw_physical_properties(3, 16, 0, 100.0),
            PhysicalReading::NEUTRAL
        );
    }

    #[test]
    fn confidence_follows_distance_table() {
        assert_eq!(reading_confidence(0, 100.0), 1.0);
        assert_eq!(reading_confidence(1, 100.0), 0.9);
        assert_eq!(reading_confidence(2, 100.0), 0.7);
        assert_eq!(reading_confidence(3, 100.0), 0.5);
        assert_eq!(reading_confidence(4, 100.0), 0.3);
        assert_eq!(reading_confidence(9, 100.0), 0.1);
        assert!((reading_confidence(0, 50.0) - 0.5).abs() < 1e-6);
        assert!((reading_confidence(0, 1.0) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn centre_reading_is_noise_free_and_leaves_life_force_empty() {
        let mut world = small_world(7);
        let a = world.get_raw_physical_properties(4, 4, 0, 100.0);
        let b = world.get_raw_physical_properties(4, 4, 0, 150.0);
        assert_eq!(a, b);
        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.fields[4], 0.0);
        assert!(a.fields.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn consume_energy_rewards_once_and_schedules_relocation() {
        let mut world = small_world(8);
        let core = world.cores()[0].clone();
        world.energies_mut().push(EnergyManifestation {
            x: core.x,
            y: core.y,
            created_tick: 0,
            core_id: core.id,
        });
        assert_eq!(world.consume_energy(core.x, core.y), 10.0);
        assert_eq!(world.consume_energy(core.x, core.y), 0.0);
        assert_eq!(world.cores()[0].pending_move_tick, Some(3));

        for _ in 0..6 {
            world.step();
        }
        assert_eq!(world.tick(), 3);
        assert_eq!(world.cores()[0].pending_move_tick, Some(3));
        world.step();
        let moved = &world.cores()[0];
        assert!(moved.pending_move_tick.is_none());
        let dx = (i64::from(moved.x) - i64::from(core.x)).rem_euclid(16);
        let dy = (i64::from(moved.y) - i64::from(core.y)).rem_euclid(16);
        assert!(matches!(dx, 0 | 1 | 15) && matches!(dy, 0 | 1 | 15));
        assert!(dx != 0 || dy != 0);
    }

    #[test]
    fn stale_energy_expires() {
        let mut world = small_world(9);
        world.energies_mut().push(EnergyManifestation {
            x: 0,
            y: 0,
            created_tick: 0,
            core_id: 0,
        });
        for _ in 0..11 {
            world.step();
        }
        assert_eq!(world.tick(), 5);
        assert!(world.energies().iter().any(|e| e.created_tick == 0));
        world.step();
        world.step();
        assert!(!world.energies().iter().any(|e| e.created_tick == 0));
    }

    #[test]
    fn distant_low_energy_reading_is_noisy_within_amplitude() {
        let mut world = small_world(10);
        let clean = world.get_raw_physical_properties(6, 6, 0, 100.0);
        let confidence = reading_confidence(4, 10.0);
        assert!((confidence - 0.03).abs() < 1e-6);
        let amplitude = (1.0 - confidence) * READING_NOISE * (1.0 + 0.9);
        let mut differs = false;
        for _ in 0..20 {
            let noisy = world.get_raw_physical_properties(6, 6, 4, 10.0);
            assert_eq!(noisy.confidence, confidence);
            for (field, base) in noisy.fields.iter().zip(&clean.fields) {
                assert!((0.0..=1.0).contains(field));
                assert!((field - base).abs() <= amplitude + 1e-6, "{field} vs {base}");
                differs |= (field - base).abs() > 1e-6;
            }
        }
        assert!(differs, "readings at confidence < 1 should carry noise");
    }

    #[test]
    fn bloom_end_releases_catalyser_at_old_cell() {
        let config = GridConfig {
            grid_size: 16,
            core_count: 1,
            ..GridConfig::default()
        };
        let release = config.bloom_release;
        let mut world = GridWorld::new(config, SimRng::seed_from_u64(11)).expect("world");
        world.catalyser_upper_mut().fill(0.0);
        world.catalyser_lower_mut().fill(0.0);
        let (x, y) = (world.cores()[0].x, world.cores()[0].y);
        {
            let core = &mut world.cores_mut()[0];
            core.state = CoreState::Bloomed;
            core.bloom_tick = Some(0);
        }
        let mut released = false;
        for _ in 0..20 {
            world.step();
            let ended = world
                .last_transitions()
                .iter()
                .any(|t| t.from == CoreState::Bloomed && t.to == CoreState::Dormant);
            if ended {
                assert_eq!(world.tick(), 5);
                assert_eq!(world.catalyser_lower().get(x, y), Some(release));
                assert_ne!((world.cores()[0].x, world.cores()[0].y), (x, y));
                released = true;
                break;
            }
        }
        assert!(released, "bloomed core never went dormant");
    }

    #[test]
    fn huge_delays_saturate_instead_of_overflowing() {
        let config = GridConfig {
            grid_size: 16,
            core_count: 1,
            relocation_delay: u64::MAX,
            bloom_duration: u64::MAX,
            ..GridConfig::default()
        };
        assert!(config.validate().is_ok());
        let mut world = GridWorld::new(config, SimRng::seed_from_u64(12)).expect("world");
        let core = world.cores()[0].clone();
        world.energies_mut().push(EnergyManifestation {
            x: core.x,
            y: core.y,
            created_tick: 0,
            core_id: core.id,
        });
        world.step();
        world.step();
        assert!(world.consume_energy(core.x, core.y) > 0.0);
        assert_eq!(world.cores()[0].pending_move_tick, Some(u64::MAX));
        {
            let bloomed = &mut world.cores_mut()[0];
            bloomed.state = CoreState::Bloomed;
            bloomed.bloom_tick = Some(1);
        }
        for _ in 0..10 {
            world.step();
        }
        let after = &world.cores()[0];
        assert_eq!(after.state, CoreState::Bloomed);
        assert_eq!((after.x, after.y), (core.x, core.y));
    }

    #[test]
    fn wrap_handles_negative_coordinates() {
        assert_eq!(wrap(-1, -1, 16), (15, 15));
        assert_eq!(wrap(16, 17, 16), (0, 1));
    }
}
