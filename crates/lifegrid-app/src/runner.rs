use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lifegrid_core::{
    ControlCommand, NullObserver, Simulation, SimulationConfig, SimulationObserver,
    apply_control_command,
};
use tracing::{info, warn};

use crate::command::{
    CommandSubmit, PumpOutcome, create_command_bus, drain_pending_commands, make_command_submit,
    pump_commands,
};
use crate::recorder::JsonlRecorder;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lifegrid",
    version,
    about = "Run the LifeGrid artificial-life simulation headlessly"
)]
pub struct Cli {
    /// JSON configuration file; absent fields keep their defaults.
    #[arg(long, env = "LIFEGRID_CONFIG")]
    pub config: Option<PathBuf>,
    /// RNG seed for a reproducible run.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Ticks to run before exiting; 0 runs until `quit` or interruption.
    #[arg(long, default_value_t = 1_000)]
    pub ticks: u64,
    #[arg(long)]
    pub grid_size: Option<u32>,
    #[arg(long)]
    pub population: Option<usize>,
    #[arg(long)]
    pub snapshot_interval: Option<u64>,
    /// Write observer batches as JSON lines to this file.
    #[arg(long)]
    pub record: Option<PathBuf>,
    /// Leave policy snapshots out of the recording.
    #[arg(long)]
    pub no_policies: bool,
    /// Write the exported population state as JSON when the run ends.
    #[arg(long)]
    pub export: Option<PathBuf>,
    /// Read commands from stdin: start, stop, step N, select ID|none, evolve, reset, quit.
    #[arg(long)]
    pub interactive: bool,
    /// Start stopped; requires --interactive.
    #[arg(long, requires = "interactive")]
    pub paused: bool,
    /// Ticks between progress log lines; 0 disables them.
    #[arg(long, default_value_t = 100)]
    pub log_every: u64,
}

/// Final state reported when a run ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub generation: u64,
    pub total_deaths: u64,
    pub best_fitness: f32,
}

/// Read the configuration file (if any) and apply command-line overrides on top.
pub fn load_config(cli: &Cli) -> Result<SimulationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            SimulationConfig::from_json(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(grid_size) = cli.grid_size {
        config.grid.grid_size = grid_size;
    }
    if let Some(size) = cli.population {
        config.population.size = size;
    }
    if let Some(interval) = cli.snapshot_interval {
        config.snapshot_interval = interval;
    }
    config.validate().context("invalid configuration overrides")?;
    Ok(config)
}

/// The reader owns the only submitter, so the bus disconnects once stdin is exhausted.
fn spawn_stdin_reader(submit: CommandSubmit, quit: Arc<AtomicBool>) -> Result<()> {
    thread::Builder::new()
        .name("lifegrid-stdin".into())
        .spawn(move || match pump_commands(io::stdin().lock(), &submit) {
            PumpOutcome::Quit => {
                info!("quit requested");
                quit.store(true, Ordering::Release);
            }
            PumpOutcome::EndOfInput => info!("command input closed"),
            PumpOutcome::BusClosed => {}
        })
        .context("failed to spawn stdin command reader")?;
    Ok(())
}

/// Run a simulation to completion according to `cli`.
pub fn run(cli: &Cli) -> Result<RunSummary> {
    let config = load_config(cli)?;
    let observer: Box<dyn SimulationObserver> = match &cli.record {
        Some(path) => {
            let recorder = JsonlRecorder::create(path)
                .with_context(|| format!("failed to open recording {}", path.display()))?;
            if cli.no_policies {
                Box::new(recorder.without_policies())
            } else {
                Box::new(recorder)
            }
        }
        None => Box::new(NullObserver),
    };
    let mut sim = Simulation::with_observer(config, observer)?;

    let (sender, receiver) = create_command_bus(COMMAND_QUEUE_CAPACITY);
    let quit = Arc::new(AtomicBool::new(false));
    if cli.interactive {
        spawn_stdin_reader(make_command_submit(sender), Arc::clone(&quit))?;
    } else {
        drop(sender);
    }
    if !cli.paused {
        apply_control_command(&mut sim, ControlCommand::Start);
    }
    info!(ticks = cli.ticks, interactive = cli.interactive, "run started");

    loop {
        let drained = drain_pending_commands(&receiver, &mut sim);
        if quit.load(Ordering::Acquire) {
            break;
        }
        if cli.ticks > 0 && sim.tick() >= cli.ticks {
            break;
        }
        if sim.is_running() {
            let events = sim.step();
            if cli.log_every > 0 && events.tick.is_multiple_of(cli.log_every) {
                let stats = sim.population().stats(events.tick);
                info!(
                    tick = events.tick,
                    world_tick = events.world_tick,
                    living = stats.living,
                    avg_fitness = stats.average_fitness,
                    best_fitness = events.best_fitness,
                    deaths = stats.total_deaths,
                    "progress"
                );
            }
        } else if !drained.disconnected {
            thread::sleep(IDLE_POLL);
        } else {
            warn!(
                tick = sim.tick(),
                "simulation stopped with no command source left; ending run"
            );
            break;
        }
    }

    if let Some(path) = &cli.export {
        let export = sim.population().export_population_state(sim.tick())?;
        let file = File::create(path)
            .with_context(|| format!("failed to create export {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &export)
            .with_context(|| format!("failed to write export {}", path.display()))?;
        info!(path = %path.display(), "population exported");
    }

    let summary = RunSummary {
        ticks: sim.tick(),
        generation: sim.population().generation(),
        total_deaths: sim.population().total_deaths(),
        best_fitness: sim.population().best_fitness_ever(),
    };
    info!(
        ticks = summary.ticks,
        generation = summary.generation,
        deaths = summary.total_deaths,
        best_fitness = summary.best_fitness,
        "run finished"
    );
    Ok(summary)
}
