use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use lifegrid_core::{GridConfig, GridWorld, PopulationConfig, SimRng, Simulation, SimulationConfig};
use std::hint::black_box;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn bench_world_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_step");
    group.sample_size(env_or("LG_BENCH_SAMPLES", 30_usize).max(10));
    group.measurement_time(Duration::from_secs(env_or("LG_BENCH_MEASURE_SECS", 5)));
    for size in [64_u32, 128, 256] {
        group.bench_function(format!("grid{size}"), |b| {
            let config = GridConfig {
                grid_size: size,
                ..GridConfig::default()
            };
            let mut world =
                GridWorld::new(config, SimRng::seed_from_u64(0xBEEF)).expect("world");
            b.iter(|| {
                world.step();
                black_box(world.tick());
            });
        });
    }
    group.finish();
}

fn bench_simulation_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_tick");
    group.sample_size(env_or("LG_BENCH_SAMPLES", 20_usize).max(10));
    group.warm_up_time(Duration::from_secs(env_or("LG_BENCH_WARMUP_SECS", 2)));
    group.measurement_time(Duration::from_secs(env_or("LG_BENCH_MEASURE_SECS", 10)));
    let steps: usize = env_or("LG_BENCH_STEPS", 16);
    let agents_list: Vec<usize> = std::env::var("LG_BENCH_AGENTS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![5_usize, 20]);
    for &agents in &agents_list {
        group.bench_function(format!("steps{steps}_agents{agents}"), |b| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        rng_seed: Some(0xBEEF),
                        snapshot_interval: 0,
                        population: PopulationConfig {
                            size: agents,
                            ..PopulationConfig::default()
                        },
                        ..SimulationConfig::default()
                    };
                    Simulation::new(config).expect("simulation")
                },
                |mut sim| {
                    for _ in 0..steps {
                        black_box(sim.step());
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_world_steps, bench_simulation_ticks);
criterion_main!(benches);
