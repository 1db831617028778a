use std::fs;

use lifegrid_app::JsonlRecorder;
use lifegrid_core::{GridConfig, PopulationConfig, Simulation, SimulationConfig, TickBatch};

fn config() -> SimulationConfig {
    SimulationConfig {
        rng_seed: Some(0xFEED),
        policy_snapshot_interval: 3,
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

#[test]
fn recorder_writes_one_line_per_batch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.jsonl");
    {
        let recorder = JsonlRecorder::create(&path).expect("recorder");
        let mut sim = Simulation::with_observer(config(), Box::new(recorder)).expect("sim");
        for _ in 0..6 {
            sim.step();
        }
    }

    let contents = fs::read_to_string(&path).expect("read recording");
    let batches: Vec<TickBatch> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("batch json"))
        .collect();
    assert_eq!(batches.len(), 6);
    let ticks: Vec<u64> = batches.iter().map(|batch| batch.tick).collect();
    assert_eq!(ticks, [1, 2, 3, 4, 5, 6]);
    assert!(batches.iter().all(|batch| batch.agents.len() == 3));
    assert_eq!(batches[0].events.len(), 3);
    let with_policy: Vec<u64> = batches
        .iter()
        .filter(|batch| batch.policy.is_some())
        .map(|batch| batch.tick)
        .collect();
    assert_eq!(with_policy, [3, 6]);
}

#[test]
fn recorder_can_skip_policy_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("lean.jsonl");
    {
        let recorder = JsonlRecorder::create(&path)
            .expect("recorder")
            .without_policies();
        let mut sim = Simulation::with_observer(config(), Box::new(recorder)).expect("sim");
        for _ in 0..3 {
            sim.step();
        }
    }
    let contents = fs::read_to_string(&path).expect("read recording");
    assert_eq!(contents.lines().count(), 3);
    assert!(!contents.contains("\"serialized\""));
}

#[test]
fn recording_does_not_change_outcomes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = JsonlRecorder::create(dir.path().join("a.jsonl")).expect("recorder");
    let mut recorded = Simulation::with_observer(config(), Box::new(recorder)).expect("sim");
    let mut plain = Simulation::new(config()).expect("sim");
    for _ in 0..8 {
        assert_eq!(recorded.step(), plain.step());
    }
}
