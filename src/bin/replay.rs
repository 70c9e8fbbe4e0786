use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tethered_flight::registry::EntityRegistry;
use tethered_flight::replay::{ReplaySession, ReplayTick};
use tethered_flight::ExperimentConfig;

/// Safety net for logs whose streams never run out
const MAX_TICKS: usize = 10_000_000;

#[derive(Parser, Debug)]
struct Args {
    /// Recorded trial folder (`<sequence>/<idx>_<trial>`)
    #[arg(long, conflicts_with = "batch_dir")]
    trial_dir: Option<PathBuf>,

    /// Sequence folder; every trial folder inside is replayed
    #[arg(long)]
    batch_dir: Option<PathBuf>,

    /// Experiment config holding the scene descriptions (JSON, optionally .gz)
    #[arg(long)]
    config: PathBuf,

    /// Fixed tick used to report replay time
    #[arg(long, default_value = "0.02")]
    dt: f64,
}

fn run_once(trial_dir: &Path, config: &ExperimentConfig, dt: f64) -> anyhow::Result<serde_json::Value> {
    let session = ReplaySession::load(trial_dir)?;
    let trial = &session.record.trial;
    let scene = config
        .scene(&trial.scene)
        .with_context(|| format!("scene {} is not in the config", trial.scene))?;

    let mut registry = EntityRegistry::new();
    registry.load_scene(scene)?;
    let mut replayer = session.load_streams(&registry)?;
    replayer.begin(&mut registry)?;

    let mut ticks = 0usize;
    loop {
        match replayer.tick(&mut registry) {
            ReplayTick::Playing => ticks += 1,
            ReplayTick::Ended | ReplayTick::Finished => break,
        }
        if ticks >= MAX_TICKS {
            anyhow::bail!("replay of {} did not end", trial_dir.display());
        }
    }
    replayer.release(&mut registry);

    let entities: Vec<serde_json::Value> = registry
        .iter()
        .map(|e| {
            let p = e.pose.position;
            json!({
                "id": e.id().0,
                "name": e.name,
                "rows": replayer.stream_len(e.id()),
                "visible": e.visible,
                "final_position": [p.x, p.y, p.z],
                "final_rotation": [e.pose.rotation.x, e.pose.rotation.y, e.pose.rotation.z],
            })
        })
        .collect();

    Ok(json!({
        "trial_dir": trial_dir.display().to_string(),
        "profile": session.sequence.profile.name,
        "sequence": session.sequence.sequence_name,
        "trial": trial.name,
        "scene": trial.scene,
        "position_in_sequence": session.record.position_in_sequence,
        "completed_by": session.record.completed_by.map(|c| c.to_string()),
        "interventions": trial.interventions.len(),
        "ticks": ticks,
        "replay_seconds": ticks as f64 * dt,
        "entities": entities,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = ExperimentConfig::load(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let mut results = Vec::new();

    if let Some(dir) = args.batch_dir.as_ref() {
        let mut trial_dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        trial_dirs.sort();
        for path in trial_dirs {
            match run_once(&path, &config, args.dt) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(trial_dir) = args.trial_dir.as_ref() {
        results.push(run_once(trial_dir, &config, args.dt)?);
    } else {
        anyhow::bail!("Provide --trial-dir or --batch-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
