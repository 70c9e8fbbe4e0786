use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use tethered_flight::experiment::{Command, Experiment, ExperimentEvent};
use tethered_flight::ingest::{IngestGate, PacketRateProbe, TelemetryReceiver};
use tethered_flight::live_status::LiveStatus;
use tethered_flight::stimulus::LoggingDisplay;
use tethered_flight::ExperimentConfig;

const PACKET_TEST_WINDOW: Duration = Duration::from_secs(10);
const STATUS_EVERY: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "tethered_flight")]
#[command(about = "Closed-loop VR rig for tethered flight experiments", long_about = None)]
struct Args {
    /// Experiment config (JSON, optionally .gz)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory (overrides the config)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// UDP port for tracker packets (overrides the config)
    #[arg(long)]
    port: Option<u16>,

    /// Run time in seconds (0 = until ctrl-c or all sequences finish)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Count packets per second for 10 s, then exit
    #[arg(long)]
    packet_test: bool,

    /// Do not write any trial data
    #[arg(long)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            log::warn!("No --config given, running the default profile with no sequences");
            ExperimentConfig::default()
        }
    };
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(port) = args.port {
        config.udp_port = port;
    }
    if args.no_save {
        config.save_data = false;
    }
    if config.save_data {
        std::fs::create_dir_all(&config.output_dir)
            .with_context(|| format!("creating {}", config.output_dir.display()))?;
    }

    log::info!("[{}] Tethered flight rig starting", ts_now());
    log::info!("  Profile: {}", config.profile_name);
    log::info!("  UDP port: {}", config.udp_port);
    log::info!("  Fixed dt: {}s, render dt: {:.4}s", config.fixed_dt, config.render_dt);
    log::info!("  Output dir: {} (saving: {})", config.output_dir.display(), config.save_data);

    if args.packet_test {
        return packet_test(config.udp_port, config.channel_capacity).await;
    }

    let output_dir = config.output_dir.clone();
    let (fixed_dt, render_dt) = (config.fixed_dt, config.render_dt);
    let mut experiment = Experiment::new(config.clone(), Box::new(LoggingDisplay::default()));
    let mut receiver = TelemetryReceiver::spawn(config.udp_port, config.channel_capacity, experiment.gate())
        .with_context(|| format!("binding UDP port {}", config.udp_port))?;

    // Operator commands, one per line
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);
    let _stdin_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(command) => {
                    if cmd_tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }
    });
    log::info!("Commands: start, skip, stop, print");

    let mut fixed_tick = interval(Duration::from_secs_f64(fixed_dt));
    fixed_tick.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut render_tick = interval(Duration::from_secs_f64(render_dt));
    render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_tick = interval(STATUS_EVERY);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let start = Utc::now();
    let started = Instant::now();
    let status_path = output_dir.join("live_status.json");

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                log::info!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        tokio::select! {
            _ = fixed_tick.tick() => {
                for raw in receiver.drain() {
                    experiment.handle_packet(&raw);
                }
                experiment.fixed_update(fixed_dt);
            }
            _ = render_tick.tick() => {
                experiment.render_frame(render_dt);
            }
            _ = status_tick.tick() => {
                let status = LiveStatus::capture(&experiment, receiver.stats(), started.elapsed().as_secs());
                if let Err(e) = status.save(&status_path.to_string_lossy()) {
                    log::debug!("Could not save live status: {}", e);
                }
            }
            Some(command) = cmd_rx.recv() => {
                experiment.command(command);
            }
            _ = &mut ctrl_c => {
                log::info!("[{}] Ctrl-C received, stopping...", ts_now());
                break;
            }
        }

        let mut finished = false;
        for event in experiment.take_events() {
            log::debug!("{:?}", event);
            if event == ExperimentEvent::AllSequencesFinished {
                finished = true;
            }
        }
        if finished && args.duration == 0 {
            log::info!("[{}] Nothing left to run", ts_now());
            break;
        }
    }

    if experiment.is_running() {
        experiment.command(Command::Stop);
    }
    receiver.shutdown();

    let final_status = LiveStatus::capture(&experiment, receiver.stats(), started.elapsed().as_secs());
    let final_path = output_dir.join("live_status_final.json");
    if let Err(e) = final_status.save(&final_path.to_string_lossy()) {
        log::warn!("Could not save final status: {}", e);
    }
    log::info!(
        "[{}] Received {} packets ({} dropped inactive, {} dropped full)",
        ts_now(),
        final_status.packets_received,
        final_status.packets_dropped_inactive,
        final_status.packets_dropped_full
    );
    Ok(())
}

/// Hold the gate open and report the packet rate over a fixed window
async fn packet_test(port: u16, capacity: usize) -> Result<()> {
    let gate = IngestGate::new();
    let mut receiver = TelemetryReceiver::spawn(port, capacity, gate.clone())
        .with_context(|| format!("binding UDP port {}", port))?;
    gate.open();
    log::info!("Packet test: counting for {}s on {}", PACKET_TEST_WINDOW.as_secs(), receiver.local_addr());

    let mut probe = PacketRateProbe::new(PACKET_TEST_WINDOW);
    let mut tick = interval(Duration::from_millis(5));
    probe.roll(Instant::now());
    loop {
        tick.tick().await;
        let now = Instant::now();
        for _ in receiver.drain() {
            probe.count(now);
        }
        probe.roll(now);
        if probe.is_done(now) {
            break;
        }
    }
    receiver.shutdown();
    log::info!(
        "Packets received per second = {:.1} ({} total, dropped full {})",
        probe.rate(),
        probe.total(),
        receiver.stats().dropped_full
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
