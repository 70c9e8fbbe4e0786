use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::entity::MotionAuthority;
use crate::experiment::Experiment;
use crate::ingest::IngestStats;
use crate::trial::{CompletedBy, LoopStatus};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub loop_status: LoopStatus,
    // Sequence progress
    pub sequence: Option<String>,
    pub trial_index: Option<usize>,
    pub trial_name: Option<String>,
    pub completed_by: Option<CompletedBy>,
    pub sim_time: f64,
    // Ingest
    pub packets_received: u64,
    pub packets_dropped_inactive: u64,
    pub packets_dropped_full: u64,
    pub packets_this_trial: u64,
    // Motion
    pub unique_updates: u64,
    pub duplicate_updates: u64,
    pub yaw_dps: f64,
    pub thrust_mps: f64,
    pub avatar_position: [f64; 3],
    pub avatar_yaw_deg: f64,
    pub avatar_authority: Option<MotionAuthority>,
    pub scene_yaw_deg: f64,
    pub interventions_fired: usize,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            loop_status: LoopStatus::BetweenTrials,
            sequence: None,
            trial_index: None,
            trial_name: None,
            completed_by: None,
            sim_time: 0.0,
            packets_received: 0,
            packets_dropped_inactive: 0,
            packets_dropped_full: 0,
            packets_this_trial: 0,
            unique_updates: 0,
            duplicate_updates: 0,
            yaw_dps: 0.0,
            thrust_mps: 0.0,
            avatar_position: [0.0; 3],
            avatar_yaw_deg: 0.0,
            avatar_authority: None,
            scene_yaw_deg: 0.0,
            interventions_fired: 0,
        }
    }

    /// Snapshot of the running experiment
    pub fn capture(experiment: &Experiment, ingest: IngestStats, uptime_seconds: u64) -> Self {
        let mut status = Self::new();
        status.uptime_seconds = uptime_seconds;
        status.loop_status = experiment.status();
        if let Some((sequence, index, name)) = experiment.current_trial() {
            status.sequence = Some(sequence.to_string());
            status.trial_index = Some(index);
            status.trial_name = Some(name.to_string());
        }
        status.completed_by = experiment.completed_by();
        status.sim_time = experiment.now();

        status.packets_received = ingest.received;
        status.packets_dropped_inactive = ingest.dropped_inactive;
        status.packets_dropped_full = ingest.dropped_full;
        status.packets_this_trial = experiment.packets_this_trial();

        let motion = experiment.motion();
        let stats = motion.stats();
        status.unique_updates = stats.unique_packets;
        status.duplicate_updates = stats.duplicate_packets;
        status.yaw_dps = motion.yaw_dps();
        status.thrust_mps = motion.thrust_mps();

        let registry = experiment.registry();
        if let Some(avatar) = registry.avatar_id().and_then(|id| registry.get(id)) {
            let p = avatar.pose.position;
            status.avatar_position = [p.x, p.y, p.z];
            status.avatar_yaw_deg = avatar.pose.rotation.y;
            status.avatar_authority = Some(avatar.authority());
        }
        status.scene_yaw_deg = experiment.scene_yaw();
        status.interventions_fired = experiment.interventions().fired();
        status
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
